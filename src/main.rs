//! latin-chat: a single-threaded text chat server
//!
//! Clients connect over TCP, claim a unique login name, and exchange
//! broadcast or direct ("whisper") messages framed by a 4-digit length
//! header.
//!
//! Features:
//! - One mio event loop multiplexing every socket, no per-client threads
//! - Login registry with unique, case-sensitive names
//! - Broadcast, whisper and user listing
//! - Configuration via CLI arguments or TOML file

mod config;
mod protocol;
mod registry;
mod runtime;

use config::Config;
use tracing::info;
use tracing_subscriber::EnvFilter;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load configuration
    let config = Config::load()?;

    // Initialize logging
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    info!(
        listen = %config.listen,
        backlog = config.backlog,
        max_connections = config.max_connections,
        require_login = config.require_login,
        "Starting latin-chat server"
    );

    runtime::run(&config)?;
    Ok(())
}
