//! Single-threaded readiness runtime.
//!
//! - `Server`: the mio event loop (epoll on Linux, kqueue on macOS)
//! - `ChatConnection`: per-socket read/write buffers and close handling

mod connection;
mod event_loop;

pub use event_loop::Server;

use crate::config::Config;

/// Bind the configured address and serve until the process is killed.
pub fn run(config: &Config) -> std::io::Result<()> {
    let mut server = Server::bind(config)?;
    server.run()
}
