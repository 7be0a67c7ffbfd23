//! Chat wire protocol.
//!
//! Length-prefixed frames carrying delimiter-separated text fields:
//!
//! ```text
//! Frame:   <4-digit space-padded body length><body>
//! Body:    <command>\n<param>\n<param>...
//!
//! Request:  "  11login\nalice"
//! Response: "  22login_reply\ntrue\nalice"
//! ```
//!
//! ## Commands
//! - `login <name>` → `login_reply <true|false> <name>`
//! - `broadcast <text...>` → relayed verbatim to every logged-in client
//! - `whisper <...> <dest>` → relayed verbatim to the client logged in as `dest`
//! - `list_users` → `reply_users <name, name, ...>`
//!
//! Bodies use ISO-8859-1, agreed out of band.

pub mod frame;
pub mod handler;
pub mod message;

pub use frame::{parse, Frame, FrameError, ParseResult};
pub use handler::{Delivery, Dispatcher};
