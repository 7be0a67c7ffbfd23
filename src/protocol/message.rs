//! Message decoding and chat command parsing.

use super::frame::{Frame, FrameError};

/// Field separator inside a frame body.
pub const DELIMITER: &str = "\n";

/// Separator between names in a `reply_users` body.
const USER_SEPARATOR: &str = ", ";

/// A decoded frame body: command name plus ordered parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub command: String,
    pub params: Vec<String>,
}

impl Message {
    /// Split decoded body text on the delimiter.
    pub fn decode(text: &str) -> Self {
        let mut fields = text.split(DELIMITER).map(str::to_string);
        // split always yields at least one field
        let command = fields.next().unwrap_or_default();
        Self {
            command,
            params: fields.collect(),
        }
    }

    pub fn from_frame(frame: &Frame) -> Self {
        Self::decode(&frame.text())
    }
}

/// Parsed chat command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command<'a> {
    /// Claim a login name.
    Login { name: &'a str },
    /// Relay the frame to every logged-in connection.
    Broadcast,
    /// Relay the frame to one login (the last parameter).
    Whisper { to: &'a str },
    /// Ask for the logged-in names.
    ListUsers,
    /// Anything else; carries the command name for diagnostics.
    Unknown(&'a str),
}

/// Command parse errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CommandError {
    #[error("{0} requires a {1} parameter")]
    MissingParameter(&'static str, &'static str),
}

impl<'a> Command<'a> {
    pub fn parse(message: &'a Message) -> Result<Self, CommandError> {
        match message.command.as_str() {
            "login" => message
                .params
                .first()
                .map(|name| Command::Login {
                    name: name.as_str(),
                })
                .ok_or(CommandError::MissingParameter("login", "name")),
            "broadcast" => Ok(Command::Broadcast),
            "whisper" => message
                .params
                .last()
                .map(|to| Command::Whisper { to: to.as_str() })
                .ok_or(CommandError::MissingParameter("whisper", "destination")),
            "list_users" => Ok(Command::ListUsers),
            other => Ok(Command::Unknown(other)),
        }
    }
}

/// Build a `login_reply` frame.
pub fn response_login(success: bool, name: &str) -> Result<Frame, FrameError> {
    encode_fields(&["login_reply", if success { "true" } else { "false" }, name])
}

/// Build a `reply_users` frame from logged-in names.
pub fn response_users<'a>(names: impl IntoIterator<Item = &'a str>) -> Result<Frame, FrameError> {
    let users = names.into_iter().collect::<Vec<_>>().join(USER_SEPARATOR);
    encode_fields(&["reply_users", &users])
}

/// Join fields with the delimiter and frame them.
pub fn encode_fields(fields: &[&str]) -> Result<Frame, FrameError> {
    Frame::encode(&fields.join(DELIMITER))
}
