//! Command dispatch against the connection registry.
//!
//! The dispatcher never touches sockets: it mutates the registry and returns
//! the frames to send, leaving delivery to the event loop.

use bytes::Bytes;
use tracing::{debug, info, warn};

use super::frame::{Frame, FrameError};
use super::message::{response_login, response_users, Command, Message};
use crate::registry::{ConnId, PromoteResult, Registry};

/// A frame queued for one recipient.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    pub to: ConnId,
    pub data: Bytes,
}

impl Delivery {
    fn frame(to: ConnId, frame: &Frame) -> Self {
        Self {
            to,
            data: frame.to_bytes(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct Dispatcher {
    /// Drop chat commands from connections that have not logged in.
    require_login: bool,
}

impl Dispatcher {
    pub fn new(require_login: bool) -> Self {
        Self { require_login }
    }

    /// Handle one frame received from `from`.
    pub fn dispatch(&self, from: ConnId, frame: &Frame, registry: &mut Registry) -> Vec<Delivery> {
        let message = Message::from_frame(frame);
        let command = match Command::parse(&message) {
            Ok(command) => command,
            Err(e) => {
                warn!(conn_id = %from, error = %e, "Protocol error");
                return Vec::new();
            }
        };

        if self.require_login
            && !matches!(command, Command::Login { .. } | Command::Unknown(_))
            && !registry.is_logged_in(from)
        {
            warn!(conn_id = %from, command = %message.command, "Command before login dropped");
            return Vec::new();
        }

        match command {
            Command::Login { name } => login(from, name, registry),
            Command::Broadcast => {
                debug!(
                    conn_id = %from,
                    sender = ?registry.identity(from),
                    recipients = registry.logged_in_count(),
                    "Broadcast"
                );
                registry
                    .all_logged()
                    .map(|to| Delivery::frame(to, frame))
                    .collect()
            }
            Command::Whisper { to } => match registry.by_login(to) {
                Some(dest) => {
                    debug!(conn_id = %from, login = %to, "Whisper");
                    vec![Delivery::frame(dest, frame)]
                }
                None => {
                    info!(conn_id = %from, login = %to, "Whisper to unknown login dropped");
                    Vec::new()
                }
            },
            Command::ListUsers => reply(from, response_users(registry.logins())),
            Command::Unknown(name) => {
                info!(conn_id = %from, command = %name, "Unknown command");
                Vec::new()
            }
        }
    }
}

fn login(from: ConnId, name: &str, registry: &mut Registry) -> Vec<Delivery> {
    // The refusal is the longer reply; if it can't be framed, leave state alone
    if let Err(e) = response_login(false, name) {
        warn!(conn_id = %from, name_len = name.len(), error = %e, "Login name too long for reply");
        return Vec::new();
    }

    let result = registry.promote(from, name);
    match result {
        PromoteResult::Promoted => info!(conn_id = %from, login = %name, "Logged in"),
        PromoteResult::Collision => info!(conn_id = %from, login = %name, "Login name in use"),
        PromoteResult::NotAnonymous | PromoteResult::EmptyName => {
            warn!(conn_id = %from, login = %name, reason = ?result, "Login refused")
        }
    }
    reply(from, response_login(result.is_success(), name))
}

fn reply(to: ConnId, frame: Result<Frame, FrameError>) -> Vec<Delivery> {
    match frame {
        Ok(frame) => vec![Delivery::frame(to, &frame)],
        Err(e) => {
            warn!(conn_id = %to, error = %e, "Reply could not be framed");
            Vec::new()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::frame::{decode_text, HEADER_LENGTH, MAX_BODY_LENGTH};
    use crate::registry::Identity;

    fn frame(text: &str) -> Frame {
        Frame::encode(text).unwrap()
    }

    fn texts(deliveries: &[Delivery]) -> Vec<(ConnId, String)> {
        deliveries
            .iter()
            .map(|d| {
                let raw = d.data.as_ref();
                (d.to, decode_text(&raw[HEADER_LENGTH..]))
            })
            .collect()
    }

    fn registry_with(ids: &[usize]) -> Registry {
        let mut registry = Registry::new();
        for &id in ids {
            registry.register_anonymous(ConnId(id));
        }
        registry
    }

    #[test]
    fn test_login_success_and_collision() {
        let dispatcher = Dispatcher::default();
        let mut registry = registry_with(&[1, 2]);

        let out = dispatcher.dispatch(ConnId(1), &frame("login\nalice"), &mut registry);
        assert_eq!(texts(&out), vec![(ConnId(1), "login_reply\ntrue\nalice".to_string())]);

        let out = dispatcher.dispatch(ConnId(2), &frame("login\nalice"), &mut registry);
        assert_eq!(texts(&out), vec![(ConnId(2), "login_reply\nfalse\nalice".to_string())]);

        assert_eq!(registry.by_login("alice"), Some(ConnId(1)));
        assert_eq!(registry.identity(ConnId(2)), Some(Identity::Anonymous));
    }

    #[test]
    fn test_login_missing_name() {
        let dispatcher = Dispatcher::default();
        let mut registry = registry_with(&[1]);

        let out = dispatcher.dispatch(ConnId(1), &frame("login"), &mut registry);
        assert!(out.is_empty());
        assert_eq!(registry.identity(ConnId(1)), Some(Identity::Anonymous));
    }

    #[test]
    fn test_login_name_must_fit_reply() {
        let dispatcher = Dispatcher::default();
        let mut registry = registry_with(&[1, 2, 3]);

        // "login_reply\nfalse\n" is 18 bytes
        let longest = "a".repeat(MAX_BODY_LENGTH - 18);
        let out = dispatcher.dispatch(ConnId(1), &frame(&format!("login\n{}", longest)), &mut registry);
        assert_eq!(texts(&out), vec![(ConnId(1), format!("login_reply\ntrue\n{}", longest))]);

        for len in [MAX_BODY_LENGTH - 17, MAX_BODY_LENGTH - "login\n".len()] {
            let name = "b".repeat(len);
            let out = dispatcher.dispatch(ConnId(2), &frame(&format!("login\n{}", name)), &mut registry);
            assert!(out.is_empty());
            assert_eq!(registry.identity(ConnId(2)), Some(Identity::Anonymous));
            assert_eq!(registry.by_login(&name), None);
        }

        // Same length as an accepted name, but taken: the refusal still fits
        let out = dispatcher.dispatch(ConnId(3), &frame(&format!("login\n{}", longest)), &mut registry);
        assert_eq!(texts(&out), vec![(ConnId(3), format!("login_reply\nfalse\n{}", longest))]);
        assert_eq!(registry.logged_in_count(), 1);
    }

    #[test]
    fn test_second_login_refused() {
        let dispatcher = Dispatcher::default();
        let mut registry = registry_with(&[1]);
        dispatcher.dispatch(ConnId(1), &frame("login\nalice"), &mut registry);

        let out = dispatcher.dispatch(ConnId(1), &frame("login\nbob"), &mut registry);
        assert_eq!(texts(&out), vec![(ConnId(1), "login_reply\nfalse\nbob".to_string())]);
        assert_eq!(registry.by_login("bob"), None);
    }

    #[test]
    fn test_broadcast_fans_out_verbatim_to_logged_in_only() {
        let dispatcher = Dispatcher::default();
        let mut registry = registry_with(&[1, 2, 3]);
        registry.promote(ConnId(1), "alice");
        registry.promote(ConnId(2), "bob");

        let message = frame("broadcast\nhello\nworld");
        let out = dispatcher.dispatch(ConnId(1), &message, &mut registry);

        let mut recipients: Vec<ConnId> = out.iter().map(|d| d.to).collect();
        recipients.sort();
        assert_eq!(recipients, vec![ConnId(1), ConnId(2)]);
        assert!(out.iter().all(|d| d.data.as_ref() == message.as_bytes()));
    }

    #[test]
    fn test_broadcast_from_anonymous_allowed_by_default() {
        let dispatcher = Dispatcher::default();
        let mut registry = registry_with(&[1, 2]);
        registry.promote(ConnId(2), "bob");

        let out = dispatcher.dispatch(ConnId(1), &frame("broadcast\nhi"), &mut registry);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].to, ConnId(2));
    }

    #[test]
    fn test_require_login_drops_anonymous_commands() {
        let dispatcher = Dispatcher::new(true);
        let mut registry = registry_with(&[1, 2]);
        registry.promote(ConnId(2), "bob");

        for text in ["broadcast\nhi", "whisper\nhi\nbob", "list_users"] {
            assert!(dispatcher.dispatch(ConnId(1), &frame(text), &mut registry).is_empty());
        }

        let out = dispatcher.dispatch(ConnId(1), &frame("login\nalice"), &mut registry);
        assert_eq!(out.len(), 1);
        let out = dispatcher.dispatch(ConnId(1), &frame("list_users"), &mut registry);
        assert_eq!(texts(&out), vec![(ConnId(1), "reply_users\nalice, bob".to_string())]);
    }

    #[test]
    fn test_whisper_targets_single_login() {
        let dispatcher = Dispatcher::default();
        let mut registry = registry_with(&[1, 2, 3]);
        registry.promote(ConnId(1), "alice");
        registry.promote(ConnId(2), "bob");
        registry.promote(ConnId(3), "carol");

        let message = frame("whisper\npsst\nbob");
        let out = dispatcher.dispatch(ConnId(1), &message, &mut registry);
        assert_eq!(out, vec![Delivery { to: ConnId(2), data: message.to_bytes() }]);
    }

    #[test]
    fn test_whisper_to_unknown_login_is_dropped() {
        let dispatcher = Dispatcher::default();
        let mut registry = registry_with(&[1]);
        registry.promote(ConnId(1), "alice");

        let out = dispatcher.dispatch(ConnId(1), &frame("whisper\npsst\nnobody"), &mut registry);
        assert!(out.is_empty());
        assert!(registry.contains(ConnId(1)));
    }

    #[test]
    fn test_list_users() {
        let dispatcher = Dispatcher::default();
        let mut registry = registry_with(&[1, 2, 3]);
        registry.promote(ConnId(2), "bob");
        registry.promote(ConnId(1), "alice");

        let out = dispatcher.dispatch(ConnId(3), &frame("list_users"), &mut registry);
        assert_eq!(texts(&out), vec![(ConnId(3), "reply_users\nalice, bob".to_string())]);
    }

    #[test]
    fn test_unknown_command_is_ignored() {
        let dispatcher = Dispatcher::default();
        let mut registry = registry_with(&[1]);

        assert!(dispatcher.dispatch(ConnId(1), &frame("dance\nnow"), &mut registry).is_empty());
        assert!(dispatcher.dispatch(ConnId(1), &frame(""), &mut registry).is_empty());
        assert_eq!(registry.identity(ConnId(1)), Some(Identity::Anonymous));
    }

    #[test]
    fn test_removed_connection_not_targeted() {
        let dispatcher = Dispatcher::default();
        let mut registry = registry_with(&[1, 2]);
        registry.promote(ConnId(1), "alice");
        registry.promote(ConnId(2), "bob");
        registry.remove(ConnId(1));

        let out = dispatcher.dispatch(ConnId(2), &frame("broadcast\nhi"), &mut registry);
        assert_eq!(out.iter().map(|d| d.to).collect::<Vec<_>>(), vec![ConnId(2)]);

        let out = dispatcher.dispatch(ConnId(2), &frame("whisper\nhi\nalice"), &mut registry);
        assert!(out.is_empty());
    }
}
