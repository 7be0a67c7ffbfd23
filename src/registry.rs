//! Connection registry tracking login state.
//!
//! Every accepted connection is either anonymous or logged in under exactly
//! one unique name. The registry only tracks identity; the sockets themselves
//! live in the event loop's slab and are addressed by [`ConnId`].

use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;

/// Opaque handle of an accepted connection (its slab key).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnId(pub usize);

impl fmt::Display for ConnId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identity state of a tracked connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Identity {
    Anonymous,
    LoggedIn(String),
}

/// Outcome of a login attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PromoteResult {
    /// Connection moved from anonymous to logged in.
    Promoted,
    /// Another connection already holds the name.
    Collision,
    /// Connection is not anonymous (already logged in or not tracked).
    NotAnonymous,
    /// Empty login names are never accepted.
    EmptyName,
}

impl PromoteResult {
    pub fn is_success(self) -> bool {
        matches!(self, PromoteResult::Promoted)
    }
}

/// Process-wide login state, owned by the event loop thread.
///
/// Logged-in names are kept in a `BTreeMap`, so iteration (and therefore
/// `list_users` output) is ordered by name.
#[derive(Debug, Default)]
pub struct Registry {
    anonymous: HashSet<ConnId>,
    logged_in: BTreeMap<String, ConnId>,
    /// Reverse index so removal by connection doesn't scan `logged_in`.
    login_of: HashMap<ConnId, String>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Track a freshly accepted connection.
    pub fn register_anonymous(&mut self, conn: ConnId) {
        debug_assert!(!self.contains(conn), "connection {conn} already tracked");
        self.anonymous.insert(conn);
    }

    /// Move `conn` from anonymous to logged in under `login`.
    ///
    /// The name must be non-empty and unused, and the connection must still
    /// be anonymous. State is unchanged on any failure.
    pub fn promote(&mut self, conn: ConnId, login: &str) -> PromoteResult {
        if login.is_empty() {
            return PromoteResult::EmptyName;
        }
        if self.logged_in.contains_key(login) {
            return PromoteResult::Collision;
        }
        if !self.anonymous.remove(&conn) {
            return PromoteResult::NotAnonymous;
        }

        self.logged_in.insert(login.to_string(), conn);
        self.login_of.insert(conn, login.to_string());
        PromoteResult::Promoted
    }

    /// Forget a connection entirely. No-op if it is not tracked.
    ///
    /// Returns the login name it held, if any.
    pub fn remove(&mut self, conn: ConnId) -> Option<String> {
        self.anonymous.remove(&conn);
        let login = self.login_of.remove(&conn)?;
        self.logged_in.remove(&login);
        Some(login)
    }

    /// Look up the connection logged in under `login`.
    pub fn by_login(&self, login: &str) -> Option<ConnId> {
        self.logged_in.get(login).copied()
    }

    /// Identity of a tracked connection.
    pub fn identity(&self, conn: ConnId) -> Option<Identity> {
        if let Some(login) = self.login_of.get(&conn) {
            Some(Identity::LoggedIn(login.clone()))
        } else if self.anonymous.contains(&conn) {
            Some(Identity::Anonymous)
        } else {
            None
        }
    }

    pub fn is_logged_in(&self, conn: ConnId) -> bool {
        self.login_of.contains_key(&conn)
    }

    pub fn contains(&self, conn: ConnId) -> bool {
        self.anonymous.contains(&conn) || self.login_of.contains_key(&conn)
    }

    /// All logged-in connections, in name order.
    pub fn all_logged(&self) -> impl Iterator<Item = ConnId> + '_ {
        self.logged_in.values().copied()
    }

    /// Logged-in names, in name order.
    pub fn logins(&self) -> impl Iterator<Item = &str> {
        self.logged_in.keys().map(String::as_str)
    }

    /// Every tracked connection, anonymous first.
    pub fn all_connected(&self) -> impl Iterator<Item = ConnId> + '_ {
        self.anonymous.iter().copied().chain(self.all_logged())
    }

    pub fn anonymous_count(&self) -> usize {
        self.anonymous.len()
    }

    pub fn logged_in_count(&self) -> usize {
        self.logged_in.len()
    }

    pub fn len(&self) -> usize {
        self.anonymous.len() + self.logged_in.len()
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
