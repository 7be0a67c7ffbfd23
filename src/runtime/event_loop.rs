//! mio event loop implementation.
//!
//! Readiness-based model: poll tells us when sockets are ready, then we
//! perform non-blocking read/write syscalls. Uses epoll on Linux, kqueue on
//! macOS.
//!
//! Everything runs on one thread. The registry, the connection slab and the
//! poll registrations are only ever touched from `turn`, so no locking is
//! needed. Each wait is bounded by the configured poll timeout.

use mio::net::{TcpListener, TcpStream};
use mio::{Events, Interest, Poll, Token};
use slab::Slab;
use std::io;
use std::net::SocketAddr;
use std::time::Duration;
use tracing::{debug, error, info, trace, warn};

use super::connection::{ChatConnection, CloseReason, ReadOutcome};
use crate::config::Config;
use crate::protocol::{Delivery, Dispatcher};
use crate::registry::{ConnId, Registry};

const LISTENER_TOKEN: Token = Token(usize::MAX);

const EVENT_CAPACITY: usize = 1024;

/// Readiness flags copied out of a mio event.
#[derive(Debug, Clone, Copy)]
struct Readiness {
    token: Token,
    readable: bool,
    writable: bool,
}

/// Single-threaded chat server.
pub struct Server {
    poll: Poll,
    events: Events,
    listener: TcpListener,
    connections: Slab<ChatConnection>,
    registry: Registry,
    dispatcher: Dispatcher,
    max_connections: usize,
    max_pending_output: usize,
    poll_timeout: Duration,
}

impl Server {
    /// Bind the listener and register it with a fresh poll instance.
    pub fn bind(config: &Config) -> io::Result<Self> {
        let poll = Poll::new()?;
        let listener = create_listener(config.listen, config.backlog)?;
        let mut listener = TcpListener::from_std(listener);
        poll.registry()
            .register(&mut listener, LISTENER_TOKEN, Interest::READABLE)?;

        Ok(Self {
            poll,
            events: Events::with_capacity(EVENT_CAPACITY),
            listener,
            connections: Slab::new(),
            registry: Registry::new(),
            dispatcher: Dispatcher::new(config.require_login),
            max_connections: config.max_connections,
            max_pending_output: config.max_pending_output,
            poll_timeout: config.poll_timeout,
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    #[cfg(test)]
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Serve forever.
    pub fn run(&mut self) -> io::Result<()> {
        info!(
            addr = %self.local_addr()?,
            poll_timeout = ?self.poll_timeout,
            max_connections = self.max_connections,
            max_pending_output = self.max_pending_output,
            "Chat server listening"
        );

        loop {
            self.turn(Some(self.poll_timeout))?;
        }
    }

    /// One reactor iteration: wait up to `timeout`, then handle every ready
    /// socket. A timeout with nothing ready is not an error.
    pub fn turn(&mut self, timeout: Option<Duration>) -> io::Result<()> {
        match self.poll.poll(&mut self.events, timeout) {
            Ok(()) => {}
            Err(ref e) if e.kind() == io::ErrorKind::Interrupted => return Ok(()),
            Err(e) => return Err(e),
        }

        let ready: Vec<Readiness> = self
            .events
            .iter()
            .map(|event| Readiness {
                token: event.token(),
                readable: event.is_readable() || event.is_read_closed() || event.is_error(),
                writable: event.is_writable(),
            })
            .collect();

        if ready.is_empty() {
            trace!(
                anonymous = self.registry.anonymous_count(),
                logged_in = self.registry.logged_in_count(),
                "Poll timeout"
            );
        }

        for event in ready {
            match event.token {
                LISTENER_TOKEN => self.accept_connections(),
                Token(conn_id) => {
                    let conn = ConnId(conn_id);
                    if event.writable {
                        self.handle_writable(conn);
                    }
                    if event.readable {
                        self.handle_readable(conn);
                    }
                }
            }
        }

        debug_assert!(self
            .registry
            .all_connected()
            .all(|conn| self.connections.contains(conn.0)));
        debug_assert_eq!(self.registry.len(), self.connections.len());
        Ok(())
    }

    /// Accept until the listener would block. Readiness is edge-triggered,
    /// so stopping early would strand queued connections.
    fn accept_connections(&mut self) {
        loop {
            match self.listener.accept() {
                Ok((stream, peer)) => self.register_connection(stream, peer),
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => return,
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    error!(error = %e, "Accept error");
                    return;
                }
            }
        }
    }

    fn register_connection(&mut self, mut stream: TcpStream, peer: SocketAddr) {
        if self.connections.len() >= self.max_connections {
            warn!(peer = %peer, "Connection limit reached");
            return;
        }

        let entry = self.connections.vacant_entry();
        let conn_id = entry.key();
        if let Err(e) = self
            .poll
            .registry()
            .register(&mut stream, Token(conn_id), Interest::READABLE)
        {
            warn!(peer = %peer, error = %e, "Failed to register connection");
            return;
        }
        entry.insert(ChatConnection::new(stream, peer, self.max_pending_output));
        self.registry.register_anonymous(ConnId(conn_id));

        debug!(conn_id, peer = %peer, "Accepted connection");
    }

    fn handle_readable(&mut self, conn: ConnId) {
        loop {
            let Some(connection) = self.connections.get_mut(conn.0) else {
                return;
            };

            let outcome = connection.fill();
            if let ReadOutcome::Reset(e) = &outcome {
                debug!(conn_id = %conn, error = %e, "Read failed");
                self.close_connection(conn, CloseReason::Reset);
                return;
            }

            // Frames already received are handled before an orderly close.
            if !self.dispatch_buffered(conn) {
                return;
            }

            match outcome {
                // No new readiness event will come for data still queued
                // in the socket, so keep reading now.
                ReadOutcome::Paused => continue,
                ReadOutcome::Disconnected => {
                    self.close_connection(conn, CloseReason::Disconnected);
                    return;
                }
                ReadOutcome::Open | ReadOutcome::Reset(_) => return,
            }
        }
    }

    /// Dispatch every complete frame in the read buffer.
    ///
    /// Returns false once the connection is gone.
    fn dispatch_buffered(&mut self, conn: ConnId) -> bool {
        loop {
            let Some(connection) = self.connections.get_mut(conn.0) else {
                return false;
            };
            match connection.next_frame() {
                Ok(Some(frame)) => {
                    let deliveries = self.dispatcher.dispatch(conn, &frame, &mut self.registry);
                    self.deliver(deliveries);
                }
                Ok(None) => return true,
                Err(e) => {
                    warn!(conn_id = %conn, error = %e, "Malformed frame");
                    self.close_connection(conn, CloseReason::Malformed);
                    return false;
                }
            }
        }
    }

    fn handle_writable(&mut self, conn: ConnId) {
        let Some(connection) = self.connections.get_mut(conn.0) else {
            return;
        };

        if let Err(e) = connection.flush() {
            debug!(conn_id = %conn, error = %e, "Write failed");
            self.close_connection(conn, CloseReason::Reset);
            return;
        }
        self.update_interest(conn);
    }

    /// Send each delivery in order. A failing recipient is closed without
    /// affecting the others.
    fn deliver(&mut self, deliveries: Vec<Delivery>) {
        for delivery in deliveries {
            let Some(connection) = self.connections.get_mut(delivery.to.0) else {
                continue;
            };

            if let Err(e) = connection.send(&delivery.data) {
                debug!(conn_id = %delivery.to, error = %e, "Send failed");
                self.close_connection(delivery.to, CloseReason::Reset);
                continue;
            }
            self.update_interest(delivery.to);
        }
    }

    /// Ask for writability only while output is pending.
    fn update_interest(&mut self, conn: ConnId) {
        let Some(connection) = self.connections.get_mut(conn.0) else {
            return;
        };

        let wanted = connection.wanted_interest();
        if wanted == connection.interest() {
            return;
        }

        match self
            .poll
            .registry()
            .reregister(&mut connection.stream, Token(conn.0), wanted)
        {
            Ok(()) => connection.set_interest(wanted),
            Err(e) => {
                warn!(conn_id = %conn, error = %e, "Reregister failed");
                self.close_connection(conn, CloseReason::Reset);
            }
        }
    }

    /// Drop a connection from the registry and the poll set.
    fn close_connection(&mut self, conn: ConnId, reason: CloseReason) {
        let login = self.registry.remove(conn);

        if let Some(mut connection) = self.connections.try_remove(conn.0) {
            let _ = self.poll.registry().deregister(&mut connection.stream);
            if reason == CloseReason::Disconnected {
                connection.shutdown_write();
            }

            info!(
                conn_id = %conn,
                peer = %connection.peer,
                login = login.as_deref().unwrap_or("-"),
                reason = ?reason,
                "Connection closed"
            );
        }
    }
}

/// Create a non-blocking TCP listener with the configured backlog.
fn create_listener(addr: SocketAddr, backlog: i32) -> io::Result<std::net::TcpListener> {
    let socket = socket2::Socket::new(
        match addr {
            SocketAddr::V4(_) => socket2::Domain::IPV4,
            SocketAddr::V6(_) => socket2::Domain::IPV6,
        },
        socket2::Type::STREAM,
        Some(socket2::Protocol::TCP),
    )?;

    socket.set_reuse_address(true)?;
    socket.set_nonblocking(true)?;
    socket.bind(&addr.into())?;
    socket.listen(backlog)?;

    Ok(socket.into())
}
