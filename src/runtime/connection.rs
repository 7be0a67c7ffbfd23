//! Per-connection socket state for the event loop.
//!
//! Each connection owns a non-blocking stream, a read buffer and a write
//! buffer of output the kernel has not accepted yet. Both are bounded: reads
//! pause once a maximum-size frame is buffered, and output past
//! `max_pending_output` is an error that closes the connection.

use bytes::{Buf, BytesMut};
use mio::net::TcpStream;
use mio::Interest;
use std::io::{self, Read, Write};
use std::net::{Shutdown, SocketAddr};

use crate::protocol::frame::{HEADER_LENGTH, MAX_BODY_LENGTH};
use crate::protocol::{self, Frame, FrameError, ParseResult};

const READ_CHUNK: usize = 4096;

/// Stop reading once this much is buffered; one maximum-size frame.
const READ_LIMIT: usize = HEADER_LENGTH + MAX_BODY_LENGTH;

/// What the peer did during a read burst.
#[derive(Debug)]
pub enum ReadOutcome {
    /// Socket drained; connection stays open.
    Open,
    /// Read buffer is full; the socket may still hold data.
    Paused,
    /// Peer closed its write side.
    Disconnected,
    /// Transport failure such as a reset by peer.
    Reset(io::Error),
}

/// Why a connection is being closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    Disconnected,
    Reset,
    Malformed,
}

#[derive(Debug)]
pub struct ChatConnection {
    pub stream: TcpStream,
    pub peer: SocketAddr,
    read_buf: BytesMut,
    write_buf: BytesMut,
    max_pending_output: usize,
    interest: Interest,
}

impl ChatConnection {
    pub fn new(stream: TcpStream, peer: SocketAddr, max_pending_output: usize) -> Self {
        Self {
            stream,
            peer,
            read_buf: BytesMut::with_capacity(READ_CHUNK),
            write_buf: BytesMut::new(),
            max_pending_output,
            interest: Interest::READABLE,
        }
    }

    /// Read what the socket has buffered, up to one maximum-size frame.
    pub fn fill(&mut self) -> ReadOutcome {
        let mut chunk = [0u8; READ_CHUNK];
        loop {
            if self.read_buf.len() >= READ_LIMIT {
                return ReadOutcome::Paused;
            }
            match self.stream.read(&mut chunk) {
                Ok(0) => return ReadOutcome::Disconnected,
                Ok(n) => self.read_buf.extend_from_slice(&chunk[..n]),
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => return ReadOutcome::Open,
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return ReadOutcome::Reset(e),
            }
        }
    }

    /// Pop the next complete frame off the read buffer.
    pub fn next_frame(&mut self) -> Result<Option<Frame>, FrameError> {
        match protocol::parse(&self.read_buf) {
            ParseResult::Complete(frame, consumed) => {
                self.read_buf.advance(consumed);
                Ok(Some(frame))
            }
            ParseResult::Incomplete => Ok(None),
            ParseResult::Invalid(e) => Err(e),
        }
    }

    /// Append output and push as much as the socket takes.
    ///
    /// Fails once more than `max_pending_output` bytes are left unsent.
    pub fn send(&mut self, data: &[u8]) -> io::Result<()> {
        self.write_buf.extend_from_slice(data);
        self.flush()?;
        if self.write_buf.len() > self.max_pending_output {
            return Err(io::Error::new(
                io::ErrorKind::Other,
                format!(
                    "pending output too large: {} > {}",
                    self.write_buf.len(),
                    self.max_pending_output
                ),
            ));
        }
        Ok(())
    }

    /// Write pending output until drained or the socket would block.
    pub fn flush(&mut self) -> io::Result<()> {
        while !self.write_buf.is_empty() {
            match self.stream.write(&self.write_buf) {
                Ok(0) => return Err(io::Error::new(io::ErrorKind::WriteZero, "write returned 0")),
                Ok(n) => self.write_buf.advance(n),
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    pub fn has_pending_output(&self) -> bool {
        !self.write_buf.is_empty()
    }

    /// Interest matching the current buffer state.
    pub fn wanted_interest(&self) -> Interest {
        if self.has_pending_output() {
            Interest::READABLE | Interest::WRITABLE
        } else {
            Interest::READABLE
        }
    }

    pub fn interest(&self) -> Interest {
        self.interest
    }

    pub fn set_interest(&mut self, interest: Interest) {
        self.interest = interest;
    }

    /// Half-close before dropping, for orderly disconnects only.
    pub fn shutdown_write(&self) {
        let _ = self.stream.shutdown(Shutdown::Write);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{TcpListener as StdTcpListener, TcpStream as StdTcpStream};

    /// Returns a non-blocking server side and a blocking client side.
    fn socket_pair(max_pending_output: usize) -> (ChatConnection, StdTcpStream) {
        let listener = StdTcpListener::bind("127.0.0.1:0").unwrap();
        let client = StdTcpStream::connect(listener.local_addr().unwrap()).unwrap();
        let (server, peer) = listener.accept().unwrap();
        server.set_nonblocking(true).unwrap();
        let conn = ChatConnection::new(TcpStream::from_std(server), peer, max_pending_output);
        (conn, client)
    }

    fn fill_until_settled(conn: &mut ChatConnection) -> ReadOutcome {
        // Loopback delivery is fast but not instantaneous
        for _ in 0..50 {
            match conn.fill() {
                ReadOutcome::Open if conn.read_buf.is_empty() => {
                    std::thread::sleep(std::time::Duration::from_millis(10))
                }
                outcome => return outcome,
            }
        }
        ReadOutcome::Open
    }

    #[test]
    fn test_fill_pauses_at_one_frame() {
        let (mut conn, mut client) = socket_pair(1024);
        let frame = Frame::encode(&"x".repeat(MAX_BODY_LENGTH)).unwrap();
        for _ in 0..4 {
            client.write_all(frame.as_bytes()).unwrap();
        }
        std::thread::sleep(std::time::Duration::from_millis(50));

        assert!(matches!(fill_until_settled(&mut conn), ReadOutcome::Paused));
        assert!(conn.read_buf.len() < READ_LIMIT + READ_CHUNK);

        // Parsing frees room and reading resumes
        let mut frames = 0;
        for _ in 0..100 {
            while let Some(parsed) = conn.next_frame().unwrap() {
                assert_eq!(parsed, frame);
                frames += 1;
            }
            if frames == 4 {
                break;
            }
            assert!(!matches!(fill_until_settled(&mut conn), ReadOutcome::Reset(_)));
            assert!(conn.read_buf.len() < READ_LIMIT + READ_CHUNK);
        }
        assert_eq!(frames, 4);
    }

    #[test]
    fn test_send_fails_past_pending_limit() {
        let (mut conn, _client) = socket_pair(64 * 1024);
        let chunk = vec![b'x'; 16 * 1024];

        // The client never reads, so kernel buffers fill and output queues up
        let mut result = Ok(());
        for _ in 0..10_000 {
            result = conn.send(&chunk);
            if result.is_err() {
                break;
            }
        }

        assert!(result.is_err());
        assert!(conn.has_pending_output());
        assert!(conn.write_buf.len() <= 64 * 1024 + chunk.len());
    }
}
