// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Per-client line framing (spec §4.6): a fixed 64-byte receive buffer,
//! newline-delimited extraction, and copy-compaction — no ring buffer, no
//! dynamic growth.

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Per-connection receive buffer capacity; lines longer than this are
/// discarded (spec §6).
pub const BUF_SIZE: usize = 64;

pub const GREETING: &str = "OK:onkyocontrol v1.1\n";
pub const MAX_CONNECTIONS_MSG: &str = "ERROR:Max Connections Reached\n";
pub const INVALID_COMMAND_MSG: &str = "ERROR:Invalid Command\n";

/// One connected client: its socket and its line-assembly buffer.
pub struct ClientConnection<S> {
    stream: S,
    buf: [u8; BUF_SIZE],
    write_pos: usize,
    pub peer: String,
}

/// Result of one `on_readable` pass.
#[derive(Debug, PartialEq, Eq)]
pub enum ReadOutcome {
    /// Zero or more complete lines, NUL-terminated in place of their `\n`.
    Lines(Vec<String>),
    Eof,
}

#[derive(Debug)]
pub enum ConnectionError {
    Io(std::io::Error),
}

impl std::fmt::Display for ConnectionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConnectionError::Io(e) => write!(f, "connection I/O error: {e}"),
        }
    }
}

impl std::error::Error for ConnectionError {}

impl From<std::io::Error> for ConnectionError {
    fn from(e: std::io::Error) -> Self {
        ConnectionError::Io(e)
    }
}

impl<S> ClientConnection<S> {
    pub fn new(stream: S, peer: String) -> Self {
        ClientConnection {
            stream,
            buf: [0u8; BUF_SIZE],
            write_pos: 0,
            peer,
        }
    }

    fn discard_overflow(&mut self) {
        tracing::warn!(peer = %self.peer, "buffer size exceeded");
        self.buf = [0u8; BUF_SIZE];
        self.write_pos = 0;
    }

    /// Scan the occupied prefix for newlines, extracting and compacting.
    fn drain_lines(&mut self) -> Vec<String> {
        let mut lines = Vec::new();
        loop {
            let Some(p) = self.buf[..self.write_pos].iter().position(|&b| b == b'\n') else {
                break;
            };
            self.buf[p] = 0;
            let line = String::from_utf8_lossy(&self.buf[..p]).into_owned();
            lines.push(line);

            let tail_len = self.write_pos - (p + 1);
            self.buf.copy_within(p + 1..self.write_pos, 0);
            for b in &mut self.buf[tail_len..self.write_pos] {
                *b = 0;
            }
            self.write_pos = tail_len;
        }
        lines
    }
}

impl<S: AsyncRead + Unpin> ClientConnection<S> {
    /// Read whatever is available and extract any complete lines.
    pub async fn on_readable(&mut self) -> Result<ReadOutcome, ConnectionError> {
        if self.write_pos >= BUF_SIZE {
            self.discard_overflow();
        }
        let n = self.stream.read(&mut self.buf[self.write_pos..]).await?;
        if n == 0 {
            return Ok(ReadOutcome::Eof);
        }
        self.write_pos += n;

        let lines = self.drain_lines();
        if lines.is_empty() && self.write_pos == BUF_SIZE {
            self.discard_overflow();
        }
        Ok(ReadOutcome::Lines(lines))
    }
}

impl<S: AsyncWrite + Unpin> ClientConnection<S> {
    pub async fn write_line(&mut self, line: &str) -> Result<(), ConnectionError> {
        self.stream.write_all(line.as_bytes()).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::duplex;

    #[tokio::test]
    async fn extracts_single_line_and_nul_terminates() {
        let (mut client, server) = duplex(128);
        let mut conn = ClientConnection::new(server, "test".to_string());
        client.write_all(b"power on\n").await.unwrap();
        let ReadOutcome::Lines(lines) = conn.on_readable().await.unwrap() else {
            panic!("expected lines");
        };
        assert_eq!(lines, vec!["power on".to_string()]);
    }

    #[tokio::test]
    async fn compacts_tail_after_extracting_first_of_two_lines() {
        let (mut client, server) = duplex(128);
        let mut conn = ClientConnection::new(server, "test".to_string());
        client.write_all(b"volume 42\nvolume 43\n").await.unwrap();
        let ReadOutcome::Lines(lines) = conn.on_readable().await.unwrap() else {
            panic!("expected lines");
        };
        assert_eq!(lines, vec!["volume 42".to_string(), "volume 43".to_string()]);
        assert_eq!(conn.write_pos, 0);
    }

    #[tokio::test]
    async fn eof_on_zero_byte_read() {
        let (client, server) = duplex(128);
        let mut conn = ClientConnection::new(server, "test".to_string());
        drop(client);
        assert_eq!(conn.on_readable().await.unwrap(), ReadOutcome::Eof);
    }

    #[tokio::test]
    async fn overflow_without_newline_discards_buffer() {
        let (mut client, server) = duplex(256);
        let mut conn = ClientConnection::new(server, "test".to_string());
        let filler = vec![b'x'; BUF_SIZE];
        client.write_all(&filler).await.unwrap();
        let ReadOutcome::Lines(lines) = conn.on_readable().await.unwrap() else {
            panic!("expected lines");
        };
        assert!(lines.is_empty());
        assert_eq!(conn.write_pos, 0);
    }

    #[tokio::test]
    async fn closing_one_connection_does_not_touch_another_buffer() {
        let (mut client_a, server_a) = duplex(128);
        let (mut client_b, server_b) = duplex(128);
        let mut conn_a = ClientConnection::new(server_a, "a".to_string());
        let mut conn_b = ClientConnection::new(server_b, "b".to_string());

        client_a.write_all(b"power on\n").await.unwrap();
        client_b.write_all(b"vol").await.unwrap();

        let ReadOutcome::Lines(a_lines) = conn_a.on_readable().await.unwrap() else { panic!() };
        assert_eq!(a_lines, vec!["power on".to_string()]);
        drop(client_a);
        conn_a.on_readable().await.ok();

        let ReadOutcome::Lines(b_lines) = conn_b.on_readable().await.unwrap() else { panic!() };
        assert!(b_lines.is_empty());
        assert_eq!(conn_b.write_pos, 3);
    }
}
