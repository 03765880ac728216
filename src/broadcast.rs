// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Broadcast & fan-out (spec §4.8): write one event line to every live
//! client, echo it to stdout prefixed `"response: "`, and report dead
//! connections for the reactor to prune — the same iterate-and-collect-
//! failures shape as the teacher's `RelayRouter::broadcast`.

use std::collections::HashMap;
use tokio::io::{AsyncWrite, AsyncWriteExt};

/// Turn a bare `key:value` event into the wire form `"OK:key:value\n"`.
pub fn format_event(event: &str) -> String {
    format!("OK:{event}\n")
}

/// Write `line` (already newline-terminated) to every connection in
/// `writers`, echoing it to stdout, and return the ids of connections whose
/// write failed so the caller can destroy them.
pub async fn broadcast<Id, W>(writers: &mut HashMap<Id, W>, line: &str) -> Vec<Id>
where
    Id: Copy + Eq + std::hash::Hash,
    W: AsyncWrite + Unpin,
{
    print!("response: {line}");

    let mut dead = Vec::new();
    for (id, writer) in writers.iter_mut() {
        if writer.write_all(line.as_bytes()).await.is_err() {
            dead.push(*id);
        }
    }
    dead
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::duplex;

    #[test]
    fn format_event_adds_ok_prefix_and_newline() {
        assert_eq!(format_event("power:on"), "OK:power:on\n");
    }

    #[tokio::test]
    async fn broadcast_reports_dead_connections_without_touching_live_ones() {
        let (mut alive_rx, alive_tx) = duplex(64);
        let (dead_rx, dead_tx) = duplex(64);
        drop(dead_rx);

        let mut writers = HashMap::new();
        writers.insert(1u32, alive_tx);
        writers.insert(2u32, dead_tx);

        let dead = broadcast(&mut writers, "OK:power:on\n").await;
        assert_eq!(dead, vec![2]);

        let mut buf = [0u8; 32];
        let n = tokio::io::AsyncReadExt::read(&mut alive_rx, &mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"OK:power:on\n");
    }
}
