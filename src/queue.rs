// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Per-receiver command queue: de-duplicated FIFO, power-gated pop, and the
//! 80 ms pacing gate between successive serial writes (spec §4.5).

use crate::clock::{Diff, Timestamp};
use crate::hash::sdbm;
use std::collections::VecDeque;
use std::time::Duration;
use tokio::io::{AsyncWrite, AsyncWriteExt};

/// Minimum gap between successive writes to one receiver.
pub const COMMAND_WAIT: Duration = Duration::from_millis(80);

#[derive(Debug, Clone)]
struct Entry {
    hash: u64,
    code: String,
}

/// An ordered, hash-deduplicated sequence of pending opcodes.
#[derive(Debug, Default)]
pub struct Queue {
    entries: VecDeque<Entry>,
}

impl Queue {
    pub fn new() -> Self {
        Queue::default()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Append `code` unless an entry with the same hash is already queued.
    pub fn enqueue(&mut self, code: String) {
        let hash = sdbm(&code);
        if self.entries.iter().any(|e| e.hash == hash) {
            return;
        }
        self.entries.push_back(Entry { hash, code });
    }

    /// Pop entries from the head until one is sendable given `power` (the
    /// receiver's power bitmask — any bit set, or the code is a power
    /// command itself), or the queue empties.
    pub fn pop_gated(&mut self, power: u8) -> Option<String> {
        while let Some(entry) = self.entries.pop_front() {
            if power != 0 || is_power_command(&entry.code) {
                return Some(entry.code);
            }
            tracing::debug!(code = %entry.code, "skipping command, power off");
        }
        None
    }
}

fn is_power_command(code: &str) -> bool {
    code.contains("PWR") || code.contains("ZPW") || code.contains("PW3")
}

/// Outcome of a pacing check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CanSend {
    Yes,
    No { wait: Duration },
}

/// Check whether enough time has elapsed since `last_cmd` to send again. If
/// the clock appears to have gone backwards, `last_cmd` is reset to `now`
/// and the caller is told to wait one full pacing interval (spec §4.1/§4.5).
pub fn can_send(last_cmd: &mut Timestamp, now: Timestamp) -> CanSend {
    match Timestamp::diff(now, *last_cmd) {
        Diff::Negative => {
            *last_cmd = now;
            CanSend::No { wait: COMMAND_WAIT }
        }
        Diff::Positive(elapsed) => {
            let elapsed = elapsed.as_duration();
            if elapsed >= COMMAND_WAIT {
                CanSend::Yes
            } else {
                CanSend::No { wait: COMMAND_WAIT - elapsed }
            }
        }
    }
}

/// Pop one sendable code, frame it as `"!1" <code> "\r\n"`, and write it to
/// `transport`. Caller has already confirmed `can_send` and writability.
pub async fn send_one<T>(
    queue: &mut Queue,
    power: u8,
    transport: &mut T,
    last_cmd: &mut Timestamp,
    cmds_sent: &mut u64,
    now: Timestamp,
) -> std::io::Result<Option<String>>
where
    T: AsyncWrite + Unpin,
{
    let Some(code) = queue.pop_gated(power) else {
        return Ok(None);
    };
    let frame = format!("!1{code}\r\n");
    transport.write_all(frame.as_bytes()).await?;
    *last_cmd = now;
    *cmds_sent += 1;
    Ok(Some(code))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn enqueue_drops_duplicate_hash_silently() {
        let mut q = Queue::new();
        q.enqueue("PWR01".into());
        q.enqueue("PWR01".into());
        assert_eq!(q.len(), 1);
    }

    #[test]
    fn pop_gated_skips_non_power_codes_while_off() {
        let mut q = Queue::new();
        q.enqueue("AMT01".into());
        q.enqueue("PWR01".into());
        assert_eq!(q.pop_gated(0), Some("PWR01".to_string()));
        assert!(q.is_empty());
    }

    #[test]
    fn pop_gated_passes_everything_once_powered() {
        let mut q = Queue::new();
        q.enqueue("AMT01".into());
        assert_eq!(q.pop_gated(0b001), Some("AMT01".to_string()));
    }

    #[test]
    fn can_send_enforces_pacing_gap() {
        let mut last = Timestamp::new(0, 0);
        let now = Timestamp::new(0, 50_000);
        assert_eq!(can_send(&mut last, now), CanSend::No { wait: Duration::from_millis(30) });

        let now = Timestamp::new(0, 80_000);
        assert_eq!(can_send(&mut last, now), CanSend::Yes);
    }

    #[test]
    fn can_send_resets_last_cmd_when_clock_goes_backwards() {
        let mut last = Timestamp::new(10, 0);
        let now = Timestamp::new(5, 0);
        assert_eq!(can_send(&mut last, now), CanSend::No { wait: COMMAND_WAIT });
        assert_eq!(last, now);
    }
}
