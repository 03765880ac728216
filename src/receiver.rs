// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! The `Receiver` aggregate (spec §3): one serial-connected Onkyo unit, its
//! power/sleep state, and its command queue. Generic over the transport type
//! so the reactor can drive either the real serial device or, in tests, an
//! in-memory duplex pair.

use crate::clock::Timestamp;
use crate::queue::Queue;

pub const POWER_MAIN: u8 = 0b001;
pub const POWER_ZONE2: u8 = 0b010;
pub const POWER_ZONE3: u8 = 0b100;

/// One Onkyo receiver: its transport, power/sleep state, and pending queue.
///
/// Lives for the whole process; owns its queue exclusively (spec §3). The
/// reactor in `daemon.rs` owns a `Vec<Receiver<T>>` and is the only thing
/// that ever touches one.
pub struct Receiver<T> {
    pub transport: T,
    pub power: u8,
    pub cmds_sent: u64,
    pub msgs_received: u64,
    pub last_cmd: Timestamp,
    pub zone2_sleep: Timestamp,
    pub zone3_sleep: Timestamp,
    pub next_sleep_update: Timestamp,
    pub queue: Queue,
}

impl<T> Receiver<T> {
    pub fn new(transport: T) -> Self {
        Receiver {
            transport,
            power: 0,
            cmds_sent: 0,
            msgs_received: 0,
            last_cmd: Timestamp::ZERO,
            zone2_sleep: Timestamp::ZERO,
            zone3_sleep: Timestamp::ZERO,
            next_sleep_update: Timestamp::ZERO,
            queue: Queue::new(),
        }
    }

    pub fn set_power(&mut self, bit: u8, on: bool) {
        if on {
            self.power |= bit;
        } else {
            self.power &= !bit;
        }
    }
}
