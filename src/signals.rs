// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Signal handling (spec §4.7, §9): the mandated async-signal-safe self-pipe
//! is exactly what `tokio::signal::unix` implements internally, so the
//! reactor just awaits one more branch rather than draining a hand-rolled
//! pipe fd — same role as the teacher's `tokio::signal::ctrl_c()` spawn in
//! `main.rs`, extended to the three signals this daemon cares about.

use tokio::signal::unix::{signal, Signal, SignalKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DaemonSignal {
    /// Orderly shutdown, exit success.
    Int,
    /// Log and ignore.
    Pipe,
    /// Emit a status dump.
    Usr1,
}

/// The three signal streams the reactor multiplexes over.
pub struct SignalSet {
    sigint: Signal,
    sigpipe: Signal,
    sigusr1: Signal,
}

impl SignalSet {
    pub fn new() -> std::io::Result<Self> {
        Ok(SignalSet {
            sigint: signal(SignalKind::interrupt())?,
            sigpipe: signal(SignalKind::pipe())?,
            sigusr1: signal(SignalKind::user_defined1())?,
        })
    }

    /// Await the next signal of interest. Cancel-safe: used directly as a
    /// `tokio::select!` branch in the reactor's main loop.
    pub async fn recv(&mut self) -> DaemonSignal {
        tokio::select! {
            _ = self.sigint.recv() => DaemonSignal::Int,
            _ = self.sigpipe.recv() => DaemonSignal::Pipe,
            _ = self.sigusr1.recv() => DaemonSignal::Usr1,
        }
    }
}
