// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! onkyoctld
//!
//! Mediates a single Onkyo A/V receiver's ISCP serial control protocol to
//! any number of line-oriented local clients over TCP and/or a UNIX-domain
//! socket, normalizing the wire opcodes into a small human-readable
//! command/event vocabulary.
//!
//! # Usage
//!
//! ```bash
//! # Listen on a UNIX socket, talk to the receiver on the default tty
//! onkyoctld --socket /var/run/onkyoctld.sock
//!
//! # Listen on TCP too, with a config file for the rest
//! onkyoctld --bind 0.0.0.0:8701 --config /etc/onkyoctld.json
//!
//! # Detach into the background
//! onkyoctld --socket /var/run/onkyoctld.sock --daemon --log /var/log/onkyoctld.log
//! ```

use clap::Parser;
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::EnvFilter;

mod broadcast;
mod clock;
mod config;
mod connection;
mod daemon;
mod daemonize;
mod hash;
mod parser;
mod queue;
mod receiver;
mod signals;
mod tables;
mod transport;
mod translator;

use config::DaemonConfig;
use daemon::Daemon;

/// onkyoctld - mediates an Onkyo ISCP receiver to local line-oriented clients
#[derive(Parser, Debug)]
#[command(name = "onkyoctld")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Serial device the receiver is attached to
    #[arg(long)]
    serial: Option<String>,

    /// `host:port` to bind a TCP client listener on
    #[arg(short, long)]
    bind: Option<String>,

    /// UNIX-domain socket path to listen on
    #[arg(short, long)]
    socket: Option<PathBuf>,

    /// Configuration file (JSON format)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Maximum simultaneous client connections
    #[arg(long)]
    max_connections: Option<usize>,

    /// Mirror log output into this file in addition to stdout
    #[arg(short, long)]
    log: Option<PathBuf>,

    /// Log verbosity, e.g. "info", "debug", "onkyoctld=trace"
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Detach into the background after startup
    #[arg(short, long, default_value = "false")]
    daemon: bool,
}

impl Args {
    /// Overlay CLI flags onto a loaded (or default) config. CLI always wins.
    fn apply(&self, mut config: DaemonConfig) -> DaemonConfig {
        if let Some(serial) = &self.serial {
            config.serial = serial.clone();
        }
        if self.bind.is_some() {
            config.bind = self.bind.clone();
        }
        if self.socket.is_some() {
            config.socket = self.socket.clone();
        }
        if let Some(max_connections) = self.max_connections {
            config.max_connections = max_connections;
        }
        if self.log.is_some() {
            config.log_file = self.log.clone();
        }
        if self.daemon {
            config.daemon = true;
        }
        config
    }
}

fn init_tracing(log_level: &str, log_file: Option<&PathBuf>) -> Option<tracing_appender::non_blocking::WorkerGuard> {
    let filter = EnvFilter::try_new(log_level).unwrap_or_else(|_| EnvFilter::new("info"));

    match log_file {
        Some(path) => {
            let dir = path.parent().filter(|p| !p.as_os_str().is_empty()).unwrap_or_else(|| std::path::Path::new("."));
            let file_name = path.file_name().unwrap_or_else(|| std::ffi::OsStr::new("onkyoctld.log"));
            let file_appender = tracing_appender::rolling::never(dir, file_name);
            let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
            tracing_subscriber::fmt().with_env_filter(filter).with_writer(non_blocking).init();
            Some(guard)
        }
        None => {
            tracing_subscriber::fmt().with_env_filter(filter).init();
            None
        }
    }
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let config = match &args.config {
        Some(path) => DaemonConfig::from_file(path)?,
        None => DaemonConfig::default(),
    };
    let config = args.apply(config);
    config.validate()?;

    // Daemonizing forks the process; it must happen before the tokio runtime
    // (and its worker threads) are started.
    if config.daemon {
        daemonize::daemonize()?;
    }

    let _log_guard = init_tracing(&args.log_level, config.log_file.as_ref());
    info!(serial = %config.serial, bind = ?config.bind, socket = ?config.socket, "starting onkyoctld");

    let runtime = tokio::runtime::Builder::new_multi_thread().enable_all().build()?;
    runtime.block_on(async move {
        let daemon = Daemon::new(config).await?;
        daemon.run().await?;
        Ok::<(), std::io::Error>(())
    })?;

    Ok(())
}
