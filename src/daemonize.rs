// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Minimal `--daemon` detachment: double-fork, `setsid`, chdir to `/`,
//! redirect stdio to `/dev/null`. Deliberately small — this is the one
//! "terminal/serial setup"-adjacent external collaborator spec §1 calls out
//! as out of scope but worth implementing so the flag isn't a no-op.

use nix::unistd::{self, ForkResult};
use std::os::fd::AsRawFd;

/// Fork twice and detach from the controlling terminal. Must be called
/// before the tokio runtime starts — forking a multi-threaded process is
/// unsafe.
pub fn daemonize() -> std::io::Result<()> {
    match unsafe { unistd::fork() }.map_err(nix_to_io)? {
        ForkResult::Parent { .. } => std::process::exit(0),
        ForkResult::Child => {}
    }

    unistd::setsid().map_err(nix_to_io)?;

    match unsafe { unistd::fork() }.map_err(nix_to_io)? {
        ForkResult::Parent { .. } => std::process::exit(0),
        ForkResult::Child => {}
    }

    unistd::chdir("/").map_err(nix_to_io)?;
    redirect_stdio_to_dev_null()?;
    Ok(())
}

fn redirect_stdio_to_dev_null() -> std::io::Result<()> {
    use std::fs::OpenOptions;
    let dev_null = OpenOptions::new().read(true).write(true).open("/dev/null")?;
    let fd = dev_null.as_raw_fd();
    unistd::dup2(fd, 0).map_err(nix_to_io)?;
    unistd::dup2(fd, 1).map_err(nix_to_io)?;
    unistd::dup2(fd, 2).map_err(nix_to_io)?;
    Ok(())
}

fn nix_to_io(e: nix::Error) -> std::io::Error {
    std::io::Error::from_raw_os_error(e as i32)
}
