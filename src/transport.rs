// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Serial transport: opens the receiver's tty, configures it 9600-8N1
//! canonical per spec §6, and exposes it to the reactor as an
//! `AsyncRead + AsyncWrite` byte stream.
//!
//! Termios setup follows the same `nix::sys::termios` shape as the
//! retrieval pack's AT-modem driver (raw mode, explicit baud, CLOCAL|CREAD,
//! no hardware flow control) — adapted to re-enable `ICANON` afterward,
//! since the wire framing here relies on the kernel's line discipline to
//! deliver whole lines rather than doing raw byte-at-a-time reads.

use std::io;
use std::os::fd::{AsRawFd, OwnedFd, RawFd};
use std::pin::Pin;
use std::task::{Context, Poll};

use nix::fcntl::{self, OFlag};
use nix::sys::stat::Mode;
use nix::sys::termios::{self, SetArg, SpecialCharacterIndices};
use nix::unistd;
use tokio::io::unix::AsyncFd;
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};

/// A duplex byte transport. Implemented by [`SerialTransport`] for
/// production use and by `tokio::io::duplex` pairs in tests.
pub trait Transport: AsyncRead + AsyncWrite + Unpin + Send {}
impl<T: AsyncRead + AsyncWrite + Unpin + Send> Transport for T {}

/// An open, configured serial line to an Onkyo receiver.
pub struct SerialTransport {
    inner: AsyncFd<OwnedFd>,
}

impl SerialTransport {
    /// Open `device` and configure it 9600-8N1, canonical, no parity, no
    /// flow control.
    pub fn open(device: &str) -> io::Result<Self> {
        let fd = fcntl::open(
            device,
            OFlag::O_RDWR | OFlag::O_NOCTTY | OFlag::O_NONBLOCK,
            Mode::empty(),
        )
        .map_err(nix_to_io)?;
        let fd: OwnedFd = fd.into();

        configure_termios(fd.as_raw_fd()).map_err(nix_to_io)?;

        Ok(SerialTransport { inner: AsyncFd::new(fd)? })
    }
}

fn configure_termios(fd: RawFd) -> nix::Result<()> {
    use std::os::fd::BorrowedFd;
    // SAFETY: `fd` was just opened by `SerialTransport::open` and remains
    // valid for the scope of this function.
    let borrowed = unsafe { BorrowedFd::borrow_raw(fd) };

    let mut tio = termios::tcgetattr(borrowed)?;

    termios::cfmakeraw(&mut tio);
    // The wire protocol relies on canonical (line-buffered) delivery: the
    // kernel hands us a complete "!1...\r\n" reply per read, so re-enable
    // ICANON after `cfmakeraw` cleared it.
    tio.local_flags |= termios::LocalFlags::ICANON;
    tio.local_flags &= !termios::LocalFlags::ECHO;

    termios::cfsetispeed(&mut tio, termios::BaudRate::B9600)?;
    termios::cfsetospeed(&mut tio, termios::BaudRate::B9600)?;

    tio.control_flags &= !termios::ControlFlags::CSIZE;
    tio.control_flags |= termios::ControlFlags::CS8;
    tio.control_flags &= !termios::ControlFlags::PARENB;
    tio.control_flags &= !termios::ControlFlags::CSTOPB;
    tio.control_flags |= termios::ControlFlags::CLOCAL | termios::ControlFlags::CREAD;
    tio.control_flags &= !termios::ControlFlags::CRTSCTS;

    tio.control_chars[SpecialCharacterIndices::VMIN as usize] = 1;
    tio.control_chars[SpecialCharacterIndices::VTIME as usize] = 0;

    termios::tcsetattr(borrowed, SetArg::TCSANOW, &tio)?;
    termios::tcflush(borrowed, termios::FlushArg::TCIOFLUSH)?;
    Ok(())
}

fn nix_to_io(e: nix::Error) -> io::Error {
    io::Error::from_raw_os_error(e as i32)
}

impl AsyncRead for SerialTransport {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        loop {
            let mut guard = match self.inner.poll_read_ready(cx) {
                Poll::Ready(Ok(g)) => g,
                Poll::Ready(Err(e)) => return Poll::Ready(Err(e)),
                Poll::Pending => return Poll::Pending,
            };
            let unfilled = buf.initialize_unfilled();
            match guard.try_io(|inner| unistd::read(inner.get_ref().as_raw_fd(), unfilled).map_err(nix_to_io)) {
                Ok(Ok(n)) => {
                    buf.advance(n);
                    return Poll::Ready(Ok(()));
                }
                Ok(Err(e)) => return Poll::Ready(Err(e)),
                Err(_would_block) => continue,
            }
        }
    }
}

impl AsyncWrite for SerialTransport {
    fn poll_write(mut self: Pin<&mut Self>, cx: &mut Context<'_>, data: &[u8]) -> Poll<io::Result<usize>> {
        loop {
            let mut guard = match self.inner.poll_write_ready(cx) {
                Poll::Ready(Ok(g)) => g,
                Poll::Ready(Err(e)) => return Poll::Ready(Err(e)),
                Poll::Pending => return Poll::Pending,
            };
            match guard.try_io(|inner| unistd::write(inner.get_ref(), data).map_err(nix_to_io)) {
                Ok(result) => return Poll::Ready(result),
                Err(_would_block) => continue,
            }
        }
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }
}
