//! Bounded readiness wait shared by the Linux backends

use std::io;
use std::os::fd::{BorrowedFd, RawFd};
use std::time::Duration;

use nix::errno::Errno;
use nix::poll::{poll, PollFd, PollFlags, PollTimeout};
use nix::sys::socket::{recv, MsgFlags};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct Readiness {
    pub readable: bool,
    /// The peer hung up or the descriptor is no longer valid.
    pub hangup: bool,
}

/// Wait until one of `fds` is readable or `timeout` passes.
///
/// An interrupted wait (`EINTR`) reports nothing ready.
pub(crate) fn wait_readable(fds: &[RawFd], timeout: Duration) -> io::Result<Vec<Readiness>> {
    // SAFETY: callers own every descriptor for at least the duration of the call.
    let borrowed: Vec<BorrowedFd<'_>> = fds
        .iter()
        .map(|fd| unsafe { BorrowedFd::borrow_raw(*fd) })
        .collect();
    let mut poll_fds: Vec<PollFd<'_>> = borrowed
        .iter()
        .map(|fd| PollFd::new(*fd, PollFlags::POLLIN))
        .collect();

    let millis = u16::try_from(timeout.as_millis()).unwrap_or(u16::MAX);

    match poll(&mut poll_fds, PollTimeout::from(millis)) {
        Ok(0) | Err(Errno::EINTR) => Ok(vec![Readiness::default(); fds.len()]),
        Ok(_) => Ok(poll_fds
            .iter()
            .map(|fd| {
                let revents = fd.revents().unwrap_or(PollFlags::empty());
                Readiness {
                    readable: revents.contains(PollFlags::POLLIN),
                    hangup: revents
                        .intersects(PollFlags::POLLHUP | PollFlags::POLLERR | PollFlags::POLLNVAL),
                }
            })
            .collect()),
        Err(e) => Err(io::Error::from(e)),
    }
}

/// Whether the peer of a readable socket has closed its end.
///
/// Peeks one byte without consuming it or blocking, so whatever reads the
/// socket next still sees the data.
pub(crate) fn peer_closed(fd: RawFd) -> io::Result<bool> {
    let mut byte = [0u8; 1];
    match recv(fd, &mut byte, MsgFlags::MSG_PEEK | MsgFlags::MSG_DONTWAIT) {
        Ok(read) => Ok(read == 0),
        Err(Errno::EAGAIN | Errno::EINTR) => Ok(false),
        Err(Errno::ECONNRESET) => Ok(true),
        Err(e) => Err(io::Error::from(e)),
    }
}
