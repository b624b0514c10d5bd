//! One-byte rendezvous channel between the runtime and its container process.
//!
//! The channel is a connected `AF_UNIX`/`SOCK_SEQPACKET` socket pair. Each
//! message is a single byte: `0` means `false`, anything else `true`.
//! There is no framing and no buffering: a short read or write is an error,
//! never retried.

use std::os::fd::{AsRawFd, BorrowedFd, IntoRawFd, OwnedFd, RawFd};
use std::time::{Duration, Instant};

use hutch_common::error::{HutchError, Result};
use nix::errno::Errno;
use nix::poll::{PollFd, PollFlags, PollTimeout, poll};
use nix::sys::socket::{AddressFamily, MsgFlags, SockFlag, SockType, recv, send, socketpair};

/// The two blocking operations the handshake protocol needs.
pub trait Rendezvous {
    /// Sends one boolean to the peer.
    ///
    /// # Errors
    ///
    /// Returns [`HutchError::Socket`] if the byte cannot be written.
    fn send_boolean(&self, value: bool) -> Result<()>;

    /// Blocks until the peer sends one boolean.
    ///
    /// # Errors
    ///
    /// Returns [`HutchError::Socket`] if the read fails, the peer closed
    /// its end, or the deadline elapsed.
    fn recv_boolean(&self) -> Result<bool>;
}

/// A borrowed view of one end of an [`IpcChannel`].
///
/// Endpoints are plain descriptors so they can travel inside the container
/// options copied into the child process. The owning [`IpcChannel`] is
/// responsible for closing them.
#[derive(Debug, Clone, Copy)]
pub struct Endpoint {
    fd: RawFd,
    timeout: Option<Duration>,
}

impl Endpoint {
    /// Wraps a descriptor. `timeout` bounds every receive; `None` waits forever.
    #[must_use]
    pub const fn new(fd: RawFd, timeout: Option<Duration>) -> Self {
        Self { fd, timeout }
    }

    /// The underlying descriptor.
    #[must_use]
    pub const fn raw_fd(&self) -> RawFd {
        self.fd
    }
}

impl Rendezvous for Endpoint {
    fn send_boolean(&self, value: bool) -> Result<()> {
        send_boolean(self.fd, value)
    }

    fn recv_boolean(&self) -> Result<bool> {
        recv_boolean(self.fd, self.timeout)
    }
}

/// Writes exactly one byte encoding `value`.
///
/// # Errors
///
/// Returns [`HutchError::Socket`] if `send(2)` fails or writes nothing.
pub fn send_boolean(fd: RawFd, value: bool) -> Result<()> {
    let data = [u8::from(value)];
    // MSG_NOSIGNAL: a vanished peer must surface as EPIPE, not kill us with SIGPIPE.
    match send(fd, &data, MsgFlags::MSG_NOSIGNAL) {
        Ok(1) => {
            tracing::trace!(fd, value, "sent boolean");
            Ok(())
        }
        Ok(_) => Err(HutchError::socket(
            format!("short write on socket {fd}"),
            std::io::Error::from(std::io::ErrorKind::WriteZero),
        )),
        Err(e) => Err(HutchError::socket(
            format!("cannot send boolean through socket {fd}"),
            e,
        )),
    }
}

/// Blocks until exactly one byte is available and returns its truthiness.
///
/// # Errors
///
/// Returns [`HutchError::Socket`] if `recv(2)` fails, the peer closed the
/// channel, or `timeout` elapsed first.
pub fn recv_boolean(fd: RawFd, timeout: Option<Duration>) -> Result<bool> {
    if let Some(timeout) = timeout {
        wait_readable(fd, timeout)?;
    }

    let mut data = [0u8; 1];
    match recv(fd, &mut data, MsgFlags::empty()) {
        Ok(1) => {
            let value = data[0] != 0;
            tracing::trace!(fd, value, "received boolean");
            Ok(value)
        }
        Ok(_) => Err(HutchError::socket(
            format!("peer closed socket {fd}"),
            std::io::Error::from(std::io::ErrorKind::UnexpectedEof),
        )),
        Err(e) => Err(HutchError::socket(
            format!("cannot receive boolean from socket {fd}"),
            e,
        )),
    }
}

/// Polls `fd` until it is readable or hung up, or `timeout` elapses.
fn wait_readable(fd: RawFd, timeout: Duration) -> Result<()> {
    let deadline = Instant::now() + timeout;
    // SAFETY: the descriptor is owned by the IpcChannel for the whole call.
    let borrowed = unsafe { BorrowedFd::borrow_raw(fd) };

    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return Err(HutchError::socket(
                format!("no message on socket {fd} within {}s", timeout.as_secs()),
                std::io::Error::from(std::io::ErrorKind::TimedOut),
            ));
        }

        // PollTimeout is millisecond based; long deadlines are waited out in slices.
        let slice = u16::try_from(remaining.as_millis()).unwrap_or(u16::MAX).max(1);
        let mut fds = [PollFd::new(borrowed, PollFlags::POLLIN)];
        match poll(&mut fds, PollTimeout::from(slice)) {
            Ok(0) | Err(Errno::EINTR) => {}
            Ok(_) => return Ok(()),
            Err(e) => {
                return Err(HutchError::socket(format!("cannot poll socket {fd}"), e));
            }
        }
    }
}

/// Owner of both ends of the rendezvous socket pair.
#[derive(Debug)]
pub struct IpcChannel {
    parent: Option<OwnedFd>,
    child: Option<OwnedFd>,
    parent_fd: RawFd,
    child_fd: RawFd,
}

impl IpcChannel {
    /// Creates a connected, close-on-exec socket pair.
    ///
    /// # Errors
    ///
    /// Returns [`HutchError::Socket`] if `socketpair(2)` fails.
    pub fn new() -> Result<Self> {
        let (parent, child) = socketpair(
            AddressFamily::Unix,
            // Reliable, connection-oriented, and message boundaries are kept.
            SockType::SeqPacket,
            None,
            // The container command must not inherit the channel.
            SockFlag::SOCK_CLOEXEC,
        )
        .map_err(|e| HutchError::socket("cannot create socket pair", e))?;

        let parent_fd = parent.as_raw_fd();
        let child_fd = child.as_raw_fd();
        tracing::debug!(parent_fd, child_fd, "created IPC socket pair");
        Ok(Self {
            parent: Some(parent),
            child: Some(child),
            parent_fd,
            child_fd,
        })
    }

    /// Raw descriptors as `(parent, child)`.
    #[must_use]
    pub const fn raw_fds(&self) -> (RawFd, RawFd) {
        (self.parent_fd, self.child_fd)
    }

    /// Endpoint used by the runtime process.
    #[must_use]
    pub const fn parent_endpoint(&self, timeout: Option<Duration>) -> Endpoint {
        Endpoint::new(self.parent_fd, timeout)
    }

    /// Endpoint used by the container process.
    #[must_use]
    pub const fn child_endpoint(&self, timeout: Option<Duration>) -> Endpoint {
        Endpoint::new(self.child_fd, timeout)
    }

    /// Closes this process's copy of the child end.
    ///
    /// Called by the runtime right after spawning, so that a container
    /// which dies before answering shows up as a hang-up instead of a
    /// silent wait.
    ///
    /// # Errors
    ///
    /// Returns [`HutchError::Socket`] if `close(2)` fails.
    pub fn close_child_end(&mut self) -> Result<()> {
        match self.child.take() {
            Some(fd) => close_owned(fd, "child"),
            None => Ok(()),
        }
    }

    /// Closes every end still open. Each end is closed at most once.
    ///
    /// # Errors
    ///
    /// Returns the first [`HutchError::Socket`] encountered; both ends are
    /// always attempted.
    pub fn close(&mut self) -> Result<()> {
        let parent = self.parent.take().map_or(Ok(()), |fd| close_owned(fd, "parent"));
        let child = self.close_child_end();
        parent.and(child)
    }
}

fn close_owned(fd: OwnedFd, which: &str) -> Result<()> {
    close_raw(fd.into_raw_fd())
        .map_err(|e| HutchError::socket(format!("unable to close {which} socket"), e))?;
    tracing::debug!(which, "closed IPC socket");
    Ok(())
}

/// Closes a descriptor inherited across `clone(2)`.
///
/// The container process uses this to drop its copy of the parent end.
///
/// # Errors
///
/// Returns the [`Errno`] reported by `close(2)`.
pub fn close_raw(fd: RawFd) -> std::result::Result<(), Errno> {
    // SAFETY: callers pass descriptors they own and never use again.
    Errno::result(unsafe { libc::close(fd) }).map(drop)
}
