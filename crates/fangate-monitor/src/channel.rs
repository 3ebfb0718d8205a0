//! The fanotify notification channel and the verdict protocol.
//!
//! The channel is opened in the pre-content class so that permission events
//! can be delivered, marked once on the whole mount, and then only read
//! from and answered until the process exits.

use std::io::{self, Read};
use std::os::fd::{AsFd, AsRawFd, BorrowedFd};
use std::path::Path;

use fangate_common::error::{FangateError, Result};
use fangate_common::types::Verdict;
use nix::fcntl::{AT_FDCWD, FcntlArg, OFlag, fcntl};
use nix::sys::fanotify::{
    self, EventFFlags, Fanotify, FanotifyResponse, InitFlags, MarkFlags, MaskFlags,
};

/// Events the monitor registers for on the mount.
pub const WATCH_MASK: MaskFlags = MaskFlags::FAN_CLOSE_WRITE
    .union(MaskFlags::FAN_EVENT_ON_CHILD)
    .union(MaskFlags::FAN_OPEN_PERM);

/// Sink for verdicts on permission-gated records.
pub trait Respond {
    /// Writes one verdict back to the kernel for the record owning `fd`.
    ///
    /// # Errors
    ///
    /// Returns the underlying write error.
    fn respond(&mut self, fd: BorrowedFd<'_>, verdict: Verdict) -> io::Result<()>;
}

/// A pollable source of raw event records.
///
/// # Safety
///
/// Every descriptor named by a complete record written into `buf` must be
/// open and owned by nobody else: the event loop takes ownership of it and
/// closes it after the record is handled.
#[allow(unsafe_code)]
pub unsafe trait EventSource: AsFd {
    /// Reads pending records into `buf`.
    ///
    /// # Errors
    ///
    /// Returns the raw read error; callers classify retryable conditions.
    fn read_events(&mut self, buf: &mut [u8]) -> io::Result<usize>;
}

/// Handle to a fanotify group.
#[derive(Debug)]
pub struct NotificationChannel {
    group: Fanotify,
}

impl NotificationChannel {
    /// Creates a fanotify group able to receive permission events.
    ///
    /// # Errors
    ///
    /// Returns [`FangateError::Init`] if `fanotify_init(2)` fails, most
    /// commonly for lack of `CAP_SYS_ADMIN`.
    pub fn open() -> Result<Self> {
        let group = Fanotify::init(
            InitFlags::FAN_CLASS_PRE_CONTENT | InitFlags::FAN_CLOEXEC,
            EventFFlags::O_RDONLY | EventFFlags::O_LARGEFILE,
        )
        .map_err(|e| FangateError::init("fanotify_init", e.into()))?;
        tracing::debug!(fd = group.as_raw_fd(), "notification channel opened");
        Ok(Self { group })
    }

    /// Marks the mount containing `path` for `mask`.
    ///
    /// # Errors
    ///
    /// Returns [`FangateError::Init`] if `fanotify_mark(2)` fails.
    pub fn mark_mount(&self, path: &Path, mask: MaskFlags) -> Result<()> {
        self.group
            .mark(
                MarkFlags::FAN_MARK_ADD | MarkFlags::FAN_MARK_MOUNT,
                mask,
                AT_FDCWD,
                Some(path),
            )
            .map_err(|e| FangateError::init("fanotify_mark", e.into()))?;
        tracing::info!(path = %path.display(), ?mask, "mount marked");
        Ok(())
    }
}

// SAFETY: the kernel installs a fresh descriptor in this process for every
// record it delivers on the group.
#[allow(unsafe_code)]
unsafe impl EventSource for NotificationChannel {
    fn read_events(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        Ok(nix::unistd::read(&self.group, buf)?)
    }
}

impl Respond for NotificationChannel {
    fn respond(&mut self, fd: BorrowedFd<'_>, verdict: Verdict) -> io::Result<()> {
        tracing::trace!(fd = fd.as_raw_fd(), %verdict, "writing verdict");
        let response = match verdict {
            Verdict::Allow => fanotify::Response::FAN_ALLOW,
            Verdict::Deny => fanotify::Response::FAN_DENY,
        };
        Ok(self
            .group
            .write_response(FanotifyResponse::new(fd, response))?)
    }
}

impl AsFd for NotificationChannel {
    fn as_fd(&self) -> BorrowedFd<'_> {
        self.group.as_fd()
    }
}

/// Adds `O_NONBLOCK` to the status flags of `fd`, keeping the others.
///
/// Returns the flags as they were before the call.
///
/// # Errors
///
/// Returns the `fcntl(2)` error.
pub fn set_nonblocking<Fd: AsFd>(fd: Fd) -> io::Result<OFlag> {
    let fd = fd.as_fd();
    let flags = OFlag::from_bits_retain(fcntl(fd, FcntlArg::F_GETFL)?);
    if !flags.contains(OFlag::O_NONBLOCK) {
        let _ = fcntl(fd, FcntlArg::F_SETFL(flags | OFlag::O_NONBLOCK))?;
    }
    Ok(flags)
}

/// A handle switched to non-blocking mode for as long as this guard lives.
///
/// Status flags belong to the open file description, which a terminal's
/// standard input usually shares with standard output, so the original
/// flags are put back on drop.
#[derive(Debug)]
pub struct NonBlocking<F: AsFd> {
    inner: F,
    original: OFlag,
}

impl<F: AsFd> NonBlocking<F> {
    /// Sets `O_NONBLOCK` on `inner`.
    ///
    /// # Errors
    ///
    /// Returns the `fcntl(2)` error.
    pub fn new(inner: F) -> io::Result<Self> {
        let original = set_nonblocking(&inner)?;
        Ok(Self { inner, original })
    }
}

impl<F: AsFd + Read> Read for NonBlocking<F> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.inner.read(buf)
    }
}

impl<F: AsFd> AsFd for NonBlocking<F> {
    fn as_fd(&self) -> BorrowedFd<'_> {
        self.inner.as_fd()
    }
}

impl<F: AsFd> Drop for NonBlocking<F> {
    fn drop(&mut self) {
        if self.original.contains(OFlag::O_NONBLOCK) {
            return;
        }
        if let Err(e) = fcntl(self.inner.as_fd(), FcntlArg::F_SETFL(self.original)) {
            tracing::warn!(error = %e, "failed to restore descriptor flags");
        }
    }
}
