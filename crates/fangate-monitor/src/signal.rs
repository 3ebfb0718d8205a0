//! Cooperative shutdown on termination signals.
//!
//! The first signal only raises a flag that the event loop checks between
//! batches, and writes a byte to a wakeup socket that the loop polls, so a
//! signal landing just before the loop blocks still wakes it. A second
//! signal while the flag is already raised terminates the process
//! immediately with [`FORCED_EXIT_STATUS`]. No work happens inside the
//! handler beyond the atomic store, the socket write, and the conditional
//! `_exit`.

use std::io::{self, Read};
use std::os::fd::{AsFd, BorrowedFd};
use std::os::unix::net::UnixStream;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use fangate_common::error::{FangateError, Result};
use signal_hook::consts::{SIGINT, SIGTERM};
use signal_hook::flag;
use signal_hook::low_level::pipe;

/// Exit status of a second, forcing signal.
pub const FORCED_EXIT_STATUS: i32 = 1;

/// Signals that request shutdown.
pub const SHUTDOWN_SIGNALS: [libc::c_int; 2] = [SIGINT, SIGTERM];

/// Process-wide shutdown request flag and its wakeup socket.
#[derive(Debug)]
pub struct ShutdownSignal {
    requested: Arc<AtomicBool>,
    wakeup: UnixStream,
    // Holds the socket open when no handler owns a copy of it.
    _notifier: UnixStream,
}

impl ShutdownSignal {
    /// Arms handlers for [`SHUTDOWN_SIGNALS`].
    ///
    /// # Errors
    ///
    /// Returns [`FangateError::Init`] if a handler cannot be registered.
    pub fn arm() -> Result<Self> {
        Self::arm_for(&SHUTDOWN_SIGNALS)
    }

    /// Arms handlers for an explicit set of signals.
    ///
    /// # Errors
    ///
    /// Returns [`FangateError::Init`] if the wakeup socket cannot be created
    /// or a handler cannot be registered.
    pub fn arm_for(signals: &[libc::c_int]) -> Result<Self> {
        let (wakeup, notifier) =
            UnixStream::pair().map_err(|e| FangateError::init("socketpair", e))?;
        wakeup
            .set_nonblocking(true)
            .map_err(|e| FangateError::init("fcntl", e))?;
        let requested = Arc::new(AtomicBool::new(false));

        for &signal in signals {
            // Handlers run in registration order: the exit check must see the
            // flag before this delivery sets it, and the flag must be set
            // before the loop is woken to look at it.
            let _ = flag::register_conditional_shutdown(
                signal,
                FORCED_EXIT_STATUS,
                Arc::clone(&requested),
            )
            .map_err(|e| FangateError::init("sigaction", e))?;
            let _ = flag::register(signal, Arc::clone(&requested))
                .map_err(|e| FangateError::init("sigaction", e))?;
            let writer = notifier
                .try_clone()
                .map_err(|e| FangateError::init("dup", e))?;
            let _ = pipe::register(signal, writer).map_err(|e| FangateError::init("sigaction", e))?;
        }
        tracing::debug!(?signals, "shutdown handlers armed");
        Ok(Self {
            requested,
            wakeup,
            _notifier: notifier,
        })
    }

    /// Returns `true` once shutdown has been requested.
    #[must_use]
    pub fn is_requested(&self) -> bool {
        self.requested.load(Ordering::SeqCst)
    }

    /// Consumes pending wakeup bytes so the socket stops polling readable.
    pub fn clear_wakeup(&self) {
        let mut scratch = [0u8; 64];
        loop {
            match (&self.wakeup).read(&mut scratch) {
                Ok(0) => return,
                Ok(_) => {}
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => {
                    if e.kind() != io::ErrorKind::WouldBlock {
                        tracing::warn!(error = %e, "wakeup socket read failed");
                    }
                    return;
                }
            }
        }
    }
}

impl AsFd for ShutdownSignal {
    fn as_fd(&self) -> BorrowedFd<'_> {
        self.wakeup.as_fd()
    }
}

#[cfg(test)]
mod tests {
    use nix::poll::{PollFd, PollFlags, PollTimeout, poll};

    use super::*;

    fn wakeup_pending(shutdown: &ShutdownSignal) -> bool {
        let mut fds = [PollFd::new(shutdown.as_fd(), PollFlags::POLLIN)];
        poll(&mut fds, PollTimeout::ZERO).expect("poll") > 0
    }

    #[test]
    fn unarmed_signal_is_not_requested() {
        let shutdown = ShutdownSignal::arm_for(&[]).expect("arm");
        assert!(!shutdown.is_requested());
        assert!(!wakeup_pending(&shutdown));
    }

    #[test]
    fn first_signal_sets_flag_and_wakes_without_exiting() {
        let shutdown = ShutdownSignal::arm_for(&[signal_hook::consts::SIGUSR2]).expect("arm");
        assert!(!shutdown.is_requested());
        signal_hook::low_level::raise(signal_hook::consts::SIGUSR2).expect("raise");
        assert!(shutdown.is_requested());
        assert!(wakeup_pending(&shutdown));

        shutdown.clear_wakeup();
        assert!(!wakeup_pending(&shutdown));
    }
}
