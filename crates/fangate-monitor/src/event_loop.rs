//! The monitor's event loop.
//!
//! ```text
//! Initializing --> Running --> Draining --> (exit 0)
//!                     |
//!                     +-----> Terminated --> (exit with recorded status)
//! ```
//!
//! The only suspension point is `poll(2)` with no timeout over the shutdown
//! wakeup socket, the control input and the event source. All of them are
//! non-blocking, so a spurious readiness report can never stall the loop in
//! `read(2)`.

use std::fmt;
use std::io::{self, Read, Stdin, Write};
use std::os::fd::{AsFd, BorrowedFd};

use fangate_common::config::MonitorConfig;
use fangate_common::constants::{CONTROL_READ_SIZE, EVENT_BUFFER_SIZE};
use fangate_common::error::{FangateError, Result, is_retryable};
use nix::poll::{PollFd, PollFlags, PollTimeout, poll};

use crate::channel::{EventSource, NonBlocking, NotificationChannel, Respond, WATCH_MASK, set_nonblocking};
use crate::decoder::{Procfs, Resolve};
use crate::dispatch::Dispatcher;
use crate::policy::VerdictPolicy;
use crate::record::Batch;
use crate::signal::ShutdownSignal;

/// Lifecycle states of the monitor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    /// Acquiring the channel, mark, buffer and signal handlers.
    Initializing,
    /// Waiting for and handling events.
    Running,
    /// Stopping cleanly; no further reads.
    Draining,
    /// Stopping without cleanup guarantees.
    Terminated,
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Initializing => write!(f, "initializing"),
            Self::Running => write!(f, "running"),
            Self::Draining => write!(f, "draining"),
            Self::Terminated => write!(f, "terminated"),
        }
    }
}

/// Why the loop stopped without error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// A shutdown signal was observed between batches.
    ShutdownRequested,
    /// The event source reported end of stream.
    EndOfStream,
    /// The control input reached end of file or failed.
    ControlClosed,
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ShutdownRequested => write!(f, "shutdown requested"),
            Self::EndOfStream => write!(f, "no more events"),
            Self::ControlClosed => write!(f, "control input closed"),
        }
    }
}

/// Page-aligned scratch buffer reused by every read.
#[repr(C, align(4096))]
struct EventBuffer([u8; EVENT_BUFFER_SIZE]);

/// Which descriptors reported readiness.
#[derive(Debug, Clone, Copy, Default)]
struct Readiness {
    wakeup: bool,
    control: bool,
    source: bool,
}

/// Outcome of draining the control input.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Control {
    Open,
    Closed,
}

/// A running permission-gated monitor.
///
/// Generic over its event source `S`, control input `C` and resolver `R`;
/// [`Monitor::start`] wires up the fanotify channel, standard input and
/// `/proc`.
pub struct Monitor<P, R = Procfs, S = NotificationChannel, C = Stdin>
where
    C: AsFd,
{
    source: S,
    control: Option<NonBlocking<C>>,
    buffer: Box<EventBuffer>,
    shutdown: ShutdownSignal,
    dispatcher: Dispatcher<P, R>,
    state: State,
}

impl<P: VerdictPolicy> Monitor<P> {
    /// Performs every startup step in order; any failure is fatal.
    ///
    /// # Errors
    ///
    /// Returns [`FangateError::Init`] naming the failing step.
    pub fn start(config: &MonitorConfig, policy: P) -> Result<Self> {
        tracing::debug!(state = %State::Initializing, "monitor starting");
        let channel = NotificationChannel::open()?;
        channel.mark_mount(&config.mount, WATCH_MASK)?;
        let shutdown = ShutdownSignal::arm()?;
        let self_pid = nix::unistd::getpid().as_raw();
        Self::new(
            channel,
            config.control_input.then(io::stdin),
            shutdown,
            Dispatcher::new(self_pid, policy, Procfs, config.format),
        )
    }
}

impl<P, R, S, C> Monitor<P, R, S, C>
where
    P: VerdictPolicy,
    R: Resolve,
    S: EventSource + Respond,
    C: AsFd + Read,
{
    /// Assembles a monitor from its parts, allocating the read buffer and
    /// switching the source and control input to non-blocking mode.
    ///
    /// The control input's original flags are restored when the monitor is
    /// dropped.
    ///
    /// # Errors
    ///
    /// Returns [`FangateError::Init`] if a descriptor's flags cannot be set.
    pub fn new(
        source: S,
        control: Option<C>,
        shutdown: ShutdownSignal,
        dispatcher: Dispatcher<P, R>,
    ) -> Result<Self> {
        let buffer = Box::new(EventBuffer([0; EVENT_BUFFER_SIZE]));
        let control = control
            .map(NonBlocking::new)
            .transpose()
            .map_err(|e| FangateError::init("fcntl", e))?;
        let _ = set_nonblocking(&source).map_err(|e| FangateError::init("fcntl", e))?;
        Ok(Self {
            source,
            control,
            buffer,
            shutdown,
            dispatcher,
            state: State::Initializing,
        })
    }

    /// Current lifecycle state.
    #[must_use]
    pub const fn state(&self) -> State {
        self.state
    }

    /// Runs until shutdown, end of stream, or a fatal error.
    ///
    /// Observation lines are written to `out`.
    ///
    /// # Errors
    ///
    /// Returns [`FangateError::Channel`] on a non-retryable poll, read or
    /// verdict write failure, and any fatal dispatch error.
    pub fn run<W: Write>(&mut self, out: &mut W) -> Result<StopReason> {
        self.transition(State::Running);
        let result = self.run_loop(out);
        match &result {
            Ok(StopReason::ControlClosed) | Err(_) => self.transition(State::Terminated),
            Ok(_) => self.transition(State::Draining),
        }
        result
    }

    fn run_loop<W: Write>(&mut self, out: &mut W) -> Result<StopReason> {
        loop {
            if self.shutdown.is_requested() {
                return Ok(StopReason::ShutdownRequested);
            }

            let ready = match self.wait() {
                Ok(ready) => ready,
                Err(e) if is_retryable(&e) => continue,
                Err(e) => return Err(FangateError::channel("poll", e)),
            };

            if ready.wakeup {
                self.shutdown.clear_wakeup();
                continue;
            }
            if ready.control && self.drain_control() == Control::Closed {
                return Ok(StopReason::ControlClosed);
            }
            if !ready.source {
                continue;
            }

            let len = match self.source.read_events(&mut self.buffer.0) {
                Ok(0) => {
                    tracing::info!("no more events");
                    return Ok(StopReason::EndOfStream);
                }
                Ok(len) => len,
                Err(e) if is_retryable(&e) => continue,
                Err(e) => return Err(FangateError::channel("read", e)),
            };

            // SAFETY: `EventSource` guarantees that every descriptor framed in
            // these bytes is freshly installed and owned by nobody else.
            #[allow(unsafe_code)]
            let batch = unsafe { Batch::new(&self.buffer.0[..len]) };
            let stats = self
                .dispatcher
                .dispatch_batch(batch, &mut self.source, out)?;
            tracing::debug!(
                bytes = len,
                records = stats.records,
                skipped = stats.skipped,
                verdicts = stats.verdicts,
                denied = stats.denied,
                dropped = stats.dropped,
                "batch handled"
            );
        }
    }

    fn wait(&self) -> io::Result<Readiness> {
        let wakeup = self.shutdown.as_fd();
        let source = self.source.as_fd();
        match &self.control {
            Some(control) => {
                let mut fds = [interest(wakeup), interest(control.as_fd()), interest(source)];
                let _ = poll(&mut fds, PollTimeout::NONE)?;
                Ok(Readiness {
                    wakeup: is_ready(&fds[0]),
                    control: is_ready(&fds[1]),
                    source: is_ready(&fds[2]),
                })
            }
            None => {
                let mut fds = [interest(wakeup), interest(source)];
                let _ = poll(&mut fds, PollTimeout::NONE)?;
                Ok(Readiness {
                    wakeup: is_ready(&fds[0]),
                    control: false,
                    source: is_ready(&fds[1]),
                })
            }
        }
    }

    /// Discards pending control input; its content carries no meaning.
    fn drain_control(&mut self) -> Control {
        let Some(control) = &mut self.control else {
            return Control::Open;
        };
        let mut scratch = [0u8; CONTROL_READ_SIZE];
        match control.read(&mut scratch) {
            Ok(0) => {
                tracing::info!("control input reached end of file");
                Control::Closed
            }
            Ok(_) => Control::Open,
            Err(e) if is_retryable(&e) => Control::Open,
            Err(e) => {
                tracing::warn!(error = %e, "control input failed");
                Control::Closed
            }
        }
    }

    fn transition(&mut self, next: State) {
        tracing::debug!(from = %self.state, to = %next, "monitor state change");
        self.state = next;
    }
}

fn interest(fd: BorrowedFd<'_>) -> PollFd<'_> {
    PollFd::new(
        fd,
        PollFlags::POLLIN | PollFlags::POLLPRI | PollFlags::POLLERR | PollFlags::POLLHUP,
    )
}

fn is_ready(fd: &PollFd<'_>) -> bool {
    fd.revents().is_some_and(|events| !events.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::DenyList;

    #[test]
    fn event_buffer_is_page_aligned() {
        assert_eq!(std::mem::align_of::<EventBuffer>(), 4096);
        assert_eq!(std::mem::size_of::<EventBuffer>(), EVENT_BUFFER_SIZE);
    }

    #[test]
    fn state_names_are_lowercase() {
        assert_eq!(State::Initializing.to_string(), "initializing");
        assert_eq!(State::Terminated.to_string(), "terminated");
    }

    #[test]
    fn stop_reasons_describe_themselves() {
        assert_eq!(StopReason::EndOfStream.to_string(), "no more events");
        assert_eq!(StopReason::ControlClosed.to_string(), "control input closed");
    }

    #[test]
    fn readiness_requires_reported_events() {
        let (read, write) = nix::unistd::pipe().expect("pipe");
        let mut fds = [interest(read.as_fd())];
        let _ = poll(&mut fds, PollTimeout::ZERO).expect("poll");
        assert!(!is_ready(&fds[0]));

        let mut writer = std::fs::File::from(write);
        writer.write_all(b"x").expect("write");
        let mut fds = [interest(read.as_fd())];
        let _ = poll(&mut fds, PollTimeout::ZERO).expect("poll");
        assert!(is_ready(&fds[0]));
    }

    #[test]
    #[ignore = "requires CAP_SYS_ADMIN"]
    fn monitor_starts_on_root_mount() {
        let config = MonitorConfig {
            control_input: false,
            ..MonitorConfig::default()
        };
        let monitor = Monitor::start(&config, DenyList::new(&config.denied)).expect("start");
        assert_eq!(monitor.state(), State::Initializing);
    }
}
