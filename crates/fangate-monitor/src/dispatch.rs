//! Per-record handling: resolve, report, decide, answer, close.

use std::borrow::Cow;
use std::io::{self, Write};
use std::thread;
use std::time::Duration;

use fangate_common::constants::{OUTPUT_RETRY_DELAY_MS, OUTPUT_RETRY_LIMIT};
use fangate_common::error::{FangateError, Result};
use fangate_common::types::{OutputFormat, Verdict};
use nix::sys::fanotify::MaskFlags;
use serde::Serialize;

use crate::channel::Respond;
use crate::decoder::{self, Resolve};
use crate::policy::VerdictPolicy;
use crate::record::{Batch, EventRecord};

/// One reported event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Observation<'a> {
    /// Short name of the acting process.
    pub process: &'a str,
    /// Acting process id.
    pub pid: i32,
    /// Indicator string of the event mask.
    pub mask: String,
    /// Resolved path or device/inode fallback, rendered for display.
    pub path: Cow<'a, str>,
    /// Verdict written back, for permission-gated records.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub verdict: Option<Verdict>,
}

impl Observation<'_> {
    /// Renders the observation as one newline-terminated line in `format`.
    ///
    /// # Errors
    ///
    /// Returns [`FangateError::Serialization`] if JSON rendering fails.
    pub fn to_line(&self, format: OutputFormat) -> Result<String> {
        match format {
            OutputFormat::Text => Ok(format!(
                "{}({})\t{}\t{}\n",
                self.process, self.pid, self.mask, self.path
            )),
            OutputFormat::Json => {
                let mut line = serde_json::to_string(self)?;
                line.push('\n');
                Ok(line)
            }
        }
    }
}

/// Whether an observation line reached the output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// The whole line was written.
    Written,
    /// The output stayed full past the retry budget; the line was dropped.
    Dropped,
}

/// Writes `line` to an output that may be non-blocking.
///
/// A would-block condition is retried [`OUTPUT_RETRY_LIMIT`] times, pausing
/// [`OUTPUT_RETRY_DELAY_MS`] between attempts, before the rest of the line
/// is given up on.
///
/// # Errors
///
/// Returns any other write error.
pub fn deliver<W: Write>(out: &mut W, mut line: &[u8]) -> io::Result<Delivery> {
    let mut retries = 0;
    while !line.is_empty() {
        match out.write(line) {
            Ok(0) => return Err(io::Error::from(io::ErrorKind::WriteZero)),
            Ok(written) => line = &line[written..],
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                if retries == OUTPUT_RETRY_LIMIT {
                    return Ok(Delivery::Dropped);
                }
                retries += 1;
                thread::sleep(Duration::from_millis(OUTPUT_RETRY_DELAY_MS));
            }
            Err(e) => return Err(e),
        }
    }
    Ok(Delivery::Written)
}

/// What happened to a single record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Handled {
    /// Reported, and answered if permission-gated.
    Reported {
        /// Verdict written back, if one was due.
        verdict: Option<Verdict>,
        /// Whether the observation line was written.
        delivery: Delivery,
    },
    /// Triggered by the monitor itself; dropped unreported.
    SkippedSelf,
    /// Carried no descriptor, as with the queue overflow marker.
    NoDescriptor,
}

/// Counters for one read batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchStats {
    /// Records framed.
    pub records: usize,
    /// Records from the monitor's own pid.
    pub skipped: usize,
    /// Verdicts written.
    pub verdicts: usize,
    /// Of those, denials.
    pub denied: usize,
    /// Observation lines dropped on a full output.
    pub dropped: usize,
}

impl BatchStats {
    fn count(&mut self, handled: Handled) {
        self.records += 1;
        match handled {
            Handled::SkippedSelf => self.skipped += 1,
            Handled::Reported { verdict, delivery } => {
                if let Some(verdict) = verdict {
                    self.verdicts += 1;
                    if verdict == Verdict::Deny {
                        self.denied += 1;
                    }
                }
                if delivery == Delivery::Dropped {
                    self.dropped += 1;
                }
            }
            Handled::NoDescriptor => {}
        }
    }
}

/// Drives framed records through decoding, reporting and the verdict policy.
#[derive(Debug)]
pub struct Dispatcher<P, R> {
    self_pid: i32,
    policy: P,
    resolver: R,
    format: OutputFormat,
}

impl<P: VerdictPolicy, R: Resolve> Dispatcher<P, R> {
    /// Creates a dispatcher that ignores events raised by `self_pid`.
    pub const fn new(self_pid: i32, policy: P, resolver: R, format: OutputFormat) -> Self {
        Self {
            self_pid,
            policy,
            resolver,
            format,
        }
    }

    /// Handles every record of one read, in delivery order.
    ///
    /// Descriptors of records not reached because of an error are closed
    /// when the batch is dropped.
    ///
    /// # Errors
    ///
    /// Returns the first fatal error: a verdict write failure, an unknown
    /// record version, or an output failure other than a full output.
    pub fn dispatch_batch<C, W>(&self, batch: Batch<'_>, responder: &mut C, out: &mut W) -> Result<BatchStats>
    where
        C: Respond,
        W: Write,
    {
        let mut stats = BatchStats::default();
        for record in batch {
            stats.count(self.handle(record?, responder, out)?);
        }
        match out.flush() {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                tracing::warn!("output full; buffered observations left unflushed");
            }
            Err(source) => return Err(FangateError::Output { source }),
        }
        if stats.dropped > 0 {
            tracing::warn!(dropped = stats.dropped, "output full; observations dropped");
        }
        Ok(stats)
    }

    /// Handles one record and closes its descriptor.
    ///
    /// For permission-gated records the verdict is written even when the
    /// observation line cannot be, so the blocked opener always resumes.
    ///
    /// # Errors
    ///
    /// See [`Dispatcher::dispatch_batch`].
    pub fn handle<C, W>(&self, record: EventRecord, responder: &mut C, out: &mut W) -> Result<Handled>
    where
        C: Respond,
        W: Write,
    {
        let metadata = *record.metadata();
        if metadata.pid == self.self_pid {
            record.close();
            return Ok(Handled::SkippedSelf);
        }
        let Some(fd) = record.fd() else {
            if metadata.mask.contains(MaskFlags::FAN_Q_OVERFLOW) {
                tracing::warn!("fanotify event queue overflowed; events were lost");
            } else {
                tracing::debug!(pid = metadata.pid, mask = ?metadata.mask, "record without descriptor");
            }
            return Ok(Handled::NoDescriptor);
        };

        let process = self.resolver.process_name(metadata.pid);
        let path = self.resolver.path(fd);
        let verdict = metadata
            .mask
            .contains(MaskFlags::FAN_OPEN_PERM)
            .then(|| self.policy.decide(&path));

        let observation = Observation {
            process: &process,
            pid: metadata.pid,
            mask: decoder::mask_to_display(metadata.mask),
            path: path.to_string_lossy(),
            verdict,
        };
        let reported = observation.to_line(self.format).and_then(|line| {
            deliver(out, line.as_bytes()).map_err(|source| FangateError::Output { source })
        });

        if let Some(verdict) = verdict {
            responder
                .respond(fd, verdict)
                .map_err(|e| FangateError::channel("write", e))?;
            if verdict == Verdict::Deny {
                tracing::info!(pid = metadata.pid, process = %process, path = %path.display(), "open denied");
            }
        }
        record.close();
        Ok(Handled::Reported {
            verdict,
            delivery: reported?,
        })
    }
}
