//! Ownership of the descriptors carried by event records.
//!
//! The kernel installs one descriptor per record into this process. An
//! [`EventRecord`] takes ownership of it when the record is framed and
//! closes it exactly once when dropped, on every path out of the loop body.
//! A [`Batch`] hands out records one at a time and closes the descriptors
//! of any records left unconsumed when it is dropped.
//!
//! A record in an unknown layout is never claimed: its `fd` field cannot be
//! trusted, and neither can the framing of anything after it.

use std::os::fd::{AsFd, AsRawFd, BorrowedFd, FromRawFd, OwnedFd};

use fangate_common::error::{FangateError, Result};
use nix::sys::fanotify::{FANOTIFY_METADATA_VERSION, MaskFlags};

use crate::framer::{self, EventMetadata, Framer};

/// One framed event together with the descriptor it owns.
#[derive(Debug)]
pub struct EventRecord {
    metadata: EventMetadata,
    fd: Option<OwnedFd>,
}

impl EventRecord {
    /// Takes ownership of the descriptor named by `metadata`.
    ///
    /// # Safety
    ///
    /// `metadata.fd` must be either the no-descriptor sentinel or an open
    /// descriptor that nothing else owns or will close.
    #[allow(unsafe_code)]
    pub unsafe fn claim(metadata: EventMetadata) -> Self {
        let fd = metadata.has_fd().then(|| {
            // SAFETY: upheld by the caller.
            unsafe { OwnedFd::from_raw_fd(metadata.fd) }
        });
        Self { metadata, fd }
    }

    /// Header of the record.
    #[must_use]
    pub const fn metadata(&self) -> &EventMetadata {
        &self.metadata
    }

    /// Process that triggered the event.
    #[must_use]
    pub const fn pid(&self) -> i32 {
        self.metadata.pid
    }

    /// Event-type bitmask.
    #[must_use]
    pub const fn mask(&self) -> MaskFlags {
        self.metadata.mask
    }

    /// Borrowed view of the event descriptor, if the record carries one.
    #[must_use]
    pub fn fd(&self) -> Option<BorrowedFd<'_>> {
        self.fd.as_ref().map(AsFd::as_fd)
    }

    /// Closes the event descriptor.
    pub fn close(self) {
        if let Some(fd) = self.fd {
            tracing::trace!(fd = fd.as_raw_fd(), "closing event descriptor");
            drop(fd);
        }
    }
}

/// Records of a single read, claimed lazily in delivery order.
#[derive(Debug)]
pub struct Batch<'a> {
    records: Framer<'a>,
    poisoned: bool,
}

impl<'a> Batch<'a> {
    /// Frames the bytes of one read and prepares to claim their descriptors.
    ///
    /// # Safety
    ///
    /// Every descriptor carried by a complete record in `bytes` must be open
    /// and owned by the caller, who transfers that ownership to the batch.
    #[allow(unsafe_code)]
    pub const unsafe fn new(bytes: &'a [u8]) -> Self {
        Self {
            records: framer::parse(bytes),
            poisoned: false,
        }
    }
}

impl Iterator for Batch<'_> {
    type Item = Result<EventRecord>;

    #[allow(unsafe_code)]
    fn next(&mut self) -> Option<Self::Item> {
        if self.poisoned {
            return None;
        }
        let metadata = self.records.next()?;
        if !metadata.is_supported() {
            self.poisoned = true;
            return Some(Err(FangateError::MetadataVersion {
                expected: FANOTIFY_METADATA_VERSION,
                found: metadata.vers,
            }));
        }
        // SAFETY: ownership of every framed descriptor was transferred in `Batch::new`.
        Some(Ok(unsafe { EventRecord::claim(metadata) }))
    }
}

impl Drop for Batch<'_> {
    fn drop(&mut self) {
        for record in self.by_ref().flatten() {
            tracing::debug!(pid = record.pid(), "releasing unprocessed record");
            record.close();
        }
    }
}

#[cfg(test)]
mod tests {
    use std::fs::File;
    use std::io::{ErrorKind, Write};
    use std::os::fd::IntoRawFd;

    use super::*;

    fn metadata(fd: i32, mask: MaskFlags) -> EventMetadata {
        EventMetadata {
            event_len: 24,
            vers: FANOTIFY_METADATA_VERSION,
            metadata_len: 24,
            mask,
            fd,
            pid: 1,
        }
    }

    /// Returns a raw read end and the write end used to observe its closure.
    fn watched_pipe() -> (i32, File) {
        let (read, write) = nix::unistd::pipe().expect("pipe");
        (read.into_raw_fd(), File::from(write))
    }

    fn is_closed(write_end: &mut File) -> bool {
        matches!(write_end.write(b"x"), Err(e) if e.kind() == ErrorKind::BrokenPipe)
    }

    #[test]
    #[allow(unsafe_code)]
    fn dropping_record_closes_descriptor() {
        let (raw, mut write_end) = watched_pipe();
        // SAFETY: the read end was released by `into_raw_fd` above.
        let record = unsafe { EventRecord::claim(metadata(raw, MaskFlags::FAN_CLOSE_WRITE)) };
        assert_eq!(record.fd().map(|fd| fd.as_raw_fd()), Some(raw));
        assert!(!is_closed(&mut write_end));
        record.close();
        assert!(is_closed(&mut write_end));
    }

    #[test]
    #[allow(unsafe_code)]
    fn nofd_record_owns_nothing() {
        // SAFETY: the sentinel carries no descriptor.
        let record = unsafe { EventRecord::claim(metadata(libc::FAN_NOFD, MaskFlags::FAN_Q_OVERFLOW)) };
        assert!(record.fd().is_none());
        record.close();
    }

    #[test]
    #[allow(unsafe_code)]
    fn dropping_batch_closes_unconsumed_records() {
        let (first, mut first_end) = watched_pipe();
        let (second, mut second_end) = watched_pipe();
        let mut bytes = metadata(first, MaskFlags::FAN_CLOSE_WRITE).to_bytes().to_vec();
        bytes.extend_from_slice(&metadata(second, MaskFlags::FAN_CLOSE_WRITE).to_bytes());

        // SAFETY: both read ends were released by `into_raw_fd`.
        let mut batch = unsafe { Batch::new(&bytes) };
        let record = batch.next().expect("first record").expect("supported");
        drop(batch);
        assert!(!is_closed(&mut first_end));
        assert!(is_closed(&mut second_end));
        record.close();
        assert!(is_closed(&mut first_end));
    }

    #[test]
    #[allow(unsafe_code)]
    fn unknown_version_is_reported_without_claiming_descriptors() {
        let (stale, mut stale_end) = watched_pipe();
        let (after, mut after_end) = watched_pipe();
        let mut unknown = metadata(stale, MaskFlags::FAN_OPEN_PERM);
        unknown.vers = FANOTIFY_METADATA_VERSION + 1;
        let mut bytes = unknown.to_bytes().to_vec();
        bytes.extend_from_slice(&metadata(after, MaskFlags::FAN_CLOSE_WRITE).to_bytes());

        // SAFETY: both read ends were released by `into_raw_fd`.
        let mut batch = unsafe { Batch::new(&bytes) };
        let err = batch.next().expect("item").expect_err("unknown layout");
        assert!(matches!(err, FangateError::MetadataVersion { .. }));
        assert!(batch.next().is_none());
        drop(batch);
        assert!(!is_closed(&mut stale_end));
        assert!(!is_closed(&mut after_end));

        // SAFETY: neither descriptor was claimed by the batch.
        drop(unsafe { OwnedFd::from_raw_fd(stale) });
        drop(unsafe { OwnedFd::from_raw_fd(after) });
    }
}
