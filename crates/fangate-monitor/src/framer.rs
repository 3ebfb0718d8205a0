//! Framing of fanotify read buffers into event records.
//!
//! A single `read(2)` on the notification channel returns zero or more
//! records laid out back to back. Each starts with a fixed header whose
//! `event_len` field gives the size of the whole record, so the cursor
//! advances by that length rather than by a fixed stride.

use nix::sys::fanotify::{FANOTIFY_METADATA_VERSION, MaskFlags};

/// Size in bytes of the fixed record header.
pub const EVENT_METADATA_LEN: usize = size_of::<libc::fanotify_event_metadata>();

/// Decoded view of one record header (`struct fanotify_event_metadata`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EventMetadata {
    /// Length of the whole record, header included.
    pub event_len: u32,
    /// Layout version of the record.
    pub vers: u8,
    /// Length of the fixed header.
    pub metadata_len: u16,
    /// Event-type bitmask, unknown bits retained.
    pub mask: MaskFlags,
    /// Descriptor installed in this process for the affected file.
    pub fd: i32,
    /// Process that triggered the event.
    pub pid: i32,
}

impl EventMetadata {
    /// Decodes a header from the start of `bytes`.
    ///
    /// Returns `None` if fewer than [`EVENT_METADATA_LEN`] bytes are available.
    #[must_use]
    pub fn decode(bytes: &[u8]) -> Option<Self> {
        let header: &[u8; EVENT_METADATA_LEN] = bytes.get(..EVENT_METADATA_LEN)?.try_into().ok()?;
        Some(Self {
            event_len: u32::from_ne_bytes([header[0], header[1], header[2], header[3]]),
            vers: header[4],
            metadata_len: u16::from_ne_bytes([header[6], header[7]]),
            mask: MaskFlags::from_bits_retain(u64::from_ne_bytes([
                header[8], header[9], header[10], header[11], header[12], header[13], header[14],
                header[15],
            ])),
            fd: i32::from_ne_bytes([header[16], header[17], header[18], header[19]]),
            pid: i32::from_ne_bytes([header[20], header[21], header[22], header[23]]),
        })
    }

    /// Encodes the header in the kernel's native layout.
    #[must_use]
    pub fn to_bytes(&self) -> [u8; EVENT_METADATA_LEN] {
        let mut header = [0u8; EVENT_METADATA_LEN];
        header[0..4].copy_from_slice(&self.event_len.to_ne_bytes());
        header[4] = self.vers;
        header[6..8].copy_from_slice(&self.metadata_len.to_ne_bytes());
        header[8..16].copy_from_slice(&self.mask.bits().to_ne_bytes());
        header[16..20].copy_from_slice(&self.fd.to_ne_bytes());
        header[20..24].copy_from_slice(&self.pid.to_ne_bytes());
        header
    }

    /// Returns `true` if the record uses the layout this build understands.
    #[must_use]
    pub const fn is_supported(&self) -> bool {
        self.vers == FANOTIFY_METADATA_VERSION
    }

    /// Returns `true` if the record carries a descriptor.
    #[must_use]
    pub const fn has_fd(&self) -> bool {
        self.fd != libc::FAN_NOFD
    }
}

/// Lazy, single-pass cursor over the records of one read.
#[derive(Debug, Clone)]
pub struct Framer<'a> {
    bytes: &'a [u8],
    offset: usize,
}

/// Frames the first `bytes.len()` bytes returned by a read.
#[must_use]
pub const fn parse(bytes: &[u8]) -> Framer<'_> {
    Framer { bytes, offset: 0 }
}

impl Iterator for Framer<'_> {
    type Item = EventMetadata;

    fn next(&mut self) -> Option<Self::Item> {
        let rest = self.bytes.get(self.offset..)?;
        let metadata = EventMetadata::decode(rest)?;
        let len = usize::try_from(metadata.event_len).ok()?;
        // A record must hold at least its header and fit in what was read.
        if len < EVENT_METADATA_LEN || len > rest.len() {
            self.offset = self.bytes.len();
            return None;
        }
        self.offset += len;
        Some(metadata)
    }
}

impl std::iter::FusedIterator for Framer<'_> {}
