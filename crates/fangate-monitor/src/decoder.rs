//! Decoding of event masks and resolution of process names and paths.
//!
//! Resolution reads ambient process-table state under `/proc`. Every lookup
//! is fail-soft: a process that already exited or a descriptor that no
//! longer maps to a path yields a substitute value, never an error.
//!
//! Paths stay as raw bytes so that names which are not UTF-8 still compare
//! exactly; they are rendered lossily only for display.

use std::fs;
use std::os::fd::{AsRawFd, BorrowedFd};
use std::path::{Path, PathBuf};

use fangate_common::constants::{PROC_ROOT, UNKNOWN};
use nix::sys::fanotify::MaskFlags;
use nix::sys::stat::{FileStat, fstat, major, minor};

/// Display characters in output order, each shown when any of its bits is set.
const INDICATORS: [(MaskFlags, char); 5] = [
    (MaskFlags::FAN_ACCESS, 'R'),
    (MaskFlags::FAN_ONDIR, 'D'),
    (MaskFlags::FAN_OPEN, 'O'),
    (MaskFlags::FAN_CLOSE, 'C'),
    (MaskFlags::FAN_MODIFY.union(MaskFlags::FAN_CLOSE_WRITE), 'W'),
];

/// Source of process names and file paths for event records.
pub trait Resolve {
    /// Returns the short name of `pid`, or `"unknown"`.
    fn process_name(&self, pid: i32) -> String;

    /// Returns the path behind an event descriptor, or a device/inode fallback.
    fn path(&self, fd: BorrowedFd<'_>) -> PathBuf;
}

/// Resolver backed by the live `/proc` filesystem.
#[derive(Debug, Clone, Copy, Default)]
pub struct Procfs;

impl Resolve for Procfs {
    fn process_name(&self, pid: i32) -> String {
        resolve_process_name(pid)
    }

    fn path(&self, fd: BorrowedFd<'_>) -> PathBuf {
        resolve_path(fd)
    }
}

/// Renders an event mask as its compact indicator string.
///
/// Unrecognized bits are ignored, so the permission bit alone renders as
/// an empty string.
#[must_use]
pub fn mask_to_display(mask: MaskFlags) -> String {
    INDICATORS
        .iter()
        .filter(|(bits, _)| mask.intersects(*bits))
        .map(|(_, indicator)| *indicator)
        .collect()
}

/// Reads the short process name of `pid` from `/proc/<pid>/comm`.
#[must_use]
pub fn resolve_process_name(pid: i32) -> String {
    resolve_process_name_in(Path::new(PROC_ROOT), pid)
}

/// Reads the short process name of `pid` below an alternate proc root.
#[must_use]
pub fn resolve_process_name_in(proc_root: &Path, pid: i32) -> String {
    let comm = proc_root.join(pid.to_string()).join("comm");
    match fs::read(&comm) {
        Ok(bytes) => {
            let name = String::from_utf8_lossy(&bytes);
            let name = name.strip_suffix('\n').unwrap_or(&name);
            if name.is_empty() {
                UNKNOWN.to_owned()
            } else {
                name.to_owned()
            }
        }
        Err(e) => {
            tracing::debug!(pid, error = %e, "process name unavailable");
            UNKNOWN.to_owned()
        }
    }
}

/// Resolves an event descriptor to the path of the file it refers to.
///
/// A file with no remaining links, or one whose descriptor link cannot be
/// read, is identified as `device <maj>:<min> inode <n>` instead.
#[must_use]
pub fn resolve_path(fd: BorrowedFd<'_>) -> PathBuf {
    let stat = fstat(fd)
        .inspect_err(|e| tracing::debug!(fd = fd.as_raw_fd(), error = %e, "fstat failed"))
        .ok();
    if let Some(stat) = stat.filter(|s| s.st_nlink == 0) {
        return identity(&stat);
    }

    match fs::read_link(descriptor_link(fd)) {
        Ok(target) => target,
        Err(e) => {
            tracing::debug!(fd = fd.as_raw_fd(), error = %e, "descriptor link unreadable");
            stat.map_or_else(
                || {
                    tracing::warn!(fd = fd.as_raw_fd(), "descriptor identity unavailable");
                    PathBuf::from(UNKNOWN)
                },
                |stat| identity(&stat),
            )
        }
    }
}

/// Formats the fallback identity of a file without a resolvable path.
#[must_use]
pub fn format_device_inode(dev: u64, ino: u64) -> String {
    format!("device {}:{} inode {ino}", major(dev), minor(dev))
}

fn identity(stat: &FileStat) -> PathBuf {
    PathBuf::from(format_device_inode(stat.st_dev, stat.st_ino))
}

fn descriptor_link(fd: BorrowedFd<'_>) -> PathBuf {
    Path::new(PROC_ROOT)
        .join("self")
        .join("fd")
        .join(fd.as_raw_fd().to_string())
}

#[cfg(test)]
mod tests {
    use std::ffi::OsStr;
    use std::fs::File;
    use std::os::fd::AsFd;
    use std::os::unix::ffi::OsStrExt;
    use std::os::unix::fs::MetadataExt;

    use super::*;
    use nix::sys::stat::makedev;

    fn display(bits: MaskFlags) -> String {
        mask_to_display(bits)
    }

    #[test]
    fn empty_mask_renders_empty() {
        assert_eq!(display(MaskFlags::empty()), "");
    }

    #[test]
    fn open_renders_o() {
        assert_eq!(display(MaskFlags::FAN_OPEN), "O");
    }

    #[test]
    fn close_write_renders_close_and_write() {
        assert_eq!(display(MaskFlags::FAN_CLOSE_WRITE), "CW");
    }

    #[test]
    fn close_nowrite_renders_close_only() {
        assert_eq!(display(MaskFlags::FAN_CLOSE_NOWRITE), "C");
    }

    #[test]
    fn modify_renders_write_only() {
        assert_eq!(display(MaskFlags::FAN_MODIFY), "W");
    }

    #[test]
    fn indicators_follow_fixed_order() {
        let all = MaskFlags::FAN_MODIFY
            | MaskFlags::FAN_CLOSE_WRITE
            | MaskFlags::FAN_OPEN
            | MaskFlags::FAN_ONDIR
            | MaskFlags::FAN_ACCESS;
        assert_eq!(display(all), "RDOCW");
        assert_eq!(display(MaskFlags::FAN_CLOSE_NOWRITE | MaskFlags::FAN_ACCESS), "RC");
        assert_eq!(display(MaskFlags::FAN_MODIFY | MaskFlags::FAN_ONDIR), "DW");
    }

    #[test]
    fn unknown_bits_are_ignored() {
        assert_eq!(display(MaskFlags::FAN_OPEN_PERM), "");
        assert_eq!(
            display(MaskFlags::FAN_Q_OVERFLOW | MaskFlags::FAN_EVENT_ON_CHILD | MaskFlags::FAN_OPEN),
            "O"
        );
    }

    #[test]
    fn own_process_name_resolves() {
        let pid = i32::try_from(std::process::id()).expect("pid fits i32");
        let name = resolve_process_name(pid);
        assert_ne!(name, UNKNOWN);
        assert!(!name.ends_with('\n'));
    }

    #[test]
    fn missing_process_resolves_to_unknown() {
        assert_eq!(resolve_process_name(i32::MAX), UNKNOWN);
    }

    #[test]
    fn only_one_trailing_newline_is_stripped() {
        let root = tempfile::tempdir().expect("tempdir");
        let proc_dir = root.path().join("77");
        fs::create_dir_all(&proc_dir).expect("create pid dir");
        fs::write(proc_dir.join("comm"), "worker\n\n").expect("write comm");
        assert_eq!(resolve_process_name_in(root.path(), 77), "worker\n");
    }

    #[test]
    fn empty_comm_resolves_to_unknown() {
        let root = tempfile::tempdir().expect("tempdir");
        let proc_dir = root.path().join("78");
        fs::create_dir_all(&proc_dir).expect("create pid dir");
        fs::write(proc_dir.join("comm"), "\n").expect("write comm");
        assert_eq!(resolve_process_name_in(root.path(), 78), UNKNOWN);
    }

    #[test]
    fn open_file_resolves_to_its_path() {
        let file = tempfile::NamedTempFile::new().expect("tempfile");
        let expected = fs::canonicalize(file.path()).expect("canonicalize");
        assert_eq!(resolve_path(file.as_file().as_fd()), expected);
    }

    #[test]
    fn non_utf8_name_resolves_byte_for_byte() {
        let dir = tempfile::tempdir().expect("tempdir");
        let name = OsStr::from_bytes(b"secret\xfe");
        let path = fs::canonicalize(dir.path()).expect("canonicalize").join(name);
        let file = File::create(&path).expect("create");

        let resolved = resolve_path(file.as_fd());
        assert_eq!(resolved, path);
        assert_eq!(resolved.file_name().map(OsStr::as_bytes), Some(&b"secret\xfe"[..]));
    }

    #[test]
    fn live_file_named_like_deleted_keeps_its_path() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = fs::canonicalize(dir.path())
            .expect("canonicalize")
            .join("report (deleted)");
        let file = File::create(&path).expect("create");
        assert_eq!(resolve_path(file.as_fd()), path);
    }

    #[test]
    fn deleted_file_falls_back_to_device_and_inode() {
        let file = tempfile::NamedTempFile::new().expect("tempfile");
        let meta = file.as_file().metadata().expect("metadata");
        let handle = file.reopen().expect("reopen");
        file.close().expect("unlink");

        let resolved = resolve_path(handle.as_fd());
        assert_eq!(resolved, PathBuf::from(format_device_inode(meta.dev(), meta.ino())));
        assert!(resolved.to_string_lossy().starts_with("device "));
    }

    #[test]
    fn device_inode_format_splits_major_minor() {
        assert_eq!(format_device_inode(makedev(8, 1), 42), "device 8:1 inode 42");
    }
}
