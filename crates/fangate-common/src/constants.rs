//! Workspace-wide defaults and limits.
//!
//! Kernel ABI values (event bits, record layout, verdict codes) come from
//! `nix::sys::fanotify` and `libc` in the monitor crate.

/// Capacity of the reusable read buffer: one page.
pub const EVENT_BUFFER_SIZE: usize = 4096;

/// Path denied by the default policy.
pub const DEFAULT_DENIED_PATH: &str = "/tmp/foo";

/// Default mark target: the mount containing the working directory.
pub const DEFAULT_MOUNT: &str = ".";

/// Substituted when a process name or path cannot be resolved.
pub const UNKNOWN: &str = "unknown";

/// Root of the process-table metadata view.
pub const PROC_ROOT: &str = "/proc";

/// Bytes drained from the control input per readiness notification.
pub const CONTROL_READ_SIZE: usize = 1024;

/// Attempts to finish an observation line on an output that would block.
pub const OUTPUT_RETRY_LIMIT: u32 = 50;

/// Pause between attempts on an output that would block, in milliseconds.
pub const OUTPUT_RETRY_DELAY_MS: u64 = 10;
