//! # fangate-monitor
//!
//! Permission-gated file access monitoring on a Linux mount via fanotify.
//!
//! The pieces, leaves first:
//! - **decoder**: mask rendering and process/path resolution from `/proc`.
//! - **framer**: splits one read into variable-length event records.
//! - **record**: owns the descriptor each record carries and closes it once.
//! - **policy**: the replaceable allow/deny decision.
//! - **channel**: the fanotify group and the verdict protocol.
//! - **dispatch**: the per-record pipeline.
//! - **event_loop**: readiness multiplexing and the monitor state machine.
//! - **signal**: cooperative shutdown with forced exit on a repeated signal.
//!
//! Requires `CAP_SYS_ADMIN` at runtime.

pub mod channel;
pub mod decoder;
pub mod dispatch;
pub mod event_loop;
pub mod framer;
pub mod policy;
pub mod record;
pub mod signal;

pub use event_loop::{Monitor, State, StopReason};
pub use policy::{DenyList, VerdictPolicy};
