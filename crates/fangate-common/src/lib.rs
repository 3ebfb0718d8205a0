//! # fangate-common
//!
//! Workspace defaults, error definitions, configuration models, and
//! domain primitives shared across the fangate workspace.
//!
//! This crate is the leaf of the dependency graph: it depends on no other
//! internal crate and performs no I/O.

pub mod config;
pub mod constants;
pub mod error;
pub mod types;
