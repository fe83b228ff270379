//! Shared utilities for quotevault
//!
//! Small helpers used by both the storage engine and the CLI: crash-safe
//! file replacement, XDG directory resolution and logging setup.

pub mod atomic_file;
pub mod tracing;
pub mod xdg;

pub use atomic_file::*;
pub use xdg::*;
