//! Error handling for the storage engine
//!
//! Every error carries a recovery hint so callers (and the engine itself) can
//! decide between retrying, cleaning up, restoring a backup or giving up.

mod conversions;
mod display;
mod recovery;
mod types;

pub use types::*;
