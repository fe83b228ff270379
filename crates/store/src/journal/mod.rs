//! Append-only journal of checksummed frames
//!
//! Each frame is a little-endian `u32` body length, a little-endian `u32`
//! CRC32C of the body, then the bincode-encoded body. Replay stops at the
//! first frame that is short, oversized or fails its checksum, and the file
//! is cut back to the last good frame.

mod frame;
mod replay;
mod writer;

pub use frame::{decode_frame, encode_frame, JournalError, FRAME_HEADER_LEN, MAX_FRAME_LEN};
pub use replay::{replay, ReplayOutcome};
pub use writer::JournalWriter;
