use super::frame::{decode_frame, JournalError};
use serde::de::DeserializeOwned;
use std::fs::{self, OpenOptions};
use std::io;
use std::path::Path;

/// What a replay found on disk
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ReplayOutcome {
    /// Frames decoded and handed to the visitor
    pub frames: usize,
    /// Byte length of the valid prefix
    pub valid_len: u64,
    /// Bytes dropped from a torn or corrupt tail
    pub discarded: u64,
}

/// Replay every valid frame in `path`, in write order.
///
/// A missing file replays as empty. A corrupt tail is truncated so the next
/// append continues from the last good frame.
pub fn replay<T, F>(path: &Path, mut visit: F) -> Result<ReplayOutcome, JournalError>
where
    T: DeserializeOwned,
    F: FnMut(T),
{
    let bytes = match fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(ReplayOutcome::default()),
        Err(e) => return Err(e.into()),
    };

    let mut outcome = ReplayOutcome::default();
    let mut offset = 0usize;
    while offset < bytes.len() {
        match decode_frame::<T>(&bytes[offset..]) {
            Ok((body, used)) => {
                visit(body);
                offset += used;
                outcome.frames += 1;
            }
            Err(e) => {
                tracing::warn!(
                    path = %path.display(),
                    offset,
                    error = %e,
                    "Journal corruption detected, truncating at last valid frame"
                );
                break;
            }
        }
    }

    outcome.valid_len = offset as u64;
    outcome.discarded = (bytes.len() - offset) as u64;
    if outcome.discarded > 0 {
        let file = OpenOptions::new().write(true).open(path)?;
        file.set_len(outcome.valid_len)?;
        file.sync_all()?;
    }
    Ok(outcome)
}
