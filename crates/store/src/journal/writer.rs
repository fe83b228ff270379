use super::frame::{encode_frame, JournalError};
use serde::Serialize;
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

/// Appends frames to a journal file, syncing after every frame
pub struct JournalWriter {
    path: PathBuf,
    file: BufWriter<File>,
    len: u64,
}

impl JournalWriter {
    /// Open `path` for appending, creating it if needed
    pub fn open(path: &Path) -> Result<Self, JournalError> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        let len = file.metadata()?.len();
        Ok(Self {
            path: path.to_path_buf(),
            file: BufWriter::new(file),
            len,
        })
    }

    /// Append one frame; returns the bytes written
    pub fn append<T: Serialize>(&mut self, body: &T) -> Result<u64, JournalError> {
        let frame = encode_frame(body)?;
        self.file.write_all(&frame)?;
        self.file.flush()?;
        self.file.get_ref().sync_data()?;
        self.len += frame.len() as u64;
        Ok(frame.len() as u64)
    }

    /// Drop every frame, leaving an empty journal
    pub fn reset(&mut self) -> Result<(), JournalError> {
        self.file.flush()?;
        let file = self.file.get_ref();
        file.set_len(0)?;
        file.sync_all()?;
        self.len = 0;
        Ok(())
    }

    pub fn len(&self) -> u64 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::journal::replay;
    use tempfile::TempDir;

    #[test]
    fn reset_then_append_starts_fresh() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("journal.log");

        let mut writer = JournalWriter::open(&path).unwrap();
        writer.append(&"old".to_string()).unwrap();
        writer.reset().unwrap();
        assert!(writer.is_empty());
        writer.append(&"new".to_string()).unwrap();

        let mut seen = Vec::new();
        replay(&path, |v: String| seen.push(v)).unwrap();
        assert_eq!(seen, vec!["new".to_string()]);
    }

    #[test]
    fn reopening_keeps_length() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("journal.log");

        let mut writer = JournalWriter::open(&path).unwrap();
        let written = writer.append(&5u32).unwrap();
        drop(writer);

        assert_eq!(JournalWriter::open(&path).unwrap().len(), written);
    }
}
