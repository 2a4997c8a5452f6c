//! Write-Ahead Log (WAL) for crash recovery.
//!
//! Each entry is written as: [length: u32][crc32: u32][payload: bincode(WalEntry)]
//! The WAL is append-only and fsynced after each write.

use crate::error::{EngineError, Result};
use crate::persistence::serialization;
use crate::record::VectorRecord;
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::{BufReader, Read, Write};
use std::path::{Path, PathBuf};
use tracing::warn;

const FRAME_HEADER_LEN: usize = 8;
/// Frames larger than this are treated as corruption rather than allocated.
const MAX_FRAME_LEN: usize = 256 * 1024 * 1024;

/// A single WAL entry.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub enum WalEntry {
    /// Insert or replace a record; its `version` is the entry's sequence number.
    Put { record: VectorRecord },
    /// Tombstone for `id`, written at sequence `seq`.
    Delete { id: String, seq: u64 },
    /// Everything up to `seq` is in the checkpoint image.
    Checkpoint { seq: u64 },
}

impl WalEntry {
    pub fn seq(&self) -> u64 {
        match self {
            WalEntry::Put { record } => record.version,
            WalEntry::Delete { seq, .. } | WalEntry::Checkpoint { seq } => *seq,
        }
    }
}

/// Write-Ahead Log file manager.
pub struct WriteAheadLog {
    path: PathBuf,
    file: File,
}

impl WriteAheadLog {
    /// Open (or create) a WAL file at the given path.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        Ok(Self { path, file })
    }

    /// Append an entry to the WAL and fsync.
    pub fn append(&mut self, entry: &WalEntry) -> Result<()> {
        let payload = serialization::to_bincode(entry)?;
        let crc = crc32fast::hash(&payload);
        let len = payload.len() as u32;

        let mut frame = Vec::with_capacity(FRAME_HEADER_LEN + payload.len());
        frame.extend_from_slice(&len.to_le_bytes());
        frame.extend_from_slice(&crc.to_le_bytes());
        frame.extend_from_slice(&payload);

        self.file.write_all(&frame)?;
        self.sync()
    }

    /// Fsync the WAL file.
    pub fn sync(&self) -> Result<()> {
        self.file.sync_all()?;
        Ok(())
    }

    /// Replay all valid entries from the WAL.
    /// Stops at the first corrupted or incomplete entry (crash tolerance).
    pub fn replay(&self) -> Result<Vec<WalEntry>> {
        Ok(self.scan_frames()?.0)
    }

    /// Replay, then cut off any torn or corrupt tail so later appends land
    /// directly after the last valid frame.
    pub fn recover(&mut self) -> Result<Vec<WalEntry>> {
        let (entries, valid_len) = self.scan_frames()?;
        let file_len = self.file.metadata()?.len();
        if valid_len < file_len {
            warn!(
                path = %self.path.display(),
                dropped_bytes = file_len - valid_len,
                "truncating invalid WAL tail"
            );
            self.file.set_len(valid_len)?;
            self.sync()?;
        }
        Ok(entries)
    }

    /// Decode frames until EOF or the first bad frame. Returns the entries
    /// and the byte length of the valid prefix.
    fn scan_frames(&self) -> Result<(Vec<WalEntry>, u64)> {
        let file = File::open(&self.path)?;
        let mut reader = BufReader::new(file);
        let mut entries = Vec::new();
        let mut valid_len = 0u64;

        loop {
            let mut header = [0u8; 8];
            match reader.read_exact(&mut header) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => break,
                Err(e) => return Err(EngineError::Io(e)),
            }
            let len = u32::from_le_bytes([header[0], header[1], header[2], header[3]]) as usize;
            let expected_crc = u32::from_le_bytes([header[4], header[5], header[6], header[7]]);
            if len > MAX_FRAME_LEN {
                warn!(path = %self.path.display(), len, "WAL frame length is implausible");
                break;
            }

            let mut payload = vec![0u8; len];
            if reader.read_exact(&mut payload).is_err() {
                warn!(path = %self.path.display(), entries = entries.len(), "WAL ends in a truncated frame");
                break;
            }

            if crc32fast::hash(&payload) != expected_crc {
                warn!(path = %self.path.display(), entries = entries.len(), "WAL frame failed CRC check");
                break;
            }

            match serialization::from_bincode::<WalEntry>(&payload) {
                Ok(entry) => entries.push(entry),
                Err(_) => break,
            }
            valid_len += (FRAME_HEADER_LEN + len) as u64;
        }

        Ok((entries, valid_len))
    }

    /// Truncate the WAL file (after a successful checkpoint).
    pub fn truncate(&mut self) -> Result<()> {
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&self.path)?;
        file.sync_all()?;
        self.file = OpenOptions::new().append(true).open(&self.path)?;
        Ok(())
    }
}
