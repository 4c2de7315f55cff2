//! Write-Ahead Log (WAL) for the record store.
//!
//! Each entry is written as: [length: u32][crc32: u32][payload: bincode(WalEntry)]
//! The WAL is append-only and fsynced after each write. One committed
//! transaction is one entry, so replay applies it whole or not at all.

use crate::error::{Result, VectorDbError};
use crate::persistence::serialization;
use crate::records::Statement;
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::{BufReader, Read, Write};
use std::path::{Path, PathBuf};
use tracing::warn;

/// `[length: u32][crc32: u32]`
const FRAME_HEADER_LEN: u64 = 8;

/// A single WAL entry.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub enum WalEntry {
    /// A transaction's statements, in execution order.
    Commit { statements: Vec<Statement> },
    Checkpoint,
}

/// Entries recovered from a WAL file.
#[derive(Debug, Default)]
pub struct WalReplay {
    pub entries: Vec<WalEntry>,
    /// Byte offset just past the last valid frame.
    pub valid_len: u64,
    /// Whether bytes follow the last valid frame.
    pub torn: bool,
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
        let len = u32::try_from(payload.len()).map_err(|_| {
            VectorDbError::StorageError(format!("WAL entry too large: {} bytes", payload.len()))
        })?;

        let mut frame = Vec::with_capacity(FRAME_HEADER_LEN as usize + payload.len());
        frame.extend_from_slice(&len.to_le_bytes());
        frame.extend_from_slice(&crc.to_le_bytes());
        frame.extend_from_slice(&payload);

        self.file.write_all(&frame)?;
        self.sync()?;

        Ok(())
    }

    /// Fsync the WAL file.
    pub fn sync(&self) -> Result<()> {
        self.file.sync_all()?;
        Ok(())
    }

    /// Replay all valid entries from the WAL.
    /// Stops at the first corrupted or incomplete entry (crash tolerance).
    pub fn replay(&self) -> Result<WalReplay> {
        let file = File::open(&self.path)?;
        let file_len = file.metadata()?.len();
        let mut reader = BufReader::new(file);
        let mut replay = WalReplay::default();

        loop {
            let mut len_buf = [0u8; 4];
            match reader.read_exact(&mut len_buf) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => break,
                Err(e) => return Err(VectorDbError::IoError(e)),
            }
            let len = u64::from(u32::from_le_bytes(len_buf));

            // A length running past the end of the file is a torn or corrupt header
            if replay.valid_len + FRAME_HEADER_LEN + len > file_len {
                warn!(entries = replay.entries.len(), "WAL ends in a truncated entry");
                break;
            }

            let mut crc_buf = [0u8; 4];
            reader.read_exact(&mut crc_buf)?;
            let expected_crc = u32::from_le_bytes(crc_buf);

            let mut payload = vec![0u8; len as usize];
            reader.read_exact(&mut payload)?;

            if crc32fast::hash(&payload) != expected_crc {
                warn!(entries = replay.entries.len(), "WAL checksum mismatch, ignoring tail");
                break;
            }

            match serialization::from_bincode::<WalEntry>(&payload) {
                Ok(entry) => replay.entries.push(entry),
                Err(e) => {
                    warn!(error = %e, "undecodable WAL entry, ignoring tail");
                    break;
                }
            }
            replay.valid_len += FRAME_HEADER_LEN + len;
        }

        replay.torn = replay.valid_len < file_len;
        Ok(replay)
    }

    /// Cut the file back to `len` bytes, dropping a torn tail so later
    /// appends follow the last valid frame.
    pub fn truncate_to(&mut self, len: u64) -> Result<()> {
        self.file.set_len(len)?;
        self.file.sync_all()?;
        Ok(())
    }

    /// Truncate the WAL file (after a successful checkpoint).
    pub fn truncate(&mut self) -> Result<()> {
        self.file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&self.path)?;
        self.file.sync_all()?;
        // Reopen in append mode for subsequent writes
        self.file = OpenOptions::new().append(true).open(&self.path)?;
        Ok(())
    }
}
