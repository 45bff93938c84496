//! Append-only commit log for the in-memory backend
//!
//! Every insert into an ordered collection is appended here before it is
//! acknowledged. Opening the log replays it and repairs it: anything after
//! the last intact frame (a write torn by a crash, or a corrupt frame) is cut
//! off so new appends land directly behind replayable data.
//! Pub/sub traffic is never logged.
//!
//! Frame layout:
//! - length: u32 LE
//! - data: [u8; length] (bincode-serialized `LogEntry`)
//! - crc: u32 LE, CRC32 of length + data

use crate::storage::error::{StorageError, StorageResult};
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

/// Upper bound on a single entry; anything larger is treated as corruption
const MAX_ENTRY_LEN: usize = 1_000_000;

/// Length prefix plus CRC trailer
const FRAME_OVERHEAD: u64 = 8;

/// Sync strategy for log writes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WalSyncMode {
    /// Fsync after every write (safest, slowest)
    EveryWrite,
    /// Fsync once enough bytes have accumulated; flushed to the OS on every write
    #[default]
    Batched,
    /// No fsync, rely on OS (fastest, risk of loss)
    None,
}

/// One logged insert: `member` added to the ordered collection `collection`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    pub collection: String,
    pub member: String,
}

/// What opening a log found on disk
#[derive(Debug, Default)]
pub struct Replay {
    /// Intact entries, in append order
    pub entries: Vec<LogEntry>,
    /// Bytes cut off behind the last intact frame
    pub truncated_bytes: u64,
}

/// Append-only, CRC-checked commit log
pub struct WriteAheadLog {
    writer: BufWriter<File>,
    path: PathBuf,
    entry_count: u64,
    /// Bytes written since last fsync
    bytes_since_sync: usize,
    sync_mode: WalSyncMode,
    /// Batch sync threshold (bytes)
    sync_threshold: usize,
}

impl WriteAheadLog {
    /// Open or create a log, replay it and repair its tail
    pub fn open(path: impl AsRef<Path>, sync_mode: WalSyncMode) -> StorageResult<(Self, Replay)> {
        let path = path.as_ref().to_path_buf();

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(&path)?;

        let (entries, intact_len) = Self::scan(&file)?;
        let file_len = file.metadata()?.len();

        let truncated_bytes = file_len.saturating_sub(intact_len);
        if truncated_bytes > 0 {
            tracing::warn!(
                path = %path.display(),
                intact_entries = entries.len(),
                truncated_bytes,
                "Truncating commit log behind last intact entry"
            );
            file.set_len(intact_len)?;
            file.sync_all()?;
        }

        let wal = Self {
            writer: BufWriter::new(file),
            path,
            entry_count: entries.len() as u64,
            bytes_since_sync: 0,
            sync_mode,
            sync_threshold: 64 * 1024,
        };

        Ok((
            wal,
            Replay {
                entries,
                truncated_bytes,
            },
        ))
    }

    /// Read frames until the end of the file or the first bad frame
    ///
    /// Returns the intact entries and the byte length they occupy.
    fn scan(file: &File) -> StorageResult<(Vec<LogEntry>, u64)> {
        let mut reader = BufReader::new(file);
        let mut entries = Vec::new();
        let mut offset = 0u64;

        loop {
            match Self::read_frame(&mut reader) {
                Ok(Some((entry, frame_len))) => {
                    entries.push(entry);
                    offset += frame_len;
                }
                Ok(None) => break,
                Err(StorageError::Io(e)) if e.kind() != std::io::ErrorKind::UnexpectedEof => {
                    return Err(StorageError::Io(e));
                }
                Err(e) => {
                    tracing::warn!(entry = entries.len(), offset, "Bad commit log frame: {}", e);
                    break;
                }
            }
        }

        Ok((entries, offset))
    }

    /// Append an entry to the log
    pub fn append(&mut self, entry: &LogEntry) -> StorageResult<()> {
        let data = bincode::serialize(entry)?;
        if data.len() > MAX_ENTRY_LEN {
            return Err(StorageError::WalError(format!(
                "Entry length too large: {}",
                data.len()
            )));
        }
        let len_buf = (data.len() as u32).to_le_bytes();

        let mut hasher = crc32fast::Hasher::new();
        hasher.update(&len_buf);
        hasher.update(&data);
        let crc = hasher.finalize();

        self.writer.write_all(&len_buf)?;
        self.writer.write_all(&data)?;
        self.writer.write_all(&crc.to_le_bytes())?;

        self.entry_count += 1;
        self.bytes_since_sync += FRAME_OVERHEAD as usize + data.len();

        self.maybe_sync()
    }

    fn maybe_sync(&mut self) -> StorageResult<()> {
        match self.sync_mode {
            WalSyncMode::EveryWrite => self.sync()?,
            WalSyncMode::Batched if self.bytes_since_sync >= self.sync_threshold => self.sync()?,
            WalSyncMode::Batched | WalSyncMode::None => self.writer.flush()?,
        }
        Ok(())
    }

    /// Force sync to disk
    pub fn sync(&mut self) -> StorageResult<()> {
        self.writer.flush()?;
        self.writer.get_ref().sync_all()?;
        self.bytes_since_sync = 0;
        Ok(())
    }

    /// One frame and its encoded length; `None` on a clean end of file
    fn read_frame<R: Read>(reader: &mut R) -> StorageResult<Option<(LogEntry, u64)>> {
        let mut len_buf = [0u8; 4];
        let mut filled = 0;
        while filled < len_buf.len() {
            match reader.read(&mut len_buf[filled..])? {
                0 if filled == 0 => return Ok(None),
                0 => {
                    return Err(StorageError::WalError(format!(
                        "Torn length prefix ({} of 4 bytes)",
                        filled
                    )))
                }
                n => filled += n,
            }
        }

        let len = u32::from_le_bytes(len_buf) as usize;
        if len > MAX_ENTRY_LEN {
            return Err(StorageError::WalError(format!(
                "Entry length too large: {}",
                len
            )));
        }

        let mut data = vec![0u8; len];
        reader.read_exact(&mut data)?;

        let mut crc_buf = [0u8; 4];
        reader.read_exact(&mut crc_buf)?;
        let stored_crc = u32::from_le_bytes(crc_buf);

        let mut hasher = crc32fast::Hasher::new();
        hasher.update(&len_buf);
        hasher.update(&data);
        let computed_crc = hasher.finalize();

        if stored_crc != computed_crc {
            return Err(StorageError::Corruption(format!(
                "CRC mismatch: stored={}, computed={}",
                stored_crc, computed_crc
            )));
        }

        let entry: LogEntry = bincode::deserialize(&data)?;
        Ok(Some((entry, FRAME_OVERHEAD + len as u64)))
    }

    /// Number of entries in the log, replayed plus appended
    pub fn entry_count(&self) -> u64 {
        self.entry_count
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}
