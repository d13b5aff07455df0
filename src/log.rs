//! Append-only mutation log.
//!
//! Every document write lands here before it is applied in memory. Entries
//! are length-prefixed MessagePack frames followed by a CRC32 of the frame.
//! Opening the log replays every intact entry; a torn tail left behind by a
//! crash is cut off so later appends stay readable.

use crate::error::{MenuError, Result};
use crate::types::{DocumentPath, Fields, Sequence, Timestamp};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fs::{self, File, OpenOptions};
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

/// Magic bytes for the log file.
const LOG_MAGIC: &[u8; 4] = b"MNU\0";

/// Current log format version.
const LOG_VERSION: u8 = 1;

/// Magic + version.
const HEADER_LEN: u64 = 5;

/// Upper bound on a single frame. Inlined images keep documents well under this.
const MAX_FRAME_BYTES: usize = 64 * 1024 * 1024;

/// A recorded document mutation.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum Mutation {
    /// Create or replace a document. Fields are JSON-encoded.
    Set { path: DocumentPath, fields: Vec<u8> },
    /// Remove a document.
    Delete { path: DocumentPath },
}

impl Mutation {
    pub fn set(path: &DocumentPath, fields: &Fields) -> Result<Self> {
        Ok(Mutation::Set {
            path: path.clone(),
            fields: serde_json::to_vec(fields)?,
        })
    }

    pub fn delete(path: &DocumentPath) -> Self {
        Mutation::Delete { path: path.clone() }
    }

    pub fn path(&self) -> &DocumentPath {
        match self {
            Mutation::Set { path, .. } | Mutation::Delete { path } => path,
        }
    }

    /// Decode the JSON field payload of a `Set`.
    pub fn decode_fields(bytes: &[u8]) -> Result<Fields> {
        serde_json::from_slice(bytes).map_err(|e| MenuError::Deserialization(e.to_string()))
    }
}

/// A single log entry.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LogEntry {
    pub sequence: Sequence,
    pub timestamp: Timestamp,
    pub mutation: Mutation,
}

struct LogWriter {
    file: BufWriter<File>,
    /// Length of the file up to the last complete frame.
    size: u64,
    writes_since_sync: u64,
    /// A failed append could not be undone; refuse further appends.
    poisoned: bool,
}

impl LogWriter {
    fn new(file: File, size: u64) -> Self {
        Self {
            file: BufWriter::new(file),
            size,
            writes_since_sync: 0,
            poisoned: false,
        }
    }
}

/// Durable, append-only log of document mutations.
pub struct MutationLog {
    path: PathBuf,
    writer: Mutex<LogWriter>,
    /// fsync after this many appends (1 = every append).
    sync_every: u64,
}

impl MutationLog {
    /// Open or create a log, returning it with every intact entry in order.
    pub fn open(path: impl AsRef<Path>, sync_every: u64) -> Result<(Self, Vec<LogEntry>)> {
        let path = path.as_ref().to_path_buf();

        let (entries, size) = if path.exists() {
            Self::replay(&path)?
        } else {
            let mut file = OpenOptions::new()
                .write(true)
                .create(true)
                .truncate(true)
                .open(&path)?;
            Self::write_header(&mut file)?;
            file.sync_all()?;
            (Vec::new(), HEADER_LEN)
        };

        let file = OpenOptions::new().append(true).open(&path)?;

        let log = Self {
            path,
            writer: Mutex::new(LogWriter::new(file, size)),
            sync_every: sync_every.max(1),
        };

        Ok((log, entries))
    }

    /// Create an empty log, discarding any file already at `path`.
    pub fn create(path: impl AsRef<Path>, sync_every: u64) -> Result<Self> {
        let path = path.as_ref();
        let mut file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)?;
        Self::write_header(&mut file)?;
        file.sync_all()?;
        drop(file);

        let (log, _) = Self::open(path, sync_every)?;
        Ok(log)
    }

    /// Append an entry.
    ///
    /// A failed append leaves the file as it was before the call, so later
    /// appends are not hidden behind a torn frame on replay.
    pub fn append(&self, entry: &LogEntry) -> Result<()> {
        self.append_with(entry, |file, frame| {
            file.write_all(frame)?;
            file.flush()
        })
    }

    fn append_with<F>(&self, entry: &LogEntry, write: F) -> Result<()>
    where
        F: FnOnce(&mut BufWriter<File>, &[u8]) -> std::io::Result<()>,
    {
        let frame = Self::encode_frame(entry)?;

        let mut writer = self.writer.lock();
        if writer.poisoned {
            return Err(MenuError::Corruption(
                "mutation log is unusable after a failed append".into(),
            ));
        }

        if let Err(e) = write(&mut writer.file, &frame) {
            if let Err(rollback) = self.roll_back(&mut writer) {
                tracing::error!(
                    path = %self.path.display(),
                    error = %rollback,
                    "could not undo failed append; log is now read-only"
                );
                writer.poisoned = true;
            }
            return Err(e.into());
        }

        writer.size += frame.len() as u64;
        writer.writes_since_sync += 1;

        if writer.writes_since_sync >= self.sync_every {
            writer.file.get_ref().sync_all()?;
            writer.writes_since_sync = 0;
        }

        Ok(())
    }

    /// Flush and fsync.
    pub fn sync(&self) -> Result<()> {
        let mut writer = self.writer.lock();
        writer.file.flush()?;
        writer.file.get_ref().sync_all()?;
        writer.writes_since_sync = 0;
        Ok(())
    }

    /// Current size of the log file in bytes.
    pub fn size(&self) -> u64 {
        self.writer.lock().size
    }

    /// Replace the whole log with `entries`.
    ///
    /// The new log is written beside the old one and renamed over it, so a
    /// crash mid-rewrite leaves the previous log intact.
    pub fn rewrite(&self, entries: &[LogEntry]) -> Result<()> {
        let mut writer = self.writer.lock();
        writer.file.flush()?;

        let tmp_path = self.path.with_extension("compact");
        let mut size = HEADER_LEN;
        {
            let tmp = OpenOptions::new()
                .write(true)
                .create(true)
                .truncate(true)
                .open(&tmp_path)?;
            let mut tmp = BufWriter::new(tmp);
            Self::write_header(&mut tmp)?;
            for entry in entries {
                size += Self::write_frame(&mut tmp, entry)?;
            }
            tmp.flush()?;
            tmp.get_ref().sync_all()?;
        }

        fs::rename(&tmp_path, &self.path)?;

        let file = OpenOptions::new().append(true).open(&self.path)?;
        *writer = LogWriter::new(file, size);

        Ok(())
    }

    /// Cut the file back to the last complete frame and drop anything still
    /// buffered from the failed write.
    fn roll_back(&self, writer: &mut LogWriter) -> Result<()> {
        let fresh = OpenOptions::new().append(true).open(&self.path)?;
        let failed = std::mem::replace(&mut writer.file, BufWriter::new(fresh));
        // `into_parts` hands back the buffer instead of flushing it on drop.
        let _ = failed.into_parts();

        let file = OpenOptions::new().write(true).open(&self.path)?;
        file.set_len(writer.size)?;
        file.sync_all()?;

        tracing::warn!(
            path = %self.path.display(),
            size = writer.size,
            "rolled back failed log append"
        );
        Ok(())
    }

    fn replay(path: &Path) -> Result<(Vec<LogEntry>, u64)> {
        let file = File::open(path)?;
        let file_len = file.metadata()?.len();
        let mut reader = BufReader::new(file);

        let mut magic = [0u8; 4];
        reader.read_exact(&mut magic)?;
        if &magic != LOG_MAGIC {
            return Err(MenuError::InvalidFormat("Invalid log magic".into()));
        }

        let mut version = [0u8; 1];
        reader.read_exact(&mut version)?;
        if version[0] != LOG_VERSION {
            return Err(MenuError::InvalidFormat(format!(
                "Unsupported log version: {}",
                version[0]
            )));
        }

        let mut entries = Vec::new();
        let mut valid_len = HEADER_LEN;
        let mut tail_error = None;

        while valid_len < file_len {
            match Self::read_frame(&mut reader) {
                Ok((entry, frame_len)) => {
                    entries.push(entry);
                    valid_len += frame_len;
                }
                Err(e) => {
                    tail_error = Some(e);
                    break;
                }
            }
        }

        if let Some(e) = tail_error {
            tracing::warn!(
                path = %path.display(),
                valid_len,
                file_len,
                error = %e,
                "truncating corrupt mutation log tail"
            );
            let file = OpenOptions::new().write(true).open(path)?;
            file.set_len(valid_len)?;
            file.sync_all()?;
        }

        tracing::debug!(path = %path.display(), entries = entries.len(), "replayed mutation log");

        Ok((entries, valid_len))
    }

    fn write_header(writer: &mut impl Write) -> Result<()> {
        writer.write_all(LOG_MAGIC)?;
        writer.write_all(&[LOG_VERSION])?;
        Ok(())
    }

    /// Returns the number of bytes written.
    fn write_frame(writer: &mut impl Write, entry: &LogEntry) -> Result<u64> {
        let frame = Self::encode_frame(entry)?;
        writer.write_all(&frame)?;
        Ok(frame.len() as u64)
    }

    /// Length prefix, MessagePack body, CRC32 of the body.
    fn encode_frame(entry: &LogEntry) -> Result<Vec<u8>> {
        let encoded = rmp_serde::to_vec(entry)?;
        if encoded.len() > MAX_FRAME_BYTES {
            return Err(MenuError::Serialization("log frame too large".into()));
        }

        let mut frame = Vec::with_capacity(encoded.len() + 8);
        frame.extend_from_slice(&(encoded.len() as u32).to_le_bytes());
        frame.extend_from_slice(&encoded);
        frame.extend_from_slice(&crc32fast::hash(&encoded).to_le_bytes());
        Ok(frame)
    }

    /// Returns the entry and the number of bytes consumed.
    fn read_frame(reader: &mut impl Read) -> Result<(LogEntry, u64)> {
        let mut len_bytes = [0u8; 4];
        reader.read_exact(&mut len_bytes)?;
        let len = u32::from_le_bytes(len_bytes) as usize;

        if len > MAX_FRAME_BYTES {
            return Err(MenuError::Corruption("log frame too large".into()));
        }

        let mut encoded = vec![0u8; len];
        reader.read_exact(&mut encoded)?;

        let mut checksum_bytes = [0u8; 4];
        reader.read_exact(&mut checksum_bytes)?;
        let stored = u32::from_le_bytes(checksum_bytes);
        let computed = crc32fast::hash(&encoded);
        if stored != computed {
            return Err(MenuError::ChecksumMismatch {
                expected: stored,
                got: computed,
            });
        }

        let entry = rmp_serde::from_slice(&encoded)?;
        Ok((entry, 4 + len as u64 + 4))
    }
}
