//! Single-file log manager.

use crate::record::{LogRecord, LogRecordType};
use crate::service::LogService;
use bytes::{Bytes, BytesMut};
use parking_lot::Mutex;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use strata_common::{Lsn, PageId, Result, StrataError};
use tracing::{debug, warn};

/// Configuration for the log manager.
#[derive(Debug, Clone)]
pub struct LogManagerConfig {
    /// Directory for the log file.
    pub wal_dir: PathBuf,
    /// Enable fsync on flush.
    pub fsync_enabled: bool,
}

impl Default for LogManagerConfig {
    fn default() -> Self {
        Self {
            wal_dir: PathBuf::from("./data/wal"),
            fsync_enabled: true,
        }
    }
}

impl From<&strata_common::StorageConfig> for LogManagerConfig {
    fn from(config: &strata_common::StorageConfig) -> Self {
        Self {
            wal_dir: config.wal_dir.clone(),
            fsync_enabled: config.fsync_enabled,
        }
    }
}

/// Appends records to a log file and tracks how far it is durable.
///
/// Appends are buffered in memory; `flush` writes and syncs them. The LSN of
/// a record is its byte offset in the file, so LSNs grow monotonically and
/// the first one is `FILE_HEADER_SIZE`.
pub struct LogManager {
    /// Configuration.
    config: LogManagerConfig,
    /// File handle and unflushed tail.
    inner: Mutex<LogFile>,
    /// LSN of the last durable record.
    flushed_lsn: AtomicU64,
}

struct LogFile {
    file: File,
    /// Serialized records not yet written.
    pending: BytesMut,
    /// LSN the next record will get.
    next_lsn: Lsn,
    /// LSN of the last appended record.
    last_lsn: Lsn,
    /// A failed write could not be rolled back; the file may end mid-record.
    poisoned: bool,
}

impl LogFile {
    fn check_usable(&self) -> Result<()> {
        if self.poisoned {
            return Err(StrataError::WalWriteFailed(
                "log poisoned by an unrecovered write failure".to_string(),
            ));
        }
        Ok(())
    }
}

impl LogManager {
    /// Name of the log file inside the WAL directory.
    pub const FILE_NAME: &'static str = "strata.wal";
    /// Magic bytes at the start of the log file.
    pub const MAGIC: [u8; 4] = *b"SWAL";
    /// Current format version.
    pub const VERSION: u32 = 1;
    /// Size of the file header (magic + version).
    pub const FILE_HEADER_SIZE: u64 = 8;

    /// Opens the log, creating it if missing.
    ///
    /// Existing records are scanned to find the append position; a torn or
    /// corrupt tail is cut off.
    pub fn open(config: LogManagerConfig) -> Result<Self> {
        std::fs::create_dir_all(&config.wal_dir)?;
        let path = config.wal_dir.join(Self::FILE_NAME);

        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)?;

        let (next_lsn, last_lsn) = if file.metadata()?.len() == 0 {
            file.write_all(&Self::MAGIC)?;
            file.write_all(&Self::VERSION.to_le_bytes())?;
            file.sync_all()?;
            (Lsn(Self::FILE_HEADER_SIZE), Lsn::INVALID)
        } else {
            Self::recover(&mut file)?
        };

        debug!(path = %path.display(), %next_lsn, "opened log");

        Ok(Self {
            config,
            inner: Mutex::new(LogFile {
                file,
                pending: BytesMut::new(),
                next_lsn,
                last_lsn,
                poisoned: false,
            }),
            flushed_lsn: AtomicU64::new(last_lsn.0),
        })
    }

    /// Scans existing records and truncates anything after the last valid one.
    fn recover(file: &mut File) -> Result<(Lsn, Lsn)> {
        let mut contents = Vec::new();
        file.seek(SeekFrom::Start(0))?;
        file.read_to_end(&mut contents)?;

        Self::check_header(&contents)?;

        let records = Self::parse_records(&contents);
        let (next_lsn, last_lsn) = match records.last() {
            Some(last) => (last.lsn.advance(last.size_on_disk() as u64), last.lsn),
            None => (Lsn(Self::FILE_HEADER_SIZE), Lsn::INVALID),
        };

        if next_lsn.0 < contents.len() as u64 {
            warn!(
                valid_end = next_lsn.0,
                file_len = contents.len(),
                "truncating torn log tail"
            );
            file.set_len(next_lsn.0)?;
            file.sync_all()?;
        }

        Ok((next_lsn, last_lsn))
    }

    fn check_header(contents: &[u8]) -> Result<()> {
        if contents.len() < Self::FILE_HEADER_SIZE as usize || contents[0..4] != Self::MAGIC {
            return Err(StrataError::WalCorrupted {
                lsn: 0,
                reason: "invalid magic bytes".to_string(),
            });
        }
        let version = u32::from_le_bytes([contents[4], contents[5], contents[6], contents[7]]);
        if version != Self::VERSION {
            return Err(StrataError::WalCorrupted {
                lsn: 0,
                reason: format!("unsupported version: {}", version),
            });
        }
        Ok(())
    }

    /// Decodes records from a full file image, stopping at the first bad one.
    fn parse_records(contents: &[u8]) -> Vec<LogRecord> {
        let mut records = Vec::new();
        let mut offset = Self::FILE_HEADER_SIZE as usize;

        while offset < contents.len() {
            match LogRecord::deserialize(&contents[offset..]) {
                Ok(record) if record.lsn.0 == offset as u64 => {
                    offset += record.size_on_disk();
                    records.push(record);
                }
                _ => break,
            }
        }
        records
    }

    /// Returns the directory containing the log.
    pub fn wal_dir(&self) -> &Path {
        &self.config.wal_dir
    }

    /// Returns the LSN the next appended record will get.
    pub fn next_lsn(&self) -> Lsn {
        self.inner.lock().next_lsn
    }

    /// Returns the LSN of the last appended record, durable or not.
    pub fn last_lsn(&self) -> Lsn {
        self.inner.lock().last_lsn
    }

    /// Appends a record to the in-memory tail and returns its LSN.
    ///
    /// The record is not durable until `flush` or `flush_to` covers it.
    pub fn append(&self, mut record: LogRecord) -> Result<Lsn> {
        if record.payload.len() > LogRecord::MAX_PAYLOAD_SIZE {
            return Err(StrataError::WalWriteFailed(format!(
                "payload too large: {} bytes",
                record.payload.len()
            )));
        }

        let mut inner = self.inner.lock();
        inner.check_usable()?;
        let lsn = inner.next_lsn;
        record.lsn = lsn;
        record.encode_into(&mut inner.pending);

        inner.next_lsn = lsn.advance(record.size_on_disk() as u64);
        inner.last_lsn = lsn;
        Ok(lsn)
    }

    /// Logs a modification of `page_id`.
    pub fn log_update(&self, page_id: PageId, payload: Bytes) -> Result<Lsn> {
        self.append(LogRecord::new(page_id, LogRecordType::Update, payload))
    }

    /// Writes all pending records to the file and syncs it.
    pub fn flush(&self) -> Result<Lsn> {
        let mut guard = self.inner.lock();
        let inner = &mut *guard;
        inner.check_usable()?;

        let last = inner.last_lsn;
        if last <= self.flushed_lsn() {
            return Ok(self.flushed_lsn());
        }

        let written = inner.pending.len();
        if written > 0 {
            let start = inner.file.seek(SeekFrom::End(0))?;
            if let Err(e) = inner.file.write_all(&inner.pending) {
                warn!(error = %e, "log write failed");
                // Next attempt must start at a record boundary
                if let Err(rollback) = inner.file.set_len(start) {
                    warn!(error = %rollback, offset = start, "log rollback failed");
                    inner.poisoned = true;
                }
                return Err(StrataError::WalWriteFailed(e.to_string()));
            }
            inner.pending.clear();
        }
        if self.config.fsync_enabled {
            inner.file.sync_data()?;
        }

        self.flushed_lsn.store(last.0, Ordering::Release);
        debug!(flushed_lsn = %last, bytes = written, "flushed log");
        Ok(last)
    }

    /// Reads every durable record from the log file.
    pub fn read_durable(&self) -> Result<Vec<LogRecord>> {
        let mut inner = self.inner.lock();
        let mut contents = Vec::new();
        inner.file.seek(SeekFrom::Start(0))?;
        inner.file.read_to_end(&mut contents)?;

        Self::check_header(&contents)?;
        Ok(Self::parse_records(&contents))
    }
}

impl LogService for LogManager {
    fn flushed_lsn(&self) -> Lsn {
        Lsn(self.flushed_lsn.load(Ordering::Acquire))
    }

    fn flush_to(&self, lsn: Lsn) -> Result<()> {
        if lsn <= self.flushed_lsn() {
            return Ok(());
        }
        let flushed = self.flush()?;
        if flushed < lsn {
            return Err(StrataError::WalWriteFailed(format!(
                "{} was never appended (last record {})",
                lsn, flushed
            )));
        }
        Ok(())
    }
}

impl Drop for LogManager {
    fn drop(&mut self) {
        if let Err(e) = self.flush() {
            warn!(error = %e, "failed to flush log on close");
        }
    }
}
