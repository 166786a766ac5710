//! The log contract the buffer pool depends on.

use strata_common::{Lsn, Result};

/// Durability view of the write-ahead log.
///
/// Before a dirty page is written back, the buffer pool makes sure the log
/// is durable up to the page's LSN.
pub trait LogService: Send + Sync {
    /// LSN of the last record known to be durable.
    fn flushed_lsn(&self) -> Lsn;

    /// Blocks until every record up to and including `lsn` is durable.
    fn flush_to(&self, lsn: Lsn) -> Result<()>;
}

/// Log service for pools running without a write-ahead log.
///
/// Reports everything as durable, so write-back never waits on it.
#[derive(Debug, Default, Clone, Copy)]
pub struct DisabledLog;

impl LogService for DisabledLog {
    fn flushed_lsn(&self) -> Lsn {
        Lsn(u64::MAX)
    }

    fn flush_to(&self, _lsn: Lsn) -> Result<()> {
        Ok(())
    }
}
