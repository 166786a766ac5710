//! Write-Ahead Log (WAL) for Strata.
//!
//! Records are buffered in memory and made durable on flush. The buffer
//! pool consults the log before writing a dirty page back so that no page
//! reaches disk ahead of the records describing it.

pub mod manager;
pub mod record;
pub mod service;

pub use manager::{LogManager, LogManagerConfig};
pub use record::{LogRecord, LogRecordType};
pub use service::{DisabledLog, LogService};
