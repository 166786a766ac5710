//! WAL log record format.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use strata_common::{Lsn, PageId, Result, StrataError};

/// Types of log records.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum LogRecordType {
    /// Partial page modification.
    Update = 1,
    /// Checkpoint marker, not tied to a page.
    Checkpoint = 3,
}

impl TryFrom<u8> for LogRecordType {
    type Error = StrataError;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            1 => Ok(LogRecordType::Update),
            3 => Ok(LogRecordType::Checkpoint),
            _ => Err(StrataError::WalCorrupted {
                lsn: 0,
                reason: format!("invalid record type: {}", value),
            }),
        }
    }
}

/// A single log record.
///
/// Record format on disk:
/// - header (16 bytes):
///   - lsn: 8 bytes
///   - page_id: 4 bytes
///   - record_type: 1 byte
///   - flags: 1 byte
///   - payload_len: 2 bytes
/// - payload: variable length
/// - checksum: 4 bytes (CRC32 of header + payload)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogRecord {
    /// LSN of this record (its byte offset in the log).
    pub lsn: Lsn,
    /// Page the record describes, or `PageId::INVALID`.
    pub page_id: PageId,
    /// Type of this record.
    pub record_type: LogRecordType,
    /// Record flags.
    pub flags: u8,
    /// Record payload.
    pub payload: Bytes,
}

impl LogRecord {
    /// Size of the record header in bytes.
    pub const HEADER_SIZE: usize = 16;
    /// Size of the checksum in bytes.
    pub const CHECKSUM_SIZE: usize = 4;
    /// Maximum payload size; the length field is 16 bits.
    pub const MAX_PAYLOAD_SIZE: usize = u16::MAX as usize;

    /// Creates a new record. The LSN is assigned on append.
    pub fn new(page_id: PageId, record_type: LogRecordType, payload: Bytes) -> Self {
        Self {
            lsn: Lsn::INVALID,
            page_id,
            record_type,
            flags: 0,
            payload,
        }
    }

    /// Creates a checkpoint record.
    pub fn checkpoint() -> Self {
        Self::new(PageId::INVALID, LogRecordType::Checkpoint, Bytes::new())
    }

    /// Returns the total size of this record on disk.
    pub fn size_on_disk(&self) -> usize {
        Self::HEADER_SIZE + self.payload.len() + Self::CHECKSUM_SIZE
    }

    /// Serializes this record into `buf`.
    pub fn encode_into(&self, buf: &mut BytesMut) {
        let start = buf.len();
        buf.reserve(self.size_on_disk());

        buf.put_u64_le(self.lsn.0);
        buf.put_u32_le(self.page_id.0);
        buf.put_u8(self.record_type as u8);
        buf.put_u8(self.flags);
        buf.put_u16_le(self.payload.len() as u16);
        buf.put_slice(&self.payload);

        let checksum = crc32fast::hash(&buf[start..]);
        buf.put_u32_le(checksum);
    }

    /// Serializes this record to bytes.
    pub fn serialize(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(self.size_on_disk());
        self.encode_into(&mut buf);
        buf.freeze()
    }

    /// Deserializes a record from the front of `data`.
    pub fn deserialize(data: &[u8]) -> Result<Self> {
        if data.len() < Self::HEADER_SIZE + Self::CHECKSUM_SIZE {
            return Err(StrataError::WalCorrupted {
                lsn: 0,
                reason: "record too short".to_string(),
            });
        }

        let mut cursor = data;
        let lsn = Lsn(cursor.get_u64_le());
        let page_id = PageId(cursor.get_u32_le());
        let record_type = LogRecordType::try_from(cursor.get_u8())?;
        let flags = cursor.get_u8();
        let payload_len = cursor.get_u16_le() as usize;

        if cursor.len() < payload_len + Self::CHECKSUM_SIZE {
            return Err(StrataError::WalCorrupted {
                lsn: lsn.0,
                reason: "truncated record".to_string(),
            });
        }

        let payload = Bytes::copy_from_slice(&cursor[..payload_len]);
        cursor.advance(payload_len);

        let stored_checksum = cursor.get_u32_le();
        let computed_checksum = crc32fast::hash(&data[..Self::HEADER_SIZE + payload_len]);
        if stored_checksum != computed_checksum {
            return Err(StrataError::WalCorrupted {
                lsn: lsn.0,
                reason: format!(
                    "checksum mismatch: stored={}, computed={}",
                    stored_checksum, computed_checksum
                ),
            });
        }

        Ok(Self {
            lsn,
            page_id,
            record_type,
            flags,
            payload,
        })
    }
}
