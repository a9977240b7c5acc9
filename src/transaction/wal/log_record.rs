use byteorder::{ByteOrder, LittleEndian};
use serde::{Serialize, Deserialize};
use thiserror::Error;

use crate::common::types::{Lsn, PageId, Rid, TxnId, INVALID_LSN};
use crate::storage::page::Tuple;

/// Error type for log record operations
#[derive(Error, Debug)]
pub enum LogRecordError {
    #[error("Failed to serialize log record: {0}")]
    SerializationError(String),
}

/// Result type for log record operations
pub type Result<T> = std::result::Result<T, LogRecordError>;

/// Fixed header written ahead of every record:
/// | size (4) | lsn (8) | txn_id (4) | prev_lsn (8) | type (4) |
pub const LOG_RECORD_HEADER_SIZE: usize = 28;

/// Types of log records supported by the WAL system
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogRecordType {
    /// Marks the beginning of a transaction
    Begin,
    /// Marks the successful completion of a transaction
    Commit,
    /// Marks the abortion/rollback of a transaction
    Abort,
    /// A tuple was inserted at a RID
    Insert,
    /// A tuple was marked delete-pending
    MarkDelete,
    /// A delete-pending tuple was physically removed
    ApplyDelete,
    /// A pending delete mark was rolled back
    RollbackDelete,
    /// A tuple was replaced in place
    Update,
    /// A new table page was allocated and linked after `prev_page_id`
    NewPage,
}

impl LogRecordType {
    fn to_wire(self) -> u32 {
        match self {
            LogRecordType::Begin => 1,
            LogRecordType::Commit => 2,
            LogRecordType::Abort => 3,
            LogRecordType::Insert => 4,
            LogRecordType::MarkDelete => 5,
            LogRecordType::ApplyDelete => 6,
            LogRecordType::RollbackDelete => 7,
            LogRecordType::Update => 8,
            LogRecordType::NewPage => 9,
        }
    }

    fn from_wire(value: u32) -> Option<Self> {
        match value {
            1 => Some(LogRecordType::Begin),
            2 => Some(LogRecordType::Commit),
            3 => Some(LogRecordType::Abort),
            4 => Some(LogRecordType::Insert),
            5 => Some(LogRecordType::MarkDelete),
            6 => Some(LogRecordType::ApplyDelete),
            7 => Some(LogRecordType::RollbackDelete),
            8 => Some(LogRecordType::Update),
            9 => Some(LogRecordType::NewPage),
            _ => None,
        }
    }
}

/// Type-specific content of a log record.
///
/// The record type in the header selects the variant, so payloads are
/// encoded without their own tag. Insert and the delete family share the
/// `Tuple` shape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum LogPayload {
    None,
    Tuple { rid: Rid, tuple: Tuple },
    Update { rid: Rid, old_tuple: Tuple, new_tuple: Tuple },
    NewPage { prev_page_id: PageId },
}

/// Main log record structure
#[derive(Debug, Clone, PartialEq)]
pub struct LogRecord {
    /// Log Sequence Number, assigned by the log manager at append time
    pub lsn: Lsn,
    /// Transaction that generated this record
    pub txn_id: TxnId,
    /// LSN of this transaction's previous record
    pub prev_lsn: Lsn,
    /// Type of operation this record represents
    pub record_type: LogRecordType,
    /// Content of the record, shaped by the record type
    pub payload: LogPayload,
}

impl LogRecord {
    pub fn new(
        txn_id: TxnId,
        prev_lsn: Lsn,
        record_type: LogRecordType,
        payload: LogPayload,
    ) -> Self {
        Self {
            lsn: INVALID_LSN,
            txn_id,
            prev_lsn,
            record_type,
            payload,
        }
    }

    pub fn new_begin(txn_id: TxnId) -> Self {
        Self::new(txn_id, INVALID_LSN, LogRecordType::Begin, LogPayload::None)
    }

    pub fn new_commit(txn_id: TxnId, prev_lsn: Lsn) -> Self {
        Self::new(txn_id, prev_lsn, LogRecordType::Commit, LogPayload::None)
    }

    pub fn new_abort(txn_id: TxnId, prev_lsn: Lsn) -> Self {
        Self::new(txn_id, prev_lsn, LogRecordType::Abort, LogPayload::None)
    }

    pub fn new_insert(txn_id: TxnId, prev_lsn: Lsn, rid: Rid, tuple: Tuple) -> Self {
        Self::new(txn_id, prev_lsn, LogRecordType::Insert, LogPayload::Tuple { rid, tuple })
    }

    pub fn new_mark_delete(txn_id: TxnId, prev_lsn: Lsn, rid: Rid, tuple: Tuple) -> Self {
        Self::new(txn_id, prev_lsn, LogRecordType::MarkDelete, LogPayload::Tuple { rid, tuple })
    }

    pub fn new_apply_delete(txn_id: TxnId, prev_lsn: Lsn, rid: Rid, tuple: Tuple) -> Self {
        Self::new(txn_id, prev_lsn, LogRecordType::ApplyDelete, LogPayload::Tuple { rid, tuple })
    }

    pub fn new_rollback_delete(txn_id: TxnId, prev_lsn: Lsn, rid: Rid, tuple: Tuple) -> Self {
        Self::new(txn_id, prev_lsn, LogRecordType::RollbackDelete, LogPayload::Tuple { rid, tuple })
    }

    pub fn new_update(
        txn_id: TxnId,
        prev_lsn: Lsn,
        rid: Rid,
        old_tuple: Tuple,
        new_tuple: Tuple,
    ) -> Self {
        Self::new(
            txn_id,
            prev_lsn,
            LogRecordType::Update,
            LogPayload::Update { rid, old_tuple, new_tuple },
        )
    }

    pub fn new_new_page(txn_id: TxnId, prev_lsn: Lsn, prev_page_id: PageId) -> Self {
        Self::new(
            txn_id,
            prev_lsn,
            LogRecordType::NewPage,
            LogPayload::NewPage { prev_page_id },
        )
    }

    /// Serialize the record: fixed header followed by the payload
    pub fn serialize(&self) -> Result<Vec<u8>> {
        let payload = match &self.payload {
            LogPayload::None => Vec::new(),
            LogPayload::Tuple { rid, tuple } => bincode::serialize(&(rid, tuple))
                .map_err(|e| LogRecordError::SerializationError(e.to_string()))?,
            LogPayload::Update { rid, old_tuple, new_tuple } => {
                bincode::serialize(&(rid, old_tuple, new_tuple))
                    .map_err(|e| LogRecordError::SerializationError(e.to_string()))?
            }
            LogPayload::NewPage { prev_page_id } => bincode::serialize(prev_page_id)
                .map_err(|e| LogRecordError::SerializationError(e.to_string()))?,
        };

        let size = LOG_RECORD_HEADER_SIZE + payload.len();
        let mut buf = vec![0u8; size];
        LittleEndian::write_u32(&mut buf[0..4], size as u32);
        LittleEndian::write_u64(&mut buf[4..12], self.lsn);
        LittleEndian::write_u32(&mut buf[12..16], self.txn_id);
        LittleEndian::write_u64(&mut buf[16..24], self.prev_lsn);
        LittleEndian::write_u32(&mut buf[24..28], self.record_type.to_wire());
        buf[LOG_RECORD_HEADER_SIZE..].copy_from_slice(&payload);

        Ok(buf)
    }

    /// Deserialize a record from the front of `buf`.
    ///
    /// Returns the record and its total encoded size. None means no complete
    /// record starts here: a zero or undersized length field, a length
    /// extending past the buffer, or a corrupt payload. Recovery treats that
    /// as the end of the current chunk.
    pub fn deserialize(buf: &[u8]) -> Option<(Self, usize)> {
        if buf.len() < LOG_RECORD_HEADER_SIZE {
            return None;
        }

        let size = LittleEndian::read_u32(&buf[0..4]) as usize;
        if size < LOG_RECORD_HEADER_SIZE || size > buf.len() {
            return None;
        }

        let lsn = LittleEndian::read_u64(&buf[4..12]);
        let txn_id = LittleEndian::read_u32(&buf[12..16]);
        let prev_lsn = LittleEndian::read_u64(&buf[16..24]);
        let record_type = LogRecordType::from_wire(LittleEndian::read_u32(&buf[24..28]))?;

        let payload_bytes = &buf[LOG_RECORD_HEADER_SIZE..size];
        let payload = match record_type {
            LogRecordType::Begin | LogRecordType::Commit | LogRecordType::Abort => {
                LogPayload::None
            }
            LogRecordType::Insert
            | LogRecordType::MarkDelete
            | LogRecordType::ApplyDelete
            | LogRecordType::RollbackDelete => {
                let (rid, tuple): (Rid, Tuple) = bincode::deserialize(payload_bytes).ok()?;
                LogPayload::Tuple { rid, tuple }
            }
            LogRecordType::Update => {
                let (rid, old_tuple, new_tuple): (Rid, Tuple, Tuple) =
                    bincode::deserialize(payload_bytes).ok()?;
                LogPayload::Update { rid, old_tuple, new_tuple }
            }
            LogRecordType::NewPage => {
                let prev_page_id: PageId = bincode::deserialize(payload_bytes).ok()?;
                LogPayload::NewPage { prev_page_id }
            }
        };

        Some((
            Self { lsn, txn_id, prev_lsn, record_type, payload },
            size,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tuple(bytes: &[u8]) -> Tuple {
        Tuple::new(bytes.to_vec())
    }

    #[test]
    fn test_begin_record_round_trip() {
        let mut record = LogRecord::new_begin(2);
        record.lsn = 1;
        let bytes = record.serialize().unwrap();
        let (back, size) = LogRecord::deserialize(&bytes).unwrap();

        assert_eq!(size, bytes.len());
        assert_eq!(back, record);
        assert_eq!(size, LOG_RECORD_HEADER_SIZE);
    }

    #[test]
    fn test_insert_record_round_trip() {
        let mut record = LogRecord::new_insert(7, 3, Rid::new(5, 0), tuple(b"payload"));
        record.lsn = 4;
        let bytes = record.serialize().unwrap();
        let (back, _) = LogRecord::deserialize(&bytes).unwrap();
        assert_eq!(back, record);
    }

    #[test]
    fn test_update_record_round_trip() {
        let mut record =
            LogRecord::new_update(7, 3, Rid::new(5, 1), tuple(b"old"), tuple(b"new"));
        record.lsn = 9;
        let bytes = record.serialize().unwrap();
        let (back, _) = LogRecord::deserialize(&bytes).unwrap();
        assert_eq!(back, record);

        match back.payload {
            LogPayload::Update { rid, old_tuple, new_tuple } => {
                assert_eq!(rid, Rid::new(5, 1));
                assert_eq!(old_tuple.data, b"old");
                assert_eq!(new_tuple.data, b"new");
            }
            _ => panic!("unexpected payload"),
        }
    }

    #[test]
    fn test_new_page_record_round_trip() {
        let mut record = LogRecord::new_new_page(1, 2, 11);
        record.lsn = 3;
        let bytes = record.serialize().unwrap();
        let (back, _) = LogRecord::deserialize(&bytes).unwrap();
        assert_eq!(back, record);
    }

    #[test]
    fn test_deserialize_rejects_truncation() {
        let mut record = LogRecord::new_insert(7, 3, Rid::new(5, 0), tuple(b"payload"));
        record.lsn = 4;
        let bytes = record.serialize().unwrap();

        // Header cut short
        assert!(LogRecord::deserialize(&bytes[..10]).is_none());
        // Size field extends past the available bytes
        assert!(LogRecord::deserialize(&bytes[..bytes.len() - 1]).is_none());
        // Zero-filled buffer parses as nothing
        assert!(LogRecord::deserialize(&[0u8; 64]).is_none());
    }

    #[test]
    fn test_records_parse_sequentially() {
        let mut first = LogRecord::new_begin(1);
        first.lsn = 1;
        let mut second = LogRecord::new_commit(1, 1);
        second.lsn = 2;

        let mut buf = first.serialize().unwrap();
        buf.extend(second.serialize().unwrap());

        let (a, consumed) = LogRecord::deserialize(&buf).unwrap();
        let (b, _) = LogRecord::deserialize(&buf[consumed..]).unwrap();
        assert_eq!(a.record_type, LogRecordType::Begin);
        assert_eq!(b.record_type, LogRecordType::Commit);
    }
}
