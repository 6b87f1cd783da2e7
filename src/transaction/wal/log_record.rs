use byteorder::{ByteOrder, LittleEndian};
use thiserror::Error;

use crate::common::types::{Lsn, PageId, Rid, TxnId, INVALID_LSN};

/// Fixed header preceding every log record:
/// `[size:4][lsn:4][txn_id:4][prev_lsn:4][type:4]`
pub const LOG_HEADER_SIZE: usize = 20;

/// Error type for log record serialization
#[derive(Error, Debug)]
pub enum LogRecordError {
    /// The buffered window ends inside the record; reload and retry
    #[error("Incomplete log record")]
    Incomplete,

    /// The bytes cannot be a record; unrecoverable
    #[error("Corrupt log record: {0}")]
    Corrupt(String),
}

/// Result type for log record operations
pub type Result<T> = std::result::Result<T, LogRecordError>;

/// Types of log records supported by the WAL system
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogRecordType {
    /// Marks the beginning of a transaction
    Begin = 1,
    /// Marks the successful completion of a transaction
    Commit = 2,
    /// Marks the abortion/rollback of a transaction
    Abort = 3,
    /// A tuple was inserted
    Insert = 4,
    /// A tuple was flagged deleted, pending commit
    MarkDelete = 5,
    /// A tuple was physically removed
    ApplyDelete = 6,
    /// A delete flag was reverted
    RollbackDelete = 7,
    /// A tuple was overwritten
    Update = 8,
    /// A fresh tuple page was formatted
    NewPage = 9,
}

impl LogRecordType {
    pub fn from_u32(value: u32) -> Option<Self> {
        match value {
            1 => Some(Self::Begin),
            2 => Some(Self::Commit),
            3 => Some(Self::Abort),
            4 => Some(Self::Insert),
            5 => Some(Self::MarkDelete),
            6 => Some(Self::ApplyDelete),
            7 => Some(Self::RollbackDelete),
            8 => Some(Self::Update),
            9 => Some(Self::NewPage),
            _ => None,
        }
    }
}

/// Type-specific payload following the record header
#[derive(Debug, Clone, PartialEq)]
pub enum LogPayload {
    /// Transaction control records carry no payload
    None,
    /// Insert and the delete family: the affected RID and tuple image
    Tuple { rid: Rid, tuple: Vec<u8> },
    /// Update: the RID plus both tuple images
    Update {
        rid: Rid,
        old_tuple: Vec<u8>,
        new_tuple: Vec<u8>,
    },
    /// New page: the predecessor link and the formatted page
    NewPage {
        prev_page_id: PageId,
        page_id: PageId,
    },
}

impl LogPayload {
    fn encoded_size(&self) -> usize {
        match self {
            LogPayload::None => 0,
            LogPayload::Tuple { tuple, .. } => Rid::ENCODED_SIZE + 4 + tuple.len(),
            LogPayload::Update {
                old_tuple,
                new_tuple,
                ..
            } => Rid::ENCODED_SIZE + 4 + old_tuple.len() + 4 + new_tuple.len(),
            LogPayload::NewPage { .. } => 8,
        }
    }
}

/// Main log record structure
///
/// The LSN is assigned by the log manager at append time; constructors
/// leave it invalid.
#[derive(Debug, Clone, PartialEq)]
pub struct LogRecord {
    /// Total serialized size, header included
    pub size: u32,
    pub lsn: Lsn,
    pub txn_id: TxnId,
    /// Previous record of the same transaction; `INVALID_LSN` ends the chain
    pub prev_lsn: Lsn,
    pub record_type: LogRecordType,
    pub payload: LogPayload,
}

impl LogRecord {
    fn with_payload(
        txn_id: TxnId,
        prev_lsn: Lsn,
        record_type: LogRecordType,
        payload: LogPayload,
    ) -> Self {
        Self {
            size: (LOG_HEADER_SIZE + payload.encoded_size()) as u32,
            lsn: INVALID_LSN,
            txn_id,
            prev_lsn,
            record_type,
            payload,
        }
    }

    pub fn new_begin(txn_id: TxnId) -> Self {
        Self::with_payload(txn_id, INVALID_LSN, LogRecordType::Begin, LogPayload::None)
    }

    pub fn new_commit(txn_id: TxnId, prev_lsn: Lsn) -> Self {
        Self::with_payload(txn_id, prev_lsn, LogRecordType::Commit, LogPayload::None)
    }

    pub fn new_abort(txn_id: TxnId, prev_lsn: Lsn) -> Self {
        Self::with_payload(txn_id, prev_lsn, LogRecordType::Abort, LogPayload::None)
    }

    pub fn new_insert(txn_id: TxnId, prev_lsn: Lsn, rid: Rid, tuple: Vec<u8>) -> Self {
        Self::with_payload(
            txn_id,
            prev_lsn,
            LogRecordType::Insert,
            LogPayload::Tuple { rid, tuple },
        )
    }

    pub fn new_mark_delete(txn_id: TxnId, prev_lsn: Lsn, rid: Rid, tuple: Vec<u8>) -> Self {
        Self::with_payload(
            txn_id,
            prev_lsn,
            LogRecordType::MarkDelete,
            LogPayload::Tuple { rid, tuple },
        )
    }

    pub fn new_apply_delete(txn_id: TxnId, prev_lsn: Lsn, rid: Rid, tuple: Vec<u8>) -> Self {
        Self::with_payload(
            txn_id,
            prev_lsn,
            LogRecordType::ApplyDelete,
            LogPayload::Tuple { rid, tuple },
        )
    }

    pub fn new_rollback_delete(txn_id: TxnId, prev_lsn: Lsn, rid: Rid, tuple: Vec<u8>) -> Self {
        Self::with_payload(
            txn_id,
            prev_lsn,
            LogRecordType::RollbackDelete,
            LogPayload::Tuple { rid, tuple },
        )
    }

    pub fn new_update(
        txn_id: TxnId,
        prev_lsn: Lsn,
        rid: Rid,
        old_tuple: Vec<u8>,
        new_tuple: Vec<u8>,
    ) -> Self {
        Self::with_payload(
            txn_id,
            prev_lsn,
            LogRecordType::Update,
            LogPayload::Update {
                rid,
                old_tuple,
                new_tuple,
            },
        )
    }

    pub fn new_page(txn_id: TxnId, prev_lsn: Lsn, prev_page_id: PageId, page_id: PageId) -> Self {
        Self::with_payload(
            txn_id,
            prev_lsn,
            LogRecordType::NewPage,
            LogPayload::NewPage {
                prev_page_id,
                page_id,
            },
        )
    }

    /// Serialize into a buffer of exactly `self.size` bytes
    pub fn serialize_into(&self, buf: &mut [u8]) {
        debug_assert_eq!(buf.len(), self.size as usize);

        LittleEndian::write_u32(&mut buf[0..4], self.size);
        LittleEndian::write_u32(&mut buf[4..8], self.lsn);
        LittleEndian::write_u32(&mut buf[8..12], self.txn_id);
        LittleEndian::write_u32(&mut buf[12..16], self.prev_lsn);
        LittleEndian::write_u32(&mut buf[16..20], self.record_type as u32);

        let body = &mut buf[LOG_HEADER_SIZE..];
        match &self.payload {
            LogPayload::None => {}
            LogPayload::Tuple { rid, tuple } => {
                body[0..8].copy_from_slice(&rid.to_bytes());
                LittleEndian::write_u32(&mut body[8..12], tuple.len() as u32);
                body[12..12 + tuple.len()].copy_from_slice(tuple);
            }
            LogPayload::Update {
                rid,
                old_tuple,
                new_tuple,
            } => {
                body[0..8].copy_from_slice(&rid.to_bytes());
                LittleEndian::write_u32(&mut body[8..12], old_tuple.len() as u32);
                let mut pos = 12;
                body[pos..pos + old_tuple.len()].copy_from_slice(old_tuple);
                pos += old_tuple.len();
                LittleEndian::write_u32(&mut body[pos..pos + 4], new_tuple.len() as u32);
                pos += 4;
                body[pos..pos + new_tuple.len()].copy_from_slice(new_tuple);
            }
            LogPayload::NewPage {
                prev_page_id,
                page_id,
            } => {
                LittleEndian::write_u32(&mut body[0..4], *prev_page_id);
                LittleEndian::write_u32(&mut body[4..8], *page_id);
            }
        }
    }

    pub fn serialize(&self) -> Vec<u8> {
        let mut buf = vec![0u8; self.size as usize];
        self.serialize_into(&mut buf);
        buf
    }

    /// Deserialize the record starting at the beginning of `buf`
    ///
    /// `Incomplete` means the window ends mid-record and the caller should
    /// reload from this offset; `Corrupt` means the bytes can never parse.
    pub fn deserialize(buf: &[u8]) -> Result<Self> {
        if buf.len() < LOG_HEADER_SIZE {
            return Err(LogRecordError::Incomplete);
        }

        let size = LittleEndian::read_u32(&buf[0..4]);
        let lsn = LittleEndian::read_u32(&buf[4..8]);
        let txn_id = LittleEndian::read_u32(&buf[8..12]);
        let prev_lsn = LittleEndian::read_u32(&buf[12..16]);
        let type_raw = LittleEndian::read_u32(&buf[16..20]);

        let record_type = LogRecordType::from_u32(type_raw)
            .ok_or_else(|| LogRecordError::Corrupt(format!("unknown record type {}", type_raw)))?;

        if (size as usize) < LOG_HEADER_SIZE {
            return Err(LogRecordError::Corrupt(format!(
                "record size {} below header size",
                size
            )));
        }
        if size as usize > buf.len() {
            return Err(LogRecordError::Incomplete);
        }

        let body = &buf[LOG_HEADER_SIZE..size as usize];
        let payload = match record_type {
            LogRecordType::Begin | LogRecordType::Commit | LogRecordType::Abort => {
                if !body.is_empty() {
                    return Err(LogRecordError::Corrupt(
                        "control record with payload".to_string(),
                    ));
                }
                LogPayload::None
            }
            LogRecordType::Insert
            | LogRecordType::MarkDelete
            | LogRecordType::ApplyDelete
            | LogRecordType::RollbackDelete => {
                if body.len() < Rid::ENCODED_SIZE + 4 {
                    return Err(LogRecordError::Corrupt("truncated tuple payload".to_string()));
                }
                let rid = Rid::from_bytes(&body[0..8]);
                let tuple_len = LittleEndian::read_u32(&body[8..12]) as usize;
                if 12 + tuple_len != body.len() {
                    return Err(LogRecordError::Corrupt(
                        "tuple length disagrees with record size".to_string(),
                    ));
                }
                LogPayload::Tuple {
                    rid,
                    tuple: body[12..].to_vec(),
                }
            }
            LogRecordType::Update => {
                if body.len() < Rid::ENCODED_SIZE + 4 {
                    return Err(LogRecordError::Corrupt("truncated update payload".to_string()));
                }
                let rid = Rid::from_bytes(&body[0..8]);
                let old_len = LittleEndian::read_u32(&body[8..12]) as usize;
                if body.len() < 12 + old_len + 4 {
                    return Err(LogRecordError::Corrupt("truncated old tuple".to_string()));
                }
                let old_tuple = body[12..12 + old_len].to_vec();
                let new_len =
                    LittleEndian::read_u32(&body[12 + old_len..12 + old_len + 4]) as usize;
                if 12 + old_len + 4 + new_len != body.len() {
                    return Err(LogRecordError::Corrupt(
                        "new tuple length disagrees with record size".to_string(),
                    ));
                }
                let new_tuple = body[12 + old_len + 4..].to_vec();
                LogPayload::Update {
                    rid,
                    old_tuple,
                    new_tuple,
                }
            }
            LogRecordType::NewPage => {
                if body.len() != 8 {
                    return Err(LogRecordError::Corrupt(
                        "new-page payload must be 8 bytes".to_string(),
                    ));
                }
                LogPayload::NewPage {
                    prev_page_id: LittleEndian::read_u32(&body[0..4]),
                    page_id: LittleEndian::read_u32(&body[4..8]),
                }
            }
        };

        Ok(Self {
            size,
            lsn,
            txn_id,
            prev_lsn,
            record_type,
            payload,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip(mut record: LogRecord, lsn: Lsn) -> LogRecord {
        record.lsn = lsn;
        let bytes = record.serialize();
        assert_eq!(bytes.len(), record.size as usize);
        let parsed = LogRecord::deserialize(&bytes).unwrap();
        assert_eq!(parsed, record);
        parsed
    }

    #[test]
    fn test_control_record_roundtrips() {
        let begin = roundtrip(LogRecord::new_begin(3), 1);
        assert_eq!(begin.size as usize, LOG_HEADER_SIZE);
        assert_eq!(begin.prev_lsn, INVALID_LSN);

        roundtrip(LogRecord::new_commit(3, 1), 2);
        roundtrip(LogRecord::new_abort(3, 1), 2);
    }

    #[test]
    fn test_tuple_record_roundtrips() {
        let rid = Rid::new(4, 2);
        roundtrip(LogRecord::new_insert(7, 5, rid, b"tuple".to_vec()), 6);
        roundtrip(LogRecord::new_mark_delete(7, 6, rid, b"tuple".to_vec()), 7);
        roundtrip(LogRecord::new_apply_delete(7, 7, rid, b"tuple".to_vec()), 8);
        roundtrip(
            LogRecord::new_rollback_delete(7, 8, rid, b"tuple".to_vec()),
            9,
        );
    }

    #[test]
    fn test_update_and_new_page_roundtrips() {
        let update = roundtrip(
            LogRecord::new_update(2, 9, Rid::new(8, 0), b"old".to_vec(), b"newer".to_vec()),
            10,
        );
        assert_eq!(
            update.size as usize,
            LOG_HEADER_SIZE + 8 + 4 + 3 + 4 + 5
        );

        roundtrip(LogRecord::new_page(2, 10, 3, 4), 11);
    }

    #[test]
    fn test_incomplete_detection() {
        let mut record = LogRecord::new_insert(1, 0, Rid::new(1, 0), b"payload".to_vec());
        record.lsn = 1;
        let bytes = record.serialize();

        // Header split across the window boundary
        assert!(matches!(
            LogRecord::deserialize(&bytes[..10]),
            Err(LogRecordError::Incomplete)
        ));

        // Payload split across the window boundary
        assert!(matches!(
            LogRecord::deserialize(&bytes[..bytes.len() - 1]),
            Err(LogRecordError::Incomplete)
        ));
    }

    #[test]
    fn test_unknown_type_is_corrupt() {
        let mut record = LogRecord::new_begin(1);
        record.lsn = 1;
        let mut bytes = record.serialize();
        LittleEndian::write_u32(&mut bytes[16..20], 0xFF);
        assert!(matches!(
            LogRecord::deserialize(&bytes),
            Err(LogRecordError::Corrupt(_))
        ));
    }

    #[test]
    fn test_sequential_records_parse_from_one_buffer() {
        let mut first = LogRecord::new_begin(1);
        first.lsn = 1;
        let mut second = LogRecord::new_insert(1, 1, Rid::new(2, 0), b"x".to_vec());
        second.lsn = 2;

        let mut buf = first.serialize();
        buf.extend_from_slice(&second.serialize());

        let parsed_first = LogRecord::deserialize(&buf).unwrap();
        assert_eq!(parsed_first, first);
        let parsed_second = LogRecord::deserialize(&buf[parsed_first.size as usize..]).unwrap();
        assert_eq!(parsed_second, second);
    }
}
