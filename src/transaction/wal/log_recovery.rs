use std::collections::HashMap;
use std::sync::Arc;
use log::{debug, info, warn};
use thiserror::Error;

use crate::common::types::{Lsn, TxnId, INVALID_LSN};
use crate::storage::buffer::{BufferPoolError, BufferPoolManager};
use crate::storage::disk::{DiskManager, DiskManagerError};
use crate::storage::page::{PageError, TuplePage};
use crate::transaction::wal::log_manager::LogManagerConfig;
use crate::transaction::wal::log_record::{
    LogPayload, LogRecord, LogRecordError, LogRecordType,
};

/// Error type for recovery operations
#[derive(Error, Debug)]
pub enum RecoveryError {
    #[error("Disk manager error: {0}")]
    DiskError(#[from] DiskManagerError),

    #[error("Buffer pool error: {0}")]
    BufferPoolError(#[from] BufferPoolError),

    #[error("Page error: {0}")]
    PageError(#[from] PageError),

    #[error("Log record error: {0}")]
    RecordError(#[from] LogRecordError),
}

/// Result type for recovery operations
pub type Result<T> = std::result::Result<T, RecoveryError>;

/// ARIES-style restart recovery over the on-disk log
///
/// `redo` streams the log forward, reapplying every physical operation a
/// page has not yet seen and rebuilding the active-transaction table plus
/// an LSN-to-offset map. `undo` then walks each surviving transaction's
/// prev-LSN chain backwards, applying compensating operations. Logging is
/// assumed disabled while recovery runs.
pub struct LogRecovery {
    disk_manager: Arc<DiskManager>,
    buffer_pool: Arc<BufferPoolManager>,
    /// Chunk size for streaming the log file
    buffer_size: usize,
    /// Transactions with log records but no commit/abort, and their last LSN
    active_txn: HashMap<TxnId, Lsn>,
    /// File offset of every record seen during redo
    lsn_mapping: HashMap<Lsn, u64>,
}

impl LogRecovery {
    pub fn new(disk_manager: Arc<DiskManager>, buffer_pool: Arc<BufferPoolManager>) -> Self {
        Self::with_buffer_size(
            disk_manager,
            buffer_pool,
            LogManagerConfig::default().buffer_size,
        )
    }

    pub fn with_buffer_size(
        disk_manager: Arc<DiskManager>,
        buffer_pool: Arc<BufferPoolManager>,
        buffer_size: usize,
    ) -> Self {
        Self {
            disk_manager,
            buffer_pool,
            buffer_size,
            active_txn: HashMap::new(),
            lsn_mapping: HashMap::new(),
        }
    }

    /// Run both recovery phases
    pub fn recover(&mut self) -> Result<()> {
        self.redo()?;
        self.undo()?;
        info!("recovery complete");
        Ok(())
    }

    /// Redo phase: replay the log from offset 0
    ///
    /// Reads the file in `buffer_size` chunks; a record split across the
    /// chunk boundary reloads the window at its start. An incomplete
    /// trailing record ends the scan, an unknown type or impossible size
    /// is corruption.
    pub fn redo(&mut self) -> Result<()> {
        info!("redo phase: scanning log from the beginning");

        let mut buf = vec![0u8; self.buffer_size];
        let mut file_offset: u64 = 0;

        loop {
            let n = self.disk_manager.read_log(&mut buf, file_offset)?;
            if n == 0 {
                break;
            }

            let mut pos = 0usize;
            loop {
                match LogRecord::deserialize(&buf[pos..n]) {
                    Ok(record) => {
                        let record_size = record.size as usize;
                        self.lsn_mapping.insert(record.lsn, file_offset + pos as u64);
                        self.apply_redo(&record)?;
                        pos += record_size;
                    }
                    Err(LogRecordError::Incomplete) => break,
                    Err(err @ LogRecordError::Corrupt(_)) => return Err(err.into()),
                }
            }

            if pos == 0 {
                if n == self.buffer_size {
                    return Err(LogRecordError::Corrupt(
                        "log record larger than the recovery buffer".to_string(),
                    )
                    .into());
                }
                warn!("incomplete record at end of log; treating as end of stream");
                break;
            }

            file_offset += pos as u64;
        }

        self.buffer_pool.flush_all_pages()?;
        info!(
            "redo complete: {} transactions still active, {} records mapped",
            self.active_txn.len(),
            self.lsn_mapping.len()
        );
        Ok(())
    }

    /// Undo phase: roll back every transaction left in the active table
    pub fn undo(&mut self) -> Result<()> {
        info!(
            "undo phase: rolling back {} uncommitted transactions",
            self.active_txn.len()
        );

        let losers: Vec<(TxnId, Lsn)> = self.active_txn.drain().collect();
        for (txn_id, last_lsn) in losers {
            debug!("rolling back transaction {} from LSN {}", txn_id, last_lsn);

            let mut lsn = last_lsn;
            while lsn != INVALID_LSN {
                let offset = match self.lsn_mapping.get(&lsn) {
                    Some(&offset) => offset,
                    None => {
                        warn!(
                            "LSN {} of transaction {} is not in the log; stopping rollback",
                            lsn, txn_id
                        );
                        break;
                    }
                };

                let record = match self.read_record_at(offset)? {
                    Some(record) => record,
                    None => {
                        warn!("log unreadable at offset {}; stopping rollback", offset);
                        break;
                    }
                };

                self.apply_undo(&record)?;
                lsn = record.prev_lsn;
            }
        }

        Ok(())
    }

    /// Apply one record going forward, updating the transaction table
    fn apply_redo(&mut self, record: &LogRecord) -> Result<()> {
        match record.record_type {
            LogRecordType::Begin => {
                self.active_txn.insert(record.txn_id, record.lsn);
            }
            LogRecordType::Commit | LogRecordType::Abort => {
                self.active_txn.remove(&record.txn_id);
            }
            _ => {
                let last = self.active_txn.entry(record.txn_id).or_insert(record.lsn);
                *last = (*last).max(record.lsn);
                self.redo_data(record)?;
            }
        }
        Ok(())
    }

    /// Reapply a physical operation if the page has not seen it yet
    fn redo_data(&mut self, record: &LogRecord) -> Result<()> {
        let page_id = match &record.payload {
            LogPayload::Tuple { rid, .. } => rid.page_id,
            LogPayload::Update { rid, .. } => rid.page_id,
            LogPayload::NewPage { page_id, .. } => *page_id,
            LogPayload::None => return Ok(()),
        };

        let page_ptr = self.buffer_pool.fetch_page(page_id)?;
        let mut dirtied = false;
        {
            let mut page = page_ptr.write();
            // The page's own LSN makes redo idempotent: effects that
            // reached disk before the crash are skipped
            if TuplePage::lsn(&page) < record.lsn {
                debug!(
                    "redo lsn={} type={:?} page={}",
                    record.lsn, record.record_type, page_id
                );
                match &record.payload {
                    LogPayload::Tuple { rid, tuple } => match record.record_type {
                        LogRecordType::Insert => {
                            TuplePage::insert_tuple_at(&mut page, *rid, tuple, record.lsn)?;
                        }
                        LogRecordType::MarkDelete => {
                            TuplePage::mark_delete(&mut page, rid.slot, record.lsn)?;
                        }
                        LogRecordType::ApplyDelete => {
                            TuplePage::apply_delete(&mut page, rid.slot, record.lsn)?;
                        }
                        LogRecordType::RollbackDelete => {
                            TuplePage::rollback_delete(&mut page, rid.slot, record.lsn)?;
                        }
                        _ => {}
                    },
                    LogPayload::Update { rid, new_tuple, .. } => {
                        TuplePage::update_tuple(&mut page, rid.slot, new_tuple, record.lsn)?;
                    }
                    LogPayload::NewPage {
                        prev_page_id,
                        page_id,
                    } => {
                        TuplePage::init(&mut page, *page_id, *prev_page_id, record.lsn);
                    }
                    LogPayload::None => {}
                }
                dirtied = true;
            }
        }
        self.buffer_pool.unpin_page(page_id, dirtied)?;
        Ok(())
    }

    /// Apply the compensating operation for one record
    fn apply_undo(&mut self, record: &LogRecord) -> Result<()> {
        let (page_id, rid) = match &record.payload {
            LogPayload::Tuple { rid, .. } => (rid.page_id, *rid),
            LogPayload::Update { rid, .. } => (rid.page_id, *rid),
            // Transaction control and page formatting need no undo
            _ => return Ok(()),
        };

        let page_ptr = self.buffer_pool.fetch_page(page_id)?;
        {
            let mut page = page_ptr.write();
            debug!(
                "undo lsn={} type={:?} page={}",
                record.lsn, record.record_type, page_id
            );
            match (&record.record_type, &record.payload) {
                (LogRecordType::Insert, LogPayload::Tuple { .. }) => {
                    Self::already_undone_ok(TuplePage::apply_delete(
                        &mut page, rid.slot, record.lsn,
                    ))?;
                }
                (LogRecordType::MarkDelete, LogPayload::Tuple { .. }) => {
                    TuplePage::rollback_delete(&mut page, rid.slot, record.lsn)?;
                }
                (LogRecordType::ApplyDelete, LogPayload::Tuple { tuple, .. }) => {
                    Self::already_undone_ok(TuplePage::insert_tuple_at(
                        &mut page, rid, tuple, record.lsn,
                    ))?;
                }
                (LogRecordType::RollbackDelete, LogPayload::Tuple { .. }) => {
                    TuplePage::mark_delete(&mut page, rid.slot, record.lsn)?;
                }
                (LogRecordType::Update, LogPayload::Update { old_tuple, .. }) => {
                    // The old image becomes the forward image again
                    TuplePage::update_tuple(&mut page, rid.slot, old_tuple, record.lsn)?;
                }
                _ => {}
            }
        }
        self.buffer_pool.unpin_page(page_id, true)?;
        Ok(())
    }

    /// A compensation that finds its work already done is a no-op, which
    /// keeps a repeated recovery run harmless
    fn already_undone_ok(result: std::result::Result<(), PageError>) -> std::result::Result<(), PageError> {
        match result {
            Err(PageError::TupleNotFound) | Err(PageError::SlotOccupied(_)) => Ok(()),
            other => other,
        }
    }

    /// Read the single record starting at `offset`, `None` if unreadable
    fn read_record_at(&self, offset: u64) -> Result<Option<LogRecord>> {
        let mut buf = vec![0u8; self.buffer_size];
        let n = self.disk_manager.read_log(&mut buf, offset)?;
        if n == 0 {
            return Ok(None);
        }

        match LogRecord::deserialize(&buf[..n]) {
            Ok(record) => Ok(Some(record)),
            Err(LogRecordError::Incomplete) => Ok(None),
            Err(err) => Err(err.into()),
        }
    }
}
