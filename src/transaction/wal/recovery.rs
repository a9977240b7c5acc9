use std::collections::HashMap;
use std::sync::Arc;

use log::{debug, info};
use thiserror::Error;

use crate::common::types::{Lsn, PageId, TxnId, INVALID_PAGE_ID};
use crate::storage::buffer::{BufferPoolError, BufferPoolManager};
use crate::storage::disk::{DiskManager, DiskManagerError};
use crate::storage::page::{PageError, TablePage};
use crate::transaction::wal::log_manager::LOG_BUFFER_SIZE;
use crate::transaction::wal::log_record::{LogPayload, LogRecord, LogRecordType};

/// Error type for recovery operations
#[derive(Error, Debug)]
pub enum RecoveryError {
    #[error("Disk manager error: {0}")]
    DiskManagerError(#[from] DiskManagerError),

    #[error("Buffer pool error: {0}")]
    BufferPoolError(#[from] BufferPoolError),

    #[error("Page error: {0}")]
    PageError(#[from] PageError),

    #[error("Log record at LSN {0} could not be read back during undo")]
    RecordNotFound(Lsn),
}

/// Result type for recovery operations
pub type Result<T> = std::result::Result<T, RecoveryError>;

/// Crash recovery over the write-ahead log.
///
/// Runs once at startup, while logging is disabled: the buffer pool handed
/// in here must not be WAL-fenced, since every record replayed below is
/// already durable by definition.
///
/// Redo scans the whole log forward in `LOG_BUFFER_SIZE` chunks, re-applying
/// any data operation whose LSN is newer than its target page, and builds
/// the active-transaction table and the LSN-to-file-offset mapping. Undo
/// then walks each surviving (loser) transaction's chain backwards through
/// `prev_lsn`, applying inverse operations.
pub struct LogRecovery {
    disk_manager: Arc<DiskManager>,
    buffer_pool: Arc<BufferPoolManager>,
    active_txn: HashMap<TxnId, Lsn>,
    lsn_mapping: HashMap<Lsn, u64>,
}

impl LogRecovery {
    pub fn new(disk_manager: Arc<DiskManager>, buffer_pool: Arc<BufferPoolManager>) -> Self {
        Self {
            disk_manager,
            buffer_pool,
            active_txn: HashMap::new(),
            lsn_mapping: HashMap::new(),
        }
    }

    /// Run both recovery phases and flush the result to disk
    pub fn recover(&mut self) -> Result<()> {
        self.redo()?;
        self.undo()?;
        self.buffer_pool.flush_all_pages()?;
        Ok(())
    }

    /// Transactions currently considered alive (losers after redo)
    pub fn active_transactions(&self) -> Vec<TxnId> {
        self.active_txn.keys().copied().collect()
    }

    /// Redo phase: replay the log from the beginning.
    ///
    /// The log file is read in fixed-size chunks; a record that does not fit
    /// completely in the current chunk ends deserialization for that chunk,
    /// and scanning resumes at the next chunk boundary.
    pub fn redo(&mut self) -> Result<()> {
        info!("redo phase: scanning log from the beginning");
        self.active_txn.clear();
        self.lsn_mapping.clear();

        let mut chunk = vec![0u8; LOG_BUFFER_SIZE];
        let mut file_offset = 0u64;

        while self.disk_manager.read_log(&mut chunk, file_offset)? {
            let mut pos = 0usize;
            while let Some((record, size)) = LogRecord::deserialize(&chunk[pos..]) {
                self.lsn_mapping.insert(record.lsn, file_offset + pos as u64);

                match record.record_type {
                    LogRecordType::Commit | LogRecordType::Abort => {
                        self.active_txn.remove(&record.txn_id);
                    }
                    _ => {
                        self.active_txn.insert(record.txn_id, record.lsn);
                    }
                }

                self.redo_record(&record)?;
                pos += size;
            }
            file_offset += LOG_BUFFER_SIZE as u64;
        }

        info!(
            "redo complete: {} records mapped, {} loser transactions",
            self.lsn_mapping.len(),
            self.active_txn.len()
        );
        Ok(())
    }

    /// Undo phase: roll back every transaction still in the active table
    pub fn undo(&mut self) -> Result<()> {
        info!(
            "undo phase: rolling back {} transactions",
            self.active_txn.len()
        );

        let mut chunk = vec![0u8; LOG_BUFFER_SIZE];
        let losers: Vec<(TxnId, Lsn)> = self.active_txn.iter().map(|(&t, &l)| (t, l)).collect();

        for (txn_id, last_lsn) in losers {
            debug!("undoing transaction {} from LSN {}", txn_id, last_lsn);
            let mut lsn = last_lsn;

            loop {
                let offset = match self.lsn_mapping.get(&lsn) {
                    Some(&offset) => offset,
                    None => break,
                };

                if !self.disk_manager.read_log(&mut chunk, offset)? {
                    return Err(RecoveryError::RecordNotFound(lsn));
                }
                let (record, _) = LogRecord::deserialize(&chunk)
                    .ok_or(RecoveryError::RecordNotFound(lsn))?;

                self.undo_record(&record)?;

                if !self.lsn_mapping.contains_key(&record.prev_lsn) {
                    break;
                }
                lsn = record.prev_lsn;
            }
        }

        self.active_txn.clear();
        self.lsn_mapping.clear();
        Ok(())
    }

    /// Apply a record's forward effect if the target page has not seen it
    fn redo_record(&self, record: &LogRecord) -> Result<()> {
        match (&record.record_type, &record.payload) {
            (LogRecordType::Insert, LogPayload::Tuple { rid, tuple }) => {
                self.redo_on_page(rid.page_id, record.lsn, |page| {
                    page.insert_tuple_at(rid.slot, tuple)
                })
            }
            (LogRecordType::Update, LogPayload::Update { rid, new_tuple, .. }) => {
                self.redo_on_page(rid.page_id, record.lsn, |page| {
                    page.update_tuple(rid.slot, new_tuple).map(|_| ())
                })
            }
            (LogRecordType::MarkDelete, LogPayload::Tuple { rid, .. }) => {
                self.redo_on_page(rid.page_id, record.lsn, |page| page.mark_delete(rid.slot))
            }
            (LogRecordType::ApplyDelete, LogPayload::Tuple { rid, .. }) => {
                self.redo_on_page(rid.page_id, record.lsn, |page| page.apply_delete(rid.slot))
            }
            (LogRecordType::RollbackDelete, LogPayload::Tuple { rid, .. }) => {
                self.redo_on_page(rid.page_id, record.lsn, |page| {
                    page.rollback_delete(rid.slot)
                })
            }
            (LogRecordType::NewPage, LogPayload::NewPage { prev_page_id }) => {
                self.redo_new_page(*prev_page_id)
            }
            _ => Ok(()),
        }
    }

    fn redo_on_page<F>(&self, page_id: PageId, lsn: Lsn, apply: F) -> Result<()>
    where
        F: FnOnce(&mut TablePage) -> std::result::Result<(), PageError>,
    {
        let page = self.buffer_pool.fetch_page(page_id)?;

        let (applied, result) = {
            let mut guard = page.write();
            let mut table_page = TablePage::new(&mut guard);
            if table_page.lsn() < lsn {
                let result = apply(&mut table_page);
                if result.is_ok() {
                    table_page.set_lsn(lsn);
                }
                (result.is_ok(), result)
            } else {
                (false, Ok(()))
            }
        };

        self.buffer_pool.unpin_page(page_id, applied)?;
        result?;
        Ok(())
    }

    /// Re-create a table page allocated before the crash and restore its
    /// chain link from the previous page.
    fn redo_new_page(&self, prev_page_id: PageId) -> Result<()> {
        let (page, new_page_id) = self.buffer_pool.new_page()?;
        {
            let mut guard = page.write();
            let mut table_page = TablePage::new(&mut guard);
            table_page.init(prev_page_id);
        }
        self.buffer_pool.unpin_page(new_page_id, true)?;

        if prev_page_id != INVALID_PAGE_ID {
            let prev = self.buffer_pool.fetch_page(prev_page_id)?;
            let relink = {
                let mut guard = prev.write();
                let mut table_page = TablePage::new(&mut guard);
                if table_page.next_page_id() == INVALID_PAGE_ID {
                    table_page.set_next_page_id(new_page_id);
                    true
                } else {
                    false
                }
            };
            self.buffer_pool.unpin_page(prev_page_id, relink)?;
        }

        Ok(())
    }

    /// Apply the inverse of a loser transaction's data operation
    fn undo_record(&self, record: &LogRecord) -> Result<()> {
        match (&record.record_type, &record.payload) {
            (LogRecordType::Insert, LogPayload::Tuple { rid, .. }) => {
                self.undo_on_page(rid.page_id, |page| page.apply_delete(rid.slot))
            }
            (LogRecordType::Update, LogPayload::Update { rid, old_tuple, .. }) => {
                self.undo_on_page(rid.page_id, |page| {
                    page.update_tuple(rid.slot, old_tuple).map(|_| ())
                })
            }
            (LogRecordType::MarkDelete, LogPayload::Tuple { rid, .. }) => {
                self.undo_on_page(rid.page_id, |page| page.rollback_delete(rid.slot))
            }
            (LogRecordType::ApplyDelete, LogPayload::Tuple { rid, tuple }) => {
                self.undo_on_page(rid.page_id, |page| page.insert_tuple_at(rid.slot, tuple))
            }
            (LogRecordType::RollbackDelete, LogPayload::Tuple { rid, .. }) => {
                self.undo_on_page(rid.page_id, |page| page.mark_delete(rid.slot))
            }
            _ => Ok(()),
        }
    }

    fn undo_on_page<F>(&self, page_id: PageId, apply: F) -> Result<()>
    where
        F: FnOnce(&mut TablePage) -> std::result::Result<(), PageError>,
    {
        let page = self.buffer_pool.fetch_page(page_id)?;

        let result = {
            let mut guard = page.write();
            let mut table_page = TablePage::new(&mut guard);
            apply(&mut table_page)
        };

        self.buffer_pool.unpin_page(page_id, result.is_ok())?;
        result?;
        Ok(())
    }
}
