use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use crate::common::types::{Lsn, PageId, Rid, TxnId, INVALID_LSN};
use crate::storage::page::Tuple;
use crate::transaction::wal::log_manager::{LogManager, Result};
use crate::transaction::wal::log_record::LogRecord;

/// Handle for an in-flight transaction.
///
/// Opaque to the storage core: executors thread it through buffer-pool and
/// index calls, and the logging helpers below maintain the per-transaction
/// LSN chain that recovery's undo phase walks backwards.
pub struct Transaction {
    id: TxnId,
    prev_lsn: Lsn,
}

impl Transaction {
    fn new(id: TxnId) -> Self {
        Self {
            id,
            prev_lsn: INVALID_LSN,
        }
    }

    pub fn id(&self) -> TxnId {
        self.id
    }

    /// LSN of this transaction's most recent log record
    pub fn prev_lsn(&self) -> Lsn {
        self.prev_lsn
    }

    /// Log a tuple insert at `rid`
    pub fn log_insert(&mut self, log: &LogManager, rid: Rid, tuple: Tuple) -> Result<Lsn> {
        let record = LogRecord::new_insert(self.id, self.prev_lsn, rid, tuple);
        self.append(log, record)
    }

    /// Log an in-place tuple update at `rid`
    pub fn log_update(
        &mut self,
        log: &LogManager,
        rid: Rid,
        old_tuple: Tuple,
        new_tuple: Tuple,
    ) -> Result<Lsn> {
        let record = LogRecord::new_update(self.id, self.prev_lsn, rid, old_tuple, new_tuple);
        self.append(log, record)
    }

    /// Log a pending delete of the tuple at `rid`
    pub fn log_mark_delete(&mut self, log: &LogManager, rid: Rid, tuple: Tuple) -> Result<Lsn> {
        let record = LogRecord::new_mark_delete(self.id, self.prev_lsn, rid, tuple);
        self.append(log, record)
    }

    /// Log the physical removal of the tuple at `rid`
    pub fn log_apply_delete(&mut self, log: &LogManager, rid: Rid, tuple: Tuple) -> Result<Lsn> {
        let record = LogRecord::new_apply_delete(self.id, self.prev_lsn, rid, tuple);
        self.append(log, record)
    }

    /// Log the rollback of a pending delete at `rid`
    pub fn log_rollback_delete(&mut self, log: &LogManager, rid: Rid, tuple: Tuple) -> Result<Lsn> {
        let record = LogRecord::new_rollback_delete(self.id, self.prev_lsn, rid, tuple);
        self.append(log, record)
    }

    /// Log the allocation of a table page chained after `prev_page_id`
    pub fn log_new_page(&mut self, log: &LogManager, prev_page_id: PageId) -> Result<Lsn> {
        let record = LogRecord::new_new_page(self.id, self.prev_lsn, prev_page_id);
        self.append(log, record)
    }

    fn append(&mut self, log: &LogManager, mut record: LogRecord) -> Result<Lsn> {
        let lsn = log.append_log_record(&mut record)?;
        self.prev_lsn = lsn;
        Ok(lsn)
    }
}

/// Hands out transaction ids and writes the transaction lifecycle records
pub struct TransactionManager {
    log_manager: Arc<LogManager>,
    next_txn_id: AtomicU32,
}

impl TransactionManager {
    pub fn new(log_manager: Arc<LogManager>) -> Self {
        Self {
            log_manager,
            next_txn_id: AtomicU32::new(1),
        }
    }

    /// Start a transaction and log BEGIN
    pub fn begin(&self) -> Result<Transaction> {
        let id = self.next_txn_id.fetch_add(1, Ordering::SeqCst);
        let mut txn = Transaction::new(id);

        let mut record = LogRecord::new_begin(id);
        let lsn = self.log_manager.append_log_record(&mut record)?;
        txn.prev_lsn = lsn;

        Ok(txn)
    }

    /// Commit: log COMMIT and block until it is durable
    pub fn commit(&self, txn: &mut Transaction) -> Result<Lsn> {
        let mut record = LogRecord::new_commit(txn.id, txn.prev_lsn);
        let lsn = self.log_manager.append_log_record(&mut record)?;
        txn.prev_lsn = lsn;

        self.log_manager.flush_until(lsn)?;
        Ok(lsn)
    }

    /// Abort: log ABORT.
    ///
    /// Compensation of the transaction's effects is the caller's concern;
    /// after a crash the undo phase of recovery rolls back anything a
    /// caller left behind.
    pub fn abort(&self, txn: &mut Transaction) -> Result<Lsn> {
        let mut record = LogRecord::new_abort(txn.id, txn.prev_lsn);
        let lsn = self.log_manager.append_log_record(&mut record)?;
        txn.prev_lsn = lsn;
        Ok(lsn)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use tempfile::NamedTempFile;

    use crate::storage::disk::DiskManager;
    use crate::transaction::wal::log_manager::LogManagerConfig;

    fn create_txn_manager() -> (TransactionManager, Arc<LogManager>, NamedTempFile, NamedTempFile)
    {
        let db_file = NamedTempFile::new().unwrap();
        let log_file = NamedTempFile::new().unwrap();
        let disk = Arc::new(DiskManager::new(db_file.path(), log_file.path()).unwrap());
        let log_manager = Arc::new(LogManager::new(disk, LogManagerConfig::default()).unwrap());
        (
            TransactionManager::new(log_manager.clone()),
            log_manager,
            db_file,
            log_file,
        )
    }

    #[test]
    fn test_begin_assigns_ids_and_chains_lsns() {
        let (txn_manager, _log, _db, _logf) = create_txn_manager();

        let first = txn_manager.begin().unwrap();
        let second = txn_manager.begin().unwrap();
        assert_ne!(first.id(), second.id());
        assert_ne!(first.prev_lsn(), INVALID_LSN);
    }

    #[test]
    fn test_commit_is_durable() {
        let (txn_manager, log_manager, _db, _logf) = create_txn_manager();

        let mut txn = txn_manager.begin().unwrap();
        txn.log_insert(&log_manager, Rid::new(1, 0), Tuple::new(vec![1, 2, 3]))
            .unwrap();
        let commit_lsn = txn_manager.commit(&mut txn).unwrap();

        assert!(log_manager.persistent_lsn() >= commit_lsn);
    }

    #[test]
    fn test_data_records_chain_prev_lsn() {
        let (txn_manager, log_manager, _db, _logf) = create_txn_manager();

        let mut txn = txn_manager.begin().unwrap();
        let begin_lsn = txn.prev_lsn();
        let insert_lsn = txn
            .log_insert(&log_manager, Rid::new(1, 0), Tuple::new(vec![1]))
            .unwrap();
        assert_eq!(txn.prev_lsn(), insert_lsn);
        assert!(insert_lsn > begin_lsn);
    }
}
