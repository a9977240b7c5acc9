use std::time::Duration;
use anyhow::Result;

use stratadb::common::types::Rid;
use stratadb::storage::page::{TablePage, Tuple};
use stratadb::transaction::wal::log_manager::LogManagerConfig;
use stratadb::transaction::TransactionManager;

mod common;
use common::{create_test_buffer_pool_with_wal, create_test_buffer_pool_with_wal_config};

// A timeout long enough that the periodic flush never fires on its own;
// durability must then come from the WAL fence under test.
fn quiet_flush_config() -> LogManagerConfig {
    LogManagerConfig {
        log_timeout: Duration::from_secs(60),
        ..Default::default()
    }
}

#[test]
fn test_wal_flushed_before_dirty_eviction() -> Result<()> {
    let (buffer_pool, log_manager, _files) =
        create_test_buffer_pool_with_wal_config(3, quiet_flush_config())?;
    log_manager.run_flush_thread();
    let txn_manager = TransactionManager::new(log_manager.clone());

    let mut txn = txn_manager.begin()?;

    // Write a tuple and stamp the page with the record's LSN, as an
    // executor would
    let (page, page_id) = buffer_pool.new_page()?;
    let tuple = Tuple::new(b"wal ordering".to_vec());
    let lsn = txn.log_insert(&log_manager, Rid::new(page_id, 0), tuple.clone())?;
    {
        let mut guard = page.write();
        let mut table_page = TablePage::new(&mut guard);
        table_page.insert_tuple_at(0, &tuple).unwrap();
        table_page.set_lsn(lsn);
    }
    buffer_pool.unpin_page(page_id, true)?;

    // The record only lives in the log buffer so far
    assert!(log_manager.persistent_lsn() < lsn);

    // Fill the pool so the dirty page gets evicted. The eviction must block
    // until the log is durable past the page's LSN.
    for _ in 0..3 {
        let (_, pid) = buffer_pool.new_page()?;
        buffer_pool.unpin_page(pid, false)?;
    }

    assert!(log_manager.persistent_lsn() >= lsn);

    // The page image on disk carries the tuple
    let fetched = buffer_pool.fetch_page(page_id)?;
    {
        let mut guard = fetched.write();
        let table_page = TablePage::new(&mut guard);
        assert_eq!(table_page.tuple_at(0).unwrap().data, b"wal ordering");
        assert_eq!(table_page.lsn(), lsn);
    }
    buffer_pool.unpin_page(page_id, false)?;

    log_manager.stop_flush_thread();
    Ok(())
}

#[test]
fn test_flush_page_respects_wal_ordering() -> Result<()> {
    let (buffer_pool, log_manager, _files) =
        create_test_buffer_pool_with_wal_config(5, quiet_flush_config())?;
    log_manager.run_flush_thread();
    let txn_manager = TransactionManager::new(log_manager.clone());

    let mut txn = txn_manager.begin()?;

    let (page, page_id) = buffer_pool.new_page()?;
    let tuple = Tuple::new(vec![7; 16]);
    let lsn = txn.log_insert(&log_manager, Rid::new(page_id, 0), tuple.clone())?;
    {
        let mut guard = page.write();
        let mut table_page = TablePage::new(&mut guard);
        table_page.insert_tuple_at(0, &tuple).unwrap();
        table_page.set_lsn(lsn);
    }
    buffer_pool.unpin_page(page_id, true)?;

    assert!(log_manager.persistent_lsn() < lsn);
    buffer_pool.flush_page(page_id)?;
    assert!(log_manager.persistent_lsn() >= lsn);

    log_manager.stop_flush_thread();
    Ok(())
}

#[test]
fn test_commit_forces_durability() -> Result<()> {
    let (_buffer_pool, log_manager, _files) = create_test_buffer_pool_with_wal(5)?;
    log_manager.run_flush_thread();
    let txn_manager = TransactionManager::new(log_manager.clone());

    let mut txn = txn_manager.begin()?;
    txn.log_insert(&log_manager, Rid::new(1, 0), Tuple::new(vec![1, 2, 3]))?;
    let commit_lsn = txn_manager.commit(&mut txn)?;

    assert!(log_manager.persistent_lsn() >= commit_lsn);

    log_manager.stop_flush_thread();
    Ok(())
}

#[test]
fn test_background_flush_catches_up_without_force() -> Result<()> {
    let (_buffer_pool, log_manager, _files) = create_test_buffer_pool_with_wal(5)?;
    log_manager.run_flush_thread();
    let txn_manager = TransactionManager::new(log_manager.clone());

    let txn = txn_manager.begin()?;
    let lsn = txn.prev_lsn();

    // The periodic flush (default 300ms timeout) must pick the record up
    let deadline = std::time::Instant::now() + std::time::Duration::from_secs(5);
    while log_manager.persistent_lsn() < lsn {
        assert!(
            std::time::Instant::now() < deadline,
            "flush thread never caught up"
        );
        std::thread::sleep(std::time::Duration::from_millis(20));
    }

    log_manager.stop_flush_thread();
    Ok(())
}
