use std::sync::Arc;
use anyhow::Result;
use tempfile::NamedTempFile;

use stratadb::storage::buffer::BufferPoolManager;
use stratadb::storage::disk::DiskManager;
use stratadb::transaction::wal::log_manager::{LogManager, LogManagerConfig};

// Temporary database and log files backing one test engine
#[allow(dead_code)]
pub struct TestFiles {
    pub db_file: NamedTempFile,
    pub log_file: NamedTempFile,
}

#[allow(dead_code)]
pub fn create_test_files() -> Result<TestFiles> {
    Ok(TestFiles {
        db_file: NamedTempFile::new()?,
        log_file: NamedTempFile::new()?,
    })
}

#[allow(dead_code)]
pub fn create_test_disk_manager(files: &TestFiles) -> Result<Arc<DiskManager>> {
    Ok(Arc::new(DiskManager::new(
        files.db_file.path(),
        files.log_file.path(),
    )?))
}

// Create a buffer pool manager with a temporary database
#[allow(dead_code)]
pub fn create_test_buffer_pool(pool_size: usize) -> Result<(Arc<BufferPoolManager>, TestFiles)> {
    let files = create_test_files()?;
    let disk = create_test_disk_manager(&files)?;
    let buffer_pool = Arc::new(BufferPoolManager::new(pool_size, disk));
    Ok((buffer_pool, files))
}

// Create a WAL-fenced buffer pool plus its log manager
#[allow(dead_code)]
pub fn create_test_buffer_pool_with_wal(
    pool_size: usize,
) -> Result<(Arc<BufferPoolManager>, Arc<LogManager>, TestFiles)> {
    create_test_buffer_pool_with_wal_config(pool_size, LogManagerConfig::default())
}

#[allow(dead_code)]
pub fn create_test_buffer_pool_with_wal_config(
    pool_size: usize,
    config: LogManagerConfig,
) -> Result<(Arc<BufferPoolManager>, Arc<LogManager>, TestFiles)> {
    let files = create_test_files()?;
    let disk = create_test_disk_manager(&files)?;
    let log_manager = Arc::new(LogManager::new(disk.clone(), config)?);
    let buffer_pool = Arc::new(BufferPoolManager::new_with_wal(
        pool_size,
        disk,
        log_manager.clone(),
    ));
    Ok((buffer_pool, log_manager, files))
}
