use std::fs::{File, OpenOptions};
use std::io::{Read, Write, Seek, SeekFrom};
use std::path::Path;
use parking_lot::Mutex;
use thiserror::Error;

use crate::common::types::{Page, PageId, INVALID_PAGE_ID, PAGE_SIZE};

#[derive(Error, Debug)]
pub enum DiskManagerError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
    #[error("Invalid page ID: {0}")]
    InvalidPageId(PageId),
}

/// DiskManager handles all disk I/O: page reads and writes against the
/// database file, page allocation, and the append-only write-ahead log file.
///
/// All I/O is synchronous; each file is serialized behind its own mutex.
pub struct DiskManager {
    db_file: Mutex<File>,
    log_file: Mutex<File>,
}

impl DiskManager {
    /// Create a new DiskManager over the given database and log files
    pub fn new(db_path: impl AsRef<Path>, log_path: impl AsRef<Path>) -> Result<Self, DiskManagerError> {
        let db_file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(db_path)?;

        let log_file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(log_path)?;

        Ok(Self {
            db_file: Mutex::new(db_file),
            log_file: Mutex::new(log_file),
        })
    }

    /// Read a page from disk.
    ///
    /// A page id past the end of the file yields a zeroed page; the caller
    /// sees the same image a freshly allocated page would have.
    pub fn read_page(&self, page_id: PageId, page: &mut Page) -> Result<(), DiskManagerError> {
        if page_id == INVALID_PAGE_ID {
            return Err(DiskManagerError::InvalidPageId(page_id));
        }

        let offset = Self::page_offset(page_id);
        let mut buffer = [0u8; PAGE_SIZE];

        {
            let mut file = self.db_file.lock();
            let file_size = file.metadata()?.len();

            if offset >= file_size {
                page.data.fill(0);
                page.page_id = page_id;
                page.lsn = 0;
                return Ok(());
            }

            file.seek(SeekFrom::Start(offset))?;
            file.read_exact(&mut buffer)?;
        }

        page.data.copy_from_slice(&buffer);
        page.page_id = page_id;
        page.lsn = 0;

        Ok(())
    }

    /// Write a page to disk
    pub fn write_page(&self, page: &Page) -> Result<(), DiskManagerError> {
        if page.page_id == INVALID_PAGE_ID {
            return Err(DiskManagerError::InvalidPageId(page.page_id));
        }

        let offset = Self::page_offset(page.page_id);

        let mut file = self.db_file.lock();
        file.seek(SeekFrom::Start(offset))?;
        file.write_all(&page.data)?;
        file.flush()?;

        Ok(())
    }

    /// Allocate a new page on disk and return its ID.
    ///
    /// Page ids grow monotonically; deallocated ids are never reused.
    pub fn allocate_page(&self) -> Result<PageId, DiskManagerError> {
        let mut file = self.db_file.lock();

        let file_size = file.metadata()?.len();

        // First page is 1; id 0 is the invalid sentinel
        let new_page_id = (file_size / PAGE_SIZE as u64) as PageId + 1;

        // Extend the file with a new page of zeros
        file.seek(SeekFrom::End(0))?;
        let zeros = [0u8; PAGE_SIZE];
        file.write_all(&zeros)?;
        file.flush()?;

        Ok(new_page_id)
    }

    /// Release a page id back to the disk manager.
    ///
    /// Currently a no-op: the page file is never shrunk and ids are not
    /// recycled.
    pub fn deallocate_page(&self, _page_id: PageId) {}

    /// Append raw bytes to the log file.
    ///
    /// The data is synced to stable storage before this returns; the log
    /// manager relies on that for its persistent-LSN accounting.
    pub fn write_log(&self, data: &[u8]) -> Result<(), DiskManagerError> {
        if data.is_empty() {
            return Ok(());
        }

        let mut file = self.log_file.lock();
        file.seek(SeekFrom::End(0))?;
        file.write_all(data)?;
        file.sync_data()?;

        Ok(())
    }

    /// Read up to `buf.len()` bytes of the log file starting at `offset`.
    ///
    /// Returns false when `offset` is at or past the end of the log. On a
    /// short read the tail of `buf` is zeroed so stale bytes from a previous
    /// chunk can never deserialize as a record.
    pub fn read_log(&self, buf: &mut [u8], offset: u64) -> Result<bool, DiskManagerError> {
        let mut file = self.log_file.lock();

        let file_size = file.metadata()?.len();
        if offset >= file_size {
            return Ok(false);
        }

        file.seek(SeekFrom::Start(offset))?;
        let available = ((file_size - offset) as usize).min(buf.len());
        file.read_exact(&mut buf[..available])?;
        buf[available..].fill(0);

        Ok(true)
    }

    /// Current size of the log file in bytes
    pub fn log_size(&self) -> Result<u64, DiskManagerError> {
        let file = self.log_file.lock();
        Ok(file.metadata()?.len())
    }

    fn page_offset(page_id: PageId) -> u64 {
        (page_id as u64 - 1) * PAGE_SIZE as u64
    }
}
