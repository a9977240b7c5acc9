use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use log::debug;
use parking_lot::{Mutex, RwLock};

use crate::common::types::{FrameId, Page, PageId, PagePtr, INVALID_PAGE_ID};
use crate::storage::buffer::error::BufferPoolError;
use crate::storage::buffer::replacer::{ClockReplacer, Replacer};
use crate::storage::disk::DiskManager;
use crate::transaction::wal::log_manager::LogManager;

/// An in-memory slot holding at most one page.
///
/// Frames are owned by the buffer pool for its whole lifetime and addressed
/// by their dense index in the frame vector. The resident page id lives on
/// the frame, so reverse lookup never scans the page table.
struct Frame {
    page: PagePtr,
    page_id: PageId,
    pin_count: u32,
    is_dirty: bool,
}

impl Frame {
    fn new() -> Self {
        Self {
            page: Arc::new(RwLock::new(Page::new(INVALID_PAGE_ID))),
            page_id: INVALID_PAGE_ID,
            pin_count: 0,
            is_dirty: false,
        }
    }
}

struct PoolInner {
    frames: Vec<Frame>,
    page_table: HashMap<PageId, FrameId>,
    free_list: VecDeque<FrameId>,
    replacer: Box<dyn Replacer>,
}

/// Buffer pool manager: a fixed set of frames over the disk file.
///
/// Every public operation runs under one internal mutex covering the page
/// table, free list, replacer and frame metadata, including any disk I/O the
/// operation initiates, so operations are atomic with respect to each other.
///
/// When constructed with a log manager, no dirty page is ever written to
/// disk while its LSN exceeds the log's persistent LSN (WAL-before-write).
pub struct BufferPoolManager {
    pool_size: usize,
    inner: Mutex<PoolInner>,
    disk_manager: Arc<DiskManager>,
    log_manager: Option<Arc<LogManager>>,
}

impl BufferPoolManager {
    pub fn new(pool_size: usize, disk_manager: Arc<DiskManager>) -> Self {
        Self::build(pool_size, disk_manager, None)
    }

    /// Create a buffer pool whose dirty-page writes are fenced by the WAL
    pub fn new_with_wal(
        pool_size: usize,
        disk_manager: Arc<DiskManager>,
        log_manager: Arc<LogManager>,
    ) -> Self {
        Self::build(pool_size, disk_manager, Some(log_manager))
    }

    fn build(
        pool_size: usize,
        disk_manager: Arc<DiskManager>,
        log_manager: Option<Arc<LogManager>>,
    ) -> Self {
        let mut frames = Vec::with_capacity(pool_size);
        let mut free_list = VecDeque::with_capacity(pool_size);
        for frame_id in 0..pool_size {
            frames.push(Frame::new());
            free_list.push_back(frame_id);
        }

        Self {
            pool_size,
            inner: Mutex::new(PoolInner {
                frames,
                page_table: HashMap::new(),
                free_list,
                replacer: Box::new(ClockReplacer::new(pool_size)),
            }),
            disk_manager,
            log_manager,
        }
    }

    pub fn pool_size(&self) -> usize {
        self.pool_size
    }

    /// Fetch a page, pinning it in the buffer pool.
    ///
    /// A resident page is pinned and returned directly; otherwise a frame is
    /// taken from the free list or, failing that, from the replacer, its
    /// previous occupant is written back if dirty, and the requested page is
    /// read from disk.
    pub fn fetch_page(&self, page_id: PageId) -> Result<PagePtr, BufferPoolError> {
        if page_id == INVALID_PAGE_ID {
            return Err(BufferPoolError::InvalidOperation(
                "Cannot fetch invalid page ID".to_string(),
            ));
        }

        let mut inner = self.inner.lock();

        if let Some(&frame_id) = inner.page_table.get(&page_id) {
            inner.frames[frame_id].pin_count += 1;
            inner.replacer.pin(frame_id);
            return Ok(inner.frames[frame_id].page.clone());
        }

        let frame_id = self.acquire_frame(&mut inner)?;

        {
            let frame = &inner.frames[frame_id];
            let mut page = frame.page.write();
            self.disk_manager.read_page(page_id, &mut page)?;
        }

        let frame = &mut inner.frames[frame_id];
        frame.page_id = page_id;
        frame.pin_count = 1;
        frame.is_dirty = false;
        let page = frame.page.clone();
        inner.page_table.insert(page_id, frame_id);

        Ok(page)
    }

    /// Allocate a fresh page on disk and pin it in a zeroed frame
    pub fn new_page(&self) -> Result<(PagePtr, PageId), BufferPoolError> {
        let mut inner = self.inner.lock();

        let frame_id = self.acquire_frame(&mut inner)?;
        let page_id = self.disk_manager.allocate_page()?;

        {
            let frame = &inner.frames[frame_id];
            let mut page = frame.page.write();
            *page = Page::new(page_id);
        }

        let frame = &mut inner.frames[frame_id];
        frame.page_id = page_id;
        frame.pin_count = 1;
        frame.is_dirty = false;
        let page = frame.page.clone();
        inner.page_table.insert(page_id, frame_id);

        Ok((page, page_id))
    }

    /// Drop one pin on a page, optionally marking it dirty.
    ///
    /// The dirty bit is sticky: unpinning clean never clears it. Fails if
    /// the page is not resident or not currently pinned.
    pub fn unpin_page(&self, page_id: PageId, is_dirty: bool) -> Result<(), BufferPoolError> {
        if page_id == INVALID_PAGE_ID {
            return Err(BufferPoolError::InvalidOperation(
                "Cannot unpin invalid page ID".to_string(),
            ));
        }

        let mut inner = self.inner.lock();
        let inner = &mut *inner;

        let frame_id = match inner.page_table.get(&page_id) {
            Some(&id) => id,
            None => return Err(BufferPoolError::PageNotFound(page_id)),
        };

        let frame = &mut inner.frames[frame_id];
        if frame.pin_count == 0 {
            return Err(BufferPoolError::PageNotPinned(page_id));
        }

        frame.pin_count -= 1;
        if is_dirty {
            frame.is_dirty = true;
        }

        if frame.pin_count == 0 {
            inner.replacer.unpin(frame_id);
        }

        Ok(())
    }

    /// Write a resident page through to disk, clearing its dirty bit.
    /// Succeeds regardless of pin count.
    pub fn flush_page(&self, page_id: PageId) -> Result<(), BufferPoolError> {
        if page_id == INVALID_PAGE_ID {
            return Err(BufferPoolError::InvalidOperation(
                "Cannot flush invalid page ID".to_string(),
            ));
        }

        let mut inner = self.inner.lock();

        let frame_id = match inner.page_table.get(&page_id) {
            Some(&id) => id,
            None => return Err(BufferPoolError::PageNotFound(page_id)),
        };

        self.flush_frame(&mut inner, frame_id)
    }

    /// Flush every dirty resident page
    pub fn flush_all_pages(&self) -> Result<(), BufferPoolError> {
        let mut inner = self.inner.lock();

        let frame_ids: Vec<FrameId> = inner.page_table.values().copied().collect();
        for frame_id in frame_ids {
            self.flush_frame(&mut inner, frame_id)?;
        }

        Ok(())
    }

    /// Remove a page from the buffer pool and release its id.
    ///
    /// A page that is not resident deletes trivially; a pinned page cannot
    /// be deleted.
    pub fn delete_page(&self, page_id: PageId) -> Result<(), BufferPoolError> {
        if page_id == INVALID_PAGE_ID {
            return Err(BufferPoolError::InvalidOperation(
                "Cannot delete invalid page ID".to_string(),
            ));
        }

        let mut inner = self.inner.lock();

        let frame_id = match inner.page_table.get(&page_id) {
            Some(&id) => id,
            None => return Ok(()),
        };

        if inner.frames[frame_id].pin_count > 0 {
            return Err(BufferPoolError::PagePinned(page_id));
        }

        inner.page_table.remove(&page_id);
        inner.replacer.pin(frame_id);

        let frame = &mut inner.frames[frame_id];
        {
            let mut page = frame.page.write();
            *page = Page::new(INVALID_PAGE_ID);
        }
        frame.page_id = INVALID_PAGE_ID;
        frame.is_dirty = false;
        frame.pin_count = 0;

        inner.free_list.push_back(frame_id);
        self.disk_manager.deallocate_page(page_id);

        Ok(())
    }

    /// Current pin count of a resident page, or None if not resident
    pub fn pin_count(&self, page_id: PageId) -> Option<u32> {
        let inner = self.inner.lock();
        inner
            .page_table
            .get(&page_id)
            .map(|&frame_id| inner.frames[frame_id].pin_count)
    }

    /// Pick a frame for a new occupant: free list first, then the replacer.
    /// The previous occupant, if any, is written back when dirty and dropped
    /// from the page table. The returned frame is empty and unpinned.
    fn acquire_frame(&self, inner: &mut PoolInner) -> Result<FrameId, BufferPoolError> {
        let frame_id = if let Some(frame_id) = inner.free_list.pop_front() {
            frame_id
        } else if let Some(frame_id) = inner.replacer.victim() {
            frame_id
        } else {
            return Err(BufferPoolError::BufferPoolFull);
        };

        let old_page_id = inner.frames[frame_id].page_id;
        if old_page_id != INVALID_PAGE_ID {
            if inner.frames[frame_id].is_dirty {
                let page = inner.frames[frame_id].page.clone();
                let page_guard = page.read();
                self.wait_for_wal(&page_guard)?;
                self.disk_manager.write_page(&page_guard)?;
            }
            inner.page_table.remove(&old_page_id);
            debug!("evicted page {} from frame {}", old_page_id, frame_id);
        }

        inner.frames[frame_id].page_id = INVALID_PAGE_ID;
        inner.frames[frame_id].is_dirty = false;

        Ok(frame_id)
    }

    fn flush_frame(&self, inner: &mut PoolInner, frame_id: FrameId) -> Result<(), BufferPoolError> {
        if !inner.frames[frame_id].is_dirty {
            return Ok(());
        }

        let page = inner.frames[frame_id].page.clone();
        {
            let page_guard = page.read();
            self.wait_for_wal(&page_guard)?;
            self.disk_manager.write_page(&page_guard)?;
        }
        inner.frames[frame_id].is_dirty = false;

        Ok(())
    }

    /// WAL-before-write: the log must be durable up to the page's LSN before
    /// the page image may reach disk.
    fn wait_for_wal(&self, page: &Page) -> Result<(), BufferPoolError> {
        if let Some(log_manager) = &self.log_manager {
            if page.lsn > log_manager.persistent_lsn() {
                log_manager.flush_until(page.lsn)?;
            }
        }
        Ok(())
    }
}
