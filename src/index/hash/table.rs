use std::hash::{Hash, Hasher};
use std::marker::PhantomData;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use log::debug;
use xxhash_rust::xxh3::Xxh3;

use crate::common::rwlatch::ReaderWriterLatch;
use crate::common::types::PageId;
use crate::index::hash::block_page::{block_slot_count, HashBlockPage, HashBlockPageMut};
use crate::index::hash::encoding::FixedSlot;
use crate::index::hash::error::HashIndexError;
use crate::index::hash::header_page::{
    hash_header_max_blocks, HashHeaderPage, HashHeaderPageMut,
};
use crate::storage::buffer::BufferPoolManager;
use crate::transaction::Transaction;

enum InsertOutcome {
    Inserted,
    Duplicate,
    TableFull,
}

/// Disk-resident hash index with linear probing, layered on buffer-pool
/// pages.
///
/// A header page lists the block pages; a key hashes to a logical slot in
/// `[0, size)` and probing advances one slot at a time, crossing block
/// boundaries but never wrapping past the logical end. Running off the end
/// during an insert doubles the table instead.
///
/// Operations are serialized by a writer-preferring latch: lookups share a
/// read latch, mutations take the write latch. Resize from within an insert
/// reuses the already-held latch via `resize_locked`.
pub struct LinearProbeHashTable<K, V> {
    buffer_pool: Arc<BufferPoolManager>,
    header_page_id: PageId,
    slots_per_page: usize,
    size: AtomicUsize,
    latch: ReaderWriterLatch,
    _marker: PhantomData<(K, V)>,
}

impl<K, V> LinearProbeHashTable<K, V>
where
    K: FixedSlot + Hash,
    V: FixedSlot,
{
    /// Create a new hash table with at least `num_buckets` logical slots
    pub fn new(
        buffer_pool: Arc<BufferPoolManager>,
        num_buckets: usize,
    ) -> Result<Self, HashIndexError> {
        let num_buckets = num_buckets.max(1);
        let slots_per_page = block_slot_count::<K, V>();

        let (header, header_page_id) = buffer_pool.new_page()?;
        {
            let mut guard = header.write();
            let mut view = HashHeaderPageMut::new(&mut guard.data);
            view.set_size(num_buckets);
        }
        buffer_pool.unpin_page(header_page_id, true)?;

        let table = Self {
            buffer_pool,
            header_page_id,
            slots_per_page,
            size: AtomicUsize::new(num_buckets),
            latch: ReaderWriterLatch::new(),
            _marker: PhantomData,
        };
        table.ensure_capacity(num_buckets)?;

        Ok(table)
    }

    /// Page id of the header page
    pub fn header_page_id(&self) -> PageId {
        self.header_page_id
    }

    /// Current logical slot count
    pub fn size(&self) -> usize {
        self.size.load(Ordering::Acquire)
    }

    /// Collect every value stored under `key`.
    ///
    /// Probing walks from the key's home slot while slots are occupied and
    /// stops at the first never-used slot or the logical end of the table.
    pub fn get_value(
        &self,
        _txn: Option<&Transaction>,
        key: &K,
    ) -> Result<Vec<V>, HashIndexError> {
        let _guard = self.latch.read();

        let size = self.size();
        let blocks = self.block_ids()?;
        let mut result = Vec::new();

        let mut index = self.home_slot(key, size);
        let mut block_idx = index / self.slots_per_page;
        let mut slot = index % self.slots_per_page;

        while index < size && block_idx < blocks.len() {
            let block_page_id = blocks[block_idx];
            let page = self.buffer_pool.fetch_page(block_page_id)?;
            let mut hit_free_slot = false;
            {
                let guard = page.read();
                let view = HashBlockPage::<K, V>::new(&guard.data);
                while slot < self.slots_per_page && index < size {
                    if !view.is_occupied(slot) {
                        hit_free_slot = true;
                        break;
                    }
                    if view.is_readable(slot) && view.key_at(slot) == *key {
                        result.push(view.value_at(slot));
                    }
                    slot += 1;
                    index += 1;
                }
            }
            self.buffer_pool.unpin_page(block_page_id, false)?;

            if hit_free_slot {
                break;
            }
            block_idx += 1;
            slot = 0;
        }

        Ok(result)
    }

    /// Insert `(key, value)`.
    ///
    /// Returns false if the exact pair is already present, or if growing
    /// the table would exceed the header page's block capacity.
    pub fn insert(
        &self,
        _txn: Option<&Transaction>,
        key: &K,
        value: &V,
    ) -> Result<bool, HashIndexError> {
        let _guard = self.latch.write();

        loop {
            match self.try_insert(key, value)? {
                InsertOutcome::Inserted => return Ok(true),
                InsertOutcome::Duplicate => return Ok(false),
                InsertOutcome::TableFull => {
                    let doubled = self.size() * 2;
                    debug!("hash table full, resizing to {}", doubled);
                    match self.resize_locked(doubled) {
                        Ok(()) => continue,
                        Err(HashIndexError::BlockLimitReached) => return Ok(false),
                        Err(e) => return Err(e),
                    }
                }
            }
        }
    }

    /// Remove the exact `(key, value)` pair.
    ///
    /// The slot is tombstoned: readable is cleared, occupied stays set so
    /// longer probe chains keep working. Returns false if the pair is not
    /// present.
    pub fn remove(
        &self,
        _txn: Option<&Transaction>,
        key: &K,
        value: &V,
    ) -> Result<bool, HashIndexError> {
        let _guard = self.latch.write();

        let size = self.size();
        let blocks = self.block_ids()?;

        let mut index = self.home_slot(key, size);
        let mut block_idx = index / self.slots_per_page;
        let mut slot = index % self.slots_per_page;

        while index < size && block_idx < blocks.len() {
            let block_page_id = blocks[block_idx];
            let page = self.buffer_pool.fetch_page(block_page_id)?;
            let mut removed = false;
            let mut hit_free_slot = false;
            {
                let mut guard = page.write();
                let mut view = HashBlockPageMut::<K, V>::new(&mut guard.data);
                while slot < self.slots_per_page && index < size {
                    if !view.is_occupied(slot) {
                        hit_free_slot = true;
                        break;
                    }
                    if view.is_readable(slot)
                        && view.key_at(slot) == *key
                        && view.value_at(slot) == *value
                    {
                        view.remove(slot);
                        removed = true;
                        break;
                    }
                    slot += 1;
                    index += 1;
                }
            }
            self.buffer_pool.unpin_page(block_page_id, removed)?;

            if removed {
                return Ok(true);
            }
            if hit_free_slot {
                break;
            }
            block_idx += 1;
            slot = 0;
        }

        Ok(false)
    }

    /// Grow the table to `new_size` slots and rehash every live entry
    pub fn resize(&self, new_size: usize) -> Result<(), HashIndexError> {
        let _guard = self.latch.write();
        self.resize_locked(new_size)
    }

    /// Resize body; requires the write latch to already be held.
    ///
    /// Every live entry in the old range is tombstoned in place and placed
    /// again under the new size. Should a placement run off the logical end
    /// (possible when a dense cluster reaches the last slot), the table
    /// doubles again and the pass restarts, carrying the displaced entry.
    fn resize_locked(&self, new_size: usize) -> Result<(), HashIndexError> {
        let mut target = new_size;
        let mut pending: Option<(K, V)> = None;

        loop {
            self.ensure_capacity(target)?;
            self.set_size(target)?;
            let blocks = self.block_ids()?;

            if let Some((key, value)) = pending.take() {
                if !self.place(&blocks, &key, &value, target)? {
                    pending = Some((key, value));
                    target *= 2;
                    continue;
                }
            }

            match self.rehash_pass(&blocks, target)? {
                None => break,
                Some(displaced) => {
                    pending = Some(displaced);
                    target *= 2;
                }
            }
        }

        Ok(())
    }

    /// One sweep over all slots, re-placing every live entry under `size`.
    /// Returns a displaced entry if one could not be placed.
    fn rehash_pass(
        &self,
        blocks: &[PageId],
        size: usize,
    ) -> Result<Option<(K, V)>, HashIndexError> {
        for index in 0..size {
            let block_page_id = blocks[index / self.slots_per_page];
            let slot = index % self.slots_per_page;

            let page = self.buffer_pool.fetch_page(block_page_id)?;
            let entry = {
                let mut guard = page.write();
                let mut view = HashBlockPageMut::<K, V>::new(&mut guard.data);
                if view.is_readable(slot) {
                    let entry = (view.key_at(slot), view.value_at(slot));
                    view.remove(slot);
                    Some(entry)
                } else {
                    None
                }
            };
            self.buffer_pool.unpin_page(block_page_id, entry.is_some())?;

            if let Some((key, value)) = entry {
                if !self.place(blocks, &key, &value, size)? {
                    return Ok(Some((key, value)));
                }
            }
        }

        Ok(None)
    }

    /// Place an entry at the first non-readable slot along its probe chain.
    /// Returns false if the chain runs off the logical end.
    fn place(
        &self,
        blocks: &[PageId],
        key: &K,
        value: &V,
        size: usize,
    ) -> Result<bool, HashIndexError> {
        let mut index = self.home_slot(key, size);
        let mut block_idx = index / self.slots_per_page;
        let mut slot = index % self.slots_per_page;

        while index < size && block_idx < blocks.len() {
            let block_page_id = blocks[block_idx];
            let page = self.buffer_pool.fetch_page(block_page_id)?;
            let mut placed = false;
            {
                let mut guard = page.write();
                let mut view = HashBlockPageMut::<K, V>::new(&mut guard.data);
                while slot < self.slots_per_page && index < size {
                    if view.insert(slot, key, value) {
                        placed = true;
                        break;
                    }
                    slot += 1;
                    index += 1;
                }
            }
            self.buffer_pool.unpin_page(block_page_id, placed)?;

            if placed {
                return Ok(true);
            }
            block_idx += 1;
            slot = 0;
        }

        Ok(false)
    }

    /// Probe for a free slot, watching for an existing duplicate on the way
    fn try_insert(&self, key: &K, value: &V) -> Result<InsertOutcome, HashIndexError> {
        let size = self.size();
        let blocks = self.block_ids()?;

        let mut index = self.home_slot(key, size);
        let mut block_idx = index / self.slots_per_page;
        let mut slot = index % self.slots_per_page;

        while index < size && block_idx < blocks.len() {
            let block_page_id = blocks[block_idx];
            let page = self.buffer_pool.fetch_page(block_page_id)?;
            let mut outcome = None;
            {
                let mut guard = page.write();
                let mut view = HashBlockPageMut::<K, V>::new(&mut guard.data);
                while slot < self.slots_per_page && index < size {
                    if view.is_readable(slot) {
                        if view.key_at(slot) == *key && view.value_at(slot) == *value {
                            outcome = Some((InsertOutcome::Duplicate, false));
                            break;
                        }
                        slot += 1;
                        index += 1;
                    } else {
                        view.insert(slot, key, value);
                        outcome = Some((InsertOutcome::Inserted, true));
                        break;
                    }
                }
            }

            match outcome {
                Some((result, dirty)) => {
                    self.buffer_pool.unpin_page(block_page_id, dirty)?;
                    return Ok(result);
                }
                None => {
                    self.buffer_pool.unpin_page(block_page_id, false)?;
                    block_idx += 1;
                    slot = 0;
                }
            }
        }

        Ok(InsertOutcome::TableFull)
    }

    /// Make sure enough block pages exist to back `size` logical slots
    fn ensure_capacity(&self, size: usize) -> Result<(), HashIndexError> {
        let needed = (size + self.slots_per_page - 1) / self.slots_per_page;
        if needed > hash_header_max_blocks() {
            return Err(HashIndexError::BlockLimitReached);
        }

        let header = self.buffer_pool.fetch_page(self.header_page_id)?;
        let current = {
            let guard = header.read();
            HashHeaderPage::new(&guard.data).num_blocks()
        };

        let mut added = false;
        for _ in current..needed {
            let (_, block_page_id) = self.buffer_pool.new_page()?;
            self.buffer_pool.unpin_page(block_page_id, true)?;

            let mut guard = header.write();
            let mut view = HashHeaderPageMut::new(&mut guard.data);
            view.add_block_page_id(block_page_id);
            added = true;
        }
        self.buffer_pool.unpin_page(self.header_page_id, added)?;

        Ok(())
    }

    /// Record the new logical size in the header page and in memory
    fn set_size(&self, size: usize) -> Result<(), HashIndexError> {
        let header = self.buffer_pool.fetch_page(self.header_page_id)?;
        {
            let mut guard = header.write();
            HashHeaderPageMut::new(&mut guard.data).set_size(size);
        }
        self.buffer_pool.unpin_page(self.header_page_id, true)?;
        self.size.store(size, Ordering::Release);
        Ok(())
    }

    /// Snapshot the ordered block page ids from the header
    fn block_ids(&self) -> Result<Vec<PageId>, HashIndexError> {
        let header = self.buffer_pool.fetch_page(self.header_page_id)?;
        let ids = {
            let guard = header.read();
            let view = HashHeaderPage::new(&guard.data);
            (0..view.num_blocks()).map(|i| view.block_page_id(i)).collect()
        };
        self.buffer_pool.unpin_page(self.header_page_id, false)?;
        Ok(ids)
    }

    fn home_slot(&self, key: &K, size: usize) -> usize {
        let mut hasher = Xxh3::new();
        key.hash(&mut hasher);
        (hasher.finish() % size as u64) as usize
    }
}
