use byteorder::{ByteOrder, LittleEndian};

use crate::common::types::{Lsn, Page, PageId, INVALID_PAGE_ID, PAGE_SIZE};
use crate::storage::page::error::PageError;
use crate::storage::page::tuple::Tuple;

// Header layout:
// | lsn (8) | prev_page_id (4) | next_page_id (4) | free_upper (4) | slot_count (4) |
const LSN_OFFSET: usize = 0;
const PREV_PAGE_OFFSET: usize = 8;
const NEXT_PAGE_OFFSET: usize = 12;
const FREE_UPPER_OFFSET: usize = 16;
const SLOT_COUNT_OFFSET: usize = 20;
const HEADER_SIZE: usize = 24;

// Slot directory entry: | offset (4) | length (4) |
const SLOT_SIZE: usize = 8;

// High bit of the slot length marks a tuple as delete-pending
const DELETE_MASK: u32 = 1 << 31;

/// Slotted tuple page.
///
/// The slot directory grows up from the header; tuple bytes grow down from
/// the end of the page. A deleted slot keeps its directory entry (offset and
/// length zero) so slot numbers stay stable, which recovery depends on when
/// it re-applies operations at a recorded RID.
///
/// `free_upper` can never legally reach zero, so an all-zero page reads as
/// uninitialized and is initialized lazily on first use.
pub struct TablePage<'a> {
    page: &'a mut Page,
}

impl<'a> TablePage<'a> {
    pub fn new(page: &'a mut Page) -> Self {
        let mut table_page = Self { page };
        if table_page.free_upper() == 0 {
            table_page.init(INVALID_PAGE_ID);
        }
        table_page
    }

    /// Reset the page to an empty table page
    pub fn init(&mut self, prev_page_id: PageId) {
        self.write_u64(LSN_OFFSET, 0);
        self.write_u32(PREV_PAGE_OFFSET, prev_page_id);
        self.write_u32(NEXT_PAGE_OFFSET, INVALID_PAGE_ID);
        self.write_u32(FREE_UPPER_OFFSET, PAGE_SIZE as u32);
        self.write_u32(SLOT_COUNT_OFFSET, 0);
        self.page.lsn = 0;
    }

    pub fn lsn(&self) -> Lsn {
        LittleEndian::read_u64(&self.page.data[LSN_OFFSET..LSN_OFFSET + 8])
    }

    /// Stamp the page with the LSN of the record whose effect it now embeds.
    /// The in-memory mirror on `Page` is kept in sync for eviction checks.
    pub fn set_lsn(&mut self, lsn: Lsn) {
        self.write_u64(LSN_OFFSET, lsn);
        self.page.lsn = lsn;
    }

    pub fn prev_page_id(&self) -> PageId {
        self.read_u32(PREV_PAGE_OFFSET)
    }

    pub fn next_page_id(&self) -> PageId {
        self.read_u32(NEXT_PAGE_OFFSET)
    }

    pub fn set_prev_page_id(&mut self, page_id: PageId) {
        self.write_u32(PREV_PAGE_OFFSET, page_id);
    }

    pub fn set_next_page_id(&mut self, page_id: PageId) {
        self.write_u32(NEXT_PAGE_OFFSET, page_id);
    }

    pub fn slot_count(&self) -> u32 {
        self.read_u32(SLOT_COUNT_OFFSET)
    }

    /// Insert a tuple at the given slot.
    ///
    /// The slot directory is extended as needed; intervening slots stay
    /// empty. Fails if the slot already holds a tuple or space runs out.
    pub fn insert_tuple_at(&mut self, slot: u32, tuple: &Tuple) -> Result<(), PageError> {
        let (_, len) = self.slot_entry(slot);
        if len != 0 {
            return Err(PageError::SlotOccupied(slot));
        }

        let new_slot_count = self.slot_count().max(slot + 1);
        let dir_end = HEADER_SIZE + SLOT_SIZE * new_slot_count as usize;
        let free_upper = self.free_upper() as usize;
        if free_upper < dir_end + tuple.len() {
            return Err(PageError::InsufficientSpace);
        }

        let offset = free_upper - tuple.len();
        self.page.data[offset..offset + tuple.len()].copy_from_slice(&tuple.data);
        self.write_u32(FREE_UPPER_OFFSET, offset as u32);
        self.write_u32(SLOT_COUNT_OFFSET, new_slot_count);
        self.set_slot_entry(slot, offset as u32, tuple.len() as u32);

        Ok(())
    }

    /// Replace the tuple at `slot`, returning the previous image.
    ///
    /// A shrinking update is done in place; a growing update takes fresh
    /// space from the free region and leaks the old bytes until the page is
    /// rebuilt.
    pub fn update_tuple(&mut self, slot: u32, tuple: &Tuple) -> Result<Tuple, PageError> {
        let (offset, raw_len) = self.slot_entry(slot);
        if raw_len == 0 || raw_len & DELETE_MASK != 0 {
            return Err(PageError::TupleNotFound(slot));
        }

        let old_len = raw_len as usize;
        let old = Tuple::new(self.page.data[offset as usize..offset as usize + old_len].to_vec());

        if tuple.len() <= old_len {
            let start = offset as usize;
            self.page.data[start..start + tuple.len()].copy_from_slice(&tuple.data);
            self.set_slot_entry(slot, offset, tuple.len() as u32);
        } else {
            let dir_end = HEADER_SIZE + SLOT_SIZE * self.slot_count() as usize;
            let free_upper = self.free_upper() as usize;
            if free_upper < dir_end + tuple.len() {
                return Err(PageError::InsufficientSpace);
            }
            let new_offset = free_upper - tuple.len();
            self.page.data[new_offset..new_offset + tuple.len()].copy_from_slice(&tuple.data);
            self.write_u32(FREE_UPPER_OFFSET, new_offset as u32);
            self.set_slot_entry(slot, new_offset as u32, tuple.len() as u32);
        }

        Ok(old)
    }

    /// Mark the tuple at `slot` as delete-pending without removing it
    pub fn mark_delete(&mut self, slot: u32) -> Result<(), PageError> {
        let (offset, raw_len) = self.slot_entry(slot);
        if raw_len == 0 {
            return Err(PageError::TupleNotFound(slot));
        }
        self.set_slot_entry(slot, offset, raw_len | DELETE_MASK);
        Ok(())
    }

    /// Clear a pending delete mark set by `mark_delete`
    pub fn rollback_delete(&mut self, slot: u32) -> Result<(), PageError> {
        let (offset, raw_len) = self.slot_entry(slot);
        if raw_len == 0 {
            return Err(PageError::TupleNotFound(slot));
        }
        self.set_slot_entry(slot, offset, raw_len & !DELETE_MASK);
        Ok(())
    }

    /// Physically remove the tuple at `slot`.
    ///
    /// The slot entry is zeroed; the tuple bytes are leaked until the page
    /// is rebuilt.
    pub fn apply_delete(&mut self, slot: u32) -> Result<(), PageError> {
        let (_, raw_len) = self.slot_entry(slot);
        if raw_len == 0 {
            return Err(PageError::TupleNotFound(slot));
        }
        self.set_slot_entry(slot, 0, 0);
        Ok(())
    }

    /// Get the live tuple at `slot`, if any.
    ///
    /// Empty and delete-pending slots return None.
    pub fn tuple_at(&self, slot: u32) -> Option<Tuple> {
        if slot >= self.slot_count() {
            return None;
        }
        let (offset, raw_len) = self.slot_entry(slot);
        if raw_len == 0 || raw_len & DELETE_MASK != 0 {
            return None;
        }
        let start = offset as usize;
        Some(Tuple::new(self.page.data[start..start + raw_len as usize].to_vec()))
    }

    fn free_upper(&self) -> u32 {
        self.read_u32(FREE_UPPER_OFFSET)
    }

    fn slot_entry(&self, slot: u32) -> (u32, u32) {
        if slot >= self.slot_count() {
            return (0, 0);
        }
        let pos = HEADER_SIZE + SLOT_SIZE * slot as usize;
        let offset = LittleEndian::read_u32(&self.page.data[pos..pos + 4]);
        let len = LittleEndian::read_u32(&self.page.data[pos + 4..pos + 8]);
        (offset, len)
    }

    fn set_slot_entry(&mut self, slot: u32, offset: u32, len: u32) {
        let pos = HEADER_SIZE + SLOT_SIZE * slot as usize;
        LittleEndian::write_u32(&mut self.page.data[pos..pos + 4], offset);
        LittleEndian::write_u32(&mut self.page.data[pos + 4..pos + 8], len);
    }

    fn read_u32(&self, offset: usize) -> u32 {
        LittleEndian::read_u32(&self.page.data[offset..offset + 4])
    }

    fn write_u32(&mut self, offset: usize, value: u32) {
        LittleEndian::write_u32(&mut self.page.data[offset..offset + 4], value);
    }

    fn write_u64(&mut self, offset: usize, value: u64) {
        LittleEndian::write_u64(&mut self.page.data[offset..offset + 8], value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tuple(bytes: &[u8]) -> Tuple {
        Tuple::new(bytes.to_vec())
    }

    #[test]
    fn test_zeroed_page_initializes() {
        let mut page = Page::new(1);
        let table_page = TablePage::new(&mut page);
        assert_eq!(table_page.slot_count(), 0);
        assert_eq!(table_page.next_page_id(), INVALID_PAGE_ID);
        assert_eq!(table_page.lsn(), 0);
    }

    #[test]
    fn test_insert_and_read() {
        let mut page = Page::new(1);
        let mut table_page = TablePage::new(&mut page);

        table_page.insert_tuple_at(0, &tuple(b"first")).unwrap();
        table_page.insert_tuple_at(3, &tuple(b"fourth")).unwrap();

        assert_eq!(table_page.tuple_at(0).unwrap().data, b"first");
        assert!(table_page.tuple_at(1).is_none());
        assert_eq!(table_page.tuple_at(3).unwrap().data, b"fourth");
        assert_eq!(table_page.slot_count(), 4);
    }

    #[test]
    fn test_insert_occupied_slot_fails() {
        let mut page = Page::new(1);
        let mut table_page = TablePage::new(&mut page);

        table_page.insert_tuple_at(0, &tuple(b"a")).unwrap();
        assert!(matches!(
            table_page.insert_tuple_at(0, &tuple(b"b")),
            Err(PageError::SlotOccupied(0))
        ));
    }

    #[test]
    fn test_update_returns_old_image() {
        let mut page = Page::new(1);
        let mut table_page = TablePage::new(&mut page);

        table_page.insert_tuple_at(0, &tuple(b"before")).unwrap();
        let old = table_page.update_tuple(0, &tuple(b"af")).unwrap();
        assert_eq!(old.data, b"before");
        assert_eq!(table_page.tuple_at(0).unwrap().data, b"af");

        // Growing update relocates the tuple
        let old = table_page.update_tuple(0, &tuple(b"much longer tuple")).unwrap();
        assert_eq!(old.data, b"af");
        assert_eq!(table_page.tuple_at(0).unwrap().data, b"much longer tuple");
    }

    #[test]
    fn test_delete_lifecycle() {
        let mut page = Page::new(1);
        let mut table_page = TablePage::new(&mut page);

        table_page.insert_tuple_at(0, &tuple(b"doomed")).unwrap();

        table_page.mark_delete(0).unwrap();
        assert!(table_page.tuple_at(0).is_none());

        table_page.rollback_delete(0).unwrap();
        assert_eq!(table_page.tuple_at(0).unwrap().data, b"doomed");

        table_page.mark_delete(0).unwrap();
        table_page.apply_delete(0).unwrap();
        assert!(table_page.tuple_at(0).is_none());
        assert!(matches!(
            table_page.rollback_delete(0),
            Err(PageError::TupleNotFound(0))
        ));

        // The slot is reusable after a physical delete
        table_page.insert_tuple_at(0, &tuple(b"reborn")).unwrap();
        assert_eq!(table_page.tuple_at(0).unwrap().data, b"reborn");
    }

    #[test]
    fn test_insufficient_space() {
        let mut page = Page::new(1);
        let mut table_page = TablePage::new(&mut page);

        let big = Tuple::new(vec![0xAB; PAGE_SIZE]);
        assert!(matches!(
            table_page.insert_tuple_at(0, &big),
            Err(PageError::InsufficientSpace)
        ));
    }

    #[test]
    fn test_lsn_stamp_updates_mirror() {
        let mut page = Page::new(1);
        {
            let mut table_page = TablePage::new(&mut page);
            table_page.set_lsn(17);
            assert_eq!(table_page.lsn(), 17);
        }
        assert_eq!(page.lsn, 17);
    }
}
