use byteorder::{ByteOrder, LittleEndian};

use crate::common::types::{Lsn, Page, PageId, Rid, PAGE_SIZE};
use crate::storage::page::error::PageError;

/// Slotted tuple page
///
/// Layout:
/// `[page_id:4][lsn:4][free_space_ptr:4][prev_page_id:4][next_page_id:4][tuple_count:4]`
/// followed by the slot array (8 bytes per slot: offset + length), with
/// tuple bytes filling backwards from the end of the page. The high bit of
/// a slot's length marks the tuple as deleted without releasing the slot,
/// so record IDs stay stable across a mark/rollback cycle.
pub struct TuplePage;

pub const HEADER_SIZE: usize = 24;
pub const SLOT_SIZE: usize = 8;

const OFFSET_LSN: usize = 4;
const OFFSET_FREE_SPACE: usize = 8;
const OFFSET_PREV_PAGE: usize = 12;
const OFFSET_NEXT_PAGE: usize = 16;
const OFFSET_TUPLE_COUNT: usize = 20;

/// High bit of a slot length: tuple is mark-deleted
const DELETE_MASK: u32 = 1 << 31;

impl TuplePage {
    /// Format a fresh (zeroed) page as an empty tuple page
    pub fn init(page: &mut Page, page_id: PageId, prev_page_id: PageId, lsn: Lsn) {
        LittleEndian::write_u32(&mut page.data[0..4], page_id);
        LittleEndian::write_u32(&mut page.data[OFFSET_FREE_SPACE..OFFSET_FREE_SPACE + 4], PAGE_SIZE as u32);
        LittleEndian::write_u32(&mut page.data[OFFSET_PREV_PAGE..OFFSET_PREV_PAGE + 4], prev_page_id);
        LittleEndian::write_u32(&mut page.data[OFFSET_NEXT_PAGE..OFFSET_NEXT_PAGE + 4], 0);
        LittleEndian::write_u32(&mut page.data[OFFSET_TUPLE_COUNT..OFFSET_TUPLE_COUNT + 4], 0);
        page.page_id = page_id;
        Self::set_lsn(page, lsn);
    }

    pub fn page_id(page: &Page) -> PageId {
        LittleEndian::read_u32(&page.data[0..4])
    }

    /// LSN of the last operation applied to this page, as persisted in the
    /// page bytes
    pub fn lsn(page: &Page) -> Lsn {
        LittleEndian::read_u32(&page.data[OFFSET_LSN..OFFSET_LSN + 4])
    }

    pub fn set_lsn(page: &mut Page, lsn: Lsn) {
        LittleEndian::write_u32(&mut page.data[OFFSET_LSN..OFFSET_LSN + 4], lsn);
        page.lsn = lsn;
    }

    pub fn prev_page_id(page: &Page) -> PageId {
        LittleEndian::read_u32(&page.data[OFFSET_PREV_PAGE..OFFSET_PREV_PAGE + 4])
    }

    pub fn next_page_id(page: &Page) -> PageId {
        LittleEndian::read_u32(&page.data[OFFSET_NEXT_PAGE..OFFSET_NEXT_PAGE + 4])
    }

    pub fn set_next_page_id(page: &mut Page, next: PageId) {
        LittleEndian::write_u32(&mut page.data[OFFSET_NEXT_PAGE..OFFSET_NEXT_PAGE + 4], next);
    }

    pub fn tuple_count(page: &Page) -> u32 {
        LittleEndian::read_u32(&page.data[OFFSET_TUPLE_COUNT..OFFSET_TUPLE_COUNT + 4])
    }

    fn free_space_ptr(page: &Page) -> u32 {
        LittleEndian::read_u32(&page.data[OFFSET_FREE_SPACE..OFFSET_FREE_SPACE + 4])
    }

    fn set_free_space_ptr(page: &mut Page, ptr: u32) {
        LittleEndian::write_u32(&mut page.data[OFFSET_FREE_SPACE..OFFSET_FREE_SPACE + 4], ptr);
    }

    fn set_tuple_count(page: &mut Page, count: u32) {
        LittleEndian::write_u32(&mut page.data[OFFSET_TUPLE_COUNT..OFFSET_TUPLE_COUNT + 4], count);
    }

    fn read_slot(page: &Page, slot: u32) -> (u32, u32) {
        let pos = HEADER_SIZE + slot as usize * SLOT_SIZE;
        let offset = LittleEndian::read_u32(&page.data[pos..pos + 4]);
        let length = LittleEndian::read_u32(&page.data[pos + 4..pos + 8]);
        (offset, length)
    }

    fn write_slot(page: &mut Page, slot: u32, offset: u32, length: u32) {
        let pos = HEADER_SIZE + slot as usize * SLOT_SIZE;
        LittleEndian::write_u32(&mut page.data[pos..pos + 4], offset);
        LittleEndian::write_u32(&mut page.data[pos + 4..pos + 8], length);
    }

    /// Append a tuple to the page, returning its record ID
    pub fn insert_tuple(page: &mut Page, data: &[u8], lsn: Lsn) -> Result<Rid, PageError> {
        let count = Self::tuple_count(page);
        let fsp = Self::free_space_ptr(page) as usize;

        // The new slot entry and the tuple bytes must both fit
        let slot_end = HEADER_SIZE + (count as usize + 1) * SLOT_SIZE;
        if fsp < slot_end + data.len() {
            return Err(PageError::InsufficientSpace);
        }

        let offset = (fsp - data.len()) as u32;
        page.data[offset as usize..fsp].copy_from_slice(data);
        Self::write_slot(page, count, offset, data.len() as u32);
        Self::set_free_space_ptr(page, offset);
        Self::set_tuple_count(page, count + 1);
        Self::set_lsn(page, lsn);

        Ok(Rid::new(Self::page_id(page), count))
    }

    /// Place a tuple at a specific record ID
    ///
    /// Used by recovery to re-apply an insert at its original slot, or to
    /// reverse an apply-delete. The slot must be the next free one or an
    /// existing empty slot.
    pub fn insert_tuple_at(page: &mut Page, rid: Rid, data: &[u8], lsn: Lsn) -> Result<(), PageError> {
        let count = Self::tuple_count(page);
        if rid.slot == count {
            Self::insert_tuple(page, data, lsn)?;
            return Ok(());
        }
        if rid.slot > count {
            return Err(PageError::InvalidSlot(rid.slot));
        }

        let (_, raw_len) = Self::read_slot(page, rid.slot);
        if raw_len != 0 {
            return Err(PageError::SlotOccupied(rid.slot));
        }

        let fsp = Self::free_space_ptr(page) as usize;
        let slot_end = HEADER_SIZE + count as usize * SLOT_SIZE;
        if fsp < slot_end + data.len() {
            return Err(PageError::InsufficientSpace);
        }

        let offset = (fsp - data.len()) as u32;
        page.data[offset as usize..fsp].copy_from_slice(data);
        Self::write_slot(page, rid.slot, offset, data.len() as u32);
        Self::set_free_space_ptr(page, offset);
        Self::set_lsn(page, lsn);

        Ok(())
    }

    /// Flag a tuple as deleted while keeping its slot and bytes
    pub fn mark_delete(page: &mut Page, slot: u32, lsn: Lsn) -> Result<(), PageError> {
        let count = Self::tuple_count(page);
        if slot >= count {
            return Err(PageError::InvalidSlot(slot));
        }

        let (offset, raw_len) = Self::read_slot(page, slot);
        if raw_len & !DELETE_MASK == 0 {
            return Err(PageError::TupleNotFound);
        }

        Self::write_slot(page, slot, offset, raw_len | DELETE_MASK);
        Self::set_lsn(page, lsn);
        Ok(())
    }

    /// Clear a delete mark set by `mark_delete`
    pub fn rollback_delete(page: &mut Page, slot: u32, lsn: Lsn) -> Result<(), PageError> {
        let count = Self::tuple_count(page);
        if slot >= count {
            return Err(PageError::InvalidSlot(slot));
        }

        let (offset, raw_len) = Self::read_slot(page, slot);
        if raw_len & !DELETE_MASK == 0 {
            return Err(PageError::TupleNotFound);
        }

        Self::write_slot(page, slot, offset, raw_len & !DELETE_MASK);
        Self::set_lsn(page, lsn);
        Ok(())
    }

    /// Physically remove a tuple, leaving an empty slot
    ///
    /// The tuple bytes become dead space; they are reclaimed only when the
    /// page is rebuilt. The slot stays so later record IDs keep their
    /// positions.
    pub fn apply_delete(page: &mut Page, slot: u32, lsn: Lsn) -> Result<(), PageError> {
        let count = Self::tuple_count(page);
        if slot >= count {
            return Err(PageError::InvalidSlot(slot));
        }

        let (_, raw_len) = Self::read_slot(page, slot);
        if raw_len & !DELETE_MASK == 0 {
            return Err(PageError::TupleNotFound);
        }

        Self::write_slot(page, slot, 0, 0);
        Self::set_lsn(page, lsn);
        Ok(())
    }

    /// Overwrite a tuple in place, relocating it if it grew
    pub fn update_tuple(page: &mut Page, slot: u32, data: &[u8], lsn: Lsn) -> Result<(), PageError> {
        let count = Self::tuple_count(page);
        if slot >= count {
            return Err(PageError::InvalidSlot(slot));
        }

        let (offset, raw_len) = Self::read_slot(page, slot);
        if raw_len == 0 || raw_len & DELETE_MASK != 0 {
            return Err(PageError::TupleNotFound);
        }
        let length = raw_len as usize;

        if data.len() <= length {
            page.data[offset as usize..offset as usize + data.len()].copy_from_slice(data);
            Self::write_slot(page, slot, offset, data.len() as u32);
        } else {
            // Grew: relocate to fresh free space, the old bytes go dead
            let fsp = Self::free_space_ptr(page) as usize;
            let slot_end = HEADER_SIZE + count as usize * SLOT_SIZE;
            if fsp < slot_end + data.len() {
                return Err(PageError::InsufficientSpace);
            }

            let new_offset = (fsp - data.len()) as u32;
            page.data[new_offset as usize..fsp].copy_from_slice(data);
            Self::write_slot(page, slot, new_offset, data.len() as u32);
            Self::set_free_space_ptr(page, new_offset);
        }

        Self::set_lsn(page, lsn);
        Ok(())
    }

    /// Read a live tuple's bytes
    ///
    /// Mark-deleted and applied-deleted tuples both report `TupleNotFound`.
    pub fn get_tuple(page: &Page, slot: u32) -> Result<Vec<u8>, PageError> {
        let count = Self::tuple_count(page);
        if slot >= count {
            return Err(PageError::InvalidSlot(slot));
        }

        let (offset, raw_len) = Self::read_slot(page, slot);
        if raw_len == 0 || raw_len & DELETE_MASK != 0 {
            return Err(PageError::TupleNotFound);
        }

        let start = offset as usize;
        let end = start + raw_len as usize;
        Ok(page.data[start..end].to_vec())
    }
}
