use byteorder::{ByteOrder, LittleEndian};

use crate::common::types::{Lsn, Page, PageId, PAGE_SIZE};
use crate::storage::page::error::PageError;

/// Scratchpad page for intermediate tuples (hash-join build side)
///
/// Layout: `[page_id:4][lsn:4][free_space_ptr:4][... free ...][len|bytes] ...`
/// with entries filling backwards from the end. The free space pointer
/// counts the bytes remaining between the header and the lowest entry.
pub struct TmpTuplePage;

const HEADER_SIZE: usize = 12;
const OFFSET_LSN: usize = 4;
const OFFSET_FREE_SPACE: usize = 8;
const SIZE_PREFIX: usize = 4;

impl TmpTuplePage {
    pub fn init(page: &mut Page, page_id: PageId) {
        LittleEndian::write_u32(&mut page.data[0..4], page_id);
        LittleEndian::write_u32(
            &mut page.data[OFFSET_FREE_SPACE..OFFSET_FREE_SPACE + 4],
            (PAGE_SIZE - HEADER_SIZE) as u32,
        );
        page.page_id = page_id;
    }

    pub fn page_id(page: &Page) -> PageId {
        LittleEndian::read_u32(&page.data[0..4])
    }

    pub fn lsn(page: &Page) -> Lsn {
        LittleEndian::read_u32(&page.data[OFFSET_LSN..OFFSET_LSN + 4])
    }

    pub fn free_space(page: &Page) -> u32 {
        LittleEndian::read_u32(&page.data[OFFSET_FREE_SPACE..OFFSET_FREE_SPACE + 4])
    }

    fn set_free_space(page: &mut Page, remaining: u32) {
        LittleEndian::write_u32(
            &mut page.data[OFFSET_FREE_SPACE..OFFSET_FREE_SPACE + 4],
            remaining,
        );
    }

    /// Stash tuple bytes, returning the in-page offset of the entry
    pub fn insert(page: &mut Page, data: &[u8]) -> Result<u32, PageError> {
        let remaining = Self::free_space(page) as usize;
        if remaining < data.len() + SIZE_PREFIX {
            return Err(PageError::InsufficientSpace);
        }

        let new_remaining = remaining - data.len() - SIZE_PREFIX;
        Self::set_free_space(page, new_remaining as u32);

        let offset = HEADER_SIZE + new_remaining;
        LittleEndian::write_u32(&mut page.data[offset..offset + 4], data.len() as u32);
        page.data[offset + SIZE_PREFIX..offset + SIZE_PREFIX + data.len()].copy_from_slice(data);

        Ok(offset as u32)
    }

    /// Read back the entry stashed at `offset`
    pub fn get(page: &Page, offset: u32) -> Result<Vec<u8>, PageError> {
        let offset = offset as usize;
        if offset < HEADER_SIZE || offset + SIZE_PREFIX > PAGE_SIZE {
            return Err(PageError::TupleNotFound);
        }

        let len = LittleEndian::read_u32(&page.data[offset..offset + 4]) as usize;
        let start = offset + SIZE_PREFIX;
        if start + len > PAGE_SIZE {
            return Err(PageError::TupleNotFound);
        }

        Ok(page.data[start..start + len].to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_get_roundtrip() {
        let mut page = Page::new(7);
        TmpTuplePage::init(&mut page, 7);
        assert_eq!(TmpTuplePage::page_id(&page), 7);

        let off_a = TmpTuplePage::insert(&mut page, b"join probe").unwrap();
        let off_b = TmpTuplePage::insert(&mut page, b"build side").unwrap();
        assert!(off_b < off_a);

        assert_eq!(TmpTuplePage::get(&page, off_a).unwrap(), b"join probe");
        assert_eq!(TmpTuplePage::get(&page, off_b).unwrap(), b"build side");
    }

    #[test]
    fn test_insert_fails_when_full() {
        let mut page = Page::new(7);
        TmpTuplePage::init(&mut page, 7);

        let big = vec![1u8; PAGE_SIZE - HEADER_SIZE - SIZE_PREFIX];
        TmpTuplePage::insert(&mut page, &big).unwrap();
        assert!(matches!(
            TmpTuplePage::insert(&mut page, b"x"),
            Err(PageError::InsufficientSpace)
        ));
    }
}
