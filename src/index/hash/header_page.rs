use byteorder::{ByteOrder, LittleEndian};

use crate::common::types::{Page, PageId, PAGE_SIZE};

/// Hash table header page
///
/// Layout: `[page_id:4][block_size:4][num_blocks:4][block_page_ids:4*N]`.
/// `block_size` is the slot count per block and never changes while a
/// table is live; resize builds a fresh header instead.
pub struct HashHeaderPage;

const HEADER_SIZE: usize = 12;
const OFFSET_BLOCK_SIZE: usize = 4;
const OFFSET_NUM_BLOCKS: usize = 8;

impl HashHeaderPage {
    /// Most block page IDs a header page can hold
    pub fn max_blocks() -> usize {
        (PAGE_SIZE - HEADER_SIZE) / 4
    }

    pub fn init(page: &mut Page, page_id: PageId, block_size: usize) {
        LittleEndian::write_u32(&mut page.data[0..4], page_id);
        LittleEndian::write_u32(
            &mut page.data[OFFSET_BLOCK_SIZE..OFFSET_BLOCK_SIZE + 4],
            block_size as u32,
        );
        LittleEndian::write_u32(&mut page.data[OFFSET_NUM_BLOCKS..OFFSET_NUM_BLOCKS + 4], 0);
        page.page_id = page_id;
    }

    pub fn page_id(page: &Page) -> PageId {
        LittleEndian::read_u32(&page.data[0..4])
    }

    /// Slots per block page
    pub fn block_size(page: &Page) -> usize {
        LittleEndian::read_u32(&page.data[OFFSET_BLOCK_SIZE..OFFSET_BLOCK_SIZE + 4]) as usize
    }

    pub fn num_blocks(page: &Page) -> usize {
        LittleEndian::read_u32(&page.data[OFFSET_NUM_BLOCKS..OFFSET_NUM_BLOCKS + 4]) as usize
    }

    /// Append a block page to the directory
    pub fn add_block_page_id(page: &mut Page, block_page_id: PageId) {
        let count = Self::num_blocks(page);
        debug_assert!(count < Self::max_blocks());
        let pos = HEADER_SIZE + count * 4;
        LittleEndian::write_u32(&mut page.data[pos..pos + 4], block_page_id);
        LittleEndian::write_u32(
            &mut page.data[OFFSET_NUM_BLOCKS..OFFSET_NUM_BLOCKS + 4],
            (count + 1) as u32,
        );
    }

    pub fn block_page_id(page: &Page, index: usize) -> PageId {
        debug_assert!(index < Self::num_blocks(page));
        let pos = HEADER_SIZE + index * 4;
        LittleEndian::read_u32(&page.data[pos..pos + 4])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_and_directory() {
        let mut page = Page::new(3);
        HashHeaderPage::init(&mut page, 3, 128);

        assert_eq!(HashHeaderPage::page_id(&page), 3);
        assert_eq!(HashHeaderPage::block_size(&page), 128);
        assert_eq!(HashHeaderPage::num_blocks(&page), 0);

        HashHeaderPage::add_block_page_id(&mut page, 10);
        HashHeaderPage::add_block_page_id(&mut page, 11);
        assert_eq!(HashHeaderPage::num_blocks(&page), 2);
        assert_eq!(HashHeaderPage::block_page_id(&page, 0), 10);
        assert_eq!(HashHeaderPage::block_page_id(&page, 1), 11);
    }
}
