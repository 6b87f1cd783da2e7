use std::sync::Arc;
use byteorder::{ByteOrder, LittleEndian};
use parking_lot::RwLock;

/// Page size in bytes (4KB)
pub const PAGE_SIZE: usize = 4096;

/// Page ID type
pub type PageId = u32;

/// Sentinel for "no page"; real page IDs start at 1
pub const INVALID_PAGE_ID: PageId = 0;

/// Transaction ID type
pub type TxnId = u32;

/// Buffer pool frame ID type
pub type FrameId = usize;

/// LSN (Log Sequence Number) type
pub type Lsn = u32;

/// Sentinel terminating a transaction's prev-LSN chain; real LSNs start at 1
pub const INVALID_LSN: Lsn = 0;

/// Record identifier: the page holding the tuple plus its slot index
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Rid {
    pub page_id: PageId,
    pub slot: u32,
}

impl Rid {
    /// Encoded width of a RID on disk
    pub const ENCODED_SIZE: usize = 8;

    pub fn new(page_id: PageId, slot: u32) -> Self {
        Self { page_id, slot }
    }

    pub fn to_bytes(&self) -> [u8; Self::ENCODED_SIZE] {
        let mut bytes = [0u8; Self::ENCODED_SIZE];
        LittleEndian::write_u32(&mut bytes[0..4], self.page_id);
        LittleEndian::write_u32(&mut bytes[4..8], self.slot);
        bytes
    }

    pub fn from_bytes(bytes: &[u8]) -> Self {
        Self {
            page_id: LittleEndian::read_u32(&bytes[0..4]),
            slot: LittleEndian::read_u32(&bytes[4..8]),
        }
    }
}

/// Page structure
#[derive(Debug, Clone)]
pub struct Page {
    pub data: [u8; PAGE_SIZE],
    pub page_id: PageId,
    pub lsn: Lsn,
}

impl Page {
    pub fn new(page_id: PageId) -> Self {
        Self {
            data: [0; PAGE_SIZE],
            page_id,
            lsn: INVALID_LSN,
        }
    }

    /// Zero the content and reset metadata for reuse in another frame
    pub fn reset(&mut self, page_id: PageId) {
        self.data.fill(0);
        self.page_id = page_id;
        self.lsn = INVALID_LSN;
    }
}

/// Smart pointer to a page; the RwLock doubles as the page latch
pub type PagePtr = Arc<RwLock<Page>>;

/// Buffer pool frame structure
#[derive(Debug)]
pub struct Frame {
    pub page: PagePtr,
    pub frame_id: FrameId,
    pub is_dirty: bool,
    pub pin_count: u32,
}

impl Frame {
    pub fn new(frame_id: FrameId, page: PagePtr) -> Self {
        Self {
            page,
            frame_id,
            is_dirty: false,
            pin_count: 0,
        }
    }
}

/// Smart pointer to a frame; the RwLock doubles as the frame latch
pub type FramePtr = Arc<RwLock<Frame>>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rid_roundtrip() {
        let rid = Rid::new(42, 7);
        let bytes = rid.to_bytes();
        assert_eq!(Rid::from_bytes(&bytes), rid);
    }

    #[test]
    fn test_page_reset() {
        let mut page = Page::new(3);
        page.data[100] = 0xAB;
        page.lsn = 17;
        page.reset(9);
        assert_eq!(page.page_id, 9);
        assert_eq!(page.lsn, INVALID_LSN);
        assert_eq!(page.data[100], 0);
    }
}
