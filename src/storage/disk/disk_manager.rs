use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
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

/// DiskManager is responsible for the actual file I/O: page reads and
/// writes against the database file, and sequential log reads and appends
/// against the log file
pub struct DiskManager {
    db_file: Mutex<File>,
    log_file: Mutex<File>,
}

impl DiskManager {
    /// Create a new DiskManager over the given database and log files
    pub fn new(
        db_path: impl AsRef<Path>,
        log_path: impl AsRef<Path>,
    ) -> Result<Self, DiskManagerError> {
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

    /// Read a page from disk
    ///
    /// A page ID past the end of the file yields a zeroed page; allocation
    /// extends the file eagerly, so this only happens for pages that were
    /// allocated but never written.
    pub fn read_page(&self, page_id: PageId, page: &mut Page) -> Result<(), DiskManagerError> {
        if page_id == INVALID_PAGE_ID {
            return Err(DiskManagerError::InvalidPageId(page_id));
        }

        let offset = Self::page_offset(page_id);
        let mut buffer = [0u8; PAGE_SIZE];

        {
            let mut file = self.db_file.lock();
            let file_size = file.metadata()?.len();

            if offset as u64 >= file_size {
                page.reset(page_id);
                return Ok(());
            }

            file.seek(SeekFrom::Start(offset as u64))?;
            file.read_exact(&mut buffer)?;
        }

        page.data.copy_from_slice(&buffer);
        page.page_id = page_id;

        Ok(())
    }

    /// Write a page to disk
    pub fn write_page(&self, page: &Page) -> Result<(), DiskManagerError> {
        if page.page_id == INVALID_PAGE_ID {
            return Err(DiskManagerError::InvalidPageId(page.page_id));
        }

        let offset = Self::page_offset(page.page_id);

        let mut file = self.db_file.lock();
        file.seek(SeekFrom::Start(offset as u64))?;
        file.write_all(&page.data)?;
        file.flush()?;

        Ok(())
    }

    /// Allocate a new page on disk and return its ID
    pub fn allocate_page(&self) -> Result<PageId, DiskManagerError> {
        let mut file = self.db_file.lock();

        // The next page ID follows from the file size; first page is 1, not 0
        let file_size = file.metadata()?.len();
        let new_page_id = (file_size / PAGE_SIZE as u64) as PageId + 1;

        // Extend the file with a page of zeros
        file.seek(SeekFrom::End(0))?;
        let zeros = [0u8; PAGE_SIZE];
        file.write_all(&zeros)?;
        file.flush()?;

        Ok(new_page_id)
    }

    /// Release a page on disk
    ///
    /// Page-file space is not reclaimed; the slot simply stops being
    /// referenced until the file is rebuilt offline.
    pub fn deallocate_page(&self, _page_id: PageId) -> Result<(), DiskManagerError> {
        Ok(())
    }

    /// Append a run of serialized log records to the log file and sync
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

    /// Read up to `buf.len()` bytes of log starting at `offset`
    ///
    /// Returns the number of bytes read; 0 means the offset is at or past
    /// the end of the log.
    pub fn read_log(&self, buf: &mut [u8], offset: u64) -> Result<usize, DiskManagerError> {
        let mut file = self.log_file.lock();
        let file_size = file.metadata()?.len();

        if offset >= file_size {
            return Ok(0);
        }

        let available = (file_size - offset) as usize;
        let to_read = available.min(buf.len());

        file.seek(SeekFrom::Start(offset))?;
        file.read_exact(&mut buf[..to_read])?;

        Ok(to_read)
    }

    /// Size of the log file in bytes
    pub fn log_size(&self) -> Result<u64, DiskManagerError> {
        let file = self.log_file.lock();
        Ok(file.metadata()?.len())
    }

    fn page_offset(page_id: PageId) -> usize {
        (page_id as usize - 1) * PAGE_SIZE
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn create_disk_manager() -> (DiskManager, TempDir) {
        let dir = TempDir::new().unwrap();
        let dm = DiskManager::new(dir.path().join("test.db"), dir.path().join("test.log")).unwrap();
        (dm, dir)
    }

    #[test]
    fn test_page_write_read_roundtrip() {
        let (dm, _dir) = create_disk_manager();

        let page_id = dm.allocate_page().unwrap();
        assert_eq!(page_id, 1);

        let mut page = Page::new(page_id);
        page.data[0] = 0xDE;
        page.data[PAGE_SIZE - 1] = 0xAD;
        dm.write_page(&page).unwrap();

        let mut read_back = Page::new(INVALID_PAGE_ID);
        dm.read_page(page_id, &mut read_back).unwrap();
        assert_eq!(read_back.page_id, page_id);
        assert_eq!(read_back.data[0], 0xDE);
        assert_eq!(read_back.data[PAGE_SIZE - 1], 0xAD);
    }

    #[test]
    fn test_read_past_end_yields_zeroed_page() {
        let (dm, _dir) = create_disk_manager();

        let mut page = Page::new(INVALID_PAGE_ID);
        page.data[10] = 0xFF;
        dm.read_page(42, &mut page).unwrap();
        assert_eq!(page.page_id, 42);
        assert!(page.data.iter().all(|&b| b == 0));
    }

    #[test]
    fn test_allocate_page_ids_are_sequential() {
        let (dm, _dir) = create_disk_manager();
        assert_eq!(dm.allocate_page().unwrap(), 1);
        assert_eq!(dm.allocate_page().unwrap(), 2);
        assert_eq!(dm.allocate_page().unwrap(), 3);
    }

    #[test]
    fn test_log_append_and_read() {
        let (dm, _dir) = create_disk_manager();

        dm.write_log(b"hello").unwrap();
        dm.write_log(b" world").unwrap();

        let mut buf = [0u8; 64];
        let n = dm.read_log(&mut buf, 0).unwrap();
        assert_eq!(&buf[..n], b"hello world");

        // Offset into the stream
        let n = dm.read_log(&mut buf, 6).unwrap();
        assert_eq!(&buf[..n], b"world");

        // Past the end
        assert_eq!(dm.read_log(&mut buf, 100).unwrap(), 0);
    }
}
