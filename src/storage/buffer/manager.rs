use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use log::debug;
use parking_lot::{Mutex, RwLock};

use crate::common::types::{
    Frame, FrameId, Lsn, Page, PageId, PagePtr, FramePtr, INVALID_LSN, INVALID_PAGE_ID,
};
use crate::storage::buffer::error::BufferPoolError;
use crate::storage::buffer::replacer::ClockReplacer;
use crate::storage::disk::DiskManager;
use crate::transaction::wal::log_manager::LogManager;

/// Page table and free list, guarded together by the manager mutex
struct PoolTables {
    page_table: HashMap<PageId, FrameId>,
    free_list: VecDeque<FrameId>,
}

/// Fixed-size cache of disk pages with pin/unpin semantics and clock
/// eviction
///
/// Lock order, outermost first: manager mutex, then a frame or page latch,
/// then the replacer mutex. Callers must release any page latch they hold
/// before re-entering the manager (unpin, flush, delete).
pub struct BufferPoolManager {
    pool_size: usize,
    frames: Vec<FramePtr>,
    tables: Mutex<PoolTables>,
    replacer: Mutex<ClockReplacer>,
    disk_manager: Arc<DiskManager>,
    log_manager: Option<Arc<LogManager>>,
}

impl BufferPoolManager {
    pub fn new(pool_size: usize, disk_manager: Arc<DiskManager>) -> Self {
        Self::build(pool_size, disk_manager, None)
    }

    /// Create a pool that honors the write-ahead rule: no dirty page whose
    /// LSN is beyond the durable log prefix reaches disk before the log
    /// does
    pub fn with_wal(
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
            let page = Arc::new(RwLock::new(Page::new(INVALID_PAGE_ID)));
            frames.push(Arc::new(RwLock::new(Frame::new(frame_id, page))));
            free_list.push_back(frame_id);
        }

        Self {
            pool_size,
            frames,
            tables: Mutex::new(PoolTables {
                page_table: HashMap::new(),
                free_list,
            }),
            replacer: Mutex::new(ClockReplacer::new(pool_size)),
            disk_manager,
            log_manager,
        }
    }

    pub fn pool_size(&self) -> usize {
        self.pool_size
    }

    /// Fetch a page from the buffer pool, reading it from disk on a miss
    ///
    /// The returned page is pinned; the caller owes a matching `unpin_page`.
    pub fn fetch_page(&self, page_id: PageId) -> Result<PagePtr, BufferPoolError> {
        if page_id == INVALID_PAGE_ID {
            return Err(BufferPoolError::InvalidOperation(
                "cannot fetch the invalid page ID".to_string(),
            ));
        }

        let mut tables = self.tables.lock();

        // Resident: pin and return
        if let Some(&frame_id) = tables.page_table.get(&page_id) {
            let frame = &self.frames[frame_id];
            frame.write().pin_count += 1;
            self.replacer.lock().pin(frame_id);
            let page = frame.read().page.clone();
            return Ok(page);
        }

        let frame_id = self.reserve_frame(&mut tables)?;
        let frame = &self.frames[frame_id];

        let (page_ptr, old_page_id, was_dirty) = {
            let mut frame_guard = frame.write();
            let old_page_id = frame_guard.page.read().page_id;
            if old_page_id != INVALID_PAGE_ID {
                tables.page_table.remove(&old_page_id);
            }
            tables.page_table.insert(page_id, frame_id);
            let was_dirty = frame_guard.is_dirty;
            frame_guard.pin_count = 1;
            frame_guard.is_dirty = false;
            (frame_guard.page.clone(), old_page_id, was_dirty)
        };

        // Hold the page write latch across the disk I/O; a concurrent
        // fetcher that finds the new mapping blocks here instead of
        // observing a half-swapped frame
        let mut page_guard = page_ptr.write();
        drop(tables);

        if let Err(e) = self.swap_in(&mut page_guard, page_id, old_page_id, was_dirty) {
            page_guard.reset(INVALID_PAGE_ID);
            drop(page_guard);
            self.abandon_frame(frame_id, page_id);
            return Err(e);
        }
        drop(page_guard);

        Ok(page_ptr)
    }

    /// Allocate a fresh page on disk and install it, zeroed and pinned
    pub fn new_page(&self) -> Result<(PagePtr, PageId), BufferPoolError> {
        let page_id = self.disk_manager.allocate_page()?;

        let mut tables = self.tables.lock();

        // The all-pinned scan runs under the manager mutex so it cannot
        // race a concurrent unpin
        if self.frames.iter().all(|f| f.read().pin_count > 0) {
            return Err(BufferPoolError::PoolExhausted);
        }

        let frame_id = self.reserve_frame(&mut tables)?;
        let frame = &self.frames[frame_id];

        let (page_ptr, old_page_id, was_dirty) = {
            let mut frame_guard = frame.write();
            let old_page_id = frame_guard.page.read().page_id;
            if old_page_id != INVALID_PAGE_ID {
                tables.page_table.remove(&old_page_id);
            }
            tables.page_table.insert(page_id, frame_id);
            let was_dirty = frame_guard.is_dirty;
            frame_guard.pin_count = 1;
            frame_guard.is_dirty = false;
            (frame_guard.page.clone(), old_page_id, was_dirty)
        };

        let mut page_guard = page_ptr.write();
        drop(tables);

        let io_result = (|| -> Result<(), BufferPoolError> {
            if was_dirty && old_page_id != INVALID_PAGE_ID {
                self.flush_log_for(page_guard.lsn)?;
                self.disk_manager.write_page(&page_guard)?;
            }
            Ok(())
        })();
        if let Err(e) = io_result {
            page_guard.reset(INVALID_PAGE_ID);
            drop(page_guard);
            self.abandon_frame(frame_id, page_id);
            return Err(e);
        }

        page_guard.reset(page_id);
        drop(page_guard);

        debug!("allocated page {} in frame {}", page_id, frame_id);
        Ok((page_ptr, page_id))
    }

    /// Unpin a page, OR-ing the dirty flag into its frame
    ///
    /// When the pin count reaches zero the frame becomes an eviction
    /// candidate.
    pub fn unpin_page(&self, page_id: PageId, is_dirty: bool) -> Result<(), BufferPoolError> {
        if page_id == INVALID_PAGE_ID {
            return Err(BufferPoolError::InvalidOperation(
                "cannot unpin the invalid page ID".to_string(),
            ));
        }

        let tables = self.tables.lock();
        let frame_id = *tables
            .page_table
            .get(&page_id)
            .ok_or(BufferPoolError::PageNotFound(page_id))?;

        let pin_count = {
            let mut frame_guard = self.frames[frame_id].write();
            if frame_guard.pin_count > 0 {
                frame_guard.pin_count -= 1;
            }
            if is_dirty {
                frame_guard.is_dirty = true;
            }
            frame_guard.pin_count
        };

        if pin_count == 0 {
            self.replacer.lock().unpin(frame_id);
        }

        Ok(())
    }

    /// Write a resident page to disk and clear its dirty bit
    pub fn flush_page(&self, page_id: PageId) -> Result<(), BufferPoolError> {
        if page_id == INVALID_PAGE_ID {
            return Err(BufferPoolError::InvalidOperation(
                "cannot flush the invalid page ID".to_string(),
            ));
        }

        let tables = self.tables.lock();
        let frame_id = *tables
            .page_table
            .get(&page_id)
            .ok_or(BufferPoolError::PageNotFound(page_id))?;
        self.flush_frame(frame_id)
    }

    /// Flush every resident page
    pub fn flush_all_pages(&self) -> Result<(), BufferPoolError> {
        let tables = self.tables.lock();
        for &frame_id in tables.page_table.values() {
            self.flush_frame(frame_id)?;
        }
        Ok(())
    }

    /// Drop a page from the pool and release it on disk
    ///
    /// Succeeds without I/O when the page is not resident; fails if the
    /// page is pinned.
    pub fn delete_page(&self, page_id: PageId) -> Result<(), BufferPoolError> {
        if page_id == INVALID_PAGE_ID {
            return Err(BufferPoolError::InvalidOperation(
                "cannot delete the invalid page ID".to_string(),
            ));
        }

        let mut tables = self.tables.lock();

        let frame_id = match tables.page_table.get(&page_id) {
            Some(&frame_id) => frame_id,
            None => {
                drop(tables);
                self.disk_manager.deallocate_page(page_id)?;
                return Ok(());
            }
        };

        {
            let mut frame_guard = self.frames[frame_id].write();
            if frame_guard.pin_count > 0 {
                return Err(BufferPoolError::PagePinned(page_id));
            }
            frame_guard.page.write().reset(INVALID_PAGE_ID);
            frame_guard.is_dirty = false;
        }

        tables.page_table.remove(&page_id);
        self.replacer.lock().pin(frame_id);
        tables.free_list.push_back(frame_id);
        drop(tables);

        self.disk_manager.deallocate_page(page_id)?;
        Ok(())
    }

    /// Pick a target frame: free list first, then a clock victim
    fn reserve_frame(&self, tables: &mut PoolTables) -> Result<FrameId, BufferPoolError> {
        if let Some(frame_id) = tables.free_list.pop_front() {
            return Ok(frame_id);
        }
        self.replacer
            .lock()
            .victim()
            .ok_or(BufferPoolError::PoolExhausted)
    }

    /// Write back the evicted page if needed, then read the requested one
    ///
    /// `page` still holds the evictee's content and ID on entry.
    fn swap_in(
        &self,
        page: &mut Page,
        page_id: PageId,
        old_page_id: PageId,
        was_dirty: bool,
    ) -> Result<(), BufferPoolError> {
        if was_dirty && old_page_id != INVALID_PAGE_ID {
            debug!("evicting dirty page {} for page {}", old_page_id, page_id);
            self.flush_log_for(page.lsn)?;
            self.disk_manager.write_page(page)?;
        }

        self.disk_manager.read_page(page_id, page)?;
        page.lsn = INVALID_LSN;
        Ok(())
    }

    /// Undo a frame reservation after an I/O failure
    fn abandon_frame(&self, frame_id: FrameId, page_id: PageId) {
        let mut tables = self.tables.lock();
        if tables.page_table.get(&page_id) == Some(&frame_id) {
            tables.page_table.remove(&page_id);
        }
        {
            let mut frame_guard = self.frames[frame_id].write();
            frame_guard.pin_count = 0;
            frame_guard.is_dirty = false;
        }
        tables.free_list.push_back(frame_id);
    }

    fn flush_frame(&self, frame_id: FrameId) -> Result<(), BufferPoolError> {
        let mut frame_guard = self.frames[frame_id].write();
        {
            let page_guard = frame_guard.page.read();
            self.flush_log_for(page_guard.lsn)?;
            self.disk_manager.write_page(&page_guard)?;
        }
        frame_guard.is_dirty = false;
        Ok(())
    }

    /// Write-ahead rule: the log prefix up to `lsn` must be durable before
    /// a page stamped with `lsn` is
    fn flush_log_for(&self, lsn: Lsn) -> Result<(), BufferPoolError> {
        if let Some(ref log_manager) = self.log_manager {
            if lsn != INVALID_LSN && lsn > log_manager.persistent_lsn() {
                log_manager.sync_flush(true)?;
            }
        }
        Ok(())
    }
}
