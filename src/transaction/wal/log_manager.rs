use std::mem;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;
use log::{debug, error, info};
use parking_lot::{Condvar, Mutex};
use thiserror::Error;

use crate::common::types::{Lsn, INVALID_LSN};
use crate::storage::disk::{DiskManager, DiskManagerError};
use crate::transaction::wal::log_record::{LogRecord, LogRecordError};

/// Error type for log manager operations
#[derive(Error, Debug)]
pub enum LogManagerError {
    #[error("Disk manager error: {0}")]
    DiskError(#[from] DiskManagerError),

    #[error("Log record error: {0}")]
    RecordError(#[from] LogRecordError),

    #[error("Log record of {0} bytes exceeds the log buffer")]
    RecordTooLarge(usize),

    #[error("Flush thread panicked")]
    FlushThreadPanicked,
}

/// Result type for log manager operations
pub type Result<T> = std::result::Result<T, LogManagerError>;

/// Configuration for the log manager
#[derive(Debug, Clone)]
pub struct LogManagerConfig {
    /// Size of each append buffer in bytes
    pub buffer_size: usize,

    /// Maximum staleness before the flush thread writes on its own
    pub flush_timeout: Duration,
}

impl Default for LogManagerConfig {
    fn default() -> Self {
        Self {
            buffer_size: 1024 * 1024, // 1 MB
            flush_timeout: Duration::from_millis(300),
        }
    }
}

/// Append buffer and LSN state, guarded by the manager mutex
struct LogCore {
    /// Active buffer that appenders fill
    buffer: Vec<u8>,
    /// Bytes used in the active buffer
    offset: usize,
    /// Next LSN to assign
    next_lsn: Lsn,
    /// A swap has been requested and not yet picked up
    flush_requested: bool,
}

/// Write-ahead log manager with a double-buffered append path
///
/// Appenders serialize records into the active buffer under the manager
/// mutex, which also makes append order equal LSN order. The flush thread
/// owns a standby buffer: on request (or timeout, or buffer exhaustion) it
/// swaps the two under the mutex, then writes the swapped-out contents to
/// disk outside it and publishes the new persistent LSN. Waiters blocked in
/// `sync_flush(true)` are all released by the same write, which is what
/// group-commits concurrent transactions.
pub struct LogManager {
    config: LogManagerConfig,
    core: Mutex<LogCore>,
    /// Wakes the flush thread
    flush_cv: Condvar,
    /// Wakes sync_flush waiters and appenders stalled on a full buffer
    done_cv: Condvar,
    /// Largest LSN known durable on disk
    persistent_lsn: AtomicU32,
    running: AtomicBool,
    flush_thread: Mutex<Option<JoinHandle<()>>>,
    disk_manager: Arc<DiskManager>,
}

impl LogManager {
    pub fn new(disk_manager: Arc<DiskManager>, config: LogManagerConfig) -> Self {
        let buffer = vec![0u8; config.buffer_size];
        Self {
            config,
            core: Mutex::new(LogCore {
                buffer,
                offset: 0,
                next_lsn: INVALID_LSN + 1,
                flush_requested: false,
            }),
            flush_cv: Condvar::new(),
            done_cv: Condvar::new(),
            persistent_lsn: AtomicU32::new(INVALID_LSN),
            running: AtomicBool::new(false),
            flush_thread: Mutex::new(None),
            disk_manager,
        }
    }

    /// Largest LSN durably on disk; monotonic
    pub fn persistent_lsn(&self) -> Lsn {
        self.persistent_lsn.load(Ordering::Acquire)
    }

    /// Append a record, assigning its LSN
    ///
    /// A record that does not fit in the remaining buffer space forces a
    /// flush first; one that cannot fit in an empty buffer is rejected.
    pub fn append(&self, mut record: LogRecord) -> Result<Lsn> {
        let size = record.size as usize;
        if size > self.config.buffer_size {
            return Err(LogManagerError::RecordTooLarge(size));
        }

        let mut core = self.core.lock();

        if core.offset + size > self.config.buffer_size {
            if self.running.load(Ordering::Acquire) {
                core.flush_requested = true;
                self.flush_cv.notify_one();
                while core.offset + size > self.config.buffer_size {
                    self.done_cv.wait(&mut core);
                }
            } else {
                self.flush_inline(&mut core)?;
            }
        }

        record.lsn = core.next_lsn;
        core.next_lsn += 1;

        let offset = core.offset;
        record.serialize_into(&mut core.buffer[offset..offset + size]);
        core.offset += size;

        Ok(record.lsn)
    }

    /// Hand the current buffer to the flush thread
    ///
    /// With `wait` set, blocks until every LSN assigned before the call is
    /// durable and returns that LSN. Without a running flush thread the
    /// write happens inline.
    pub fn sync_flush(&self, wait: bool) -> Result<Lsn> {
        let mut core = self.core.lock();
        let target = core.next_lsn - 1;

        if !self.running.load(Ordering::Acquire) {
            self.flush_inline(&mut core)?;
            return Ok(target);
        }

        core.flush_requested = true;
        self.flush_cv.notify_one();

        if wait {
            while self.persistent_lsn() < target {
                self.done_cv.wait(&mut core);
            }
        }

        Ok(target)
    }

    /// Start the background flush thread
    pub fn run_flush_thread(self: &Arc<Self>) {
        if self.running.swap(true, Ordering::AcqRel) {
            return;
        }

        info!("starting log flush thread");
        let manager = Arc::clone(self);
        let handle = std::thread::spawn(move || manager.flush_loop());
        *self.flush_thread.lock() = Some(handle);
    }

    /// Stop the flush thread and drain anything still buffered
    pub fn stop_flush_thread(&self) -> Result<()> {
        if !self.running.swap(false, Ordering::AcqRel) {
            return Ok(());
        }

        {
            let _core = self.core.lock();
            self.flush_cv.notify_all();
        }

        let handle = self.flush_thread.lock().take();
        if let Some(handle) = handle {
            handle.join().map_err(|_| LogManagerError::FlushThreadPanicked)?;
        }

        let mut core = self.core.lock();
        self.flush_inline(&mut core)?;
        self.done_cv.notify_all();
        info!("log flush thread stopped");
        Ok(())
    }

    fn flush_loop(&self) {
        // The standby buffer belongs to this thread between swaps
        let mut standby = vec![0u8; self.config.buffer_size];

        loop {
            let mut core = self.core.lock();
            if !core.flush_requested {
                let _ = self.flush_cv.wait_for(&mut core, self.config.flush_timeout);
            }
            if !self.running.load(Ordering::Acquire) {
                return;
            }
            if core.offset == 0 {
                core.flush_requested = false;
                self.done_cv.notify_all();
                continue;
            }

            // Swap under the mutex, write outside it
            mem::swap(&mut core.buffer, &mut standby);
            let flush_len = core.offset;
            let durable_lsn = core.next_lsn - 1;
            core.offset = 0;
            core.flush_requested = false;
            drop(core);

            match self.disk_manager.write_log(&standby[..flush_len]) {
                Ok(()) => {
                    self.persistent_lsn.store(durable_lsn, Ordering::Release);
                    debug!("flushed log up to LSN {}", durable_lsn);
                    let _core = self.core.lock();
                    self.done_cv.notify_all();
                }
                Err(e) => {
                    // Flush thread errors are fatal
                    error!("log flush failed: {}", e);
                    panic!("log flush failed: {}", e);
                }
            }
        }
    }

    /// Write the active buffer directly; used when no flush thread runs
    fn flush_inline(&self, core: &mut LogCore) -> Result<()> {
        if core.offset == 0 {
            return Ok(());
        }

        let flush_len = core.offset;
        self.disk_manager.write_log(&core.buffer[..flush_len])?;
        self.persistent_lsn
            .store(core.next_lsn - 1, Ordering::Release);
        core.offset = 0;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;
    use crate::common::types::Rid;
    use crate::transaction::wal::log_record::{LogRecordType, LOG_HEADER_SIZE};

    fn create_manager(config: LogManagerConfig) -> (Arc<LogManager>, Arc<DiskManager>, TempDir) {
        let dir = TempDir::new().unwrap();
        let disk = Arc::new(
            DiskManager::new(dir.path().join("test.db"), dir.path().join("test.log")).unwrap(),
        );
        (
            Arc::new(LogManager::new(disk.clone(), config)),
            disk,
            dir,
        )
    }

    #[test]
    fn test_lsns_are_sequential() {
        let (manager, _disk, _dir) = create_manager(LogManagerConfig::default());

        let lsn1 = manager.append(LogRecord::new_begin(1)).unwrap();
        let lsn2 = manager
            .append(LogRecord::new_insert(1, lsn1, Rid::new(1, 0), b"t".to_vec()))
            .unwrap();
        let lsn3 = manager.append(LogRecord::new_commit(1, lsn2)).unwrap();

        assert_eq!(lsn1, 1);
        assert_eq!(lsn2, 2);
        assert_eq!(lsn3, 3);
    }

    #[test]
    fn test_inline_flush_makes_records_durable() {
        let (manager, disk, _dir) = create_manager(LogManagerConfig::default());

        let lsn1 = manager.append(LogRecord::new_begin(9)).unwrap();
        let lsn2 = manager.append(LogRecord::new_commit(9, lsn1)).unwrap();

        assert_eq!(manager.persistent_lsn(), INVALID_LSN);
        let durable = manager.sync_flush(true).unwrap();
        assert_eq!(durable, lsn2);
        assert_eq!(manager.persistent_lsn(), lsn2);

        // The wire format reads back record by record
        let mut buf = vec![0u8; 4096];
        let n = disk.read_log(&mut buf, 0).unwrap();
        let first = LogRecord::deserialize(&buf[..n]).unwrap();
        assert_eq!(first.lsn, lsn1);
        assert_eq!(first.record_type, LogRecordType::Begin);
        let second = LogRecord::deserialize(&buf[first.size as usize..n]).unwrap();
        assert_eq!(second.lsn, lsn2);
        assert_eq!(second.record_type, LogRecordType::Commit);
    }

    #[test]
    fn test_flush_thread_group_commit() {
        let (manager, _disk, _dir) = create_manager(LogManagerConfig::default());
        manager.run_flush_thread();

        let mut last = INVALID_LSN;
        for txn_id in 1..=4 {
            last = manager.append(LogRecord::new_begin(txn_id)).unwrap();
        }

        let durable = manager.sync_flush(true).unwrap();
        assert!(durable >= last);
        assert!(manager.persistent_lsn() >= last);

        manager.stop_flush_thread().unwrap();
    }

    #[test]
    fn test_full_buffer_forces_flush() {
        // Room for just a couple of header-only records
        let config = LogManagerConfig {
            buffer_size: LOG_HEADER_SIZE * 2 + 10,
            flush_timeout: Duration::from_millis(50),
        };
        let (manager, disk, _dir) = create_manager(config);

        for _ in 0..6 {
            manager.append(LogRecord::new_begin(1)).unwrap();
        }
        manager.sync_flush(true).unwrap();

        assert_eq!(manager.persistent_lsn(), 6);
        assert_eq!(disk.log_size().unwrap(), (LOG_HEADER_SIZE * 6) as u64);
    }

    #[test]
    fn test_oversized_record_rejected() {
        let config = LogManagerConfig {
            buffer_size: 64,
            flush_timeout: Duration::from_millis(50),
        };
        let (manager, _disk, _dir) = create_manager(config);

        let record = LogRecord::new_insert(1, 0, Rid::new(1, 0), vec![0u8; 128]);
        assert!(matches!(
            manager.append(record),
            Err(LogManagerError::RecordTooLarge(_))
        ));
    }

    #[test]
    fn test_timeout_flush_without_explicit_sync() {
        let config = LogManagerConfig {
            buffer_size: 1024,
            flush_timeout: Duration::from_millis(20),
        };
        let (manager, _disk, _dir) = create_manager(config);
        manager.run_flush_thread();

        let lsn = manager.append(LogRecord::new_begin(1)).unwrap();

        // The background timer alone must make the record durable
        let deadline = std::time::Instant::now() + Duration::from_secs(2);
        while manager.persistent_lsn() < lsn {
            assert!(
                std::time::Instant::now() < deadline,
                "timeout flush never happened"
            );
            std::thread::sleep(Duration::from_millis(10));
        }

        manager.stop_flush_thread().unwrap();
    }
}
