use std::sync::Arc;
use std::time::Instant;
use log::info;
use thiserror::Error;

use crate::common::types::Lsn;
use crate::storage::buffer::{BufferPoolError, BufferPoolManager};
use crate::transaction::wal::log_manager::{LogManager, LogManagerError};

/// Error type for checkpoint operations
#[derive(Error, Debug)]
pub enum CheckpointError {
    #[error("Log manager error: {0}")]
    LogManagerError(#[from] LogManagerError),

    #[error("Buffer pool error: {0}")]
    BufferPoolError(#[from] BufferPoolError),
}

/// Result type for checkpoint operations
pub type Result<T> = std::result::Result<T, CheckpointError>;

/// Configuration for checkpoint behavior
#[derive(Debug, Clone)]
pub struct CheckpointConfig {
    /// Minimum time between checkpoints in seconds
    pub checkpoint_interval: u64,
}

impl Default for CheckpointConfig {
    fn default() -> Self {
        Self {
            checkpoint_interval: 300, // 5 minutes
        }
    }
}

/// Stop-the-world checkpointing: force the log, then write every resident
/// page
///
/// Recovery after a checkpoint still scans the whole log; the checkpoint
/// only bounds how much redo work that scan finds to do.
pub struct CheckpointManager {
    log_manager: Arc<LogManager>,
    buffer_pool: Arc<BufferPoolManager>,
    config: CheckpointConfig,
    last_checkpoint_time: Instant,
}

impl CheckpointManager {
    pub fn new(
        log_manager: Arc<LogManager>,
        buffer_pool: Arc<BufferPoolManager>,
        config: CheckpointConfig,
    ) -> Self {
        Self {
            log_manager,
            buffer_pool,
            config,
            last_checkpoint_time: Instant::now(),
        }
    }

    /// Flush the log, then all dirty pages; returns the durable LSN
    pub fn create_checkpoint(&mut self) -> Result<Lsn> {
        let durable_lsn = self.log_manager.sync_flush(true)?;
        self.buffer_pool.flush_all_pages()?;
        self.last_checkpoint_time = Instant::now();
        info!("checkpoint complete, durable up to LSN {}", durable_lsn);
        Ok(durable_lsn)
    }

    /// Whether the configured interval has elapsed since the last
    /// checkpoint
    pub fn checkpoint_needed(&self) -> bool {
        self.last_checkpoint_time.elapsed().as_secs() >= self.config.checkpoint_interval
    }
}
