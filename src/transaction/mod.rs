// TarnDB Transaction Durability Module
//
// The transaction and lock managers live above this crate; what lives
// here is everything they rely on for durability: the write-ahead log,
// restart recovery, and checkpointing.

pub mod wal;

// Public exports
pub use wal::log_manager::LogManager;
pub use wal::log_record::{LogRecord, LogRecordType};
pub use wal::log_recovery::LogRecovery;
