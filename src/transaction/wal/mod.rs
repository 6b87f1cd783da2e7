// TarnDB Write-Ahead Logging Module

pub mod checkpoint;
pub mod log_manager;
pub mod log_record;
pub mod log_recovery;
