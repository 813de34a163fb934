//! Recovery and crash resilience module.
//!
//! This module handles:
//! - Encoding and decoding the insert and update records kept in the log
//! - Replaying the log after an unclean shutdown

pub mod log_record;
pub mod replay;

// Re-export commonly used types
pub use log_record::{InsertRecord, LogRecord, UpdateRecord};
pub use replay::{recover, RecoveryStats};
