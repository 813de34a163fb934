//! Write-ahead log.
//!
//! Every change to a data page is appended here, and made durable, before
//! the page itself is touched. The log file only knows about opaque frames;
//! what a frame means is defined by `recovery::log_record`.

pub mod logger;

pub use logger::Logger;
