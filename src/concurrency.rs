//! Concurrency control module.
//!
//! This module implements multi-version concurrency control for TideDB:
//! - In-memory transactions with isolation levels and snapshots
//! - The table of running transactions
//! - Versioned entries carrying creator and deleter xids
//! - The visibility rules deciding which versions a transaction sees

pub mod mvcc;
pub mod version;
pub mod visibility;

pub use mvcc::{IsolationLevel, MvccError, MvccResult, Transaction, TransactionTable};
pub use version::{set_xmax, VersionedEntry};
pub use visibility::{is_version_skip, is_visible};
