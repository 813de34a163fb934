//! Transaction bookkeeping.
//!
//! This module provides:
//! - Transaction identifiers, with xid 0 reserved for the always-committed
//!   super transaction
//! - Transaction states and their status bytes
//! - The durable ledger that issues xids and records each one's state

pub mod id;
pub mod ledger;
pub mod state;

// Re-export commonly used types
pub use id::TransactionId;
pub use ledger::TransactionLedger;
pub use state::TransactionState;
