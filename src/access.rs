//! Access layer for records.
//!
//! This module provides:
//!
//! - **DataManager**: Places new records on pages, logs every change before
//!   it reaches a page, and serves reads through a record cache
//! - **DataItem**: A record living inside a cached page, with a write
//!   protocol that either logs a change or rolls it back
//!
//! Higher layers work with addresses and payload bytes; the page layout and
//! the log are hidden behind this module.

pub mod data_item;
pub mod data_manager;

pub use data_item::{DataItem, DataItemWriter};
pub use data_manager::DataManager;
