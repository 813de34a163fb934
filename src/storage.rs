//! Storage layer.
//!
//! - **PageManager**: raw page file I/O, pages numbered from 1
//! - **PageStore**: pages shared through a reference-counted cache with
//!   write-back of dirty pages on eviction
//! - **DataPage / MetaPage**: byte layout of data pages and of the reserved
//!   first page
//! - **FreeSpaceIndex**: picks a data page with room for a new record
//! - **Logger**: the write-ahead log file

pub mod address;
pub mod disk;
pub mod error;
pub mod free_space;
pub mod page;
pub mod page_store;
pub mod wal;

pub use address::Address;
pub use disk::{PageManager, PAGE_SIZE};
pub use error::{StorageError, StorageResult};
pub use free_space::{FreeSpaceIndex, PageInfo};
pub use page::{DataPage, MetaPage, Page};
pub use page_store::PageStore;
pub use wal::Logger;
