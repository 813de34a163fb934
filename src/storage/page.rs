pub mod data_page;
pub mod meta_page;

use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::{Mutex, MutexGuard};

use crate::storage::PAGE_SIZE;

/// Page number of the reserved meta page. Data pages start at 2.
pub const META_PAGE_NUMBER: u32 = 1;

/// A cached page: its bytes plus a dirty flag for eviction write-back.
///
/// Pages are handed out by the page store as `Arc<Page>` and must be given
/// back with `PageStore::release_page` once the caller is done.
pub struct Page {
    number: u32,
    data: Mutex<Box<[u8; PAGE_SIZE]>>,
    dirty: AtomicBool,
}

impl Page {
    pub fn new(number: u32, data: Box<[u8; PAGE_SIZE]>) -> Self {
        Self {
            number,
            data: Mutex::new(data),
            dirty: AtomicBool::new(false),
        }
    }

    pub fn number(&self) -> u32 {
        self.number
    }

    /// Locks the page bytes. Hold the guard only for in-memory work.
    pub fn lock(&self) -> MutexGuard<'_, Box<[u8; PAGE_SIZE]>> {
        self.data.lock()
    }

    /// Copies the current page bytes.
    pub fn to_bytes(&self) -> Box<[u8; PAGE_SIZE]> {
        self.data.lock().clone()
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty.load(Ordering::SeqCst)
    }

    pub fn set_dirty(&self, dirty: bool) {
        self.dirty.store(dirty, Ordering::SeqCst);
    }
}

impl std::fmt::Debug for Page {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Page")
            .field("number", &self.number)
            .field("dirty", &self.is_dirty())
            .finish()
    }
}

pub use data_page::DataPage;
pub use meta_page::MetaPage;
