//! Page store: the page file behind a reference-counted page cache.
//!
//! Pages are loaded on first use and written back when the last reference is
//! released, but only if they were modified. New pages are written through
//! immediately so the file length always covers every allocated page number.

use std::path::Path;
use std::sync::Arc;

use log::{debug, error};

use crate::cache::ResourceCache;
use crate::storage::disk::{PageManager, PAGE_SIZE};
use crate::storage::error::{StorageError, StorageResult};
use crate::storage::page::Page;

/// The page cache refuses to run with fewer slots than this.
pub const MIN_CACHED_PAGES: usize = 10;

pub struct PageStore {
    disk: Arc<PageManager>,
    cache: ResourceCache<Page>,
}

impl PageStore {
    /// Creates a new page file; `memory_bytes` bounds the page cache.
    pub fn create(path: &Path, memory_bytes: u64) -> StorageResult<Self> {
        let capacity = Self::capacity_for(memory_bytes)?;
        let disk = PageManager::create(path)?;
        Ok(Self::with_disk(disk, capacity))
    }

    pub fn open(path: &Path, memory_bytes: u64) -> StorageResult<Self> {
        let capacity = Self::capacity_for(memory_bytes)?;
        let disk = PageManager::open(path)?;
        debug!("opened page file {:?} with {} pages", path, disk.page_count());
        Ok(Self::with_disk(disk, capacity))
    }

    fn capacity_for(memory_bytes: u64) -> StorageResult<usize> {
        let pages = (memory_bytes / PAGE_SIZE as u64) as usize;
        if pages < MIN_CACHED_PAGES {
            return Err(StorageError::MemoryTooSmall {
                bytes: memory_bytes,
                min_pages: MIN_CACHED_PAGES,
            });
        }
        Ok(pages)
    }

    fn with_disk(disk: PageManager, capacity: usize) -> Self {
        let disk = Arc::new(disk);

        let loader_disk = Arc::clone(&disk);
        let evictor_disk = Arc::clone(&disk);
        let cache = ResourceCache::new(
            capacity,
            Box::new(move |key: u64| -> StorageResult<Page> {
                let number = key as u32;
                let data = loader_disk.read_page(number)?;
                Ok(Page::new(number, data))
            }),
            Box::new(move |page: &Page| -> StorageResult<()> {
                if !page.is_dirty() {
                    return Ok(());
                }
                let result = evictor_disk.write_page(page.number(), &page.to_bytes());
                page.set_dirty(false);
                if let Err(e) = &result {
                    error!("write-back of page {} failed: {}", page.number(), e);
                }
                result
            }),
        );

        Self { disk, cache }
    }

    /// Appends a page with the given contents and returns its number.
    pub fn new_page(&self, initial: &[u8; PAGE_SIZE]) -> StorageResult<u32> {
        self.disk.allocate_page(initial)
    }

    pub fn get_page(&self, page_number: u32) -> StorageResult<Arc<Page>> {
        self.cache.acquire(page_number as u64)
    }

    pub fn release_page(&self, page: &Page) -> StorageResult<()> {
        self.cache.release(page.number() as u64)
    }

    /// Writes the page out now, whether or not it is dirty.
    pub fn flush_page(&self, page: &Page) -> StorageResult<()> {
        self.disk.write_page(page.number(), &page.to_bytes())?;
        page.set_dirty(false);
        Ok(())
    }

    pub fn truncate_to(&self, page_count: u32) -> StorageResult<()> {
        self.disk.truncate(page_count)
    }

    pub fn page_count(&self) -> u32 {
        self.disk.page_count()
    }

    /// Writes back every cached page and syncs the file.
    pub fn close(&self) -> StorageResult<()> {
        self.cache.close()?;
        self.disk.sync()
    }

    /// Slots currently held in the page cache.
    pub fn cached_pages(&self) -> usize {
        self.cache.reserved()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::page::data_page;
    use anyhow::Result;
    use tempfile::tempdir;

    const MEMORY: u64 = (PAGE_SIZE * 16) as u64;

    #[test]
    fn test_memory_too_small() -> Result<()> {
        let dir = tempdir()?;
        let result = PageStore::create(&dir.path().join("t.db"), PAGE_SIZE as u64 * 3);
        assert!(matches!(result, Err(StorageError::MemoryTooSmall { .. })));
        Ok(())
    }

    #[test]
    fn test_new_and_get_page() -> Result<()> {
        let dir = tempdir()?;
        let store = PageStore::create(&dir.path().join("t.db"), MEMORY)?;

        let first = store.new_page(&data_page::init_raw())?;
        let second = store.new_page(&data_page::init_raw())?;
        assert_eq!((first, second), (1, 2));
        assert_eq!(store.page_count(), 2);

        let page = store.get_page(second)?;
        assert_eq!(page.number(), 2);
        assert_eq!(data_page::free_space(&page), data_page::MAX_FREE_SPACE);
        store.release_page(&page)?;
        assert_eq!(store.cached_pages(), 0);
        Ok(())
    }

    #[test]
    fn test_dirty_page_written_back_on_release() -> Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("t.db");
        {
            let store = PageStore::create(&path, MEMORY)?;
            let number = store.new_page(&data_page::init_raw())?;
            let page = store.get_page(number)?;
            data_page::insert(&page, b"persisted")?;
            store.release_page(&page)?;
            assert!(!page.is_dirty());
        }

        let store = PageStore::open(&path, MEMORY)?;
        let page = store.get_page(1)?;
        assert_eq!(&page.lock()[2..11], b"persisted");
        store.release_page(&page)?;
        Ok(())
    }

    #[test]
    fn test_shared_page_reference() -> Result<()> {
        let dir = tempdir()?;
        let store = PageStore::create(&dir.path().join("t.db"), MEMORY)?;
        let number = store.new_page(&data_page::init_raw())?;

        let a = store.get_page(number)?;
        let b = store.get_page(number)?;
        data_page::insert(&a, b"shared")?;
        assert_eq!(data_page::free_space(&b), data_page::MAX_FREE_SPACE - 6);

        store.release_page(&a)?;
        store.release_page(&b)?;
        Ok(())
    }

    #[test]
    fn test_cache_capacity() -> Result<()> {
        let dir = tempdir()?;
        let store = PageStore::create(&dir.path().join("t.db"), (PAGE_SIZE * 10) as u64)?;
        let mut held = Vec::new();
        for _ in 0..11 {
            store.new_page(&data_page::init_raw())?;
        }
        for number in 1..=10 {
            held.push(store.get_page(number)?);
        }

        assert!(matches!(
            store.get_page(11),
            Err(StorageError::CacheExhausted { key: 11 })
        ));

        store.release_page(&held[0])?;
        let page = store.get_page(11)?;
        store.release_page(&page)?;
        for page in &held[1..] {
            store.release_page(page)?;
        }
        Ok(())
    }

    #[test]
    fn test_flush_page_and_truncate() -> Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("t.db");
        let store = PageStore::create(&path, MEMORY)?;
        for _ in 0..4 {
            store.new_page(&data_page::init_raw())?;
        }

        let page = store.get_page(1)?;
        data_page::insert(&page, b"flushed")?;
        store.flush_page(&page)?;
        assert!(!page.is_dirty());
        store.release_page(&page)?;

        store.truncate_to(2)?;
        assert_eq!(store.page_count(), 2);
        assert!(matches!(store.get_page(3), Err(StorageError::PageNotFound(3))));
        assert_eq!(store.cached_pages(), 0);
        Ok(())
    }

    #[test]
    fn test_close_writes_back_held_pages() -> Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("t.db");
        {
            let store = PageStore::create(&path, MEMORY)?;
            let number = store.new_page(&data_page::init_raw())?;
            let page = store.get_page(number)?;
            data_page::insert(&page, b"on close")?;
            store.close()?;
        }

        let store = PageStore::open(&path, MEMORY)?;
        let page = store.get_page(1)?;
        assert_eq!(&page.lock()[2..10], b"on close");
        store.release_page(&page)?;
        Ok(())
    }
}
