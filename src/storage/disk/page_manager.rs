use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;
use std::sync::atomic::{AtomicU32, Ordering};

use parking_lot::Mutex;

use crate::storage::error::{StorageError, StorageResult};

pub const PAGE_SIZE: usize = 8192;

/// Raw page file: a sequence of `PAGE_SIZE` pages numbered from 1.
pub struct PageManager {
    file: Mutex<File>,
    page_count: AtomicU32,
}

impl PageManager {
    pub fn create(path: &Path) -> StorageResult<Self> {
        if path.exists() {
            return Err(StorageError::FileExists(path.to_path_buf()));
        }
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create_new(true)
            .open(path)?;

        Ok(Self {
            file: Mutex::new(file),
            page_count: AtomicU32::new(0),
        })
    }

    pub fn open(path: &Path) -> StorageResult<Self> {
        if !path.exists() {
            return Err(StorageError::FileNotExists(path.to_path_buf()));
        }
        let file = OpenOptions::new().read(true).write(true).open(path)?;
        let page_count = (file.metadata()?.len() / PAGE_SIZE as u64) as u32;

        Ok(Self {
            file: Mutex::new(file),
            page_count: AtomicU32::new(page_count),
        })
    }

    pub fn read_page(&self, page_number: u32) -> StorageResult<Box<[u8; PAGE_SIZE]>> {
        if page_number == 0 || page_number > self.page_count() {
            return Err(StorageError::PageNotFound(page_number));
        }

        let mut buf = Box::new([0u8; PAGE_SIZE]);
        let mut file = self.file.lock();
        file.seek(SeekFrom::Start(Self::page_offset(page_number)))?;
        file.read_exact(&mut buf[..])?;

        Ok(buf)
    }

    /// Writes a page and forces it to stable storage.
    pub fn write_page(&self, page_number: u32, data: &[u8; PAGE_SIZE]) -> StorageResult<()> {
        if page_number == 0 {
            return Err(StorageError::PageNotFound(page_number));
        }

        let mut file = self.file.lock();
        file.seek(SeekFrom::Start(Self::page_offset(page_number)))?;
        file.write_all(data)?;
        file.sync_data()?;

        Ok(())
    }

    /// Appends a page holding `initial` and returns its number.
    pub fn allocate_page(&self, initial: &[u8; PAGE_SIZE]) -> StorageResult<u32> {
        let page_number = self.page_count.fetch_add(1, Ordering::SeqCst) + 1;
        self.write_page(page_number, initial)?;
        Ok(page_number)
    }

    /// Cuts or extends the file to exactly `page_count` pages.
    pub fn truncate(&self, page_count: u32) -> StorageResult<()> {
        let file = self.file.lock();
        file.set_len(page_count as u64 * PAGE_SIZE as u64)?;
        file.sync_all()?;
        self.page_count.store(page_count, Ordering::SeqCst);
        Ok(())
    }

    pub fn page_count(&self) -> u32 {
        self.page_count.load(Ordering::SeqCst)
    }

    pub fn sync(&self) -> StorageResult<()> {
        self.file.lock().sync_all()?;
        Ok(())
    }

    fn page_offset(page_number: u32) -> u64 {
        (page_number as u64 - 1) * PAGE_SIZE as u64
    }
}
