//! Layout of an ordinary data page.
//!
//! ```text
//! +----------------------+-----------------------------------+
//! | free space offset: 2 | record | record | ... | free ... |
//! +----------------------+-----------------------------------+
//! ```
//!
//! Records are packed back to back starting right after the header and are
//! never moved, so a record's offset is a stable part of its address.

use byteorder::{BigEndian, ByteOrder};

use crate::storage::error::{StorageError, StorageResult};
use crate::storage::page::Page;
use crate::storage::PAGE_SIZE;

const FREE_SPACE_OFFSET: usize = 0;
pub const HEADER_SIZE: usize = 2;

/// Largest record a single data page can hold.
pub const MAX_FREE_SPACE: usize = PAGE_SIZE - HEADER_SIZE;

/// Byte-level view over the buffer of a data page.
pub struct DataPage<'a> {
    data: &'a mut [u8; PAGE_SIZE],
}

impl<'a> DataPage<'a> {
    /// Formats `data` as an empty data page.
    pub fn new(data: &'a mut [u8; PAGE_SIZE]) -> Self {
        data.fill(0);
        let mut page = Self { data };
        page.set_free_space_offset(HEADER_SIZE as u16);
        page
    }

    pub fn from_data(data: &'a mut [u8; PAGE_SIZE]) -> Self {
        Self { data }
    }

    pub fn free_space_offset(&self) -> u16 {
        BigEndian::read_u16(&self.data[FREE_SPACE_OFFSET..FREE_SPACE_OFFSET + 2])
    }

    fn set_free_space_offset(&mut self, offset: u16) {
        BigEndian::write_u16(
            &mut self.data[FREE_SPACE_OFFSET..FREE_SPACE_OFFSET + 2],
            offset,
        );
    }

    /// False for bytes that were never formatted, such as a zero-filled
    /// page left behind by a crash during allocation.
    pub fn is_formatted(&self) -> bool {
        (HEADER_SIZE..=PAGE_SIZE).contains(&(self.free_space_offset() as usize))
    }

    /// Bytes left after the free space offset; 0 for an unformatted page.
    pub fn free_space(&self) -> usize {
        if !self.is_formatted() {
            return 0;
        }
        PAGE_SIZE - self.free_space_offset() as usize
    }

    /// Appends `raw` at the free space offset and returns where it landed.
    pub fn insert(&mut self, raw: &[u8]) -> Option<u16> {
        if !self.is_formatted() {
            return None;
        }
        let offset = self.free_space_offset();
        let end = offset as usize + raw.len();
        if end > PAGE_SIZE {
            return None;
        }
        self.data[offset as usize..end].copy_from_slice(raw);
        self.set_free_space_offset(end as u16);
        Some(offset)
    }

    /// Writes `raw` at `offset`, moving the free space offset forward only
    /// if the write ends past it.
    pub fn recover_insert(&mut self, raw: &[u8], offset: u16) -> Option<()> {
        let end = offset as usize + raw.len();
        if end > PAGE_SIZE {
            return None;
        }
        self.data[offset as usize..end].copy_from_slice(raw);
        if end > self.free_space_offset() as usize {
            self.set_free_space_offset(end as u16);
        }
        Some(())
    }

    /// Overwrites bytes at `offset`; the free space offset is left alone.
    pub fn recover_update(&mut self, raw: &[u8], offset: u16) -> Option<()> {
        let end = offset as usize + raw.len();
        if end > PAGE_SIZE {
            return None;
        }
        self.data[offset as usize..end].copy_from_slice(raw);
        Some(())
    }
}

/// Bytes of a freshly formatted data page.
pub fn init_raw() -> Box<[u8; PAGE_SIZE]> {
    let mut data = Box::new([0u8; PAGE_SIZE]);
    DataPage::new(&mut data);
    data
}

pub fn insert(page: &Page, raw: &[u8]) -> StorageResult<u16> {
    let mut data = page.lock();
    let mut view = DataPage::from_data(&mut data);
    let available = view.free_space();
    let offset = view.insert(raw).ok_or(StorageError::PageFull {
        page: page.number(),
        required: raw.len(),
        available,
    })?;
    page.set_dirty(true);
    Ok(offset)
}

pub fn free_space_offset(page: &Page) -> u16 {
    let mut data = page.lock();
    DataPage::from_data(&mut data).free_space_offset()
}

pub fn free_space(page: &Page) -> usize {
    let mut data = page.lock();
    DataPage::from_data(&mut data).free_space()
}

pub fn is_formatted(page: &Page) -> bool {
    let mut data = page.lock();
    DataPage::from_data(&mut data).is_formatted()
}

/// Formats `page` in place as an empty data page.
pub fn format(page: &Page) {
    let mut data = page.lock();
    DataPage::new(&mut data);
    page.set_dirty(true);
}

pub fn recover_insert(page: &Page, raw: &[u8], offset: u16) -> StorageResult<()> {
    let mut data = page.lock();
    DataPage::from_data(&mut data)
        .recover_insert(raw, offset)
        .ok_or_else(|| out_of_bounds(page, raw, offset))?;
    page.set_dirty(true);
    Ok(())
}

pub fn recover_update(page: &Page, raw: &[u8], offset: u16) -> StorageResult<()> {
    let mut data = page.lock();
    DataPage::from_data(&mut data)
        .recover_update(raw, offset)
        .ok_or_else(|| out_of_bounds(page, raw, offset))?;
    page.set_dirty(true);
    Ok(())
}

fn out_of_bounds(page: &Page, raw: &[u8], offset: u16) -> StorageError {
    StorageError::PageFull {
        page: page.number(),
        required: offset as usize + raw.len(),
        available: PAGE_SIZE,
    }
}
