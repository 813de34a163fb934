//! Records stored on data pages.
//!
//! ```text
//! [valid: 1] [length: 2] [payload: length]
//! ```
//!
//! A data item is a view of one such record inside a cached page. It never
//! copies the record out of the page; the bytes are read and written in
//! place, and the page's write-back makes them durable.
//!
//! Mutating a record goes through [`DataItem::before`], which takes the
//! item's write lock and keeps a copy of the old bytes. The returned
//! [`DataItemWriter`] either finishes with [`DataItemWriter::after`], which
//! logs the change, or is dropped, which puts the old bytes back.

use std::sync::Arc;

use byteorder::{BigEndian, ByteOrder};
use bytes::{BufMut, BytesMut};
use parking_lot::{Mutex, RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::access::data_manager::DataManager;
use crate::storage::address::Address;
use crate::storage::error::{StorageError, StorageResult};
use crate::storage::page::data_page;
use crate::storage::page::Page;
use crate::storage::PAGE_SIZE;
use crate::transaction::TransactionId;

const VALID_OFFSET: usize = 0;
const LENGTH_OFFSET: usize = 1;
pub const RECORD_HEADER_SIZE: usize = 3;

pub const VALID: u8 = 1;
pub const INVALID: u8 = 0;

/// Wraps a payload into a live record.
pub fn wrap_raw(payload: &[u8]) -> Vec<u8> {
    let mut raw = BytesMut::with_capacity(RECORD_HEADER_SIZE + payload.len());
    raw.put_u8(VALID);
    raw.put_u16(payload.len() as u16);
    raw.put_slice(payload);
    raw.to_vec()
}

/// Marks a record as deleted.
pub fn set_raw_invalid(raw: &mut [u8]) {
    raw[VALID_OFFSET] = INVALID;
}

pub struct DataItem {
    address: Address,
    page: Arc<Page>,
    /// Length of the whole record, header included.
    len: usize,
    lock: RwLock<()>,
    old_raw: Mutex<Vec<u8>>,
}

impl DataItem {
    /// Reads the record header at `address` from a page that holds it.
    pub(crate) fn parse(page: Arc<Page>, address: Address) -> StorageResult<Self> {
        let start = address.offset as usize;
        let corrupt = |reason: String| StorageError::CorruptRecord { address, reason };

        if start < data_page::HEADER_SIZE || start + RECORD_HEADER_SIZE > PAGE_SIZE {
            return Err(corrupt(format!("offset {} is outside the record area", start)));
        }
        let payload_len = {
            let data = page.lock();
            BigEndian::read_u16(&data[start + LENGTH_OFFSET..start + RECORD_HEADER_SIZE]) as usize
        };
        let len = RECORD_HEADER_SIZE + payload_len;
        if start + len > PAGE_SIZE {
            return Err(corrupt(format!(
                "length {} runs past the end of the page",
                payload_len
            )));
        }

        Ok(Self {
            address,
            page,
            len,
            lock: RwLock::new(()),
            old_raw: Mutex::new(vec![0u8; len]),
        })
    }

    pub fn address(&self) -> Address {
        self.address
    }

    pub fn page(&self) -> &Arc<Page> {
        &self.page
    }

    pub fn is_valid(&self) -> bool {
        self.page.lock()[self.address.offset as usize + VALID_OFFSET] == VALID
    }

    /// Copies out the payload under the item's read lock.
    pub fn data(&self) -> Vec<u8> {
        let _guard = self.lock.read();
        self.payload_bytes()
    }

    /// Holds the item's read lock for a multi-step read.
    pub fn read_lock(&self) -> RwLockReadGuard<'_, ()> {
        self.lock.read()
    }

    /// Opens the item for an in-place change, saving its current bytes.
    pub fn before(&self) -> DataItemWriter<'_> {
        let guard = self.lock.write();
        *self.old_raw.lock() = self.raw_bytes();
        self.page.set_dirty(true);
        DataItemWriter {
            item: self,
            _guard: guard,
            finished: false,
        }
    }

    /// The record bytes saved by the last [`before`](Self::before).
    pub(crate) fn old_raw(&self) -> Vec<u8> {
        self.old_raw.lock().clone()
    }

    /// Current record bytes, header included. Takes no item lock.
    pub(crate) fn raw_bytes(&self) -> Vec<u8> {
        let start = self.address.offset as usize;
        self.page.lock()[start..start + self.len].to_vec()
    }

    fn payload_bytes(&self) -> Vec<u8> {
        let start = self.address.offset as usize + RECORD_HEADER_SIZE;
        self.page.lock()[start..self.address.offset as usize + self.len].to_vec()
    }

    fn write_raw(&self, at: usize, bytes: &[u8]) {
        let start = self.address.offset as usize + at;
        self.page.lock()[start..start + bytes.len()].copy_from_slice(bytes);
    }
}

impl std::fmt::Debug for DataItem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DataItem")
            .field("address", &self.address)
            .field("len", &self.len)
            .finish()
    }
}

/// An in-progress change to a data item. Holds the item's write lock.
pub struct DataItemWriter<'a> {
    item: &'a DataItem,
    _guard: RwLockWriteGuard<'a, ()>,
    finished: bool,
}

impl DataItemWriter<'_> {
    pub fn payload(&self) -> Vec<u8> {
        self.item.payload_bytes()
    }

    pub fn payload_len(&self) -> usize {
        self.item.len - RECORD_HEADER_SIZE
    }

    /// Overwrites part of the payload starting at `offset`.
    pub fn write_payload(&mut self, offset: usize, bytes: &[u8]) -> StorageResult<()> {
        if offset + bytes.len() > self.payload_len() {
            return Err(StorageError::CorruptRecord {
                address: self.item.address,
                reason: format!(
                    "write of {} bytes at {} exceeds payload of {}",
                    bytes.len(),
                    offset,
                    self.payload_len()
                ),
            });
        }
        self.item.write_raw(RECORD_HEADER_SIZE + offset, bytes);
        Ok(())
    }

    /// Logs the change under `xid` and keeps it.
    ///
    /// If the log write fails the old bytes are restored and the error is
    /// returned.
    pub fn after(mut self, dm: &DataManager, xid: TransactionId) -> StorageResult<()> {
        dm.log_update(xid, self.item)?;
        self.finished = true;
        Ok(())
    }
}

impl Drop for DataItemWriter<'_> {
    fn drop(&mut self) {
        if !self.finished {
            let old = self.item.old_raw.lock().clone();
            self.item.write_raw(0, &old);
        }
    }
}
