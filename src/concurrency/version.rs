//! Versioned entries stored as data item payloads.
//!
//! ```text
//! [xmin: 8] [xmax: 8] [payload]
//! ```
//!
//! `xmin` is the creating transaction and `xmax` the deleting one, or the
//! super transaction (0) while the entry is not deleted.

use byteorder::{BigEndian, ByteOrder};
use bytes::{BufMut, BytesMut};

use crate::access::{DataItem, DataManager};
use crate::storage::{Address, StorageError, StorageResult};
use crate::transaction::TransactionId;

const XMIN_OFFSET: usize = 0;
const XMAX_OFFSET: usize = 8;
pub const ENTRY_HEADER_SIZE: usize = 16;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionedEntry {
    pub xmin: TransactionId,
    pub xmax: TransactionId,
    pub payload: Vec<u8>,
}

impl VersionedEntry {
    pub fn new(xmin: TransactionId, payload: &[u8]) -> Self {
        Self {
            xmin,
            xmax: TransactionId::SUPER,
            payload: payload.to_vec(),
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut buf = BytesMut::with_capacity(ENTRY_HEADER_SIZE + self.payload.len());
        buf.put_u64(self.xmin.value());
        buf.put_u64(self.xmax.value());
        buf.put_slice(&self.payload);
        buf.to_vec()
    }

    pub fn decode(data: &[u8]) -> Option<Self> {
        if data.len() < ENTRY_HEADER_SIZE {
            return None;
        }
        Some(Self {
            xmin: TransactionId(BigEndian::read_u64(&data[XMIN_OFFSET..XMAX_OFFSET])),
            xmax: TransactionId(BigEndian::read_u64(&data[XMAX_OFFSET..ENTRY_HEADER_SIZE])),
            payload: data[ENTRY_HEADER_SIZE..].to_vec(),
        })
    }

    /// Decodes the entry held by `item`.
    pub fn from_item(item: &DataItem) -> StorageResult<Self> {
        let data = item.data();
        Self::decode(&data).ok_or_else(|| StorageError::CorruptRecord {
            address: item.address(),
            reason: format!("{} bytes is too short for a versioned entry", data.len()),
        })
    }

    /// Stores a new entry created by `xid`.
    pub fn insert(dm: &DataManager, xid: TransactionId, payload: &[u8]) -> StorageResult<Address> {
        dm.insert(xid, &Self::new(xid, payload).encode())
    }

    /// Reads the entry at `address`, or `None` if its record is gone.
    pub fn read(dm: &DataManager, address: Address) -> StorageResult<Option<Self>> {
        let Some(item) = dm.read(address)? else {
            return Ok(None);
        };
        let entry = Self::from_item(&item);
        dm.release_record(&item)?;
        entry.map(Some)
    }
}

/// Marks the entry in `item` as deleted by `xid`, logging the change.
pub fn set_xmax(dm: &DataManager, item: &DataItem, xid: TransactionId) -> StorageResult<()> {
    let mut writer = item.before();
    writer.write_payload(XMAX_OFFSET, &xid.value().to_be_bytes())?;
    writer.after(dm, xid)
}
