//! Records written to the log by the data manager.
//!
//! ```text
//! insert: [0] [xid: 8] [page: 4] [offset: 2] [raw]
//! update: [1] [xid: 8] [uid: 8] [old raw] [new raw]
//! ```
//!
//! All integers are big-endian. The two raw images of an update always have
//! the same length, so the split point is implied by the record length.

use byteorder::{BigEndian, ByteOrder};
use bytes::{BufMut, BytesMut};

use crate::storage::address::Address;
use crate::storage::error::{StorageError, StorageResult};
use crate::transaction::TransactionId;

pub const INSERT_TYPE: u8 = 0;
pub const UPDATE_TYPE: u8 = 1;

const TYPE_SIZE: usize = 1;
const XID_SIZE: usize = 8;
const INSERT_HEADER_SIZE: usize = TYPE_SIZE + XID_SIZE + 4 + 2;
const UPDATE_HEADER_SIZE: usize = TYPE_SIZE + XID_SIZE + 8;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InsertRecord {
    pub xid: TransactionId,
    pub page: u32,
    pub offset: u16,
    pub raw: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdateRecord {
    pub xid: TransactionId,
    pub address: Address,
    pub old_raw: Vec<u8>,
    pub new_raw: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogRecord {
    Insert(InsertRecord),
    Update(UpdateRecord),
}

impl LogRecord {
    pub fn insert(xid: TransactionId, page: u32, offset: u16, raw: &[u8]) -> Self {
        Self::Insert(InsertRecord {
            xid,
            page,
            offset,
            raw: raw.to_vec(),
        })
    }

    pub fn update(xid: TransactionId, address: Address, old_raw: &[u8], new_raw: &[u8]) -> Self {
        debug_assert_eq!(old_raw.len(), new_raw.len());
        Self::Update(UpdateRecord {
            xid,
            address,
            old_raw: old_raw.to_vec(),
            new_raw: new_raw.to_vec(),
        })
    }

    pub fn xid(&self) -> TransactionId {
        match self {
            Self::Insert(r) => r.xid,
            Self::Update(r) => r.xid,
        }
    }

    /// The page this record touches.
    pub fn page(&self) -> u32 {
        match self {
            Self::Insert(r) => r.page,
            Self::Update(r) => r.address.page,
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        match self {
            Self::Insert(r) => {
                let mut buf = BytesMut::with_capacity(INSERT_HEADER_SIZE + r.raw.len());
                buf.put_u8(INSERT_TYPE);
                buf.put_u64(r.xid.value());
                buf.put_u32(r.page);
                buf.put_u16(r.offset);
                buf.put_slice(&r.raw);
                buf.to_vec()
            }
            Self::Update(r) => {
                let mut buf = BytesMut::with_capacity(
                    UPDATE_HEADER_SIZE + r.old_raw.len() + r.new_raw.len(),
                );
                buf.put_u8(UPDATE_TYPE);
                buf.put_u64(r.xid.value());
                buf.put_u64(r.address.to_uid());
                buf.put_slice(&r.old_raw);
                buf.put_slice(&r.new_raw);
                buf.to_vec()
            }
        }
    }

    pub fn decode(data: &[u8]) -> StorageResult<Self> {
        let Some(&record_type) = data.first() else {
            return Err(StorageError::BadLogFile("empty log record".to_string()));
        };
        match record_type {
            INSERT_TYPE => {
                if data.len() < INSERT_HEADER_SIZE {
                    return Err(short_record("insert", data.len()));
                }
                Ok(Self::Insert(InsertRecord {
                    xid: TransactionId(BigEndian::read_u64(&data[1..9])),
                    page: BigEndian::read_u32(&data[9..13]),
                    offset: BigEndian::read_u16(&data[13..15]),
                    raw: data[INSERT_HEADER_SIZE..].to_vec(),
                }))
            }
            UPDATE_TYPE => {
                if data.len() < UPDATE_HEADER_SIZE {
                    return Err(short_record("update", data.len()));
                }
                let images = &data[UPDATE_HEADER_SIZE..];
                if images.len() % 2 != 0 {
                    return Err(StorageError::BadLogFile(format!(
                        "update record images have odd total length {}",
                        images.len()
                    )));
                }
                let (old_raw, new_raw) = images.split_at(images.len() / 2);
                Ok(Self::Update(UpdateRecord {
                    xid: TransactionId(BigEndian::read_u64(&data[1..9])),
                    address: Address::from_uid(BigEndian::read_u64(&data[9..17])),
                    old_raw: old_raw.to_vec(),
                    new_raw: new_raw.to_vec(),
                }))
            }
            other => Err(StorageError::BadLogFile(format!(
                "unknown log record type {}",
                other
            ))),
        }
    }
}

fn short_record(kind: &str, len: usize) -> StorageError {
    StorageError::BadLogFile(format!("{} record truncated to {} bytes", kind, len))
}
