//! Durable transaction status ledger.
//!
//! ```text
//! [xid counter: 8, big-endian] [status of xid 1] [status of xid 2] ...
//! ```
//!
//! The counter is the highest xid ever issued, so the file is always exactly
//! `8 + counter` bytes long. A file of any other length cannot be trusted
//! and refuses to open. Every status write is synced before returning.

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use log::info;
use parking_lot::Mutex;

use super::id::TransactionId;
use super::state::TransactionState;
use crate::storage::error::{StorageError, StorageResult};

const HEADER_SIZE: u64 = 8;
const STATUS_SIZE: u64 = 1;

pub struct TransactionLedger {
    file: Mutex<File>,
    /// Highest issued xid. Held across the whole of `begin`.
    counter: Mutex<u64>,
}

impl TransactionLedger {
    pub fn create(path: &Path) -> StorageResult<Self> {
        if path.exists() {
            return Err(StorageError::FileExists(path.to_path_buf()));
        }
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create_new(true)
            .open(path)?;
        file.write_u64::<BigEndian>(0)?;
        file.sync_all()?;

        Ok(Self {
            file: Mutex::new(file),
            counter: Mutex::new(0),
        })
    }

    pub fn open(path: &Path) -> StorageResult<Self> {
        if !path.exists() {
            return Err(StorageError::FileNotExists(path.to_path_buf()));
        }
        let mut file = OpenOptions::new().read(true).write(true).open(path)?;

        let len = file.metadata()?.len();
        if len < HEADER_SIZE {
            return Err(StorageError::BadXidFile(format!(
                "file is {} bytes, shorter than its header",
                len
            )));
        }
        file.seek(SeekFrom::Start(0))?;
        let counter = file.read_u64::<BigEndian>()?;
        let expected = counter
            .checked_mul(STATUS_SIZE)
            .and_then(|statuses| statuses.checked_add(HEADER_SIZE));
        if expected != Some(len) {
            return Err(StorageError::BadXidFile(format!(
                "counter {} does not match a file of {} bytes",
                counter, len
            )));
        }
        info!("opened xid ledger {:?} at xid {}", path, counter);

        Ok(Self {
            file: Mutex::new(file),
            counter: Mutex::new(counter),
        })
    }

    /// Issues the next xid and records it as active.
    pub fn begin(&self) -> StorageResult<TransactionId> {
        let mut counter = self.counter.lock();
        let xid = TransactionId(*counter + 1);
        self.write_status(xid, TransactionState::Active)?;

        let mut file = self.file.lock();
        file.seek(SeekFrom::Start(0))?;
        file.write_u64::<BigEndian>(xid.0)?;
        file.sync_data()?;
        *counter = xid.0;

        Ok(xid)
    }

    pub fn commit(&self, xid: TransactionId) -> StorageResult<()> {
        self.write_status(xid, TransactionState::Committed)
    }

    pub fn abort(&self, xid: TransactionId) -> StorageResult<()> {
        self.write_status(xid, TransactionState::Aborted)
    }

    pub fn is_active(&self, xid: TransactionId) -> StorageResult<bool> {
        if xid.is_super() {
            return Ok(false);
        }
        Ok(self.read_status(xid)? == TransactionState::ACTIVE_BYTE)
    }

    pub fn is_committed(&self, xid: TransactionId) -> StorageResult<bool> {
        if xid.is_super() {
            return Ok(true);
        }
        Ok(self.read_status(xid)? == TransactionState::COMMITTED_BYTE)
    }

    pub fn is_aborted(&self, xid: TransactionId) -> StorageResult<bool> {
        if xid.is_super() {
            return Ok(false);
        }
        Ok(self.read_status(xid)? == TransactionState::ABORTED_BYTE)
    }

    /// The decoded state of `xid`, `None` for a status byte no state writes.
    pub fn state(&self, xid: TransactionId) -> StorageResult<Option<TransactionState>> {
        if xid.is_super() {
            return Ok(Some(TransactionState::Committed));
        }
        Ok(TransactionState::from_byte(self.read_status(xid)?))
    }

    /// Highest xid issued so far.
    pub fn last_xid(&self) -> TransactionId {
        TransactionId(*self.counter.lock())
    }

    pub fn close(&self) -> StorageResult<()> {
        self.file.lock().sync_all()?;
        Ok(())
    }

    fn write_status(&self, xid: TransactionId, state: TransactionState) -> StorageResult<()> {
        let mut file = self.file.lock();
        file.seek(SeekFrom::Start(Self::status_position(xid)))?;
        file.write_all(&[state.to_byte()])?;
        file.sync_data()?;
        Ok(())
    }

    fn read_status(&self, xid: TransactionId) -> StorageResult<u8> {
        let mut file = self.file.lock();
        file.seek(SeekFrom::Start(Self::status_position(xid)))?;
        let mut status = [0u8; STATUS_SIZE as usize];
        file.read_exact(&mut status)?;
        Ok(status[0])
    }

    fn status_position(xid: TransactionId) -> u64 {
        HEADER_SIZE + xid.0.saturating_sub(1) * STATUS_SIZE
    }
}
