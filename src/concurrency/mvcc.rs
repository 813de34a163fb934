//! In-memory transactions and the table of active ones.
//!
//! The ledger records what happened to every xid; this module keeps what
//! only matters while a transaction runs: its isolation level, the snapshot
//! of transactions active when it began, and whether it has failed.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use log::debug;
use parking_lot::Mutex;
use thiserror::Error;

use crate::storage::StorageError;
use crate::transaction::{TransactionId, TransactionLedger};

/// Isolation levels supported by the MVCC system.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IsolationLevel {
    /// Each read sees whatever is committed at the time of the read.
    #[default]
    ReadCommitted,
    /// All reads see the state as of the transaction's start.
    RepeatableRead,
}

impl IsolationLevel {
    /// Numeric level: 0 for read-committed, 1 for repeatable-read.
    pub fn level(self) -> u8 {
        match self {
            Self::ReadCommitted => 0,
            Self::RepeatableRead => 1,
        }
    }

    pub fn from_level(level: u8) -> Option<Self> {
        match level {
            0 => Some(Self::ReadCommitted),
            1 => Some(Self::RepeatableRead),
            _ => None,
        }
    }

    /// Whether this isolation level uses a consistent snapshot.
    pub fn uses_snapshot(&self) -> bool {
        matches!(self, Self::RepeatableRead)
    }
}

#[derive(Error, Debug)]
pub enum MvccError {
    #[error("Transaction {0} is not active")]
    UnknownTransaction(TransactionId),

    #[error("Transaction {xid} failed: {reason}")]
    TransactionFailed { xid: TransactionId, reason: String },

    #[error(transparent)]
    Storage(#[from] StorageError),
}

pub type MvccResult<T> = Result<T, MvccError>;

#[derive(Debug)]
pub struct Transaction {
    xid: TransactionId,
    level: IsolationLevel,
    /// Transactions active when this one began. Empty under read-committed.
    snapshot: HashSet<TransactionId>,
    error: Mutex<Option<String>>,
    auto_aborted: AtomicBool,
}

impl Transaction {
    pub fn new(
        xid: TransactionId,
        level: IsolationLevel,
        active: impl IntoIterator<Item = TransactionId>,
    ) -> Self {
        let snapshot = if level.uses_snapshot() {
            active.into_iter().collect()
        } else {
            HashSet::new()
        };
        Self {
            xid,
            level,
            snapshot,
            error: Mutex::new(None),
            auto_aborted: AtomicBool::new(false),
        }
    }

    pub fn xid(&self) -> TransactionId {
        self.xid
    }

    pub fn level(&self) -> IsolationLevel {
        self.level
    }

    /// Whether `xid` was active when this transaction began.
    pub fn in_snapshot(&self, xid: TransactionId) -> bool {
        !xid.is_super() && self.snapshot.contains(&xid)
    }

    /// Records the first failure; later ones are ignored.
    pub fn set_error(&self, reason: impl Into<String>) {
        self.error.lock().get_or_insert_with(|| reason.into());
    }

    pub fn error(&self) -> Option<String> {
        self.error.lock().clone()
    }

    pub fn is_auto_aborted(&self) -> bool {
        self.auto_aborted.load(Ordering::SeqCst)
    }
}

/// Registry of running transactions, backed by the ledger.
pub struct TransactionTable {
    ledger: Arc<TransactionLedger>,
    active: DashMap<TransactionId, Arc<Transaction>>,
    /// Makes xid issue and snapshot capture one step.
    begin_lock: Mutex<()>,
}

impl TransactionTable {
    pub fn new(ledger: Arc<TransactionLedger>) -> Self {
        Self {
            ledger,
            active: DashMap::new(),
            begin_lock: Mutex::new(()),
        }
    }

    pub fn ledger(&self) -> &Arc<TransactionLedger> {
        &self.ledger
    }

    pub fn begin(&self, level: IsolationLevel) -> MvccResult<Arc<Transaction>> {
        let _guard = self.begin_lock.lock();
        let xid = self.ledger.begin()?;
        let running: Vec<TransactionId> = self.active.iter().map(|entry| *entry.key()).collect();
        let txn = Arc::new(Transaction::new(xid, level, running));
        self.active.insert(xid, Arc::clone(&txn));
        debug!("began {} at level {}", xid, level.level());
        Ok(txn)
    }

    pub fn get(&self, xid: TransactionId) -> Option<Arc<Transaction>> {
        self.active.get(&xid).map(|entry| Arc::clone(entry.value()))
    }

    /// Commits `xid`. A transaction that has recorded a failure cannot
    /// commit; it is aborted instead and the failure is returned.
    pub fn commit(&self, xid: TransactionId) -> MvccResult<()> {
        let txn = self.get(xid).ok_or(MvccError::UnknownTransaction(xid))?;
        if let Some(reason) = txn.error() {
            self.abort(xid)?;
            return Err(MvccError::TransactionFailed { xid, reason });
        }
        self.active.remove(&xid);
        self.ledger.commit(xid)?;
        debug!("committed {}", xid);
        Ok(())
    }

    pub fn abort(&self, xid: TransactionId) -> MvccResult<()> {
        if self.active.remove(&xid).is_none() {
            return Err(MvccError::UnknownTransaction(xid));
        }
        self.ledger.abort(xid)?;
        debug!("aborted {}", xid);
        Ok(())
    }

    /// Aborts `xid` on the system's behalf, keeping `reason` on the
    /// transaction so its owner can see why.
    pub fn auto_abort(&self, xid: TransactionId, reason: impl Into<String>) -> MvccResult<()> {
        let txn = self.get(xid).ok_or(MvccError::UnknownTransaction(xid))?;
        txn.set_error(reason);
        txn.auto_aborted.store(true, Ordering::SeqCst);
        self.abort(xid)
    }

    pub fn active_count(&self) -> usize {
        self.active.len()
    }
}
