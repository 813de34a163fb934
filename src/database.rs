//! Database bootstrap.
//!
//! Ties the xid ledger, the data manager and the table of running
//! transactions to one base path, and reads entries through the MVCC
//! visibility rules.

use crate::access::DataManager;
use crate::concurrency::{is_visible, IsolationLevel, Transaction, TransactionTable, VersionedEntry};
use crate::recovery::RecoveryStats;
use crate::storage::disk::sibling_file;
use crate::storage::Address;
use crate::transaction::{TransactionId, TransactionLedger};
use anyhow::{bail, Context, Result};
use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;

pub const XID_SUFFIX: &str = ".xid";

/// Where the database lives and how much memory its page cache may use.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// Base path; the store uses `<path>.db`, `<path>.log` and `<path>.xid`.
    pub path: PathBuf,
    pub memory_bytes: u64,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("./tidedb_data/tide"),
            memory_bytes: 64 * 1024 * 1024,
        }
    }
}

impl DatabaseConfig {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            ..Self::default()
        }
    }

    pub fn with_memory(mut self, memory_bytes: u64) -> Self {
        self.memory_bytes = memory_bytes;
        self
    }

    pub fn xid_path(&self) -> PathBuf {
        sibling_file(&self.path, XID_SUFFIX)
    }
}

/// High-level database interface that integrates all layers
pub struct Database {
    config: DatabaseConfig,
    ledger: Arc<TransactionLedger>,
    data: DataManager,
    transactions: TransactionTable,
}

impl Database {
    /// Create a new database at the configured path
    pub fn create(config: DatabaseConfig) -> Result<Self> {
        let xid_path = config.xid_path();
        if xid_path.exists() {
            bail!("Database already exists at {:?}", config.path);
        }

        let ledger = TransactionLedger::create(&xid_path).context("Failed to create xid ledger")?;
        let data = DataManager::create(&config.path, config.memory_bytes)
            .context("Failed to create data files")?;
        info!("Created database at {:?}", config.path);

        Ok(Self::assemble(config, ledger, data))
    }

    /// Open an existing database, recovering it first if needed
    pub fn open(config: DatabaseConfig) -> Result<Self> {
        let xid_path = config.xid_path();
        if !xid_path.exists() {
            bail!("Database does not exist at {:?}", config.path);
        }

        let ledger = TransactionLedger::open(&xid_path).context("Failed to open xid ledger")?;
        let data = DataManager::open(&config.path, config.memory_bytes, &ledger)
            .context("Failed to open data files")?;

        Ok(Self::assemble(config, ledger, data))
    }

    /// Whether the files for `path` are present
    pub fn exists(path: &Path) -> bool {
        sibling_file(path, XID_SUFFIX).exists()
    }

    fn assemble(config: DatabaseConfig, ledger: TransactionLedger, data: DataManager) -> Self {
        let ledger = Arc::new(ledger);
        let transactions = TransactionTable::new(Arc::clone(&ledger));
        Self {
            config,
            ledger,
            data,
            transactions,
        }
    }

    pub fn config(&self) -> &DatabaseConfig {
        &self.config
    }

    pub fn ledger(&self) -> &TransactionLedger {
        &self.ledger
    }

    pub fn data_manager(&self) -> &DataManager {
        &self.data
    }

    pub fn transactions(&self) -> &TransactionTable {
        &self.transactions
    }

    /// What recovery did when this database was opened, if it ran
    pub fn recovery_stats(&self) -> Option<&RecoveryStats> {
        self.data.recovery_stats()
    }

    pub fn begin(&self, level: IsolationLevel) -> Result<Arc<Transaction>> {
        Ok(self.transactions.begin(level)?)
    }

    pub fn commit(&self, xid: TransactionId) -> Result<()> {
        Ok(self.transactions.commit(xid)?)
    }

    pub fn abort(&self, xid: TransactionId) -> Result<()> {
        Ok(self.transactions.abort(xid)?)
    }

    /// Store a new entry created by `txn`
    pub fn insert(&self, txn: &Transaction, payload: &[u8]) -> Result<Address> {
        Ok(VersionedEntry::insert(&self.data, txn.xid(), payload)?)
    }

    /// Read the payload at `address` if `txn` can see it
    pub fn read(&self, txn: &Transaction, address: Address) -> Result<Option<Vec<u8>>> {
        let Some(entry) = VersionedEntry::read(&self.data, address)? else {
            return Ok(None);
        };
        if is_visible(&self.ledger, txn, &entry)? {
            Ok(Some(entry.payload))
        } else {
            Ok(None)
        }
    }

    /// Close the database cleanly
    pub fn close(self) -> Result<()> {
        let running = self.transactions.active_count();
        if running > 0 {
            warn!("Closing with {} transactions still active", running);
        }
        self.data.close().context("Failed to close data files")?;
        self.ledger.close().context("Failed to close xid ledger")?;
        info!("Closed database at {:?}", self.config.path);
        Ok(())
    }
}
