//! Which versions a transaction may see.

use super::mvcc::{IsolationLevel, Transaction};
use super::version::VersionedEntry;
use crate::storage::StorageResult;
use crate::transaction::{TransactionId, TransactionLedger};

/// Whether `entry` is visible to `txn`.
pub fn is_visible(
    ledger: &TransactionLedger,
    txn: &Transaction,
    entry: &VersionedEntry,
) -> StorageResult<bool> {
    match txn.level() {
        IsolationLevel::ReadCommitted => read_committed(ledger, txn, entry),
        IsolationLevel::RepeatableRead => repeatable_read(ledger, txn, entry),
    }
}

/// Whether deleting `entry` would hide a change `txn` must not see.
///
/// Under repeatable-read this happens when the deleter has committed but
/// began after `txn` or was running when `txn` began; the caller has to
/// abort and retry instead of going ahead.
pub fn is_version_skip(
    ledger: &TransactionLedger,
    txn: &Transaction,
    entry: &VersionedEntry,
) -> StorageResult<bool> {
    if txn.level() == IsolationLevel::ReadCommitted {
        return Ok(false);
    }
    let xmax = entry.xmax;
    Ok(ledger.is_committed(xmax)? && (xmax > txn.xid() || txn.in_snapshot(xmax)))
}

fn read_committed(
    ledger: &TransactionLedger,
    txn: &Transaction,
    entry: &VersionedEntry,
) -> StorageResult<bool> {
    let (xid, xmin, xmax) = (txn.xid(), entry.xmin, entry.xmax);
    if xmin == xid && xmax.is_super() {
        return Ok(true);
    }
    if !ledger.is_committed(xmin)? {
        return Ok(false);
    }
    if xmax.is_super() {
        return Ok(true);
    }
    Ok(xmax != xid && !ledger.is_committed(xmax)?)
}

fn repeatable_read(
    ledger: &TransactionLedger,
    txn: &Transaction,
    entry: &VersionedEntry,
) -> StorageResult<bool> {
    let (xid, xmin, xmax) = (txn.xid(), entry.xmin, entry.xmax);
    if xmin == xid && xmax.is_super() {
        return Ok(true);
    }
    if !(ledger.is_committed(xmin)? && xmin < xid && !txn.in_snapshot(xmin)) {
        return Ok(false);
    }
    if xmax.is_super() {
        return Ok(true);
    }
    if xmax == xid {
        return Ok(false);
    }
    Ok(!ledger.is_committed(xmax)? || deleted_after_start(txn, xmax))
}

fn deleted_after_start(txn: &Transaction, xmax: TransactionId) -> bool {
    xmax > txn.xid() || txn.in_snapshot(xmax)
}
