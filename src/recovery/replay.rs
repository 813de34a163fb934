//! Crash recovery by log replay.
//!
//! Runs at startup when the store was not closed cleanly:
//!
//! 1. Scan the log for the highest page it mentions and cut the page file
//!    back to that length.
//! 2. Redo, in log order, every record whose transaction has finished.
//! 3. Undo, newest first, every record whose transaction was still active,
//!    then mark that transaction aborted.
//!
//! An aborted transaction's inserts are redone with the record already
//! marked invalid and its updates are not redone, so a transaction aborted
//! by one recovery stays rolled back through any later one.

use std::collections::BTreeMap;

use log::{debug, info};

use super::log_record::LogRecord;
use crate::access::data_item;
use crate::storage::page::{data_page, META_PAGE_NUMBER};
use crate::storage::{Logger, PageStore, StorageResult};
use crate::transaction::{TransactionId, TransactionLedger, TransactionState};

/// Statistics collected during recovery.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RecoveryStats {
    /// Number of log records read.
    pub records_scanned: usize,
    /// Number of records reapplied.
    pub records_redone: usize,
    /// Number of records rolled back.
    pub records_undone: usize,
    /// Page count the page file was cut back to.
    pub truncated_to: u32,
    /// Transactions that were active at the crash, now aborted.
    pub aborted: Vec<TransactionId>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Direction {
    Redo,
    Undo,
}

pub fn recover(
    ledger: &TransactionLedger,
    logger: &Logger,
    pages: &PageStore,
) -> StorageResult<RecoveryStats> {
    info!("Starting recovery");
    let mut stats = RecoveryStats::default();

    let max_page = scan_max_page(logger, &mut stats)?;
    pages.truncate_to(max_page)?;
    stats.truncated_to = max_page;
    info!("Truncated page file to {} pages", max_page);

    redo_phase(ledger, logger, pages, &mut stats)?;
    info!("Redo complete: {} records", stats.records_redone);

    undo_phase(ledger, logger, pages, &mut stats)?;
    info!(
        "Undo complete: {} records, {} transactions aborted",
        stats.records_undone,
        stats.aborted.len()
    );

    Ok(stats)
}

fn scan_max_page(logger: &Logger, stats: &mut RecoveryStats) -> StorageResult<u32> {
    let mut max_page = META_PAGE_NUMBER;
    logger.rewind();
    while let Some(data) = logger.next()? {
        let record = LogRecord::decode(&data)?;
        stats.records_scanned += 1;
        max_page = max_page.max(record.page());
    }
    Ok(max_page)
}

fn redo_phase(
    ledger: &TransactionLedger,
    logger: &Logger,
    pages: &PageStore,
    stats: &mut RecoveryStats,
) -> StorageResult<()> {
    logger.rewind();
    while let Some(data) = logger.next()? {
        let record = LogRecord::decode(&data)?;
        let direction = match (ledger.state(record.xid())?, &record) {
            (Some(TransactionState::Committed), _) => Direction::Redo,
            (Some(TransactionState::Aborted), LogRecord::Insert(_)) => Direction::Undo,
            _ => continue,
        };
        apply(pages, &record, direction)?;
        stats.records_redone += 1;
    }
    Ok(())
}

fn undo_phase(
    ledger: &TransactionLedger,
    logger: &Logger,
    pages: &PageStore,
    stats: &mut RecoveryStats,
) -> StorageResult<()> {
    let mut unfinished: BTreeMap<TransactionId, Vec<LogRecord>> = BTreeMap::new();
    logger.rewind();
    while let Some(data) = logger.next()? {
        let record = LogRecord::decode(&data)?;
        if ledger.is_active(record.xid())? {
            unfinished.entry(record.xid()).or_default().push(record);
        }
    }

    for (xid, records) in unfinished {
        debug!("Rolling back {} ({} records)", xid, records.len());
        for record in records.iter().rev() {
            apply(pages, record, Direction::Undo)?;
            stats.records_undone += 1;
        }
        ledger.abort(xid)?;
        stats.aborted.push(xid);
    }
    Ok(())
}

fn apply(pages: &PageStore, record: &LogRecord, direction: Direction) -> StorageResult<()> {
    let page = pages.get_page(record.page())?;
    let result = match (record, direction) {
        (LogRecord::Insert(insert), Direction::Redo) => {
            data_page::recover_insert(&page, &insert.raw, insert.offset)
        }
        (LogRecord::Insert(insert), Direction::Undo) => {
            let mut raw = insert.raw.clone();
            data_item::set_raw_invalid(&mut raw);
            data_page::recover_insert(&page, &raw, insert.offset)
        }
        (LogRecord::Update(update), Direction::Redo) => {
            data_page::recover_update(&page, &update.new_raw, update.address.offset)
        }
        (LogRecord::Update(update), Direction::Undo) => {
            data_page::recover_update(&page, &update.old_raw, update.address.offset)
        }
    };
    let released = pages.release_page(&page);
    result.and(released)
}
