//! Data manager: records on pages, made durable by the log.
//!
//! Inserts pick a page through the free-space index, log the new record and
//! only then write it into the page. Reads go through a record cache keyed
//! by address; each cached record keeps its page acquired in the page cache
//! until the record itself is evicted.

use std::path::Path;
use std::sync::Arc;

use log::{debug, info, warn};

use crate::access::data_item::{self, DataItem};
use crate::cache::ResourceCache;
use crate::recovery::{self, LogRecord, RecoveryStats};
use crate::storage::disk::sibling_file;
use crate::storage::page::data_page::{self, MAX_FREE_SPACE};
use crate::storage::page::{MetaPage, Page, META_PAGE_NUMBER};
use crate::storage::{
    Address, FreeSpaceIndex, Logger, PageStore, StorageError, StorageResult,
};
use crate::transaction::{TransactionId, TransactionLedger};

pub const DB_SUFFIX: &str = ".db";
pub const LOG_SUFFIX: &str = ".log";

/// Times an insert asks the free-space index for a page before giving up.
pub const MAX_INSERT_ATTEMPTS: usize = 5;

pub struct DataManager {
    pages: Arc<PageStore>,
    logger: Logger,
    free_space: FreeSpaceIndex,
    records: ResourceCache<DataItem>,
    /// Held for the whole session so its marker can be rewritten on close.
    meta: Arc<Page>,
    recovery: Option<RecoveryStats>,
}

impl DataManager {
    /// Creates `<path>.db` and `<path>.log` for a new store.
    pub fn create(path: &Path, memory_bytes: u64) -> StorageResult<Self> {
        let pages = PageStore::create(&sibling_file(path, DB_SUFFIX), memory_bytes)?;
        let logger = Logger::create(&sibling_file(path, LOG_SUFFIX))?;

        let meta_number = pages.new_page(&MetaPage::init_raw())?;
        debug_assert_eq!(meta_number, META_PAGE_NUMBER);
        let meta = pages.get_page(META_PAGE_NUMBER)?;
        pages.flush_page(&meta)?;

        info!("created data files at {:?}", path);
        Ok(Self::assemble(pages, logger, meta, None))
    }

    /// Opens an existing store, replaying the log first if the last run did
    /// not close it cleanly.
    pub fn open(path: &Path, memory_bytes: u64, ledger: &TransactionLedger) -> StorageResult<Self> {
        let pages = PageStore::open(&sibling_file(path, DB_SUFFIX), memory_bytes)?;
        let logger = Logger::open(&sibling_file(path, LOG_SUFFIX))?;

        let meta = pages.get_page(META_PAGE_NUMBER)?;
        let recovery = if MetaPage::was_closed_cleanly(&meta) {
            None
        } else {
            warn!("{:?} was not closed cleanly", path);
            Some(recovery::recover(ledger, &logger, &pages)?)
        };

        let dm = Self::assemble(pages, logger, meta, recovery);
        dm.fill_free_space()?;
        MetaPage::set_open(&dm.meta);
        dm.pages.flush_page(&dm.meta)?;

        info!(
            "opened data files at {:?}: {} pages, {} with free space",
            path,
            dm.pages.page_count(),
            dm.free_space.len()
        );
        Ok(dm)
    }

    fn assemble(
        pages: PageStore,
        logger: Logger,
        meta: Arc<Page>,
        recovery: Option<RecoveryStats>,
    ) -> Self {
        let pages = Arc::new(pages);

        let loader_pages = Arc::clone(&pages);
        let evictor_pages = Arc::clone(&pages);
        let records = ResourceCache::new(
            0,
            Box::new(move |uid: u64| -> StorageResult<DataItem> {
                let address = Address::from_uid(uid);
                let page = loader_pages.get_page(address.page)?;
                match DataItem::parse(Arc::clone(&page), address) {
                    Ok(item) => Ok(item),
                    Err(e) => {
                        if let Err(release) = loader_pages.release_page(&page) {
                            warn!("release of page {} failed: {}", page.number(), release);
                        }
                        Err(e)
                    }
                }
            }),
            Box::new(move |item: &DataItem| -> StorageResult<()> {
                evictor_pages.release_page(item.page())
            }),
        );

        Self {
            pages,
            logger,
            free_space: FreeSpaceIndex::new(),
            records,
            meta,
            recovery,
        }
    }

    fn fill_free_space(&self) -> StorageResult<()> {
        for number in META_PAGE_NUMBER + 1..=self.pages.page_count() {
            let page = self.pages.get_page(number)?;
            if !data_page::is_formatted(&page) {
                warn!("page {} was never formatted, formatting it", number);
                data_page::format(&page);
            }
            self.free_space.add(number, data_page::free_space(&page));
            self.pages.release_page(&page)?;
        }
        Ok(())
    }

    /// Returns the live record at `address`, or `None` if it was deleted.
    ///
    /// A returned item must be handed back with [`release_record`](Self::release_record).
    pub fn read(&self, address: Address) -> StorageResult<Option<Arc<DataItem>>> {
        let item = self.records.acquire(address.to_uid())?;
        if !item.is_valid() {
            self.release_record(&item)?;
            return Ok(None);
        }
        Ok(Some(item))
    }

    /// Stores `payload` as a new record under `xid` and returns its address.
    pub fn insert(&self, xid: TransactionId, payload: &[u8]) -> StorageResult<Address> {
        let raw = data_item::wrap_raw(payload);
        if raw.len() > MAX_FREE_SPACE {
            return Err(StorageError::DataTooLarge {
                required: raw.len(),
                max: MAX_FREE_SPACE,
            });
        }

        let mut selected = None;
        for _ in 0..MAX_INSERT_ATTEMPTS {
            if let Some(info) = self.free_space.select(raw.len()) {
                selected = Some(info);
                break;
            }
            let number = self.pages.new_page(&data_page::init_raw())?;
            debug!("allocated page {}", number);
            self.free_space.add(number, MAX_FREE_SPACE);
        }
        let info = selected.ok_or(StorageError::DatabaseBusy {
            attempts: MAX_INSERT_ATTEMPTS,
        })?;

        let page = match self.pages.get_page(info.page_number) {
            Ok(page) => page,
            Err(e) => {
                self.free_space.add(info.page_number, info.free_space);
                return Err(e);
            }
        };
        let inserted = self.insert_into(&page, xid, &raw);
        let free_space = data_page::free_space(&page);
        let released = self.pages.release_page(&page);
        self.free_space.add(info.page_number, free_space);

        let offset = inserted?;
        released?;
        Ok(Address::new(info.page_number, offset))
    }

    fn insert_into(&self, page: &Page, xid: TransactionId, raw: &[u8]) -> StorageResult<u16> {
        let offset = data_page::free_space_offset(page);
        let record = LogRecord::insert(xid, page.number(), offset, raw);
        self.logger.log(&record.encode())?;
        data_page::insert(page, raw)
    }

    /// Logs the change made to `item` since its last `before`.
    pub fn log_update(&self, xid: TransactionId, item: &DataItem) -> StorageResult<()> {
        let record = LogRecord::update(xid, item.address(), &item.old_raw(), &item.raw_bytes());
        self.logger.log(&record.encode())
    }

    pub fn release_record(&self, item: &DataItem) -> StorageResult<()> {
        self.records.release(item.address().to_uid())
    }

    /// What recovery did when this store was opened, if it ran.
    pub fn recovery_stats(&self) -> Option<&RecoveryStats> {
        self.recovery.as_ref()
    }

    pub fn page_count(&self) -> u32 {
        self.pages.page_count()
    }

    /// Pages currently available to inserts.
    pub fn free_pages(&self) -> usize {
        self.free_space.len()
    }

    /// Evicts every record, closes the log and marks the store cleanly closed.
    pub fn close(self) -> StorageResult<()> {
        self.records.close()?;
        self.logger.close()?;

        MetaPage::set_closed(&self.meta);
        self.pages.flush_page(&self.meta)?;
        self.pages.release_page(&self.meta)?;
        self.pages.close()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::PAGE_SIZE;
    use anyhow::Result;
    use std::collections::HashSet;
    use std::thread;
    use tempfile::tempdir;

    const MEMORY: u64 = (PAGE_SIZE * 32) as u64;

    #[test]
    fn test_insert_and_read() -> Result<()> {
        let dir = tempdir()?;
        let dm = DataManager::create(&dir.path().join("t"), MEMORY)?;

        let address = dm.insert(TransactionId(1), b"hello")?;
        assert_eq!(address.page, 2);
        assert_eq!(address.offset, data_page::HEADER_SIZE as u16);

        let item = dm.read(address)?.expect("record should be live");
        assert_eq!(item.data(), b"hello");
        dm.release_record(&item)?;

        dm.close()?;
        Ok(())
    }

    #[test]
    fn test_data_too_large() -> Result<()> {
        let dir = tempdir()?;
        let dm = DataManager::create(&dir.path().join("t"), MEMORY)?;

        let payload = vec![0u8; MAX_FREE_SPACE];
        assert!(matches!(
            dm.insert(TransactionId(1), &payload),
            Err(StorageError::DataTooLarge { .. })
        ));

        let fits = vec![7u8; MAX_FREE_SPACE - data_item::RECORD_HEADER_SIZE];
        let address = dm.insert(TransactionId(1), &fits)?;
        let item = dm.read(address)?.expect("record should be live");
        assert_eq!(item.data().len(), fits.len());
        dm.release_record(&item)?;
        dm.close()?;
        Ok(())
    }

    #[test]
    fn test_records_fill_pages_in_order() -> Result<()> {
        let dir = tempdir()?;
        let dm = DataManager::create(&dir.path().join("t"), MEMORY)?;

        let payload = vec![1u8; 1000];
        let addresses = (0..20)
            .map(|_| dm.insert(TransactionId(1), &payload))
            .collect::<StorageResult<Vec<_>>>()?;

        let pages: HashSet<u32> = addresses.iter().map(|a| a.page).collect();
        assert!(pages.len() >= 3);
        assert_eq!(dm.page_count() as usize, pages.len() + 1);
        assert_eq!(dm.free_pages(), pages.len());
        dm.close()?;
        Ok(())
    }

    #[test]
    fn test_update_and_rollback_protocol() -> Result<()> {
        let dir = tempdir()?;
        let dm = DataManager::create(&dir.path().join("t"), MEMORY)?;
        let address = dm.insert(TransactionId(1), b"abcdef")?;
        let item = dm.read(address)?.expect("record should be live");

        let mut writer = item.before();
        writer.write_payload(0, b"XY")?;
        writer.after(&dm, TransactionId(1))?;
        assert_eq!(item.data(), b"XYcdef");

        {
            let mut writer = item.before();
            writer.write_payload(4, b"??")?;
        }
        assert_eq!(item.data(), b"XYcdef");

        dm.release_record(&item)?;
        dm.close()?;
        Ok(())
    }

    #[test]
    fn test_reopen_after_clean_close_skips_recovery() -> Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("t");
        let ledger = TransactionLedger::create(&sibling_file(&path, ".xid"))?;

        let address = {
            let dm = DataManager::create(&path, MEMORY)?;
            let xid = ledger.begin()?;
            let address = dm.insert(xid, b"durable")?;
            ledger.commit(xid)?;
            dm.close()?;
            address
        };

        let dm = DataManager::open(&path, MEMORY, &ledger)?;
        assert!(dm.recovery_stats().is_none());
        assert_eq!(dm.free_pages(), 1);
        let item = dm.read(address)?.expect("record should be live");
        assert_eq!(item.data(), b"durable");
        dm.release_record(&item)?;
        dm.close()?;
        Ok(())
    }

    #[test]
    fn test_zero_filled_page_is_formatted_on_open() -> Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("t");
        let ledger = TransactionLedger::create(&sibling_file(&path, ".xid"))?;

        let small = {
            let dm = DataManager::create(&path, MEMORY)?;
            let hole = dm.pages.new_page(&[0u8; PAGE_SIZE])?;
            assert_eq!(hole, 2);
            let xid = ledger.begin()?;
            let small = dm.insert(xid, b"after the hole")?;
            assert_eq!(small.page, 3);
            ledger.commit(xid)?;
            small
        };

        let dm = DataManager::open(&path, MEMORY, &ledger)?;
        assert!(dm.recovery_stats().is_some());
        assert_eq!(dm.page_count(), 3);

        let big_payload = vec![7u8; MAX_FREE_SPACE - data_item::RECORD_HEADER_SIZE - 4];
        let xid = ledger.begin()?;
        let big = dm.insert(xid, &big_payload)?;
        assert_eq!(big, Address::new(2, data_page::HEADER_SIZE as u16));
        ledger.commit(xid)?;

        for (address, expected) in [(big, big_payload), (small, b"after the hole".to_vec())] {
            let item = dm.read(address)?.expect("record should be live");
            assert_eq!(item.data(), expected);
            dm.release_record(&item)?;
        }
        dm.close()?;
        Ok(())
    }

    #[test]
    fn test_concurrent_inserts_never_share_offsets() -> Result<()> {
        let dir = tempdir()?;
        let dm = Arc::new(DataManager::create(&dir.path().join("t"), MEMORY)?);

        let handles: Vec<_> = (0..8u8)
            .map(|worker| {
                let dm = Arc::clone(&dm);
                thread::spawn(move || {
                    (0..50)
                        .map(|i| {
                            let payload = vec![worker; 50 + i];
                            let address = dm.insert(TransactionId(worker as u64 + 1), &payload)?;
                            Ok((address, payload))
                        })
                        .collect::<StorageResult<Vec<_>>>()
                })
            })
            .collect();

        let mut seen = HashSet::new();
        for handle in handles {
            for (address, payload) in handle.join().unwrap()? {
                assert!(seen.insert(address), "{} handed out twice", address);
                let item = dm.read(address)?.expect("record should be live");
                assert_eq!(item.data(), payload);
                dm.release_record(&item)?;
            }
        }

        let dm = Arc::try_unwrap(dm).unwrap_or_else(|_| panic!("data manager still shared"));
        dm.close()?;
        Ok(())
    }
}
