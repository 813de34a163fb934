//! The reserved first page.
//!
//! Bytes 0..2 hold a marker that is set to the "open" pattern while the
//! store is in use and to the "closed" pattern by a clean shutdown. Finding
//! anything other than "closed" at startup means the previous run did not
//! shut down cleanly and the log must be replayed.

use crate::storage::page::Page;
use crate::storage::PAGE_SIZE;

const MARKER_OFFSET: usize = 0;
const MARKER_LEN: usize = 2;

pub const OPEN_MARKER: [u8; MARKER_LEN] = [0x0F, 0xEE];
pub const CLOSED_MARKER: [u8; MARKER_LEN] = [0xC1, 0x05];

pub struct MetaPage;

impl MetaPage {
    /// Bytes of a new meta page, already marked open.
    pub fn init_raw() -> Box<[u8; PAGE_SIZE]> {
        let mut data = Box::new([0u8; PAGE_SIZE]);
        data[MARKER_OFFSET..MARKER_OFFSET + MARKER_LEN].copy_from_slice(&OPEN_MARKER);
        data
    }

    pub fn set_open(page: &Page) {
        Self::set_marker(page, OPEN_MARKER);
    }

    pub fn set_closed(page: &Page) {
        Self::set_marker(page, CLOSED_MARKER);
    }

    /// True if the previous run closed the store cleanly.
    pub fn was_closed_cleanly(page: &Page) -> bool {
        page.lock()[MARKER_OFFSET..MARKER_OFFSET + MARKER_LEN] == CLOSED_MARKER
    }

    fn set_marker(page: &Page, marker: [u8; MARKER_LEN]) {
        page.lock()[MARKER_OFFSET..MARKER_OFFSET + MARKER_LEN].copy_from_slice(&marker);
        page.set_dirty(true);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_page_is_open() {
        let page = Page::new(1, MetaPage::init_raw());
        assert!(!MetaPage::was_closed_cleanly(&page));
    }

    #[test]
    fn test_toggle() {
        let page = Page::new(1, MetaPage::init_raw());

        MetaPage::set_closed(&page);
        assert!(MetaPage::was_closed_cleanly(&page));
        assert!(page.is_dirty());

        MetaPage::set_open(&page);
        assert!(!MetaPage::was_closed_cleanly(&page));
    }

    #[test]
    fn test_zeroed_page_is_not_clean() {
        let page = Page::new(1, Box::new([0u8; PAGE_SIZE]));
        assert!(!MetaPage::was_closed_cleanly(&page));
    }
}
