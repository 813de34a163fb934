//! Free-space index over data pages.
//!
//! Pages are bucketed by their last known free space so an insert can find a
//! page with room without scanning the file. A page taken out by
//! [`FreeSpaceIndex::select`] stays out until its writer adds it back, which
//! is what keeps two writers off the same page at the same time.

use parking_lot::Mutex;

use crate::storage::PAGE_SIZE;

pub const BUCKET_COUNT: usize = 40;
pub const THRESHOLD: usize = PAGE_SIZE / BUCKET_COUNT;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageInfo {
    pub page_number: u32,
    pub free_space: usize,
}

pub struct FreeSpaceIndex {
    /// `buckets[i]` holds pages with free space in `[i * THRESHOLD, (i + 1) * THRESHOLD)`.
    buckets: Mutex<Vec<Vec<PageInfo>>>,
}

impl FreeSpaceIndex {
    pub fn new() -> Self {
        Self {
            buckets: Mutex::new(vec![Vec::new(); BUCKET_COUNT + 1]),
        }
    }

    pub fn add(&self, page_number: u32, free_space: usize) {
        let bucket = (free_space / THRESHOLD).min(BUCKET_COUNT);
        self.buckets.lock()[bucket].push(PageInfo {
            page_number,
            free_space,
        });
    }

    /// Removes and returns a page with at least `required` bytes free.
    ///
    /// The search starts one bucket above the one `required` falls in, so
    /// any page found there has room regardless of where it sits inside its
    /// bucket. The last bucket has nothing above it and is searched by
    /// exact free space instead.
    pub fn select(&self, required: usize) -> Option<PageInfo> {
        let mut buckets = self.buckets.lock();

        let first = required / THRESHOLD + 1;
        for bucket in buckets.iter_mut().skip(first) {
            if !bucket.is_empty() {
                return Some(bucket.remove(0));
            }
        }

        if first > BUCKET_COUNT {
            let last = &mut buckets[BUCKET_COUNT];
            if let Some(pos) = last.iter().position(|info| info.free_space >= required) {
                return Some(last.remove(pos));
            }
        }

        None
    }

    /// Number of pages currently available for selection.
    pub fn len(&self) -> usize {
        self.buckets.lock().iter().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for FreeSpaceIndex {
    fn default() -> Self {
        Self::new()
    }
}
