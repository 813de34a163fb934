//! Record addresses.
//!
//! A record is identified by the page holding it and its byte offset inside
//! that page. The packed 64-bit form (the "uid") is written into log records
//! and used as the record cache key, so its layout must never change:
//!
//! ```text
//! bit 63            32 31          16 15            0
//!     [ page number  ] [   zero     ] [   offset     ]
//! ```

use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Address {
    pub page: u32,
    pub offset: u16,
}

impl Address {
    pub fn new(page: u32, offset: u16) -> Self {
        Self { page, offset }
    }

    /// Packs the address into its 64-bit uid.
    pub fn to_uid(self) -> u64 {
        ((self.page as u64) << 32) | self.offset as u64
    }

    /// Unpacks a uid. Bits 16..32 are ignored.
    pub fn from_uid(uid: u64) -> Self {
        Self {
            page: (uid >> 32) as u32,
            offset: (uid & 0xFFFF) as u16,
        }
    }
}

impl From<Address> for u64 {
    fn from(address: Address) -> Self {
        address.to_uid()
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.page, self.offset)
    }
}
