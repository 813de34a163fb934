//! Transaction identifiers.

use serde::{Deserialize, Serialize};

/// A unique identifier for a transaction, issued by the ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TransactionId(pub u64);

impl TransactionId {
    /// The implicit transaction that is always committed. It is never stored
    /// in the ledger and is never active or aborted.
    pub const SUPER: TransactionId = TransactionId(0);

    /// Creates a new transaction ID with the given value.
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    /// Returns the inner u64 value.
    pub fn value(&self) -> u64 {
        self.0
    }

    pub fn is_super(&self) -> bool {
        *self == Self::SUPER
    }
}

impl std::fmt::Display for TransactionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Txn{}", self.0)
    }
}

impl From<u64> for TransactionId {
    fn from(id: u64) -> Self {
        Self(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transaction_id_new() {
        let id = TransactionId::new(42);
        assert_eq!(id.value(), 42);
        assert!(!id.is_super());
        assert!(TransactionId::SUPER.is_super());
    }

    #[test]
    fn test_transaction_id_display() {
        let id = TransactionId::new(123);
        assert_eq!(format!("{}", id), "Txn123");
    }

    #[test]
    fn test_transaction_id_comparison() {
        let id1 = TransactionId::new(1);
        let id2 = TransactionId::new(2);
        let id3 = TransactionId::from(1);

        assert!(id1 < id2);
        assert!(id1 == id3);
        assert!(TransactionId::SUPER < id1);
    }
}
