//! Transaction states and their on-disk status bytes.

/// The possible states of a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionState {
    /// The transaction has begun and not yet finished.
    Active,
    /// The transaction has been successfully committed.
    Committed,
    /// The transaction has been aborted (rolled back).
    Aborted,
}

impl TransactionState {
    pub const ACTIVE_BYTE: u8 = 1;
    pub const COMMITTED_BYTE: u8 = 2;
    pub const ABORTED_BYTE: u8 = 3;

    pub fn to_byte(self) -> u8 {
        match self {
            Self::Active => Self::ACTIVE_BYTE,
            Self::Committed => Self::COMMITTED_BYTE,
            Self::Aborted => Self::ABORTED_BYTE,
        }
    }

    /// Decodes a status byte; `None` for bytes no state ever writes.
    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            Self::ACTIVE_BYTE => Some(Self::Active),
            Self::COMMITTED_BYTE => Some(Self::Committed),
            Self::ABORTED_BYTE => Some(Self::Aborted),
            _ => None,
        }
    }

    /// Returns true if the transaction is active.
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Active)
    }

    /// Returns true if the transaction is committed.
    pub fn is_committed(&self) -> bool {
        matches!(self, Self::Committed)
    }

    /// Returns true if the transaction is aborted.
    pub fn is_aborted(&self) -> bool {
        matches!(self, Self::Aborted)
    }

    /// Returns true if the transaction is finished (committed or aborted).
    pub fn is_finished(&self) -> bool {
        matches!(self, Self::Committed | Self::Aborted)
    }
}

impl std::fmt::Display for TransactionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Active => write!(f, "Active"),
            Self::Committed => write!(f, "Committed"),
            Self::Aborted => write!(f, "Aborted"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_bytes() {
        for state in [
            TransactionState::Active,
            TransactionState::Committed,
            TransactionState::Aborted,
        ] {
            assert_eq!(TransactionState::from_byte(state.to_byte()), Some(state));
        }
        assert_eq!(TransactionState::from_byte(0), None);
        assert_eq!(TransactionState::from_byte(4), None);
    }

    #[test]
    fn test_state_predicates() {
        assert!(TransactionState::Active.is_active());
        assert!(!TransactionState::Active.is_finished());
        assert!(TransactionState::Committed.is_committed());
        assert!(TransactionState::Committed.is_finished());
        assert!(TransactionState::Aborted.is_aborted());
        assert!(TransactionState::Aborted.is_finished());
    }

    #[test]
    fn test_display() {
        assert_eq!(TransactionState::Committed.to_string(), "Committed");
    }
}
