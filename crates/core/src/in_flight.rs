//! Borrowers with a liquidation whose outcome is not yet known.

use alloy::primitives::Address;
use dashmap::DashSet;
use std::sync::Arc;

/// Shared set of in-flight borrowers.
#[derive(Debug, Default)]
pub struct InFlightBorrowers {
    borrowers: DashSet<Address>,
}

impl InFlightBorrowers {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn contains(&self, borrower: &Address) -> bool {
        self.borrowers.contains(borrower)
    }

    /// Mark `borrower` in flight until the guard is dropped.
    /// `None` when it already is.
    pub fn try_claim(self: &Arc<Self>, borrower: Address) -> Option<InFlightGuard> {
        self.borrowers.insert(borrower).then(|| InFlightGuard {
            set: Arc::clone(self),
            borrower,
        })
    }

    pub fn len(&self) -> usize {
        self.borrowers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.borrowers.is_empty()
    }
}

/// Releases the borrower when dropped.
#[derive(Debug)]
pub struct InFlightGuard {
    set: Arc<InFlightBorrowers>,
    borrower: Address,
}

impl InFlightGuard {
    pub fn borrower(&self) -> Address {
        self.borrower
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.set.borrowers.remove(&self.borrower);
    }
}
