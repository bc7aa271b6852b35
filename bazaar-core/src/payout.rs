//! External fund-release collaborator for withdrawals
//!
//! The ledger only guarantees the balance debit: the actual transfer of
//! funds out of the system is delegated to a [`Payout`] implementation.
//! The withdrawal operation couples the two — the debit is committed only
//! when the release attempt succeeds, and rolled back when it fails.

use crate::types::{AccountId, Amount};
use thiserror::Error;

/// Failure reported by an external payout collaborator
#[derive(Error, Debug)]
#[error("{0}")]
pub struct PayoutError(pub String);

impl PayoutError {
    /// Create a payout error with the given reason
    pub fn new(reason: impl Into<String>) -> Self {
        Self(reason.into())
    }
}

/// External payment rail that releases withdrawn funds
///
/// Implementations must be synchronous and must not touch ledger state:
/// the single writer invokes `release` inside the withdrawal operation and
/// interprets an `Err` as "no funds left the system".
pub trait Payout: Send {
    /// Attempt to release `amount` to `account` outside the ledger
    fn release(&self, account: &AccountId, amount: Amount) -> Result<(), PayoutError>;
}

/// Payout that always succeeds without moving funds
///
/// Default collaborator for deployments where release happens downstream
/// of the notification stream, and for tests.
#[derive(Debug, Default)]
pub struct NoopPayout;

impl Payout for NoopPayout {
    fn release(&self, account: &AccountId, amount: Amount) -> Result<(), PayoutError> {
        tracing::debug!("noop payout: released {} to {}", amount, account);
        Ok(())
    }
}
