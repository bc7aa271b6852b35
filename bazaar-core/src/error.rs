//! Error types for the marketplace ledger

use thiserror::Error;

/// Result type for market operations
pub type Result<T> = std::result::Result<T, Error>;

/// Market errors
///
/// Every domain variant is a recoverable, caller-side condition: the
/// operation that produced it left the ledger state exactly as it was.
#[derive(Error, Debug)]
pub enum Error {
    /// An administrator is already registered
    #[error("Role conflict: {0}")]
    RoleConflict(String),

    /// The account already has a registration or pending request
    #[error("Duplicate registration: {0}")]
    DuplicateRegistration(String),

    /// Caller lacks the required role or does not own the target
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// Bad id or index
    #[error("Not found: {0}")]
    NotFound(String),

    /// Payment does not equal quantity x (price + shipping)
    #[error("Payment mismatch: expected {expected}, got {got}")]
    PaymentMismatch {
        /// Exact amount the order requires
        expected: u64,
        /// Amount the buyer offered
        got: u64,
    },

    /// Requested quantity exceeds available stock
    #[error("Insufficient stock: requested {requested}, available {available}")]
    InsufficientStock {
        /// Quantity requested
        requested: u64,
        /// Stock on hand
        available: u64,
    },

    /// Withdrawal amount exceeds ledger balance
    #[error("Insufficient balance: requested {requested}, available {available}")]
    InsufficientBalance {
        /// Amount requested
        requested: u64,
        /// Balance on hand
        available: u64,
    },

    /// Circuit breaker is active; mutating operations are suspended
    #[error("System halted by circuit breaker")]
    SystemHalted,

    /// External fund release failed; the balance debit was rolled back
    #[error("External release failed: {0}")]
    ExternalReleaseFailed(String),

    /// Invariant violation (conservation, arithmetic overflow, etc.)
    #[error("Invariant violation: {0}")]
    InvariantViolation(String),

    /// Storage error (RocksDB)
    #[error("Storage error: {0}")]
    Storage(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] bincode::Error),

    /// Concurrency error (actor mailbox closed, etc.)
    #[error("Concurrency error: {0}")]
    Concurrency(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<rocksdb::Error> for Error {
    fn from(err: rocksdb::Error) -> Self {
        Error::Storage(err.to_string())
    }
}
