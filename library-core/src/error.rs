//! Error taxonomy shared by every lending component

use thiserror::Error;

/// Result type for lending operations
pub type Result<T> = std::result::Result<T, Error>;

/// Lending errors
///
/// Each variant carries a human readable message; [`Error::kind`] gives the
/// stable classification callers (HTTP layers, logs) key on.
#[derive(Error, Debug)]
pub enum Error {
    /// Malformed, missing or out-of-range input
    #[error("Validation error: {0}")]
    Validation(String),

    /// Book, user, transaction, fine or payment absent
    #[error("Not found: {0}")]
    NotFound(String),

    /// Duplicate record, stale version or already-settled payment
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Copy already has an active loan
    #[error("Book already issued: {0}")]
    AlreadyIssued(String),

    /// Borrower or caller has not been verified
    #[error("User not verified: {0}")]
    Unverified(String),

    /// Loan is past its due date
    #[error("Overdue: {0}")]
    Overdue(String),

    /// Borrower has an unpaid fine
    #[error("Fined: {0}")]
    Fined(String),

    /// Borrower holds the maximum number of active loans
    #[error("Limit exceeded: {0}")]
    LimitExceeded(String),

    /// Borrower already holds a copy of the same edition
    #[error("Duplicate copy: {0}")]
    DuplicateCopy(String),

    /// An open payment already exists for the loan
    #[error("Duplicate payment: {0}")]
    DuplicatePayment(String),

    /// Payment gateway failed or timed out
    #[error("Gateway error: {0}")]
    Gateway(String),

    /// Payment callback signature did not match
    #[error("Invalid signature: {0}")]
    InvalidSignature(String),

    /// Record is not in a state that allows the operation
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Caller role does not permit the operation
    #[error("Forbidden: {0}")]
    Forbidden(String),

    /// Object storage failure
    #[error("Storage error: {0}")]
    Storage(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Stable classification of the error
    pub fn kind(&self) -> &'static str {
        match self {
            Error::Validation(_) => "validation_error",
            Error::NotFound(_) => "not_found",
            Error::Conflict(_) => "conflict",
            Error::AlreadyIssued(_) => "already_issued",
            Error::Unverified(_) => "unverified",
            Error::Overdue(_) => "overdue",
            Error::Fined(_) => "fined",
            Error::LimitExceeded(_) => "limit_exceeded",
            Error::DuplicateCopy(_) => "duplicate_copy",
            Error::DuplicatePayment(_) => "duplicate_payment",
            Error::Gateway(_) => "gateway_error",
            Error::InvalidSignature(_) => "invalid_signature",
            Error::InvalidState(_) => "invalid_state",
            Error::Forbidden(_) => "forbidden",
            Error::Storage(_) => "storage_error",
            Error::Config(_) => "config_error",
            Error::Io(_) => "io_error",
        }
    }

    /// True for errors caused by the caller's request rather than the system
    pub fn is_client_error(&self) -> bool {
        !matches!(
            self,
            Error::Gateway(_) | Error::Storage(_) | Error::Config(_) | Error::Io(_)
        )
    }
}
