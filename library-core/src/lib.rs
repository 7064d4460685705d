//! Shelfwise Library Core
//!
//! Shared data model, error taxonomy, configuration and storage seams for the
//! lending backend.
//!
//! # Architecture
//!
//! - **Repositories**: every aggregate (books, users, loans, fines, payments)
//!   is reached through an async repository trait
//! - **Optimistic updates**: loans, fines and payments carry a `version`;
//!   saving a stale copy fails with a conflict
//! - **Snapshots**: loans embed immutable copies of the book and the people
//!   involved at issue time
//!
//! # Invariants
//!
//! - A copy has at most one active loan
//! - A borrower never exceeds the configured number of active loans
//! - A borrower never holds two active copies of one ISBN-13
//! - At most one open payment exists per loan

#![forbid(unsafe_code)]
#![warn(
    missing_docs,
    rust_2018_idioms,
    missing_debug_implementations,
    clippy::all
)]

pub mod types;
pub mod storage;
pub mod clock;
pub mod error;
pub mod config;
pub mod metrics;

// Re-exports
pub use error::{Error, Result};
pub use types::{
    Address, Book, BookId, BookSnapshot, Caller, Fine, FineId, FineStatus, Genre, LoanStatus,
    LoanTransaction, Payment, PaymentId, PaymentStatus, Role, Thumbnail, TransactionId, User,
    UserId, UserSnapshot, VolumeInfo,
};
pub use storage::{MemoryStore, Repositories};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::Config;
pub use metrics::Metrics;
