//! Loan Ledger
//!
//! Borrower directory and the loan transaction state machine.
//!
//! # States
//!
//! ```text
//! PENDING ──overdue / fine──> FINED ──payment verified──> PENDING
//!    │                          │
//!    └──────── return ──────────┴──(force return)──> RETURNED
//! ```
//!
//! Overdue detection is lazy: every operation that reads active loans first
//! runs [`overdue::mark_overdue_if_needed`] over them, and the FINED flip is
//! committed even when the operation itself then fails.

#![forbid(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms)]

pub mod overdue;
pub mod directory;
pub mod ledger;

pub use directory::{BorrowerDirectory, NewUser};
pub use ledger::LoanLedger;
pub use overdue::{days_overdue, due_date_for, end_of_day, is_overdue, mark_overdue_if_needed};
