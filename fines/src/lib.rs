//! Fines & Payments
//!
//! Fines raised against loans and their reconciliation with the payment
//! gateway.
//!
//! # Flow
//!
//! 1. A fine opens a gateway order; the loan is put (or kept) in FINED
//! 2. The client pays and returns `(order_id, payment_id, signature)`
//! 3. [`FineEngine::verify_payment`] checks the HMAC-SHA256 signature; on
//!    success the fine is paid and the loan reopened with a short grace
//!    period, on mismatch the payment fails and the loan is left alone
//!
//! At most one payment per loan is open at any time.

#![forbid(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms)]

pub mod gateway;
pub mod signature;
pub mod engine;

pub use engine::{FineEngine, FineReceipt, Settlement};
pub use gateway::{GatewayOrder, HttpGateway, OrderRequest, PaymentGateway, SandboxGateway};
