//! Metrics collection for observability
//!
//! # Metrics
//!
//! - `library_loans_issued_total` - Loans created
//! - `library_loans_returned_total` - Loans moved to RETURNED
//! - `library_overdue_transitions_total` - PENDING → FINED flips by the lazy sweep
//! - `library_fines_created_total` - Fines opened (overdue and custom)
//! - `library_payments_verified_total` - Payments settled (verified or forced)
//! - `library_payment_failures_total` - Signature mismatches

use prometheus::{IntCounter, Registry};
use std::sync::Arc;

/// Metrics collector
#[derive(Clone, Debug)]
pub struct Metrics {
    /// Loans created
    pub loans_issued: IntCounter,

    /// Loans returned
    pub loans_returned: IntCounter,

    /// Overdue transitions
    pub overdue_transitions: IntCounter,

    /// Fines created
    pub fines_created: IntCounter,

    /// Payments settled
    pub payments_verified: IntCounter,

    /// Signature mismatches
    pub payment_failures: IntCounter,

    /// Prometheus registry
    pub registry: Arc<Registry>,
}

impl Metrics {
    /// Create new metrics collector with its own registry
    pub fn new() -> prometheus::Result<Self> {
        let registry = Arc::new(Registry::new());

        let counter = |name: &str, help: &str| -> prometheus::Result<IntCounter> {
            let c = IntCounter::new(name, help)?;
            registry.register(Box::new(c.clone()))?;
            Ok(c)
        };

        Ok(Self {
            loans_issued: counter("library_loans_issued_total", "Loans created")?,
            loans_returned: counter("library_loans_returned_total", "Loans returned")?,
            overdue_transitions: counter(
                "library_overdue_transitions_total",
                "Loans flipped to FINED by overdue detection",
            )?,
            fines_created: counter("library_fines_created_total", "Fines opened")?,
            payments_verified: counter(
                "library_payments_verified_total",
                "Fine payments settled",
            )?,
            payment_failures: counter(
                "library_payment_failures_total",
                "Payment signature mismatches",
            )?,
            registry,
        })
    }

    /// Get metrics registry
    pub fn registry(&self) -> &Registry {
        &self.registry
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new().expect("Failed to create metrics")
    }
}
