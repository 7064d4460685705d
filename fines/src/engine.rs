//! Fine and payment reconciliation

use crate::gateway::{GatewayOrder, OrderRequest, PaymentGateway};
use crate::signature;
use library_core::{
    config::{FineConfig, GatewayConfig},
    storage::{FineRepository, PaymentRepository, Repositories},
    Caller, Clock, Error, Fine, FineId, FineStatus, LoanStatus, LoanTransaction, Metrics, Payment,
    PaymentId, PaymentStatus, Result, TransactionId,
};
use loan_ledger::{days_overdue, LoanLedger};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// Maximum length of a fine reason
pub const MAX_REASON_CHARS: usize = 50;

/// Everything a client needs to pay a freshly raised fine
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FineReceipt {
    /// Fine
    pub fine: Fine,
    /// Open payment
    pub payment: Payment,
    /// Gateway order
    pub order: GatewayOrder,
    /// Public gateway key for the checkout widget
    pub key_id: String,
}

/// Outcome of a completed payment
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settlement {
    /// Paid payment
    pub payment: Payment,
    /// Paid fine
    pub fine: Fine,
    /// Loan after reopening (or untouched if it was not FINED)
    pub loan: LoanTransaction,
}

/// Fine engine
pub struct FineEngine {
    ledger: LoanLedger,
    fines: Arc<dyn FineRepository>,
    payments: Arc<dyn PaymentRepository>,
    gateway: Arc<dyn PaymentGateway>,
    clock: Arc<dyn Clock>,
    pricing: FineConfig,
    gateway_config: GatewayConfig,
    metrics: Metrics,
}

impl FineEngine {
    /// Create engine
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        repos: &Repositories,
        ledger: LoanLedger,
        gateway: Arc<dyn PaymentGateway>,
        clock: Arc<dyn Clock>,
        pricing: FineConfig,
        gateway_config: GatewayConfig,
        metrics: Metrics,
    ) -> Self {
        Self {
            ledger,
            fines: repos.fines.clone(),
            payments: repos.payments.clone(),
            gateway,
            clock,
            pricing,
            gateway_config,
            metrics,
        }
    }

    /// Public key id handed to clients for checkout
    pub fn gateway_key_id(&self) -> &str {
        &self.gateway_config.key_id
    }

    /// Fine a loan for its overdue days. The borrower or staff.
    ///
    /// The loan must be FINED after the overdue sweep and past its due date.
    pub async fn create_fine_for_overdue(
        &self,
        caller: &Caller,
        transaction_id: TransactionId,
    ) -> Result<FineReceipt> {
        caller.require_verified()?;

        let loan = self.ledger.transaction(transaction_id).await?;
        caller.require_owner_or_staff(loan.borrower_id())?;
        if loan.status != LoanStatus::Fined {
            return Err(Error::InvalidState(format!(
                "Transaction {} is {}, not FINED",
                loan.id, loan.status
            )));
        }
        self.ensure_no_open_payment(loan.id).await?;

        let days = days_overdue(loan.due_date, self.clock.now());
        if days <= 0 {
            return Err(Error::InvalidState(format!(
                "Transaction {} is not past its due date",
                loan.id
            )));
        }

        let amount = self.pricing.per_day_rate * Decimal::from(days);
        let reason = format!("Overdue by {} day(s)", days);
        self.open_fine(caller, loan, amount, reason).await
    }

    /// Fine the active loan of a copy for any reason (damage, loss). Staff only.
    pub async fn create_custom_fine(
        &self,
        caller: &Caller,
        book_code: &str,
        reason: &str,
        amount: Decimal,
    ) -> Result<FineReceipt> {
        caller.require_staff()?;

        let reason = reason.trim();
        if reason.is_empty() || reason.chars().count() > MAX_REASON_CHARS {
            return Err(Error::Validation(format!(
                "Reason must be 1-{} characters",
                MAX_REASON_CHARS
            )));
        }
        if amount <= Decimal::ZERO {
            return Err(Error::Validation(format!(
                "Fine amount must be positive, got {}",
                amount
            )));
        }

        let loan = self.ledger.active_loan(book_code).await?;
        self.ensure_no_open_payment(loan.id).await?;
        self.open_fine(caller, loan, amount, reason.to_string()).await
    }

    async fn ensure_no_open_payment(&self, transaction_id: TransactionId) -> Result<()> {
        if let Some(open) = self.payments.find_open_by_transaction(transaction_id).await? {
            return Err(Error::DuplicatePayment(format!(
                "Transaction {} already has open payment for order {}",
                transaction_id, open.order_id
            )));
        }
        Ok(())
    }

    /// Gateway order, then loan flag, payment and fine. Nothing is written
    /// when the gateway call fails.
    async fn open_fine(
        &self,
        caller: &Caller,
        loan: LoanTransaction,
        amount: Decimal,
        reason: String,
    ) -> Result<FineReceipt> {
        let amount = amount.round_dp(2);
        let amount_minor = to_minor_units(amount)?;
        let fine_id = FineId::new();
        let payment_id = PaymentId::new();

        let order = self
            .create_order(OrderRequest {
                amount_minor,
                currency: self.pricing.currency.clone(),
                receipt: format!("fine_{}", fine_id),
            })
            .await?;

        let loan = self.ledger.flag_fined(loan).await?;
        let now = self.clock.now();

        let payment = Payment {
            id: payment_id,
            fine_id,
            transaction_id: loan.id,
            order_id: order.id.clone(),
            amount_minor,
            currency: order.currency.clone(),
            status: PaymentStatus::Created,
            gateway_payment_id: None,
            signature: None,
            version: 0,
            created_at: now,
            updated_at: now,
        };
        self.payments.insert_open(payment.clone()).await?;

        let fine = Fine {
            id: fine_id,
            transaction_id: loan.id,
            book_id: loan.book_id(),
            borrower_id: loan.borrower_id(),
            amount,
            reason,
            status: FineStatus::Created,
            payment_id,
            version: 0,
            created_at: now,
            updated_at: now,
        };
        self.fines.insert(fine.clone()).await?;
        self.metrics.fines_created.inc();

        info!(
            fine_id = %fine.id,
            transaction_id = %loan.id,
            order_id = %payment.order_id,
            amount = %fine.amount,
            reason = %fine.reason,
            raised_by = %caller.id,
            "Fine created"
        );

        Ok(FineReceipt {
            fine,
            payment,
            order,
            key_id: self.gateway_config.key_id.clone(),
        })
    }

    async fn create_order(&self, request: OrderRequest) -> Result<GatewayOrder> {
        let timeout = Duration::from_millis(self.gateway_config.timeout_ms);
        let expected = request.amount_minor;

        let order = tokio::time::timeout(timeout, self.gateway.create_order(request))
            .await
            .map_err(|_| {
                warn!(timeout_ms = self.gateway_config.timeout_ms, "Gateway order timed out");
                Error::Gateway(format!(
                    "Order creation timed out after {}ms",
                    self.gateway_config.timeout_ms
                ))
            })??;

        if order.amount != expected {
            return Err(Error::Gateway(format!(
                "Gateway order {} amount {} does not match {}",
                order.id, order.amount, expected
            )));
        }
        Ok(order)
    }

    async fn open_payment(&self, order_id: &str) -> Result<(Payment, Fine)> {
        let payment = self
            .payments
            .find_by_order_id(order_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("Payment for order {}", order_id)))?;

        match payment.status {
            PaymentStatus::Created => {}
            PaymentStatus::Paid => {
                return Err(Error::Conflict(format!(
                    "Payment for order {} is already completed",
                    order_id
                )))
            }
            status => {
                return Err(Error::InvalidState(format!(
                    "Payment for order {} is {}",
                    order_id, status
                )))
            }
        }

        let fine = self
            .fines
            .find_by_id(payment.fine_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("Fine {}", payment.fine_id)))?;
        Ok((payment, fine))
    }

    /// Verify the gateway callback for an order.
    ///
    /// A mismatching signature fails the payment and rejects the fine; the
    /// loan stays FINED so a new fine can be raised.
    pub async fn verify_payment(
        &self,
        caller: &Caller,
        gateway_payment_id: &str,
        gateway_order_id: &str,
        signature_hex: &str,
    ) -> Result<Settlement> {
        caller.require_verified()?;

        let gateway_payment_id = gateway_payment_id.trim();
        let gateway_order_id = gateway_order_id.trim();
        let signature_hex = signature_hex.trim();
        if gateway_payment_id.is_empty() || gateway_order_id.is_empty() || signature_hex.is_empty() {
            return Err(Error::Validation(
                "Payment id, order id and signature are all required".to_string(),
            ));
        }

        let (payment, fine) = self.open_payment(gateway_order_id).await?;

        let valid = signature::verify(
            &self.gateway_config.key_secret,
            gateway_order_id,
            gateway_payment_id,
            signature_hex,
        )?;

        if !valid {
            self.reject(payment, fine, PaymentStatus::Failed, Some(gateway_payment_id))
                .await?;
            self.metrics.payment_failures.inc();
            warn!(order_id = %gateway_order_id, "Payment signature mismatch");
            return Err(Error::InvalidSignature(format!(
                "Signature for order {} does not match",
                gateway_order_id
            )));
        }

        self.settle(
            payment,
            fine,
            Some((gateway_payment_id.to_string(), signature_hex.to_string())),
        )
        .await
    }

    /// Mark an open payment paid without a signature. Admin only.
    pub async fn force_complete_payment(
        &self,
        caller: &Caller,
        gateway_order_id: &str,
    ) -> Result<Settlement> {
        caller.require_admin()?;
        let (payment, fine) = self.open_payment(gateway_order_id).await?;
        info!(order_id = %gateway_order_id, admin = %caller.id, "Forcing payment completion");
        self.settle(payment, fine, None).await
    }

    /// Cancel an open payment and reject its fine. The borrower or staff.
    pub async fn cancel_payment(&self, caller: &Caller, gateway_order_id: &str) -> Result<Payment> {
        caller.require_verified()?;
        let (payment, fine) = self.open_payment(gateway_order_id).await?;
        caller.require_owner_or_staff(fine.borrower_id)?;
        let payment = self
            .reject(payment, fine, PaymentStatus::Cancelled, None)
            .await?;

        info!(order_id = %gateway_order_id, cancelled_by = %caller.id, "Payment cancelled");
        Ok(payment)
    }

    /// Fines raised against a loan, oldest first
    pub async fn fines_for_transaction(&self, transaction_id: TransactionId) -> Result<Vec<Fine>> {
        self.fines.find_by_transaction(transaction_id).await
    }

    async fn reject(
        &self,
        mut payment: Payment,
        mut fine: Fine,
        status: PaymentStatus,
        gateway_payment_id: Option<&str>,
    ) -> Result<Payment> {
        let now = self.clock.now();

        payment.status = status;
        payment.gateway_payment_id = gateway_payment_id.map(str::to_string);
        payment.updated_at = now;
        let payment = self.payments.save(payment).await?;

        fine.status = FineStatus::Rejected;
        fine.updated_at = now;
        self.fines.save(fine).await?;

        Ok(payment)
    }

    async fn settle(
        &self,
        mut payment: Payment,
        mut fine: Fine,
        proof: Option<(String, String)>,
    ) -> Result<Settlement> {
        let now = self.clock.now();

        payment.status = PaymentStatus::Paid;
        if let Some((gateway_payment_id, signature)) = proof {
            payment.gateway_payment_id = Some(gateway_payment_id);
            payment.signature = Some(signature);
        }
        payment.updated_at = now;
        // Compare-and-swap: a concurrent verification of the same order
        // fails here with Conflict.
        let payment = self.payments.save(payment).await?;

        fine.status = FineStatus::Paid;
        fine.updated_at = now;
        let fine = self.fines.save(fine).await?;

        let loan = self.ledger.reopen_after_payment(payment.transaction_id).await?;
        self.metrics.payments_verified.inc();

        info!(
            order_id = %payment.order_id,
            fine_id = %fine.id,
            transaction_id = %loan.id,
            loan_status = %loan.status,
            due_date = %loan.due_date,
            "Payment settled"
        );
        Ok(Settlement { payment, fine, loan })
    }
}

impl std::fmt::Debug for FineEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FineEngine")
            .field("pricing", &self.pricing)
            .field("gateway", &self.gateway_config)
            .finish_non_exhaustive()
    }
}

/// Major units to minor units (x100)
fn to_minor_units(amount: Decimal) -> Result<i64> {
    (amount * Decimal::ONE_HUNDRED)
        .round()
        .to_i64()
        .ok_or_else(|| Error::Validation(format!("Fine amount {} is out of range", amount)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::MockPaymentGateway;
    use chrono::{TimeZone, Utc};
    use library_core::{
        config::LoanPolicy, Book, BookId, Genre, ManualClock, Role, Thumbnail, UserId, VolumeInfo,
    };
    use loan_ledger::NewUser;
    use rust_decimal_macros::dec;

    #[test]
    fn test_to_minor_units() {
        assert_eq!(to_minor_units(dec!(10)).unwrap(), 1000);
        assert_eq!(to_minor_units(dec!(12.345)).unwrap(), 1234);
        assert_eq!(to_minor_units(dec!(0.01)).unwrap(), 1);
    }

    async fn issued_loan(repos: &Repositories, ledger: &LoanLedger) -> (Caller, LoanTransaction) {
        let now = Utc::now();
        repos
            .books
            .insert(Book {
                id: BookId::new(),
                code: "M-1".to_string(),
                volume: VolumeInfo {
                    title: "Middlemarch".to_string(),
                    subtitle: None,
                    author: "George Eliot".to_string(),
                },
                publisher: "Blackwood".to_string(),
                published_date: chrono::NaiveDate::from_ymd_opt(1871, 12, 1).unwrap(),
                description: "Provincial life".to_string(),
                genres: vec![Genre::Fiction],
                isbn10: "0141439548".to_string(),
                isbn13: "9780141439549".to_string(),
                page_count: 880,
                thumbnail: Thumbnail::placeholder("https://img/p.png"),
                created_at: now,
                updated_at: now,
            })
            .await
            .unwrap();

        let dir = ledger.directory();
        let new_user = |email: &str, phone: &str, role: Option<Role>| NewUser {
            name: "Someone".to_string(),
            email: email.to_string(),
            phone: phone.to_string(),
            password_hash: "h".to_string(),
            address: library_core::Address {
                country: "India".to_string(),
                state: "Delhi".to_string(),
                city: "Delhi".to_string(),
                pincode: "110001".to_string(),
                line1: "1 Janpath".to_string(),
                line2: None,
            },
            role,
        };
        let staff = dir
            .register(new_user("staff@lib.test", "9111111111", Some(Role::Librarian)))
            .await
            .unwrap();
        let reader = dir
            .register(new_user("reader@lib.test", "9222222222", None))
            .await
            .unwrap();
        let staff = dir.set_verified(staff.id, true).await.unwrap();
        dir.set_verified(reader.id, true).await.unwrap();

        let caller = Caller::from(&staff);
        let loan = ledger
            .issue_book(&caller, "M-1", "reader@lib.test")
            .await
            .unwrap();
        (caller, loan)
    }

    fn engine(gateway: MockPaymentGateway) -> (Repositories, LoanLedger, FineEngine) {
        let repos = Repositories::in_memory();
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2024, 5, 1, 8, 0, 0).unwrap(),
        ));
        let metrics = Metrics::new().unwrap();
        let ledger = LoanLedger::new(&repos, clock.clone(), LoanPolicy::default(), metrics.clone());
        let gateway_config = GatewayConfig {
            key_id: "rzp_test_key".to_string(),
            key_secret: "secret".to_string(),
            timeout_ms: 50,
            ..GatewayConfig::default()
        };
        let engine = FineEngine::new(
            &repos,
            ledger.clone(),
            Arc::new(gateway),
            clock,
            FineConfig::default(),
            gateway_config,
            metrics,
        );
        (repos, ledger, engine)
    }

    #[tokio::test]
    async fn test_gateway_failure_leaves_no_records() {
        let mut gateway = MockPaymentGateway::new();
        gateway
            .expect_create_order()
            .times(1)
            .returning(|_| Err(Error::Gateway("503 Service Unavailable".to_string())));

        let (repos, ledger, engine) = engine(gateway);
        let (staff, loan) = issued_loan(&repos, &ledger).await;

        let err = engine
            .create_custom_fine(&staff, "M-1", "Torn cover", dec!(150))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Gateway(_)));

        let loan = ledger.transaction(loan.id).await.unwrap();
        assert_eq!(loan.status, LoanStatus::Pending);
        assert!(engine.fines_for_transaction(loan.id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_order_carries_minor_units_and_currency() {
        let mut gateway = MockPaymentGateway::new();
        gateway
            .expect_create_order()
            .withf(|req| req.amount_minor == 15050 && req.currency == "INR")
            .times(1)
            .returning(|req| {
                Ok(GatewayOrder {
                    id: "order_abc".to_string(),
                    amount: req.amount_minor,
                    currency: req.currency,
                    status: "created".to_string(),
                })
            });

        let (repos, ledger, engine) = engine(gateway);
        let (staff, _) = issued_loan(&repos, &ledger).await;

        let receipt = engine
            .create_custom_fine(&staff, "M-1", "Water damage", dec!(150.50))
            .await
            .unwrap();
        assert_eq!(receipt.payment.order_id, "order_abc");
        assert_eq!(receipt.payment.amount_minor, 15050);
        assert_eq!(receipt.key_id, "rzp_test_key");
        assert_eq!(engine.gateway_key_id(), "rzp_test_key");
    }

    #[tokio::test]
    async fn test_custom_fine_validation() {
        let (repos, ledger, engine) = engine(MockPaymentGateway::new());
        let (staff, _) = issued_loan(&repos, &ledger).await;

        let err = engine
            .create_custom_fine(&staff, "M-1", "", dec!(10))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Validation(_)));

        let long = "x".repeat(MAX_REASON_CHARS + 1);
        let err = engine
            .create_custom_fine(&staff, "M-1", &long, dec!(10))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Validation(_)));

        let err = engine
            .create_custom_fine(&staff, "M-1", "Lost", dec!(0))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Validation(_)));

        let reader = Caller::new(UserId::new(), Role::User, true);
        let err = engine
            .create_custom_fine(&reader, "M-1", "Lost", dec!(10))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Forbidden(_)));
    }
}
