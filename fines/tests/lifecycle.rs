//! Fine and payment lifecycle against the sandbox gateway

use chrono::{Duration, NaiveDate, TimeZone, Utc};
use fines::{signature, FineEngine, SandboxGateway};
use library_core::{
    config::{FineConfig, GatewayConfig, LoanPolicy},
    Address, Book, BookId, Caller, Error, FineStatus, Genre, LoanStatus, LoanTransaction,
    ManualClock, Metrics, PaymentStatus, Repositories, Role, Thumbnail, VolumeInfo,
};
use loan_ledger::{LoanLedger, NewUser};
use rust_decimal_macros::dec;
use std::sync::Arc;

const SECRET: &str = "sandbox_secret";

struct Desk {
    clock: ManualClock,
    gateway: SandboxGateway,
    metrics: Metrics,
    ledger: LoanLedger,
    engine: FineEngine,
    librarian: Caller,
    admin: Caller,
    reader: Caller,
    neighbour: Caller,
}

async fn desk_with(gateway: SandboxGateway, timeout_ms: u64) -> Desk {
    let repos = Repositories::in_memory();
    let clock = ManualClock::new(Utc.with_ymd_and_hms(2024, 1, 1, 10, 0, 0).unwrap());
    let metrics = Metrics::new().unwrap();
    let ledger = LoanLedger::new(
        &repos,
        Arc::new(clock.clone()),
        LoanPolicy::default(),
        metrics.clone(),
    );
    let engine = FineEngine::new(
        &repos,
        ledger.clone(),
        Arc::new(gateway.clone()),
        Arc::new(clock.clone()),
        FineConfig::default(),
        GatewayConfig {
            key_id: "rzp_test_sandbox".to_string(),
            key_secret: SECRET.to_string(),
            timeout_ms,
            ..GatewayConfig::default()
        },
        metrics.clone(),
    );

    let now = Utc::now();
    for (code, isbn13) in [("P-1", "9780140449136"), ("P-2", "9780140447934")] {
        repos
            .books
            .insert(Book {
                id: BookId::new(),
                code: code.to_string(),
                volume: VolumeInfo {
                    title: "Crime and Punishment".to_string(),
                    subtitle: None,
                    author: "Fyodor Dostoevsky".to_string(),
                },
                publisher: "Penguin".to_string(),
                published_date: NaiveDate::from_ymd_opt(2003, 1, 30).unwrap(),
                description: "A student in St Petersburg".to_string(),
                genres: vec![Genre::Fiction],
                isbn10: "0140449132".to_string(),
                isbn13: isbn13.to_string(),
                page_count: 720,
                thumbnail: Thumbnail::placeholder("https://img/p.png"),
                created_at: now,
                updated_at: now,
            })
            .await
            .unwrap();
    }

    let dir = ledger.directory();
    let mut callers = Vec::new();
    for (email, phone, role) in [
        ("librarian@desk.test", "9000000011", Some(Role::Librarian)),
        ("reader@desk.test", "9000000012", None),
        ("admin@desk.test", "9000000013", None),
        ("neighbour@desk.test", "9000000014", None),
    ] {
        let user = dir
            .register(NewUser {
                name: "Desk User".to_string(),
                email: email.to_string(),
                phone: phone.to_string(),
                password_hash: "hash".to_string(),
                address: Address {
                    country: "India".to_string(),
                    state: "Tamil Nadu".to_string(),
                    city: "Chennai".to_string(),
                    pincode: "600001".to_string(),
                    line1: "3 Anna Salai".to_string(),
                    line2: None,
                },
                role,
            })
            .await
            .unwrap();
        callers.push(dir.set_verified(user.id, true).await.unwrap());
    }
    let mut admin = callers[2].clone();
    admin.role = Role::Admin;
    repos.users.update(admin.clone()).await.unwrap();

    Desk {
        clock,
        gateway,
        metrics,
        ledger,
        engine,
        librarian: Caller::from(&callers[0]),
        reader: Caller::from(&callers[1]),
        admin: Caller::from(&admin),
        neighbour: Caller::from(&callers[3]),
    }
}

async fn desk() -> Desk {
    desk_with(SandboxGateway::new(), 1_000).await
}

impl Desk {
    async fn issue(&self, code: &str) -> LoanTransaction {
        self.ledger
            .issue_book(&self.librarian, code, "reader@desk.test")
            .await
            .unwrap()
    }
}

#[tokio::test]
async fn test_overdue_fine_paid_reopens_loan() {
    let d = desk().await;
    let loan = d.issue("P-1").await;

    // Day 31: one calendar day late.
    d.clock.advance(Duration::days(31));
    let receipt = d
        .engine
        .create_fine_for_overdue(&d.librarian, loan.id)
        .await
        .unwrap();
    assert_eq!(receipt.fine.amount, dec!(10));
    assert_eq!(receipt.fine.status, FineStatus::Created);
    assert_eq!(receipt.payment.amount_minor, 1000);
    assert_eq!(receipt.payment.currency, "INR");
    assert_eq!(receipt.key_id, "rzp_test_sandbox");
    assert!(d.gateway.order(&receipt.order.id).await.is_some());

    let err = d
        .engine
        .create_fine_for_overdue(&d.librarian, loan.id)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::DuplicatePayment(_)));

    let order_id = receipt.payment.order_id.clone();
    let sig = signature::sign(SECRET, &order_id, "pay_001").unwrap();
    let settled = d
        .engine
        .verify_payment(&d.reader, "pay_001", &order_id, &sig)
        .await
        .unwrap();

    assert_eq!(settled.payment.status, PaymentStatus::Paid);
    assert_eq!(settled.payment.gateway_payment_id.as_deref(), Some("pay_001"));
    assert_eq!(settled.payment.signature.as_deref(), Some(sig.as_str()));
    assert_eq!(settled.fine.status, FineStatus::Paid);
    assert_eq!(settled.loan.status, LoanStatus::Pending);
    assert_eq!(
        settled.loan.due_date.date_naive(),
        NaiveDate::from_ymd_opt(2024, 2, 2).unwrap()
    );

    // Verifying the same order twice is a conflict.
    let err = d
        .engine
        .verify_payment(&d.reader, "pay_001", &order_id, &sig)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Conflict(_)));

    // Reopened loan can now be returned before the grace period ends.
    let returned = d.ledger.return_book(&d.librarian, "P-1").await.unwrap();
    assert_eq!(returned.status, LoanStatus::Returned);
    assert_eq!(d.metrics.payments_verified.get(), 1);
    assert_eq!(d.metrics.fines_created.get(), 1);
}

#[tokio::test]
async fn test_borrower_opens_and_pays_own_overdue_fine() {
    let d = desk().await;
    let loan = d.issue("P-1").await;
    d.clock.advance(Duration::days(31));

    let err = d
        .engine
        .create_fine_for_overdue(&d.neighbour, loan.id)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Forbidden(_)));
    assert!(d.engine.fines_for_transaction(loan.id).await.unwrap().is_empty());

    let first = d
        .engine
        .create_fine_for_overdue(&d.reader, loan.id)
        .await
        .unwrap();
    assert_eq!(first.fine.amount, dec!(10));

    let err = d
        .engine
        .cancel_payment(&d.neighbour, &first.payment.order_id)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Forbidden(_)));

    let cancelled = d
        .engine
        .cancel_payment(&d.reader, &first.payment.order_id)
        .await
        .unwrap();
    assert_eq!(cancelled.status, PaymentStatus::Cancelled);

    let receipt = d
        .engine
        .create_fine_for_overdue(&d.reader, loan.id)
        .await
        .unwrap();
    let order_id = receipt.payment.order_id.clone();
    let sig = signature::sign(SECRET, &order_id, "pay_own").unwrap();
    let settled = d
        .engine
        .verify_payment(&d.reader, "pay_own", &order_id, &sig)
        .await
        .unwrap();
    assert_eq!(settled.fine.status, FineStatus::Paid);
    assert_eq!(settled.loan.status, LoanStatus::Pending);
}

#[tokio::test]
async fn test_blank_callback_fields_change_nothing() {
    let d = desk().await;
    let loan = d.issue("P-1").await;
    d.clock.advance(Duration::days(31));

    let receipt = d
        .engine
        .create_fine_for_overdue(&d.reader, loan.id)
        .await
        .unwrap();
    let order_id = receipt.payment.order_id.clone();
    let sig = signature::sign(SECRET, &order_id, "pay_1").unwrap();

    for (payment_id, order, signature_hex) in [
        ("", order_id.as_str(), ""),
        ("pay_1", order_id.as_str(), "  "),
        (" ", order_id.as_str(), sig.as_str()),
        ("pay_1", "", sig.as_str()),
    ] {
        let err = d
            .engine
            .verify_payment(&d.reader, payment_id, order, signature_hex)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Validation(_)), "got {:?}", err);
    }

    let fines = d.engine.fines_for_transaction(loan.id).await.unwrap();
    assert_eq!(fines[0].status, FineStatus::Created);
    assert_eq!(d.metrics.payment_failures.get(), 0);

    let settled = d
        .engine
        .verify_payment(&d.reader, "pay_1", &order_id, &sig)
        .await
        .unwrap();
    assert_eq!(settled.payment.status, PaymentStatus::Paid);
    assert_eq!(settled.loan.status, LoanStatus::Pending);
}

#[tokio::test]
async fn test_overdue_fine_scales_with_days() {
    let d = desk().await;
    let loan = d.issue("P-1").await;

    d.clock.advance(Duration::days(35));
    let receipt = d
        .engine
        .create_fine_for_overdue(&d.librarian, loan.id)
        .await
        .unwrap();
    assert_eq!(receipt.fine.amount, dec!(50));
    assert_eq!(receipt.payment.amount_minor, 5000);
}

#[tokio::test]
async fn test_bad_signature_leaves_loan_fined() {
    let d = desk().await;
    let loan = d.issue("P-1").await;
    d.clock.advance(Duration::days(32));

    let receipt = d
        .engine
        .create_fine_for_overdue(&d.librarian, loan.id)
        .await
        .unwrap();
    let order_id = receipt.payment.order_id.clone();
    let forged = signature::sign("wrong_secret", &order_id, "pay_002").unwrap();

    let err = d
        .engine
        .verify_payment(&d.reader, "pay_002", &order_id, &forged)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::InvalidSignature(_)));
    assert_eq!(d.metrics.payment_failures.get(), 1);

    let loan = d.ledger.transaction(loan.id).await.unwrap();
    assert_eq!(loan.status, LoanStatus::Fined);
    let fines = d.engine.fines_for_transaction(loan.id).await.unwrap();
    assert_eq!(fines.len(), 1);
    assert_eq!(fines[0].status, FineStatus::Rejected);

    // A failed payment cannot be retried, but a new fine can be raised.
    let good = signature::sign(SECRET, &order_id, "pay_002").unwrap();
    let err = d
        .engine
        .verify_payment(&d.reader, "pay_002", &order_id, &good)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::InvalidState(_)));

    d.engine
        .create_fine_for_overdue(&d.librarian, loan.id)
        .await
        .unwrap();
    assert_eq!(d.engine.fines_for_transaction(loan.id).await.unwrap().len(), 2);
}

#[tokio::test]
async fn test_fine_requires_fined_loan() {
    let d = desk().await;
    let loan = d.issue("P-1").await;

    let err = d
        .engine
        .create_fine_for_overdue(&d.librarian, loan.id)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::InvalidState(_)));

    let err = d
        .engine
        .verify_payment(&d.reader, "pay_x", "order_missing", "00")
        .await
        .unwrap_err();
    assert!(matches!(err, Error::NotFound(_)));
}

#[tokio::test]
async fn test_custom_fine_flags_loan_and_cancel_reopens_fining() {
    let d = desk().await;
    let loan = d.issue("P-1").await;

    let receipt = d
        .engine
        .create_custom_fine(&d.librarian, "P-1", "Coffee stain on cover", dec!(75))
        .await
        .unwrap();
    assert_eq!(receipt.payment.amount_minor, 7500);
    assert_eq!(
        d.ledger.transaction(loan.id).await.unwrap().status,
        LoanStatus::Fined
    );

    let err = d
        .engine
        .create_custom_fine(&d.librarian, "P-1", "Second stain", dec!(20))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::DuplicatePayment(_)));

    let err = d
        .engine
        .cancel_payment(&d.neighbour, &receipt.payment.order_id)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Forbidden(_)));

    let cancelled = d
        .engine
        .cancel_payment(&d.librarian, &receipt.payment.order_id)
        .await
        .unwrap();
    assert_eq!(cancelled.status, PaymentStatus::Cancelled);

    let fines = d.engine.fines_for_transaction(loan.id).await.unwrap();
    assert_eq!(fines[0].status, FineStatus::Rejected);

    // Loan stays FINED, so it cannot be returned until a new fine is paid.
    let err = d.ledger.return_book(&d.librarian, "P-1").await.unwrap_err();
    assert!(matches!(err, Error::Fined(_)));

    d.engine
        .create_custom_fine(&d.librarian, "P-1", "Coffee stain on cover", dec!(60))
        .await
        .unwrap();
}

#[tokio::test]
async fn test_custom_fine_needs_active_loan() {
    let d = desk().await;
    let err = d
        .engine
        .create_custom_fine(&d.librarian, "P-2", "Lost", dec!(500))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::NotFound(_)));
}

#[tokio::test]
async fn test_force_complete_payment() {
    let d = desk().await;
    let loan = d.issue("P-1").await;
    let receipt = d
        .engine
        .create_custom_fine(&d.librarian, "P-1", "Torn page", dec!(30))
        .await
        .unwrap();

    let err = d
        .engine
        .force_complete_payment(&d.librarian, &receipt.payment.order_id)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Forbidden(_)));

    let settled = d
        .engine
        .force_complete_payment(&d.admin, &receipt.payment.order_id)
        .await
        .unwrap();
    assert_eq!(settled.payment.status, PaymentStatus::Paid);
    assert_eq!(settled.payment.signature, None);
    assert_eq!(settled.fine.status, FineStatus::Paid);
    assert_eq!(settled.loan.id, loan.id);
    assert_eq!(settled.loan.status, LoanStatus::Pending);
}

#[tokio::test]
async fn test_payment_for_returned_loan_does_not_reopen() {
    let d = desk().await;
    d.issue("P-1").await;
    let receipt = d
        .engine
        .create_custom_fine(&d.librarian, "P-1", "Lost dust jacket", dec!(40))
        .await
        .unwrap();
    d.ledger.force_return_book(&d.admin, "P-1").await.unwrap();

    let order_id = receipt.payment.order_id;
    let sig = signature::sign(SECRET, &order_id, "pay_003").unwrap();
    let settled = d
        .engine
        .verify_payment(&d.reader, "pay_003", &order_id, &sig)
        .await
        .unwrap();
    assert_eq!(settled.fine.status, FineStatus::Paid);
    assert_eq!(settled.loan.status, LoanStatus::Returned);
}

#[tokio::test]
async fn test_gateway_outage_creates_nothing() {
    let d = desk().await;
    let loan = d.issue("P-1").await;
    d.gateway.set_available(false);

    let err = d
        .engine
        .create_custom_fine(&d.librarian, "P-1", "Spine damage", dec!(90))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Gateway(_)));
    assert_eq!(
        d.ledger.transaction(loan.id).await.unwrap().status,
        LoanStatus::Pending
    );
    assert!(d.engine.fines_for_transaction(loan.id).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_gateway_timeout() {
    let d = desk_with(
        SandboxGateway::with_latency(std::time::Duration::from_millis(500)),
        20,
    )
    .await;
    let loan = d.issue("P-1").await;

    let err = d
        .engine
        .create_custom_fine(&d.librarian, "P-1", "Spine damage", dec!(90))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Gateway(_)));
    assert!(d.engine.fines_for_transaction(loan.id).await.unwrap().is_empty());
}
