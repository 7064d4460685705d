//! Lending walkthrough
//!
//! Wires every component over the in-memory store and walks one copy
//! through issue, overdue, fine, payment and return on a manual clock.
//!
//! Usage: `lending-walkthrough [config.toml]`. Without a file, settings
//! come from `LIBRARY_*` environment variables; `LIBRARY_GATEWAY_MODE=http`
//! talks to the real gateway instead of the sandbox.

use anyhow::Context;
use catalog::{Catalog, MemoryObjectStorage, NewBook};
use chrono::{Duration, Utc};
use fines::{signature, FineEngine, HttpGateway, PaymentGateway, SandboxGateway};
use library_core::{Address, Caller, Config, ManualClock, Metrics, Repositories, Role};
use loan_ledger::{LoanLedger, NewUser};
use prometheus::{Encoder, TextEncoder};
use rust_decimal_macros::dec;
use std::sync::Arc;
use tracing::{info, warn};

fn load_config() -> anyhow::Result<Config> {
    let mut config = match std::env::args().nth(1) {
        Some(path) => Config::from_file(&path).with_context(|| format!("loading {}", path))?,
        None => Config::from_env()?,
    };

    if config.gateway.key_secret.is_empty() {
        warn!("No gateway secret configured, using sandbox credentials");
        config.gateway.key_id = "rzp_test_sandbox".to_string();
        config.gateway.key_secret = "sandbox_secret".to_string();
    }

    config.validate()?;
    Ok(config)
}

fn address(city: &str) -> Address {
    Address {
        country: "India".to_string(),
        state: "Karnataka".to_string(),
        city: city.to_string(),
        pincode: "560001".to_string(),
        line1: "1 Library Lane".to_string(),
        line2: None,
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let config = load_config()?;
    info!(service = %config.service_name, version = %config.service_version, "Starting walkthrough");

    let repos = Repositories::in_memory();
    let clock = ManualClock::new(Utc::now());
    let metrics = Metrics::new()?;

    let gateway: Arc<dyn PaymentGateway> = match std::env::var("LIBRARY_GATEWAY_MODE").as_deref() {
        Ok("http") => Arc::new(HttpGateway::new(&config.gateway)?),
        _ => Arc::new(SandboxGateway::new()),
    };

    let catalog = Catalog::new(
        &repos,
        Arc::new(MemoryObjectStorage::new()),
        Arc::new(clock.clone()),
        config.catalog.clone(),
    );
    let ledger = LoanLedger::new(
        &repos,
        Arc::new(clock.clone()),
        config.loans.clone(),
        metrics.clone(),
    );
    let engine = FineEngine::new(
        &repos,
        ledger.clone(),
        gateway,
        Arc::new(clock.clone()),
        config.fines.clone(),
        config.gateway.clone(),
        metrics.clone(),
    );

    // People
    let directory = ledger.directory();
    let librarian = directory
        .register(NewUser {
            name: "Lakshmi Iyer".to_string(),
            email: "lakshmi@shelfwise.example".to_string(),
            phone: "9876500001".to_string(),
            password_hash: "argon2id$demo".to_string(),
            address: address("Bengaluru"),
            role: Some(Role::Librarian),
        })
        .await?;
    let librarian = directory.set_verified(librarian.id, true).await?;
    let staff = Caller::from(&librarian);

    let reader = directory
        .register(NewUser {
            name: "Rahul Menon".to_string(),
            email: "rahul@shelfwise.example".to_string(),
            phone: "9876500002".to_string(),
            password_hash: "argon2id$demo".to_string(),
            address: address("Mysuru"),
            role: None,
        })
        .await?;
    let reader = directory.set_verified(reader.id, true).await?;
    let borrower = Caller::from(&reader);

    // Catalog
    for code in ["GOD-1", "GOD-2"] {
        catalog
            .add_book(
                &staff,
                NewBook {
                    code: code.to_string(),
                    title: "The God of Small Things".to_string(),
                    subtitle: None,
                    author: "Arundhati Roy".to_string(),
                    publisher: "IndiaInk".to_string(),
                    published_date: "1997-04-04".to_string(),
                    description: "Twins in Ayemenem".to_string(),
                    genres: vec!["FICTION".to_string(), "DRAMA".to_string()],
                    isbn10: "0006550681".to_string(),
                    isbn13: "9780006550686".to_string(),
                    page_count: 340,
                },
            )
            .await?;
    }

    let cover = std::env::temp_dir().join("shelfwise-walkthrough-cover.png");
    tokio::fs::write(&cover, b"\x89PNG\r\n").await?;
    let book = catalog.change_thumbnail(&staff, "GOD-1", &cover).await?;
    info!(code = %book.code, url = %book.thumbnail.secure_url, "Cover uploaded");

    // Day 0: issue
    let loan = ledger.issue_book(&staff, "GOD-1", &reader.email).await?;
    let details = catalog.get_book_details(&book.isbn13).await?;
    info!(total = details.holding.total, stock = details.holding.stock, "Holding after issue");

    // Day 31: overdue
    clock.advance(Duration::days(31));
    let fined = ledger.fined_books(&borrower, reader.id).await?;
    info!(fined = fined.len(), "Fined loans after a month");

    let receipt = engine.create_fine_for_overdue(&staff, loan.id).await?;
    println!("{}", serde_json::to_string_pretty(&receipt)?);

    // The gateway's checkout calls back with a signed payment id.
    let gateway_payment_id = "pay_walkthrough_001";
    let sig = signature::sign(
        &config.gateway.key_secret,
        &receipt.payment.order_id,
        gateway_payment_id,
    )?;
    let settled = engine
        .verify_payment(&borrower, gateway_payment_id, &receipt.payment.order_id, &sig)
        .await?;
    info!(status = %settled.loan.status, due = %settled.loan.due_date, "Loan reopened");

    let returned = ledger.return_book(&staff, "GOD-1").await?;
    info!(status = %returned.status, "Copy back on the shelf");

    for entry in ledger.loan_history("GOD-1").await? {
        info!(transaction_id = %entry.id, status = %entry.status, "History");
    }

    // Damage on the second copy, cancelled at the desk and raised again
    ledger.issue_book(&staff, "GOD-2", &reader.email).await?;
    let damage = engine
        .create_custom_fine(&staff, "GOD-2", "Water damage on cover", dec!(120))
        .await?;
    let cancelled = engine.cancel_payment(&staff, &damage.payment.order_id).await?;
    info!(order_id = %cancelled.order_id, status = %cancelled.status, "Damage fine cancelled");
    let damage = engine
        .create_custom_fine(&staff, "GOD-2", "Water damage on cover", dec!(100))
        .await?;
    info!(
        order_id = %damage.payment.order_id,
        amount = %damage.fine.amount,
        fines = engine.fines_for_transaction(damage.fine.transaction_id).await?.len(),
        key_id = engine.gateway_key_id(),
        "Damage fine raised"
    );

    let mut buffer = Vec::new();
    TextEncoder::new().encode(&metrics.registry.gather(), &mut buffer)?;
    println!("{}", String::from_utf8(buffer)?);

    Ok(())
}
