//! Shared fixtures for ledger tests

#![allow(dead_code)]

use chrono::{NaiveDate, TimeZone, Utc};
use library_core::{
    config::LoanPolicy, Address, Book, BookId, Caller, Genre, ManualClock, Metrics, Repositories,
    Role, Thumbnail, User, VolumeInfo,
};
use loan_ledger::{LoanLedger, NewUser};
use std::sync::Arc;

pub struct Library {
    pub repos: Repositories,
    pub clock: ManualClock,
    pub metrics: Metrics,
    pub ledger: LoanLedger,
    pub librarian: Caller,
    pub admin: Caller,
}

pub async fn library() -> Library {
    library_with_policy(LoanPolicy::default()).await
}

pub async fn library_with_policy(policy: LoanPolicy) -> Library {
    let repos = Repositories::in_memory();
    let clock = ManualClock::new(Utc.with_ymd_and_hms(2024, 1, 1, 10, 0, 0).unwrap());
    let metrics = Metrics::new().unwrap();
    let ledger = LoanLedger::new(&repos, Arc::new(clock.clone()), policy, metrics.clone());

    let mut lib = Library {
        repos,
        clock,
        metrics,
        ledger,
        librarian: Caller::new(library_core::UserId::new(), Role::Librarian, true),
        admin: Caller::new(library_core::UserId::new(), Role::Admin, true),
    };

    let librarian = lib
        .register("librarian@shelfwise.test", "9000000001", Some(Role::Librarian))
        .await;
    lib.librarian = Caller::from(&librarian);

    // Admins cannot self-register; promote through the store directly.
    let mut admin = lib.register("admin@shelfwise.test", "9000000002", None).await;
    admin.role = Role::Admin;
    lib.repos.users.update(admin.clone()).await.unwrap();
    lib.admin = Caller::from(&admin);

    lib
}

impl Library {
    pub async fn register(&self, email: &str, phone: &str, role: Option<Role>) -> User {
        let user = self
            .ledger
            .directory()
            .register(NewUser {
                name: "Test User".to_string(),
                email: email.to_string(),
                phone: phone.to_string(),
                password_hash: "hashed".to_string(),
                address: Address {
                    country: "India".to_string(),
                    state: "Maharashtra".to_string(),
                    city: "Pune".to_string(),
                    pincode: "411001".to_string(),
                    line1: "5 FC Road".to_string(),
                    line2: None,
                },
                role,
            })
            .await
            .unwrap();
        self.ledger
            .directory()
            .set_verified(user.id, true)
            .await
            .unwrap()
    }

    pub async fn reader(&self, n: u32) -> User {
        self.register(
            &format!("reader{}@shelfwise.test", n),
            &format!("{}", 8_000_000_000u64 + u64::from(n)),
            None,
        )
        .await
    }

    pub async fn shelve(&self, code: &str, isbn13: &str) -> Book {
        let now = Utc::now();
        let book = Book {
            id: BookId::new(),
            code: code.to_string(),
            volume: VolumeInfo {
                title: format!("Title {}", isbn13),
                subtitle: None,
                author: "Author".to_string(),
            },
            publisher: "Publisher".to_string(),
            published_date: NaiveDate::from_ymd_opt(2001, 1, 1).unwrap(),
            description: "Description".to_string(),
            genres: vec![Genre::Fiction],
            isbn10: "0000000000".to_string(),
            isbn13: isbn13.to_string(),
            page_count: 100,
            thumbnail: Thumbnail::placeholder("https://img/placeholder.png"),
            created_at: now,
            updated_at: now,
        };
        self.repos.books.insert(book.clone()).await.unwrap();
        book
    }
}
