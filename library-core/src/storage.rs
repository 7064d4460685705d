//! Storage layer
//!
//! Components reach the document store through one async repository trait
//! per aggregate. [`MemoryStore`] implements all of them on top of
//! `parking_lot` locks and is what the tests and the walkthrough run on.
//!
//! # Concurrency
//!
//! - Loans, fines and payments are saved with compare-and-swap on `version`;
//!   a stale write fails with [`Error::Conflict`]
//! - [`LoanRepository::insert_issue`] re-checks the lending invariants under
//!   the write lock, so two racing issues of one copy cannot both land
//! - [`PaymentRepository::insert_open`] rejects a second open payment for the
//!   same loan under the write lock

use crate::{
    error::{Error, Result},
    types::{
        Book, BookId, Fine, FineId, Genre, LoanTransaction, Payment, PaymentStatus,
        TransactionId, User, UserId,
    },
};
use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

/// Catalog search filter
#[derive(Debug, Clone, Default)]
pub struct BookFilter {
    /// Case-insensitive substring over title, subtitle and author
    pub text: Option<String>,
    /// Exact genre
    pub genre: Option<Genre>,
}

/// Book records
#[async_trait]
pub trait BookRepository: Send + Sync {
    /// Insert a new copy; fails with `Conflict` if the code exists
    async fn insert(&self, book: Book) -> Result<()>;
    /// Find a copy by code
    async fn find_by_code(&self, code: &str) -> Result<Option<Book>>;
    /// All copies of an edition, oldest first
    async fn find_by_isbn13(&self, isbn13: &str) -> Result<Vec<Book>>;
    /// Filtered search, one representative (oldest copy) per ISBN-13
    async fn search(&self, filter: &BookFilter) -> Result<Vec<Book>>;
    /// Replace an existing copy
    async fn update(&self, book: Book) -> Result<()>;
    /// Delete a copy
    async fn delete(&self, id: BookId) -> Result<()>;
}

/// User records
#[async_trait]
pub trait UserRepository: Send + Sync {
    /// Insert; fails with `Conflict` on duplicate email or phone
    async fn insert(&self, user: User) -> Result<()>;
    /// Find by id
    async fn find_by_id(&self, id: UserId) -> Result<Option<User>>;
    /// Find by (lower-cased) email
    async fn find_by_email(&self, email: &str) -> Result<Option<User>>;
    /// Replace an existing user
    async fn update(&self, user: User) -> Result<()>;
}

/// Loan transactions. Never deleted.
#[async_trait]
pub trait LoanRepository: Send + Sync {
    /// Atomically insert a new loan after re-checking: no active loan for the
    /// copy, fewer than `max_active` active loans for the borrower, and no
    /// active loan for the same ISBN-13 held by the borrower
    async fn insert_issue(&self, loan: LoanTransaction, max_active: usize) -> Result<()>;
    /// Find by id
    async fn find_by_id(&self, id: TransactionId) -> Result<Option<LoanTransaction>>;
    /// Active loan of a copy
    async fn find_active_by_book(&self, book_id: BookId) -> Result<Option<LoanTransaction>>;
    /// Active loans of a borrower, oldest first
    async fn find_active_by_borrower(&self, borrower_id: UserId) -> Result<Vec<LoanTransaction>>;
    /// Every loan of a copy, oldest first
    async fn find_by_book(&self, book_id: BookId) -> Result<Vec<LoanTransaction>>;
    /// Number of the given copies currently on an active loan
    async fn count_active_for_books(&self, book_ids: &[BookId]) -> Result<usize>;
    /// Compare-and-swap on `version`; returns the stored record
    async fn save(&self, loan: LoanTransaction) -> Result<LoanTransaction>;
}

/// Fines
#[async_trait]
pub trait FineRepository: Send + Sync {
    /// Insert a new fine
    async fn insert(&self, fine: Fine) -> Result<()>;
    /// Find by id
    async fn find_by_id(&self, id: FineId) -> Result<Option<Fine>>;
    /// Fines raised against a loan, oldest first
    async fn find_by_transaction(&self, transaction_id: TransactionId) -> Result<Vec<Fine>>;
    /// Compare-and-swap on `version`; returns the stored record
    async fn save(&self, fine: Fine) -> Result<Fine>;
}

/// Fine payments
#[async_trait]
pub trait PaymentRepository: Send + Sync {
    /// Insert a CREATED payment; fails with `DuplicatePayment` if the loan
    /// already has one, `Conflict` if the order id is taken
    async fn insert_open(&self, payment: Payment) -> Result<()>;
    /// Find by gateway order id
    async fn find_by_order_id(&self, order_id: &str) -> Result<Option<Payment>>;
    /// CREATED payment of a loan
    async fn find_open_by_transaction(
        &self,
        transaction_id: TransactionId,
    ) -> Result<Option<Payment>>;
    /// Compare-and-swap on `version`; returns the stored record
    async fn save(&self, payment: Payment) -> Result<Payment>;
}

/// Repository bundle handed to the components
#[derive(Clone)]
pub struct Repositories {
    /// Books
    pub books: Arc<dyn BookRepository>,
    /// Users
    pub users: Arc<dyn UserRepository>,
    /// Loans
    pub loans: Arc<dyn LoanRepository>,
    /// Fines
    pub fines: Arc<dyn FineRepository>,
    /// Payments
    pub payments: Arc<dyn PaymentRepository>,
}

impl Repositories {
    /// Every repository backed by one shared [`MemoryStore`]
    pub fn in_memory() -> Self {
        Self::from_store(Arc::new(MemoryStore::new()))
    }

    /// Every repository backed by `store`
    pub fn from_store(store: Arc<MemoryStore>) -> Self {
        Self {
            books: store.clone(),
            users: store.clone(),
            loans: store.clone(),
            fines: store.clone(),
            payments: store,
        }
    }
}

impl fmt::Debug for Repositories {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Repositories").finish_non_exhaustive()
    }
}

/// Records saved with optimistic concurrency
trait Versioned {
    fn version(&self) -> u64;
    fn bump(&mut self);
}

impl Versioned for LoanTransaction {
    fn version(&self) -> u64 {
        self.version
    }
    fn bump(&mut self) {
        self.version += 1;
    }
}

impl Versioned for Payment {
    fn version(&self) -> u64 {
        self.version
    }
    fn bump(&mut self) {
        self.version += 1;
    }
}

impl Versioned for Fine {
    fn version(&self) -> u64 {
        self.version
    }
    fn bump(&mut self) {
        self.version += 1;
    }
}

fn compare_and_swap<K, V>(map: &RwLock<HashMap<K, V>>, key: K, mut record: V, what: &str) -> Result<V>
where
    K: std::hash::Hash + Eq + fmt::Display + Clone,
    V: Versioned + Clone,
{
    let mut map = map.write();
    let stored = map
        .get(&key)
        .ok_or_else(|| Error::NotFound(format!("{} {}", what, key)))?;

    if stored.version() != record.version() {
        return Err(Error::Conflict(format!(
            "{} {} was modified concurrently (expected version {}, found {})",
            what,
            key,
            record.version(),
            stored.version()
        )));
    }

    record.bump();
    map.insert(key, record.clone());
    Ok(record)
}

/// In-memory document store
#[derive(Default)]
pub struct MemoryStore {
    books: RwLock<HashMap<BookId, Book>>,
    users: RwLock<HashMap<UserId, User>>,
    loans: RwLock<HashMap<TransactionId, LoanTransaction>>,
    fines: RwLock<HashMap<FineId, Fine>>,
    payments: RwLock<HashMap<String, Payment>>,
}

impl MemoryStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }
}

impl fmt::Debug for MemoryStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryStore")
            .field("books", &self.books.read().len())
            .field("users", &self.users.read().len())
            .field("loans", &self.loans.read().len())
            .field("fines", &self.fines.read().len())
            .field("payments", &self.payments.read().len())
            .finish()
    }
}

#[async_trait]
impl BookRepository for MemoryStore {
    async fn insert(&self, book: Book) -> Result<()> {
        let mut books = self.books.write();
        if books.values().any(|b| b.code == book.code) {
            return Err(Error::Conflict(format!(
                "Book with code {} already exists",
                book.code
            )));
        }
        books.insert(book.id, book);
        Ok(())
    }

    async fn find_by_code(&self, code: &str) -> Result<Option<Book>> {
        Ok(self.books.read().values().find(|b| b.code == code).cloned())
    }

    async fn find_by_isbn13(&self, isbn13: &str) -> Result<Vec<Book>> {
        let mut copies: Vec<Book> = self
            .books
            .read()
            .values()
            .filter(|b| b.isbn13 == isbn13)
            .cloned()
            .collect();
        copies.sort_by_key(|b| (b.created_at, b.id));
        Ok(copies)
    }

    async fn search(&self, filter: &BookFilter) -> Result<Vec<Book>> {
        let needle = filter.text.as_ref().map(|t| t.trim().to_lowercase());

        let mut hits: Vec<Book> = self
            .books
            .read()
            .values()
            .filter(|b| needle.as_deref().map_or(true, |n| b.matches_text(n)))
            .filter(|b| filter.genre.map_or(true, |g| b.genres.contains(&g)))
            .cloned()
            .collect();
        hits.sort_by_key(|b| (b.created_at, b.id));

        let mut seen = HashSet::new();
        hits.retain(|b| seen.insert(b.isbn13.clone()));
        Ok(hits)
    }

    async fn update(&self, book: Book) -> Result<()> {
        let mut books = self.books.write();
        match books.get_mut(&book.id) {
            Some(existing) => {
                *existing = book;
                Ok(())
            }
            None => Err(Error::NotFound(format!("Book {}", book.code))),
        }
    }

    async fn delete(&self, id: BookId) -> Result<()> {
        self.books
            .write()
            .remove(&id)
            .map(|_| ())
            .ok_or_else(|| Error::NotFound(format!("Book {}", id)))
    }
}

#[async_trait]
impl UserRepository for MemoryStore {
    async fn insert(&self, user: User) -> Result<()> {
        let mut users = self.users.write();
        if users
            .values()
            .any(|u| u.email == user.email || u.phone == user.phone)
        {
            return Err(Error::Conflict(
                "User with this email or phone already exists".to_string(),
            ));
        }
        users.insert(user.id, user);
        Ok(())
    }

    async fn find_by_id(&self, id: UserId) -> Result<Option<User>> {
        Ok(self.users.read().get(&id).cloned())
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<User>> {
        Ok(self
            .users
            .read()
            .values()
            .find(|u| u.email == email)
            .cloned())
    }

    async fn update(&self, user: User) -> Result<()> {
        let mut users = self.users.write();
        match users.get_mut(&user.id) {
            Some(existing) => {
                *existing = user;
                Ok(())
            }
            None => Err(Error::NotFound(format!("User {}", user.id))),
        }
    }
}

#[async_trait]
impl LoanRepository for MemoryStore {
    async fn insert_issue(&self, loan: LoanTransaction, max_active: usize) -> Result<()> {
        let mut loans = self.loans.write();

        if loans
            .values()
            .any(|l| l.is_active() && l.book_id() == loan.book_id())
        {
            return Err(Error::AlreadyIssued(format!(
                "Book {} is already issued",
                loan.book.code
            )));
        }

        let held: Vec<&LoanTransaction> = loans
            .values()
            .filter(|l| l.is_active() && l.borrower_id() == loan.borrower_id())
            .collect();

        if held.len() >= max_active {
            return Err(Error::LimitExceeded(format!(
                "Borrower {} already holds {} books",
                loan.borrower.email,
                held.len()
            )));
        }

        if held.iter().any(|l| l.book.isbn13 == loan.book.isbn13) {
            return Err(Error::DuplicateCopy(format!(
                "Borrower {} already holds a copy of ISBN {}",
                loan.borrower.email, loan.book.isbn13
            )));
        }

        loans.insert(loan.id, loan);
        Ok(())
    }

    async fn find_by_id(&self, id: TransactionId) -> Result<Option<LoanTransaction>> {
        Ok(self.loans.read().get(&id).cloned())
    }

    async fn find_active_by_book(&self, book_id: BookId) -> Result<Option<LoanTransaction>> {
        Ok(self
            .loans
            .read()
            .values()
            .find(|l| l.is_active() && l.book_id() == book_id)
            .cloned())
    }

    async fn find_active_by_borrower(&self, borrower_id: UserId) -> Result<Vec<LoanTransaction>> {
        let mut active: Vec<LoanTransaction> = self
            .loans
            .read()
            .values()
            .filter(|l| l.is_active() && l.borrower_id() == borrower_id)
            .cloned()
            .collect();
        active.sort_by_key(|l| (l.created_at, l.id));
        Ok(active)
    }

    async fn find_by_book(&self, book_id: BookId) -> Result<Vec<LoanTransaction>> {
        let mut history: Vec<LoanTransaction> = self
            .loans
            .read()
            .values()
            .filter(|l| l.book_id() == book_id)
            .cloned()
            .collect();
        history.sort_by_key(|l| (l.created_at, l.id));
        Ok(history)
    }

    async fn count_active_for_books(&self, book_ids: &[BookId]) -> Result<usize> {
        Ok(self
            .loans
            .read()
            .values()
            .filter(|l| l.is_active() && book_ids.contains(&l.book_id()))
            .count())
    }

    async fn save(&self, loan: LoanTransaction) -> Result<LoanTransaction> {
        compare_and_swap(&self.loans, loan.id, loan, "Transaction")
    }
}

#[async_trait]
impl FineRepository for MemoryStore {
    async fn insert(&self, fine: Fine) -> Result<()> {
        let mut fines = self.fines.write();
        if fines.contains_key(&fine.id) {
            return Err(Error::Conflict(format!("Fine {} already exists", fine.id)));
        }
        fines.insert(fine.id, fine);
        Ok(())
    }

    async fn find_by_id(&self, id: FineId) -> Result<Option<Fine>> {
        Ok(self.fines.read().get(&id).cloned())
    }

    async fn find_by_transaction(&self, transaction_id: TransactionId) -> Result<Vec<Fine>> {
        let mut fines: Vec<Fine> = self
            .fines
            .read()
            .values()
            .filter(|f| f.transaction_id == transaction_id)
            .cloned()
            .collect();
        fines.sort_by_key(|f| (f.created_at, f.id));
        Ok(fines)
    }

    async fn save(&self, fine: Fine) -> Result<Fine> {
        compare_and_swap(&self.fines, fine.id, fine, "Fine")
    }
}

#[async_trait]
impl PaymentRepository for MemoryStore {
    async fn insert_open(&self, payment: Payment) -> Result<()> {
        let mut payments = self.payments.write();

        if payments.values().any(|p| {
            p.transaction_id == payment.transaction_id && p.status == PaymentStatus::Created
        }) {
            return Err(Error::DuplicatePayment(format!(
                "Transaction {} already has an open payment",
                payment.transaction_id
            )));
        }

        if payments.contains_key(&payment.order_id) {
            return Err(Error::Conflict(format!(
                "Order {} already recorded",
                payment.order_id
            )));
        }

        payments.insert(payment.order_id.clone(), payment);
        Ok(())
    }

    async fn find_by_order_id(&self, order_id: &str) -> Result<Option<Payment>> {
        Ok(self.payments.read().get(order_id).cloned())
    }

    async fn find_open_by_transaction(
        &self,
        transaction_id: TransactionId,
    ) -> Result<Option<Payment>> {
        Ok(self
            .payments
            .read()
            .values()
            .find(|p| p.transaction_id == transaction_id && p.status == PaymentStatus::Created)
            .cloned())
    }

    async fn save(&self, payment: Payment) -> Result<Payment> {
        let order_id = payment.order_id.clone();
        compare_and_swap(&self.payments, order_id, payment, "Payment for order")
    }
}
