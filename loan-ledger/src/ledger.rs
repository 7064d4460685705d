//! Loan transaction state machine

use crate::directory::BorrowerDirectory;
use crate::overdue::{due_date_for, mark_overdue_if_needed, sweep};
use library_core::{
    config::LoanPolicy,
    storage::{BookRepository, LoanRepository, Repositories},
    Book, Caller, Clock, Error, LoanStatus, LoanTransaction, Metrics, Result, TransactionId,
    UserId,
};
use std::sync::Arc;
use tracing::{info, warn};

/// Loan ledger
#[derive(Clone)]
pub struct LoanLedger {
    books: Arc<dyn BookRepository>,
    loans: Arc<dyn LoanRepository>,
    directory: BorrowerDirectory,
    clock: Arc<dyn Clock>,
    policy: LoanPolicy,
    metrics: Metrics,
}

impl LoanLedger {
    /// Create ledger
    pub fn new(
        repos: &Repositories,
        clock: Arc<dyn Clock>,
        policy: LoanPolicy,
        metrics: Metrics,
    ) -> Self {
        Self {
            books: repos.books.clone(),
            loans: repos.loans.clone(),
            directory: BorrowerDirectory::new(repos, clock.clone()),
            clock,
            policy,
            metrics,
        }
    }

    /// Borrower directory backing this ledger
    pub fn directory(&self) -> &BorrowerDirectory {
        &self.directory
    }

    /// Loan policy in force
    pub fn policy(&self) -> &LoanPolicy {
        &self.policy
    }

    async fn book_by_code(&self, code: &str) -> Result<Book> {
        self.books
            .find_by_code(code.trim())
            .await?
            .ok_or_else(|| Error::NotFound(format!("Book {}", code)))
    }

    async fn active_loan_of(&self, book: &Book) -> Result<LoanTransaction> {
        self.loans
            .find_active_by_book(book.id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("Book {} is not issued", book.code)))
    }

    /// Active loans of a borrower after the overdue sweep, with the number
    /// of loans the sweep flipped to FINED
    async fn swept_active_loans(&self, borrower_id: UserId) -> Result<(Vec<LoanTransaction>, usize)> {
        let active = self.loans.find_active_by_borrower(borrower_id).await?;
        sweep(self.loans.as_ref(), active, self.clock.now(), &self.metrics).await
    }

    /// Issue a copy to a borrower.
    ///
    /// Checks run in order: copy exists, copy free, borrower exists and is
    /// verified, no overdue or fined loans, below the loan limit, no other
    /// copy of the same edition. The store re-checks the copy, limit and
    /// edition rules atomically on insert.
    pub async fn issue_book(
        &self,
        caller: &Caller,
        book_code: &str,
        borrower_email: &str,
    ) -> Result<LoanTransaction> {
        caller.require_staff()?;

        let book = self.book_by_code(book_code).await?;
        if let Some(existing) = self.loans.find_active_by_book(book.id).await? {
            return Err(Error::AlreadyIssued(format!(
                "Book {} is already issued ({})",
                book.code, existing.id
            )));
        }

        let borrower = self.directory.find_by_email(borrower_email).await?;
        if !borrower.verified {
            return Err(Error::Unverified(format!(
                "Borrower {} is not verified",
                borrower.email
            )));
        }

        let (active, flipped) = self.swept_active_loans(borrower.id).await?;
        if flipped > 0 {
            warn!(borrower = %borrower.email, flipped, "Issue refused, overdue loans found");
            return Err(Error::Overdue(format!(
                "Borrower {} has {} overdue book(s)",
                borrower.email, flipped
            )));
        }
        if let Some(fined) = active.iter().find(|l| l.status == LoanStatus::Fined) {
            return Err(Error::Fined(format!(
                "Borrower {} has an unpaid fine on book {}",
                borrower.email, fined.book.code
            )));
        }
        if active.len() >= self.policy.max_active_loans {
            return Err(Error::LimitExceeded(format!(
                "Borrower {} already holds {} books",
                borrower.email,
                active.len()
            )));
        }
        if active.iter().any(|l| l.book.isbn13 == book.isbn13) {
            return Err(Error::DuplicateCopy(format!(
                "Borrower {} already holds a copy of ISBN {}",
                borrower.email, book.isbn13
            )));
        }

        let staff = self.directory.resolve_staff(caller).await?;
        let now = self.clock.now();
        let loan = LoanTransaction {
            id: TransactionId::new(),
            book: book.snapshot(),
            borrower: borrower.snapshot(),
            issued_by: staff.snapshot(),
            due_date: due_date_for(now, self.policy.loan_period_days),
            status: LoanStatus::Pending,
            returned_at: None,
            version: 0,
            created_at: now,
            updated_at: now,
        };

        self.loans
            .insert_issue(loan.clone(), self.policy.max_active_loans)
            .await?;
        self.metrics.loans_issued.inc();

        info!(
            transaction_id = %loan.id,
            book = %loan.book.code,
            borrower = %loan.borrower.email,
            issued_by = %loan.issued_by.email,
            due_date = %loan.due_date,
            "Book issued"
        );
        Ok(loan)
    }

    /// Return a copy. Overdue or fined loans must be settled first.
    pub async fn return_book(&self, caller: &Caller, book_code: &str) -> Result<LoanTransaction> {
        caller.require_staff()?;

        let book = self.book_by_code(book_code).await?;
        let loan = self.active_loan_of(&book).await?;
        let now = self.clock.now();

        let (loan, flipped) =
            mark_overdue_if_needed(self.loans.as_ref(), loan, now, &self.metrics).await?;
        if flipped {
            return Err(Error::Overdue(format!(
                "Book {} was due {}; pay the fine before returning",
                book.code, loan.due_date
            )));
        }
        if loan.status == LoanStatus::Fined {
            return Err(Error::Fined(format!(
                "Book {} has an unpaid fine",
                book.code
            )));
        }

        self.close(loan, now, false).await
    }

    /// Return a copy regardless of fine state. Admin only.
    pub async fn force_return_book(
        &self,
        caller: &Caller,
        book_code: &str,
    ) -> Result<LoanTransaction> {
        caller.require_admin()?;

        let book = self.book_by_code(book_code).await?;
        let loan = self.active_loan_of(&book).await?;
        self.close(loan, self.clock.now(), true).await
    }

    async fn close(
        &self,
        mut loan: LoanTransaction,
        now: chrono::DateTime<chrono::Utc>,
        forced: bool,
    ) -> Result<LoanTransaction> {
        let previous = loan.status;
        loan.status = LoanStatus::Returned;
        loan.returned_at = Some(now);
        loan.updated_at = now;

        let saved = self.loans.save(loan).await?;
        self.metrics.loans_returned.inc();

        info!(
            transaction_id = %saved.id,
            book = %saved.book.code,
            borrower = %saved.borrower.email,
            previous = %previous,
            forced,
            "Book returned"
        );
        Ok(saved)
    }

    /// Active loans of a borrower
    pub async fn borrowed_books(
        &self,
        caller: &Caller,
        borrower_id: UserId,
    ) -> Result<Vec<LoanTransaction>> {
        caller.require_owner_or_staff(borrower_id)?;
        let (active, _) = self.swept_active_loans(borrower_id).await?;
        Ok(active)
    }

    /// FINED loans of a borrower
    pub async fn fined_books(
        &self,
        caller: &Caller,
        borrower_id: UserId,
    ) -> Result<Vec<LoanTransaction>> {
        caller.require_owner_or_staff(borrower_id)?;
        let (active, _) = self.swept_active_loans(borrower_id).await?;
        Ok(active
            .into_iter()
            .filter(|l| l.status == LoanStatus::Fined)
            .collect())
    }

    /// One transaction, swept
    pub async fn transaction(&self, id: TransactionId) -> Result<LoanTransaction> {
        let loan = self
            .loans
            .find_by_id(id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("Transaction {}", id)))?;
        let (loan, _) =
            mark_overdue_if_needed(self.loans.as_ref(), loan, self.clock.now(), &self.metrics)
                .await?;
        Ok(loan)
    }

    /// Active loan of a copy, swept
    pub async fn active_loan(&self, book_code: &str) -> Result<LoanTransaction> {
        let book = self.book_by_code(book_code).await?;
        let loan = self.active_loan_of(&book).await?;
        let (loan, _) =
            mark_overdue_if_needed(self.loans.as_ref(), loan, self.clock.now(), &self.metrics)
                .await?;
        Ok(loan)
    }

    /// Every loan of a copy, oldest first, returned ones included
    pub async fn loan_history(&self, book_code: &str) -> Result<Vec<LoanTransaction>> {
        let book = self.book_by_code(book_code).await?;
        let history = self.loans.find_by_book(book.id).await?;

        let now = self.clock.now();
        let mut current = Vec::with_capacity(history.len());
        for loan in history {
            let (loan, _) =
                mark_overdue_if_needed(self.loans.as_ref(), loan, now, &self.metrics).await?;
            current.push(loan);
        }
        Ok(current)
    }

    /// Put an active loan into FINED for a manually raised fine
    pub async fn flag_fined(&self, loan: LoanTransaction) -> Result<LoanTransaction> {
        match loan.status {
            LoanStatus::Fined => Ok(loan),
            LoanStatus::Returned => Err(Error::InvalidState(format!(
                "Transaction {} is already returned",
                loan.id
            ))),
            LoanStatus::Pending => {
                let mut loan = loan;
                loan.status = LoanStatus::Fined;
                loan.updated_at = self.clock.now();
                let saved = self.loans.save(loan).await?;
                info!(transaction_id = %saved.id, book = %saved.book.code, "Loan fined");
                Ok(saved)
            }
        }
    }

    /// Reopen a FINED loan after its fine was paid, due at the end of the
    /// grace period. Loans in any other state are left as they are.
    pub async fn reopen_after_payment(&self, id: TransactionId) -> Result<LoanTransaction> {
        let mut loan = self
            .loans
            .find_by_id(id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("Transaction {}", id)))?;

        if loan.status != LoanStatus::Fined {
            info!(transaction_id = %id, status = %loan.status, "Fine paid, loan not reopened");
            return Ok(loan);
        }

        let now = self.clock.now();
        loan.status = LoanStatus::Pending;
        loan.due_date = due_date_for(now, self.policy.grace_days_after_payment);
        loan.updated_at = now;

        let saved = self.loans.save(loan).await?;
        info!(
            transaction_id = %saved.id,
            book = %saved.book.code,
            due_date = %saved.due_date,
            "Fine paid, loan reopened"
        );
        Ok(saved)
    }
}

impl std::fmt::Debug for LoanLedger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoanLedger")
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}
