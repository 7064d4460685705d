//! Lazy overdue detection

use chrono::{DateTime, Duration, NaiveTime, TimeZone, Utc};
use library_core::{
    storage::LoanRepository, Error, LoanStatus, LoanTransaction, Metrics, Result,
};
use tracing::{debug, info};

/// Last instant (millisecond precision) of the UTC day containing `instant`
pub fn end_of_day(instant: DateTime<Utc>) -> DateTime<Utc> {
    let midnight = Utc.from_utc_datetime(&instant.date_naive().and_time(NaiveTime::MIN));
    midnight + Duration::days(1) - Duration::milliseconds(1)
}

/// Due date of a loan issued at `issued_at`
pub fn due_date_for(issued_at: DateTime<Utc>, period_days: i64) -> DateTime<Utc> {
    end_of_day(issued_at + Duration::days(period_days))
}

/// A PENDING loan whose due date has passed
pub fn is_overdue(loan: &LoanTransaction, now: DateTime<Utc>) -> bool {
    loan.status == LoanStatus::Pending && now > loan.due_date
}

/// Calendar days late; the day after the due date counts as one
pub fn days_overdue(due_date: DateTime<Utc>, now: DateTime<Utc>) -> i64 {
    if now <= due_date {
        0
    } else {
        (now - due_date).num_days() + 1
    }
}

/// Flip an overdue PENDING loan to FINED.
///
/// Returns the current record and whether this call made the transition.
/// Calling it again on the result is a no-op. A concurrent writer that got
/// there first is not an error: the stored record is returned instead.
pub async fn mark_overdue_if_needed(
    loans: &dyn LoanRepository,
    loan: LoanTransaction,
    now: DateTime<Utc>,
    metrics: &Metrics,
) -> Result<(LoanTransaction, bool)> {
    if !is_overdue(&loan, now) {
        return Ok((loan, false));
    }

    let id = loan.id;
    let mut fined = loan;
    fined.status = LoanStatus::Fined;
    fined.updated_at = now;

    match loans.save(fined).await {
        Ok(saved) => {
            metrics.overdue_transitions.inc();
            info!(
                transaction_id = %saved.id,
                book = %saved.book.code,
                borrower = %saved.borrower.email,
                due_date = %saved.due_date,
                "Loan overdue, marked FINED"
            );
            Ok((saved, true))
        }
        Err(Error::Conflict(_)) => {
            let current = loans
                .find_by_id(id)
                .await?
                .ok_or_else(|| Error::NotFound(format!("Transaction {}", id)))?;
            debug!(transaction_id = %id, status = %current.status, "Overdue sweep lost a race");
            if is_overdue(&current, now) {
                return Err(Error::Conflict(format!(
                    "Transaction {} changed during overdue sweep",
                    id
                )));
            }
            Ok((current, false))
        }
        Err(e) => Err(e),
    }
}

/// Sweep a set of loans, returning the current records in order
pub async fn sweep(
    loans: &dyn LoanRepository,
    active: Vec<LoanTransaction>,
    now: DateTime<Utc>,
    metrics: &Metrics,
) -> Result<(Vec<LoanTransaction>, usize)> {
    let mut current = Vec::with_capacity(active.len());
    let mut flipped = 0;
    for loan in active {
        let (loan, changed) = mark_overdue_if_needed(loans, loan, now, metrics).await?;
        if changed {
            flipped += 1;
        }
        current.push(loan);
    }
    debug!(checked = current.len(), flipped, "Overdue sweep");
    Ok((current, flipped))
}
