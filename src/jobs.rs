use std::collections::HashMap;

use chrono::NaiveDate;
use hourglass_rs::SafeTimeProvider;
use tracing::{info, warn};

use crate::errors::{LoanError, Result};
use crate::events::EventStore;
use crate::loan::Loan;
use crate::types::LoanId;

/// storage boundary the batch jobs run against
pub trait LoanStore {
    fn loan_ids(&self) -> Vec<LoanId>;
    fn load(&self, id: LoanId) -> Option<Loan>;
    /// persist with an optimistic-lock check against the loaded version
    fn save(&mut self, loan: Loan, expected_version: u64) -> Result<()>;
}

#[derive(Debug, Default)]
pub struct InMemoryLoanStore {
    loans: HashMap<LoanId, Loan>,
}

impl InMemoryLoanStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, loan: Loan) {
        self.loans.insert(loan.id, loan);
    }

    pub fn get(&self, id: LoanId) -> Option<&Loan> {
        self.loans.get(&id)
    }
}

impl LoanStore for InMemoryLoanStore {
    fn loan_ids(&self) -> Vec<LoanId> {
        self.loans.keys().copied().collect()
    }

    fn load(&self, id: LoanId) -> Option<Loan> {
        self.loans.get(&id).cloned()
    }

    fn save(&mut self, loan: Loan, expected_version: u64) -> Result<()> {
        if let Some(current) = self.loans.get(&loan.id) {
            if current.version != expected_version {
                return Err(LoanError::StaleVersion {
                    expected: expected_version,
                    found: current.version,
                });
            }
        }
        self.loans.insert(loan.id, loan);
        Ok(())
    }
}

/// outcome of one batch run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct JobReport {
    pub processed: u32,
    pub skipped: u32,
    pub failed: u32,
}

/// posts accrued interest and fees up to the business date
///
/// idempotent: a second run on the same date posts nothing new
pub struct AccrualPostingJob;

impl AccrualPostingJob {
    pub fn run(
        store: &mut impl LoanStore,
        time_provider: &SafeTimeProvider,
        events: &mut EventStore,
    ) -> JobReport {
        let today = time_provider.now().date_naive();
        let mut report = JobReport::default();
        for loan_id in store.loan_ids() {
            match Self::run_one(store, loan_id, today, events) {
                Ok(true) => report.processed += 1,
                Ok(false) => report.skipped += 1,
                Err(e) => {
                    // one bad loan must not stall the rest of the batch
                    warn!(%loan_id, error = %e, "accrual posting failed");
                    report.failed += 1;
                }
            }
        }
        info!(
            processed = report.processed,
            skipped = report.skipped,
            failed = report.failed,
            %today,
            "accrual posting run complete"
        );
        report
    }

    fn run_one(
        store: &mut impl LoanStore,
        loan_id: LoanId,
        today: NaiveDate,
        events: &mut EventStore,
    ) -> Result<bool> {
        let mut loan = match store.load(loan_id) {
            Some(loan) => loan,
            None => return Ok(false),
        };
        if !loan.status.accepts_repayments() {
            return Ok(false);
        }
        let expected = loan.version;
        let (interest, fees) = loan.post_accruals(today, events)?;
        store.save(loan, expected)?;
        Ok(interest.is_positive() || fees.is_positive())
    }
}

/// attaches penalty charges to installments past their grace window
pub struct OverduePenaltyJob;

impl OverduePenaltyJob {
    pub fn run(
        store: &mut impl LoanStore,
        time_provider: &SafeTimeProvider,
        events: &mut EventStore,
    ) -> JobReport {
        let today = time_provider.now().date_naive();
        let mut report = JobReport::default();
        for loan_id in store.loan_ids() {
            match Self::run_one(store, loan_id, today, events) {
                Ok(applied) if applied > 0 => report.processed += 1,
                Ok(_) => report.skipped += 1,
                Err(e) => {
                    warn!(%loan_id, error = %e, "overdue penalty application failed");
                    report.failed += 1;
                }
            }
        }
        info!(
            processed = report.processed,
            skipped = report.skipped,
            failed = report.failed,
            %today,
            "overdue penalty run complete"
        );
        report
    }

    fn run_one(
        store: &mut impl LoanStore,
        loan_id: LoanId,
        today: NaiveDate,
        events: &mut EventStore,
    ) -> Result<u32> {
        let mut loan = match store.load(loan_id) {
            Some(loan) => loan,
            None => return Ok(0),
        };
        let expected = loan.version;
        let applied = loan.apply_overdue_penalties(today, events)?;
        if applied > 0 {
            store.save(loan, expected)?;
        }
        Ok(applied)
    }
}
