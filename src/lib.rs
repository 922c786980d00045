pub mod arrears;
pub mod calendar;
pub mod charges;
pub mod config;
pub mod decimal;
pub mod errors;
pub mod events;
pub mod jobs;
pub mod loan;
pub mod payments;
pub mod schedule;
pub mod types;

// re-export key types
pub use decimal::{Currency, Money, Rate};
pub use errors::{LoanError, Result};
pub use events::{AccountType, EntryType, Event, EventStore, JournalEntry};
pub use arrears::{ArrearsSummary, ArrearsTracker};
pub use charges::{ChargeApportioner, ChargeDefinition, ChargeInstance, ChargeTarget};
pub use config::{
    GracePeriods, LoanTerms, Moratorium, OverduePenalty, RecalculationSettings, RestRule, Tranche,
};
pub use jobs::{AccrualPostingJob, InMemoryLoanStore, JobReport, LoanStore, OverduePenaltyJob};
pub use loan::Loan;
pub use payments::{LoanTransaction, PaymentAllocation, RepaymentAllocator};
pub use schedule::recalculation::PreCloseAmounts;
pub use schedule::{ComponentAmounts, Installment, RecalculationEngine, ScheduleBuilder};
pub use types::{
    AllocationStrategy, AmortizationType, ArrearsBasis, ChargeCalculation, ChargeId, ChargeTiming,
    Component, CompoundingMethod, InterestCalculationPeriod, LoanId, LoanStatus,
    PreCloseInterestStrategy, RateFrequency, RepaymentFrequency, RescheduleStrategy,
    TransactionId, TransactionKind,
};

// re-export external dependencies that users will need
pub use chrono;
pub use hourglass_rs::{SafeTimeProvider, TimeSource};
pub use rust_decimal::Decimal;
pub use uuid::Uuid;
