use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::decimal::Money;
use crate::types::{ChargeId, LoanId, LoanStatus, TransactionId};

/// all events emitted by the engine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Event {
    // lifecycle
    LoanApproved {
        loan_id: LoanId,
        principal: Money,
        date: NaiveDate,
    },
    DisbursementPosted {
        loan_id: LoanId,
        amount: Money,
        date: NaiveDate,
    },
    LoanClosed {
        loan_id: LoanId,
        date: NaiveDate,
    },
    LoanOverpaid {
        loan_id: LoanId,
        credit: Money,
        date: NaiveDate,
    },
    LoanForeclosed {
        loan_id: LoanId,
        payoff: Money,
        date: NaiveDate,
    },
    StatusChanged {
        loan_id: LoanId,
        old_status: LoanStatus,
        new_status: LoanStatus,
    },

    // schedule
    ScheduleRegenerated {
        loan_id: LoanId,
        installments: u32,
        as_of: NaiveDate,
    },

    // transactions
    RepaymentApplied {
        loan_id: LoanId,
        transaction_id: TransactionId,
        amount: Money,
        to_principal: Money,
        to_interest: Money,
        to_fees: Money,
        to_penalties: Money,
        excess: Money,
        date: NaiveDate,
    },
    TransactionReversed {
        loan_id: LoanId,
        transaction_id: TransactionId,
        date: NaiveDate,
    },

    // charges
    ChargeApplied {
        loan_id: LoanId,
        charge_id: ChargeId,
        due: Money,
        date: NaiveDate,
    },
    ChargePaid {
        loan_id: LoanId,
        charge_id: ChargeId,
        amount: Money,
        date: NaiveDate,
    },
    ChargeWaived {
        loan_id: LoanId,
        charge_id: ChargeId,
        amount: Money,
        date: NaiveDate,
    },
    WaiveReversed {
        loan_id: LoanId,
        charge_id: ChargeId,
        transaction_id: TransactionId,
        date: NaiveDate,
    },

    // batch jobs
    AccrualPosted {
        loan_id: LoanId,
        interest: Money,
        fees: Money,
        through: NaiveDate,
    },
    PenaltyApplied {
        loan_id: LoanId,
        charge_id: ChargeId,
        installment: u32,
        amount: Money,
        date: NaiveDate,
    },
}

/// event store for collecting events during operations
#[derive(Debug, Default)]
pub struct EventStore {
    events: Vec<Event>,
    journal: Vec<JournalEntry>,
}

impl EventStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn emit(&mut self, event: Event) {
        self.events.push(event);
    }

    pub fn post(&mut self, entry: JournalEntry) {
        self.journal.push(entry);
    }

    /// post a balanced debit/credit pair
    pub fn post_pair(
        &mut self,
        debit: AccountType,
        credit: AccountType,
        amount: Money,
        date: NaiveDate,
    ) {
        if amount.is_zero() {
            return;
        }
        self.journal.push(JournalEntry {
            account: debit,
            entry: EntryType::Debit,
            amount,
            date,
        });
        self.journal.push(JournalEntry {
            account: credit,
            entry: EntryType::Credit,
            amount,
            date,
        });
    }

    pub fn take_events(&mut self) -> Vec<Event> {
        std::mem::take(&mut self.events)
    }

    pub fn take_journal(&mut self) -> Vec<JournalEntry> {
        std::mem::take(&mut self.journal)
    }

    pub fn events(&self) -> &[Event] {
        &self.events
    }

    pub fn journal(&self) -> &[JournalEntry] {
        &self.journal
    }

    pub fn clear(&mut self) {
        self.events.clear();
        self.journal.clear();
    }
}

/// ledger account the accounting collaborator posts against
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AccountType {
    FundSource,
    LoanPortfolio,
    InterestReceivable,
    InterestIncome,
    FeeIncome,
    PenaltyIncome,
    FeeReceivable,
    WaiveExpense,
    OverpaymentLiability,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EntryType {
    Debit,
    Credit,
}

/// one side of a double-entry posting handed to the accounting collaborator
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct JournalEntry {
    pub account: AccountType,
    pub entry: EntryType,
    pub amount: Money,
    pub date: NaiveDate,
}
