use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::arrears::{ArrearsSummary, ArrearsTracker};
use crate::charges::{ChargeApportioner, ChargeDefinition, ChargeInstance, ChargeTarget};
use crate::config::{LoanTerms, Tranche};
use crate::decimal::Money;
use crate::errors::{LoanError, Result};
use crate::events::{AccountType, Event, EventStore};
use crate::payments::{LoanTransaction, PaymentAllocation, RepaymentAllocator};
use crate::schedule::recalculation::PreCloseAmounts;
use crate::schedule::{verify_schedule, Installment, RecalculationEngine, ScheduleBuilder};
use crate::types::{
    ChargeCalculation, ChargeId, ChargeTiming, LoanId, LoanStatus, TransactionId, TransactionKind,
};

/// the loan aggregate
///
/// the transaction log is the source of truth: every mutation appends to it
/// (or flips a reversal flag) and the schedule, charge settlements and
/// arrears position are rebuilt by replaying it against the agreed terms.
/// replaying makes undo and back-dated entries fall out naturally.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Loan {
    pub id: LoanId,
    pub terms: LoanTerms,
    pub status: LoanStatus,
    pub approved_on: NaiveDate,
    pub tranches: Vec<Tranche>,
    pub installments: Vec<Installment>,
    /// projection pinned at first disbursement, before any repayment
    pub original_schedule: Vec<Installment>,
    pub charges: Vec<ChargeInstance>,
    pub transactions: Vec<LoanTransaction>,
    /// credit held after paying beyond every outstanding due
    pub overpaid_amount: Money,
    pub arrears: ArrearsSummary,
    /// watermark for the accrual posting job
    pub accrued_through: Option<NaiveDate>,
    /// optimistic-locking counter, bumped on every successful mutation
    pub version: u64,
}

impl Loan {
    pub fn approve(terms: LoanTerms, approved_on: NaiveDate, events: &mut EventStore) -> Result<Self> {
        terms.validate()?;
        let loan = Self {
            id: Uuid::new_v4(),
            approved_on,
            status: LoanStatus::Approved,
            tranches: Vec::new(),
            installments: Vec::new(),
            original_schedule: Vec::new(),
            charges: Vec::new(),
            transactions: Vec::new(),
            overpaid_amount: Money::ZERO,
            arrears: ArrearsSummary::default(),
            accrued_through: None,
            version: 1,
            terms,
        };
        events.emit(Event::LoanApproved {
            loan_id: loan.id,
            principal: loan.terms.approved_principal,
            date: approved_on,
        });
        Ok(loan)
    }

    pub fn total_disbursed(&self) -> Money {
        self.tranches.iter().map(|t| t.amount).sum()
    }

    pub fn first_disbursement_date(&self) -> Option<NaiveDate> {
        self.tranches.iter().map(|t| t.date).min()
    }

    pub fn total_outstanding(&self) -> Money {
        let schedule: Money = self
            .installments
            .iter()
            .map(Installment::total_outstanding_for_period)
            .sum();
        let charges: Money = self.charges.iter().map(ChargeInstance::outstanding).sum();
        schedule + charges
    }

    /// release a tranche of the approved principal
    pub fn disburse(&mut self, amount: Money, date: NaiveDate, events: &mut EventStore) -> Result<()> {
        if !matches!(self.status, LoanStatus::Approved | LoanStatus::Active) {
            return Err(LoanError::LoanStatusNotPermitted { status: self.status });
        }
        if !amount.is_positive() {
            return Err(LoanError::InvalidPaymentAmount { amount });
        }
        let requested = self.total_disbursed() + amount;
        if requested > self.terms.approved_principal {
            return Err(LoanError::DisbursementExceedsApproved {
                approved: self.terms.approved_principal,
                requested,
            });
        }

        let old_status = self.status;
        let prior_charge_paid: Vec<(ChargeId, Money)> =
            self.charges.iter().map(|c| (c.id, c.paid)).collect();

        self.tranches.push(Tranche { date, amount });
        let seq = self.transactions.len() as u64;
        self.transactions.push(LoanTransaction::new(
            TransactionKind::Disbursement,
            date,
            seq,
            amount,
        ));
        self.status = LoanStatus::Active;

        if let Err(e) = self.reproject(date) {
            self.tranches.pop();
            self.transactions.pop();
            self.status = old_status;
            return Err(e);
        }
        if self.original_schedule.is_empty() {
            self.original_schedule = self.installments.clone();
        }

        events.emit(Event::DisbursementPosted {
            loan_id: self.id,
            amount,
            date,
        });
        events.post_pair(AccountType::LoanPortfolio, AccountType::FundSource, amount, date);

        // disbursement charges collected out of the proceeds
        for charge in &self.charges {
            let before = prior_charge_paid
                .iter()
                .find(|(id, _)| *id == charge.id)
                .map(|(_, paid)| *paid)
                .unwrap_or(Money::ZERO);
            let collected = charge.paid - before;
            if collected.is_positive() {
                events.emit(Event::ChargePaid {
                    loan_id: self.id,
                    charge_id: charge.id,
                    amount: collected,
                    date,
                });
                events.post_pair(AccountType::FundSource, AccountType::FeeIncome, collected, date);
            }
        }

        self.finish_mutation(old_status, date, events);
        Ok(())
    }

    /// projection shown at approval time, before any money moves
    pub fn project_schedule(&self, expected_disbursement: NaiveDate) -> Result<Vec<Installment>> {
        if self.tranches.is_empty() {
            let tranches = vec![Tranche {
                date: expected_disbursement,
                amount: self.terms.approved_principal,
            }];
            return ScheduleBuilder::build(&self.terms, &tranches);
        }
        ScheduleBuilder::build(&self.terms, &self.tranches)
    }

    /// re-derive the whole schedule as of a date
    pub fn recalculate(&mut self, as_of: NaiveDate, events: &mut EventStore) -> Result<()> {
        if self.status.is_terminal() || self.tranches.is_empty() {
            return Err(LoanError::LoanStatusNotPermitted { status: self.status });
        }
        let old_status = self.status;
        self.reproject(as_of)?;
        events.emit(Event::ScheduleRegenerated {
            loan_id: self.id,
            installments: self.installments.len() as u32,
            as_of,
        });
        self.finish_mutation(old_status, as_of, events);
        Ok(())
    }

    /// monetary entry point dispatching on the transaction kind
    pub fn apply_transaction(
        &mut self,
        kind: TransactionKind,
        amount: Money,
        date: NaiveDate,
        events: &mut EventStore,
    ) -> Result<PaymentAllocation> {
        match kind {
            TransactionKind::Repayment => self.apply_repayment(amount, date, events),
            TransactionKind::Refund => self.apply_refund(amount, date, events),
            other => Err(LoanError::WrongTransactionKind {
                expected: TransactionKind::Repayment,
                found: other,
            }),
        }
    }

    /// apply a repayment, returning where it went
    pub fn apply_repayment(
        &mut self,
        amount: Money,
        date: NaiveDate,
        events: &mut EventStore,
    ) -> Result<PaymentAllocation> {
        self.ensure_accepts_payments(amount, date)?;

        let old_status = self.status;
        let seq = self.transactions.len() as u64;
        let txn = LoanTransaction::new(TransactionKind::Repayment, date, seq, amount);
        let txn_id = txn.id;
        self.transactions.push(txn);

        let allocations = match self.reproject(date) {
            Ok(a) => a,
            Err(e) => {
                self.transactions.pop();
                return Err(e);
            }
        };
        let allocation = allocations
            .into_iter()
            .find(|(id, _)| *id == txn_id)
            .map(|(_, a)| a)
            .unwrap_or_default();

        events.emit(Event::RepaymentApplied {
            loan_id: self.id,
            transaction_id: txn_id,
            amount,
            to_principal: allocation.to_principal,
            to_interest: allocation.to_interest,
            to_fees: allocation.to_fees,
            to_penalties: allocation.to_penalties,
            excess: allocation.excess,
            date,
        });
        events.post_pair(AccountType::FundSource, AccountType::LoanPortfolio, allocation.to_principal, date);
        events.post_pair(AccountType::FundSource, AccountType::InterestIncome, allocation.to_interest, date);
        events.post_pair(AccountType::FundSource, AccountType::FeeIncome, allocation.to_fees, date);
        events.post_pair(AccountType::FundSource, AccountType::PenaltyIncome, allocation.to_penalties, date);
        events.post_pair(AccountType::FundSource, AccountType::OverpaymentLiability, allocation.excess, date);

        self.finish_mutation(old_status, date, events);
        Ok(allocation)
    }

    /// return money to the borrower, releasing overpayment first
    pub fn apply_refund(
        &mut self,
        amount: Money,
        date: NaiveDate,
        events: &mut EventStore,
    ) -> Result<PaymentAllocation> {
        self.ensure_accepts_payments(amount, date)?;

        let old_status = self.status;
        let seq = self.transactions.len() as u64;
        let txn = LoanTransaction::new(TransactionKind::Refund, date, seq, amount);
        let txn_id = txn.id;
        self.transactions.push(txn);

        let allocations = match self.reproject(date) {
            Ok(a) => a,
            Err(e) => {
                self.transactions.pop();
                return Err(e);
            }
        };
        let released = allocations
            .into_iter()
            .find(|(id, _)| *id == txn_id)
            .map(|(_, a)| a)
            .unwrap_or_default();

        events.post_pair(AccountType::LoanPortfolio, AccountType::FundSource, released.to_principal, date);
        events.post_pair(AccountType::InterestIncome, AccountType::FundSource, released.to_interest, date);
        events.post_pair(AccountType::FeeIncome, AccountType::FundSource, released.to_fees, date);
        events.post_pair(AccountType::PenaltyIncome, AccountType::FundSource, released.to_penalties, date);
        events.post_pair(AccountType::OverpaymentLiability, AccountType::FundSource, released.excess, date);

        self.finish_mutation(old_status, date, events);
        Ok(released)
    }

    /// flip a transaction's reversal flag and rebuild
    pub fn undo_transaction(
        &mut self,
        transaction_id: TransactionId,
        date: NaiveDate,
        events: &mut EventStore,
    ) -> Result<()> {
        if self.status.is_terminal() {
            return Err(LoanError::LoanStatusNotPermitted { status: self.status });
        }
        let index = self
            .transactions
            .iter()
            .position(|t| t.id == transaction_id)
            .ok_or(LoanError::TransactionNotFound { id: transaction_id })?;
        if self.transactions[index].kind == TransactionKind::Disbursement {
            return Err(LoanError::WrongTransactionKind {
                expected: TransactionKind::Repayment,
                found: TransactionKind::Disbursement,
            });
        }
        if self.transactions[index].reversed {
            return Err(LoanError::TransactionAlreadyReversed { id: transaction_id });
        }

        let old_status = self.status;
        self.transactions[index].reversed = true;
        if let Err(e) = self.reproject(date) {
            self.transactions[index].reversed = false;
            return Err(e);
        }

        events.emit(Event::TransactionReversed {
            loan_id: self.id,
            transaction_id,
            date,
        });
        self.finish_mutation(old_status, date, events);
        Ok(())
    }

    pub fn add_charge(
        &mut self,
        definition: ChargeDefinition,
        amount_or_percentage: Decimal,
        due_date: Option<NaiveDate>,
        target: ChargeTarget,
        date: NaiveDate,
        events: &mut EventStore,
    ) -> Result<ChargeId> {
        if self.status.is_terminal() {
            return Err(LoanError::LoanStatusNotPermitted { status: self.status });
        }
        let charge = ChargeInstance::new(definition, amount_or_percentage, due_date, target)?;
        let charge_id = charge.id;
        let old_status = self.status;
        self.charges.push(charge);

        if !self.tranches.is_empty() {
            if let Err(e) = self.reproject(date) {
                self.charges.pop();
                return Err(e);
            }
        }
        let due = self
            .charges
            .iter()
            .find(|c| c.id == charge_id)
            .map(|c| c.due)
            .unwrap_or(Money::ZERO);
        events.emit(Event::ChargeApplied {
            loan_id: self.id,
            charge_id,
            due,
            date,
        });
        self.finish_mutation(old_status, date, events);
        Ok(charge_id)
    }

    /// change an unsettled charge's amount
    pub fn update_charge(
        &mut self,
        charge_id: ChargeId,
        amount_or_percentage: Decimal,
        date: NaiveDate,
        events: &mut EventStore,
    ) -> Result<()> {
        if self.status.is_terminal() {
            return Err(LoanError::LoanStatusNotPermitted { status: self.status });
        }
        if amount_or_percentage <= Decimal::ZERO {
            return Err(LoanError::InvalidChargeAmount {
                amount: Money::from_decimal(amount_or_percentage),
            });
        }
        let charge = self
            .charges
            .iter_mut()
            .find(|c| c.id == charge_id)
            .ok_or(LoanError::ChargeNotFound { id: charge_id })?;
        if charge.paid.is_positive() || charge.waived.is_positive() {
            return Err(LoanError::InvalidConfiguration {
                message: "cannot modify a charge that is already settled".to_string(),
            });
        }
        let previous = charge.amount_or_percentage;
        charge.amount_or_percentage = amount_or_percentage;

        let old_status = self.status;
        if !self.tranches.is_empty() {
            if let Err(e) = self.reproject(date) {
                if let Some(c) = self.charges.iter_mut().find(|c| c.id == charge_id) {
                    c.amount_or_percentage = previous;
                }
                return Err(e);
            }
        }
        self.finish_mutation(old_status, date, events);
        Ok(())
    }

    pub fn delete_charge(&mut self, charge_id: ChargeId, date: NaiveDate, events: &mut EventStore) -> Result<()> {
        if self.status.is_terminal() {
            return Err(LoanError::LoanStatusNotPermitted { status: self.status });
        }
        let index = self
            .charges
            .iter()
            .position(|c| c.id == charge_id)
            .ok_or(LoanError::ChargeNotFound { id: charge_id })?;
        if self.charges[index].paid.is_positive() || self.charges[index].waived.is_positive() {
            return Err(LoanError::InvalidConfiguration {
                message: "cannot delete a charge that is already settled".to_string(),
            });
        }
        let removed = self.charges.remove(index);

        let old_status = self.status;
        if !self.tranches.is_empty() {
            if let Err(e) = self.reproject(date) {
                self.charges.insert(index, removed);
                return Err(e);
            }
        }
        self.finish_mutation(old_status, date, events);
        Ok(())
    }

    pub fn pay_charge(
        &mut self,
        charge_id: ChargeId,
        amount: Money,
        date: NaiveDate,
        events: &mut EventStore,
    ) -> Result<()> {
        self.ensure_accepts_payments(amount, date)?;
        let is_penalty = self
            .charges
            .iter()
            .find(|c| c.id == charge_id)
            .ok_or(LoanError::ChargeNotFound { id: charge_id })?
            .definition
            .is_penalty;

        let old_status = self.status;
        let seq = self.transactions.len() as u64;
        self.transactions.push(LoanTransaction::for_charge(
            TransactionKind::ChargePayment,
            date,
            seq,
            amount,
            charge_id,
        ));
        if let Err(e) = self.reproject(date) {
            self.transactions.pop();
            return Err(e);
        }

        events.emit(Event::ChargePaid {
            loan_id: self.id,
            charge_id,
            amount,
            date,
        });
        let income = if is_penalty {
            AccountType::PenaltyIncome
        } else {
            AccountType::FeeIncome
        };
        events.post_pair(AccountType::FundSource, income, amount, date);
        self.finish_mutation(old_status, date, events);
        Ok(())
    }

    /// forgive whatever is still outstanding on a charge
    pub fn waive_charge(
        &mut self,
        charge_id: ChargeId,
        date: NaiveDate,
        events: &mut EventStore,
    ) -> Result<TransactionId> {
        if self.status.is_terminal() {
            return Err(LoanError::LoanStatusNotPermitted { status: self.status });
        }
        let outstanding = self
            .charges
            .iter()
            .find(|c| c.id == charge_id)
            .ok_or(LoanError::ChargeNotFound { id: charge_id })?
            .outstanding();
        if !outstanding.is_positive() {
            return Err(LoanError::InvalidChargeAmount { amount: outstanding });
        }

        let old_status = self.status;
        let seq = self.transactions.len() as u64;
        let txn = LoanTransaction::for_charge(
            TransactionKind::Waiver,
            date,
            seq,
            outstanding,
            charge_id,
        );
        let txn_id = txn.id;
        self.transactions.push(txn);
        if let Err(e) = self.reproject(date) {
            self.transactions.pop();
            return Err(e);
        }

        events.emit(Event::ChargeWaived {
            loan_id: self.id,
            charge_id,
            amount: outstanding,
            date,
        });
        events.post_pair(AccountType::WaiveExpense, AccountType::FeeReceivable, outstanding, date);
        self.finish_mutation(old_status, date, events);
        Ok(txn_id)
    }

    /// reverse a waiver, restoring the pre-waive settlement state exactly
    pub fn undo_waive(
        &mut self,
        transaction_id: TransactionId,
        date: NaiveDate,
        events: &mut EventStore,
    ) -> Result<()> {
        let txn = self
            .transactions
            .iter()
            .find(|t| t.id == transaction_id)
            .ok_or(LoanError::TransactionNotFound { id: transaction_id })?;
        if txn.kind != TransactionKind::Waiver {
            return Err(LoanError::WrongTransactionKind {
                expected: TransactionKind::Waiver,
                found: txn.kind,
            });
        }
        let charge_id = txn.charge_id.ok_or(LoanError::ChargeNotFound {
            id: Uuid::nil(),
        })?;
        self.undo_transaction(transaction_id, date, events)?;
        events.emit(Event::WaiveReversed {
            loan_id: self.id,
            charge_id,
            transaction_id,
            date,
        });
        Ok(())
    }

    /// payoff quote as of the given date
    pub fn quote_pre_close(&self, as_of: NaiveDate) -> Result<PreCloseAmounts> {
        if !self.status.accepts_repayments() {
            return Err(LoanError::LoanStatusNotPermitted { status: self.status });
        }
        Ok(RecalculationEngine::pre_close(
            &self.terms,
            self.terms.recalculation.as_ref(),
            &self.installments,
            as_of,
        ))
    }

    /// settle the loan early: collapse future installments into a payoff
    /// installment, collect it, and freeze the loan
    pub fn foreclose(&mut self, as_of: NaiveDate, events: &mut EventStore) -> Result<PreCloseAmounts> {
        if !self.status.accepts_repayments() {
            return Err(LoanError::LoanStatusNotPermitted { status: self.status });
        }
        self.reproject(as_of)?;
        let quote = RecalculationEngine::pre_close(
            &self.terms,
            self.terms.recalculation.as_ref(),
            &self.installments,
            as_of,
        );

        self.collapse_future_installments(&quote, as_of)?;

        // charge instances settle with the installments they were spread over
        for charge in &mut self.charges {
            charge.due = charge.paid + charge.waived + charge.written_off;
        }

        let payoff = quote.total();
        if payoff.is_positive() {
            let seq = self.transactions.len() as u64;
            self.transactions.push(LoanTransaction::new(
                TransactionKind::Repayment,
                as_of,
                seq,
                payoff,
            ));
            let allocation = RepaymentAllocator::allocate(
                &mut self.installments,
                payoff,
                as_of,
                self.terms.allocation_strategy,
            )?;
            events.post_pair(AccountType::FundSource, AccountType::LoanPortfolio, allocation.to_principal, as_of);
            events.post_pair(AccountType::FundSource, AccountType::InterestIncome, allocation.to_interest, as_of);
            events.post_pair(AccountType::FundSource, AccountType::FeeIncome, allocation.to_fees, as_of);
            events.post_pair(AccountType::FundSource, AccountType::PenaltyIncome, allocation.to_penalties, as_of);
        }
        verify_schedule(&self.installments, self.total_disbursed())?;

        let old_status = self.status;
        self.status = LoanStatus::Foreclosed;
        self.arrears = ArrearsSummary::default();
        events.emit(Event::LoanForeclosed {
            loan_id: self.id,
            payoff,
            date: as_of,
        });
        events.emit(Event::StatusChanged {
            loan_id: self.id,
            old_status,
            new_status: self.status,
        });
        self.version += 1;
        Ok(quote)
    }

    /// write the remaining exposure off as a loss
    pub fn write_off(&mut self, date: NaiveDate, events: &mut EventStore) -> Result<Money> {
        if !self.status.accepts_repayments() {
            return Err(LoanError::LoanStatusNotPermitted { status: self.status });
        }
        let principal_lost: Money = self
            .installments
            .iter()
            .map(|i| i.principal.outstanding())
            .sum();
        let mut total = Money::ZERO;
        for installment in &mut self.installments {
            for component in [
                crate::types::Component::Principal,
                crate::types::Component::Interest,
                crate::types::Component::Fee,
                crate::types::Component::Penalty,
            ] {
                let c = installment.component_mut(component);
                let lost = c.outstanding();
                c.written_off += lost;
                total += lost;
            }
        }
        for charge in &mut self.charges {
            let lost = charge.outstanding();
            charge.written_off += lost;
            total += lost;
        }

        let old_status = self.status;
        self.status = LoanStatus::WrittenOff;
        self.arrears = ArrearsSummary::default();
        events.post_pair(AccountType::WaiveExpense, AccountType::LoanPortfolio, principal_lost, date);
        events.emit(Event::StatusChanged {
            loan_id: self.id,
            old_status,
            new_status: self.status,
        });
        self.version += 1;
        Ok(total)
    }

    /// interest and fees accrued but not yet posted, then move the watermark
    pub fn post_accruals(
        &mut self,
        as_of: NaiveDate,
        events: &mut EventStore,
    ) -> Result<(Money, Money)> {
        if !self.status.accepts_repayments() {
            return Ok((Money::ZERO, Money::ZERO));
        }
        let (interest_now, fees_now) = self.accrued_amounts(as_of);
        let (interest_prev, fees_prev) = match self.accrued_through {
            Some(through) => self.accrued_amounts(through),
            None => (Money::ZERO, Money::ZERO),
        };
        let interest = (interest_now - interest_prev).max(Money::ZERO);
        let fees = (fees_now - fees_prev).max(Money::ZERO);

        if interest.is_positive() || fees.is_positive() {
            let seq = self.transactions.len() as u64;
            self.transactions.push(LoanTransaction::new(
                TransactionKind::Accrual,
                as_of,
                seq,
                interest + fees,
            ));
            events.emit(Event::AccrualPosted {
                loan_id: self.id,
                interest,
                fees,
                through: as_of,
            });
            events.post_pair(AccountType::InterestReceivable, AccountType::InterestIncome, interest, as_of);
            events.post_pair(AccountType::FeeReceivable, AccountType::FeeIncome, fees, as_of);
        }
        self.accrued_through = Some(as_of);
        self.version += 1;
        Ok((interest, fees))
    }

    /// attach penalty charges to installments past their grace window
    pub fn apply_overdue_penalties(
        &mut self,
        as_of: NaiveDate,
        events: &mut EventStore,
    ) -> Result<u32> {
        if !self.status.accepts_repayments() {
            return Ok(0);
        }
        let penalty = match self
            .terms
            .recalculation
            .as_ref()
            .and_then(|r| r.overdue_penalty.clone())
        {
            Some(p) => p,
            None => return Ok(0),
        };

        let mut pending: Vec<(u32, Money)> = Vec::new();
        for installment in &self.installments {
            // the penalty first applies exactly grace_days past the due date
            let threshold = installment.due_date + chrono::Days::new(penalty.grace_days as u64);
            if threshold > as_of || installment.is_fully_paid() {
                continue;
            }
            let already_charged = self.charges.iter().any(|c| {
                c.definition.timing == ChargeTiming::OverdueFee
                    && c.target == ChargeTarget::Installment(installment.number)
            });
            if already_charged {
                continue;
            }
            let amount = match penalty.calculation {
                ChargeCalculation::Flat => Money::from_decimal(penalty.amount_or_percentage),
                _ => installment
                    .principal
                    .outstanding()
                    .percentage(penalty.amount_or_percentage),
            }
            .round_for(&self.terms.currency);
            if amount.is_positive() {
                pending.push((installment.number, amount));
            }
        }
        if pending.is_empty() {
            return Ok(0);
        }

        let old_status = self.status;
        let applied = pending.len() as u32;
        for (number, amount) in pending {
            // store the evaluated amount so replays keep it stable
            let charge = ChargeInstance::new(
                ChargeDefinition {
                    name: format!("overdue penalty (installment {number})"),
                    calculation: ChargeCalculation::Flat,
                    timing: ChargeTiming::OverdueFee,
                    is_penalty: true,
                },
                amount.as_decimal(),
                None,
                ChargeTarget::Installment(number),
            )?;
            events.emit(Event::PenaltyApplied {
                loan_id: self.id,
                charge_id: charge.id,
                installment: number,
                amount,
                date: as_of,
            });
            self.charges.push(charge);
        }
        self.reproject(as_of)?;
        self.finish_mutation(old_status, as_of, events);
        Ok(applied)
    }

    /// rebuild the derived state by replaying the transaction log
    fn reproject(&mut self, as_of: NaiveDate) -> Result<Vec<(TransactionId, PaymentAllocation)>> {
        let disbursed = self.total_disbursed();
        let mut schedule = ScheduleBuilder::build(&self.terms, &self.tranches)?;

        for charge in &mut self.charges {
            charge.reset_settled();
        }
        ChargeApportioner::apportion(&mut self.charges, &mut schedule, disbursed, &self.terms.currency)?;
        for charge in &mut self.charges {
            if charge.definition.timing == ChargeTiming::OnDisbursement {
                charge.paid = charge.due;
            }
        }

        let mut ordered: Vec<LoanTransaction> = self
            .transactions
            .iter()
            .filter(|t| !t.reversed)
            .cloned()
            .collect();
        ordered.sort_by_key(|t| (t.date, t.seq));

        let mut allocations = Vec::new();
        let mut principal_payments: Vec<(NaiveDate, Money)> = Vec::new();
        let mut overpaid = Money::ZERO;

        for txn in &ordered {
            match txn.kind {
                // tranches drive the builder; accruals never touch the schedule
                TransactionKind::Disbursement | TransactionKind::Accrual => {}
                TransactionKind::Repayment => {
                    let allocation = RepaymentAllocator::allocate(
                        &mut schedule,
                        txn.amount,
                        txn.date,
                        self.terms.allocation_strategy,
                    )?;
                    overpaid += allocation.excess;
                    principal_payments.push((txn.date, allocation.to_principal));
                    allocations.push((txn.id, allocation));
                    self.recalculate_into(&mut schedule, &principal_payments, txn.date)?;
                    ChargeApportioner::apportion(&mut self.charges, &mut schedule, disbursed, &self.terms.currency)?;
                }
                TransactionKind::Refund => {
                    let mut remaining = txn.amount;
                    let from_overpayment = remaining.min(overpaid);
                    overpaid -= from_overpayment;
                    remaining -= from_overpayment;
                    let mut released = PaymentAllocation::default();
                    if remaining.is_positive() {
                        released = RepaymentAllocator::refund(
                            &mut schedule,
                            remaining,
                            self.terms.allocation_strategy,
                        )?;
                        principal_payments.push((txn.date, -released.to_principal));
                    }
                    released.excess = from_overpayment;
                    allocations.push((txn.id, released));
                    self.recalculate_into(&mut schedule, &principal_payments, txn.date)?;
                    ChargeApportioner::apportion(&mut self.charges, &mut schedule, disbursed, &self.terms.currency)?;
                }
                TransactionKind::ChargePayment => {
                    let charge_id = txn.charge_id.ok_or(LoanError::ChargeNotFound { id: Uuid::nil() })?;
                    let charge = self
                        .charges
                        .iter_mut()
                        .find(|c| c.id == charge_id)
                        .ok_or(LoanError::ChargeNotFound { id: charge_id })?;
                    ChargeApportioner::pay(charge, &mut schedule, txn.amount)?;
                }
                TransactionKind::Waiver => {
                    let charge_id = txn.charge_id.ok_or(LoanError::ChargeNotFound { id: Uuid::nil() })?;
                    let charge = self
                        .charges
                        .iter_mut()
                        .find(|c| c.id == charge_id)
                        .ok_or(LoanError::ChargeNotFound { id: charge_id })?;
                    ChargeApportioner::waive(charge, &mut schedule);
                }
            }
        }

        self.recalculate_into(&mut schedule, &principal_payments, as_of)?;
        ChargeApportioner::apportion(&mut self.charges, &mut schedule, disbursed, &self.terms.currency)?;

        verify_schedule(&schedule, disbursed)?;
        for charge in &self.charges {
            charge.verify_consistency()?;
        }

        let original = if self.original_schedule.is_empty() {
            &schedule
        } else {
            &self.original_schedule
        };
        self.arrears =
            ArrearsTracker::evaluate(&schedule, original, self.terms.arrears_basis, as_of);
        self.installments = schedule;
        self.overpaid_amount = overpaid;
        self.refresh_status();
        Ok(allocations)
    }

    fn recalculate_into(
        &self,
        schedule: &mut Vec<Installment>,
        principal_payments: &[(NaiveDate, Money)],
        as_of: NaiveDate,
    ) -> Result<()> {
        let settings = match self.terms.recalculation.as_ref() {
            Some(s) => s,
            None => return Ok(()),
        };
        let first_due = match schedule.first() {
            Some(first) => first.due_date,
            None => return Ok(()),
        };
        let last_rest = RecalculationEngine::last_rest_date(&self.terms, settings, first_due, as_of);
        let since_rest: Money = principal_payments
            .iter()
            .filter(|(date, _)| *date > last_rest)
            .map(|(_, amount)| *amount)
            .sum();
        let original = if self.original_schedule.is_empty() {
            schedule.clone()
        } else {
            self.original_schedule.clone()
        };
        RecalculationEngine::recalculate(
            &self.terms,
            settings,
            &self.tranches,
            &original,
            schedule,
            since_rest.max(Money::ZERO),
            as_of,
        )
    }

    /// fold every installment due after `as_of` into one payoff installment
    fn collapse_future_installments(&mut self, quote: &PreCloseAmounts, as_of: NaiveDate) -> Result<()> {
        let split = self
            .installments
            .iter()
            .position(|i| i.due_date > as_of)
            .unwrap_or(self.installments.len());
        let future: Vec<Installment> = self.installments.split_off(split);
        if future.is_empty() {
            return Ok(());
        }

        let kept_interest_outstanding: Money = self
            .installments
            .iter()
            .map(|i| i.interest.outstanding())
            .sum();
        let kept_fee_outstanding: Money =
            self.installments.iter().map(|i| i.fee.outstanding()).sum();
        let kept_penalty_outstanding: Money = self
            .installments
            .iter()
            .map(|i| i.penalty.outstanding())
            .sum();

        let from_date = self
            .installments
            .last()
            .map(|i| i.due_date)
            .unwrap_or_else(|| future[0].from_date);
        let number = self.installments.len() as u32 + 1;
        let mut payoff = Installment::new(number, from_date, as_of);

        for installment in &future {
            payoff.principal.due += installment.principal.due;
            payoff.principal.paid += installment.principal.paid;
            payoff.principal.waived += installment.principal.waived;
            payoff.principal.written_off += installment.principal.written_off;

            payoff.interest.paid += installment.interest.paid;
            payoff.interest.waived += installment.interest.waived;
            payoff.interest.written_off += installment.interest.written_off;
            payoff.fee.paid += installment.fee.paid;
            payoff.fee.waived += installment.fee.waived;
            payoff.fee.written_off += installment.fee.written_off;
            payoff.penalty.paid += installment.penalty.paid;
            payoff.penalty.waived += installment.penalty.waived;
            payoff.penalty.written_off += installment.penalty.written_off;
        }
        // the quote's future portion is what remains once kept installments
        // contribute their own outstanding amounts
        payoff.interest.due = payoff.interest.paid
            + payoff.interest.waived
            + payoff.interest.written_off
            + (quote.interest - kept_interest_outstanding).max(Money::ZERO);
        payoff.fee.due = payoff.fee.paid
            + payoff.fee.waived
            + payoff.fee.written_off
            + (quote.fee - kept_fee_outstanding).max(Money::ZERO);
        payoff.penalty.due = payoff.penalty.paid
            + payoff.penalty.waived
            + payoff.penalty.written_off
            + (quote.penalty - kept_penalty_outstanding).max(Money::ZERO);

        // merge rather than append when the last kept installment matures today
        if let Some(last) = self.installments.last_mut() {
            if last.due_date == as_of {
                for component in [
                    crate::types::Component::Principal,
                    crate::types::Component::Interest,
                    crate::types::Component::Fee,
                    crate::types::Component::Penalty,
                ] {
                    let source = *payoff.component(component);
                    let dest = last.component_mut(component);
                    dest.due += source.due;
                    dest.paid += source.paid;
                    dest.waived += source.waived;
                    dest.written_off += source.written_off;
                }
                last.balance_after = Money::ZERO;
                return Ok(());
            }
        }
        self.installments.push(payoff);
        Ok(())
    }

    /// day-prorated accrual position: matured periods in full, the running
    /// period by elapsed days; fees accrue at their due date
    fn accrued_amounts(&self, as_of: NaiveDate) -> (Money, Money) {
        let mut interest = Money::ZERO;
        let mut fees = Money::ZERO;
        for installment in &self.installments {
            if installment.due_date <= as_of {
                interest += installment.interest.due;
                fees += installment.fee.due;
            } else if installment.from_date < as_of {
                let period_days = (installment.due_date - installment.from_date)
                    .num_days()
                    .max(1);
                let elapsed = (as_of - installment.from_date)
                    .num_days()
                    .clamp(0, period_days);
                let accrued = installment.interest.due * Decimal::from(elapsed)
                    / Decimal::from(period_days);
                interest += accrued.round_for(&self.terms.currency);
            }
        }
        (interest, fees)
    }

    fn ensure_accepts_payments(&self, amount: Money, date: NaiveDate) -> Result<()> {
        if !self.status.accepts_repayments() {
            return Err(LoanError::LoanStatusNotPermitted { status: self.status });
        }
        if !amount.is_positive() {
            return Err(LoanError::InvalidPaymentAmount { amount });
        }
        match self.first_disbursement_date() {
            Some(disbursed_on) if date < disbursed_on => {
                Err(LoanError::TransactionBeforeDisbursement { date, disbursed_on })
            }
            Some(_) => Ok(()),
            None => Err(LoanError::LoanStatusNotPermitted { status: self.status }),
        }
    }

    fn refresh_status(&mut self) {
        if !matches!(self.status, LoanStatus::Active | LoanStatus::Overpaid) {
            return;
        }
        if self.overpaid_amount.is_positive() {
            self.status = LoanStatus::Overpaid;
        } else if self.total_outstanding().is_zero()
            && self.total_disbursed() == self.terms.approved_principal
        {
            self.status = LoanStatus::Closed;
        } else {
            self.status = LoanStatus::Active;
        }
    }

    fn finish_mutation(&mut self, old_status: LoanStatus, date: NaiveDate, events: &mut EventStore) {
        if old_status != self.status {
            events.emit(Event::StatusChanged {
                loan_id: self.id,
                old_status,
                new_status: self.status,
            });
            match self.status {
                LoanStatus::Closed => events.emit(Event::LoanClosed {
                    loan_id: self.id,
                    date,
                }),
                LoanStatus::Overpaid => events.emit(Event::LoanOverpaid {
                    loan_id: self.id,
                    credit: self.overpaid_amount,
                    date,
                }),
                _ => {}
            }
        }
        self.version += 1;
    }
}
