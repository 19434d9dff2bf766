//! # Ledger Rows
//!
//! The four persisted entities plus the explicit status state machines.
//!
//! ## Transition Tables
//!
//! ```text
//! ActivationPayment:  SUBMITTED ──approve──▶ APPROVED
//!                         │
//!                         └────reject────▶ REJECTED
//!
//! WithdrawRequest:    PROCESSING ─approve──▶ APPROVED
//!                         │
//!                         └────reject────▶ REJECTED
//! ```
//!
//! Any other transition is refused. Terminal states never change again.

use serde::{Deserialize, Serialize};

use crate::error::{LedgerError, LedgerResult};
use crate::types::{AccountId, AccountStatus, PaymentId, Plan, RequestId};

// ════════════════════════════════════════════════════════════════════════════
// RESOLUTION STATE MACHINES
// ════════════════════════════════════════════════════════════════════════════

/// Admin decision applied to a pending entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Resolution {
    Approve,
    Reject,
}

/// Returned when a transition is not in the table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransitionRefused;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum PaymentStatus {
    Submitted,
    Approved,
    Rejected,
}

impl PaymentStatus {
    pub fn resolve(self, resolution: Resolution) -> Result<PaymentStatus, TransitionRefused> {
        match (self, resolution) {
            (PaymentStatus::Submitted, Resolution::Approve) => Ok(PaymentStatus::Approved),
            (PaymentStatus::Submitted, Resolution::Reject) => Ok(PaymentStatus::Rejected),
            (PaymentStatus::Approved, _) | (PaymentStatus::Rejected, _) => Err(TransitionRefused),
        }
    }

    #[inline]
    pub fn is_terminal(self) -> bool {
        self != PaymentStatus::Submitted
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum WithdrawStatus {
    Processing,
    Approved,
    Rejected,
}

impl WithdrawStatus {
    pub fn resolve(self, resolution: Resolution) -> Result<WithdrawStatus, TransitionRefused> {
        match (self, resolution) {
            (WithdrawStatus::Processing, Resolution::Approve) => Ok(WithdrawStatus::Approved),
            (WithdrawStatus::Processing, Resolution::Reject) => Ok(WithdrawStatus::Rejected),
            (WithdrawStatus::Approved, _) | (WithdrawStatus::Rejected, _) => Err(TransitionRefused),
        }
    }

    #[inline]
    pub fn is_terminal(self) -> bool {
        self != WithdrawStatus::Processing
    }
}

// ════════════════════════════════════════════════════════════════════════════
// ACCOUNT
// ════════════════════════════════════════════════════════════════════════════

/// A user's financial and progress record.
///
/// Balances are whole currency units. They are unsigned and every mutation
/// goes through a checked helper, so a negative balance cannot be stored.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct Account {
    pub id: AccountId,
    pub current_plan: Plan,
    pub status: AccountStatus,
    /// Global withdrawal eligibility. Set once, by the final-stage approval.
    pub is_activated: bool,
    pub available_balance: u64,
    /// Earnings waiting for activation.
    pub locked_balance: u64,
    /// Lifetime earnings.
    pub total_earned: u64,
    pub created_at: u64,
    pub updated_at: u64,
}

impl Account {
    /// Fresh registration: REGULAR, ACTIVE, not activated, zero balances.
    pub fn new(id: AccountId, now: u64) -> Self {
        Self {
            id,
            current_plan: Plan::Regular,
            status: AccountStatus::Active,
            is_activated: false,
            available_balance: 0,
            locked_balance: 0,
            total_earned: 0,
            created_at: now,
            updated_at: now,
        }
    }

    /// Credits a plan payout. Lands in the locked balance until the account
    /// is activated, then directly in the available balance.
    pub fn credit_earnings(&mut self, amount: u64) -> LedgerResult<()> {
        self.total_earned = self
            .total_earned
            .checked_add(amount)
            .ok_or_else(|| LedgerError::overflow("total_earned"))?;
        if self.is_activated {
            self.credit_available(amount)
        } else {
            self.locked_balance = self
                .locked_balance
                .checked_add(amount)
                .ok_or_else(|| LedgerError::overflow("locked_balance"))?;
            Ok(())
        }
    }

    pub fn credit_available(&mut self, amount: u64) -> LedgerResult<()> {
        self.available_balance = self
            .available_balance
            .checked_add(amount)
            .ok_or_else(|| LedgerError::overflow("available_balance"))?;
        Ok(())
    }

    /// Debits the available balance, refusing to go below zero.
    pub fn debit_available(&mut self, amount: u64) -> LedgerResult<()> {
        self.available_balance = self.available_balance.checked_sub(amount).ok_or(
            LedgerError::InsufficientBalance {
                available: self.available_balance,
                requested: amount,
            },
        )?;
        Ok(())
    }

    /// Final activation: eligible, locked funds released.
    ///
    /// PENDING returns to ACTIVE. An admin suspension is left in place.
    pub fn activate(&mut self) -> LedgerResult<()> {
        let released = self.locked_balance;
        self.credit_available(released)?;
        self.locked_balance = 0;
        self.is_activated = true;
        if self.status != AccountStatus::Suspended {
            self.status = AccountStatus::Active;
        }
        Ok(())
    }
}

// ════════════════════════════════════════════════════════════════════════════
// PLAN PROGRESS
// ════════════════════════════════════════════════════════════════════════════

/// Survey progress for one (account, plan).
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct PlanProgress {
    pub account_id: AccountId,
    pub plan: Plan,
    pub surveys_completed: u32,
    pub completed: bool,
    /// Set by admin approval of this plan's payment; requires `completed`.
    pub activated: bool,
    pub updated_at: u64,
}

impl PlanProgress {
    pub fn new(account_id: AccountId, plan: Plan, now: u64) -> Self {
        Self {
            account_id,
            plan,
            surveys_completed: 0,
            completed: false,
            activated: false,
            updated_at: now,
        }
    }

    /// Records one survey. Returns `true` if this call completed the plan.
    ///
    /// No-op once completed. A row already at or past `total` (the
    /// configured count was lowered) completes without counting again.
    pub fn record_survey(&mut self, total: u32, now: u64) -> bool {
        if self.completed {
            return false;
        }
        if self.surveys_completed < total {
            self.surveys_completed += 1;
        }
        self.updated_at = now;
        if self.surveys_completed >= total {
            self.completed = true;
            return true;
        }
        false
    }

    /// Completed with the full survey count, i.e. eligible for approval.
    pub fn is_fully_completed(&self, total: u32) -> bool {
        self.completed && self.surveys_completed >= total
    }
}

// ════════════════════════════════════════════════════════════════════════════
// ACTIVATION PAYMENT
// ════════════════════════════════════════════════════════════════════════════

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct ActivationPayment {
    pub id: PaymentId,
    pub account_id: AccountId,
    pub plan: Plan,
    /// Free-text external reference, e.g. a mobile-money confirmation code.
    pub reference: String,
    pub amount: u64,
    pub status: PaymentStatus,
    pub created_at: u64,
    pub updated_at: u64,
    pub admin_note: Option<String>,
    pub resolved_by: Option<AccountId>,
}

/// Insert payload; the store assigns the id.
#[derive(Clone, Debug)]
pub struct NewActivationPayment {
    pub account_id: AccountId,
    pub plan: Plan,
    pub reference: String,
    pub amount: u64,
    pub created_at: u64,
}

impl ActivationPayment {
    /// Applies an admin decision. Anything outside the table is `AlreadyProcessed`.
    pub fn resolve(
        &mut self,
        resolution: Resolution,
        admin: AccountId,
        note: Option<String>,
        now: u64,
    ) -> LedgerResult<()> {
        self.status = self
            .status
            .resolve(resolution)
            .map_err(|_| LedgerError::already_processed("activation payment", self.id.0))?;
        self.resolved_by = Some(admin);
        self.admin_note = note;
        self.updated_at = now;
        Ok(())
    }
}

// ════════════════════════════════════════════════════════════════════════════
// WITHDRAW REQUEST
// ════════════════════════════════════════════════════════════════════════════

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct WithdrawRequest {
    pub id: RequestId,
    pub account_id: AccountId,
    pub destination: String,
    pub gross_amount: u64,
    pub fee: u64,
    pub net_amount: u64,
    /// Plan whose fee tier was applied at request time.
    pub fee_plan: Plan,
    pub status: WithdrawStatus,
    pub created_at: u64,
    pub resolved_at: Option<u64>,
    pub resolved_by: Option<AccountId>,
}

#[derive(Clone, Debug)]
pub struct NewWithdrawRequest {
    pub account_id: AccountId,
    pub destination: String,
    pub gross_amount: u64,
    pub fee: u64,
    pub fee_plan: Plan,
    pub created_at: u64,
}

impl WithdrawRequest {
    pub fn resolve(&mut self, resolution: Resolution, admin: AccountId, now: u64) -> LedgerResult<()> {
        self.status = self
            .status
            .resolve(resolution)
            .map_err(|_| LedgerError::already_processed("withdrawal request", self.id.0))?;
        self.resolved_by = Some(admin);
        self.resolved_at = Some(now);
        Ok(())
    }
}

// ════════════════════════════════════════════════════════════════════════════
// TESTS
// ════════════════════════════════════════════════════════════════════════════

#[cfg(test)]
mod tests {
    use super::*;

    const TS: u64 = 1_700_000_000;

    #[test]
    fn test_payment_transition_table() {
        assert_eq!(
            PaymentStatus::Submitted.resolve(Resolution::Approve),
            Ok(PaymentStatus::Approved)
        );
        assert_eq!(
            PaymentStatus::Submitted.resolve(Resolution::Reject),
            Ok(PaymentStatus::Rejected)
        );
        for terminal in [PaymentStatus::Approved, PaymentStatus::Rejected] {
            assert!(terminal.is_terminal());
            assert_eq!(terminal.resolve(Resolution::Approve), Err(TransitionRefused));
            assert_eq!(terminal.resolve(Resolution::Reject), Err(TransitionRefused));
        }
    }

    #[test]
    fn test_withdraw_transition_table() {
        assert_eq!(
            WithdrawStatus::Processing.resolve(Resolution::Reject),
            Ok(WithdrawStatus::Rejected)
        );
        assert_eq!(
            WithdrawStatus::Approved.resolve(Resolution::Reject),
            Err(TransitionRefused)
        );
        assert!(!WithdrawStatus::Processing.is_terminal());
    }

    #[test]
    fn test_record_survey_completes_exactly_once() {
        let mut p = PlanProgress::new(AccountId(1), Plan::Regular, TS);
        for _ in 0..9 {
            assert!(!p.record_survey(10, TS));
        }
        assert_eq!(p.surveys_completed, 9);
        assert!(p.record_survey(10, TS + 1));
        assert!(p.completed);
        assert_eq!(p.surveys_completed, 10);

        // saturated
        assert!(!p.record_survey(10, TS + 2));
        assert_eq!(p.surveys_completed, 10);
        assert_eq!(p.updated_at, TS + 1);
    }

    #[test]
    fn test_lowered_total_completes_existing_row() {
        let mut p = PlanProgress::new(AccountId(1), Plan::Regular, TS);
        p.surveys_completed = 10;
        assert!(p.record_survey(8, TS + 1));
        assert!(p.completed);
        assert_eq!(p.surveys_completed, 10);
        assert!(p.is_fully_completed(8));
        assert!(!p.record_survey(8, TS + 2));
        assert_eq!(p.updated_at, TS + 1);
    }

    #[test]
    fn test_activate_keeps_suspension() {
        let mut acct = Account::new(AccountId(7), TS);
        acct.credit_earnings(6000).unwrap();
        acct.status = AccountStatus::Suspended;
        acct.activate().unwrap();
        assert!(acct.is_activated);
        assert_eq!(acct.available_balance, 6000);
        assert_eq!(acct.status, AccountStatus::Suspended);

        let mut pending = Account::new(AccountId(8), TS);
        pending.status = AccountStatus::Pending;
        pending.activate().unwrap();
        assert_eq!(pending.status, AccountStatus::Active);
    }

    #[test]
    fn test_credit_goes_to_locked_until_activation() {
        let mut acct = Account::new(AccountId(7), TS);
        acct.credit_earnings(1500).unwrap();
        assert_eq!(acct.locked_balance, 1500);
        assert_eq!(acct.available_balance, 0);
        assert_eq!(acct.total_earned, 1500);

        acct.activate().unwrap();
        assert!(acct.is_activated);
        assert_eq!(acct.locked_balance, 0);
        assert_eq!(acct.available_balance, 1500);

        acct.credit_earnings(500).unwrap();
        assert_eq!(acct.available_balance, 2000);
        assert_eq!(acct.total_earned, 2000);
    }

    #[test]
    fn test_debit_never_goes_negative() {
        let mut acct = Account::new(AccountId(7), TS);
        acct.available_balance = 300;
        let err = acct.debit_available(301).unwrap_err();
        assert!(matches!(
            err,
            LedgerError::InsufficientBalance { available: 300, requested: 301 }
        ));
        assert_eq!(acct.available_balance, 300);
        acct.debit_available(300).unwrap();
        assert_eq!(acct.available_balance, 0);
    }

    #[test]
    fn test_payment_resolve_twice_is_already_processed() {
        let mut p = ActivationPayment {
            id: PaymentId(5),
            account_id: AccountId(1),
            plan: Plan::Vip,
            reference: "QWE123".into(),
            amount: 500,
            status: PaymentStatus::Submitted,
            created_at: TS,
            updated_at: TS,
            admin_note: None,
            resolved_by: None,
        };
        p.resolve(Resolution::Reject, AccountId(99), Some("bad code".into()), TS + 5)
            .unwrap();
        assert_eq!(p.status, PaymentStatus::Rejected);
        assert_eq!(p.resolved_by, Some(AccountId(99)));

        let err = p
            .resolve(Resolution::Approve, AccountId(99), None, TS + 6)
            .unwrap_err();
        assert!(matches!(err, LedgerError::AlreadyProcessed { id: 5, .. }));
        assert_eq!(p.status, PaymentStatus::Rejected);
        assert_eq!(p.admin_note.as_deref(), Some("bad code"));
    }
}
