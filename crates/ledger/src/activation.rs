//! # Activation Workflow
//!
//! Users submit an activation payment for their current plan once its
//! surveys are done. Submitting advances the ladder right away; an admin
//! later approves or rejects the payment.
//!
//! ## Effects
//!
//! | Step | Plan has a next | Terminal plan (VVIP) |
//! |------|-----------------|----------------------|
//! | submit | current plan advances, next progress row ensured | status PENDING |
//! | approve | plan flagged activated | plus account activated, locked funds released |
//! | reject | payment REJECTED | plus PENDING back to ACTIVE |
//!
//! Resolution locks the owning account before re-reading the payment, so
//! two admins resolving the same payment cannot both succeed.

use serde::Serialize;
use tracing::info;

use crate::admin::{ensure_not_self, ensure_not_suspended, require_admin, RouteClass};
use crate::error::{LedgerError, LedgerResult};
use crate::model::{ActivationPayment, NewActivationPayment, PaymentStatus, PlanProgress, Resolution};
use crate::store::UnitOfWork;
use crate::types::{AccountId, AccountStatus, PaymentId, Plan, Principal};
use crate::Ledger;

const MAX_REFERENCE_LEN: usize = 64;
const MAX_NOTE_LEN: usize = 500;

/// Returned to the user after a successful submission.
#[derive(Clone, Debug, Serialize, PartialEq, Eq)]
pub struct PaymentReceipt {
    pub payment: ActivationPayment,
    pub current_plan: Plan,
    pub account_status: AccountStatus,
}

fn normalize_reference(raw: &str) -> LedgerResult<String> {
    let reference = raw.trim();
    if reference.is_empty() {
        return Err(LedgerError::Validation("payment reference is required".into()));
    }
    if reference.chars().count() > MAX_REFERENCE_LEN {
        return Err(LedgerError::Validation(format!(
            "payment reference exceeds {} characters",
            MAX_REFERENCE_LEN
        )));
    }
    Ok(reference.to_string())
}

fn normalize_note(note: Option<String>) -> LedgerResult<Option<String>> {
    let Some(note) = note else {
        return Ok(None);
    };
    let note = note.trim();
    if note.is_empty() {
        return Ok(None);
    }
    if note.chars().count() > MAX_NOTE_LEN {
        return Err(LedgerError::Validation(format!(
            "admin note exceeds {} characters",
            MAX_NOTE_LEN
        )));
    }
    Ok(Some(note.to_string()))
}

/// Progress row that must be complete for `plan` to be activated.
fn require_completed(
    uow: &mut UnitOfWork<'_>,
    account: AccountId,
    plan: Plan,
    total: u32,
) -> LedgerResult<PlanProgress> {
    let progress = uow.lock_plan_progress(account, plan)?;
    let completed = progress.as_ref().map_or(0, |p| p.surveys_completed);
    match progress {
        Some(p) if p.is_fully_completed(total) => {
            if p.activated {
                Err(LedgerError::PlanAlreadyActivated(plan))
            } else {
                Ok(p)
            }
        }
        _ => Err(LedgerError::SurveysIncomplete {
            plan,
            completed,
            required: total,
        }),
    }
}

impl Ledger {
    /// Submit the activation payment for the caller's current plan.
    pub fn submit_payment(
        &self,
        principal: &Principal,
        reference: &str,
        now: u64,
    ) -> LedgerResult<PaymentReceipt> {
        let reference = normalize_reference(reference)?;
        let id = principal.account_id;
        let total = self.config.surveys_per_plan;

        let receipt = self.store.transaction(|uow| {
            let mut account = uow.lock_account(id)?;
            ensure_not_suspended(principal, &account, RouteClass::ActivationSubmit)?;

            let plan = account.current_plan;
            require_completed(uow, id, plan, total)?;

            let pending = uow
                .account_payments(id)?
                .into_iter()
                .any(|p| p.plan == plan && p.status == PaymentStatus::Submitted);
            if pending {
                return Err(LedgerError::PaymentPending(plan));
            }

            let payment = uow.insert_activation_payment(NewActivationPayment {
                account_id: id,
                plan,
                reference,
                amount: self.config.plans.terms(plan).activation_fee,
                created_at: now,
            })?;

            match plan.next() {
                Some(next) => {
                    account.current_plan = next;
                    uow.ensure_plan_progress(id, next, now)?;
                }
                None => {
                    if account.status == AccountStatus::Active {
                        account.status = AccountStatus::Pending;
                    }
                }
            }
            account.updated_at = now;
            uow.update_account(&account)?;

            Ok(PaymentReceipt {
                payment,
                current_plan: account.current_plan,
                account_status: account.status,
            })
        })?;

        info!(
            account = %id,
            payment = %receipt.payment.id,
            plan = %receipt.payment.plan,
            amount = receipt.payment.amount,
            "activation payment submitted"
        );
        Ok(receipt)
    }

    /// Approve a submitted payment and activate its plan.
    ///
    /// The plan must be fully completed and not yet activated. Approving
    /// the terminal plan activates the account and releases locked funds.
    pub fn approve_payment(
        &self,
        admin: &Principal,
        payment_id: PaymentId,
        note: Option<String>,
        now: u64,
    ) -> LedgerResult<ActivationPayment> {
        require_admin(admin)?;
        let note = normalize_note(note)?;
        let total = self.config.surveys_per_plan;

        let payment = self.store.transaction(|uow| {
            let owner = uow
                .peek_activation_payment(payment_id)?
                .ok_or_else(|| LedgerError::not_found("activation payment", payment_id.0))?
                .account_id;
            ensure_not_self(admin, owner, "resolve payments")?;

            let mut account = uow.lock_account(owner)?;
            let mut payment = uow.lock_activation_payment(payment_id)?;
            payment.resolve(Resolution::Approve, admin.account_id, note, now)?;

            let mut progress = require_completed(uow, owner, payment.plan, total)?;
            progress.activated = true;
            progress.updated_at = now;
            uow.put_plan_progress(&progress)?;

            if payment.plan.is_terminal() {
                account.activate()?;
                account.updated_at = now;
                uow.update_account(&account)?;
            }
            uow.put_activation_payment(&payment)?;
            Ok(payment)
        })?;

        info!(
            admin = %admin.account_id,
            account = %payment.account_id,
            payment = %payment.id,
            plan = %payment.plan,
            "activation payment approved"
        );
        if payment.plan.is_terminal() {
            info!(account = %payment.account_id, "account activated");
        }
        Ok(payment)
    }

    /// Reject a submitted payment. No balance effect.
    pub fn reject_payment(
        &self,
        admin: &Principal,
        payment_id: PaymentId,
        note: Option<String>,
        now: u64,
    ) -> LedgerResult<ActivationPayment> {
        require_admin(admin)?;
        let note = normalize_note(note)?;

        let payment = self.store.transaction(|uow| {
            let owner = uow
                .peek_activation_payment(payment_id)?
                .ok_or_else(|| LedgerError::not_found("activation payment", payment_id.0))?
                .account_id;
            ensure_not_self(admin, owner, "resolve payments")?;

            let mut account = uow.lock_account(owner)?;
            let mut payment = uow.lock_activation_payment(payment_id)?;
            payment.resolve(Resolution::Reject, admin.account_id, note, now)?;

            if payment.plan.is_terminal() && account.status == AccountStatus::Pending {
                account.status = AccountStatus::Active;
                account.updated_at = now;
                uow.update_account(&account)?;
            }
            uow.put_activation_payment(&payment)?;
            Ok(payment)
        })?;

        info!(
            admin = %admin.account_id,
            account = %payment.account_id,
            payment = %payment.id,
            plan = %payment.plan,
            "activation payment rejected"
        );
        Ok(payment)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reference_is_trimmed_and_bounded() {
        assert_eq!(normalize_reference("  QWE123XYZ ").unwrap(), "QWE123XYZ");
        assert!(matches!(normalize_reference("   "), Err(LedgerError::Validation(_))));
        let long = "A".repeat(MAX_REFERENCE_LEN + 1);
        assert!(normalize_reference(&long).is_err());
        assert!(normalize_reference(&long[..MAX_REFERENCE_LEN]).is_ok());
    }

    #[test]
    fn test_blank_note_becomes_none() {
        assert_eq!(normalize_note(None).unwrap(), None);
        assert_eq!(normalize_note(Some("  ".into())).unwrap(), None);
        assert_eq!(
            normalize_note(Some(" code checked ".into())).unwrap().as_deref(),
            Some("code checked")
        );
    }
}
