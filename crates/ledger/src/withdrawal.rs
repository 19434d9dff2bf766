//! # Withdrawal Workflow
//!
//! ```text
//! request ──▶ PROCESSING ──approve──▶ APPROVED   (funds already debited)
//!                  │
//!                  └───────reject───▶ REJECTED   (gross refunded)
//! ```
//!
//! ## Request Checks
//!
//! Input validation runs before the transaction. Under the account lock the
//! checks run in a fixed order and the first failure wins:
//!
//! 1. suspension gate
//! 2. account ACTIVE and activated
//! 3. every plan on the ladder completed
//! 4. gross amount above the current plan's flat fee
//! 5. available balance covers the gross amount
//! 6. no other request PROCESSING
//! 7. daily request cap (UTC day of `now`)
//!
//! The gross amount leaves the available balance when the request is
//! created, so an approval moves no money.

use tracing::info;

use crate::admin::{ensure_not_self, ensure_not_suspended, require_admin, RouteClass};
use crate::config::WithdrawPolicy;
use crate::error::{LedgerError, LedgerResult};
use crate::model::{NewWithdrawRequest, Resolution, WithdrawRequest, WithdrawStatus};
use crate::types::{utc_day, AccountStatus, Plan, Principal, RequestId};
use crate::Ledger;

const MAX_DESTINATION_LEN: usize = 64;

/// Validate a requested amount against the policy bounds.
fn validate_amount(amount: f64, policy: &WithdrawPolicy) -> LedgerResult<u64> {
    if !amount.is_finite() {
        return Err(LedgerError::Validation("amount must be a finite number".into()));
    }
    if amount.fract() != 0.0 {
        return Err(LedgerError::Validation("amount must be a whole number".into()));
    }
    if amount < policy.min_amount as f64 || amount > policy.max_amount as f64 {
        return Err(LedgerError::Validation(format!(
            "amount must be between {} and {}",
            policy.min_amount, policy.max_amount
        )));
    }
    Ok(amount as u64)
}

fn validate_destination(raw: &str) -> LedgerResult<String> {
    let destination = raw.trim();
    if destination.is_empty() {
        return Err(LedgerError::Validation("destination is required".into()));
    }
    if destination.chars().count() > MAX_DESTINATION_LEN {
        return Err(LedgerError::Validation(format!(
            "destination exceeds {} characters",
            MAX_DESTINATION_LEN
        )));
    }
    Ok(destination.to_string())
}

impl Ledger {
    /// Open a withdrawal request and debit the gross amount.
    pub fn request_withdraw(
        &self,
        principal: &Principal,
        destination: &str,
        amount: f64,
        now: u64,
    ) -> LedgerResult<WithdrawRequest> {
        let policy = &self.config.withdraw;
        let gross = validate_amount(amount, policy)?;
        let destination = validate_destination(destination)?;
        let id = principal.account_id;

        let request = self.store.transaction(|uow| {
            let mut account = uow.lock_account(id)?;

            ensure_not_suspended(principal, &account, RouteClass::General)?;

            if account.status != AccountStatus::Active || !account.is_activated {
                return Err(LedgerError::AccountNotActive);
            }

            let mut missing = Vec::new();
            for plan in Plan::LADDER {
                let done = uow
                    .lock_plan_progress(id, plan)?
                    .map_or(false, |p| p.completed);
                if !done {
                    missing.push(plan);
                }
            }
            if !missing.is_empty() {
                return Err(LedgerError::PlansIncomplete { missing });
            }

            let fee_plan = account.current_plan;
            let fee = self.config.plans.terms(fee_plan).withdraw_fee;
            if gross <= fee {
                return Err(LedgerError::AmountTooLowAfterFee { amount: gross, fee });
            }

            if account.available_balance < gross {
                return Err(LedgerError::InsufficientBalance {
                    available: account.available_balance,
                    requested: gross,
                });
            }

            let existing = uow.account_withdrawals(id)?;
            if existing.iter().any(|r| r.status == WithdrawStatus::Processing) {
                return Err(LedgerError::RequestInFlight);
            }

            let today = utc_day(now);
            let created_today = existing
                .iter()
                .filter(|r| utc_day(r.created_at) == today)
                .count();
            if created_today >= policy.daily_limit as usize {
                return Err(LedgerError::DailyLimitReached {
                    limit: policy.daily_limit,
                });
            }

            let request = uow.insert_withdraw_request(NewWithdrawRequest {
                account_id: id,
                destination,
                gross_amount: gross,
                fee,
                fee_plan,
                created_at: now,
            })?;
            account.debit_available(gross)?;
            account.updated_at = now;
            uow.update_account(&account)?;
            Ok(request)
        })?;

        info!(
            account = %id,
            request = %request.id,
            gross = request.gross_amount,
            fee = request.fee,
            net = request.net_amount,
            "withdrawal requested"
        );
        Ok(request)
    }

    /// Mark a processing request as paid out.
    pub fn approve_withdraw(
        &self,
        admin: &Principal,
        request_id: RequestId,
        now: u64,
    ) -> LedgerResult<WithdrawRequest> {
        self.resolve_withdraw(admin, request_id, Resolution::Approve, now)
    }

    /// Reject a processing request and refund its gross amount.
    pub fn reject_withdraw(
        &self,
        admin: &Principal,
        request_id: RequestId,
        now: u64,
    ) -> LedgerResult<WithdrawRequest> {
        self.resolve_withdraw(admin, request_id, Resolution::Reject, now)
    }

    fn resolve_withdraw(
        &self,
        admin: &Principal,
        request_id: RequestId,
        resolution: Resolution,
        now: u64,
    ) -> LedgerResult<WithdrawRequest> {
        require_admin(admin)?;

        let request = self.store.transaction(|uow| {
            let owner = uow
                .peek_withdraw_request(request_id)?
                .ok_or_else(|| LedgerError::not_found("withdrawal request", request_id.0))?
                .account_id;
            ensure_not_self(admin, owner, "resolve withdrawals")?;

            let mut account = uow.lock_account(owner)?;
            let mut request = uow.lock_withdraw_request(request_id)?;
            request.resolve(resolution, admin.account_id, now)?;

            if resolution == Resolution::Reject {
                account.credit_available(request.gross_amount)?;
                account.updated_at = now;
                uow.update_account(&account)?;
            }
            uow.put_withdraw_request(&request)?;
            Ok(request)
        })?;

        info!(
            admin = %admin.account_id,
            account = %request.account_id,
            request = %request.id,
            status = ?request.status,
            gross = request.gross_amount,
            "withdrawal resolved"
        );
        Ok(request)
    }

    /// The caller's own requests, newest first.
    pub fn withdraw_history(&self, principal: &Principal) -> LedgerResult<Vec<WithdrawRequest>> {
        let id = principal.account_id;
        let account = self
            .store
            .get_account(id)?
            .ok_or_else(|| LedgerError::not_found("account", id.0))?;
        ensure_not_suspended(principal, &account, RouteClass::General)?;

        let mut rows = self.store.list_account_withdrawals(id)?;
        rows.reverse();
        Ok(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_amount_validation() {
        let policy = WithdrawPolicy::default();
        assert_eq!(validate_amount(200.0, &policy).unwrap(), 200);
        assert_eq!(validate_amount(500_000.0, &policy).unwrap(), 500_000);
        for bad in [100.0, 199.0, 500_001.0, 250.5, f64::NAN, f64::INFINITY, -300.0] {
            assert!(
                matches!(validate_amount(bad, &policy), Err(LedgerError::Validation(_))),
                "amount {} should be rejected",
                bad
            );
        }
    }

    #[test]
    fn test_destination_validation() {
        assert_eq!(validate_destination(" 0712345678 ").unwrap(), "0712345678");
        assert!(validate_destination("").is_err());
        assert!(validate_destination(&"9".repeat(MAX_DESTINATION_LEN + 1)).is_err());
    }
}
