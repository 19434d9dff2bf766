//! # Admin Approval Gateway
//!
//! Access gates shared by every workflow, plus the admin-only account
//! operations.
//!
//! ## Gates
//!
//! | Gate | Applies to | Failure |
//! |------|-----------|---------|
//! | role | approve/reject, status, balance, listings | `Forbidden` |
//! | suspension | every user operation except activation submit | `AccountSuspended` |
//! | self-modification | admin acting on their own account or rows | `Forbidden` |
//!
//! Admin principals bypass the suspension gate. The gates never touch the
//! store; callers evaluate them against rows they already hold locked.

use tracing::info;

use crate::error::{LedgerError, LedgerResult};
use crate::model::{Account, ActivationPayment, PaymentStatus, WithdrawRequest, WithdrawStatus};
use crate::types::{AccountId, AccountStatus, Principal};
use crate::Ledger;

/// Which suspension rule a user route follows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteClass {
    General,
    /// Activation payment submission stays reachable while suspended.
    ActivationSubmit,
}

pub(crate) fn require_admin(principal: &Principal) -> LedgerResult<()> {
    if principal.is_admin() {
        Ok(())
    } else {
        Err(LedgerError::Forbidden("admin role required".into()))
    }
}

pub(crate) fn ensure_not_suspended(
    principal: &Principal,
    account: &Account,
    route: RouteClass,
) -> LedgerResult<()> {
    if principal.is_admin() || route == RouteClass::ActivationSubmit {
        return Ok(());
    }
    if account.status == AccountStatus::Suspended {
        return Err(LedgerError::AccountSuspended);
    }
    Ok(())
}

pub(crate) fn ensure_not_self(admin: &Principal, target: AccountId, action: &str) -> LedgerResult<()> {
    if admin.account_id == target {
        return Err(LedgerError::Forbidden(format!("admins cannot {} on their own account", action)));
    }
    Ok(())
}

impl Ledger {
    /// Suspend or reactivate an account. PENDING is set only by the
    /// activation workflow.
    pub fn set_account_status(
        &self,
        admin: &Principal,
        target: AccountId,
        status: AccountStatus,
        now: u64,
    ) -> LedgerResult<Account> {
        require_admin(admin)?;
        if status == AccountStatus::Pending {
            return Err(LedgerError::Validation(
                "status PENDING cannot be assigned manually".into(),
            ));
        }
        ensure_not_self(admin, target, "change status")?;

        let account = self.store.transaction(|uow| {
            let mut account = uow.lock_account(target)?;
            account.status = status;
            account.updated_at = now;
            uow.update_account(&account)?;
            Ok(account)
        })?;

        info!(admin = %admin.account_id, account = %target, status = %status, "account status changed");
        Ok(account)
    }

    /// Signed adjustment of the available balance.
    pub fn adjust_balance(
        &self,
        admin: &Principal,
        target: AccountId,
        delta: i64,
        now: u64,
    ) -> LedgerResult<Account> {
        require_admin(admin)?;
        if delta == 0 {
            return Err(LedgerError::Validation("delta must be non-zero".into()));
        }
        ensure_not_self(admin, target, "adjust balance")?;

        let account = self.store.transaction(|uow| {
            let mut account = uow.lock_account(target)?;
            let magnitude = delta.unsigned_abs();
            if delta > 0 {
                account.credit_available(magnitude)?;
            } else {
                account.debit_available(magnitude)?;
            }
            account.updated_at = now;
            uow.update_account(&account)?;
            Ok(account)
        })?;

        info!(
            admin = %admin.account_id,
            account = %target,
            delta,
            available = account.available_balance,
            "balance adjusted"
        );
        Ok(account)
    }

    pub fn list_activation_payments(
        &self,
        admin: &Principal,
        status: Option<PaymentStatus>,
    ) -> LedgerResult<Vec<ActivationPayment>> {
        require_admin(admin)?;
        self.store.list_activation_payments(status)
    }

    pub fn list_withdraw_requests(
        &self,
        admin: &Principal,
        status: Option<WithdrawStatus>,
    ) -> LedgerResult<Vec<WithdrawRequest>> {
        require_admin(admin)?;
        self.store.list_withdraw_requests(status)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Role;

    const TS: u64 = 1_700_000_000;

    #[test]
    fn test_suspension_gate() {
        let mut acct = Account::new(AccountId(1), TS);
        acct.status = AccountStatus::Suspended;
        let user = Principal::new(AccountId(1), Role::User);
        let admin = Principal::new(AccountId(1), Role::Admin);

        assert!(matches!(
            ensure_not_suspended(&user, &acct, RouteClass::General),
            Err(LedgerError::AccountSuspended)
        ));
        assert!(ensure_not_suspended(&user, &acct, RouteClass::ActivationSubmit).is_ok());
        assert!(ensure_not_suspended(&admin, &acct, RouteClass::General).is_ok());

        acct.status = AccountStatus::Pending;
        assert!(ensure_not_suspended(&user, &acct, RouteClass::General).is_ok());
    }

    #[test]
    fn test_role_and_self_guards() {
        let user = Principal::new(AccountId(3), Role::User);
        let admin = Principal::new(AccountId(9), Role::Admin);
        assert!(require_admin(&user).is_err());
        assert!(require_admin(&admin).is_ok());
        assert!(ensure_not_self(&admin, AccountId(9), "approve").is_err());
        assert!(ensure_not_self(&admin, AccountId(3), "approve").is_ok());
    }
}
