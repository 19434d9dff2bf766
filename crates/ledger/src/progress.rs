//! # Plan Progress Tracker
//!
//! Plan selection and survey submission.
//!
//! A submission locks the account and then the (account, plan) progress
//! row. Two submissions racing at N−1 therefore run one after the other:
//! the first completes the plan and credits the payout, the second sees a
//! completed row and returns it unchanged.

use serde::Serialize;
use tracing::{debug, info};

use crate::admin::{ensure_not_suspended, RouteClass};
use crate::error::{LedgerError, LedgerResult};
use crate::model::PlanProgress;
use crate::types::{Plan, Principal};
use crate::Ledger;

/// Result of one survey submission.
#[derive(Clone, Debug, Serialize, PartialEq, Eq)]
pub struct SurveyOutcome {
    pub plan: Plan,
    pub completed: bool,
    pub surveys_completed: u32,
    /// No further surveys are accepted for this plan.
    pub surveys_locked: bool,
    /// Completed but not yet activated by an approved payment.
    pub activation_required: bool,
    /// This call is the one that completed the plan.
    pub just_completed: bool,
    /// Payout credited by this call (zero unless `just_completed`).
    pub earned: u64,
}

impl SurveyOutcome {
    fn from_progress(progress: &PlanProgress, just_completed: bool, earned: u64) -> Self {
        Self {
            plan: progress.plan,
            completed: progress.completed,
            surveys_completed: progress.surveys_completed,
            surveys_locked: progress.completed,
            activation_required: progress.completed && !progress.activated,
            just_completed,
            earned,
        }
    }
}

impl Ledger {
    /// Make `plan` the caller's current plan, creating its progress row if
    /// absent. An existing row is left as is.
    pub fn select_plan(&self, principal: &Principal, plan: Plan, now: u64) -> LedgerResult<PlanProgress> {
        let id = principal.account_id;
        self.store.transaction(|uow| {
            let mut account = uow.lock_account(id)?;
            ensure_not_suspended(principal, &account, RouteClass::General)?;

            let progress = uow.ensure_plan_progress(id, plan, now)?;
            if account.current_plan != plan {
                account.current_plan = plan;
                account.updated_at = now;
                uow.update_account(&account)?;
                info!(account = %id, plan = %plan, "plan selected");
            } else {
                debug!(account = %id, plan = %plan, "plan already current");
            }
            Ok(progress)
        })
    }

    /// Record one survey for `plan`.
    ///
    /// Completing the plan credits its payout in the same transaction.
    /// Calls after completion return the completed snapshot untouched.
    pub fn submit_survey(&self, principal: &Principal, plan: Plan, now: u64) -> LedgerResult<SurveyOutcome> {
        let id = principal.account_id;
        let total = self.config.surveys_per_plan;
        let payout = self.config.plans.terms(plan).payout;

        let outcome = self.store.transaction(|uow| {
            let mut account = uow.lock_account(id)?;
            ensure_not_suspended(principal, &account, RouteClass::General)?;

            let mut progress = uow
                .lock_plan_progress(id, plan)?
                .ok_or(LedgerError::PlanNotSelected(plan))?;

            if progress.completed {
                debug!(account = %id, plan = %plan, "survey after completion ignored");
                return Ok(SurveyOutcome::from_progress(&progress, false, 0));
            }

            let just_completed = progress.record_survey(total, now);
            uow.put_plan_progress(&progress)?;

            let mut earned = 0;
            if just_completed {
                account.credit_earnings(payout)?;
                account.updated_at = now;
                uow.update_account(&account)?;
                earned = payout;
            }
            Ok(SurveyOutcome::from_progress(&progress, just_completed, earned))
        })?;

        if outcome.just_completed {
            info!(account = %id, plan = %plan, payout, "plan completed");
        }
        Ok(outcome)
    }

    /// The caller's progress rows in ladder order.
    pub fn plan_progress(&self, principal: &Principal) -> LedgerResult<Vec<PlanProgress>> {
        let id = principal.account_id;
        let account = self
            .store
            .get_account(id)?
            .ok_or_else(|| LedgerError::not_found("account", id.0))?;
        ensure_not_suspended(principal, &account, RouteClass::General)?;
        self.store.list_plan_progress(id)
    }
}
