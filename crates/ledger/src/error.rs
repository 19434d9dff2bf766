//! # Ledger Error Types
//!
//! `LedgerError` is the single error contract of the ledger crate. Every
//! variant projects onto one [`ErrorKind`] of the public taxonomy, which
//! is what the HTTP gateway maps to a status code.
//!
//! | Kind | Variants |
//! |------|----------|
//! | Validation | `Validation` |
//! | NotFound | `NotFound`, `PlanNotSelected` |
//! | AlreadyProcessed | `AlreadyProcessed`, `PlanAlreadyActivated` |
//! | Forbidden | `Forbidden`, `AccountSuspended` |
//! | BusinessRule | `InsufficientBalance`, `PlansIncomplete`, `AccountNotActive`, `SurveysIncomplete`, `AmountTooLowAfterFee` |
//! | RateLimited | `DailyLimitReached` |
//! | Conflict | `RequestInFlight`, `PaymentPending` |
//! | Internal | `Store`, `Codec`, `Internal` |
//!
//! Every failure returned from inside a transaction aborts it, so none of
//! these variants ever leaves a partial write behind.

use thiserror::Error;

use crate::types::{plan_list, Plan};

/// Errors returned by ledger operations.
#[derive(Debug, Error)]
pub enum LedgerError {
    /// Malformed or out-of-range input. Detected before any lock is taken.
    #[error("{0}")]
    Validation(String),

    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: u64 },

    /// The entity already left its initial state.
    #[error("{entity} {id} has already been processed")]
    AlreadyProcessed { entity: &'static str, id: u64 },

    #[error("plan {0} has not been selected")]
    PlanNotSelected(Plan),

    #[error("plan {plan} requires {required} completed surveys, found {completed}")]
    SurveysIncomplete {
        plan: Plan,
        completed: u32,
        required: u32,
    },

    #[error("plan {0} is already activated")]
    PlanAlreadyActivated(Plan),

    #[error("{0}")]
    Forbidden(String),

    #[error("account is suspended")]
    AccountSuspended,

    #[error("account is not active for withdrawals")]
    AccountNotActive,

    #[error("complete all plans before withdrawing, remaining: {}", plan_list(.missing))]
    PlansIncomplete { missing: Vec<Plan> },

    #[error("amount {amount} does not cover the withdrawal fee of {fee}")]
    AmountTooLowAfterFee { amount: u64, fee: u64 },

    #[error("insufficient balance: available {available}, requested {requested}")]
    InsufficientBalance { available: u64, requested: u64 },

    #[error("a withdrawal request is already processing")]
    RequestInFlight,

    #[error("an activation payment for plan {0} is already awaiting review")]
    PaymentPending(Plan),

    #[error("daily withdrawal limit of {limit} reached")]
    DailyLimitReached { limit: u32 },

    #[error("store error: {0}")]
    Store(#[from] lmdb::Error),

    #[error("codec error: {0}")]
    Codec(#[from] bincode::Error),

    #[error("internal error: {0}")]
    Internal(String),
}

/// Public error taxonomy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Validation,
    NotFound,
    AlreadyProcessed,
    Forbidden,
    BusinessRule,
    RateLimited,
    Conflict,
    Internal,
}

impl ErrorKind {
    /// Stable machine-readable code for response bodies.
    pub const fn code(self) -> &'static str {
        match self {
            ErrorKind::Validation => "validation_error",
            ErrorKind::NotFound => "not_found",
            ErrorKind::AlreadyProcessed => "already_processed",
            ErrorKind::Forbidden => "forbidden",
            ErrorKind::BusinessRule => "business_rule",
            ErrorKind::RateLimited => "rate_limited",
            ErrorKind::Conflict => "conflict",
            ErrorKind::Internal => "internal",
        }
    }
}

impl LedgerError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            LedgerError::Validation(_) => ErrorKind::Validation,
            LedgerError::NotFound { .. } | LedgerError::PlanNotSelected(_) => ErrorKind::NotFound,
            LedgerError::AlreadyProcessed { .. } | LedgerError::PlanAlreadyActivated(_) => {
                ErrorKind::AlreadyProcessed
            }
            LedgerError::Forbidden(_) | LedgerError::AccountSuspended => ErrorKind::Forbidden,
            LedgerError::InsufficientBalance { .. }
            | LedgerError::PlansIncomplete { .. }
            | LedgerError::AccountNotActive
            | LedgerError::SurveysIncomplete { .. }
            | LedgerError::AmountTooLowAfterFee { .. } => ErrorKind::BusinessRule,
            LedgerError::DailyLimitReached { .. } => ErrorKind::RateLimited,
            LedgerError::RequestInFlight | LedgerError::PaymentPending(_) => ErrorKind::Conflict,
            LedgerError::Store(_) | LedgerError::Codec(_) | LedgerError::Internal(_) => {
                ErrorKind::Internal
            }
        }
    }

    pub(crate) fn not_found(entity: &'static str, id: u64) -> Self {
        LedgerError::NotFound { entity, id }
    }

    pub(crate) fn already_processed(entity: &'static str, id: u64) -> Self {
        LedgerError::AlreadyProcessed { entity, id }
    }

    pub(crate) fn overflow(what: &str) -> Self {
        LedgerError::Internal(format!("arithmetic overflow on {}", what))
    }
}

pub type LedgerResult<T> = Result<T, LedgerError>;
