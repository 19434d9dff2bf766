//! # Ladder Ledger Crate
//!
//! Transactional core of the plan ladder: survey progress, activation
//! payments and withdrawals, all kept consistent under concurrent requests
//! by running every mutation inside one exclusively locked unit of work.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                            Ledger                                │
//! │                                                                  │
//! │  ┌──────────────┐  ┌──────────────┐  ┌──────────────┐            │
//! │  │   progress   │  │  activation  │  │  withdrawal  │            │
//! │  │select/submit │  │submit/approve│  │request/settle│            │
//! │  └──────┬───────┘  └──────┬───────┘  └──────┬───────┘            │
//! │         │                 │  admin gate     │                    │
//! │         └─────────────────┼─────────────────┘                    │
//! │                           ▼                                      │
//! │                  ┌─────────────────┐                             │
//! │                  │   UnitOfWork    │  account row first,         │
//! │                  │ (LMDB rw txn)   │  then dependent rows        │
//! │                  └────────┬────────┘                             │
//! │                           ▼                                      │
//! │                  ┌─────────────────┐                             │
//! │                  │   LedgerStore   │  single source of truth     │
//! │                  └─────────────────┘                             │
//! └──────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Modules
//! - `types`: ids, plan ladder, status, principal
//! - `model`: persisted rows and status state machines
//! - `store`: LMDB store and unit of work
//! - `progress`: plan progress tracker
//! - `activation`: activation payment workflow
//! - `withdrawal`: withdrawal workflow
//! - `admin`: admin approval gateway (role and suspension gates, admin ops)
//! - `config`: TOML configuration
//! - `error`: error taxonomy
//!
//! ## Clock
//!
//! Operations take the current Unix time (`now`, seconds) as an argument.
//! Nothing in this crate reads the system clock.

pub mod activation;
pub mod admin;
pub mod config;
pub mod error;
pub mod model;
pub mod progress;
pub mod store;
pub mod types;
pub mod withdrawal;

pub use activation::PaymentReceipt;
pub use admin::RouteClass;
pub use config::{ConfigError, LedgerConfig, PlanCatalog, PlanTerms, WithdrawPolicy};
pub use error::{ErrorKind, LedgerError, LedgerResult};
pub use model::{
    Account, ActivationPayment, PaymentStatus, PlanProgress, Resolution, WithdrawRequest,
    WithdrawStatus,
};
pub use progress::SurveyOutcome;
pub use store::{LedgerStore, UnitOfWork};
pub use types::{AccountId, AccountStatus, PaymentId, Plan, Principal, RequestId, Role};

use serde::Serialize;
use tracing::info;

/// What `GET /account/me` returns: the account row plus its progress rows.
#[derive(Clone, Debug, Serialize, PartialEq, Eq)]
pub struct AccountSnapshot {
    pub account: Account,
    pub progress: Vec<PlanProgress>,
}

/// The ledger service: a store plus the policy it enforces.
///
/// Holds no account state of its own. `Ledger` is `Send + Sync` and is
/// shared behind an `Arc` by the HTTP layer.
#[derive(Clone)]
pub struct Ledger {
    store: LedgerStore,
    config: LedgerConfig,
}

impl Ledger {
    /// Open the store described by `config`.
    pub fn open(config: LedgerConfig) -> LedgerResult<Self> {
        let store = LedgerStore::open(&config.data_dir, config.map_size_bytes)?;
        Ok(Self::with_store(store, config))
    }

    pub fn with_store(store: LedgerStore, config: LedgerConfig) -> Self {
        Self { store, config }
    }

    pub fn store(&self) -> &LedgerStore {
        &self.store
    }

    pub fn config(&self) -> &LedgerConfig {
        &self.config
    }

    /// Create the ledger record for a newly registered user.
    ///
    /// Called by the external registration flow once credentials exist.
    /// The account starts on REGULAR with its progress row in place.
    pub fn register_account(&self, now: u64) -> LedgerResult<Account> {
        let account = self.store.transaction(|uow| {
            let account = uow.create_account(now)?;
            uow.ensure_plan_progress(account.id, account.current_plan, now)?;
            Ok(account)
        })?;
        info!(account = %account.id, "account registered");
        Ok(account)
    }

    /// The caller's own account and plan progress, from committed state.
    pub fn account_snapshot(&self, principal: &Principal) -> LedgerResult<AccountSnapshot> {
        let id = principal.account_id;
        let account = self
            .store
            .get_account(id)?
            .ok_or_else(|| LedgerError::not_found("account", id.0))?;
        let progress = self.store.list_plan_progress(id)?;
        Ok(AccountSnapshot { account, progress })
    }
}
