//! Ledger configuration loaded from TOML with serde.
//!
//! Every field has a default, so an empty file (or no file) yields a
//! working configuration. `validate` must pass before the ledger opens.

use std::env;
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::Plan;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Fixed terms of one plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanTerms {
    /// Credited once, when the plan's last survey is submitted.
    pub payout: u64,
    /// Amount the user claims to have paid to activate the plan.
    pub activation_fee: u64,
    /// Flat fee withheld from withdrawals while this is the current plan.
    pub withdraw_fee: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlanCatalog {
    pub regular: PlanTerms,
    pub vip: PlanTerms,
    pub vvip: PlanTerms,
}

impl Default for PlanCatalog {
    fn default() -> Self {
        Self {
            regular: PlanTerms { payout: 1_500, activation_fee: 200, withdraw_fee: 10 },
            vip: PlanTerms { payout: 3_000, activation_fee: 500, withdraw_fee: 5 },
            vvip: PlanTerms { payout: 6_000, activation_fee: 1_000, withdraw_fee: 0 },
        }
    }
}

impl PlanCatalog {
    pub fn terms(&self, plan: Plan) -> PlanTerms {
        match plan {
            Plan::Regular => self.regular,
            Plan::Vip => self.vip,
            Plan::Vvip => self.vvip,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WithdrawPolicy {
    /// Inclusive lower bound on the gross amount.
    pub min_amount: u64,
    /// Inclusive upper bound on the gross amount.
    pub max_amount: u64,
    /// Requests allowed per account per UTC day.
    pub daily_limit: u32,
}

impl Default for WithdrawPolicy {
    fn default() -> Self {
        Self {
            min_amount: 200,
            max_amount: 500_000,
            daily_limit: 1,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LedgerConfig {
    /// Directory holding the LMDB environment.
    pub data_dir: String,

    /// LMDB map size in bytes.
    pub map_size_bytes: usize,

    /// Surveys required to complete any plan (N).
    pub surveys_per_plan: u32,

    pub withdraw: WithdrawPolicy,

    pub plans: PlanCatalog,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            data_dir: "./data/ledger".to_string(),
            map_size_bytes: 256 * 1024 * 1024,
            surveys_per_plan: 10,
            withdraw: WithdrawPolicy::default(),
            plans: PlanCatalog::default(),
        }
    }
}

impl LedgerConfig {
    /// Applies `LADDER_DATA_DIR` and `LADDER_SURVEYS_PER_PLAN` when set.
    pub fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Ok(dir) = env::var("LADDER_DATA_DIR") {
            self.data_dir = dir;
        }
        if let Ok(raw) = env::var("LADDER_SURVEYS_PER_PLAN") {
            self.surveys_per_plan = raw.trim().parse().map_err(|_| {
                ConfigError::Invalid(format!("LADDER_SURVEYS_PER_PLAN must be a number, got {:?}", raw))
            })?;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.data_dir.trim().is_empty() {
            return Err(ConfigError::Invalid("data_dir cannot be empty".into()));
        }
        if self.map_size_bytes == 0 {
            return Err(ConfigError::Invalid("map_size_bytes must be > 0".into()));
        }
        if self.surveys_per_plan == 0 {
            return Err(ConfigError::Invalid("surveys_per_plan must be > 0".into()));
        }
        let w = &self.withdraw;
        if w.min_amount == 0 || w.min_amount > w.max_amount {
            return Err(ConfigError::Invalid(format!(
                "withdraw bounds must satisfy 0 < min <= max, got {}..={}",
                w.min_amount, w.max_amount
            )));
        }
        if w.daily_limit == 0 {
            return Err(ConfigError::Invalid("withdraw.daily_limit must be > 0".into()));
        }
        Ok(())
    }
}

/// Load config from a TOML file path, then apply env overrides and validate.
pub fn load_from_file(path: impl AsRef<Path>) -> Result<LedgerConfig, ConfigError> {
    let s = fs::read_to_string(path.as_ref())?;
    let mut cfg: LedgerConfig = toml::from_str(&s)?;
    cfg.apply_env_overrides()?;
    cfg.validate()?;
    Ok(cfg)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let def = LedgerConfig::default();
        assert!(def.validate().is_ok());
        assert_eq!(def.surveys_per_plan, 10);
        assert_eq!(def.plans.terms(Plan::Regular).payout, 1_500);
        assert_eq!(def.plans.terms(Plan::Vvip).withdraw_fee, 0);
    }

    #[test]
    fn test_load_partial_file_keeps_defaults() {
        use std::io::Write;
        let tmp = tempfile::NamedTempFile::new().expect("temp file");
        let toml = r#"
            data_dir = "./mydata"

            [withdraw]
            daily_limit = 3

            [plans.vip]
            payout = 4000
            activation_fee = 600
            withdraw_fee = 4
        "#;
        let mut f = tmp.reopen().expect("reopen");
        write!(f, "{}", toml).expect("write");

        let cfg = load_from_file(tmp.path()).expect("load");
        assert_eq!(cfg.withdraw.daily_limit, 3);
        assert_eq!(cfg.withdraw.min_amount, 200);
        assert_eq!(cfg.plans.vip.payout, 4000);
        assert_eq!(cfg.plans.regular.payout, 1_500);
    }

    #[test]
    fn test_validate_rejects_inverted_bounds() {
        let mut cfg = LedgerConfig::default();
        cfg.withdraw.min_amount = 1_000;
        cfg.withdraw.max_amount = 10;
        assert!(matches!(cfg.validate(), Err(ConfigError::Invalid(_))));

        let mut cfg = LedgerConfig::default();
        cfg.surveys_per_plan = 0;
        assert!(cfg.validate().is_err());
    }
}
