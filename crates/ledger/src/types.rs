//! # Ledger Primitive Types
//!
//! Identifier newtypes, the plan ladder, moderation status, and the
//! authenticated principal that the auth layer injects into every call.
//!
//! ## Plan Ladder
//!
//! ```text
//! REGULAR ──▶ VIP ──▶ VVIP (terminal)
//! ```
//!
//! | Plan | Byte | Next |
//! |------|------|------|
//! | `Regular` | `0x01` | `Vip` |
//! | `Vip` | `0x02` | `Vvip` |
//! | `Vvip` | `0x03` | none |

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

// ════════════════════════════════════════════════════════════════════════════
// IDENTIFIERS
// ════════════════════════════════════════════════════════════════════════════

/// Account identifier, allocated by the store sequence at registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AccountId(pub u64);

/// Activation payment identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PaymentId(pub u64);

/// Withdrawal request identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequestId(pub u64);

impl AccountId {
    /// Big-endian key used in every bucket keyed by account.
    #[inline]
    pub fn to_key(self) -> [u8; 8] {
        self.0.to_be_bytes()
    }
}

impl PaymentId {
    #[inline]
    pub fn to_key(self) -> [u8; 8] {
        self.0.to_be_bytes()
    }
}

impl RequestId {
    #[inline]
    pub fn to_key(self) -> [u8; 8] {
        self.0.to_be_bytes()
    }
}

impl fmt::Display for AccountId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for PaymentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ════════════════════════════════════════════════════════════════════════════
// PLAN LADDER
// ════════════════════════════════════════════════════════════════════════════

/// A stage of the plan ladder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Plan {
    Regular,
    Vip,
    Vvip,
}

impl Plan {
    /// The whole ladder in progression order.
    pub const LADDER: [Plan; 3] = [Plan::Regular, Plan::Vip, Plan::Vvip];

    /// Next stage, or `None` for the terminal plan.
    pub const fn next(self) -> Option<Plan> {
        match self {
            Plan::Regular => Some(Plan::Vip),
            Plan::Vip => Some(Plan::Vvip),
            Plan::Vvip => None,
        }
    }

    /// `true` only for the last rung; approving its payment unlocks withdrawals.
    pub const fn is_terminal(self) -> bool {
        self.next().is_none()
    }

    /// Stable on-disk tag. Do not renumber.
    pub const fn as_byte(self) -> u8 {
        match self {
            Plan::Regular => 0x01,
            Plan::Vip => 0x02,
            Plan::Vvip => 0x03,
        }
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Plan::Regular => "REGULAR",
            Plan::Vip => "VIP",
            Plan::Vvip => "VVIP",
        }
    }
}

impl fmt::Display for Plan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Plan {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "REGULAR" => Ok(Plan::Regular),
            "VIP" => Ok(Plan::Vip),
            "VVIP" => Ok(Plan::Vvip),
            other => Err(format!("unknown plan: {}", other)),
        }
    }
}

/// Joins plan names for error messages, e.g. `"VIP, VVIP"`.
pub fn plan_list(plans: &[Plan]) -> String {
    plans
        .iter()
        .map(|p| p.as_str())
        .collect::<Vec<_>>()
        .join(", ")
}

// ════════════════════════════════════════════════════════════════════════════
// MODERATION STATUS & ROLES
// ════════════════════════════════════════════════════════════════════════════

/// Account moderation status. Distinct from the activation flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum AccountStatus {
    Active,
    Suspended,
    /// Final payment submitted, waiting for admin activation.
    Pending,
}

impl fmt::Display for AccountStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AccountStatus::Active => write!(f, "ACTIVE"),
            AccountStatus::Suspended => write!(f, "SUSPENDED"),
            AccountStatus::Pending => write!(f, "PENDING"),
        }
    }
}

impl FromStr for AccountStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "ACTIVE" => Ok(AccountStatus::Active),
            "SUSPENDED" => Ok(AccountStatus::Suspended),
            "PENDING" => Ok(AccountStatus::Pending),
            other => Err(format!("unknown account status: {}", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Admin,
}

impl FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "user" => Ok(Role::User),
            "admin" => Ok(Role::Admin),
            other => Err(format!("unknown role: {}", other)),
        }
    }
}

/// Caller identity attached by the external auth layer.
///
/// The ledger never authenticates anyone. It trusts that whoever built this
/// value has already verified the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Principal {
    pub account_id: AccountId,
    pub role: Role,
}

impl Principal {
    pub fn new(account_id: AccountId, role: Role) -> Self {
        Self { account_id, role }
    }

    #[inline]
    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }
}

// ════════════════════════════════════════════════════════════════════════════
// CLOCK HELPERS
// ════════════════════════════════════════════════════════════════════════════

pub const SECS_PER_DAY: u64 = 86_400;

/// UTC day number for a Unix timestamp in seconds.
#[inline]
pub const fn utc_day(ts: u64) -> u64 {
    ts / SECS_PER_DAY
}
