//! Shared fixtures for ledger integration tests.

#![allow(dead_code)]

use std::path::Path;

use ladder_ledger::{Ledger, LedgerConfig, Plan, Principal, Role};

pub const TS: u64 = 1_700_000_000;
pub const DAY: u64 = 86_400;

pub fn config_at(dir: &Path) -> LedgerConfig {
    LedgerConfig {
        data_dir: dir.to_string_lossy().into_owned(),
        map_size_bytes: 16 * 1024 * 1024,
        ..LedgerConfig::default()
    }
}

pub fn open_ledger(dir: &Path) -> Ledger {
    Ledger::open(config_at(dir)).unwrap()
}

pub fn new_user(ledger: &Ledger) -> Principal {
    let account = ledger.register_account(TS).unwrap();
    Principal::new(account.id, Role::User)
}

pub fn new_admin(ledger: &Ledger) -> Principal {
    let account = ledger.register_account(TS).unwrap();
    Principal::new(account.id, Role::Admin)
}

/// Select `plan` and submit every survey it needs.
pub fn complete_plan(ledger: &Ledger, who: &Principal, plan: Plan) {
    ledger.select_plan(who, plan, TS).unwrap();
    for _ in 0..ledger.config().surveys_per_plan {
        ledger.submit_survey(who, plan, TS).unwrap();
    }
}

/// Complete, pay for and approve every plan, leaving `who` activated.
pub fn climb_ladder(ledger: &Ledger, who: &Principal, admin: &Principal) {
    for plan in Plan::LADDER {
        complete_plan(ledger, who, plan);
        let receipt = ledger.submit_payment(who, "QK7H2LX9PD", TS).unwrap();
        ledger
            .approve_payment(admin, receipt.payment.id, None, TS)
            .unwrap();
    }
}
