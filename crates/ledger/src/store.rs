//! # Ledger Store (LMDB)
//!
//! The single source of truth. All rows are bincode-encoded and live in
//! named LMDB databases:
//!
//! | Bucket | Key | Value |
//! |--------|-----|-------|
//! | `accounts` | account_id (8 bytes BE) | `Account` |
//! | `plan_progress` | account_id (8) + plan byte (1) | `PlanProgress` |
//! | `activation_payments` | payment_id (8) | `ActivationPayment` |
//! | `withdraw_requests` | request_id (8) | `WithdrawRequest` |
//! | `account_index` | account_id (8) + tag (1) | `Vec<u64>` of owned ids |
//! | `meta` | sequence name | u64 BE |
//!
//! ## Locking
//!
//! Mutations go through a [`UnitOfWork`], which owns one LMDB write
//! transaction. LMDB admits a single writer per environment, so a row read
//! through a `UnitOfWork` is exclusively held until `commit` or rollback;
//! a concurrent unit of work blocks in `begin` until then.
//!
//! The unit of work also enforces the lock order: the owning account row
//! must be locked before any of its dependent rows (plan progress,
//! payments, withdrawals). Resolution paths that start from a payment or
//! request id use the `peek_*` readers to find the owner first.
//!
//! Dropping a `UnitOfWork` without committing aborts every write in it.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use lmdb::{Cursor, Database, DatabaseFlags, Environment, RwTransaction, Transaction, WriteFlags};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::debug;

use crate::error::{LedgerError, LedgerResult};
use crate::model::{
    Account, ActivationPayment, NewActivationPayment, NewWithdrawRequest, PaymentStatus,
    PlanProgress, WithdrawRequest, WithdrawStatus,
};
use crate::types::{AccountId, PaymentId, Plan, RequestId};

// ════════════════════════════════════════════════════════════════════════════
// BUCKET CONSTANTS
// ════════════════════════════════════════════════════════════════════════════
// Key formats are persisted. Changing them requires a migration.
// ════════════════════════════════════════════════════════════════════════════

pub const BUCKET_ACCOUNTS: &str = "accounts";
pub const BUCKET_PLAN_PROGRESS: &str = "plan_progress";
pub const BUCKET_ACTIVATION_PAYMENTS: &str = "activation_payments";
pub const BUCKET_WITHDRAW_REQUESTS: &str = "withdraw_requests";
pub const BUCKET_ACCOUNT_INDEX: &str = "account_index";
pub const BUCKET_META: &str = "meta";

const SEQ_ACCOUNTS: &[u8] = b"seq_accounts";
const SEQ_PAYMENTS: &[u8] = b"seq_activation_payments";
const SEQ_WITHDRAWALS: &[u8] = b"seq_withdraw_requests";

const INDEX_TAG_PAYMENT: u8 = b'p';
const INDEX_TAG_WITHDRAWAL: u8 = b'w';

fn progress_key(account: AccountId, plan: Plan) -> [u8; 9] {
    let mut key = [0u8; 9];
    key[..8].copy_from_slice(&account.to_key());
    key[8] = plan.as_byte();
    key
}

fn index_key(account: AccountId, tag: u8) -> [u8; 9] {
    let mut key = [0u8; 9];
    key[..8].copy_from_slice(&account.to_key());
    key[8] = tag;
    key
}

fn read_row<T, Txn>(txn: &Txn, db: Database, key: &[u8]) -> LedgerResult<Option<T>>
where
    T: DeserializeOwned,
    Txn: Transaction,
{
    match txn.get(db, &key) {
        Ok(v) => Ok(Some(bincode::deserialize(v)?)),
        Err(lmdb::Error::NotFound) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// Ids listed under `account` in the owner index, ascending.
fn indexed_ids<Txn: Transaction>(
    txn: &Txn,
    db_index: Database,
    account: AccountId,
    tag: u8,
) -> LedgerResult<Vec<u64>> {
    Ok(read_row(txn, db_index, &index_key(account, tag))?.unwrap_or_default())
}

fn scan_all<T, Txn>(txn: &Txn, db: Database) -> LedgerResult<Vec<T>>
where
    T: DeserializeOwned,
    Txn: Transaction,
{
    let mut cursor = txn.open_ro_cursor(db)?;
    let mut rows = Vec::new();
    for (_key, val) in cursor.iter() {
        rows.push(bincode::deserialize(val)?);
    }
    Ok(rows)
}

// ════════════════════════════════════════════════════════════════════════════
// LEDGER STORE
// ════════════════════════════════════════════════════════════════════════════

#[derive(Clone)]
pub struct LedgerStore {
    env: Arc<Environment>,
    env_path: PathBuf,
    db_accounts: Database,
    db_plan_progress: Database,
    db_activation_payments: Database,
    db_withdraw_requests: Database,
    db_account_index: Database,
    db_meta: Database,
}

impl LedgerStore {
    /// Open the LMDB environment at `path`, creating the named databases.
    pub fn open(path: impl AsRef<Path>, map_size_bytes: usize) -> LedgerResult<Self> {
        let p = path.as_ref();
        std::fs::create_dir_all(p)
            .map_err(|e| LedgerError::Internal(format!("cannot create {}: {}", p.display(), e)))?;

        let env = Environment::new()
            .set_max_dbs(8)
            .set_map_size(map_size_bytes)
            .open(p)?;

        let db_accounts = env.create_db(Some(BUCKET_ACCOUNTS), DatabaseFlags::empty())?;
        let db_plan_progress = env.create_db(Some(BUCKET_PLAN_PROGRESS), DatabaseFlags::empty())?;
        let db_activation_payments =
            env.create_db(Some(BUCKET_ACTIVATION_PAYMENTS), DatabaseFlags::empty())?;
        let db_withdraw_requests =
            env.create_db(Some(BUCKET_WITHDRAW_REQUESTS), DatabaseFlags::empty())?;
        let db_account_index = env.create_db(Some(BUCKET_ACCOUNT_INDEX), DatabaseFlags::empty())?;
        let db_meta = env.create_db(Some(BUCKET_META), DatabaseFlags::empty())?;

        debug!(path = %p.display(), "ledger store opened");

        Ok(Self {
            env: Arc::new(env),
            env_path: p.to_path_buf(),
            db_accounts,
            db_plan_progress,
            db_activation_payments,
            db_withdraw_requests,
            db_account_index,
            db_meta,
        })
    }

    pub fn path(&self) -> &Path {
        &self.env_path
    }

    /// Begin a unit of work. Blocks while another one is open.
    pub fn begin(&self) -> LedgerResult<UnitOfWork<'_>> {
        let txn = self.env.begin_rw_txn()?;
        Ok(UnitOfWork {
            store: self,
            txn,
            locked_accounts: HashSet::new(),
        })
    }

    /// Run `f` inside one unit of work: commit on `Ok`, roll back on `Err`.
    pub fn transaction<'s, T, F>(&'s self, f: F) -> LedgerResult<T>
    where
        F: FnOnce(&mut UnitOfWork<'s>) -> LedgerResult<T>,
    {
        let mut uow = self.begin()?;
        match f(&mut uow) {
            Ok(value) => {
                uow.commit()?;
                Ok(value)
            }
            Err(err) => {
                uow.rollback();
                Err(err)
            }
        }
    }

    // ------------------------
    // read-only views
    // ------------------------
    // Committed snapshots for listings. Never used to make a decision
    // inside a unit of work.

    pub fn get_account(&self, id: AccountId) -> LedgerResult<Option<Account>> {
        let rtxn = self.env.begin_ro_txn()?;
        read_row(&rtxn, self.db_accounts, &id.to_key())
    }

    pub fn get_activation_payment(&self, id: PaymentId) -> LedgerResult<Option<ActivationPayment>> {
        let rtxn = self.env.begin_ro_txn()?;
        read_row(&rtxn, self.db_activation_payments, &id.to_key())
    }

    pub fn get_withdraw_request(&self, id: RequestId) -> LedgerResult<Option<WithdrawRequest>> {
        let rtxn = self.env.begin_ro_txn()?;
        read_row(&rtxn, self.db_withdraw_requests, &id.to_key())
    }

    /// All plan progress rows of an account, in ladder order.
    pub fn list_plan_progress(&self, account: AccountId) -> LedgerResult<Vec<PlanProgress>> {
        let rtxn = self.env.begin_ro_txn()?;
        let mut rows = Vec::new();
        for plan in Plan::LADDER {
            if let Some(row) = read_row(&rtxn, self.db_plan_progress, &progress_key(account, plan))? {
                rows.push(row);
            }
        }
        Ok(rows)
    }

    /// Activation payments, optionally filtered by status, in id order.
    pub fn list_activation_payments(
        &self,
        status: Option<PaymentStatus>,
    ) -> LedgerResult<Vec<ActivationPayment>> {
        let rtxn = self.env.begin_ro_txn()?;
        let rows: Vec<ActivationPayment> = scan_all(&rtxn, self.db_activation_payments)?;
        Ok(rows
            .into_iter()
            .filter(|p| status.map_or(true, |s| p.status == s))
            .collect())
    }

    /// Withdrawal requests, optionally filtered by status, in id order.
    pub fn list_withdraw_requests(
        &self,
        status: Option<WithdrawStatus>,
    ) -> LedgerResult<Vec<WithdrawRequest>> {
        let rtxn = self.env.begin_ro_txn()?;
        let rows: Vec<WithdrawRequest> = scan_all(&rtxn, self.db_withdraw_requests)?;
        Ok(rows
            .into_iter()
            .filter(|r| status.map_or(true, |s| r.status == s))
            .collect())
    }

    /// One account's withdrawal requests, in id order.
    pub fn list_account_withdrawals(&self, account: AccountId) -> LedgerResult<Vec<WithdrawRequest>> {
        let rtxn = self.env.begin_ro_txn()?;
        let ids = indexed_ids(&rtxn, self.db_account_index, account, INDEX_TAG_WITHDRAWAL)?;
        let mut rows = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(row) = read_row(&rtxn, self.db_withdraw_requests, &id.to_be_bytes())? {
                rows.push(row);
            }
        }
        Ok(rows)
    }
}

// ════════════════════════════════════════════════════════════════════════════
// UNIT OF WORK
// ════════════════════════════════════════════════════════════════════════════

/// One atomic, exclusively locked transaction against the store.
pub struct UnitOfWork<'s> {
    store: &'s LedgerStore,
    txn: RwTransaction<'s>,
    locked_accounts: HashSet<AccountId>,
}

impl<'s> UnitOfWork<'s> {
    pub fn commit(self) -> LedgerResult<()> {
        self.txn.commit()?;
        Ok(())
    }

    /// Discard every write made in this unit of work.
    pub fn rollback(self) {
        self.txn.abort();
    }

    fn put<T: Serialize>(&mut self, db: Database, key: &[u8], row: &T) -> LedgerResult<()> {
        let blob = bincode::serialize(row)?;
        self.txn.put(db, &key, &blob, WriteFlags::empty())?;
        Ok(())
    }

    fn next_sequence(&mut self, name: &[u8]) -> LedgerResult<u64> {
        let db_meta = self.store.db_meta;
        let current = match self.txn.get(db_meta, &name) {
            Ok(v) => {
                let raw: [u8; 8] = v
                    .try_into()
                    .map_err(|_| LedgerError::Internal("corrupt sequence value".into()))?;
                u64::from_be_bytes(raw)
            }
            Err(lmdb::Error::NotFound) => 0,
            Err(e) => return Err(e.into()),
        };
        let next = current
            .checked_add(1)
            .ok_or_else(|| LedgerError::overflow("sequence"))?;
        self.txn.put(db_meta, &name, &next.to_be_bytes(), WriteFlags::empty())?;
        Ok(next)
    }

    fn append_index(&mut self, account: AccountId, tag: u8, id: u64) -> LedgerResult<()> {
        let db_index = self.store.db_account_index;
        let key = index_key(account, tag);
        let mut ids = indexed_ids(&self.txn, db_index, account, tag)?;
        ids.push(id);
        self.put(db_index, &key, &ids)
    }

    fn ensure_account_locked(&self, account: AccountId, row: &str) -> LedgerResult<()> {
        if self.locked_accounts.contains(&account) {
            Ok(())
        } else {
            Err(LedgerError::Internal(format!(
                "lock order violation: {} row locked before account {}",
                row, account
            )))
        }
    }

    // ------------------------
    // accounts
    // ------------------------

    /// Allocate and persist a fresh account. The new row is held locked.
    pub fn create_account(&mut self, now: u64) -> LedgerResult<Account> {
        let id = AccountId(self.next_sequence(SEQ_ACCOUNTS)?);
        let account = Account::new(id, now);
        self.put(self.store.db_accounts, &id.to_key(), &account)?;
        self.locked_accounts.insert(id);
        Ok(account)
    }

    /// Read an account for update (`SELECT … FOR UPDATE`).
    pub fn lock_account(&mut self, id: AccountId) -> LedgerResult<Account> {
        let account: Account = read_row(&self.txn, self.store.db_accounts, &id.to_key())?
            .ok_or_else(|| LedgerError::not_found("account", id.0))?;
        self.locked_accounts.insert(id);
        Ok(account)
    }

    pub fn update_account(&mut self, account: &Account) -> LedgerResult<()> {
        self.ensure_account_locked(account.id, "account")?;
        self.put(self.store.db_accounts, &account.id.to_key(), account)
    }

    // ------------------------
    // plan progress
    // ------------------------

    pub fn lock_plan_progress(
        &mut self,
        account: AccountId,
        plan: Plan,
    ) -> LedgerResult<Option<PlanProgress>> {
        self.ensure_account_locked(account, "plan progress")?;
        read_row(&self.txn, self.store.db_plan_progress, &progress_key(account, plan))
    }

    pub fn put_plan_progress(&mut self, progress: &PlanProgress) -> LedgerResult<()> {
        self.ensure_account_locked(progress.account_id, "plan progress")?;
        let key = progress_key(progress.account_id, progress.plan);
        self.put(self.store.db_plan_progress, &key, progress)
    }

    /// Upsert-if-absent. Returns the existing row untouched when present.
    pub fn ensure_plan_progress(
        &mut self,
        account: AccountId,
        plan: Plan,
        now: u64,
    ) -> LedgerResult<PlanProgress> {
        if let Some(existing) = self.lock_plan_progress(account, plan)? {
            return Ok(existing);
        }
        let fresh = PlanProgress::new(account, plan, now);
        self.put_plan_progress(&fresh)?;
        Ok(fresh)
    }

    // ------------------------
    // activation payments
    // ------------------------

    pub fn insert_activation_payment(
        &mut self,
        draft: NewActivationPayment,
    ) -> LedgerResult<ActivationPayment> {
        self.ensure_account_locked(draft.account_id, "activation payment")?;
        let id = PaymentId(self.next_sequence(SEQ_PAYMENTS)?);
        let payment = ActivationPayment {
            id,
            account_id: draft.account_id,
            plan: draft.plan,
            reference: draft.reference,
            amount: draft.amount,
            status: PaymentStatus::Submitted,
            created_at: draft.created_at,
            updated_at: draft.created_at,
            admin_note: None,
            resolved_by: None,
        };
        self.put(self.store.db_activation_payments, &id.to_key(), &payment)?;
        self.append_index(payment.account_id, INDEX_TAG_PAYMENT, id.0)?;
        Ok(payment)
    }

    /// Unlocked read used only to discover the owning account.
    pub fn peek_activation_payment(&self, id: PaymentId) -> LedgerResult<Option<ActivationPayment>> {
        read_row(&self.txn, self.store.db_activation_payments, &id.to_key())
    }

    /// Re-read a payment for update. Its owner must already be locked.
    pub fn lock_activation_payment(&mut self, id: PaymentId) -> LedgerResult<ActivationPayment> {
        let payment = self
            .peek_activation_payment(id)?
            .ok_or_else(|| LedgerError::not_found("activation payment", id.0))?;
        self.ensure_account_locked(payment.account_id, "activation payment")?;
        Ok(payment)
    }

    pub fn put_activation_payment(&mut self, payment: &ActivationPayment) -> LedgerResult<()> {
        self.ensure_account_locked(payment.account_id, "activation payment")?;
        self.put(self.store.db_activation_payments, &payment.id.to_key(), payment)
    }

    pub fn account_payments(&mut self, account: AccountId) -> LedgerResult<Vec<ActivationPayment>> {
        self.ensure_account_locked(account, "activation payment")?;
        let ids = indexed_ids(&self.txn, self.store.db_account_index, account, INDEX_TAG_PAYMENT)?;
        let mut rows = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(row) = read_row(&self.txn, self.store.db_activation_payments, &id.to_be_bytes())? {
                rows.push(row);
            }
        }
        Ok(rows)
    }

    // ------------------------
    // withdraw requests
    // ------------------------

    pub fn insert_withdraw_request(
        &mut self,
        draft: NewWithdrawRequest,
    ) -> LedgerResult<WithdrawRequest> {
        self.ensure_account_locked(draft.account_id, "withdrawal request")?;
        let net_amount = draft
            .gross_amount
            .checked_sub(draft.fee)
            .ok_or_else(|| LedgerError::Internal("withdrawal fee exceeds gross amount".into()))?;
        let id = RequestId(self.next_sequence(SEQ_WITHDRAWALS)?);
        let request = WithdrawRequest {
            id,
            account_id: draft.account_id,
            destination: draft.destination,
            gross_amount: draft.gross_amount,
            fee: draft.fee,
            net_amount,
            fee_plan: draft.fee_plan,
            status: WithdrawStatus::Processing,
            created_at: draft.created_at,
            resolved_at: None,
            resolved_by: None,
        };
        self.put(self.store.db_withdraw_requests, &id.to_key(), &request)?;
        self.append_index(request.account_id, INDEX_TAG_WITHDRAWAL, id.0)?;
        Ok(request)
    }

    pub fn peek_withdraw_request(&self, id: RequestId) -> LedgerResult<Option<WithdrawRequest>> {
        read_row(&self.txn, self.store.db_withdraw_requests, &id.to_key())
    }

    pub fn lock_withdraw_request(&mut self, id: RequestId) -> LedgerResult<WithdrawRequest> {
        let request = self
            .peek_withdraw_request(id)?
            .ok_or_else(|| LedgerError::not_found("withdrawal request", id.0))?;
        self.ensure_account_locked(request.account_id, "withdrawal request")?;
        Ok(request)
    }

    pub fn put_withdraw_request(&mut self, request: &WithdrawRequest) -> LedgerResult<()> {
        self.ensure_account_locked(request.account_id, "withdrawal request")?;
        self.put(self.store.db_withdraw_requests, &request.id.to_key(), request)
    }

    pub fn account_withdrawals(&mut self, account: AccountId) -> LedgerResult<Vec<WithdrawRequest>> {
        self.ensure_account_locked(account, "withdrawal request")?;
        let ids = indexed_ids(&self.txn, self.store.db_account_index, account, INDEX_TAG_WITHDRAWAL)?;
        let mut rows = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(row) = read_row(&self.txn, self.store.db_withdraw_requests, &id.to_be_bytes())? {
                rows.push(row);
            }
        }
        Ok(rows)
    }
}

// ════════════════════════════════════════════════════════════════════════════
// TESTS
// ════════════════════════════════════════════════════════════════════════════

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    const TS: u64 = 1_700_000_000;
    const MAP_SIZE: usize = 16 * 1024 * 1024;

    #[test]
    fn test_account_roundtrip_and_sequence() {
        let dir = tempdir().unwrap();
        let store = LedgerStore::open(dir.path(), MAP_SIZE).unwrap();

        let (a, b) = store
            .transaction(|uow| Ok((uow.create_account(TS)?, uow.create_account(TS)?)))
            .unwrap();
        assert_eq!(a.id, AccountId(1));
        assert_eq!(b.id, AccountId(2));

        let loaded = store.get_account(AccountId(2)).unwrap().unwrap();
        assert_eq!(loaded, b);
        assert!(store.get_account(AccountId(3)).unwrap().is_none());
    }

    #[test]
    fn test_rollback_discards_all_writes() {
        let dir = tempdir().unwrap();
        let store = LedgerStore::open(dir.path(), MAP_SIZE).unwrap();
        let id = store.transaction(|uow| Ok(uow.create_account(TS)?.id)).unwrap();

        let result: LedgerResult<()> = store.transaction(|uow| {
            let mut acct = uow.lock_account(id)?;
            acct.available_balance = 999;
            uow.update_account(&acct)?;
            uow.ensure_plan_progress(id, Plan::Vip, TS)?;
            Err(LedgerError::Validation("abort".into()))
        });
        assert!(result.is_err());

        let acct = store.get_account(id).unwrap().unwrap();
        assert_eq!(acct.available_balance, 0);
        assert!(store.list_plan_progress(id).unwrap().is_empty());
    }

    #[test]
    fn test_dependent_row_requires_account_lock() {
        let dir = tempdir().unwrap();
        let store = LedgerStore::open(dir.path(), MAP_SIZE).unwrap();
        let id = store.transaction(|uow| Ok(uow.create_account(TS)?.id)).unwrap();

        let mut uow = store.begin().unwrap();
        let err = uow.lock_plan_progress(id, Plan::Regular).unwrap_err();
        assert!(matches!(err, LedgerError::Internal(ref m) if m.contains("lock order")));

        uow.lock_account(id).unwrap();
        assert!(uow.lock_plan_progress(id, Plan::Regular).unwrap().is_none());
        uow.rollback();
    }

    #[test]
    fn test_owner_index_scopes_rows_per_account() {
        let dir = tempdir().unwrap();
        let store = LedgerStore::open(dir.path(), MAP_SIZE).unwrap();

        let (a, b) = store
            .transaction(|uow| {
                let a = uow.create_account(TS)?.id;
                let b = uow.create_account(TS)?.id;
                for (owner, amount) in [(a, 500u64), (b, 700), (a, 900)] {
                    uow.insert_withdraw_request(NewWithdrawRequest {
                        account_id: owner,
                        destination: "0712345678".into(),
                        gross_amount: amount,
                        fee: 10,
                        fee_plan: Plan::Regular,
                        created_at: TS,
                    })?;
                }
                Ok((a, b))
            })
            .unwrap();

        let mine = store.list_account_withdrawals(a).unwrap();
        assert_eq!(mine.len(), 2);
        assert_eq!(mine[0].gross_amount, 500);
        assert_eq!(mine[1].net_amount, 890);
        assert_eq!(store.list_account_withdrawals(b).unwrap().len(), 1);
        assert_eq!(
            store
                .list_withdraw_requests(Some(WithdrawStatus::Processing))
                .unwrap()
                .len(),
            3
        );
    }

    #[test]
    fn test_reopen_keeps_committed_rows() {
        let dir = tempdir().unwrap();
        let id = {
            let store = LedgerStore::open(dir.path(), MAP_SIZE).unwrap();
            store.transaction(|uow| Ok(uow.create_account(TS)?.id)).unwrap()
        };
        let store = LedgerStore::open(dir.path(), MAP_SIZE).unwrap();
        assert!(store.get_account(id).unwrap().is_some());
        let next = store.transaction(|uow| Ok(uow.create_account(TS)?.id)).unwrap();
        assert_eq!(next, AccountId(id.0 + 1));
    }
}
