//! The mutation buffer for one block.

use crate::state_db::{Storage, Version};
use crate::StateDb;
use meridian_types::{AccountId, AccountState, Hash, Receipt};
use std::collections::BTreeMap;

/// A point-in-time copy of the buffer, taken before each transaction.
///
/// Rolling back to a snapshot discards every write the transaction staged.
#[derive(Debug)]
pub struct StateSnapshot {
    accounts: BTreeMap<AccountId, AccountState>,
    storages: BTreeMap<AccountId, Storage>,
}

/// In-memory mutation buffer over the state db for a single block.
///
/// Reads fall through to the db; writes stay in the buffer until the block
/// commits. Receipts and the accumulated producer reward ride along so the
/// whole block is commit-or-discard.
#[derive(Debug)]
pub struct BlockState {
    /// Root of the state this buffer was opened on.
    base_root: Hash,

    /// Account writes staged by this block.
    accounts: BTreeMap<AccountId, AccountState>,

    /// Contract storage staged by this block (whole-storage granularity).
    storages: BTreeMap<AccountId, Storage>,

    /// Receipts in transaction order.
    receipts: Vec<Receipt>,

    /// Fees accumulated for the block producer, credited to the coinbase
    /// account after the last transaction.
    pub bp_reward: u64,

    /// Contract-db savepoint recorded for this block.
    recovery_point: u64,

    /// Root computed by [`BlockState::update`], `None` until then.
    root: Option<Hash>,
}

impl BlockState {
    /// Open a buffer on top of the state at `base_root`.
    pub fn new(base_root: Hash) -> Self {
        Self {
            base_root,
            accounts: BTreeMap::new(),
            storages: BTreeMap::new(),
            receipts: Vec::new(),
            bp_reward: 0,
            recovery_point: 0,
            root: None,
        }
    }

    /// Root of the state this buffer was opened on.
    pub fn base_root(&self) -> Hash {
        self.base_root
    }

    /// Read an account: staged write first, then the db, then a fresh
    /// default account.
    pub fn get_account(&self, sdb: &StateDb, id: &AccountId) -> AccountState {
        if let Some(staged) = self.accounts.get(id) {
            return staged.clone();
        }
        sdb.get_account(id).unwrap_or_default()
    }

    /// Whether the account exists in either the buffer or the db.
    pub fn has_account(&self, sdb: &StateDb, id: &AccountId) -> bool {
        self.accounts.contains_key(id) || sdb.get_account(id).is_some()
    }

    /// Stage an account write.
    pub fn put_account(&mut self, id: AccountId, state: AccountState) {
        self.accounts.insert(id, state);
    }

    /// Read a contract's storage: staged write first, then the db.
    pub fn get_storage(&self, sdb: &StateDb, id: &AccountId) -> Storage {
        if let Some(staged) = self.storages.get(id) {
            return staged.clone();
        }
        sdb.get_storage(id).unwrap_or_default()
    }

    /// Stage a contract's whole storage.
    pub fn stage_storage(&mut self, id: AccountId, storage: Storage) {
        self.storages.insert(id, storage);
    }

    /// Append a receipt. Order must mirror the block body.
    pub fn add_receipt(&mut self, receipt: Receipt) {
        self.receipts.push(receipt);
    }

    /// Receipts staged so far, in transaction order.
    pub fn receipts(&self) -> &[Receipt] {
        &self.receipts
    }

    /// Consume the buffer, yielding its receipts.
    pub fn into_receipts(self) -> Vec<Receipt> {
        self.receipts
    }

    /// Record the contract-db savepoint for this block and stamp every
    /// staged contract account with it.
    pub fn save_recovery_point(&mut self, point: u64) {
        self.recovery_point = point;
        let contract_ids: Vec<AccountId> = self.storages.keys().copied().collect();
        for id in contract_ids {
            if let Some(account) = self.accounts.get_mut(&id) {
                account.sql_recovery_point = point;
            }
        }
    }

    /// The savepoint recorded by [`BlockState::save_recovery_point`].
    pub fn recovery_point(&self) -> u64 {
        self.recovery_point
    }

    /// Take a snapshot of the staged writes.
    pub fn snapshot(&self) -> StateSnapshot {
        StateSnapshot {
            accounts: self.accounts.clone(),
            storages: self.storages.clone(),
        }
    }

    /// Discard every write staged after `snapshot` was taken.
    pub fn rollback(&mut self, snapshot: StateSnapshot) {
        self.accounts = snapshot.accounts;
        self.storages = snapshot.storages;
    }

    /// Compute the root this buffer would commit to and remember it.
    pub fn update(&mut self, sdb: &StateDb) -> Hash {
        let root = sdb.project_root(self);
        self.root = Some(root);
        root
    }

    /// The root computed by [`BlockState::update`], if it ran.
    pub fn root(&self) -> Option<Hash> {
        self.root
    }

    /// Fold the staged writes into `version`.
    pub(crate) fn merge_into(&self, version: &mut Version) {
        for (id, state) in &self.accounts {
            version.accounts.insert(*id, state.clone());
        }
        for (id, storage) in &self.storages {
            version.storages.insert(*id, storage.clone());
        }
    }
}
