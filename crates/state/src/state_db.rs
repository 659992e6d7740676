//! The committed, versioned world state.

use crate::{BlockState, StateError};
use meridian_types::{AccountId, AccountState, Genesis, Hash};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, HashMap};

/// Contract storage: the key-value cells of one contract account.
pub type Storage = BTreeMap<Vec<u8>, Vec<u8>>;

/// One committed version of the world state.
#[derive(Debug, Clone, Default)]
pub(crate) struct Version {
    pub accounts: BTreeMap<AccountId, AccountState>,
    pub storages: BTreeMap<AccountId, Storage>,
}

impl Version {
    /// Hash every account and storage cell in deterministic order.
    fn compute_root(&self) -> Hash {
        let mut hasher = Sha256::new();
        for (id, state) in &self.accounts {
            hasher.update(id.as_bytes());
            hasher.update(bincode::serialize(state).unwrap_or_default());
        }
        for (id, storage) in &self.storages {
            hasher.update(id.as_bytes());
            for (key, value) in storage {
                hasher.update(key);
                hasher.update(value);
            }
        }
        Hash::from_bytes(hasher.finalize().into())
    }
}

/// Versioned account and contract state.
///
/// Every committed root stays addressable until the db is dropped, which is
/// what lets a reorganization rewind to the fork point (or back to the old
/// tip when branch re-execution fails).
#[derive(Debug)]
pub struct StateDb {
    root: Hash,
    current: Version,
    versions: HashMap<Hash, Version>,
}

impl Default for StateDb {
    fn default() -> Self {
        Self::new()
    }
}

impl StateDb {
    /// An empty state db with only the empty root committed.
    pub fn new() -> Self {
        let current = Version::default();
        let root = current.compute_root();
        let mut versions = HashMap::new();
        versions.insert(root, current.clone());
        Self {
            root,
            current,
            versions,
        }
    }

    /// Apply the genesis balance allocation and commit it as the first root.
    pub fn init_genesis(&mut self, genesis: &Genesis) -> Hash {
        for (address, balance) in &genesis.balances {
            let id = AccountId::from_address(address);
            self.current.accounts.insert(id, AccountState::with_balance(*balance));
        }
        let root = self.current.compute_root();
        self.versions.insert(root, self.current.clone());
        self.root = root;

        tracing::debug!(root = %root, accounts = genesis.balances.len(), "genesis state installed");
        root
    }

    /// Root of the current state.
    pub fn root(&self) -> Hash {
        self.root
    }

    /// Whether `root` was ever committed here.
    pub fn has_root(&self, root: Hash) -> bool {
        self.versions.contains_key(&root)
    }

    /// Read an account from the current state.
    pub fn get_account(&self, id: &AccountId) -> Option<AccountState> {
        self.current.accounts.get(id).cloned()
    }

    /// Read a contract's storage from the current state.
    pub fn get_storage(&self, id: &AccountId) -> Option<Storage> {
        self.current.storages.get(id).cloned()
    }

    /// Compute the root that `block_state` would commit to, without
    /// committing. Used by [`BlockState::update`].
    pub(crate) fn project_root(&self, block_state: &BlockState) -> Hash {
        let mut next = self.current.clone();
        block_state.merge_into(&mut next);
        next.compute_root()
    }

    /// Fold a finished block state into the db, committing a new version.
    ///
    /// The block state must have been [`BlockState::update`]d first; the
    /// committed root is the one `update` computed.
    pub fn apply(&mut self, block_state: BlockState) -> Result<Hash, StateError> {
        let root = block_state.root().ok_or(StateError::NotUpdated)?;

        block_state.merge_into(&mut self.current);
        self.versions.insert(root, self.current.clone());
        let old = self.root;
        self.root = root;

        tracing::debug!(old = %old, new = %root, "state root updated");
        Ok(root)
    }

    /// Rewind the current state to an earlier committed root.
    pub fn rollback(&mut self, root: Hash) -> Result<(), StateError> {
        let version = self.versions.get(&root).ok_or(StateError::UnknownRoot(root))?;
        self.current = version.clone();
        self.root = root;

        tracing::info!(root = %root, "state rolled back");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use meridian_types::Address;

    fn id(name: &str) -> AccountId {
        AccountId::from_address(&Address::from_name(name))
    }

    #[test]
    fn test_genesis_balances_are_committed() {
        let mut sdb = StateDb::new();
        let genesis = Genesis::new(0).with_balance(Address::from_name("alice"), 100);
        let root = sdb.init_genesis(&genesis);

        assert_eq!(sdb.root(), root);
        assert_eq!(sdb.get_account(&id("alice")).map(|a| a.balance), Some(100));
    }

    #[test]
    fn test_rollback_restores_earlier_version() {
        let mut sdb = StateDb::new();
        let genesis = Genesis::new(0).with_balance(Address::from_name("alice"), 100);
        let genesis_root = sdb.init_genesis(&genesis);

        let mut bs = BlockState::new(sdb.root());
        let mut alice = bs.get_account(&sdb, &id("alice"));
        alice.balance = 60;
        bs.put_account(id("alice"), alice);
        bs.update(&sdb);
        let new_root = sdb.apply(bs).expect("apply");

        assert_ne!(genesis_root, new_root);
        assert_eq!(sdb.get_account(&id("alice")).map(|a| a.balance), Some(60));

        sdb.rollback(genesis_root).expect("rollback");
        assert_eq!(sdb.root(), genesis_root);
        assert_eq!(sdb.get_account(&id("alice")).map(|a| a.balance), Some(100));
    }

    #[test]
    fn test_rollback_to_unknown_root_fails() {
        let mut sdb = StateDb::new();
        let err = sdb.rollback(Hash::digest(b"nowhere")).unwrap_err();
        assert!(matches!(err, StateError::UnknownRoot(_)));
    }

    #[test]
    fn test_root_depends_on_contract_storage() {
        let mut sdb = StateDb::new();

        let mut bs = BlockState::new(sdb.root());
        let mut storage = Storage::new();
        storage.insert(b"value".to_vec(), b"x".to_vec());
        bs.stage_storage(id("c"), storage);
        bs.update(&sdb);
        let with_storage = sdb.apply(bs).expect("apply");

        assert_ne!(with_storage, StateDb::new().root());
    }
}
