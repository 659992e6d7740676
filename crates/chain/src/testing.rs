//! A single-process chain harness for contract and state tests.
//!
//! [`DummyChain`] drives the state layer the way the chain service does
//! (block state per block, recovery point, root commit) but with named
//! accounts and direct operations instead of signed transactions, so tests
//! can say `account("alice", 100)` and `send("alice", "bob", 30)`.

use crate::ChainError;
use meridian_engine::{ContractVm, KvVm, VmCall, VmContext};
use meridian_state::{BlockState, StateDb, Storage};
use meridian_types::{
    AccountId, AccountState, Address, Block, BlockBody, BlockHeader, BlockNo, Hash, Receipt, STATUS_SUCCESS,
};
use std::collections::HashMap;

/// One harness operation, applied inside a block.
#[derive(Debug, Clone)]
pub enum DummyTx {
    /// Set an account's balance outright.
    Account {
        /// Account name.
        name: String,
        /// New balance.
        balance: u64,
    },

    /// Move `amount` between two named accounts.
    Send {
        /// Sender name.
        from: String,
        /// Receiver name.
        to: String,
        /// Amount to move.
        amount: u64,
    },

    /// Deploy a contract under a name, running its constructor.
    Deploy {
        /// Deployer name.
        sender: String,
        /// Contract name.
        contract: String,
        /// Amount endowed to the contract.
        amount: u64,
        /// Contract code.
        code: Vec<u8>,
    },

    /// Call a deployed contract.
    Call {
        /// Caller name.
        sender: String,
        /// Contract name.
        contract: String,
        /// Amount attached.
        amount: u64,
        /// Call payload.
        payload: Vec<u8>,
        /// When set, the call must fail with an error containing this text.
        expect_err: Option<String>,
    },
}

/// Named-account deploy helper.
pub fn deploy(sender: &str, contract: &str, amount: u64, ctor: VmCall) -> DummyTx {
    DummyTx::Deploy {
        sender: sender.into(),
        contract: contract.into(),
        amount,
        code: ctor.to_bytes(),
    }
}

/// Named-account call helper.
pub fn call(sender: &str, contract: &str, amount: u64, payload: VmCall) -> DummyTx {
    DummyTx::Call {
        sender: sender.into(),
        contract: contract.into(),
        amount,
        payload: payload.to_bytes(),
        expect_err: None,
    }
}

impl DummyTx {
    /// Expect this call to fail with an error containing `text`.
    pub fn fail(mut self, text: &str) -> Self {
        if let DummyTx::Call { expect_err, .. } = &mut self {
            *expect_err = Some(text.into());
        }
        self
    }
}

fn name_id(name: &str) -> AccountId {
    AccountId::from_address(&Address::from_name(name))
}

/// An in-process chain over a bare state db.
pub struct DummyChain {
    sdb: StateDb,
    vm: KvVm,
    best_no: BlockNo,
    blocks: Vec<Block>,
    receipts: HashMap<String, Receipt>,
}

impl Default for DummyChain {
    fn default() -> Self {
        Self::new()
    }
}

impl DummyChain {
    /// A fresh chain holding only the genesis block.
    pub fn new() -> Self {
        let mut sdb = StateDb::new();
        let genesis = meridian_types::Genesis::new(1_700_000_000);
        let root = sdb.init_genesis(&genesis);
        let blocks = vec![genesis.block(root)];

        Self {
            sdb,
            vm: KvVm::new(),
            best_no: 0,
            blocks,
            receipts: HashMap::new(),
        }
    }

    /// Height of the tip.
    pub fn best_block_no(&self) -> BlockNo {
        self.best_no
    }

    /// State of a named account.
    pub fn get_account_state(&self, name: &str) -> AccountState {
        self.sdb.get_account(&name_id(name)).unwrap_or_default()
    }

    /// Balance of a named account.
    pub fn balance(&self, name: &str) -> u64 {
        self.get_account_state(name).balance
    }

    /// The receipt recorded for the latest call on `contract`.
    pub fn receipt(&self, contract: &str) -> Option<&Receipt> {
        self.receipts.get(contract)
    }

    fn run_tx(&self, bs: &mut BlockState, tx: &DummyTx, block_no: BlockNo, ts: i64) -> Result<(), ChainError> {
        match tx {
            DummyTx::Account { name, balance } => {
                let id = name_id(name);
                let mut state = bs.get_account(&self.sdb, &id);
                state.balance = *balance;
                bs.put_account(id, state);
                Ok(())
            }
            DummyTx::Send { from, to, amount } => {
                let sender_id = name_id(from);
                let receiver_id = name_id(to);
                if sender_id == receiver_id {
                    return Err(ChainError::InvalidBlock("sender and receiever cannot be same".into()));
                }

                let mut sender = bs.get_account(&self.sdb, &sender_id);
                if sender.balance < *amount {
                    return Err(ChainError::InvalidBlock("insufficient balance to sender".into()));
                }
                let mut receiver = bs.get_account(&self.sdb, &receiver_id);

                sender.balance -= amount;
                receiver.balance += amount;
                bs.put_account(sender_id, sender);
                bs.put_account(receiver_id, receiver);
                Ok(())
            }
            DummyTx::Deploy {
                sender,
                contract,
                amount,
                code,
            } => {
                let contract_id = name_id(contract);
                let sender_addr = Address::from_name(sender);
                let ctx = VmContext {
                    block_no,
                    timestamp: ts,
                    sender: &sender_addr,
                    contract_id,
                    amount: *amount,
                };

                let mut storage = Storage::new();
                self.vm
                    .create(&mut storage, code, &ctx)
                    .map_err(|e| ChainError::InvalidBlock(e.to_string()))?;

                self.transfer_named(bs, sender, contract, *amount)?;
                let mut account = bs.get_account(&self.sdb, &contract_id);
                account.code_hash = Some(Hash::digest(code));
                account.sql_recovery_point = 1;
                bs.put_account(contract_id, account);
                bs.stage_storage(contract_id, storage);
                Ok(())
            }
            DummyTx::Call {
                sender,
                contract,
                amount,
                payload,
                expect_err,
            } => {
                let contract_id = name_id(contract);
                let sender_addr = Address::from_name(sender);
                let ctx = VmContext {
                    block_no,
                    timestamp: ts,
                    sender: &sender_addr,
                    contract_id,
                    amount: *amount,
                };

                let mut storage = bs.get_storage(&self.sdb, &contract_id);
                let result = self.vm.execute(&mut storage, payload, &ctx);

                if let Some(expected) = expect_err {
                    return match result {
                        Err(e) if e.to_string().contains(expected.as_str()) => Ok(()),
                        Err(e) => Err(ChainError::InvalidBlock(format!(
                            "expected error containing {expected:?}, got {e}"
                        ))),
                        Ok(_) => Err(ChainError::InvalidBlock(format!(
                            "expected error containing {expected:?}, call succeeded"
                        ))),
                    };
                }

                result.map_err(|e| ChainError::InvalidBlock(e.to_string()))?;
                self.transfer_named(bs, sender, contract, *amount)?;
                bs.stage_storage(contract_id, storage);
                Ok(())
            }
        }
    }

    fn transfer_named(&self, bs: &mut BlockState, from: &str, to: &str, amount: u64) -> Result<(), ChainError> {
        if amount == 0 {
            return Ok(());
        }
        let sender_id = name_id(from);
        let receiver_id = name_id(to);
        let mut sender = bs.get_account(&self.sdb, &sender_id);
        if sender.balance < amount {
            return Err(ChainError::InvalidBlock("insufficient balance to sender".into()));
        }
        let mut receiver = bs.get_account(&self.sdb, &receiver_id);
        sender.balance -= amount;
        receiver.balance += amount;
        bs.put_account(sender_id, sender);
        bs.put_account(receiver_id, receiver);
        Ok(())
    }

    /// Apply `txs` as the next block. On any failure the whole block is
    /// discarded and the chain is unchanged.
    pub fn connect_block(&mut self, txs: &[DummyTx]) -> Result<(), ChainError> {
        let block_no = self.best_no + 1;
        let ts = 1_700_000_000 + block_no as i64;

        let mut bs = BlockState::new(self.sdb.root());
        for tx in txs {
            self.run_tx(&mut bs, tx, block_no, ts)?;

            // Record a receipt for contract calls, mirroring what the real
            // executor would emit.
            if let DummyTx::Call { contract, expect_err: None, .. } = tx {
                self.receipts.insert(
                    contract.clone(),
                    Receipt::new(name_id(contract), STATUS_SUCCESS, ""),
                );
            }
        }
        bs.save_recovery_point(block_no);
        bs.update(&self.sdb);
        let root = self.sdb.apply(bs)?;

        let parent = self.blocks.last().expect("chain never empty").clone();
        let block = Block::new(
            BlockHeader {
                block_no,
                prev_hash: parent.hash(),
                blocks_root_hash: root,
                timestamp: ts,
                coinbase: Address::default(),
                consensus: vec![],
            },
            BlockBody::default(),
        );
        self.blocks.push(block);
        self.best_no = block_no;
        Ok(())
    }

    /// Drop the tip block and rewind the state to the previous root.
    pub fn disconnect_block(&mut self) -> Result<(), ChainError> {
        if self.blocks.len() == 1 {
            return Err(ChainError::InvalidBlock("genesis block".into()));
        }
        self.blocks.pop();
        self.best_no -= 1;

        let best = self.blocks.last().expect("chain never empty");
        self.sdb.rollback(best.header.blocks_root_hash)?;
        Ok(())
    }

    /// Run a read-only query against a deployed contract.
    pub fn query(&self, contract: &str, query: VmCall) -> Result<String, ChainError> {
        let storage = self.sdb.get_storage(&name_id(contract)).unwrap_or_default();
        self.vm
            .query(&storage, &query.to_bytes())
            .map_err(|e| ChainError::InvalidBlock(e.to_string()))
    }

    /// Current state root.
    pub fn state_root(&self) -> Hash {
        self.sdb.root()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_account_funding_and_transfer() {
        let mut bc = DummyChain::new();
        bc.connect_block(&[
            DummyTx::Account {
                name: "alice".into(),
                balance: 100,
            },
            DummyTx::Account {
                name: "bob".into(),
                balance: 0,
            },
            DummyTx::Send {
                from: "alice".into(),
                to: "bob".into(),
                amount: 30,
            },
        ])
        .expect("block");

        assert_eq!(bc.balance("alice"), 70);
        assert_eq!(bc.balance("bob"), 30);
    }

    #[test]
    fn test_insufficient_balance_leaves_state_unchanged() {
        let mut bc = DummyChain::new();
        bc.connect_block(&[DummyTx::Account {
            name: "alice".into(),
            balance: 5,
        }])
        .expect("fund");
        let root = bc.state_root();

        let err = bc
            .connect_block(&[DummyTx::Send {
                from: "alice".into(),
                to: "bob".into(),
                amount: 10,
            }])
            .unwrap_err();
        assert!(err.to_string().contains("insufficient balance to sender"));
        assert_eq!(bc.state_root(), root);
        assert_eq!(bc.balance("alice"), 5);
        assert_eq!(bc.best_block_no(), 1);
    }

    #[test]
    fn test_self_send_is_rejected() {
        let mut bc = DummyChain::new();
        bc.connect_block(&[DummyTx::Account {
            name: "alice".into(),
            balance: 10,
        }])
        .expect("fund");

        let err = bc
            .connect_block(&[DummyTx::Send {
                from: "alice".into(),
                to: "alice".into(),
                amount: 1,
            }])
            .unwrap_err();
        assert!(err.to_string().contains("sender and receiever cannot be same"));
    }

    #[test]
    fn test_contract_create_call_query() {
        let mut bc = DummyChain::new();
        bc.connect_block(&[DummyTx::Account {
            name: "alice".into(),
            balance: 100,
        }])
        .expect("fund");

        bc.connect_block(&[deploy("alice", "C", 0, VmCall::new("init", vec!["init".into()]))])
            .expect("deploy");
        bc.connect_block(&[call("alice", "C", 0, VmCall::new("foo", vec!["x".into()]))])
            .expect("call");

        assert_eq!(bc.query("C", VmCall::new("get", vec![])).expect("query"), "x");
        assert!(bc.receipt("C").is_some());
    }

    #[test]
    fn test_expected_call_failure_passes() {
        let mut bc = DummyChain::new();
        bc.connect_block(&[deploy("alice", "C", 0, VmCall::new("init", vec![]))])
            .expect("deploy");

        bc.connect_block(&[call("alice", "C", 0, VmCall::new("fail", vec!["boom".into()])).fail("boom")])
            .expect("expected failure");
    }

    #[test]
    fn test_disconnect_restores_previous_root() {
        let mut bc = DummyChain::new();
        bc.connect_block(&[DummyTx::Account {
            name: "alice".into(),
            balance: 100,
        }])
        .expect("fund");
        let root_before = bc.state_root();

        bc.connect_block(&[DummyTx::Send {
            from: "alice".into(),
            to: "bob".into(),
            amount: 25,
        }])
        .expect("send");
        assert_eq!(bc.balance("alice"), 75);

        bc.disconnect_block().expect("disconnect");
        assert_eq!(bc.state_root(), root_before);
        assert_eq!(bc.balance("alice"), 100);
        assert_eq!(bc.balance("bob"), 0);
    }
}
