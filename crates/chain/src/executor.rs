//! The single-transaction state transition.

use crate::{TxError, COINBASE_FEE};
use meridian_engine::{governance, ContractVm, VmContext, VmError};
use meridian_state::{BlockState, StateDb, Storage};
use meridian_types::{
    AccountId, AccountState, Address, BlockNo, Hash, Receipt, SignedTx, TxType, STATUS_CREATED, STATUS_SUCCESS,
};
/// Root of a contract's storage: hash of its cells in key order.
fn storage_root(storage: &Storage) -> Hash {
    let mut data = Vec::new();
    for (key, value) in storage {
        data.extend_from_slice(&(key.len() as u32).to_be_bytes());
        data.extend_from_slice(key);
        data.extend_from_slice(&(value.len() as u32).to_be_bytes());
        data.extend_from_slice(value);
    }
    Hash::digest(&data)
}

/// Apply one transaction to the block state.
///
/// Validation failures reject the transaction and, one level up, the whole
/// block. Contract engine failures do **not**: they are absorbed here (the
/// sender is reset to its pre-call state, the fee is still charged, the
/// nonce still advances, and an error receipt is appended) and the block
/// continues.
pub fn execute_tx(
    sdb: &StateDb,
    vm: &dyn ContractVm,
    bs: &mut BlockState,
    tx: &SignedTx,
    block_no: BlockNo,
    timestamp: i64,
) -> Result<(), TxError> {
    if !tx.is_hash_consistent() {
        return Err(TxError::InvalidHash);
    }
    let body = &tx.body;
    if body.account.is_empty() {
        return Err(TxError::InvalidRecipient("missing sender".into()));
    }

    let sender_id = AccountId::from_address(&body.account);
    let sender = bs.get_account(sdb, &sender_id);

    let expected = sender.nonce + 1;
    if body.nonce != expected {
        return Err(TxError::InvalidNonce {
            expected,
            got: body.nonce,
        });
    }

    let fee = match body.tx_type {
        TxType::Normal => COINBASE_FEE,
        TxType::Governance => 0,
    };
    let needed = body.amount.saturating_add(fee);
    if sender.balance < needed {
        return Err(TxError::InsufficientBalance {
            balance: sender.balance,
            needed,
        });
    }

    match body.tx_type {
        TxType::Normal => execute_normal(sdb, vm, bs, tx, sender_id, sender, fee, block_no, timestamp),
        TxType::Governance => execute_governance_tx(sdb, bs, tx, sender_id, sender),
    }
}

#[allow(clippy::too_many_arguments)]
fn execute_normal(
    sdb: &StateDb,
    vm: &dyn ContractVm,
    bs: &mut BlockState,
    tx: &SignedTx,
    sender_id: AccountId,
    mut sender: AccountState,
    fee: u64,
    block_no: BlockNo,
    timestamp: i64,
) -> Result<(), TxError> {
    let body = &tx.body;

    let (receiver_addr, creating) = if body.recipient.is_empty() {
        (Address::contract(&body.account, body.nonce), true)
    } else {
        (body.recipient.clone(), false)
    };
    let receiver_id = AccountId::from_address(&receiver_addr);
    if receiver_id == sender_id {
        return Err(TxError::InvalidRecipient("sender and receiver cannot be same".into()));
    }

    let receiver_existed = bs.has_account(sdb, &receiver_id);
    // Nonce uniqueness makes a clash on the synthesized address impossible.
    debug_assert!(!(creating && receiver_existed), "synthesized contract address already exists");
    let mut receiver = bs.get_account(sdb, &receiver_id);

    sender.balance -= fee;
    sender.balance -= body.amount;
    receiver.balance += body.amount;

    let ctx = VmContext {
        block_no,
        timestamp,
        sender: &body.account,
        contract_id: receiver_id,
        amount: body.amount,
    };

    let vm_result: Result<(String, Option<Storage>), VmError> = if creating {
        let mut storage = Storage::new();
        match vm.create(&mut storage, &body.payload, &ctx) {
            Ok(rv) => {
                receiver.code_hash = Some(Hash::digest(&body.payload));
                Ok((rv, Some(storage)))
            }
            Err(e) => Err(e),
        }
    } else if receiver.is_contract() {
        let mut storage = bs.get_storage(sdb, &receiver_id);
        vm.execute(&mut storage, &body.payload, &ctx).map(|rv| (rv, Some(storage)))
    } else if body.payload.is_empty() {
        Ok((String::new(), None))
    } else {
        Err(VmError::Execution("receiver is not a contract".into()))
    };

    match vm_result {
        Err(vm_err) => {
            // The engine failed: drop every local change, then re-apply
            // what the ledger still owes (fee, nonce, receipt).
            tracing::warn!(tx = %tx.hash(), err = %vm_err, "tx failed in vm");
            let mut sender = bs.get_account(sdb, &sender_id);
            sender.balance -= fee;
            sender.nonce = body.nonce;
            bs.put_account(sender_id, sender);

            bs.bp_reward += fee;
            bs.add_receipt(Receipt::new(receiver_id, vm_err.to_string(), ""));
            Ok(())
        }
        Ok((rv, storage)) => {
            sender.nonce = body.nonce;
            bs.put_account(sender_id, sender);

            if let Some(storage) = storage {
                receiver.storage_root = Some(storage_root(&storage));
                bs.put_account(receiver_id, receiver);
                bs.stage_storage(receiver_id, storage);
            } else {
                bs.put_account(receiver_id, receiver);
            }

            bs.bp_reward += fee;
            let receipt = if creating && !receiver_existed {
                Receipt::new(receiver_id, STATUS_CREATED, rv)
            } else {
                Receipt::new(receiver_id, STATUS_SUCCESS, rv)
            };
            bs.add_receipt(receipt);
            Ok(())
        }
    }
}

fn execute_governance_tx(
    sdb: &StateDb,
    bs: &mut BlockState,
    tx: &SignedTx,
    sender_id: AccountId,
    mut sender: AccountState,
) -> Result<(), TxError> {
    let body = &tx.body;
    let system_id = AccountId::from_address(&body.recipient);
    let mut system_storage = bs.get_storage(sdb, &system_id);

    match governance::execute_governance(
        &mut sender,
        &sender_id,
        &body.recipient,
        body.amount,
        &body.payload,
        &mut system_storage,
    ) {
        Err(e) => {
            tracing::warn!(tx = %tx.hash(), err = %e, "governance tx error");
            Err(TxError::Governance(e))
        }
        Ok(()) => {
            sender.nonce = body.nonce;
            bs.put_account(sender_id, sender);

            if !bs.has_account(sdb, &system_id) {
                bs.put_account(system_id, AccountState::default());
            }
            bs.stage_storage(system_id, system_storage);
            bs.add_receipt(Receipt::new(system_id, STATUS_SUCCESS, ""));
            Ok(())
        }
    }
}

/// Credit the fees accumulated during block execution to the coinbase
/// account. Skipped when there is nothing to pay or nobody to pay it to.
pub fn send_reward_coinbase(sdb: &StateDb, bs: &mut BlockState, coinbase: &Address) {
    if bs.bp_reward == 0 || coinbase.is_empty() {
        tracing::debug!(reward = bs.bp_reward, "coinbase is skipped");
        return;
    }

    let id = AccountId::from_address(coinbase);
    let mut state = bs.get_account(sdb, &id);
    state.balance += bs.bp_reward;
    tracing::debug!(reward = bs.bp_reward, balance = state.balance, "send reward to coinbase account");
    bs.put_account(id, state);
}

#[cfg(test)]
mod tests {
    use super::*;
    use meridian_engine::{governance::GovernanceOp, KvVm, VmCall};
    use meridian_types::{Genesis, TxBody};

    fn id(name: &str) -> AccountId {
        AccountId::from_address(&Address::from_name(name))
    }

    fn funded_sdb(name: &str, balance: u64) -> StateDb {
        let mut sdb = StateDb::new();
        sdb.init_genesis(&Genesis::new(0).with_balance(Address::from_name(name), balance));
        sdb
    }

    fn tx(nonce: u64, from: &str, to: Option<&str>, amount: u64, payload: Vec<u8>, tx_type: TxType) -> SignedTx {
        SignedTx::new(TxBody {
            nonce,
            account: Address::from_name(from),
            recipient: to.map(Address::from_name).unwrap_or_default(),
            amount,
            payload,
            tx_type,
            sign: vec![1],
        })
    }

    #[test]
    fn test_transfer_moves_amount_and_fee() {
        let sdb = funded_sdb("alice", COINBASE_FEE + 100);
        let vm = KvVm::new();
        let mut bs = BlockState::new(sdb.root());

        execute_tx(&sdb, &vm, &mut bs, &tx(1, "alice", Some("bob"), 30, vec![], TxType::Normal), 1, 0)
            .expect("execute");

        assert_eq!(bs.get_account(&sdb, &id("alice")).balance, 70);
        assert_eq!(bs.get_account(&sdb, &id("alice")).nonce, 1);
        assert_eq!(bs.get_account(&sdb, &id("bob")).balance, 30);
        assert_eq!(bs.bp_reward, COINBASE_FEE);
        assert_eq!(bs.receipts().len(), 1);
        assert_eq!(bs.receipts()[0].status, STATUS_SUCCESS);
    }

    #[test]
    fn test_nonce_must_follow_sender() {
        let sdb = funded_sdb("alice", COINBASE_FEE + 100);
        let vm = KvVm::new();
        let mut bs = BlockState::new(sdb.root());

        let err = execute_tx(&sdb, &vm, &mut bs, &tx(2, "alice", Some("bob"), 1, vec![], TxType::Normal), 1, 0)
            .unwrap_err();
        assert!(matches!(err, TxError::InvalidNonce { expected: 1, got: 2 }));
    }

    #[test]
    fn test_balance_must_cover_amount_plus_fee() {
        let sdb = funded_sdb("alice", 50);
        let vm = KvVm::new();
        let mut bs = BlockState::new(sdb.root());

        let err = execute_tx(&sdb, &vm, &mut bs, &tx(1, "alice", Some("bob"), 10, vec![], TxType::Normal), 1, 0)
            .unwrap_err();
        assert!(matches!(err, TxError::InsufficientBalance { balance: 50, .. }));
        assert!(bs.receipts().is_empty());
    }

    #[test]
    fn test_self_send_is_rejected() {
        let sdb = funded_sdb("alice", COINBASE_FEE + 100);
        let vm = KvVm::new();
        let mut bs = BlockState::new(sdb.root());

        let err = execute_tx(&sdb, &vm, &mut bs, &tx(1, "alice", Some("alice"), 1, vec![], TxType::Normal), 1, 0)
            .unwrap_err();
        assert!(matches!(err, TxError::InvalidRecipient(_)));
    }

    #[test]
    fn test_vm_error_is_absorbed_into_receipt() {
        let mut sdb = StateDb::new();
        sdb.init_genesis(
            &Genesis::new(0)
                .with_balance(Address::from_name("alice"), 2 * COINBASE_FEE + 100)
                .with_balance(Address::from_name("c"), 0),
        );
        let vm = KvVm::new();

        // Deploy a contract at "c"'s account by hand so the call targets a
        // contract.
        let mut bs = BlockState::new(sdb.root());
        let mut contract = bs.get_account(&sdb, &id("c"));
        contract.code_hash = Some(Hash::digest(b"code"));
        bs.put_account(id("c"), contract);

        let failing = tx(
            1,
            "alice",
            Some("c"),
            10,
            VmCall::new("fail", vec!["boom".into()]).to_bytes(),
            TxType::Normal,
        );
        execute_tx(&sdb, &vm, &mut bs, &failing, 1, 0).expect("absorbed");

        let alice = bs.get_account(&sdb, &id("alice"));
        // Fee charged, amount returned, nonce advanced.
        assert_eq!(alice.balance, COINBASE_FEE + 100);
        assert_eq!(alice.nonce, 1);
        assert_eq!(bs.get_account(&sdb, &id("c")).balance, 0);
        assert_eq!(bs.bp_reward, COINBASE_FEE);
        assert_eq!(bs.receipts().len(), 1);
        assert_eq!(bs.receipts()[0].status, "boom");
    }

    #[test]
    fn test_contract_create_emits_created_receipt() {
        let sdb = funded_sdb("alice", COINBASE_FEE + 100);
        let vm = KvVm::new();
        let mut bs = BlockState::new(sdb.root());

        let deploy = tx(
            1,
            "alice",
            None,
            5,
            VmCall::new("init", vec!["hello".into()]).to_bytes(),
            TxType::Normal,
        );
        execute_tx(&sdb, &vm, &mut bs, &deploy, 1, 0).expect("deploy");

        assert_eq!(bs.receipts().len(), 1);
        assert_eq!(bs.receipts()[0].status, STATUS_CREATED);

        let contract_addr = Address::contract(&Address::from_name("alice"), 1);
        let contract_id = AccountId::from_address(&contract_addr);
        let contract = bs.get_account(&sdb, &contract_id);
        assert!(contract.is_contract());
        assert_eq!(contract.balance, 5);
    }

    #[test]
    fn test_governance_stake_pays_no_fee() {
        let sdb = funded_sdb("alice", 100);
        let vm = KvVm::new();
        let mut bs = BlockState::new(sdb.root());

        let stake = SignedTx::new(TxBody {
            nonce: 1,
            account: Address::from_name("alice"),
            recipient: governance::system_address(),
            amount: 40,
            payload: GovernanceOp::Stake.to_bytes(),
            tx_type: TxType::Governance,
            sign: vec![1],
        });
        execute_tx(&sdb, &vm, &mut bs, &stake, 1, 0).expect("stake");

        assert_eq!(bs.get_account(&sdb, &id("alice")).balance, 60);
        assert_eq!(bs.bp_reward, 0);
        let system_id = AccountId::from_address(&governance::system_address());
        assert_eq!(governance::staked_amount(&bs.get_storage(&sdb, &system_id), &id("alice")), 40);
    }

    #[test]
    fn test_coinbase_reward_credits_producer() {
        let sdb = funded_sdb("alice", COINBASE_FEE + 100);
        let mut bs = BlockState::new(sdb.root());
        bs.bp_reward = 7;

        send_reward_coinbase(&sdb, &mut bs, &Address::from_name("bp"));
        assert_eq!(bs.get_account(&sdb, &id("bp")).balance, 7);

        // Nothing to pay: no account is touched.
        let mut empty = BlockState::new(sdb.root());
        send_reward_coinbase(&sdb, &mut empty, &Address::from_name("bp"));
        assert!(!empty.has_account(&sdb, &id("bp")));
    }
}
