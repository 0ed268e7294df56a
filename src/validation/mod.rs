// Copyright (c) 2024 The Latticecoin Core developers
// Licensed under the Apache License, Version 2.0 see LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0 or the MIT license, see
// LICENSE-MIT or http://opensource.org/licenses/MIT

//! Header, block, transaction and coinbase validation pipelines. Validation
//! is straight-line: each check either passes or returns its error; no state
//! is committed on failure.

use crate::chain::backend::KvStore;
use crate::chain::ChainConfig;
use crate::consensus::{
    mining_reward, total_reward, Target, BLOCK_TIMESTAMP_DRIFT_MS, COINBASE_LOCKUP_PERIOD_MS,
    MAX_GAS_PER_BLOCK, MAX_GAS_PER_TX, MAX_TXS_PER_BLOCK, MINIMAL_GAS, MINIMAL_GAS_PRICE,
};
use crate::primitives::{
    AssetOutputRef, Block, BlockHeader, ChainIndex, CoinbaseData, LockupScript, TokenId,
    Transaction, TxOutput, TxOutputRef, U256,
};
use crate::state::WorldStateCached;
use crate::vm::{
    non_coinbase_execution_order, Balances, BlockEnv, ExeFailure, ResolvedInput, Runner, TxEnv,
};
use std::collections::{HashMap, HashSet};

/// Block rejection reasons. Tier two of the error model: the block is
/// dropped, the peer penalized, nothing committed.
#[derive(Clone, PartialEq, Eq, Debug)]
pub enum InvalidBlock {
    InvalidGroup,
    EmptyTransactionList,
    TooManyTransactions,
    TxGasPriceNonDecreasing,
    TooManyGasUsed,
    InvalidTxsMerkleRoot,
    InvalidFlowTxs,
    InvalidCoinbaseFormat,
    InvalidCoinbaseData,
    InvalidCoinbaseReward,
    InvalidCoinbaseLockedAmount,
    InvalidCoinbaseLockupPeriod,
    BlockDoubleSpending,
    ExistInvalidTx(InvalidTx),
    InvalidDeps,
    InvalidPoW,
    InvalidTarget,
    InvalidTimestamp,
    InvalidDepStateHash,
}

/// Transaction rejection reasons, surfaced through
/// [`InvalidBlock::ExistInvalidTx`].
#[derive(Clone, PartialEq, Eq, Debug)]
pub enum InvalidTx {
    InvalidNetworkId,
    InvalidGas,
    ScriptNotAllowed,
    InputNotFound,
    InvalidUnlockScript,
    InvalidSignature,
    TimeLockNotSatisfied,
    InvalidAmount,
    InvalidTokenAmount,
    GeneratedOutputsMismatch,
    ContractInputsMismatch,
    TxScriptExeFailed(ExeFailure),
}

/// Validate a header against its chain context: declared target, proof of
/// work, and timestamp sanity.
pub fn check_header(
    header: &BlockHeader,
    expected_target: Target,
    parent_ts: u64,
    now_ms: u64,
) -> Result<(), InvalidBlock> {
    match header.target() {
        Some(target) if target.to_compact() == expected_target.to_compact() => {}
        _ => return Err(InvalidBlock::InvalidTarget),
    }
    if !header.pow_checked() {
        return Err(InvalidBlock::InvalidPoW);
    }
    if header.timestamp <= parent_ts
        || header.timestamp > now_ms.saturating_add(BLOCK_TIMESTAMP_DRIFT_MS)
    {
        return Err(InvalidBlock::InvalidTimestamp);
    }
    Ok(())
}

/// Full block pipeline, run once the header and flow deps passed. Mutates
/// `view` with the block's ledger effects; on error the caller discards the
/// view.
pub fn check_block<S: KvStore>(
    block: &Block,
    chain_index: ChainIndex,
    config: &ChainConfig,
    view: &mut WorldStateCached<S>,
    flow_spent: &HashSet<TxOutputRef>,
    height: u64,
) -> Result<(), InvalidBlock> {
    // 1. The chain must fall in this broker's slice of the grid.
    if !chain_index.is_valid(config.groups()) || !config.contains_chain(chain_index) {
        return Err(InvalidBlock::InvalidGroup);
    }

    // 2. At least a coinbase.
    if block.transactions.is_empty() {
        return Err(InvalidBlock::EmptyTransactionList);
    }

    // 3. Bounded transaction count.
    if block.transactions.len() > MAX_TXS_PER_BLOCK {
        return Err(InvalidBlock::TooManyTransactions);
    }

    // 4. Gas prices non-increasing, first to last, coinbase excluded.
    let non_coinbase = block.non_coinbase();
    for pair in non_coinbase.windows(2) {
        if pair[1].unsigned.gas_price > pair[0].unsigned.gas_price {
            return Err(InvalidBlock::TxGasPriceNonDecreasing);
        }
    }

    // 5. Bounded total gas.
    let total_gas: u64 = block
        .transactions
        .iter()
        .map(|tx| tx.unsigned.gas_amount)
        .sum();
    if total_gas > MAX_GAS_PER_BLOCK {
        return Err(InvalidBlock::TooManyGasUsed);
    }

    // 6. The header commits to the transaction list.
    let merkle = block.compute_txs_hash(config.get_chain_key(chain_index));
    if merkle != block.header.txs_hash {
        return Err(InvalidBlock::InvalidTxsMerkleRoot);
    }

    // 7. Double-spend free, within the block and across the flow.
    let mut seen: HashSet<TxOutputRef> = HashSet::new();
    for tx in &block.transactions {
        for spent in tx.spent_refs() {
            if flow_spent.contains(&spent) {
                return Err(InvalidBlock::InvalidFlowTxs);
            }
            if !seen.insert(spent) {
                return Err(InvalidBlock::BlockDoubleSpending);
            }
        }
    }

    // 8. Transaction semantics, in the deterministic pseudo-random order;
    // the coinbase last, once the collected fee is known.
    let block_env = BlockEnv {
        timestamp: block.header.timestamp,
        bits: block.header.bits,
        network_id: config.network_id(),
    };

    let order = non_coinbase_execution_order(&block.header.exec_seed(), non_coinbase.len());
    let mut gas_fee = U256::zero();
    for idx in order {
        let tx = &non_coinbase[idx];
        let fee = check_tx(tx, chain_index, config, view, &block_env)
            .map_err(InvalidBlock::ExistInvalidTx)?;
        gas_fee = gas_fee.wrapping_add(fee);
    }

    check_coinbase(block, chain_index, gas_fee, height)?;
    apply_outputs(block.coinbase().expect("non-empty"), chain_index, config, view)
        .map_err(InvalidBlock::ExistInvalidTx)?;
    Ok(())
}

/// Validate one non-coinbase transaction against the group view and fold
/// its effects in. Returns the gas fee it pays.
pub fn check_tx<S: KvStore>(
    tx: &Transaction,
    chain_index: ChainIndex,
    config: &ChainConfig,
    view: &mut WorldStateCached<S>,
    block_env: &BlockEnv,
) -> Result<U256, InvalidTx> {
    if tx.unsigned.network_id != config.network_id() {
        return Err(InvalidTx::InvalidNetworkId);
    }
    if tx.unsigned.gas_amount < MINIMAL_GAS
        || tx.unsigned.gas_amount > MAX_GAS_PER_TX
        || tx.unsigned.gas_price < MINIMAL_GAS_PRICE
    {
        return Err(InvalidTx::InvalidGas);
    }
    // Contract execution lives on the intra-group chains; cross-group
    // transactions move plain assets only.
    if tx.unsigned.script.is_some() && !chain_index.is_intra_group() {
        return Err(InvalidTx::ScriptNotAllowed);
    }

    // Resolve inputs, verifying unlock scripts and time locks.
    let mut resolved = Vec::with_capacity(tx.unsigned.inputs.len());
    let mut ins_alf = U256::zero();
    let mut ins_tokens: HashMap<TokenId, U256> = HashMap::new();
    for input in &tx.unsigned.inputs {
        let output = view
            .get_asset(&input.output_ref)
            .map_err(|_| InvalidTx::InputNotFound)?
            .ok_or(InvalidTx::InputNotFound)?;
        if !input.unlock.unlocks(&output.lockup) {
            return Err(InvalidTx::InvalidUnlockScript);
        }
        if !output.unlocked_at(block_env.timestamp) {
            return Err(InvalidTx::TimeLockNotSatisfied);
        }
        ins_alf = ins_alf.wrapping_add(output.amount);
        for (token, amount) in &output.tokens {
            let entry = ins_tokens.entry(*token).or_default();
            *entry = entry.wrapping_add(*amount);
        }
        resolved.push(ResolvedInput {
            lockup: output.lockup,
            output,
        });
    }

    if !tx.signatures_valid() {
        return Err(InvalidTx::InvalidSignature);
    }

    let gas_fee = tx.gas_fee();

    // Run the VM when a script is attached; a script-free transaction must
    // not claim generated outputs or contract inputs.
    match &tx.unsigned.script {
        Some(script) => {
            let tx_env = TxEnv {
                tx_id: *tx.hash().expect("tx hash computed"),
                inputs: resolved.clone(),
                gas_budget: tx.unsigned.gas_amount,
            };
            let entry_balance = script_entry_balance(&resolved, &tx.unsigned.fixed_outputs, gas_fee)
                .ok_or(InvalidTx::InvalidAmount)?;
            let outcome = Runner::new(view, block_env, &tx_env, script, entry_balance)
                .run()
                .map_err(InvalidTx::TxScriptExeFailed)?;
            if outcome.generated_outputs != tx.generated_outputs {
                return Err(InvalidTx::GeneratedOutputsMismatch);
            }
            if outcome.contract_inputs != tx.contract_inputs {
                return Err(InvalidTx::ContractInputsMismatch);
            }
        }
        None => {
            if !tx.generated_outputs.is_empty() {
                return Err(InvalidTx::GeneratedOutputsMismatch);
            }
            if !tx.contract_inputs.is_empty() {
                return Err(InvalidTx::ContractInputsMismatch);
            }
        }
    }

    // Input sums must cover output sums plus the gas fee; per token, inputs
    // cover outputs.
    let outs_alf = tx.output_amount();
    let need = outs_alf.checked_add(gas_fee).ok_or(InvalidTx::InvalidAmount)?;
    if ins_alf < need {
        return Err(InvalidTx::InvalidAmount);
    }
    for (token, out_amount) in tx.output_tokens() {
        if ins_tokens.get(&token).copied().unwrap_or_default() < out_amount {
            return Err(InvalidTx::InvalidTokenAmount);
        }
    }

    // Fold the surface effects into the view.
    for input in &tx.unsigned.inputs {
        view.remove_asset(&input.output_ref);
    }
    apply_outputs(tx, chain_index, config, view)?;

    Ok(gas_fee)
}

/// Insert a transaction's asset outputs that belong to the view's group.
pub(crate) fn apply_outputs<S: KvStore>(
    tx: &Transaction,
    chain_index: ChainIndex,
    config: &ChainConfig,
    view: &mut WorldStateCached<S>,
) -> Result<(), InvalidTx> {
    let groups = config.groups();
    let tx_id = *tx.hash().expect("tx hash computed");
    for (r, output) in tx.fixed_output_refs() {
        if output.lockup.group_index(groups) == chain_index.from {
            view.put_asset(&r, output)
                .map_err(|_| InvalidTx::InvalidAmount)?;
        }
    }
    let base = tx.generated_output_base();
    for (i, output) in tx.generated_outputs.iter().enumerate() {
        if let TxOutput::Asset(output) = output {
            if output.lockup.group_index(groups) == chain_index.from {
                let r = AssetOutputRef::new(&output.lockup, &tx_id, base + i as u32);
                view.put_asset(&r, output)
                    .map_err(|_| InvalidTx::InvalidAmount)?;
            }
        }
    }
    Ok(())
}

/// What the entry frame of a script may spend: the inputs minus the fixed
/// outputs and the gas fee, deducted greedily in input order. `None` when
/// the inputs cannot cover both.
fn script_entry_balance(
    inputs: &[ResolvedInput],
    fixed_outputs: &[crate::primitives::AssetOutput],
    gas_fee: U256,
) -> Option<Balances> {
    let mut alf: Vec<(LockupScript, U256)> = vec![];
    let mut tokens: Vec<(LockupScript, TokenId, U256)> = vec![];
    for input in inputs {
        if let Some((_, v)) = alf.iter_mut().find(|(l, _)| l == &input.lockup) {
            *v = v.checked_add(input.output.amount)?;
        } else {
            alf.push((input.lockup, input.output.amount));
        }
        for (token, amount) in &input.output.tokens {
            if let Some((_, _, v)) = tokens
                .iter_mut()
                .find(|(l, t, _)| l == &input.lockup && t == token)
            {
                *v = v.checked_add(*amount)?;
            } else {
                tokens.push((input.lockup, *token, *amount));
            }
        }
    }

    let mut deduct_alf = gas_fee;
    for out in fixed_outputs {
        deduct_alf = deduct_alf.checked_add(out.amount)?;
    }
    for (_, v) in alf.iter_mut() {
        let take = std::cmp::min(*v, deduct_alf);
        *v = v.checked_sub(take)?;
        deduct_alf = deduct_alf.checked_sub(take)?;
    }
    if !deduct_alf.is_zero() {
        return None;
    }

    for out in fixed_outputs {
        for (token, amount) in &out.tokens {
            let mut deduct = *amount;
            for (_, t, v) in tokens.iter_mut() {
                if t == token {
                    let take = std::cmp::min(*v, deduct);
                    *v = v.checked_sub(take)?;
                    deduct = deduct.checked_sub(take)?;
                }
            }
            if !deduct.is_zero() {
                return None;
            }
        }
    }

    let mut out = Balances::new();
    for (lockup, amount) in alf {
        out.add_alf(&lockup, amount).ok()?;
    }
    for (lockup, token, amount) in tokens {
        out.add_token(&lockup, &token, amount).ok()?;
    }
    Some(out)
}

/// The coinbase contract: exactly one coinbase at the tail, deterministic
/// shape, reward and lockup rules.
pub fn check_coinbase(
    block: &Block,
    chain_index: ChainIndex,
    gas_fee: U256,
    height: u64,
) -> Result<(), InvalidBlock> {
    let cb = block
        .coinbase()
        .ok_or(InvalidBlock::EmptyTransactionList)?;

    // Format: no script, minimal declared gas, no inputs or extras, one
    // output (PoW) or two (PoLW), no tokens anywhere.
    let u = &cb.unsigned;
    if u.script.is_some()
        || u.gas_amount != MINIMAL_GAS
        || u.gas_price != MINIMAL_GAS_PRICE
        || !u.inputs.is_empty()
        || !cb.contract_inputs.is_empty()
        || !cb.generated_outputs.is_empty()
        || !cb.input_signatures.is_empty()
        || !cb.contract_signatures.is_empty()
        || u.fixed_outputs.is_empty()
        || u.fixed_outputs.len() > 2
        || u.fixed_outputs.iter().any(|o| !o.tokens.is_empty())
    {
        return Err(InvalidBlock::InvalidCoinbaseFormat);
    }

    // Data: the first output binds the chain index and timestamp.
    let miner_output = &u.fixed_outputs[0];
    let data = CoinbaseData::from_bytes(&miner_output.additional_data)
        .map_err(|_| InvalidBlock::InvalidCoinbaseData)?;
    if data.from_group != chain_index.from
        || data.to_group != chain_index.to
        || data.block_ts != block.header.timestamp
    {
        return Err(InvalidBlock::InvalidCoinbaseData);
    }

    // Reward: outputs sum to the declared total, capped.
    let expected = total_reward(gas_fee, mining_reward(height));
    let total: U256 = u
        .fixed_outputs
        .iter()
        .fold(U256::zero(), |acc, o| acc.wrapping_add(o.amount));
    if total != expected {
        return Err(InvalidBlock::InvalidCoinbaseReward);
    }

    // Locked amount: the miner output carries the time lock; a burn output
    // is unlocked and pays the sink.
    if miner_output.lock_time.is_none() {
        return Err(InvalidBlock::InvalidCoinbaseLockedAmount);
    }
    if let Some(burn_output) = u.fixed_outputs.get(1) {
        if burn_output.lock_time.is_some() || burn_output.lockup != LockupScript::burn() {
            return Err(InvalidBlock::InvalidCoinbaseLockedAmount);
        }
    }

    // Lockup period: timestamp plus the configured period, exactly.
    if miner_output.lock_time != Some(block.header.timestamp + COINBASE_LOCKUP_PERIOD_MS) {
        return Err(InvalidBlock::InvalidCoinbaseLockupPeriod);
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::backend::MemoryKv;
    use crate::consensus::INITIAL_BLOCK_REWARD;
    use crate::primitives::{
        AssetOutput, BlockDeps, Hash256, Signature, TxInput, UnlockScript, UnsignedTx,
    };
    use crate::state::WorldState;
    use crate::vm::Script;

    const GROUPS: u16 = 2;

    fn config() -> ChainConfig {
        ChainConfig::new("testnet", 0, GROUPS, 1, 0)
    }

    fn view() -> WorldStateCached<MemoryKv> {
        WorldState::new(MemoryKv::new(), Hash256::zero()).cached()
    }

    fn block_env() -> BlockEnv {
        BlockEnv {
            timestamp: 1_000_000,
            bits: Target::max_mining_target().to_compact(),
            network_id: 0,
        }
    }

    fn coinbase_block(chain_index: ChainIndex, mutate: impl FnOnce(&mut Transaction)) -> Block {
        let mut cb = Transaction::coinbase(
            chain_index,
            LockupScript::P2pkh(Hash256::hash_from_slice("miner", "test")),
            total_reward(U256::zero(), mining_reward(1)),
            1_000_000,
            0,
        );
        mutate(&mut cb);
        cb.compute_hash();

        let mut header = BlockHeader {
            version: 0,
            deps: BlockDeps::genesis(GROUPS),
            dep_state_hash: Hash256::zero(),
            txs_hash: Hash256::zero(),
            timestamp: 1_000_000,
            bits: Target::max_mining_target().to_compact(),
            nonce: 0,
            hash: None,
        };
        let block = Block::new(header.clone(), vec![cb]);
        header.txs_hash = block.compute_txs_hash(config().get_chain_key(chain_index));
        header.compute_hash(&config().header_key());
        Block::new(header, block.transactions)
    }

    fn run_check(block: &Block, chain_index: ChainIndex) -> Result<(), InvalidBlock> {
        let mut v = view();
        check_block(
            block,
            chain_index,
            &config(),
            &mut v,
            &HashSet::new(),
            1,
        )
    }

    #[test]
    fn valid_coinbase_only_block_passes() {
        let chain_index = ChainIndex::new(0, 0);
        let block = coinbase_block(chain_index, |_| {});
        assert_eq!(run_check(&block, chain_index), Ok(()));
    }

    #[test]
    fn coinbase_with_wrong_gas_price_is_invalid_format() {
        let chain_index = ChainIndex::new(0, 0);
        let block = coinbase_block(chain_index, |cb| {
            cb.unsigned.gas_price = MINIMAL_GAS_PRICE + 1;
        });
        assert_eq!(
            run_check(&block, chain_index),
            Err(InvalidBlock::InvalidCoinbaseFormat)
        );
    }

    #[test]
    fn coinbase_with_wrong_group_data_is_invalid_data() {
        let chain_index = ChainIndex::new(0, 0);
        let block = coinbase_block(chain_index, |cb| {
            let mut data =
                CoinbaseData::from_bytes(&cb.unsigned.fixed_outputs[0].additional_data).unwrap();
            data.from_group += 1;
            cb.unsigned.fixed_outputs[0].additional_data = data.to_bytes();
        });
        assert_eq!(
            run_check(&block, chain_index),
            Err(InvalidBlock::InvalidCoinbaseData)
        );
    }

    #[test]
    fn coinbase_with_wrong_reward_is_invalid_reward() {
        let chain_index = ChainIndex::new(0, 0);
        let block = coinbase_block(chain_index, |cb| {
            cb.unsigned.fixed_outputs[0].amount = U256::from_u64(INITIAL_BLOCK_REWARD * 10);
        });
        assert_eq!(
            run_check(&block, chain_index),
            Err(InvalidBlock::InvalidCoinbaseReward)
        );
    }

    #[test]
    fn unlocked_coinbase_output_is_rejected() {
        let chain_index = ChainIndex::new(0, 0);
        let block = coinbase_block(chain_index, |cb| {
            cb.unsigned.fixed_outputs[0].lock_time = None;
        });
        assert_eq!(
            run_check(&block, chain_index),
            Err(InvalidBlock::InvalidCoinbaseLockedAmount)
        );
    }

    #[test]
    fn coinbase_with_wrong_lockup_period_is_rejected() {
        let chain_index = ChainIndex::new(0, 0);
        let block = coinbase_block(chain_index, |cb| {
            cb.unsigned.fixed_outputs[0].lock_time = Some(1);
        });
        assert_eq!(
            run_check(&block, chain_index),
            Err(InvalidBlock::InvalidCoinbaseLockupPeriod)
        );
    }

    #[test]
    fn empty_block_is_rejected() {
        let chain_index = ChainIndex::new(0, 0);
        let mut block = coinbase_block(chain_index, |_| {});
        block.transactions.clear();
        assert_eq!(
            run_check(&block, chain_index),
            Err(InvalidBlock::EmptyTransactionList)
        );
    }

    #[test]
    fn wrong_merkle_root_is_rejected() {
        let chain_index = ChainIndex::new(0, 0);
        let mut block = coinbase_block(chain_index, |_| {});
        block.header.txs_hash = Hash256::hash_from_slice("bogus", "test");
        assert_eq!(
            run_check(&block, chain_index),
            Err(InvalidBlock::InvalidTxsMerkleRoot)
        );
    }

    fn spend_tx(output_ref: AssetOutputRef, gas_price: u64) -> Transaction {
        // An unsigned spend; signature checks are covered separately.
        Transaction::from_unsigned(UnsignedTx {
            network_id: 0,
            script: None,
            gas_amount: MINIMAL_GAS,
            gas_price,
            inputs: vec![TxInput {
                output_ref,
                unlock: UnlockScript::P2pkh(crate::primitives::PublicKey::zero()),
            }],
            fixed_outputs: vec![],
        })
    }

    #[test]
    fn double_spend_within_block_is_rejected() {
        let chain_index = ChainIndex::new(0, 0);
        let shared = AssetOutputRef::new(
            &LockupScript::P2pkh(Hash256::hash_from_slice("o", "test")),
            &Hash256::hash_from_slice("tx0", "test"),
            0,
        );
        let tx_a = spend_tx(shared, MINIMAL_GAS_PRICE + 1);
        let tx_b = spend_tx(shared, MINIMAL_GAS_PRICE);

        let mut block = coinbase_block(chain_index, |_| {});
        let cb = block.transactions.pop().unwrap();
        block.transactions = vec![tx_a, tx_b, cb];
        block.header.txs_hash = block.compute_txs_hash(config().get_chain_key(chain_index));
        block.header.hash = None;
        block.header.compute_hash(&config().header_key());

        assert_eq!(
            run_check(&block, chain_index),
            Err(InvalidBlock::BlockDoubleSpending)
        );
    }

    #[test]
    fn flow_spent_input_is_invalid_flow() {
        let chain_index = ChainIndex::new(0, 0);
        let shared = AssetOutputRef::new(
            &LockupScript::P2pkh(Hash256::hash_from_slice("o", "test")),
            &Hash256::hash_from_slice("tx0", "test"),
            0,
        );
        let tx = spend_tx(shared, MINIMAL_GAS_PRICE);

        let mut block = coinbase_block(chain_index, |_| {});
        let cb = block.transactions.pop().unwrap();
        block.transactions = vec![tx, cb];
        block.header.txs_hash = block.compute_txs_hash(config().get_chain_key(chain_index));
        block.header.hash = None;
        block.header.compute_hash(&config().header_key());

        let mut v = view();
        let mut flow_spent = HashSet::new();
        flow_spent.insert(TxOutputRef::Asset(shared));
        assert_eq!(
            check_block(&block, chain_index, &config(), &mut v, &flow_spent, 1),
            Err(InvalidBlock::InvalidFlowTxs)
        );
    }

    #[test]
    fn gas_price_must_be_non_increasing() {
        let chain_index = ChainIndex::new(0, 0);
        let ref_a = AssetOutputRef::new(
            &LockupScript::P2pkh(Hash256::hash_from_slice("a", "test")),
            &Hash256::hash_from_slice("tx-a", "test"),
            0,
        );
        let ref_b = AssetOutputRef::new(
            &LockupScript::P2pkh(Hash256::hash_from_slice("b", "test")),
            &Hash256::hash_from_slice("tx-b", "test"),
            0,
        );
        let tx_a = spend_tx(ref_a, MINIMAL_GAS_PRICE);
        let tx_b = spend_tx(ref_b, MINIMAL_GAS_PRICE + 1);

        let mut block = coinbase_block(chain_index, |_| {});
        let cb = block.transactions.pop().unwrap();
        block.transactions = vec![tx_a, tx_b, cb];
        block.header.txs_hash = block.compute_txs_hash(config().get_chain_key(chain_index));
        block.header.hash = None;
        block.header.compute_hash(&config().header_key());

        assert_eq!(
            run_check(&block, chain_index),
            Err(InvalidBlock::TxGasPriceNonDecreasing)
        );
    }

    #[test]
    fn missing_input_is_exist_invalid_tx() {
        let chain_index = ChainIndex::new(0, 0);
        let missing = AssetOutputRef::new(
            &LockupScript::P2pkh(Hash256::hash_from_slice("a", "test")),
            &Hash256::hash_from_slice("tx-a", "test"),
            0,
        );
        let tx = spend_tx(missing, MINIMAL_GAS_PRICE);

        let mut block = coinbase_block(chain_index, |_| {});
        let cb = block.transactions.pop().unwrap();
        block.transactions = vec![tx, cb];
        block.header.txs_hash = block.compute_txs_hash(config().get_chain_key(chain_index));
        block.header.hash = None;
        block.header.compute_hash(&config().header_key());

        assert_eq!(
            run_check(&block, chain_index),
            Err(InvalidBlock::ExistInvalidTx(InvalidTx::InputNotFound))
        );
    }

    #[test]
    fn check_tx_verifies_signatures() {
        use k256::ecdsa::signature::hazmat::PrehashSigner;
        use k256::ecdsa::SigningKey;
        use k256::elliptic_curve::sec1::ToEncodedPoint;
        use rand::rngs::OsRng;

        let chain_index = ChainIndex::new(0, 0);
        let sk = SigningKey::random(&mut OsRng);
        let mut pk_bytes = [0u8; 33];
        pk_bytes.copy_from_slice(sk.verifying_key().to_encoded_point(true).as_bytes());
        let pk = crate::primitives::PublicKey(pk_bytes);
        let lockup = LockupScript::p2pkh(&pk);

        // Seed the view with an output owned by the key. Group 0 ownership
        // is not guaranteed by the key, so place it by hand.
        let output = AssetOutput::plain(U256::from_u64(MINIMAL_GAS * MINIMAL_GAS_PRICE * 2), lockup);
        let output_ref = AssetOutputRef::new(&lockup, &Hash256::hash_from_slice("seed", "test"), 0);
        let mut v = view();
        v.put_asset(&output_ref, &output).unwrap();

        let mut tx = Transaction::from_unsigned(UnsignedTx {
            network_id: 0,
            script: None,
            gas_amount: MINIMAL_GAS,
            gas_price: MINIMAL_GAS_PRICE,
            inputs: vec![TxInput {
                output_ref,
                unlock: UnlockScript::P2pkh(pk),
            }],
            fixed_outputs: vec![],
        });

        // Unsigned fails the signature check.
        tx.input_signatures = vec![Signature::zero()];
        assert_eq!(
            check_tx(&tx, chain_index, &config(), &mut v, &block_env()),
            Err(InvalidTx::InvalidSignature)
        );

        // Properly signed passes and pays its fee.
        let sig: k256::ecdsa::Signature = sk.sign_prehash(tx.hash().unwrap().as_bytes()).unwrap();
        let mut sig_bytes = [0u8; 64];
        sig_bytes.copy_from_slice(&sig.to_bytes());
        tx.input_signatures = vec![Signature(sig_bytes)];
        let fee = check_tx(&tx, chain_index, &config(), &mut v, &block_env()).unwrap();
        assert_eq!(fee, tx.gas_fee());
        // The input is now spent in the view.
        assert!(v.get_asset(&output_ref).unwrap().is_none());
    }

    #[test]
    fn script_failure_surfaces_as_exe_failed() {
        use k256::ecdsa::signature::hazmat::PrehashSigner;
        use k256::ecdsa::SigningKey;
        use k256::elliptic_curve::sec1::ToEncodedPoint;
        use rand::rngs::OsRng;

        let chain_index = ChainIndex::new(0, 0);
        let sk = SigningKey::random(&mut OsRng);
        let mut pk_bytes = [0u8; 33];
        pk_bytes.copy_from_slice(sk.verifying_key().to_encoded_point(true).as_bytes());
        let pk = crate::primitives::PublicKey(pk_bytes);
        let lockup = LockupScript::p2pkh(&pk);

        let output = AssetOutput::plain(U256::from_u64(MINIMAL_GAS * MINIMAL_GAS_PRICE * 2), lockup);
        let output_ref = AssetOutputRef::new(&lockup, &Hash256::hash_from_slice("seed", "test"), 0);
        let mut v = view();
        v.put_asset(&output_ref, &output).unwrap();

        let mut tx = Transaction::from_unsigned(UnsignedTx {
            network_id: 0,
            script: Some(Script::single(vec![
                crate::vm::Instr::ConstFalse,
                crate::vm::Instr::Assert,
            ])),
            gas_amount: MINIMAL_GAS,
            gas_price: MINIMAL_GAS_PRICE,
            inputs: vec![TxInput {
                output_ref,
                unlock: UnlockScript::P2pkh(pk),
            }],
            fixed_outputs: vec![],
        });
        let sig: k256::ecdsa::Signature = sk.sign_prehash(tx.hash().unwrap().as_bytes()).unwrap();
        let mut sig_bytes = [0u8; 64];
        sig_bytes.copy_from_slice(&sig.to_bytes());
        tx.input_signatures = vec![Signature(sig_bytes)];

        assert_eq!(
            check_tx(&tx, chain_index, &config(), &mut v, &block_env()),
            Err(InvalidTx::TxScriptExeFailed(ExeFailure::AssertionFailed))
        );
    }
}
