// Copyright (c) 2024 The Latticecoin Core developers
// Licensed under the Apache License, Version 2.0 see LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0 or the MIT license, see
// LICENSE-MIT or http://opensource.org/licenses/MIT

use crate::chain::backend::KvStore;
use crate::consensus::{DUST_UTXO_AMOUNT, FRAME_STACK_MAX_SIZE, OPERAND_STACK_MAX_SIZE};
use crate::primitives::{
    AssetOutput, ContractId, ContractOutput, ContractOutputRef, Hash256, LockupScript, PublicKey,
    Signature, TxOutput, U256,
};
use crate::state::{ContractState, WorldStateCached};
use crate::vm::{
    BalanceState, Balances, Contract, ExeFailure, Frame, FrameObj, GasCounter, Instr, Method,
    Script, Val,
};
use blake2::digest::{Update, VariableOutput};
use blake2::Blake2bVar;
use ed25519_dalek::Verifier;
use sha2::Digest;
use std::collections::HashSet;

/// Block-level environment visible to scripts.
#[derive(Clone, Copy, Debug)]
pub struct BlockEnv {
    pub timestamp: u64,
    pub bits: u32,
    pub network_id: u8,
}

/// A transaction input resolved against the group view.
#[derive(Clone, Debug)]
pub struct ResolvedInput {
    pub lockup: LockupScript,
    pub output: AssetOutput,
}

/// Transaction-level environment visible to scripts.
#[derive(Clone, Debug)]
pub struct TxEnv {
    pub tx_id: Hash256,
    pub inputs: Vec<ResolvedInput>,
    pub gas_budget: u64,
}

/// Result of a successful script run. The world-state overlay passed to the
/// runner carries the contract mutations; outputs and consumed contract
/// refs are returned for the transaction envelope.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct ExecOutcome {
    pub generated_outputs: Vec<TxOutput>,
    pub contract_inputs: Vec<ContractOutputRef>,
    pub gas_remaining: u64,
}

/// The stateful VM: a stack machine over [`Val`]s executing one transaction
/// script against a copy-on-write world-state overlay. Execution is
/// synchronous; a run either completes, fails with an [`ExeFailure`], or is
/// aborted by deterministic gas exhaustion.
pub struct Runner<'a, S: KvStore> {
    world: &'a mut WorldStateCached<S>,
    block_env: &'a BlockEnv,
    tx_env: &'a TxEnv,
    script: &'a Script,
    entry_balance: Balances,
    gas: GasCounter,
    stack: Vec<Val>,
    frames: Vec<Frame>,
    payouts: Balances,
    generated: Vec<TxOutput>,
    contract_inputs: Vec<ContractOutputRef>,
    loaded_contracts: HashSet<ContractId>,
    destroyed_contracts: HashSet<ContractId>,
    output_counter: u32,
}

/// The asset pool handed to the entry frame: what the inputs carry minus
/// the fixed outputs and the gas fee, computed by validation.
pub fn entry_balance_from_inputs(inputs: &[ResolvedInput]) -> Result<Balances, ExeFailure> {
    let mut remaining = Balances::new();
    for input in inputs {
        remaining.add_alf(&input.lockup, input.output.amount)?;
        for (token, amount) in &input.output.tokens {
            remaining.add_token(&input.lockup, token, *amount)?;
        }
    }
    Ok(remaining)
}

impl<'a, S: KvStore> Runner<'a, S> {
    pub fn new(
        world: &'a mut WorldStateCached<S>,
        block_env: &'a BlockEnv,
        tx_env: &'a TxEnv,
        script: &'a Script,
        entry_balance: Balances,
    ) -> Self {
        Self {
            world,
            block_env,
            tx_env,
            script,
            entry_balance,
            gas: GasCounter::new(tx_env.gas_budget),
            stack: vec![],
            frames: vec![],
            payouts: Balances::new(),
            generated: vec![],
            contract_inputs: vec![],
            loaded_contracts: HashSet::new(),
            destroyed_contracts: HashSet::new(),
            output_counter: 0,
        }
    }

    /// Execute the script's entry method to completion.
    pub fn run(mut self) -> Result<ExecOutcome, ExeFailure> {
        let entry = self
            .script
            .methods
            .first()
            .ok_or(ExeFailure::MethodNotFound)?
            .clone();
        if !entry.is_public {
            return Err(ExeFailure::ExternalPrivateMethodCall);
        }

        let remaining = self.entry_balance.take();
        let state_hash = Hash256::hash_from_slice(
            self.tx_env.tx_id.as_bytes(),
            "latticecoin.framestate",
        );
        self.frames.push(Frame::new(
            FrameObj::Script,
            entry,
            BalanceState::from_remaining(remaining),
            state_hash,
        ));

        while !self.frames.is_empty() {
            self.step()?;
        }
        self.settle()
    }

    fn step(&mut self) -> Result<(), ExeFailure> {
        let frame = self.frames.last().expect("frame stack checked by caller");
        if frame.pc >= frame.method.instrs.len() {
            self.pop_frame()?;
            return Ok(());
        }

        let instr = frame.method.instrs[frame.pc].clone();
        self.frames.last_mut().unwrap().pc += 1;
        self.gas.charge(instr.gas())?;
        self.exec(instr)
    }

    fn pop_frame(&mut self) -> Result<(), ExeFailure> {
        let mut frame = self.frames.pop().expect("frame stack checked by caller");
        let leftover = frame.balances.drain()?;
        match self.frames.last_mut() {
            Some(parent) => parent.balances.remaining.merge(leftover)?,
            None => self.payouts.merge(leftover)?,
        }
        Ok(())
    }

    fn push(&mut self, val: Val) -> Result<(), ExeFailure> {
        if self.stack.len() >= OPERAND_STACK_MAX_SIZE {
            return Err(ExeFailure::StackOverflow);
        }
        self.stack.push(val);
        Ok(())
    }

    fn pop(&mut self) -> Result<Val, ExeFailure> {
        self.stack.pop().ok_or(ExeFailure::InvalidValType)
    }

    fn frame(&self) -> &Frame {
        self.frames.last().expect("active frame")
    }

    fn frame_mut(&mut self) -> &mut Frame {
        self.frames.last_mut().expect("active frame")
    }

    fn caller_frame(&self) -> Option<&Frame> {
        let n = self.frames.len();
        if n < 2 {
            None
        } else {
            self.frames.get(n - 2)
        }
    }

    fn require_payable(&self) -> Result<(), ExeFailure> {
        if !self.frame().method.is_payable {
            return Err(ExeFailure::NonPayableFrame);
        }
        Ok(())
    }

    fn self_contract_id(&self) -> Result<ContractId, ExeFailure> {
        self.frame()
            .contract_id()
            .ok_or(ExeFailure::ContractFrameExpected)
    }

    fn jump(&mut self, offset: i16) -> Result<(), ExeFailure> {
        let frame = self.frame_mut();
        let target = frame.pc as i64 + i64::from(offset);
        if target < 0 || target as usize > frame.method.instrs.len() {
            return Err(ExeFailure::InvalidInstrOffset);
        }
        frame.pc = target as usize;
        Ok(())
    }

    fn contract_state(&self, id: &ContractId) -> Result<ContractState, ExeFailure> {
        self.world
            .get_contract(id)?
            .ok_or(ExeFailure::ContractNotFound)
    }

    fn contract_code(&self, id: &ContractId) -> Result<Contract, ExeFailure> {
        let state = self.contract_state(id)?;
        self.world
            .get_code(&state.code_hash)?
            .ok_or(ExeFailure::InvalidContractCode)
    }

    /// Consume a contract's current asset output into the active frame's
    /// remaining pool. Idempotent per transaction; a contract destroyed
    /// earlier in the same transaction has no output left to load.
    fn load_contract_balance(&mut self, id: &ContractId) -> Result<(), ExeFailure> {
        if self.destroyed_contracts.contains(id) {
            return Err(ExeFailure::ContractOutputNotFound);
        }
        if !self.loaded_contracts.insert(*id) {
            return Ok(());
        }
        let state = self.contract_state(id)?;
        let output = self
            .world
            .get_contract_output(&state.asset_output_ref)?
            .ok_or(ExeFailure::ContractOutputNotFound)?;
        self.world.remove_contract_output(&state.asset_output_ref);
        self.contract_inputs.push(state.asset_output_ref);

        let lockup = LockupScript::P2c(*id);
        let frame = self.frame_mut();
        frame.balances.remaining.add_alf(&lockup, output.amount)?;
        for (token, amount) in &output.tokens {
            frame.balances.remaining.add_token(&lockup, token, *amount)?;
        }
        Ok(())
    }

    fn call_method(&mut self, obj: FrameObj, method: Method) -> Result<(), ExeFailure> {
        if self.frames.len() + 1 >= FRAME_STACK_MAX_SIZE {
            return Err(ExeFailure::StackOverflow);
        }

        let balances = if method.is_payable {
            BalanceState::from_remaining(self.frame_mut().balances.approved.take())
        } else {
            BalanceState::default()
        };

        let initial_state_hash = match &obj {
            FrameObj::Script => Hash256::hash_from_slice(
                self.tx_env.tx_id.as_bytes(),
                "latticecoin.framestate",
            ),
            FrameObj::Contract(id) => {
                let state = self.contract_state(id)?;
                let encoded = crate::codec::encode_to_vec(&state.fields)
                    .map_err(|err| ExeFailure::StateFailure(err.to_string()))?;
                Hash256::hash_from_slice(encoded, "latticecoin.framestate")
            }
        };

        self.frames
            .push(Frame::new(obj, method, balances, initial_state_hash));
        Ok(())
    }

    fn next_output_counter(&mut self) -> u32 {
        let n = self.output_counter;
        self.output_counter += 1;
        n
    }

    #[allow(clippy::too_many_lines)]
    fn exec(&mut self, instr: Instr) -> Result<(), ExeFailure> {
        use Instr::*;
        match instr {
            ConstTrue => self.push(Val::Bool(true))?,
            ConstFalse => self.push(Val::Bool(false))?,
            U256Const(v) => self.push(Val::U256(v))?,
            I256Const(v) => self.push(Val::I256(v))?,
            BytesConst(v) => self.push(Val::ByteVec(v))?,
            AddressConst(v) => self.push(Val::Address(v))?,
            Pop => {
                self.pop()?;
            }
            Dup => {
                let top = self.stack.last().ok_or(ExeFailure::InvalidValType)?.clone();
                self.push(top)?;
            }
            Swap => {
                let n = self.stack.len();
                if n < 2 {
                    return Err(ExeFailure::InvalidValType);
                }
                self.stack.swap(n - 1, n - 2);
            }

            LoadLocal(i) => {
                let val = self
                    .frame()
                    .locals
                    .get(usize::from(i))
                    .ok_or(ExeFailure::InvalidValType)?
                    .clone();
                self.push(val)?;
            }
            StoreLocal(i) => {
                let val = self.pop()?;
                let frame = self.frame_mut();
                let slot = frame
                    .locals
                    .get_mut(usize::from(i))
                    .ok_or(ExeFailure::InvalidValType)?;
                *slot = val;
            }

            U256Add => self.u256_binop(|a, b| a.checked_add(b))?,
            U256Sub => self.u256_binop(|a, b| a.checked_sub(b))?,
            U256Mul => self.u256_binop(|a, b| a.checked_mul(b))?,
            U256Div => self.u256_binop(|a, b| a.checked_div(b))?,
            U256Mod => self.u256_binop(|a, b| a.checked_rem(b))?,
            U256ModAdd => self.u256_binop(|a, b| Some(a.wrapping_add(b)))?,
            U256ModSub => self.u256_binop(|a, b| Some(a.wrapping_sub(b)))?,
            U256ModMul => self.u256_binop(|a, b| Some(a.wrapping_mul(b)))?,
            U256BitAnd => self.u256_binop(|a, b| Some(a.bitand(b)))?,
            U256BitOr => self.u256_binop(|a, b| Some(a.bitor(b)))?,
            U256Xor => self.u256_binop(|a, b| Some(a.bitxor(b)))?,
            U256Shl => self.u256_binop(|a, b| {
                b.to_u64().map(|s| a.shl(s.min(256) as u32))
            })?,
            U256Shr => self.u256_binop(|a, b| {
                b.to_u64().map(|s| a.shr(s.min(256) as u32))
            })?,

            I256Add => self.i256_binop(|a, b| a.checked_add(b))?,
            I256Sub => self.i256_binop(|a, b| a.checked_sub(b))?,
            I256Mul => self.i256_binop(|a, b| a.checked_mul(b))?,
            I256Div => self.i256_binop(|a, b| a.checked_div(b))?,
            I256Mod => self.i256_binop(|a, b| a.checked_rem(b))?,
            I256Neg => {
                let v = self.pop()?.as_i256()?;
                let out = v.checked_neg().ok_or(ExeFailure::InvalidValType)?;
                self.push(Val::I256(out))?;
            }

            U256Lt => self.u256_cmp(|a, b| a < b)?,
            U256Le => self.u256_cmp(|a, b| a <= b)?,
            U256Gt => self.u256_cmp(|a, b| a > b)?,
            U256Ge => self.u256_cmp(|a, b| a >= b)?,
            I256Lt => self.i256_cmp(|a, b| a < b)?,
            I256Le => self.i256_cmp(|a, b| a <= b)?,
            I256Gt => self.i256_cmp(|a, b| a > b)?,
            I256Ge => self.i256_cmp(|a, b| a >= b)?,
            Eq => {
                let b = self.pop()?;
                let a = self.pop()?;
                if std::mem::discriminant(&a) != std::mem::discriminant(&b) {
                    return Err(ExeFailure::InvalidValType);
                }
                self.push(Val::Bool(a == b))?;
            }
            Neq => {
                let b = self.pop()?;
                let a = self.pop()?;
                if std::mem::discriminant(&a) != std::mem::discriminant(&b) {
                    return Err(ExeFailure::InvalidValType);
                }
                self.push(Val::Bool(a != b))?;
            }

            BoolNot => {
                let v = self.pop()?.as_bool()?;
                self.push(Val::Bool(!v))?;
            }
            BoolAnd => {
                let b = self.pop()?.as_bool()?;
                let a = self.pop()?.as_bool()?;
                self.push(Val::Bool(a && b))?;
            }
            BoolOr => {
                let b = self.pop()?.as_bool()?;
                let a = self.pop()?.as_bool()?;
                self.push(Val::Bool(a || b))?;
            }

            Jump(offset) => self.jump(offset)?,
            IfTrue(offset) => {
                if self.pop()?.as_bool()? {
                    self.jump(offset)?;
                }
            }
            IfFalse(offset) => {
                if !self.pop()?.as_bool()? {
                    self.jump(offset)?;
                }
            }
            Assert => {
                if !self.pop()?.as_bool()? {
                    return Err(ExeFailure::AssertionFailed);
                }
            }
            Return => {
                self.pop_frame()?;
            }

            ByteVecConcat => {
                let b = self.pop()?;
                let a = self.pop()?;
                let mut out = a.as_bytes()?.to_vec();
                out.extend_from_slice(b.as_bytes()?);
                self.push(Val::ByteVec(out))?;
            }
            ByteVecSize => {
                let v = self.pop()?;
                let len = v.as_bytes()?.len() as u64;
                self.push(Val::U256(U256::from_u64(len)))?;
            }

            LoadField(i) => {
                let id = self.self_contract_id()?;
                let state = self.contract_state(&id)?;
                let val = state
                    .fields
                    .get(usize::from(i))
                    .ok_or(ExeFailure::InvalidFieldLength)?
                    .clone();
                self.push(val)?;
            }
            StoreField(i) => {
                let id = self.self_contract_id()?;
                let val = self.pop()?;
                let mut state = self.contract_state(&id)?;
                let slot = state
                    .fields
                    .get_mut(usize::from(i))
                    .ok_or(ExeFailure::InvalidFieldLength)?;
                *slot = val;
                self.world.put_contract(&id, &state)?;
            }

            ApproveAlf => {
                self.require_payable()?;
                let amount = self.pop()?.as_u256()?;
                let from = *self.pop()?.as_address()?;
                self.frame_mut().balances.approve_alf(&from, amount)?;
            }
            ApproveToken => {
                self.require_payable()?;
                let amount = self.pop()?.as_u256()?;
                let token = self.pop()?.as_hash()?;
                let from = *self.pop()?.as_address()?;
                self.frame_mut()
                    .balances
                    .approve_token(&from, &token, amount)?;
            }
            TransferAlf => {
                self.require_payable()?;
                let amount = self.pop()?.as_u256()?;
                let to = *self.pop()?.as_address()?;
                let from = *self.pop()?.as_address()?;
                self.frame_mut().balances.remaining.sub_alf(&from, amount)?;
                self.payouts.add_alf(&to, amount)?;
            }
            TransferAlfFromSelf => {
                self.require_payable()?;
                let amount = self.pop()?.as_u256()?;
                let to = *self.pop()?.as_address()?;
                let id = self.self_contract_id()?;
                self.load_contract_balance(&id)?;
                let from = LockupScript::P2c(id);
                self.frame_mut().balances.remaining.sub_alf(&from, amount)?;
                self.payouts.add_alf(&to, amount)?;
            }
            TransferAlfToSelf => {
                self.require_payable()?;
                let amount = self.pop()?.as_u256()?;
                let from = *self.pop()?.as_address()?;
                let id = self.self_contract_id()?;
                self.load_contract_balance(&id)?;
                self.frame_mut().balances.remaining.sub_alf(&from, amount)?;
                self.payouts.add_alf(&LockupScript::P2c(id), amount)?;
            }
            TransferToken => {
                self.require_payable()?;
                let amount = self.pop()?.as_u256()?;
                let token = self.pop()?.as_hash()?;
                let to = *self.pop()?.as_address()?;
                let from = *self.pop()?.as_address()?;
                self.frame_mut()
                    .balances
                    .remaining
                    .sub_token(&from, &token, amount)?;
                self.payouts.add_token(&to, &token, amount)?;
            }
            TransferTokenFromSelf => {
                self.require_payable()?;
                let amount = self.pop()?.as_u256()?;
                let token = self.pop()?.as_hash()?;
                let to = *self.pop()?.as_address()?;
                let id = self.self_contract_id()?;
                self.load_contract_balance(&id)?;
                let from = LockupScript::P2c(id);
                self.frame_mut()
                    .balances
                    .remaining
                    .sub_token(&from, &token, amount)?;
                self.payouts.add_token(&to, &token, amount)?;
            }
            TransferTokenToSelf => {
                self.require_payable()?;
                let amount = self.pop()?.as_u256()?;
                let token = self.pop()?.as_hash()?;
                let from = *self.pop()?.as_address()?;
                let id = self.self_contract_id()?;
                self.load_contract_balance(&id)?;
                self.frame_mut()
                    .balances
                    .remaining
                    .sub_token(&from, &token, amount)?;
                self.payouts
                    .add_token(&LockupScript::P2c(id), &token, amount)?;
            }

            BlockTimestamp => {
                self.push(Val::U256(U256::from_u64(self.block_env.timestamp)))?;
            }
            BlockTarget => {
                self.push(Val::U256(U256::from_u64(u64::from(self.block_env.bits))))?;
            }
            NetworkId => {
                self.push(Val::U256(U256::from_u64(u64::from(
                    self.block_env.network_id,
                ))))?;
            }
            TxId => {
                self.push(Val::ByteVec(self.tx_env.tx_id.as_bytes().to_vec()))?;
            }
            TxInputsSize => {
                self.push(Val::U256(U256::from_u64(self.tx_env.inputs.len() as u64)))?;
            }
            TxInputAddress => {
                let index = self
                    .pop()?
                    .as_u256()?
                    .to_u64()
                    .ok_or(ExeFailure::InvalidTxInputIndex)? as usize;
                let input = self
                    .tx_env
                    .inputs
                    .get(index)
                    .ok_or(ExeFailure::InvalidTxInputIndex)?;
                self.push(Val::Address(input.lockup))?;
            }
            CallerContractId => {
                let caller = self
                    .caller_frame()
                    .ok_or(ExeFailure::ContractFrameExpected)?;
                let id = caller
                    .contract_id()
                    .ok_or(ExeFailure::ContractFrameExpected)?;
                self.push(Val::ByteVec(id.as_bytes().to_vec()))?;
            }
            CallerAddress => {
                let val = match self.caller_frame() {
                    Some(frame) => match frame.contract_id() {
                        Some(id) => Val::Address(LockupScript::P2c(id)),
                        None => Val::Address(self.unique_tx_input_lockup()?),
                    },
                    None => Val::Address(self.unique_tx_input_lockup()?),
                };
                self.push(val)?;
            }
            CallerInitialStateHash => {
                let caller = self
                    .caller_frame()
                    .ok_or(ExeFailure::ContractFrameExpected)?;
                let hash = caller.initial_state_hash;
                self.push(Val::ByteVec(hash.as_bytes().to_vec()))?;
            }
            IsCalledFromTxScript => {
                let from_script = matches!(
                    self.caller_frame().map(|f| &f.obj),
                    Some(FrameObj::Script)
                );
                self.push(Val::Bool(from_script))?;
            }
            SelfAddress => {
                let id = self.self_contract_id()?;
                self.push(Val::Address(LockupScript::P2c(id)))?;
            }
            SelfContractId => {
                let id = self.self_contract_id()?;
                self.push(Val::ByteVec(id.as_bytes().to_vec()))?;
            }

            Blake2b => {
                let input = self.pop()?;
                let mut hasher = Blake2bVar::new(32).expect("32 is a valid blake2b size");
                hasher.update(input.as_bytes()?);
                let mut out = [0u8; 32];
                hasher
                    .finalize_variable(&mut out)
                    .expect("output size matches");
                self.push(Val::ByteVec(out.to_vec()))?;
            }
            Keccak256 => {
                let input = self.pop()?;
                let out = sha3::Keccak256::digest(input.as_bytes()?);
                self.push(Val::ByteVec(out.to_vec()))?;
            }
            Sha256 => {
                let input = self.pop()?;
                let out = sha2::Sha256::digest(input.as_bytes()?);
                self.push(Val::ByteVec(out.to_vec()))?;
            }
            Sha3 => {
                let input = self.pop()?;
                let out = sha3::Sha3_256::digest(input.as_bytes()?);
                self.push(Val::ByteVec(out.to_vec()))?;
            }

            VerifySecP256K1 => {
                let sig = self.pop()?;
                let key = self.pop()?;
                let msg = self.pop()?.as_hash()?;
                let sig_bytes: [u8; 64] = sig
                    .as_bytes()?
                    .try_into()
                    .map_err(|_| ExeFailure::InvalidSignature)?;
                let key_bytes: [u8; 33] = key
                    .as_bytes()?
                    .try_into()
                    .map_err(|_| ExeFailure::InvalidSignature)?;
                if !PublicKey(key_bytes).verify(&msg, &Signature(sig_bytes)) {
                    return Err(ExeFailure::InvalidSignature);
                }
            }
            VerifyEd25519 => {
                let sig = self.pop()?;
                let key = self.pop()?;
                let msg = self.pop()?.as_hash()?;
                let key = ed25519_dalek::PublicKey::from_bytes(key.as_bytes()?)
                    .map_err(|_| ExeFailure::InvalidSignature)?;
                let sig = ed25519_dalek::Signature::from_bytes(sig.as_bytes()?)
                    .map_err(|_| ExeFailure::InvalidSignature)?;
                if key.verify(msg.as_bytes(), &sig).is_err() {
                    return Err(ExeFailure::InvalidSignature);
                }
            }

            VerifyAbsoluteLocktime => {
                let lock = self.pop()?.as_u256()?;
                let lock = lock
                    .to_u64()
                    .ok_or(ExeFailure::AbsoluteLockTimeVerificationFailed)?;
                if self.block_env.timestamp < lock {
                    return Err(ExeFailure::AbsoluteLockTimeVerificationFailed);
                }
            }
            VerifyRelativeLocktime => {
                let duration = self.pop()?.as_u256()?;
                let index = self
                    .pop()?
                    .as_u256()?
                    .to_u64()
                    .ok_or(ExeFailure::InvalidTxInputIndex)? as usize;
                let input = self
                    .tx_env
                    .inputs
                    .get(index)
                    .ok_or(ExeFailure::InvalidTxInputIndex)?;
                let duration = duration
                    .to_u64()
                    .ok_or(ExeFailure::RelativeLockTimeVerificationFailed)?;
                let anchor = input.output.lock_time.unwrap_or(0);
                let threshold = anchor.saturating_add(duration);
                if self.block_env.timestamp < threshold {
                    return Err(ExeFailure::RelativeLockTimeVerificationFailed);
                }
            }

            CallLocal(index) => {
                let method = match &self.frame().obj {
                    FrameObj::Script => self
                        .script
                        .methods
                        .get(usize::from(index))
                        .cloned()
                        .ok_or(ExeFailure::MethodNotFound)?,
                    FrameObj::Contract(id) => {
                        let id = *id;
                        self.contract_code(&id)?
                            .method(index)
                            .cloned()
                            .ok_or(ExeFailure::MethodNotFound)?
                    }
                };
                let obj = self.frame().obj.clone();
                self.call_method(obj, method)?;
            }
            CallExternal(index) => {
                let id = self.pop()?.as_hash()?;
                let code = self.contract_code(&id)?;
                let method = code
                    .method(index)
                    .cloned()
                    .ok_or(ExeFailure::MethodNotFound)?;
                if !method.is_public {
                    return Err(ExeFailure::ExternalPrivateMethodCall);
                }
                self.call_method(FrameObj::Contract(id), method)?;
            }
            CreateContract => {
                self.create_contract(None)?;
            }
            CopyCreateContract => {
                let template = self.pop()?.as_hash()?;
                self.create_contract(Some(template))?;
            }
            DestroySelf => {
                self.destroy_self()?;
            }
        }
        Ok(())
    }

    fn u256_binop(
        &mut self,
        op: impl FnOnce(U256, U256) -> Option<U256>,
    ) -> Result<(), ExeFailure> {
        let b = self.pop()?.as_u256()?;
        let a = self.pop()?.as_u256()?;
        let out = op(a, b).ok_or(ExeFailure::InvalidValType)?;
        self.push(Val::U256(out))
    }

    fn i256_binop(
        &mut self,
        op: impl FnOnce(crate::primitives::I256, crate::primitives::I256) -> Option<crate::primitives::I256>,
    ) -> Result<(), ExeFailure> {
        let b = self.pop()?.as_i256()?;
        let a = self.pop()?.as_i256()?;
        let out = op(a, b).ok_or(ExeFailure::InvalidValType)?;
        self.push(Val::I256(out))
    }

    fn u256_cmp(&mut self, op: impl FnOnce(U256, U256) -> bool) -> Result<(), ExeFailure> {
        let b = self.pop()?.as_u256()?;
        let a = self.pop()?.as_u256()?;
        self.push(Val::Bool(op(a, b)))
    }

    fn i256_cmp(
        &mut self,
        op: impl FnOnce(crate::primitives::I256, crate::primitives::I256) -> bool,
    ) -> Result<(), ExeFailure> {
        let b = self.pop()?.as_i256()?;
        let a = self.pop()?.as_i256()?;
        self.push(Val::Bool(op(a, b)))
    }

    fn unique_tx_input_lockup(&self) -> Result<LockupScript, ExeFailure> {
        self.tx_env
            .inputs
            .first()
            .map(|i| i.lockup)
            .ok_or(ExeFailure::InvalidTxInputIndex)
    }

    /// Deploy a contract. Fields are popped from the stack under a count;
    /// the deposit is the caller's entire approved pool, which must carry at
    /// least the dust amount. Pushes the new contract id.
    fn create_contract(&mut self, template: Option<ContractId>) -> Result<(), ExeFailure> {
        self.require_payable()?;

        let (code, code_hash) = match template {
            Some(template_id) => {
                let state = self.contract_state(&template_id)?;
                let code = self
                    .world
                    .get_code(&state.code_hash)?
                    .ok_or(ExeFailure::InvalidContractCode)?;
                (code, state.code_hash)
            }
            None => {
                let bytes = self.pop()?;
                let code: Contract = crate::codec::decode(bytes.as_bytes()?)
                    .map_err(|_| ExeFailure::InvalidContractCode)?;
                let hash = code.code_hash();
                (code, hash)
            }
        };

        let count = self
            .pop()?
            .as_u256()?
            .to_u64()
            .ok_or(ExeFailure::InvalidFieldLength)? as usize;
        let mut fields = Vec::with_capacity(count);
        for _ in 0..count {
            fields.push(self.pop()?);
        }
        fields.reverse();
        if fields.len() != usize::from(code.field_count) {
            return Err(ExeFailure::InvalidFieldLength);
        }

        let deposit = self.frame_mut().balances.approved.take();
        let amount = deposit.total_alf();
        if amount < U256::from_u64(DUST_UTXO_AMOUNT) {
            return Err(ExeFailure::NotEnoughBalance);
        }
        let mut tokens: Vec<(Hash256, U256)> = vec![];
        for (_, bal) in deposit.iter() {
            for (token, value) in &bal.tokens {
                if let Some((_, v)) = tokens.iter_mut().find(|(id, _)| id == token) {
                    *v = v.checked_add(*value).ok_or(ExeFailure::BalanceOverflow)?;
                } else {
                    tokens.push((*token, *value));
                }
            }
        }

        let counter = self.next_output_counter();
        let mut seed = self.tx_env.tx_id.as_bytes().to_vec();
        seed.extend_from_slice(&counter.to_le_bytes());
        let id: ContractId = Hash256::hash_from_slice(seed, "latticecoin.contractid");
        let output_ref = ContractOutputRef::new(&id, &self.tx_env.tx_id, counter);
        let output = ContractOutput {
            amount,
            contract_id: id,
            tokens,
        };

        if self.world.get_code(&code_hash)?.is_none() {
            self.world.put_code(&code_hash, &code)?;
        }
        self.world.put_contract(
            &id,
            &ContractState {
                fields,
                code_hash,
                asset_output_ref: output_ref,
            },
        )?;
        self.world.put_contract_output(&output_ref, &output)?;
        self.generated.push(TxOutput::Contract(output));
        self.push(Val::ByteVec(id.as_bytes().to_vec()))
    }

    /// Remove the executing contract, moving its remaining assets to an
    /// asset address popped from the stack.
    fn destroy_self(&mut self) -> Result<(), ExeFailure> {
        self.require_payable()?;
        let target = *self.pop()?.as_address()?;
        if !target.is_asset() {
            return Err(ExeFailure::InvalidAddressTypeInContractDestroy);
        }

        let id = self.self_contract_id()?;
        self.load_contract_balance(&id)?;

        let lockup = LockupScript::P2c(id);
        // Sweep the contract's pool from every frame that holds a share.
        let mut swept = BalancePerLockupSweep::default();
        for frame in &mut self.frames {
            if let Some(bal) = frame.balances.remaining.take_lockup(&lockup) {
                swept.merge(bal)?;
            }
            if let Some(bal) = frame.balances.approved.take_lockup(&lockup) {
                swept.merge(bal)?;
            }
        }

        self.payouts.add_alf(&target, swept.alf)?;
        for (token, amount) in swept.tokens {
            self.payouts.add_token(&target, &token, amount)?;
        }

        // The state itself is dropped at settlement; until then the contract
        // is still callable but its asset output is gone.
        self.destroyed_contracts.insert(id);
        Ok(())
    }

    /// Materialize the final pools into outputs and enforce the contract
    /// asset invariants.
    fn settle(mut self) -> Result<ExecOutcome, ExeFailure> {
        for id in &self.destroyed_contracts {
            self.world.remove_contract(id);
        }
        let pool = self.payouts.take();
        let mut rewritten: HashSet<ContractId> = HashSet::new();

        for (lockup, bal) in pool.iter() {
            if bal.is_zero() {
                continue;
            }
            match lockup {
                LockupScript::P2pkh(_) => {
                    let tokens: Vec<(Hash256, U256)> = bal
                        .tokens
                        .iter()
                        .filter(|(_, v)| !v.is_zero())
                        .copied()
                        .collect();
                    self.generated.push(TxOutput::Asset(AssetOutput {
                        amount: bal.alf,
                        lockup: *lockup,
                        lock_time: None,
                        tokens,
                        additional_data: vec![],
                    }));
                }
                LockupScript::P2c(id) => {
                    if self.destroyed_contracts.contains(id) {
                        return Err(ExeFailure::ContractNotFound);
                    }
                    let mut state = self.contract_state(id)?;
                    let mut alf = bal.alf;
                    let mut tokens: Vec<(Hash256, U256)> = bal
                        .tokens
                        .iter()
                        .filter(|(_, v)| !v.is_zero())
                        .copied()
                        .collect();

                    // Fold in the old output when it was never consumed.
                    if self.loaded_contracts.insert(*id) {
                        let old = self
                            .world
                            .get_contract_output(&state.asset_output_ref)?
                            .ok_or(ExeFailure::ContractOutputNotFound)?;
                        self.world.remove_contract_output(&state.asset_output_ref);
                        self.contract_inputs.push(state.asset_output_ref);
                        alf = alf.checked_add(old.amount).ok_or(ExeFailure::BalanceOverflow)?;
                        for (token, value) in old.tokens {
                            if let Some((_, v)) = tokens.iter_mut().find(|(t, _)| t == &token) {
                                *v = v.checked_add(value).ok_or(ExeFailure::BalanceOverflow)?;
                            } else {
                                tokens.push((token, value));
                            }
                        }
                    }

                    let counter = self.next_output_counter();
                    let output_ref = ContractOutputRef::new(id, &self.tx_env.tx_id, counter);
                    let output = ContractOutput {
                        amount: alf,
                        contract_id: *id,
                        tokens,
                    };
                    self.world.put_contract_output(&output_ref, &output)?;
                    state.asset_output_ref = output_ref;
                    self.world.put_contract(id, &state)?;
                    self.generated.push(TxOutput::Contract(output));
                    rewritten.insert(*id);
                }
            }
        }

        // Every contract whose output was consumed must either be destroyed
        // or hold a fresh non-empty output.
        for id in &self.loaded_contracts {
            if self.destroyed_contracts.contains(id) || rewritten.contains(id) {
                continue;
            }
            if self.world.get_contract(id)?.is_some() {
                return Err(ExeFailure::EmptyContractAsset);
            }
        }

        Ok(ExecOutcome {
            generated_outputs: self.generated,
            contract_inputs: self.contract_inputs,
            gas_remaining: self.gas.remaining(),
        })
    }
}

#[derive(Default)]
struct BalancePerLockupSweep {
    alf: U256,
    tokens: Vec<(Hash256, U256)>,
}

impl BalancePerLockupSweep {
    fn merge(&mut self, bal: crate::vm::BalancePerLockup) -> Result<(), ExeFailure> {
        self.alf = self
            .alf
            .checked_add(bal.alf)
            .ok_or(ExeFailure::BalanceOverflow)?;
        for (token, value) in bal.tokens {
            if let Some((_, v)) = self.tokens.iter_mut().find(|(t, _)| t == &token) {
                *v = v.checked_add(value).ok_or(ExeFailure::BalanceOverflow)?;
            } else {
                self.tokens.push((token, value));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::backend::MemoryKv;
    use crate::primitives::I256;
    use crate::state::WorldState;

    fn block_env() -> BlockEnv {
        BlockEnv {
            timestamp: 1_650_000_000_000,
            bits: 0x1d00_ffff,
            network_id: 7,
        }
    }

    fn user_lockup() -> LockupScript {
        LockupScript::P2pkh(Hash256::hash_from_slice("user", "test"))
    }

    fn tx_env(input_amount: u64) -> TxEnv {
        let inputs = if input_amount == 0 {
            vec![]
        } else {
            vec![ResolvedInput {
                lockup: user_lockup(),
                output: AssetOutput::plain(U256::from_u64(input_amount), user_lockup()),
            }]
        };
        TxEnv {
            tx_id: Hash256::hash_from_slice("tx", "test"),
            inputs,
            gas_budget: 1_000_000,
        }
    }

    fn balance_of(tx: &TxEnv) -> Balances {
        entry_balance_from_inputs(&tx.inputs).unwrap()
    }

    fn run_script(script: &Script, tx: &TxEnv) -> Result<ExecOutcome, ExeFailure> {
        let kv = MemoryKv::new();
        let world = WorldState::new(kv, Hash256::zero());
        let mut cached = world.cached();
        let env = block_env();
        let balance = balance_of(tx);
        Runner::new(&mut cached, &env, tx, script, balance).run()
    }

    #[test]
    fn arithmetic_and_assert() {
        let script = Script::single(vec![
            Instr::U256Const(U256::from_u64(6)),
            Instr::U256Const(U256::from_u64(7)),
            Instr::U256Mul,
            Instr::U256Const(U256::from_u64(42)),
            Instr::Eq,
            Instr::Assert,
        ]);
        assert!(run_script(&script, &tx_env(0)).is_ok());
    }

    #[test]
    fn failed_assertion_fails_script() {
        let script = Script::single(vec![Instr::ConstFalse, Instr::Assert]);
        assert_eq!(
            run_script(&script, &tx_env(0)),
            Err(ExeFailure::AssertionFailed)
        );
    }

    #[test]
    fn checked_overflow_fails() {
        let script = Script::single(vec![
            Instr::U256Const(U256::max_value()),
            Instr::U256Const(U256::from_u64(1)),
            Instr::U256Add,
        ]);
        assert!(run_script(&script, &tx_env(0)).is_err());

        let modular = Script::single(vec![
            Instr::U256Const(U256::max_value()),
            Instr::U256Const(U256::from_u64(1)),
            Instr::U256ModAdd,
            Instr::U256Const(U256::zero()),
            Instr::Eq,
            Instr::Assert,
        ]);
        assert!(run_script(&modular, &tx_env(0)).is_ok());
    }

    #[test]
    fn signed_arithmetic() {
        let script = Script::single(vec![
            Instr::I256Const(I256::from_i64(-6)),
            Instr::I256Const(I256::from_i64(2)),
            Instr::I256Div,
            Instr::I256Neg,
            Instr::I256Const(I256::from_i64(3)),
            Instr::Eq,
            Instr::Assert,
        ]);
        assert!(run_script(&script, &tx_env(0)).is_ok());
    }

    #[test]
    fn gas_is_deterministic_and_exhausts() {
        let script = Script::single(vec![
            Instr::U256Const(U256::from_u64(1)),
            Instr::U256Const(U256::from_u64(2)),
            Instr::U256Add,
            Instr::Pop,
        ]);
        let mut tx = tx_env(0);
        let a = run_script(&script, &tx).unwrap();
        let b = run_script(&script, &tx).unwrap();
        assert_eq!(a.gas_remaining, b.gas_remaining);

        tx.gas_budget = 5;
        assert_eq!(run_script(&script, &tx), Err(ExeFailure::OutOfGas));
    }

    #[test]
    fn loops_with_jumps_terminate() {
        // local0 = 5; while local0 != 0 { local0 = local0 - 1 }
        let script = Script::new(vec![Method {
            is_public: true,
            is_payable: false,
            local_count: 1,
            instrs: vec![
                Instr::U256Const(U256::from_u64(5)),
                Instr::StoreLocal(0),
                // loop head
                Instr::LoadLocal(0),
                Instr::U256Const(U256::zero()),
                Instr::Eq,
                Instr::IfTrue(5),
                Instr::LoadLocal(0),
                Instr::U256Const(U256::from_u64(1)),
                Instr::U256Sub,
                Instr::StoreLocal(0),
                Instr::Jump(-9),
            ],
        }]);
        assert!(run_script(&script, &tx_env(0)).is_ok());
    }

    #[test]
    fn frame_stack_overflow_at_limit() {
        // Recursion depth driven by local0 of the entry frame; method 1
        // calls itself until the counter runs out.
        fn recursion(depth: u64) -> Script {
            Script::new(vec![
                Method {
                    is_public: true,
                    is_payable: false,
                    local_count: 0,
                    instrs: vec![Instr::U256Const(U256::from_u64(depth)), Instr::CallLocal(1)],
                },
                Method {
                    is_public: false,
                    is_payable: false,
                    local_count: 1,
                    instrs: vec![
                        Instr::StoreLocal(0),
                        Instr::LoadLocal(0),
                        Instr::U256Const(U256::from_u64(1)),
                        Instr::U256Le,
                        Instr::IfTrue(4),
                        Instr::LoadLocal(0),
                        Instr::U256Const(U256::from_u64(1)),
                        Instr::U256Sub,
                        Instr::CallLocal(1),
                    ],
                },
            ])
        }

        let mut tx = tx_env(0);
        tx.gas_budget = 10_000_000;

        // Depth counts frames: the entry frame plus one per recursive call.
        let at_limit = recursion(FRAME_STACK_MAX_SIZE as u64 - 1);
        assert_eq!(run_script(&at_limit, &tx), Err(ExeFailure::StackOverflow));

        let below_limit = recursion(FRAME_STACK_MAX_SIZE as u64 - 2);
        assert!(run_script(&below_limit, &tx).is_ok());
    }

    #[test]
    fn operand_stack_overflow() {
        let script = Script::single(vec![
            Instr::ConstTrue,
            Instr::Dup,
            Instr::Jump(-3),
        ]);
        let mut tx = tx_env(0);
        tx.gas_budget = 100_000_000;
        assert_eq!(run_script(&script, &tx), Err(ExeFailure::StackOverflow));
    }

    #[test]
    fn env_queries() {
        let script = Script::single(vec![
            Instr::BlockTimestamp,
            Instr::U256Const(U256::from_u64(1_650_000_000_000)),
            Instr::Eq,
            Instr::Assert,
            Instr::NetworkId,
            Instr::U256Const(U256::from_u64(7)),
            Instr::Eq,
            Instr::Assert,
            Instr::TxInputsSize,
            Instr::U256Const(U256::from_u64(1)),
            Instr::Eq,
            Instr::Assert,
            Instr::U256Const(U256::zero()),
            Instr::TxInputAddress,
            Instr::AddressConst(user_lockup()),
            Instr::Eq,
            Instr::Assert,
        ]);
        assert!(run_script(&script, &tx_env(100)).is_ok());
    }

    #[test]
    fn bad_tx_input_index() {
        let script = Script::single(vec![
            Instr::U256Const(U256::from_u64(5)),
            Instr::TxInputAddress,
        ]);
        assert_eq!(
            run_script(&script, &tx_env(100)),
            Err(ExeFailure::InvalidTxInputIndex)
        );
    }

    #[test]
    fn absolute_locktime() {
        let pass = Script::single(vec![
            Instr::U256Const(U256::from_u64(1_650_000_000_000)),
            Instr::VerifyAbsoluteLocktime,
        ]);
        assert!(run_script(&pass, &tx_env(0)).is_ok());

        let fail = Script::single(vec![
            Instr::U256Const(U256::from_u64(1_650_000_000_001)),
            Instr::VerifyAbsoluteLocktime,
        ]);
        assert_eq!(
            run_script(&fail, &tx_env(0)),
            Err(ExeFailure::AbsoluteLockTimeVerificationFailed)
        );
    }

    #[test]
    fn hash_instructions_produce_32_bytes() {
        for instr in [Instr::Blake2b, Instr::Keccak256, Instr::Sha256, Instr::Sha3] {
            let script = Script::single(vec![
                Instr::BytesConst(b"payload".to_vec()),
                instr,
                Instr::ByteVecSize,
                Instr::U256Const(U256::from_u64(32)),
                Instr::Eq,
                Instr::Assert,
            ]);
            assert!(run_script(&script, &tx_env(0)).is_ok());
        }
    }

    #[test]
    fn transfer_generates_output() {
        let dest = LockupScript::P2pkh(Hash256::hash_from_slice("dest", "test"));
        let script = Script::new(vec![Method {
            is_public: true,
            is_payable: true,
            local_count: 0,
            instrs: vec![
                Instr::AddressConst(user_lockup()),
                Instr::AddressConst(dest),
                Instr::U256Const(U256::from_u64(40)),
                Instr::TransferAlf,
            ],
        }]);
        let outcome = run_script(&script, &tx_env(100)).unwrap();

        // One payout plus the change back to the sender.
        assert_eq!(outcome.generated_outputs.len(), 2);
        let TxOutput::Asset(out) = &outcome.generated_outputs[0] else {
            panic!("expected asset output");
        };
        assert_eq!(out.amount, U256::from_u64(40));
        assert_eq!(out.lockup, dest);
        let TxOutput::Asset(change) = &outcome.generated_outputs[1] else {
            panic!("expected change output");
        };
        assert_eq!(change.amount, U256::from_u64(60));
        assert_eq!(change.lockup, user_lockup());
    }

    #[test]
    fn transfer_from_non_payable_frame_fails() {
        let dest = LockupScript::P2pkh(Hash256::hash_from_slice("dest", "test"));
        let script = Script::single(vec![
            Instr::AddressConst(user_lockup()),
            Instr::AddressConst(dest),
            Instr::U256Const(U256::from_u64(40)),
            Instr::TransferAlf,
        ]);
        assert_eq!(
            run_script(&script, &tx_env(100)),
            Err(ExeFailure::NonPayableFrame)
        );
    }

    fn counter_contract() -> Contract {
        Contract::new(
            1,
            vec![
                // 0: public increment
                Method {
                    is_public: true,
                    is_payable: false,
                    local_count: 0,
                    instrs: vec![
                        Instr::LoadField(0),
                        Instr::U256Const(U256::from_u64(1)),
                        Instr::U256Add,
                        Instr::StoreField(0),
                    ],
                },
                // 1: private
                Method {
                    is_public: false,
                    is_payable: false,
                    local_count: 0,
                    instrs: vec![],
                },
                // 2: public payable destroy, target address on stack
                Method {
                    is_public: true,
                    is_payable: true,
                    local_count: 0,
                    instrs: vec![Instr::DestroySelf],
                },
            ],
        )
    }

    /// Deploy `counter_contract` with field0 = 0 and a dust deposit, and
    /// return the resulting overlay plus the contract id.
    fn deploy(
        cached: &mut WorldStateCached<MemoryKv>,
        tx: &TxEnv,
    ) -> ContractId {
        let code_bytes = crate::codec::encode_to_vec(&counter_contract()).unwrap();
        let deploy = Script::new(vec![Method {
            is_public: true,
            is_payable: true,
            local_count: 0,
            instrs: vec![
                Instr::AddressConst(user_lockup()),
                Instr::U256Const(U256::from_u64(DUST_UTXO_AMOUNT)),
                Instr::ApproveAlf,
                Instr::U256Const(U256::zero()),
                Instr::U256Const(U256::from_u64(1)),
                Instr::BytesConst(code_bytes),
                Instr::CreateContract,
                Instr::Pop,
            ],
        }]);
        let env = block_env();
        let balance = balance_of(tx);
        let outcome = Runner::new(cached, &env, tx, &deploy, balance).run().unwrap();
        let TxOutput::Contract(out) = &outcome.generated_outputs[0] else {
            panic!("expected contract output");
        };
        out.contract_id
    }

    #[test]
    fn contract_create_call_and_field_update() {
        let kv = MemoryKv::new();
        let world = WorldState::new(kv, Hash256::zero());
        let mut cached = world.cached();
        let tx = tx_env(2 * DUST_UTXO_AMOUNT);
        let id = deploy(&mut cached, &tx);

        let state = cached.get_contract(&id).unwrap().unwrap();
        assert_eq!(state.fields, vec![Val::U256(U256::zero())]);

        let call = Script::single(vec![
            Instr::BytesConst(id.as_bytes().to_vec()),
            Instr::CallExternal(0),
        ]);
        let env = block_env();
        Runner::new(&mut cached, &env, &tx, &call, balance_of(&tx)).run().unwrap();

        let state = cached.get_contract(&id).unwrap().unwrap();
        assert_eq!(state.fields, vec![Val::U256(U256::from_u64(1))]);
    }

    #[test]
    fn create_with_wrong_field_count_fails() {
        let kv = MemoryKv::new();
        let world = WorldState::new(kv, Hash256::zero());
        let mut cached = world.cached();
        let tx = tx_env(2 * DUST_UTXO_AMOUNT);

        let code_bytes = crate::codec::encode_to_vec(&counter_contract()).unwrap();
        let deploy = Script::new(vec![Method {
            is_public: true,
            is_payable: true,
            local_count: 0,
            instrs: vec![
                Instr::AddressConst(user_lockup()),
                Instr::U256Const(U256::from_u64(DUST_UTXO_AMOUNT)),
                Instr::ApproveAlf,
                // Two initial fields against a declared count of one.
                Instr::U256Const(U256::zero()),
                Instr::U256Const(U256::zero()),
                Instr::U256Const(U256::from_u64(2)),
                Instr::BytesConst(code_bytes),
                Instr::CreateContract,
            ],
        }]);
        let env = block_env();
        let result = Runner::new(&mut cached, &env, &tx, &deploy, balance_of(&tx)).run();
        assert_eq!(result, Err(ExeFailure::InvalidFieldLength));
    }

    #[test]
    fn external_call_of_private_method_fails() {
        let kv = MemoryKv::new();
        let world = WorldState::new(kv, Hash256::zero());
        let mut cached = world.cached();
        let tx = tx_env(2 * DUST_UTXO_AMOUNT);
        let id = deploy(&mut cached, &tx);

        let call = Script::single(vec![
            Instr::BytesConst(id.as_bytes().to_vec()),
            Instr::CallExternal(1),
        ]);
        let env = block_env();
        let result = Runner::new(&mut cached, &env, &tx, &call, balance_of(&tx)).run();
        assert_eq!(result, Err(ExeFailure::ExternalPrivateMethodCall));
    }

    #[test]
    fn destroy_removes_contract_and_pays_target() {
        let kv = MemoryKv::new();
        let world = WorldState::new(kv, Hash256::zero());
        let mut cached = world.cached();
        let tx = tx_env(2 * DUST_UTXO_AMOUNT);
        let id = deploy(&mut cached, &tx);
        let output_ref = cached.get_contract(&id).unwrap().unwrap().asset_output_ref;

        let destroy = Script::new(vec![Method {
            is_public: true,
            is_payable: true,
            local_count: 0,
            instrs: vec![
                Instr::AddressConst(user_lockup()),
                Instr::BytesConst(id.as_bytes().to_vec()),
                Instr::CallExternal(2),
            ],
        }]);
        let env = block_env();
        let outcome = Runner::new(&mut cached, &env, &tx, &destroy, balance_of(&tx)).run().unwrap();

        assert!(cached.get_contract(&id).unwrap().is_none());
        assert!(cached.get_contract_output(&output_ref).unwrap().is_none());
        assert!(outcome.contract_inputs.contains(&output_ref));

        // The destroyed deposit plus the unspent entry balance flow back.
        let paid: U256 = outcome
            .generated_outputs
            .iter()
            .filter_map(|o| match o {
                TxOutput::Asset(a) if a.lockup == user_lockup() => Some(a.amount),
                _ => None,
            })
            .fold(U256::zero(), |acc, v| acc.wrapping_add(v));
        assert_eq!(paid, U256::from_u64(3 * DUST_UTXO_AMOUNT));
    }

    #[test]
    fn double_destroy_in_one_tx_fails() {
        let kv = MemoryKv::new();
        let world = WorldState::new(kv, Hash256::zero());
        let mut cached = world.cached();
        let tx = tx_env(2 * DUST_UTXO_AMOUNT);
        let id = deploy(&mut cached, &tx);

        let destroy_twice = Script::new(vec![Method {
            is_public: true,
            is_payable: true,
            local_count: 0,
            instrs: vec![
                Instr::AddressConst(user_lockup()),
                Instr::BytesConst(id.as_bytes().to_vec()),
                Instr::CallExternal(2),
                Instr::AddressConst(user_lockup()),
                Instr::BytesConst(id.as_bytes().to_vec()),
                Instr::CallExternal(2),
            ],
        }]);
        let env = block_env();
        let result = Runner::new(&mut cached, &env, &tx, &destroy_twice, balance_of(&tx)).run();
        assert_eq!(result, Err(ExeFailure::ContractOutputNotFound));
    }

    #[test]
    fn destroy_to_contract_address_fails() {
        let kv = MemoryKv::new();
        let world = WorldState::new(kv, Hash256::zero());
        let mut cached = world.cached();
        let tx = tx_env(2 * DUST_UTXO_AMOUNT);
        let id = deploy(&mut cached, &tx);

        let destroy = Script::new(vec![Method {
            is_public: true,
            is_payable: true,
            local_count: 0,
            instrs: vec![
                Instr::AddressConst(LockupScript::P2c(id)),
                Instr::BytesConst(id.as_bytes().to_vec()),
                Instr::CallExternal(2),
            ],
        }]);
        let env = block_env();
        let result = Runner::new(&mut cached, &env, &tx, &destroy, balance_of(&tx)).run();
        assert_eq!(result, Err(ExeFailure::InvalidAddressTypeInContractDestroy));
    }

    #[test]
    fn caller_queries_reflect_frames() {
        let kv = MemoryKv::new();
        let world = WorldState::new(kv, Hash256::zero());
        let mut cached = world.cached();
        let tx = tx_env(2 * DUST_UTXO_AMOUNT);

        // A contract whose method asserts it was called from a tx script
        // and that its self-id matches its caller-visible address.
        let introspect = Contract::new(
            0,
            vec![Method {
                is_public: true,
                is_payable: false,
                local_count: 0,
                instrs: vec![
                    Instr::IsCalledFromTxScript,
                    Instr::Assert,
                    Instr::CallerAddress,
                    Instr::AddressConst(user_lockup()),
                    Instr::Eq,
                    Instr::Assert,
                    Instr::SelfAddress,
                    Instr::Pop,
                ],
            }],
        );
        let code_bytes = crate::codec::encode_to_vec(&introspect).unwrap();
        let deploy_and_call = Script::new(vec![Method {
            is_public: true,
            is_payable: true,
            local_count: 1,
            instrs: vec![
                Instr::AddressConst(user_lockup()),
                Instr::U256Const(U256::from_u64(DUST_UTXO_AMOUNT)),
                Instr::ApproveAlf,
                Instr::U256Const(U256::zero()),
                Instr::BytesConst(code_bytes),
                Instr::CreateContract,
                Instr::StoreLocal(0),
                Instr::LoadLocal(0),
                Instr::CallExternal(0),
            ],
        }]);
        let env = block_env();
        assert!(
            Runner::new(&mut cached, &env, &tx, &deploy_and_call, balance_of(&tx))
                .run()
                .is_ok()
        );
    }
}
