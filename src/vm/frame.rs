// Copyright (c) 2024 The Latticecoin Core developers
// Licensed under the Apache License, Version 2.0 see LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0 or the MIT license, see
// LICENSE-MIT or http://opensource.org/licenses/MIT

use crate::primitives::{ContractId, Hash256, LockupScript, TokenId, U256};
use crate::vm::{ExeFailure, Method, Val};

/// Native and token balance held for one lockup inside the VM.
#[derive(Clone, PartialEq, Eq, Debug, Default)]
pub struct BalancePerLockup {
    pub alf: U256,
    pub tokens: Vec<(TokenId, U256)>,
}

impl BalancePerLockup {
    #[must_use]
    pub fn is_zero(&self) -> bool {
        self.alf.is_zero() && self.tokens.iter().all(|(_, v)| v.is_zero())
    }
}

/// Per-lockup asset pool, ordered by first touch for deterministic payout.
#[derive(Clone, PartialEq, Eq, Debug, Default)]
pub struct Balances {
    entries: Vec<(LockupScript, BalancePerLockup)>,
}

impl Balances {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.iter().all(|(_, b)| b.is_zero())
    }

    pub fn iter(&self) -> impl Iterator<Item = &(LockupScript, BalancePerLockup)> {
        self.entries.iter()
    }

    fn entry(&mut self, lockup: &LockupScript) -> &mut BalancePerLockup {
        if let Some(pos) = self.entries.iter().position(|(l, _)| l == lockup) {
            return &mut self.entries[pos].1;
        }
        self.entries.push((*lockup, BalancePerLockup::default()));
        &mut self.entries.last_mut().unwrap().1
    }

    #[must_use]
    pub fn alf_of(&self, lockup: &LockupScript) -> U256 {
        self.entries
            .iter()
            .find(|(l, _)| l == lockup)
            .map(|(_, b)| b.alf)
            .unwrap_or_default()
    }

    #[must_use]
    pub fn token_of(&self, lockup: &LockupScript, token: &TokenId) -> U256 {
        self.entries
            .iter()
            .find(|(l, _)| l == lockup)
            .and_then(|(_, b)| b.tokens.iter().find(|(id, _)| id == token))
            .map(|(_, v)| *v)
            .unwrap_or_default()
    }

    /// Total native value across all lockups.
    #[must_use]
    pub fn total_alf(&self) -> U256 {
        self.entries
            .iter()
            .fold(U256::zero(), |acc, (_, b)| acc.wrapping_add(b.alf))
    }

    pub fn add_alf(&mut self, lockup: &LockupScript, amount: U256) -> Result<(), ExeFailure> {
        let entry = self.entry(lockup);
        entry.alf = entry
            .alf
            .checked_add(amount)
            .ok_or(ExeFailure::BalanceOverflow)?;
        Ok(())
    }

    pub fn sub_alf(&mut self, lockup: &LockupScript, amount: U256) -> Result<(), ExeFailure> {
        let entry = self.entry(lockup);
        entry.alf = entry
            .alf
            .checked_sub(amount)
            .ok_or(ExeFailure::NotEnoughBalance)?;
        Ok(())
    }

    pub fn add_token(
        &mut self,
        lockup: &LockupScript,
        token: &TokenId,
        amount: U256,
    ) -> Result<(), ExeFailure> {
        let entry = self.entry(lockup);
        if let Some((_, v)) = entry.tokens.iter_mut().find(|(id, _)| id == token) {
            *v = v.checked_add(amount).ok_or(ExeFailure::BalanceOverflow)?;
        } else {
            entry.tokens.push((*token, amount));
        }
        Ok(())
    }

    pub fn sub_token(
        &mut self,
        lockup: &LockupScript,
        token: &TokenId,
        amount: U256,
    ) -> Result<(), ExeFailure> {
        let entry = self.entry(lockup);
        let (_, v) = entry
            .tokens
            .iter_mut()
            .find(|(id, _)| id == token)
            .ok_or(ExeFailure::NotEnoughBalance)?;
        *v = v.checked_sub(amount).ok_or(ExeFailure::NotEnoughBalance)?;
        Ok(())
    }

    /// Fold `other` into this pool.
    pub fn merge(&mut self, other: Balances) -> Result<(), ExeFailure> {
        for (lockup, bal) in other.entries {
            self.add_alf(&lockup, bal.alf)?;
            for (token, amount) in bal.tokens {
                self.add_token(&lockup, &token, amount)?;
            }
        }
        Ok(())
    }

    /// Move everything out, leaving this pool empty.
    #[must_use]
    pub fn take(&mut self) -> Balances {
        std::mem::take(self)
    }

    /// Remove and return the pool of one lockup.
    pub fn take_lockup(&mut self, lockup: &LockupScript) -> Option<BalancePerLockup> {
        let pos = self.entries.iter().position(|(l, _)| l == lockup)?;
        Some(self.entries.remove(pos).1)
    }
}

/// The two asset pools of a frame: what it may still spend and what it has
/// approved for its next callee. Approvals not consumed by the callee flow
/// back on frame exit.
#[derive(Clone, PartialEq, Eq, Debug, Default)]
pub struct BalanceState {
    pub remaining: Balances,
    pub approved: Balances,
}

impl BalanceState {
    #[must_use]
    pub fn from_remaining(remaining: Balances) -> Self {
        Self {
            remaining,
            approved: Balances::new(),
        }
    }

    pub fn approve_alf(&mut self, lockup: &LockupScript, amount: U256) -> Result<(), ExeFailure> {
        self.remaining.sub_alf(lockup, amount)?;
        self.approved.add_alf(lockup, amount)
    }

    pub fn approve_token(
        &mut self,
        lockup: &LockupScript,
        token: &TokenId,
        amount: U256,
    ) -> Result<(), ExeFailure> {
        self.remaining.sub_token(lockup, token, amount)?;
        self.approved.add_token(lockup, token, amount)
    }

    /// Everything left in both pools.
    pub fn drain(&mut self) -> Result<Balances, ExeFailure> {
        let mut out = self.remaining.take();
        out.merge(self.approved.take())?;
        Ok(out)
    }
}

/// What a frame executes on.
#[derive(Clone, PartialEq, Eq, Debug)]
pub enum FrameObj {
    /// The transaction script.
    Script,

    /// A deployed contract.
    Contract(ContractId),
}

/// One method activation.
#[derive(Clone, Debug)]
pub struct Frame {
    pub obj: FrameObj,
    pub method: Method,
    pub pc: usize,
    pub locals: Vec<Val>,
    pub balances: BalanceState,

    /// Hash of the frame's contract state at entry; for script frames, of
    /// the transaction id.
    pub initial_state_hash: Hash256,
}

impl Frame {
    #[must_use]
    pub fn new(
        obj: FrameObj,
        method: Method,
        balances: BalanceState,
        initial_state_hash: Hash256,
    ) -> Self {
        let locals = vec![Val::zero_u256(); usize::from(method.local_count)];
        Self {
            obj,
            method,
            pc: 0,
            locals,
            balances,
            initial_state_hash,
        }
    }

    #[must_use]
    pub fn contract_id(&self) -> Option<ContractId> {
        match &self.obj {
            FrameObj::Script => None,
            FrameObj::Contract(id) => Some(*id),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lockup(n: u8) -> LockupScript {
        LockupScript::P2pkh(Hash256::hash_from_slice([n], "test"))
    }

    #[test]
    fn balances_add_sub() {
        let mut b = Balances::new();
        b.add_alf(&lockup(1), U256::from_u64(10)).unwrap();
        b.sub_alf(&lockup(1), U256::from_u64(4)).unwrap();
        assert_eq!(b.alf_of(&lockup(1)), U256::from_u64(6));
        assert_eq!(
            b.sub_alf(&lockup(1), U256::from_u64(7)),
            Err(ExeFailure::NotEnoughBalance)
        );
        assert_eq!(
            b.sub_alf(&lockup(2), U256::from_u64(1)),
            Err(ExeFailure::NotEnoughBalance)
        );
    }

    #[test]
    fn approvals_move_between_pools() {
        let mut remaining = Balances::new();
        remaining.add_alf(&lockup(1), U256::from_u64(10)).unwrap();
        let mut state = BalanceState::from_remaining(remaining);

        state.approve_alf(&lockup(1), U256::from_u64(4)).unwrap();
        assert_eq!(state.remaining.alf_of(&lockup(1)), U256::from_u64(6));
        assert_eq!(state.approved.alf_of(&lockup(1)), U256::from_u64(4));

        // Unconsumed approvals flow back on drain.
        let drained = state.drain().unwrap();
        assert_eq!(drained.alf_of(&lockup(1)), U256::from_u64(10));
    }

    #[test]
    fn token_bookkeeping() {
        let token = Hash256::hash_from_slice("token", "test");
        let mut b = Balances::new();
        b.add_token(&lockup(1), &token, U256::from_u64(5)).unwrap();
        b.sub_token(&lockup(1), &token, U256::from_u64(2)).unwrap();
        assert_eq!(b.token_of(&lockup(1), &token), U256::from_u64(3));
        assert_eq!(
            b.sub_token(&lockup(1), &Hash256::zero(), U256::from_u64(1)),
            Err(ExeFailure::NotEnoughBalance)
        );
    }

    #[test]
    fn merge_accumulates() {
        let mut a = Balances::new();
        a.add_alf(&lockup(1), U256::from_u64(1)).unwrap();
        let mut b = Balances::new();
        b.add_alf(&lockup(1), U256::from_u64(2)).unwrap();
        b.add_alf(&lockup(2), U256::from_u64(3)).unwrap();
        a.merge(b).unwrap();
        assert_eq!(a.alf_of(&lockup(1)), U256::from_u64(3));
        assert_eq!(a.alf_of(&lockup(2)), U256::from_u64(3));
    }
}
