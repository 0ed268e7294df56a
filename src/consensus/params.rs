// Copyright (c) 2024 The Latticecoin Core developers
// Licensed under the Apache License, Version 2.0 see LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0 or the MIT license, see
// LICENSE-MIT or http://opensource.org/licenses/MIT

use crate::primitives::U256;
use static_assertions::{const_assert, const_assert_eq};

/// Default number of address groups. Chains form a `GROUPS x GROUPS` grid.
pub const GROUPS: u16 = 4;

/// Default number of chains in the grid.
pub const CHAINS: u16 = GROUPS * GROUPS;

/// Length of a block's dependency vector: `GROUPS - 1` intra-group deps plus
/// `GROUPS` inter-group deps.
pub const DEPS_LEN: usize = 2 * GROUPS as usize - 1;

/// Smallest unit per coin.
pub const COIN: u64 = 1_000_000_000_000_000_000;

/// Difficulty is adjusted so that each chain produces a block every `n` ms.
pub const BLOCK_TARGET_TIME_MS: u64 = 64_000;

/// Number of blocks averaged by the difficulty window.
pub const POW_AVERAGING_WINDOW: u64 = 17;

/// Undamped time a full difficulty window is expected to span.
pub const EXPECTED_WINDOW_TIME_SPAN_MS: u64 = POW_AVERAGING_WINDOW * BLOCK_TARGET_TIME_MS;

/// Lower clamp for the damped window time span.
pub const WINDOW_TIME_SPAN_MIN_MS: u64 = EXPECTED_WINDOW_TIME_SPAN_MS * 7 / 10;

/// Upper clamp for the damped window time span.
pub const WINDOW_TIME_SPAN_MAX_MS: u64 = EXPECTED_WINDOW_TIME_SPAN_MS * 13 / 10;

/// Number of leading zero bits every mining target must carry. The expanded
/// maximum target is `2^256 >> MAX_MINING_TARGET_ZEROS - 1`.
pub const MAX_MINING_TARGET_ZEROS: u32 = 8;

/// Upper bound on transactions per block, coinbase included.
pub const MAX_TXS_PER_BLOCK: usize = 2_000;

/// Upper bound on the summed gas of a block's transactions.
pub const MAX_GAS_PER_BLOCK: u64 = 5_000_000;

/// Gas charged for the cheapest possible transaction; also the coinbase's
/// declared gas amount.
pub const MINIMAL_GAS: u64 = 20_000;

/// Floor for transaction gas prices, in smallest units per gas.
pub const MINIMAL_GAS_PRICE: u64 = 100_000_000_000;

/// Upper bound on the gas of a single transaction.
pub const MAX_GAS_PER_TX: u64 = 625_000;

/// Coinbase outputs stay time-locked for `n` ms past the block timestamp.
pub const COINBASE_LOCKUP_PERIOD_MS: u64 = 600_000;

/// Minimum amount deposited into any newly created asset or contract output.
pub const DUST_UTXO_AMOUNT: u64 = 1_000_000_000_000;

/// Initial mining reward per block, in smallest units.
pub const INITIAL_BLOCK_REWARD: u64 = 3 * COIN;

/// Reward halves every `n` blocks of a chain.
pub const HALVING_INTERVAL: u64 = 2_000_000;

/// Number of halvings after which the reward stays constant.
pub const MAX_HALVINGS: u64 = 7;

/// Maximum depth of the VM frame stack.
pub const FRAME_STACK_MAX_SIZE: usize = 128;

/// Maximum depth of the VM operand stack.
pub const OPERAND_STACK_MAX_SIZE: usize = 1_024;

/// Hard cap on canonical hashes returned to a single sync request.
pub const MAX_SYNC_HASHES: usize = 1_000;

/// New blocks with timestamps further than `n` ms in the future are invalid.
pub const BLOCK_TIMESTAMP_DRIFT_MS: u64 = 15 * 60 * 1_000;

/// Wire protocol version spoken by this build.
pub const WIRE_VERSION: u32 = 1;

/// Mining reward of a block at the given chain height.
#[must_use]
pub fn mining_reward(height: u64) -> U256 {
    let halvings = std::cmp::min(height / HALVING_INTERVAL, MAX_HALVINGS);
    U256::from_u64(INITIAL_BLOCK_REWARD >> halvings)
}

/// Coinbase payout for a block: the mining reward plus half the collected
/// gas fee, capped at twice the reward so fee spikes cannot dominate
/// issuance.
#[must_use]
pub fn total_reward(gas_fee: U256, reward: U256) -> U256 {
    let half_fee = gas_fee.checked_div(U256::from_u64(2)).unwrap_or_default();
    let uncapped = reward.checked_add(half_fee).unwrap_or_else(U256::max_value);
    let ceiling = reward.wrapping_mul(U256::from_u64(2));
    std::cmp::min(uncapped, ceiling)
}

const_assert!(GROUPS > 0);
const_assert!(GROUPS <= 16);
const_assert_eq!(DEPS_LEN, 2 * GROUPS as usize - 1);
const_assert!(POW_AVERAGING_WINDOW >= 3);
const_assert!(WINDOW_TIME_SPAN_MIN_MS < EXPECTED_WINDOW_TIME_SPAN_MS);
const_assert!(WINDOW_TIME_SPAN_MAX_MS > EXPECTED_WINDOW_TIME_SPAN_MS);
const_assert!(MAX_GAS_PER_TX <= MAX_GAS_PER_BLOCK);
const_assert!(MINIMAL_GAS <= MAX_GAS_PER_TX);
const_assert!(MAX_TXS_PER_BLOCK >= 1);
const_assert!(FRAME_STACK_MAX_SIZE >= 2);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn it_maps_height_to_mining_reward() {
        assert_eq!(mining_reward(0), U256::from_u64(INITIAL_BLOCK_REWARD));
        assert_eq!(
            mining_reward(HALVING_INTERVAL - 1),
            U256::from_u64(INITIAL_BLOCK_REWARD)
        );
        assert_eq!(
            mining_reward(HALVING_INTERVAL),
            U256::from_u64(INITIAL_BLOCK_REWARD / 2)
        );
        assert_eq!(
            mining_reward(HALVING_INTERVAL * (MAX_HALVINGS + 5)),
            mining_reward(HALVING_INTERVAL * MAX_HALVINGS)
        );
    }

    #[test]
    fn total_reward_caps_fee_contribution() {
        let reward = U256::from_u64(100);
        assert_eq!(total_reward(U256::zero(), reward), reward);
        assert_eq!(
            total_reward(U256::from_u64(50), reward),
            U256::from_u64(125)
        );
        // Fees past the ceiling are capped at twice the reward.
        assert_eq!(
            total_reward(U256::from_u64(1_000_000), reward),
            U256::from_u64(200)
        );
    }
}
