// Copyright (c) 2024 The Latticecoin Core developers
// Licensed under the Apache License, Version 2.0 see LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0 or the MIT license, see
// LICENSE-MIT or http://opensource.org/licenses/MIT

use bincode::{Decode, Encode};
use primitive_types::U256 as RawU256;
use std::cmp::Ordering;
use std::fmt;

/// Unsigned 256-bit integer used for amounts, targets and cumulative
/// weights. Checked operations return `None` on overflow; wrapping
/// operations are modular by `2^256`; division and modulo by zero yield
/// `None`.
#[derive(Clone, Copy, PartialEq, Eq, Default, Hash)]
pub struct U256(pub(crate) RawU256);

impl U256 {
    #[must_use]
    pub fn zero() -> Self {
        Self(RawU256::zero())
    }

    #[must_use]
    pub fn one() -> Self {
        Self(RawU256::one())
    }

    #[must_use]
    pub fn max_value() -> Self {
        Self(RawU256::max_value())
    }

    #[must_use]
    pub fn from_u64(v: u64) -> Self {
        Self(RawU256::from(v))
    }

    #[must_use]
    pub fn from_u128(v: u128) -> Self {
        Self(RawU256::from(v))
    }

    #[must_use]
    pub fn from_little_endian(bytes: &[u8; 32]) -> Self {
        Self(RawU256::from_little_endian(bytes))
    }

    #[must_use]
    pub fn to_little_endian(&self) -> [u8; 32] {
        let mut out = [0u8; 32];
        self.0.to_little_endian(&mut out);
        out
    }

    #[must_use]
    pub fn from_big_endian(bytes: &[u8]) -> Self {
        Self(RawU256::from_big_endian(bytes))
    }

    #[must_use]
    pub fn to_big_endian(&self) -> [u8; 32] {
        let mut out = [0u8; 32];
        self.0.to_big_endian(&mut out);
        out
    }

    #[must_use]
    pub fn is_zero(&self) -> bool {
        self.0.is_zero()
    }

    #[must_use]
    pub fn to_u64(&self) -> Option<u64> {
        if self.0 > RawU256::from(u64::MAX) {
            return None;
        }
        Some(self.0.low_u64())
    }

    #[must_use]
    pub fn checked_add(&self, other: Self) -> Option<Self> {
        self.0.checked_add(other.0).map(Self)
    }

    #[must_use]
    pub fn checked_sub(&self, other: Self) -> Option<Self> {
        self.0.checked_sub(other.0).map(Self)
    }

    #[must_use]
    pub fn checked_mul(&self, other: Self) -> Option<Self> {
        self.0.checked_mul(other.0).map(Self)
    }

    #[must_use]
    pub fn checked_div(&self, other: Self) -> Option<Self> {
        self.0.checked_div(other.0).map(Self)
    }

    #[must_use]
    pub fn checked_rem(&self, other: Self) -> Option<Self> {
        self.0.checked_rem(other.0).map(Self)
    }

    #[must_use]
    pub fn wrapping_add(&self, other: Self) -> Self {
        Self(self.0.overflowing_add(other.0).0)
    }

    #[must_use]
    pub fn wrapping_sub(&self, other: Self) -> Self {
        Self(self.0.overflowing_sub(other.0).0)
    }

    #[must_use]
    pub fn wrapping_mul(&self, other: Self) -> Self {
        Self(self.0.overflowing_mul(other.0).0)
    }

    #[must_use]
    pub fn bitand(&self, other: Self) -> Self {
        Self(self.0 & other.0)
    }

    #[must_use]
    pub fn bitor(&self, other: Self) -> Self {
        Self(self.0 | other.0)
    }

    #[must_use]
    pub fn bitxor(&self, other: Self) -> Self {
        Self(self.0 ^ other.0)
    }

    #[must_use]
    pub fn not(&self) -> Self {
        Self(!self.0)
    }

    #[must_use]
    pub fn shl(&self, shift: u32) -> Self {
        if shift >= 256 {
            return Self::zero();
        }
        Self(self.0 << shift as usize)
    }

    #[must_use]
    pub fn shr(&self, shift: u32) -> Self {
        if shift >= 256 {
            return Self::zero();
        }
        Self(self.0 >> shift as usize)
    }

    #[must_use]
    pub fn leading_zeros(&self) -> u32 {
        self.0.leading_zeros()
    }

    #[must_use]
    pub(crate) fn raw(&self) -> RawU256 {
        self.0
    }
}

impl PartialOrd for U256 {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for U256 {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.cmp(&other.0)
    }
}

impl From<u64> for U256 {
    fn from(v: u64) -> Self {
        Self::from_u64(v)
    }
}

impl fmt::Debug for U256 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("U256").field(&self.0.to_string()).finish()
    }
}

impl fmt::Display for U256 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl Encode for U256 {
    fn encode<E: bincode::enc::Encoder>(
        &self,
        encoder: &mut E,
    ) -> core::result::Result<(), bincode::error::EncodeError> {
        bincode::Encode::encode(&self.to_little_endian(), encoder)?;
        Ok(())
    }
}

impl Decode for U256 {
    fn decode<D: bincode::de::Decoder>(
        decoder: &mut D,
    ) -> core::result::Result<Self, bincode::error::DecodeError> {
        let bytes: [u8; 32] = bincode::Decode::decode(decoder)?;
        Ok(Self::from_little_endian(&bytes))
    }
}
