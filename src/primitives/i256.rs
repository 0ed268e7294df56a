// Copyright (c) 2024 The Latticecoin Core developers
// Licensed under the Apache License, Version 2.0 see LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0 or the MIT license, see
// LICENSE-MIT or http://opensource.org/licenses/MIT

use crate::primitives::U256;
use bincode::{Decode, Encode};
use primitive_types::U256 as RawU256;
use std::cmp::Ordering;
use std::fmt;

/// Signed 256-bit integer in two's complement over [`U256`] limbs. Checked
/// operations return `None` on overflow; division and modulo by zero (and
/// `MIN / -1`) yield `None`.
#[derive(Clone, Copy, PartialEq, Eq, Default, Hash)]
pub struct I256(RawU256);

const SIGN_BIT: usize = 255;

impl I256 {
    #[must_use]
    pub fn zero() -> Self {
        Self(RawU256::zero())
    }

    #[must_use]
    pub fn one() -> Self {
        Self(RawU256::one())
    }

    #[must_use]
    pub fn minus_one() -> Self {
        Self(RawU256::max_value())
    }

    #[must_use]
    pub fn min_value() -> Self {
        Self(RawU256::one() << SIGN_BIT)
    }

    #[must_use]
    pub fn max_value() -> Self {
        Self(RawU256::max_value() >> 1)
    }

    #[must_use]
    pub fn from_i64(v: i64) -> Self {
        if v >= 0 {
            Self(RawU256::from(v as u64))
        } else {
            Self(RawU256::max_value() - RawU256::from(v.unsigned_abs()) + RawU256::one())
        }
    }

    #[must_use]
    pub fn from_raw(v: U256) -> Self {
        Self(v.raw())
    }

    #[must_use]
    pub fn to_raw(&self) -> U256 {
        U256(self.0)
    }

    #[must_use]
    pub fn is_zero(&self) -> bool {
        self.0.is_zero()
    }

    #[must_use]
    pub fn is_negative(&self) -> bool {
        self.0.bit(SIGN_BIT)
    }

    #[must_use]
    pub fn to_i64(&self) -> Option<i64> {
        if self.is_negative() {
            let mag = self.magnitude();
            if mag > RawU256::from(i64::MAX as u64) + RawU256::one() {
                return None;
            }
            if mag == RawU256::from(i64::MAX as u64) + RawU256::one() {
                return Some(i64::MIN);
            }
            Some(-(mag.low_u64() as i64))
        } else {
            if self.0 > RawU256::from(i64::MAX as u64) {
                return None;
            }
            Some(self.0.low_u64() as i64)
        }
    }

    fn magnitude(&self) -> RawU256 {
        if self.is_negative() {
            (!self.0).overflowing_add(RawU256::one()).0
        } else {
            self.0
        }
    }

    fn from_sign_magnitude(negative: bool, mag: RawU256) -> Option<Self> {
        if mag.is_zero() {
            return Some(Self::zero());
        }
        if negative {
            if mag > RawU256::one() << SIGN_BIT {
                return None;
            }
            Some(Self((!mag).overflowing_add(RawU256::one()).0))
        } else {
            if mag > RawU256::max_value() >> 1 {
                return None;
            }
            Some(Self(mag))
        }
    }

    #[must_use]
    pub fn checked_add(&self, other: Self) -> Option<Self> {
        let sum = Self(self.0.overflowing_add(other.0).0);
        // Overflow iff both operands share a sign the result does not.
        if self.is_negative() == other.is_negative() && sum.is_negative() != self.is_negative() {
            return None;
        }
        Some(sum)
    }

    #[must_use]
    pub fn checked_sub(&self, other: Self) -> Option<Self> {
        let diff = Self(self.0.overflowing_sub(other.0).0);
        if self.is_negative() != other.is_negative() && diff.is_negative() != self.is_negative() {
            return None;
        }
        Some(diff)
    }

    #[must_use]
    pub fn checked_mul(&self, other: Self) -> Option<Self> {
        let negative = self.is_negative() != other.is_negative();
        let mag = self.magnitude().checked_mul(other.magnitude())?;
        Self::from_sign_magnitude(negative, mag)
    }

    #[must_use]
    pub fn checked_div(&self, other: Self) -> Option<Self> {
        if other.is_zero() {
            return None;
        }
        let negative = self.is_negative() != other.is_negative();
        let mag = self.magnitude() / other.magnitude();
        Self::from_sign_magnitude(negative, mag)
    }

    #[must_use]
    pub fn checked_rem(&self, other: Self) -> Option<Self> {
        if other.is_zero() {
            return None;
        }
        let mag = self.magnitude() % other.magnitude();
        Self::from_sign_magnitude(self.is_negative(), mag)
    }

    #[must_use]
    pub fn checked_neg(&self) -> Option<Self> {
        Self::from_sign_magnitude(!self.is_negative(), self.magnitude())
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
}

impl PartialOrd for I256 {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for I256 {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self.is_negative(), other.is_negative()) {
            (true, false) => Ordering::Less,
            (false, true) => Ordering::Greater,
            _ => self.0.cmp(&other.0),
        }
    }
}

impl From<i64> for I256 {
    fn from(v: i64) -> Self {
        Self::from_i64(v)
    }
}

impl fmt::Debug for I256 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_negative() {
            f.debug_tuple("I256")
                .field(&format!("-{}", self.magnitude()))
                .finish()
        } else {
            f.debug_tuple("I256").field(&self.0.to_string()).finish()
        }
    }
}

impl Encode for I256 {
    fn encode<E: bincode::enc::Encoder>(
        &self,
        encoder: &mut E,
    ) -> core::result::Result<(), bincode::error::EncodeError> {
        bincode::Encode::encode(&self.to_raw(), encoder)?;
        Ok(())
    }
}

impl Decode for I256 {
    fn decode<D: bincode::de::Decoder>(
        decoder: &mut D,
    ) -> core::result::Result<Self, bincode::error::DecodeError> {
        let raw: U256 = bincode::Decode::decode(decoder)?;
        Ok(Self::from_raw(raw))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signed_roundtrip_i64() {
        for v in [0i64, 1, -1, 42, -42, i64::MAX, i64::MIN] {
            assert_eq!(I256::from_i64(v).to_i64(), Some(v));
        }
    }

    #[test]
    fn addition_overflow_is_checked() {
        assert_eq!(I256::max_value().checked_add(I256::one()), None);
        assert_eq!(I256::min_value().checked_add(I256::minus_one()), None);
        assert_eq!(
            I256::from_i64(-5).checked_add(I256::from_i64(7)),
            Some(I256::from_i64(2))
        );
    }

    #[test]
    fn subtraction_overflow_is_checked() {
        assert_eq!(I256::min_value().checked_sub(I256::one()), None);
        assert_eq!(
            I256::from_i64(3).checked_sub(I256::from_i64(10)),
            Some(I256::from_i64(-7))
        );
    }

    #[test]
    fn multiplication_signs() {
        assert_eq!(
            I256::from_i64(-3).checked_mul(I256::from_i64(4)),
            Some(I256::from_i64(-12))
        );
        assert_eq!(
            I256::from_i64(-3).checked_mul(I256::from_i64(-4)),
            Some(I256::from_i64(12))
        );
        assert_eq!(I256::min_value().checked_mul(I256::minus_one()), None);
    }

    #[test]
    fn division_by_zero_has_no_value() {
        assert_eq!(I256::from_i64(10).checked_div(I256::zero()), None);
        assert_eq!(I256::from_i64(10).checked_rem(I256::zero()), None);
        assert_eq!(I256::min_value().checked_div(I256::minus_one()), None);
    }

    #[test]
    fn remainder_keeps_dividend_sign() {
        assert_eq!(
            I256::from_i64(-7).checked_rem(I256::from_i64(3)),
            Some(I256::from_i64(-1))
        );
        assert_eq!(
            I256::from_i64(7).checked_rem(I256::from_i64(-3)),
            Some(I256::from_i64(1))
        );
    }

    #[test]
    fn negation_is_checked() {
        assert_eq!(I256::from_i64(5).checked_neg(), Some(I256::from_i64(-5)));
        assert_eq!(I256::from_i64(-5).checked_neg(), Some(I256::from_i64(5)));
        assert_eq!(I256::min_value().checked_neg(), None);
    }

    #[test]
    fn wrapping_ops_are_modular() {
        assert_eq!(
            I256::max_value().wrapping_add(I256::one()),
            I256::min_value()
        );
        assert_eq!(
            I256::min_value().wrapping_sub(I256::one()),
            I256::max_value()
        );
        assert_eq!(
            I256::from_i64(-2).wrapping_mul(I256::from_i64(3)),
            I256::from_i64(-6)
        );
    }

    #[test]
    fn ordering_crosses_zero() {
        assert!(I256::from_i64(-1) < I256::zero());
        assert!(I256::from_i64(-2) < I256::from_i64(-1));
        assert!(I256::from_i64(1) > I256::from_i64(-100));
    }

    #[test]
    fn codec_roundtrip() {
        let v = I256::from_i64(-123_456_789);
        let bytes = crate::codec::encode_to_vec(&v).unwrap();
        let decoded: I256 = crate::codec::decode(&bytes).unwrap();
        assert_eq!(decoded, v);
    }
}
