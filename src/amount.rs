//! Amount representations for the dual-coin system
//!
//! VAR amounts are bounded 64-bit atom counts.  SKA amounts use arbitrary
//! precision arithmetic because 900 trillion coins with 10^18 atoms per coin
//! exceeds the int64 range.  Conversions to fixed width happen only at
//! explicit boundaries (the VAR value field, wire length prefixes).

use num_bigint::{BigInt, Sign};
use num_traits::{Signed, ToPrimitive, Zero};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;

/// The number of atoms in one VAR coin.
pub const ATOMS_PER_VAR: i64 = 100_000_000;

/// The maximum VAR transaction amount allowed, in atoms: 21 million coins.
pub const MAX_VAR_ATOMS: i64 = 21_000_000 * ATOMS_PER_VAR;

/// The minimum SKA amount (in atoms) to avoid dust.  Outputs below this
/// value are rejected by relay policy.
pub const MIN_SKA_DUST_ATOMS: i64 = 30;

/// The minimum fee for SKA transactions, in atoms.  This keeps the staker
/// share non-zero for every voter after the fee split.
pub const MIN_SKA_TX_FEE_ATOMS: i64 = 10;

/// Divisor used in fee rate calculations (atoms per kilobyte).
pub const BYTES_PER_KILOBYTE: i64 = 1000;

/// Returns the number of atoms in one SKA coin (10^18).
pub fn atoms_per_ska_coin() -> BigInt {
    BigInt::from(10u32).pow(18)
}

/// An SKA coin amount in atoms, backed by arbitrary precision arithmetic.
///
/// All operations return new values rather than mutating the receiver, so
/// an amount handed to a caller can never be changed behind its back.
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SkaAmount(BigInt);

impl SkaAmount {
    /// Creates a zero amount.
    pub fn zero() -> Self {
        SkaAmount(BigInt::zero())
    }

    /// Creates an amount from an atom count that fits in an int64.
    pub fn from_i64(atoms: i64) -> Self {
        SkaAmount(BigInt::from(atoms))
    }

    /// Creates an amount from a raw big integer atom count.
    pub fn from_big(atoms: BigInt) -> Self {
        SkaAmount(atoms)
    }

    /// Creates an amount from a whole coin count, multiplying by 10^18.
    pub fn from_coins(coins: i64) -> Self {
        SkaAmount(BigInt::from(coins) * atoms_per_ska_coin())
    }

    /// Decodes a big-endian magnitude byte slice.  An empty slice decodes
    /// to zero.  This is the inverse of [`SkaAmount::to_bytes`].
    pub fn from_bytes(b: &[u8]) -> Self {
        if b.is_empty() {
            return SkaAmount::zero();
        }
        SkaAmount(BigInt::from_bytes_be(Sign::Plus, b))
    }

    /// Decodes a sign-prefixed magnitude produced by
    /// [`SkaAmount::signed_bytes`].  The first byte is 0 for non-negative
    /// values and 1 for negative values; a lone sign byte decodes to zero.
    pub fn from_signed_bytes(b: &[u8]) -> Self {
        if b.len() <= 1 {
            return SkaAmount::zero();
        }
        let magnitude = BigInt::from_bytes_be(Sign::Plus, &b[1..]);
        if b[0] == 1 {
            SkaAmount(-magnitude)
        } else {
            SkaAmount(magnitude)
        }
    }

    /// Returns the sum of self and other.
    pub fn add(&self, other: &SkaAmount) -> SkaAmount {
        SkaAmount(&self.0 + &other.0)
    }

    /// Returns self minus other.  The result may be negative, which is
    /// needed for intermediate fee arithmetic.
    pub fn sub(&self, other: &SkaAmount) -> SkaAmount {
        SkaAmount(&self.0 - &other.0)
    }

    /// Returns self multiplied by a small scalar.
    pub fn mul(&self, n: i64) -> SkaAmount {
        SkaAmount(&self.0 * BigInt::from(n))
    }

    /// Returns self multiplied by a big integer scalar.
    pub fn mul_big(&self, n: &BigInt) -> SkaAmount {
        SkaAmount(&self.0 * n)
    }

    /// Returns self divided by n using integer division, or `None` when n
    /// is zero.
    pub fn checked_div(&self, n: i64) -> Option<SkaAmount> {
        if n == 0 {
            return None;
        }
        Some(SkaAmount(&self.0 / BigInt::from(n)))
    }

    pub fn is_negative(&self) -> bool {
        self.0.is_negative()
    }

    pub fn is_zero(&self) -> bool {
        self.0.is_zero()
    }

    pub fn is_positive(&self) -> bool {
        self.0.is_positive()
    }

    /// Returns -1, 0 or +1 according to the sign of the amount.
    pub fn sign(&self) -> i8 {
        match self.0.sign() {
            Sign::Minus => -1,
            Sign::NoSign => 0,
            Sign::Plus => 1,
        }
    }

    /// Returns the big-endian magnitude bytes of the absolute value with no
    /// leading zeros.  Zero serializes to the empty slice.
    pub fn to_bytes(&self) -> Vec<u8> {
        if self.0.is_zero() {
            return Vec::new();
        }
        self.0.abs().to_bytes_be().1
    }

    /// Returns a sign-preserving encoding: one sign byte (0 non-negative,
    /// 1 negative) followed by the magnitude.  Zero encodes as the single
    /// byte 0.
    pub fn signed_bytes(&self) -> Vec<u8> {
        if self.0.is_zero() {
            return vec![0];
        }
        let magnitude = self.0.abs().to_bytes_be().1;
        let mut out = Vec::with_capacity(1 + magnitude.len());
        out.push(if self.0.is_negative() { 1 } else { 0 });
        out.extend_from_slice(&magnitude);
        out
    }

    /// Returns a copy of the underlying big integer.
    pub fn to_big(&self) -> BigInt {
        self.0.clone()
    }

    /// Returns the amount as an int64 when it fits, `None` otherwise.
    pub fn to_i64(&self) -> Option<i64> {
        self.0.to_i64()
    }

    /// Returns the whole coin count, discarding any fractional atoms.
    pub fn to_coins(&self) -> BigInt {
        &self.0 / atoms_per_ska_coin()
    }

    /// Formats the amount as a decimal coin string with full precision,
    /// e.g. 1500000000000000000 atoms renders as "1.5".
    pub fn to_decimal_string(&self) -> String {
        let per_coin = atoms_per_ska_coin();
        let decimals = per_coin.to_string().len() - 1;

        let negative = self.0.is_negative();
        let abs = self.0.abs();
        let int_part = &abs / &per_coin;
        let frac_part = &abs % &per_coin;

        let mut frac = frac_part.to_string();
        while frac.len() < decimals {
            frac.insert(0, '0');
        }
        let frac = frac.trim_end_matches('0');

        let mut out = if frac.is_empty() {
            int_part.to_string()
        } else {
            format!("{}.{}", int_part, frac)
        };
        if negative {
            out.insert(0, '-');
        }
        out
    }

    /// Returns true when the amount is below the dust threshold.
    pub fn is_dust(&self) -> bool {
        self.0 < BigInt::from(MIN_SKA_DUST_ATOMS)
    }
}

impl fmt::Display for SkaAmount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<BigInt> for SkaAmount {
    fn from(v: BigInt) -> Self {
        SkaAmount(v)
    }
}

/// A transaction value discriminated by asset family.
///
/// A VAR value is a bounded 64-bit atom count; an SKA value is arbitrary
/// precision.  Keeping the two in one sum type makes it impossible to build
/// an output whose value field disagrees with its asset family.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Amount {
    Var(i64),
    Ska(SkaAmount),
}

impl Amount {
    pub fn is_var(&self) -> bool {
        matches!(self, Amount::Var(_))
    }

    pub fn is_ska(&self) -> bool {
        matches!(self, Amount::Ska(_))
    }

    /// Returns the VAR atom count, or `None` for SKA values.
    pub fn var_atoms(&self) -> Option<i64> {
        match self {
            Amount::Var(v) => Some(*v),
            Amount::Ska(_) => None,
        }
    }

    /// Returns the SKA atom count, or `None` for VAR values.
    pub fn ska_atoms(&self) -> Option<&SkaAmount> {
        match self {
            Amount::Var(_) => None,
            Amount::Ska(a) => Some(a),
        }
    }

    pub fn is_zero(&self) -> bool {
        match self {
            Amount::Var(v) => *v == 0,
            Amount::Ska(a) => a.is_zero(),
        }
    }

    /// Widens the value to a big integer regardless of family.
    pub fn to_big(&self) -> BigInt {
        match self {
            Amount::Var(v) => BigInt::from(*v),
            Amount::Ska(a) => a.to_big(),
        }
    }

    /// Returns the value as an int64 when it fits.  Oversized SKA values
    /// yield 0 so callers that only handle the bounded range degrade the
    /// same way in every code path.
    pub fn to_i64_lossy(&self) -> i64 {
        match self {
            Amount::Var(v) => *v,
            Amount::Ska(a) => a.to_i64().unwrap_or(0),
        }
    }

    /// Adds two amounts of the same family, returning `None` on a family
    /// mismatch or VAR overflow.
    pub fn checked_add(&self, other: &Amount) -> Option<Amount> {
        match (self, other) {
            (Amount::Var(a), Amount::Var(b)) => a.checked_add(*b).map(Amount::Var),
            (Amount::Ska(a), Amount::Ska(b)) => Some(Amount::Ska(a.add(b))),
            _ => None,
        }
    }

    /// Subtracts two amounts of the same family, returning `None` on a
    /// family mismatch or VAR overflow.
    pub fn checked_sub(&self, other: &Amount) -> Option<Amount> {
        match (self, other) {
            (Amount::Var(a), Amount::Var(b)) => a.checked_sub(*b).map(Amount::Var),
            (Amount::Ska(a), Amount::Ska(b)) => Some(Amount::Ska(a.sub(b))),
            _ => None,
        }
    }

    /// Multiplies by a small scalar, returning `None` on VAR overflow.
    pub fn checked_mul(&self, n: i64) -> Option<Amount> {
        match self {
            Amount::Var(v) => v.checked_mul(n).map(Amount::Var),
            Amount::Ska(a) => Some(Amount::Ska(a.mul(n))),
        }
    }
}

impl PartialOrd for Amount {
    /// Amounts of different families are not comparable.
    fn partial_cmp(&self, other: &Amount) -> Option<Ordering> {
        match (self, other) {
            (Amount::Var(a), Amount::Var(b)) => Some(a.cmp(b)),
            (Amount::Ska(a), Amount::Ska(b)) => Some(a.cmp(b)),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zero_serializes_empty() {
        assert!(SkaAmount::zero().to_bytes().is_empty());
        assert_eq!(SkaAmount::from_bytes(&[]), SkaAmount::zero());
    }

    #[test]
    fn test_bytes_round_trip() {
        let amt = SkaAmount::from_coins(900_000_000_000_000);
        let bytes = amt.to_bytes();
        assert!(!bytes.is_empty());
        assert!(bytes.len() <= 255);
        assert_ne!(bytes[0], 0, "magnitude must have no leading zeros");
        assert_eq!(SkaAmount::from_bytes(&bytes), amt);
    }

    #[test]
    fn test_signed_bytes_round_trip() {
        let positive = SkaAmount::from_i64(123_456);
        let negative = positive.sub(&SkaAmount::from_i64(1_000_000));
        assert!(negative.is_negative());

        assert_eq!(
            SkaAmount::from_signed_bytes(&positive.signed_bytes()),
            positive
        );
        assert_eq!(
            SkaAmount::from_signed_bytes(&negative.signed_bytes()),
            negative
        );
        assert_eq!(SkaAmount::zero().signed_bytes(), vec![0]);
        assert_eq!(SkaAmount::from_signed_bytes(&[0]), SkaAmount::zero());
    }

    #[test]
    fn test_arithmetic() {
        let a = SkaAmount::from_i64(1000);
        let b = SkaAmount::from_i64(300);
        assert_eq!(a.add(&b), SkaAmount::from_i64(1300));
        assert_eq!(a.sub(&b), SkaAmount::from_i64(700));
        assert_eq!(a.mul(3), SkaAmount::from_i64(3000));
        assert_eq!(a.checked_div(3), Some(SkaAmount::from_i64(333)));
        assert_eq!(a.checked_div(0), None);
        assert!(a > b);
    }

    #[test]
    fn test_sign_helpers() {
        assert_eq!(SkaAmount::zero().sign(), 0);
        assert_eq!(SkaAmount::from_i64(5).sign(), 1);
        assert_eq!(SkaAmount::from_i64(-5).sign(), -1);
        assert!(SkaAmount::from_i64(-5).is_negative());
        assert!(SkaAmount::from_i64(5).is_positive());
    }

    #[test]
    fn test_to_i64_overflow() {
        let big = SkaAmount::from_coins(900_000_000_000_000);
        assert_eq!(big.to_i64(), None);
        assert_eq!(SkaAmount::from_i64(42).to_i64(), Some(42));
    }

    #[test]
    fn test_decimal_string() {
        let one_and_a_half = SkaAmount::from_big(BigInt::from(15) * BigInt::from(10u32).pow(17));
        assert_eq!(one_and_a_half.to_decimal_string(), "1.5");
        assert_eq!(SkaAmount::from_coins(2).to_decimal_string(), "2");
        assert_eq!(SkaAmount::zero().to_decimal_string(), "0");
    }

    #[test]
    fn test_dust() {
        assert!(SkaAmount::from_i64(MIN_SKA_DUST_ATOMS - 1).is_dust());
        assert!(!SkaAmount::from_i64(MIN_SKA_DUST_ATOMS).is_dust());
    }

    #[test]
    fn test_amount_family_discipline() {
        let var = Amount::Var(100);
        let ska = Amount::Ska(SkaAmount::from_i64(100));
        assert!(var.checked_add(&ska).is_none());
        assert!(var.partial_cmp(&ska).is_none());
        assert_eq!(
            var.checked_add(&Amount::Var(50)),
            Some(Amount::Var(150))
        );
        assert_eq!(Amount::Var(MAX_VAR_ATOMS).checked_add(&Amount::Var(i64::MAX)), None);
    }

    #[test]
    fn test_amount_lossy_conversion() {
        assert_eq!(Amount::Var(7).to_i64_lossy(), 7);
        assert_eq!(Amount::Ska(SkaAmount::from_i64(9)).to_i64_lossy(), 9);
        let big = Amount::Ska(SkaAmount::from_coins(900_000_000_000_000));
        assert_eq!(big.to_i64_lossy(), 0);
    }
}
