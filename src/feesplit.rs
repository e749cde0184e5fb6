//! Fee accumulation by coin type and the miner/staker split
//!
//! Collected fees are tracked per asset in big integer arithmetic; VAR
//! totals always fit in int64 and can be narrowed at the boundary.  The
//! split divides each asset's total proportionally between the work and
//! stake shares, with the integer rounding remainder credited to the
//! miner so no value leaks and the staker amount stays monotone in the
//! stake proportion.  The treasury receives no fees.

use crate::cointype::CoinType;
use crate::transaction::{primary_coin_type, MsgTx};
use num_bigint::BigInt;
use num_traits::{Signed, ToPrimitive, Zero};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Transaction fees collected by coin type.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeesByType {
    fees: HashMap<CoinType, BigInt>,
}

impl FeesByType {
    /// Creates an empty fee map.
    pub fn new() -> FeesByType {
        FeesByType::default()
    }

    /// Adds an int64 fee amount to the coin type.
    pub fn add(&mut self, coin_type: CoinType, amount: i64) {
        self.add_big(coin_type, &BigInt::from(amount));
    }

    /// Adds a big integer fee amount to the coin type.  Zero amounts are
    /// ignored.
    pub fn add_big(&mut self, coin_type: CoinType, amount: &BigInt) {
        if amount.is_zero() {
            return;
        }
        *self.fees.entry(coin_type).or_insert_with(BigInt::zero) += amount;
    }

    /// Returns the total for the coin type as int64, or 0 when there is
    /// none or it exceeds the int64 range.  Always safe for VAR.
    pub fn get(&self, coin_type: CoinType) -> i64 {
        self.fees
            .get(&coin_type)
            .and_then(|fee| fee.to_i64())
            .unwrap_or(0)
    }

    /// Returns a copy of the total for the coin type, if any.
    pub fn get_big(&self, coin_type: CoinType) -> Option<BigInt> {
        self.fees.get(&coin_type).cloned()
    }

    /// Returns every coin type with a positive total.
    pub fn types(&self) -> Vec<CoinType> {
        let mut types: Vec<CoinType> = self
            .fees
            .iter()
            .filter(|(_, amount)| amount.is_positive())
            .map(|(coin_type, _)| *coin_type)
            .collect();
        types.sort();
        types
    }

    /// Returns every SKA coin type with a positive total.
    pub fn ska_types(&self) -> Vec<CoinType> {
        let mut types: Vec<CoinType> = self
            .fees
            .iter()
            .filter(|(coin_type, amount)| coin_type.is_ska() && amount.is_positive())
            .map(|(coin_type, _)| *coin_type)
            .collect();
        types.sort();
        types
    }

    /// Returns true when the coin type has a positive total.
    pub fn has_fee(&self, coin_type: CoinType) -> bool {
        self.fees
            .get(&coin_type)
            .map(|amount| amount.is_positive())
            .unwrap_or(false)
    }

    /// Returns true when any SKA coin type has a positive total.
    pub fn has_ska_fees(&self) -> bool {
        self.fees
            .iter()
            .any(|(coin_type, amount)| coin_type.is_ska() && amount.is_positive())
    }

    /// Adds every positive total from another fee map into this one.
    pub fn merge(&mut self, other: &FeesByType) {
        for (coin_type, amount) in &other.fees {
            if amount.is_positive() {
                self.add_big(*coin_type, amount);
            }
        }
    }

    /// Iterates over the (coin type, total) pairs.
    pub fn iter(&self) -> impl Iterator<Item = (&CoinType, &BigInt)> {
        self.fees.iter()
    }

    pub fn is_empty(&self) -> bool {
        self.fees.is_empty()
    }
}

/// Calculates the fee of a transaction as (fee, primary coin type).
/// VAR transactions use the int64 witness and output values; SKA
/// transactions use the big integer fields.
pub fn calc_tx_fee(tx: &MsgTx) -> (BigInt, CoinType) {
    let coin_type = primary_coin_type(tx);

    if coin_type.is_ska() {
        let mut total_in = BigInt::zero();
        for tx_in in &tx.tx_in {
            if let Some(value_in) = &tx_in.ska_value_in {
                total_in += value_in.to_big();
            }
        }

        let mut total_out = BigInt::zero();
        for tx_out in &tx.tx_out {
            if let Some(atoms) = tx_out.ska_atoms() {
                total_out += atoms.to_big();
            }
        }

        return (total_in - total_out, coin_type);
    }

    let mut total_in: i64 = 0;
    for tx_in in &tx.tx_in {
        total_in = total_in.saturating_add(tx_in.value_in);
    }
    let mut total_out: i64 = 0;
    for tx_out in &tx.tx_out {
        total_out = total_out.saturating_add(tx_out.var_atoms().unwrap_or(0));
    }

    (BigInt::from(total_in - total_out), coin_type)
}

/// Splits collected fees between miners and stakers by the work and stake
/// proportions.  Only positive results are emitted; a zero denominator
/// yields two empty maps.
pub fn calc_fee_split_by_coin_type(
    fees_by_type: &FeesByType,
    work_proportion: u16,
    stake_proportion: u16,
) -> (FeesByType, FeesByType) {
    let mut miner_fees = FeesByType::new();
    let mut staker_fees = FeesByType::new();

    let denominator = work_proportion as i64 + stake_proportion as i64;
    if denominator == 0 {
        return (miner_fees, staker_fees);
    }

    let denominator = BigInt::from(denominator);
    let work = BigInt::from(work_proportion as i64);
    let stake = BigInt::from(stake_proportion as i64);

    for (coin_type, total_fee) in &fees_by_type.fees {
        if !total_fee.is_positive() {
            continue;
        }

        let mut miner_fee = total_fee * &work / &denominator;
        let staker_fee = total_fee * &stake / &denominator;

        // Rounding remainder goes to the miner.
        let remainder = total_fee - (&miner_fee + &staker_fee);
        miner_fee += remainder;

        if miner_fee.is_positive() {
            miner_fees.fees.insert(*coin_type, miner_fee);
        }
        if staker_fee.is_positive() {
            staker_fees.fees.insert(*coin_type, staker_fee);
        }
    }

    (miner_fees, staker_fees)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::amount::SkaAmount;
    use crate::transaction::{OutPoint, TxIn, TxOut};

    #[test]
    fn test_add_and_get() {
        let mut fees = FeesByType::new();
        fees.add(CoinType::VAR, 100);
        fees.add(CoinType::VAR, 50);
        fees.add_big(CoinType(1), &BigInt::from(7));
        fees.add_big(CoinType(2), &BigInt::zero());

        assert_eq!(fees.get(CoinType::VAR), 150);
        assert_eq!(fees.get_big(CoinType(1)), Some(BigInt::from(7)));
        assert_eq!(fees.get_big(CoinType(2)), None);
        assert_eq!(fees.get(CoinType(9)), 0);

        // Oversized totals narrow to 0 through the int64 accessor.
        let mut big = FeesByType::new();
        big.add_big(CoinType(1), &(BigInt::from(u64::MAX) * BigInt::from(2)));
        assert_eq!(big.get(CoinType(1)), 0);
    }

    #[test]
    fn test_type_queries() {
        let mut fees = FeesByType::new();
        fees.add(CoinType::VAR, 10);
        fees.add(CoinType(3), 5);
        fees.add(CoinType(1), 5);

        assert_eq!(fees.types(), vec![CoinType::VAR, CoinType(1), CoinType(3)]);
        assert_eq!(fees.ska_types(), vec![CoinType(1), CoinType(3)]);
        assert!(fees.has_fee(CoinType::VAR));
        assert!(!fees.has_fee(CoinType(2)));
        assert!(fees.has_ska_fees());

        let mut var_only = FeesByType::new();
        var_only.add(CoinType::VAR, 1);
        assert!(!var_only.has_ska_fees());
    }

    #[test]
    fn test_merge() {
        let mut a = FeesByType::new();
        a.add(CoinType::VAR, 10);
        let mut b = FeesByType::new();
        b.add(CoinType::VAR, 5);
        b.add(CoinType(1), 3);

        a.merge(&b);
        assert_eq!(a.get(CoinType::VAR), 15);
        assert_eq!(a.get(CoinType(1)), 3);
    }

    #[test]
    fn test_even_split() {
        let mut fees = FeesByType::new();
        fees.add(CoinType::VAR, 1000);
        fees.add(CoinType(1), 2000);

        let (miner, staker) = calc_fee_split_by_coin_type(&fees, 50, 50);
        assert_eq!(miner.get(CoinType::VAR), 500);
        assert_eq!(staker.get(CoinType::VAR), 500);
        assert_eq!(miner.get(CoinType(1)), 1000);
        assert_eq!(staker.get(CoinType(1)), 1000);
    }

    #[test]
    fn test_split_remainder_to_miner() {
        let mut fees = FeesByType::new();
        fees.add(CoinType::VAR, 100);

        let (miner, staker) = calc_fee_split_by_coin_type(&fees, 1, 2);
        assert_eq!(miner.get(CoinType::VAR), 34);
        assert_eq!(staker.get(CoinType::VAR), 66);
    }

    #[test]
    fn test_split_conserves_value() {
        let cases = [
            (1000i64, 50u16, 50u16),
            (999, 1, 2),
            (7, 3, 11),
            (1, 1, 1),
            (123_456_789, 60, 40),
        ];
        for (total, work, stake) in cases {
            let mut fees = FeesByType::new();
            fees.add(CoinType(1), total);
            let (miner, staker) = calc_fee_split_by_coin_type(&fees, work, stake);
            assert_eq!(
                miner.get(CoinType(1)) + staker.get(CoinType(1)),
                total,
                "value leaked for total {} split {}/{}",
                total,
                work,
                stake
            );
        }
    }

    #[test]
    fn test_split_zero_denominator() {
        let mut fees = FeesByType::new();
        fees.add(CoinType::VAR, 100);
        let (miner, staker) = calc_fee_split_by_coin_type(&fees, 0, 0);
        assert!(miner.is_empty());
        assert!(staker.is_empty());
    }

    #[test]
    fn test_split_skips_zero_shares() {
        let mut fees = FeesByType::new();
        fees.add(CoinType::VAR, 1);
        // The staker share of 1 atom at 1/1 rounds to zero and the
        // remainder pushes everything to the miner.
        let (miner, staker) = calc_fee_split_by_coin_type(&fees, 1, 1);
        assert_eq!(miner.get(CoinType::VAR), 1);
        assert!(!staker.has_fee(CoinType::VAR));
    }

    #[test]
    fn test_calc_tx_fee_var() {
        let mut tx = MsgTx::new();
        tx.add_tx_in(TxIn::new(OutPoint::new([1; 32], 0, 0), 1_000_000, vec![]));
        tx.add_tx_out(TxOut::new_var(900_000, vec![]));

        let (fee, coin_type) = calc_tx_fee(&tx);
        assert_eq!(coin_type, CoinType::VAR);
        assert_eq!(fee, BigInt::from(100_000));
    }

    #[test]
    fn test_calc_tx_fee_ska() {
        let mut tx = MsgTx::new();
        let mut tx_in = TxIn::new(OutPoint::new([1; 32], 0, 0), 0, vec![]);
        tx_in.ska_value_in = Some(SkaAmount::from_coins(10));
        tx.add_tx_in(tx_in);
        tx.add_tx_out(TxOut::new_ska(
            CoinType(1),
            SkaAmount::from_coins(9),
            vec![],
        ));

        let (fee, coin_type) = calc_tx_fee(&tx);
        assert_eq!(coin_type, CoinType(1));
        assert_eq!(fee, SkaAmount::from_coins(1).to_big());
    }
}
