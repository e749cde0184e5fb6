//! Fee calculation and estimation for all coin types
//!
//! Every coin type carries a minimum relay rate and a maximum rate, both
//! per kilobyte, plus a smoothed dynamic multiplier driven by network
//! utilization.  VAR fees stay in 64-bit arithmetic with checked clamping
//! at the supply bound; SKA fees use arbitrary precision with fixed-point
//! multiplier arithmetic (multiplier scaled by 1000 and divided back out).

use crate::amount::{SkaAmount, BYTES_PER_KILOBYTE, MAX_VAR_ATOMS};
use crate::chainparams::ChainParams;
use crate::cointype::CoinType;
use crate::error::FeeError;
use log::debug;
use num_bigint::BigInt;
use num_traits::{Signed, Zero};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::{Duration, SystemTime};

/// Number of recent fee rate samples kept per coin type.
const RECENT_FEE_CAPACITY: usize = 100;

/// Default maximum fee multiplier for VAR (100x the minimum relay fee).
const DEFAULT_VAR_MAX_FEE_MULTIPLIER: i64 = 100;

/// Default maximum fee multiplier for SKA coins with no configured value.
const DEFAULT_SKA_MAX_FEE_MULTIPLIER: i64 = 2500;

/// Default SKA minimum relay fee when a coin configures none: 4 coins per
/// kilobyte.
fn default_ska_min_relay_fee() -> SkaAmount {
    SkaAmount::from_coins(4)
}

/// Exponential smoothing factor for dynamic multiplier updates.
const SMOOTHING_FACTOR: f64 = 0.3;

/// Bounds on the dynamic fee multiplier.
const MIN_DYNAMIC_MULTIPLIER: f64 = 0.5;
const MAX_DYNAMIC_MULTIPLIER: f64 = 10.0;

/// Fee boost applied when no block has included transactions recently.
const STALE_BLOCK_THRESHOLD: Duration = Duration::from_secs(10 * 60);

/// Fee rate configuration for one coin type.
#[derive(Debug, Clone)]
pub struct CoinFeeRate {
    /// Minimum relay fee rate in atoms per kilobyte (VAR).
    pub min_relay_fee: i64,

    /// Multiplier adjusting fees with network utilization.
    pub dynamic_fee_multiplier: f64,

    /// Maximum allowed fee rate in atoms per kilobyte (VAR).
    pub max_fee_rate: i64,

    /// Minimum relay fee rate for SKA coins; `None` on the VAR entry.
    pub ska_min_relay_fee: Option<SkaAmount>,

    /// Maximum fee rate for SKA coins, capped by the coin's max supply.
    pub ska_max_fee_rate: Option<SkaAmount>,

    /// When this rate was last recalculated.
    pub last_updated: SystemTime,
}

/// Network utilization metrics for one coin type.
#[derive(Debug, Clone)]
pub struct UtilizationStats {
    pub pending_tx_count: usize,
    pub pending_tx_size: i64,

    /// Fraction of the allocated block space in use, 0 to 1.
    pub block_space_used: f64,

    /// Recent fee rate samples in atoms per kilobyte.
    pub recent_tx_fees: VecDeque<BigInt>,

    pub last_block_included: SystemTime,
}

impl UtilizationStats {
    fn new() -> UtilizationStats {
        UtilizationStats {
            pending_tx_count: 0,
            pending_tx_size: 0,
            block_space_used: 0.0,
            recent_tx_fees: VecDeque::with_capacity(RECENT_FEE_CAPACITY),
            last_block_included: SystemTime::now(),
        }
    }
}

/// A point-in-time snapshot of fee state for one coin type.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeeStats {
    pub coin_type: CoinType,
    pub min_relay_fee: BigInt,
    pub dynamic_fee_multiplier: f64,
    pub max_fee_rate: BigInt,
    pub pending_tx_count: usize,
    pub pending_tx_size: i64,
    pub block_space_used: f64,
    /// 90th percentile of recent fee rates (about 1 block).
    pub fast_fee: BigInt,
    /// 50th percentile of recent fee rates (about 3 blocks).
    pub normal_fee: BigInt,
    /// 10th percentile of recent fee rates (about 6 blocks).
    pub slow_fee: BigInt,
}

struct FeeState {
    fee_rates: HashMap<CoinType, CoinFeeRate>,
    utilization: HashMap<CoinType, UtilizationStats>,
}

/// Fee calculator for the dual-coin system.
///
/// Reads (minimum/maximum fee queries, estimation, validation, stats) take
/// the read side of the lock; utilization updates and fee recordings take
/// the write side.  Estimation is advisory, so readers may observe an
/// intermediate multiplier between two writes.
pub struct FeeCalculator {
    state: RwLock<FeeState>,
    default_min_relay_fee: i64,
}

impl FeeCalculator {
    /// Creates a calculator with rates for VAR and every active SKA coin
    /// in the chain parameters.
    pub fn new(params: &ChainParams, default_min_relay_fee: i64) -> FeeCalculator {
        let now = SystemTime::now();
        let mut fee_rates = HashMap::new();
        let mut utilization = HashMap::new();

        fee_rates.insert(
            CoinType::VAR,
            CoinFeeRate {
                min_relay_fee: default_min_relay_fee,
                dynamic_fee_multiplier: 1.0,
                max_fee_rate: default_min_relay_fee.saturating_mul(DEFAULT_VAR_MAX_FEE_MULTIPLIER),
                ska_min_relay_fee: None,
                ska_max_fee_rate: None,
                last_updated: now,
            },
        );
        utilization.insert(CoinType::VAR, UtilizationStats::new());

        for (coin_type, config) in &params.ska_coins {
            if !config.active {
                continue;
            }

            let min_fee = if config.min_relay_tx_fee.is_positive() {
                config.min_relay_tx_fee.clone()
            } else {
                default_ska_min_relay_fee()
            };

            let multiplier = if config.max_fee_multiplier > 0 {
                config.max_fee_multiplier
            } else {
                DEFAULT_SKA_MAX_FEE_MULTIPLIER
            };
            let mut max_fee = min_fee.mul(multiplier);
            if max_fee > config.max_supply {
                max_fee = config.max_supply.clone();
            }

            fee_rates.insert(
                *coin_type,
                CoinFeeRate {
                    min_relay_fee: 0,
                    dynamic_fee_multiplier: 1.0,
                    max_fee_rate: 0,
                    ska_min_relay_fee: Some(min_fee),
                    ska_max_fee_rate: Some(max_fee),
                    last_updated: now,
                },
            );
            utilization.insert(*coin_type, UtilizationStats::new());
        }

        FeeCalculator {
            state: RwLock::new(FeeState {
                fee_rates,
                utilization,
            }),
            default_min_relay_fee,
        }
    }

    /// Calculates the minimum fee for a transaction of the given
    /// serialized size.  Unknown coin types fall back to the VAR rate.
    /// The result fits in int64 for VAR.
    pub fn calculate_min_fee(&self, serialized_size: i64, coin_type: CoinType) -> BigInt {
        let state = self.read_locked();
        let fee_rate = state
            .fee_rates
            .get(&coin_type)
            .or_else(|| state.fee_rates.get(&CoinType::VAR));
        let fee_rate = match fee_rate {
            Some(rate) => rate,
            None => return BigInt::from(self.default_min_relay_fee),
        };

        if coin_type.is_ska() {
            if let Some(min_fee) = &fee_rate.ska_min_relay_fee {
                // Base fee: (size * rate per KB) / 1000 with the dynamic
                // multiplier applied in fixed point.
                let mut fee = min_fee.to_big() * BigInt::from(serialized_size)
                    / BigInt::from(BYTES_PER_KILOBYTE);

                if fee_rate.dynamic_fee_multiplier != 1.0 {
                    let multiplier_fixed =
                        BigInt::from((fee_rate.dynamic_fee_multiplier * 1000.0) as i64);
                    fee = fee * multiplier_fixed / BigInt::from(1000);
                }

                if fee.is_zero() && min_fee.is_positive() {
                    fee = min_fee.to_big();
                }

                if let Some(max_fee) =
                    ska_max_fee_for_size(fee_rate, serialized_size)
                {
                    if fee > max_fee {
                        fee = max_fee;
                    }
                }

                return fee;
            }
        }

        // VAR path in 64-bit arithmetic with checked clamping.
        let base_fee = serialized_size.saturating_mul(fee_rate.min_relay_fee) / 1000;
        let mut fee = base_fee as f64 * fee_rate.dynamic_fee_multiplier;

        if fee == 0.0 && fee_rate.min_relay_fee > 0 {
            fee = fee_rate.min_relay_fee as f64;
        }

        let max_fee = serialized_size.saturating_mul(fee_rate.max_fee_rate) / 1000;
        if max_fee > 0 && fee > max_fee as f64 {
            fee = max_fee as f64;
        }

        let final_fee = fee as i64;
        if !(0..=MAX_VAR_ATOMS).contains(&final_fee) {
            return BigInt::from(MAX_VAR_ATOMS);
        }
        BigInt::from(final_fee)
    }

    /// Calculates the maximum allowed fee for a transaction of the given
    /// size, or `None` when no limit is configured.
    pub fn calculate_max_fee(&self, serialized_size: i64, coin_type: CoinType) -> Option<BigInt> {
        let state = self.read_locked();
        let fee_rate = state.fee_rates.get(&coin_type)?;

        if coin_type.is_ska() {
            return ska_max_fee_for_size(fee_rate, serialized_size);
        }

        if fee_rate.max_fee_rate == 0 {
            return None;
        }
        let mut max_fee = serialized_size.saturating_mul(fee_rate.max_fee_rate) / 1000;
        if max_fee < fee_rate.max_fee_rate {
            max_fee = fee_rate.max_fee_rate;
        }
        Some(BigInt::from(max_fee))
    }

    /// Estimates the fee rate for the coin type and confirmation target in
    /// atoms per kilobyte.  The estimate is clamped to the configured
    /// minimum and maximum rates.
    pub fn estimate_fee_rate(
        &self,
        coin_type: CoinType,
        target_confirmations: i32,
    ) -> Result<BigInt, FeeError> {
        let state = self.read_locked();
        let fee_rate = state
            .fee_rates
            .get(&coin_type)
            .ok_or(FeeError::UnsupportedCoinType(coin_type.0))?;

        let (min_rate, max_rate) = rate_bounds(coin_type, fee_rate);
        let mut estimate = min_rate.clone();

        if fee_rate.dynamic_fee_multiplier != 1.0 {
            let fixed = BigInt::from((fee_rate.dynamic_fee_multiplier * 1000.0) as i64);
            estimate = estimate * fixed / BigInt::from(1000);
        }

        if let Some(stats) = state.utilization.get(&coin_type) {
            let confirm_multiplier = confirmation_multiplier(target_confirmations, stats);
            if confirm_multiplier != 1.0 {
                let fixed = BigInt::from((confirm_multiplier * 1000.0) as i64);
                estimate = estimate * fixed / BigInt::from(1000);
            }
        }

        if max_rate.is_positive() && estimate > max_rate {
            estimate = max_rate;
        }
        if estimate < min_rate {
            estimate = min_rate;
        }

        Ok(estimate)
    }

    /// Validates a transaction's fee against the coin-type-specific
    /// bounds.  The maximum is only enforced when the caller disallows
    /// high fees.
    pub fn validate_transaction_fees(
        &self,
        tx_fee: &BigInt,
        serialized_size: i64,
        coin_type: CoinType,
        allow_high_fees: bool,
    ) -> Result<(), FeeError> {
        let min_fee = self.calculate_min_fee(serialized_size, coin_type);
        if tx_fee < &min_fee {
            return Err(FeeError::InsufficientFee(format!(
                "{}: {} < {} atoms",
                coin_type, tx_fee, min_fee
            )));
        }

        if !allow_high_fees {
            if let Some(max_fee) = self.calculate_max_fee(serialized_size, coin_type) {
                if tx_fee > &max_fee {
                    return Err(FeeError::FeeTooHigh(format!(
                        "{}: {} > {} atoms",
                        coin_type, tx_fee, max_fee
                    )));
                }
            }
        }

        Ok(())
    }

    /// Updates utilization metrics for the coin type and recomputes its
    /// dynamic multiplier.
    pub fn update_utilization(
        &self,
        coin_type: CoinType,
        pending_tx_count: usize,
        pending_tx_size: i64,
        block_space_used: f64,
    ) {
        let mut state = self.write_locked();
        let stats = state
            .utilization
            .entry(coin_type)
            .or_insert_with(UtilizationStats::new);
        stats.pending_tx_count = pending_tx_count;
        stats.pending_tx_size = pending_tx_size;
        stats.block_space_used = block_space_used;

        // The multiplier target grows with block pressure, backlog and
        // time since the last inclusion, then the transition is smoothed.
        let mut target = 1.0;
        if block_space_used > 0.9 {
            target *= 2.0;
        } else if block_space_used > 0.7 {
            target *= 1.5;
        } else if block_space_used > 0.5 {
            target *= 1.2;
        }

        if pending_tx_count > 100 {
            target *= 1.5;
        } else if pending_tx_count > 50 {
            target *= 1.2;
        }

        let since_last_block = SystemTime::now()
            .duration_since(stats.last_block_included)
            .unwrap_or_default();
        if since_last_block > STALE_BLOCK_THRESHOLD {
            target *= 1.3;
        }

        if let Some(fee_rate) = state.fee_rates.get_mut(&coin_type) {
            fee_rate.dynamic_fee_multiplier = ((1.0 - SMOOTHING_FACTOR)
                * fee_rate.dynamic_fee_multiplier
                + SMOOTHING_FACTOR * target)
                .clamp(MIN_DYNAMIC_MULTIPLIER, MAX_DYNAMIC_MULTIPLIER);
            fee_rate.last_updated = SystemTime::now();

            debug!(
                "updated {} dynamic fee multiplier to {:.3}",
                coin_type, fee_rate.dynamic_fee_multiplier
            );
        }
    }

    /// Records an observed transaction fee for percentile estimation.
    /// Transactions with a non-positive size are ignored.
    pub fn record_transaction_fee(
        &self,
        coin_type: CoinType,
        fee: &BigInt,
        serialized_size: i64,
        confirmed: bool,
    ) {
        if serialized_size <= 0 {
            return;
        }

        let mut state = self.write_locked();
        let stats = state
            .utilization
            .entry(coin_type)
            .or_insert_with(UtilizationStats::new);

        // Fee rate in atoms per kilobyte.
        let fee_rate = fee * BigInt::from(BYTES_PER_KILOBYTE) / BigInt::from(serialized_size);
        stats.recent_tx_fees.push_back(fee_rate);
        while stats.recent_tx_fees.len() > RECENT_FEE_CAPACITY {
            stats.recent_tx_fees.pop_front();
        }

        if confirmed {
            stats.last_block_included = SystemTime::now();
        }
    }

    /// Returns a snapshot of the fee state for one coin type, including
    /// fast, normal and slow percentile estimates from recent samples.
    pub fn get_fee_stats(&self, coin_type: CoinType) -> Result<FeeStats, FeeError> {
        let state = self.read_locked();
        let fee_rate = state
            .fee_rates
            .get(&coin_type)
            .ok_or(FeeError::UnsupportedCoinType(coin_type.0))?;

        let (min_rate, max_rate) = rate_bounds(coin_type, fee_rate);

        let stats = state.utilization.get(&coin_type);
        let samples: Vec<BigInt> = stats
            .map(|s| s.recent_tx_fees.iter().cloned().collect())
            .unwrap_or_default();
        let [fast, normal, slow] = calculate_percentile_fees(&samples, &min_rate);

        Ok(FeeStats {
            coin_type,
            min_relay_fee: min_rate,
            dynamic_fee_multiplier: fee_rate.dynamic_fee_multiplier,
            max_fee_rate: max_rate,
            pending_tx_count: stats.map(|s| s.pending_tx_count).unwrap_or(0),
            pending_tx_size: stats.map(|s| s.pending_tx_size).unwrap_or(0),
            block_space_used: stats.map(|s| s.block_space_used).unwrap_or(0.0),
            fast_fee: fast,
            normal_fee: normal,
            slow_fee: slow,
        })
    }

    /// Returns every coin type the calculator has rates for.
    pub fn get_supported_coin_types(&self) -> Vec<CoinType> {
        let mut types: Vec<CoinType> = self.read_locked().fee_rates.keys().copied().collect();
        types.sort();
        types
    }

    fn read_locked(&self) -> RwLockReadGuard<'_, FeeState> {
        self.state.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write_locked(&self) -> RwLockWriteGuard<'_, FeeState> {
        self.state.write().unwrap_or_else(|e| e.into_inner())
    }
}

/// Returns the minimum and maximum rates of the entry as big integers.
fn rate_bounds(coin_type: CoinType, fee_rate: &CoinFeeRate) -> (BigInt, BigInt) {
    if coin_type.is_ska() {
        if let (Some(min), Some(max)) = (&fee_rate.ska_min_relay_fee, &fee_rate.ska_max_fee_rate) {
            return (min.to_big(), max.to_big());
        }
    }
    (
        BigInt::from(fee_rate.min_relay_fee),
        BigInt::from(fee_rate.max_fee_rate),
    )
}

/// Maximum fee for a transaction of the given size under an SKA rate
/// entry, never below the rate itself so very small transactions are not
/// over-constrained.
fn ska_max_fee_for_size(fee_rate: &CoinFeeRate, serialized_size: i64) -> Option<BigInt> {
    let max_rate = fee_rate.ska_max_fee_rate.as_ref()?;
    let mut max_fee = max_rate.to_big() * BigInt::from(serialized_size) / BigInt::from(1000);
    if max_fee < max_rate.to_big() {
        max_fee = max_rate.to_big();
    }
    Some(max_fee)
}

/// Multiplier applied for a confirmation target: the sooner the target,
/// the higher the fee, with additional pressure from block utilization.
fn confirmation_multiplier(target_confirmations: i32, stats: &UtilizationStats) -> f64 {
    let mut multiplier = if target_confirmations <= 1 {
        2.0
    } else if target_confirmations <= 3 {
        1.5
    } else if target_confirmations <= 6 {
        1.2
    } else {
        1.0
    };

    if stats.block_space_used > 0.8 {
        multiplier *= 1.5;
    } else if stats.block_space_used > 0.6 {
        multiplier *= 1.2;
    }

    multiplier
}

/// Computes the 90th, 50th and 10th percentile fee rates from the
/// samples, floored at the minimum relay fee so estimates are always
/// relayable.  With no samples the defaults are twice the minimum for
/// fast and the minimum for normal and slow.
pub fn calculate_percentile_fees(samples: &[BigInt], min_relay_fee: &BigInt) -> [BigInt; 3] {
    if samples.is_empty() {
        return [
            min_relay_fee * BigInt::from(2),
            min_relay_fee.clone(),
            min_relay_fee.clone(),
        ];
    }

    let mut sorted = samples.to_vec();
    sorted.sort();

    let mut percentiles = [
        calc_percentile(&sorted, 0.90),
        calc_percentile(&sorted, 0.50),
        calc_percentile(&sorted, 0.10),
    ];
    for p in &mut percentiles {
        if &*p < min_relay_fee {
            *p = min_relay_fee.clone();
        }
    }
    percentiles
}

/// Linear interpolation percentile over sorted samples in fixed-point
/// arithmetic (weights scaled by 1000).
fn calc_percentile(sorted: &[BigInt], percentile: f64) -> BigInt {
    if sorted.is_empty() {
        return BigInt::zero();
    }

    let index = percentile * (sorted.len() - 1) as f64;
    let lower = index.floor() as usize;
    let upper = index.ceil() as usize;

    if lower == upper {
        return sorted[lower].clone();
    }

    let weight = ((index - lower as f64) * 1000.0) as i64;
    let lower_val = &sorted[lower] * BigInt::from(1000 - weight);
    let upper_val = &sorted[upper] * BigInt::from(weight);
    (lower_val + upper_val) / BigInt::from(1000)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chainparams::SkaCoinConfig;
    use std::collections::HashMap as StdHashMap;

    const DEFAULT_MIN_RELAY: i64 = 10_000;

    fn test_params() -> ChainParams {
        let mut coins = StdHashMap::new();
        coins.insert(
            CoinType(1),
            SkaCoinConfig {
                active: true,
                emission_height: 100,
                emission_amounts: vec![SkaAmount::from_coins(1_000_000)],
                max_supply: SkaAmount::from_coins(1_000_000),
                min_relay_tx_fee: SkaAmount::from_coins(4),
                max_fee_multiplier: 2500,
            },
        );
        coins.insert(
            CoinType(2),
            SkaCoinConfig {
                active: false,
                emission_height: 100,
                emission_amounts: vec![],
                max_supply: SkaAmount::zero(),
                min_relay_tx_fee: SkaAmount::zero(),
                max_fee_multiplier: 0,
            },
        );
        ChainParams::new(100, 100, coins)
    }

    fn calculator() -> FeeCalculator {
        FeeCalculator::new(&test_params(), DEFAULT_MIN_RELAY)
    }

    #[test]
    fn test_supported_coin_types() {
        let calc = calculator();
        // Inactive coins get no rate entry.
        assert_eq!(
            calc.get_supported_coin_types(),
            vec![CoinType::VAR, CoinType(1)]
        );
    }

    #[test]
    fn test_var_min_fee_formula() {
        let calc = calculator();
        // 500 bytes at 10,000 atoms/KB with multiplier 1.0.
        let fee = calc.calculate_min_fee(500, CoinType::VAR);
        assert_eq!(fee, BigInt::from(5_000));

        // Zero base fee floors at the minimum relay fee.
        let fee = calc.calculate_min_fee(0, CoinType::VAR);
        assert_eq!(fee, BigInt::from(DEFAULT_MIN_RELAY));
    }

    #[test]
    fn test_ska_min_fee_formula() {
        let calc = calculator();
        // 500 bytes at 4 coins/KB: 2 coins.
        let fee = calc.calculate_min_fee(500, CoinType(1));
        assert_eq!(fee, SkaAmount::from_coins(2).to_big());
    }

    #[test]
    fn test_unknown_coin_type_falls_back_to_var() {
        let calc = calculator();
        let fee = calc.calculate_min_fee(500, CoinType(200));
        assert_eq!(fee, BigInt::from(5_000));
    }

    #[test]
    fn test_max_fee() {
        let calc = calculator();
        // VAR max rate is 100x the minimum relay rate.
        let max = calc.calculate_max_fee(1000, CoinType::VAR).unwrap();
        assert_eq!(max, BigInt::from(DEFAULT_MIN_RELAY * 100));

        // Small transactions still get at least the rate itself.
        let max_small = calc.calculate_max_fee(10, CoinType::VAR).unwrap();
        assert_eq!(max_small, BigInt::from(DEFAULT_MIN_RELAY * 100));

        // SKA max: min(2500x min rate, max supply) per KB.
        let max_ska = calc.calculate_max_fee(1000, CoinType(1)).unwrap();
        assert_eq!(max_ska, SkaAmount::from_coins(10_000).to_big());

        assert!(calc.calculate_max_fee(1000, CoinType(200)).is_none());
    }

    #[test]
    fn test_validate_transaction_fees() {
        let calc = calculator();
        let min = calc.calculate_min_fee(500, CoinType::VAR);

        assert!(calc
            .validate_transaction_fees(&min, 500, CoinType::VAR, false)
            .is_ok());

        let too_low = &min - BigInt::from(1);
        assert!(matches!(
            calc.validate_transaction_fees(&too_low, 500, CoinType::VAR, false),
            Err(FeeError::InsufficientFee(_))
        ));

        let huge = BigInt::from(MAX_VAR_ATOMS);
        assert!(matches!(
            calc.validate_transaction_fees(&huge, 500, CoinType::VAR, false),
            Err(FeeError::FeeTooHigh(_))
        ));
        // High fees allowed when the caller opts in.
        assert!(calc
            .validate_transaction_fees(&huge, 500, CoinType::VAR, true)
            .is_ok());
    }

    #[test]
    fn test_estimate_within_bounds() {
        let calc = calculator();
        // Push the multiplier up with heavy utilization.
        for _ in 0..20 {
            calc.update_utilization(CoinType(1), 200, 1_000_000, 0.95);
        }

        let stats = calc.get_fee_stats(CoinType(1)).unwrap();
        let min = stats.min_relay_fee.clone();
        let max = stats.max_fee_rate.clone();

        for target in 1..=10 {
            let estimate = calc.estimate_fee_rate(CoinType(1), target).unwrap();
            assert!(estimate >= min, "estimate below min for target {}", target);
            assert!(estimate <= max, "estimate above max for target {}", target);
        }

        assert!(matches!(
            calc.estimate_fee_rate(CoinType(200), 1),
            Err(FeeError::UnsupportedCoinType(200))
        ));
    }

    #[test]
    fn test_estimate_ranks_targets() {
        let calc = calculator();
        let fast = calc.estimate_fee_rate(CoinType::VAR, 1).unwrap();
        let normal = calc.estimate_fee_rate(CoinType::VAR, 3).unwrap();
        let slow = calc.estimate_fee_rate(CoinType::VAR, 12).unwrap();
        assert!(fast > normal);
        assert!(normal > slow);
    }

    #[test]
    fn test_dynamic_multiplier_rises_and_clamps() {
        let calc = calculator();
        let before = calc
            .get_fee_stats(CoinType::VAR)
            .unwrap()
            .dynamic_fee_multiplier;
        assert!((before - 1.0).abs() < 1e-9);

        for _ in 0..100 {
            calc.update_utilization(CoinType::VAR, 500, 10_000_000, 0.99);
        }
        let pressured = calc
            .get_fee_stats(CoinType::VAR)
            .unwrap()
            .dynamic_fee_multiplier;
        assert!(pressured > 1.0);
        assert!(pressured <= MAX_DYNAMIC_MULTIPLIER);

        for _ in 0..200 {
            calc.update_utilization(CoinType::VAR, 0, 0, 0.0);
        }
        let relaxed = calc
            .get_fee_stats(CoinType::VAR)
            .unwrap()
            .dynamic_fee_multiplier;
        assert!(relaxed >= MIN_DYNAMIC_MULTIPLIER);
        assert!(relaxed < pressured);
    }

    #[test]
    fn test_percentiles_empty_defaults() {
        let min = BigInt::from(100);
        let [fast, normal, slow] = calculate_percentile_fees(&[], &min);
        assert_eq!(fast, BigInt::from(200));
        assert_eq!(normal, min);
        assert_eq!(slow, min);
    }

    #[test]
    fn test_percentiles_from_samples() {
        let samples: Vec<BigInt> = (1..=100).map(BigInt::from).collect();
        let min = BigInt::from(1);
        let [fast, normal, slow] = calculate_percentile_fees(&samples, &min);
        assert!(fast > normal);
        assert!(normal > slow);
        // 90th percentile of 1..=100 interpolates to 90.1.
        assert_eq!(fast, BigInt::from(90));
        assert_eq!(normal, BigInt::from(50));
        assert_eq!(slow, BigInt::from(10));
    }

    #[test]
    fn test_percentiles_floor_at_min_relay() {
        let samples = vec![BigInt::from(1), BigInt::from(2), BigInt::from(3)];
        let min = BigInt::from(1_000);
        let [fast, normal, slow] = calculate_percentile_fees(&samples, &min);
        assert_eq!(fast, min);
        assert_eq!(normal, min);
        assert_eq!(slow, min);
    }

    #[test]
    fn test_record_transaction_fee_bounded() {
        let calc = calculator();
        for i in 0..150 {
            calc.record_transaction_fee(CoinType::VAR, &BigInt::from(i * 1000), 1000, true);
        }
        let state = calc.read_locked();
        let stats = state.utilization.get(&CoinType::VAR).unwrap();
        assert_eq!(stats.recent_tx_fees.len(), RECENT_FEE_CAPACITY);
        // The oldest samples were evicted.
        assert_eq!(stats.recent_tx_fees.front(), Some(&BigInt::from(50_000)));
    }

    #[test]
    fn test_record_ignores_non_positive_size() {
        let calc = calculator();
        calc.record_transaction_fee(CoinType::VAR, &BigInt::from(1000), 0, true);
        calc.record_transaction_fee(CoinType::VAR, &BigInt::from(1000), -5, true);
        let state = calc.read_locked();
        assert!(state
            .utilization
            .get(&CoinType::VAR)
            .unwrap()
            .recent_tx_fees
            .is_empty());
    }

    #[test]
    fn test_fee_stats_percentiles_use_coin_min() {
        let calc = calculator();
        // No samples for the SKA coin: defaults derive from its own
        // minimum rate, not VAR's.
        let stats = calc.get_fee_stats(CoinType(1)).unwrap();
        assert_eq!(stats.min_relay_fee, SkaAmount::from_coins(4).to_big());
        assert_eq!(stats.fast_fee, SkaAmount::from_coins(8).to_big());
        assert_eq!(stats.normal_fee, stats.min_relay_fee);
    }
}
