//! Chain configuration consumed by the protocol core

use crate::amount::SkaAmount;
use crate::cointype::CoinType;
use std::collections::HashMap;

/// OP_RETURN opcode byte.
const OP_RETURN: u8 = 0x6a;

/// Per-coin configuration for an auxiliary SKA asset.
#[derive(Debug, Clone)]
pub struct SkaCoinConfig {
    /// Whether this coin is enabled on the chain.
    pub active: bool,

    /// Height of the one-shot emission block for this coin.
    pub emission_height: i64,

    /// Emission output amounts.  The emission transaction must produce
    /// outputs summing to exactly the total of these amounts.
    pub emission_amounts: Vec<SkaAmount>,

    /// Hard cap on total supply in atoms.
    pub max_supply: SkaAmount,

    /// Minimum relay fee rate in atoms per kilobyte.
    pub min_relay_tx_fee: SkaAmount,

    /// Maximum fee rate expressed as a multiple of the minimum relay fee.
    pub max_fee_multiplier: i64,
}

impl SkaCoinConfig {
    /// Returns the total amount emitted for this coin.
    pub fn emission_total(&self) -> SkaAmount {
        let mut total = SkaAmount::zero();
        for amount in &self.emission_amounts {
            total = total.add(amount);
        }
        total
    }
}

/// Recognizer for burn output scripts, injected so the core never needs to
/// hard-code the chain's exact byte pattern.
pub type BurnScriptPredicate = fn(&[u8]) -> bool;

/// Block space partitioning knobs.
#[derive(Debug, Clone, Copy)]
pub struct BlockAllocParams {
    /// Maximum share of the block a single SKA coin may occupy, in parts
    /// per million.  VAR is never capped.
    pub ska_share_cap_ppm: u32,

    /// Minimum byte grant for any coin type observed in the template.
    pub min_allocation_bytes: u32,
}

impl Default for BlockAllocParams {
    fn default() -> Self {
        BlockAllocParams {
            ska_share_cap_ppm: 300_000,
            min_allocation_bytes: 4096,
        }
    }
}

/// Network parameters recognized by the protocol core.
#[derive(Debug, Clone)]
pub struct ChainParams {
    /// Height from which SKA transactions are allowed.
    pub ska_activation_height: i64,

    /// Height of the block that must carry the SKA emission transaction.
    pub ska_emission_height: i64,

    /// Per-coin SKA configuration keyed by coin type.
    pub ska_coins: HashMap<CoinType, SkaCoinConfig>,

    /// Recognizer for SKA burn output scripts.
    pub is_ska_burn_script: BurnScriptPredicate,

    /// Block space partitioning parameters.
    pub block_alloc: BlockAllocParams,
}

impl ChainParams {
    /// Creates parameters with the canonical burn script recognizer and
    /// default allocation knobs.
    pub fn new(
        ska_activation_height: i64,
        ska_emission_height: i64,
        ska_coins: HashMap<CoinType, SkaCoinConfig>,
    ) -> Self {
        ChainParams {
            ska_activation_height,
            ska_emission_height,
            ska_coins,
            is_ska_burn_script: standard_ska_burn_script,
            block_alloc: BlockAllocParams::default(),
        }
    }

    /// Returns the configuration of an active SKA coin, if any.
    pub fn active_ska_coin(&self, coin_type: CoinType) -> Option<&SkaCoinConfig> {
        self.ska_coins
            .get(&coin_type)
            .filter(|config| config.active)
    }
}

/// The canonical 11-byte burn script recognizer:
/// OP_RETURN, a 9-byte push, the "SKA_BURN" marker, and the coin type byte.
pub fn standard_ska_burn_script(script: &[u8]) -> bool {
    script.len() == 11
        && script[0] == OP_RETURN
        && script[1] == 0x09
        && &script[2..10] == b"SKA_BURN"
        && script[10] != 0
}

/// Builds the canonical burn script for the given SKA coin type.
pub fn make_ska_burn_script(coin_type: CoinType) -> Vec<u8> {
    let mut script = Vec::with_capacity(11);
    script.push(OP_RETURN);
    script.push(0x09);
    script.extend_from_slice(b"SKA_BURN");
    script.push(coin_type.0);
    script
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_standard_burn_script_round_trip() {
        for coin in [1u8, 7, 255] {
            let script = make_ska_burn_script(CoinType(coin));
            assert_eq!(script.len(), 11);
            assert!(standard_ska_burn_script(&script));
        }
    }

    #[test]
    fn test_burn_script_rejects_malformed() {
        // Coin type 0 is never a burn target.
        assert!(!standard_ska_burn_script(&make_ska_burn_script(CoinType(0))));

        let good = make_ska_burn_script(CoinType(1));
        let mut wrong_marker = good.clone();
        wrong_marker[2] = b'X';
        assert!(!standard_ska_burn_script(&wrong_marker));

        let mut wrong_opcode = good.clone();
        wrong_opcode[0] = 0x51;
        assert!(!standard_ska_burn_script(&wrong_opcode));

        assert!(!standard_ska_burn_script(&good[..10]));
        let mut too_long = good;
        too_long.push(0);
        assert!(!standard_ska_burn_script(&too_long));
    }

    #[test]
    fn test_emission_total() {
        let config = SkaCoinConfig {
            active: true,
            emission_height: 100,
            emission_amounts: vec![SkaAmount::from_coins(600), SkaAmount::from_coins(400)],
            max_supply: SkaAmount::from_coins(1000),
            min_relay_tx_fee: SkaAmount::from_i64(4_000),
            max_fee_multiplier: 2500,
        };
        assert_eq!(config.emission_total(), SkaAmount::from_coins(1000));
    }

    #[test]
    fn test_active_ska_coin() {
        let mut coins = HashMap::new();
        coins.insert(
            CoinType(1),
            SkaCoinConfig {
                active: true,
                emission_height: 10,
                emission_amounts: vec![SkaAmount::from_coins(1)],
                max_supply: SkaAmount::from_coins(1),
                min_relay_tx_fee: SkaAmount::from_i64(10),
                max_fee_multiplier: 100,
            },
        );
        coins.insert(
            CoinType(2),
            SkaCoinConfig {
                active: false,
                emission_height: 10,
                emission_amounts: vec![],
                max_supply: SkaAmount::zero(),
                min_relay_tx_fee: SkaAmount::zero(),
                max_fee_multiplier: 0,
            },
        );
        let params = ChainParams::new(5, 10, coins);
        assert!(params.active_ska_coin(CoinType(1)).is_some());
        assert!(params.active_ska_coin(CoinType(2)).is_none());
        assert!(params.active_ska_coin(CoinType(3)).is_none());
    }
}
