//! SKA emission rules
//!
//! Each SKA coin is minted once, by a single emission transaction in the
//! block at the configured emission height.  The transaction has a null
//! input carrying the SKA marker script, produces only SKA outputs with
//! positive amounts, and the per-coin output totals must equal the
//! configured emission amounts exactly.

use crate::amount::SkaAmount;
use crate::chainparams::ChainParams;
use crate::cointype::CoinType;
use crate::error::{ProtocolError, Result};
use crate::transaction::{
    is_ska_emission_transaction, MsgTx, OutPoint, TxIn, TxOut, TxSerializeType, NULL_VALUE_IN,
    SKA_EMISSION_MARKER, TX_VERSION,
};
use std::collections::HashMap;

/// Returns whether the block at the given height is the SKA emission
/// block.
pub fn is_ska_emission_block(block_height: i64, params: &ChainParams) -> bool {
    block_height == params.ska_emission_height
}

/// Returns whether SKA transactions are active at the given height.
pub fn is_ska_active(block_height: i64, params: &ChainParams) -> bool {
    block_height >= params.ska_activation_height
}

/// Builds the one-shot emission transaction paying the given amounts to
/// the given output scripts.  The amounts must sum, per coin type, to the
/// configured emission total.
pub fn create_ska_emission_transaction(
    outputs: &[(CoinType, SkaAmount, Vec<u8>)],
    params: &ChainParams,
) -> Result<MsgTx> {
    if outputs.is_empty() {
        return Err(ProtocolError::BadEmission(
            "no emission outputs specified".to_string(),
        ));
    }

    let mut tx = MsgTx {
        cached_hash: None,
        ser_type: TxSerializeType::Full,
        version: TX_VERSION,
        tx_in: Vec::new(),
        tx_out: Vec::with_capacity(outputs.len()),
        lock_time: 0,
        expiry: 0,
    };

    tx.add_tx_in(TxIn::new(
        OutPoint::null(),
        NULL_VALUE_IN,
        SKA_EMISSION_MARKER.to_vec(),
    ));

    for (coin_type, amount, pk_script) in outputs {
        if !coin_type.is_ska() {
            return Err(ProtocolError::BadEmission(format!(
                "emission output has non-SKA coin type {}",
                coin_type
            )));
        }
        if !amount.is_positive() {
            return Err(ProtocolError::BadEmission(format!(
                "invalid emission amount {}",
                amount
            )));
        }
        tx.add_tx_out(TxOut::new_ska(*coin_type, amount.clone(), pk_script.clone()));
    }

    validate_emission_totals(&tx, params)?;
    Ok(tx)
}

/// Validates a transaction claiming to be the SKA emission at the given
/// block height.
pub fn validate_ska_emission_transaction(
    tx: &MsgTx,
    block_height: i64,
    params: &ChainParams,
) -> Result<()> {
    if !is_ska_emission_block(block_height, params) {
        return Err(ProtocolError::BadEmissionHeight(format!(
            "emission transaction at invalid height {}, expected {}",
            block_height, params.ska_emission_height
        )));
    }

    if tx.tx_in.len() != 1 {
        return Err(ProtocolError::BadEmission(format!(
            "emission transaction must have exactly 1 input, got {}",
            tx.tx_in.len()
        )));
    }

    if tx.tx_out.is_empty() {
        return Err(ProtocolError::BadEmission(
            "emission transaction must have at least 1 output".to_string(),
        ));
    }

    let prev_out = &tx.tx_in[0].previous_out_point;
    if prev_out.hash != crate::transaction::ZERO_HASH
        || prev_out.index != crate::transaction::MAX_PREV_OUT_INDEX
    {
        return Err(ProtocolError::BadEmission(
            "emission transaction input is not null".to_string(),
        ));
    }

    let sig_script = &tx.tx_in[0].signature_script;
    if sig_script.len() < 4 || sig_script[..4] != SKA_EMISSION_MARKER {
        return Err(ProtocolError::BadEmission(
            "emission transaction missing SKA marker in signature script".to_string(),
        ));
    }

    for (i, tx_out) in tx.tx_out.iter().enumerate() {
        if !tx_out.coin_type.is_ska() {
            return Err(ProtocolError::BadEmission(format!(
                "emission output {} is not an SKA coin type",
                i
            )));
        }
        match tx_out.ska_atoms() {
            Some(atoms) if atoms.is_positive() => {}
            _ => {
                return Err(ProtocolError::BadEmission(format!(
                    "emission output {} has a non-positive amount",
                    i
                )));
            }
        }
    }

    if tx.lock_time != 0 {
        return Err(ProtocolError::BadEmission(
            "emission transaction must have lock time 0".to_string(),
        ));
    }
    if tx.expiry != 0 {
        return Err(ProtocolError::BadEmission(
            "emission transaction must have expiry 0".to_string(),
        ));
    }

    validate_emission_totals(tx, params)
}

/// Checks the per-coin output sums against the configured emission
/// amounts.
fn validate_emission_totals(tx: &MsgTx, params: &ChainParams) -> Result<()> {
    let mut totals: HashMap<CoinType, SkaAmount> = HashMap::new();
    for tx_out in &tx.tx_out {
        if let Some(atoms) = tx_out.ska_atoms() {
            let total = totals
                .entry(tx_out.coin_type)
                .or_insert_with(SkaAmount::zero);
            *total = total.add(atoms);
        }
    }

    for (coin_type, total) in &totals {
        let config = params.active_ska_coin(*coin_type).ok_or_else(|| {
            ProtocolError::BadEmission(format!("{} is not an active SKA coin", coin_type))
        })?;
        let expected = config.emission_total();
        if *total != expected {
            return Err(ProtocolError::BadEmission(format!(
                "{} emission total {} does not match configured total {}",
                coin_type, total, expected
            )));
        }
    }

    Ok(())
}

/// Enforces the block-level emission rules: the emission block contains
/// exactly one emission transaction, every other block contains none, and
/// before the activation height no transaction other than the emission
/// itself may create SKA outputs.
pub fn check_ska_emission_in_block(
    transactions: &[MsgTx],
    block_height: i64,
    params: &ChainParams,
) -> Result<()> {
    let is_emission_block = is_ska_emission_block(block_height, params);
    let is_active = is_ska_active(block_height, params);

    let mut emission_tx_count = 0usize;
    let mut ska_tx_count = 0usize;

    for (i, tx) in transactions.iter().enumerate() {
        if is_ska_emission_transaction(tx) {
            emission_tx_count += 1;
            validate_ska_emission_transaction(tx, block_height, params).map_err(|e| {
                ProtocolError::BadEmission(format!(
                    "invalid emission transaction at index {}: {}",
                    i, e
                ))
            })?;
        } else if tx.tx_out.iter().any(|out| out.coin_type.is_ska()) {
            ska_tx_count += 1;
        }
    }

    if is_emission_block {
        if emission_tx_count != 1 {
            return Err(ProtocolError::BadEmission(format!(
                "emission block at height {} must contain exactly 1 emission transaction, got {}",
                block_height, emission_tx_count
            )));
        }
    } else if emission_tx_count > 0 {
        return Err(ProtocolError::BadEmission(format!(
            "block at height {} contains {} emission transactions but is not the emission block",
            block_height, emission_tx_count
        )));
    }

    if !is_active && !is_emission_block && ska_tx_count > 0 {
        return Err(ProtocolError::BadEmission(format!(
            "SKA transactions not allowed before activation height {} (current: {})",
            params.ska_activation_height, block_height
        )));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chainparams::SkaCoinConfig;

    const EMISSION_HEIGHT: i64 = 100;
    const ACTIVATION_HEIGHT: i64 = 100;

    fn test_params() -> ChainParams {
        let mut coins = HashMap::new();
        coins.insert(
            CoinType(1),
            SkaCoinConfig {
                active: true,
                emission_height: EMISSION_HEIGHT,
                emission_amounts: vec![
                    SkaAmount::from_coins(600_000),
                    SkaAmount::from_coins(400_000),
                ],
                max_supply: SkaAmount::from_coins(1_000_000),
                min_relay_tx_fee: SkaAmount::from_i64(4_000),
                max_fee_multiplier: 2500,
            },
        );
        ChainParams::new(ACTIVATION_HEIGHT, EMISSION_HEIGHT, coins)
    }

    fn valid_emission(params: &ChainParams) -> MsgTx {
        create_ska_emission_transaction(
            &[
                (CoinType(1), SkaAmount::from_coins(600_000), vec![0x51]),
                (CoinType(1), SkaAmount::from_coins(400_000), vec![0x52]),
            ],
            params,
        )
        .unwrap()
    }

    #[test]
    fn test_create_and_validate_emission() {
        let params = test_params();
        let tx = valid_emission(&params);
        assert!(is_ska_emission_transaction(&tx));
        assert!(validate_ska_emission_transaction(&tx, EMISSION_HEIGHT, &params).is_ok());
    }

    #[test]
    fn test_emission_at_wrong_height_rejected() {
        let params = test_params();
        let tx = valid_emission(&params);
        let result = validate_ska_emission_transaction(&tx, EMISSION_HEIGHT + 1, &params);
        assert!(matches!(result, Err(ProtocolError::BadEmissionHeight(_))));
    }

    #[test]
    fn test_emission_total_mismatch_rejected() {
        let params = test_params();
        let result = create_ska_emission_transaction(
            &[(CoinType(1), SkaAmount::from_coins(999_999), vec![0x51])],
            &params,
        );
        assert!(matches!(result, Err(ProtocolError::BadEmission(_))));
    }

    #[test]
    fn test_emission_zero_amount_rejected() {
        let params = test_params();
        let result = create_ska_emission_transaction(
            &[(CoinType(1), SkaAmount::zero(), vec![0x51])],
            &params,
        );
        assert!(matches!(result, Err(ProtocolError::BadEmission(_))));
    }

    #[test]
    fn test_emission_unconfigured_coin_rejected() {
        let params = test_params();
        let result = create_ska_emission_transaction(
            &[(CoinType(5), SkaAmount::from_coins(1), vec![0x51])],
            &params,
        );
        assert!(matches!(result, Err(ProtocolError::BadEmission(_))));
    }

    #[test]
    fn test_emission_nonzero_locktime_rejected() {
        let params = test_params();
        let mut tx = valid_emission(&params);
        tx.lock_time = 1;
        assert!(validate_ska_emission_transaction(&tx, EMISSION_HEIGHT, &params).is_err());

        let mut tx = valid_emission(&params);
        tx.expiry = 1;
        assert!(validate_ska_emission_transaction(&tx, EMISSION_HEIGHT, &params).is_err());
    }

    #[test]
    fn test_emission_block_requires_exactly_one() {
        let params = test_params();
        let emission = valid_emission(&params);

        // One emission in the emission block: ok.
        assert!(
            check_ska_emission_in_block(&[emission.clone()], EMISSION_HEIGHT, &params).is_ok()
        );

        // No emission in the emission block: rejected.
        assert!(check_ska_emission_in_block(&[], EMISSION_HEIGHT, &params).is_err());

        // Two emissions: rejected.
        assert!(check_ska_emission_in_block(
            &[emission.clone(), emission.clone()],
            EMISSION_HEIGHT,
            &params
        )
        .is_err());

        // An emission in any other block: rejected.
        assert!(
            check_ska_emission_in_block(&[emission], EMISSION_HEIGHT + 1, &params).is_err()
        );
    }

    #[test]
    fn test_ska_outputs_forbidden_before_activation() {
        let mut coins = HashMap::new();
        coins.insert(
            CoinType(1),
            SkaCoinConfig {
                active: true,
                emission_height: 200,
                emission_amounts: vec![SkaAmount::from_coins(1)],
                max_supply: SkaAmount::from_coins(1),
                min_relay_tx_fee: SkaAmount::from_i64(10),
                max_fee_multiplier: 100,
            },
        );
        let params = ChainParams::new(200, 200, coins);

        let mut ska_tx = MsgTx::new();
        ska_tx.add_tx_in(TxIn::new(OutPoint::new([1; 32], 0, 0), 0, vec![]));
        ska_tx.add_tx_out(TxOut::new_ska(
            CoinType(1),
            SkaAmount::from_i64(100),
            vec![0x51],
        ));

        // Before activation: rejected.
        assert!(check_ska_emission_in_block(&[ska_tx.clone()], 50, &params).is_err());

        // After activation: allowed.
        assert!(check_ska_emission_in_block(&[ska_tx], 250, &params).is_ok());
    }

    #[test]
    fn test_var_blocks_unaffected() {
        let params = test_params();
        let mut var_tx = MsgTx::new();
        var_tx.add_tx_in(TxIn::new(OutPoint::new([1; 32], 0, 0), 10, vec![]));
        var_tx.add_tx_out(TxOut::new_var(10, vec![0x51]));
        assert!(check_ska_emission_in_block(&[var_tx], 1, &params).is_ok());
    }
}
