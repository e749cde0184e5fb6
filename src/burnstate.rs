//! Persistent ledger of destroyed SKA supply
//!
//! Tracks the cumulative amount of each SKA coin permanently destroyed
//! through burn outputs.  The ledger is updated under a write lock that is
//! held across persistence, so on-disk state never lags what concurrent
//! readers can observe in memory, and it is written inside the same
//! database transaction that commits the rest of the block so a crash can
//! never leave the two halves inconsistent.

use crate::amount::SkaAmount;
use crate::chainparams::ChainParams;
use crate::cointype::CoinType;
use crate::database::KvTx;
use crate::error::StoreError;
use crate::transaction::{Hash, MsgTx};
use log::debug;
use std::collections::HashMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

/// Database bucket holding the burn ledger.
pub const SKA_BURN_STATE_BUCKET: &[u8] = b"skaburnstate";

/// Meta key holding the on-disk format version.
pub const SKA_BURN_STATE_VERSION_KEY: &[u8] = b"__meta_version__";

/// Current on-disk format version.  Version 2 stores each total as a
/// variable length big-endian magnitude; version 1 stored fixed 8-byte
/// little-endian integers.
const SKA_BURN_STATE_FORMAT_VERSION: u32 = 2;

/// A burn output observed in a block, used to move the ledger forward on
/// connect and backward on disconnect.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkaBurnRecord {
    pub coin_type: CoinType,
    pub amount: SkaAmount,
    pub height: i64,
    pub tx_hash: Hash,
    pub out_index: u32,
}

/// The burn ledger: cumulative destroyed supply per SKA coin type.
///
/// Coin type 0 never appears; VAR burns are not allowed and their presence
/// on disk is a load-time error.
pub struct SkaBurnState {
    burned: RwLock<HashMap<CoinType, SkaAmount>>,
}

impl SkaBurnState {
    /// Creates an empty ledger.
    pub fn new() -> SkaBurnState {
        SkaBurnState {
            burned: RwLock::new(HashMap::new()),
        }
    }

    /// Loads the ledger from the database, accepting both on-disk format
    /// versions.  A missing bucket yields an empty ledger.
    pub fn load(db_tx: &dyn KvTx) -> Result<SkaBurnState, StoreError> {
        let mut burned = HashMap::new();

        if let Some(bucket) = db_tx.bucket(SKA_BURN_STATE_BUCKET) {
            // A missing version key means the legacy v1 format.
            let version = match bucket.get(SKA_BURN_STATE_VERSION_KEY) {
                Some(bytes) => {
                    if bytes.len() != 4 {
                        return Err(StoreError::Deserialize(format!(
                            "invalid burn state version encoding: expected 4 bytes, got {}",
                            bytes.len()
                        )));
                    }
                    u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])
                }
                None => 1,
            };

            if version > SKA_BURN_STATE_FORMAT_VERSION {
                return Err(StoreError::UnknownVersion(version));
            }

            bucket.for_each(&mut |key, value| {
                if key == SKA_BURN_STATE_VERSION_KEY {
                    return Ok(());
                }

                if key.len() != 1 {
                    return Err(StoreError::Deserialize(format!(
                        "invalid key length in burn state bucket: {}",
                        key.len()
                    )));
                }
                if key[0] == 0 {
                    return Err(StoreError::VarBurnEntry);
                }
                let coin_type = CoinType(key[0]);

                let amount = if version == 1 {
                    // V1: fixed 8-byte little-endian integer.
                    if value.len() != 8 {
                        return Err(StoreError::Deserialize(format!(
                            "invalid value length for coin type {} in v1 format: {}",
                            coin_type.0,
                            value.len()
                        )));
                    }
                    let mut raw = [0u8; 8];
                    raw.copy_from_slice(value);
                    SkaAmount::from_i64(i64::from_le_bytes(raw))
                } else {
                    // V2: variable length big-endian magnitude.
                    if value.is_empty() {
                        return Err(StoreError::Deserialize(format!(
                            "invalid value length for coin type {} in v2 format: 0",
                            coin_type.0
                        )));
                    }
                    SkaAmount::from_bytes(value)
                };

                burned.insert(coin_type, amount);
                Ok(())
            })?;
        }

        debug!("loaded SKA burn state: {} coin types tracked", burned.len());
        Ok(SkaBurnState {
            burned: RwLock::new(burned),
        })
    }

    /// Returns the total burned for the coin type, or `None` when nothing
    /// has been burned.  The returned amount is a copy.
    pub fn get_burned_amount(&self, coin_type: CoinType) -> Option<SkaAmount> {
        self.read_locked().get(&coin_type).cloned()
    }

    /// Returns a deep copy of every per-coin total.
    pub fn get_all_burned_amounts(&self) -> HashMap<CoinType, SkaAmount> {
        self.read_locked().clone()
    }

    /// Applies the burns of a connected block and persists the whole
    /// ledger within the caller's database transaction.  The write lock is
    /// held until persistence completes.
    pub fn connect_ska_burns_tx(
        &self,
        db_tx: &mut dyn KvTx,
        burns: &[SkaBurnRecord],
    ) -> Result<(), StoreError> {
        if burns.is_empty() {
            return Ok(());
        }

        let mut burned = self.write_locked();
        for burn in burns {
            let total = burned
                .entry(burn.coin_type)
                .or_insert_with(SkaAmount::zero);
            *total = total.add(&burn.amount);

            debug!(
                "connected SKA burn: {} amount {} at height {} ({}:{})",
                burn.coin_type,
                burn.amount,
                burn.height,
                hex_prefix(&burn.tx_hash),
                burn.out_index
            );
        }

        save_locked(&burned, db_tx)
    }

    /// Reverses the burns of a disconnected block and persists the ledger
    /// within the caller's database transaction.  A total that reaches
    /// zero is removed entirely, restoring the byte-identical on-disk
    /// state from before the block connected.
    pub fn disconnect_ska_burns_tx(
        &self,
        db_tx: &mut dyn KvTx,
        burns: &[SkaBurnRecord],
    ) -> Result<(), StoreError> {
        if burns.is_empty() {
            return Ok(());
        }

        let mut burned = self.write_locked();
        for burn in burns {
            if let Some(existing) = burned.get(&burn.coin_type) {
                let remaining = existing.sub(&burn.amount);
                if remaining.sign() <= 0 {
                    burned.remove(&burn.coin_type);
                } else {
                    burned.insert(burn.coin_type, remaining);
                }
            }

            debug!(
                "disconnected SKA burn: {} amount {} at height {} ({}:{})",
                burn.coin_type,
                burn.amount,
                burn.height,
                hex_prefix(&burn.tx_hash),
                burn.out_index
            );
        }

        save_locked(&burned, db_tx)
    }

    /// Removes all burn state from memory and from the database.  Only for
    /// database initialization or recovery.
    pub fn clear(&self, db_tx: &mut dyn KvTx) -> Result<(), StoreError> {
        let mut burned = self.write_locked();
        burned.clear();

        if db_tx.bucket(SKA_BURN_STATE_BUCKET).is_some() {
            db_tx.delete_bucket(SKA_BURN_STATE_BUCKET)?;
        }
        Ok(())
    }

    fn read_locked(&self) -> RwLockReadGuard<'_, HashMap<CoinType, SkaAmount>> {
        self.burned.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write_locked(&self) -> RwLockWriteGuard<'_, HashMap<CoinType, SkaAmount>> {
        self.burned.write().unwrap_or_else(|e| e.into_inner())
    }
}

impl Default for SkaBurnState {
    fn default() -> Self {
        SkaBurnState::new()
    }
}

/// Writes the ledger under the caller's transaction.  The bucket is
/// deleted and recreated so unknown keys cannot survive a save, then the
/// version marker and every non-zero total are written.
fn save_locked(
    burned: &HashMap<CoinType, SkaAmount>,
    db_tx: &mut dyn KvTx,
) -> Result<(), StoreError> {
    if db_tx.bucket(SKA_BURN_STATE_BUCKET).is_some() {
        db_tx.delete_bucket(SKA_BURN_STATE_BUCKET)?;
    }
    let bucket = db_tx.create_bucket(SKA_BURN_STATE_BUCKET)?;

    bucket.put(
        SKA_BURN_STATE_VERSION_KEY,
        &SKA_BURN_STATE_FORMAT_VERSION.to_le_bytes(),
    )?;

    for (coin_type, amount) in burned {
        if amount.sign() <= 0 {
            continue;
        }
        bucket.put(&[coin_type.0], &amount.to_bytes())?;
    }

    Ok(())
}

fn hex_prefix(hash: &Hash) -> String {
    hash[..8].iter().map(|b| format!("{:02x}", b)).collect()
}

/// Scans a block's transactions for burn outputs and collects the records
/// needed to update the ledger.  Only SKA outputs whose script matches the
/// chain's burn recognizer count.
pub fn extract_ska_burns_from_block(
    transactions: &[MsgTx],
    block_height: i64,
    params: &ChainParams,
) -> Vec<SkaBurnRecord> {
    let mut burns = Vec::new();

    for tx in transactions {
        let tx_hash = tx.tx_hash();
        for (out_index, tx_out) in tx.tx_out.iter().enumerate() {
            if !tx_out.coin_type.is_ska() {
                continue;
            }
            if !(params.is_ska_burn_script)(&tx_out.pk_script) {
                continue;
            }
            if let Some(atoms) = tx_out.ska_atoms() {
                burns.push(SkaBurnRecord {
                    coin_type: tx_out.coin_type,
                    amount: atoms.clone(),
                    height: block_height,
                    tx_hash,
                    out_index: out_index as u32,
                });
            }
        }
    }

    burns
}
