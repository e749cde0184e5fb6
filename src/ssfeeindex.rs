//! SSFee index: recipient lookup for distributed fee payouts
//!
//! The index maps (fee role, coin type, recipient hash160) to the
//! outpoints paying that recipient.  Keys are a fixed 24 bytes: the "sf"
//! prefix, one role byte, one coin type byte and the 20-byte hash160
//! lifted from a standard pay-to-pubkey-hash output; any other script
//! shape is skipped.  Values are concatenated 37-byte outpoint records.

use crate::cointype::CoinType;
use crate::database::KvTx;
use crate::error::StoreError;
use crate::transaction::{
    is_ssfee_marker_script, Hash, MsgTx, OutPoint, SSFEE_OP_DATA_6, SSFEE_OP_DATA_8,
};
use serde::{Deserialize, Serialize};

/// Key prefix for SSFee index entries; part of the on-disk contract.
pub const SSFEE_INDEX_KEY_PREFIX: &[u8] = b"sf";

/// Database bucket holding the SSFee index.
pub const SSFEE_INDEX_BUCKET: &[u8] = b"ssfeeindex";

/// Serialized size of an outpoint record: 32-byte hash, 4-byte index and
/// a tree byte.
pub const OUTPOINT_SIZE: usize = 37;

/// Total size of an index key.
pub const SSFEE_INDEX_KEY_SIZE: usize = 24;

/// The role a fee payout belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SsfeeRole {
    Staker,
    Miner,
}

impl SsfeeRole {
    /// The role byte stored in index keys.
    pub fn to_byte(self) -> u8 {
        match self {
            SsfeeRole::Staker => b'S',
            SsfeeRole::Miner => b'M',
        }
    }
}

/// Builds a 24-byte index key: "sf" + role + coin type + hash160.
pub fn make_ssfee_index_key(
    role: SsfeeRole,
    coin_type: CoinType,
    hash160: &[u8],
) -> Result<[u8; SSFEE_INDEX_KEY_SIZE], StoreError> {
    if hash160.len() != 20 {
        return Err(StoreError::Corruption(format!(
            "invalid hash160 length: {}",
            hash160.len()
        )));
    }

    let mut key = [0u8; SSFEE_INDEX_KEY_SIZE];
    key[0..2].copy_from_slice(SSFEE_INDEX_KEY_PREFIX);
    key[2] = role.to_byte();
    key[3] = coin_type.0;
    key[4..24].copy_from_slice(hash160);
    Ok(key)
}

/// Extracts the hash160 from a standard 25-byte pay-to-pubkey-hash
/// script: DUP HASH160 DATA_20 <20 bytes> EQUALVERIFY CHECKSIG.
pub fn extract_hash160_from_pk_script(pk_script: &[u8]) -> Result<[u8; 20], StoreError> {
    if pk_script.len() != 25 {
        return Err(StoreError::Corruption(format!(
            "invalid P2PKH script length: {}",
            pk_script.len()
        )));
    }

    if pk_script[0] != 0x76 // OP_DUP
        || pk_script[1] != 0xa9 // OP_HASH160
        || pk_script[2] != 0x14 // OP_DATA_20
        || pk_script[23] != 0x88 // OP_EQUALVERIFY
        || pk_script[24] != 0xac
    // OP_CHECKSIG
    {
        return Err(StoreError::Corruption(
            "not a valid P2PKH script".to_string(),
        ));
    }

    let mut hash160 = [0u8; 20];
    hash160.copy_from_slice(&pk_script[3..23]);
    Ok(hash160)
}

/// Serializes outpoints to concatenated 37-byte records.
pub fn serialize_out_points(outpoints: &[OutPoint]) -> Vec<u8> {
    let mut out = Vec::with_capacity(outpoints.len() * OUTPOINT_SIZE);
    for outpoint in outpoints {
        out.extend_from_slice(&outpoint.hash);
        out.extend_from_slice(&outpoint.index.to_le_bytes());
        out.push(outpoint.tree as u8);
    }
    out
}

/// Deserializes concatenated 37-byte outpoint records.  A length that is
/// not a multiple of the record size is a corruption error.
pub fn deserialize_out_points(data: &[u8]) -> Result<Vec<OutPoint>, StoreError> {
    if data.len() % OUTPOINT_SIZE != 0 {
        return Err(StoreError::Corruption(format!(
            "invalid outpoint data length: {}",
            data.len()
        )));
    }

    let mut outpoints = Vec::with_capacity(data.len() / OUTPOINT_SIZE);
    for record in data.chunks_exact(OUTPOINT_SIZE) {
        let mut hash: Hash = [0u8; 32];
        hash.copy_from_slice(&record[..32]);
        let index = u32::from_le_bytes([record[32], record[33], record[34], record[35]]);
        let tree = record[36] as i8;
        outpoints.push(OutPoint { hash, index, tree });
    }
    Ok(outpoints)
}

/// Determines the role of an SSFee transaction from its marker output, or
/// `None` when no marker is present.
pub fn ssfee_tx_role(tx: &MsgTx) -> Option<SsfeeRole> {
    for tx_out in &tx.tx_out {
        if is_ssfee_marker_script(&tx_out.pk_script) {
            return match tx_out.pk_script[1] {
                SSFEE_OP_DATA_8 => Some(SsfeeRole::Staker),
                SSFEE_OP_DATA_6 => Some(SsfeeRole::Miner),
                _ => None,
            };
        }
    }
    None
}

/// The (key, outpoint) pairs an SSFee transaction contributes to the
/// index: one per payment output with a standard P2PKH recipient.  Marker
/// and non-P2PKH outputs are skipped.
pub fn ssfee_index_entries(
    tx: &MsgTx,
    tx_hash: Hash,
    tree: i8,
) -> Vec<([u8; SSFEE_INDEX_KEY_SIZE], OutPoint)> {
    let role = match ssfee_tx_role(tx) {
        Some(role) => role,
        None => return Vec::new(),
    };

    let mut entries = Vec::new();
    for (index, tx_out) in tx.tx_out.iter().enumerate() {
        if is_ssfee_marker_script(&tx_out.pk_script) {
            continue;
        }
        let hash160 = match extract_hash160_from_pk_script(&tx_out.pk_script) {
            Ok(hash160) => hash160,
            Err(_) => continue,
        };
        if let Ok(key) = make_ssfee_index_key(role, tx_out.coin_type, &hash160) {
            entries.push((
                key,
                OutPoint {
                    hash: tx_hash,
                    index: index as u32,
                    tree,
                },
            ));
        }
    }
    entries
}

/// Appends an SSFee transaction's payouts to the index inside the
/// caller's database transaction.
pub fn connect_ssfee_tx(
    db_tx: &mut dyn KvTx,
    tx: &MsgTx,
    tx_hash: Hash,
    tree: i8,
) -> Result<(), StoreError> {
    let entries = ssfee_index_entries(tx, tx_hash, tree);
    if entries.is_empty() {
        return Ok(());
    }

    if db_tx.bucket(SSFEE_INDEX_BUCKET).is_none() {
        db_tx.create_bucket(SSFEE_INDEX_BUCKET)?;
    }
    let bucket = db_tx
        .bucket_mut(SSFEE_INDEX_BUCKET)
        .ok_or_else(|| StoreError::BucketNotFound("ssfeeindex".to_string()))?;

    for (key, outpoint) in entries {
        let mut value = bucket.get(&key).unwrap_or_default();
        value.extend_from_slice(&serialize_out_points(&[outpoint]));
        bucket.put(&key, &value)?;
    }
    Ok(())
}

/// Removes an SSFee transaction's payouts from the index inside the
/// caller's database transaction, undoing a prior connect.
pub fn disconnect_ssfee_tx(
    db_tx: &mut dyn KvTx,
    tx: &MsgTx,
    tx_hash: Hash,
    tree: i8,
) -> Result<(), StoreError> {
    let entries = ssfee_index_entries(tx, tx_hash, tree);
    if entries.is_empty() {
        return Ok(());
    }

    let bucket = match db_tx.bucket_mut(SSFEE_INDEX_BUCKET) {
        Some(bucket) => bucket,
        None => return Ok(()),
    };

    for (key, outpoint) in entries {
        let existing = match bucket.get(&key) {
            Some(value) => value,
            None => continue,
        };
        let remaining: Vec<OutPoint> = deserialize_out_points(&existing)?
            .into_iter()
            .filter(|op| *op != outpoint)
            .collect();
        if remaining.is_empty() {
            bucket.delete(&key)?;
        } else {
            bucket.put(&key, &serialize_out_points(&remaining))?;
        }
    }
    Ok(())
}

/// Looks up the outpoints paying the recipient for the given role and
/// coin type.
pub fn lookup_ssfee_out_points(
    db_tx: &dyn KvTx,
    role: SsfeeRole,
    coin_type: CoinType,
    hash160: &[u8],
) -> Result<Vec<OutPoint>, StoreError> {
    let key = make_ssfee_index_key(role, coin_type, hash160)?;
    let bucket = match db_tx.bucket(SSFEE_INDEX_BUCKET) {
        Some(bucket) => bucket,
        None => return Ok(Vec::new()),
    };
    match bucket.get(&key) {
        Some(value) => deserialize_out_points(&value),
        None => Ok(Vec::new()),
    }
}
