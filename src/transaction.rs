//! Transaction model and context-free validation
//!
//! Transactions split into a prefix (the signable part) and a witness (the
//! signature data).  Outputs carry a coin type tag and a value discriminated
//! by asset family: VAR outputs hold a bounded 64-bit atom count, SKA
//! outputs hold an arbitrary precision atom count.

use crate::amount::{Amount, SkaAmount, MAX_VAR_ATOMS};
use crate::cointype::CoinType;
use crate::error::{ProtocolError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;

/// Hash type: 256-bit hash
pub type Hash = [u8; 32];

/// The zero hash, used by null outpoints.
pub const ZERO_HASH: Hash = [0u8; 32];

/// The initial transaction version.
pub const TX_VERSION: u16 = 1;

/// The transaction version that enables sequence locks.
pub const TX_VERSION_SEQ_LOCK: u16 = 2;

/// The transaction version that enables the decentralized treasury.
pub const TX_VERSION_TREASURY: u16 = 3;

/// The maximum sequence number a transaction input can carry.
pub const MAX_TX_IN_SEQUENCE_NUM: u32 = 0xffffffff;

/// The maximum index of a previous outpoint; this value marks a null
/// outpoint when combined with the zero hash.
pub const MAX_PREV_OUT_INDEX: u32 = 0xffffffff;

/// Expiry value indicating the transaction never expires.
pub const NO_EXPIRY_VALUE: u32 = 0;

/// Null value for an input witness.
pub const NULL_VALUE_IN: i64 = -1;

/// Null block height for an input witness; references the genesis block.
pub const NULL_BLOCK_HEIGHT: u32 = 0x00000000;

/// Null in-block transaction index for an input witness.
pub const NULL_BLOCK_INDEX: u32 = 0xffffffff;

/// The default public key script version.
pub const DEFAULT_PK_SCRIPT_VERSION: u16 = 0x0000;

/// Tree value for a transaction whose block location is unknown.
pub const TX_TREE_UNKNOWN: i8 = -1;

/// Tree value for the regular transaction tree of a block.
pub const TX_TREE_REGULAR: i8 = 0;

/// Tree value for the stake transaction tree of a block.
pub const TX_TREE_STAKE: i8 = 1;

/// Flag that disables relative lock time interpretation of a sequence.
pub const SEQUENCE_LOCK_TIME_DISABLED: u32 = 1 << 31;

/// Flag that switches a relative lock time to 512-second units.
pub const SEQUENCE_LOCK_TIME_IS_SECONDS: u32 = 1 << 22;

/// Mask extracting the relative lock time from a sequence number.
pub const SEQUENCE_LOCK_TIME_MASK: u32 = 0x0000ffff;

/// Granularity shift for seconds-based relative lock times.
pub const SEQUENCE_LOCK_TIME_GRANULARITY: u32 = 9;

/// The signature script prefix that marks an SKA emission transaction:
/// a 1-byte push of the three ASCII bytes "SKA".
pub const SKA_EMISSION_MARKER: [u8; 4] = [0x01, 0x53, 0x4b, 0x41];

// Script opcodes needed for shape classification.  They are consensus
// constants that cannot change without a vote, so referring to them
// directly avoids a dependency on a script engine.
const OP_DATA_12: u8 = 0x0c;
const OP_RETURN: u8 = 0x6a;
const OP_TADD: u8 = 0xc1;
const OP_TSPEND: u8 = 0xc2;
const OP_TGEN: u8 = 0xc3;

/// OP_RETURN opcode for SSFee markers.
pub const SSFEE_OP_RETURN: u8 = 0x6a;

/// OP_DATA_6, used by miner SSFee markers (6 bytes of data).
pub const SSFEE_OP_DATA_6: u8 = 0x06;

/// OP_DATA_8, used by staker SSFee markers (8 bytes of data).
pub const SSFEE_OP_DATA_8: u8 = 0x08;

/// The 'S' byte of the "SF" marker.
pub const SSFEE_MARKER_S: u8 = 0x53;

/// The 'F' byte of the "SF" and "MF" markers.
pub const SSFEE_MARKER_F: u8 = 0x46;

/// The 'M' byte of the "MF" marker.
pub const SSFEE_MARKER_M: u8 = 0x4d;

/// Minimum length of an SSFee OP_RETURN script:
/// OP_RETURN(1) + OP_DATA_6/8(1) + marker(2) + height(4).
pub const SSFEE_MIN_SCRIPT_LEN: usize = 8;

/// The serialized framing of a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TxSerializeType {
    /// Prefix and all witness data.
    Full,
    /// Prefix only; the framing hashed for the stable transaction id.
    NoWitness,
    /// Witness only; the framing hashed for the witness hash.
    OnlyWitness,
}

impl TxSerializeType {
    /// Returns the on-the-wire discriminant carried in the upper 16 bits of
    /// the packed version field.
    pub fn to_u16(self) -> u16 {
        match self {
            TxSerializeType::Full => 0,
            TxSerializeType::NoWitness => 1,
            TxSerializeType::OnlyWitness => 2,
        }
    }

    pub fn from_u16(v: u16) -> Option<TxSerializeType> {
        match v {
            0 => Some(TxSerializeType::Full),
            1 => Some(TxSerializeType::NoWitness),
            2 => Some(TxSerializeType::OnlyWitness),
            _ => None,
        }
    }
}

/// Identifies a previous transaction output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OutPoint {
    pub hash: Hash,
    pub index: u32,
    pub tree: i8,
}

impl OutPoint {
    pub fn new(hash: Hash, index: u32, tree: i8) -> OutPoint {
        OutPoint { hash, index, tree }
    }

    /// The null outpoint designating mint-like inputs.
    pub fn null() -> OutPoint {
        OutPoint {
            hash: ZERO_HASH,
            index: MAX_PREV_OUT_INDEX,
            tree: TX_TREE_REGULAR,
        }
    }

    pub fn is_null(&self) -> bool {
        self.hash == ZERO_HASH && self.index == MAX_PREV_OUT_INDEX && self.tree == TX_TREE_REGULAR
    }
}

impl fmt::Display for OutPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for b in self.hash.iter().rev() {
            write!(f, "{:02x}", b)?;
        }
        write!(f, ":{}", self.index)
    }
}

/// A transaction input: the non-witness outpoint reference plus the
/// witness fields carried separately on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxIn {
    // Non-witness
    pub previous_out_point: OutPoint,
    pub sequence: u32,

    // Witness
    pub value_in: i64,
    pub ska_value_in: Option<SkaAmount>,
    pub block_height: u32,
    pub block_index: u32,
    pub signature_script: Vec<u8>,
}

impl TxIn {
    /// Creates an input spending the given outpoint with the default
    /// sequence number.
    pub fn new(previous_out_point: OutPoint, value_in: i64, signature_script: Vec<u8>) -> TxIn {
        TxIn {
            previous_out_point,
            sequence: MAX_TX_IN_SEQUENCE_NUM,
            value_in,
            ska_value_in: None,
            block_height: NULL_BLOCK_HEIGHT,
            block_index: NULL_BLOCK_INDEX,
            signature_script,
        }
    }
}

/// A transaction output.
///
/// The value is discriminated by asset family and must agree with the coin
/// type tag; [`TxOut::check_value_fields`] enforces the residual invariant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxOut {
    pub coin_type: CoinType,
    pub value: Amount,
    pub version: u16,
    pub pk_script: Vec<u8>,
}

impl TxOut {
    /// Creates a VAR output with the default script version.
    pub fn new_var(atoms: i64, pk_script: Vec<u8>) -> TxOut {
        TxOut {
            coin_type: CoinType::VAR,
            value: Amount::Var(atoms),
            version: DEFAULT_PK_SCRIPT_VERSION,
            pk_script,
        }
    }

    /// Creates an SKA output with the default script version.
    pub fn new_ska(coin_type: CoinType, atoms: SkaAmount, pk_script: Vec<u8>) -> TxOut {
        TxOut {
            coin_type,
            value: Amount::Ska(atoms),
            version: DEFAULT_PK_SCRIPT_VERSION,
            pk_script,
        }
    }

    /// Returns the VAR atom count for VAR outputs.
    pub fn var_atoms(&self) -> Option<i64> {
        self.value.var_atoms()
    }

    /// Returns the SKA atom count for SKA outputs.
    pub fn ska_atoms(&self) -> Option<&SkaAmount> {
        self.value.ska_atoms()
    }

    /// Checks that the value family agrees with the coin type tag and that
    /// an SKA value is non-negative and fits the wire's one-byte magnitude
    /// length.  Any disagreement is a fatal sanity error because an
    /// ambiguous output could be spent twice over, and an unbounded
    /// magnitude could never be serialized or hashed.
    pub fn check_value_fields(&self) -> Result<()> {
        match (&self.value, self.coin_type.is_var()) {
            (Amount::Var(_), true) => Ok(()),
            (Amount::Ska(_), true) => Err(ProtocolError::BadTxOutValue(
                "VAR output carries an SKA value".to_string(),
            )),
            (Amount::Var(_), false) => Err(ProtocolError::BadTxOutValue(format!(
                "{} output carries a VAR value",
                self.coin_type
            ))),
            (Amount::Ska(atoms), false) => {
                if atoms.is_negative() {
                    return Err(ProtocolError::BadTxOutValue(format!(
                        "{} output has negative value {}",
                        self.coin_type, atoms
                    )));
                }
                let magnitude_len = atoms.to_bytes().len();
                if magnitude_len > 255 {
                    return Err(ProtocolError::BadTxOutValue(format!(
                        "{} output value magnitude is {} bytes, max 255",
                        self.coin_type, magnitude_len
                    )));
                }
                Ok(())
            }
        }
    }
}

/// A transaction message: framing selector, version, inputs, outputs and
/// the lock time and expiry fields.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MsgTx {
    pub cached_hash: Option<Hash>,
    pub ser_type: TxSerializeType,
    pub version: u16,
    pub tx_in: Vec<TxIn>,
    pub tx_out: Vec<TxOut>,
    pub lock_time: u32,
    pub expiry: u32,
}

impl MsgTx {
    /// Creates an empty full-framing transaction at the current version.
    pub fn new() -> MsgTx {
        MsgTx {
            cached_hash: None,
            ser_type: TxSerializeType::Full,
            version: TX_VERSION,
            tx_in: Vec::new(),
            tx_out: Vec::new(),
            lock_time: 0,
            expiry: 0,
        }
    }

    pub fn add_tx_in(&mut self, tx_in: TxIn) {
        self.tx_in.push(tx_in);
    }

    pub fn add_tx_out(&mut self, tx_out: TxOut) {
        self.tx_out.push(tx_out);
    }
}

impl Default for MsgTx {
    fn default() -> Self {
        MsgTx::new()
    }
}

/// Determines the primary coin type of a transaction from its outputs: the
/// coin type of the first output with a positive amount, falling back to
/// the first output's coin type, and VAR for transactions with no outputs.
pub fn primary_coin_type(tx: &MsgTx) -> CoinType {
    for tx_out in &tx.tx_out {
        if !tx_out.value.is_zero() {
            return tx_out.coin_type;
        }
    }
    tx.tx_out
        .first()
        .map(|out| out.coin_type)
        .unwrap_or(CoinType::VAR)
}

/// Checks if a script is a valid SSFee OP_RETURN marker.
///
/// Staker markers are OP_RETURN + OP_DATA_8 + "SF" + height(4) + voter
/// sequence(2); miner markers are OP_RETURN + OP_DATA_6 + "MF" + height(4).
pub fn is_ssfee_marker_script(script: &[u8]) -> bool {
    if script.len() < SSFEE_MIN_SCRIPT_LEN {
        return false;
    }
    if script[0] != SSFEE_OP_RETURN {
        return false;
    }
    if script[1] != SSFEE_OP_DATA_6 && script[1] != SSFEE_OP_DATA_8 {
        return false;
    }
    (script[2] == SSFEE_MARKER_S && script[3] == SSFEE_MARKER_F)
        || (script[2] == SSFEE_MARKER_M && script[3] == SSFEE_MARKER_F)
}

/// Returns whether the transaction matches the SKA emission shape: a single
/// null-outpoint input whose signature script begins with the SKA marker
/// and only SKA outputs.
///
/// This is a fast structural check for categorization; contextual rules
/// (height, configured totals) are validated by the emission module.
pub fn is_ska_emission_transaction(tx: &MsgTx) -> bool {
    if tx.tx_in.len() != 1 || tx.tx_out.is_empty() {
        return false;
    }

    let prev_out = &tx.tx_in[0].previous_out_point;
    if prev_out.hash != ZERO_HASH || prev_out.index != MAX_PREV_OUT_INDEX {
        return false;
    }

    let sig_script = &tx.tx_in[0].signature_script;
    if sig_script.len() < 4 || sig_script[..4] != SKA_EMISSION_MARKER {
        return false;
    }

    tx.tx_out.iter().all(|out| out.coin_type.is_ska())
}

/// Determines whether a transaction is a coinbase: a single null-outpoint
/// input whose signature script is not a treasury spend, not an SSFee
/// marker transaction, and not an SKA emission.
pub fn is_coin_base_tx(tx: &MsgTx, is_treasury_enabled: bool) -> bool {
    // A coinbase must be version 3 once the treasury agenda is active.
    if is_treasury_enabled && tx.version != TX_VERSION_TREASURY {
        return false;
    }

    if tx.tx_in.len() != 1 {
        return false;
    }

    let prev_out = &tx.tx_in[0].previous_out_point;
    if prev_out.index != MAX_PREV_OUT_INDEX || prev_out.hash != ZERO_HASH {
        return false;
    }

    if is_treasury_enabled && is_treasury_spend_like(tx) {
        return false;
    }

    // SSFee transactions have an empty coinbase-style signature script but
    // carry an OP_RETURN marker output.
    if tx.version >= TX_VERSION_TREASURY
        && tx.tx_out.len() >= 2
        && tx.tx_in[0].signature_script.is_empty()
        && tx
            .tx_out
            .iter()
            .any(|out| is_ssfee_marker_script(&out.pk_script))
    {
        return false;
    }

    // SKA emissions carry the marker prefix in the signature script.
    let sig_script = &tx.tx_in[0].signature_script;
    if sig_script.len() >= 4 && sig_script[..4] == SKA_EMISSION_MARKER {
        return false;
    }

    true
}

/// Returns whether the transaction looks like a treasury spend for the
/// purposes of differentiating it from a coinbase.
///
/// Relies on the caller having verified there is at least one input.
fn is_treasury_spend_like(tx: &MsgTx) -> bool {
    if tx.tx_out.len() < 2 {
        return false;
    }

    let sig_len = tx.tx_in[0].signature_script.len();
    if sig_len == 0 || tx.tx_out[0].pk_script.is_empty() || tx.tx_out[1].pk_script.is_empty() {
        return false;
    }

    tx.tx_in[0].signature_script[sig_len - 1] == OP_TSPEND
        && tx.tx_out[0].pk_script[0] == OP_RETURN
        && tx.tx_out[1].pk_script[0] == OP_TGEN
}

/// Does a minimal check to see if a transaction is a treasury base.
pub fn is_treasury_base(tx: &MsgTx) -> bool {
    if tx.version != TX_VERSION_TREASURY {
        return false;
    }

    if tx.tx_in.len() != 1 || tx.tx_out.len() != 2 {
        return false;
    }

    if !tx.tx_in[0].signature_script.is_empty() {
        return false;
    }

    if tx.tx_out[0].pk_script.len() != 1 || tx.tx_out[0].pk_script[0] != OP_TADD {
        return false;
    }

    if tx.tx_out[1].pk_script.len() != 14
        || tx.tx_out[1].pk_script[0] != OP_RETURN
        || tx.tx_out[1].pk_script[1] != OP_DATA_12
    {
        return false;
    }

    tx.tx_in[0].previous_out_point.is_null()
}

/// Performs preliminary context-free checks on a transaction.
///
/// A sane transaction has at least one input and one output, fits in the
/// size limit, uses the correct value family on every output, keeps VAR
/// amounts and their sum within the supply bound, keeps SKA amounts
/// non-negative with magnitudes that fit the wire's one-byte length
/// prefix (on outputs and input witnesses alike, so a sane transaction
/// always serializes and hashes), and never spends the same outpoint
/// twice.  Per-SKA-coin supply caps need chain parameters and are
/// validated in context-aware code.
pub fn check_transaction_sanity(tx: &MsgTx, max_tx_size: u64) -> Result<()> {
    if tx.tx_in.is_empty() {
        return Err(ProtocolError::NoTxInputs);
    }

    if tx.tx_out.is_empty() {
        return Err(ProtocolError::NoTxOutputs);
    }

    let serialized_size = tx.serialize_size() as u64;
    if serialized_size > max_tx_size {
        return Err(ProtocolError::TxTooBig(format!(
            "serialized transaction is {} bytes, max {}",
            serialized_size, max_tx_size
        )));
    }

    let mut total_var_atoms: i64 = 0;
    for (i, tx_out) in tx.tx_out.iter().enumerate() {
        tx_out
            .check_value_fields()
            .map_err(|e| ProtocolError::BadTxOutValue(format!("output {}: {}", i, e)))?;

        match &tx_out.value {
            Amount::Var(atoms) => {
                if *atoms < 0 {
                    return Err(ProtocolError::BadTxOutValue(format!(
                        "output {} has negative value {}",
                        i, atoms
                    )));
                }
                if *atoms > MAX_VAR_ATOMS {
                    return Err(ProtocolError::BadTxOutValue(format!(
                        "output {} value {} is higher than max allowed {}",
                        i, atoms, MAX_VAR_ATOMS
                    )));
                }
                total_var_atoms = total_var_atoms.checked_add(*atoms).ok_or_else(|| {
                    ProtocolError::BadTxOutValue(
                        "total value of all VAR outputs overflows".to_string(),
                    )
                })?;
                if total_var_atoms > MAX_VAR_ATOMS {
                    return Err(ProtocolError::BadTxOutValue(format!(
                        "total value of all VAR outputs is {}, max allowed {}",
                        total_var_atoms, MAX_VAR_ATOMS
                    )));
                }
            }
            Amount::Ska(_) => {
                // Non-negativity was established by check_value_fields.
            }
        }
    }

    let mut seen = HashSet::with_capacity(tx.tx_in.len());
    for (i, tx_in) in tx.tx_in.iter().enumerate() {
        if let Some(value_in) = &tx_in.ska_value_in {
            let magnitude_len = value_in.to_bytes().len();
            if magnitude_len > 255 {
                return Err(ProtocolError::VarBytesTooLong(format!(
                    "input {} SKA value magnitude is {} bytes, max 255",
                    i, magnitude_len
                )));
            }
        }
        if !seen.insert(tx_in.previous_out_point) {
            return Err(ProtocolError::DuplicateTxInputs);
        }
    }

    Ok(())
}
