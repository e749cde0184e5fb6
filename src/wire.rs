//! Canonical transaction wire codec
//!
//! Transactions serialize under three framings (full, prefix only, witness
//! only) selected by the upper 16 bits of the packed version field, and
//! three historical wire epochs selected by the protocol version passed to
//! every codec function: the legacy layout through version 11, the
//! dual-coin layout of version 12 which appends a coin type byte to each
//! output, and the big-integer layout from version 13 which leads each
//! output with its coin type so SKA values can use variable width.

use crate::amount::{Amount, SkaAmount};
use crate::cointype::CoinType;
use crate::error::{ProtocolError, Result};
use crate::transaction::{Hash, MsgTx, OutPoint, TxIn, TxOut, TxSerializeType};
use bitcoin_hashes::{sha256d, Hash as BitcoinHash};
use std::sync::Mutex;

/// The protocol version that added the per-output coin type byte.
pub const DUAL_COIN_VERSION: u32 = 12;

/// The protocol version that moved the coin type to the front of each
/// output and switched SKA values to variable-width big integers.
pub const SKA_BIG_INT_VERSION: u32 = 13;

/// The current protocol version.
pub const PROTOCOL_VERSION: u32 = SKA_BIG_INT_VERSION;

/// The maximum bytes a message payload can be.
pub const MAX_MESSAGE_PAYLOAD: u32 = 1024 * 1024 * 32;

/// Minimum serialized size of a transaction input in the prefix:
/// outpoint hash 32 + index 4 + tree 1 + script length varint 1 +
/// sequence 4.
const MIN_TX_IN_PAYLOAD: u32 = 11 + 32;

/// Maximum number of inputs a transaction that fits in a message could
/// possibly have.
const MAX_TX_IN_PER_MESSAGE: u64 = (MAX_MESSAGE_PAYLOAD / MIN_TX_IN_PAYLOAD) as u64 + 1;

/// Minimum serialized size of a transaction output: value 8 + script
/// length varint 1.
const MIN_TX_OUT_PAYLOAD: u32 = 9;

/// Maximum number of outputs a transaction that fits in a message could
/// possibly have.
const MAX_TX_OUT_PER_MESSAGE: u64 = (MAX_MESSAGE_PAYLOAD / MIN_TX_OUT_PAYLOAD) as u64 + 1;

/// Size of each buffer in the script pool.  Slightly more than twice the
/// size of the vast majority of standard scripts; larger scripts simply
/// bypass the pool.
pub const SCRIPT_POOL_BUFFER_SIZE: usize = 512;

/// Number of buffers the script pool keeps for reuse.
pub const SCRIPT_POOL_MAX_ITEMS: usize = 12_500;

/// Computes the chain's canonical 32-byte hash (double SHA-256).
pub fn chain_hash(data: &[u8]) -> Hash {
    sha256d::Hash::hash(data).to_byte_array()
}

/// A bounded pool of fixed-size byte buffers used while deserializing
/// scripts, avoiding one allocation per script on the hot decode path.
///
/// Borrowed buffers must be handed back with [`ScriptPool::give_back`]
/// once the decoded scripts have been materialized, or on any decode
/// error.  Returns never block; a full pool simply drops the buffer.
pub struct ScriptPool {
    buffers: Mutex<Vec<Vec<u8>>>,
    max_items: usize,
}

impl ScriptPool {
    /// Creates a pool with the default bounds.
    pub fn new() -> ScriptPool {
        ScriptPool::with_max_items(SCRIPT_POOL_MAX_ITEMS)
    }

    /// Creates a pool holding at most `max_items` buffers.
    pub fn with_max_items(max_items: usize) -> ScriptPool {
        ScriptPool {
            buffers: Mutex::new(Vec::new()),
            max_items,
        }
    }

    /// Borrows a buffer of the requested length.  Requests larger than the
    /// pooled buffer size get a fresh allocation that bypasses the pool;
    /// returning such a buffer is a harmless no-op.
    pub fn borrow(&self, size: usize) -> Vec<u8> {
        if size > SCRIPT_POOL_BUFFER_SIZE {
            return vec![0u8; size];
        }
        let mut buf = {
            let mut buffers = self.lock();
            buffers.pop()
        }
        .unwrap_or_else(|| Vec::with_capacity(SCRIPT_POOL_BUFFER_SIZE));
        buf.clear();
        buf.resize(size, 0);
        buf
    }

    /// Returns a buffer to the pool.  Buffers with an unexpected capacity
    /// and buffers beyond the pool bound are dropped.
    pub fn give_back(&self, buf: Vec<u8>) {
        if buf.capacity() != SCRIPT_POOL_BUFFER_SIZE {
            return;
        }
        let mut buffers = self.lock();
        if buffers.len() < self.max_items {
            buffers.push(buf);
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<Vec<u8>>> {
        self.buffers.lock().unwrap_or_else(|e| e.into_inner())
    }

    #[cfg(test)]
    fn pooled(&self) -> usize {
        self.lock().len()
    }
}

impl Default for ScriptPool {
    fn default() -> Self {
        ScriptPool::new()
    }
}

// Slice cursor primitives.  Reads advance the input slice; a short read
// reports which field was being decoded.

fn take<'a>(r: &mut &'a [u8], n: usize, field: &'static str) -> Result<&'a [u8]> {
    if r.len() < n {
        return Err(ProtocolError::Truncated(field));
    }
    let (head, tail) = r.split_at(n);
    *r = tail;
    Ok(head)
}

fn read_u8(r: &mut &[u8], field: &'static str) -> Result<u8> {
    Ok(take(r, 1, field)?[0])
}

fn read_u16_le(r: &mut &[u8], field: &'static str) -> Result<u16> {
    let b = take(r, 2, field)?;
    Ok(u16::from_le_bytes([b[0], b[1]]))
}

fn read_u32_le(r: &mut &[u8], field: &'static str) -> Result<u32> {
    let b = take(r, 4, field)?;
    Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
}

fn read_u64_le(r: &mut &[u8], field: &'static str) -> Result<u64> {
    let b = take(r, 8, field)?;
    Ok(u64::from_le_bytes([
        b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7],
    ]))
}

/// Returns the number of bytes a compact-size integer occupies.
pub fn var_int_serialize_size(v: u64) -> usize {
    match v {
        0..=0xfc => 1,
        0xfd..=0xffff => 3,
        0x10000..=0xffff_ffff => 5,
        _ => 9,
    }
}

/// Reads a compact-size integer.
pub fn read_var_int(r: &mut &[u8]) -> Result<u64> {
    let discriminant = read_u8(r, "varint discriminant")?;
    match discriminant {
        0xff => read_u64_le(r, "varint"),
        0xfe => Ok(read_u32_le(r, "varint")? as u64),
        0xfd => Ok(read_u16_le(r, "varint")? as u64),
        n => Ok(n as u64),
    }
}

/// Writes a compact-size integer.
pub fn write_var_int(w: &mut Vec<u8>, v: u64) {
    match v {
        0..=0xfc => w.push(v as u8),
        0xfd..=0xffff => {
            w.push(0xfd);
            w.extend_from_slice(&(v as u16).to_le_bytes());
        }
        0x10000..=0xffff_ffff => {
            w.push(0xfe);
            w.extend_from_slice(&(v as u32).to_le_bytes());
        }
        _ => {
            w.push(0xff);
            w.extend_from_slice(&v.to_le_bytes());
        }
    }
}

/// Writes a length-prefixed byte slice.
pub fn write_var_bytes(w: &mut Vec<u8>, bytes: &[u8]) {
    write_var_int(w, bytes.len() as u64);
    w.extend_from_slice(bytes);
}

/// Reads a variable length script into a pooled buffer.  A length beyond
/// `max_allowed` is rejected before any allocation happens, which protects
/// against memory exhaustion through malformed messages.
fn read_script(
    r: &mut &[u8],
    max_allowed: u32,
    field: &'static str,
    pool: &ScriptPool,
) -> Result<Vec<u8>> {
    let count = read_var_int(r)?;
    if count > max_allowed as u64 {
        return Err(ProtocolError::VarBytesTooLong(format!(
            "{} is larger than the max allowed size [count {}, max {}]",
            field, count, max_allowed
        )));
    }

    let mut buf = pool.borrow(count as usize);
    match take(r, count as usize, field) {
        Ok(bytes) => {
            buf.copy_from_slice(bytes);
            Ok(buf)
        }
        Err(e) => {
            pool.give_back(buf);
            Err(e)
        }
    }
}

/// Reads an outpoint: 32-byte hash, little-endian index and a tree byte.
pub fn read_out_point(r: &mut &[u8]) -> Result<OutPoint> {
    let hash_bytes = take(r, 32, "outpoint hash")?;
    let mut hash = [0u8; 32];
    hash.copy_from_slice(hash_bytes);
    let index = read_u32_le(r, "outpoint index")?;
    let tree = read_u8(r, "outpoint tree")? as i8;
    Ok(OutPoint { hash, index, tree })
}

/// Writes an outpoint.
pub fn write_out_point(w: &mut Vec<u8>, op: &OutPoint) {
    w.extend_from_slice(&op.hash);
    w.extend_from_slice(&op.index.to_le_bytes());
    w.push(op.tree as u8);
}

/// Reads the prefix part of a transaction input.
fn read_tx_in_prefix(r: &mut &[u8], ser_type: TxSerializeType, ti: &mut TxIn) -> Result<()> {
    if ser_type == TxSerializeType::OnlyWitness {
        return Err(ProtocolError::ReadInPrefixFromWitnessOnlyTx);
    }

    ti.previous_out_point = read_out_point(r)?;
    ti.sequence = read_u32_le(r, "input sequence")?;
    Ok(())
}

/// Reads the witness part of a transaction input, branching on the wire
/// epoch.
fn read_tx_in_witness(r: &mut &[u8], pver: u32, ti: &mut TxIn, pool: &ScriptPool) -> Result<()> {
    if pver >= SKA_BIG_INT_VERSION {
        return read_tx_in_witness_v13(r, ti, pool);
    }

    ti.value_in = read_u64_le(r, "input value")? as i64;
    ti.ska_value_in = None;
    ti.block_height = read_u32_le(r, "input block height")?;
    ti.block_index = read_u32_le(r, "input block index")?;
    ti.signature_script = read_script(r, MAX_MESSAGE_PAYLOAD, "input signature script", pool)?;
    Ok(())
}

/// Reads an input witness in the big-integer layout:
/// [value_in:8][ska_len:1][ska_value:N][block_height:4][block_index:4]
/// [signature_script:var].  A zero length means no SKA value.
fn read_tx_in_witness_v13(r: &mut &[u8], ti: &mut TxIn, pool: &ScriptPool) -> Result<()> {
    ti.value_in = read_u64_le(r, "input value")? as i64;

    let ska_len = read_u8(r, "input ska value length")?;
    if ska_len > 0 {
        let bytes = take(r, ska_len as usize, "input ska value")?;
        ti.ska_value_in = Some(SkaAmount::from_bytes(bytes));
    } else {
        ti.ska_value_in = None;
    }

    ti.block_height = read_u32_le(r, "input block height")?;
    ti.block_index = read_u32_le(r, "input block index")?;
    ti.signature_script = read_script(r, MAX_MESSAGE_PAYLOAD, "input signature script", pool)?;
    Ok(())
}

/// Writes the prefix part of a transaction input.
fn write_tx_in_prefix(w: &mut Vec<u8>, ti: &TxIn) {
    write_out_point(w, &ti.previous_out_point);
    w.extend_from_slice(&ti.sequence.to_le_bytes());
}

/// Writes the witness part of a transaction input, branching on the wire
/// epoch.
fn write_tx_in_witness(w: &mut Vec<u8>, pver: u32, ti: &TxIn) -> Result<()> {
    if pver >= SKA_BIG_INT_VERSION {
        return write_tx_in_witness_v13(w, ti);
    }

    w.extend_from_slice(&(ti.value_in as u64).to_le_bytes());
    w.extend_from_slice(&ti.block_height.to_le_bytes());
    w.extend_from_slice(&ti.block_index.to_le_bytes());
    write_var_bytes(w, &ti.signature_script);
    Ok(())
}

fn write_tx_in_witness_v13(w: &mut Vec<u8>, ti: &TxIn) -> Result<()> {
    w.extend_from_slice(&(ti.value_in as u64).to_le_bytes());

    let magnitude = match &ti.ska_value_in {
        Some(v) if v.is_positive() => v.to_bytes(),
        _ => Vec::new(),
    };
    if magnitude.len() > 255 {
        return Err(ProtocolError::VarBytesTooLong(
            "SKA value exceeds maximum length of 255 bytes".to_string(),
        ));
    }
    w.push(magnitude.len() as u8);
    w.extend_from_slice(&magnitude);

    w.extend_from_slice(&ti.block_height.to_le_bytes());
    w.extend_from_slice(&ti.block_index.to_le_bytes());
    write_var_bytes(w, &ti.signature_script);
    Ok(())
}

/// Reads a transaction output, branching on the wire epoch.
fn read_tx_out(r: &mut &[u8], pver: u32, to: &mut TxOut, pool: &ScriptPool) -> Result<()> {
    if pver >= SKA_BIG_INT_VERSION {
        return read_tx_out_v13(r, to, pool);
    }

    // Legacy layout: value first, then the coin type byte from the
    // dual-coin epoch onward.
    let value = read_u64_le(r, "output value")? as i64;

    let coin_type = if pver >= DUAL_COIN_VERSION {
        CoinType(read_u8(r, "output coin type")?)
    } else {
        CoinType::VAR
    };

    to.coin_type = coin_type;
    to.value = if coin_type.is_ska() {
        Amount::Ska(SkaAmount::from_i64(value))
    } else {
        Amount::Var(value)
    };

    to.version = read_u16_le(r, "output script version")?;
    to.pk_script = read_script(r, MAX_MESSAGE_PAYLOAD, "output public key script", pool)?;
    Ok(())
}

/// Reads a transaction output in the big-integer layout.  The coin type
/// comes first and selects the value width:
/// VAR: [coin_type:1][value:8][version:2][pk_script:var]
/// SKA: [coin_type:1][val_len:1][value:N][version:2][pk_script:var]
fn read_tx_out_v13(r: &mut &[u8], to: &mut TxOut, pool: &ScriptPool) -> Result<()> {
    let coin_type = CoinType(read_u8(r, "output coin type")?);
    to.coin_type = coin_type;

    if coin_type.is_ska() {
        let val_len = read_u8(r, "output ska value length")?;
        let atoms = if val_len == 0 {
            SkaAmount::zero()
        } else {
            SkaAmount::from_bytes(take(r, val_len as usize, "output ska value")?)
        };
        to.value = Amount::Ska(atoms);
    } else {
        let value = read_u64_le(r, "output value")? as i64;
        to.value = Amount::Var(value);
    }

    to.version = read_u16_le(r, "output script version")?;
    to.pk_script = read_script(r, MAX_MESSAGE_PAYLOAD, "output public key script", pool)?;
    Ok(())
}

/// Writes a transaction output, branching on the wire epoch.
fn write_tx_out(w: &mut Vec<u8>, pver: u32, to: &TxOut) -> Result<()> {
    if pver >= SKA_BIG_INT_VERSION {
        return write_tx_out_v13(w, to);
    }

    // Legacy layout carries a fixed-width value; oversized SKA values
    // degrade to zero the same way the bounded accessor does.
    w.extend_from_slice(&(to.value.to_i64_lossy() as u64).to_le_bytes());
    if pver >= DUAL_COIN_VERSION {
        w.push(to.coin_type.0);
    }
    w.extend_from_slice(&to.version.to_le_bytes());
    write_var_bytes(w, &to.pk_script);
    Ok(())
}

fn write_tx_out_v13(w: &mut Vec<u8>, to: &TxOut) -> Result<()> {
    w.push(to.coin_type.0);

    if to.coin_type.is_ska() {
        let magnitude = match &to.value {
            Amount::Ska(a) if a.is_positive() => a.to_bytes(),
            _ => Vec::new(),
        };
        if magnitude.len() > 255 {
            return Err(ProtocolError::VarBytesTooLong(
                "SKA value exceeds maximum length of 255 bytes".to_string(),
            ));
        }
        w.push(magnitude.len() as u8);
        w.extend_from_slice(&magnitude);
    } else {
        w.extend_from_slice(&(to.value.to_i64_lossy() as u64).to_le_bytes());
    }

    w.extend_from_slice(&to.version.to_le_bytes());
    write_var_bytes(w, &to.pk_script);
    Ok(())
}

impl TxIn {
    /// Serialized size of the input inside the prefix: outpoint plus
    /// sequence.
    pub fn serialize_size_prefix(&self) -> usize {
        41
    }

    /// Serialized size of the input witness in the current wire epoch.
    pub fn serialize_size_witness(&self) -> usize {
        let mut n = 8
            + 1
            + 4
            + 4
            + var_int_serialize_size(self.signature_script.len() as u64)
            + self.signature_script.len();
        if let Some(v) = &self.ska_value_in {
            if v.is_positive() {
                n += v.to_bytes().len();
            }
        }
        n
    }
}

impl TxOut {
    /// Serialized size of the output in the current wire epoch.
    pub fn serialize_size(&self) -> usize {
        let base = 1
            + 2
            + var_int_serialize_size(self.pk_script.len() as u64)
            + self.pk_script.len();
        match &self.value {
            Amount::Ska(a) => {
                let magnitude_len = if a.is_positive() { a.to_bytes().len() } else { 0 };
                base + 1 + magnitude_len
            }
            Amount::Var(_) => base + 8,
        }
    }
}

/// Replaces every script decoded into a pooled scratch buffer with an
/// exact-size owned allocation and hands the scratch buffers back to the
/// pool.  After this runs no transaction script aliases pool memory, so
/// previously borrowed buffers are free for reuse.
fn write_tx_scripts_to_msg_tx(msg: &mut MsgTx, ser_type: TxSerializeType, pool: &ScriptPool) {
    let materialize_ins = |msg: &mut MsgTx| {
        for tx_in in &mut msg.tx_in {
            let pooled = std::mem::take(&mut tx_in.signature_script);
            tx_in.signature_script = pooled.clone();
            tx_in.signature_script.shrink_to_fit();
            pool.give_back(pooled);
        }
    };
    let materialize_outs = |msg: &mut MsgTx| {
        for tx_out in &mut msg.tx_out {
            let pooled = std::mem::take(&mut tx_out.pk_script);
            tx_out.pk_script = pooled.clone();
            tx_out.pk_script.shrink_to_fit();
            pool.give_back(pooled);
        }
    };

    match ser_type {
        TxSerializeType::NoWitness => materialize_outs(msg),
        TxSerializeType::OnlyWitness | TxSerializeType::Full => {
            materialize_ins(msg);
            materialize_outs(msg);
        }
    }
}

/// Returns every borrowed script buffer to the pool after a decode error.
/// Only valid before the final materialization step has run.
fn return_script_buffers(msg: &mut MsgTx, pool: &ScriptPool) {
    for tx_in in &mut msg.tx_in {
        pool.give_back(std::mem::take(&mut tx_in.signature_script));
    }
    for tx_out in &mut msg.tx_out {
        pool.give_back(std::mem::take(&mut tx_out.pk_script));
    }
}

/// Transaction decoder that owns a bounded script buffer pool.
///
/// Encoding needs no shared state and lives on [`MsgTx`] directly; decoding
/// funnels through a codec instance so buffer reuse is an explicit,
/// bounded resource rather than process-wide mutable state.
pub struct TxCodec {
    pool: ScriptPool,
}

impl TxCodec {
    /// Creates a codec with the default pool bounds (12,500 buffers of 512
    /// bytes).
    pub fn new() -> TxCodec {
        TxCodec {
            pool: ScriptPool::new(),
        }
    }

    /// Creates a codec whose pool retains at most `max_items` buffers.
    pub fn with_pool_max_items(max_items: usize) -> TxCodec {
        TxCodec {
            pool: ScriptPool::with_max_items(max_items),
        }
    }

    /// Decodes a transaction from the reader using the given protocol
    /// version, advancing the reader past the consumed bytes.
    pub fn decode(&self, r: &mut &[u8], pver: u32) -> Result<MsgTx> {
        let mut msg = MsgTx::new();

        // The packed version carries the real transaction version in the
        // lower 16 bits and the serialization type in the upper 16 bits.
        let packed = read_u32_le(r, "transaction version")?;
        msg.version = (packed & 0xffff) as u16;
        let ser_type =
            TxSerializeType::from_u16((packed >> 16) as u16).ok_or(ProtocolError::UnknownTxType)?;
        msg.ser_type = ser_type;

        let result = match ser_type {
            TxSerializeType::NoWitness => self.decode_prefix(&mut msg, r, pver),
            TxSerializeType::OnlyWitness => self.decode_witness(&mut msg, r, pver, false),
            TxSerializeType::Full => self
                .decode_prefix(&mut msg, r, pver)
                .and_then(|()| self.decode_witness(&mut msg, r, pver, true)),
        };

        if let Err(e) = result {
            return_script_buffers(&mut msg, &self.pool);
            return Err(e);
        }
        write_tx_scripts_to_msg_tx(&mut msg, ser_type, &self.pool);
        Ok(msg)
    }

    /// Decodes a transaction stored at the current protocol version, such
    /// as one read from a database.
    pub fn deserialize(&self, bytes: &[u8]) -> Result<MsgTx> {
        let mut r = bytes;
        self.decode(&mut r, PROTOCOL_VERSION)
    }

    /// Decodes the transaction prefix into msg.
    fn decode_prefix(&self, msg: &mut MsgTx, r: &mut &[u8], pver: u32) -> Result<()> {
        let count = read_var_int(r)?;
        if count > MAX_TX_IN_PER_MESSAGE {
            return Err(ProtocolError::TooManyTxs(format!(
                "too many input transactions to fit into max message size [count {}, max {}]",
                count, MAX_TX_IN_PER_MESSAGE
            )));
        }

        msg.tx_in = Vec::with_capacity(count as usize);
        for _ in 0..count {
            let mut ti = TxIn::new(OutPoint::null(), 0, Vec::new());
            read_tx_in_prefix(r, msg.ser_type, &mut ti)?;
            msg.tx_in.push(ti);
        }

        let count = read_var_int(r)?;
        if count > MAX_TX_OUT_PER_MESSAGE {
            return Err(ProtocolError::TooManyTxs(format!(
                "too many output transactions to fit into max message size [count {}, max {}]",
                count, MAX_TX_OUT_PER_MESSAGE
            )));
        }

        msg.tx_out = Vec::with_capacity(count as usize);
        for _ in 0..count {
            let mut to = TxOut::new_var(0, Vec::new());
            read_tx_out(r, pver, &mut to, &self.pool)?;
            msg.tx_out.push(to);
        }

        msg.lock_time = read_u32_le(r, "lock time")?;
        msg.expiry = read_u32_le(r, "expiry")?;
        Ok(())
    }

    /// Decodes witness data into msg.  For a full framing the witness input
    /// count must match the prefix input count.
    fn decode_witness(&self, msg: &mut MsgTx, r: &mut &[u8], pver: u32, is_full: bool) -> Result<()> {
        let count = read_var_int(r)?;

        if is_full && count as usize != msg.tx_in.len() {
            return Err(ProtocolError::MismatchedWitnessCount(format!(
                "non equal witness and prefix txin quantities (witness {}, prefix {})",
                count,
                msg.tx_in.len()
            )));
        }

        if count > MAX_TX_IN_PER_MESSAGE {
            return Err(ProtocolError::TooManyTxs(format!(
                "too many input transactions to fit into max message size [count {}, max {}]",
                count, MAX_TX_IN_PER_MESSAGE
            )));
        }

        if !is_full {
            msg.tx_in = Vec::with_capacity(count as usize);
            for _ in 0..count {
                let mut ti = TxIn::new(OutPoint::null(), 0, Vec::new());
                read_tx_in_witness(r, pver, &mut ti, &self.pool)?;
                msg.tx_in.push(ti);
            }
            msg.tx_out = Vec::new();
        } else {
            for i in 0..count as usize {
                let mut ti = TxIn::new(OutPoint::null(), 0, Vec::new());
                read_tx_in_witness(r, pver, &mut ti, &self.pool)?;
                msg.tx_in[i].value_in = ti.value_in;
                msg.tx_in[i].ska_value_in = ti.ska_value_in;
                msg.tx_in[i].block_height = ti.block_height;
                msg.tx_in[i].block_index = ti.block_index;
                msg.tx_in[i].signature_script = ti.signature_script;
            }
        }

        Ok(())
    }
}

impl Default for TxCodec {
    fn default() -> Self {
        TxCodec::new()
    }
}

impl MsgTx {
    /// Encodes the transaction to the wire layout of the given protocol
    /// version, honoring the framing selected by `ser_type`.
    pub fn btc_encode(&self, w: &mut Vec<u8>, pver: u32) -> Result<()> {
        self.encode_framed(w, pver, self.ser_type)
    }

    /// Encodes the transaction at the current protocol version, the format
    /// used for long-term storage.
    pub fn serialize(&self, w: &mut Vec<u8>) -> Result<()> {
        self.btc_encode(w, PROTOCOL_VERSION)
    }

    /// Returns the serialized transaction bytes in its own framing.
    pub fn bytes(&self) -> Result<Vec<u8>> {
        let mut buf = Vec::with_capacity(self.serialize_size());
        self.serialize(&mut buf)?;
        Ok(buf)
    }

    /// Returns the serialized transaction prefix bytes.
    pub fn bytes_prefix(&self) -> Result<Vec<u8>> {
        self.serialize_framed(TxSerializeType::NoWitness)
    }

    /// Returns the serialized transaction witness bytes.
    pub fn bytes_witness(&self) -> Result<Vec<u8>> {
        self.serialize_framed(TxSerializeType::OnlyWitness)
    }

    fn serialize_framed(&self, ser_type: TxSerializeType) -> Result<Vec<u8>> {
        let mut buf = Vec::with_capacity(self.serialize_size_framed(ser_type));
        self.encode_framed(&mut buf, PROTOCOL_VERSION, ser_type)?;
        Ok(buf)
    }

    fn encode_framed(&self, w: &mut Vec<u8>, pver: u32, ser_type: TxSerializeType) -> Result<()> {
        let packed = (self.version as u32) | (ser_type.to_u16() as u32) << 16;
        w.extend_from_slice(&packed.to_le_bytes());

        match ser_type {
            TxSerializeType::NoWitness => self.encode_prefix(w, pver),
            TxSerializeType::OnlyWitness => self.encode_witness(w, pver),
            TxSerializeType::Full => {
                self.encode_prefix(w, pver)?;
                self.encode_witness(w, pver)
            }
        }
    }

    fn encode_prefix(&self, w: &mut Vec<u8>, pver: u32) -> Result<()> {
        write_var_int(w, self.tx_in.len() as u64);
        for ti in &self.tx_in {
            write_tx_in_prefix(w, ti);
        }

        write_var_int(w, self.tx_out.len() as u64);
        for to in &self.tx_out {
            write_tx_out(w, pver, to)?;
        }

        w.extend_from_slice(&self.lock_time.to_le_bytes());
        w.extend_from_slice(&self.expiry.to_le_bytes());
        Ok(())
    }

    fn encode_witness(&self, w: &mut Vec<u8>, pver: u32) -> Result<()> {
        write_var_int(w, self.tx_in.len() as u64);
        for ti in &self.tx_in {
            write_tx_in_witness(w, pver, ti)?;
        }
        Ok(())
    }

    /// Serializes under the given framing, panicking on failure.  The only
    /// possible failure is an SKA magnitude over 255 bytes, which
    /// `check_transaction_sanity` rejects on every output and input
    /// witness; a sanity-checked transaction therefore always hashes.
    fn must_serialize(&self, ser_type: TxSerializeType) -> Vec<u8> {
        match self.serialize_framed(ser_type) {
            Ok(bytes) => bytes,
            Err(e) => {
                log::error!(
                    "transaction failed serializing for framing {:?}: {} \
                     (version={}, inputs={}, outputs={})",
                    ser_type,
                    e,
                    self.version,
                    self.tx_in.len(),
                    self.tx_out.len()
                );
                panic!("transaction failed serializing for framing {:?}", ser_type);
            }
        }
    }

    /// Generates the hash of the transaction prefix.  It contains no
    /// witness data, so it is stable under signature malleability and is
    /// the transaction's identity in unconfirmed chains.
    pub fn tx_hash(&self) -> Hash {
        chain_hash(&self.must_serialize(TxSerializeType::NoWitness))
    }

    /// Like [`MsgTx::tx_hash`], caching the result for later calls.
    pub fn cached_tx_hash(&mut self) -> Hash {
        if let Some(hash) = self.cached_hash {
            return hash;
        }
        let hash = self.tx_hash();
        self.cached_hash = Some(hash);
        hash
    }

    /// Recomputes and re-caches the transaction hash.
    pub fn recache_tx_hash(&mut self) -> Hash {
        let hash = self.tx_hash();
        self.cached_hash = Some(hash);
        hash
    }

    /// Generates the hash of the transaction witness.
    pub fn tx_hash_witness(&self) -> Hash {
        chain_hash(&self.must_serialize(TxSerializeType::OnlyWitness))
    }

    /// Generates the full transaction hash: H(prefix hash || witness
    /// hash).  The packed serialization type differs between the two
    /// inputs, which keeps the three hash domains separate.
    pub fn tx_hash_full(&self) -> Hash {
        let mut concat = [0u8; 64];
        concat[..32].copy_from_slice(&self.tx_hash());
        concat[32..].copy_from_slice(&self.tx_hash_witness());
        chain_hash(&concat)
    }

    /// Returns the exact byte count of the serialized transaction in its
    /// own framing.
    pub fn serialize_size(&self) -> usize {
        self.serialize_size_framed(self.ser_type)
    }

    fn serialize_size_framed(&self, ser_type: TxSerializeType) -> usize {
        match ser_type {
            TxSerializeType::NoWitness => {
                // Version 4 + lock time 4 + expiry 4 + count varints.
                let mut n = 12
                    + var_int_serialize_size(self.tx_in.len() as u64)
                    + var_int_serialize_size(self.tx_out.len() as u64);
                for ti in &self.tx_in {
                    n += ti.serialize_size_prefix();
                }
                for to in &self.tx_out {
                    n += to.serialize_size();
                }
                n
            }
            TxSerializeType::OnlyWitness => {
                let mut n = 4 + var_int_serialize_size(self.tx_in.len() as u64);
                for ti in &self.tx_in {
                    n += ti.serialize_size_witness();
                }
                n
            }
            TxSerializeType::Full => {
                // The input count is encoded twice, once in the prefix and
                // once in the witness.
                let mut n = 12
                    + var_int_serialize_size(self.tx_in.len() as u64) * 2
                    + var_int_serialize_size(self.tx_out.len() as u64);
                for ti in &self.tx_in {
                    n += ti.serialize_size_prefix();
                }
                for ti in &self.tx_in {
                    n += ti.serialize_size_witness();
                }
                for to in &self.tx_out {
                    n += to.serialize_size();
                }
                n
            }
        }
    }

    /// Returns the byte offset of each output's public key script within
    /// the full serialization.  The offset depends on each output's coin
    /// type because VAR and SKA values differ in width.  Only the full
    /// framing has well-defined offsets; other framings are refused.
    pub fn pk_script_locs(&self) -> Result<Vec<usize>> {
        if self.ser_type != TxSerializeType::Full {
            return Err(ProtocolError::UnknownTxType);
        }

        if self.tx_out.is_empty() {
            return Ok(Vec::new());
        }

        let mut n = 4
            + var_int_serialize_size(self.tx_in.len() as u64)
            + var_int_serialize_size(self.tx_out.len() as u64);
        for ti in &self.tx_in {
            n += ti.serialize_size_prefix();
        }

        let mut locs = Vec::with_capacity(self.tx_out.len());
        for to in &self.tx_out {
            let value_size = match &to.value {
                Amount::Ska(a) => 1 + if a.is_positive() { a.to_bytes().len() } else { 0 },
                Amount::Var(_) => 8,
            };
            n += 1 + value_size + 2 + var_int_serialize_size(to.pk_script.len() as u64);
            locs.push(n);
            n += to.pk_script.len();
        }

        Ok(locs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transaction::{TX_TREE_REGULAR, ZERO_HASH};

    fn sample_tx() -> MsgTx {
        let mut tx = MsgTx::new();
        let mut ti = TxIn::new(OutPoint::new([3; 32], 1, TX_TREE_REGULAR), 200_000_000, vec![0x51, 0x52]);
        ti.block_height = 12;
        ti.block_index = 3;
        tx.add_tx_in(ti);
        tx.add_tx_out(TxOut::new_var(100_000_000, vec![0x76, 0xa9, 0x14]));
        tx
    }

    fn sample_ska_tx() -> MsgTx {
        let mut tx = MsgTx::new();
        let mut ti = TxIn::new(OutPoint::new([5; 32], 0, TX_TREE_REGULAR), 0, vec![0xab]);
        ti.ska_value_in = Some(SkaAmount::from_coins(1_000_000));
        tx.add_tx_in(ti);
        tx.add_tx_out(TxOut::new_ska(
            CoinType(1),
            SkaAmount::from_coins(999_999),
            vec![0x6a, 0x01, 0x02],
        ));
        tx
    }

    fn round_trip(tx: &MsgTx, pver: u32) -> MsgTx {
        let mut encoded = Vec::new();
        tx.btc_encode(&mut encoded, pver).unwrap();
        let codec = TxCodec::new();
        let mut r = encoded.as_slice();
        let decoded = codec.decode(&mut r, pver).unwrap();
        assert!(r.is_empty(), "decode left trailing bytes");
        decoded
    }

    #[test]
    fn test_full_round_trip_var() {
        let tx = sample_tx();
        assert_eq!(round_trip(&tx, PROTOCOL_VERSION), tx);
    }

    #[test]
    fn test_full_round_trip_ska() {
        let tx = sample_ska_tx();
        assert_eq!(round_trip(&tx, PROTOCOL_VERSION), tx);
    }

    #[test]
    fn test_no_witness_round_trip() {
        let mut tx = sample_tx();
        tx.ser_type = TxSerializeType::NoWitness;
        let decoded = round_trip(&tx, PROTOCOL_VERSION);
        assert_eq!(decoded.ser_type, TxSerializeType::NoWitness);
        assert_eq!(decoded.tx_out, tx.tx_out);
        // Prefix framing drops witness data.
        assert!(decoded.tx_in[0].signature_script.is_empty());
        assert_eq!(
            decoded.tx_in[0].previous_out_point,
            tx.tx_in[0].previous_out_point
        );
    }

    #[test]
    fn test_only_witness_round_trip() {
        let mut tx = sample_ska_tx();
        tx.ser_type = TxSerializeType::OnlyWitness;
        let decoded = round_trip(&tx, PROTOCOL_VERSION);
        assert_eq!(decoded.ser_type, TxSerializeType::OnlyWitness);
        assert!(decoded.tx_out.is_empty());
        assert_eq!(decoded.tx_in[0].ska_value_in, tx.tx_in[0].ska_value_in);
        assert_eq!(
            decoded.tx_in[0].signature_script,
            tx.tx_in[0].signature_script
        );
    }

    #[test]
    fn test_serialize_size_matches_encoding() {
        for tx in [sample_tx(), sample_ska_tx()] {
            for ser_type in [
                TxSerializeType::Full,
                TxSerializeType::NoWitness,
                TxSerializeType::OnlyWitness,
            ] {
                let mut tx = tx.clone();
                tx.ser_type = ser_type;
                let encoded = tx.bytes().unwrap();
                assert_eq!(tx.serialize_size(), encoded.len(), "{:?}", ser_type);
            }
        }
    }

    #[test]
    fn test_v13_ska_output_layout() {
        let atoms = SkaAmount::from_big(
            num_bigint::BigInt::from(900i64) * num_bigint::BigInt::from(10u32).pow(30),
        );
        let magnitude = atoms.to_bytes();

        let mut tx = MsgTx::new();
        tx.add_tx_in(TxIn::new(OutPoint::new([0; 32], 0, TX_TREE_REGULAR), 0, vec![]));
        tx.add_tx_out(TxOut::new_ska(CoinType(1), atoms.clone(), vec![0x51]));
        tx.ser_type = TxSerializeType::NoWitness;

        let encoded = tx.bytes().unwrap();
        // Skip version(4) + input count(1) + input(41) + output count(1).
        let out = &encoded[47..];
        assert_eq!(out[0], 0x01, "coin type byte leads the output");
        assert_eq!(out[1] as usize, magnitude.len(), "value length prefix");
        assert_eq!(&out[2..2 + magnitude.len()], magnitude.as_slice());
        let after_value = &out[2 + magnitude.len()..];
        assert_eq!(&after_value[..2], &[0x00, 0x00], "script version");
        assert_eq!(after_value[2], 1, "script length varint");
        assert_eq!(after_value[3], 0x51);

        let decoded = TxCodec::new().deserialize(&encoded).unwrap();
        assert_eq!(decoded.tx_out[0].ska_atoms(), Some(&atoms));
    }

    #[test]
    fn test_legacy_epoch_layouts() {
        let mut tx = sample_tx();
        tx.ser_type = TxSerializeType::NoWitness;

        // Version 11 outputs carry no coin type byte; version 12 appends
        // one after the value.
        let v11 = {
            let mut buf = Vec::new();
            tx.btc_encode(&mut buf, 11).unwrap();
            buf
        };
        let v12 = {
            let mut buf = Vec::new();
            tx.btc_encode(&mut buf, DUAL_COIN_VERSION).unwrap();
            buf
        };
        assert_eq!(v12.len(), v11.len() + 1);

        let codec = TxCodec::new();
        let mut r = v11.as_slice();
        let decoded_v11 = codec.decode(&mut r, 11).unwrap();
        assert_eq!(decoded_v11.tx_out[0].coin_type, CoinType::VAR);
        assert_eq!(decoded_v11.tx_out[0].var_atoms(), Some(100_000_000));

        let mut r = v12.as_slice();
        let decoded_v12 = codec.decode(&mut r, DUAL_COIN_VERSION).unwrap();
        assert_eq!(decoded_v12.tx_out, decoded_v11.tx_out);
    }

    #[test]
    fn test_legacy_epoch_ska_output() {
        let mut tx = MsgTx::new();
        tx.ser_type = TxSerializeType::NoWitness;
        tx.add_tx_out(TxOut::new_ska(CoinType(2), SkaAmount::from_i64(5000), vec![]));

        let mut buf = Vec::new();
        tx.btc_encode(&mut buf, DUAL_COIN_VERSION).unwrap();

        let codec = TxCodec::new();
        let mut r = buf.as_slice();
        let decoded = codec.decode(&mut r, DUAL_COIN_VERSION).unwrap();
        assert_eq!(decoded.tx_out[0].coin_type, CoinType(2));
        assert_eq!(
            decoded.tx_out[0].ska_atoms(),
            Some(&SkaAmount::from_i64(5000))
        );
    }

    #[test]
    fn test_hash_domain_separation() {
        let tx = sample_tx();
        let prefix = tx.tx_hash();
        let witness = tx.tx_hash_witness();
        let full = tx.tx_hash_full();
        assert_ne!(prefix, witness);
        assert_ne!(prefix, full);
        assert_ne!(witness, full);
    }

    #[test]
    fn test_tx_hash_stable_across_encodings() {
        let tx = sample_tx();
        let h1 = tx.tx_hash();
        let h2 = tx.tx_hash();
        let h3 = tx.tx_hash();
        assert_eq!(h1, h2);
        assert_eq!(h2, h3);
    }

    #[test]
    fn test_cached_tx_hash() {
        let mut tx = sample_tx();
        let h = tx.cached_tx_hash();
        assert_eq!(tx.cached_hash, Some(h));
        assert_eq!(tx.cached_tx_hash(), h);
        assert_eq!(tx.recache_tx_hash(), h);
    }

    #[test]
    fn test_mismatched_witness_count() {
        let tx = sample_tx();
        let mut encoded = Vec::new();
        tx.btc_encode(&mut encoded, PROTOCOL_VERSION).unwrap();

        // Corrupt the witness input count, located right after the prefix.
        let witness_count_pos = tx.serialize_size_framed(TxSerializeType::NoWitness);
        encoded[witness_count_pos] = 2;

        let codec = TxCodec::new();
        let mut r = encoded.as_slice();
        let result = codec.decode(&mut r, PROTOCOL_VERSION);
        assert!(matches!(
            result,
            Err(ProtocolError::MismatchedWitnessCount(_))
        ));
    }

    #[test]
    fn test_unknown_ser_type_rejected() {
        let mut encoded = Vec::new();
        let packed = 1u32 | (7u32 << 16);
        encoded.extend_from_slice(&packed.to_le_bytes());
        let codec = TxCodec::new();
        let mut r = encoded.as_slice();
        assert_eq!(
            codec.decode(&mut r, PROTOCOL_VERSION),
            Err(ProtocolError::UnknownTxType)
        );
    }

    #[test]
    fn test_oversized_script_rejected() {
        let mut encoded = Vec::new();
        let packed = 1u32 | (1u32 << 16); // no-witness framing
        encoded.extend_from_slice(&packed.to_le_bytes());
        write_var_int(&mut encoded, 0); // no inputs
        write_var_int(&mut encoded, 1); // one output
        encoded.push(0); // coin type VAR
        encoded.extend_from_slice(&0u64.to_le_bytes());
        encoded.extend_from_slice(&0u16.to_le_bytes());
        // Script claims to be larger than the max message payload.
        write_var_int(&mut encoded, MAX_MESSAGE_PAYLOAD as u64 + 1);

        let codec = TxCodec::new();
        let mut r = encoded.as_slice();
        assert!(matches!(
            codec.decode(&mut r, PROTOCOL_VERSION),
            Err(ProtocolError::VarBytesTooLong(_))
        ));
    }

    #[test]
    fn test_too_many_inputs_rejected() {
        let mut encoded = Vec::new();
        let packed = 1u32 | (1u32 << 16);
        encoded.extend_from_slice(&packed.to_le_bytes());
        write_var_int(&mut encoded, MAX_TX_IN_PER_MESSAGE + 1);

        let codec = TxCodec::new();
        let mut r = encoded.as_slice();
        assert!(matches!(
            codec.decode(&mut r, PROTOCOL_VERSION),
            Err(ProtocolError::TooManyTxs(_))
        ));
    }

    #[test]
    fn test_truncated_input_rejected() {
        let tx = sample_tx();
        let encoded = tx.bytes().unwrap();
        let codec = TxCodec::new();
        for cut in [5, 10, encoded.len() - 1] {
            let mut r = &encoded[..cut];
            assert!(codec.decode(&mut r, PROTOCOL_VERSION).is_err());
        }
    }

    #[test]
    fn test_pool_reuses_buffers() {
        let pool = ScriptPool::with_max_items(4);
        let a = pool.borrow(100);
        assert_eq!(a.len(), 100);
        pool.give_back(a);
        assert_eq!(pool.pooled(), 1);

        // Oversized buffers bypass the pool entirely.
        let big = pool.borrow(SCRIPT_POOL_BUFFER_SIZE + 1);
        pool.give_back(big);
        assert_eq!(pool.pooled(), 1);

        // The pool never grows past its bound.
        for _ in 0..10 {
            pool.give_back(Vec::with_capacity(SCRIPT_POOL_BUFFER_SIZE));
        }
        assert_eq!(pool.pooled(), 4);
    }

    #[test]
    fn test_pk_script_locs() {
        let mut tx = MsgTx::new();
        tx.add_tx_in(TxIn::new(OutPoint::new([1; 32], 0, TX_TREE_REGULAR), 0, vec![]));
        tx.add_tx_out(TxOut::new_var(1, vec![0xaa, 0xbb]));
        tx.add_tx_out(TxOut::new_ska(
            CoinType(1),
            SkaAmount::from_coins(3),
            vec![0xcc, 0xdd, 0xee],
        ));

        let encoded = tx.bytes().unwrap();
        let locs = tx.pk_script_locs().unwrap();
        assert_eq!(locs.len(), 2);
        for (i, loc) in locs.iter().enumerate() {
            let script = &tx.tx_out[i].pk_script;
            assert_eq!(&encoded[*loc..*loc + script.len()], script.as_slice());
        }
    }

    #[test]
    fn test_pk_script_locs_refused_for_other_framings() {
        let mut tx = sample_tx();
        tx.ser_type = TxSerializeType::NoWitness;
        assert!(tx.pk_script_locs().is_err());
        tx.ser_type = TxSerializeType::OnlyWitness;
        assert!(tx.pk_script_locs().is_err());
    }

    #[test]
    fn test_zero_value_ska_output() {
        let mut tx = MsgTx::new();
        tx.ser_type = TxSerializeType::NoWitness;
        tx.add_tx_out(TxOut::new_ska(CoinType(3), SkaAmount::zero(), vec![0x6a]));
        let encoded = tx.bytes().unwrap();
        let decoded = TxCodec::new().deserialize(&encoded).unwrap();
        assert_eq!(decoded.tx_out[0].ska_atoms(), Some(&SkaAmount::zero()));
    }

    #[test]
    fn test_outpoint_round_trip() {
        let op = OutPoint::new([7; 32], 0xdeadbeef, 1);
        let mut buf = Vec::new();
        write_out_point(&mut buf, &op);
        assert_eq!(buf.len(), 37);
        let mut r = buf.as_slice();
        assert_eq!(read_out_point(&mut r).unwrap(), op);

        let null = OutPoint::null();
        assert_eq!(null.hash, ZERO_HASH);
        let mut buf = Vec::new();
        write_out_point(&mut buf, &null);
        let mut r = buf.as_slice();
        assert_eq!(read_out_point(&mut r).unwrap(), null);
    }

    #[test]
    fn test_var_int_round_trip() {
        for v in [0u64, 1, 0xfc, 0xfd, 0xffff, 0x10000, 0xffff_ffff, u64::MAX] {
            let mut buf = Vec::new();
            write_var_int(&mut buf, v);
            assert_eq!(buf.len(), var_int_serialize_size(v));
            let mut r = buf.as_slice();
            assert_eq!(read_var_int(&mut r).unwrap(), v);
        }
    }
}
