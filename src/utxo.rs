//! On-disk codec for the unspent transaction output set
//!
//! Entries are stored in a space-optimized format: variable length
//! quantities for the structural fields, domain-specific compression for
//! VAR amounts and standard scripts, and a length-prefixed big-endian
//! magnitude for SKA amounts.  The VLQ uses an MSB-first encoding so
//! byte-wise key comparisons iterate outpoints in numeric order.
//!
//! Two on-disk value versions exist.  V3 entries predate the dual-coin
//! system and omit the coin type field; V4 entries carry it.  The decoder
//! auto-detects the version: V3 never stored SKA data, so a candidate coin
//! type of 1-255 that decodes cleanly as SKA must be V4, and a candidate
//! of 0 is probed by attempting a V4 VAR decode with a V3 fallback.
//!
//! The serialized key format is:
//!
//!   <prefix><hash><tree VLQ><output index VLQ>
//!
//! The serialized V4 value format is:
//!
//!   <block height VLQ><block index VLQ><flags VLQ><coin type VLQ>
//!   VAR:  <compressed amount VLQ><script version VLQ><compressed script>
//!   SKA:  <amount length u8><amount bytes><script version VLQ>
//!         <compressed script>
//!   OPTIONAL: <ticket min outs>
//!
//! The flags field packs: bit 0 coinbase, bit 1 has-expiry, bits 2-5 the
//! transaction type.

use crate::amount::{Amount, SkaAmount};
use crate::cointype::CoinType;
use crate::error::StoreError;
use crate::transaction::{Hash, OutPoint};
use serde::{Deserialize, Serialize};

/// Key prefix for UTXO set entries; part of the on-disk contract.
pub const UTXO_SET_KEY_PREFIX: &[u8] = b"utxoset/";

/// Number of script codes reserved for special compressed forms.
const NUM_SPECIAL_SCRIPTS: u64 = 64;

// Special compressed script codes.
const CST_PAY_TO_PUBKEY_HASH: u64 = 0;
const CST_PAY_TO_SCRIPT_HASH: u64 = 1;
const CST_PAY_TO_PUBKEY_COMP_EVEN: u64 = 2;
const CST_PAY_TO_PUBKEY_COMP_ODD: u64 = 3;

/// Transaction type carried in the UTXO flags, four bits wide.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TxType(pub u8);

impl TxType {
    pub const REGULAR: TxType = TxType(0);
    pub const TICKET: TxType = TxType(1);
    pub const VOTE: TxType = TxType(2);
    pub const REVOCATION: TxType = TxType(3);
}

/// Returns whether an output is a ticket submission output, which carries
/// the ticket's minimal outputs in its UTXO entry.
pub fn is_ticket_submission_output(tx_type: TxType, tx_out_index: u32) -> bool {
    tx_type == TxType::TICKET && tx_out_index == 0
}

// -------------------------------------------------------------------------
// Variable length quantities
// -------------------------------------------------------------------------

/// Returns the number of bytes the value occupies as a VLQ.
pub fn serialize_size_vlq(mut n: u64) -> usize {
    let mut size = 1;
    while n > 0x7f {
        size += 1;
        n = (n >> 7) - 1;
    }
    size
}

/// Appends the MSB-first VLQ encoding of the value.  Every byte except the
/// last has the high bit set, and a bias of one per continuation byte keeps
/// the encoding canonical.
pub fn put_vlq(out: &mut Vec<u8>, mut n: u64) {
    let mut scratch = [0u8; 10];
    let mut i = 0;
    loop {
        let high_bit = if i > 0 { 0x80 } else { 0x00 };
        scratch[i] = (n & 0x7f) as u8 | high_bit;
        if n <= 0x7f {
            break;
        }
        n = (n >> 7) - 1;
        i += 1;
    }
    while i > 0 {
        out.push(scratch[i]);
        i -= 1;
    }
    out.push(scratch[0]);
}

/// Decodes a VLQ from the front of the slice, returning the value and the
/// number of bytes read.  Zero bytes read means the input was empty.
pub fn deserialize_vlq(serialized: &[u8]) -> (u64, usize) {
    let mut n: u64 = 0;
    let mut size = 0;
    for &val in serialized {
        size += 1;
        n = (n << 7) | (val & 0x7f) as u64;
        if val & 0x80 != 0x80 {
            break;
        }
        // Wrapping keeps adversarial over-long encodings from aborting
        // the decoder; the bounds checks downstream reject the entry.
        n = n.wrapping_add(1);
    }
    (n, size)
}

// -------------------------------------------------------------------------
// Amount compression
// -------------------------------------------------------------------------

/// Compresses a VAR atom amount by exploiting the fact that most amounts
/// are round numbers of atoms or coins.
pub fn compress_tx_out_amount(amount: u64) -> u64 {
    if amount == 0 {
        return 0;
    }

    let mut n = amount;
    let mut exponent = 0u64;
    while n % 10 == 0 && exponent < 9 {
        n /= 10;
        exponent += 1;
    }

    if exponent < 9 {
        let last_digit = n % 10;
        n /= 10;
        1 + 10 * (9 * n + last_digit - 1) + exponent
    } else {
        1 + 10 * (n - 1) + 9
    }
}

/// Decompresses an amount produced by [`compress_tx_out_amount`].
pub fn decompress_tx_out_amount(compressed: u64) -> u64 {
    if compressed == 0 {
        return 0;
    }

    let mut x = compressed - 1;
    let exponent = x % 10;
    x /= 10;

    // Wrapping arithmetic tolerates corrupt compressed values; the
    // resulting amount simply fails later range checks.
    let mut n = if exponent < 9 {
        let last_digit = x % 9 + 1;
        x /= 9;
        x.wrapping_mul(10).wrapping_add(last_digit)
    } else {
        x.wrapping_add(1)
    };

    for _ in 0..exponent {
        n = n.wrapping_mul(10);
    }
    n
}

// -------------------------------------------------------------------------
// Script compression
// -------------------------------------------------------------------------

/// Returns the payload of a standard pay-to-pubkey-hash script, if the
/// script matches the 25-byte form.
fn extract_p2pkh(script: &[u8]) -> Option<&[u8]> {
    if script.len() == 25
        && script[0] == 0x76 // OP_DUP
        && script[1] == 0xa9 // OP_HASH160
        && script[2] == 0x14 // OP_DATA_20
        && script[23] == 0x88 // OP_EQUALVERIFY
        && script[24] == 0xac
    // OP_CHECKSIG
    {
        return Some(&script[3..23]);
    }
    None
}

/// Returns the payload of a standard pay-to-script-hash script, if the
/// script matches the 23-byte form.
fn extract_p2sh(script: &[u8]) -> Option<&[u8]> {
    if script.len() == 23
        && script[0] == 0xa9 // OP_HASH160
        && script[1] == 0x14 // OP_DATA_20
        && script[22] == 0x87
    // OP_EQUAL
    {
        return Some(&script[2..22]);
    }
    None
}

/// Returns the compressed pubkey of a standard pay-to-compressed-pubkey
/// script, if the script matches the 35-byte form.
fn extract_p2pk_compressed(script: &[u8]) -> Option<&[u8]> {
    if script.len() == 35
        && script[0] == 0x21 // OP_DATA_33
        && script[34] == 0xac // OP_CHECKSIG
        && (script[1] == 0x02 || script[1] == 0x03)
    {
        return Some(&script[1..34]);
    }
    None
}

/// Returns the serialized size of the compressed script.
pub fn compressed_script_size(script_version: u16, script: &[u8]) -> usize {
    if script_version == 0 {
        if extract_p2pkh(script).is_some() || extract_p2sh(script).is_some() {
            return 21;
        }
        if extract_p2pk_compressed(script).is_some() {
            return 33;
        }
    }
    serialize_size_vlq(script.len() as u64 + NUM_SPECIAL_SCRIPTS) + script.len()
}

/// Appends the compressed form of the script.  Standard version 0 scripts
/// compress to a short code plus payload; everything else is stored as the
/// raw bytes behind a biased size header.
pub fn put_compressed_script(out: &mut Vec<u8>, script_version: u16, script: &[u8]) {
    if script_version == 0 {
        if let Some(hash) = extract_p2pkh(script) {
            put_vlq(out, CST_PAY_TO_PUBKEY_HASH);
            out.extend_from_slice(hash);
            return;
        }
        if let Some(hash) = extract_p2sh(script) {
            put_vlq(out, CST_PAY_TO_SCRIPT_HASH);
            out.extend_from_slice(hash);
            return;
        }
        if let Some(pubkey) = extract_p2pk_compressed(script) {
            let code = if pubkey[0] == 0x02 {
                CST_PAY_TO_PUBKEY_COMP_EVEN
            } else {
                CST_PAY_TO_PUBKEY_COMP_ODD
            };
            put_vlq(out, code);
            out.extend_from_slice(&pubkey[1..]);
            return;
        }
    }

    put_vlq(out, script.len() as u64 + NUM_SPECIAL_SCRIPTS);
    out.extend_from_slice(script);
}

/// Returns the total number of bytes the compressed script at the front of
/// the slice occupies, including its header, or `None` when the header is
/// absent or describes an unknown special form.
pub fn decode_compressed_script_size(serialized: &[u8]) -> Option<usize> {
    let (code, bytes_read) = deserialize_vlq(serialized);
    if bytes_read == 0 {
        return None;
    }
    match code {
        CST_PAY_TO_PUBKEY_HASH | CST_PAY_TO_SCRIPT_HASH => Some(21),
        CST_PAY_TO_PUBKEY_COMP_EVEN | CST_PAY_TO_PUBKEY_COMP_ODD => Some(33),
        _ => {
            let data_len = code.checked_sub(NUM_SPECIAL_SCRIPTS)?;
            Some(data_len as usize + bytes_read)
        }
    }
}

/// Decompresses a compressed script (header included) back to its raw
/// form.
pub fn decompress_script(compressed: &[u8]) -> Vec<u8> {
    let (code, bytes_read) = deserialize_vlq(compressed);
    if bytes_read == 0 {
        return Vec::new();
    }
    let payload = &compressed[bytes_read..];

    match code {
        CST_PAY_TO_PUBKEY_HASH => {
            let mut script = Vec::with_capacity(25);
            script.extend_from_slice(&[0x76, 0xa9, 0x14]);
            script.extend_from_slice(&payload[..20]);
            script.extend_from_slice(&[0x88, 0xac]);
            script
        }
        CST_PAY_TO_SCRIPT_HASH => {
            let mut script = Vec::with_capacity(23);
            script.extend_from_slice(&[0xa9, 0x14]);
            script.extend_from_slice(&payload[..20]);
            script.push(0x87);
            script
        }
        CST_PAY_TO_PUBKEY_COMP_EVEN | CST_PAY_TO_PUBKEY_COMP_ODD => {
            let mut script = Vec::with_capacity(35);
            script.push(0x21);
            script.push(if code == CST_PAY_TO_PUBKEY_COMP_EVEN {
                0x02
            } else {
                0x03
            });
            script.extend_from_slice(&payload[..32]);
            script.push(0xac);
            script
        }
        _ => payload.to_vec(),
    }
}

// -------------------------------------------------------------------------
// Compressed txout
// -------------------------------------------------------------------------

/// Appends a compressed VAR txout: compressed amount, script version and
/// compressed script.
fn put_compressed_tx_out(out: &mut Vec<u8>, amount: u64, script_version: u16, script: &[u8]) {
    put_vlq(out, compress_tx_out_amount(amount));
    put_vlq(out, script_version as u64);
    put_compressed_script(out, script_version, script);
}

/// Decodes a compressed VAR txout, returning the amount, script version,
/// raw script and number of bytes consumed.
fn decode_compressed_tx_out(serialized: &[u8]) -> Result<(i64, u16, Vec<u8>, usize), StoreError> {
    let (compressed_amount, amount_bytes) = deserialize_vlq(serialized);
    if amount_bytes == 0 || amount_bytes >= serialized.len() {
        return Err(StoreError::Deserialize(
            "unexpected end of data after compressed amount".to_string(),
        ));
    }
    let mut offset = amount_bytes;

    let (script_version, version_bytes) = deserialize_vlq(&serialized[offset..]);
    if version_bytes == 0 || offset + version_bytes >= serialized.len() {
        return Err(StoreError::Deserialize(
            "unexpected end of data after script version".to_string(),
        ));
    }
    offset += version_bytes;

    let script_size = decode_compressed_script_size(&serialized[offset..]).ok_or_else(|| {
        StoreError::Deserialize("invalid compressed script header".to_string())
    })?;
    if offset + script_size > serialized.len() {
        return Err(StoreError::Deserialize(format!(
            "unexpected end of data after script size (got {}, need {})",
            serialized.len() - offset,
            script_size
        )));
    }
    let script = decompress_script(&serialized[offset..offset + script_size]);
    offset += script_size;

    Ok((
        decompress_tx_out_amount(compressed_amount) as i64,
        script_version as u16,
        script,
        offset,
    ))
}

// -------------------------------------------------------------------------
// UTXO entry
// -------------------------------------------------------------------------

/// An unspent transaction output together with the block metadata needed
/// to validate spends of it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UtxoEntry {
    amount: Amount,
    pk_script: Vec<u8>,
    block_height: u32,
    block_index: u32,
    script_version: u16,
    coin_type: CoinType,
    tx_type: TxType,
    coinbase: bool,
    has_expiry: bool,
    spent: bool,
    ticket_min_outs: Option<Vec<u8>>,
}

impl UtxoEntry {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        coin_type: CoinType,
        amount: Amount,
        pk_script: Vec<u8>,
        block_height: u32,
        block_index: u32,
        script_version: u16,
        tx_type: TxType,
        coinbase: bool,
        has_expiry: bool,
        ticket_min_outs: Option<Vec<u8>>,
    ) -> UtxoEntry {
        UtxoEntry {
            amount,
            pk_script,
            block_height,
            block_index,
            script_version,
            coin_type,
            tx_type,
            coinbase,
            has_expiry,
            spent: false,
            ticket_min_outs,
        }
    }

    pub fn amount(&self) -> &Amount {
        &self.amount
    }

    pub fn pk_script(&self) -> &[u8] {
        &self.pk_script
    }

    pub fn block_height(&self) -> u32 {
        self.block_height
    }

    pub fn block_index(&self) -> u32 {
        self.block_index
    }

    pub fn script_version(&self) -> u16 {
        self.script_version
    }

    pub fn coin_type(&self) -> CoinType {
        self.coin_type
    }

    pub fn transaction_type(&self) -> TxType {
        self.tx_type
    }

    pub fn is_coin_base(&self) -> bool {
        self.coinbase
    }

    pub fn has_expiry(&self) -> bool {
        self.has_expiry
    }

    pub fn is_spent(&self) -> bool {
        self.spent
    }

    /// Marks the entry spent.  Spent entries serialize to nothing.
    pub fn spend(&mut self) {
        self.spent = true;
    }

    pub fn ticket_min_outs(&self) -> Option<&[u8]> {
        self.ticket_min_outs.as_deref()
    }
}

fn encode_flags(coinbase: bool, has_expiry: bool, tx_type: TxType) -> u8 {
    (coinbase as u8) | (has_expiry as u8) << 1 | (tx_type.0 & 0x0f) << 2
}

fn decode_flags(flags: u8) -> (bool, bool, TxType) {
    (
        flags & 0x01 != 0,
        flags & 0x02 != 0,
        TxType((flags >> 2) & 0x0f),
    )
}

/// Serializes an entry for long-term storage.  Spent entries have no
/// serialization and yield `None`.
pub fn serialize_utxo_entry(entry: &UtxoEntry) -> Option<Vec<u8>> {
    if entry.is_spent() {
        return None;
    }

    let flags = encode_flags(entry.coinbase, entry.has_expiry, entry.tx_type);

    let mut serialized = Vec::with_capacity(32 + entry.pk_script.len());
    put_vlq(&mut serialized, entry.block_height as u64);
    put_vlq(&mut serialized, entry.block_index as u64);
    put_vlq(&mut serialized, flags as u64);
    put_vlq(&mut serialized, entry.coin_type.0 as u64);

    match &entry.amount {
        Amount::Ska(atoms) => {
            let magnitude = atoms.to_bytes();
            serialized.push(magnitude.len() as u8);
            serialized.extend_from_slice(&magnitude);
            put_vlq(&mut serialized, entry.script_version as u64);
            put_compressed_script(&mut serialized, entry.script_version, &entry.pk_script);
        }
        Amount::Var(atoms) => {
            put_compressed_tx_out(
                &mut serialized,
                *atoms as u64,
                entry.script_version,
                &entry.pk_script,
            );
        }
    }

    if let Some(min_outs) = &entry.ticket_min_outs {
        serialized.extend_from_slice(min_outs);
    }

    Some(serialized)
}

/// Checks whether the data at the offset parses as the SKA tail of a V4
/// entry: amount length byte, amount bytes, script version VLQ and a
/// well-formed compressed script.
fn probe_v4_ska(serialized: &[u8], offset: usize) -> bool {
    if offset >= serialized.len() {
        return false;
    }
    let amount_len = serialized[offset] as usize;
    // Amounts beyond 32 bytes never occur for any configured supply.
    if amount_len > 32 {
        return false;
    }
    let version_offset = offset + 1 + amount_len;
    if version_offset >= serialized.len() {
        return false;
    }
    let (_, version_bytes) = deserialize_vlq(&serialized[version_offset..]);
    if version_bytes == 0 || version_offset + version_bytes > serialized.len() {
        return false;
    }
    let script_offset = version_offset + version_bytes;
    match decode_compressed_script_size(&serialized[script_offset..]) {
        Some(script_size) => script_offset + script_size <= serialized.len(),
        None => false,
    }
}

/// Deserializes a UTXO entry, auto-detecting the V3 and V4 value formats.
pub fn deserialize_utxo_entry(
    serialized: &[u8],
    tx_out_index: u32,
) -> Result<UtxoEntry, StoreError> {
    let (block_height, bytes_read) = deserialize_vlq(serialized);
    let mut offset = bytes_read;
    if bytes_read == 0 || offset >= serialized.len() {
        return Err(StoreError::Deserialize(
            "unexpected end of data after height".to_string(),
        ));
    }

    let (block_index, bytes_read) = deserialize_vlq(&serialized[offset..]);
    offset += bytes_read;
    if bytes_read == 0 || offset >= serialized.len() {
        return Err(StoreError::Deserialize(
            "unexpected end of data after index".to_string(),
        ));
    }

    let (flags, bytes_read) = deserialize_vlq(&serialized[offset..]);
    offset += bytes_read;
    if bytes_read == 0 || offset >= serialized.len() {
        return Err(StoreError::Deserialize(
            "unexpected end of data after flags".to_string(),
        ));
    }
    let (coinbase, has_expiry, tx_type) = decode_flags(flags as u8);

    // Version detection.  Read the candidate coin type and validate the
    // remainder under the V4 rule for that coin type; fall back to V3 with
    // an implicit VAR coin type when validation fails.
    let mut coin_type = CoinType::VAR;
    let mut is_v4 = false;

    let (coin_type_val, bytes_read) = deserialize_vlq(&serialized[offset..]);
    let next_offset = offset + bytes_read;
    if bytes_read > 0 && next_offset < serialized.len() && coin_type_val <= u8::MAX as u64 {
        let candidate = CoinType(coin_type_val as u8);
        if candidate.is_ska() {
            if probe_v4_ska(serialized, next_offset) {
                coin_type = candidate;
                offset = next_offset;
                is_v4 = true;
            }
        } else if decode_compressed_tx_out(&serialized[next_offset..]).is_ok() {
            offset = next_offset;
            is_v4 = true;
        }
    }

    let amount;
    let script_version;
    let script;

    if is_v4 && coin_type.is_ska() {
        let amount_len = serialized[offset] as usize;
        offset += 1;
        if offset + amount_len > serialized.len() {
            return Err(StoreError::Deserialize(
                "unexpected end of data during SKA amount".to_string(),
            ));
        }
        amount = Amount::Ska(SkaAmount::from_bytes(&serialized[offset..offset + amount_len]));
        offset += amount_len;

        let (version_val, bytes_read) = deserialize_vlq(&serialized[offset..]);
        if bytes_read == 0 {
            return Err(StoreError::Deserialize(
                "unexpected end of data during script version".to_string(),
            ));
        }
        script_version = version_val as u16;
        offset += bytes_read;

        let script_size = decode_compressed_script_size(&serialized[offset..]).ok_or_else(
            || StoreError::Deserialize("invalid compressed script header".to_string()),
        )?;
        if offset + script_size > serialized.len() {
            return Err(StoreError::Deserialize(
                "unexpected end of data after script size".to_string(),
            ));
        }
        script = decompress_script(&serialized[offset..offset + script_size]);
        offset += script_size;
    } else {
        let (var_amount, version, raw_script, bytes_read) =
            decode_compressed_tx_out(&serialized[offset..])?;
        amount = Amount::Var(var_amount);
        script_version = version;
        script = raw_script;
        offset += bytes_read;
    }

    let mut entry = UtxoEntry::new(
        coin_type,
        amount,
        script,
        block_height as u32,
        block_index as u32,
        script_version,
        tx_type,
        coinbase,
        has_expiry,
        None,
    );

    if is_ticket_submission_output(tx_type, tx_out_index) {
        let size = read_minimal_outputs_size(&serialized[offset..])?;
        entry.ticket_min_outs = Some(serialized[offset..offset + size].to_vec());
    }

    Ok(entry)
}

// -------------------------------------------------------------------------
// Outpoint keys
// -------------------------------------------------------------------------

/// Builds the database key for an outpoint:
/// prefix, hash, VLQ tree and VLQ output index.
pub fn outpoint_key(outpoint: &OutPoint) -> Vec<u8> {
    let mut key = Vec::with_capacity(UTXO_SET_KEY_PREFIX.len() + 32 + 2 + 5);
    key.extend_from_slice(UTXO_SET_KEY_PREFIX);
    key.extend_from_slice(&outpoint.hash);
    put_vlq(&mut key, outpoint.tree as u8 as u64);
    put_vlq(&mut key, outpoint.index as u64);
    key
}

/// Decodes an outpoint database key.
pub fn decode_outpoint_key(serialized: &[u8]) -> Result<OutPoint, StoreError> {
    let prefix_len = UTXO_SET_KEY_PREFIX.len();
    if serialized.len() <= prefix_len + 32 {
        return Err(StoreError::Deserialize(
            "unexpected length for serialized outpoint key".to_string(),
        ));
    }

    let mut offset = prefix_len;
    let mut hash: Hash = [0u8; 32];
    hash.copy_from_slice(&serialized[offset..offset + 32]);
    offset += 32;

    let (tree, bytes_read) = deserialize_vlq(&serialized[offset..]);
    offset += bytes_read;
    if offset >= serialized.len() {
        return Err(StoreError::Deserialize(
            "unexpected end of data after tree".to_string(),
        ));
    }

    let (index, _) = deserialize_vlq(&serialized[offset..]);

    Ok(OutPoint {
        hash,
        tree: tree as u8 as i8,
        index: index as u32,
    })
}

// -------------------------------------------------------------------------
// Ticket minimal outputs
// -------------------------------------------------------------------------

/// A minimally encoded output of a ticket purchase.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MinimalOutput {
    pub amount: i64,
    pub script_version: u16,
    pub pk_script: Vec<u8>,
}

/// Serializes minimal outputs: a count followed by each output's
/// compressed amount, script version and compressed script, the same
/// compression regular txouts use.
pub fn serialize_minimal_outputs(outputs: &[MinimalOutput]) -> Vec<u8> {
    let mut out = Vec::new();
    put_vlq(&mut out, outputs.len() as u64);
    for output in outputs {
        put_vlq(&mut out, compress_tx_out_amount(output.amount as u64));
        put_vlq(&mut out, output.script_version as u64);
        put_compressed_script(&mut out, output.script_version, &output.pk_script);
    }
    out
}

/// Parses minimal outputs from the front of the slice.
pub fn deserialize_minimal_outputs(
    serialized: &[u8],
) -> Result<(Vec<MinimalOutput>, usize), StoreError> {
    let (count, mut offset) = read_vlq_checked(serialized, 0, "minimal output count")?;

    let mut outputs = Vec::with_capacity(count.min(16) as usize);
    for _ in 0..count {
        let (compressed_amount, next) = read_vlq_checked(serialized, offset, "minimal amount")?;
        offset = next;
        let (script_version, next) =
            read_vlq_checked(serialized, offset, "minimal script version")?;
        offset = next;
        let script_size =
            decode_compressed_script_size(&serialized[offset..]).ok_or_else(|| {
                StoreError::Deserialize("invalid minimal output script header".to_string())
            })?;
        if offset + script_size > serialized.len() {
            return Err(StoreError::Deserialize(
                "unexpected end of data during minimal script".to_string(),
            ));
        }
        let pk_script = decompress_script(&serialized[offset..offset + script_size]);
        offset += script_size;

        outputs.push(MinimalOutput {
            amount: decompress_tx_out_amount(compressed_amount) as i64,
            script_version: script_version as u16,
            pk_script,
        });
    }

    Ok((outputs, offset))
}

/// Returns how many bytes of the slice hold the minimal outputs.
pub fn read_minimal_outputs_size(serialized: &[u8]) -> Result<usize, StoreError> {
    deserialize_minimal_outputs(serialized).map(|(_, size)| size)
}

fn read_vlq_checked(
    serialized: &[u8],
    offset: usize,
    what: &str,
) -> Result<(u64, usize), StoreError> {
    if offset >= serialized.len() {
        return Err(StoreError::Deserialize(format!(
            "unexpected end of data during {}",
            what
        )));
    }
    let (value, bytes_read) = deserialize_vlq(&serialized[offset..]);
    Ok((value, offset + bytes_read))
}

// -------------------------------------------------------------------------
// UTXO set state
// -------------------------------------------------------------------------

/// Tracks the block height and hash of the last completed flush of the
/// UTXO set.  It must always be written in the same database transaction
/// as the set itself so the two never diverge on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UtxoSetState {
    pub last_flush_height: u32,
    pub last_flush_hash: Hash,
}

/// Serializes the UTXO set state: VLQ height followed by the hash.
pub fn serialize_utxo_set_state(state: &UtxoSetState) -> Vec<u8> {
    let mut out = Vec::with_capacity(5 + 32);
    put_vlq(&mut out, state.last_flush_height as u64);
    out.extend_from_slice(&state.last_flush_hash);
    out
}

/// Deserializes the UTXO set state.
pub fn deserialize_utxo_set_state(serialized: &[u8]) -> Result<UtxoSetState, StoreError> {
    let (height, bytes_read) = deserialize_vlq(serialized);
    if bytes_read == 0 || serialized.len() - bytes_read != 32 {
        return Err(StoreError::Deserialize(
            "unexpected length for serialized utxo set state".to_string(),
        ));
    }
    let mut hash: Hash = [0u8; 32];
    hash.copy_from_slice(&serialized[bytes_read..]);
    Ok(UtxoSetState {
        last_flush_height: height as u32,
        last_flush_hash: hash,
    })
}
