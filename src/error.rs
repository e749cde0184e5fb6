//! Error types for the dual-coin protocol core

use thiserror::Error;

/// Errors raised by wire decoding and context-free transaction checks.
///
/// Every error carries a kind so callers can match on the failure class;
/// message payloads add context for the specific violation.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("transaction has no inputs")]
    NoTxInputs,

    #[error("transaction has no outputs")]
    NoTxOutputs,

    #[error("transaction too big: {0}")]
    TxTooBig(String),

    #[error("transaction contains duplicate inputs")]
    DuplicateTxInputs,

    #[error("invalid transaction output value: {0}")]
    BadTxOutValue(String),

    #[error("variable length data too long: {0}")]
    VarBytesTooLong(String),

    #[error("too many transactions: {0}")]
    TooManyTxs(String),

    #[error("tried to read a prefix input for a witness only transaction")]
    ReadInPrefixFromWitnessOnlyTx,

    #[error("unsupported transaction serialization type")]
    UnknownTxType,

    #[error("mismatched witness and prefix input counts: {0}")]
    MismatchedWitnessCount(String),

    #[error("unexpected end of data while reading {0}")]
    Truncated(&'static str),

    #[error("invalid emission transaction: {0}")]
    BadEmission(String),

    #[error("emission transaction at invalid height: {0}")]
    BadEmissionHeight(String),
}

pub type Result<T> = std::result::Result<T, ProtocolError>;

/// Errors raised by on-disk codecs and the persistent burn ledger.
///
/// Any of these surfaced during block application must abort the enclosing
/// database transaction so nothing is committed half-way.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("deserialization failed: {0}")]
    Deserialize(String),

    #[error("unsupported on-disk format version {0}")]
    UnknownVersion(u32),

    #[error("invalid coin type 0 found in burn state")]
    VarBurnEntry,

    #[error("corrupt index data: {0}")]
    Corruption(String),

    #[error("bucket not found: {0}")]
    BucketNotFound(String),

    #[error("bucket already exists: {0}")]
    BucketExists(String),
}

/// Errors raised by fee validation and estimation.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FeeError {
    #[error("unsupported coin type: {0}")]
    UnsupportedCoinType(u8),

    #[error("insufficient fee: {0}")]
    InsufficientFee(String),

    #[error("fee too high: {0}")]
    FeeTooHigh(String),
}
