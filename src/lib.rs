//! # Dualcoin Consensus
//!
//! Protocol core for a UTXO chain carrying two asset families: the native
//! VAR coin with bounded 64-bit atom amounts, and up to 255 auxiliary SKA
//! coins with arbitrary precision amounts.  Everything in this crate must
//! agree bit-for-bit across nodes; a single divergence forks the chain.
//!
//! ## Subsystems
//!
//! - Transaction model and wire codec: three framings (full, prefix only,
//!   witness only) across three historical wire epochs, with exact size
//!   prediction and domain-separated hashing.
//! - UTXO storage codec: compressed on-disk entries with dual-width
//!   amounts and automatic detection of the legacy value format.
//! - SKA emission and burn accounting: the one-shot mint rule and a
//!   reorg-safe persistent ledger of destroyed supply.
//! - Fee engine: per-asset relay bounds, a utilization-driven dynamic
//!   multiplier and percentile estimation.
//! - Block space allocation: proportional byte partitioning between
//!   assets with per-transaction admission.
//! - Fee splitting and the SSFee recipient index.
//!
//! The crate performs no I/O of its own.  Persistence goes through the
//! abstract key/value transaction in [`database`], hashing uses the
//! chain's canonical double SHA-256, and all operations are synchronous;
//! the burn ledger and fee engine guard their state with reader/writer
//! locks so a multi-threaded node can embed them directly.
//!
//! ## Usage
//!
//! ```rust
//! use dualcoin_consensus::{MsgTx, OutPoint, TxCodec, TxIn, TxOut, PROTOCOL_VERSION};
//!
//! let mut tx = MsgTx::new();
//! tx.add_tx_in(TxIn::new(OutPoint::null(), -1, vec![]));
//! tx.add_tx_out(TxOut::new_var(100_000_000, vec![0x51]));
//!
//! let encoded = tx.bytes().unwrap();
//! assert_eq!(encoded.len(), tx.serialize_size());
//!
//! let codec = TxCodec::new();
//! let decoded = codec.deserialize(&encoded).unwrap();
//! assert_eq!(decoded.tx_out, tx.tx_out);
//! ```

pub mod amount;
pub mod blockalloc;
pub mod burnstate;
pub mod chainparams;
pub mod cointype;
pub mod database;
pub mod emission;
pub mod error;
pub mod fees;
pub mod feesplit;
pub mod ssfeeindex;
pub mod transaction;
pub mod utxo;
pub mod wire;

// Re-export the types that nearly every embedder touches.
pub use amount::{Amount, SkaAmount, ATOMS_PER_VAR, MAX_VAR_ATOMS};
pub use chainparams::{ChainParams, SkaCoinConfig};
pub use cointype::CoinType;
pub use error::{FeeError, ProtocolError, Result, StoreError};
pub use transaction::{Hash, MsgTx, OutPoint, TxIn, TxOut, TxSerializeType};
pub use wire::{TxCodec, DUAL_COIN_VERSION, PROTOCOL_VERSION, SKA_BIG_INT_VERSION};
