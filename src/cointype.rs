//! Byte-tagged asset identity for the dual-coin system

use num_bigint::BigInt;
use serde::{Deserialize, Serialize};
use std::fmt;

/// A single-byte asset tag.  Coin type 0 is VAR, the chain's native coin;
/// coin types 1 through 255 identify auxiliary SKA coins.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct CoinType(pub u8);

impl CoinType {
    /// The native VAR coin.
    pub const VAR: CoinType = CoinType(0);

    /// Returns true for the native VAR coin.
    pub fn is_var(self) -> bool {
        self.0 == 0
    }

    /// Returns true for any auxiliary SKA coin (1-255).
    pub fn is_ska(self) -> bool {
        self.0 != 0
    }

    /// Returns the number of atoms that make up one whole coin of this
    /// asset: 10^8 for VAR and 10^18 for every SKA coin.
    pub fn atoms_per_coin(self) -> BigInt {
        if self.is_var() {
            BigInt::from(crate::amount::ATOMS_PER_VAR)
        } else {
            crate::amount::atoms_per_ska_coin()
        }
    }
}

impl From<u8> for CoinType {
    fn from(b: u8) -> Self {
        CoinType(b)
    }
}

impl fmt::Display for CoinType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_var() {
            write!(f, "VAR")
        } else {
            write!(f, "SKA-{}", self.0)
        }
    }
}
