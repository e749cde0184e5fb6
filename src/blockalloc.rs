//! Block space allocation across coin types
//!
//! Serialized block bytes are partitioned among the coin types observed in
//! the current template.  Each asset receives a share proportional to the
//! bytes it consumes, raised to a configured minimum grant and, for SKA
//! coins, capped at a configured fraction of the block.  The tracker
//! answers the per-transaction admission question: would adding this
//! transaction push its coin type past its final allocation?

use crate::chainparams::ChainParams;
use crate::cointype::CoinType;
use crate::transaction::{primary_coin_type, MsgTx};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Allocation for a single coin type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoinAllocation {
    pub coin_type: CoinType,

    /// Bytes the coin type currently consumes in the template.
    pub requested: u32,

    /// Bytes granted after floors and caps.
    pub final_allocation: u32,

    /// Bytes requested beyond the grant.
    pub overflow: u32,
}

/// The result of partitioning a block's bytes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AllocationResult {
    allocations: HashMap<CoinType, CoinAllocation>,
    pub total_used: u32,
    pub max_block_size: u32,
}

impl AllocationResult {
    /// Returns the allocation for a coin type, if it was observed.
    pub fn allocation_for_coin_type(&self, coin_type: CoinType) -> Option<&CoinAllocation> {
        self.allocations.get(&coin_type)
    }

    /// Returns the total bytes requested beyond grants across all coin
    /// types.
    pub fn total_overflow(&self) -> u32 {
        self.allocations.values().map(|a| a.overflow).sum()
    }
}

/// Partitions block bytes among observed coin types.
#[derive(Debug, Clone)]
pub struct BlockSpaceAllocator {
    max_block_size: u32,
    ska_share_cap_ppm: u32,
    min_allocation_bytes: u32,
}

impl BlockSpaceAllocator {
    pub fn new(max_block_size: u32, params: &ChainParams) -> BlockSpaceAllocator {
        BlockSpaceAllocator {
            max_block_size,
            ska_share_cap_ppm: params.block_alloc.ska_share_cap_ppm,
            min_allocation_bytes: params.block_alloc.min_allocation_bytes,
        }
    }

    pub fn max_block_size(&self) -> u32 {
        self.max_block_size
    }

    /// Computes per-coin allocations for the given consumed sizes.  Every
    /// observed coin type gets a proportional share of the block, raised
    /// to the minimum grant; SKA coins are additionally capped at their
    /// configured share.  No grant exceeds the block size.
    pub fn allocate_block_space(&self, sizes: &HashMap<CoinType, u32>) -> AllocationResult {
        let total_used: u64 = sizes.values().map(|&s| s as u64).sum();

        let mut result = AllocationResult {
            allocations: HashMap::with_capacity(sizes.len()),
            total_used: total_used.min(u32::MAX as u64) as u32,
            max_block_size: self.max_block_size,
        };

        if total_used == 0 {
            return result;
        }

        let ska_cap =
            (self.max_block_size as u64 * self.ska_share_cap_ppm as u64 / 1_000_000) as u32;

        for (&coin_type, &requested) in sizes {
            let proportional =
                (self.max_block_size as u64 * requested as u64 / total_used) as u32;

            let mut granted = proportional.max(self.min_allocation_bytes);
            if coin_type.is_ska() {
                granted = granted.min(ska_cap);
            }
            granted = granted.min(self.max_block_size);

            result.allocations.insert(
                coin_type,
                CoinAllocation {
                    coin_type,
                    requested,
                    final_allocation: granted,
                    overflow: requested.saturating_sub(granted),
                },
            );
        }

        result
    }
}

/// Tracks the serialized bytes each coin type consumes in the block under
/// construction and gates admission against the allocator.
#[derive(Debug)]
pub struct TransactionSizeTracker {
    sizes_by_coin_type: HashMap<CoinType, u32>,
    allocator: BlockSpaceAllocator,
}

impl TransactionSizeTracker {
    pub fn new(allocator: BlockSpaceAllocator) -> TransactionSizeTracker {
        TransactionSizeTracker {
            sizes_by_coin_type: HashMap::new(),
            allocator,
        }
    }

    /// Records a transaction's size against its primary coin type.
    pub fn add_transaction(&mut self, tx: &MsgTx) {
        let coin_type = primary_coin_type(tx);
        let tx_size = tx.serialize_size() as u32;
        *self.sizes_by_coin_type.entry(coin_type).or_insert(0) += tx_size;
    }

    /// Returns the allocation for the currently tracked sizes.
    pub fn get_allocation(&self) -> AllocationResult {
        self.allocator.allocate_block_space(&self.sizes_by_coin_type)
    }

    /// Returns whether the transaction can be added without pushing its
    /// coin type past the allocation it would have after the addition.
    pub fn can_add_transaction(&self, tx: &MsgTx) -> bool {
        let coin_type = primary_coin_type(tx);
        let tx_size = tx.serialize_size() as u32;

        let mut tentative = self.sizes_by_coin_type.clone();
        *tentative.entry(coin_type).or_insert(0) += tx_size;

        let allocation = self.allocator.allocate_block_space(&tentative);
        match allocation.allocation_for_coin_type(coin_type) {
            Some(coin_allocation) => tentative[&coin_type] <= coin_allocation.final_allocation,
            None => false,
        }
    }

    /// Returns the bytes currently tracked for a coin type.
    pub fn size_for_coin_type(&self, coin_type: CoinType) -> u32 {
        self.sizes_by_coin_type
            .get(&coin_type)
            .copied()
            .unwrap_or(0)
    }

    /// Clears all tracked sizes.
    pub fn reset(&mut self) {
        self.sizes_by_coin_type.clear();
    }
}
