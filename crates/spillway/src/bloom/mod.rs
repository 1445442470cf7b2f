//! Bloom filters for "have I seen this before?" checks
//!
//! - [`FileSeekBloomFilter`]: fixed capacity, bits in a memory-mapped file
//! - [`MemoryBloomFilter`]: fixed capacity, bits on the heap
//! - [`ScalableBloomFilter`]: unbounded, stacks fixed filters as it grows

mod bits;
mod filter;
mod scalable;

pub use bits::{BitStore, MmapBits, WordBits};
pub use filter::{
    optimal_parameters, FileSeekBloomFilter, MemoryBloomFilter, SeededBloomFilter, MAX_BITS,
};
pub use scalable::{GrowthMode, ScalableBloomFilter};

use spillstore::Result;

/// Probabilistic set membership: no false negatives, bounded false positives
pub trait ApproximateSet {
    /// Add `key`, returning true if it was probably present already
    fn add(&mut self, key: &[u8]) -> Result<bool>;

    /// True if `key` was probably added
    fn contains(&self, key: &[u8]) -> bool;

    /// Keys added
    fn len(&self) -> u64;

    /// True if nothing was added
    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<B: BitStore> ApproximateSet for SeededBloomFilter<B> {
    fn add(&mut self, key: &[u8]) -> Result<bool> {
        SeededBloomFilter::add(self, key)
    }

    fn contains(&self, key: &[u8]) -> bool {
        SeededBloomFilter::contains(self, key)
    }

    fn len(&self) -> u64 {
        SeededBloomFilter::len(self)
    }
}

impl<B: BitStore> ApproximateSet for ScalableBloomFilter<B> {
    fn add(&mut self, key: &[u8]) -> Result<bool> {
        ScalableBloomFilter::add(self, key)
    }

    fn contains(&self, key: &[u8]) -> bool {
        ScalableBloomFilter::contains(self, key)
    }

    fn len(&self) -> u64 {
        ScalableBloomFilter::len(self)
    }
}
