//! Fixed-capacity bloom filter with per-instance random seeds

use std::f64::consts::LN_2;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use sha2::{Digest, Sha256};
use spillstore::{Error, Result};

use super::bits::{BitStore, MmapBits, WordBits};

/// Largest bit array a single filter may allocate (128 GiB of bits)
pub const MAX_BITS: u64 = 1 << 40;

/// Bloom filter whose bits live in a memory-mapped temporary file
pub type FileSeekBloomFilter = SeededBloomFilter<MmapBits>;

/// Bloom filter whose bits live on the heap
pub type MemoryBloomFilter = SeededBloomFilter<WordBits>;

/// Number of hash functions and total bit count for a filter holding
/// `capacity` keys at `error_rate`.
///
/// Each hash function addresses `bits_per_hash` bits worth of space; the
/// capacity is doubled so that the filter is at most half full when it
/// reaches `capacity`.
pub fn optimal_parameters(capacity: u64, error_rate: f64) -> Result<(u32, u64)> {
    if capacity == 0 {
        return Err(Error::Config(
            "bloom filter capacity must be greater than zero".to_string(),
        ));
    }
    if !(error_rate > 0.0 && error_rate < 1.0) {
        return Err(Error::Config(format!(
            "bloom filter error rate {error_rate} must be between 0 and 1 (exclusive)"
        )));
    }

    let num_hashes = (1.0 / error_rate).log2().ceil().max(1.0);
    let bits_per_hash =
        (2.0 * capacity as f64 * error_rate.ln().abs() / (num_hashes * LN_2 * LN_2)).ceil();
    let num_bits = num_hashes * bits_per_hash;

    if !num_bits.is_finite() || num_bits > MAX_BITS as f64 {
        return Err(Error::CapacityExceeded { capacity });
    }
    Ok((num_hashes as u32, num_bits as u64))
}

/// Bit index selected by `seed` for `key`
fn bit_position(seed: u64, key: &[u8], num_bits: u64) -> u64 {
    let mut hasher = Sha256::new();
    hasher.update(seed.to_le_bytes());
    hasher.update(key);
    let digest = hasher.finalize();

    let mut low = [0u8; 8];
    let mut high = [0u8; 8];
    low.copy_from_slice(&digest[0..8]);
    high.copy_from_slice(&digest[8..16]);
    u64::from_le_bytes(low).wrapping_add(u64::from_le_bytes(high)) % num_bits
}

/// Classic bloom filter over a [`BitStore`].
///
/// Refuses new keys once `capacity` of them have been added; use
/// [`ScalableBloomFilter`](super::ScalableBloomFilter) for unbounded sets.
#[derive(Debug)]
pub struct SeededBloomFilter<B> {
    bits: B,
    seeds: Vec<u64>,
    num_bits: u64,
    capacity: u64,
    error_rate: f64,
    count: u64,
}

impl<B: BitStore> SeededBloomFilter<B> {
    /// Create a filter with fresh random seeds
    pub fn new(capacity: u64, error_rate: f64) -> Result<Self> {
        Self::with_rng(capacity, error_rate, &mut rand::thread_rng())
    }

    /// Create a filter whose seeds are derived from `seed`
    pub fn with_seed(capacity: u64, error_rate: f64, seed: u64) -> Result<Self> {
        Self::with_rng(capacity, error_rate, &mut StdRng::seed_from_u64(seed))
    }

    pub(crate) fn with_rng<R: Rng + ?Sized>(
        capacity: u64,
        error_rate: f64,
        rng: &mut R,
    ) -> Result<Self> {
        let (num_hashes, num_bits) = optimal_parameters(capacity, error_rate)?;
        let seeds = (0..num_hashes).map(|_| rng.gen::<u64>()).collect();

        Ok(Self {
            bits: B::with_len(num_bits)?,
            seeds,
            num_bits,
            capacity,
            error_rate,
            count: 0,
        })
    }

    /// True if `key` was probably added before; false means definitely not
    pub fn contains(&self, key: impl AsRef<[u8]>) -> bool {
        let key = key.as_ref();
        self.seeds
            .iter()
            .all(|&seed| self.bits.get(bit_position(seed, key, self.num_bits)))
    }

    /// Add `key`, returning true if it was probably present already.
    ///
    /// A present key leaves the filter untouched. A new key on a full
    /// filter fails with [`Error::CapacityExceeded`].
    pub fn add(&mut self, key: impl AsRef<[u8]>) -> Result<bool> {
        let key = key.as_ref();
        if self.contains(key) {
            return Ok(true);
        }
        if self.is_full() {
            return Err(Error::CapacityExceeded {
                capacity: self.capacity,
            });
        }

        for &seed in &self.seeds {
            self.bits.set(bit_position(seed, key, self.num_bits));
        }
        self.count += 1;
        Ok(false)
    }

    /// Keys added
    pub fn len(&self) -> u64 {
        self.count
    }

    /// True if nothing was added
    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// True once `capacity` keys were added
    pub fn is_full(&self) -> bool {
        self.count >= self.capacity
    }

    /// Keys this filter accepts
    pub fn capacity(&self) -> u64 {
        self.capacity
    }

    /// Target false positive rate at capacity
    pub fn error_rate(&self) -> f64 {
        self.error_rate
    }

    /// Hash functions per key
    pub fn num_hashes(&self) -> u32 {
        self.seeds.len() as u32
    }

    /// Size of the bit array
    pub fn num_bits(&self) -> u64 {
        self.num_bits
    }
}
