//! Bit arrays backing the bloom filters

use memmap2::MmapMut;
use spillstore::{Error, Result};

/// A fixed-length array of bits, all clear on creation
pub trait BitStore: Sized + Send {
    /// Allocate `num_bits` cleared bits
    fn with_len(num_bits: u64) -> Result<Self>;

    /// Read one bit
    fn get(&self, bit: u64) -> bool;

    /// Set one bit
    fn set(&mut self, bit: u64);
}

/// Bits in a memory-mapped anonymous temporary file.
///
/// The file is unlinked on creation, so the kernel reclaims it once the map
/// is dropped; resident memory stays bounded by the page cache.
#[derive(Debug)]
pub struct MmapBits {
    map: MmapMut,
}

impl BitStore for MmapBits {
    fn with_len(num_bits: u64) -> Result<Self> {
        let num_bytes = num_bits.div_ceil(8).max(1);
        if usize::try_from(num_bytes).is_err() {
            return Err(Error::CapacityExceeded { capacity: num_bits });
        }

        let file = tempfile::tempfile()?;
        // Extending a file fills it with zeroes
        file.set_len(num_bytes)?;

        // SAFETY: the file is anonymous and unlinked; no other process or
        // mapping can observe or truncate it while the map is alive.
        let map = unsafe { MmapMut::map_mut(&file)? };
        Ok(Self { map })
    }

    fn get(&self, bit: u64) -> bool {
        self.map[(bit / 8) as usize] & (1 << (bit % 8)) != 0
    }

    fn set(&mut self, bit: u64) {
        self.map[(bit / 8) as usize] |= 1 << (bit % 8);
    }
}

/// Bits in a heap-allocated word vector
#[derive(Debug, Clone)]
pub struct WordBits {
    words: Vec<u64>,
}

impl BitStore for WordBits {
    fn with_len(num_bits: u64) -> Result<Self> {
        let num_words = usize::try_from(num_bits.div_ceil(64).max(1))
            .map_err(|_| Error::CapacityExceeded { capacity: num_bits })?;
        Ok(Self {
            words: vec![0; num_words],
        })
    }

    fn get(&self, bit: u64) -> bool {
        self.words[(bit / 64) as usize] & (1u64 << (bit % 64)) != 0
    }

    fn set(&mut self, bit: u64) {
        self.words[(bit / 64) as usize] |= 1u64 << (bit % 64);
    }
}
