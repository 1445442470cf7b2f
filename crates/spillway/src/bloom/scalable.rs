//! Bloom filter that grows by stacking sub-filters

use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use spillstore::{Error, Result};
use tracing::debug;

use super::bits::{BitStore, MmapBits};
use super::filter::{optimal_parameters, SeededBloomFilter};
use crate::config::BloomConfig;

/// Each new sub-filter targets this fraction of the previous error rate,
/// keeping the compound rate bounded
const ERROR_TIGHTENING_RATIO: f64 = 0.9;

/// How fast sub-filter capacities grow
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GrowthMode {
    /// Double the capacity per sub-filter; less memory for small sets
    #[default]
    SmallSet,
    /// Quadruple the capacity per sub-filter; fewer sub-filters for big sets
    LargeSet,
}

impl GrowthMode {
    /// Capacity multiplier between consecutive sub-filters
    pub fn factor(self) -> u64 {
        match self {
            GrowthMode::SmallSet => 2,
            GrowthMode::LargeSet => 4,
        }
    }
}

/// Unbounded approximate set.
///
/// Keys go into the newest sub-filter; when it is full a larger one with a
/// tighter error rate is appended.
#[derive(Debug)]
pub struct ScalableBloomFilter<B = MmapBits> {
    filters: Vec<SeededBloomFilter<B>>,
    initial_capacity: u64,
    error_rate: f64,
    growth: GrowthMode,
    rng: StdRng,
}

impl<B: BitStore> ScalableBloomFilter<B> {
    /// Create an empty filter with random seeds
    pub fn new(initial_capacity: u64, error_rate: f64, growth: GrowthMode) -> Result<Self> {
        Self::with_rng(initial_capacity, error_rate, growth, StdRng::from_entropy())
    }

    /// Create an empty filter with reproducible seeds
    pub fn with_seed(
        initial_capacity: u64,
        error_rate: f64,
        growth: GrowthMode,
        seed: u64,
    ) -> Result<Self> {
        Self::with_rng(
            initial_capacity,
            error_rate,
            growth,
            StdRng::seed_from_u64(seed),
        )
    }

    /// Create an empty filter from configuration
    pub fn from_config(config: &BloomConfig) -> Result<Self> {
        Self::new(config.initial_capacity, config.error_rate, config.growth)
    }

    fn with_rng(
        initial_capacity: u64,
        error_rate: f64,
        growth: GrowthMode,
        rng: StdRng,
    ) -> Result<Self> {
        // Fail on bad parameters now rather than on the first add
        optimal_parameters(initial_capacity, error_rate)?;

        Ok(Self {
            filters: Vec::new(),
            initial_capacity,
            error_rate,
            growth,
            rng,
        })
    }

    /// True if `key` was probably added before
    pub fn contains(&self, key: impl AsRef<[u8]>) -> bool {
        let key = key.as_ref();
        // Newest filters hold most keys
        self.filters.iter().rev().any(|filter| filter.contains(key))
    }

    /// Add `key`, returning true if it was probably present already
    pub fn add(&mut self, key: impl AsRef<[u8]>) -> Result<bool> {
        let key = key.as_ref();
        if self.contains(key) {
            return Ok(true);
        }

        if self.filters.last().map_or(true, |filter| filter.is_full()) {
            self.grow()?;
        }
        match self.filters.last_mut() {
            Some(filter) => filter.add(key),
            None => Err(Error::CapacityExceeded {
                capacity: self.capacity(),
            }),
        }
    }

    fn grow(&mut self) -> Result<()> {
        let generation = self.filters.len() as u32;
        let capacity = self
            .growth
            .factor()
            .checked_pow(generation)
            .and_then(|factor| factor.checked_mul(self.initial_capacity))
            .ok_or(Error::CapacityExceeded {
                capacity: self.capacity(),
            })?;
        let error_rate = self.error_rate * ERROR_TIGHTENING_RATIO.powi(generation as i32);

        let filter = SeededBloomFilter::with_rng(capacity, error_rate, &mut self.rng)?;
        debug!(
            generation,
            capacity,
            error_rate,
            num_bits = filter.num_bits(),
            "added bloom sub-filter"
        );
        self.filters.push(filter);
        Ok(())
    }

    /// Keys added across all sub-filters
    pub fn len(&self) -> u64 {
        self.filters.iter().map(SeededBloomFilter::len).sum()
    }

    /// True if nothing was added
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Summed capacity of the current sub-filters
    pub fn capacity(&self) -> u64 {
        self.filters.iter().map(SeededBloomFilter::capacity).sum()
    }

    /// Number of sub-filters allocated so far
    pub fn filter_count(&self) -> usize {
        self.filters.len()
    }

    /// Error rate of the first sub-filter
    pub fn error_rate(&self) -> f64 {
        self.error_rate
    }

    /// Growth mode
    pub fn growth(&self) -> GrowthMode {
        self.growth
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bloom::WordBits;

    #[test]
    fn test_growth_factor() {
        assert_eq!(GrowthMode::SmallSet.factor(), 2);
        assert_eq!(GrowthMode::LargeSet.factor(), 4);
    }

    #[test]
    fn test_empty_filter() {
        let filter = ScalableBloomFilter::<WordBits>::with_seed(10, 0.01, GrowthMode::SmallSet, 1)
            .unwrap();
        assert!(filter.is_empty());
        assert_eq!(filter.filter_count(), 0);
        assert_eq!(filter.capacity(), 0);
        assert!(!filter.contains("anything"));
    }

    #[test]
    fn test_grows_past_initial_capacity() {
        let mut filter: ScalableBloomFilter =
            ScalableBloomFilter::with_seed(10, 0.001, GrowthMode::SmallSet, 5).unwrap();

        let mut fresh = 0;
        for i in 0..100u32 {
            if !filter.add(i.to_le_bytes()).unwrap() {
                fresh += 1;
            }
        }

        // 10 + 20 + 40 + 80
        assert_eq!(filter.filter_count(), 4);
        assert_eq!(filter.capacity(), 150);
        assert_eq!(filter.len(), fresh);
        assert!((0..100u32).all(|i| filter.contains(i.to_le_bytes())));
    }

    #[test]
    fn test_large_set_growth() {
        let mut filter =
            ScalableBloomFilter::<WordBits>::with_seed(10, 0.001, GrowthMode::LargeSet, 5)
                .unwrap();
        for i in 0..60u32 {
            filter.add(i.to_le_bytes()).unwrap();
        }

        // 10 + 40 + 160
        assert_eq!(filter.filter_count(), 3);
        assert_eq!(filter.capacity(), 210);
    }

    #[test]
    fn test_duplicate_add_reports_present() {
        let mut filter =
            ScalableBloomFilter::<WordBits>::with_seed(4, 0.01, GrowthMode::SmallSet, 2).unwrap();
        assert!(!filter.add("/index.html").unwrap());
        assert!(filter.add("/index.html").unwrap());
        assert_eq!(filter.len(), 1);
    }

    #[test]
    fn test_invalid_parameters() {
        assert!(matches!(
            ScalableBloomFilter::<WordBits>::new(0, 0.01, GrowthMode::SmallSet),
            Err(Error::Config(_))
        ));
        assert!(matches!(
            ScalableBloomFilter::<WordBits>::new(10, 1.0, GrowthMode::SmallSet),
            Err(Error::Config(_))
        ));
    }

    #[test]
    fn test_from_config() {
        let config = BloomConfig {
            initial_capacity: 16,
            error_rate: 0.01,
            growth: GrowthMode::LargeSet,
        };
        let filter = ScalableBloomFilter::<WordBits>::from_config(&config).unwrap();
        assert_eq!(filter.growth(), GrowthMode::LargeSet);
        assert_eq!(filter.error_rate(), 0.01);
    }
}
