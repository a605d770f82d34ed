//! Hash space: deterministic shard selection per query class
//!
//! All functions are pure. For a fixed `(num_shards, replication_factor)`
//! the same key always produces the same, duplicate-free shard list.

use pdcio_common::{NumericDomain, NumericDomains, ShardId, ValueType, f64_ordinal};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use xxhash_rust::xxh64::xxh64;

/// Re-mix rounds tried before falling back to a linear probe
const MAX_REMIX_ATTEMPTS: u64 = 64;

/// Placement errors
#[derive(Debug, Error, PartialEq)]
pub enum PlacementError {
    #[error("number of shards must be greater than zero")]
    ZeroShards,

    #[error("replication factor must be greater than zero")]
    ZeroReplication,

    #[error("invalid numeric domain for {value_type}: {domain:?}")]
    InvalidDomain {
        value_type: ValueType,
        domain: NumericDomain,
    },
}

pub type PlacementResult<T> = Result<T, PlacementError>;

/// djb2 string hash (32-bit)
#[must_use]
pub fn djb2(bytes: &[u8]) -> u32 {
    bytes.iter().fold(5381u32, |hash, &c| {
        hash.wrapping_shl(5).wrapping_add(hash).wrapping_add(u32::from(c))
    })
}

/// Numeric types a value literal may be stored as
pub const NUMERIC_TYPES: [ValueType; 3] = [ValueType::Int64, ValueType::UInt64, ValueType::Double];

/// Shard hash space for one cluster shape
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct HashSpace {
    num_shards: u32,
    replication_factor: u32,
    numeric: NumericDomains,
}

impl HashSpace {
    pub const fn new(num_shards: u32, replication_factor: u32) -> PlacementResult<Self> {
        if num_shards == 0 {
            return Err(PlacementError::ZeroShards);
        }
        if replication_factor == 0 {
            return Err(PlacementError::ZeroReplication);
        }
        Ok(Self {
            num_shards,
            replication_factor,
            numeric: NumericDomains {
                int64: NumericDomain::INT32,
                uint64: NumericDomain::UINT32,
                double: NumericDomain::Ordinal,
            },
        })
    }

    /// Replace the per-type numeric layout
    pub fn with_numeric_domains(mut self, numeric: NumericDomains) -> PlacementResult<Self> {
        for value_type in NUMERIC_TYPES {
            let domain = *domain_of(&numeric, value_type);
            if !domain.is_valid() {
                return Err(PlacementError::InvalidDomain { value_type, domain });
            }
        }
        self.numeric = numeric;
        Ok(self)
    }

    #[must_use]
    pub const fn numeric_domains(&self) -> &NumericDomains {
        &self.numeric
    }

    #[must_use]
    pub const fn num_shards(&self) -> u32 {
        self.num_shards
    }

    #[must_use]
    pub const fn replication_factor(&self) -> u32 {
        self.replication_factor
    }

    /// Number of shards an affix placement returns
    #[must_use]
    pub fn replica_count(&self) -> usize {
        self.replication_factor.min(self.num_shards) as usize
    }

    /// Single shard for an exact key
    #[must_use]
    pub fn hash_for_exact(&self, key: &[u8]) -> ShardId {
        if key.is_empty() {
            return 0;
        }
        djb2(key) % self.num_shards
    }

    /// Primary shard from the first `prefix_len` bytes, then replicas
    #[must_use]
    pub fn hash_for_prefix(&self, key: &[u8], prefix_len: usize) -> Vec<ShardId> {
        let anchor = &key[..prefix_len.min(key.len())];
        if anchor.is_empty() {
            return self.replicate(0);
        }
        self.replicate(djb2(anchor))
    }

    /// Primary shard from the last `suffix_len` bytes read back to front
    #[must_use]
    pub fn hash_for_suffix(&self, key: &[u8], suffix_len: usize) -> Vec<ShardId> {
        let anchor = &key[key.len() - suffix_len.min(key.len())..];
        if anchor.is_empty() {
            return self.replicate(0);
        }
        let reversed: Vec<u8> = anchor.iter().rev().copied().collect();
        self.replicate(djb2(&reversed))
    }

    /// No anchor is known, so the query must visit every shard
    #[must_use]
    pub fn hash_for_infix(&self) -> Vec<ShardId> {
        self.all_shards()
    }

    #[must_use]
    pub fn all_shards(&self) -> Vec<ShardId> {
        (0..self.num_shards).collect()
    }

    /// Shard owning a numeric value of `value_type`
    ///
    /// Each numeric type is split over all shards in its own domain, so the
    /// same number stored as different types may live on different shards.
    /// The placement is monotonic in `value` within one type.
    #[must_use]
    pub fn hash_for_numeric(&self, value_type: ValueType, value: f64) -> ShardId {
        match *domain_of(&self.numeric, value_type) {
            NumericDomain::Linear { lo, hi } => self.linear_slice(lo, hi, value),
            NumericDomain::Ordinal => self.ordinal_slice(f64_ordinal(value)),
        }
    }

    /// Contiguous shards of `value_type` whose slices intersect `[lo, hi]`
    #[must_use]
    pub fn hash_for_numeric_range(&self, value_type: ValueType, lo: f64, hi: f64) -> Vec<ShardId> {
        if f64_ordinal(lo) > f64_ordinal(hi) {
            return Vec::new();
        }
        let first = self.hash_for_numeric(value_type, lo);
        let last = self.hash_for_numeric(value_type, hi);
        (first..=last).collect()
    }

    /// Shards that may hold `value` under any numeric type, ascending
    #[must_use]
    pub fn hash_for_any_numeric(&self, value: f64) -> Vec<ShardId> {
        self.hash_for_any_numeric_range(value, value)
    }

    /// Union of the per-type range placements, ascending
    #[must_use]
    pub fn hash_for_any_numeric_range(&self, lo: f64, hi: f64) -> Vec<ShardId> {
        let mut shards: Vec<ShardId> = NUMERIC_TYPES
            .iter()
            .flat_map(|ty| self.hash_for_numeric_range(*ty, lo, hi))
            .collect();
        shards.sort_unstable();
        shards.dedup();
        shards
    }

    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    fn linear_slice(&self, lo: f64, hi: f64, value: f64) -> ShardId {
        let n = f64::from(self.num_shards);
        let slice = ((value - lo) / (hi - lo) * n).floor();
        // NaN casts to zero
        slice.clamp(0.0, n - 1.0) as ShardId
    }

    #[allow(clippy::cast_possible_truncation)]
    fn ordinal_slice(&self, ordinal: u64) -> ShardId {
        ((u128::from(ordinal) * u128::from(self.num_shards)) >> 64) as ShardId
    }

    /// Primary shard followed by distinct re-mixed replicas
    #[allow(clippy::cast_possible_truncation)]
    fn replicate(&self, primary_hash: u32) -> Vec<ShardId> {
        let count = self.replica_count();
        let n = u64::from(self.num_shards);
        let primary = primary_hash % self.num_shards;

        let mut shards = Vec::with_capacity(count);
        shards.push(primary);

        let seed_bytes = primary_hash.to_le_bytes();
        let mut attempt = 0;
        while shards.len() < count && attempt < MAX_REMIX_ATTEMPTS {
            attempt += 1;
            let shard = (xxh64(&seed_bytes, attempt) % n) as ShardId;
            if !shards.contains(&shard) {
                shards.push(shard);
            }
        }

        let mut probe = primary;
        while shards.len() < count {
            probe = (probe + 1) % self.num_shards;
            if !shards.contains(&probe) {
                shards.push(probe);
            }
        }

        shards
    }
}

const fn domain_of(numeric: &NumericDomains, value_type: ValueType) -> &NumericDomain {
    match value_type {
        ValueType::Int64 => &numeric.int64,
        ValueType::UInt64 => &numeric.uint64,
        ValueType::Double | ValueType::String => &numeric.double,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::Rng;
    use std::collections::HashSet;

    fn random_key(rng: &mut impl Rng) -> Vec<u8> {
        let len = rng.gen_range(1..24);
        (0..len).map(|_| rng.gen_range(b'a'..=b'z')).collect()
    }

    #[test]
    fn test_rejects_zero_shards() {
        assert_eq!(HashSpace::new(0, 1), Err(PlacementError::ZeroShards));
        assert_eq!(HashSpace::new(4, 0), Err(PlacementError::ZeroReplication));
    }

    #[test]
    fn test_djb2_reference_values() {
        assert_eq!(djb2(b""), 5381);
        assert_eq!(djb2(b"a"), 5381 * 33 + 97);
    }

    #[test]
    fn test_exact_is_deterministic() {
        let space = HashSpace::new(16, 3).unwrap();
        let mut rng = rand::thread_rng();
        for _ in 0..500 {
            let key = random_key(&mut rng);
            let first = space.hash_for_exact(&key);
            assert!(first < 16);
            assert_eq!(first, space.hash_for_exact(&key));
            assert_eq!(first, HashSpace::new(16, 1).unwrap().hash_for_exact(&key));
        }
    }

    #[test]
    fn test_affix_replicas_are_distinct() {
        let mut rng = rand::thread_rng();
        for (n, r) in [(4, 2), (8, 3), (5, 5), (3, 7), (64, 4), (2, 2)] {
            let space = HashSpace::new(n, r).unwrap();
            for _ in 0..200 {
                let key = random_key(&mut rng);
                for shards in [space.hash_for_prefix(&key, 3), space.hash_for_suffix(&key, 3)] {
                    let expected = r.min(n) as usize;
                    assert_eq!(shards.len(), expected);
                    let unique: HashSet<_> = shards.iter().collect();
                    assert_eq!(unique.len(), expected);
                    assert!(shards.iter().all(|s| *s < n));
                }
            }
        }
    }

    #[test]
    fn test_prefix_only_depends_on_prefix() {
        let space = HashSpace::new(32, 2).unwrap();
        assert_eq!(
            space.hash_for_prefix(b"str090str", 5),
            space.hash_for_prefix(b"str09", 5)
        );
        assert_eq!(
            space.hash_for_suffix(b"str109str", 5),
            space.hash_for_suffix(b"09str", 5)
        );
    }

    #[test]
    fn test_short_key_uses_whole_key() {
        let space = HashSpace::new(32, 1).unwrap();
        assert_eq!(space.hash_for_prefix(b"ab", 10), space.hash_for_prefix(b"ab", 2));
    }

    #[test]
    fn test_empty_key_maps_to_shard_zero() {
        let space = HashSpace::new(8, 3).unwrap();
        assert_eq!(space.hash_for_exact(b""), 0);
        let prefix = space.hash_for_prefix(b"", 3);
        assert_eq!(prefix[0], 0);
        assert_eq!(prefix.len(), 3);
        assert_eq!(space.hash_for_suffix(b"", 3)[0], 0);
    }

    #[test]
    fn test_single_shard() {
        let space = HashSpace::new(1, 3).unwrap();
        assert_eq!(space.hash_for_exact(b"anything"), 0);
        assert_eq!(space.hash_for_prefix(b"anything", 3), vec![0]);
        assert_eq!(space.hash_for_suffix(b"anything", 3), vec![0]);
        assert_eq!(space.hash_for_infix(), vec![0]);
        for ty in NUMERIC_TYPES {
            assert_eq!(space.hash_for_numeric(ty, 12.5), 0);
            assert_eq!(space.hash_for_numeric_range(ty, -1.0, 1.0), vec![0]);
        }
        assert_eq!(space.hash_for_any_numeric_range(-1e300, 1e300), vec![0]);
    }

    #[test]
    fn test_infix_broadcasts() {
        let space = HashSpace::new(5, 2).unwrap();
        assert_eq!(space.hash_for_infix(), vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn test_numeric_range_is_contiguous_and_covers_points() {
        let space = HashSpace::new(8, 1).unwrap();
        for ty in NUMERIC_TYPES {
            assert_eq!(space.hash_for_numeric(ty, f64::NEG_INFINITY), 0);
            assert_eq!(space.hash_for_numeric(ty, f64::INFINITY), 7);
        }

        let mut rng = rand::thread_rng();
        for _ in 0..500 {
            let a: f64 = rng.gen_range(-1e10..1e10);
            let b: f64 = rng.gen_range(-1e10..1e10);
            let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
            for ty in NUMERIC_TYPES {
                let range = space.hash_for_numeric_range(ty, lo, hi);
                assert!(range.contains(&space.hash_for_numeric(ty, lo)));
                assert!(range.contains(&space.hash_for_numeric(ty, hi)));
                assert!(range.windows(2).all(|w| w[1] == w[0] + 1));
            }
            let any = space.hash_for_any_numeric_range(lo, hi);
            for ty in NUMERIC_TYPES {
                assert!(any.contains(&space.hash_for_numeric(ty, lo)));
            }
        }
        for ty in NUMERIC_TYPES {
            assert!(space.hash_for_numeric_range(ty, 2.0, 1.0).is_empty());
        }
    }

    #[test]
    fn test_numeric_is_monotonic() {
        let space = HashSpace::new(16, 1).unwrap();
        let values = [-1e300, -3e9, -5.0, -0.0, 0.0, 1e-9, 3.0, 7e8, 5e9, 1e300];
        for ty in NUMERIC_TYPES {
            for pair in values.windows(2) {
                assert!(space.hash_for_numeric(ty, pair[0]) <= space.hash_for_numeric(ty, pair[1]));
            }
        }
    }

    fn distinct_shards(space: &HashSpace, ty: ValueType, values: impl Iterator<Item = u64>) -> usize {
        #[allow(clippy::cast_precision_loss)]
        let shards: HashSet<_> = values.map(|v| space.hash_for_numeric(ty, v as f64)).collect();
        shards.len()
    }

    #[test]
    fn test_integers_spread_over_their_own_domain() {
        let space = HashSpace::new(16, 1).unwrap();
        let ids = || (0..1_000_000_000u64).step_by(1_000_003);

        // 0..1e9 covers under a quarter of the default 32-bit span
        assert_eq!(distinct_shards(&space, ValueType::UInt64, ids()), 4);
        // the same numbers as doubles share two ordinal slices
        assert!(distinct_shards(&space, ValueType::Double, ids()) <= 2);
        assert_eq!(space.hash_for_numeric_range(ValueType::UInt64, 0.0, 1e9), vec![0, 1, 2, 3]);
    }

    #[test]
    fn test_configured_domain_balances_load() {
        let space = HashSpace::new(16, 1)
            .unwrap()
            .with_numeric_domains(NumericDomains {
                uint64: NumericDomain::Linear { lo: 0.0, hi: 1e9 },
                ..NumericDomains::default()
            })
            .unwrap();

        let mut per_shard = [0usize; 16];
        let mut rng = rand::thread_rng();
        for _ in 0..16_000 {
            let v: u64 = rng.gen_range(0..1_000_000_000);
            #[allow(clippy::cast_precision_loss)]
            let shard = space.hash_for_numeric(ValueType::UInt64, v as f64);
            per_shard[shard as usize] += 1;
        }
        assert!(per_shard.iter().all(|&n| n > 600 && n < 1_400), "{per_shard:?}");

        assert_eq!(space.hash_for_numeric(ValueType::UInt64, 2e9), 15);
        assert_eq!(space.hash_for_numeric(ValueType::Int64, -1.0), 7);
        assert_eq!(space.hash_for_numeric(ValueType::Int64, 0.0), 8);
    }

    #[test]
    fn test_rejects_empty_domain() {
        let numeric = NumericDomains {
            int64: NumericDomain::Linear { lo: 1.0, hi: -1.0 },
            ..NumericDomains::default()
        };
        assert!(matches!(
            HashSpace::new(4, 1).unwrap().with_numeric_domains(numeric),
            Err(PlacementError::InvalidDomain {
                value_type: ValueType::Int64,
                ..
            })
        ));
    }
}
