//! Write-back region cache
//!
//! Each object owns a bucket of pending region writes. A write lands in every
//! cached entry it overlaps and is registered as a new entry unless one
//! entry already contains it. Reads are served from a containing entry;
//! anything else flushes the bucket and reads through to storage under the
//! bucket lock, so a read never sees data older than a completed write.
//!
//! Buckets are removed from the directory when flushed and marked retired.
//! A writer holding a retired bucket retries against a fresh one.

use crate::error::{RegionError, RegionResult};
use crate::region::{
    MAX_COPY_DIMS, RegionDescriptor, RegionRelation, copy_overlap, merged_extent,
    overlap_subregion, relation,
};
use crate::storage::DurableStorage;

use parking_lot::{Mutex, RwLock};
use pdcio_common::ObjectId;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// A pending write held in memory
#[derive(Debug, Clone)]
struct CachedRegion {
    region: RegionDescriptor,
    unit: usize,
    data: Vec<u8>,
    /// Registration order within the cache
    seq: u64,
}

#[derive(Debug)]
struct ObjectCacheBucket {
    entries: Vec<CachedRegion>,
    last_touched: Instant,
    retired: bool,
}

impl ObjectCacheBucket {
    fn new() -> Self {
        Self {
            entries: Vec::new(),
            last_touched: Instant::now(),
            retired: false,
        }
    }

    fn cached_bytes(&self) -> u64 {
        self.entries.iter().map(|e| e.data.len() as u64).sum()
    }
}

type BucketRef = Arc<Mutex<ObjectCacheBucket>>;

/// Cache statistics
#[derive(Debug, Default)]
pub struct CacheStats {
    /// Reads served from a cached entry
    pub hits: AtomicU64,
    /// Reads that went to storage
    pub misses: AtomicU64,
    /// Writes fully absorbed by an existing entry
    pub absorbed: AtomicU64,
    /// Writes registered as a new entry
    pub registered: AtomicU64,
    /// Writes sent straight to storage
    pub bypassed: AtomicU64,
    /// Storage writes issued by flushes
    pub flushes: AtomicU64,
    pub flushed_bytes: AtomicU64,
    /// Size-triggered or explicit flush-all runs
    pub flush_alls: AtomicU64,
}

impl CacheStats {
    /// Get hit ratio
    pub fn hit_ratio(&self) -> f64 {
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let total = hits + misses;
        if total == 0 {
            0.0
        } else {
            hits as f64 / total as f64
        }
    }

    /// Reset statistics
    pub fn reset(&self) {
        for counter in [
            &self.hits,
            &self.misses,
            &self.absorbed,
            &self.registered,
            &self.bypassed,
            &self.flushes,
            &self.flushed_bytes,
            &self.flush_alls,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
    }
}

/// Write-back cache of object regions in front of durable storage
pub struct RegionCache {
    buckets: RwLock<HashMap<ObjectId, BucketRef>>,
    storage: Arc<dyn DurableStorage>,
    max_cache_bytes: u64,
    total_bytes: AtomicU64,
    next_seq: AtomicU64,
    stats: CacheStats,
}

impl RegionCache {
    pub fn new(storage: Arc<dyn DurableStorage>, max_cache_bytes: u64) -> Self {
        Self {
            buckets: RwLock::new(HashMap::new()),
            storage,
            max_cache_bytes,
            total_bytes: AtomicU64::new(0),
            next_seq: AtomicU64::new(0),
            stats: CacheStats::default(),
        }
    }

    /// Bytes currently held across all buckets
    pub fn total_bytes(&self) -> u64 {
        self.total_bytes.load(Ordering::Acquire)
    }

    pub const fn max_cache_bytes(&self) -> u64 {
        self.max_cache_bytes
    }

    pub const fn stats(&self) -> &CacheStats {
        &self.stats
    }

    /// Number of objects with a live bucket
    pub fn bucket_count(&self) -> usize {
        self.buckets.read().len()
    }

    /// Pending entries for `object`
    pub fn entry_count(&self, object: ObjectId) -> usize {
        self.bucket(object)
            .map_or(0, |bucket| bucket.lock().entries.len())
    }

    fn bucket(&self, object: ObjectId) -> Option<BucketRef> {
        self.buckets.read().get(&object).cloned()
    }

    fn bucket_or_create(&self, object: ObjectId) -> BucketRef {
        if let Some(bucket) = self.bucket(object) {
            return bucket;
        }
        Arc::clone(
            self.buckets
                .write()
                .entry(object)
                .or_insert_with(|| Arc::new(Mutex::new(ObjectCacheBucket::new()))),
        )
    }

    /// Cache a write of `data` laid out per `region`
    pub fn write(
        &self,
        object: ObjectId,
        region: &RegionDescriptor,
        data: &[u8],
        unit: usize,
    ) -> RegionResult<()> {
        if unit == 0 {
            return Err(RegionError::invalid("unit size is zero"));
        }
        let needed = region.byte_len(unit);
        if (data.len() as u64) < needed {
            return Err(RegionError::BufferTooSmall {
                needed: usize::try_from(needed).unwrap_or(usize::MAX),
                actual: data.len(),
            });
        }
        let data = &data[..needed as usize];

        if region.ndim() > MAX_COPY_DIMS || needed > self.max_cache_bytes {
            return self.write_through(object, region, data, unit);
        }

        let registered = loop {
            let bucket = self.bucket_or_create(object);
            let mut guard = bucket.lock();
            if guard.retired {
                continue;
            }

            let conflicting_unit = guard
                .entries
                .iter()
                .any(|e| e.unit != unit && overlap_subregion(&e.region, region).is_some());
            if conflicting_unit {
                debug!("Unit size change on {object}, flushing bucket before write");
                self.flush_entries(object, &mut guard)?;
            }

            let mut contained = false;
            for entry in guard.entries.iter_mut().filter(|e| e.unit == unit) {
                let Some(overlap) = overlap_subregion(&entry.region, region) else {
                    continue;
                };
                copy_overlap(&mut entry.data, &entry.region, data, region, &overlap, unit)?;
                contained |= relation(region, &entry.region) == RegionRelation::Contained;
            }
            guard.last_touched = Instant::now();

            if contained {
                self.stats.absorbed.fetch_add(1, Ordering::Relaxed);
                break false;
            }
            guard.entries.push(CachedRegion {
                region: *region,
                unit,
                data: data.to_vec(),
                seq: self.next_seq.fetch_add(1, Ordering::Relaxed),
            });
            self.total_bytes.fetch_add(needed, Ordering::AcqRel);
            self.stats.registered.fetch_add(1, Ordering::Relaxed);
            break true;
        };

        if registered && self.total_bytes() > self.max_cache_bytes {
            info!(
                "Cache holds {} bytes, above limit {}; flushing all",
                self.total_bytes(),
                self.max_cache_bytes
            );
            self.flush_all()?;
        }
        Ok(())
    }

    fn write_through(
        &self,
        object: ObjectId,
        region: &RegionDescriptor,
        data: &[u8],
        unit: usize,
    ) -> RegionResult<()> {
        debug!("Write of {region} to {object} bypasses the cache");
        if let Some(bucket) = self.bucket(object) {
            let mut guard = bucket.lock();
            if !guard.retired {
                self.flush_entries(object, &mut guard)?;
                self.retire(object, &bucket, &mut guard);
            }
            self.storage.write(object, region, unit, data)?;
        } else {
            self.storage.write(object, region, unit, data)?;
        }
        self.stats.bypassed.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    /// Read `region` of `object`
    pub fn read(
        &self,
        object: ObjectId,
        region: &RegionDescriptor,
        unit: usize,
    ) -> RegionResult<Vec<u8>> {
        let Some(bucket) = self.bucket(object) else {
            self.stats.misses.fetch_add(1, Ordering::Relaxed);
            return Ok(self.storage.read(object, region, unit)?);
        };
        let mut guard = bucket.lock();

        if !guard.retired {
            let hit = guard.entries.iter().find(|e| {
                e.unit == unit && relation(region, &e.region) == RegionRelation::Contained
            });
            if let Some(entry) = hit {
                let len = usize::try_from(region.byte_len(unit))
                    .map_err(|_| RegionError::invalid("region too large"))?;
                let mut out = vec![0u8; len];
                copy_overlap(&mut out, region, &entry.data, &entry.region, region, unit)?;
                guard.last_touched = Instant::now();
                self.stats.hits.fetch_add(1, Ordering::Relaxed);
                return Ok(out);
            }

            self.flush_entries(object, &mut guard)?;
            self.retire(object, &bucket, &mut guard);
        }

        self.stats.misses.fetch_add(1, Ordering::Relaxed);
        Ok(self.storage.read(object, region, unit)?)
    }

    /// Write every pending entry of `object` to storage and drop its bucket
    pub fn flush(&self, object: ObjectId) -> RegionResult<()> {
        let Some(bucket) = self.bucket(object) else {
            return Ok(());
        };
        let mut guard = bucket.lock();
        if guard.retired {
            return Ok(());
        }
        self.flush_entries(object, &mut guard)?;
        self.retire(object, &bucket, &mut guard);
        Ok(())
    }

    /// Flush every bucket; the first storage error is returned after all
    /// buckets have been attempted
    pub fn flush_all(&self) -> RegionResult<()> {
        self.stats.flush_alls.fetch_add(1, Ordering::Relaxed);
        let snapshot: Vec<(ObjectId, BucketRef)> = self
            .buckets
            .read()
            .iter()
            .map(|(id, bucket)| (*id, Arc::clone(bucket)))
            .collect();

        let mut first_error = None;
        for (object, bucket) in snapshot {
            let mut guard = bucket.lock();
            if guard.retired {
                continue;
            }
            match self.flush_entries(object, &mut guard) {
                Ok(()) => self.retire(object, &bucket, &mut guard),
                Err(e) => {
                    warn!("Flush of {object} failed: {e}");
                    first_error.get_or_insert(e);
                }
            }
        }
        info!("Flush-all complete, {} bytes still cached", self.total_bytes());
        first_error.map_or(Ok(()), Err)
    }

    /// Flush buckets untouched for at least `idle`; returns how many were
    /// flushed
    pub fn flush_idle(&self, idle: Duration) -> usize {
        let snapshot: Vec<(ObjectId, BucketRef)> = self
            .buckets
            .read()
            .iter()
            .map(|(id, bucket)| (*id, Arc::clone(bucket)))
            .collect();

        let mut flushed = 0;
        for (object, bucket) in snapshot {
            let mut guard = bucket.lock();
            if guard.retired || guard.last_touched.elapsed() < idle {
                continue;
            }
            match self.flush_entries(object, &mut guard) {
                Ok(()) => {
                    self.retire(object, &bucket, &mut guard);
                    flushed += 1;
                }
                Err(e) => warn!("Background flush of {object} failed: {e}"),
            }
        }
        flushed
    }

    /// Remove a drained bucket from the directory
    fn retire(&self, object: ObjectId, bucket: &BucketRef, guard: &mut ObjectCacheBucket) {
        guard.retired = true;
        let mut buckets = self.buckets.write();
        if buckets
            .get(&object)
            .is_some_and(|current| Arc::ptr_eq(current, bucket))
        {
            buckets.remove(&object);
        }
    }

    /// Drain `bucket` to storage, restoring unwritten entries on failure
    fn flush_entries(&self, object: ObjectId, bucket: &mut ObjectCacheBucket) -> RegionResult<()> {
        if bucket.entries.is_empty() {
            return Ok(());
        }
        let held = bucket.cached_bytes();
        let entries = std::mem::take(&mut bucket.entries);
        let count = entries.len();
        let plan = plan_flush(entries);
        debug!(
            "Flushing {object}: {count} entries in {} storage writes",
            plan.len()
        );

        let mut written = 0u64;
        let mut pending = plan.into_iter();
        while let Some(entry) = pending.next() {
            if let Err(e) = self
                .storage
                .write(object, &entry.region, entry.unit, &entry.data)
            {
                bucket.entries.push(entry);
                bucket.entries.extend(pending);
                let restored = bucket.cached_bytes();
                self.total_bytes
                    .fetch_sub(held.saturating_sub(restored), Ordering::AcqRel);
                self.stats.flushed_bytes.fetch_add(written, Ordering::Relaxed);
                return Err(e.into());
            }
            written += entry.data.len() as u64;
            self.stats.flushes.fetch_add(1, Ordering::Relaxed);
        }

        self.total_bytes.fetch_sub(held, Ordering::AcqRel);
        self.stats.flushed_bytes.fetch_add(written, Ordering::Relaxed);
        Ok(())
    }
}

/// Order pending entries for storage. One-dimensional entries of the same
/// unit are sorted by offset and coalesced into maximal runs; the rest go
/// out in registration order.
fn plan_flush(entries: Vec<CachedRegion>) -> Vec<CachedRegion> {
    let (mut linear, mut rest): (Vec<_>, Vec<_>) =
        entries.into_iter().partition(|e| e.region.ndim() == 1);
    rest.sort_by_key(|e| e.seq);
    linear.sort_by_key(|e| (e.unit, e.region.offset()[0], e.seq));

    let mut plan: Vec<CachedRegion> = Vec::with_capacity(linear.len() + rest.len());
    let mut run: Vec<CachedRegion> = Vec::new();
    let mut extent: Option<RegionDescriptor> = None;
    for entry in linear {
        let joined = match (extent.as_ref(), run.last()) {
            (Some(current), Some(last)) if last.unit == entry.unit => {
                merged_extent(current, &entry.region).ok()
            }
            _ => None,
        };
        if let Some(merged) = joined {
            extent = Some(merged);
        } else {
            if let Some(current) = extent {
                plan.extend(assemble_run(current, std::mem::take(&mut run)));
            }
            extent = Some(entry.region);
        }
        run.push(entry);
    }
    if let Some(current) = extent {
        plan.extend(assemble_run(current, run));
    }
    plan.extend(rest);
    plan
}

/// Copy a gap-free run of same-unit entries into one buffer covering
/// `extent`, oldest first so newer bytes win
fn assemble_run(extent: RegionDescriptor, mut members: Vec<CachedRegion>) -> Vec<CachedRegion> {
    if members.len() < 2 {
        return members;
    }
    members.sort_by_key(|m| m.seq);
    let (unit, seq) = match (members.first(), members.last()) {
        (Some(first), Some(last)) => (first.unit, last.seq),
        _ => return members,
    };
    let Ok(len) = usize::try_from(extent.byte_len(unit)) else {
        return members;
    };

    let mut data = vec![0u8; len];
    for member in &members {
        if let Err(e) = copy_overlap(
            &mut data,
            &extent,
            &member.data,
            &member.region,
            &member.region,
            unit,
        ) {
            warn!("Cannot coalesce run {extent}: {e}");
            return members;
        }
    }
    vec![CachedRegion {
        region: extent,
        unit,
        data,
        seq,
    }]
}
