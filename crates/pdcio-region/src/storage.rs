//! Durable storage boundary

use crate::error::StorageError;
use crate::region::{MAX_COPY_DIMS, RegionDescriptor, copy_overlap, overlap_subregion};

use parking_lot::RwLock;
use pdcio_common::ObjectId;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

/// Byte-addressable backend the region cache writes through to
///
/// Implementations must be callable concurrently for different objects.
pub trait DurableStorage: Send + Sync {
    fn read(
        &self,
        object: ObjectId,
        region: &RegionDescriptor,
        unit: usize,
    ) -> Result<Vec<u8>, StorageError>;

    fn write(
        &self,
        object: ObjectId,
        region: &RegionDescriptor,
        unit: usize,
        data: &[u8],
    ) -> Result<(), StorageError>;
}

struct LoggedWrite {
    region: RegionDescriptor,
    unit: usize,
    data: Vec<u8>,
}

/// In-memory backend keeping every write in order
///
/// Reads replay the log over a zeroed buffer so later writes win. Regions
/// above three dimensions are only readable when a write covered exactly
/// the same region.
#[derive(Default)]
pub struct MemoryStorage {
    objects: RwLock<HashMap<ObjectId, Vec<LoggedWrite>>>,
    reads: AtomicU64,
    writes: AtomicU64,
}

impl MemoryStorage {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of `read` calls served
    pub fn read_count(&self) -> u64 {
        self.reads.load(Ordering::Relaxed)
    }

    /// Number of `write` calls accepted
    pub fn write_count(&self) -> u64 {
        self.writes.load(Ordering::Relaxed)
    }

    /// Regions written for `object`, oldest first
    pub fn written_regions(&self, object: ObjectId) -> Vec<RegionDescriptor> {
        self.objects
            .read()
            .get(&object)
            .map(|log| log.iter().map(|w| w.region).collect())
            .unwrap_or_default()
    }
}

impl DurableStorage for MemoryStorage {
    fn read(
        &self,
        object: ObjectId,
        region: &RegionDescriptor,
        unit: usize,
    ) -> Result<Vec<u8>, StorageError> {
        self.reads.fetch_add(1, Ordering::Relaxed);
        let len = usize::try_from(region.byte_len(unit))
            .map_err(|_| StorageError::Backend(format!("region {region} too large")))?;
        let objects = self.objects.read();
        let log = objects.get(&object).map(Vec::as_slice).unwrap_or_default();

        if region.ndim() > MAX_COPY_DIMS {
            return log
                .iter()
                .rev()
                .find(|w| w.region == *region && w.unit == unit)
                .map(|w| w.data.clone())
                .ok_or(StorageError::OutOfRange {
                    object: object.as_u64(),
                });
        }

        let mut out = vec![0u8; len];
        for write in log.iter().filter(|w| w.unit == unit) {
            if let Some(overlap) = overlap_subregion(region, &write.region) {
                copy_overlap(&mut out, region, &write.data, &write.region, &overlap, unit)
                    .map_err(|e| StorageError::Backend(e.to_string()))?;
            }
        }
        Ok(out)
    }

    fn write(
        &self,
        object: ObjectId,
        region: &RegionDescriptor,
        unit: usize,
        data: &[u8],
    ) -> Result<(), StorageError> {
        let len = region.byte_len(unit);
        if (data.len() as u64) < len {
            return Err(StorageError::Backend(format!(
                "write of {region} needs {len} bytes, got {}",
                data.len()
            )));
        }
        self.writes.fetch_add(1, Ordering::Relaxed);
        self.objects
            .write()
            .entry(object)
            .or_default()
            .push(LoggedWrite {
                region: *region,
                unit,
                data: data[..len as usize].to_vec(),
            });
        Ok(())
    }
}
