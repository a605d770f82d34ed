//! Region geometry
//!
//! A region is a hyper-rectangle of an object's dense array, given as an
//! offset and length per dimension. Buffers are laid out row-major with
//! dimension 0 varying slowest.

use crate::error::{MergeError, RegionError, RegionResult};

use serde::{Deserialize, Serialize};
use std::fmt;

/// Highest dimensionality a region can describe
pub const MAX_DIMS: usize = 4;

/// Highest dimensionality the copy and merge paths handle
pub const MAX_COPY_DIMS: usize = 3;

/// Hyper-rectangular selection of an object's array
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RegionDescriptor {
    ndim: u8,
    offset: [u64; MAX_DIMS],
    length: [u64; MAX_DIMS],
}

impl RegionDescriptor {
    /// Build a region, rejecting empty or overflowing extents
    pub fn new(offset: &[u64], length: &[u64]) -> RegionResult<Self> {
        if offset.len() != length.len() {
            return Err(RegionError::DimensionMismatch {
                left: offset.len(),
                right: length.len(),
            });
        }
        let ndim = offset.len();
        if ndim == 0 {
            return Err(RegionError::invalid("region has no dimensions"));
        }
        if ndim > MAX_DIMS {
            return Err(RegionError::UnsupportedDimension(ndim));
        }

        let mut region = Self {
            ndim: ndim as u8,
            offset: [0; MAX_DIMS],
            length: [0; MAX_DIMS],
        };
        let mut elements = 1u64;
        for d in 0..ndim {
            if length[d] == 0 {
                return Err(RegionError::invalid(format!("dimension {d} has zero length")));
            }
            if offset[d].checked_add(length[d]).is_none() {
                return Err(RegionError::invalid(format!("dimension {d} overflows")));
            }
            elements = elements
                .checked_mul(length[d])
                .ok_or_else(|| RegionError::invalid("element count overflows"))?;
            region.offset[d] = offset[d];
            region.length[d] = length[d];
        }
        Ok(region)
    }

    /// One-dimensional region `[offset, offset + length)`
    pub fn linear(offset: u64, length: u64) -> RegionResult<Self> {
        Self::new(&[offset], &[length])
    }

    #[must_use]
    pub const fn ndim(&self) -> usize {
        self.ndim as usize
    }

    #[must_use]
    pub fn offset(&self) -> &[u64] {
        &self.offset[..self.ndim()]
    }

    #[must_use]
    pub fn length(&self) -> &[u64] {
        &self.length[..self.ndim()]
    }

    /// Exclusive end coordinate of dimension `dim`
    #[must_use]
    pub const fn end(&self, dim: usize) -> u64 {
        self.offset[dim] + self.length[dim]
    }

    #[must_use]
    pub fn num_elements(&self) -> u64 {
        self.length().iter().product()
    }

    /// Buffer size for this region at `unit` bytes per element
    #[must_use]
    pub fn byte_len(&self, unit: usize) -> u64 {
        self.num_elements().saturating_mul(unit as u64)
    }

    fn with_extent(mut self, dim: usize, start: u64, end: u64) -> Self {
        self.offset[dim] = start;
        self.length[dim] = end - start;
        self
    }

    /// Offsets and lengths left-padded to three dimensions
    fn padded(&self) -> ([u64; MAX_COPY_DIMS], [u64; MAX_COPY_DIMS]) {
        let mut offset = [0; MAX_COPY_DIMS];
        let mut length = [1; MAX_COPY_DIMS];
        let pad = MAX_COPY_DIMS - self.ndim();
        for d in 0..self.ndim() {
            offset[pad + d] = self.offset[d];
            length[pad + d] = self.length[d];
        }
        (offset, length)
    }
}

impl fmt::Debug for RegionDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Region{self}")
    }
}

impl fmt::Display for RegionDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("[")?;
        for d in 0..self.ndim() {
            if d > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{}..{}", self.offset[d], self.end(d))?;
        }
        f.write_str("]")
    }
}

/// How region `a` relates to region `b`
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RegionRelation {
    /// `a` lies inside `b` (also the answer for identical regions)
    Contained,
    /// `b` lies inside `a`
    ContainedBy,
    PartialOverlap,
    NoOverlap,
}

/// Classify `a` against `b`
#[must_use]
pub fn relation(a: &RegionDescriptor, b: &RegionDescriptor) -> RegionRelation {
    if a.ndim != b.ndim {
        return RegionRelation::NoOverlap;
    }
    let mut dims = 0..a.ndim();

    if dims
        .clone()
        .all(|d| b.offset[d] <= a.offset[d] && a.end(d) <= b.end(d))
    {
        return RegionRelation::Contained;
    }
    if dims
        .clone()
        .all(|d| a.offset[d] <= b.offset[d] && b.end(d) <= a.end(d))
    {
        return RegionRelation::ContainedBy;
    }
    if dims.all(|d| a.offset[d].max(b.offset[d]) < a.end(d).min(b.end(d))) {
        return RegionRelation::PartialOverlap;
    }
    RegionRelation::NoOverlap
}

/// Coordinate-wise intersection of two regions
#[must_use]
pub fn overlap_subregion(a: &RegionDescriptor, b: &RegionDescriptor) -> Option<RegionDescriptor> {
    if a.ndim != b.ndim {
        return None;
    }
    let mut out = *a;
    for d in 0..a.ndim() {
        let start = a.offset[d].max(b.offset[d]);
        let end = a.end(d).min(b.end(d));
        if start >= end {
            return None;
        }
        out = out.with_extent(d, start, end);
    }
    Some(out)
}

/// Copy the `overlap` rectangle from `src` (laid out per `src_region`) into
/// `dst` (laid out per `dst_region`)
pub fn copy_overlap(
    dst: &mut [u8],
    dst_region: &RegionDescriptor,
    src: &[u8],
    src_region: &RegionDescriptor,
    overlap: &RegionDescriptor,
    unit: usize,
) -> RegionResult<()> {
    for other in [src_region, overlap] {
        if other.ndim != dst_region.ndim {
            return Err(RegionError::DimensionMismatch {
                left: dst_region.ndim(),
                right: other.ndim(),
            });
        }
    }
    if dst_region.ndim() > MAX_COPY_DIMS {
        return Err(RegionError::UnsupportedDimension(dst_region.ndim()));
    }
    if unit == 0 {
        return Err(RegionError::invalid("unit size is zero"));
    }
    for region in [dst_region, src_region] {
        if relation(overlap, region) != RegionRelation::Contained {
            return Err(RegionError::invalid(format!(
                "overlap {overlap} exceeds region {region}"
            )));
        }
    }
    check_buffer(dst.len(), dst_region, unit)?;
    check_buffer(src.len(), src_region, unit)?;

    let (dst_off, dst_len) = dst_region.padded();
    let (src_off, src_len) = src_region.padded();
    let (ov_off, ov_len) = overlap.padded();

    let run = ov_len[2] as usize * unit;
    for i0 in ov_off[0]..ov_off[0] + ov_len[0] {
        for i1 in ov_off[1]..ov_off[1] + ov_len[1] {
            let s = element_index(&src_off, &src_len, i0, i1, ov_off[2]) * unit;
            let d = element_index(&dst_off, &dst_len, i0, i1, ov_off[2]) * unit;
            dst[d..d + run].copy_from_slice(&src[s..s + run]);
        }
    }
    Ok(())
}

fn check_buffer(actual: usize, region: &RegionDescriptor, unit: usize) -> RegionResult<()> {
    let needed = region.byte_len(unit);
    if (actual as u64) < needed {
        return Err(RegionError::BufferTooSmall {
            needed: usize::try_from(needed).unwrap_or(usize::MAX),
            actual,
        });
    }
    Ok(())
}

fn element_index(
    offset: &[u64; MAX_COPY_DIMS],
    length: &[u64; MAX_COPY_DIMS],
    i0: u64,
    i1: u64,
    i2: u64,
) -> usize {
    let row = (i0 - offset[0]) * length[1] + (i1 - offset[1]);
    (row * length[2] + (i2 - offset[2])) as usize
}

/// Union of two regions that differ in at most one dimension and touch or
/// overlap in it
pub fn merged_extent(
    a: &RegionDescriptor,
    b: &RegionDescriptor,
) -> Result<RegionDescriptor, MergeError> {
    if a.ndim != b.ndim {
        return Err(RegionError::DimensionMismatch {
            left: a.ndim(),
            right: b.ndim(),
        }
        .into());
    }
    if a.ndim() > MAX_COPY_DIMS {
        return Err(RegionError::UnsupportedDimension(a.ndim()).into());
    }

    let mut connecting = None;
    for d in 0..a.ndim() {
        if a.offset[d] != b.offset[d] || a.length[d] != b.length[d] {
            if connecting.is_some() {
                return Err(MergeError::NotAdjacent);
            }
            connecting = Some(d);
        }
    }
    let Some(d) = connecting else {
        return Ok(*a);
    };

    if a.end(d) < b.offset[d] || b.end(d) < a.offset[d] {
        return Err(MergeError::Gap);
    }
    let start = a.offset[d].min(b.offset[d]);
    let end = a.end(d).max(b.end(d));
    Ok(a.with_extent(d, start, end))
}

/// Merge two adjacent or overlapping regions and their buffers; `b` wins
/// wherever the two overlap
pub fn merge_adjacent(
    a: &RegionDescriptor,
    buf_a: &[u8],
    b: &RegionDescriptor,
    buf_b: &[u8],
    unit: usize,
) -> Result<(RegionDescriptor, Vec<u8>), MergeError> {
    let merged = merged_extent(a, b)?;
    if a == b {
        check_buffer(buf_b.len(), b, unit)?;
        return Ok((merged, buf_b[..b.byte_len(unit) as usize].to_vec()));
    }

    let len = usize::try_from(merged.byte_len(unit))
        .map_err(|_| RegionError::invalid("merged region too large"))?;
    let mut out = vec![0u8; len];
    copy_overlap(&mut out, &merged, buf_a, a, a, unit)?;
    copy_overlap(&mut out, &merged, buf_b, b, b, unit)?;
    Ok((merged, out))
}
