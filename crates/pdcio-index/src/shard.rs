//! Shard-local inverted index
//!
//! Each shard keeps, per attribute, either a set of string tables (exact
//! value, prefix affix, suffix affix) or one ordered numeric table. Every
//! attribute has its own reader-writer lock, so searches on one attribute
//! never wait behind writes to another.

use crate::error::{IndexError, IndexResult};
use crate::query::{NumericBound, Predicate};
use crate::transport::{
    RejectedEntry, SearchScope, ShardEntry, ShardQuery, ShardRequest, ShardResponse, TableKind,
};

use parking_lot::RwLock;
use pdcio_common::{AttrValue, ObjectId, ShardId, ValueType, f64_ordinal, i64_ordinal};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::fs::{self, File};
use std::io::{Read, Write};
use std::ops::Bound;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

const SNAPSHOT_MAGIC: u64 = 0x5044_435F_4944_5831; // "PDC_IDX1"
const SNAPSHOT_VERSION: u32 = 1;
const SNAPSHOT_HEADER_LEN: usize = 8 + 4 + 4 + 8;

type Postings = HashSet<ObjectId>;

/// String tables for one attribute
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
struct StringTable {
    exact: HashMap<String, Postings>,
    prefix: HashMap<String, HashMap<String, Postings>>,
    suffix: HashMap<String, HashMap<String, Postings>>,
}

/// Ordered numeric table for one attribute, keyed by value ordinal
#[derive(Clone, Debug, Serialize, Deserialize)]
struct NumericTable {
    value_type: ValueType,
    values: BTreeMap<u64, Postings>,
}

impl NumericTable {
    fn exact(&self, key: u64) -> impl Iterator<Item = &Postings> {
        self.values.get(&key).into_iter()
    }

    fn lt(&self, key: u64, inclusive: bool) -> impl Iterator<Item = &Postings> {
        let end = if inclusive {
            Bound::Included(key)
        } else {
            Bound::Excluded(key)
        };
        self.values.range((Bound::Unbounded, end)).map(|(_, ids)| ids)
    }

    fn gt(&self, key: u64, inclusive: bool) -> impl Iterator<Item = &Postings> {
        let start = if inclusive {
            Bound::Included(key)
        } else {
            Bound::Excluded(key)
        };
        self.values.range((start, Bound::Unbounded)).map(|(_, ids)| ids)
    }

    fn between(&self, lo: Bound<u64>, hi: Bound<u64>) -> Vec<&Postings> {
        if is_empty_range(lo, hi) {
            return Vec::new();
        }
        self.values.range((lo, hi)).map(|(_, ids)| ids).collect()
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
enum AttributeTable {
    String(StringTable),
    Numeric(NumericTable),
}

impl AttributeTable {
    fn for_value(value: &AttrValue) -> Self {
        match value.value_type() {
            ValueType::String => Self::String(StringTable::default()),
            value_type => Self::Numeric(NumericTable {
                value_type,
                values: BTreeMap::new(),
            }),
        }
    }

    const fn value_type(&self) -> ValueType {
        match self {
            Self::String(_) => ValueType::String,
            Self::Numeric(t) => t.value_type,
        }
    }

    fn is_empty(&self) -> bool {
        match self {
            Self::String(t) => t.exact.is_empty() && t.prefix.is_empty() && t.suffix.is_empty(),
            Self::Numeric(t) => t.values.is_empty(),
        }
    }

    fn postings(&self) -> usize {
        fn nested(table: &HashMap<String, HashMap<String, Postings>>) -> usize {
            table.values().flat_map(HashMap::values).map(HashSet::len).sum()
        }
        match self {
            Self::String(t) => {
                t.exact.values().map(HashSet::len).sum::<usize>()
                    + nested(&t.prefix)
                    + nested(&t.suffix)
            }
            Self::Numeric(t) => t.values.values().map(HashSet::len).sum(),
        }
    }

    fn check_type(&self, entry: &ShardEntry) -> IndexResult<()> {
        let actual = entry.key.value_type();
        if self.value_type() == actual {
            Ok(())
        } else {
            Err(IndexError::TypeMismatch {
                attribute: entry.key.attribute_name.clone(),
                expected: self.value_type(),
                actual,
            })
        }
    }

    fn insert(&mut self, entry: &ShardEntry, affix_len: usize) -> IndexResult<bool> {
        self.check_type(entry)?;
        let object = entry.key.object_id;
        let inserted = match (self, &entry.key.value) {
            (Self::String(t), AttrValue::String(v)) => match entry.table {
                TableKind::Prefix => t
                    .prefix
                    .entry(head(v, affix_len))
                    .or_default()
                    .entry(v.clone())
                    .or_default()
                    .insert(object),
                TableKind::Suffix => t
                    .suffix
                    .entry(tail(v, affix_len))
                    .or_default()
                    .entry(v.clone())
                    .or_default()
                    .insert(object),
                _ => t.exact.entry(v.clone()).or_default().insert(object),
            },
            (Self::Numeric(t), value) => match value.sort_key() {
                Some(key) => t.values.entry(key).or_default().insert(object),
                None => false,
            },
            (Self::String(_), _) => false,
        };
        Ok(inserted)
    }

    fn delete(&mut self, entry: &ShardEntry, affix_len: usize) -> IndexResult<bool> {
        self.check_type(entry)?;
        let object = entry.key.object_id;
        let removed = match (self, &entry.key.value) {
            (Self::String(t), AttrValue::String(v)) => match entry.table {
                TableKind::Prefix => remove_nested(&mut t.prefix, &head(v, affix_len), v, object),
                TableKind::Suffix => remove_nested(&mut t.suffix, &tail(v, affix_len), v, object),
                _ => remove_posting(&mut t.exact, v, object),
            },
            (Self::Numeric(t), value) => value.sort_key().is_some_and(|key| {
                let Some(ids) = t.values.get_mut(&key) else {
                    return false;
                };
                let removed = ids.remove(&object);
                if ids.is_empty() {
                    t.values.remove(&key);
                }
                removed
            }),
            (Self::String(_), _) => false,
        };
        Ok(removed)
    }

    fn search(&self, query: &ShardQuery, affix_len: usize, out: &mut BTreeSet<ObjectId>) {
        match self {
            Self::String(t) => search_strings(t, query, affix_len, out),
            Self::Numeric(t) => search_numbers(t, query, out),
        }
    }
}

fn search_strings(
    table: &StringTable,
    query: &ShardQuery,
    affix_len: usize,
    out: &mut BTreeSet<ObjectId>,
) {
    let predicate = &query.predicate;
    let affix_table = match (predicate, query.scope) {
        (Predicate::Prefix(anchor), SearchScope::Affix) => {
            Some((&table.prefix, anchor, head as fn(&str, usize) -> String))
        }
        (Predicate::Suffix(anchor), SearchScope::Affix) => {
            Some((&table.suffix, anchor, tail as fn(&str, usize) -> String))
        }
        _ => None,
    };

    if let Some((affixes, anchor, affix_of)) = affix_table {
        if anchor.chars().count() >= affix_len {
            if let Some(bucket) = affixes.get(&affix_of(anchor, affix_len)) {
                collect_matching(bucket, predicate, out);
            }
        } else {
            // Anchor shorter than the indexed affix: every bucket is a candidate
            for bucket in affixes.values() {
                collect_matching(bucket, predicate, out);
            }
        }
        return;
    }

    match predicate {
        Predicate::Exact(value) => {
            if let Some(ids) = table.exact.get(value) {
                out.extend(ids);
            }
        }
        Predicate::Prefix(_) | Predicate::Suffix(_) | Predicate::Infix(_) => {
            collect_matching(&table.exact, predicate, out);
        }
        Predicate::NumericExact { .. } | Predicate::NumericRange { .. } => {
            debug!(
                "numeric query on string attribute {}, no results",
                query.attribute
            );
        }
    }
}

fn collect_matching(
    values: &HashMap<String, Postings>,
    predicate: &Predicate,
    out: &mut BTreeSet<ObjectId>,
) {
    for (value, ids) in values {
        if predicate.matches_str(value) {
            out.extend(ids);
        }
    }
}

fn search_numbers(table: &NumericTable, query: &ShardQuery, out: &mut BTreeSet<ObjectId>) {
    let value_type = table.value_type;
    match &query.predicate {
        Predicate::NumericExact { literal, value } => {
            match point_key(literal, *value, value_type) {
                Some(key) => out.extend(table.exact(key).flatten()),
                None => debug!(
                    "literal {literal} does not parse as {value_type} for {}",
                    query.attribute
                ),
            }
        }
        Predicate::NumericRange { lo, hi } => {
            let lo = match lo {
                Some(b) => bound_key(b, value_type, true),
                None => Some(Bound::Unbounded),
            };
            let hi = match hi {
                Some(b) => bound_key(b, value_type, false),
                None => Some(Bound::Unbounded),
            };
            let (Some(lo), Some(hi)) = (lo, hi) else {
                return;
            };
            match (lo, hi) {
                (Bound::Unbounded, Bound::Unbounded) => out.extend(table.values.values().flatten()),
                (Bound::Unbounded, Bound::Included(k)) => out.extend(table.lt(k, true).flatten()),
                (Bound::Unbounded, Bound::Excluded(k)) => out.extend(table.lt(k, false).flatten()),
                (Bound::Included(k), Bound::Unbounded) => out.extend(table.gt(k, true).flatten()),
                (Bound::Excluded(k), Bound::Unbounded) => out.extend(table.gt(k, false).flatten()),
                (lo, hi) => out.extend(table.between(lo, hi).into_iter().flatten()),
            }
        }
        _ => debug!(
            "string query on {value_type} attribute {}, no results",
            query.attribute
        ),
    }
}

/// Ordinal of an exact numeric literal in the attribute's type
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn point_key(literal: &str, value: f64, value_type: ValueType) -> Option<u64> {
    match value_type {
        ValueType::Double => Some(f64_ordinal(value)),
        ValueType::Int64 => literal
            .parse::<i64>()
            .ok()
            .or_else(|| (value.fract() == 0.0).then_some(value as i64))
            .map(i64_ordinal),
        ValueType::UInt64 => literal
            .parse::<u64>()
            .ok()
            .or_else(|| (value.fract() == 0.0 && value >= 0.0).then_some(value as u64)),
        ValueType::String => None,
    }
}

/// Range end in the attribute's ordinal space; `None` means the range is empty
///
/// Fractional bounds on integer attributes round inward and become inclusive.
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn bound_key(bound: &NumericBound, value_type: ValueType, lower: bool) -> Option<Bound<u64>> {
    let wrap = |key: u64, inclusive: bool| {
        if inclusive {
            Bound::Included(key)
        } else {
            Bound::Excluded(key)
        }
    };
    let rounded = if lower {
        bound.value.ceil()
    } else {
        bound.value.floor()
    };
    let integral = bound.value.fract() == 0.0;

    match value_type {
        ValueType::Double => Some(wrap(f64_ordinal(bound.value), bound.inclusive)),
        ValueType::Int64 => {
            if let Ok(v) = bound.literal.parse::<i64>() {
                return Some(wrap(i64_ordinal(v), bound.inclusive));
            }
            let inclusive = bound.inclusive || !integral;
            Some(wrap(i64_ordinal(rounded as i64), inclusive))
        }
        ValueType::UInt64 => {
            if let Ok(v) = bound.literal.parse::<u64>() {
                return Some(wrap(v, bound.inclusive));
            }
            if rounded < 0.0 {
                return if lower { Some(Bound::Unbounded) } else { None };
            }
            let inclusive = bound.inclusive || !integral;
            Some(wrap(rounded as u64, inclusive))
        }
        ValueType::String => None,
    }
}

/// True when `BTreeMap::range` would select nothing (or reject the bounds)
const fn is_empty_range(lo: Bound<u64>, hi: Bound<u64>) -> bool {
    match (lo, hi) {
        (Bound::Included(a), Bound::Included(b)) => a > b,
        (Bound::Included(a) | Bound::Excluded(a), Bound::Excluded(b))
        | (Bound::Excluded(a), Bound::Included(b)) => a >= b,
        _ => false,
    }
}

fn head(value: &str, affix_len: usize) -> String {
    value.chars().take(affix_len).collect()
}

fn tail(value: &str, affix_len: usize) -> String {
    let skip = value.chars().count().saturating_sub(affix_len);
    value.chars().skip(skip).collect()
}

fn remove_posting<K, Q>(table: &mut HashMap<K, Postings>, key: &Q, object: ObjectId) -> bool
where
    K: std::borrow::Borrow<Q> + std::hash::Hash + Eq,
    Q: std::hash::Hash + Eq + ?Sized,
{
    let Some(ids) = table.get_mut(key) else {
        return false;
    };
    let removed = ids.remove(&object);
    if ids.is_empty() {
        table.remove(key);
    }
    removed
}

fn remove_nested(
    table: &mut HashMap<String, HashMap<String, Postings>>,
    affix: &str,
    value: &str,
    object: ObjectId,
) -> bool {
    let Some(bucket) = table.get_mut(affix) else {
        return false;
    };
    let removed = remove_posting(bucket, value, object);
    if bucket.is_empty() {
        table.remove(affix);
    }
    removed
}

/// Per-shard counters
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShardStats {
    pub attributes: usize,
    /// `(value, object)` postings across all tables
    pub postings: usize,
}

#[derive(Serialize, Deserialize)]
struct ShardSnapshot {
    shard_id: ShardId,
    affix_len: usize,
    attributes: Vec<(String, AttributeTable)>,
}

/// Inverted index held by one shard
pub struct ShardIndex {
    shard_id: ShardId,
    affix_len: usize,
    attributes: RwLock<HashMap<String, Arc<RwLock<AttributeTable>>>>,
}

impl ShardIndex {
    #[must_use]
    pub fn new(shard_id: ShardId, affix_len: usize) -> Self {
        Self {
            shard_id,
            affix_len,
            attributes: RwLock::new(HashMap::new()),
        }
    }

    #[must_use]
    pub const fn shard_id(&self) -> ShardId {
        self.shard_id
    }

    #[must_use]
    pub const fn affix_len(&self) -> usize {
        self.affix_len
    }

    /// Apply one transport request
    ///
    /// Inserts and deletes apply every valid entry; refused entries are
    /// listed in the response rather than failing the batch.
    pub fn handle(&self, request: ShardRequest) -> IndexResult<ShardResponse> {
        match request {
            ShardRequest::Insert(entries) => Ok(self.apply_all(&entries, Self::insert)),
            ShardRequest::Delete(entries) => Ok(self.apply_all(&entries, Self::delete)),
            ShardRequest::Search(query) => Ok(ShardResponse::Objects(self.search(&query))),
        }
    }

    fn apply_all(
        &self,
        entries: &[ShardEntry],
        op: fn(&Self, &ShardEntry) -> IndexResult<bool>,
    ) -> ShardResponse {
        let mut changed = 0;
        let mut rejected = Vec::new();
        for entry in entries {
            match op(self, entry) {
                Ok(applied) => changed += usize::from(applied),
                Err(e) => {
                    debug!(
                        "Shard {} refused {} for {}: {e}",
                        self.shard_id, entry.key.attribute_name, entry.key.object_id
                    );
                    rejected.push(RejectedEntry {
                        attribute: entry.key.attribute_name.clone(),
                        object_id: entry.key.object_id,
                        reason: e.to_string(),
                    });
                }
            }
        }
        ShardResponse::Applied { changed, rejected }
    }

    /// Add an entry; returns false if it was already present
    pub fn insert(&self, entry: &ShardEntry) -> IndexResult<bool> {
        check_table_kind(entry)?;
        let attribute = &entry.key.attribute_name;
        loop {
            {
                let attributes = self.attributes.read();
                if let Some(table) = attributes.get(attribute) {
                    return table.write().insert(entry, self.affix_len);
                }
            }
            self.attributes
                .write()
                .entry(attribute.clone())
                .or_insert_with(|| Arc::new(RwLock::new(AttributeTable::for_value(&entry.key.value))));
        }
    }

    /// Remove an entry; a missing entry is a no-op returning false
    pub fn delete(&self, entry: &ShardEntry) -> IndexResult<bool> {
        check_table_kind(entry)?;
        let attribute = &entry.key.attribute_name;
        let (removed, now_empty) = {
            let attributes = self.attributes.read();
            let Some(table) = attributes.get(attribute) else {
                return Ok(false);
            };
            let mut table = table.write();
            let removed = table.delete(entry, self.affix_len)?;
            (removed, table.is_empty())
        };

        if now_empty {
            let mut attributes = self.attributes.write();
            if attributes.get(attribute).is_some_and(|t| t.read().is_empty()) {
                attributes.remove(attribute);
            }
        }
        Ok(removed)
    }

    /// Object ids matching a query, ascending
    #[must_use]
    pub fn search(&self, query: &ShardQuery) -> Vec<ObjectId> {
        let mut out = BTreeSet::new();
        let attributes = self.attributes.read();
        if let Some(table) = attributes.get(&query.attribute) {
            table.read().search(query, self.affix_len, &mut out);
        }
        out.into_iter().collect()
    }

    #[must_use]
    pub fn stats(&self) -> ShardStats {
        let attributes = self.attributes.read();
        ShardStats {
            attributes: attributes.len(),
            postings: attributes.values().map(|t| t.read().postings()).sum(),
        }
    }

    /// Snapshot file for a shard inside `dir`
    #[must_use]
    pub fn snapshot_path(dir: &Path, shard_id: ShardId) -> PathBuf {
        dir.join(format!("shard_{shard_id}.idx"))
    }

    /// Write a checksummed snapshot of the shard to `dir`
    pub fn dump(&self, dir: &Path) -> IndexResult<PathBuf> {
        let snapshot = ShardSnapshot {
            shard_id: self.shard_id,
            affix_len: self.affix_len,
            attributes: self
                .attributes
                .read()
                .iter()
                .map(|(name, table)| (name.clone(), table.read().clone()))
                .collect(),
        };
        let payload =
            bincode::serialize(&snapshot).map_err(|e| IndexError::Persist(e.to_string()))?;

        let mut buf = Vec::with_capacity(SNAPSHOT_HEADER_LEN + payload.len());
        buf.extend_from_slice(&SNAPSHOT_MAGIC.to_le_bytes());
        buf.extend_from_slice(&SNAPSHOT_VERSION.to_le_bytes());
        buf.extend_from_slice(&crc32c::crc32c(&payload).to_le_bytes());
        buf.extend_from_slice(&(payload.len() as u64).to_le_bytes());
        buf.extend_from_slice(&payload);

        fs::create_dir_all(dir)?;
        let path = Self::snapshot_path(dir, self.shard_id);
        let tmp = path.with_extension("idx.tmp");
        {
            let mut file = File::create(&tmp)?;
            file.write_all(&buf)?;
            file.sync_all()?;
        }
        fs::rename(&tmp, &path)?;

        info!(
            "Dumped shard {} ({} attributes, {} bytes) to {:?}",
            self.shard_id,
            snapshot.attributes.len(),
            buf.len(),
            path
        );
        Ok(path)
    }

    /// Load a shard snapshot from `dir`; a missing file yields an empty index
    pub fn recover(shard_id: ShardId, affix_len: usize, dir: &Path) -> IndexResult<Self> {
        let path = Self::snapshot_path(dir, shard_id);
        if !path.exists() {
            debug!("No snapshot for shard {shard_id} at {path:?}, starting empty");
            return Ok(Self::new(shard_id, affix_len));
        }

        let mut buf = Vec::new();
        File::open(&path)?.read_to_end(&mut buf)?;
        if buf.len() < SNAPSHOT_HEADER_LEN {
            return Err(IndexError::Persist(format!("{path:?}: truncated header")));
        }

        let field = |at: usize, len: usize| &buf[at..at + len];
        let magic = u64::from_le_bytes(field(0, 8).try_into().map_err(persist_err)?);
        if magic != SNAPSHOT_MAGIC {
            return Err(IndexError::Persist(format!("{path:?}: bad magic {magic:#x}")));
        }
        let version = u32::from_le_bytes(field(8, 4).try_into().map_err(persist_err)?);
        if version != SNAPSHOT_VERSION {
            return Err(IndexError::Persist(format!(
                "{path:?}: unsupported version {version}"
            )));
        }
        let checksum = u32::from_le_bytes(field(12, 4).try_into().map_err(persist_err)?);
        let len = u64::from_le_bytes(field(16, 8).try_into().map_err(persist_err)?);

        let payload = &buf[SNAPSHOT_HEADER_LEN..];
        if payload.len() as u64 != len {
            return Err(IndexError::Persist(format!(
                "{path:?}: expected {len} payload bytes, found {}",
                payload.len()
            )));
        }
        if crc32c::crc32c(payload) != checksum {
            return Err(IndexError::Persist(format!("{path:?}: checksum mismatch")));
        }

        let snapshot: ShardSnapshot =
            bincode::deserialize(payload).map_err(|e| IndexError::Persist(e.to_string()))?;
        if snapshot.shard_id != shard_id || snapshot.affix_len != affix_len {
            return Err(IndexError::Persist(format!(
                "{path:?}: snapshot is for shard {} affix {}, expected shard {shard_id} affix {affix_len}",
                snapshot.shard_id, snapshot.affix_len
            )));
        }

        info!(
            "Recovered shard {shard_id} with {} attributes",
            snapshot.attributes.len()
        );
        Ok(Self {
            shard_id,
            affix_len,
            attributes: RwLock::new(
                snapshot
                    .attributes
                    .into_iter()
                    .map(|(name, table)| (name, Arc::new(RwLock::new(table))))
                    .collect(),
            ),
        })
    }
}

fn persist_err(e: std::array::TryFromSliceError) -> IndexError {
    IndexError::Persist(e.to_string())
}

fn check_table_kind(entry: &ShardEntry) -> IndexResult<()> {
    let numeric_table = entry.table == TableKind::Numeric;
    if numeric_table == entry.key.value.is_numeric() {
        Ok(())
    } else {
        Err(pdcio_common::Error::invalid_key(format!(
            "{} value cannot go into the {:?} table",
            entry.key.value_type(),
            entry.table
        ))
        .into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pdcio_common::IndexKey;

    fn entry(table: TableKind, attr: &str, value: AttrValue, object: u64) -> ShardEntry {
        ShardEntry {
            table,
            key: IndexKey::new(attr, value, ObjectId::new(object)).unwrap(),
        }
    }

    fn string_entry(table: TableKind, value: &str, object: u64) -> ShardEntry {
        entry(table, "name", AttrValue::String(value.into()), object)
    }

    fn query(attr: &str, predicate: Predicate, scope: SearchScope) -> ShardQuery {
        ShardQuery {
            attribute: attr.into(),
            predicate,
            scope,
        }
    }

    fn ids(values: &[u64]) -> Vec<ObjectId> {
        values.iter().copied().map(ObjectId::new).collect()
    }

    fn tagged_shard() -> ShardIndex {
        let shard = ShardIndex::new(0, 3);
        for i in 0..1000 {
            let value = format!("str{i:03}str");
            for table in [TableKind::Exact, TableKind::Prefix, TableKind::Suffix] {
                shard.insert(&string_entry(table, &value, i)).unwrap();
            }
        }
        shard
    }

    #[test]
    fn test_exact_insert_search_delete() {
        let shard = ShardIndex::new(0, 3);
        let e = string_entry(TableKind::Exact, "alpha", 7);
        assert!(shard.insert(&e).unwrap());
        assert!(!shard.insert(&e).unwrap());

        let q = query("name", Predicate::Exact("alpha".into()), SearchScope::Exact);
        assert_eq!(shard.search(&q), ids(&[7]));

        assert!(shard.delete(&e).unwrap());
        assert!(shard.search(&q).is_empty());
        assert!(!shard.delete(&e).unwrap());
        assert_eq!(shard.stats(), ShardStats::default());
    }

    #[test]
    fn test_affix_queries() {
        let shard = tagged_shard();

        let prefix = query("name", Predicate::Prefix("str09".into()), SearchScope::Affix);
        assert_eq!(shard.search(&prefix), ids(&[90, 91, 92, 93, 94, 95, 96, 97, 98, 99]));

        let suffix = query("name", Predicate::Suffix("09str".into()), SearchScope::Affix);
        assert_eq!(
            shard.search(&suffix),
            ids(&[9, 109, 209, 309, 409, 509, 609, 709, 809, 909])
        );

        let infix = query("name", Predicate::Infix("09".into()), SearchScope::Exact);
        let mut expected: Vec<u64> = (90..100).chain((0..10).map(|h| h * 100 + 9)).collect();
        expected.sort_unstable();
        expected.dedup();
        assert_eq!(expected.len(), 20);
        assert_eq!(shard.search(&infix), ids(&expected));
    }

    #[test]
    fn test_short_anchor_scans_all_buckets() {
        let shard = ShardIndex::new(0, 4);
        for (i, value) in ["abcd", "abxy", "zzzz"].iter().enumerate() {
            shard
                .insert(&string_entry(TableKind::Prefix, value, i as u64))
                .unwrap();
        }
        let q = query("name", Predicate::Prefix("ab".into()), SearchScope::Affix);
        assert_eq!(shard.search(&q), ids(&[0, 1]));
    }

    #[test]
    fn test_prefix_scope_exact_filters_exact_table() {
        let shard = tagged_shard();
        let q = query("name", Predicate::Prefix("str99".into()), SearchScope::Exact);
        assert_eq!(shard.search(&q).len(), 10);
    }

    #[test]
    fn test_numeric_range_boundaries() {
        let shard = ShardIndex::new(0, 3);
        for v in 0..=20i64 {
            shard
                .insert(&entry(TableKind::Numeric, "temp", AttrValue::Int64(v), v as u64))
                .unwrap();
        }
        let range = |raw: &str| {
            let pattern = crate::query::QueryPattern::parse(raw).unwrap();
            shard.search(&query("temp", pattern.predicate().clone(), SearchScope::Exact))
        };

        assert_eq!(range("temp=5|~|10"), ids(&[5, 6, 7, 8, 9, 10]));
        assert_eq!(range("temp=5~10"), ids(&[6, 7, 8, 9]));
        assert_eq!(range("temp=5|~10"), ids(&[5, 6, 7, 8, 9]));
        assert_eq!(range("temp=5~|10"), ids(&[6, 7, 8, 9, 10]));
        assert_eq!(range("temp=>=18"), ids(&[18, 19, 20]));
        assert_eq!(range("temp=<2"), ids(&[0, 1]));
        assert_eq!(range("temp=2.5|~|4.5"), ids(&[3, 4]));
        assert_eq!(range("temp=7"), ids(&[7]));
        assert!(range("temp=7.5").is_empty());
        assert!(range("temp=10|~|5").is_empty());
        assert!(range("temp=5~5").is_empty());
    }

    #[test]
    fn test_numeric_negative_and_double() {
        let shard = ShardIndex::new(0, 3);
        for (i, v) in [-2.5, -1.0, 0.0, 1.5, 3.0].iter().enumerate() {
            shard
                .insert(&entry(TableKind::Numeric, "x", AttrValue::Double(*v), i as u64))
                .unwrap();
        }
        let q = query(
            "x",
            crate::query::QueryPattern::parse("x=-1|~|1.5").unwrap().predicate().clone(),
            SearchScope::Exact,
        );
        assert_eq!(shard.search(&q), ids(&[1, 2, 3]));
    }

    #[test]
    fn test_uint_negative_bounds() {
        let shard = ShardIndex::new(0, 3);
        for v in 0..5u64 {
            shard
                .insert(&entry(TableKind::Numeric, "n", AttrValue::UInt64(v), v))
                .unwrap();
        }
        let search = |raw: &str| {
            let pattern = crate::query::QueryPattern::parse(raw).unwrap();
            shard.search(&query("n", pattern.predicate().clone(), SearchScope::Exact))
        };
        assert_eq!(search("n=-3|~|1"), ids(&[0, 1]));
        assert!(search("n=<-1").is_empty());
    }

    #[test]
    fn test_type_mismatch() {
        let shard = ShardIndex::new(0, 3);
        shard
            .insert(&entry(TableKind::Numeric, "v", AttrValue::Int64(1), 1))
            .unwrap();
        let err = shard
            .insert(&entry(TableKind::Numeric, "v", AttrValue::Double(1.0), 2))
            .unwrap_err();
        assert!(matches!(err, IndexError::TypeMismatch { .. }));

        let err = shard
            .insert(&entry(TableKind::Numeric, "s", AttrValue::String("x".into()), 3))
            .unwrap_err();
        assert!(matches!(err, IndexError::InvalidKey(_)));
    }

    #[test]
    fn test_mixed_batch_applies_valid_entries() {
        let shard = ShardIndex::new(0, 3);
        shard
            .insert(&entry(TableKind::Numeric, "v", AttrValue::Int64(1), 1))
            .unwrap();

        let batch = vec![
            entry(TableKind::Numeric, "v", AttrValue::Int64(2), 2),
            entry(TableKind::Numeric, "v", AttrValue::Double(3.0), 3),
            entry(TableKind::Numeric, "v", AttrValue::Int64(4), 4),
            entry(TableKind::Numeric, "s", AttrValue::String("x".into()), 5),
        ];
        let ShardResponse::Applied { changed, rejected } =
            shard.handle(ShardRequest::Insert(batch)).unwrap()
        else {
            panic!("insert must answer Applied");
        };
        assert_eq!(changed, 2);
        let refused: Vec<_> = rejected.iter().map(|r| (r.attribute.as_str(), r.object_id)).collect();
        assert_eq!(refused, vec![("v", ObjectId::new(3)), ("s", ObjectId::new(5))]);

        let q = query(
            "v",
            crate::query::QueryPattern::parse("v=0|~|10").unwrap().predicate().clone(),
            SearchScope::Exact,
        );
        assert_eq!(shard.search(&q), ids(&[1, 2, 4]));
    }

    #[test]
    fn test_concurrent_insert_and_search_on_one_attribute() {
        const WRITERS: u64 = 4;
        const PER_WRITER: u64 = 250;

        let shard = Arc::new(ShardIndex::new(0, 3));
        let everything = query("name", Predicate::Prefix("str".into()), SearchScope::Affix);

        std::thread::scope(|scope| {
            for w in 0..WRITERS {
                let shard = &shard;
                scope.spawn(move || {
                    for i in w * PER_WRITER..(w + 1) * PER_WRITER {
                        let value = format!("str{i:04}str");
                        for table in [TableKind::Exact, TableKind::Prefix, TableKind::Suffix] {
                            shard.insert(&string_entry(table, &value, i)).unwrap();
                        }
                        let own = query("name", Predicate::Exact(value), SearchScope::Exact);
                        assert_eq!(shard.search(&own), ids(&[i]));
                    }
                });
            }
            let shard = &shard;
            let everything = &everything;
            scope.spawn(move || {
                let mut last = 0;
                while last < (WRITERS * PER_WRITER) as usize {
                    let seen = shard.search(everything);
                    assert!(seen.len() >= last);
                    assert!(seen.windows(2).all(|w| w[0] < w[1]));
                    last = seen.len();
                }
            });
        });

        let all: Vec<u64> = (0..WRITERS * PER_WRITER).collect();
        assert_eq!(shard.search(&everything), ids(&all));
    }

    #[test]
    fn test_delete_prunes_affix_buckets() {
        let shard = ShardIndex::new(0, 3);
        let e = string_entry(TableKind::Suffix, "hello", 1);
        shard.insert(&e).unwrap();
        assert_eq!(shard.stats().postings, 1);
        shard.delete(&e).unwrap();
        assert_eq!(shard.stats(), ShardStats::default());
    }

    #[test]
    fn test_dump_and_recover() {
        let dir = tempfile::tempdir().unwrap();
        let shard = tagged_shard();
        shard
            .insert(&entry(TableKind::Numeric, "temp", AttrValue::Int64(-4), 5))
            .unwrap();
        let path = shard.dump(dir.path()).unwrap();
        assert!(path.ends_with("shard_0.idx"));

        let recovered = ShardIndex::recover(0, 3, dir.path()).unwrap();
        assert_eq!(recovered.stats(), shard.stats());
        let q = query("name", Predicate::Prefix("str09".into()), SearchScope::Affix);
        assert_eq!(recovered.search(&q).len(), 10);
        let q = query(
            "temp",
            Predicate::NumericExact {
                literal: "-4".into(),
                value: -4.0,
            },
            SearchScope::Exact,
        );
        assert_eq!(recovered.search(&q), ids(&[5]));
    }

    #[test]
    fn test_recover_missing_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let shard = ShardIndex::recover(3, 3, dir.path()).unwrap();
        assert_eq!(shard.shard_id(), 3);
        assert_eq!(shard.stats().attributes, 0);
    }

    #[test]
    fn test_recover_rejects_corruption() {
        let dir = tempfile::tempdir().unwrap();
        let path = tagged_shard().dump(dir.path()).unwrap();
        let mut bytes = fs::read(&path).unwrap();
        let last = bytes.len() - 1;
        bytes[last] ^= 0xFF;
        fs::write(&path, &bytes).unwrap();
        assert!(matches!(
            ShardIndex::recover(0, 3, dir.path()),
            Err(IndexError::Persist(_))
        ));
    }
}
