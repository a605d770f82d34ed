//! DART index router
//!
//! Translates attribute inserts, deletes and searches into per-shard
//! requests, fans them out concurrently and merges the replies.
//!
//! # Routing keys
//!
//! ```text
//! exact   attr ␟ value        hash of the whole key
//! prefix  attr ␟ value        hash of the first len(attr) + 1 + affix bytes
//! suffix  value ␟ attr        hash of the last affix + 1 + len(attr) bytes
//! numeric value               range partition of the value type's domain
//! ```
//!
//! Searches are best-effort scatter-gather: a shard that fails or exceeds
//! the timeout contributes nothing and is reported in
//! [`SearchResult::warnings`].

use crate::error::{IndexError, IndexResult};
use crate::expr::Expr;
use crate::query::{Predicate, QueryPattern};
use crate::transport::{
    RejectedEntry, SearchScope, ShardEntry, ShardQuery, ShardRequest, ShardResponse,
    ShardTransport, TableKind, TransportError,
};

use futures::future::{BoxFuture, FutureExt};
use futures::stream::{self, StreamExt};
use pdcio_common::{
    AttrValue, IndexConfig, IndexKey, IndexMode, KEY_SEPARATOR, ObjectId, ReplicaSelection, ShardId,
};
use pdcio_placement::HashSpace;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tracing::{debug, warn};

/// Maximum number of in-flight shard requests per operation
const MAX_CONCURRENT_REQUESTS: usize = 32;

/// Merged result of a scatter-gather search
#[derive(Debug, Default)]
pub struct SearchResult {
    /// Matching object ids, ascending and deduplicated
    pub object_ids: Vec<ObjectId>,
    /// One `IndexError::Unreachable` per shard that did not answer
    pub warnings: Vec<IndexError>,
}

impl SearchResult {
    #[must_use]
    pub fn unreachable_shards(&self) -> Vec<ShardId> {
        self.warnings
            .iter()
            .filter_map(|w| match w {
                IndexError::Unreachable(shard) => Some(*shard),
                _ => None,
            })
            .collect()
    }

    /// True when every targeted shard answered
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.warnings.is_empty()
    }
}

/// Routes index operations to shards
pub struct DartRouter {
    space: HashSpace,
    transport: Arc<dyn ShardTransport>,
    affix_len: usize,
    mode: IndexMode,
    replica_selection: ReplicaSelection,
    shard_timeout: Duration,
    request_counter: AtomicU64,
}

impl DartRouter {
    pub fn new(space: HashSpace, transport: Arc<dyn ShardTransport>, config: &IndexConfig) -> Self {
        Self {
            space,
            transport,
            affix_len: config.affix_len,
            mode: config.mode,
            replica_selection: config.replica_selection,
            shard_timeout: config.shard_timeout(),
            request_counter: AtomicU64::new(0),
        }
    }

    #[must_use]
    pub const fn space(&self) -> &HashSpace {
        &self.space
    }

    /// Entries each shard must hold for one key
    #[must_use]
    pub fn placements(&self, key: &IndexKey) -> BTreeMap<ShardId, Vec<ShardEntry>> {
        let mut plan: BTreeMap<ShardId, Vec<ShardEntry>> = BTreeMap::new();
        self.add_placements(key, &mut plan);
        plan
    }

    fn add_placements(&self, key: &IndexKey, plan: &mut BTreeMap<ShardId, Vec<ShardEntry>>) {
        let attr = &key.attribute_name;
        let mut add = |shard: ShardId, table: TableKind| {
            plan.entry(shard).or_default().push(ShardEntry {
                table,
                key: key.clone(),
            });
        };

        match &key.value {
            AttrValue::String(value) => {
                let exact = exact_key(attr, value);
                add(self.space.hash_for_exact(exact.as_bytes()), TableKind::Exact);
                if self.mode == IndexMode::Dart {
                    for shard in self.space.hash_for_prefix(exact.as_bytes(), self.prefix_len(attr)) {
                        add(shard, TableKind::Prefix);
                    }
                    let suffix = suffix_key(attr, value);
                    for shard in self.space.hash_for_suffix(suffix.as_bytes(), self.suffix_len(attr)) {
                        add(shard, TableKind::Suffix);
                    }
                }
            }
            value => {
                if let Some(v) = value.as_f64() {
                    add(self.space.hash_for_numeric(value.value_type(), v), TableKind::Numeric);
                }
            }
        }
    }

    /// Index one object-attribute association
    pub async fn insert(&self, key: &IndexKey) -> IndexResult<()> {
        self.insert_batch(std::slice::from_ref(key)).await
    }

    /// Index several keys with at most one message per shard
    pub async fn insert_batch(&self, keys: &[IndexKey]) -> IndexResult<()> {
        let mut plan = BTreeMap::new();
        for key in keys {
            self.add_placements(key, &mut plan);
        }
        let (failed_shards, rejected) = self.apply(plan, ShardRequest::Insert, "insert").await;
        if !rejected.is_empty() {
            return Err(IndexError::Rejected {
                rejected,
                failed_shards,
            });
        }
        if failed_shards.is_empty() {
            Ok(())
        } else {
            Err(IndexError::PartialInsert { failed_shards })
        }
    }

    /// Remove one association; shards that never held it treat this as a no-op
    pub async fn delete(&self, key: &IndexKey) -> IndexResult<()> {
        let plan = self.placements(key);
        let (failed_shards, rejected) = self.apply(plan, ShardRequest::Delete, "delete").await;
        if !rejected.is_empty() {
            return Err(IndexError::Rejected {
                rejected,
                failed_shards,
            });
        }
        if failed_shards.is_empty() {
            Ok(())
        } else {
            Err(IndexError::PartialDelete { failed_shards })
        }
    }

    /// Send a write plan; returns the shards that did not answer and the
    /// entries shards refused
    async fn apply(
        &self,
        plan: BTreeMap<ShardId, Vec<ShardEntry>>,
        request: fn(Vec<ShardEntry>) -> ShardRequest,
        op: &str,
    ) -> (Vec<ShardId>, Vec<RejectedEntry>) {
        let requests = plan
            .into_iter()
            .map(|(shard, entries)| (shard, request(entries)))
            .collect();

        let mut failed = Vec::new();
        let mut rejected = BTreeSet::new();
        for (shard, result) in self.fan_out(requests).await {
            match result {
                Ok(ShardResponse::Applied {
                    rejected: refused, ..
                }) => {
                    if !refused.is_empty() {
                        warn!("Shard {shard} refused {} {op} entries", refused.len());
                    }
                    rejected.extend(refused);
                }
                Ok(other) => {
                    warn!("Shard {shard} answered {op} with {other:?}");
                    failed.push(shard);
                }
                Err(e) => {
                    warn!("Shard {shard} failed {op}: {e}");
                    failed.push(shard);
                }
            }
        }
        failed.sort_unstable();
        (failed, rejected.into_iter().collect())
    }

    /// Shards to contact for a query and the tables they should consult
    #[must_use]
    pub fn search_plan(&self, pattern: &QueryPattern) -> (Vec<ShardId>, SearchScope) {
        let attr = pattern.attribute();
        match pattern.predicate() {
            Predicate::Exact(value) => (
                vec![self.space.hash_for_exact(exact_key(attr, value).as_bytes())],
                SearchScope::Exact,
            ),
            Predicate::Prefix(anchor) if self.affix_routable(anchor) => {
                let key = exact_key(attr, anchor);
                let replicas = self.space.hash_for_prefix(key.as_bytes(), self.prefix_len(attr));
                (self.select_replicas(replicas), SearchScope::Affix)
            }
            Predicate::Suffix(anchor) if self.affix_routable(anchor) => {
                let key = suffix_key(attr, anchor);
                let replicas = self.space.hash_for_suffix(key.as_bytes(), self.suffix_len(attr));
                (self.select_replicas(replicas), SearchScope::Affix)
            }
            Predicate::Prefix(_) | Predicate::Suffix(_) | Predicate::Infix(_) => {
                (self.space.hash_for_infix(), SearchScope::Exact)
            }
            // the attribute's stored type is unknown here, so visit every
            // type's placement of the literal
            Predicate::NumericExact { value, .. } => {
                (self.space.hash_for_any_numeric(*value), SearchScope::Exact)
            }
            Predicate::NumericRange { lo, hi } => {
                let lo = lo.as_ref().map_or(f64::NEG_INFINITY, |b| b.value);
                let hi = hi.as_ref().map_or(f64::INFINITY, |b| b.value);
                (self.space.hash_for_any_numeric_range(lo, hi), SearchScope::Exact)
            }
        }
    }

    /// Scatter a query to its shards and union the replies
    pub async fn search(&self, pattern: &QueryPattern) -> IndexResult<SearchResult> {
        let (shards, scope) = self.search_plan(pattern);
        debug!(
            "Searching {} ({}) on shards {:?}",
            pattern,
            pattern.class(),
            shards
        );

        let query = ShardQuery {
            attribute: pattern.attribute().to_string(),
            predicate: pattern.predicate().clone(),
            scope,
        };
        let requests = shards
            .into_iter()
            .map(|shard| (shard, ShardRequest::Search(query.clone())))
            .collect();

        let mut ids = BTreeSet::new();
        let mut warnings = Vec::new();
        for (shard, result) in self.fan_out(requests).await {
            match result {
                Ok(ShardResponse::Objects(objects)) => ids.extend(objects),
                Ok(other) => {
                    warn!("Shard {shard} answered search with {other:?}");
                    warnings.push(IndexError::Unreachable(shard));
                }
                Err(e) => {
                    warn!("Shard {shard} failed search: {e}");
                    warnings.push(IndexError::Unreachable(shard));
                }
            }
        }
        warnings.sort_by_key(|w| match w {
            IndexError::Unreachable(shard) => *shard,
            _ => ShardId::MAX,
        });

        Ok(SearchResult {
            object_ids: ids.into_iter().collect(),
            warnings,
        })
    }

    /// Parse and run a single `attribute=value` query
    pub async fn search_str(&self, query: &str) -> IndexResult<SearchResult> {
        self.search(&QueryPattern::parse(query)?).await
    }

    /// Parse and run an AND / OR / NOT expression over queries
    ///
    /// `NOT` is only meaningful as a set difference inside `AND`.
    pub async fn search_expr(&self, expr: &str) -> IndexResult<SearchResult> {
        let expr = Expr::parse(expr)?;
        let (ids, warnings) = self.eval(&expr).await?;
        Ok(SearchResult {
            object_ids: ids.into_iter().collect(),
            warnings,
        })
    }

    fn eval<'a>(
        &'a self,
        expr: &'a Expr,
    ) -> BoxFuture<'a, IndexResult<(BTreeSet<ObjectId>, Vec<IndexError>)>> {
        async move {
            match expr {
                Expr::Factor(pattern) => {
                    let result = self.search(pattern).await?;
                    Ok((result.object_ids.into_iter().collect(), result.warnings))
                }
                Expr::Or(left, right) => {
                    if matches!(**left, Expr::Not(_)) || matches!(**right, Expr::Not(_)) {
                        return Err(IndexError::invalid_query("NOT cannot be an operand of OR"));
                    }
                    let ((mut ids, mut warnings), (other, more)) =
                        futures::try_join!(self.eval(left), self.eval(right))?;
                    ids.extend(other);
                    warnings.extend(more);
                    Ok((ids, warnings))
                }
                Expr::And(left, right) => match (&**left, &**right) {
                    (Expr::Not(_), Expr::Not(_)) => Err(IndexError::invalid_query(
                        "AND needs at least one positive operand",
                    )),
                    (positive, Expr::Not(negated)) | (Expr::Not(negated), positive) => {
                        let ((ids, mut warnings), (excluded, more)) =
                            futures::try_join!(self.eval(positive), self.eval(negated))?;
                        warnings.extend(more);
                        Ok((ids.difference(&excluded).copied().collect(), warnings))
                    }
                    _ => {
                        let ((ids, mut warnings), (other, more)) =
                            futures::try_join!(self.eval(left), self.eval(right))?;
                        warnings.extend(more);
                        Ok((ids.intersection(&other).copied().collect(), warnings))
                    }
                },
                Expr::Not(_) => Err(IndexError::invalid_query(
                    "NOT must be combined with AND",
                )),
            }
        }
        .boxed()
    }

    async fn fan_out(
        &self,
        requests: Vec<(ShardId, ShardRequest)>,
    ) -> Vec<(ShardId, Result<ShardResponse, TransportError>)> {
        let timeout = self.shard_timeout;
        let transport = &self.transport;
        stream::iter(requests.into_iter().map(|(shard, request)| async move {
            let result = match tokio::time::timeout(timeout, transport.send(shard, request)).await {
                Ok(result) => result,
                Err(_) => Err(TransportError::Timeout(shard)),
            };
            (shard, result)
        }))
        .buffer_unordered(MAX_CONCURRENT_REQUESTS)
        .collect()
        .await
    }

    fn affix_routable(&self, anchor: &str) -> bool {
        self.mode == IndexMode::Dart && anchor.len() >= self.affix_len
    }

    fn select_replicas(&self, replicas: Vec<ShardId>) -> Vec<ShardId> {
        match self.replica_selection {
            ReplicaSelection::All => replicas,
            ReplicaSelection::RoundRobin => {
                let turn = self.request_counter.fetch_add(1, Ordering::Relaxed);
                #[allow(clippy::cast_possible_truncation)]
                let pick = (turn % replicas.len() as u64) as usize;
                vec![replicas[pick]]
            }
        }
    }

    const fn prefix_len(&self, attr: &str) -> usize {
        attr.len() + 1 + self.affix_len
    }

    const fn suffix_len(&self, attr: &str) -> usize {
        self.affix_len + 1 + attr.len()
    }
}

fn exact_key(attr: &str, value: &str) -> String {
    format!("{attr}{KEY_SEPARATOR}{value}")
}

fn suffix_key(attr: &str, value: &str) -> String {
    format!("{value}{KEY_SEPARATOR}{attr}")
}
