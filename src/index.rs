//! Subscription index — boolean expressions in an A-Tree behind RCU snapshots
//!
//! Readers (worker threads) get an immutable `Arc<TreeSnapshot>` from a
//! single atomic load and may hold it for as long as their operation
//! needs; writers serialize under one mutex, rebuild the tree from the
//! full expression set, and atomically publish the replacement
//! snapshot. A published snapshot is never mutated.
//!
//! The tree structure depends on the global expression set, so every
//! expression-set change rebuilds from scratch. Rebuild cost is paid
//! on subscribe/unsubscribe only, never per message. Lease-only
//! changes publish no new snapshot.

use crate::config::AttributeDef;
use crate::error::{Result, SidecarError};
use crate::schema::tree_definitions;
use a_tree::ATree;
use arc_swap::ArcSwap;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// One subscription: an expression plus the clients leasing it
#[derive(Debug, Clone)]
pub struct SubscriptionRecord {
    pub id: u64,
    pub expression: String,
    /// Clients holding active leases; the record exists iff non-empty
    pub lease_holders: HashSet<String>,
}

/// Immutable bundle published to readers on every expression-set change
pub struct TreeSnapshot {
    /// Matching tree with every current subscription inserted at its id
    pub tree: ATree<u64>,

    /// subscription id → precomputed output subject ("{prefix}.{id}")
    pub output_subjects: HashMap<u64, String>,

    pub active_count: usize,
}

/// Writer-side state, protected by the index mutex
#[derive(Default)]
struct IndexState {
    next_id: u64,
    expr_to_id: HashMap<String, u64>,
    subscriptions: HashMap<u64, SubscriptionRecord>,
}

/// Thread-safe subscription index
///
/// Writes are serialized internally; reads are lock-free via
/// [`SubscriptionIndex::snapshot`].
pub struct SubscriptionIndex {
    attributes: Vec<AttributeDef>,
    output_prefix: String,
    snapshot: ArcSwap<TreeSnapshot>,
    state: Mutex<IndexState>,
}

impl SubscriptionIndex {
    /// Create an index with an initial empty snapshot
    pub fn new(attributes: Vec<AttributeDef>, output_prefix: impl Into<String>) -> Result<Self> {
        let output_prefix = output_prefix.into();
        let state = IndexState { next_id: 1, ..Default::default() };
        let empty = build_snapshot(&attributes, &output_prefix, &state)?;

        Ok(Self {
            attributes,
            output_prefix,
            snapshot: ArcSwap::from_pointee(empty),
            state: Mutex::new(state),
        })
    }

    fn state(&self) -> MutexGuard<'_, IndexState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register a lease on `expression` for `client_id`
    ///
    /// A known expression gains a lease holder and keeps its id with no
    /// snapshot rebuild. A new expression is validated by rebuilding
    /// the tree; on failure the tentative mappings are erased and
    /// [`SidecarError::InvalidExpression`] is returned. Ids burned by
    /// failed subscribes are never handed out again, so assigned id
    /// sequences may contain gaps.
    pub fn subscribe(&self, expression: &str, client_id: &str) -> Result<u64> {
        let mut state = self.state();

        if let Some(&id) = state.expr_to_id.get(expression) {
            if let Some(record) = state.subscriptions.get_mut(&id) {
                record.lease_holders.insert(client_id.to_string());
            }
            tracing::info!(id, expression, client = client_id, "Reusing subscription");
            return Ok(id);
        }

        let id = state.next_id;
        state.next_id += 1;

        let mut lease_holders = HashSet::new();
        lease_holders.insert(client_id.to_string());
        state.subscriptions.insert(
            id,
            SubscriptionRecord { id, expression: expression.to_string(), lease_holders },
        );
        state.expr_to_id.insert(expression.to_string(), id);

        match build_snapshot(&self.attributes, &self.output_prefix, &state) {
            Ok(snapshot) => {
                self.snapshot.store(Arc::new(snapshot));
                tracing::info!(id, expression, client = client_id, "New subscription");
                Ok(id)
            }
            Err(e) => {
                state.subscriptions.remove(&id);
                state.expr_to_id.remove(expression);
                Err(e)
            }
        }
    }

    /// Remove `client_id`'s lease from subscription `id`
    ///
    /// Returns true iff this call removed the last lease holder and
    /// therefore the subscription itself. Unknown ids and non-holder
    /// clients are no-ops returning false.
    pub fn remove_lease(&self, id: u64, client_id: &str) -> bool {
        let mut state = self.state();

        let Some(record) = state.subscriptions.get_mut(&id) else {
            return false;
        };

        record.lease_holders.remove(client_id);
        if !record.lease_holders.is_empty() {
            tracing::debug!(
                id,
                client = client_id,
                remaining = record.lease_holders.len(),
                "Lease released, subscription kept"
            );
            return false;
        }

        if let Some(record) = state.subscriptions.remove(&id) {
            state.expr_to_id.remove(&record.expression);
            tracing::info!(id, expression = %record.expression, "Subscription removed, no active leases");
        }
        self.republish(&state);
        true
    }

    /// Drop subscription `id` regardless of remaining lease holders
    pub fn remove_subscription(&self, id: u64) -> bool {
        let mut state = self.state();

        let Some(record) = state.subscriptions.remove(&id) else {
            return false;
        };
        state.expr_to_id.remove(&record.expression);
        tracing::info!(id, expression = %record.expression, "Subscription force-removed");
        self.republish(&state);
        true
    }

    /// Look up a subscription id by expression text
    pub fn find_by_expression(&self, expression: &str) -> Option<u64> {
        self.state().expr_to_id.get(expression).copied()
    }

    /// Look up a subscription record by id
    pub fn get_subscription(&self, id: u64) -> Option<SubscriptionRecord> {
        self.state().subscriptions.get(&id).cloned()
    }

    /// Current snapshot — one atomic load, no locks
    pub fn snapshot(&self) -> Arc<TreeSnapshot> {
        self.snapshot.load_full()
    }

    /// Number of active subscriptions in the published snapshot
    pub fn active_count(&self) -> usize {
        self.snapshot.load().active_count
    }

    /// Rebuild and publish after a removal. All remaining expressions
    /// were accepted before, so a failure here indicates a bug; the
    /// previous snapshot stays published in that case.
    fn republish(&self, state: &IndexState) {
        match build_snapshot(&self.attributes, &self.output_prefix, state) {
            Ok(snapshot) => self.snapshot.store(Arc::new(snapshot)),
            Err(e) => tracing::error!(error = %e, "Snapshot rebuild failed after removal"),
        }
    }
}

/// Build a fresh tree containing every current expression, plus the
/// precomputed output-subject map.
fn build_snapshot(
    attributes: &[AttributeDef],
    output_prefix: &str,
    state: &IndexState,
) -> Result<TreeSnapshot> {
    let mut tree = ATree::new(&tree_definitions(attributes))
        .map_err(|e| SidecarError::Config(format!("attribute definitions rejected: {}", e)))?;

    for (id, record) in &state.subscriptions {
        tree.insert(id, &record.expression)
            .map_err(|e| SidecarError::InvalidExpression(e.to_string()))?;
    }

    let output_subjects = state
        .subscriptions
        .keys()
        .map(|id| (*id, format!("{}.{}", output_prefix, id)))
        .collect();

    Ok(TreeSnapshot {
        tree,
        output_subjects,
        active_count: state.subscriptions.len(),
    })
}
