//! Soft-state lease tracking via the JetStream KV bucket
//!
//! Lease keys have the form `{id}.{client_id}`; the value is
//! irrelevant (presence means "alive") and the TTL is enforced by the
//! KV bucket itself. Clients create and refresh their own keys — the
//! sidecar never writes to the bucket, it only watches for deletions
//! and purges and turns them into lease removals.

use crate::error::{Result, SidecarError};
use crate::index::SubscriptionIndex;
use async_nats::jetstream::kv::{Entry, Operation};
use futures::StreamExt;
use std::sync::Arc;
use tokio::task::JoinHandle;

/// Build the KV key for a subscription lease
pub fn make_lease_key(id: u64, client_id: &str) -> String {
    format!("{}.{}", id, client_id)
}

/// Parse a lease key back into `(subscription_id, client_id)`
///
/// The first dot separates the decimal id from the client id; both
/// sides must be non-empty and the prefix must be numeric.
pub fn parse_lease_key(key: &str) -> Option<(u64, &str)> {
    let (id_str, client_id) = key.split_once('.')?;
    if id_str.is_empty() || client_id.is_empty() {
        return None;
    }
    let id = id_str.parse::<u64>().ok()?;
    Some((id, client_id))
}

/// Watches the lease bucket and mirrors expirations into the index
pub struct LeaseTracker {
    bucket: String,
    index: Arc<SubscriptionIndex>,
}

impl LeaseTracker {
    pub fn new(bucket: impl Into<String>, index: Arc<SubscriptionIndex>) -> Self {
        Self { bucket: bucket.into(), index }
    }

    /// Establish the watch on all keys of the bucket and spawn the
    /// watch task. Errors here are reported to the caller; the engine
    /// treats them as non-fatal and continues without soft-state
    /// cleanup.
    pub async fn start(self, client: async_nats::Client) -> Result<JoinHandle<()>> {
        let jetstream = async_nats::jetstream::new(client);

        let store = jetstream.get_key_value(&self.bucket).await.map_err(|e| {
            SidecarError::KeyValue(format!("bucket '{}': {}", self.bucket, e))
        })?;

        let mut watch = store.watch(">").await.map_err(|e| {
            SidecarError::KeyValue(format!("watch on bucket '{}': {}", self.bucket, e))
        })?;

        tracing::info!(bucket = %self.bucket, "Watching lease bucket");

        Ok(tokio::spawn(async move {
            while let Some(entry) = watch.next().await {
                match entry {
                    Ok(entry) => self.on_entry(entry),
                    Err(e) => tracing::warn!(error = %e, "Lease watch error"),
                }
            }
            tracing::debug!(bucket = %self.bucket, "Lease watch stream ended");
        }))
    }

    fn on_entry(&self, entry: Entry) {
        match entry.operation {
            // Presence means alive; the KV enforces the TTL
            Operation::Put => {
                tracing::debug!(key = %entry.key, "Lease refreshed");
            }
            Operation::Delete | Operation::Purge => {
                let Some((id, client_id)) = parse_lease_key(&entry.key) else {
                    tracing::warn!(key = %entry.key, "Failed to parse lease key");
                    return;
                };

                tracing::info!(id, client = client_id, "Lease expired");
                if self.index.remove_lease(id, client_id) {
                    tracing::info!(id, "Subscription fully removed, no active leases");
                }
            }
        }
    }
}
