//! Sidecar engine — wires the index, workers, and lease tracker to NATS
//!
//! All broker I/O runs on the single-threaded runtime: the input and
//! control subscriptions, the control-plane replies, the publisher
//! task that fans matched payloads out to per-subscription subjects,
//! and the periodic stats line. Worker threads talk to the engine only
//! through the work queue (inbound) and the publish channel
//! (outbound).

use crate::config::Config;
use crate::error::{Result, SidecarError};
use crate::index::SubscriptionIndex;
use crate::lease::{self, LeaseTracker};
use crate::queue::WorkQueue;
use crate::schema::AttributeSchema;
use crate::worker::{Counters, PublishJob, WorkerPool};
use async_nats::{Client, Subject, Subscriber};
use futures::StreamExt;
use serde::Deserialize;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

#[derive(Debug, Deserialize)]
struct SubscribeRequest {
    expression: String,
    client_id: String,
}

#[derive(Debug, Deserialize)]
struct UnsubscribeRequest {
    id: u64,
    client_id: String,
}

/// The running sidecar: subscriptions, worker pool, publisher, stats
pub struct Engine {
    config: Config,
    client: Client,
    index: Arc<SubscriptionIndex>,
    schema: Arc<AttributeSchema>,
    counters: Arc<Counters>,
    pool: Option<WorkerPool>,
    tasks: Vec<JoinHandle<()>>,
    publisher: Option<JoinHandle<()>>,
}

impl Engine {
    /// Build the engine from a finalized config and a connected client
    pub fn new(config: Config, client: Client) -> Result<Self> {
        let index = Arc::new(SubscriptionIndex::new(
            config.attributes.clone(),
            config.output_prefix.clone(),
        )?);
        let schema = Arc::new(AttributeSchema::new(&config.attributes));

        Ok(Self {
            config,
            client,
            index,
            schema,
            counters: Arc::new(Counters::default()),
            pool: None,
            tasks: Vec::new(),
            publisher: None,
        })
    }

    pub fn index(&self) -> &Arc<SubscriptionIndex> {
        &self.index
    }

    pub fn counters(&self) -> &Arc<Counters> {
        &self.counters
    }

    /// Subscribe to all subjects and launch every task and the worker
    /// pool. Broker subscribe failures here are fatal; a lease-watch
    /// failure is a warning and the engine runs without soft-state
    /// cleanup.
    pub async fn start(&mut self) -> Result<()> {
        let input_sub = match &self.config.input_queue_group {
            Some(group) => {
                self.client
                    .queue_subscribe(self.config.input_subject.clone(), group.clone())
                    .await
            }
            None => self.client.subscribe(self.config.input_subject.clone()).await,
        }
        .map_err(|e| SidecarError::Subscribe {
            subject: self.config.input_subject.clone(),
            reason: e.to_string(),
        })?;
        tracing::info!(subject = %self.config.input_subject, "Subscribed to input subject");

        let subscribe_sub = self
            .client
            .subscribe(self.config.subscribe_subject.clone())
            .await
            .map_err(|e| SidecarError::Subscribe {
                subject: self.config.subscribe_subject.clone(),
                reason: e.to_string(),
            })?;
        tracing::info!(subject = %self.config.subscribe_subject, "Listening for subscription requests");

        let unsubscribe_sub = self
            .client
            .subscribe(self.config.unsubscribe_subject.clone())
            .await
            .map_err(|e| SidecarError::Subscribe {
                subject: self.config.unsubscribe_subject.clone(),
                reason: e.to_string(),
            })?;
        tracing::info!(subject = %self.config.unsubscribe_subject, "Listening for unsubscribe requests");

        let tracker = LeaseTracker::new(&self.config.lease_bucket, Arc::clone(&self.index));
        match tracker.start(self.client.clone()).await {
            Ok(handle) => self.tasks.push(handle),
            Err(e) => {
                tracing::warn!(error = %e, "Lease tracker failed to start, soft-state cleanup disabled");
            }
        }

        let (publish_tx, publish_rx) = mpsc::unbounded_channel();
        self.publisher = Some(tokio::spawn(publisher_loop(
            self.client.clone(),
            publish_rx,
            Arc::clone(&self.counters),
        )));

        let mut pool = WorkerPool::new(
            self.config.format,
            self.config.effective_worker_threads(),
            Arc::clone(&self.schema),
            Arc::clone(&self.index),
            Arc::clone(&self.counters),
            publish_tx,
        );
        pool.start();

        self.tasks.push(tokio::spawn(data_loop(
            input_sub,
            pool.queue(),
            Arc::clone(&self.counters),
        )));
        self.tasks.push(tokio::spawn(subscribe_control_loop(
            self.client.clone(),
            subscribe_sub,
            Arc::clone(&self.index),
            self.config.clone(),
        )));
        self.tasks.push(tokio::spawn(unsubscribe_control_loop(
            self.client.clone(),
            unsubscribe_sub,
            Arc::clone(&self.index),
        )));
        self.tasks.push(tokio::spawn(stats_loop(
            Arc::clone(&self.counters),
            Arc::clone(&self.index),
            pool.queue(),
            self.config.stats_interval_seconds,
        )));

        self.pool = Some(pool);

        tracing::info!(
            format = %self.config.format,
            attributes = self.schema.len(),
            output = %format!("{}.<id>", self.config.output_prefix),
            "Sidecar engine started"
        );
        Ok(())
    }

    /// Abort the listener and stats tasks so no new broker callbacks
    /// fire. Idempotent.
    pub fn stop_io(&mut self) {
        for task in self.tasks.drain(..) {
            task.abort();
        }
    }

    /// Stop and join the worker pool. Dropping the pool also drops the
    /// workers' publish senders, which lets the publisher task drain to
    /// completion. Idempotent.
    pub fn stop_workers(&mut self) {
        if let Some(mut pool) = self.pool.take() {
            pool.stop();
        }
    }

    /// Await the publisher task until every handed-off job has been
    /// published. Call after [`Engine::stop_workers`].
    pub async fn flush(&mut self) {
        if let Some(publisher) = self.publisher.take() {
            if let Err(e) = publisher.await {
                if !e.is_cancelled() {
                    tracing::error!(error = %e, "Publisher task failed");
                }
            }
        }
    }
}

/// Copy each input payload into an owned buffer and enqueue it
async fn data_loop(mut input: Subscriber, queue: WorkQueue, counters: Arc<Counters>) {
    while let Some(message) = input.next().await {
        counters.received.fetch_add(1, Ordering::Relaxed);

        // The empty buffer is reserved as the worker poison pill
        if message.payload.is_empty() {
            continue;
        }
        queue.enqueue(message.payload.to_vec());
    }
}

/// Fan matched payloads out to their per-subscription subjects
///
/// Runs until the publish channel closes and is drained; the subjects
/// come from the snapshot captured at match time, so a concurrent
/// index change never redirects an in-flight job.
async fn publisher_loop(
    client: Client,
    mut jobs: mpsc::UnboundedReceiver<PublishJob>,
    counters: Arc<Counters>,
) {
    while let Some(job) = jobs.recv().await {
        for id in &job.ids {
            let Some(subject) = job.snapshot.output_subjects.get(id) else {
                continue;
            };
            match client.publish(subject.clone(), job.payload.clone()).await {
                Ok(()) => {
                    counters.published.fetch_add(1, Ordering::Relaxed);
                }
                Err(e) => {
                    counters.publish_errors.fetch_add(1, Ordering::Relaxed);
                    tracing::warn!(subject = %subject, error = %e, "Failed to publish matched message");
                }
            }
        }
    }
    tracing::debug!("Publisher drained");
}

async fn subscribe_control_loop(
    client: Client,
    mut requests: Subscriber,
    index: Arc<SubscriptionIndex>,
    config: Config,
) {
    while let Some(message) = requests.next().await {
        let Some(reply) = message.reply else {
            tracing::warn!("Subscribe request without reply subject, ignoring");
            continue;
        };
        let body = handle_subscribe_request(&index, &config, &message.payload);
        respond(&client, reply, body).await;
    }
}

async fn unsubscribe_control_loop(
    client: Client,
    mut requests: Subscriber,
    index: Arc<SubscriptionIndex>,
) {
    while let Some(message) = requests.next().await {
        let body = handle_unsubscribe_request(&index, &message.payload);
        if let Some(reply) = message.reply {
            respond(&client, reply, body).await;
        }
    }
}

fn handle_subscribe_request(
    index: &SubscriptionIndex,
    config: &Config,
    payload: &[u8],
) -> serde_json::Value {
    let request: SubscribeRequest = match serde_json::from_slice(payload) {
        Ok(request) => request,
        Err(e) => return error_reply(format!("Bad request: {}", e)),
    };

    match index.subscribe(&request.expression, &request.client_id) {
        Ok(id) => serde_json::json!({
            "id": id,
            "topic": format!("{}.{}", config.output_prefix, id),
            "lease_bucket": config.lease_bucket,
            "lease_key": lease::make_lease_key(id, &request.client_id),
            "lease_ttl_seconds": config.lease_ttl_seconds,
        }),
        Err(e) => error_reply(e.to_string()),
    }
}

fn handle_unsubscribe_request(index: &SubscriptionIndex, payload: &[u8]) -> serde_json::Value {
    let request: UnsubscribeRequest = match serde_json::from_slice(payload) {
        Ok(request) => request,
        Err(e) => return error_reply(format!("Bad request: {}", e)),
    };

    let removed = index.remove_lease(request.id, &request.client_id);
    serde_json::json!({ "id": request.id, "removed": removed })
}

fn error_reply(message: String) -> serde_json::Value {
    serde_json::json!({ "error": message })
}

async fn respond(client: &Client, subject: Subject, body: serde_json::Value) {
    match serde_json::to_vec(&body) {
        Ok(bytes) => {
            if let Err(e) = client.publish(subject, bytes.into()).await {
                tracing::error!(error = %e, "Failed to publish control reply");
            }
        }
        Err(e) => tracing::error!(error = %e, "Failed to encode control reply"),
    }
}

async fn stats_loop(
    counters: Arc<Counters>,
    index: Arc<SubscriptionIndex>,
    queue: WorkQueue,
    interval_seconds: u64,
) {
    let mut ticker = tokio::time::interval(Duration::from_secs(interval_seconds.max(1)));
    // the first tick fires immediately; skip it
    ticker.tick().await;

    loop {
        ticker.tick().await;
        let c = counters.snapshot();
        tracing::info!(
            received = c.received,
            processed = c.processed,
            matched = c.matched,
            published = c.published,
            failures = c.match_failures,
            publish_errors = c.publish_errors,
            subscriptions = index.active_count(),
            queue_depth = queue.depth(),
            "stats"
        );
    }
}
