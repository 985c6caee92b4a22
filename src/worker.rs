//! Worker pool — parallel matching over snapshot reads
//!
//! N OS threads dequeue payloads, match them against the current tree
//! snapshot, and hand matches off to the I/O side for publishing.
//! Workers never touch the broker client: each match becomes a
//! [`PublishJob`] on the hand-off channel, carrying the payload, the
//! matched ids, and the snapshot the match was computed against so the
//! output subjects stay consistent even if the index changes before
//! the publish happens.

use crate::config::WireFormat;
use crate::extractor::match_payload;
use crate::index::{SubscriptionIndex, TreeSnapshot};
use crate::queue::WorkQueue;
use crate::schema::AttributeSchema;
use bytes::Bytes;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tokio::sync::mpsc::UnboundedSender;

/// Dequeue timeout, short enough to observe shutdown promptly
const DEQUEUE_TIMEOUT: Duration = Duration::from_millis(100);

/// Aggregate message counters, updated with relaxed ordering
#[derive(Debug, Default)]
pub struct Counters {
    pub received: AtomicU64,
    pub processed: AtomicU64,
    pub matched: AtomicU64,
    pub published: AtomicU64,
    pub match_failures: AtomicU64,
    pub publish_errors: AtomicU64,
}

impl Counters {
    pub fn snapshot(&self) -> CountersSnapshot {
        CountersSnapshot {
            received: self.received.load(Ordering::Relaxed),
            processed: self.processed.load(Ordering::Relaxed),
            matched: self.matched.load(Ordering::Relaxed),
            published: self.published.load(Ordering::Relaxed),
            match_failures: self.match_failures.load(Ordering::Relaxed),
            publish_errors: self.publish_errors.load(Ordering::Relaxed),
        }
    }
}

/// Plain-value view of [`Counters`] for logging and tests
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CountersSnapshot {
    pub received: u64,
    pub processed: u64,
    pub matched: u64,
    pub published: u64,
    pub match_failures: u64,
    pub publish_errors: u64,
}

/// One matched message handed off to the I/O side
pub struct PublishJob {
    /// The raw input payload, republished byte-identical
    pub payload: Bytes,

    /// Matched subscription ids
    pub ids: Vec<u64>,

    /// The snapshot the match was computed against; keeps the output
    /// subjects alive until the final publish of this job
    pub snapshot: Arc<TreeSnapshot>,
}

/// Shared per-worker context
struct WorkerContext {
    format: WireFormat,
    schema: Arc<AttributeSchema>,
    index: Arc<SubscriptionIndex>,
    counters: Arc<Counters>,
    publish_tx: UnboundedSender<PublishJob>,
}

/// Pool of matching threads fed from the work queue
pub struct WorkerPool {
    queue: WorkQueue,
    running: Arc<AtomicBool>,
    threads: Vec<thread::JoinHandle<()>>,
    thread_count: usize,
    context: Arc<WorkerContext>,
}

impl WorkerPool {
    pub fn new(
        format: WireFormat,
        thread_count: usize,
        schema: Arc<AttributeSchema>,
        index: Arc<SubscriptionIndex>,
        counters: Arc<Counters>,
        publish_tx: UnboundedSender<PublishJob>,
    ) -> Self {
        Self {
            queue: WorkQueue::new(),
            running: Arc::new(AtomicBool::new(false)),
            threads: Vec::new(),
            thread_count: thread_count.max(1),
            context: Arc::new(WorkerContext {
                format,
                schema,
                index,
                counters,
                publish_tx,
            }),
        }
    }

    /// Cloneable enqueue/depth handle for the I/O side
    pub fn queue(&self) -> WorkQueue {
        self.queue.clone()
    }

    /// Approximate queue depth, for stats
    pub fn queue_depth(&self) -> usize {
        self.queue.depth()
    }

    /// Launch the worker threads. Idempotent.
    pub fn start(&mut self) {
        if self.running.swap(true, Ordering::SeqCst) {
            return;
        }

        self.threads.reserve(self.thread_count);
        for worker_id in 0..self.thread_count {
            let context = Arc::clone(&self.context);
            let queue = self.queue.clone();
            let running = Arc::clone(&self.running);
            self.threads.push(thread::spawn(move || {
                worker_loop(worker_id, context, queue, running);
            }));
        }
        tracing::info!(threads = self.thread_count, "Worker pool started");
    }

    /// Signal workers to stop, drain the queue, and join. Idempotent.
    pub fn stop(&mut self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }

        // One poison pill per thread; workers blocked in the dequeue
        // wake on a pill, the rest observe the flag on timeout.
        for _ in 0..self.thread_count {
            self.queue.enqueue(Vec::new());
        }

        for handle in self.threads.drain(..) {
            if let Err(e) = handle.join() {
                tracing::error!(?e, "Worker thread panicked");
            }
        }
        tracing::info!("Worker pool stopped");
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.stop();
    }
}

fn worker_loop(
    worker_id: usize,
    context: Arc<WorkerContext>,
    queue: WorkQueue,
    running: Arc<AtomicBool>,
) {
    tracing::debug!(worker_id, "Worker started");

    loop {
        let Some(payload) = queue.dequeue_timed(DEQUEUE_TIMEOUT) else {
            if !running.load(Ordering::Relaxed) {
                break;
            }
            continue;
        };

        // Empty payload is the poison pill
        if payload.is_empty() {
            break;
        }

        // Items dequeued after stop are discarded, not processed
        if !running.load(Ordering::Relaxed) {
            continue;
        }

        let snapshot = context.index.snapshot();
        context.counters.processed.fetch_add(1, Ordering::Relaxed);

        match match_payload(&snapshot.tree, &context.schema, context.format, &payload) {
            Err(e) => {
                context.counters.match_failures.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(worker_id, error = %e, "Message failed extraction");
            }
            Ok(ids) if ids.is_empty() => {}
            Ok(ids) => {
                context.counters.matched.fetch_add(1, Ordering::Relaxed);
                let job = PublishJob {
                    payload: Bytes::from(payload),
                    ids,
                    snapshot,
                };
                if context.publish_tx.send(job).is_err() {
                    tracing::debug!(worker_id, "Publish channel closed, dropping match");
                }
            }
        }
    }

    tracing::debug!(worker_id, "Worker stopped");
}
