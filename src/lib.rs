//! # nats-sifter
//!
//! Content-based filtering sidecar for NATS.
//!
//! ## Overview
//!
//! Binary-encoded messages arrive on a single input subject. Each one
//! is evaluated against a set of boolean subscription expressions
//! indexed in an A-Tree, and the raw payload is republished,
//! byte-identical, on `{output_prefix}.{id}` for every matching
//! subscription.
//!
//! Clients manage subscriptions over two JSON request/reply subjects
//! and keep them alive through TTL'd keys in a NATS KV bucket: a key
//! expiring is an implicit unsubscribe.
//!
//! ## Architecture
//!
//! - **[`SubscriptionIndex`]** — expressions and lease holders behind
//!   RCU snapshots: readers take one atomic load, writers rebuild and
//!   atomically publish an immutable [`TreeSnapshot`].
//! - **[`WorkerPool`]** — OS threads that dequeue payloads, match
//!   them against the current snapshot, and hand matches off to the
//!   I/O side. Workers never touch the broker.
//! - **[`Engine`]** — wires broker subscriptions, the control plane,
//!   the publisher task, and the stats loop onto a single-threaded
//!   runtime.
//! - **[`LeaseTracker`]** — watches the KV bucket and turns TTL
//!   expirations into lease removals.

pub mod config;
pub mod engine;
pub mod error;
pub mod extractor;
pub mod index;
pub mod lease;
pub mod queue;
pub mod reader;
pub mod schema;
pub mod worker;

// Re-export core types
pub use config::{AttributeDef, AttributeKind, Config, WireFormat};
pub use engine::Engine;
pub use error::{Result, SidecarError};
pub use extractor::{match_payload, ExtractError};
pub use index::{SubscriptionIndex, SubscriptionRecord, TreeSnapshot};
pub use lease::{make_lease_key, parse_lease_key, LeaseTracker};
pub use queue::WorkQueue;
pub use reader::ValueReader;
pub use schema::{tree_definitions, AttributeSchema};
pub use worker::{Counters, CountersSnapshot, PublishJob, WorkerPool};
