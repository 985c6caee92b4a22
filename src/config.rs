//! Sidecar configuration
//!
//! The config record is deserialized from a YAML file and then
//! overridden field-by-field from the command line. Validation runs
//! after the merge so required fields can come from either source.

use crate::error::{Result, SidecarError};
use serde::Deserialize;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Attribute kinds understood by the matching tree
///
/// This is the closed set of kinds an attribute can have; the event
/// extractor dispatches on it when reading message fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttributeKind {
    #[serde(alias = "bool")]
    Boolean,
    #[serde(alias = "int")]
    Integer,
    #[serde(alias = "double")]
    Float,
    #[serde(alias = "str")]
    String,
    StringList,
    #[serde(alias = "int_list")]
    IntegerList,
}

impl FromStr for AttributeKind {
    type Err = SidecarError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "boolean" | "bool" => Ok(AttributeKind::Boolean),
            "integer" | "int" => Ok(AttributeKind::Integer),
            "float" | "double" => Ok(AttributeKind::Float),
            "string" | "str" => Ok(AttributeKind::String),
            "string_list" => Ok(AttributeKind::StringList),
            "integer_list" | "int_list" => Ok(AttributeKind::IntegerList),
            other => Err(SidecarError::Config(format!(
                "invalid attribute kind '{}'",
                other
            ))),
        }
    }
}

/// A single (name, kind) attribute declaration
#[derive(Debug, Clone, Deserialize)]
pub struct AttributeDef {
    pub name: String,
    #[serde(rename = "type", alias = "kind")]
    pub kind: AttributeKind,
}

impl AttributeDef {
    pub fn new(name: impl Into<String>, kind: AttributeKind) -> Self {
        Self { name: name.into(), kind }
    }

    /// Parse a `name:kind` pair as accepted by the `--attr` flag
    pub fn parse_pair(raw: &str) -> Result<Self> {
        let (name, kind) = raw.split_once(':').ok_or_else(|| {
            SidecarError::Config(format!("invalid --attr '{}': expected name:kind", raw))
        })?;
        if name.is_empty() {
            return Err(SidecarError::Config(format!(
                "invalid --attr '{}': empty attribute name",
                raw
            )));
        }
        Ok(Self::new(name, kind.parse()?))
    }
}

/// Wire formats supported for input messages
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WireFormat {
    #[default]
    Msgpack,
    Cbor,
    Flexbuffers,
    Json,
}

impl FromStr for WireFormat {
    type Err = SidecarError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "msgpack" => Ok(WireFormat::Msgpack),
            "cbor" => Ok(WireFormat::Cbor),
            "flexbuffers" => Ok(WireFormat::Flexbuffers),
            "json" => Ok(WireFormat::Json),
            other => Err(SidecarError::Config(format!("invalid format '{}'", other))),
        }
    }
}

impl fmt::Display for WireFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            WireFormat::Msgpack => "msgpack",
            WireFormat::Cbor => "cbor",
            WireFormat::Flexbuffers => "flexbuffers",
            WireFormat::Json => "json",
        };
        f.write_str(name)
    }
}

/// Sidecar configuration record
///
/// Every field has a default except `input_subject` and `attributes`,
/// which must be supplied via the config file or the command line.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// NATS server address
    pub nats_address: String,

    /// NATS server port
    pub nats_port: u16,

    /// TLS client certificate path (enables TLS when set)
    pub tls_cert: Option<PathBuf>,

    /// TLS client key path
    pub tls_key: Option<PathBuf>,

    /// TLS CA certificate path
    pub tls_ca: Option<PathBuf>,

    /// Core NATS subject carrying binary input messages (required)
    pub input_subject: String,

    /// Input message wire format
    pub format: WireFormat,

    /// Optional queue group for load balancing across sidecar instances
    pub input_queue_group: Option<String>,

    /// Matched messages are republished to `{output_prefix}.{id}`.
    /// Defaults to `input_subject` when empty.
    pub output_prefix: String,

    /// Subject for subscription requests (request/reply)
    pub subscribe_subject: String,

    /// Subject for unsubscription requests
    pub unsubscribe_subject: String,

    /// JetStream KV bucket holding soft-state leases
    pub lease_bucket: String,

    /// Lease TTL advertised to clients in subscribe replies
    pub lease_ttl_seconds: u32,

    /// Advisory refresh interval advertised alongside the TTL
    pub lease_check_interval_seconds: u32,

    /// Matching-tree attribute declarations (required, ordered)
    pub attributes: Vec<AttributeDef>,

    /// Interval between stats log lines
    pub stats_interval_seconds: u64,

    /// Log level filter (debug|info|warn|error)
    pub log_level: String,

    /// Worker thread count (0 = hardware concurrency)
    pub worker_threads: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            nats_address: "127.0.0.1".to_string(),
            nats_port: 4222,
            tls_cert: None,
            tls_key: None,
            tls_ca: None,
            input_subject: String::new(),
            format: WireFormat::Msgpack,
            input_queue_group: None,
            output_prefix: String::new(),
            subscribe_subject: "sidecar.subscribe".to_string(),
            unsubscribe_subject: "sidecar.unsubscribe".to_string(),
            lease_bucket: "sidecar-leases".to_string(),
            lease_ttl_seconds: 3600,
            lease_check_interval_seconds: 60,
            attributes: Vec::new(),
            stats_interval_seconds: 10,
            log_level: "info".to_string(),
            worker_threads: 0,
        }
    }
}

impl Config {
    /// Load a config record from a YAML file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)?;
        serde_yaml::from_str(&raw).map_err(|e| {
            SidecarError::Config(format!("failed to parse {}: {}", path.display(), e))
        })
    }

    /// Apply the `output_prefix` default and check required fields
    pub fn finalize(&mut self) -> Result<()> {
        if self.output_prefix.is_empty() {
            self.output_prefix = self.input_subject.clone();
        }

        if self.input_subject.is_empty() {
            return Err(SidecarError::Config(
                "input_subject is required (config file or --input-subject)".to_string(),
            ));
        }
        if self.attributes.is_empty() {
            return Err(SidecarError::Config(
                "at least one attribute is required (config file or --attr)".to_string(),
            ));
        }

        Ok(())
    }

    /// Full NATS server URL
    pub fn server_url(&self) -> String {
        format!("nats://{}:{}", self.nats_address, self.nats_port)
    }

    /// Worker thread count with the hardware-concurrency fallback applied
    pub fn effective_worker_threads(&self) -> usize {
        if self.worker_threads > 0 {
            self.worker_threads
        } else {
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1)
                .max(1)
        }
    }
}
