use clap::Parser;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

use nats_sifter::{AttributeDef, Config, Engine, Result, SidecarError};

/// Content-based filtering sidecar for NATS
#[derive(Parser, Debug)]
#[command(name = "nats-sifter", version, about, long_about = None)]
struct Args {
    /// Path to YAML config file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// NATS server address
    #[arg(short, long)]
    address: Option<String>,

    /// NATS server port
    #[arg(short, long)]
    port: Option<u16>,

    /// Input NATS subject
    #[arg(short, long)]
    input_subject: Option<String>,

    /// Input wire format (msgpack|cbor|flexbuffers|json)
    #[arg(short, long)]
    format: Option<String>,

    /// Output subject prefix (defaults to the input subject)
    #[arg(long)]
    output_prefix: Option<String>,

    /// Input queue group for load balancing across sidecars
    #[arg(long)]
    queue_group: Option<String>,

    /// Subscription request subject
    #[arg(long)]
    subscribe_subject: Option<String>,

    /// Unsubscription request subject
    #[arg(long)]
    unsubscribe_subject: Option<String>,

    /// NATS KV lease bucket name
    #[arg(long)]
    lease_bucket: Option<String>,

    /// Lease TTL in seconds
    #[arg(long)]
    lease_ttl: Option<u32>,

    /// Lease check interval in seconds
    #[arg(long)]
    lease_check_interval: Option<u32>,

    /// Attribute as name:kind (repeatable)
    #[arg(long = "attr", value_name = "NAME:KIND")]
    attrs: Vec<String>,

    /// Worker thread count (0 = hardware concurrency)
    #[arg(long)]
    workers: Option<usize>,

    /// TLS certificate path
    #[arg(long)]
    tls_cert: Option<PathBuf>,

    /// TLS key path
    #[arg(long)]
    tls_key: Option<PathBuf>,

    /// TLS CA certificate path
    #[arg(long)]
    tls_ca: Option<PathBuf>,

    /// Stats log interval in seconds
    #[arg(long)]
    stats_interval: Option<u64>,

    /// Log level (debug|info|warn|error)
    #[arg(long)]
    log_level: Option<String>,

    /// Enable debug logging
    #[arg(short, long)]
    verbose: bool,
}

/// Merge the YAML config (or defaults) with CLI overrides
fn build_config(args: &Args) -> Result<Config> {
    let mut config = match &args.config {
        Some(path) => Config::from_file(path)?,
        None => Config::default(),
    };

    if let Some(address) = &args.address {
        config.nats_address = address.clone();
    }
    if let Some(port) = args.port {
        config.nats_port = port;
    }
    if let Some(subject) = &args.input_subject {
        config.input_subject = subject.clone();
    }
    if let Some(format) = &args.format {
        config.format = format.parse()?;
    }
    if let Some(prefix) = &args.output_prefix {
        config.output_prefix = prefix.clone();
    }
    if let Some(group) = &args.queue_group {
        config.input_queue_group = Some(group.clone());
    }
    if let Some(subject) = &args.subscribe_subject {
        config.subscribe_subject = subject.clone();
    }
    if let Some(subject) = &args.unsubscribe_subject {
        config.unsubscribe_subject = subject.clone();
    }
    if let Some(bucket) = &args.lease_bucket {
        config.lease_bucket = bucket.clone();
    }
    if let Some(ttl) = args.lease_ttl {
        config.lease_ttl_seconds = ttl;
    }
    if let Some(interval) = args.lease_check_interval {
        config.lease_check_interval_seconds = interval;
    }
    if let Some(workers) = args.workers {
        config.worker_threads = workers;
    }
    if let Some(cert) = &args.tls_cert {
        config.tls_cert = Some(cert.clone());
    }
    if let Some(key) = &args.tls_key {
        config.tls_key = Some(key.clone());
    }
    if let Some(ca) = &args.tls_ca {
        config.tls_ca = Some(ca.clone());
    }
    if let Some(interval) = args.stats_interval {
        config.stats_interval_seconds = interval;
    }
    if let Some(level) = &args.log_level {
        config.log_level = level.clone();
    }
    if args.verbose {
        config.log_level = "debug".to_string();
    }

    for raw in &args.attrs {
        config.attributes.push(AttributeDef::parse_pair(raw)?);
    }

    config.finalize()?;
    Ok(config)
}

async fn connect(config: &Config) -> Result<async_nats::Client> {
    let mut options = async_nats::ConnectOptions::new();

    if let (Some(cert), Some(key)) = (&config.tls_cert, &config.tls_key) {
        options = options
            .add_client_certificate(cert.clone(), key.clone())
            .require_tls(true);
    }
    if let Some(ca) = &config.tls_ca {
        options = options.add_root_certificates(ca.clone());
    }

    options
        .connect(config.server_url())
        .await
        .map_err(|e| SidecarError::Connection(format!("{}: {}", config.server_url(), e)))
}

async fn start(config: Config) -> Result<Engine> {
    let client = connect(&config).await?;
    tracing::info!(url = %config.server_url(), "Connected to NATS");

    let mut engine = Engine::new(config, client)?;
    engine.start().await?;
    Ok(engine)
}

async fn wait_for_shutdown() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        match signal(SignalKind::terminate()) {
            Ok(mut terminate) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {}
                    _ = terminate.recv() => {}
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, "Failed to install SIGTERM handler");
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }

    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}

fn main() -> ExitCode {
    let args = Args::parse();

    let config = match build_config(&args) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("error: {}", e);
            return ExitCode::FAILURE;
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&config.log_level)),
        )
        .init();

    tracing::info!(
        server = %config.server_url(),
        input = %config.input_subject,
        format = %config.format,
        output = %format!("{}.<id>", config.output_prefix),
        attributes = config.attributes.len(),
        workers = config.effective_worker_threads(),
        lease_bucket = %config.lease_bucket,
        lease_ttl = config.lease_ttl_seconds,
        "nats-sifter starting"
    );

    // Single-threaded I/O loop: all broker callbacks, control-plane
    // replies, and publishes run on this one thread. Matching runs on
    // the worker pool's own OS threads.
    let runtime = match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            tracing::error!(error = %e, "Failed to build runtime");
            return ExitCode::FAILURE;
        }
    };

    let mut engine = match runtime.block_on(start(config)) {
        Ok(engine) => engine,
        Err(e) => {
            tracing::error!(error = %e, "Startup failed");
            return ExitCode::FAILURE;
        }
    };

    runtime.block_on(wait_for_shutdown());
    tracing::info!("Shutting down");

    // 1. No new broker callbacks, 2. drain and join the workers,
    // 3. flush publish jobs the workers handed off while stopping.
    engine.stop_io();
    engine.stop_workers();
    runtime.block_on(engine.flush());

    tracing::info!("nats-sifter stopped");
    ExitCode::SUCCESS
}
