//! # Fleet Worker
//!
//! One node of the detection fleet:
//! * Connects to the Kafka broker and subscribes to the heartbeat and
//!   broadcast topics plus its own request and command inboxes.
//! * Publishes liveness heartbeats and tracks the rest of the fleet from
//!   theirs.
//! * Participates in reliable broadcast so the whole fleet agrees on the
//!   job payload and on every per-frame detection count.
//! * Becomes leader when a client submits to its request inbox: decodes
//!   the video, dispatches frames to free nodes, aggregates counts and
//!   returns the best-scoring subclip on the client topic.
//! * Runs detections on a blocking thread so heartbeats keep flowing.
//! * Exposes Prometheus metrics on the observability address.
use clap::Parser;
use clipseek_common::{
    CommonKafkaOpts, Topics, generate_node_id,
    metrics::{
        component_info_metric,
        names::{
            CLIPS_RETURNED, FAILURES, FRAMES_DISPATCHED, FRAMES_PROCESSED, MESSAGES_RECEIVED,
            VALUES_ACCEPTED,
        },
    },
};
use clipseek_media::{BlobDetector, FfmpegCodec};
use clipseek_worker::{
    bus::{KafkaBus, spawn_consumer_pump},
    node::{Node, NodeConfig},
    rb::RbMode,
};
use metrics::describe_counter;
use metrics_exporter_prometheus::PrometheusBuilder;
use miette::IntoDiagnostic;
use rdkafka::producer::FutureProducer;
use std::{net::SocketAddr, path::PathBuf, sync::Arc, time::Duration};
use tokio::signal::unix::{SignalKind, signal};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[clap(author, version, about)]
struct Cli {
    #[clap(flatten)]
    common_kafka_options: CommonKafkaOpts,

    /// Kafka consumer group
    #[clap(long = "group")]
    consumer_group: String,

    /// Topic on which all nodes publish liveness heartbeats
    #[clap(long, default_value = "heartbeat")]
    heartbeat_topic: String,

    /// Topic carrying reliable-broadcast traffic
    #[clap(long, default_value = "broadcast")]
    broadcast_topic: String,

    /// Topic on which the final subclip is returned to the client
    #[clap(long, default_value = "client")]
    client_topic: String,

    /// Heartbeat publish cadence in milliseconds
    #[clap(long, default_value = "100")]
    heartbeat_interval_ms: u64,

    /// Liveness snapshot swap cadence in milliseconds.
    /// A node silent for two swaps is no longer considered live.
    #[clap(long, default_value = "500")]
    snapshot_interval_ms: u64,

    /// Leader dispatch pass cadence in milliseconds
    #[clap(long, default_value = "10")]
    dispatch_interval_ms: u64,

    /// Path to the detector model parameters
    #[clap(long)]
    detector_model: PathBuf,

    /// Carry SHA-256 digests instead of full data in reliable-broadcast
    /// echo and ready messages
    #[clap(long)]
    use_hash_rb: bool,

    /// Endpoint on which Prometheus text format metrics are available
    #[clap(long, env, default_value = "127.0.0.1:9090")]
    observability_address: SocketAddr,
}

#[tokio::main]
async fn main() -> miette::Result<()> {
    let args = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let node_id = generate_node_id();
    info!("starting worker node {node_id}");

    let topics = Topics {
        heartbeat: args.heartbeat_topic,
        broadcast: args.broadcast_topic,
        client: args.client_topic,
    };

    let mut config = NodeConfig::new(node_id.clone(), topics);
    config.heartbeat_interval = Duration::from_millis(args.heartbeat_interval_ms);
    config.snapshot_interval = Duration::from_millis(args.snapshot_interval_ms);
    config.dispatch_interval = Duration::from_millis(args.dispatch_interval_ms);
    config.rb_mode = if args.use_hash_rb {
        RbMode::Hashed
    } else {
        RbMode::Plain
    };

    let detector = BlobDetector::from_model_file(&args.detector_model).into_diagnostic()?;

    let kafka_opts = &args.common_kafka_options;

    let producer: FutureProducer = clipseek_common::generate_kafka_client_config(
        &kafka_opts.broker,
        &kafka_opts.username,
        &kafka_opts.password,
    )
    .create()
    .into_diagnostic()?;

    let node = Node::new(
        config,
        Arc::new(KafkaBus::new(producer, node_id)),
        Arc::new(detector),
        Arc::new(FfmpegCodec),
    );

    let subscriptions = node.subscriptions();
    let subscriptions: Vec<&str> = subscriptions.iter().map(String::as_str).collect();
    let consumer = clipseek_common::create_default_consumer(
        &kafka_opts.broker,
        &kafka_opts.username,
        &kafka_opts.password,
        &args.consumer_group,
        Some(&subscriptions),
    )
    .into_diagnostic()?;

    // Install exporter and register metrics
    let builder = PrometheusBuilder::new();
    builder
        .with_http_listener(args.observability_address)
        .install()
        .into_diagnostic()?;

    describe_counter!(
        MESSAGES_RECEIVED,
        metrics::Unit::Count,
        "Number of messages received"
    );
    describe_counter!(
        FAILURES,
        metrics::Unit::Count,
        "Number of failures encountered"
    );
    describe_counter!(
        FRAMES_DISPATCHED,
        metrics::Unit::Count,
        "Number of frame assignments sent by the leader"
    );
    describe_counter!(
        FRAMES_PROCESSED,
        metrics::Unit::Count,
        "Number of frames run through the detector on this node"
    );
    describe_counter!(
        VALUES_ACCEPTED,
        metrics::Unit::Count,
        "Number of values accepted through reliable broadcast"
    );
    describe_counter!(
        CLIPS_RETURNED,
        metrics::Unit::Count,
        "Number of subclips returned to clients"
    );

    component_info_metric("worker");

    let (inbound, pump_handle) = spawn_consumer_pump(consumer);

    // Is used to await any sigint signals
    let mut sigint = signal(SignalKind::interrupt()).into_diagnostic()?;

    tokio::select! {
        _ = node.run(inbound) => {}
        _ = sigint.recv() => info!("interrupted; shutting down"),
    }

    pump_handle.abort();
    Ok(())
}
