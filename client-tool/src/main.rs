//! # Fleet Client
//!
//! Submits one video to the fleet and collects the answer:
//! * Watches the heartbeat topic to find a live node (or takes one by id).
//! * Publishes a [VideoRequest] to that node's request inbox.
//! * Waits on the client topic for the best-scoring subclip and writes it
//!   to disk.
use base64::{Engine, engine::general_purpose::STANDARD};
use clap::Parser;
use clipseek_common::{CommonKafkaOpts, NodeId, Topics};
use clipseek_messages::{Envelope, Heartbeat, VideoRequest};
use miette::{Context, IntoDiagnostic};
use rdkafka::{
    consumer::StreamConsumer,
    message::Message,
    producer::{FutureProducer, FutureRecord},
    util::Timeout,
};
use std::{path::PathBuf, time::Duration};
use tracing::{debug, info, warn};
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

    /// Topic on which the final subclip is returned
    #[clap(long, default_value = "client")]
    client_topic: String,

    /// Path of the video to submit
    #[clap(long)]
    video: PathBuf,

    /// Index of the object class the fleet should count
    #[clap(long)]
    target: u32,

    /// Where to write the returned subclip
    #[clap(long, default_value = "clip.mp4")]
    output: PathBuf,

    /// Submit to this node instead of the first one heard on the
    /// heartbeat topic
    #[clap(long)]
    node: Option<NodeId>,

    /// Seconds to wait for a node to appear
    #[clap(long, default_value = "30")]
    discovery_timeout_secs: u64,

    /// Seconds to wait for the subclip before giving up
    #[clap(long, default_value = "120")]
    reply_timeout_secs: u64,
}

#[tokio::main]
async fn main() -> miette::Result<()> {
    let args = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let kafka_opts = &args.common_kafka_options;

    let consumer = clipseek_common::create_default_consumer(
        &kafka_opts.broker,
        &kafka_opts.username,
        &kafka_opts.password,
        &args.consumer_group,
        Some(&[args.heartbeat_topic.as_str(), args.client_topic.as_str()]),
    )
    .into_diagnostic()?;

    let producer: FutureProducer = clipseek_common::generate_kafka_client_config(
        &kafka_opts.broker,
        &kafka_opts.username,
        &kafka_opts.password,
    )
    .create()
    .into_diagnostic()?;

    let clip = std::fs::read(&args.video)
        .into_diagnostic()
        .wrap_err("Failed to read the input video")?;
    let request = VideoRequest::from_clip(&clip, args.target);

    let node = match args.node {
        Some(node) => node,
        None => tokio::time::timeout(
            Duration::from_secs(args.discovery_timeout_secs),
            first_heard_node(&consumer, &args.heartbeat_topic),
        )
        .await
        .into_diagnostic()
        .wrap_err("No node heartbeat heard in time")?,
    };

    let inbox = Topics::default().request_inbox(&node);
    info!("submitting {} bytes to node {node}", clip.len());
    producer
        .send(
            FutureRecord::to(&inbox)
                .payload(request.encode().as_bytes())
                .key("video-request"),
            Timeout::After(Duration::from_secs(5)),
        )
        .await
        .map_err(|(e, _)| e)
        .into_diagnostic()
        .wrap_err("Failed to submit the request")?;

    info!("awaiting the subclip on topic \"{}\"", args.client_topic);
    let subclip = tokio::time::timeout(
        Duration::from_secs(args.reply_timeout_secs),
        await_subclip(&consumer, &args.client_topic),
    )
    .await
    .into_diagnostic()
    .wrap_err("No subclip arrived in time")??;

    std::fs::write(&args.output, &subclip)
        .into_diagnostic()
        .wrap_err("Failed to write the subclip")?;
    info!(
        "wrote {} bytes of subclip to {}",
        subclip.len(),
        args.output.display()
    );
    Ok(())
}

/// Consumes until a well-formed heartbeat arrives and names its sender.
async fn first_heard_node(consumer: &StreamConsumer, heartbeat_topic: &str) -> NodeId {
    loop {
        match consumer.recv().await {
            Err(e) => warn!("Kafka error: {}", e),
            Ok(msg) => {
                if msg.topic() != heartbeat_topic {
                    continue;
                }
                if let Some(payload) = msg.payload() {
                    match Heartbeat::decode_bytes(payload) {
                        Ok(heartbeat) => return heartbeat.node,
                        Err(e) => debug!("skipping malformed heartbeat: {e}"),
                    }
                }
            }
        }
    }
}

/// Consumes until the subclip lands on the client topic.
async fn await_subclip(
    consumer: &StreamConsumer,
    client_topic: &str,
) -> miette::Result<Vec<u8>> {
    loop {
        match consumer.recv().await {
            Err(e) => warn!("Kafka error: {}", e),
            Ok(msg) => {
                if msg.topic() != client_topic {
                    continue;
                }
                let payload = msg.payload().unwrap_or_default();
                return STANDARD
                    .decode(payload)
                    .into_diagnostic()
                    .wrap_err("Reply is not valid base64");
            }
        }
    }
}
