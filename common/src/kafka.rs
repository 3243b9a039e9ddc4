//! Kafka client construction shared by every fleet binary.
use clap::Args;
use rdkafka::{
    ClientConfig,
    consumer::{Consumer, StreamConsumer},
    error::KafkaError,
};

/// [clap] option group for the broker endpoint, shared by all binaries.
#[derive(Clone, Debug, Args)]
pub struct CommonKafkaOpts {
    /// Address of the Kafka broker, e.g. localhost:19092
    #[clap(long)]
    pub broker: String,

    /// Optional Kafka username
    #[clap(long)]
    pub username: Option<String>,

    /// Optional Kafka password
    #[clap(long)]
    pub password: Option<String>,
}

/// Builds a [ClientConfig] for the given broker, switching on SASL only
/// when both credentials are supplied.
pub fn generate_kafka_client_config(
    broker_address: &str,
    username: &Option<String>,
    password: &Option<String>,
) -> ClientConfig {
    let mut client_config = ClientConfig::new();
    client_config.set("bootstrap.servers", broker_address);

    if let (Some(username), Some(password)) = (username, password) {
        client_config
            .set("security.protocol", "sasl_plaintext")
            .set("sasl.mechanisms", "SCRAM-SHA-256")
            .set("sasl.username", username)
            .set("sasl.password", password);
    }

    client_config
}

/// Creates a [StreamConsumer] with the fleet's default consumer settings,
/// subscribed to `topics` if given.
pub fn create_default_consumer(
    broker_address: &str,
    username: &Option<String>,
    password: &Option<String>,
    consumer_group: &str,
    topics: Option<&[&str]>,
) -> Result<StreamConsumer, KafkaError> {
    let consumer: StreamConsumer =
        generate_kafka_client_config(broker_address, username, password)
            .set("group.id", consumer_group)
            .set("enable.partition.eof", "false")
            .set("session.timeout.ms", "6000")
            .set("enable.auto.commit", "false")
            .create()?;

    if let Some(topics) = topics {
        consumer.subscribe(topics)?;
    }

    Ok(consumer)
}
