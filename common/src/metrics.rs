//! Metric names and label helpers shared by fleet components.
use metrics::gauge;

pub mod names {
    use const_format::concatcp;

    pub const METRIC_NAME_PREFIX: &str = "clipseek_";

    pub const COMPONENT_INFO: &str = concatcp!(METRIC_NAME_PREFIX, "component_info");
    pub const MESSAGES_RECEIVED: &str = concatcp!(METRIC_NAME_PREFIX, "messages_received");
    pub const FAILURES: &str = concatcp!(METRIC_NAME_PREFIX, "failures");
    pub const FRAMES_DISPATCHED: &str = concatcp!(METRIC_NAME_PREFIX, "frames_dispatched");
    pub const FRAMES_PROCESSED: &str = concatcp!(METRIC_NAME_PREFIX, "frames_processed");
    pub const VALUES_ACCEPTED: &str = concatcp!(METRIC_NAME_PREFIX, "values_accepted");
    pub const CLIPS_RETURNED: &str = concatcp!(METRIC_NAME_PREFIX, "clips_returned");
}

/// Registers a gauge identifying the running component and its version.
pub fn component_info_metric(component: &'static str) {
    gauge!(
        names::COMPONENT_INFO,
        &[
            ("component", component),
            ("version", env!("CARGO_PKG_VERSION")),
        ]
    )
    .set(1.0);
}

pub mod messages_received {
    /// Which topic family an inbound message arrived on.
    #[derive(Clone, Copy, Debug)]
    pub enum MessageKind {
        Heartbeat,
        Broadcast,
        Request,
        Command,
        Unexpected,
    }

    pub fn get_label(kind: MessageKind) -> (&'static str, &'static str) {
        let kind = match kind {
            MessageKind::Heartbeat => "heartbeat",
            MessageKind::Broadcast => "broadcast",
            MessageKind::Request => "request",
            MessageKind::Command => "command",
            MessageKind::Unexpected => "unexpected",
        };
        ("message_kind", kind)
    }
}

pub mod failures {
    /// Classifies a recoverable failure for the failures counter.
    #[derive(Clone, Copy, Debug)]
    pub enum FailureKind {
        UnableToDecodeMessage,
        KafkaPublishFailed,
        DetectorFailed,
        CodecFailed,
    }

    pub fn get_label(kind: FailureKind) -> (&'static str, &'static str) {
        let kind = match kind {
            FailureKind::UnableToDecodeMessage => "unable_to_decode_message",
            FailureKind::KafkaPublishFailed => "kafka_publish_failed",
            FailureKind::DetectorFailed => "detector_failed",
            FailureKind::CodecFailed => "codec_failed",
        };
        ("failure_kind", kind)
    }
}
