//! Types and helpers shared by every fleet component.
pub mod kafka;
pub mod metrics;
mod node;
mod topics;

pub use kafka::{CommonKafkaOpts, create_default_consumer, generate_kafka_client_config};
pub use node::{NodeId, NodeStatus, generate_node_id};
pub use topics::Topics;

/// Index of an object class known to the detector.
pub type ClassId = u32;

/// Dense index of a frame within the decoded video.
pub type FrameIndex = usize;
