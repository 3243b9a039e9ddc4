//! Liveness tracking over the global heartbeat topic.
use clipseek_common::{NodeId, NodeStatus};
use clipseek_messages::Heartbeat;
use std::{collections::HashMap, sync::Arc};

/// The most recently published view of live peers.
pub type Snapshot = Arc<HashMap<NodeId, NodeStatus>>;

/// Rolling window over who has been heard from.
///
/// Heartbeats accumulate into a staging map; every snapshot interval the
/// staging map is published wholesale as the snapshot and replaced by a
/// fresh one. A node that stays silent for two consecutive windows is
/// therefore guaranteed absent from the snapshot readers see.
#[derive(Default)]
pub struct HeartbeatTracker {
    accumulator: HashMap<NodeId, NodeStatus>,
    snapshot: Snapshot,
}

impl HeartbeatTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a heartbeat into the staging window. Later reports from the
    /// same node within a window overwrite earlier ones.
    pub fn observe(&mut self, heartbeat: &Heartbeat) {
        self.accumulator
            .insert(heartbeat.node.clone(), heartbeat.status);
    }

    /// Publishes the staging window as the live snapshot and starts a
    /// fresh one.
    pub fn swap(&mut self) {
        self.snapshot = Arc::new(std::mem::take(&mut self.accumulator));
    }

    pub fn snapshot(&self) -> Snapshot {
        Arc::clone(&self.snapshot)
    }
}
