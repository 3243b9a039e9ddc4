//! The topic map all fleet participants agree on.
use crate::NodeId;

/// Names of the global topics, plus the scheme for per-node inboxes.
///
/// Global topics are shared by the whole fleet; each node additionally owns
/// two inboxes derived from its id. Names stay within Kafka's legal
/// character set.
#[derive(Clone, Debug)]
pub struct Topics {
    /// Global liveness topic; all nodes publish and subscribe.
    pub heartbeat: String,
    /// Global topic carrying reliable-broadcast traffic.
    pub broadcast: String,
    /// Topic on which the final subclip is returned to the client.
    pub client: String,
}

impl Topics {
    /// Inbox on which a client submits a job to the given node.
    pub fn request_inbox(&self, node: &NodeId) -> String {
        format!("{node}.request-inbox")
    }

    /// Inbox on which the leader sends frame assignments to the given node.
    pub fn cmd_inbox(&self, node: &NodeId) -> String {
        format!("{node}.cmd-inbox")
    }
}

impl Default for Topics {
    fn default() -> Self {
        Self {
            heartbeat: "heartbeat".into(),
            broadcast: "broadcast".into(),
            client: "client".into(),
        }
    }
}
