//! Node identity and the statuses a node reports in its heartbeats.
use rand::{Rng, distr::Alphanumeric};
use serde::{Deserialize, Serialize};

/// Opaque identifier a node generates for itself at startup.
pub type NodeId = String;

const NODE_ID_LEN: usize = 11;

/// Generates a fresh random node token.
///
/// Drawn from the thread-local CSPRNG, so tokens are unguessable and
/// collisions between fleet members are vanishingly unlikely.
pub fn generate_node_id() -> NodeId {
    rand::rng()
        .sample_iter(&Alphanumeric)
        .take(NODE_ID_LEN)
        .map(char::from)
        .collect()
}

/// Whether a node is available for frame work.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, strum::Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum NodeStatus {
    Free,
    Busy,
}
