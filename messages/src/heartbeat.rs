//! The liveness envelope every node publishes on the heartbeat topic.
use crate::Envelope;
use clipseek_common::{NodeId, NodeStatus};
use serde::{Deserialize, Serialize};

/// One liveness report: who is alive, and whether they can take work.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Heartbeat {
    pub node: NodeId,
    pub status: NodeStatus,
}

impl Envelope for Heartbeat {}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn round_trip() {
        let heartbeat = Heartbeat {
            node: "m4ch1n3".into(),
            status: NodeStatus::Busy,
        };
        assert_eq!(Heartbeat::decode(&heartbeat.encode()).unwrap(), heartbeat);
    }

    #[test]
    fn statuses_are_lowercase_on_the_wire() {
        let heartbeat = Heartbeat {
            node: "m4ch1n3".into(),
            status: NodeStatus::Free,
        };
        assert_eq!(heartbeat.encode(), r#"{"node":"m4ch1n3","status":"free"}"#);
    }

    #[test]
    fn unknown_status_is_malformed() {
        assert!(Heartbeat::decode(r#"{"node":"m4ch1n3","status":"idle"}"#).is_err());
    }

    #[test]
    fn missing_field_is_malformed() {
        assert!(Heartbeat::decode(r#"{"node":"m4ch1n3"}"#).is_err());
    }
}
