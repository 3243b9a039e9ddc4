//! The reliable-broadcast envelope carried on the broadcast topic.
use crate::Envelope;
use serde::{Deserialize, Serialize};

/// Protocol phase of a reliable-broadcast message.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, strum::Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum RbState {
    Initial,
    Echo,
    Ready,
    Accepted,
}

/// One reliable-broadcast message.
///
/// The pair `(subject, data)` is the value under agreement; `state` is the
/// phase carrying it. Two messages are equal iff all three fields match.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RbMessage {
    pub state: RbState,
    pub subject: String,
    pub data: String,
}

impl RbMessage {
    pub fn initial(subject: impl Into<String>, data: impl Into<String>) -> Self {
        Self::new(RbState::Initial, subject, data)
    }

    pub fn echo(subject: impl Into<String>, data: impl Into<String>) -> Self {
        Self::new(RbState::Echo, subject, data)
    }

    pub fn ready(subject: impl Into<String>, data: impl Into<String>) -> Self {
        Self::new(RbState::Ready, subject, data)
    }

    pub fn accepted(subject: impl Into<String>, data: impl Into<String>) -> Self {
        Self::new(RbState::Accepted, subject, data)
    }

    fn new(state: RbState, subject: impl Into<String>, data: impl Into<String>) -> Self {
        Self {
            state,
            subject: subject.into(),
            data: data.into(),
        }
    }
}

impl Envelope for RbMessage {}
