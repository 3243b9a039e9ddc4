//! The per-subject reliable-broadcast state machine.
use super::{echo_threshold, fault_budget, ready_threshold};
use clipseek_messages::{RbMessage, RbState};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use tracing::warn;

/// How echo/ready payloads carry the value under agreement.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum RbMode {
    /// Echo and ready messages carry the full data string.
    #[default]
    Plain,
    /// Echo and ready messages carry the SHA-256 of the data; the locally
    /// held data is checked against the majority digest before acceptance.
    Hashed,
}

/// Everything an instance wants done after one protocol event.
#[derive(Debug, Default, PartialEq)]
pub struct RbStep {
    /// Message to publish on the broadcast topic.
    pub broadcast: Option<RbMessage>,
    /// Value accepted for this subject; set at most once per instance.
    pub accepted: Option<RbMessage>,
}

impl RbStep {
    fn send(message: RbMessage) -> Self {
        Self {
            broadcast: Some(message),
            ..Self::default()
        }
    }

    fn accept(message: RbMessage) -> Self {
        Self {
            accepted: Some(message),
            ..Self::default()
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Phase {
    /// Collecting echoes; the `ready` has not fired yet.
    WaitingEcho,
    /// `ready` sent; collecting readies.
    WaitingReady,
    /// Terminal: the value was accepted.
    Accepted,
    /// Terminal: the majority digest contradicted the local data.
    Poisoned,
}

/// One run of the protocol for a single subject and sender.
///
/// The node set is frozen at construction; messages are counted
/// sender-agnostically (duplicates included), which the thresholds are
/// calibrated to tolerate. The instance is a pure state machine: callers
/// publish whatever a returned [RbStep] asks for.
pub struct RbInstance {
    subject: String,
    /// Data of the `initial` that created the instance. In hashed mode
    /// this is the value the majority digest must match.
    data: String,
    node_count: usize,
    fault_budget: usize,
    mode: RbMode,
    phase: Phase,
    echoes: Vec<String>,
    readies: Vec<String>,
}

impl RbInstance {
    /// Builds the instance from the subject's `initial` message. The
    /// returned step carries the bootstrap echo.
    ///
    /// `node_count` is clamped to at least one so a node that has not yet
    /// seen a heartbeat window can still agree with itself.
    pub fn new(initial: &RbMessage, node_count: usize, mode: RbMode) -> (Self, RbStep) {
        let node_count = node_count.max(1);
        let instance = Self {
            subject: initial.subject.clone(),
            data: initial.data.clone(),
            node_count,
            fault_budget: fault_budget(node_count),
            mode,
            phase: Phase::WaitingEcho,
            echoes: Vec::new(),
            readies: Vec::new(),
        };
        let echo = RbMessage::echo(&instance.subject, instance.wire_value());
        (instance, RbStep::send(echo))
    }

    pub fn subject(&self) -> &str {
        &self.subject
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self.phase, Phase::Accepted | Phase::Poisoned)
    }

    /// Feeds one broadcast-topic message for this subject through the
    /// state machine.
    pub fn handle(&mut self, message: &RbMessage) -> RbStep {
        match message.state {
            RbState::Echo if self.phase == Phase::WaitingEcho => {
                self.echoes.push(message.data.clone());
                let (count, majority) = tally(&self.echoes);
                if count >= echo_threshold(self.node_count, self.fault_budget) {
                    self.phase = Phase::WaitingReady;
                    let ready = RbMessage::ready(&self.subject, majority);
                    return RbStep::send(ready);
                }
            }
            RbState::Ready if matches!(self.phase, Phase::WaitingEcho | Phase::WaitingReady) => {
                self.readies.push(message.data.clone());
                let (count, majority) = tally(&self.readies);
                if count >= ready_threshold(self.fault_budget) {
                    let majority = majority.to_owned();
                    return self.conclude(&majority);
                }
            }
            // Duplicate initials, stray accepteds, and anything arriving
            // after a terminal phase are absorbed without effect.
            _ => {}
        }
        RbStep::default()
    }

    /// The ready threshold was reached with `majority` as the plurality
    /// value; accept it, or poison the instance if the digest check fails.
    fn conclude(&mut self, majority: &str) -> RbStep {
        match self.mode {
            RbMode::Plain => {
                self.phase = Phase::Accepted;
                RbStep::accept(RbMessage::accepted(&self.subject, majority))
            }
            RbMode::Hashed => {
                if digest_hex(&self.data) == majority {
                    self.phase = Phase::Accepted;
                    RbStep::accept(RbMessage::accepted(&self.subject, &self.data))
                } else {
                    warn!(
                        subject = %self.subject,
                        "majority digest contradicts local data; poisoning instance"
                    );
                    self.phase = Phase::Poisoned;
                    RbStep::default()
                }
            }
        }
    }

    /// What this node's echo/ready messages carry for the local data.
    fn wire_value(&self) -> String {
        match self.mode {
            RbMode::Plain => self.data.clone(),
            RbMode::Hashed => digest_hex(&self.data),
        }
    }
}

fn digest_hex(data: &str) -> String {
    Sha256::digest(data.as_bytes())
        .iter()
        .map(|byte| format!("{byte:02x}"))
        .collect()
}

/// Plurality value and its count. Ties go to the value that reached the
/// top count most recently, which is deterministic for any fixed arrival
/// order.
fn tally(values: &[String]) -> (usize, &str) {
    let mut counts: HashMap<&str, usize> = HashMap::new();
    let mut best: (usize, &str) = (0, "");
    for value in values {
        let count = counts
            .entry(value.as_str())
            .and_modify(|c| *c += 1)
            .or_insert(1);
        if *count >= best.0 {
            best = (*count, value);
        }
    }
    best
}
