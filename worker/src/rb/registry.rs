//! Ownership and routing for the live reliable-broadcast instances.
use super::{RbInstance, RbMode, RbStep};
use clipseek_messages::{RbMessage, RbState};
use std::collections::HashMap;
use tracing::debug;

/// Owns every live [RbInstance], keyed by subject.
///
/// An `initial` for an unseen subject creates an instance, freezing the
/// caller-supplied node count into it. Anything else is routed to the
/// subject's instance if one is live, and dropped otherwise (the subject
/// either completed already or its `initial` has not arrived). Acceptance
/// destroys the instance; a poisoned instance stays resident so the
/// subject cannot be re-run by its tamperer.
pub struct RbRegistry {
    mode: RbMode,
    instances: HashMap<String, RbInstance>,
}

impl RbRegistry {
    pub fn new(mode: RbMode) -> Self {
        Self {
            mode,
            instances: HashMap::new(),
        }
    }

    /// Number of live instances.
    pub fn len(&self) -> usize {
        self.instances.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instances.is_empty()
    }

    /// Routes one message from the broadcast topic.
    ///
    /// `node_count` is the current heartbeat-snapshot size; it is frozen
    /// into any instance this call creates.
    pub fn route(&mut self, message: &RbMessage, node_count: usize) -> RbStep {
        if message.state == RbState::Initial {
            if self.instances.contains_key(&message.subject) {
                debug!(subject = %message.subject, "duplicate initial ignored");
                return RbStep::default();
            }
            let (instance, step) = RbInstance::new(message, node_count, self.mode);
            self.instances.insert(message.subject.clone(), instance);
            return step;
        }

        let Some(instance) = self.instances.get_mut(&message.subject) else {
            debug!(
                subject = %message.subject,
                state = %message.state,
                "dropping message for unknown subject"
            );
            return RbStep::default();
        };

        let step = instance.handle(message);
        if step.accepted.is_some() {
            self.instances.remove(&message.subject);
        }
        step
    }
}
