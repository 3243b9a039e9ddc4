//! Bracha-style reliable broadcast.
//!
//! One [RbInstance] runs per subject, created on the first `initial` seen
//! and destroyed on acceptance; the [RbRegistry] owns the live set and
//! routes broadcast-topic traffic to them. The guarantee consumed by the
//! rest of the node: if any correct node accepts `(subject, v)`, every
//! correct node accepts `(subject, v)`; nothing is promised about ordering
//! across subjects.
mod instance;
mod registry;

pub use instance::{RbInstance, RbMode, RbStep};
pub use registry::RbRegistry;

/// Fault budget for a fleet of `n` nodes: `⌊(n − 1) / 3⌋`.
pub fn fault_budget(node_count: usize) -> usize {
    node_count.saturating_sub(1) / 3
}

/// Echo count at which an instance sends its `ready`: `⌈(n + f) / 2⌉`.
pub fn echo_threshold(node_count: usize, fault_budget: usize) -> usize {
    (node_count + fault_budget).div_ceil(2)
}

/// Ready count at which an instance accepts: `2f + 1`.
pub fn ready_threshold(fault_budget: usize) -> usize {
    2 * fault_budget + 1
}
