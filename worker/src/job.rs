//! Leader-side bookkeeping: which frames are done, which are out with a
//! worker, and which nodes are free to take more.
use clipseek_common::{FrameIndex, NodeId};
use std::collections::{BTreeMap, BTreeSet, HashMap};

/// What one dispatch pass decided.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct DispatchPass {
    /// `(node, frame)` assignments to publish on cmd inboxes.
    pub assignments: Vec<(NodeId, FrameIndex)>,
    /// True when the pass found no fresh work and cleared the processing
    /// queue so stragglers' frames become assignable again.
    pub reassigned: bool,
}

/// Invariant: every frame id is either in `results`, in `processing`, or
/// unassigned; an id enters `processing` on dispatch and leaves it when its
/// result is accepted or when the queue is cleared for reassignment.
pub struct JobState {
    frame_count: usize,
    results: BTreeMap<FrameIndex, i64>,
    processing: BTreeSet<FrameIndex>,
    /// Nodes offered as free, in offer order, not currently assigned.
    free: Vec<NodeId>,
    /// Outstanding assignments, node to frame.
    outstanding: HashMap<NodeId, FrameIndex>,
}

impl JobState {
    pub fn new(frame_count: usize) -> Self {
        Self {
            frame_count,
            results: BTreeMap::new(),
            processing: BTreeSet::new(),
            free: Vec::new(),
            outstanding: HashMap::new(),
        }
    }

    /// Offers a node to the free list. Ignored while the node still holds
    /// an outstanding assignment or is already listed.
    pub fn offer_free_node(&mut self, node: &NodeId) {
        if !self.outstanding.contains_key(node) && !self.free.contains(node) {
            self.free.push(node.clone());
        }
    }

    /// Records an accepted result for a frame, normalizing zero hits to −1
    /// so empty frames never extend a positive region during aggregation.
    /// Idempotent for duplicate completions.
    pub fn record_result(&mut self, frame: FrameIndex, hits: i64) {
        let normalized = if hits > 0 { hits } else { -1 };
        self.results.insert(frame, normalized);
        self.processing.remove(&frame);
        self.outstanding.retain(|_, assigned| *assigned != frame);
    }

    pub fn is_complete(&self) -> bool {
        self.results.len() == self.frame_count
    }

    pub fn results(&self) -> &BTreeMap<FrameIndex, i64> {
        &self.results
    }

    pub fn processing_queue_len(&self) -> usize {
        self.processing.len()
    }

    /// One dispatch pass: pair each free node with the lowest frame id
    /// that is neither resulted nor in flight. When no such id remains but
    /// frames are still in flight, the processing queue is cleared
    /// wholesale, permitting a straggler's frame to be re-dispatched
    /// immediately (possibly within this very pass).
    pub fn dispatch_pass(&mut self) -> DispatchPass {
        let mut pass = DispatchPass::default();
        let free = std::mem::take(&mut self.free);

        for node in free {
            let mut next = self.next_unassigned();
            if next.is_none() && !self.processing.is_empty() {
                self.processing.clear();
                self.outstanding.clear();
                pass.reassigned = true;
                next = self.next_unassigned();
            }
            match next {
                Some(frame) => {
                    self.processing.insert(frame);
                    self.outstanding.insert(node.clone(), frame);
                    pass.assignments.push((node, frame));
                }
                // Every frame has a result; the node stays available.
                None => self.free.push(node),
            }
        }

        pass
    }

    fn next_unassigned(&self) -> Option<FrameIndex> {
        (0..self.frame_count)
            .find(|frame| !self.results.contains_key(frame) && !self.processing.contains(frame))
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn offer(state: &mut JobState, nodes: &[&str]) {
        for node in nodes {
            state.offer_free_node(&node.to_string());
        }
    }

    #[test]
    fn assigns_lowest_unclaimed_frames_to_free_nodes() {
        let mut state = JobState::new(4);
        offer(&mut state, &["a", "b"]);

        let pass = state.dispatch_pass();
        assert_eq!(
            pass.assignments,
            vec![("a".to_string(), 0), ("b".to_string(), 1)]
        );
        assert!(!pass.reassigned);
        assert_eq!(state.processing_queue_len(), 2);

        // The nodes are no longer free and nothing else is offered.
        assert!(state.dispatch_pass().assignments.is_empty());
    }

    #[test]
    fn node_is_not_free_while_its_assignment_is_outstanding() {
        let mut state = JobState::new(2);
        offer(&mut state, &["a"]);
        state.dispatch_pass();

        // Heartbeats keep saying "free" until the node picks the work up.
        offer(&mut state, &["a"]);
        assert!(state.dispatch_pass().assignments.is_empty());

        state.record_result(0, 2);
        offer(&mut state, &["a"]);
        assert_eq!(state.dispatch_pass().assignments, vec![("a".to_string(), 1)]);
    }

    #[test]
    fn zero_hits_normalize_to_minus_one() {
        let mut state = JobState::new(2);
        state.record_result(0, 0);
        state.record_result(1, 3);
        assert_eq!(
            state.results().iter().map(|(_, &v)| v).collect::<Vec<_>>(),
            vec![-1, 3]
        );
    }

    #[test]
    fn straggler_queue_clears_and_frame_is_reassigned() {
        let mut state = JobState::new(2);
        offer(&mut state, &["slow", "fast"]);
        let pass = state.dispatch_pass();
        assert_eq!(pass.assignments.len(), 2);

        // Only the fast node reports; the slow one holds frame 0 forever.
        let slow_frame = pass.assignments[0].1;
        state.record_result(pass.assignments[1].1, 1);

        // A free node shows up with no fresh work left: the queue clears
        // and the straggler's frame goes out again in the same pass.
        offer(&mut state, &["fast"]);
        let pass = state.dispatch_pass();
        assert!(pass.reassigned);
        assert_eq!(pass.assignments, vec![("fast".to_string(), slow_frame)]);
    }

    #[test]
    fn duplicate_completion_is_idempotent() {
        let mut state = JobState::new(1);
        state.record_result(0, 2);
        state.record_result(0, 2);
        assert!(state.is_complete());
        assert_eq!(state.results().get(&0), Some(&2));
    }

    #[test]
    fn coverage_on_termination() {
        // Whatever interleaving of offers, passes and completions occurs,
        // termination means every frame has a result and nothing is left
        // in the processing queue.
        let mut state = JobState::new(5);
        let nodes = ["a", "b", "c"];
        let mut round = 0usize;
        while !state.is_complete() {
            offer(&mut state, &nodes);
            let pass = state.dispatch_pass();
            for (index, (_, frame)) in pass.assignments.iter().enumerate() {
                // Node "c" straggles: its results never arrive.
                if index % nodes.len() != 2 {
                    state.record_result(*frame, (*frame as i64) % 3);
                }
            }
            round += 1;
            assert!(round < 100, "dispatch failed to converge");
        }
        assert_eq!(state.results().len(), 5);
        assert_eq!(
            state.results().keys().copied().collect::<Vec<_>>(),
            (0..5).collect::<Vec<_>>()
        );
        assert_eq!(state.processing_queue_len(), 0);
    }
}
