//! The worker node: run loop, topic handlers and the client reply path.
use crate::{
    aggregate,
    bus::{Inbound, MessageBus},
    heartbeat::HeartbeatTracker,
    job::JobState,
    rb::{RbMode, RbRegistry, RbStep},
};
use base64::{Engine, engine::general_purpose::STANDARD};
use clipseek_common::{
    ClassId, FrameIndex, NodeId, NodeStatus, Topics,
    metrics::{
        failures::{self, FailureKind},
        messages_received::{self, MessageKind},
        names::{CLIPS_RETURNED, FAILURES, FRAMES_DISPATCHED, FRAMES_PROCESSED, MESSAGES_RECEIVED, VALUES_ACCEPTED},
    },
};
use clipseek_media::{Detect, Frame, VideoCodec};
use clipseek_messages::{Envelope, Heartbeat, RbMessage, VideoRequest};
use metrics::counter;
use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::{Duration, Instant},
};
use tokio::sync::mpsc::UnboundedReceiver;
use tracing::{debug, error, info, instrument, warn};

/// The subject under which the job itself is agreed on; every other
/// subject is the decimal id of a frame.
const JOB_SUBJECT: &str = "client";

/// Identity, topic map and cadences of one node.
#[derive(Clone, Debug)]
pub struct NodeConfig {
    pub node_id: NodeId,
    pub topics: Topics,
    /// Cadence of heartbeat publishes.
    pub heartbeat_interval: Duration,
    /// Cadence of liveness snapshot swaps.
    pub snapshot_interval: Duration,
    /// Cadence of leader dispatch passes.
    pub dispatch_interval: Duration,
    pub rb_mode: RbMode,
}

impl NodeConfig {
    pub fn new(node_id: NodeId, topics: Topics) -> Self {
        Self {
            node_id,
            topics,
            heartbeat_interval: Duration::from_millis(100),
            snapshot_interval: Duration::from_millis(500),
            dispatch_interval: Duration::from_millis(10),
            rb_mode: RbMode::Plain,
        }
    }
}

/// The job this node is currently part of, present once the fleet agreed
/// on the `client` subject and the video decoded.
struct ActiveJob {
    frames: Vec<Frame>,
    target: ClassId,
    state: JobState,
    /// Set once the reply path ran (or terminally failed); guards against
    /// duplicate completions re-sending the clip.
    replied: bool,
}

/// A fleet worker.
///
/// Owns the whole coordination substrate of one node; [Node::run] is the
/// single public entry point and drives everything from one select loop,
/// so all shared state is mutated from one place. Only the detector runs
/// elsewhere, on a blocking thread, talking back through the broker.
pub struct Node {
    config: NodeConfig,
    bus: Arc<dyn MessageBus>,
    detector: Arc<dyn Detect>,
    codec: Arc<dyn VideoCodec>,
    tracker: HeartbeatTracker,
    registry: RbRegistry,
    busy: Arc<AtomicBool>,
    leader: bool,
    job: Option<ActiveJob>,
    request_inbox: String,
    cmd_inbox: String,
}

impl Node {
    pub fn new(
        config: NodeConfig,
        bus: Arc<dyn MessageBus>,
        detector: Arc<dyn Detect>,
        codec: Arc<dyn VideoCodec>,
    ) -> Self {
        let request_inbox = config.topics.request_inbox(&config.node_id);
        let cmd_inbox = config.topics.cmd_inbox(&config.node_id);
        let registry = RbRegistry::new(config.rb_mode);
        Self {
            config,
            bus,
            detector,
            codec,
            tracker: HeartbeatTracker::new(),
            registry,
            busy: Arc::new(AtomicBool::new(false)),
            leader: false,
            job: None,
            request_inbox,
            cmd_inbox,
        }
    }

    /// Every topic this node must be subscribed to.
    pub fn subscriptions(&self) -> Vec<String> {
        vec![
            self.config.topics.heartbeat.clone(),
            self.config.topics.broadcast.clone(),
            self.request_inbox.clone(),
            self.cmd_inbox.clone(),
        ]
    }

    /// Drives the node until the inbound stream closes.
    pub async fn run(mut self, mut inbound: UnboundedReceiver<Inbound>) {
        info!("node {} running", self.config.node_id);
        let mut heartbeat_interval = tokio::time::interval(self.config.heartbeat_interval);
        let mut snapshot_interval = tokio::time::interval(self.config.snapshot_interval);
        let mut dispatch_interval = tokio::time::interval(self.config.dispatch_interval);

        loop {
            tokio::select! {
                message = inbound.recv() => {
                    match message {
                        Some(message) => self.handle_inbound(message),
                        None => {
                            info!("inbound stream closed; node {} stopping", self.config.node_id);
                            return;
                        }
                    }
                }
                _ = heartbeat_interval.tick() => self.publish_heartbeat(),
                _ = snapshot_interval.tick() => self.tracker.swap(),
                _ = dispatch_interval.tick() => self.dispatch_tick(),
            }
        }
    }

    fn handle_inbound(&mut self, message: Inbound) {
        if message.topic == self.config.topics.heartbeat {
            counter!(
                MESSAGES_RECEIVED,
                &[messages_received::get_label(MessageKind::Heartbeat)]
            )
            .increment(1);
            self.handle_heartbeat(&message.payload);
        } else if message.topic == self.config.topics.broadcast {
            counter!(
                MESSAGES_RECEIVED,
                &[messages_received::get_label(MessageKind::Broadcast)]
            )
            .increment(1);
            self.handle_broadcast(&message.payload);
        } else if message.topic == self.request_inbox {
            counter!(
                MESSAGES_RECEIVED,
                &[messages_received::get_label(MessageKind::Request)]
            )
            .increment(1);
            self.handle_request(&message.payload);
        } else if message.topic == self.cmd_inbox {
            counter!(
                MESSAGES_RECEIVED,
                &[messages_received::get_label(MessageKind::Command)]
            )
            .increment(1);
            self.handle_command(&message.payload);
        } else {
            warn!("Unexpected message on topic \"{}\"", message.topic);
            counter!(
                MESSAGES_RECEIVED,
                &[messages_received::get_label(MessageKind::Unexpected)]
            )
            .increment(1);
        }
    }

    fn handle_heartbeat(&mut self, payload: &[u8]) {
        let heartbeat = match Heartbeat::decode_bytes(payload) {
            Ok(heartbeat) => heartbeat,
            Err(e) => {
                warn!("Failed to parse heartbeat: {e}");
                counter!(
                    FAILURES,
                    &[failures::get_label(FailureKind::UnableToDecodeMessage)]
                )
                .increment(1);
                return;
            }
        };
        self.tracker.observe(&heartbeat);

        if self.leader && heartbeat.status == NodeStatus::Free {
            if let Some(job) = self.job.as_mut() {
                job.state.offer_free_node(&heartbeat.node);
            }
        }
    }

    /// A client picked this node: it becomes leader and puts the job under
    /// agreement.
    #[instrument(skip_all, fields(node_id = %self.config.node_id))]
    fn handle_request(&mut self, payload: &[u8]) {
        let request = match String::from_utf8(payload.to_vec()) {
            Ok(request) => request,
            Err(e) => {
                warn!("Request payload is not UTF-8: {e}");
                counter!(
                    FAILURES,
                    &[failures::get_label(FailureKind::UnableToDecodeMessage)]
                )
                .increment(1);
                return;
            }
        };
        if let Err(e) = VideoRequest::decode(&request) {
            warn!("Failed to parse video request: {e}");
            counter!(
                FAILURES,
                &[failures::get_label(FailureKind::UnableToDecodeMessage)]
            )
            .increment(1);
            return;
        }

        info!("request received; assuming leadership");
        self.leader = true;
        // The raw request travels as the agreement value so every node
        // re-decodes the same bytes.
        let initial = RbMessage::initial(JOB_SUBJECT, request);
        self.publish(&self.config.topics.broadcast, initial.encode().as_bytes());
    }

    fn handle_broadcast(&mut self, payload: &[u8]) {
        let message = match RbMessage::decode_bytes(payload) {
            Ok(message) => message,
            Err(e) => {
                warn!("Failed to parse broadcast message: {e}");
                counter!(
                    FAILURES,
                    &[failures::get_label(FailureKind::UnableToDecodeMessage)]
                )
                .increment(1);
                return;
            }
        };

        let node_count = self.tracker.snapshot().len();
        let RbStep { broadcast, accepted } = self.registry.route(&message, node_count);
        if let Some(outgoing) = broadcast {
            self.publish(&self.config.topics.broadcast, outgoing.encode().as_bytes());
        }
        if let Some(accepted) = accepted {
            self.handle_accepted(accepted);
        }
    }

    /// A value reached agreement: either the job itself, or one frame's
    /// hit count.
    fn handle_accepted(&mut self, accepted: RbMessage) {
        counter!(VALUES_ACCEPTED).increment(1);
        if accepted.subject == JOB_SUBJECT {
            self.accept_job(&accepted.data);
        } else if let Ok(frame) = accepted.subject.parse::<FrameIndex>() {
            self.accept_frame_result(frame, &accepted.data);
        } else {
            debug!("accepted value for unrecognized subject {}", accepted.subject);
        }
    }

    #[instrument(skip_all, fields(node_id = %self.config.node_id, leader = self.leader))]
    fn accept_job(&mut self, data: &str) {
        let request = match VideoRequest::decode(data) {
            Ok(request) => request,
            Err(e) => {
                warn!("Agreed job does not parse as a video request: {e}");
                counter!(
                    FAILURES,
                    &[failures::get_label(FailureKind::UnableToDecodeMessage)]
                )
                .increment(1);
                return;
            }
        };
        let clip = match request.clip_bytes() {
            Ok(clip) => clip,
            Err(e) => {
                warn!("Agreed job carries invalid base64 video: {e}");
                counter!(
                    FAILURES,
                    &[failures::get_label(FailureKind::UnableToDecodeMessage)]
                )
                .increment(1);
                return;
            }
        };
        // Decode failure here is fatal for the job: without frames there
        // is nothing to dispatch and no reply will ever be sent.
        let frames = match self.codec.decode(&clip) {
            Ok(frames) => frames,
            Err(e) => {
                error!("Failed to decode job video: {e}");
                counter!(FAILURES, &[failures::get_label(FailureKind::CodecFailed)])
                    .increment(1);
                return;
            }
        };

        info!("job accepted: {} frames, target class {}", frames.len(), request.target);
        let state = JobState::new(frames.len());
        self.job = Some(ActiveJob {
            frames,
            target: request.target,
            state,
            replied: false,
        });
    }

    fn accept_frame_result(&mut self, frame: FrameIndex, data: &str) {
        let Some(job) = self.job.as_mut() else {
            debug!("frame result {frame} before any job; dropped");
            return;
        };
        let hits = match data.trim().parse::<i64>() {
            Ok(hits) => hits,
            Err(e) => {
                warn!("Unparseable hit count for frame {frame}: {e}");
                counter!(
                    FAILURES,
                    &[failures::get_label(FailureKind::UnableToDecodeMessage)]
                )
                .increment(1);
                0
            }
        };
        debug!("frame {frame} agreed at {hits} hits");
        job.state.record_result(frame, hits);
        self.maybe_reply();
    }

    /// Leader dispatch pass; a no-op everywhere else.
    fn dispatch_tick(&mut self) {
        if !self.leader {
            return;
        }
        let Some(job) = self.job.as_mut() else {
            return;
        };
        if job.replied {
            return;
        }

        let pass = job.state.dispatch_pass();
        if pass.reassigned {
            debug!("no fresh frames; processing queue cleared for reassignment");
        }
        for (node, frame) in pass.assignments {
            info!("dispatching frame {frame} to {node}");
            counter!(FRAMES_DISPATCHED).increment(1);
            let inbox = self.config.topics.cmd_inbox(&node);
            self.publish(&inbox, frame.to_string().as_bytes());
        }

        self.maybe_reply();
    }

    /// Runs the reply path once the leader holds a result for every frame.
    fn maybe_reply(&mut self) {
        if !self.leader {
            return;
        }
        let Some(job) = self.job.as_mut() else {
            return;
        };
        if job.replied || !job.state.is_complete() {
            return;
        }
        job.replied = true;

        let Some((start, end)) = aggregate::max_score_range(job.state.results()) else {
            return;
        };
        info!("all frames agreed; best range {start}..={end}");

        let subclip = &job.frames[start..=end];
        let encoded = match self.codec.encode(subclip) {
            Ok(encoded) => encoded,
            Err(e) => {
                // Fatal for the job; the client sees a silent timeout.
                error!("Failed to encode subclip: {e}");
                counter!(FAILURES, &[failures::get_label(FailureKind::CodecFailed)])
                    .increment(1);
                return;
            }
        };
        let payload = STANDARD.encode(encoded);
        self.publish(&self.config.topics.client, payload.as_bytes());
        counter!(CLIPS_RETURNED).increment(1);
        info!("subclip of {} frames returned to client", end - start + 1);
    }

    /// A frame assignment from the leader: run the detector off-loop and
    /// put the count under agreement.
    fn handle_command(&mut self, payload: &[u8]) {
        let frame_id = match std::str::from_utf8(payload)
            .ok()
            .and_then(|text| text.trim().parse::<FrameIndex>().ok())
        {
            Some(frame_id) => frame_id,
            None => {
                warn!("Unparseable frame assignment");
                counter!(
                    FAILURES,
                    &[failures::get_label(FailureKind::UnableToDecodeMessage)]
                )
                .increment(1);
                return;
            }
        };
        let Some(job) = self.job.as_ref() else {
            // The job has not reached agreement here yet; the leader's
            // straggler pass will re-dispatch the frame.
            debug!("assignment for frame {frame_id} before the job arrived; dropped");
            return;
        };
        let Some(frame) = job.frames.get(frame_id).cloned() else {
            warn!("assignment for unknown frame {frame_id}");
            return;
        };
        let target = job.target;

        let detector = Arc::clone(&self.detector);
        let bus = Arc::clone(&self.bus);
        let busy = Arc::clone(&self.busy);
        let broadcast_topic = self.config.topics.broadcast.clone();

        busy.store(true, Ordering::SeqCst);
        tokio::task::spawn_blocking(move || {
            let started = Instant::now();
            let hits = match detector.predict(&frame, target) {
                Ok(hits) => hits,
                Err(e) => {
                    // A failed detection reports zero hits; the frame is
                    // not retried.
                    warn!("detector failed on frame {frame_id}: {e}");
                    counter!(FAILURES, &[failures::get_label(FailureKind::DetectorFailed)])
                        .increment(1);
                    0
                }
            };
            debug!(
                "frame {frame_id}: {hits} hits in {:.0?}",
                started.elapsed()
            );
            counter!(FRAMES_PROCESSED).increment(1);

            let result = RbMessage::initial(frame_id.to_string(), hits.to_string());
            if let Err(e) = bus.publish(&broadcast_topic, result.encode().as_bytes()) {
                warn!("failed to publish frame result: {e}");
            }
            busy.store(false, Ordering::SeqCst);
        });
    }

    fn publish_heartbeat(&self) {
        let status = if self.busy.load(Ordering::SeqCst) {
            NodeStatus::Busy
        } else {
            NodeStatus::Free
        };
        let heartbeat = Heartbeat {
            node: self.config.node_id.clone(),
            status,
        };
        self.publish(&self.config.topics.heartbeat, heartbeat.encode().as_bytes());
    }

    fn publish(&self, topic: &str, payload: &[u8]) {
        if let Err(e) = self.bus.publish(topic, payload) {
            warn!("publish to {topic} failed: {e}");
            counter!(
                FAILURES,
                &[failures::get_label(FailureKind::KafkaPublishFailed)]
            )
            .increment(1);
        }
    }
}
