//! Whole-fleet scenarios over the in-memory bus, with a scripted detector
//! and a stub codec standing in for the external collaborators.
use base64::{Engine, engine::general_purpose::STANDARD};
use clipseek_common::{ClassId, Topics};
use clipseek_media::{Detect, Frame, MediaError, VideoCodec};
use clipseek_messages::{Envelope, Heartbeat, RbMessage, VideoRequest};
use clipseek_worker::{
    bus::{MemoryBus, MessageBus},
    node::{Node, NodeConfig},
    rb::RbMode,
};
use sha2::{Digest, Sha256};
use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};
use tokio::sync::mpsc::UnboundedReceiver;

const TARGET: ClassId = 76;

/// Codec for 2x2 test frames: one count byte, then each frame's 12 pixel
/// bytes. The first pixel byte doubles as the frame's index so a scripted
/// detector can recognize frames without real inference.
struct StubCodec;

const FRAME_BYTES: usize = 12;

impl VideoCodec for StubCodec {
    fn decode(&self, video: &[u8]) -> Result<Vec<Frame>, MediaError> {
        let (&count, rest) = video.split_first().ok_or(MediaError::EmptyVideo)?;
        if rest.len() != count as usize * FRAME_BYTES {
            return Err(MediaError::Ffmpeg("stub container truncated".into()));
        }
        Ok(rest
            .chunks_exact(FRAME_BYTES)
            .map(|chunk| Frame {
                width: 2,
                height: 2,
                data: chunk.to_vec(),
            })
            .collect())
    }

    fn encode(&self, frames: &[Frame]) -> Result<Vec<u8>, MediaError> {
        if frames.is_empty() {
            return Err(MediaError::EmptyVideo);
        }
        let mut video = vec![frames.len() as u8];
        for frame in frames {
            video.extend_from_slice(&frame.data);
        }
        Ok(video)
    }
}

fn test_video(frame_count: usize) -> Vec<u8> {
    let frames: Vec<Frame> = (0..frame_count)
        .map(|index| {
            let mut data = vec![0u8; FRAME_BYTES];
            data[0] = index as u8;
            Frame {
                width: 2,
                height: 2,
                data,
            }
        })
        .collect();
    StubCodec.encode(&frames).expect("stub encode")
}

/// Frame indices carried in a stub-codec reply.
fn reply_frame_indices(reply: &[u8]) -> Vec<u8> {
    StubCodec
        .decode(reply)
        .expect("stub decode")
        .iter()
        .map(|frame| frame.data[0])
        .collect()
}

/// Returns the scripted hit count for whichever frame it is shown.
struct ScriptedDetector {
    hits: Vec<u32>,
}

impl Detect for ScriptedDetector {
    fn predict(&self, frame: &Frame, _target: ClassId) -> Result<u32, MediaError> {
        let index = frame.data[0] as usize;
        Ok(self.hits.get(index).copied().unwrap_or(0))
    }
}

/// Scripted detector that stalls on its first prediction, making its node
/// a straggler.
struct StragglingDetector {
    hits: Vec<u32>,
    delay: Duration,
    delayed_once: AtomicBool,
}

impl Detect for StragglingDetector {
    fn predict(&self, frame: &Frame, _target: ClassId) -> Result<u32, MediaError> {
        if !self.delayed_once.swap(true, Ordering::SeqCst) {
            std::thread::sleep(self.delay);
        }
        let index = frame.data[0] as usize;
        Ok(self.hits.get(index).copied().unwrap_or(0))
    }
}

fn fast_config(node_id: &str, rb_mode: RbMode) -> NodeConfig {
    let mut config = NodeConfig::new(node_id.to_string(), Topics::default());
    config.heartbeat_interval = Duration::from_millis(10);
    config.snapshot_interval = Duration::from_millis(25);
    config.dispatch_interval = Duration::from_millis(5);
    config.rb_mode = rb_mode;
    config
}

fn spawn_node(bus: &MemoryBus, node_id: &str, rb_mode: RbMode, detector: Arc<dyn Detect>) {
    let node = Node::new(
        fast_config(node_id, rb_mode),
        Arc::new(bus.clone()),
        detector,
        Arc::new(StubCodec),
    );
    let inbound = bus.subscribe(&node.subscriptions());
    tokio::spawn(node.run(inbound));
}

/// A peer that heartbeats as free but never does any work.
fn spawn_silent_peer(bus: &MemoryBus, node_id: &str) {
    let bus = bus.clone();
    let node_id = node_id.to_string();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_millis(10));
        loop {
            interval.tick().await;
            let heartbeat = Heartbeat {
                node: node_id.clone(),
                status: clipseek_common::NodeStatus::Free,
            };
            let _ = bus.publish(&Topics::default().heartbeat, heartbeat.encode().as_bytes());
        }
    });
}

fn submit(bus: &MemoryBus, node_id: &str, video: &[u8]) {
    let request = VideoRequest::from_clip(video, TARGET);
    let inbox = Topics::default().request_inbox(&node_id.to_string());
    bus.publish(&inbox, request.encode().as_bytes())
        .expect("submit");
}

async fn await_reply(client: &mut UnboundedReceiver<clipseek_worker::bus::Inbound>) -> Vec<u8> {
    let message = tokio::time::timeout(Duration::from_secs(10), client.recv())
        .await
        .expect("no reply before timeout")
        .expect("client channel closed");
    STANDARD.decode(&message.payload).expect("base64 reply")
}

/// Lets the fleet exchange enough heartbeats for a full snapshot before a
/// job begins; the node set is frozen into each broadcast at creation.
async fn settle() {
    tokio::time::sleep(Duration::from_millis(120)).await;
}

#[tokio::test(flavor = "multi_thread")]
async fn single_node_returns_the_best_scoring_subclip() {
    let bus = MemoryBus::new();
    let mut client = bus.subscribe(&[Topics::default().client]);
    let detector = Arc::new(ScriptedDetector {
        hits: vec![2, 5, 0],
    });
    spawn_node(&bus, "solo", RbMode::Plain, detector);
    settle().await;

    submit(&bus, "solo", &test_video(3));

    // The zero-hit frame scores −1, so the best range is the first two.
    let reply = await_reply(&mut client).await;
    assert_eq!(reply_frame_indices(&reply), vec![0, 1]);
}

#[tokio::test(flavor = "multi_thread")]
async fn three_nodes_share_dispatch_and_return_the_full_range() {
    let bus = MemoryBus::new();
    let mut client = bus.subscribe(&[Topics::default().client]);
    for node_id in ["alpha", "beta", "gamma"] {
        let detector = Arc::new(ScriptedDetector {
            hits: vec![1, 3, 4, 2],
        });
        spawn_node(&bus, node_id, RbMode::Plain, detector);
    }
    settle().await;

    submit(&bus, "alpha", &test_video(4));

    let reply = await_reply(&mut client).await;
    assert_eq!(reply_frame_indices(&reply), vec![0, 1, 2, 3]);
}

#[tokio::test(flavor = "multi_thread")]
async fn a_silent_peer_does_not_stall_the_job() {
    let bus = MemoryBus::new();
    let mut client = bus.subscribe(&[Topics::default().client]);
    for node_id in ["alpha", "beta", "gamma"] {
        let detector = Arc::new(ScriptedDetector {
            hits: vec![1, 2, 1],
        });
        spawn_node(&bus, node_id, RbMode::Plain, detector);
    }
    // Heartbeats like a worker, works like a brick. The fleet counts it in
    // the node set (n = 4, f = 1) and the leader will offer it frames.
    spawn_silent_peer(&bus, "brick");
    settle().await;

    submit(&bus, "alpha", &test_video(3));

    let reply = await_reply(&mut client).await;
    assert_eq!(reply_frame_indices(&reply), vec![0, 1, 2]);
}

#[tokio::test(flavor = "multi_thread")]
async fn straggler_frames_are_reassigned() {
    let bus = MemoryBus::new();
    let mut client = bus.subscribe(&[Topics::default().client]);
    spawn_node(
        &bus,
        "alpha",
        RbMode::Plain,
        Arc::new(ScriptedDetector {
            hits: vec![1, 1, 1, 1],
        }),
    );
    spawn_node(
        &bus,
        "beta",
        RbMode::Plain,
        Arc::new(ScriptedDetector {
            hits: vec![1, 1, 1, 1],
        }),
    );
    // Whichever frame this node is handed first is stuck for five
    // seconds; the leader must reassign it. The late duplicate result is
    // deduplicated by the broadcast layer.
    spawn_node(
        &bus,
        "gamma",
        RbMode::Plain,
        Arc::new(StragglingDetector {
            hits: vec![1, 1, 1, 1],
            delay: Duration::from_secs(5),
            delayed_once: AtomicBool::new(false),
        }),
    );
    settle().await;

    let submitted = std::time::Instant::now();
    submit(&bus, "alpha", &test_video(4));

    let reply = await_reply(&mut client).await;
    assert_eq!(reply_frame_indices(&reply), vec![0, 1, 2, 3]);
    // Reassignment, not the straggler waking up, must have completed the
    // job.
    assert!(
        submitted.elapsed() < Duration::from_secs(4),
        "reply only arrived after the straggler finished"
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn all_zero_hits_still_return_a_single_frame_clip() {
    let bus = MemoryBus::new();
    let mut client = bus.subscribe(&[Topics::default().client]);
    let detector = Arc::new(ScriptedDetector {
        hits: vec![0, 0, 0, 0, 0],
    });
    spawn_node(&bus, "solo", RbMode::Plain, detector);
    settle().await;

    submit(&bus, "solo", &test_video(5));

    let reply = await_reply(&mut client).await;
    assert_eq!(reply_frame_indices(&reply).len(), 1);
}

#[tokio::test(flavor = "multi_thread")]
async fn hashed_broadcast_mode_completes_the_pipeline() {
    let bus = MemoryBus::new();
    let mut client = bus.subscribe(&[Topics::default().client]);
    for node_id in ["alpha", "beta", "gamma"] {
        let detector = Arc::new(ScriptedDetector { hits: vec![2, 1] });
        spawn_node(&bus, node_id, RbMode::Hashed, detector);
    }
    settle().await;

    submit(&bus, "alpha", &test_video(2));

    let reply = await_reply(&mut client).await;
    assert_eq!(reply_frame_indices(&reply), vec![0, 1]);
}

fn digest_hex(data: &str) -> String {
    Sha256::digest(data.as_bytes())
        .iter()
        .map(|byte| format!("{byte:02x}"))
        .collect()
}

// Current-thread runtime: the nodes cannot interleave with the tamperer's
// burst of publishes, so every honest node is guaranteed to count the
// forged digests before its peers' genuine echoes.
#[tokio::test]
async fn hashed_mode_rejects_a_tampering_sender() {
    let bus = MemoryBus::new();
    let mut client = bus.subscribe(&[Topics::default().client]);
    for node_id in ["alpha", "beta", "gamma"] {
        let detector = Arc::new(ScriptedDetector { hits: vec![1, 1] });
        spawn_node(&bus, node_id, RbMode::Hashed, detector);
    }
    // The tamperer heartbeats like a worker, so the honest nodes freeze it
    // into the node set (n = 4, f = 1).
    spawn_silent_peer(&bus, "mallory");
    settle().await;

    // The tamperer opens a job itself: a well-formed initial, followed by
    // a burst of echoes and readies vouching for a different payload's
    // digest. Messages are counted sender-agnostically, so the repeats
    // carry the forged digest over both thresholds ahead of any honest
    // echo.
    let genuine = VideoRequest::from_clip(&test_video(2), TARGET).encode();
    let forged_digest = digest_hex("a payload nobody sent");
    let broadcast = Topics::default().broadcast;
    bus.publish(
        &broadcast,
        RbMessage::initial("client", genuine).encode().as_bytes(),
    )
    .expect("tampered initial");
    for _ in 0..8 {
        bus.publish(
            &broadcast,
            RbMessage::echo("client", forged_digest.clone())
                .encode()
                .as_bytes(),
        )
        .expect("forged echo");
    }
    for _ in 0..8 {
        bus.publish(
            &broadcast,
            RbMessage::ready("client", forged_digest.clone())
                .encode()
                .as_bytes(),
        )
        .expect("forged ready");
    }

    // Every honest node's digest check fires against its retained data and
    // the subject is poisoned: the job is never accepted, nothing is
    // dispatched, and no subclip appears on the client topic.
    let reply = tokio::time::timeout(Duration::from_millis(1500), client.recv()).await;
    assert!(
        reply.is_err(),
        "a tampered job must not produce a subclip"
    );
}
