//! Video frames and the two collaborator boundaries of the fleet: the
//! codec that turns container bytes into frames and back, and the detector
//! that counts objects in a frame.
//!
//! The coordination substrate only ever talks to [VideoCodec] and [Detect];
//! the shipped implementations ([FfmpegCodec], [BlobDetector]) can be
//! swapped for anything else satisfying the traits, and tests substitute
//! deterministic stubs.
mod codec;
mod detect;

pub use codec::FfmpegCodec;
pub use detect::{BlobDetector, ClassBand};

use clipseek_common::ClassId;
use std::fmt;
use thiserror::Error;

/// A single decoded video frame in packed RGB24 layout, row-major.
#[derive(Clone, PartialEq, Eq)]
pub struct Frame {
    pub width: u32,
    pub height: u32,
    pub data: Vec<u8>,
}

impl Frame {
    /// Number of bytes a well-formed buffer for this geometry holds.
    pub fn expected_len(&self) -> usize {
        self.width as usize * self.height as usize * 3
    }
}

impl fmt::Debug for Frame {
    // Hand-rolled so logging a frame never dumps the pixel buffer.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Frame")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("bytes", &self.data.len())
            .finish()
    }
}

/// Turns a video container into its ordered frame sequence and back.
pub trait VideoCodec: Send + Sync {
    /// Decodes a container into every frame it holds, in display order.
    fn decode(&self, video: &[u8]) -> Result<Vec<Frame>, MediaError>;

    /// Encodes frames into an MPEG-4 container at 30 fps, at the frames'
    /// own resolution.
    fn encode(&self, frames: &[Frame]) -> Result<Vec<u8>, MediaError>;
}

/// Counts occurrences of an object class in a frame.
pub trait Detect: Send + Sync {
    fn predict(&self, frame: &Frame, target: ClassId) -> Result<u32, MediaError>;
}

/// Failures at the codec or detector boundary.
#[derive(Debug, Error)]
pub enum MediaError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    /// The ffmpeg binary is not on the PATH.
    #[error("ffmpeg executable not found")]
    FfmpegMissing,
    /// ffmpeg was found but failed to process the stream.
    #[error("ffmpeg error: {0}")]
    Ffmpeg(String),
    /// The container decoded to no frames, or an empty clip was submitted
    /// for encoding.
    #[error("video contains no frames")]
    EmptyVideo,
    /// Frames of differing geometry in one clip.
    #[error("frame geometry changed mid-clip: expected {expected_width}x{expected_height}")]
    MixedGeometry {
        expected_width: u32,
        expected_height: u32,
    },
    /// A frame buffer whose length does not match its declared geometry.
    #[error("frame buffer of {len} bytes does not match {width}x{height}")]
    MalformedFrame { width: u32, height: u32, len: usize },
    /// The detector has no parameters for the requested class.
    #[error("unknown object class {0}")]
    UnknownClass(ClassId),
    /// The detector model file does not parse.
    #[error("invalid detector model: {0}")]
    InvalidModel(#[from] serde_json::Error),
}
