//! The client's job submission envelope.
use crate::{Envelope, MalformedMessage};
use base64::{Engine, engine::general_purpose::STANDARD};
use clipseek_common::ClassId;
use serde::{Deserialize, Serialize};

/// A job submission: a video container and the object class to count.
///
/// The container bytes travel base64-encoded so the envelope stays valid
/// UTF-8 on every topic.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct VideoRequest {
    /// Base64-encoded video container bytes.
    pub video: String,
    /// Index of the object class the detector should count.
    pub target: ClassId,
}

impl VideoRequest {
    /// Wraps raw container bytes into a request.
    pub fn from_clip(clip: &[u8], target: ClassId) -> Self {
        Self {
            video: STANDARD.encode(clip),
            target,
        }
    }

    /// Recovers the raw container bytes.
    pub fn clip_bytes(&self) -> Result<Vec<u8>, MalformedMessage> {
        Ok(STANDARD.decode(&self.video)?)
    }
}

impl Envelope for VideoRequest {}
