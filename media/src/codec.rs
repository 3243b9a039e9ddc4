//! MPEG-4 decode/encode by driving the system ffmpeg binary.
use crate::{Frame, MediaError, VideoCodec};
use ffmpeg_sidecar::command::{FfmpegCommand, ffmpeg_is_installed};
use std::io::Write;
use tracing::debug;

const CLIP_FRAME_RATE: &str = "30";

/// Codec backed by an `ffmpeg` subprocess.
///
/// Container bytes pass through a temporary file on the way in (ffmpeg
/// needs a seekable input to demux MP4) and on the way out; raw RGB24
/// frames stream over pipes. Availability of the binary is checked per
/// call, so a missing ffmpeg surfaces as a job-time [MediaError] rather
/// than a startup failure.
#[derive(Clone, Copy, Debug, Default)]
pub struct FfmpegCodec;

impl VideoCodec for FfmpegCodec {
    fn decode(&self, video: &[u8]) -> Result<Vec<Frame>, MediaError> {
        if !ffmpeg_is_installed() {
            return Err(MediaError::FfmpegMissing);
        }

        let mut container = tempfile::Builder::new().suffix(".mp4").tempfile()?;
        container.write_all(video)?;
        container.flush()?;

        let mut child = FfmpegCommand::new()
            .input(&container.path().to_string_lossy())
            .rawvideo()
            .spawn()?;

        let frames: Vec<Frame> = child
            .iter()
            .map_err(|e| MediaError::Ffmpeg(e.to_string()))?
            .filter_frames()
            .map(|frame| Frame {
                width: frame.width,
                height: frame.height,
                data: frame.data,
            })
            .collect();

        let status = child.wait()?;
        if !status.success() {
            return Err(MediaError::Ffmpeg(format!(
                "decode exited with {status}"
            )));
        }
        if frames.is_empty() {
            return Err(MediaError::EmptyVideo);
        }
        debug!("decoded {} frames of {:?}", frames.len(), frames[0]);
        Ok(frames)
    }

    fn encode(&self, frames: &[Frame]) -> Result<Vec<u8>, MediaError> {
        let first = frames.first().ok_or(MediaError::EmptyVideo)?;
        let (width, height) = (first.width, first.height);
        for frame in frames {
            if frame.width != width || frame.height != height {
                return Err(MediaError::MixedGeometry {
                    expected_width: width,
                    expected_height: height,
                });
            }
            if frame.data.len() != frame.expected_len() {
                return Err(MediaError::MalformedFrame {
                    width: frame.width,
                    height: frame.height,
                    len: frame.data.len(),
                });
            }
        }
        if !ffmpeg_is_installed() {
            return Err(MediaError::FfmpegMissing);
        }

        let container = tempfile::Builder::new().suffix(".mp4").tempfile()?;

        let geometry = format!("{width}x{height}");
        let mut child = FfmpegCommand::new()
            .args([
                "-f",
                "rawvideo",
                "-pix_fmt",
                "rgb24",
                "-video_size",
                geometry.as_str(),
                "-framerate",
                CLIP_FRAME_RATE,
            ])
            .input("-")
            .args(["-c:v", "mpeg4", "-pix_fmt", "yuv420p", "-f", "mp4"])
            .overwrite()
            .output(&container.path().to_string_lossy())
            .spawn()?;

        let mut stdin = child
            .take_stdin()
            .ok_or_else(|| MediaError::Ffmpeg("no stdin pipe".into()))?;
        let pixels: Vec<u8> = frames
            .iter()
            .flat_map(|frame| frame.data.iter().copied())
            .collect();
        // Feed frames from a separate thread while this one drains
        // ffmpeg's output, or a chatty encoder can fill its pipe and stall
        // against our unfinished writes. Dropping the pipe signals
        // end-of-stream to the muxer.
        let writer = std::thread::spawn(move || stdin.write_all(&pixels));
        for _ in child
            .iter()
            .map_err(|e| MediaError::Ffmpeg(e.to_string()))?
        {}
        writer
            .join()
            .map_err(|_| MediaError::Ffmpeg("frame writer panicked".into()))??;

        let status = child.wait()?;
        if !status.success() {
            return Err(MediaError::Ffmpeg(format!(
                "encode exited with {status}"
            )));
        }

        Ok(std::fs::read(container.path())?)
    }
}
