//! Luma-band blob detector.
//!
//! A deliberately small stand-in for a full object-detection model: each
//! known class is described by a luma band and a minimum blob area, loaded
//! from a JSON model file. A prediction thresholds the frame into a mask of
//! pixels falling inside the target class's band and counts the
//! 4-connected regions at least `min_area` pixels large. Real model
//! integrations implement [Detect] instead.
use crate::{Detect, Frame, MediaError};
use clipseek_common::ClassId;
use serde::Deserialize;
use std::{collections::HashMap, fs::File, io::BufReader, path::Path};

fn default_min_area() -> usize {
    16
}

/// Detection parameters for one object class.
#[derive(Clone, Debug, Deserialize)]
pub struct ClassBand {
    pub id: ClassId,
    pub name: String,
    /// Inclusive lower bound of the class's luma band.
    pub min_luma: u8,
    /// Inclusive upper bound of the class's luma band.
    pub max_luma: u8,
    /// Blobs smaller than this many pixels are noise, not objects.
    #[serde(default = "default_min_area")]
    pub min_area: usize,
}

#[derive(Debug, Deserialize)]
struct ModelFile {
    classes: Vec<ClassBand>,
}

/// Blob counter over per-class luma bands.
pub struct BlobDetector {
    classes: HashMap<ClassId, ClassBand>,
}

impl BlobDetector {
    /// Loads class bands from a JSON model file.
    pub fn from_model_file(path: &Path) -> Result<Self, MediaError> {
        let model: ModelFile = serde_json::from_reader(BufReader::new(File::open(path)?))?;
        Ok(Self::from_classes(model.classes))
    }

    pub fn from_classes(classes: Vec<ClassBand>) -> Self {
        Self {
            classes: classes.into_iter().map(|band| (band.id, band)).collect(),
        }
    }

    /// Rec. 601 luma, integer arithmetic.
    fn luma(r: u8, g: u8, b: u8) -> u8 {
        ((299 * r as u32 + 587 * g as u32 + 114 * b as u32) / 1000) as u8
    }
}

impl Detect for BlobDetector {
    fn predict(&self, frame: &Frame, target: ClassId) -> Result<u32, MediaError> {
        let band = self
            .classes
            .get(&target)
            .ok_or(MediaError::UnknownClass(target))?;

        let width = frame.width as usize;
        let height = frame.height as usize;
        if frame.data.len() != frame.expected_len() {
            return Err(MediaError::MalformedFrame {
                width: frame.width,
                height: frame.height,
                len: frame.data.len(),
            });
        }

        let mut mask: Vec<bool> = frame
            .data
            .chunks_exact(3)
            .map(|px| {
                let luma = Self::luma(px[0], px[1], px[2]);
                band.min_luma <= luma && luma <= band.max_luma
            })
            .collect();

        // Flood-fill each remaining masked pixel's 4-connected region,
        // clearing the mask as we go so every region is visited once.
        let mut hits = 0u32;
        let mut stack = Vec::new();
        for start in 0..mask.len() {
            if !mask[start] {
                continue;
            }
            mask[start] = false;
            stack.push(start);
            let mut area = 0usize;
            while let Some(index) = stack.pop() {
                area += 1;
                let x = index % width;
                let y = index / width;
                if x > 0 && mask[index - 1] {
                    mask[index - 1] = false;
                    stack.push(index - 1);
                }
                if x + 1 < width && mask[index + 1] {
                    mask[index + 1] = false;
                    stack.push(index + 1);
                }
                if y > 0 && mask[index - width] {
                    mask[index - width] = false;
                    stack.push(index - width);
                }
                if y + 1 < height && mask[index + width] {
                    mask[index + width] = false;
                    stack.push(index + width);
                }
            }
            if area >= band.min_area {
                hits += 1;
            }
        }

        Ok(hits)
    }
}
