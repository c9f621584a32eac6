//! rollcall-vision: ONNX face capability.
//!
//! SCRFD locates faces and their landmarks; ArcFace encodes aligned crops
//! into 512-dimensional vectors compared by cosine distance.

pub mod alignment;
pub mod encoder;
pub mod locator;

use encoder::FaceEncoder;
use image::RgbImage;
use locator::FaceLocator;
use rollcall_core::{
    BoundingBox, CapabilityError, Comparator, CosineComparator, Encoding, FaceCapability,
};
use std::path::{Path, PathBuf};
use thiserror::Error;

pub const LOCATOR_MODEL: &str = "det_10g.onnx";
pub const ENCODER_MODEL: &str = "w600k_r50.onnx";

#[derive(Error, Debug)]
pub enum VisionError {
    #[error("model file not found: {0} (download the insightface buffalo_l pack)")]
    ModelNotFound(PathBuf),
    #[error("inference failed: {0}")]
    Inference(String),
    #[error("face region lies outside the image")]
    FaceOutsideImage,
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

/// `models/` under the rollcall data directory.
pub fn default_model_dir() -> PathBuf {
    rollcall_core::paths::data_dir().join("models")
}

/// Face capability backed by the SCRFD locator and the ArcFace encoder.
pub struct OnnxFaceCapability {
    locator: FaceLocator,
    encoder: FaceEncoder,
}

impl OnnxFaceCapability {
    /// Load both models from `model_dir`.
    pub fn load(model_dir: &Path) -> Result<Self, VisionError> {
        Ok(Self {
            locator: FaceLocator::load(&model_dir.join(LOCATOR_MODEL))?,
            encoder: FaceEncoder::load(&model_dir.join(ENCODER_MODEL))?,
        })
    }
}

impl Comparator for OnnxFaceCapability {
    fn distance(&self, a: &Encoding, b: &Encoding) -> f32 {
        CosineComparator.distance(a, b)
    }
}

impl FaceCapability for OnnxFaceCapability {
    fn locate(&mut self, image: &RgbImage) -> Result<Vec<BoundingBox>, CapabilityError> {
        self.locator
            .locate(image)
            .map_err(|e| CapabilityError::Locate(e.to_string()))
    }

    fn encode(
        &mut self,
        image: &RgbImage,
        boxes: &[BoundingBox],
    ) -> Result<Vec<Encoding>, CapabilityError> {
        boxes
            .iter()
            .map(|face| {
                self.encoder
                    .encode(image, face)
                    .map_err(|e| CapabilityError::Encode(e.to_string()))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_reports_missing_model() {
        let dir = std::env::temp_dir().join("rollcall-vision-no-models");
        match OnnxFaceCapability::load(&dir) {
            Err(VisionError::ModelNotFound(path)) => assert!(path.ends_with(LOCATOR_MODEL)),
            Err(other) => panic!("unexpected error: {other}"),
            Ok(_) => panic!("models should be missing"),
        }
    }

    #[test]
    fn test_default_model_dir_ends_with_models() {
        assert!(default_model_dir().ends_with("rollcall/models"));
    }
}
