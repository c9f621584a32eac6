//! ArcFace face encoder via ONNX Runtime.

use crate::alignment::{self, ALIGNED_SIZE};
use crate::VisionError;
use image::RgbImage;
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use rollcall_core::{BoundingBox, Encoding};
use std::path::Path;

// ArcFace normalizes symmetrically, unlike the locator.
const PIXEL_MEAN: f32 = 127.5;
const PIXEL_STD: f32 = 127.5;
const ENCODING_DIM: usize = 512;
const MODEL_VERSION: &str = "w600k_r50";

pub struct FaceEncoder {
    session: Session,
}

impl FaceEncoder {
    pub fn load(model_path: &Path) -> Result<Self, VisionError> {
        if !model_path.exists() {
            return Err(VisionError::ModelNotFound(model_path.to_path_buf()));
        }

        let session = Session::builder()?
            .with_intra_threads(2)?
            .commit_from_file(model_path)?;
        tracing::info!(path = %model_path.display(), "face encoder model loaded");

        Ok(Self { session })
    }

    /// L2-normalized encoding of `face` in `image`.
    pub fn encode(&mut self, image: &RgbImage, face: &BoundingBox) -> Result<Encoding, VisionError> {
        let crop = canonical_crop(image, face).ok_or(VisionError::FaceOutsideImage)?;
        let input = to_tensor(&crop);

        let outputs = self
            .session
            .run(ort::inputs![TensorRef::from_array_view(input.view())?])?;
        let (_, raw) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| VisionError::Inference(format!("encoding output: {e}")))?;

        if raw.len() != ENCODING_DIM {
            return Err(VisionError::Inference(format!(
                "expected {ENCODING_DIM} values, model produced {}",
                raw.len()
            )));
        }
        Ok(Encoding {
            values: l2_normalized(raw),
            model_version: Some(MODEL_VERSION.to_string()),
        })
    }
}

/// Landmark-aligned crop, or a centred square when landmarks are missing or
/// degenerate.
fn canonical_crop(image: &RgbImage, face: &BoundingBox) -> Option<RgbImage> {
    face.landmarks
        .as_ref()
        .and_then(|marks| alignment::align(image, marks))
        .or_else(|| alignment::centre_crop(image, face))
}

fn to_tensor(crop: &RgbImage) -> Array4<f32> {
    let size = ALIGNED_SIZE as usize;
    Array4::from_shape_fn((1, 3, size, size), |(_, c, y, x)| {
        (crop.get_pixel(x as u32, y as u32)[c] as f32 - PIXEL_MEAN) / PIXEL_STD
    })
}

fn l2_normalized(raw: &[f32]) -> Vec<f32> {
    let norm = raw.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm > 0.0 {
        raw.iter().map(|v| v / norm).collect()
    } else {
        raw.to_vec()
    }
}
