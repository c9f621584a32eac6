//! SCRFD face locator via ONNX Runtime.
//!
//! Three strides, two anchors per grid cell, distance-encoded boxes and
//! five-point landmarks, followed by greedy NMS.

use crate::VisionError;
use image::imageops::FilterType;
use image::{Rgb, RgbImage};
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use rollcall_core::BoundingBox;
use std::path::Path;

const INPUT_SIZE: u32 = 640;
const PIXEL_MEAN: f32 = 127.5;
const PIXEL_STD: f32 = 128.0;
const SCORE_THRESHOLD: f32 = 0.5;
const NMS_IOU: f32 = 0.4;
const STRIDES: [usize; 3] = [8, 16, 32];
const ANCHORS_PER_CELL: usize = 2;

/// Where a letterboxed image sits inside the square model input.
#[derive(Debug, Clone, Copy)]
struct Letterbox {
    scale: f32,
    offset_x: u32,
    offset_y: u32,
}

impl Letterbox {
    fn fit(width: u32, height: u32) -> Self {
        let scale = (INPUT_SIZE as f32 / width as f32).min(INPUT_SIZE as f32 / height as f32);
        let (w, h) = Self::scaled_dims(width, height, scale);
        Self {
            scale,
            offset_x: (INPUT_SIZE - w) / 2,
            offset_y: (INPUT_SIZE - h) / 2,
        }
    }

    fn scaled_dims(width: u32, height: u32, scale: f32) -> (u32, u32) {
        (
            ((width as f32 * scale).round() as u32).clamp(1, INPUT_SIZE),
            ((height as f32 * scale).round() as u32).clamp(1, INPUT_SIZE),
        )
    }

    /// Map a point from model input space back to the source image.
    fn unmap(&self, x: f32, y: f32) -> (f32, f32) {
        (
            (x - self.offset_x as f32) / self.scale,
            (y - self.offset_y as f32) / self.scale,
        )
    }
}

/// Output slots of one stride: (scores, boxes, landmarks).
type StrideOutputs = (usize, usize, usize);

pub struct FaceLocator {
    session: Session,
    outputs: [StrideOutputs; 3],
}

impl FaceLocator {
    pub fn load(model_path: &Path) -> Result<Self, VisionError> {
        if !model_path.exists() {
            return Err(VisionError::ModelNotFound(model_path.to_path_buf()));
        }

        let session = Session::builder()?
            .with_intra_threads(2)?
            .commit_from_file(model_path)?;

        let names: Vec<String> = session
            .outputs()
            .iter()
            .map(|o| o.name().to_string())
            .collect();
        if names.len() < 9 {
            return Err(VisionError::Inference(format!(
                "face locator needs 9 outputs, model has {}",
                names.len()
            )));
        }
        let outputs = output_layout(&names);
        tracing::info!(path = %model_path.display(), ?outputs, "face locator model loaded");

        Ok(Self { session, outputs })
    }

    /// Faces in `image`, highest confidence first.
    pub fn locate(&mut self, image: &RgbImage) -> Result<Vec<BoundingBox>, VisionError> {
        if image.width() == 0 || image.height() == 0 {
            return Ok(Vec::new());
        }
        let (input, letterbox) = prepare(image);
        let outputs = self
            .session
            .run(ort::inputs![TensorRef::from_array_view(input.view())?])?;

        let mut candidates = Vec::new();
        for (&stride, &(score_at, box_at, mark_at)) in STRIDES.iter().zip(self.outputs.iter()) {
            let extract = |at: usize, what: &str| {
                outputs[at]
                    .try_extract_tensor::<f32>()
                    .map(|(_, data)| data)
                    .map_err(|e| VisionError::Inference(format!("{what} at stride {stride}: {e}")))
            };
            let heads = StrideHeads {
                scores: extract(score_at, "scores")?,
                boxes: extract(box_at, "boxes")?,
                landmarks: extract(mark_at, "landmarks")?,
            };
            candidates.extend(heads.decode(stride, &letterbox));
        }

        Ok(suppress(candidates, NMS_IOU))
    }
}

/// Letterbox `image` into the square model input and normalize to NCHW.
fn prepare(image: &RgbImage) -> (Array4<f32>, Letterbox) {
    let letterbox = Letterbox::fit(image.width(), image.height());
    let (w, h) = Letterbox::scaled_dims(image.width(), image.height(), letterbox.scale);
    let resized = image::imageops::resize(image, w, h, FilterType::Triangle);

    let pad = PIXEL_MEAN as u8;
    let mut canvas = RgbImage::from_pixel(INPUT_SIZE, INPUT_SIZE, Rgb([pad, pad, pad]));
    image::imageops::replace(
        &mut canvas,
        &resized,
        letterbox.offset_x as i64,
        letterbox.offset_y as i64,
    );

    let size = INPUT_SIZE as usize;
    let tensor = Array4::from_shape_fn((1, 3, size, size), |(_, c, y, x)| {
        let value = canvas.get_pixel(x as u32, y as u32)[c] as f32;
        (value - PIXEL_MEAN) / PIXEL_STD
    });
    (tensor, letterbox)
}

/// Name-based output discovery (`score_8`, `bbox_16`, `kps_32`, ...), else
/// the conventional export order: scores, then boxes, then landmarks.
fn output_layout(names: &[String]) -> [StrideOutputs; 3] {
    let slot = |head: &str, stride: usize| {
        let wanted = format!("{head}_{stride}");
        names.iter().position(|n| *n == wanted)
    };
    let by_name = |stride: usize| -> Option<StrideOutputs> {
        Some((slot("score", stride)?, slot("bbox", stride)?, slot("kps", stride)?))
    };

    match (by_name(STRIDES[0]), by_name(STRIDES[1]), by_name(STRIDES[2])) {
        (Some(a), Some(b), Some(c)) => [a, b, c],
        _ => {
            tracing::debug!(?names, "unrecognised output names; using positional layout");
            [(0, 3, 6), (1, 4, 7), (2, 5, 8)]
        }
    }
}

/// Raw head outputs of one stride.
struct StrideHeads<'a> {
    scores: &'a [f32],
    boxes: &'a [f32],
    landmarks: &'a [f32],
}

impl StrideHeads<'_> {
    fn decode(&self, stride: usize, letterbox: &Letterbox) -> Vec<BoundingBox> {
        let cells_x = INPUT_SIZE as usize / stride;
        let step = stride as f32;

        self.scores
            .iter()
            .enumerate()
            .filter(|&(_, &score)| score > SCORE_THRESHOLD)
            .filter_map(|(anchor, &score)| {
                let cell = anchor / ANCHORS_PER_CELL;
                let cx = (cell % cells_x) as f32 * step;
                let cy = (cell / cells_x) as f32 * step;

                let d = self.boxes.get(anchor * 4..anchor * 4 + 4)?;
                let (x0, y0) = letterbox.unmap(cx - d[0] * step, cy - d[1] * step);
                let (x1, y1) = letterbox.unmap(cx + d[2] * step, cy + d[3] * step);

                let landmarks = self
                    .landmarks
                    .get(anchor * 10..anchor * 10 + 10)
                    .map(|k| {
                        std::array::from_fn(|i| {
                            letterbox.unmap(cx + k[2 * i] * step, cy + k[2 * i + 1] * step)
                        })
                    });

                Some(BoundingBox {
                    x: x0,
                    y: y0,
                    width: x1 - x0,
                    height: y1 - y0,
                    confidence: score,
                    landmarks,
                })
            })
            .collect()
    }
}

/// Greedy non-maximum suppression; survivors ordered by confidence.
fn suppress(mut candidates: Vec<BoundingBox>, max_iou: f32) -> Vec<BoundingBox> {
    candidates.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));
    let mut kept: Vec<BoundingBox> = Vec::new();
    for candidate in candidates {
        if kept.iter().all(|k| overlap(k, &candidate) <= max_iou) {
            kept.push(candidate);
        }
    }
    kept
}

/// Intersection over union.
fn overlap(a: &BoundingBox, b: &BoundingBox) -> f32 {
    let iw = ((a.x + a.width).min(b.x + b.width) - a.x.max(b.x)).max(0.0);
    let ih = ((a.y + a.height).min(b.y + b.height) - a.y.max(b.y)).max(0.0);
    let inter = iw * ih;
    let union = a.width * a.height + b.width * b.height - inter;
    if union > 0.0 {
        inter / union
    } else {
        0.0
    }
}
