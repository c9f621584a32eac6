use image::RgbImage;
use serde::{Deserialize, Serialize};
use std::time::Instant;

/// Bounding box for a detected face, with optional facial landmarks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub confidence: f32,
    /// Five-point facial landmarks: [left_eye, right_eye, nose, left_mouth, right_mouth].
    pub landmarks: Option<[(f32, f32); 5]>,
}

impl BoundingBox {
    /// Box without landmarks and with full confidence.
    pub fn new(x: f32, y: f32, width: f32, height: f32) -> Self {
        Self {
            x,
            y,
            width,
            height,
            confidence: 1.0,
            landmarks: None,
        }
    }

    /// Scale coordinates (and landmarks) by `factor`.
    ///
    /// Used to map boxes found on a downscaled detection frame back to the
    /// full-resolution frame.
    pub fn scaled(&self, factor: f32) -> Self {
        Self {
            x: self.x * factor,
            y: self.y * factor,
            width: self.width * factor,
            height: self.height * factor,
            confidence: self.confidence,
            landmarks: self
                .landmarks
                .map(|lms| lms.map(|(lx, ly)| (lx * factor, ly * factor))),
        }
    }

    /// Integer pixel rectangle `(x, y, width, height)` clipped to an image of
    /// `image_width` × `image_height`.
    ///
    /// Returns `None` if nothing of the box lies inside the image.
    pub fn pixel_rect(&self, image_width: u32, image_height: u32) -> Option<(u32, u32, u32, u32)> {
        let x0 = self.x.floor().max(0.0);
        let y0 = self.y.floor().max(0.0);
        let x1 = (self.x + self.width).ceil().min(image_width as f32);
        let y1 = (self.y + self.height).ceil().min(image_height as f32);
        if x1 <= x0 || y1 <= y0 {
            return None;
        }
        Some((x0 as u32, y0 as u32, (x1 - x0) as u32, (y1 - y0) as u32))
    }
}

/// Face encoding vector. Dimensionality is fixed by the capability that produced it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Encoding {
    pub values: Vec<f32>,
    /// Model version that produced this encoding (e.g., "w600k_r50").
    pub model_version: Option<String>,
}

impl Encoding {
    pub fn new(values: Vec<f32>) -> Self {
        Self {
            values,
            model_version: None,
        }
    }

    pub fn dim(&self) -> usize {
        self.values.len()
    }

    /// Cosine similarity in [-1, 1]. Zero vectors compare as 0.0.
    pub fn similarity(&self, other: &Encoding) -> f32 {
        let mut dot = 0.0f32;
        let mut norm_a = 0.0f32;
        let mut norm_b = 0.0f32;

        for (a, b) in self.values.iter().zip(other.values.iter()) {
            dot += a * b;
            norm_a += a * a;
            norm_b += b * b;
        }

        let denom = norm_a.sqrt() * norm_b.sqrt();
        if denom > 0.0 { dot / denom } else { 0.0 }
    }

    pub fn euclidean_distance(&self, other: &Encoding) -> f32 {
        self.values
            .iter()
            .zip(other.values.iter())
            .map(|(a, b)| (a - b).powi(2))
            .sum::<f32>()
            .sqrt()
    }
}

/// An enrolled face: a case-normalized identity and its encoding.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FaceSignature {
    pub identity: String,
    pub encoding: Encoding,
}

/// Trim and lower-case an identity string.
pub fn normalize_identity(raw: &str) -> String {
    raw.trim().to_lowercase()
}

/// Distance between two encodings, and the tolerance test built on it.
pub trait Comparator {
    fn distance(&self, a: &Encoding, b: &Encoding) -> f32;

    fn is_match(&self, a: &Encoding, b: &Encoding, tolerance: f32) -> bool {
        self.distance(a, b) <= tolerance
    }
}

/// Euclidean distance, the metric dlib-style 128-d encodings are compared with.
#[derive(Debug, Clone, Copy, Default)]
pub struct EuclideanComparator;

impl Comparator for EuclideanComparator {
    fn distance(&self, a: &Encoding, b: &Encoding) -> f32 {
        a.euclidean_distance(b)
    }
}

/// Cosine distance `1 - cos(a, b)`, in [0, 2].
#[derive(Debug, Clone, Copy, Default)]
pub struct CosineComparator;

impl Comparator for CosineComparator {
    fn distance(&self, a: &Encoding, b: &Encoding) -> f32 {
        1.0 - a.similarity(b)
    }
}

/// Result of matching a probe encoding against the enrolled signatures.
#[derive(Debug, Clone, PartialEq)]
pub struct MatchResult {
    /// Identity of the selected signature (if any).
    pub identity: Option<String>,
    /// Store position of the selected signature.
    pub index: Option<usize>,
    /// Distance to the selected signature.
    pub distance: Option<f32>,
}

impl MatchResult {
    pub fn no_match() -> Self {
        Self {
            identity: None,
            index: None,
            distance: None,
        }
    }

    pub fn matched(&self) -> bool {
        self.identity.is_some()
    }
}

/// Strategy for selecting a signature for a probe encoding.
pub trait Matcher: Send {
    fn find(
        &self,
        probe: &Encoding,
        gallery: &[FaceSignature],
        tolerance: f32,
        comparator: &dyn Comparator,
    ) -> MatchResult;
}

/// Selects the first signature, in store order, that is within tolerance.
#[derive(Debug, Clone, Copy, Default)]
pub struct FirstMatcher;

impl Matcher for FirstMatcher {
    fn find(
        &self,
        probe: &Encoding,
        gallery: &[FaceSignature],
        tolerance: f32,
        comparator: &dyn Comparator,
    ) -> MatchResult {
        for (i, signature) in gallery.iter().enumerate() {
            if comparator.is_match(probe, &signature.encoding, tolerance) {
                return MatchResult {
                    identity: Some(signature.identity.clone()),
                    index: Some(i),
                    distance: Some(comparator.distance(probe, &signature.encoding)),
                };
            }
        }
        MatchResult::no_match()
    }
}

/// Selects the closest signature within tolerance. Equal distances resolve to
/// the earlier signature.
#[derive(Debug, Clone, Copy, Default)]
pub struct NearestMatcher;

impl Matcher for NearestMatcher {
    fn find(
        &self,
        probe: &Encoding,
        gallery: &[FaceSignature],
        tolerance: f32,
        comparator: &dyn Comparator,
    ) -> MatchResult {
        let mut best: Option<(usize, f32)> = None;

        for (i, signature) in gallery.iter().enumerate() {
            if !comparator.is_match(probe, &signature.encoding, tolerance) {
                continue;
            }
            let distance = comparator.distance(probe, &signature.encoding);
            let closer = match best {
                None => true,
                Some((_, best_distance)) => distance < best_distance,
            };
            if closer {
                best = Some((i, distance));
            }
        }

        match best {
            Some((idx, distance)) => MatchResult {
                identity: Some(gallery[idx].identity.clone()),
                index: Some(idx),
                distance: Some(distance),
            },
            None => MatchResult::no_match(),
        }
    }
}

/// Signature selection policy, chosen by configuration.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum MatchPolicy {
    #[default]
    First,
    Nearest,
}

impl MatchPolicy {
    pub fn matcher(self) -> Box<dyn Matcher> {
        match self {
            MatchPolicy::First => Box::new(FirstMatcher),
            MatchPolicy::Nearest => Box::new(NearestMatcher),
        }
    }
}

impl std::str::FromStr for MatchPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "first" => Ok(MatchPolicy::First),
            "nearest" => Ok(MatchPolicy::Nearest),
            other => Err(format!("unknown match policy: {other} (expected first or nearest)")),
        }
    }
}

/// A captured RGB video frame.
#[derive(Clone)]
pub struct Frame {
    pub image: RgbImage,
    pub sequence: u64,
    pub timestamp: Instant,
}

impl Frame {
    pub fn new(image: RgbImage, sequence: u64) -> Self {
        Self {
            image,
            sequence,
            timestamp: Instant::now(),
        }
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }
}

/// Visual classification handed to the overlay sink.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Classification {
    Known,
    Unknown,
}

impl Classification {
    pub fn as_str(self) -> &'static str {
        match self {
            Classification::Known => "known",
            Classification::Unknown => "unknown",
        }
    }
}

/// One face overlay: box, label and classification.
#[derive(Debug, Clone, PartialEq)]
pub struct FaceOverlay {
    pub bbox: BoundingBox,
    pub label: String,
    pub classification: Classification,
}
