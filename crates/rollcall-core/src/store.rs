//! Signature store: the enrolled faces and the identity queries against them.

use crate::capability::FaceCapability;
use crate::gallery::{EnrollmentCollection, GalleryError};
use crate::types::{
    normalize_identity, Comparator, Encoding, FaceSignature, MatchPolicy, MatchResult, Matcher,
};
use thiserror::Error;

/// Tolerance used when none is configured.
pub const DEFAULT_TOLERANCE: f32 = 0.5;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("identity already enrolled: {0}")]
    DuplicateIdentity(String),
    #[error("identity must not be empty")]
    EmptyIdentity,
    #[error("encoding has {actual} dimensions, store holds {expected}-dimensional signatures")]
    DimensionMismatch { expected: usize, actual: usize },
    #[error("enrollment images unavailable: {0}")]
    Gallery(#[from] GalleryError),
}

/// An enrollment image that did not produce a signature.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkippedImage {
    pub identity: String,
    pub reason: String,
}

/// Outcome of a bulk load.
#[derive(Debug, Default)]
pub struct LoadReport {
    pub loaded: Vec<String>,
    pub skipped: Vec<SkippedImage>,
}

/// Append-only list of enrolled signatures, in insertion order.
pub struct SignatureStore {
    signatures: Vec<FaceSignature>,
    matcher: Box<dyn Matcher>,
}

impl Default for SignatureStore {
    fn default() -> Self {
        Self::new()
    }
}

impl SignatureStore {
    /// Empty store using first-match selection.
    pub fn new() -> Self {
        Self::with_policy(MatchPolicy::First)
    }

    pub fn with_policy(policy: MatchPolicy) -> Self {
        Self::with_matcher(policy.matcher())
    }

    pub fn with_matcher(matcher: Box<dyn Matcher>) -> Self {
        Self {
            signatures: Vec::new(),
            matcher,
        }
    }

    /// Encode every image of `collection` and append the results.
    ///
    /// Images that cannot be read, contain no face, or clash with an existing
    /// identity are skipped and reported; only a failure to list the
    /// collection is an error.
    pub fn load<C>(
        &mut self,
        collection: &dyn EnrollmentCollection,
        capability: &mut C,
    ) -> Result<LoadReport, StoreError>
    where
        C: FaceCapability + ?Sized,
    {
        let mut report = LoadReport::default();

        for entry in collection.list()? {
            let outcome = collection
                .read(&entry)
                .map_err(|e| format!("unreadable image: {e}"))
                .and_then(|image| first_encoding(&mut *capability, &image))
                .and_then(|encoding| {
                    self.add(&entry.identity, encoding)
                        .map_err(|e| e.to_string())
                });

            match outcome {
                Ok(()) => report.loaded.push(entry.identity),
                Err(reason) => {
                    tracing::warn!(
                        identity = %entry.identity,
                        path = %entry.location.display(),
                        %reason,
                        "skipping enrollment image"
                    );
                    report.skipped.push(SkippedImage {
                        identity: entry.identity,
                        reason,
                    });
                }
            }
        }

        tracing::info!(
            loaded = report.loaded.len(),
            skipped = report.skipped.len(),
            "signature store loaded"
        );
        Ok(report)
    }

    /// Find the signature selected by the store's matcher for `probe`.
    pub fn match_encoding(
        &self,
        probe: &Encoding,
        tolerance: f32,
        comparator: &dyn Comparator,
    ) -> MatchResult {
        self.matcher
            .find(probe, &self.signatures, tolerance, comparator)
    }

    /// Append a signature. The identity is normalized first.
    pub fn add(&mut self, identity: &str, encoding: Encoding) -> Result<(), StoreError> {
        let identity = normalize_identity(identity);
        if identity.is_empty() {
            return Err(StoreError::EmptyIdentity);
        }
        if self.contains(&identity) {
            return Err(StoreError::DuplicateIdentity(identity));
        }
        if let Some(expected) = self.dimension() {
            if encoding.dim() != expected {
                return Err(StoreError::DimensionMismatch {
                    expected,
                    actual: encoding.dim(),
                });
            }
        }

        tracing::debug!(%identity, dim = encoding.dim(), "signature added");
        self.signatures.push(FaceSignature { identity, encoding });
        Ok(())
    }

    pub fn contains(&self, identity: &str) -> bool {
        let identity = normalize_identity(identity);
        self.signatures.iter().any(|s| s.identity == identity)
    }

    /// Dimensionality shared by all signatures, if any are stored.
    pub fn dimension(&self) -> Option<usize> {
        self.signatures.first().map(|s| s.encoding.dim())
    }

    pub fn len(&self) -> usize {
        self.signatures.len()
    }

    pub fn is_empty(&self) -> bool {
        self.signatures.is_empty()
    }

    pub fn signatures(&self) -> &[FaceSignature] {
        &self.signatures
    }

    pub fn identities(&self) -> impl Iterator<Item = &str> {
        self.signatures.iter().map(|s| s.identity.as_str())
    }
}

/// Locate faces in `image` and encode the first one.
fn first_encoding<C>(capability: &mut C, image: &image::RgbImage) -> Result<Encoding, String>
where
    C: FaceCapability + ?Sized,
{
    let boxes = capability.locate(image).map_err(|e| e.to_string())?;
    let Some(face) = boxes.first() else {
        return Err("no face found".into());
    };
    capability
        .encode(image, std::slice::from_ref(face))
        .map_err(|e| e.to_string())?
        .into_iter()
        .next()
        .ok_or_else(|| "no encoding produced".to_string())
}
