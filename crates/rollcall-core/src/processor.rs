//! Frame match processor: classifies every face of a frame, records first
//! sightings, and routes unknown faces to the enrollment gate on request.

use crate::capability::{CapabilityError, FaceCapability, OperatorConsole};
use crate::gate::{EnrollError, EnrollRequest, EnrollmentGate, Enrollment, GateError};
use crate::ledger::{AttendanceLedger, LedgerError, MarkOutcome};
use crate::session::SessionKey;
use crate::store::{SignatureStore, DEFAULT_TOLERANCE};
use crate::types::{BoundingBox, Classification, FaceOverlay, Frame};
use image::imageops::FilterType;
use image::RgbImage;
use std::collections::HashSet;
use thiserror::Error;

/// Overlay label for faces that match no signature.
pub const UNKNOWN_LABEL: &str = "Unknown - press 'n' to enroll";

#[derive(Error, Debug)]
pub enum ProcessError {
    #[error(transparent)]
    Capability(#[from] CapabilityError),
    #[error(transparent)]
    Ledger(#[from] LedgerError),
}

/// What happened to one face of a frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FaceDisposition {
    /// Matched, and the ledger was consulted for the first time this run.
    FirstSeen {
        identity: String,
        outcome: MarkOutcome,
    },
    /// Matched an identity already confirmed this run; storage untouched.
    AlreadyLogged { identity: String },
    /// No signature within tolerance. Offered for enrollment.
    Unmatched,
}

/// Result of processing one frame. `faces` and `overlays` are parallel.
#[derive(Debug, Clone)]
pub struct FrameReport {
    pub sequence: u64,
    pub faces: Vec<FaceDisposition>,
    pub overlays: Vec<FaceOverlay>,
}

impl FrameReport {
    /// Faces that produced a new ledger row.
    pub fn recorded(&self) -> usize {
        self.faces
            .iter()
            .filter(|d| {
                matches!(
                    d,
                    FaceDisposition::FirstSeen {
                        outcome: MarkOutcome::Recorded,
                        ..
                    }
                )
            })
            .count()
    }

    pub fn unknown(&self) -> usize {
        self.faces
            .iter()
            .filter(|d| matches!(d, FaceDisposition::Unmatched))
            .count()
    }
}

/// Outcome of an operator-triggered enrollment.
#[derive(Debug)]
pub enum EnrollAttempt {
    /// The latest frame held no unknown face.
    NoCandidate,
    /// The operator supplied no identity.
    Cancelled,
    Denied(GateError),
    Failed(EnrollError),
    Enrolled(Enrollment),
}

/// Unknown faces of the latest frame, kept with the full-resolution image
/// they were found in.
struct PendingFaces {
    image: RgbImage,
    faces: Vec<BoundingBox>,
}

pub struct FrameMatchProcessor<C, L> {
    session: SessionKey,
    capability: C,
    store: SignatureStore,
    ledger: L,
    gate: EnrollmentGate,
    /// Identities confirmed present in the ledger during this run.
    recorded: HashSet<String>,
    tolerance: f32,
    detect_scale: f32,
    pending: Option<PendingFaces>,
}

impl<C, L> FrameMatchProcessor<C, L>
where
    C: FaceCapability,
    L: AttendanceLedger,
{
    /// Bind a processor to `session`, creating its ledger table if absent.
    pub fn new(
        session: SessionKey,
        capability: C,
        store: SignatureStore,
        ledger: L,
        gate: EnrollmentGate,
    ) -> Result<Self, LedgerError> {
        ledger.ensure_session(&session)?;
        tracing::info!(%session, signatures = store.len(), "frame processor ready");
        Ok(Self {
            session,
            capability,
            store,
            ledger,
            gate,
            recorded: HashSet::new(),
            tolerance: DEFAULT_TOLERANCE,
            detect_scale: 1.0,
            pending: None,
        })
    }

    pub fn with_tolerance(mut self, tolerance: f32) -> Self {
        self.tolerance = tolerance;
        self
    }

    /// Run detection on frames downscaled by `scale`. Values outside (0, 1)
    /// mean full resolution.
    pub fn with_detect_scale(mut self, scale: f32) -> Self {
        self.detect_scale = if scale > 0.0 && scale < 1.0 { scale } else { 1.0 };
        self
    }

    pub fn session(&self) -> &SessionKey {
        &self.session
    }

    pub fn store(&self) -> &SignatureStore {
        &self.store
    }

    pub fn ledger(&self) -> &L {
        &self.ledger
    }

    /// Whether `identity` has been confirmed recorded during this run.
    pub fn is_recorded(&self, identity: &str) -> bool {
        self.recorded.contains(identity)
    }

    /// Whether the latest frame left a face available for enrollment.
    pub fn has_unknown(&self) -> bool {
        self.pending.is_some()
    }

    /// Classify every face in `frame` and record first sightings.
    pub fn process(&mut self, frame: &Frame) -> Result<FrameReport, ProcessError> {
        self.pending = None;
        let boxes = self.detect(&frame.image)?;
        let encodings = if boxes.is_empty() {
            Vec::new()
        } else {
            self.capability.encode(&frame.image, &boxes)?
        };
        if encodings.len() != boxes.len() {
            return Err(CapabilityError::Encode(format!(
                "{} encodings for {} faces",
                encodings.len(),
                boxes.len()
            ))
            .into());
        }

        let mut faces = Vec::with_capacity(boxes.len());
        let mut overlays = Vec::with_capacity(boxes.len());
        let mut unknown = Vec::new();

        for (bbox, encoding) in boxes.into_iter().zip(encodings) {
            let result = self
                .store
                .match_encoding(&encoding, self.tolerance, &self.capability);

            let disposition = match result.identity {
                Some(identity) => self.sighting(identity, result.distance)?,
                None => FaceDisposition::Unmatched,
            };

            let overlay = match &disposition {
                FaceDisposition::FirstSeen { identity, .. }
                | FaceDisposition::AlreadyLogged { identity } => FaceOverlay {
                    bbox: bbox.clone(),
                    label: identity.clone(),
                    classification: Classification::Known,
                },
                FaceDisposition::Unmatched => {
                    unknown.push(bbox.clone());
                    FaceOverlay {
                        bbox,
                        label: UNKNOWN_LABEL.to_string(),
                        classification: Classification::Unknown,
                    }
                }
            };
            faces.push(disposition);
            overlays.push(overlay);
        }

        self.pending = if unknown.is_empty() {
            None
        } else {
            Some(PendingFaces {
                image: frame.image.clone(),
                faces: unknown,
            })
        };

        tracing::debug!(
            sequence = frame.sequence,
            faces = faces.len(),
            unknown = self.pending.as_ref().map_or(0, |p| p.faces.len()),
            "frame processed"
        );
        Ok(FrameReport {
            sequence: frame.sequence,
            faces,
            overlays,
        })
    }

    /// Enroll the first unknown face of the latest frame: authenticate the
    /// operator, ask for the identity, then admit the face.
    pub fn enroll_unknown(&mut self, console: &mut dyn OperatorConsole) -> EnrollAttempt {
        let Some(pending) = &self.pending else {
            console.notify("no unknown face in the current frame");
            return EnrollAttempt::NoCandidate;
        };
        let Some(face) = pending.faces.first() else {
            return EnrollAttempt::NoCandidate;
        };

        let grant = match self.gate.authenticate(console) {
            Ok(grant) => grant,
            Err(e) => {
                console.notify(&e.to_string());
                return EnrollAttempt::Denied(e);
            }
        };

        let Some(identity) = console.request_identity() else {
            console.notify("enrollment cancelled");
            return EnrollAttempt::Cancelled;
        };

        let request = EnrollRequest {
            identity: &identity,
            face,
            frame: &pending.image,
        };
        match self.gate.enroll(
            grant,
            request,
            &self.session,
            &mut self.store,
            &mut self.capability,
            &self.ledger,
        ) {
            Ok(enrollment) => {
                self.recorded.insert(enrollment.identity.clone());
                self.pending = None;
                console.notify(&format!("enrolled {}", enrollment.identity));
                EnrollAttempt::Enrolled(enrollment)
            }
            Err(e) => {
                tracing::warn!(%identity, error = %e, "enrollment failed");
                console.notify(&format!("enrollment failed: {e}"));
                EnrollAttempt::Failed(e)
            }
        }
    }

    fn sighting(
        &mut self,
        identity: String,
        distance: Option<f32>,
    ) -> Result<FaceDisposition, LedgerError> {
        if self.recorded.contains(&identity) {
            return Ok(FaceDisposition::AlreadyLogged { identity });
        }

        let outcome = self.ledger.mark_attendance(&self.session, &identity)?;
        if outcome == MarkOutcome::AlreadyRecorded {
            tracing::info!(%identity, session = %self.session, "attendance already on record");
        }
        tracing::debug!(%identity, ?distance, ?outcome, "first sighting this run");
        self.recorded.insert(identity.clone());
        Ok(FaceDisposition::FirstSeen { identity, outcome })
    }

    /// Locate faces, optionally on a downscaled copy, returning boxes in
    /// full-resolution coordinates.
    fn detect(&mut self, image: &RgbImage) -> Result<Vec<BoundingBox>, CapabilityError> {
        if self.detect_scale >= 1.0 {
            return self.capability.locate(image);
        }

        let width = ((image.width() as f32 * self.detect_scale).round() as u32).max(1);
        let height = ((image.height() as f32 * self.detect_scale).round() as u32).max(1);
        let small = image::imageops::resize(image, width, height, FilterType::Triangle);
        let factor = image.width() as f32 / width as f32;

        Ok(self
            .capability
            .locate(&small)?
            .iter()
            .map(|b| b.scaled(factor))
            .collect())
    }
}
