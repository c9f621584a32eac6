//! Contracts for the collaborators the engine consumes: face capability,
//! frame source, overlay sink and the operator console.

use crate::types::{BoundingBox, Comparator, Encoding, FaceOverlay, Frame};
use image::RgbImage;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CapabilityError {
    #[error("face location failed: {0}")]
    Locate(String),
    #[error("face encoding failed: {0}")]
    Encode(String),
}

/// Face detection and encoding, treated as opaque by the engine.
///
/// `encode` returns one encoding per box, in box order. Implementations may be
/// stateful (inference sessions), hence `&mut self`.
pub trait FaceCapability: Comparator {
    fn locate(&mut self, image: &RgbImage) -> Result<Vec<BoundingBox>, CapabilityError>;

    fn encode(
        &mut self,
        image: &RgbImage,
        boxes: &[BoundingBox],
    ) -> Result<Vec<Encoding>, CapabilityError>;
}

#[derive(Error, Debug)]
pub enum SourceError {
    #[error("frame source unavailable: {0}")]
    Unavailable(String),
}

/// Supplier of video frames. `Ok(None)` marks the end of the stream.
pub trait FrameSource {
    fn next_frame(&mut self) -> Result<Option<Frame>, SourceError>;
}

/// Receives per-face overlays for display. Purely a sink.
pub trait OverlaySink {
    fn render(&mut self, frame: &Frame, overlays: &[FaceOverlay]);
}

/// Overlay sink that discards everything.
pub struct NullOverlay;

impl OverlaySink for NullOverlay {
    fn render(&mut self, _frame: &Frame, _overlays: &[FaceOverlay]) {}
}

/// Source of administrator credentials.
pub trait CredentialProvider {
    /// Ask for a credential. `attempt` is 1-based. `None` means input is closed.
    fn request_credential(&mut self, attempt: u32) -> Option<String>;
}

/// Commands an operator can issue while the engine runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperatorCommand {
    /// Enroll the first unrecognized face of the latest frame.
    Enroll,
    /// Stop the run after the current frame.
    Stop,
}

/// The operator attached to a run: issues commands, supplies credentials and
/// identity strings.
pub trait OperatorConsole: CredentialProvider {
    /// Non-blocking poll for a pending command.
    fn poll_command(&mut self) -> Option<OperatorCommand>;

    /// Ask for the identity of the face being enrolled. `None` cancels.
    fn request_identity(&mut self) -> Option<String>;

    /// Informational message for the operator.
    fn notify(&mut self, message: &str) {
        tracing::info!("{message}");
    }
}
