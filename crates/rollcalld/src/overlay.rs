use rollcall_core::{FaceOverlay, Frame, OverlaySink};

/// Overlay sink that reports each face as a debug event.
#[derive(Default)]
pub struct LogOverlay;

impl OverlaySink for LogOverlay {
    fn render(&mut self, frame: &Frame, overlays: &[FaceOverlay]) {
        for overlay in overlays {
            tracing::debug!(
                sequence = frame.sequence,
                x = overlay.bbox.x.round() as i32,
                y = overlay.bbox.y.round() as i32,
                width = overlay.bbox.width.round() as i32,
                height = overlay.bbox.height.round() as i32,
                label = %overlay.label,
                classification = overlay.classification.as_str(),
                "face"
            );
        }
    }
}
