//! The cooperative run loop: one thread, one frame at a time.

use crate::capability::{
    FaceCapability, FrameSource, OperatorCommand, OperatorConsole, OverlaySink, SourceError,
};
use crate::ledger::AttendanceLedger;
use crate::processor::{EnrollAttempt, FrameMatchProcessor};
use std::sync::atomic::{AtomicBool, Ordering};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum RunError {
    #[error(transparent)]
    SourceUnavailable(#[from] SourceError),
}

/// Why a run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StopReason {
    #[default]
    EndOfStream,
    /// The operator issued a stop command.
    Operator,
    /// The external stop flag was raised.
    Cancelled,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub frames: u64,
    pub faces: u64,
    pub recorded: u64,
    pub enrollments: u64,
    pub skipped_frames: u64,
    pub reason: StopReason,
}

/// Drive `processor` until the stream ends, the operator stops, or `stop`
/// is raised.
///
/// Each iteration polls for cancellation, acts on a pending operator command,
/// then pulls, processes and renders one frame. A source failure ends the
/// run with [`RunError::SourceUnavailable`]; per-frame processing failures
/// skip the frame.
pub fn run<C, L>(
    processor: &mut FrameMatchProcessor<C, L>,
    source: &mut dyn FrameSource,
    sink: &mut dyn OverlaySink,
    console: &mut dyn OperatorConsole,
    stop: &AtomicBool,
) -> Result<RunSummary, RunError>
where
    C: FaceCapability,
    L: AttendanceLedger,
{
    let mut summary = RunSummary::default();
    tracing::info!(session = %processor.session(), "attendance run started");

    loop {
        if stop.load(Ordering::Relaxed) {
            summary.reason = StopReason::Cancelled;
            break;
        }

        match console.poll_command() {
            Some(OperatorCommand::Stop) => {
                summary.reason = StopReason::Operator;
                break;
            }
            Some(OperatorCommand::Enroll) => {
                if let EnrollAttempt::Enrolled(_) = processor.enroll_unknown(console) {
                    summary.enrollments += 1;
                }
            }
            None => {}
        }

        let frame = match source.next_frame() {
            Ok(Some(frame)) => frame,
            Ok(None) => {
                summary.reason = StopReason::EndOfStream;
                break;
            }
            Err(e) => {
                tracing::error!(error = %e, frames = summary.frames, "frame source failed; run aborted");
                return Err(e.into());
            }
        };

        summary.frames += 1;
        match processor.process(&frame) {
            Ok(report) => {
                summary.faces += report.faces.len() as u64;
                summary.recorded += report.recorded() as u64;
                sink.render(&frame, &report.overlays);
            }
            Err(e) => {
                summary.skipped_frames += 1;
                tracing::warn!(sequence = frame.sequence, error = %e, "frame skipped");
            }
        }
    }

    tracing::info!(
        frames = summary.frames,
        faces = summary.faces,
        recorded = summary.recorded,
        enrollments = summary.enrollments,
        skipped = summary.skipped_frames,
        reason = ?summary.reason,
        "attendance run finished"
    );
    Ok(summary)
}
