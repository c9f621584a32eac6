//! rollcall-core: face-recognition attendance engine.
//!
//! Identifies faces against an enrolled roster, records each person's first
//! appearance per session in a SQLite ledger, and gates new enrollments
//! behind an administrator credential.

pub mod capability;
pub mod gallery;
pub mod gate;
pub mod ledger;
pub mod paths;
pub mod processor;
pub mod runner;
pub mod session;
pub mod store;
pub mod types;

#[cfg(test)]
mod testing;

pub use capability::{
    CapabilityError, CredentialProvider, FaceCapability, FrameSource, NullOverlay,
    OperatorCommand, OperatorConsole, OverlaySink, SourceError,
};
pub use gallery::{DirectoryGallery, EnrollmentCollection, GalleryEntry, GalleryError};
pub use gate::{EnrollError, EnrollmentGate, GateError};
pub use ledger::{AttendanceLedger, AttendanceRecord, LedgerError, MarkOutcome, SqliteLedger};
pub use processor::{EnrollAttempt, FaceDisposition, FrameMatchProcessor, FrameReport};
pub use runner::{run, RunError, RunSummary, StopReason};
pub use session::{Session, SessionError, SessionKey};
pub use store::{SignatureStore, StoreError, DEFAULT_TOLERANCE};
pub use types::{
    BoundingBox, Classification, Comparator, CosineComparator, Encoding, EuclideanComparator,
    FaceOverlay, Frame, MatchPolicy,
};
