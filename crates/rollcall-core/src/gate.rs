//! Enrollment gate: administrator authentication and admission of new
//! signatures.

use crate::capability::{CapabilityError, CredentialProvider, FaceCapability};
use crate::gallery::{validate_identity, EnrollmentCollection, GalleryEntry, GalleryError};
use crate::ledger::{AttendanceLedger, LedgerError, MarkOutcome};
use crate::session::SessionKey;
use crate::store::{SignatureStore, StoreError};
use crate::types::{normalize_identity, BoundingBox, Encoding};
use image::RgbImage;
use thiserror::Error;

/// Credential prompts allowed per authentication.
pub const DEFAULT_AUTH_ATTEMPTS: u32 = 3;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum GateError {
    #[error("administrator authentication denied after {attempts} attempt(s)")]
    AuthenticationDenied { attempts: u32 },
}

#[derive(Error, Debug)]
pub enum EnrollError {
    #[error("identity must not be empty")]
    EmptyIdentity,
    #[error("face region lies outside the frame")]
    EmptyRegion,
    #[error("no face found in the saved enrollment image for {0}")]
    NoFaceInCrop(String),
    #[error(transparent)]
    Gallery(#[from] GalleryError),
    #[error(transparent)]
    Capability(#[from] CapabilityError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Ledger(#[from] LedgerError),
}

/// Proof of a successful authentication. Consumed by one enrollment.
#[derive(Debug)]
pub struct AdminGrant {
    _private: (),
}

/// Face to admit: operator-supplied identity, detected region and the frame
/// it was detected in.
pub struct EnrollRequest<'a> {
    pub identity: &'a str,
    pub face: &'a BoundingBox,
    pub frame: &'a RgbImage,
}

/// A completed enrollment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Enrollment {
    pub identity: String,
    pub attendance: MarkOutcome,
}

pub struct EnrollmentGate {
    admin_secret: Option<String>,
    max_attempts: u32,
    gallery: Box<dyn EnrollmentCollection + Send>,
}

impl EnrollmentGate {
    /// Gate writing into `gallery`. With no `admin_secret` every
    /// authentication is denied.
    pub fn new(admin_secret: Option<String>, gallery: Box<dyn EnrollmentCollection + Send>) -> Self {
        Self {
            admin_secret,
            max_attempts: DEFAULT_AUTH_ATTEMPTS,
            gallery,
        }
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    pub fn gallery(&self) -> &dyn EnrollmentCollection {
        self.gallery.as_ref()
    }

    /// Prompt for the administrator secret, at most `max_attempts` times.
    pub fn authenticate<P>(&self, provider: &mut P) -> Result<AdminGrant, GateError>
    where
        P: CredentialProvider + ?Sized,
    {
        let Some(secret) = self.admin_secret.as_deref() else {
            tracing::warn!("no administrator secret configured; enrollment is disabled");
            return Err(GateError::AuthenticationDenied { attempts: 0 });
        };

        for attempt in 1..=self.max_attempts {
            match provider.request_credential(attempt) {
                Some(candidate) if secrets_match(&candidate, secret) => {
                    tracing::info!(attempt, "administrator access granted");
                    return Ok(AdminGrant { _private: () });
                }
                Some(_) => {
                    tracing::warn!(
                        attempt,
                        remaining = self.max_attempts - attempt,
                        "incorrect administrator credential"
                    );
                }
                None => {
                    tracing::warn!(attempt, "credential input closed");
                    return Err(GateError::AuthenticationDenied { attempts: attempt });
                }
            }
        }

        tracing::warn!(attempts = self.max_attempts, "administrator access denied");
        Err(GateError::AuthenticationDenied {
            attempts: self.max_attempts,
        })
    }

    /// Admit a new face and record its attendance.
    ///
    /// The face is cropped from the frame and persisted; the signature is
    /// computed from the persisted image, not from the live crop.
    pub fn enroll<C, L>(
        &self,
        _grant: AdminGrant,
        request: EnrollRequest<'_>,
        session: &SessionKey,
        store: &mut SignatureStore,
        capability: &mut C,
        ledger: &L,
    ) -> Result<Enrollment, EnrollError>
    where
        C: FaceCapability + ?Sized,
        L: AttendanceLedger + ?Sized,
    {
        let identity = normalize_identity(request.identity);
        if identity.is_empty() {
            return Err(EnrollError::EmptyIdentity);
        }
        validate_identity(&identity)?;
        if store.contains(&identity) {
            return Err(StoreError::DuplicateIdentity(identity).into());
        }

        let (x, y, w, h) = request
            .face
            .pixel_rect(request.frame.width(), request.frame.height())
            .ok_or(EnrollError::EmptyRegion)?;
        let crop = image::imageops::crop_imm(request.frame, x, y, w, h).to_image();

        let entry = self.gallery.write(&identity, &crop)?;
        let admitted = self
            .encode_persisted(&entry, &identity, capability)
            .and_then(|encoding| store.add(&identity, encoding).map_err(EnrollError::from));
        if let Err(err) = admitted {
            if let Err(cleanup) = self.gallery.remove(&entry) {
                tracing::warn!(%identity, error = %cleanup, "could not remove rejected enrollment image");
            }
            return Err(err);
        }
        tracing::info!(%identity, path = %entry.location.display(), "new face enrolled");

        let attendance = ledger.mark_attendance(session, &identity)?;
        Ok(Enrollment {
            identity,
            attendance,
        })
    }

    fn encode_persisted<C>(
        &self,
        entry: &GalleryEntry,
        identity: &str,
        capability: &mut C,
    ) -> Result<Encoding, EnrollError>
    where
        C: FaceCapability + ?Sized,
    {
        let persisted = self.gallery.read(entry)?;
        let boxes = capability.locate(&persisted)?;
        let Some(face) = boxes.first() else {
            return Err(EnrollError::NoFaceInCrop(identity.to_string()));
        };
        capability
            .encode(&persisted, std::slice::from_ref(face))?
            .into_iter()
            .next()
            .ok_or_else(|| EnrollError::NoFaceInCrop(identity.to_string()))
    }
}

/// Case-sensitive comparison that inspects every byte of both inputs.
fn secrets_match(candidate: &str, secret: &str) -> bool {
    let (a, b) = (candidate.as_bytes(), secret.as_bytes());
    let mut diff = a.len() ^ b.len();
    for i in 0..a.len().max(b.len()) {
        let x = a.get(i).copied().unwrap_or(0);
        let y = b.get(i).copied().unwrap_or(0);
        diff |= usize::from(x ^ y);
    }
    diff == 0
}
