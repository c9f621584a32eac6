//! Enrollment image collection: one face image per identity.

use crate::session::Session;
use crate::types::normalize_identity;
use image::{ImageFormat, RgbImage};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

const IMAGE_EXTENSIONS: [&str; 3] = ["jpg", "jpeg", "png"];
const ENROLL_EXTENSION: &str = "jpg";

#[derive(Error, Debug)]
pub enum GalleryError {
    #[error("invalid identity for the image collection: {0:?}")]
    InvalidIdentity(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("image error: {0}")]
    Image(#[from] image::ImageError),
}

/// One stored enrollment image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GalleryEntry {
    /// Normalized identity derived from the image name.
    pub identity: String,
    pub location: PathBuf,
}

/// Keyed store of enrollment images, addressable by identity.
pub trait EnrollmentCollection {
    /// All stored images, in a stable order.
    fn list(&self) -> Result<Vec<GalleryEntry>, GalleryError>;

    fn read(&self, entry: &GalleryEntry) -> Result<RgbImage, GalleryError>;

    /// Persist `image` for `identity`, replacing any previous image.
    fn write(&self, identity: &str, image: &RgbImage) -> Result<GalleryEntry, GalleryError>;

    fn remove(&self, entry: &GalleryEntry) -> Result<(), GalleryError>;
}

/// Image collection backed by a directory of `<identity>.jpg|png` files.
pub struct DirectoryGallery {
    root: PathBuf,
}

impl DirectoryGallery {
    /// Open (creating if needed) the collection rooted at `root`.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self, GalleryError> {
        let root = root.into();
        if !root.exists() {
            fs::create_dir_all(&root)?;
            tracing::info!(path = %root.display(), "created enrollment image directory");
        }
        Ok(Self { root })
    }

    /// Open the roster directory for `session` under `gallery_root`.
    pub fn for_roster(gallery_root: &Path, session: &Session) -> Result<Self, GalleryError> {
        Self::open(gallery_root.join(session.roster_key()))
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

impl EnrollmentCollection for DirectoryGallery {
    fn list(&self) -> Result<Vec<GalleryEntry>, GalleryError> {
        let mut paths = Vec::new();
        for dir_entry in fs::read_dir(&self.root)? {
            let path = dir_entry?.path();
            if path.is_file() && has_image_extension(&path) {
                paths.push(path);
            }
        }
        paths.sort();

        Ok(paths
            .into_iter()
            .filter_map(|location| {
                let stem = location.file_stem()?.to_str()?;
                Some(GalleryEntry {
                    identity: normalize_identity(stem),
                    location,
                })
            })
            .collect())
    }

    fn read(&self, entry: &GalleryEntry) -> Result<RgbImage, GalleryError> {
        Ok(image::open(&entry.location)?.to_rgb8())
    }

    fn write(&self, identity: &str, image: &RgbImage) -> Result<GalleryEntry, GalleryError> {
        validate_identity(identity)?;
        let location = self.root.join(format!("{identity}.{ENROLL_EXTENSION}"));
        image.save_with_format(&location, ImageFormat::Jpeg)?;
        tracing::debug!(identity, path = %location.display(), "enrollment image written");
        Ok(GalleryEntry {
            identity: identity.to_string(),
            location,
        })
    }

    fn remove(&self, entry: &GalleryEntry) -> Result<(), GalleryError> {
        fs::remove_file(&entry.location)?;
        Ok(())
    }
}

/// Reject identities that cannot safely name a single file in the collection.
pub fn validate_identity(identity: &str) -> Result<(), GalleryError> {
    let bad = identity.is_empty()
        || identity == "."
        || identity == ".."
        || identity.contains(['/', '\\', '\0'])
        || identity.contains("..");
    if bad {
        return Err(GalleryError::InvalidIdentity(identity.to_string()));
    }
    Ok(())
}

fn has_image_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| {
            IMAGE_EXTENSIONS
                .iter()
                .any(|known| ext.eq_ignore_ascii_case(known))
        })
        .unwrap_or(false)
}
