//! Enrollment store: one captured image per `{user_id}_{display_name}` key.
//!
//! Layout under the storage root:
//!
//! ```text
//! TrainingImage/
//!   42_Ada/
//!     captured_face.jpg
//!     enrollment.json     { "user_id": "42", "display_name": "Ada", ... }
//! ```
//!
//! The sidecar carries the identity explicitly so training never has to
//! parse it back out of the directory name.

use image::{ImageFormat, RgbImage};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

pub const CAPTURE_FILE_NAME: &str = "captured_face.jpg";
pub const SIDECAR_FILE_NAME: &str = "enrollment.json";

#[derive(Error, Debug)]
pub enum EnrollError {
    #[error("invalid input: {0}")]
    Validation(String),
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
    #[error("image encode failed: {0}")]
    Image(#[from] image::ImageError),
    #[error("sidecar: {0}")]
    Sidecar(#[from] serde_json::Error),
}

/// A registered user's single stored capture.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EnrollmentRecord {
    pub user_id: String,
    pub display_name: String,
    pub image_path: PathBuf,
}

/// On-disk metadata written next to each capture.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct Sidecar {
    pub user_id: String,
    pub display_name: String,
    pub captured_at: String,
}

pub struct EnrollmentStore {
    root: PathBuf,
}

impl EnrollmentStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Storage key for a user; doubles as the directory name.
    pub fn storage_key(user_id: &str, display_name: &str) -> String {
        format!("{user_id}_{display_name}")
    }

    /// Store `frame` as the user's capture, replacing any previous one.
    pub fn capture(
        &self,
        user_id: &str,
        display_name: &str,
        frame: &RgbImage,
    ) -> Result<EnrollmentRecord, EnrollError> {
        validate_field("user id", user_id)?;
        validate_field("display name", display_name)?;

        let dir = self.root.join(Self::storage_key(user_id, display_name));
        fs::create_dir_all(&dir)?;

        let image_path = dir.join(CAPTURE_FILE_NAME);
        let replaced = image_path.exists();
        frame.save_with_format(&image_path, ImageFormat::Jpeg)?;

        let sidecar = Sidecar {
            user_id: user_id.to_string(),
            display_name: display_name.to_string(),
            captured_at: chrono::Utc::now().to_rfc3339(),
        };
        fs::write(dir.join(SIDECAR_FILE_NAME), serde_json::to_vec_pretty(&sidecar)?)?;

        tracing::info!(
            user_id,
            display_name,
            path = %image_path.display(),
            replaced,
            "face captured"
        );

        Ok(EnrollmentRecord {
            user_id: user_id.to_string(),
            display_name: display_name.to_string(),
            image_path,
        })
    }

    /// All enrolled keys that currently hold a capture, sorted by key.
    pub fn records(&self) -> Result<Vec<EnrollmentRecord>, EnrollError> {
        if !self.root.exists() {
            return Ok(Vec::new());
        }

        let mut records = Vec::new();
        for entry in fs::read_dir(&self.root)? {
            let dir = entry?.path();
            let image_path = dir.join(CAPTURE_FILE_NAME);
            if !dir.is_dir() || !image_path.is_file() {
                continue;
            }

            let (user_id, display_name) = match read_sidecar(&dir) {
                Some(s) => (s.user_id, s.display_name),
                None => {
                    let key = dir
                        .file_name()
                        .map(|n| n.to_string_lossy().into_owned())
                        .unwrap_or_default();
                    let (id, name) = split_key(&key);
                    (id.to_string(), name.unwrap_or_default().to_string())
                }
            };
            records.push(EnrollmentRecord {
                user_id,
                display_name,
                image_path,
            });
        }

        records.sort_by(|a, b| a.image_path.cmp(&b.image_path));
        Ok(records)
    }
}

/// Reject empty values and anything that could escape the storage root.
pub fn validate_field(what: &str, value: &str) -> Result<(), EnrollError> {
    if value.trim().is_empty() {
        return Err(EnrollError::Validation(format!("{what} must not be empty")));
    }
    if value.contains(['/', '\\']) || value == "." || value == ".." {
        return Err(EnrollError::Validation(format!(
            "{what} must not contain path separators: {value:?}"
        )));
    }
    Ok(())
}

/// Read the sidecar in `dir`, logging and returning `None` if unusable.
pub(crate) fn read_sidecar(dir: &Path) -> Option<Sidecar> {
    let path = dir.join(SIDECAR_FILE_NAME);
    let bytes = fs::read(&path).ok()?;
    match serde_json::from_slice(&bytes) {
        Ok(s) => Some(s),
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "unreadable enrollment sidecar");
            None
        }
    }
}

/// Split a `{user_id}_{rest}` token on its first underscore.
///
/// A display name containing underscores stays intact in the second half;
/// a user id containing one cannot be recovered this way.
pub(crate) fn split_key(key: &str) -> (&str, Option<&str>) {
    match key.split_once('_') {
        Some((id, rest)) => (id, Some(rest)),
        None => (key, None),
    }
}
