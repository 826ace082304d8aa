//! rollcall-core: Enrollment and verification pipeline for the attendance kiosk.
//!
//! Captured frames become named face encodings (SCRFD detection + ArcFace
//! recognition via ONNX Runtime), persisted as a single catalog file and
//! consulted at attendance time.

pub mod alignment;
pub mod attendance;
pub mod catalog;
pub mod config;
pub mod detector;
pub mod encoder;
pub mod enrollment;
pub mod matcher;
pub mod recognizer;
pub mod types;

#[cfg(test)]
pub(crate) mod testing;

pub use attendance::{AttendanceError, AttendanceLog, AttendanceRecord};
pub use catalog::{CatalogError, CatalogStore, EncodingCatalog, EncodingEntry};
pub use config::{Config, ConfigError};
pub use encoder::{EncoderError, FaceEncoder, OnnxFaceEncoder};
pub use enrollment::{EnrollError, EnrollmentRecord, EnrollmentStore};
pub use matcher::{identify, EuclideanMatcher, MatchOutcome, Matcher, DEFAULT_TOLERANCE};
pub use types::{Encoding, FaceBox};

/// Default directory for the ONNX model files.
pub fn default_model_dir() -> std::path::PathBuf {
    std::path::PathBuf::from("/usr/share/rollcall/models")
}
