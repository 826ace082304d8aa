//! Attendance matching: nearest catalog entry under a distance tolerance.

use crate::catalog::EncodingCatalog;
use crate::encoder::{EncoderError, FaceEncoder};
use crate::types::Encoding;
use image::RgbImage;
use serde::Serialize;

/// Maximum Euclidean distance accepted as the same person.
///
/// ArcFace encodings are unit length, so 1.1 corresponds to a cosine
/// similarity of roughly 0.4.
pub const DEFAULT_TOLERANCE: f32 = 1.1;

/// Outcome of one attendance check.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum MatchOutcome {
    Matched { name: String, distance: f32 },
    /// Closest distance seen, if the catalog was non-empty.
    Unknown { distance: Option<f32> },
    NoFaceDetected,
}

impl MatchOutcome {
    pub fn name(&self) -> Option<&str> {
        match self {
            MatchOutcome::Matched { name, .. } => Some(name),
            _ => None,
        }
    }
}

/// Strategy for comparing a probe encoding against the catalog.
pub trait Matcher {
    fn best_match(&self, probe: &Encoding, catalog: &EncodingCatalog) -> MatchOutcome;
}

/// Minimum Euclidean distance matcher.
#[derive(Debug, Clone, Copy)]
pub struct EuclideanMatcher {
    pub tolerance: f32,
}

impl EuclideanMatcher {
    pub fn new(tolerance: f32) -> Self {
        Self { tolerance }
    }
}

impl Default for EuclideanMatcher {
    fn default() -> Self {
        Self::new(DEFAULT_TOLERANCE)
    }
}

impl Matcher for EuclideanMatcher {
    fn best_match(&self, probe: &Encoding, catalog: &EncodingCatalog) -> MatchOutcome {
        let mut best: Option<(usize, f32)> = None;

        for (i, entry) in catalog.entries().iter().enumerate() {
            let d = probe.distance(&entry.encoding);
            // Strict comparison keeps the first entry on ties.
            if best.map_or(true, |(_, best_d)| d < best_d) {
                best = Some((i, d));
            }
        }

        match best {
            Some((idx, distance)) if distance <= self.tolerance => MatchOutcome::Matched {
                name: catalog.entries()[idx].name.clone(),
                distance,
            },
            Some((_, distance)) => MatchOutcome::Unknown {
                distance: Some(distance),
            },
            None => MatchOutcome::Unknown { distance: None },
        }
    }
}

/// Encode a live frame and match its first face against the catalog.
///
/// Each call is independent: no smoothing across frames, no de-duplication.
pub fn identify<E, M>(
    encoder: &mut E,
    frame: &RgbImage,
    catalog: &EncodingCatalog,
    matcher: &M,
) -> Result<MatchOutcome, EncoderError>
where
    E: FaceEncoder + ?Sized,
    M: Matcher + ?Sized,
{
    let encodings = encoder.encode(frame)?;
    let Some(probe) = encodings.first() else {
        tracing::debug!("identify: no face in live frame");
        return Ok(MatchOutcome::NoFaceDetected);
    };

    if encodings.len() > 1 {
        tracing::debug!(faces = encodings.len(), "identify: using first face");
    }

    let outcome = matcher.best_match(probe, catalog);
    tracing::info!(?outcome, entries = catalog.len(), "identify: match complete");
    Ok(outcome)
}
