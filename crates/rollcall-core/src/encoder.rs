//! Face encoder seam and the ONNX-backed implementation.

use crate::alignment;
use crate::detector::{DetectorError, FaceDetector};
use crate::recognizer::{FaceRecognizer, RecognizerError};
use crate::types::Encoding;
use image::RgbImage;
use std::path::Path;
use thiserror::Error;

const DETECTOR_MODEL_FILE: &str = "det_10g.onnx";
const RECOGNIZER_MODEL_FILE: &str = "w600k_r50.onnx";

#[derive(Error, Debug)]
pub enum EncoderError {
    #[error("detector: {0}")]
    Detector(#[from] DetectorError),
    #[error("recognizer: {0}")]
    Recognizer(#[from] RecognizerError),
}

/// Turns an image into one encoding per detected face.
pub trait FaceEncoder {
    /// Encodings ordered by detector confidence, best first.
    /// An empty vector means no face was found.
    fn encode(&mut self, image: &RgbImage) -> Result<Vec<Encoding>, EncoderError>;
}

impl<E: FaceEncoder + ?Sized> FaceEncoder for Box<E> {
    fn encode(&mut self, image: &RgbImage) -> Result<Vec<Encoding>, EncoderError> {
        (**self).encode(image)
    }
}

/// SCRFD detection + ArcFace recognition.
pub struct OnnxFaceEncoder {
    detector: FaceDetector,
    recognizer: FaceRecognizer,
}

impl OnnxFaceEncoder {
    /// Load both models from `model_dir`.
    pub fn load(model_dir: &Path) -> Result<Self, EncoderError> {
        let detector = FaceDetector::load(&model_dir.join(DETECTOR_MODEL_FILE))?;
        let recognizer = FaceRecognizer::load(&model_dir.join(RECOGNIZER_MODEL_FILE))?;
        Ok(Self {
            detector,
            recognizer,
        })
    }
}

impl FaceEncoder for OnnxFaceEncoder {
    fn encode(&mut self, image: &RgbImage) -> Result<Vec<Encoding>, EncoderError> {
        let faces = self.detector.detect(image)?;
        let mut encodings = Vec::with_capacity(faces.len());

        for face in &faces {
            let Some(landmarks) = face.landmarks.as_ref() else {
                tracing::debug!(confidence = face.confidence, "skipping face without landmarks");
                continue;
            };
            let aligned = alignment::align_face(image, landmarks);
            encodings.push(self.recognizer.extract(&aligned)?);
        }

        Ok(encodings)
    }
}
