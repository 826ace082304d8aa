//! Deterministic stand-ins for the ONNX models.

use crate::encoder::{EncoderError, FaceEncoder};
use crate::types::Encoding;
use image::{Rgb, RgbImage};

/// Encodes an image as its mean RGB color scaled to [0, 1].
///
/// Near-black images report no face.
pub struct MeanColorEncoder;

impl FaceEncoder for MeanColorEncoder {
    fn encode(&mut self, image: &RgbImage) -> Result<Vec<Encoding>, EncoderError> {
        let pixels = (image.width() * image.height()) as f32;
        if pixels == 0.0 {
            return Ok(Vec::new());
        }

        let mut sums = [0.0f32; 3];
        for p in image.pixels() {
            for (c, sum) in sums.iter_mut().enumerate() {
                *sum += p.0[c] as f32;
            }
        }
        let mean: Vec<f32> = sums.iter().map(|s| s / pixels / 255.0).collect();

        if mean.iter().sum::<f32>() / 3.0 < 0.04 {
            return Ok(Vec::new());
        }
        Ok(vec![Encoding::new(mean)])
    }
}

/// 32x32 image filled with one color.
pub fn solid(rgb: [u8; 3]) -> RgbImage {
    RgbImage::from_pixel(32, 32, Rgb(rgb))
}

/// Reports two faces per lit image: the mean color first, then its
/// complement as a second face further back in the frame.
pub struct TwoFaceEncoder;

impl FaceEncoder for TwoFaceEncoder {
    fn encode(&mut self, image: &RgbImage) -> Result<Vec<Encoding>, EncoderError> {
        let mut faces = MeanColorEncoder.encode(image)?;
        if let Some(first) = faces.first() {
            let complement = first.values.iter().map(|v| 1.0 - v).collect();
            faces.push(Encoding::new(complement));
        }
        Ok(faces)
    }
}
