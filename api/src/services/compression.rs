//! Iterative JPEG re-encoding of still images that exceed a byte ceiling

use std::io::Cursor;

use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use image::{DynamicImage, GenericImageView, ImageReader};
use thiserror::Error;

use crate::constants::{
    COMPRESSION_MAX_ATTEMPTS, COMPRESSION_MIN_LONG_EDGE, COMPRESSION_MIN_QUALITY,
    COMPRESSION_QUALITY_STEP, COMPRESSION_SCALE_PER_ATTEMPT, COMPRESSION_START_QUALITY,
};

#[derive(Debug, Error)]
pub enum CompressionError {
    #[error("could not decode image: {0}")]
    Decode(#[from] image::ImageError),
    #[error("could not encode image: {0}")]
    Encode(#[source] image::ImageError),
    #[error("still {smallest} bytes after {attempts} attempts (ceiling {ceiling} bytes)")]
    Exhausted {
        attempts: u32,
        smallest: usize,
        ceiling: usize,
    },
    #[error("compression task aborted: {0}")]
    Aborted(String),
}

/// One step of the re-encoding schedule
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompressionStep {
    pub attempt: u32,
    pub quality: u8,
    /// Target size of the longer side in pixels
    pub long_edge: u32,
}

#[derive(Debug, Clone)]
pub struct Compressed {
    pub data: Vec<u8>,
    pub step: CompressionStep,
}

/// Quality drops by a fixed step and the long edge shrinks 10% per attempt,
/// both clamped to their floors. Images already smaller than the edge floor
/// are never upscaled.
pub fn compression_schedule(original_long_edge: u32) -> Vec<CompressionStep> {
    (1..=COMPRESSION_MAX_ATTEMPTS)
        .map(|attempt| {
            let drop = COMPRESSION_QUALITY_STEP.saturating_mul((attempt - 1) as u8);
            let quality = COMPRESSION_START_QUALITY
                .saturating_sub(drop)
                .max(COMPRESSION_MIN_QUALITY);

            let scaled = (original_long_edge as f64
                * COMPRESSION_SCALE_PER_ATTEMPT.powi(attempt as i32))
            .round() as u32;
            let long_edge = scaled
                .max(COMPRESSION_MIN_LONG_EDGE)
                .min(original_long_edge);

            CompressionStep {
                attempt,
                quality,
                long_edge,
            }
        })
        .collect()
}

fn encode_step(img: &DynamicImage, step: CompressionStep) -> Result<Vec<u8>, CompressionError> {
    let (width, height) = img.dimensions();
    let resized = if width.max(height) > step.long_edge {
        img.resize(step.long_edge, step.long_edge, FilterType::Triangle)
    } else {
        img.clone()
    };

    let rgb = resized.to_rgb8();
    let mut output = Cursor::new(Vec::new());
    JpegEncoder::new_with_quality(&mut output, step.quality)
        .encode_image(&rgb)
        .map_err(CompressionError::Encode)?;

    Ok(output.into_inner())
}

/// Re-encode `data` as JPEG until it fits under `ceiling` bytes.
///
/// Stops at the first attempt that fits. CPU bound; call from a blocking task.
pub fn compress_to_ceiling(data: &[u8], ceiling: usize) -> Result<Compressed, CompressionError> {
    let img = ImageReader::new(Cursor::new(data))
        .with_guessed_format()
        .map_err(image::ImageError::IoError)?
        .decode()?;

    let (width, height) = img.dimensions();
    let mut smallest = usize::MAX;

    for step in compression_schedule(width.max(height)) {
        let encoded = encode_step(&img, step)?;
        tracing::debug!(
            attempt = step.attempt,
            quality = step.quality,
            long_edge = step.long_edge,
            bytes = encoded.len(),
            ceiling,
            "compression attempt"
        );

        if encoded.len() <= ceiling {
            return Ok(Compressed {
                data: encoded,
                step,
            });
        }
        smallest = smallest.min(encoded.len());
    }

    Err(CompressionError::Exhausted {
        attempts: COMPRESSION_MAX_ATTEMPTS,
        smallest,
        ceiling,
    })
}
