//! Stage 2b — Compress for upload (`spec.md` §4.2). Resizes to fit inside
//! `maxDimension × maxDimension` without enlarging, then predictive-quality
//! encodes with a binary-search fallback to hit `maxImageSizeKB`.

use crate::error::{Stage, StageError, StageErrorKind};
use image::{DynamicImage, GenericImageView};
use std::path::Path;

pub struct CompressedImage {
    pub bytes: Vec<u8>,
    pub width: u32,
    pub height: u32,
    /// Set when even `q=30` could not meet the size cap; the caller still
    /// gets the smallest achievable bytes (`spec.md` §7 `CompressionError`
    /// is reported but not fatal).
    pub hit_floor: bool,
}

const MIN_QUALITY: i32 = 30;
const MAX_QUALITY: i32 = 95;
const MAX_BINARY_SEARCH_ITERATIONS: u32 = 4;

pub fn compress_for_upload(
    source_path: &Path,
    max_image_size_kb: u32,
    max_dimension: u32,
) -> Result<CompressedImage, StageError> {
    let bytes = std::fs::read(source_path).map_err(|e| {
        StageError::new(Stage::Preparing, StageErrorKind::Preparation(e.to_string()))
    })?;
    let img = image::load_from_memory(&bytes).map_err(|e| {
        StageError::new(
            Stage::Preparing,
            StageErrorKind::Preparation(format!("cannot decode image: {e}")),
        )
    })?;

    let resized = resize_to_fit(img, max_dimension);
    let (width, height) = resized.dimensions();
    let rgb = resized.to_rgb8();

    let max_bytes = (max_image_size_kb as usize) * 1024;
    let megapixels = ((width as f64) * (height as f64) / 1_000_000.0).max(0.01);
    let q0 = (((max_bytes as f64) / (megapixels * 10_000.0)) * 100.0)
        .round()
        .clamp(MIN_QUALITY as f64, MAX_QUALITY as f64) as i32;

    let first = encode(&rgb, q0)?;
    if first.len() <= max_bytes {
        return Ok(CompressedImage {
            bytes: first,
            width,
            height,
            hit_floor: false,
        });
    }

    let mut low = MIN_QUALITY;
    let mut high = q0;
    let mut best_fit: Option<Vec<u8>> = None;
    for _ in 0..MAX_BINARY_SEARCH_ITERATIONS {
        if low > high {
            break;
        }
        let mid = (low + high) / 2;
        let candidate = encode(&rgb, mid)?;
        if candidate.len() <= max_bytes {
            best_fit = Some(candidate);
            low = mid + 1;
        } else {
            high = mid - 1;
        }
    }

    match best_fit {
        Some(bytes) => Ok(CompressedImage {
            bytes,
            width,
            height,
            hit_floor: false,
        }),
        None => {
            let floor = encode(&rgb, MIN_QUALITY)?;
            tracing::warn!(
                "compress: could not meet {} KB cap even at quality {}, emitting {} bytes",
                max_image_size_kb,
                MIN_QUALITY,
                floor.len()
            );
            Ok(CompressedImage {
                bytes: floor,
                width,
                height,
                hit_floor: true,
            })
        }
    }
}

fn resize_to_fit(img: DynamicImage, max_dimension: u32) -> DynamicImage {
    let (width, height) = img.dimensions();
    if width <= max_dimension && height <= max_dimension {
        return img;
    }
    img.resize(max_dimension, max_dimension, image::imageops::FilterType::Lanczos3)
}

fn encode(rgb: &image::RgbImage, quality: i32) -> Result<Vec<u8>, StageError> {
    turbojpeg::compress_image(rgb, quality, turbojpeg::Subsamp::Sub2x2)
        .map(|buf| buf.to_vec())
        .map_err(|e| {
            StageError::new(
                Stage::Preparing,
                StageErrorKind::Compression(format!("encode at quality {quality} failed: {e}")),
            )
        })
}
