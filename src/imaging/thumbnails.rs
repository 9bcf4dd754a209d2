//! Stage 2c — Thumbnails (`spec.md` §4.2). Generates the 280×280 "card" and
//! 32×32 "micro" thumbnails from the already-compressed in-memory buffer, in
//! parallel (mirrors the teacher's `rayon`-driven thumbnail tiers).

use crate::error::{Stage, StageError, StageErrorKind};
use image::{imageops::FilterType, DynamicImage, GenericImageView};

const CARD_SIZE: u32 = 280;
const CARD_QUALITY: i32 = 85;
const MICRO_SIZE: u32 = 32;
const MICRO_QUALITY: i32 = 70;

pub struct Thumbnails {
    pub card: Vec<u8>,
    pub micro: Vec<u8>,
}

pub fn generate(compressed_jpeg_bytes: &[u8]) -> Result<Thumbnails, StageError> {
    let img = image::load_from_memory(compressed_jpeg_bytes).map_err(|e| {
        StageError::new(
            Stage::Preparing,
            StageErrorKind::Preparation(format!("cannot decode compressed buffer for thumbnails: {e}")),
        )
    })?;

    let (card, micro) = rayon::join(
        || fit_inside(&img, CARD_SIZE, CARD_QUALITY),
        || fit_cover_center(&img, MICRO_SIZE, MICRO_QUALITY),
    );

    Ok(Thumbnails {
        card: card?,
        micro: micro?,
    })
}

/// `fit=inside`: scale down to fit entirely within `size × size`, preserving
/// aspect ratio; never enlarges.
fn fit_inside(img: &DynamicImage, size: u32, quality: i32) -> Result<Vec<u8>, StageError> {
    let (width, height) = img.dimensions();
    let resized = if width <= size && height <= size {
        img.clone()
    } else {
        img.resize(size, size, FilterType::Lanczos3)
    };
    encode(&resized.to_rgb8(), quality)
}

/// `fit=cover, position=center`: scale up/down so the shorter side fills
/// `size`, then crop the centered `size × size` square.
fn fit_cover_center(img: &DynamicImage, size: u32, quality: i32) -> Result<Vec<u8>, StageError> {
    let (width, height) = img.dimensions();
    let scale = (size as f64 / width as f64).max(size as f64 / height as f64);
    let scaled_w = ((width as f64) * scale).round().max(1.0) as u32;
    let scaled_h = ((height as f64) * scale).round().max(1.0) as u32;
    let resized = img.resize_exact(scaled_w, scaled_h, FilterType::Lanczos3);

    let x = (scaled_w.saturating_sub(size)) / 2;
    let y = (scaled_h.saturating_sub(size)) / 2;
    let cropped = resized.crop_imm(x, y, size.min(scaled_w), size.min(scaled_h));
    encode(&cropped.to_rgb8(), quality)
}

fn encode(rgb: &image::RgbImage, quality: i32) -> Result<Vec<u8>, StageError> {
    turbojpeg::compress_image(rgb, quality, turbojpeg::Subsamp::Sub2x2)
        .map(|buf| buf.to_vec())
        .map_err(|e| {
            StageError::new(
                Stage::Preparing,
                StageErrorKind::Preparation(format!("thumbnail encode failed: {e}")),
            )
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_jpeg(width: u32, height: u32) -> Vec<u8> {
        let img = DynamicImage::new_rgb8(width, height);
        let mut buf = Vec::new();
        img.write_to(&mut std::io::Cursor::new(&mut buf), image::ImageFormat::Jpeg)
            .unwrap();
        buf
    }

    #[test]
    fn test_card_thumbnail_fits_inside_bounds() {
        let bytes = sample_jpeg(1000, 500);
        let thumbs = generate(&bytes).unwrap();
        let decoded = image::load_from_memory(&thumbs.card).unwrap();
        let (w, h) = decoded.dimensions();
        assert!(w <= CARD_SIZE && h <= CARD_SIZE);
    }

    #[test]
    fn test_micro_thumbnail_is_exact_square() {
        let bytes = sample_jpeg(1000, 500);
        let thumbs = generate(&bytes).unwrap();
        let decoded = image::load_from_memory(&thumbs.micro).unwrap();
        let (w, h) = decoded.dimensions();
        assert_eq!(w, MICRO_SIZE);
        assert_eq!(h, MICRO_SIZE);
    }

    #[test]
    fn test_micro_thumbnail_handles_tall_source() {
        let bytes = sample_jpeg(200, 900);
        let thumbs = generate(&bytes).unwrap();
        let decoded = image::load_from_memory(&thumbs.micro).unwrap();
        let (w, h) = decoded.dimensions();
        assert_eq!(w, MICRO_SIZE);
        assert_eq!(h, MICRO_SIZE);
    }
}
