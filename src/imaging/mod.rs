//! Worker stage 2 — Prepare, Compress, Thumbnails (`spec.md` §4.2).

pub mod compress;
pub mod prepare;
pub mod thumbnails;

use crate::cleanup::{CleanupManager, TempTag};
use crate::config::ProcessorConfig;
use crate::error::StageError;
use crate::model::{ImageFile, PreparedImage};

/// Runs stages 2a–2c for one file and returns a `PreparedImage` describing
/// the upload-ready JPEG and its thumbnails, all tracked with the cleanup
/// manager. The upload JPEG and thumbnails are tagged `preserved_past_worker`
/// (thumbnails/compressed); any RAW intermediate is `jpeg-processing` and is
/// reclaimed by the worker's `finally` path.
pub fn prepare_upload_image(
    file: &ImageFile,
    config: &ProcessorConfig,
    cleanup: &CleanupManager,
) -> Result<PreparedImage, StageError> {
    let source = prepare::prepare(file, cleanup)?;

    let compressed = compress::compress_for_upload(&source.path, config.max_image_size_kb, config.max_dimension)?;
    let thumbs = thumbnails::generate(&compressed.bytes)?;

    let upload_path = cleanup.generate_temp_path("upload", "jpg", TempTag::Compressed);
    CleanupManager::ensure_parent(&upload_path).map_err(io_err)?;
    std::fs::write(&upload_path, &compressed.bytes).map_err(io_err)?;
    cleanup.track(upload_path.clone(), TempTag::Compressed);

    let card_path = cleanup.generate_temp_path("card", "jpg", TempTag::Thumbnails);
    CleanupManager::ensure_parent(&card_path).map_err(io_err)?;
    std::fs::write(&card_path, &thumbs.card).map_err(io_err)?;
    cleanup.track(card_path.clone(), TempTag::Thumbnails);

    let micro_path = cleanup.generate_temp_path("micro", "jpg", TempTag::MicroThumbs);
    CleanupManager::ensure_parent(&micro_path).map_err(io_err)?;
    std::fs::write(&micro_path, &thumbs.micro).map_err(io_err)?;
    cleanup.track(micro_path.clone(), TempTag::MicroThumbs);

    Ok(PreparedImage {
        upload_jpeg_path: upload_path,
        width: compressed.width,
        height: compressed.height,
        mime: "image/jpeg",
        card_thumbnail_path: Some(card_path),
        micro_thumbnail_path: Some(micro_path),
        orientation_applied: source.orientation_applied,
        byte_len: compressed.bytes.len() as u64,
    })
}

fn io_err(e: std::io::Error) -> StageError {
    StageError::new(
        crate::error::Stage::Preparing,
        crate::error::StageErrorKind::Preparation(e.to_string()),
    )
}
