//! Stage 2a — Prepare (`spec.md` §4.2). For RAW inputs, extracts the largest
//! embedded JPEG preview via `rsraw`, applies EXIF orientation, and
//! re-encodes at quality 90 to a tracked temp path. JPEG/PNG/WebP inputs
//! pass through untouched.

use crate::cleanup::{CleanupManager, TempTag};
use crate::error::{StageError, StageErrorKind};
use crate::model::ImageFile;
use std::path::{Path, PathBuf};
use std::sync::mpsc;
use std::time::Duration;

const RAW_PREVIEW_TIMEOUT: Duration = Duration::from_secs(10);
const MIN_PREVIEW_BYTES: usize = 200 * 1024;
const MAX_PREVIEW_BYTES: usize = 2 * 1024 * 1024;

/// Result of stage 2a: the path the compress stage should read from, plus
/// whether the on-disk bytes there are a worker-owned temp copy (RAW) or the
/// original file (direct formats, never touched).
pub struct PreparedSource {
    pub path: PathBuf,
    pub orientation_applied: bool,
}

pub fn prepare(
    file: &ImageFile,
    cleanup: &CleanupManager,
) -> Result<PreparedSource, StageError> {
    if !file.is_raw {
        return Ok(PreparedSource {
            path: file.original_path.clone(),
            orientation_applied: false,
        });
    }

    let orientation = read_raw_orientation(&file.original_path);
    let preview = extract_raw_preview_with_timeout(&file.original_path)?;

    let (bytes, orientation_applied) = if orientation.is_some_and(|o| o != 1) {
        (reencode_oriented(&preview, orientation, 90)?, true)
    } else {
        (preview, false)
    };

    let out_path = cleanup.generate_temp_path("raw-preview", "jpg", TempTag::JpegProcessing);
    CleanupManager::ensure_parent(&out_path).map_err(|e| {
        StageError::new(crate::error::Stage::Preparing, StageErrorKind::Preparation(e.to_string()))
    })?;
    std::fs::write(&out_path, &bytes).map_err(|e| {
        StageError::new(crate::error::Stage::Preparing, StageErrorKind::Preparation(e.to_string()))
    })?;
    cleanup.track(out_path.clone(), TempTag::JpegProcessing);

    Ok(PreparedSource {
        path: out_path,
        orientation_applied,
    })
}

fn extract_raw_preview_with_timeout(path: &Path) -> Result<Vec<u8>, StageError> {
    let path = path.to_path_buf();
    let (tx, rx) = mpsc::channel();
    std::thread::spawn(move || {
        let result = std::panic::catch_unwind(|| extract_raw_preview(&path));
        let _ = tx.send(result);
    });

    match rx.recv_timeout(RAW_PREVIEW_TIMEOUT) {
        Ok(Ok(Some(bytes))) => Ok(bytes),
        Ok(Ok(None)) => Err(StageError::new(
            crate::error::Stage::Preparing,
            StageErrorKind::Preparation("no usable embedded preview found in RAW file".into()),
        )),
        Ok(Err(_)) => Err(StageError::new(
            crate::error::Stage::Preparing,
            StageErrorKind::Preparation("panic while extracting RAW preview".into()),
        )),
        Err(_) => Err(StageError::new(
            crate::error::Stage::Preparing,
            StageErrorKind::Preparation("RAW preview extraction timed out".into()),
        )),
    }
}

/// Extract every embedded JPEG preview and pick the largest one inside the
/// target size band (`spec.md` §4.2: 200 KB – 2 MB); fall back to the
/// largest available if none fall inside the band.
fn extract_raw_preview(path: &Path) -> Option<Vec<u8>> {
    let buf = std::fs::read(path).ok()?;
    let mut raw = rsraw::RawImage::open(&buf).ok()?;
    let thumbs = raw.extract_thumbs().ok()?;
    let mut jpegs: Vec<Vec<u8>> = thumbs
        .into_iter()
        .filter(|t| matches!(t.format, rsraw::ThumbFormat::Jpeg))
        .map(|t| t.data)
        .collect();

    if let Some(in_band) = jpegs
        .iter()
        .filter(|b| b.len() >= MIN_PREVIEW_BYTES && b.len() <= MAX_PREVIEW_BYTES)
        .max_by_key(|b| b.len())
        .cloned()
    {
        return Some(in_band);
    }

    jpegs.sort_by_key(|b| b.len());
    jpegs.pop()
}

fn reencode_oriented(jpeg_bytes: &[u8], orientation: Option<u16>, quality: i32) -> Result<Vec<u8>, StageError> {
    let img = image::load_from_memory(jpeg_bytes).map_err(|e| {
        StageError::new(
            crate::error::Stage::Preparing,
            StageErrorKind::Preparation(format!("cannot decode RAW preview: {e}")),
        )
    })?;
    let rotated = apply_orientation(img, orientation);
    turbojpeg::compress_image(&rotated.to_rgb8(), quality, turbojpeg::Subsamp::Sub2x2).map(|buf| buf.to_vec()).map_err(|e| {
        StageError::new(
            crate::error::Stage::Preparing,
            StageErrorKind::Preparation(format!("re-encode after orientation failed: {e}")),
        )
    })
}

/// Read the EXIF orientation tag from a RAW file via `rawler`. Never panics;
/// returns `None` on any decoder error, which is treated as "no rotation
/// needed" by the caller.
fn read_raw_orientation(path: &Path) -> Option<u16> {
    match std::panic::catch_unwind(|| read_raw_orientation_inner(path)) {
        Ok(o) => o,
        Err(_) => {
            tracing::warn!("panic while reading RAW orientation for {:?}", path);
            None
        }
    }
}

fn read_raw_orientation_inner(path: &Path) -> Option<u16> {
    let rawfile = rawler::rawsource::RawSource::new(path).ok()?;
    let decoder = rawler::get_decoder(&rawfile).ok()?;
    let params = rawler::decoders::RawDecodeParams { image_index: 0 };
    let metadata = decoder.raw_metadata(&rawfile, &params).ok()?;
    metadata.exif.orientation
}

fn apply_orientation(img: image::DynamicImage, orientation: Option<u16>) -> image::DynamicImage {
    match orientation {
        Some(3) => img.rotate180(),
        Some(6) => img.rotate90(),
        Some(8) => img.rotate270(),
        Some(o) if matches!(o, 2 | 4 | 5 | 7) => {
            tracing::debug!("prepare: orientation {} (mirror) not applied", o);
            img
        }
        _ => img,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ImageFile;

    #[test]
    fn test_direct_format_passes_through_unchanged() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("a.jpg");
        std::fs::write(&path, b"fake jpeg bytes").unwrap();
        let file = ImageFile {
            id: 1,
            original_path: path.clone(),
            filename: "a.jpg".into(),
            is_raw: false,
            extension: "jpg".into(),
        };
        let cleanup = CleanupManager::new(tmp.path().join("tmp"));
        let prepared = prepare(&file, &cleanup).unwrap();
        assert_eq!(prepared.path, path);
        assert!(!prepared.orientation_applied);
        assert_eq!(cleanup.tracked_count(), 0);
    }

    #[test]
    fn test_raw_without_preview_returns_preparation_error() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("a.cr2");
        std::fs::write(&path, b"not a real raw file").unwrap();
        let file = ImageFile {
            id: 1,
            original_path: path,
            filename: "a.cr2".into(),
            is_raw: true,
            extension: "cr2".into(),
        };
        let cleanup = CleanupManager::new(tmp.path().join("tmp"));
        let err = prepare(&file, &cleanup).unwrap_err();
        assert_eq!(err.stage, crate::error::Stage::Preparing);
    }
}
