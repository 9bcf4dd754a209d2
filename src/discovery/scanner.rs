use crate::model::{ImageFile, PhotoFormat};
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use walkdir::WalkDir;

static NEXT_FILE_ID: AtomicU64 = AtomicU64::new(1);

/// Recursively scan `dir` for supported image files, per `spec.md` §6.
/// Symlinks are skipped, as are macOS AppleDouble sidecar files
/// (`._whatever`), which `WalkDir` would otherwise surface as bogus
/// duplicate entries. Permission/IO errors on individual entries are
/// logged and skipped rather than aborting the whole scan.
pub fn scan_directory(dir: &Path) -> (Vec<ImageFile>, Vec<String>) {
    let mut files = Vec::new();
    let mut errors = Vec::new();

    for entry in WalkDir::new(dir)
        .follow_links(false)
        .into_iter()
        .filter_entry(|e| !e.path_is_symlink())
    {
        match entry {
            Err(e) => {
                let msg = format!("scan error: {e}");
                tracing::warn!("{}", msg);
                errors.push(msg);
            }
            Ok(entry) => {
                if !entry.file_type().is_file() || entry.path_is_symlink() {
                    continue;
                }
                let path = entry.path();
                let filename = match path.file_name().and_then(|n| n.to_str()) {
                    Some(n) => n.to_string(),
                    None => continue,
                };
                if filename.starts_with("._") {
                    tracing::debug!("skipping AppleDouble sidecar: {:?}", path);
                    continue;
                }
                let ext = match path.extension().and_then(|e| e.to_str()) {
                    Some(e) => e.to_string(),
                    None => continue,
                };
                let Some(format) = PhotoFormat::from_extension(&ext) else {
                    continue;
                };
                files.push(ImageFile {
                    id: NEXT_FILE_ID.fetch_add(1, Ordering::Relaxed),
                    original_path: path.to_path_buf(),
                    filename,
                    is_raw: format.is_raw(),
                    extension: ext.to_ascii_lowercase(),
                });
            }
        }
    }

    tracing::debug!(
        "scan_directory {:?}: {} files, {} errors",
        dir,
        files.len(),
        errors.len()
    );
    (files, errors)
}
