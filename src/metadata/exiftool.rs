//! External `exiftool` invocation (`spec.md` §4.5). System binary on `PATH`
//! takes priority; otherwise a bundled platform-specific binary under
//! `vendor/<platform>/` is used, matching the teacher's externally-located
//! binary convention.

use crate::config::KeywordMode;
use std::path::{Path, PathBuf};
use std::process::Command;

#[derive(Debug, thiserror::Error)]
pub enum ExiftoolError {
    #[error("exiftool binary not found on PATH or in vendor/")]
    NotFound,
    #[error("exiftool invocation failed: {0}")]
    Invocation(String),
}

/// Locate the `exiftool` binary: system `PATH` first, else a bundled
/// `vendor/<platform>/exiftool(.exe)` binary alongside the running process.
pub fn locate() -> Result<PathBuf, ExiftoolError> {
    if let Ok(path) = which_on_path("exiftool") {
        return Ok(path);
    }

    let platform_dir = if cfg!(target_os = "windows") {
        "windows"
    } else if cfg!(target_os = "macos") {
        "macos"
    } else {
        "linux"
    };
    let binary_name = if cfg!(target_os = "windows") {
        "exiftool.exe"
    } else {
        "exiftool"
    };

    if let Ok(exe) = std::env::current_exe() {
        if let Some(dir) = exe.parent() {
            let bundled = dir.join("vendor").join(platform_dir).join(binary_name);
            if bundled.is_file() {
                return Ok(bundled);
            }
        }
    }

    Err(ExiftoolError::NotFound)
}

fn which_on_path(name: &str) -> Result<PathBuf, ()> {
    let path_var = std::env::var_os("PATH").ok_or(())?;
    for dir in std::env::split_paths(&path_var) {
        let candidate = dir.join(name);
        if candidate.is_file() {
            return Ok(candidate);
        }
        let candidate_exe = dir.join(format!("{name}.exe"));
        if candidate_exe.is_file() {
            return Ok(candidate_exe);
        }
    }
    Err(())
}

/// Reads back `path`'s current IPTC keywords, if any. Used only for
/// append-mode dedup — `exiftool`'s own `+=` list semantics dedup
/// case-sensitively, which undershoots `spec.md`'s case-insensitive rule.
fn read_back_keywords(path: &Path) -> Vec<String> {
    rexiv2::Metadata::new_from_path(path)
        .ok()
        .and_then(|m| m.get_tag_multiple_strings("Iptc.Application2.Keywords").ok())
        .unwrap_or_default()
}

fn read_back_description(path: &Path) -> Option<String> {
    rexiv2::Metadata::new_from_path(path)
        .ok()
        .and_then(|m| m.get_tag_string("Iptc.Application2.Caption").ok())
        .filter(|s| !s.is_empty())
}

/// Write `keywords`/`description` into `path`'s `IPTC:Keywords` (with XMP
/// mirrors) and description field via `exiftool -overwrite_original`.
///
/// Append-mode merging is computed in Rust (`crate::metadata::merge_keywords`/
/// `merge_description`), not delegated to `exiftool`'s native `+=`: reading
/// the existing tags back first and writing the full merged list is what
/// gives case-insensitive dedup (`spec.md` §4.5/§8), which `exiftool +=`
/// alone cannot.
pub fn write_metadata(
    binary: &Path,
    path: &Path,
    keywords: &[String],
    description: Option<&str>,
    keywords_mode: KeywordMode,
    description_mode: KeywordMode,
) -> Result<(), ExiftoolError> {
    let merged_keywords = match keywords_mode {
        KeywordMode::Overwrite => keywords.to_vec(),
        KeywordMode::Append => {
            crate::metadata::merge_keywords(&read_back_keywords(path), keywords, KeywordMode::Append)
        }
    };

    let existing_description = match description_mode {
        KeywordMode::Append => read_back_description(path),
        KeywordMode::Overwrite => None,
    };
    let merged_description =
        crate::metadata::merge_description(existing_description.as_deref(), description, description_mode);

    let mut cmd = Command::new(binary);
    cmd.arg("-overwrite_original");

    cmd.arg("-IPTC:Keywords=");
    cmd.arg("-XMP-dc:Subject=");
    for keyword in &merged_keywords {
        cmd.arg(format!("-IPTC:Keywords+={keyword}"));
        cmd.arg(format!("-XMP-dc:Subject+={keyword}"));
    }

    if let Some(description) = merged_description.as_deref() {
        cmd.arg(format!("-IPTC:Caption-Abstract={description}"));
        cmd.arg(format!("-XMP-dc:Description={description}"));
    }

    cmd.arg(path);

    let output = cmd.output().map_err(|e| ExiftoolError::Invocation(e.to_string()))?;
    if !output.status.success() {
        return Err(ExiftoolError::Invocation(String::from_utf8_lossy(&output.stderr).into_owned()));
    }
    Ok(())
}
