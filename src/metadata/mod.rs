//! Stage 6 — Metadata Writer (`spec.md` §4.5). Keyword/description
//! composition is pure; writing dispatches to `exiftool` for raster formats
//! (with an XMP sidecar fallback) and always to an XMP sidecar for RAW.

pub mod exiftool;
pub mod xmp;

use crate::config::{KeywordMode, SportCategoryConfig};
use crate::model::{split_tokens, MatchResult, RecognitionResult};

const STOP_WORDS: &[&str] = &["the", "and", "with", "for", "from"];
const MIN_METATAG_TOKEN_LEN: usize = 3;
const MAX_RECOGNITION_SPONSOR_TOKENS: usize = 3;
const MULTI_VEHICLE_SEPARATOR: &str = "\u{2022}\u{2022}\u{2022}";

/// Composed metadata for one image, ready to hand to the writer. `None`
/// means "emit no metadata" (`spec.md` §4.5 rule 3).
pub struct ComposedMetadata {
    pub keywords: Vec<String>,
    pub description: Option<String>,
}

/// Compose keywords/description from match results, falling back to
/// recognition-only formatting when no roster was supplied at all.
pub fn compose(
    matches: &[MatchResult],
    recognitions: &[RecognitionResult],
    category: &SportCategoryConfig,
    roster_supplied: bool,
) -> Option<ComposedMetadata> {
    let matched: Vec<&MatchResult> = matches.iter().filter(|m| m.best.is_some()).collect();

    if !matched.is_empty() {
        return Some(compose_from_matches(&matched));
    }

    if roster_supplied {
        return None;
    }

    Some(compose_from_recognitions(recognitions, category))
}

fn compose_from_matches(matched: &[&MatchResult]) -> ComposedMetadata {
    let mut keywords = Vec::new();
    let mut metatags = Vec::new();

    for m in matched {
        let candidate = m.best.as_ref().expect("filtered to Some above");
        let participant = &candidate.participant;

        if !participant.numero.trim().is_empty() {
            keywords.push(participant.numero.clone());
        }
        for name in participant.driver_names() {
            keywords.extend(split_tokens(name));
        }
        if let Some(team) = participant.squadra.as_deref().filter(|t| !t.trim().is_empty()) {
            keywords.push(team.to_string());
        }
        if let Some(metatag) = participant.metatag.as_deref().filter(|t| !t.trim().is_empty()) {
            keywords.extend(
                split_tokens(metatag)
                    .into_iter()
                    .filter(|t| t.len() >= MIN_METATAG_TOKEN_LEN)
                    .filter(|t| !STOP_WORDS.contains(&t.to_ascii_lowercase().as_str())),
            );
            metatags.push(metatag.to_string());
        }
    }

    let description = if metatags.is_empty() {
        None
    } else {
        Some(metatags.join(" | "))
    };

    ComposedMetadata { keywords, description }
}

fn compose_from_recognitions(recognitions: &[RecognitionResult], category: &SportCategoryConfig) -> ComposedMetadata {
    let mut keywords = Vec::new();
    for (i, r) in recognitions.iter().enumerate() {
        if i > 0 {
            keywords.push(MULTI_VEHICLE_SEPARATOR.to_string());
        }
        if let Some(number) = r.race_number.as_deref().filter(|n| !n.trim().is_empty()) {
            keywords.push(format!("Number: {number}"));
        }
        if !r.drivers.is_empty() {
            keywords.push(format!("{}: {}", category.participant_label, r.drivers.join(", ")));
        }
        if let Some(rec_category) = r.category.as_deref().filter(|c| !c.trim().is_empty()) {
            keywords.push(format!("Category: {rec_category}"));
        }
        if category.name == "motorsport" {
            if let Some(team) = r.team.as_deref().filter(|t| !t.trim().is_empty()) {
                keywords.push(team.to_string());
            }
        }
        keywords.extend(
            r.other_text
                .iter()
                .flat_map(|t| split_tokens(t))
                .take(MAX_RECOGNITION_SPONSOR_TOKENS),
        );
    }

    ComposedMetadata {
        keywords,
        description: None,
    }
}

/// Merge `new` into `existing` per `mode`, deduplicating case-insensitively
/// in `append` mode (`spec.md` §4.5).
pub fn merge_keywords(existing: &[String], new: &[String], mode: KeywordMode) -> Vec<String> {
    match mode {
        KeywordMode::Overwrite => new.to_vec(),
        KeywordMode::Append => {
            let mut seen: std::collections::HashSet<String> =
                existing.iter().map(|k| k.to_ascii_lowercase()).collect();
            let mut merged = existing.to_vec();
            for k in new {
                let lower = k.to_ascii_lowercase();
                if seen.insert(lower) {
                    merged.push(k.clone());
                }
            }
            merged
        }
    }
}

/// Merge `new` into `existing` per `mode` (`spec.md` §4.5's description
/// mode). `description` is a single field rather than a list, so
/// case-insensitive dedup is expressed as "don't append text already
/// present in the existing value" rather than `merge_keywords`'s per-item
/// set union.
pub fn merge_description(existing: Option<&str>, new: Option<&str>, mode: KeywordMode) -> Option<String> {
    match mode {
        KeywordMode::Overwrite => new.map(str::to_string),
        KeywordMode::Append => match (existing, new) {
            (None, None) => None,
            (Some(e), None) => Some(e.to_string()),
            (None, Some(n)) => Some(n.to_string()),
            (Some(e), Some(n)) if e.is_empty() => Some(n.to_string()),
            (Some(e), Some(n)) => {
                if e.to_ascii_lowercase().contains(&n.to_ascii_lowercase()) {
                    Some(e.to_string())
                } else {
                    Some(format!("{e} | {n}"))
                }
            }
        },
    }
}

/// Writes composed metadata to `path` per `spec.md` §4.5: `exiftool` for
/// raster formats (with an XMP sidecar as the fallback path on failure),
/// always an XMP sidecar for RAW. Never touches the RAW file itself.
/// `keywords_mode`/`description_mode` apply on every path, including the
/// XMP sidecar (`xmp::write_sidecar` merges against whatever the sidecar
/// already contains).
pub fn write(
    path: &std::path::Path,
    is_raw: bool,
    composed: &ComposedMetadata,
    keywords_mode: KeywordMode,
    description_mode: KeywordMode,
) -> Result<(), crate::error::StageError> {
    use crate::error::{Stage, StageError, StageErrorKind};

    if is_raw {
        return xmp::write_sidecar(
            path,
            &composed.keywords,
            composed.description.as_deref(),
            keywords_mode,
            description_mode,
        )
        .map_err(|e| StageError::new(Stage::Writing, StageErrorKind::Metadata(e.to_string())));
    }

    match exiftool::locate() {
        Ok(binary) => {
            match exiftool::write_metadata(
                &binary,
                path,
                &composed.keywords,
                composed.description.as_deref(),
                keywords_mode,
                description_mode,
            ) {
                Ok(()) => Ok(()),
                Err(e) => {
                    tracing::warn!("exiftool failed for {:?}, falling back to XMP sidecar: {}", path, e);
                    xmp::write_sidecar(
                        path,
                        &composed.keywords,
                        composed.description.as_deref(),
                        keywords_mode,
                        description_mode,
                    )
                    .map_err(|e| StageError::new(Stage::Writing, StageErrorKind::Metadata(e.to_string())))
                }
            }
        }
        Err(e) => {
            tracing::warn!("exiftool not found for {:?}, falling back to XMP sidecar: {}", path, e);
            xmp::write_sidecar(
                path,
                &composed.keywords,
                composed.description.as_deref(),
                keywords_mode,
                description_mode,
            )
            .map_err(|e| StageError::new(Stage::Writing, StageErrorKind::Metadata(e.to_string())))
        }
    }
}
