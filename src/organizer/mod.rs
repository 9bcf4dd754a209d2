//! Stage 7 — Folder Organizer (`spec.md` §4.6).

use crate::config::{ConflictStrategy, FolderPattern, OrganizeMode, OrganizerConfig};
use crate::error::{Stage, StageError, StageErrorKind};
use crate::model::{MatchResult, Participant};
use std::path::{Path, PathBuf};

/// One placement decision for a file: a destination folder, computed for
/// one matched participant (or the generic/roster-unknown bucket).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Placement {
    pub folder_name: String,
    pub is_unknown: bool,
}

/// Compute the destination folders for an image given its match results,
/// per `spec.md` §4.6. Returns one `Placement` per matched participant,
/// fanning out to multiple folders when more than one vehicle matched.
pub fn compute_placements(matches: &[MatchResult], config: &OrganizerConfig, roster_supplied: bool) -> Vec<Placement> {
    if matches.is_empty() {
        // Nothing was recognized at all — the generic unknown bucket.
        return vec![Placement {
            folder_name: "unknown".to_string(),
            is_unknown: true,
        }];
    }

    let matched: Vec<&Participant> = matches.iter().filter_map(|m| m.best.as_ref()).map(|c| &c.participant).collect();

    if matched.is_empty() {
        // Numbers were recognized, but none matched a roster row — distinct
        // from the generic unknown bucket per `spec.md` §4.6 (UnknownNumber
        // only applies when a roster was actually supplied).
        let folder_name = if roster_supplied {
            config.unknown_folder_name.clone()
        } else {
            "unknown".to_string()
        };
        return vec![Placement {
            folder_name,
            is_unknown: true,
        }];
    }

    matched
        .iter()
        .map(|p| Placement {
            folder_name: folder_name_for(p, config),
            is_unknown: false,
        })
        .collect()
}

fn folder_name_for(participant: &Participant, config: &OrganizerConfig) -> String {
    let explicit = [&participant.folder_1, &participant.folder_2, &participant.folder_3]
        .into_iter()
        .find_map(|f| f.as_deref())
        .filter(|f| !f.trim().is_empty());

    if let Some(explicit) = explicit {
        return explicit.to_string();
    }

    match config.pattern {
        FolderPattern::Number => participant.numero.clone(),
        FolderPattern::NumberName => {
            let driver = participant.driver_names().first().copied().unwrap_or("");
            if driver.is_empty() {
                participant.numero.clone()
            } else {
                format!("{}_{}", participant.numero, sanitize(driver))
            }
        }
        FolderPattern::Custom => config
            .custom_pattern
            .clone()
            .unwrap_or_else(|| participant.numero.clone())
            .replace("{number}", &participant.numero)
            .replace(
                "{name}",
                participant.driver_names().first().copied().unwrap_or(""),
            )
            .replace("{team}", participant.squadra.as_deref().unwrap_or("")),
    }
}

fn sanitize(s: &str) -> String {
    s.chars()
        .map(|c| if c.is_alphanumeric() || c == '-' { c } else { '_' })
        .collect()
}

/// Place `file` (and, when `include_xmp_files`, its co-located sidecar) into
/// each computed placement's folder under `destination_root`. For a
/// multi-folder fan-out with `mode=move`, every destination but the last
/// receives a copy, and the last receives the move, to preserve the file
/// (`SPEC_FULL.md` §9, Open Question 3).
pub fn place_file(
    file: &Path,
    destination_root: &Path,
    placements: &[Placement],
    config: &OrganizerConfig,
) -> Result<Vec<PathBuf>, StageError> {
    let mut placed = Vec::new();
    let last_index = placements.len().saturating_sub(1);

    for (i, placement) in placements.iter().enumerate() {
        let folder_name = if placement.is_unknown && !config.create_unknown_folder {
            continue;
        } else {
            &placement.folder_name
        };

        let folder = destination_root.join(folder_name);
        std::fs::create_dir_all(&folder)
            .map_err(|e| StageError::new(Stage::Organizing, StageErrorKind::Organization(e.to_string())))?;

        let destination = resolve_conflict(&folder, file, config.conflict_strategy)?;
        if let Some(destination) = destination {
            let effective_mode = if config.mode == OrganizeMode::Move && i < last_index {
                OrganizeMode::Copy
            } else {
                config.mode
            };
            transfer(file, &destination, effective_mode)?;

            if config.include_xmp_files {
                let sidecar = crate::metadata::xmp::sidecar_path(file);
                if sidecar.exists() {
                    let sidecar_dest = crate::metadata::xmp::sidecar_path(&destination);
                    let _ = transfer(&sidecar, &sidecar_dest, effective_mode);
                }
            }

            placed.push(destination);
        }
    }

    Ok(placed)
}

fn resolve_conflict(folder: &Path, file: &Path, strategy: ConflictStrategy) -> Result<Option<PathBuf>, StageError> {
    let file_name = file
        .file_name()
        .ok_or_else(|| StageError::new(Stage::Organizing, StageErrorKind::Organization("file has no name".into())))?;
    let candidate = folder.join(file_name);

    if !candidate.exists() {
        return Ok(Some(candidate));
    }

    match strategy {
        ConflictStrategy::Overwrite => Ok(Some(candidate)),
        ConflictStrategy::Skip => Ok(None),
        ConflictStrategy::Rename => {
            let stem = Path::new(file_name).file_stem().and_then(|s| s.to_str()).unwrap_or("file");
            let ext = Path::new(file_name).extension().and_then(|s| s.to_str());
            for n in 1.. {
                let renamed = match ext {
                    Some(ext) => folder.join(format!("{stem} ({n}).{ext}")),
                    None => folder.join(format!("{stem} ({n})")),
                };
                if !renamed.exists() {
                    return Ok(Some(renamed));
                }
            }
            unreachable!("u32 suffix space is effectively unbounded")
        }
    }
}

fn transfer(source: &Path, destination: &Path, mode: OrganizeMode) -> Result<(), StageError> {
    let result = match mode {
        OrganizeMode::Copy => std::fs::copy(source, destination).map(|_| ()),
        OrganizeMode::Move => std::fs::rename(source, destination).or_else(|_| std::fs::copy(source, destination).map(|_| ())),
    };
    result.map_err(|e| StageError::new(Stage::Organizing, StageErrorKind::Organization(e.to_string())))
}
