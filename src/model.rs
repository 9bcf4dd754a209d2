use crate::error::Stage;
use std::path::PathBuf;

/// Photo file formats recognized by the discovery stage (`spec.md` §6).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PhotoFormat {
    Jpeg,
    Png,
    WebP,
    Raw,
}

impl PhotoFormat {
    /// Detect the format from a file extension (case-insensitive). Returns
    /// `None` for anything not listed in `spec.md` §6.
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_ascii_lowercase().as_str() {
            "jpg" | "jpeg" => Some(PhotoFormat::Jpeg),
            "png" => Some(PhotoFormat::Png),
            "webp" => Some(PhotoFormat::WebP),
            "nef" | "arw" | "cr2" | "cr3" | "orf" | "raw" | "rw2" | "dng" => Some(PhotoFormat::Raw),
            _ => None,
        }
    }

    pub fn is_raw(&self) -> bool {
        matches!(self, PhotoFormat::Raw)
    }

    pub fn mime(&self) -> &'static str {
        match self {
            PhotoFormat::Jpeg | PhotoFormat::Raw => "image/jpeg",
            PhotoFormat::Png => "image/png",
            PhotoFormat::WebP => "image/webp",
        }
    }
}

/// A single discovered file, as produced by the discovery stage.
#[derive(Debug, Clone)]
pub struct ImageFile {
    pub id: u64,
    pub original_path: PathBuf,
    pub filename: String,
    pub is_raw: bool,
    pub extension: String,
}

/// The upload-ready working image produced by worker stage 2.
#[derive(Debug, Clone)]
pub struct PreparedImage {
    pub upload_jpeg_path: PathBuf,
    pub width: u32,
    pub height: u32,
    pub mime: &'static str,
    pub card_thumbnail_path: Option<PathBuf>,
    pub micro_thumbnail_path: Option<PathBuf>,
    pub orientation_applied: bool,
    pub byte_len: u64,
}

/// Timestamp source used for `ImageTimestamp`, per `spec.md` §4.3.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimestampSource {
    Exif,
    Filesystem,
}

/// One image's capture time, as fed into temporal clustering.
#[derive(Debug, Clone)]
pub struct ImageTimestamp {
    pub path: PathBuf,
    pub timestamp: Option<chrono::DateTime<chrono::Utc>>,
    pub has_subsecond_precision: bool,
    pub source: TimestampSource,
}

/// A contiguous run of temporally close images, per `spec.md` §4.3.
#[derive(Debug, Clone)]
pub struct TemporalCluster {
    pub members: Vec<ImageTimestamp>,
    pub max_gap: chrono::Duration,
    pub sport_category: String,
    pub is_burst: bool,
}

/// One roster row. `numero` is the lookup key but not unique — duplicates
/// are tolerated (see SPEC_FULL.md §9, Open Question 2).
///
/// `sponsors` and `extra` realize the "dynamic participant dicts with
/// heterogeneous keys" redesign flag (`spec.md` §9): a fixed set of known
/// fields the matcher and writer read, plus an overflow map for CSV columns
/// (`Category`, `Plate_Number`, ...) this system does not interpret but
/// still carries through untouched.
#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
pub struct Participant {
    pub numero: String,
    pub nome_pilota: Option<String>,
    pub nome_navigatore: Option<String>,
    pub nome_terzo: Option<String>,
    pub nome_quarto: Option<String>,
    pub squadra: Option<String>,
    pub sponsors: Option<String>,
    pub metatag: Option<String>,
    pub folder_1: Option<String>,
    pub folder_2: Option<String>,
    pub folder_3: Option<String>,
    #[serde(default)]
    pub extra: std::collections::HashMap<String, String>,
}

impl Participant {
    /// All non-empty driver/athlete names for this participant, in column
    /// order (legacy `nome` rows are normalized to `nome_pilota` at import
    /// time, see `roster::csv_import`).
    pub fn driver_names(&self) -> Vec<&str> {
        [
            &self.nome_pilota,
            &self.nome_navigatore,
            &self.nome_terzo,
            &self.nome_quarto,
        ]
        .into_iter()
        .filter_map(|n| n.as_deref())
        .filter(|n| !n.trim().is_empty())
        .collect()
    }

    pub fn is_identifiable(&self) -> bool {
        !self.numero.trim().is_empty()
            || !self.driver_names().is_empty()
            || self.squadra.as_deref().is_some_and(|s| !s.trim().is_empty())
    }

    /// Sponsor name tokens, split on the delimiters `spec.md` §4.5 also uses
    /// for keyword tokenization (`,`, whitespace, `-`, `/`, `&`).
    pub fn sponsor_tokens(&self) -> Vec<String> {
        split_tokens(self.sponsors.as_deref().unwrap_or(""))
    }
}

/// Split on `,`, `&`, `/`, `-`, and whitespace — the delimiter set `spec.md`
/// §4.5 specifies for both driver-name and metatag tokenization.
pub fn split_tokens(s: &str) -> Vec<String> {
    s.split(|c: char| c == ',' || c == '&' || c == '/' || c == '-' || c.is_whitespace())
        .map(|t| t.trim())
        .filter(|t| !t.is_empty())
        .map(|t| t.to_string())
        .collect()
}

/// One detected vehicle/athlete from the recognition endpoint, per
/// `spec.md` §3. `confidence` and `other_text` are strictly informational.
#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
pub struct RecognitionResult {
    pub race_number: Option<String>,
    pub drivers: Vec<String>,
    pub team: Option<String>,
    pub category: Option<String>,
    pub other_text: Vec<String>,
    pub confidence: f64,
    pub plate: Option<String>,
    pub bounding_box: Option<BoundingBox>,
}

#[derive(Debug, Clone, Copy, serde::Serialize, serde::Deserialize)]
pub struct BoundingBox {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

/// A scored signal linking a recognition to a participant, per `spec.md` §3.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EvidenceKind {
    RaceNumber,
    DriverName,
    Sponsor,
    Team,
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct Evidence {
    pub kind: EvidenceKind,
    pub matched_value: String,
    pub score: f64,
}

/// A scored participant candidate for one recognized vehicle.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct MatchCandidate {
    pub participant: Participant,
    pub evidence: Vec<Evidence>,
    pub raw_score: f64,
    pub confidence: f64,
    pub temporal_bonus: f64,
    pub cluster_size: usize,
    pub is_burst_mode_candidate: bool,
    pub reasoning: Vec<String>,
}

/// The outcome of matching one detected vehicle against the roster.
#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
pub struct MatchResult {
    pub best: Option<MatchCandidate>,
    pub candidates: Vec<MatchCandidate>,
    pub multiple_high_scores: bool,
    pub resolved_by_override: bool,
}

/// The final, streamed-out result for one processed file, per `spec.md` §3.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct WorkerResult {
    pub file_id: u64,
    pub success: bool,
    pub analysis: Vec<RecognitionResult>,
    pub matches: Vec<MatchResult>,
    pub timings: WorkerTimings,
    pub error: Option<String>,
    pub failed_stage: Option<Stage>,
}

#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
pub struct WorkerTimings {
    pub prepare_ms: u64,
    pub upload_ms: u64,
    pub analyze_ms: u64,
    pub match_ms: u64,
    pub write_ms: u64,
    pub organize_ms: u64,
}

/// Batch-wide monotonically non-decreasing counters, per `spec.md` §3.
#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
pub struct BatchStats {
    pub total: usize,
    pub processed: usize,
    pub successful: usize,
    pub errors: usize,
    pub ghost_vehicles: usize,
    pub start_time_ms: u64,
    pub memory_samples: Vec<MemorySample>,
}

#[derive(Debug, Clone, Copy, serde::Serialize, serde::Deserialize)]
pub struct MemorySample {
    pub at_ms: u64,
    pub used_fraction: f64,
}
