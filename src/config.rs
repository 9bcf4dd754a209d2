use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::io::Write;
use std::path::{Path, PathBuf};

/// Evidence weights used by the matcher, per `spec.md` §4.4.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvidenceWeights {
    pub race_number: f64,
    pub driver_name: f64,
    pub team: f64,
    pub sponsor: f64,
}

/// Recognition pre-filter knobs, per `spec.md` §4.4.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecognitionConfig {
    pub min_confidence: f64,
    pub max_results: usize,
    pub confidence_decay_factor: f64,
    pub relative_confidence_gap: f64,
}

/// Temporal-clustering thresholds, per `spec.md` §4.3.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TemporalConfig {
    pub window_secs: i64,
    pub max_gap_secs: i64,
    pub burst_minimum: usize,
    pub max_temporal_bonus: f64,
}

/// The remote-endpoint protocol version the category speaks, per `spec.md` §4.7.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProtocolVersion {
    V2,
    V3,
    V4,
}

impl Default for ProtocolVersion {
    fn default() -> Self {
        ProtocolVersion::V2
    }
}

/// Per-sport-category configuration record referenced throughout `spec.md` §4.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SportCategoryConfig {
    pub name: String,
    pub individual_competition: bool,
    pub weights: EvidenceWeights,
    pub recognition: RecognitionConfig,
    pub temporal: TemporalConfig,
    pub minimum_score: f64,
    pub clear_winner: f64,
    pub strong_non_number_evidence: f64,
    pub name_similarity: f64,
    pub protocol_version: ProtocolVersion,
    pub participant_label: &'static str,
}

impl SportCategoryConfig {
    pub fn motorsport() -> Self {
        SportCategoryConfig {
            name: "motorsport".into(),
            individual_competition: false,
            weights: EvidenceWeights {
                race_number: 50.0,
                driver_name: 30.0,
                team: 15.0,
                sponsor: 10.0,
            },
            recognition: RecognitionConfig {
                min_confidence: 0.35,
                max_results: 4,
                confidence_decay_factor: 0.8,
                relative_confidence_gap: 0.25,
            },
            temporal: TemporalConfig {
                window_secs: 5,
                max_gap_secs: 5,
                burst_minimum: 3,
                max_temporal_bonus: 12.0,
            },
            minimum_score: 20.0,
            clear_winner: 15.0,
            strong_non_number_evidence: 35.0,
            name_similarity: 0.8,
            protocol_version: ProtocolVersion::V3,
            participant_label: "Driver(s)",
        }
    }

    pub fn running() -> Self {
        SportCategoryConfig {
            name: "running".into(),
            individual_competition: true,
            weights: EvidenceWeights {
                race_number: 60.0,
                driver_name: 30.0,
                team: 5.0,
                sponsor: 5.0,
            },
            recognition: RecognitionConfig {
                min_confidence: 0.3,
                max_results: 1,
                confidence_decay_factor: 0.7,
                relative_confidence_gap: 0.2,
            },
            temporal: TemporalConfig {
                window_secs: 2,
                max_gap_secs: 2,
                burst_minimum: 3,
                max_temporal_bonus: 8.0,
            },
            minimum_score: 25.0,
            clear_winner: 20.0,
            strong_non_number_evidence: 30.0,
            name_similarity: 0.8,
            protocol_version: ProtocolVersion::V2,
            participant_label: "Athlete(s)",
        }
    }

    pub fn cycling() -> Self {
        SportCategoryConfig {
            name: "cycling".into(),
            individual_competition: false,
            weights: EvidenceWeights {
                race_number: 55.0,
                driver_name: 25.0,
                team: 12.0,
                sponsor: 8.0,
            },
            recognition: RecognitionConfig {
                min_confidence: 0.3,
                max_results: 3,
                confidence_decay_factor: 0.75,
                relative_confidence_gap: 0.22,
            },
            temporal: TemporalConfig {
                window_secs: 4,
                max_gap_secs: 4,
                burst_minimum: 3,
                max_temporal_bonus: 10.0,
            },
            minimum_score: 22.0,
            clear_winner: 16.0,
            strong_non_number_evidence: 32.0,
            name_similarity: 0.8,
            protocol_version: ProtocolVersion::V2,
            participant_label: "Participant(s)",
        }
    }

    /// Sum of maximum achievable evidence contributions, used to normalize
    /// candidate confidence for display (`spec.md` §4.4).
    pub fn normalizer(&self) -> f64 {
        self.weights.race_number
            + self.weights.driver_name
            + self.weights.team
            + self.weights.sponsor
            + self.temporal.max_temporal_bonus
    }
}

/// Registry of known sport categories, keyed by name. Unknown categories
/// fall back to `motorsport` (the richest evidence set) rather than failing
/// the batch.
#[derive(Debug, Clone)]
pub struct CategoryRegistry {
    categories: HashMap<String, SportCategoryConfig>,
}

impl Default for CategoryRegistry {
    fn default() -> Self {
        let mut categories = HashMap::new();
        for cfg in [
            SportCategoryConfig::motorsport(),
            SportCategoryConfig::running(),
            SportCategoryConfig::cycling(),
        ] {
            categories.insert(cfg.name.clone(), cfg);
        }
        Self { categories }
    }
}

impl CategoryRegistry {
    pub fn get(&self, name: &str) -> &SportCategoryConfig {
        self.categories
            .get(name)
            .unwrap_or_else(|| self.categories.get("motorsport").expect("motorsport always present"))
    }

    pub fn insert(&mut self, cfg: SportCategoryConfig) {
        self.categories.insert(cfg.name.clone(), cfg);
    }
}

fn default_max_image_size_kb() -> u32 {
    500
}

fn default_max_dimension() -> u32 {
    3200
}

fn default_max_concurrent_workers() -> Option<usize> {
    None
}

/// Folder organizer placement mode, per `spec.md` §4.6.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrganizeMode {
    Copy,
    Move,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FolderPattern {
    Number,
    NumberName,
    Custom,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConflictStrategy {
    Rename,
    Skip,
    Overwrite,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KeywordMode {
    Append,
    Overwrite,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrganizerConfig {
    pub enabled: bool,
    pub mode: OrganizeMode,
    pub pattern: FolderPattern,
    pub custom_pattern: Option<String>,
    pub create_unknown_folder: bool,
    pub unknown_folder_name: String,
    pub destination_path: Option<PathBuf>,
    pub include_xmp_files: bool,
    pub conflict_strategy: ConflictStrategy,
}

impl Default for OrganizerConfig {
    fn default() -> Self {
        OrganizerConfig {
            enabled: false,
            mode: OrganizeMode::Copy,
            pattern: FolderPattern::Number,
            custom_pattern: None,
            create_unknown_folder: true,
            unknown_folder_name: "Unknown_Numbers".into(),
            destination_path: None,
            include_xmp_files: true,
            conflict_strategy: ConflictStrategy::Rename,
        }
    }
}

/// Top-level configuration for one `processBatch` invocation, per
/// `spec.md` §4.1 / §4.2.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessorConfig {
    #[serde(default = "default_max_image_size_kb")]
    pub max_image_size_kb: u32,
    #[serde(default = "default_max_dimension")]
    pub max_dimension: u32,
    #[serde(default = "default_max_concurrent_workers")]
    pub max_concurrent_workers: Option<usize>,
    pub category: String,
    pub execution_id: Option<String>,
    #[serde(default)]
    pub keywords_mode: KeywordModeConfig,
    #[serde(default)]
    pub organizer: OrganizerConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeywordModeConfig {
    pub keywords: KeywordMode,
    pub description: KeywordMode,
}

impl Default for KeywordModeConfig {
    fn default() -> Self {
        KeywordModeConfig {
            keywords: KeywordMode::Append,
            description: KeywordMode::Append,
        }
    }
}

impl Default for ProcessorConfig {
    fn default() -> Self {
        ProcessorConfig {
            max_image_size_kb: default_max_image_size_kb(),
            max_dimension: default_max_dimension(),
            max_concurrent_workers: None,
            category: "motorsport".into(),
            execution_id: None,
            keywords_mode: KeywordModeConfig::default(),
            organizer: OrganizerConfig::default(),
        }
    }
}

/// Read `config.json` from `home`, returning the default config if the file
/// is missing or malformed (never fails the caller for a config problem).
pub fn read_config(home: &Path) -> ProcessorConfig {
    let path = home.join("config.json");
    let Ok(text) = std::fs::read_to_string(&path) else {
        return ProcessorConfig::default();
    };
    serde_json::from_str(&text).unwrap_or_default()
}

/// Atomically persist `config` under `home/config.json` (write-to-temp then
/// rename), matching the teacher's `projects::manager::write_config`.
pub fn write_config(home: &Path, config: &ProcessorConfig) -> std::io::Result<()> {
    std::fs::create_dir_all(home)?;
    let tmp = home.join("config.json.tmp");
    {
        let mut f = std::fs::File::create(&tmp)?;
        f.write_all(serde_json::to_string_pretty(config)?.as_bytes())?;
    }
    std::fs::rename(&tmp, home.join("config.json"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_category_registry_unknown_falls_back_to_motorsport() {
        let reg = CategoryRegistry::default();
        let cfg = reg.get("underwater_basket_weaving");
        assert_eq!(cfg.name, "motorsport");
    }

    #[test]
    fn test_category_registry_known_category() {
        let reg = CategoryRegistry::default();
        assert_eq!(reg.get("running").name, "running");
        assert!(reg.get("running").individual_competition);
        assert!(!reg.get("motorsport").individual_competition);
    }

    #[test]
    fn test_normalizer_sums_weights_and_bonus() {
        let cfg = SportCategoryConfig::motorsport();
        let expected = cfg.weights.race_number
            + cfg.weights.driver_name
            + cfg.weights.team
            + cfg.weights.sponsor
            + cfg.temporal.max_temporal_bonus;
        assert_eq!(cfg.normalizer(), expected);
    }

    #[test]
    fn test_read_config_missing_file_returns_default() {
        let tmp = tempfile::tempdir().unwrap();
        let cfg = read_config(tmp.path());
        assert_eq!(cfg.category, "motorsport");
        assert_eq!(cfg.max_image_size_kb, 500);
    }

    #[test]
    fn test_read_config_malformed_json_no_crash() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(tmp.path().join("config.json"), b"not json {{").unwrap();
        let cfg = read_config(tmp.path());
        assert_eq!(cfg.category, "motorsport");
    }

    #[test]
    fn test_write_and_read_config_round_trip() {
        let tmp = tempfile::tempdir().unwrap();
        let mut cfg = ProcessorConfig::default();
        cfg.category = "running".into();
        cfg.max_image_size_kb = 700;
        write_config(tmp.path(), &cfg).unwrap();
        let loaded = read_config(tmp.path());
        assert_eq!(loaded.category, "running");
        assert_eq!(loaded.max_image_size_kb, 700);
    }
}
