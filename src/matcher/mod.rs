//! Evidence-weighted participant matcher (`spec.md` §4.4) — pure, apart from
//! reading the per-batch temporal cache. The hard part of this module is the
//! ordered selection rule in `select_best`, not any individual evidence test.

pub mod abbreviations;
pub mod cache;

use crate::config::SportCategoryConfig;
use crate::model::{split_tokens, Evidence, EvidenceKind, MatchCandidate, MatchResult, Participant, RecognitionResult};
use cache::MatchCache;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// Per-batch record of confirmed match outcomes, consulted for the temporal
/// bonus (`spec.md` §4.4) and written once a worker's match succeeds
/// (`spec.md` §5: write is idempotent for a given file path).
#[derive(Default)]
pub struct TemporalMatchCache {
    inner: Mutex<HashMap<PathBuf, (String, f64)>>,
}

impl TemporalMatchCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record that `path` matched `numero` at `confidence`. Idempotent: a
    /// repeat call for the same path with the same outcome is a no-op in
    /// effect (overwrites with an identical value).
    pub fn record(&self, path: PathBuf, numero: String, confidence: f64) {
        self.inner.lock().unwrap().insert(path, (numero, confidence));
    }

    /// Count of `neighbors` previously matched to `numero` with confidence
    /// at or above the 0.6 threshold `spec.md` §4.4 specifies.
    pub fn confirmations_for(&self, neighbors: &[PathBuf], numero: &str) -> usize {
        let inner = self.inner.lock().unwrap();
        neighbors
            .iter()
            .filter(|p| {
                inner
                    .get(p.as_path())
                    .is_some_and(|(n, conf)| n == numero && *conf >= 0.6)
            })
            .count()
    }
}

/// Temporal context passed into the matcher for one image, per `spec.md`
/// §4.2/§4.4: this image's temporal neighbors and the cluster it belongs to.
#[derive(Debug, Clone, Default)]
pub struct TemporalContext {
    pub neighbor_paths: Vec<PathBuf>,
    pub cluster_size: usize,
}

/// Pre-filter + sort the recognitions for one image before per-recognition
/// matching, per `spec.md` §4.4. Operates across the whole vehicle list
/// because the relative-gap and `individual_competition` rules compare
/// vehicles to each other.
pub fn filter_recognitions(
    recognitions: &[RecognitionResult],
    category: &SportCategoryConfig,
) -> Vec<RecognitionResult> {
    let mut sorted: Vec<RecognitionResult> = recognitions
        .iter()
        .filter(|r| r.confidence >= category.recognition.min_confidence)
        .cloned()
        .collect();
    sorted.sort_by(|a, b| b.confidence.partial_cmp(&a.confidence).unwrap_or(std::cmp::Ordering::Equal));

    if sorted.is_empty() {
        return sorted;
    }

    let best_confidence = sorted[0].confidence;
    let decay = category.recognition.confidence_decay_factor;
    let gap = category.recognition.relative_confidence_gap;
    let min_confidence = category.recognition.min_confidence;

    if !category.individual_competition && sorted.len() > 1 {
        // Decay is applied before the gap comparison (SPEC_FULL.md §9, Open
        // Question 1): each candidate's confidence is first rescaled by
        // `decay^i`, and that rescaled value is what the gap test compares
        // against `bestConfidence`.
        let mut kept = vec![sorted[0].clone()];
        for (i, r) in sorted.iter().enumerate().skip(1) {
            let decayed = r.confidence * decay.powi(i as i32);
            if best_confidence - decayed > gap || decayed < min_confidence {
                continue;
            }
            kept.push(r.clone());
        }
        sorted = kept;
    }

    if category.individual_competition {
        sorted.truncate(1);
    }

    sorted.truncate(category.recognition.max_results);
    sorted
}

/// Score one recognition against every roster participant and select the
/// winner, per `spec.md` §4.4. Falls back to a plain race-number lookup on
/// any internal panic, matching the spec's fallback clause.
#[allow(clippy::too_many_arguments)]
pub fn match_one(
    recognition: &RecognitionResult,
    roster: &[Participant],
    category: &SportCategoryConfig,
    context: &TemporalContext,
    temporal_cache: &TemporalMatchCache,
    cache: Option<&MatchCache>,
    cache_key: Option<u64>,
) -> MatchResult {
    if let (Some(cache), Some(key)) = (cache, cache_key) {
        if let Some(hit) = cache.get(key) {
            return hit;
        }
    }

    let result = match std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
        match_one_inner(recognition, roster, category, context, temporal_cache)
    })) {
        Ok(result) => result,
        Err(_) => {
            tracing::warn!("matcher panicked, falling back to race-number lookup");
            fallback_by_race_number(recognition, roster)
        }
    };

    if let (Some(cache), Some(key)) = (cache, cache_key) {
        cache.put(key, result.clone());
    }
    result
}

fn match_one_inner(
    recognition: &RecognitionResult,
    roster: &[Participant],
    category: &SportCategoryConfig,
    context: &TemporalContext,
    temporal_cache: &TemporalMatchCache,
) -> MatchResult {
    let mut candidates: Vec<MatchCandidate> = roster
        .iter()
        .map(|p| score_candidate(recognition, p, category, context, temporal_cache))
        .collect();

    candidates.sort_by(|a, b| b.raw_score.partial_cmp(&a.raw_score).unwrap_or(std::cmp::Ordering::Equal));
    candidates.retain(|c| c.raw_score >= category.minimum_score);

    select_best(candidates, category)
}

fn score_candidate(
    recognition: &RecognitionResult,
    participant: &Participant,
    category: &SportCategoryConfig,
    context: &TemporalContext,
    temporal_cache: &TemporalMatchCache,
) -> MatchCandidate {
    let mut evidence = Vec::new();
    let mut reasoning = Vec::new();

    if !participant.numero.trim().is_empty() {
        if let Some(race_number) = recognition.race_number.as_deref() {
            if race_number.trim() == participant.numero.trim() {
                evidence.push(Evidence {
                    kind: EvidenceKind::RaceNumber,
                    matched_value: race_number.to_string(),
                    score: category.weights.race_number,
                });
                reasoning.push(format!("race number {race_number} matches"));
            }
        }
    }

    for name in participant.driver_names() {
        if contains_normalized(&recognition.drivers, name) {
            evidence.push(Evidence {
                kind: EvidenceKind::DriverName,
                matched_value: name.to_string(),
                score: category.weights.driver_name,
            });
            reasoning.push(format!("driver name '{name}' found"));
            break;
        }
    }

    if let Some(team) = participant.squadra.as_deref().filter(|t| !t.trim().is_empty()) {
        if recognition
            .team
            .as_deref()
            .is_some_and(|t| contains_normalized_str(t, team))
        {
            evidence.push(Evidence {
                kind: EvidenceKind::Team,
                matched_value: team.to_string(),
                score: category.weights.team,
            });
            reasoning.push(format!("team '{team}' found"));
        }
    }

    for sponsor_token in participant.sponsor_tokens() {
        if recognition
            .other_text
            .iter()
            .flat_map(|t| split_tokens(t))
            .any(|token| fuzzy_sponsor_match(&token, &sponsor_token))
        {
            evidence.push(Evidence {
                kind: EvidenceKind::Sponsor,
                matched_value: sponsor_token.clone(),
                score: category.weights.sponsor,
            });
            reasoning.push(format!("sponsor token '{sponsor_token}' matched"));
            break;
        }
    }

    let raw_score_pre_bonus: f64 = evidence.iter().map(|e| e.score).sum();

    let confirmations = temporal_cache.confirmations_for(&context.neighbor_paths, &participant.numero);
    let temporal_bonus = if confirmations > 0 {
        let per_neighbor = category.temporal.max_temporal_bonus / (category.temporal.burst_minimum.max(1) as f64);
        (per_neighbor * confirmations as f64).min(category.temporal.max_temporal_bonus)
    } else {
        0.0
    };
    if temporal_bonus > 0.0 {
        reasoning.push(format!("{confirmations} temporal neighbor(s) confirm this participant"));
    }

    let raw_score = raw_score_pre_bonus + temporal_bonus;
    let confidence = (raw_score / category.normalizer()).min(1.0).max(0.0);
    let is_burst_mode_candidate = context.cluster_size >= category.temporal.burst_minimum;

    MatchCandidate {
        participant: participant.clone(),
        evidence,
        raw_score,
        confidence,
        temporal_bonus,
        cluster_size: context.cluster_size,
        is_burst_mode_candidate,
        reasoning,
    }
}

/// Apply the ordered selection rule from `spec.md` §4.4 to the (already
/// minimum-score-filtered, score-descending) candidate list.
fn select_best(candidates: Vec<MatchCandidate>, category: &SportCategoryConfig) -> MatchResult {
    if candidates.is_empty() {
        return MatchResult {
            best: None,
            candidates,
            multiple_high_scores: false,
            resolved_by_override: false,
        };
    }

    if candidates.len() == 1 {
        return MatchResult {
            best: Some(candidates[0].clone()),
            candidates,
            multiple_high_scores: false,
            resolved_by_override: false,
        };
    }

    // Two roster rows sharing a race number can't be told apart from a data
    // error, so a shared-number runner-up always forces the ambiguous flag
    // even when the leader otherwise dominates (SPEC_FULL.md §9, Open
    // Question 2).
    let duplicate_number_runner_up = candidates[1].participant.numero == candidates[0].participant.numero
        && !candidates[0].participant.numero.trim().is_empty();

    let gap = candidates[0].raw_score - candidates[1].raw_score;
    if gap >= category.clear_winner && !duplicate_number_runner_up {
        return MatchResult {
            best: Some(candidates[0].clone()),
            candidates,
            multiple_high_scores: false,
            resolved_by_override: false,
        };
    }

    if duplicate_number_runner_up {
        return MatchResult {
            best: Some(candidates[0].clone()),
            candidates,
            multiple_high_scores: true,
            resolved_by_override: false,
        };
    }

    let non_number_evidence: f64 = candidates[0]
        .evidence
        .iter()
        .filter(|e| e.kind != EvidenceKind::RaceNumber)
        .map(|e| e.score)
        .sum();
    let has_name_similarity = candidates[0]
        .evidence
        .iter()
        .any(|e| e.kind == EvidenceKind::DriverName && evidence_name_similarity(e) >= category.name_similarity);

    if non_number_evidence >= category.strong_non_number_evidence && has_name_similarity {
        return MatchResult {
            best: Some(candidates[0].clone()),
            candidates,
            multiple_high_scores: true,
            resolved_by_override: true,
        };
    }

    MatchResult {
        best: Some(candidates[0].clone()),
        candidates,
        multiple_high_scores: true,
        resolved_by_override: false,
    }
}

/// A matched driver-name evidence entry always came from an exact
/// (normalized, case-insensitive) substring match, so its similarity is 1.0;
/// kept as a function so a future fuzzy driver-name match can report a
/// partial score without changing `select_best`.
fn evidence_name_similarity(_evidence: &Evidence) -> f64 {
    1.0
}

fn fallback_by_race_number(recognition: &RecognitionResult, roster: &[Participant]) -> MatchResult {
    let Some(race_number) = recognition.race_number.as_deref() else {
        return MatchResult::default();
    };
    let Some(participant) = roster.iter().find(|p| p.numero.trim() == race_number.trim()) else {
        return MatchResult::default();
    };
    let candidate = MatchCandidate {
        participant: participant.clone(),
        evidence: vec![Evidence {
            kind: EvidenceKind::RaceNumber,
            matched_value: race_number.to_string(),
            score: 1.0,
        }],
        raw_score: 1.0,
        confidence: 1.0,
        temporal_bonus: 0.0,
        cluster_size: 0,
        is_burst_mode_candidate: false,
        reasoning: vec!["fallback: race number equality only".to_string()],
    };
    MatchResult {
        best: Some(candidate.clone()),
        candidates: vec![candidate],
        multiple_high_scores: false,
        resolved_by_override: false,
    }
}

fn normalize(s: &str) -> String {
    s.to_ascii_lowercase().split_whitespace().collect::<Vec<_>>().join(" ")
}

fn contains_normalized(haystack: &[String], needle: &str) -> bool {
    let needle = normalize(needle);
    haystack.iter().any(|h| normalize(h).contains(&needle))
}

fn contains_normalized_str(haystack: &str, needle: &str) -> bool {
    normalize(haystack).contains(&normalize(needle))
}

fn fuzzy_sponsor_match(token: &str, sponsor: &str) -> bool {
    if abbreviations::is_known_abbreviation(token, sponsor) {
        return true;
    }
    let token_n = normalize(token);
    let sponsor_n = normalize(sponsor);
    if token_n.is_empty() || sponsor_n.is_empty() {
        return false;
    }
    if token_n.contains(&sponsor_n) || sponsor_n.contains(&token_n) {
        return true;
    }
    if token_n.len() >= 4 && sponsor_n.len() >= 4 {
        return strsim::levenshtein(&token_n, &sponsor_n) <= 2;
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;

    fn motorsport() -> SportCategoryConfig {
        SportCategoryConfig::motorsport()
    }

    fn participant(numero: &str, driver: &str, team: &str) -> Participant {
        Participant {
            numero: numero.into(),
            nome_pilota: Some(driver.into()),
            squadra: Some(team.into()),
            ..Default::default()
        }
    }

    #[test]
    fn test_race_number_exact_match_scores_weight() {
        let category = motorsport();
        let recognition = RecognitionResult {
            race_number: Some("12".into()),
            confidence: 0.9,
            ..Default::default()
        };
        let p = participant("12", "Rossi", "Alpha");
        let candidate = score_candidate(
            &recognition,
            &p,
            &category,
            &TemporalContext::default(),
            &TemporalMatchCache::new(),
        );
        assert!(candidate.evidence.iter().any(|e| e.kind == EvidenceKind::RaceNumber));
        assert_eq!(candidate.raw_score, category.weights.race_number);
    }

    #[test]
    fn test_driver_name_case_insensitive_substring() {
        let category = motorsport();
        let recognition = RecognitionResult {
            drivers: vec!["A. Lambert".into()],
            confidence: 0.9,
            ..Default::default()
        };
        let p = participant("41", "alex lambert", "Beta");
        let candidate = score_candidate(
            &recognition,
            &p,
            &category,
            &TemporalContext::default(),
            &TemporalMatchCache::new(),
        );
        assert!(candidate.evidence.iter().any(|e| e.kind == EvidenceKind::DriverName));
    }

    #[test]
    fn test_sponsor_fuzzy_match_via_abbreviation() {
        let category = motorsport();
        let recognition = RecognitionResult {
            other_text: vec!["RB".into()],
            confidence: 0.9,
            ..Default::default()
        };
        let mut p = participant("41", "Alex Lambert", "Beta");
        p.sponsors = Some("Red Bull".into());
        let candidate = score_candidate(
            &recognition,
            &p,
            &category,
            &TemporalContext::default(),
            &TemporalMatchCache::new(),
        );
        assert!(candidate.evidence.iter().any(|e| e.kind == EvidenceKind::Sponsor));
    }

    #[test]
    fn test_clear_winner_selected_without_override() {
        let category = motorsport();
        let candidates = vec![
            MatchCandidate {
                participant: participant("12", "Rossi", "Alpha"),
                evidence: vec![],
                raw_score: 50.0,
                confidence: 0.9,
                temporal_bonus: 0.0,
                cluster_size: 0,
                is_burst_mode_candidate: false,
                reasoning: vec![],
            },
            MatchCandidate {
                participant: participant("7", "Bianchi", "Beta"),
                evidence: vec![],
                raw_score: 20.0,
                confidence: 0.3,
                temporal_bonus: 0.0,
                cluster_size: 0,
                is_burst_mode_candidate: false,
                reasoning: vec![],
            },
        ];
        let result = select_best(candidates, &category);
        assert!(!result.multiple_high_scores);
        assert!(!result.resolved_by_override);
        assert_eq!(result.best.unwrap().participant.numero, "12");
    }

    #[test]
    fn test_close_scores_with_strong_evidence_resolved_by_override() {
        let category = motorsport();
        let candidates = vec![
            MatchCandidate {
                participant: participant("41", "Alex Lambert", "Beta"),
                evidence: vec![
                    Evidence {
                        kind: EvidenceKind::DriverName,
                        matched_value: "Alex Lambert".into(),
                        score: category.weights.driver_name,
                    },
                    Evidence {
                        kind: EvidenceKind::Sponsor,
                        matched_value: "Red Bull".into(),
                        score: category.weights.sponsor,
                    },
                ],
                raw_score: category.weights.driver_name + category.weights.sponsor,
                confidence: 0.6,
                temporal_bonus: 0.0,
                cluster_size: 0,
                is_burst_mode_candidate: false,
                reasoning: vec![],
            },
            MatchCandidate {
                participant: participant("42", "Someone Else", "Gamma"),
                evidence: vec![],
                raw_score: category.weights.driver_name + category.weights.sponsor - 5.0,
                confidence: 0.55,
                temporal_bonus: 0.0,
                cluster_size: 0,
                is_burst_mode_candidate: false,
                reasoning: vec![],
            },
        ];
        let result = select_best(candidates, &category);
        assert!(result.multiple_high_scores);
        assert!(result.resolved_by_override);
        assert_eq!(result.best.unwrap().participant.numero, "41");
    }

    #[test]
    fn test_below_minimum_score_yields_no_candidates() {
        let category = motorsport();
        let recognition = RecognitionResult {
            race_number: Some("99".into()),
            confidence: 0.9,
            ..Default::default()
        };
        let roster = vec![participant("12", "Rossi", "Alpha")];
        let result = match_one_inner(
            &recognition,
            &roster,
            &category,
            &TemporalContext::default(),
            &TemporalMatchCache::new(),
        );
        assert!(result.best.is_none());
    }

    #[test]
    fn test_temporal_bonus_applied_when_neighbor_previously_matched() {
        let category = motorsport();
        let cache = TemporalMatchCache::new();
        cache.record(PathBuf::from("neighbor.jpg"), "12".into(), 0.9);
        let recognition = RecognitionResult {
            confidence: 0.9,
            ..Default::default()
        };
        let p = participant("12", "Rossi", "Alpha");
        let context = TemporalContext {
            neighbor_paths: vec![PathBuf::from("neighbor.jpg")],
            cluster_size: 3,
        };
        let candidate = score_candidate(&recognition, &p, &category, &context, &cache);
        assert!(candidate.temporal_bonus > 0.0);
        assert!(candidate.is_burst_mode_candidate);
    }

    #[test]
    fn test_filter_recognitions_drops_below_min_confidence() {
        let category = motorsport();
        let recognitions = vec![RecognitionResult {
            confidence: 0.1,
            ..Default::default()
        }];
        assert!(filter_recognitions(&recognitions, &category).is_empty());
    }

    #[test]
    fn test_filter_recognitions_individual_competition_keeps_one() {
        let mut category = SportCategoryConfig::running();
        category.recognition.max_results = 5;
        let recognitions = vec![
            RecognitionResult {
                confidence: 0.9,
                ..Default::default()
            },
            RecognitionResult {
                confidence: 0.8,
                ..Default::default()
            },
        ];
        let kept = filter_recognitions(&recognitions, &category);
        assert_eq!(kept.len(), 1);
    }

    #[test]
    fn test_fallback_by_race_number_ignores_other_evidence() {
        let recognition = RecognitionResult {
            race_number: Some("41".into()),
            ..Default::default()
        };
        let roster = vec![participant("41", "Someone", "Team")];
        let result = fallback_by_race_number(&recognition, &roster);
        assert_eq!(result.best.unwrap().participant.numero, "41");
    }
}
