//! Per-image worker (`spec.md` §4.2): composes stages 2–7 behind the
//! `Queued → Preparing → Uploading → Analyzing → Matching → Writing →
//! Organizing → Done | Failed | Cancelled` state machine, with a
//! cancellation check between every stage.

use crate::analysis::{self, AnalysisRequest, BillingClient, ObjectStoreClient, RecognitionClient};
use crate::cleanup::CleanupManager;
use crate::config::{ProcessorConfig, SportCategoryConfig};
use crate::error::{Stage, StageError, StageErrorKind};
use crate::matcher::{self, TemporalContext, TemporalMatchCache};
use crate::matcher::cache::MatchCache;
use crate::metadata;
use crate::model::{ImageFile, Participant, WorkerResult, WorkerTimings};
use crate::organizer;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

pub struct WorkerContext<'a> {
    pub config: &'a ProcessorConfig,
    pub category: &'a SportCategoryConfig,
    pub roster: &'a [Participant],
    pub roster_supplied: bool,
    pub cleanup: &'a CleanupManager,
    pub recognition_client: &'a dyn RecognitionClient,
    pub object_store: &'a dyn ObjectStoreClient,
    pub billing: &'a dyn BillingClient,
    pub match_cache: Option<&'a MatchCache>,
    pub temporal_cache: &'a TemporalMatchCache,
    pub temporal_context: TemporalContext,
    pub cancelled: Arc<AtomicBool>,
    pub execution_id: Option<String>,
}

/// Runs one file through the full pipeline, never panicking the caller:
/// every stage error is converted into a `WorkerResult{success:false, ..}`.
pub fn run(file: &ImageFile, ctx: &WorkerContext) -> WorkerResult {
    match run_inner(file, ctx) {
        Ok(result) => result,
        Err(e) => {
            tracing::warn!("worker failed for {:?}: {}", file.original_path, e);
            WorkerResult {
                file_id: file.id,
                success: false,
                analysis: vec![],
                matches: vec![],
                timings: WorkerTimings::default(),
                error: Some(e.to_string()),
                failed_stage: Some(e.stage),
            }
        }
    }
}

fn check_cancelled(ctx: &WorkerContext, stage: Stage) -> Result<(), StageError> {
    if ctx.cancelled.load(Ordering::SeqCst) {
        return Err(StageError::cancelled(stage));
    }
    Ok(())
}

fn run_inner(file: &ImageFile, ctx: &WorkerContext) -> Result<WorkerResult, StageError> {
    let mut timings = WorkerTimings::default();

    check_cancelled(ctx, Stage::Preparing)?;
    let prepare_start = Instant::now();
    let prepared = crate::imaging::prepare_upload_image(file, ctx.config, ctx.cleanup)?;
    timings.prepare_ms = prepare_start.elapsed().as_millis() as u64;

    check_cancelled(ctx, Stage::Uploading)?;
    let upload_start = Instant::now();
    let compressed_bytes = std::fs::read(&prepared.upload_jpeg_path)
        .map_err(|e| StageError::new(Stage::Uploading, StageErrorKind::Upload(e.to_string())))?;
    let storage_key = analysis::generate_storage_key(epoch_millis(), prepared.mime);
    let _public_url = ctx
        .object_store
        .upload(&storage_key, prepared.mime, &compressed_bytes)
        .map_err(|e| StageError::new(Stage::Uploading, StageErrorKind::Upload(e.to_string())))?;
    timings.upload_ms = upload_start.elapsed().as_millis() as u64;

    check_cancelled(ctx, Stage::Analyzing)?;
    let analyze_start = Instant::now();
    let request = AnalysisRequest {
        storage_key,
        original_filename: file.filename.clone(),
        mime_type: prepared.mime.to_string(),
        size_bytes: prepared.byte_len,
        model_name: ctx.category.name.clone(),
        category: ctx.category.name.clone(),
        user_id: None,
        execution_id: ctx.execution_id.clone(),
        participant_preset: None,
    };
    let response = ctx
        .recognition_client
        .analyze(&request, ctx.category.protocol_version)
        .map_err(|e| StageError::new(Stage::Analyzing, StageErrorKind::Analysis {
            endpoint: "analyze".to_string(),
            version: format!("{:?}", ctx.category.protocol_version),
            message: e.to_string(),
        }))?;
    if let Err(e) = ctx.billing.consume_token(ctx.execution_id.as_deref()) {
        tracing::warn!("billing token consumption failed for {:?}: {}", file.original_path, e);
    }
    timings.analyze_ms = analyze_start.elapsed().as_millis() as u64;

    check_cancelled(ctx, Stage::Matching)?;
    let match_start = Instant::now();
    let filtered = matcher::filter_recognitions(&response.analysis, ctx.category);
    let matches: Vec<_> = filtered
        .iter()
        .enumerate()
        .map(|(i, recognition)| {
            let cache_key = ctx
                .match_cache
                .map(|_| MatchCache::key(recognition, ctx.roster, &ctx.category.name, i));
            matcher::match_one(
                recognition,
                ctx.roster,
                ctx.category,
                &ctx.temporal_context,
                ctx.temporal_cache,
                ctx.match_cache,
                cache_key,
            )
        })
        .collect();

    for m in &matches {
        if let Some(best) = &m.best {
            if best.confidence >= 0.6 {
                ctx.temporal_cache.record(
                    file.original_path.clone(),
                    best.participant.numero.clone(),
                    best.confidence,
                );
            }
        }
    }
    timings.match_ms = match_start.elapsed().as_millis() as u64;

    check_cancelled(ctx, Stage::Writing)?;
    let write_start = Instant::now();
    if let Some(composed) = metadata::compose(&matches, &response.analysis, ctx.category, ctx.roster_supplied) {
        metadata::write(
            &file.original_path,
            file.is_raw,
            &composed,
            ctx.config.keywords_mode.keywords,
            ctx.config.keywords_mode.description,
        )?;
    }
    timings.write_ms = write_start.elapsed().as_millis() as u64;

    if ctx.config.organizer.enabled {
        check_cancelled(ctx, Stage::Organizing)?;
        let organize_start = Instant::now();
        let placements = organizer::compute_placements(&matches, &ctx.config.organizer, ctx.roster_supplied);
        let destination_root = ctx
            .config
            .organizer
            .destination_path
            .clone()
            .unwrap_or_else(|| file.original_path.parent().unwrap_or(std::path::Path::new(".")).join("Organized_Photos"));
        organizer::place_file(&file.original_path, &destination_root, &placements, &ctx.config.organizer)?;
        timings.organize_ms = organize_start.elapsed().as_millis() as u64;
    }

    ctx.cleanup.cleanup_transient();

    Ok(WorkerResult {
        file_id: file.id,
        success: true,
        analysis: response.analysis,
        matches,
        timings,
        error: None,
        failed_stage: None,
    })
}

fn epoch_millis() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::{FakeObjectStoreClient, FakeRecognitionClient, NullBillingClient};
    use crate::config::SportCategoryConfig;
    use crate::model::RecognitionResult;

    fn sample_file(dir: &std::path::Path) -> ImageFile {
        let path = dir.join("a.jpg");
        let img = image::DynamicImage::new_rgb8(200, 150);
        img.save(&path).unwrap();
        ImageFile {
            id: 1,
            original_path: path,
            filename: "a.jpg".into(),
            is_raw: false,
            extension: "jpg".into(),
        }
    }

    #[test]
    fn test_worker_succeeds_end_to_end_with_fakes() {
        let tmp = tempfile::tempdir().unwrap();
        let file = sample_file(tmp.path());
        let config = ProcessorConfig::default();
        let category = SportCategoryConfig::motorsport();
        let roster = vec![Participant {
            numero: "41".into(),
            ..Default::default()
        }];
        let cleanup = CleanupManager::new(tmp.path().join("tmp"));
        let recognition_client = FakeRecognitionClient::succeeding(vec![RecognitionResult {
            race_number: Some("41".into()),
            confidence: 0.9,
            ..Default::default()
        }]);
        let object_store = FakeObjectStoreClient { fail: false };
        let billing = NullBillingClient;
        let match_cache = MatchCache::new(64);
        let temporal_cache = TemporalMatchCache::new();

        let ctx = WorkerContext {
            config: &config,
            category: &category,
            roster: &roster,
            roster_supplied: true,
            cleanup: &cleanup,
            recognition_client: &recognition_client,
            object_store: &object_store,
            billing: &billing,
            match_cache: Some(&match_cache),
            temporal_cache: &temporal_cache,
            temporal_context: TemporalContext::default(),
            cancelled: Arc::new(AtomicBool::new(false)),
            execution_id: None,
        };

        let result = run(&file, &ctx);
        assert!(result.success);
        assert_eq!(result.matches.len(), 1);
        assert_eq!(result.matches[0].best.as_ref().unwrap().participant.numero, "41");
    }

    #[test]
    fn test_worker_reports_cancellation_without_writing() {
        let tmp = tempfile::tempdir().unwrap();
        let file = sample_file(tmp.path());
        let config = ProcessorConfig::default();
        let category = SportCategoryConfig::motorsport();
        let roster = vec![];
        let cleanup = CleanupManager::new(tmp.path().join("tmp"));
        let recognition_client = FakeRecognitionClient::succeeding(vec![]);
        let object_store = FakeObjectStoreClient { fail: false };
        let billing = NullBillingClient;
        let temporal_cache = TemporalMatchCache::new();

        let ctx = WorkerContext {
            config: &config,
            category: &category,
            roster: &roster,
            roster_supplied: false,
            cleanup: &cleanup,
            recognition_client: &recognition_client,
            object_store: &object_store,
            billing: &billing,
            match_cache: None,
            temporal_cache: &temporal_cache,
            temporal_context: TemporalContext::default(),
            cancelled: Arc::new(AtomicBool::new(true)),
            execution_id: None,
        };

        let result = run(&file, &ctx);
        assert!(!result.success);
        assert_eq!(result.failed_stage, Some(Stage::Preparing));
    }

    #[test]
    fn test_worker_surfaces_upload_failure_as_failed_stage() {
        let tmp = tempfile::tempdir().unwrap();
        let file = sample_file(tmp.path());
        let config = ProcessorConfig::default();
        let category = SportCategoryConfig::motorsport();
        let roster = vec![];
        let cleanup = CleanupManager::new(tmp.path().join("tmp"));
        let recognition_client = FakeRecognitionClient::succeeding(vec![]);
        let object_store = FakeObjectStoreClient { fail: true };
        let billing = NullBillingClient;
        let temporal_cache = TemporalMatchCache::new();

        let ctx = WorkerContext {
            config: &config,
            category: &category,
            roster: &roster,
            roster_supplied: false,
            cleanup: &cleanup,
            recognition_client: &recognition_client,
            object_store: &object_store,
            billing: &billing,
            match_cache: None,
            temporal_cache: &temporal_cache,
            temporal_context: TemporalContext::default(),
            cancelled: Arc::new(AtomicBool::new(false)),
            execution_id: None,
        };

        let result = run(&file, &ctx);
        assert!(!result.success);
        assert_eq!(result.failed_stage, Some(Stage::Uploading));
    }
}
