//! Batch Orchestrator (`spec.md` §4.1) — drives a whole `processBatch` call:
//! discovery has already happened by the time `process_batch` is called; this
//! module owns temporal pre-pass, chunking, admission-controlled dispatch of
//! the per-image worker, and the batch-lifecycle event sequence.

mod memory;

pub use memory::MemoryMonitor;

use crate::analysis::{BillingClient, ObjectStoreClient, RecognitionClient};
use crate::cleanup::CleanupManager;
use crate::config::{ProcessorConfig, SportCategoryConfig};
use crate::discovery::timestamps::extract_timestamp;
use crate::events::{
    BatchCancelledPayload, BatchCompletePayload, ChunkInfoPayload, EventSink, ImageProcessedPayload,
    RecognitionPhaseStartedPayload, TemporalAnalysisCompletePayload, TemporalAnalysisProgressPayload,
};
use crate::matcher::cache::MatchCache;
use crate::matcher::{TemporalContext, TemporalMatchCache};
use crate::model::{BatchStats, ImageFile, Participant, WorkerResult};
use crate::temporal::cluster::{build_clusters, TemporalIndex};
use crate::worker::{self, WorkerContext};
use chrono::Duration as ChronoDuration;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// Batches larger than this are split into chunks, per `spec.md` §4.1.
const CHUNK_THRESHOLD: usize = 1500;
const CHUNK_SIZE: usize = 500;
const CHUNK_PAUSE: Duration = Duration::from_secs(3);

const MIN_WORKERS: usize = 3;
const MAX_WORKERS: usize = 16;

/// A "ghost vehicle" is a recognition result the analysis endpoint returned
/// with neither a race number nor any driver name — a detected-but-blank
/// vehicle, tracked so the UI can surface how much of a batch the recognizer
/// saw but couldn't describe (see DESIGN.md).
fn is_ghost_vehicle(recognition: &crate::model::RecognitionResult) -> bool {
    let no_number = recognition.race_number.as_deref().map(|n| n.trim().is_empty()).unwrap_or(true);
    no_number && recognition.drivers.is_empty()
}

/// Everything the orchestrator needs beyond the file list, bundled so
/// `process_batch`'s signature stays manageable.
pub struct BatchContext<'a> {
    pub config: &'a ProcessorConfig,
    pub category: &'a SportCategoryConfig,
    pub roster: &'a [Participant],
    pub roster_supplied: bool,
    pub cleanup: &'a CleanupManager,
    pub recognition_client: &'a dyn RecognitionClient,
    pub object_store: &'a dyn ObjectStoreClient,
    pub billing: &'a dyn BillingClient,
    pub events: &'a dyn EventSink,
    pub cancelled: Arc<AtomicBool>,
}

pub struct BatchOutcome {
    pub results: Vec<WorkerResult>,
    pub stats: BatchStats,
    pub cancelled: bool,
}

/// `floor(cpuCount × 0.85)` clamped to `[3, 16]`, further capped by
/// `floor(totalGB × 0.4 × 6.67)`, per `spec.md` §4.1.
fn resolve_worker_count(configured: Option<usize>, cpu_count: usize, total_mem_bytes: u64) -> usize {
    if let Some(n) = configured {
        return n.max(1);
    }
    let by_cpu = ((cpu_count as f64) * 0.85).floor() as usize;
    let by_cpu = by_cpu.clamp(MIN_WORKERS, MAX_WORKERS);
    let total_gb = total_mem_bytes as f64 / (1024.0 * 1024.0 * 1024.0);
    let by_mem = (total_gb * 0.4 * 6.67).floor() as usize;
    if by_mem == 0 {
        by_cpu
    } else {
        by_cpu.min(by_mem).max(1)
    }
}

/// Entry point for one batch, per `spec.md` §4.1's `processBatch`. `files`
/// should already exclude `._`-prefixed entries (the discovery stage's job);
/// this function re-filters defensively since the guarantee is stated at the
/// orchestrator's own boundary.
pub fn process_batch(files: Vec<ImageFile>, ctx: &BatchContext) -> BatchOutcome {
    let start = Instant::now();
    let files: Vec<ImageFile> = files.into_iter().filter(|f| !f.filename.starts_with("._")).collect();
    let total = files.len();

    let mut stats = BatchStats {
        total,
        ..Default::default()
    };

    if total == 0 {
        ctx.events.batch_complete(BatchCompletePayload {
            total: 0,
            successful: 0,
            errors: 0,
            ghost_vehicles: 0,
            elapsed_ms: start.elapsed().as_millis() as u64,
        });
        return BatchOutcome {
            results: vec![],
            stats,
            cancelled: false,
        };
    }

    let (ordered_files, temporal_contexts) = temporal_prepass(files, ctx);

    ctx.events.recognition_phase_started(RecognitionPhaseStartedPayload {
        total,
        execution_id: ctx.config.execution_id.clone(),
    });

    let monitor = MemoryMonitor::new();
    let worker_count = resolve_worker_count(
        ctx.config.max_concurrent_workers,
        monitor.cpu_count(),
        monitor.total_memory_bytes(),
    );

    let match_cache = MatchCache::new(2048);
    let temporal_cache = TemporalMatchCache::new();

    let chunks: Vec<Vec<usize>> = if total > CHUNK_THRESHOLD {
        (0..total).collect::<Vec<_>>().chunks(CHUNK_SIZE).map(|c| c.to_vec()).collect()
    } else {
        vec![(0..total).collect()]
    };
    let total_chunks = chunks.len();

    let mut results: Vec<Option<WorkerResult>> = (0..total).map(|_| None).collect();
    let mut processed = 0usize;

    'chunks: for (chunk_idx, chunk_indices) in chunks.into_iter().enumerate() {
        let queue: Mutex<VecDeque<usize>> = Mutex::new(chunk_indices.into_iter().collect());
        let chunk_results: Mutex<Vec<(usize, WorkerResult)>> = Mutex::new(Vec::new());

        std::thread::scope(|scope| {
            for _ in 0..worker_count {
                scope.spawn(|| {
                    loop {
                        if ctx.cancelled.load(Ordering::SeqCst) {
                            return;
                        }
                        monitor.wait_until_clear(&ctx.cancelled);
                        let next = queue.lock().unwrap().pop_front();
                        let Some(idx) = next else { return };

                        let file = &ordered_files[idx];
                        let worker_ctx = WorkerContext {
                            config: ctx.config,
                            category: ctx.category,
                            roster: ctx.roster,
                            roster_supplied: ctx.roster_supplied,
                            cleanup: ctx.cleanup,
                            recognition_client: ctx.recognition_client,
                            object_store: ctx.object_store,
                            billing: ctx.billing,
                            match_cache: Some(&match_cache),
                            temporal_cache: &temporal_cache,
                            temporal_context: temporal_contexts[idx].clone(),
                            cancelled: Arc::clone(&ctx.cancelled),
                            execution_id: ctx.config.execution_id.clone(),
                        };

                        let result = worker::run(file, &worker_ctx);
                        chunk_results.lock().unwrap().push((idx, result));
                    }
                });
            }
        });

        let finished = chunk_results.into_inner().unwrap();
        for (idx, result) in finished {
            processed += 1;
            if !result.success {
                stats.errors += 1;
            } else {
                stats.successful += 1;
            }
            stats.ghost_vehicles += result.analysis.iter().filter(|r| is_ghost_vehicle(r)).count();

            ctx.events.image_processed(ImageProcessedPayload {
                file_id: result.file_id,
                processed,
                total,
                result: result.clone(),
            });
            results[idx] = Some(result);
        }

        stats.memory_samples.push(monitor.sample(start.elapsed()));

        ctx.events.chunk_info(ChunkInfoPayload {
            processed,
            total,
            current_chunk: chunk_idx + 1,
            total_chunks,
        });

        if ctx.cancelled.load(Ordering::SeqCst) {
            break 'chunks;
        }
        if chunk_idx + 1 < total_chunks {
            std::thread::sleep(CHUNK_PAUSE);
        }
    }

    let cancelled = ctx.cancelled.load(Ordering::SeqCst);
    let final_results: Vec<WorkerResult> = results.into_iter().flatten().collect();
    stats.processed = final_results.len();
    stats.start_time_ms = 0;

    if cancelled {
        ctx.events.batch_cancelled(BatchCancelledPayload {
            processed: final_results.len(),
            total,
        });
    } else {
        ctx.events.batch_complete(BatchCompletePayload {
            total,
            successful: stats.successful,
            errors: stats.errors,
            ghost_vehicles: stats.ghost_vehicles,
            elapsed_ms: start.elapsed().as_millis() as u64,
        });
    }

    BatchOutcome {
        results: final_results,
        stats,
        cancelled,
    }
}

/// Runs temporal clustering (`spec.md` §4.3) over the whole batch, reorders
/// `files` by ascending timestamp (nulls last, original order preserved
/// among ties/nulls — the alphabetical discovery order is *not* kept), and
/// builds each file's `TemporalContext`.
fn temporal_prepass(files: Vec<ImageFile>, ctx: &BatchContext) -> (Vec<ImageFile>, Vec<TemporalContext>) {
    let total = files.len();
    ctx.events.temporal_analysis_started(total);

    let formats: Vec<crate::model::PhotoFormat> = files
        .iter()
        .map(|f| crate::model::PhotoFormat::from_extension(&f.extension).unwrap_or(crate::model::PhotoFormat::Jpeg))
        .collect();

    let mut timestamps = Vec::with_capacity(total);
    for (i, file) in files.iter().enumerate() {
        timestamps.push(extract_timestamp(&file.original_path, formats[i]));
        if (i + 1) % 50 == 0 || i + 1 == total {
            ctx.events.temporal_analysis_progress(TemporalAnalysisProgressPayload {
                analyzed: i + 1,
                total,
                clusters_found: 0,
            });
        }
        if ctx.cancelled.load(Ordering::SeqCst) {
            break;
        }
    }
    // Defensive: a cancelled scan leaves fewer timestamps than files; pad
    // with "no timestamp" entries so every file still gets an index.
    while timestamps.len() < total {
        let idx = timestamps.len();
        timestamps.push(crate::model::ImageTimestamp {
            path: files[idx].original_path.clone(),
            timestamp: None,
            has_subsecond_precision: false,
            source: crate::model::TimestampSource::Filesystem,
        });
    }

    let clusters = build_clusters(timestamps.clone(), &ctx.category.name, &ctx.category.temporal);
    let burst_clusters = clusters.iter().filter(|c| c.is_burst).count();
    ctx.events.temporal_analysis_complete(TemporalAnalysisCompletePayload {
        clusters: clusters.len(),
        burst_clusters,
    });

    let index = TemporalIndex::build(&clusters);
    let window = ChronoDuration::seconds(ctx.category.temporal.window_secs);

    // Pair files with their timestamps, then sort by ascending timestamp
    // (nulls sorted last), per `spec.md` §4.1.
    let mut paired: Vec<(ImageFile, crate::model::ImageTimestamp)> = files.into_iter().zip(timestamps).collect();
    paired.sort_by(|a, b| match (a.1.timestamp, b.1.timestamp) {
        (Some(x), Some(y)) => x.cmp(&y),
        (Some(_), None) => std::cmp::Ordering::Less,
        (None, Some(_)) => std::cmp::Ordering::Greater,
        (None, None) => std::cmp::Ordering::Equal,
    });

    let mut ordered_files = Vec::with_capacity(paired.len());
    let mut contexts = Vec::with_capacity(paired.len());
    for (file, ts) in paired {
        let context = match ts.timestamp {
            Some(t) => {
                let neighbor_indices = index.neighbor_clusters(t, window);
                let neighbor_paths: Vec<std::path::PathBuf> = neighbor_indices
                    .iter()
                    .flat_map(|&i| clusters[i].members.iter().map(|m| m.path.clone()))
                    .filter(|p| *p != file.original_path)
                    .collect();
                let cluster_size = neighbor_indices.iter().map(|&i| clusters[i].members.len()).max().unwrap_or(0);
                TemporalContext {
                    neighbor_paths,
                    cluster_size,
                }
            }
            None => TemporalContext::default(),
        };
        ordered_files.push(file);
        contexts.push(context);
    }

    (ordered_files, contexts)
}
