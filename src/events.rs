use crate::error::Stage;
use crate::model::WorkerResult;
use std::sync::mpsc::Sender;

/// Progress payload for the temporal-analysis pre-pass, per `spec.md` §6.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct TemporalAnalysisProgressPayload {
    pub analyzed: usize,
    pub total: usize,
    pub clusters_found: usize,
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct TemporalAnalysisCompletePayload {
    pub clusters: usize,
    pub burst_clusters: usize,
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct RecognitionPhaseStartedPayload {
    pub total: usize,
    pub execution_id: Option<String>,
}

/// Emitted once per chunk on batches large enough to be split (`spec.md`
/// §4.1/§6).
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct ChunkInfoPayload {
    pub processed: usize,
    pub total: usize,
    pub current_chunk: usize,
    pub total_chunks: usize,
}

/// Per-file completion payload, matching the teacher's
/// `ThumbnailReadyPayload` convention of a small, stably-serialized struct.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct ImageProcessedPayload {
    pub file_id: u64,
    pub processed: usize,
    pub total: usize,
    pub result: WorkerResult,
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct ImageUploadedPayload {
    pub file_id: u64,
    pub storage_key: String,
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct BatchCompletePayload {
    pub total: usize,
    pub successful: usize,
    pub errors: usize,
    pub ghost_vehicles: usize,
    pub elapsed_ms: u64,
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct BatchCancelledPayload {
    pub processed: usize,
    pub total: usize,
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct ProcessingErrorPayload {
    pub file_id: Option<u64>,
    pub stage: Option<Stage>,
    pub message: String,
}

/// One event topic per `spec.md` §6. Implementors decide how (or whether) to
/// deliver each; a dropped receiver must never cause the pipeline to fail.
pub trait EventSink: Send + Sync {
    fn temporal_analysis_started(&self, total: usize) {
        let _ = total;
    }
    fn temporal_analysis_progress(&self, _payload: TemporalAnalysisProgressPayload) {}
    fn temporal_analysis_complete(&self, _payload: TemporalAnalysisCompletePayload) {}
    fn recognition_phase_started(&self, _payload: RecognitionPhaseStartedPayload) {}
    fn chunk_info(&self, _payload: ChunkInfoPayload) {}
    fn image_processed(&self, _payload: ImageProcessedPayload) {}
    fn image_uploaded(&self, _payload: ImageUploadedPayload) {}
    fn batch_complete(&self, _payload: BatchCompletePayload) {}
    fn batch_cancelled(&self, _payload: BatchCancelledPayload) {}
    fn processing_error(&self, _payload: ProcessingErrorPayload) {}
}

/// Discards every event. Used where a caller has no interest in progress
/// reporting (e.g. library-internal tests).
pub struct NullEventSink;

impl EventSink for NullEventSink {}

/// One enum of all possible events, used by `ChannelEventSink` so a single
/// `mpsc::Receiver` can observe the whole batch lifecycle in order.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(tag = "topic", content = "payload")]
pub enum Event {
    TemporalAnalysisStarted { total: usize },
    TemporalAnalysisProgress(TemporalAnalysisProgressPayload),
    TemporalAnalysisComplete(TemporalAnalysisCompletePayload),
    RecognitionPhaseStarted(RecognitionPhaseStartedPayload),
    ChunkInfo(ChunkInfoPayload),
    ImageProcessed(ImageProcessedPayload),
    ImageUploaded(ImageUploadedPayload),
    BatchComplete(BatchCompletePayload),
    BatchCancelled(BatchCancelledPayload),
    ProcessingError(ProcessingErrorPayload),
}

/// Sends every event over an `mpsc` channel. A send failure (receiver
/// dropped) is swallowed, matching the teacher's tolerant `log_error`
/// pattern for non-critical side channels.
pub struct ChannelEventSink {
    sender: Sender<Event>,
}

impl ChannelEventSink {
    pub fn new(sender: Sender<Event>) -> Self {
        Self { sender }
    }
}

impl EventSink for ChannelEventSink {
    fn temporal_analysis_started(&self, total: usize) {
        let _ = self.sender.send(Event::TemporalAnalysisStarted { total });
    }

    fn temporal_analysis_progress(&self, payload: TemporalAnalysisProgressPayload) {
        let _ = self.sender.send(Event::TemporalAnalysisProgress(payload));
    }

    fn temporal_analysis_complete(&self, payload: TemporalAnalysisCompletePayload) {
        let _ = self.sender.send(Event::TemporalAnalysisComplete(payload));
    }

    fn recognition_phase_started(&self, payload: RecognitionPhaseStartedPayload) {
        let _ = self.sender.send(Event::RecognitionPhaseStarted(payload));
    }

    fn chunk_info(&self, payload: ChunkInfoPayload) {
        let _ = self.sender.send(Event::ChunkInfo(payload));
    }

    fn image_processed(&self, payload: ImageProcessedPayload) {
        let _ = self.sender.send(Event::ImageProcessed(payload));
    }

    fn image_uploaded(&self, payload: ImageUploadedPayload) {
        let _ = self.sender.send(Event::ImageUploaded(payload));
    }

    fn batch_complete(&self, payload: BatchCompletePayload) {
        let _ = self.sender.send(Event::BatchComplete(payload));
    }

    fn batch_cancelled(&self, payload: BatchCancelledPayload) {
        let _ = self.sender.send(Event::BatchCancelled(payload));
    }

    fn processing_error(&self, payload: ProcessingErrorPayload) {
        let _ = self.sender.send(Event::ProcessingError(payload));
    }
}

/// Forwards every event to the frontend over a `tauri::AppHandle`, matching
/// the teacher's `thumbnail-ready` emission in `import::pipeline::run_pipeline`.
/// A send failure (no window, or the frontend hasn't attached a listener
/// yet) is swallowed the same way.
#[cfg(feature = "tauri")]
pub struct TauriEventSink {
    handle: tauri::AppHandle,
}

#[cfg(feature = "tauri")]
impl TauriEventSink {
    pub fn new(handle: tauri::AppHandle) -> Self {
        Self { handle }
    }

    fn emit<P: serde::Serialize + Clone>(&self, topic: &str, payload: P) {
        use tauri::Emitter;
        let _ = self.handle.emit(topic, payload);
    }
}

#[cfg(feature = "tauri")]
impl EventSink for TauriEventSink {
    fn temporal_analysis_started(&self, total: usize) {
        self.emit("temporal-analysis-started", total);
    }

    fn temporal_analysis_progress(&self, payload: TemporalAnalysisProgressPayload) {
        self.emit("temporal-analysis-progress", payload);
    }

    fn temporal_analysis_complete(&self, payload: TemporalAnalysisCompletePayload) {
        self.emit("temporal-analysis-complete", payload);
    }

    fn recognition_phase_started(&self, payload: RecognitionPhaseStartedPayload) {
        self.emit("recognition-phase-started", payload);
    }

    fn chunk_info(&self, payload: ChunkInfoPayload) {
        self.emit("chunk-info", payload);
    }

    fn image_processed(&self, payload: ImageProcessedPayload) {
        self.emit("image-processed", payload);
    }

    fn image_uploaded(&self, payload: ImageUploadedPayload) {
        self.emit("image-uploaded", payload);
    }

    fn batch_complete(&self, payload: BatchCompletePayload) {
        self.emit("batch-complete", payload);
    }

    fn batch_cancelled(&self, payload: BatchCancelledPayload) {
        self.emit("batch-cancelled", payload);
    }

    fn processing_error(&self, payload: ProcessingErrorPayload) {
        self.emit("processing-error", payload);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::WorkerTimings;
    use std::sync::mpsc::channel;

    #[test]
    fn test_channel_sink_delivers_batch_complete_in_order() {
        let (tx, rx) = channel();
        let sink = ChannelEventSink::new(tx);
        sink.temporal_analysis_started(10);
        sink.batch_complete(BatchCompletePayload {
            total: 10,
            successful: 9,
            errors: 1,
            ghost_vehicles: 0,
            elapsed_ms: 1234,
        });
        match rx.recv().unwrap() {
            Event::TemporalAnalysisStarted { total } => assert_eq!(total, 10),
            other => panic!("unexpected event: {other:?}"),
        }
        match rx.recv().unwrap() {
            Event::BatchComplete(p) => assert_eq!(p.successful, 9),
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn test_channel_sink_survives_dropped_receiver() {
        let (tx, rx) = channel();
        let sink = ChannelEventSink::new(tx);
        drop(rx);
        sink.image_processed(ImageProcessedPayload {
            file_id: 1,
            processed: 1,
            total: 1,
            result: WorkerResult {
                file_id: 1,
                success: true,
                analysis: vec![],
                matches: vec![],
                timings: WorkerTimings::default(),
                error: None,
                failed_stage: None,
            },
        });
    }

    #[test]
    fn test_null_sink_does_nothing_observable() {
        let sink = NullEventSink;
        sink.temporal_analysis_started(5);
        sink.batch_cancelled(BatchCancelledPayload {
            processed: 2,
            total: 5,
        });
    }

    #[test]
    fn test_image_processed_payload_serializes_stage_camel_case() {
        let payload = ProcessingErrorPayload {
            file_id: Some(3),
            stage: Some(Stage::Uploading),
            message: "timeout".into(),
        };
        let json = serde_json::to_string(&payload).unwrap();
        assert!(json.contains("\"stage\":\"uploading\""));
    }
}
