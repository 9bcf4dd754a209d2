//! Cross-module integration tests: discovery → orchestrator → worker, with
//! every out-of-scope collaborator behind its fake/null test double.

use paddocktag_lib::analysis::{FakeObjectStoreClient, FakeRecognitionClient, NullBillingClient};
use paddocktag_lib::cleanup::CleanupManager;
use paddocktag_lib::config::{ProcessorConfig, SportCategoryConfig};
use paddocktag_lib::discovery::scanner::scan_directory;
use paddocktag_lib::events::NullEventSink;
use paddocktag_lib::model::{Participant, RecognitionResult};
use paddocktag_lib::orchestrator::{process_batch, BatchContext};
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

fn write_sample_jpeg(path: &std::path::Path) {
    let img = image::DynamicImage::new_rgb8(320, 240);
    img.save(path).unwrap();
}

#[test]
fn full_batch_discovers_and_processes_every_file() {
    let tmp = tempfile::tempdir().unwrap();
    for name in ["a.jpg", "b.jpg", "c.jpg"] {
        write_sample_jpeg(&tmp.path().join(name));
    }
    // An AppleDouble sidecar should never reach the orchestrator.
    std::fs::write(tmp.path().join("._a.jpg"), b"").unwrap();

    let (files, scan_errors) = scan_directory(tmp.path());
    assert!(scan_errors.is_empty());
    assert_eq!(files.len(), 3);

    let mut config = ProcessorConfig::default();
    config.max_concurrent_workers = Some(2);
    let category = SportCategoryConfig::motorsport();
    let roster = vec![Participant {
        numero: "41".into(),
        nome_pilota: Some("Alex Lambert".into()),
        ..Default::default()
    }];
    let cleanup = CleanupManager::new(tmp.path().join("tmp"));
    let recognition_client = FakeRecognitionClient::succeeding(vec![RecognitionResult {
        race_number: Some("41".into()),
        confidence: 0.92,
        ..Default::default()
    }]);
    let object_store = FakeObjectStoreClient { fail: false };
    let billing = NullBillingClient;
    let events = NullEventSink;

    let ctx = BatchContext {
        config: &config,
        category: &category,
        roster: &roster,
        roster_supplied: true,
        cleanup: &cleanup,
        recognition_client: &recognition_client,
        object_store: &object_store,
        billing: &billing,
        events: &events,
        cancelled: Arc::new(AtomicBool::new(false)),
    };

    let outcome = process_batch(files, &ctx);

    assert_eq!(outcome.stats.total, 3);
    assert_eq!(outcome.stats.successful, 3);
    assert_eq!(outcome.stats.errors, 0);
    assert!(!outcome.cancelled);
    assert_eq!(outcome.results.len(), 3);
    for result in &outcome.results {
        assert!(result.success);
        let best = result.matches[0].best.as_ref().expect("a match should be found");
        assert_eq!(best.participant.numero, "41");
    }
}

#[test]
fn full_batch_with_no_roster_yields_ghost_vehicle_stats() {
    let tmp = tempfile::tempdir().unwrap();
    write_sample_jpeg(&tmp.path().join("a.jpg"));
    let (files, _) = scan_directory(tmp.path());

    let config = ProcessorConfig::default();
    let category = SportCategoryConfig::motorsport();
    let cleanup = CleanupManager::new(tmp.path().join("tmp"));
    // No race number, no driver: every recognition is a ghost vehicle.
    let recognition_client = FakeRecognitionClient::succeeding(vec![RecognitionResult {
        confidence: 0.9,
        ..Default::default()
    }]);
    let object_store = FakeObjectStoreClient { fail: false };
    let billing = NullBillingClient;
    let events = NullEventSink;

    let ctx = BatchContext {
        config: &config,
        category: &category,
        roster: &[],
        roster_supplied: false,
        cleanup: &cleanup,
        recognition_client: &recognition_client,
        object_store: &object_store,
        billing: &billing,
        events: &events,
        cancelled: Arc::new(AtomicBool::new(false)),
    };

    let outcome = process_batch(files, &ctx);
    assert_eq!(outcome.stats.successful, 1);
    assert_eq!(outcome.stats.ghost_vehicles, 1);
}

#[test]
fn full_batch_cancelled_midway_reports_cancelled_outcome() {
    let tmp = tempfile::tempdir().unwrap();
    for name in ["a.jpg", "b.jpg"] {
        write_sample_jpeg(&tmp.path().join(name));
    }
    let (files, _) = scan_directory(tmp.path());

    let config = ProcessorConfig::default();
    let category = SportCategoryConfig::motorsport();
    let cleanup = CleanupManager::new(tmp.path().join("tmp"));
    let recognition_client = FakeRecognitionClient::succeeding(vec![]);
    let object_store = FakeObjectStoreClient { fail: false };
    let billing = NullBillingClient;
    let events = NullEventSink;
    let cancelled = Arc::new(AtomicBool::new(true));

    let ctx = BatchContext {
        config: &config,
        category: &category,
        roster: &[],
        roster_supplied: false,
        cleanup: &cleanup,
        recognition_client: &recognition_client,
        object_store: &object_store,
        billing: &billing,
        events: &events,
        cancelled,
    };

    let outcome = process_batch(files, &ctx);
    assert!(outcome.cancelled);
    assert!(outcome.results.iter().all(|r| !r.success));
}
