//! Batch recognition and tagging pipeline for event photography: discovery,
//! per-image preparation and upload, recognition-endpoint integration,
//! evidence-weighted participant matching with temporal bonuses, and
//! metadata writeback / folder organization.
//!
//! The UI shell, persistent project catalog, authentication, and the
//! recognition endpoint's own implementation are out of scope here — each is
//! a trait boundary (`analysis::RecognitionClient`, `analysis::ObjectStoreClient`,
//! `analysis::BillingClient`, `events::EventSink`) with an HTTP or channel
//! adapter plus a fake test double.

pub mod analysis;
pub mod cleanup;
pub mod config;
pub mod discovery;
pub mod error;
pub mod events;
pub mod imaging;
pub mod matcher;
pub mod metadata;
pub mod model;
pub mod organizer;
pub mod orchestrator;
pub mod roster;
pub mod temporal;
pub mod worker;

/// Initializes the crate's tracing subscriber from `RUST_LOG` (or `info` if
/// unset), matching the teacher's `tracing_subscriber::fmt::init()` call in
/// its own application entry point. Embedders that already configure a
/// subscriber should skip this and just depend on the library modules above.
pub fn init_tracing() {
    use tracing_subscriber::EnvFilter;
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();
}
