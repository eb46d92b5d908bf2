//! facegated: face capture gating daemon.
//!
//! Reads detector frames from stdin (one JSON object per line), runs the
//! gating engine at ~15 Hz, and drives burst capture + measurement upload
//! against the configured backend.

mod config;
mod feed;
mod measure;
mod session;

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use sha2::{Digest, Sha256};

use facegate_core::{CalibrationKey, CaptureEngine, EngineConfig};
use facegate_store::SqliteCalibrationStore;

use crate::config::Config;
use crate::measure::{BurstUploader, DirFrameSource, MeasureClient};
use crate::session::Session;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "facegated=info,facegate_core=info,facegate_store=info".into()),
        )
        .init();

    let cfg = Config::from_env();
    tracing::info!(
        db = %cfg.db_path.display(),
        backend = %cfg.backend_url,
        device = %cfg.device_id,
        video_height = cfg.video_height,
        "starting facegated"
    );

    let store = SqliteCalibrationStore::open(&cfg.db_path)
        .with_context(|| format!("opening calibration store at {}", cfg.db_path.display()))?;

    let key = CalibrationKey {
        device_id: cfg.device_id.clone(),
        video_height: cfg.video_height,
        identity_hash: identity_hash(&cfg.identity),
    };

    let engine = CaptureEngine::new(EngineConfig::default(), key, Box::new(store));

    let uploader = BurstUploader::new(
        MeasureClient::new(cfg.backend_url.clone()),
        DirFrameSource::new(cfg.frame_dir.clone()),
    );

    let feed = feed::LandmarkFeed::from_stdin();
    let session = Session::new(engine, Arc::new(uploader), Duration::from_millis(cfg.tick_ms));
    session.run(feed).await
}

/// The identity string never reaches the database in the clear.
fn identity_hash(identity: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(identity.as_bytes());
    format!("{:x}", hasher.finalize())
}
