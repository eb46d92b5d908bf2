//! The tick loop driving the engine.
//!
//! Runs at the configured interval (~15 Hz), polling the landmark feed and
//! feeding the engine with a monotonic millisecond clock anchored at session
//! start. A burst request coming out of a tick is dispatched to a blocking
//! worker so the loop never stalls; the `capturing` flag inside the engine
//! keeps further triggers suppressed until the worker's outcome is reported
//! back. Ctrl-C stops the loop; an in-flight burst runs to completion so its
//! cooldown bookkeeping still executes.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::mpsc;

use facegate_core::{BurstOutcome, CameraFrame, CaptureEngine, GatingSnapshot};

use crate::measure::BurstCapture;

/// A frame older than this is treated as "detector not ready" again.
const FRAME_STALE_MS: u64 = 500;

pub struct Session {
    engine: CaptureEngine,
    capture: Arc<dyn BurstCapture>,
    tick: Duration,
    started: Instant,
    last_frame: Option<(u64, CameraFrame)>,
    last_gating: Option<GatingSnapshot>,
}

impl Session {
    pub fn new(engine: CaptureEngine, capture: Arc<dyn BurstCapture>, tick: Duration) -> Self {
        Self {
            engine,
            capture,
            tick,
            started: Instant::now(),
            last_frame: None,
            last_gating: None,
        }
    }

    fn now_ms(&self) -> u64 {
        self.started.elapsed().as_millis() as u64
    }

    /// Drive the engine until ctrl-c.
    pub async fn run(mut self, feed: crate::feed::LandmarkFeed) -> anyhow::Result<()> {
        let mut interval = tokio::time::interval(self.tick);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        // Burst outcomes come back from the blocking worker on this channel.
        let (done_tx, mut done_rx) = mpsc::channel::<BurstOutcome>(1);

        tracing::info!(tick_ms = self.tick.as_millis() as u64, "session started");

        loop {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {
                    tracing::info!("shutdown requested");
                    break;
                }
                Some(outcome) = done_rx.recv() => {
                    let now = self.now_ms();
                    self.engine.complete_capture(now, outcome);
                }
                _ = interval.tick() => {
                    let now = self.now_ms();
                    self.on_tick(now, &feed, &done_tx);
                }
            }
        }

        // Let an outstanding burst finish so its cleanup runs.
        if self.engine.is_capturing() {
            tracing::info!("waiting for in-flight burst to complete");
            if let Some(outcome) = done_rx.recv().await {
                let now = self.now_ms();
                self.engine.complete_capture(now, outcome);
            }
        }

        tracing::info!("session ended");
        Ok(())
    }

    fn on_tick(
        &mut self,
        now: u64,
        feed: &crate::feed::LandmarkFeed,
        done_tx: &mpsc::Sender<BurstOutcome>,
    ) {
        if let Some(frame) = feed.poll() {
            self.last_frame = Some((now, frame));
        }

        let current = self
            .last_frame
            .as_ref()
            .filter(|(at, _)| now.saturating_sub(*at) <= FRAME_STALE_MS)
            .map(|(_, f)| f.clone());

        let snapshot = self.engine.tick(now, current.as_ref());

        // Log state transitions only; per-tick output would be noise at 15 Hz.
        let changed = self
            .last_gating
            .map_or(true, |prev| {
                prev.guidance != snapshot.gating.guidance
                    || prev.ring != snapshot.gating.ring
                    || prev.can_capture != snapshot.gating.can_capture
            });
        if changed {
            tracing::info!(
                ring = ?snapshot.gating.ring,
                distance = ?snapshot.gating.distance,
                can_capture = snapshot.gating.can_capture,
                guidance = snapshot.gating.guidance.message(),
                calibration = ?snapshot.calibration,
                "gating state changed"
            );
        }
        self.last_gating = Some(snapshot.gating);

        if let Some(request) = snapshot.capture {
            let capture = Arc::clone(&self.capture);
            let tx = done_tx.clone();
            tokio::task::spawn_blocking(move || {
                let outcome = capture.capture_burst(&request).unwrap_or_else(|e| {
                    tracing::error!(error = %e, token = %request.token, "burst capture failed");
                    BurstOutcome::failed(e.to_string())
                });
                // Receiver only disappears at shutdown, after draining.
                let _ = tx.blocking_send(outcome);
            });
        }
    }
}
