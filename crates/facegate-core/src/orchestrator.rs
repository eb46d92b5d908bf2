//! Capture trigger policy.
//!
//! Turns a readiness signal into at most one burst-capture invocation,
//! enforcing a cooldown after every attempt, a minimum spacing between
//! bursts, and one-shot auto-arming: a successful auto capture disarms
//! further auto triggers until an explicit retake.
//!
//! The orchestrator never calls the capture collaborator itself. It emits a
//! [`CaptureRequest`] and the caller reports back through
//! [`CaptureOrchestrator::complete`]; the `capturing` flag is the sole
//! re-entrancy guard while the burst is outstanding.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::EngineConfig;

/// How a capture was initiated. Only `Auto` captures disarm on success.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum CaptureKind {
    Auto,
    Manual,
}

/// One burst-capture invocation handed to the external collaborator.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CaptureRequest {
    /// Burst token forwarded to the measurement backend.
    pub token: Uuid,
    pub kind: CaptureKind,
    pub frame_count: u32,
    pub spacing_ms: u64,
    pub working_distance_cm: f32,
    pub mirror: bool,
    pub triggered_at: u64,
}

/// Per-frame diagnostics returned by the measurement backend.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BurstDiagnostics {
    pub blur: Vec<f32>,
    pub clip_pct: Vec<f32>,
}

/// Result of one burst capture + measurement round trip.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BurstOutcome {
    pub ok: bool,
    pub distance_pd_mm: Option<f32>,
    pub near_pd_mm: Option<f32>,
    pub score: f32,
    pub frames_used: u32,
    #[serde(default)]
    pub diagnostics: BurstDiagnostics,
    pub message: String,
}

impl BurstOutcome {
    /// Coarse quality classification of the measurement score.
    pub fn score_band(&self) -> &'static str {
        if self.score >= 0.75 {
            "good"
        } else if self.score >= 0.55 {
            "borderline"
        } else {
            "retake"
        }
    }

    /// Outcome representing a transport or collaborator failure.
    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            ok: false,
            distance_pd_mm: None,
            near_pd_mm: None,
            score: 0.0,
            frames_used: 0,
            diagnostics: BurstDiagnostics::default(),
            message: message.into(),
        }
    }
}

/// Capture policy state.
#[derive(Debug)]
pub struct CaptureOrchestrator {
    auto_enabled: bool,
    capturing: bool,
    last_burst_at: Option<u64>,
    cooldown_until: u64,
    pending_kind: Option<CaptureKind>,
    last_result: Option<BurstOutcome>,
}

impl Default for CaptureOrchestrator {
    fn default() -> Self {
        Self::new()
    }
}

impl CaptureOrchestrator {
    pub fn new() -> Self {
        Self {
            auto_enabled: true,
            capturing: false,
            last_burst_at: None,
            cooldown_until: 0,
            pending_kind: None,
            last_result: None,
        }
    }

    pub fn auto_enabled(&self) -> bool {
        self.auto_enabled
    }

    pub fn is_capturing(&self) -> bool {
        self.capturing
    }

    pub fn last_result(&self) -> Option<&BurstOutcome> {
        self.last_result.as_ref()
    }

    /// Poll the auto-trigger condition. Emits a request and enters the
    /// capturing state when armed, ready, out of cooldown, and past the
    /// minimum burst interval.
    pub fn poll_auto(
        &mut self,
        now_ms: u64,
        can_capture: bool,
        cfg: &EngineConfig,
    ) -> Option<CaptureRequest> {
        let interval_ok = self
            .last_burst_at
            .map_or(true, |t| now_ms.saturating_sub(t) >= cfg.min_interval_ms);

        if !(self.auto_enabled
            && can_capture
            && !self.capturing
            && now_ms >= self.cooldown_until
            && interval_ok)
        {
            return None;
        }

        Some(self.begin(now_ms, CaptureKind::Auto, cfg))
    }

    /// Start a manual test capture. Ignored while a burst is outstanding.
    /// Never touches the auto-arm state.
    pub fn manual_capture(&mut self, now_ms: u64, cfg: &EngineConfig) -> Option<CaptureRequest> {
        if self.capturing {
            return None;
        }
        Some(self.begin(now_ms, CaptureKind::Manual, cfg))
    }

    fn begin(&mut self, now_ms: u64, kind: CaptureKind, cfg: &EngineConfig) -> CaptureRequest {
        self.capturing = true;
        self.pending_kind = Some(kind);
        self.last_result = None;

        let request = CaptureRequest {
            token: Uuid::new_v4(),
            kind,
            frame_count: cfg.burst_frames,
            spacing_ms: cfg.burst_spacing_ms,
            working_distance_cm: cfg.working_distance_cm,
            mirror: cfg.mirror,
            triggered_at: now_ms,
        };
        tracing::info!(
            token = %request.token,
            ?kind,
            frames = request.frame_count,
            spacing_ms = request.spacing_ms,
            "burst capture triggered"
        );
        request
    }

    /// Record the collaborator's outcome. Cooldown and interval bookkeeping
    /// run unconditionally so a failed upload can never wedge the policy.
    pub fn complete(&mut self, now_ms: u64, outcome: BurstOutcome, cfg: &EngineConfig) {
        self.capturing = false;
        self.last_burst_at = Some(now_ms);
        self.cooldown_until = now_ms + cfg.cooldown_ms;

        if outcome.ok {
            if self.pending_kind == Some(CaptureKind::Auto) {
                // One-shot: stay disarmed until an explicit retake.
                self.auto_enabled = false;
            }
            tracing::info!(
                score = outcome.score,
                band = outcome.score_band(),
                frames_used = outcome.frames_used,
                message = %outcome.message,
                "burst capture succeeded"
            );
        } else {
            tracing::warn!(message = %outcome.message, "burst capture failed");
        }

        self.pending_kind = None;
        self.last_result = Some(outcome);
    }

    /// Manual retake: drop the result and the pacing timestamps, re-arm.
    pub fn retake(&mut self) {
        self.last_result = None;
        self.last_burst_at = None;
        self.cooldown_until = 0;
        self.auto_enabled = true;
        tracing::debug!("retake: auto capture re-armed");
    }
}
