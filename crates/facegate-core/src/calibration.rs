//! Auto-calibration of the personal distance window.
//!
//! "Right distance" varies per camera, lens, and user, so the sampler watches
//! the user for a few seconds, keeps the face-size samples that pass the
//! quality gates, trims outliers, and blends the trimmed median toward a
//! device-class target. The result is a [`CalibrationWindow`] the gating
//! machine reads on every tick, persisted with a TTL so the same device skips
//! the sampling phase on the next session.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::EngineConfig;
use crate::metrics::MetricsSnapshot;

/// Viewport widths below this are classified as mobile.
pub const MOBILE_VIEWPORT_MAX: u32 = 820;

/// Minimum spacing between processed sampler ticks (~15 Hz).
const MIN_TICK_SPACING_MS: u64 = 66;

/// Fraction trimmed from each end of the sorted sample buffer.
const TRIM_FRACTION: f32 = 0.2;

/// Weight of the observed median when blending against the device target.
const MEDIAN_BLEND_WEIGHT: f32 = 0.6;

/// Hard floor on the accepted-sample count for a usable round.
const USABLE_FLOOR: usize = 6;

/// Device threshold class, selected by viewport width.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum DeviceClass {
    Desktop,
    Mobile,
}

impl DeviceClass {
    pub fn from_viewport_width(width: u32) -> Self {
        if width < MOBILE_VIEWPORT_MAX {
            Self::Mobile
        } else {
            Self::Desktop
        }
    }

    /// Threshold bands for this class.
    pub fn bands(self) -> Bands {
        match self {
            Self::Desktop => Bands {
                final_min: 0.16,
                final_max: 0.20,
                accept_min: 0.14,
                accept_max: 0.26,
                target: 0.18,
                margin: 0.02,
            },
            Self::Mobile => Bands {
                final_min: 0.18,
                final_max: 0.24,
                accept_min: 0.16,
                accept_max: 0.30,
                target: 0.21,
                margin: 0.03,
            },
        }
    }
}

/// Face-fraction threshold bands for one device class.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Bands {
    /// Persisted windows are clamped into this band.
    pub final_min: f32,
    pub final_max: f32,
    /// Samples outside this band are rejected during collection.
    pub accept_min: f32,
    pub accept_max: f32,
    /// Device-class target fraction the median is biased toward.
    pub target: f32,
    /// Half-width of the produced window.
    pub margin: f32,
}

/// Learned acceptable face-fraction range for "correct distance".
///
/// Invariant: `min ≤ median ≤ max`, all inside the device final band.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CalibrationWindow {
    pub min: f32,
    pub max: f32,
    pub median: f32,
}

impl CalibrationWindow {
    /// Re-clamp into a final band. Guards against cached windows produced
    /// under a prior software version's bands.
    pub fn clamped_to(self, bands: &Bands) -> Self {
        let clamp = |v: f32| v.clamp(bands.final_min, bands.final_max);
        Self {
            min: clamp(self.min),
            max: clamp(self.max),
            median: clamp(self.median),
        }
    }
}

/// Device-scoped identity of a persisted calibration window.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CalibrationKey {
    pub device_id: String,
    pub video_height: u32,
    pub identity_hash: String,
}

/// Opaque persistence failure surfaced by a [`CalibrationStore`] backend.
#[derive(Debug, Error)]
#[error("calibration store: {0}")]
pub struct StoreError(Box<dyn std::error::Error + Send + Sync>);

impl StoreError {
    pub fn new(source: impl Into<Box<dyn std::error::Error + Send + Sync>>) -> Self {
        Self(source.into())
    }
}

/// TTL key-value persistence for calibration windows. The storage medium is
/// a collaborator; `load` must return `None` once the record's TTL elapsed.
pub trait CalibrationStore: Send {
    fn save(
        &self,
        key: &CalibrationKey,
        window: &CalibrationWindow,
        ttl_days: u32,
    ) -> Result<(), StoreError>;

    fn load(&self, key: &CalibrationKey) -> Result<Option<CalibrationWindow>, StoreError>;
}

/// Sampler lifecycle. `Ready` is terminal until an explicit reset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SamplerPhase {
    Idle,
    Sampling,
    Ready,
}

/// Collects face-fraction samples and derives the calibration window.
#[derive(Debug)]
pub struct CalibrationSampler {
    phase: SamplerPhase,
    samples: Vec<f32>,
    started_at_ms: Option<u64>,
    last_tick_ms: Option<u64>,
    window: Option<CalibrationWindow>,
    /// Failed sampling rounds since the last start; retries are unbounded,
    /// the counter only feeds the logs.
    attempts: u32,
}

impl Default for CalibrationSampler {
    fn default() -> Self {
        Self::new()
    }
}

impl CalibrationSampler {
    pub fn new() -> Self {
        Self {
            phase: SamplerPhase::Idle,
            samples: Vec::new(),
            started_at_ms: None,
            last_tick_ms: None,
            window: None,
            attempts: 0,
        }
    }

    pub fn phase(&self) -> SamplerPhase {
        self.phase
    }

    pub fn window(&self) -> Option<&CalibrationWindow> {
        self.window.as_ref()
    }

    /// Adopt a cached window if the store holds an unexpired one for `key`,
    /// re-clamped into the current final band. Returns whether a window was
    /// loaded (and the sampler jumped to `Ready`).
    pub fn load_cached(
        &mut self,
        store: &dyn CalibrationStore,
        key: &CalibrationKey,
        bands: &Bands,
    ) -> Result<bool, StoreError> {
        match store.load(key)? {
            Some(window) => {
                self.window = Some(window.clamped_to(bands));
                self.phase = SamplerPhase::Ready;
                tracing::info!(
                    min = window.min,
                    max = window.max,
                    median = window.median,
                    "calibration window loaded from cache"
                );
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Begin a sampling round: clear the buffer, record the start time.
    /// The caller resets the shared motion EMA alongside this.
    pub fn start(&mut self, now_ms: u64) {
        self.samples.clear();
        self.started_at_ms = Some(now_ms);
        self.last_tick_ms = None;
        self.attempts = 0;
        self.phase = SamplerPhase::Sampling;
        tracing::debug!(now_ms, "calibration sampling started");
    }

    /// Discard all state, including a ready window. Re-entry happens through
    /// `start` or `load_cached`.
    pub fn reset(&mut self) {
        *self = Self::new();
    }

    /// Process one tick while sampling. `metrics` is `None` when no face was
    /// detected this tick; such ticks are skipped entirely.
    pub fn tick(
        &mut self,
        now_ms: u64,
        metrics: Option<&MetricsSnapshot>,
        viewport_width: u32,
        cfg: &EngineConfig,
        store: &dyn CalibrationStore,
        key: &CalibrationKey,
    ) {
        if self.phase != SamplerPhase::Sampling {
            return;
        }
        if let Some(last) = self.last_tick_ms {
            if now_ms.saturating_sub(last) < MIN_TICK_SPACING_MS {
                return;
            }
        }
        self.last_tick_ms = Some(now_ms);

        let Some(metrics) = metrics else {
            return;
        };

        let bands = DeviceClass::from_viewport_width(viewport_width).bands();
        if Self::accepts(metrics, cfg, &bands) {
            self.samples.push(metrics.face_fraction);
        }

        let started = self.started_at_ms.unwrap_or(now_ms);
        let elapsed = now_ms.saturating_sub(started);
        if elapsed >= cfg.sample_duration_ms || self.samples.len() >= cfg.min_samples {
            self.finish_round(now_ms, cfg, &bands, store, key);
        }
    }

    /// Sample acceptance: pose inside tolerance on all axes, eyes open,
    /// motion settled, face fraction inside the accept band.
    fn accepts(metrics: &MetricsSnapshot, cfg: &EngineConfig, bands: &Bands) -> bool {
        let pose_ok = metrics.pose.yaw.abs() <= cfg.yaw_max_deg
            && metrics.pose.pitch.abs() <= cfg.pitch_max_deg
            && metrics.pose.roll.abs() <= cfg.roll_max_deg;
        let eyes_ok = metrics.eye_aspect_ratio > cfg.ear_min;
        let motion_ok = metrics.motion_ema.map_or(true, |m| m <= cfg.motion_max);
        let fraction_ok = metrics.face_fraction >= bands.accept_min
            && metrics.face_fraction <= bands.accept_max;

        pose_ok && eyes_ok && motion_ok && fraction_ok
    }

    fn finish_round(
        &mut self,
        now_ms: u64,
        cfg: &EngineConfig,
        bands: &Bands,
        store: &dyn CalibrationStore,
        key: &CalibrationKey,
    ) {
        let usable_min = USABLE_FLOOR.max((cfg.min_samples as f32 * 0.6).floor() as usize);
        if self.samples.len() < usable_min {
            self.attempts += 1;
            tracing::warn!(
                attempt = self.attempts,
                collected = self.samples.len(),
                needed = usable_min,
                "calibration round unusable, restarting"
            );
            self.samples.clear();
            self.started_at_ms = Some(now_ms);
            return;
        }

        let mut sorted = self.samples.clone();
        sorted.sort_by(f32::total_cmp);

        let k = (sorted.len() as f32 * TRIM_FRACTION).floor() as usize;
        let remaining = sorted.len() - 2 * k;
        // Trim outliers unless that would leave fewer samples than it drops.
        let trimmed: &[f32] = if k > 0 && remaining > 2 * k {
            &sorted[k..sorted.len() - k]
        } else {
            &sorted
        };

        let median = median_of(trimmed);
        let biased = MEDIAN_BLEND_WEIGHT * median + (1.0 - MEDIAN_BLEND_WEIGHT) * bands.target;

        let window = CalibrationWindow {
            min: biased - bands.margin,
            max: biased + bands.margin,
            median: biased,
        }
        .clamped_to(bands);

        tracing::info!(
            samples = self.samples.len(),
            trimmed = trimmed.len(),
            median,
            biased,
            min = window.min,
            max = window.max,
            "calibration window derived"
        );

        self.window = Some(window);
        self.phase = SamplerPhase::Ready;

        if let Err(e) = store.save(key, &window, cfg.calibration_ttl_days) {
            // Non-fatal: the in-memory window still gates this session.
            tracing::warn!(error = %e, "failed to persist calibration window");
        }
    }
}

/// Median of a non-empty sorted slice; mean of the two middles when even.
fn median_of(sorted: &[f32]) -> f32 {
    let n = sorted.len();
    if n == 0 {
        return 0.0;
    }
    if n % 2 == 1 {
        sorted[n / 2]
    } else {
        (sorted[n / 2 - 1] + sorted[n / 2]) / 2.0
    }
}
