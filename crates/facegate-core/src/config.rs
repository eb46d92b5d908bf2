//! Runtime-adjustable engine configuration.
//!
//! Every threshold the gates and the trigger policy consult lives here, with
//! the stock defaults. Callers may mutate fields at runtime; `reset()`
//! restores the defaults and is idempotent.

use serde::{Deserialize, Serialize};

/// Engine thresholds and policy knobs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Maximum |yaw| in degrees for the pose gate.
    pub yaw_max_deg: f32,
    /// Maximum |pitch| in degrees for the pose gate.
    pub pitch_max_deg: f32,
    /// Maximum |roll| in degrees for the pose gate.
    pub roll_max_deg: f32,
    /// Distance window lower bound used until calibration is ready.
    pub face_size_min: f32,
    /// Distance window upper bound used until calibration is ready.
    pub face_size_max: f32,
    /// Minimum eye aspect ratio (eyes-open gate).
    pub ear_min: f32,
    /// Maximum 720p-normalized motion EMA (hold-still gate).
    pub motion_max: f32,
    /// Continuous all-gates-pass duration before the ring turns green.
    pub dwell_ms: u64,
    /// Additional continuous green duration before capture is permitted.
    pub ready_green_ms: u64,
    /// Frames per capture burst.
    pub burst_frames: u32,
    /// Delay between burst frames.
    pub burst_spacing_ms: u64,
    /// Cooldown after any capture attempt before the next auto-trigger.
    pub cooldown_ms: u64,
    /// Minimum spacing between bursts, independent of the cooldown.
    pub min_interval_ms: u64,
    /// Whether the capture collaborator should mirror frames horizontally.
    pub mirror: bool,
    /// Nominal subject distance forwarded to the measurement backend.
    pub working_distance_cm: f32,

    // Calibration sampler knobs.
    /// Time budget for one sampling round.
    pub sample_duration_ms: u64,
    /// Accepted-sample count that ends a round early.
    pub min_samples: usize,
    /// Motion EMA smoothing factor.
    pub motion_alpha: f32,
    /// Days a persisted calibration window stays valid.
    pub calibration_ttl_days: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            yaw_max_deg: 18.0,
            pitch_max_deg: 18.0,
            roll_max_deg: 15.0,
            face_size_min: 0.16,
            face_size_max: 0.20,
            ear_min: 0.08,
            motion_max: 38.0,
            dwell_ms: 700,
            ready_green_ms: 800,
            burst_frames: 5,
            burst_spacing_ms: 120,
            cooldown_ms: 1500,
            min_interval_ms: 2200,
            mirror: true,
            working_distance_cm: 40.0,
            sample_duration_ms: 4000,
            min_samples: 20,
            motion_alpha: 0.5,
            calibration_ttl_days: 14,
        }
    }
}

impl EngineConfig {
    /// Restore all knobs to their defaults.
    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_contract() {
        let cfg = EngineConfig::default();
        assert_eq!(cfg.yaw_max_deg, 18.0);
        assert_eq!(cfg.pitch_max_deg, 18.0);
        assert_eq!(cfg.roll_max_deg, 15.0);
        assert_eq!(cfg.face_size_min, 0.16);
        assert_eq!(cfg.face_size_max, 0.20);
        assert_eq!(cfg.ear_min, 0.08);
        assert_eq!(cfg.motion_max, 38.0);
        assert_eq!(cfg.dwell_ms, 700);
        assert_eq!(cfg.ready_green_ms, 800);
        assert_eq!(cfg.burst_frames, 5);
        assert_eq!(cfg.burst_spacing_ms, 120);
        assert_eq!(cfg.cooldown_ms, 1500);
        assert_eq!(cfg.min_interval_ms, 2200);
        assert!(cfg.mirror);
        assert_eq!(cfg.working_distance_cm, 40.0);
        assert_eq!(cfg.calibration_ttl_days, 14);
    }

    #[test]
    fn reset_is_idempotent() {
        let mut cfg = EngineConfig::default();
        cfg.dwell_ms = 9999;
        cfg.mirror = false;

        cfg.reset();
        let first = cfg.clone();
        cfg.reset();

        assert_eq!(cfg, first);
        assert_eq!(cfg, EngineConfig::default());
    }
}
