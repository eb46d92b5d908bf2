//! Hysteretic capture-readiness gating.
//!
//! Raw per-frame pass/fail signals flicker: a single borderline frame must
//! not fire the shutter, and a single bad frame must fully revoke readiness.
//! The machine therefore requires all gates to hold continuously through a
//! dwell interval before the ring turns green, and through a further green
//! interval before capture is permitted. Any failure clears both timers at
//! once, with no partial credit.

use serde::Serialize;

use crate::calibration::CalibrationWindow;
use crate::config::EngineConfig;
use crate::metrics::MetricsSnapshot;

/// On-screen ring color. Green means all gates are holding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum RingColor {
    White,
    Green,
}

/// Distance gate verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum DistanceStatus {
    Far,
    Ok,
    Close,
    /// No face to measure.
    Na,
}

/// User-facing guidance, ordered by gate priority.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Guidance {
    Preparing,
    CenterFace,
    MoveCloser,
    MoveBack,
    FaceForward,
    OpenEyes,
    HoldStill,
    Capturing,
}

impl Guidance {
    pub fn message(self) -> &'static str {
        match self {
            Self::Preparing => "Preparing camera…",
            Self::CenterFace => "Center your face in the frame",
            Self::MoveCloser => "Move a little closer",
            Self::MoveBack => "Move back a little",
            Self::FaceForward => "Look straight at the camera",
            Self::OpenEyes => "Keep your eyes open",
            Self::HoldStill => "Hold still",
            Self::Capturing => "Hold still… capturing",
        }
    }
}

/// Per-tick gating output.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct GatingSnapshot {
    pub ring: RingColor,
    pub distance: DistanceStatus,
    pub can_capture: bool,
    pub guidance: Guidance,
    pub dwell_started_at: Option<u64>,
    pub green_started_at: Option<u64>,
}

/// The gating state machine. Only the two timer fields persist across ticks.
#[derive(Debug, Default)]
pub struct GatingMachine {
    dwell_started_at: Option<u64>,
    green_started_at: Option<u64>,
}

impl GatingMachine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Clear both hysteresis timers.
    pub fn reset(&mut self) {
        self.dwell_started_at = None;
        self.green_started_at = None;
    }

    /// Evaluate one tick.
    ///
    /// `frame_present` distinguishes "detector not ready" (false) from
    /// "frame seen but no face" (`true` with `metrics == None`).
    pub fn tick(
        &mut self,
        now_ms: u64,
        frame_present: bool,
        metrics: Option<&MetricsSnapshot>,
        window: &CalibrationWindow,
        cfg: &EngineConfig,
    ) -> GatingSnapshot {
        if !frame_present {
            self.reset();
            return self.snapshot(RingColor::White, DistanceStatus::Na, false, Guidance::Preparing);
        }

        let Some(m) = metrics else {
            self.reset();
            return self.snapshot(
                RingColor::White,
                DistanceStatus::Na,
                false,
                Guidance::CenterFace,
            );
        };

        let distance = if m.face_fraction < window.min {
            DistanceStatus::Far
        } else if m.face_fraction > window.max {
            DistanceStatus::Close
        } else {
            DistanceStatus::Ok
        };
        let distance_ok = distance == DistanceStatus::Ok;

        let pose_ok = m.pose.yaw.abs() <= cfg.yaw_max_deg
            && m.pose.pitch.abs() <= cfg.pitch_max_deg
            && m.pose.roll.abs() <= cfg.roll_max_deg;
        let eyes_ok = m.eye_aspect_ratio >= cfg.ear_min;
        let motion_ok = m.motion_ema.map_or(true, |v| v <= cfg.motion_max);

        let all_ok = distance_ok && pose_ok && eyes_ok && motion_ok;

        if all_ok {
            let dwell_start = *self.dwell_started_at.get_or_insert(now_ms);
            if now_ms.saturating_sub(dwell_start) >= cfg.dwell_ms {
                let green_start = *self.green_started_at.get_or_insert(now_ms);
                let can_capture = now_ms.saturating_sub(green_start) >= cfg.ready_green_ms;
                return self.snapshot(RingColor::Green, distance, can_capture, Guidance::Capturing);
            }
            return self.snapshot(RingColor::White, distance, false, Guidance::HoldStill);
        }

        // A single failing tick revokes all accumulated hold time.
        self.reset();

        let guidance = match distance {
            DistanceStatus::Far => Guidance::MoveCloser,
            DistanceStatus::Close => Guidance::MoveBack,
            _ if !pose_ok => Guidance::FaceForward,
            _ if !eyes_ok => Guidance::OpenEyes,
            _ => Guidance::HoldStill,
        };
        self.snapshot(RingColor::White, distance, false, guidance)
    }

    fn snapshot(
        &self,
        ring: RingColor,
        distance: DistanceStatus,
        can_capture: bool,
        guidance: Guidance,
    ) -> GatingSnapshot {
        GatingSnapshot {
            ring,
            distance,
            can_capture,
            guidance,
            dwell_started_at: self.dwell_started_at,
            green_started_at: self.green_started_at,
        }
    }
}
