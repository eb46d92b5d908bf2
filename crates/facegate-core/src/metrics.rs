//! Per-frame quality metrics: face size, eye openness, motion.
//!
//! Face size uses the landmark bounding-box width as a distance proxy (a
//! closer face fills more of the frame). Eye openness is the classic eye
//! aspect ratio over four lid/corner landmarks. Motion is the mean pixel
//! displacement of the eye-corner landmarks between consecutive detections,
//! smoothed with an EMA; a live, steady subject sits near zero while head
//! movement or detector jitter pushes it up.

use serde::Serialize;

use crate::frame::{Detection, Landmark};
use crate::pose::{estimate_pose, PoseEstimate};

/// FaceMesh landmark indices used by the metrics (left-eye convention).
pub const EYE_OUTER: usize = 33;
pub const EYE_INNER: usize = 133;
pub const EYE_UPPER_LID: usize = 159;
pub const EYE_LOWER_LID: usize = 145;
/// Right-eye outer corner, used together with [`EYE_OUTER`] for motion.
pub const EYE_OUTER_RIGHT: usize = 263;

/// Reference height the raw motion displacement is normalized to, so the
/// motion threshold means the same thing on 480p and 4K sensors.
const MOTION_REFERENCE_HEIGHT: f32 = 720.0;

/// Everything the gates need from one detection frame.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct MetricsSnapshot {
    /// Landmark bounding-box width as a fraction of frame width, 0..1.
    pub face_fraction: f32,
    /// Eye aspect ratio (lid separation / eye width), ≥ 0.
    pub eye_aspect_ratio: f32,
    /// Smoothed 720p-normalized motion, `None` until the first displacement.
    pub motion_ema: Option<f32>,
    pub pose: PoseEstimate,
}

/// Bounding-box width of all landmark x coordinates. Monotonically decreases
/// with distance. Returns 0 for an empty landmark set.
pub fn face_fraction(landmarks: &[Landmark]) -> f32 {
    let mut min_x = f32::INFINITY;
    let mut max_x = f32::NEG_INFINITY;
    for lm in landmarks {
        min_x = min_x.min(lm.x);
        max_x = max_x.max(lm.x);
    }
    if max_x > min_x {
        max_x - min_x
    } else {
        0.0
    }
}

/// Eye aspect ratio in pixel space: lid separation over eye width, with both
/// axes scaled by the frame dimensions. Returns 0 when the eye width is
/// degenerate or the landmark set is too small for the fixed indices.
pub fn eye_aspect_ratio(landmarks: &[Landmark], video_width: u32, video_height: u32) -> f32 {
    let required = EYE_OUTER
        .max(EYE_INNER)
        .max(EYE_UPPER_LID)
        .max(EYE_LOWER_LID);
    if landmarks.len() <= required {
        return 0.0;
    }

    let eye_w = (landmarks[EYE_INNER].x - landmarks[EYE_OUTER].x).abs() * video_width as f32;
    let eye_h =
        (landmarks[EYE_LOWER_LID].y - landmarks[EYE_UPPER_LID].y).abs() * video_height as f32;

    if eye_w > 0.0 {
        eye_h / eye_w
    } else {
        0.0
    }
}

/// Mean Euclidean pixel displacement of both eye-corner landmarks between
/// two consecutive detections. `None` when either frame lacks the landmarks.
pub fn eye_displacement_px(
    prev: &[Landmark],
    curr: &[Landmark],
    video_width: u32,
    video_height: u32,
) -> Option<f32> {
    let required = EYE_OUTER.max(EYE_OUTER_RIGHT);
    if prev.len() <= required || curr.len() <= required {
        return None;
    }

    let w = video_width as f32;
    let h = video_height as f32;
    let disp = |i: usize| {
        let dx = (curr[i].x - prev[i].x) * w;
        let dy = (curr[i].y - prev[i].y) * h;
        (dx * dx + dy * dy).sqrt()
    };

    Some((disp(EYE_OUTER) + disp(EYE_OUTER_RIGHT)) / 2.0)
}

/// Exponential moving average over 720p-normalized motion displacement.
///
/// The first finite sample is taken verbatim; afterwards
/// `ema = α·now + (1−α)·prev`.
#[derive(Debug, Clone, Copy)]
pub struct MotionEma {
    alpha: f32,
    value: Option<f32>,
}

impl MotionEma {
    pub fn new(alpha: f32) -> Self {
        Self { alpha, value: None }
    }

    /// Feed a raw pixel displacement measured on a frame of `video_height`
    /// pixels. Returns the updated EMA value.
    pub fn update(&mut self, raw_px: f32, video_height: u32) -> f32 {
        let scale = MOTION_REFERENCE_HEIGHT / (video_height.max(1)) as f32;
        let normalized = raw_px * scale;

        let next = match self.value.filter(|v| v.is_finite()) {
            Some(prev) => self.alpha * normalized + (1.0 - self.alpha) * prev,
            None => normalized,
        };
        self.value = Some(next);
        next
    }

    pub fn value(&self) -> Option<f32> {
        self.value
    }

    pub fn reset(&mut self) {
        self.value = None;
    }
}

/// Compute the full metrics snapshot for one detection.
pub fn extract(
    detection: &Detection,
    video_width: u32,
    video_height: u32,
    motion_ema: Option<f32>,
) -> MetricsSnapshot {
    MetricsSnapshot {
        face_fraction: face_fraction(&detection.landmarks),
        eye_aspect_ratio: eye_aspect_ratio(&detection.landmarks, video_width, video_height),
        motion_ema,
        pose: estimate_pose(detection.transform.as_ref()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lm(x: f32, y: f32) -> Landmark {
        Landmark::new(x, y, 0.0)
    }

    /// A landmark set big enough for every fixed index, with all points at
    /// (0.5, 0.5) except the ones the caller overrides.
    fn base_landmarks() -> Vec<Landmark> {
        vec![lm(0.5, 0.5); 478]
    }

    #[test]
    fn face_fraction_is_bbox_width() {
        let mut lms = base_landmarks();
        lms[0] = lm(0.41, 0.5);
        lms[1] = lm(0.59, 0.5);
        assert!((face_fraction(&lms) - 0.18).abs() < 1e-6);
    }

    #[test]
    fn face_fraction_empty_is_zero() {
        assert_eq!(face_fraction(&[]), 0.0);
    }

    #[test]
    fn face_fraction_single_point_is_zero() {
        assert_eq!(face_fraction(&[lm(0.5, 0.5)]), 0.0);
    }

    #[test]
    fn ear_scales_by_frame_dimensions() {
        let mut lms = base_landmarks();
        lms[EYE_OUTER] = lm(0.45, 0.50);
        lms[EYE_INNER] = lm(0.50, 0.50);
        lms[EYE_UPPER_LID] = lm(0.475, 0.48);
        lms[EYE_LOWER_LID] = lm(0.475, 0.50);

        // eyeW = 0.05 * 1280 = 64 px, eyeH = 0.02 * 720 = 14.4 px
        let ear = eye_aspect_ratio(&lms, 1280, 720);
        assert!((ear - 14.4 / 64.0).abs() < 1e-5, "ear {ear}");
    }

    #[test]
    fn ear_zero_width_is_zero() {
        let mut lms = base_landmarks();
        lms[EYE_OUTER] = lm(0.5, 0.5);
        lms[EYE_INNER] = lm(0.5, 0.5);
        assert_eq!(eye_aspect_ratio(&lms, 1280, 720), 0.0);
    }

    #[test]
    fn ear_short_landmark_set_is_zero() {
        let lms = vec![lm(0.5, 0.5); 10];
        assert_eq!(eye_aspect_ratio(&lms, 1280, 720), 0.0);
    }

    #[test]
    fn eye_displacement_known_geometry() {
        let prev = base_landmarks();
        let mut curr = base_landmarks();
        // Move the right eye corner by 3px right and 4px down on 1000×1000.
        curr[EYE_OUTER_RIGHT] = lm(0.5 + 0.003, 0.5 + 0.004);

        let d = eye_displacement_px(&prev, &curr, 1000, 1000).unwrap();
        // Left corner: 0, right corner: 5, mean 2.5.
        assert!((d - 2.5).abs() < 1e-3, "displacement {d}");
    }

    #[test]
    fn eye_displacement_requires_landmarks() {
        let prev = vec![lm(0.5, 0.5); 10];
        let curr = base_landmarks();
        assert!(eye_displacement_px(&prev, &curr, 1000, 1000).is_none());
    }

    #[test]
    fn motion_ema_first_value_verbatim() {
        let mut ema = MotionEma::new(0.5);
        // 10 px at 1440p normalizes to 5 px at 720p.
        let v = ema.update(10.0, 1440);
        assert!((v - 5.0).abs() < 1e-6);
        assert_eq!(ema.value(), Some(v));
    }

    #[test]
    fn motion_ema_blends() {
        let mut ema = MotionEma::new(0.5);
        ema.update(10.0, 720);
        let v = ema.update(20.0, 720);
        assert!((v - 15.0).abs() < 1e-6);
    }

    #[test]
    fn motion_ema_reset_forgets_history() {
        let mut ema = MotionEma::new(0.5);
        ema.update(100.0, 720);
        ema.reset();
        assert_eq!(ema.value(), None);
        let v = ema.update(4.0, 720);
        assert!((v - 4.0).abs() < 1e-6);
    }

    #[test]
    fn extract_combines_metrics() {
        let mut lms = base_landmarks();
        lms[0] = lm(0.41, 0.5);
        lms[1] = lm(0.59, 0.5);
        let det = Detection {
            landmarks: lms,
            transform: None,
        };

        let snap = extract(&det, 1280, 720, Some(2.0));
        assert!((snap.face_fraction - 0.18).abs() < 1e-6);
        assert_eq!(snap.motion_ema, Some(2.0));
        assert_eq!(snap.pose, PoseEstimate::default());
    }
}
