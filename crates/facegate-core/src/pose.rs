//! Head pose estimation from the detector's rigid transform.
//!
//! Decomposes the rotation submatrix of a column-major 4×4 transform into
//! yaw/pitch/roll Euler angles (ZYX order). A missing transform yields the
//! zero pose, which downstream gating treats as facing forward; detectors
//! that never emit a transform must not be locked out of the pose gate.

use serde::Serialize;

/// Head orientation in degrees, recomputed every tick.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct PoseEstimate {
    pub yaw: f32,
    pub pitch: f32,
    pub roll: f32,
}

/// Threshold on `cos(pitch)` below which the decomposition is degenerate
/// (gimbal lock) and yaw/roll can no longer be separated.
const GIMBAL_EPSILON: f32 = 1e-5;

/// Extract yaw/pitch/roll from an optional column-major 4×4 rigid transform.
///
/// Rotation entries, column-major: `r00 = m[0]`, `r10 = m[1]`, `r20 = m[2]`,
/// `r11 = m[5]`, `r21 = m[6]`, `r12 = m[9]`, `r22 = m[10]`.
///
/// Non-finite entries in the rotation submatrix are treated the same as a
/// missing transform: the zero pose.
pub fn estimate_pose(transform: Option<&[f32; 16]>) -> PoseEstimate {
    let Some(m) = transform else {
        return PoseEstimate::default();
    };

    let (r00, r10, r20) = (m[0], m[1], m[2]);
    let (r11, r21) = (m[5], m[6]);
    let (r12, r22) = (m[9], m[10]);

    let entries = [r00, r10, r20, r11, r21, r12, r22];
    if entries.iter().any(|v| !v.is_finite()) {
        return PoseEstimate::default();
    }

    let pitch = (-r20).clamp(-1.0, 1.0).asin();
    let cp = pitch.cos();

    let (yaw, roll) = if cp.abs() > GIMBAL_EPSILON {
        (r10.atan2(r00), r21.atan2(r22))
    } else {
        // Gimbal lock: pitch is ±90°, yaw folded into roll.
        (0.0, (-r12).atan2(r11))
    };

    PoseEstimate {
        yaw: yaw.to_degrees(),
        pitch: pitch.to_degrees(),
        roll: roll.to_degrees(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Build a column-major 4×4 from ZYX Euler angles in degrees.
    fn zyx_matrix(yaw_deg: f32, pitch_deg: f32, roll_deg: f32) -> [f32; 16] {
        let (sy, cy) = yaw_deg.to_radians().sin_cos();
        let (sp, cp) = pitch_deg.to_radians().sin_cos();
        let (sr, cr) = roll_deg.to_radians().sin_cos();

        // Row-major R = Rz(yaw) * Ry(pitch) * Rx(roll)
        let r = [
            [cy * cp, cy * sp * sr - sy * cr, cy * sp * cr + sy * sr],
            [sy * cp, sy * sp * sr + cy * cr, sy * sp * cr - cy * sr],
            [-sp, cp * sr, cp * cr],
        ];

        let mut m = [0.0f32; 16];
        for (row, values) in r.iter().enumerate() {
            for (col, &v) in values.iter().enumerate() {
                m[col * 4 + row] = v;
            }
        }
        m[15] = 1.0;
        m
    }

    #[test]
    fn missing_transform_is_zero_pose() {
        assert_eq!(estimate_pose(None), PoseEstimate::default());
    }

    #[test]
    fn identity_is_zero_pose() {
        let mut m = [0.0f32; 16];
        m[0] = 1.0;
        m[5] = 1.0;
        m[10] = 1.0;
        m[15] = 1.0;
        let pose = estimate_pose(Some(&m));
        assert!(pose.yaw.abs() < 1e-4);
        assert!(pose.pitch.abs() < 1e-4);
        assert!(pose.roll.abs() < 1e-4);
    }

    #[test]
    fn recovers_known_angles() {
        let m = zyx_matrix(10.0, 5.0, -3.0);
        let pose = estimate_pose(Some(&m));
        assert!((pose.yaw - 10.0).abs() < 1e-2, "yaw {}", pose.yaw);
        assert!((pose.pitch - 5.0).abs() < 1e-2, "pitch {}", pose.pitch);
        assert!((pose.roll + 3.0).abs() < 1e-2, "roll {}", pose.roll);
    }

    #[test]
    fn recovers_negative_yaw() {
        let m = zyx_matrix(-17.5, 0.0, 0.0);
        let pose = estimate_pose(Some(&m));
        assert!((pose.yaw + 17.5).abs() < 1e-2);
    }

    #[test]
    fn gimbal_lock_zeroes_yaw() {
        let m = zyx_matrix(0.0, 90.0, 12.0);
        let pose = estimate_pose(Some(&m));
        assert_eq!(pose.yaw, 0.0);
        assert!((pose.pitch - 90.0).abs() < 1e-2);
        assert!((pose.roll - 12.0).abs() < 1e-1, "roll {}", pose.roll);
    }

    #[test]
    fn nan_entries_fall_back_to_zero_pose() {
        let mut m = zyx_matrix(10.0, 5.0, -3.0);
        m[6] = f32::NAN;
        assert_eq!(estimate_pose(Some(&m)), PoseEstimate::default());
    }

    #[test]
    fn infinite_entries_fall_back_to_zero_pose() {
        let mut m = zyx_matrix(10.0, 5.0, -3.0);
        m[0] = f32::INFINITY;
        assert_eq!(estimate_pose(Some(&m)), PoseEstimate::default());
    }

    #[test]
    fn out_of_range_asin_input_is_clamped() {
        // Slightly denormalized rotation (|r20| > 1) must not produce NaN.
        let mut m = zyx_matrix(0.0, 90.0, 0.0);
        m[2] = -1.000001;
        let pose = estimate_pose(Some(&m));
        assert!(pose.pitch.is_finite());
        assert!((pose.pitch - 90.0).abs() < 1e-2);
    }
}
