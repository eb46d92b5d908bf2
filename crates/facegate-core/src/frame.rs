//! Detector output types.
//!
//! The landmark detector is an external collaborator: once per tick it hands
//! the engine an optional [`CameraFrame`]. The engine never owns the video
//! pipeline and treats everything here as read-only input.

use serde::{Deserialize, Serialize};

/// A single facial landmark in normalized `[0, 1]` frame coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Landmark {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl Landmark {
    pub fn new(x: f32, y: f32, z: f32) -> Self {
        Self { x, y, z }
    }
}

/// Detector output for the single face in a frame: the landmark set plus an
/// optional column-major 4×4 rigid transform of the head.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    pub landmarks: Vec<Landmark>,
    /// Column-major 4×4 matrix; `None` when the detector does not provide one.
    pub transform: Option<[f32; 16]>,
}

/// One tick of input: camera geometry plus the detector result.
///
/// `detection` is `None` when the detector ran but found no face. An absent
/// `CameraFrame` altogether means the camera/detector is not ready yet.
#[derive(Debug, Clone, PartialEq)]
pub struct CameraFrame {
    pub detection: Option<Detection>,
    pub video_width: u32,
    pub video_height: u32,
    /// Viewport width in CSS pixels; selects the device threshold class.
    pub viewport_width: u32,
}
