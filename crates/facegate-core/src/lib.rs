//! facegate-core: the capture gating engine.
//!
//! Gates an automatic photo-burst behind a real-time quality check: the
//! burst may only fire when the user's face is centered, at the learned
//! distance, facing forward, eyes open, and motionless for a sustained
//! interval. The crate is pure signal processing and policy; the landmark
//! detector, video pipeline, capture/upload collaborator, and storage medium
//! are all injected.
//!
//! Data flow per tick:
//!
//! ```text
//! detector → pose + metrics → gating ⇄ calibration → orchestrator → burst
//! ```

pub mod calibration;
pub mod config;
pub mod engine;
pub mod frame;
pub mod gating;
pub mod metrics;
pub mod orchestrator;
pub mod pose;

pub use calibration::{
    Bands, CalibrationKey, CalibrationSampler, CalibrationStore, CalibrationWindow, DeviceClass,
    SamplerPhase, StoreError,
};
pub use config::EngineConfig;
pub use engine::{CaptureEngine, EngineSnapshot};
pub use frame::{CameraFrame, Detection, Landmark};
pub use gating::{DistanceStatus, GatingMachine, GatingSnapshot, Guidance, RingColor};
pub use metrics::{MetricsSnapshot, MotionEma};
pub use orchestrator::{
    BurstDiagnostics, BurstOutcome, CaptureKind, CaptureOrchestrator, CaptureRequest,
};
pub use pose::{estimate_pose, PoseEstimate};
