//! The capture engine: one `tick` per detector frame.
//!
//! Composes the metric extractor, calibration sampler, gating machine, and
//! capture orchestrator behind a single state-machine object. All time is
//! injected: the driver passes a monotonic millisecond timestamp into every
//! call, so the engine is deterministic under synthetic frame sequences.
//!
//! Everything runs on one logical thread. The only suspension point, the
//! burst capture/upload, happens outside: the engine emits a
//! [`CaptureRequest`] from `tick` and the driver reports back through
//! [`CaptureEngine::complete_capture`] whenever the collaborator finishes.

use crate::calibration::{
    CalibrationKey, CalibrationSampler, CalibrationStore, CalibrationWindow, DeviceClass,
    SamplerPhase,
};
use crate::config::EngineConfig;
use crate::frame::{CameraFrame, Landmark};
use crate::gating::{GatingMachine, GatingSnapshot};
use crate::metrics::{extract, eye_displacement_px, MetricsSnapshot, MotionEma};
use crate::orchestrator::{BurstOutcome, CaptureOrchestrator, CaptureRequest};

/// Everything one tick produced.
#[derive(Debug, Clone)]
pub struct EngineSnapshot {
    pub gating: GatingSnapshot,
    pub metrics: Option<MetricsSnapshot>,
    pub calibration: SamplerPhase,
    pub window: Option<CalibrationWindow>,
    /// A burst request for the capture collaborator, when the policy fired.
    pub capture: Option<CaptureRequest>,
}

/// The full signal-processing and decision engine.
pub struct CaptureEngine {
    config: EngineConfig,
    key: CalibrationKey,
    store: Box<dyn CalibrationStore>,
    sampler: CalibrationSampler,
    gating: GatingMachine,
    orchestrator: CaptureOrchestrator,
    motion: MotionEma,
    prev_landmarks: Option<Vec<Landmark>>,
    cache_checked: bool,
}

impl CaptureEngine {
    pub fn new(config: EngineConfig, key: CalibrationKey, store: Box<dyn CalibrationStore>) -> Self {
        let motion = MotionEma::new(config.motion_alpha);
        Self {
            config,
            key,
            store,
            sampler: CalibrationSampler::new(),
            gating: GatingMachine::new(),
            orchestrator: CaptureOrchestrator::new(),
            motion,
            prev_landmarks: None,
            cache_checked: false,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn config_mut(&mut self) -> &mut EngineConfig {
        &mut self.config
    }

    pub fn is_capturing(&self) -> bool {
        self.orchestrator.is_capturing()
    }

    pub fn auto_enabled(&self) -> bool {
        self.orchestrator.auto_enabled()
    }

    pub fn last_result(&self) -> Option<&BurstOutcome> {
        self.orchestrator.last_result()
    }

    /// Process one tick. `frame` is `None` while the camera/detector is not
    /// ready; the engine stays in the "preparing" state indefinitely.
    pub fn tick(&mut self, now_ms: u64, frame: Option<&CameraFrame>) -> EngineSnapshot {
        let Some(frame) = frame else {
            let gating = self.gating.tick(
                now_ms,
                false,
                None,
                &self.default_window(),
                &self.config,
            );
            return EngineSnapshot {
                gating,
                metrics: None,
                calibration: self.sampler.phase(),
                window: self.sampler.window().copied(),
                capture: None,
            };
        };

        // First frame: adopt a cached window or begin sampling.
        if !self.cache_checked {
            self.cache_checked = true;
            let bands = DeviceClass::from_viewport_width(frame.viewport_width).bands();
            match self.sampler.load_cached(&*self.store, &self.key, &bands) {
                Ok(true) => {}
                Ok(false) => self.begin_sampling(now_ms),
                Err(e) => {
                    tracing::warn!(error = %e, "calibration cache unavailable, sampling instead");
                    self.begin_sampling(now_ms);
                }
            }
        }

        let metrics = match &frame.detection {
            Some(det) => {
                if let Some(prev) = self.prev_landmarks.as_deref() {
                    if let Some(px) = eye_displacement_px(
                        prev,
                        &det.landmarks,
                        frame.video_width,
                        frame.video_height,
                    ) {
                        self.motion.update(px, frame.video_height);
                    }
                }
                self.prev_landmarks = Some(det.landmarks.clone());
                Some(extract(
                    det,
                    frame.video_width,
                    frame.video_height,
                    self.motion.value(),
                ))
            }
            None => {
                self.prev_landmarks = None;
                None
            }
        };

        self.sampler.tick(
            now_ms,
            metrics.as_ref(),
            frame.viewport_width,
            &self.config,
            &*self.store,
            &self.key,
        );

        let window = self
            .sampler
            .window()
            .copied()
            .unwrap_or_else(|| self.default_window());

        let gating = self
            .gating
            .tick(now_ms, true, metrics.as_ref(), &window, &self.config);

        let capture = self
            .orchestrator
            .poll_auto(now_ms, gating.can_capture, &self.config);

        EngineSnapshot {
            gating,
            metrics,
            calibration: self.sampler.phase(),
            window: Some(window),
            capture,
        }
    }

    /// Report the collaborator's outcome for the outstanding burst.
    pub fn complete_capture(&mut self, now_ms: u64, outcome: BurstOutcome) {
        self.orchestrator.complete(now_ms, outcome, &self.config);
    }

    /// Start a manual test capture (never touches auto-arming).
    pub fn manual_capture(&mut self, now_ms: u64) -> Option<CaptureRequest> {
        self.orchestrator.manual_capture(now_ms, &self.config)
    }

    /// Clear the last result and pacing timestamps, re-arm auto capture.
    pub fn retake(&mut self) {
        self.orchestrator.retake();
    }

    /// Throw away the current calibration window and relearn from scratch.
    pub fn recalibrate(&mut self, now_ms: u64) {
        self.sampler.reset();
        self.begin_sampling(now_ms);
    }

    /// Restore the default configuration.
    pub fn reset_config(&mut self) {
        self.config.reset();
    }

    fn begin_sampling(&mut self, now_ms: u64) {
        self.sampler.start(now_ms);
        self.motion.reset();
    }

    /// Distance window used until calibration is ready.
    fn default_window(&self) -> CalibrationWindow {
        CalibrationWindow {
            min: self.config.face_size_min,
            max: self.config.face_size_max,
            median: (self.config.face_size_min + self.config.face_size_max) / 2.0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calibration::StoreError;
    use crate::frame::Detection;
    use crate::gating::{Guidance, RingColor};
    use crate::metrics::{EYE_INNER, EYE_LOWER_LID, EYE_OUTER, EYE_UPPER_LID};
    use std::cell::RefCell;
    use std::collections::HashMap;

    #[derive(Default)]
    struct MemoryStore {
        records: RefCell<HashMap<CalibrationKey, CalibrationWindow>>,
    }

    impl CalibrationStore for MemoryStore {
        fn save(
            &self,
            key: &CalibrationKey,
            window: &CalibrationWindow,
            _ttl_days: u32,
        ) -> Result<(), StoreError> {
            self.records.borrow_mut().insert(key.clone(), *window);
            Ok(())
        }

        fn load(&self, key: &CalibrationKey) -> Result<Option<CalibrationWindow>, StoreError> {
            Ok(self.records.borrow().get(key).copied())
        }
    }

    fn key() -> CalibrationKey {
        CalibrationKey {
            device_id: "test-device".into(),
            video_height: 720,
            identity_hash: "id".into(),
        }
    }

    /// A steady frontal face filling `fraction` of the frame width.
    fn face_frame(fraction: f32) -> CameraFrame {
        let mut lms = vec![Landmark::new(0.5, 0.5, 0.0); 478];
        lms[0] = Landmark::new(0.5 - fraction / 2.0, 0.5, 0.0);
        lms[1] = Landmark::new(0.5 + fraction / 2.0, 0.5, 0.0);
        // An open eye: EAR = (0.02·720) / (0.05·1280) = 0.225.
        lms[EYE_OUTER] = Landmark::new(0.45, 0.50, 0.0);
        lms[EYE_INNER] = Landmark::new(0.50, 0.50, 0.0);
        lms[EYE_UPPER_LID] = Landmark::new(0.475, 0.48, 0.0);
        lms[EYE_LOWER_LID] = Landmark::new(0.475, 0.50, 0.0);

        CameraFrame {
            detection: Some(Detection {
                landmarks: lms,
                transform: None,
            }),
            video_width: 1280,
            video_height: 720,
            viewport_width: 1280,
        }
    }

    fn engine() -> CaptureEngine {
        CaptureEngine::new(
            EngineConfig::default(),
            key(),
            Box::new(MemoryStore::default()),
        )
    }

    #[test]
    fn no_frame_stays_preparing() {
        let mut eng = engine();
        for t in (0..10).map(|i| i * 66) {
            let snap = eng.tick(t, None);
            assert_eq!(snap.gating.guidance, Guidance::Preparing);
            assert!(!snap.gating.can_capture);
            assert!(snap.capture.is_none());
        }
    }

    #[test]
    fn full_session_samples_gates_and_fires_once() {
        let mut eng = engine();
        let frame = face_frame(0.18);

        let mut fired: Option<CaptureRequest> = None;
        let mut fired_at = 0u64;
        let mut green_at: Option<u64> = None;

        for i in 0..60u64 {
            let now = i * 66;
            let snap = eng.tick(now, Some(&frame));
            if snap.gating.ring == RingColor::Green && green_at.is_none() {
                green_at = Some(now);
            }
            if let Some(req) = snap.capture {
                fired = Some(req);
                fired_at = now;
                break;
            }
        }

        // Dwell 700: the ring greens at the first 66 ms tick ≥ 700 (726).
        // Green 800 counts from there, so the trigger lands at the first
        // tick ≥ 1526 (1584).
        assert_eq!(green_at, Some(726));
        let req = fired.expect("auto capture should fire");
        assert_eq!(fired_at, 1584);
        assert_eq!(req.frame_count, 5);

        // Calibration finished from the same steady stream.
        assert_eq!(eng.sampler.phase(), SamplerPhase::Ready);
        let w = eng.sampler.window().unwrap();
        assert!(w.min >= 0.16 && w.max <= 0.20);

        // While capturing, ticks keep flowing but nothing re-fires.
        let snap = eng.tick(fired_at + 66, Some(&frame));
        assert!(snap.capture.is_none());
        assert!(eng.is_capturing());

        // Success disarms auto capture until retake.
        eng.complete_capture(
            fired_at + 600,
            BurstOutcome {
                ok: true,
                distance_pd_mm: Some(63.0),
                near_pd_mm: None,
                score: 0.9,
                frames_used: 5,
                diagnostics: Default::default(),
                message: "OK".into(),
            },
        );
        assert!(!eng.auto_enabled());

        for i in 0..100u64 {
            let snap = eng.tick(fired_at + 700 + i * 66, Some(&frame));
            assert!(snap.capture.is_none());
        }

        eng.retake();
        assert!(eng.auto_enabled());
    }

    #[test]
    fn cached_window_skips_sampling() {
        let store = MemoryStore::default();
        store
            .records
            .borrow_mut()
            .insert(key(), CalibrationWindow { min: 0.17, max: 0.19, median: 0.18 });

        let mut eng = CaptureEngine::new(EngineConfig::default(), key(), Box::new(store));
        let snap = eng.tick(0, Some(&face_frame(0.18)));

        assert_eq!(snap.calibration, SamplerPhase::Ready);
        assert_eq!(snap.window.unwrap().min, 0.17);
    }

    #[test]
    fn losing_face_mid_dwell_revokes_readiness() {
        let mut eng = engine();
        let frame = face_frame(0.18);
        let empty = CameraFrame {
            detection: None,
            ..face_frame(0.18)
        };

        for i in 0..18u64 {
            eng.tick(i * 66, Some(&frame)); // up to t=1122, green but not ready
        }
        let snap = eng.tick(19 * 66, Some(&empty));
        assert_eq!(snap.gating.guidance, Guidance::CenterFace);

        // Dwell restarts; no capture until a fresh dwell + green of holding.
        let base = 20 * 66;
        for i in 0..23u64 {
            let snap = eng.tick(base + i * 66, Some(&frame));
            assert!(snap.capture.is_none());
        }
        let snap = eng.tick(base + 24 * 66, Some(&frame));
        assert!(snap.capture.is_some());
    }

    #[test]
    fn recalibrate_relearns_window() {
        let mut eng = engine();
        let frame = face_frame(0.18);

        let mut now = 0;
        while eng.sampler.phase() != SamplerPhase::Ready {
            eng.tick(now, Some(&frame));
            now += 66;
        }

        eng.recalibrate(now);
        assert_eq!(eng.sampler.phase(), SamplerPhase::Sampling);

        while eng.sampler.phase() != SamplerPhase::Ready {
            eng.tick(now, Some(&frame));
            now += 66;
        }
        assert!(eng.sampler.window().is_some());
    }
}
