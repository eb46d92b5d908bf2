//! Landmark feed: the opaque external detector, adapted to the engine.
//!
//! The detector process streams one JSON object per line: frame geometry,
//! the landmark list for at most one face, and an optional 4×16 transform.
//! A dedicated reader thread parses lines and pushes frames through a
//! channel; the tick loop polls non-blockingly and only ever sees the most
//! recent frame, so a slow consumer drops stale detections instead of
//! queueing them.

use std::io::BufRead;
use std::sync::mpsc;

use serde::Deserialize;

use facegate_core::{CameraFrame, Detection, Landmark};

/// One line of the detector's wire format.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireFrame {
    video_width: u32,
    video_height: u32,
    viewport_width: u32,
    /// Landmarks for the detected face; absent or empty means no face.
    #[serde(default)]
    landmarks: Option<Vec<[f32; 3]>>,
    /// Column-major 4×4 transform, 16 values; anything else is ignored.
    #[serde(default)]
    transform: Option<Vec<f32>>,
}

impl WireFrame {
    fn into_camera_frame(self) -> CameraFrame {
        let detection = match self.landmarks {
            Some(points) if !points.is_empty() => Some(Detection {
                landmarks: points
                    .into_iter()
                    .map(|[x, y, z]| Landmark::new(x, y, z))
                    .collect(),
                transform: self
                    .transform
                    .and_then(|v| <[f32; 16]>::try_from(v.as_slice()).ok()),
            }),
            _ => None,
        };
        CameraFrame {
            detection,
            video_width: self.video_width,
            video_height: self.video_height,
            viewport_width: self.viewport_width,
        }
    }
}

/// Non-blocking handle to the detector stream.
pub struct LandmarkFeed {
    rx: mpsc::Receiver<CameraFrame>,
}

impl LandmarkFeed {
    /// Read frames from stdin (the usual wiring: the detector process pipes
    /// into the daemon).
    pub fn from_stdin() -> Self {
        Self::from_reader(std::io::BufReader::new(std::io::stdin()))
    }

    /// Spawn the reader thread over any line-oriented source.
    pub fn from_reader<R: BufRead + Send + 'static>(reader: R) -> Self {
        let (tx, rx) = mpsc::channel();

        std::thread::Builder::new()
            .name("facegate-feed".into())
            .spawn(move || {
                for line in reader.lines() {
                    let line = match line {
                        Ok(l) => l,
                        Err(e) => {
                            tracing::warn!(error = %e, "landmark feed read error, stopping");
                            break;
                        }
                    };
                    if line.trim().is_empty() {
                        continue;
                    }
                    match serde_json::from_str::<WireFrame>(&line) {
                        Ok(wire) => {
                            if tx.send(wire.into_camera_frame()).is_err() {
                                break; // consumer gone
                            }
                        }
                        Err(e) => {
                            tracing::warn!(error = %e, "skipping malformed feed line");
                        }
                    }
                }
                tracing::info!("landmark feed ended");
            })
            .expect("failed to spawn feed thread");

        Self { rx }
    }

    /// Latest frame received since the last poll, if any. Intermediate
    /// frames are discarded.
    pub fn poll(&self) -> Option<CameraFrame> {
        let mut latest = None;
        while let Ok(frame) = self.rx.try_recv() {
            latest = Some(frame);
        }
        latest
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;
    use std::time::Duration;

    fn feed_from(lines: &str) -> LandmarkFeed {
        let feed = LandmarkFeed::from_reader(Cursor::new(lines.to_string()));
        // Give the reader thread time to drain the cursor.
        std::thread::sleep(Duration::from_millis(50));
        feed
    }

    #[test]
    fn poll_returns_latest_frame_only() {
        let feed = feed_from(concat!(
            r#"{"videoWidth":1280,"videoHeight":720,"viewportWidth":1280,"landmarks":[[0.1,0.2,0.0]]}"#,
            "\n",
            r#"{"videoWidth":1280,"videoHeight":720,"viewportWidth":1280,"landmarks":[[0.3,0.4,0.0]]}"#,
            "\n",
        ));

        let frame = feed.poll().expect("frame available");
        let det = frame.detection.expect("face present");
        assert!((det.landmarks[0].x - 0.3).abs() < 1e-6);

        // Drained: nothing left.
        assert!(feed.poll().is_none());
    }

    #[test]
    fn missing_landmarks_mean_no_face() {
        let feed = feed_from(
            "{\"videoWidth\":640,\"videoHeight\":480,\"viewportWidth\":800,\"landmarks\":[]}\n",
        );
        let frame = feed.poll().unwrap();
        assert!(frame.detection.is_none());
        assert_eq!(frame.viewport_width, 800);
    }

    #[test]
    fn malformed_lines_are_skipped() {
        let feed = feed_from(concat!(
            "not json at all\n",
            r#"{"videoWidth":1280,"videoHeight":720,"viewportWidth":1280}"#,
            "\n",
        ));
        let frame = feed.poll().expect("valid line still parsed");
        assert!(frame.detection.is_none());
    }

    #[test]
    fn short_transform_is_ignored() {
        let feed = feed_from(concat!(
            r#"{"videoWidth":1280,"videoHeight":720,"viewportWidth":1280,"#,
            r#""landmarks":[[0.5,0.5,0.0]],"transform":[1.0,2.0,3.0]}"#,
            "\n",
        ));
        let det = feed.poll().unwrap().detection.unwrap();
        assert!(det.transform.is_none());
    }

    #[test]
    fn full_transform_is_forwarded() {
        let values: Vec<String> = (0..16).map(|i| format!("{}.0", i)).collect();
        let line = format!(
            r#"{{"videoWidth":1280,"videoHeight":720,"viewportWidth":1280,"landmarks":[[0.5,0.5,0.0]],"transform":[{}]}}"#,
            values.join(",")
        );
        let feed = feed_from(&format!("{line}\n"));
        let det = feed.poll().unwrap().detection.unwrap();
        let t = det.transform.unwrap();
        assert_eq!(t[0], 0.0);
        assert_eq!(t[15], 15.0);
    }
}
