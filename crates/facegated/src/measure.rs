//! Burst capture + measurement upload collaborator.
//!
//! Grabs `frame_count` encoded frames from a [`FrameSource`] with the
//! requested spacing, then posts them as one multipart request to the
//! measurement backend's `/v1/measurements/measure` endpoint. The backend
//! scores the burst and (when it can) derives the distance/near PD values;
//! the daemon only relays the result.

use std::io;
use std::path::PathBuf;
use std::sync::Mutex;
use std::time::Duration;

use thiserror::Error;

use facegate_core::{BurstOutcome, CaptureRequest};

#[derive(Debug, Error)]
pub enum MeasureError {
    #[error("frame source error: {0}")]
    FrameSource(#[source] io::Error),
    #[error("upload failed: {0}")]
    Transport(#[from] Box<ureq::Error>),
    #[error("invalid backend response: {0}")]
    Response(#[source] io::Error),
}

/// Supplies encoded (JPEG) frames from the video pipeline. Mirroring, if
/// configured, happens upstream before encoding.
pub trait FrameSource: Send {
    fn next_frame(&mut self) -> io::Result<Vec<u8>>;
}

/// The full capture collaborator: grab frames, upload, return the outcome.
pub trait BurstCapture: Send + Sync {
    fn capture_burst(&self, request: &CaptureRequest) -> Result<BurstOutcome, MeasureError>;
}

/// HTTP client for the measurement backend.
pub struct MeasureClient {
    base_url: String,
    agent: ureq::Agent,
}

impl MeasureClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            agent: ureq::AgentBuilder::new()
                .timeout(Duration::from_secs(30))
                .build(),
        }
    }

    /// Upload one burst and parse the measurement response.
    pub fn measure(
        &self,
        frames: &[Vec<u8>],
        request: &CaptureRequest,
    ) -> Result<BurstOutcome, MeasureError> {
        let boundary = format!("facegate-{}", request.token.simple());
        let fields = [
            ("server_token", request.token.to_string()),
            (
                "working_distance_cm",
                request.working_distance_cm.to_string(),
            ),
        ];
        let body = multipart_body(&boundary, &fields, frames);

        let url = format!("{}/v1/measurements/measure", self.base_url);
        let response = self
            .agent
            .post(&url)
            .set(
                "Content-Type",
                &format!("multipart/form-data; boundary={boundary}"),
            )
            .send_bytes(&body)
            .map_err(Box::new)?;

        let outcome: BurstOutcome = response.into_json().map_err(MeasureError::Response)?;
        tracing::debug!(
            ok = outcome.ok,
            score = outcome.score,
            frames_used = outcome.frames_used,
            "measurement response received"
        );
        Ok(outcome)
    }
}

/// Encode form fields and frame files as a multipart/form-data body.
fn multipart_body(boundary: &str, fields: &[(&str, String)], frames: &[Vec<u8>]) -> Vec<u8> {
    let mut body = Vec::new();

    for (name, value) in fields {
        body.extend_from_slice(format!("--{boundary}\r\n").as_bytes());
        body.extend_from_slice(
            format!("Content-Disposition: form-data; name=\"{name}\"\r\n\r\n").as_bytes(),
        );
        body.extend_from_slice(value.as_bytes());
        body.extend_from_slice(b"\r\n");
    }

    for (i, frame) in frames.iter().enumerate() {
        body.extend_from_slice(format!("--{boundary}\r\n").as_bytes());
        body.extend_from_slice(
            format!(
                "Content-Disposition: form-data; name=\"frames\"; filename=\"frame-{i}.jpg\"\r\n"
            )
            .as_bytes(),
        );
        body.extend_from_slice(b"Content-Type: image/jpeg\r\n\r\n");
        body.extend_from_slice(frame);
        body.extend_from_slice(b"\r\n");
    }

    body.extend_from_slice(format!("--{boundary}--\r\n").as_bytes());
    body
}

/// Composes a [`MeasureClient`] with a frame source into the one-call
/// collaborator the session drives on a blocking worker.
pub struct BurstUploader<S: FrameSource> {
    client: MeasureClient,
    source: Mutex<S>,
}

impl<S: FrameSource> BurstUploader<S> {
    pub fn new(client: MeasureClient, source: S) -> Self {
        Self {
            client,
            source: Mutex::new(source),
        }
    }
}

impl<S: FrameSource> BurstCapture for BurstUploader<S> {
    fn capture_burst(&self, request: &CaptureRequest) -> Result<BurstOutcome, MeasureError> {
        let mut frames = Vec::with_capacity(request.frame_count as usize);
        {
            let mut source = self
                .source
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            for i in 0..request.frame_count {
                frames.push(source.next_frame().map_err(MeasureError::FrameSource)?);
                if i + 1 < request.frame_count {
                    std::thread::sleep(Duration::from_millis(request.spacing_ms));
                }
            }
        }
        self.client.measure(&frames, request)
    }
}

/// Frame source reading the most recently written `.jpg` from a spool
/// directory the video pipeline keeps fresh.
pub struct DirFrameSource {
    dir: PathBuf,
}

impl DirFrameSource {
    pub fn new(dir: PathBuf) -> Self {
        Self { dir }
    }
}

impl FrameSource for DirFrameSource {
    fn next_frame(&mut self) -> io::Result<Vec<u8>> {
        let mut newest: Option<(std::time::SystemTime, PathBuf)> = None;
        for entry in std::fs::read_dir(&self.dir)? {
            let entry = entry?;
            let path = entry.path();
            let is_jpeg = path
                .extension()
                .and_then(|e| e.to_str())
                .map_or(false, |e| e.eq_ignore_ascii_case("jpg") || e.eq_ignore_ascii_case("jpeg"));
            if !is_jpeg {
                continue;
            }
            let modified = entry.metadata()?.modified()?;
            if newest.as_ref().map_or(true, |(t, _)| modified > *t) {
                newest = Some((modified, path));
            }
        }
        match newest {
            Some((_, path)) => std::fs::read(path),
            None => Err(io::Error::new(
                io::ErrorKind::NotFound,
                format!("no frames in {}", self.dir.display()),
            )),
        }
    }
}
