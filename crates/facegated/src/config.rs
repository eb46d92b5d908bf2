use std::path::PathBuf;

/// Daemon configuration, loaded from environment variables.
pub struct Config {
    /// Path to the SQLite calibration database.
    pub db_path: PathBuf,
    /// Base URL of the measurement backend.
    pub backend_url: String,
    /// Stable device identifier scoping the calibration cache.
    pub device_id: String,
    /// User identity string; hashed before it scopes the cache.
    pub identity: String,
    /// Video height in pixels, part of the calibration cache key.
    pub video_height: u32,
    /// Directory the video pipeline drops encoded burst frames into.
    pub frame_dir: PathBuf,
    /// Engine tick interval in milliseconds (~15 Hz).
    pub tick_ms: u64,
}

impl Config {
    /// Load configuration from `FACEGATE_*` environment variables with defaults.
    pub fn from_env() -> Self {
        let data_dir = std::env::var("XDG_DATA_HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| {
                let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
                PathBuf::from(home).join(".local/share")
            })
            .join("facegate");

        let db_path = std::env::var("FACEGATE_DB_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|_| data_dir.join("calibration.db"));

        let frame_dir = std::env::var("FACEGATE_FRAME_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| data_dir.join("frames"));

        Self {
            db_path,
            backend_url: std::env::var("FACEGATE_BACKEND_URL")
                .unwrap_or_else(|_| "http://127.0.0.1:8000".to_string()),
            device_id: std::env::var("FACEGATE_DEVICE_ID")
                .unwrap_or_else(|_| "default".to_string()),
            identity: std::env::var("FACEGATE_IDENTITY")
                .unwrap_or_else(|_| "anonymous".to_string()),
            video_height: env_u32("FACEGATE_VIDEO_HEIGHT", 720),
            frame_dir,
            tick_ms: env_u64("FACEGATE_TICK_MS", 66),
        }
    }
}

fn env_u32(key: &str, default: u32) -> u32 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_u64(key: &str, default: u64) -> u64 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
