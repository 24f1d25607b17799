use absen_core::liveness::LivenessThresholds;
use absen_core::matching::DEFAULT_SIMILARITY_THRESHOLD;
use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

/// Daemon configuration: defaults, then an optional TOML file named by
/// `ABSEN_CONFIG`, then `ABSEN_*` environment overrides.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct Config {
    /// HTTP listen address (default: 0.0.0.0:8000).
    pub bind_addr: String,
    /// Directory containing ONNX model files.
    pub model_dir: PathBuf,
    /// Path to the SQLite database file.
    pub db_path: PathBuf,
    /// Minimum cosine similarity (inclusive) to accept a match.
    pub similarity_threshold: f64,
    /// Lifetime of a liveness session.
    pub session_ttl_secs: u64,
    /// Period of the expired-session sweep.
    pub sweep_interval_secs: u64,
    /// Largest accepted request body.
    pub max_upload_bytes: usize,
    /// Pending requests the vision engine will queue before callers wait.
    pub engine_queue_depth: usize,
    /// Nearest-neighbour candidates fetched per attendance attempt.
    pub candidate_limit: usize,
    pub liveness: LivenessThresholds,
}

impl Default for Config {
    fn default() -> Self {
        let data_dir = std::env::var("XDG_DATA_HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| {
                let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
                PathBuf::from(home).join(".local/share")
            })
            .join("absen");

        Self {
            bind_addr: "0.0.0.0:8000".to_string(),
            model_dir: absen_core::default_model_dir(),
            db_path: data_dir.join("absen.db"),
            similarity_threshold: DEFAULT_SIMILARITY_THRESHOLD,
            session_ttl_secs: 300,
            sweep_interval_secs: 60,
            max_upload_bytes: 10 * 1024 * 1024,
            engine_queue_depth: 8,
            candidate_limit: 1,
            liveness: LivenessThresholds::default(),
        }
    }
}

impl Config {
    /// Resolve the full configuration for the daemon.
    pub fn load() -> Result<Self> {
        let base = match std::env::var("ABSEN_CONFIG") {
            Ok(path) => Self::from_file(Path::new(&path))?,
            Err(_) => Self::default(),
        };
        Ok(base.with_env_overrides())
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading config file {}", path.display()))?;
        let mut config: Self =
            toml::from_str(&raw).with_context(|| format!("parsing config file {}", path.display()))?;
        if !valid_threshold(config.similarity_threshold) {
            tracing::warn!(
                value = config.similarity_threshold,
                "similarity_threshold must be within [0, 1]; using default"
            );
            config.similarity_threshold = DEFAULT_SIMILARITY_THRESHOLD;
        }
        Ok(config)
    }

    /// Apply `ABSEN_*` variables on top of `self`.
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(addr) = std::env::var("ABSEN_BIND_ADDR") {
            self.bind_addr = addr;
        }
        if let Ok(dir) = std::env::var("ABSEN_MODEL_DIR") {
            self.model_dir = PathBuf::from(dir);
        }
        if let Ok(path) = std::env::var("ABSEN_DB_PATH") {
            self.db_path = PathBuf::from(path);
        }
        let threshold = env_or("ABSEN_SIMILARITY_THRESHOLD", self.similarity_threshold);
        if valid_threshold(threshold) {
            self.similarity_threshold = threshold;
        } else {
            tracing::warn!(value = threshold, "ignoring ABSEN_SIMILARITY_THRESHOLD outside [0, 1]");
        }
        self.session_ttl_secs = env_or("ABSEN_SESSION_TTL_SECS", self.session_ttl_secs);
        self.sweep_interval_secs = env_or("ABSEN_SWEEP_INTERVAL_SECS", self.sweep_interval_secs);
        self.max_upload_bytes = env_or("ABSEN_MAX_UPLOAD_BYTES", self.max_upload_bytes);
        self.engine_queue_depth = env_or("ABSEN_ENGINE_QUEUE_DEPTH", self.engine_queue_depth);
        self.candidate_limit = env_or("ABSEN_CANDIDATE_LIMIT", self.candidate_limit);
        self.liveness.blink_ear = env_or("ABSEN_BLINK_EAR", self.liveness.blink_ear);
        self.liveness.turn_left_nose_x = env_or("ABSEN_TURN_LEFT_NOSE_X", self.liveness.turn_left_nose_x);
        self.liveness.turn_right_nose_x = env_or("ABSEN_TURN_RIGHT_NOSE_X", self.liveness.turn_right_nose_x);
        self
    }

    pub fn session_ttl(&self) -> Duration {
        Duration::from_secs(self.session_ttl_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs.max(1))
    }

    /// Path to the SCRFD detection model.
    pub fn scrfd_model_path(&self) -> String {
        self.model_path("det_10g.onnx")
    }

    /// Path to the ArcFace recognition model.
    pub fn arcface_model_path(&self) -> String {
        self.model_path("w600k_r50.onnx")
    }

    /// Path to the 468-point face mesh model.
    pub fn mesh_model_path(&self) -> String {
        self.model_path("face_landmark.onnx")
    }

    fn model_path(&self, file: &str) -> String {
        self.model_dir.join(file).to_string_lossy().into_owned()
    }
}

fn valid_threshold(value: f64) -> bool {
    value.is_finite() && (0.0..=1.0).contains(&value)
}

fn env_or<T: FromStr>(key: &str, current: T) -> T {
    match std::env::var(key) {
        Ok(raw) => raw.trim().parse().unwrap_or_else(|_| {
            tracing::warn!(key, value = %raw, "ignoring unparseable config override");
            current
        }),
        Err(_) => current,
    }
}
