//! absen-core — Face embedding, liveness and match decisions for attendance.
//!
//! Detection (SCRFD), recognition (ArcFace) and dense landmarks (face mesh)
//! run via ONNX Runtime behind the traits in [`pipeline`]. The decision
//! policies in [`liveness`] and [`matching`] are pure and model-free.

pub mod alignment;
pub mod detector;
pub mod frame;
pub mod landmarks;
pub mod liveness;
pub mod matching;
pub mod pipeline;
pub mod recognizer;
pub mod types;

use std::path::PathBuf;

pub use detector::ScrfdDetector;
pub use frame::{Frame, FrameError};
pub use landmarks::MeshLandmarker;
pub use liveness::{Challenge, LivenessResult, LivenessThresholds};
pub use matching::{Candidate, MatchDecision, MatchPolicy, RejectReason, Verdict};
pub use pipeline::{FaceDetector, FaceRecognizer, LandmarkDetector, VisionError, VisionPipeline};
pub use recognizer::ArcFaceRecognizer;
pub use types::{BoundingBox, Embedding, FaceMesh};

/// Default directory for ONNX model files when none is configured.
pub fn default_model_dir() -> PathBuf {
    PathBuf::from("/var/lib/absen/models")
}
