//! Vision interfaces and the largest-face pipeline built on them.
//!
//! The service only talks to [`VisionPipeline`]; model-backed adapters and
//! test doubles plug in through the three traits.

use crate::detector::{DetectorError, ScrfdDetector};
use crate::frame::{Frame, FrameError};
use crate::landmarks::{LandmarkError, MeshLandmarker};
use crate::recognizer::{ArcFaceRecognizer, RecognizerError};
use crate::types::{BoundingBox, Embedding, FaceMesh};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum VisionError {
    #[error(transparent)]
    Frame(#[from] FrameError),
    #[error("no face detected in image")]
    NoFaceDetected,
    #[error("detector: {0}")]
    Detector(#[from] DetectorError),
    #[error("recognizer: {0}")]
    Recognizer(#[from] RecognizerError),
    #[error("landmarks: {0}")]
    Landmark(#[from] LandmarkError),
    #[error("vision backend: {0}")]
    Backend(String),
}

/// Finds face bounding boxes in a frame.
pub trait FaceDetector: Send {
    fn detect(&mut self, frame: &Frame) -> Result<Vec<BoundingBox>, VisionError>;
}

/// Turns one detected face into a unit-normalised embedding.
pub trait FaceRecognizer: Send {
    fn embed(&mut self, frame: &Frame, face: &BoundingBox) -> Result<Embedding, VisionError>;
}

/// Regresses dense landmarks for one detected face.
pub trait LandmarkDetector: Send {
    fn landmarks(&mut self, frame: &Frame, face: &BoundingBox) -> Result<Option<FaceMesh>, VisionError>;
}

impl FaceDetector for ScrfdDetector {
    fn detect(&mut self, frame: &Frame) -> Result<Vec<BoundingBox>, VisionError> {
        Ok(self.infer(frame)?)
    }
}

impl FaceRecognizer for ArcFaceRecognizer {
    fn embed(&mut self, frame: &Frame, face: &BoundingBox) -> Result<Embedding, VisionError> {
        Ok(self.infer(frame, face)?)
    }
}

impl LandmarkDetector for MeshLandmarker {
    fn landmarks(&mut self, frame: &Frame, face: &BoundingBox) -> Result<Option<FaceMesh>, VisionError> {
        Ok(self.infer(frame, face)?)
    }
}

/// The face with the largest bounding-box area; the first one wins ties.
pub fn largest_face(faces: &[BoundingBox]) -> Option<&BoundingBox> {
    faces.iter().fold(None, |best: Option<&BoundingBox>, face| match best {
        Some(b) if b.area() >= face.area() => Some(b),
        _ => Some(face),
    })
}

/// Detector, recognizer and landmarker wired together.
pub struct VisionPipeline {
    detector: Box<dyn FaceDetector>,
    recognizer: Box<dyn FaceRecognizer>,
    landmarker: Box<dyn LandmarkDetector>,
}

impl VisionPipeline {
    pub fn new(
        detector: Box<dyn FaceDetector>,
        recognizer: Box<dyn FaceRecognizer>,
        landmarker: Box<dyn LandmarkDetector>,
    ) -> Self {
        Self { detector, recognizer, landmarker }
    }

    /// Load the ONNX-backed pipeline from model file paths.
    pub fn load_onnx(scrfd_path: &str, arcface_path: &str, mesh_path: &str) -> Result<Self, VisionError> {
        let detector = ScrfdDetector::load(scrfd_path)?;
        let recognizer = ArcFaceRecognizer::load(arcface_path)?;
        let landmarker = MeshLandmarker::load(mesh_path)?;
        Ok(Self::new(Box::new(detector), Box::new(recognizer), Box::new(landmarker)))
    }

    /// Embed the largest face in the frame.
    pub fn embed(&mut self, frame: &Frame) -> Result<Embedding, VisionError> {
        let faces = self.detector.detect(frame)?;
        let face = largest_face(&faces).ok_or(VisionError::NoFaceDetected)?;
        tracing::debug!(
            faces = faces.len(),
            confidence = face.confidence,
            area = face.area(),
            "embedding largest face"
        );
        self.recognizer.embed(frame, face)
    }

    /// Landmarks of the largest face, `None` when no face is present.
    pub fn landmarks(&mut self, frame: &Frame) -> Result<Option<FaceMesh>, VisionError> {
        let faces = self.detector.detect(frame)?;
        match largest_face(&faces) {
            Some(face) => self.landmarker.landmarks(frame, face),
            None => Ok(None),
        }
    }
}
