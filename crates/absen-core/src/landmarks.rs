//! Dense face-mesh landmarks via ONNX Runtime.
//!
//! Expects a 468-point face-mesh export taking a 1×192×192×3 (NHWC) RGB
//! tensor in [0, 1]. Output 0 holds x/y/z triples in crop pixels; an optional
//! output 1 holds a face-presence logit.

use crate::alignment::{self, Similarity};
use crate::frame::Frame;
use crate::types::{BoundingBox, FaceMesh};
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use std::path::Path;
use thiserror::Error;

const MESH_INPUT_SIZE: u32 = 192;
/// Extra context around the detector box, per side, as a fraction of its size.
const MESH_CROP_MARGIN: f32 = 0.25;
const MESH_PRESENCE_THRESHOLD: f32 = 0.5;

#[derive(Error, Debug)]
pub enum LandmarkError {
    #[error("model file not found: {0}")]
    ModelNotFound(String),
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

/// Face-mesh landmark regressor.
pub struct MeshLandmarker {
    session: Session,
    has_presence: bool,
}

impl MeshLandmarker {
    pub fn load(model_path: &str) -> Result<Self, LandmarkError> {
        if !Path::new(model_path).exists() {
            return Err(LandmarkError::ModelNotFound(model_path.to_string()));
        }

        let session = Session::builder()?
            .with_intra_threads(2)?
            .commit_from_file(model_path)?;

        tracing::info!(
            path = model_path,
            outputs = ?session.outputs().iter().map(|o| o.name()).collect::<Vec<_>>(),
            "loaded face mesh model"
        );

        let has_presence = session.outputs().len() > 1;
        Ok(Self { session, has_presence })
    }

    /// Regress the mesh for `face`. `None` when the model reports no face in
    /// the crop.
    pub fn infer(&mut self, frame: &Frame, face: &BoundingBox) -> Result<Option<FaceMesh>, LandmarkError> {
        let transform = crop_transform(face, MESH_INPUT_SIZE);
        let crop = alignment::warp(frame, &transform, MESH_INPUT_SIZE);

        let size = MESH_INPUT_SIZE as usize;
        let mut input = Array4::<f32>::zeros((1, size, size, 3));
        for (x, y, px) in crop.enumerate_pixels() {
            for c in 0..3 {
                input[[0, y as usize, x as usize, c]] = f32::from(px.0[c]) / 255.0;
            }
        }

        let outputs = self.session.run(ort::inputs![TensorRef::from_array_view(input.view())?])?;

        if self.has_presence {
            let (_, logit) = outputs[1]
                .try_extract_tensor::<f32>()
                .map_err(|e| LandmarkError::InferenceFailed(format!("presence score: {e}")))?;
            let presence = logit.first().map(|&l| sigmoid(l)).unwrap_or(0.0);
            if presence < MESH_PRESENCE_THRESHOLD {
                tracing::debug!(presence, "face mesh reports no face in crop");
                return Ok(None);
            }
        }

        let (_, raw) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| LandmarkError::InferenceFailed(format!("landmarks: {e}")))?;

        mesh_from_raw(raw, &transform, frame.width(), frame.height())
            .map(Some)
            .ok_or_else(|| {
                LandmarkError::InferenceFailed(format!(
                    "expected {} landmark values, got {}",
                    FaceMesh::POINT_COUNT * 3,
                    raw.len()
                ))
            })
    }
}

fn sigmoid(x: f32) -> f32 {
    1.0 / (1.0 + (-x).exp())
}

/// Transform from frame pixels into a square crop of `size` around `face`.
fn crop_transform(face: &BoundingBox, size: u32) -> Similarity {
    let side = face.width.max(face.height).max(1.0) * (1.0 + 2.0 * MESH_CROP_MARGIN);
    let left = face.x + face.width / 2.0 - side / 2.0;
    let top = face.y + face.height / 2.0 - side / 2.0;
    let a = size as f32 / side;
    Similarity { a, b: 0.0, tx: -left * a, ty: -top * a }
}

/// Map x/y/z triples in crop pixels to whole-frame coordinates in [0, 1].
fn mesh_from_raw(raw: &[f32], transform: &Similarity, width: u32, height: u32) -> Option<FaceMesh> {
    if raw.len() < FaceMesh::POINT_COUNT * 3 || width == 0 || height == 0 {
        return None;
    }
    let points = raw
        .chunks_exact(3)
        .take(FaceMesh::POINT_COUNT)
        .map(|p| {
            transform
                .invert((p[0], p[1]))
                .map(|(x, y)| (x / width as f32, y / height as f32))
        })
        .collect::<Option<Vec<_>>>()?;
    Some(FaceMesh::new(points))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn face(x: f32, y: f32, w: f32, h: f32) -> BoundingBox {
        BoundingBox { x, y, width: w, height: h, confidence: 0.9, landmarks: None }
    }

    #[test]
    fn test_crop_transform_centres_face() {
        let t = crop_transform(&face(100.0, 50.0, 80.0, 100.0), MESH_INPUT_SIZE);
        let (cx, cy) = t.apply((140.0, 100.0));
        assert!((cx - 96.0).abs() < 1e-3 && (cy - 96.0).abs() < 1e-3, "({cx}, {cy})");
        // side = 100 * 1.5 = 150 px
        assert!((t.a - 192.0 / 150.0).abs() < 1e-6);
    }

    #[test]
    fn test_mesh_from_raw_maps_to_normalised_frame() {
        let t = crop_transform(&face(100.0, 50.0, 80.0, 100.0), MESH_INPUT_SIZE);
        let mut raw = vec![0.0f32; FaceMesh::POINT_COUNT * 3];
        raw[3] = 96.0; // point 1 at crop centre
        raw[4] = 96.0;
        let mesh = mesh_from_raw(&raw, &t, 280, 200).unwrap();
        assert_eq!(mesh.points.len(), FaceMesh::POINT_COUNT);
        let (x, y) = mesh.point(1).unwrap();
        assert!((x - 0.5).abs() < 1e-4 && (y - 0.5).abs() < 1e-4, "({x}, {y})");
    }

    #[test]
    fn test_mesh_from_raw_rejects_short_output() {
        let t = crop_transform(&face(0.0, 0.0, 10.0, 10.0), MESH_INPUT_SIZE);
        assert!(mesh_from_raw(&[0.0; 30], &t, 100, 100).is_none());
    }

    #[test]
    fn test_sigmoid_midpoint() {
        assert!((sigmoid(0.0) - 0.5).abs() < 1e-6);
        assert!(sigmoid(6.0) > 0.99);
    }
}
