//! Challenge-response liveness decisions over face-mesh landmarks.
//!
//! A verify frame yields two separate facts: whether a live face was present
//! (`is_live`) and whether the requested gesture was performed
//! (`challenge_met`). Only both together pass.

use crate::types::FaceMesh;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Mesh indices of one eye, ordered p1..p6 for the eye-aspect-ratio formula.
type EyeIndices = [usize; 6];

const LEFT_EYE: EyeIndices = [33, 160, 158, 133, 153, 144];
const RIGHT_EYE: EyeIndices = [362, 385, 387, 263, 373, 380];
const NOSE_TIP: usize = 1;

pub const DEFAULT_BLINK_EAR: f32 = 0.22;
pub const DEFAULT_TURN_LEFT_NOSE_X: f32 = 0.40;
pub const DEFAULT_TURN_RIGHT_NOSE_X: f32 = 0.60;

/// Gesture a user must perform on camera.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Challenge {
    Blink,
    TurnLeft,
    TurnRight,
}

impl Challenge {
    pub const ALL: [Challenge; 3] = [Challenge::Blink, Challenge::TurnLeft, Challenge::TurnRight];

    /// Pick a challenge uniformly at random.
    pub fn random<R: Rng + ?Sized>(rng: &mut R) -> Self {
        Self::ALL[rng.gen_range(0..Self::ALL.len())]
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Challenge::Blink => "BLINK",
            Challenge::TurnLeft => "TURN_LEFT",
            Challenge::TurnRight => "TURN_RIGHT",
        }
    }

    /// Whether the mesh shows this gesture.
    pub fn is_met(self, mesh: &FaceMesh, thresholds: &LivenessThresholds) -> bool {
        match self {
            Challenge::Blink => {
                average_eye_aspect_ratio(mesh).is_some_and(|ear| ear < thresholds.blink_ear)
            }
            Challenge::TurnLeft => {
                nose_x(mesh).is_some_and(|x| x < thresholds.turn_left_nose_x)
            }
            Challenge::TurnRight => {
                nose_x(mesh).is_some_and(|x| x > thresholds.turn_right_nose_x)
            }
        }
    }
}

impl fmt::Display for Challenge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Geometric cut-offs for each challenge.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LivenessThresholds {
    /// Blink passes when the averaged EAR is strictly below this.
    pub blink_ear: f32,
    /// Turn-left passes when the normalised nose x is strictly below this.
    pub turn_left_nose_x: f32,
    /// Turn-right passes when the normalised nose x is strictly above this.
    pub turn_right_nose_x: f32,
}

impl Default for LivenessThresholds {
    fn default() -> Self {
        Self {
            blink_ear: DEFAULT_BLINK_EAR,
            turn_left_nose_x: DEFAULT_TURN_LEFT_NOSE_X,
            turn_right_nose_x: DEFAULT_TURN_RIGHT_NOSE_X,
        }
    }
}

/// Outcome of checking one frame against a challenge.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LivenessResult {
    pub is_live: bool,
    pub challenge_met: bool,
    pub error: Option<String>,
}

impl LivenessResult {
    pub fn invalid_image() -> Self {
        Self { is_live: false, challenge_met: false, error: Some("invalid image".into()) }
    }

    pub fn no_face() -> Self {
        Self { is_live: false, challenge_met: false, error: Some("no face detected".into()) }
    }

    /// Live face present and gesture performed.
    pub fn passed(&self) -> bool {
        self.is_live && self.challenge_met
    }
}

/// Decide a challenge from the landmark analysis of one frame.
pub fn assess(challenge: Challenge, mesh: Option<&FaceMesh>, thresholds: &LivenessThresholds) -> LivenessResult {
    match mesh {
        None => LivenessResult::no_face(),
        Some(mesh) => LivenessResult {
            is_live: true,
            challenge_met: challenge.is_met(mesh, thresholds),
            error: None,
        },
    }
}

fn distance(a: (f32, f32), b: (f32, f32)) -> f32 {
    ((a.0 - b.0).powi(2) + (a.1 - b.1).powi(2)).sqrt()
}

/// (|p2-p6| + |p3-p5|) / (2 |p1-p4|); `None` for missing points or a
/// zero-width eye.
pub fn eye_aspect_ratio(mesh: &FaceMesh, eye: &EyeIndices) -> Option<f32> {
    let p = |i: usize| mesh.point(eye[i]);
    let horizontal = distance(p(0)?, p(3)?);
    if horizontal <= f32::EPSILON {
        return None;
    }
    let vertical = distance(p(1)?, p(5)?) + distance(p(2)?, p(4)?);
    Some(vertical / (2.0 * horizontal))
}

/// Mean EAR of both eyes.
pub fn average_eye_aspect_ratio(mesh: &FaceMesh) -> Option<f32> {
    let left = eye_aspect_ratio(mesh, &LEFT_EYE)?;
    let right = eye_aspect_ratio(mesh, &RIGHT_EYE)?;
    Some((left + right) / 2.0)
}

fn nose_x(mesh: &FaceMesh) -> Option<f32> {
    mesh.point(NOSE_TIP).map(|(x, _)| x)
}
