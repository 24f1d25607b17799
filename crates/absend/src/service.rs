//! Enrollment and liveness-gated attendance flows.

use crate::engine::{EngineError, EngineHandle};
use crate::session::{SessionError, SessionStore};
use crate::store::{AttendanceRecord, FaceStore, StoreError};
use absen_core::liveness::{self, LivenessResult, LivenessThresholds};
use absen_core::{Challenge, MatchDecision, MatchPolicy, RejectReason, VisionError};
use serde::Serialize;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};
use uuid::Uuid;

#[derive(Error, Debug)]
pub enum AbsenError {
    #[error("{0}")]
    InvalidRequest(String),
    #[error("invalid image")]
    InvalidImage,
    #[error("No face detected")]
    NoFaceDetected,
    #[error("User already enrolled: {0}")]
    DuplicateIdentity(String),
    #[error("Session not found")]
    SessionNotFound,
    #[error("Liveness not verified")]
    LivenessNotVerified,
    #[error("No matching employee found")]
    NoCandidate,
    #[error("Face not recognized (low confidence)")]
    LowConfidence,
    #[error("storage failure: {0}")]
    Storage(StoreError),
    #[error("internal error: {0}")]
    Internal(String),
}

impl From<StoreError> for AbsenError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::DuplicateIdentity(user_id) => AbsenError::DuplicateIdentity(user_id),
            other => AbsenError::Storage(other),
        }
    }
}

impl From<SessionError> for AbsenError {
    fn from(e: SessionError) -> Self {
        match e {
            SessionError::NotFound(_) => AbsenError::SessionNotFound,
            SessionError::Duplicate(id) => AbsenError::Internal(format!("session id collision: {id}")),
        }
    }
}

impl From<EngineError> for AbsenError {
    fn from(e: EngineError) -> Self {
        match e {
            EngineError::Vision(VisionError::Frame(_)) => AbsenError::InvalidImage,
            EngineError::Vision(VisionError::NoFaceDetected) => AbsenError::NoFaceDetected,
            other => AbsenError::Internal(other.to_string()),
        }
    }
}

/// Issued by `start_liveness`.
#[derive(Debug, Clone, Serialize)]
pub struct LivenessChallenge {
    pub session_id: String,
    pub challenge: Challenge,
}

/// Accepted check-in.
#[derive(Debug, Clone, Serialize)]
pub struct AttendanceReceipt {
    pub user_id: String,
    pub confidence: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct ServiceStatus {
    pub version: &'static str,
    pub active_sessions: usize,
    pub enrolled_identities: u64,
    pub similarity_threshold: f64,
    pub session_ttl_secs: u64,
}

pub struct AttendanceService {
    sessions: Arc<SessionStore>,
    engine: EngineHandle,
    store: FaceStore,
    policy: MatchPolicy,
    thresholds: LivenessThresholds,
    candidate_limit: usize,
}

impl AttendanceService {
    pub fn new(
        sessions: Arc<SessionStore>,
        engine: EngineHandle,
        store: FaceStore,
        policy: MatchPolicy,
        thresholds: LivenessThresholds,
        candidate_limit: usize,
    ) -> Self {
        Self { sessions, engine, store, policy, thresholds, candidate_limit: candidate_limit.max(1) }
    }

    pub fn sessions(&self) -> &Arc<SessionStore> {
        &self.sessions
    }

    /// Embed the largest face in `image` and persist it under `user_id`,
    /// stored exactly as given. No liveness check is required to enroll.
    pub async fn enroll(&self, user_id: &str, image: Vec<u8>) -> Result<(), AbsenError> {
        if user_id.is_empty() {
            return Err(AbsenError::InvalidRequest("user_id must not be empty".into()));
        }

        let embedding = self.engine.embed(image).await?;
        self.store.insert_identity(user_id, &embedding).await?;
        info!(user_id, dimension = embedding.dimension(), "identity enrolled");
        Ok(())
    }

    /// Open a new session with a uniformly random challenge.
    pub fn start_liveness(&self) -> Result<LivenessChallenge, AbsenError> {
        let session_id = Uuid::new_v4().to_string();
        let challenge = Challenge::random(&mut rand::thread_rng());
        self.sessions.create(&session_id, challenge)?;
        debug!(session_id = %session_id, %challenge, "liveness challenge issued");
        Ok(LivenessChallenge { session_id, challenge })
    }

    /// Check one frame against the session's challenge. `Ok(false)` covers
    /// an unmet gesture, a missing face and an undecodable image alike.
    pub async fn verify_liveness(&self, session_id: &str, image: Vec<u8>) -> Result<bool, AbsenError> {
        let session = self.sessions.get(session_id)?;

        let result = match self.engine.landmarks(image).await {
            Ok(mesh) => liveness::assess(session.challenge, mesh.as_ref(), &self.thresholds),
            Err(EngineError::Vision(VisionError::Frame(_))) => LivenessResult::invalid_image(),
            Err(e) => return Err(e.into()),
        };

        if !result.passed() {
            debug!(
                session_id,
                challenge = %session.challenge,
                issued_at = %session.issued_at,
                is_live = result.is_live,
                error = result.error.as_deref().unwrap_or(""),
                "liveness frame rejected"
            );
            return Ok(false);
        }

        // Expiry during inference surfaces here as NotFound.
        if self.sessions.mark_verified(session_id)? {
            info!(session_id = %session.id, challenge = %session.challenge, "liveness verified");
        }
        Ok(true)
    }

    /// Match the presented face and log attendance on acceptance. The
    /// session stays verified; rejected attempts leave no record.
    pub async fn submit_attendance(&self, session_id: &str, image: Vec<u8>) -> Result<AttendanceReceipt, AbsenError> {
        let session = self.sessions.get(session_id)?;
        if !session.verified {
            return Err(AbsenError::LivenessNotVerified);
        }

        let embedding = self.engine.embed(image).await?;
        let candidates = self.store.nearest(&embedding, self.candidate_limit).await?;

        match self.policy.evaluate(&candidates) {
            MatchDecision::Accept { user_id, similarity } => {
                let confidence = similarity.clamp(0.0, 1.0);
                self.store.log_attendance(&user_id, confidence).await?;
                info!(session_id, user_id = %user_id, confidence, "attendance recorded");
                Ok(AttendanceReceipt { user_id, confidence })
            }
            MatchDecision::Reject(RejectReason::NoCandidates) => {
                warn!(session_id, "attendance rejected: no enrolled identities");
                Err(AbsenError::NoCandidate)
            }
            MatchDecision::Reject(RejectReason::BelowThreshold { user_id, similarity }) => {
                warn!(
                    session_id,
                    closest = %user_id,
                    similarity,
                    threshold = self.policy.threshold(),
                    "attendance rejected: low confidence"
                );
                Err(AbsenError::LowConfidence)
            }
        }
    }

    pub async fn status(&self) -> Result<ServiceStatus, AbsenError> {
        Ok(ServiceStatus {
            version: env!("CARGO_PKG_VERSION"),
            active_sessions: self.sessions.len(),
            enrolled_identities: self.store.identity_count().await?,
            similarity_threshold: self.policy.threshold(),
            session_ttl_secs: self.sessions.ttl().as_secs(),
        })
    }

    /// Attendance history for one user, oldest first.
    pub async fn attendance_for(&self, user_id: &str) -> Result<Vec<AttendanceRecord>, AbsenError> {
        Ok(self.store.attendance_for(user_id).await?)
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use crate::engine::testing::scripted_engine;
    use absen_core::FaceMesh;
    use std::time::Duration;

    /// Service over a scripted engine and an in-memory store.
    pub async fn scripted_service(
        embeddings: &[(u8, Vec<f32>)],
        meshes: &[(u8, FaceMesh)],
    ) -> AttendanceService {
        scripted_service_with_ttl(embeddings, meshes, Duration::from_secs(300)).await
    }

    pub async fn scripted_service_with_ttl(
        embeddings: &[(u8, Vec<f32>)],
        meshes: &[(u8, FaceMesh)],
        ttl: Duration,
    ) -> AttendanceService {
        AttendanceService::new(
            Arc::new(SessionStore::new(ttl)),
            scripted_engine(embeddings, meshes),
            FaceStore::open_in_memory().await.expect("in-memory store"),
            MatchPolicy::default(),
            LivenessThresholds::default(),
            1,
        )
    }
}
