//! Short-lived liveness challenge sessions.
//!
//! One global lock guards the map; sessions are per-user and short-lived so
//! contention stays low. Expired sessions read as absent even before the
//! sweeper removes them.

use absen_core::Challenge;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};
use thiserror::Error;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum SessionError {
    #[error("session already exists: {0}")]
    Duplicate(String),
    #[error("session not found: {0}")]
    NotFound(String),
}

/// Snapshot of one challenge session.
#[derive(Debug, Clone, PartialEq)]
pub struct ChallengeSession {
    pub id: String,
    pub challenge: Challenge,
    pub created_at: Instant,
    pub issued_at: DateTime<Utc>,
    pub verified: bool,
}

impl ChallengeSession {
    fn is_expired_at(&self, now: Instant, ttl: Duration) -> bool {
        now.saturating_duration_since(self.created_at) > ttl
    }
}

pub struct SessionStore {
    ttl: Duration,
    sessions: Mutex<HashMap<String, ChallengeSession>>,
}

impl SessionStore {
    pub fn new(ttl: Duration) -> Self {
        Self { ttl, sessions: Mutex::new(HashMap::new()) }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, ChallengeSession>> {
        // The map holds plain data; a panic elsewhere cannot leave it half-written.
        self.sessions.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register a new unverified session.
    pub fn create(&self, id: &str, challenge: Challenge) -> Result<(), SessionError> {
        self.create_at(id, challenge, Instant::now())
    }

    pub(crate) fn create_at(&self, id: &str, challenge: Challenge, now: Instant) -> Result<(), SessionError> {
        let mut sessions = self.lock();
        if sessions.contains_key(id) {
            return Err(SessionError::Duplicate(id.to_string()));
        }
        sessions.insert(
            id.to_string(),
            ChallengeSession {
                id: id.to_string(),
                challenge,
                created_at: now,
                issued_at: Utc::now(),
                verified: false,
            },
        );
        Ok(())
    }

    /// Fetch a live session. Expired sessions are `NotFound`.
    pub fn get(&self, id: &str) -> Result<ChallengeSession, SessionError> {
        self.get_at(id, Instant::now())
    }

    pub(crate) fn get_at(&self, id: &str, now: Instant) -> Result<ChallengeSession, SessionError> {
        self.lock()
            .get(id)
            .filter(|s| !s.is_expired_at(now, self.ttl))
            .cloned()
            .ok_or_else(|| SessionError::NotFound(id.to_string()))
    }

    /// Flag a session as having passed its challenge. Returns `true` only on
    /// the call that flipped the flag.
    pub fn mark_verified(&self, id: &str) -> Result<bool, SessionError> {
        self.mark_verified_at(id, Instant::now())
    }

    pub(crate) fn mark_verified_at(&self, id: &str, now: Instant) -> Result<bool, SessionError> {
        let mut sessions = self.lock();
        let session = sessions
            .get_mut(id)
            .filter(|s| !s.is_expired_at(now, self.ttl))
            .ok_or_else(|| SessionError::NotFound(id.to_string()))?;
        let newly = !session.verified;
        session.verified = true;
        Ok(newly)
    }

    /// Drop every session older than `ttl`; returns how many went.
    pub fn sweep_expired(&self, ttl: Duration) -> usize {
        self.sweep_expired_at(ttl, Instant::now())
    }

    pub(crate) fn sweep_expired_at(&self, ttl: Duration, now: Instant) -> usize {
        let mut sessions = self.lock();
        let before = sessions.len();
        sessions.retain(|_, s| !s.is_expired_at(now, ttl));
        before - sessions.len()
    }

    /// Sessions currently held, expired-but-unswept included.
    pub fn len(&self) -> usize {
        self.lock().len()
    }
}
