//! Accept/reject policy over nearest-neighbour candidates.
//!
//! The search itself runs in the store; this only sees `(user_id, distance)`
//! pairs where distance is cosine distance, so similarity = 1 − distance.

use serde::{Deserialize, Serialize};

/// Minimum similarity for a match (inclusive).
pub const DEFAULT_SIMILARITY_THRESHOLD: f64 = 0.60;

/// One nearest-neighbour hit from the identity store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candidate {
    pub user_id: String,
    /// Cosine distance in [0, 2].
    pub distance: f64,
}

impl Candidate {
    pub fn similarity(&self) -> f64 {
        1.0 - self.distance
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Accept,
    Reject,
}

#[derive(Debug, Clone, PartialEq)]
pub enum RejectReason {
    NoCandidates,
    BelowThreshold { user_id: String, similarity: f64 },
}

#[derive(Debug, Clone, PartialEq)]
pub enum MatchDecision {
    Accept { user_id: String, similarity: f64 },
    Reject(RejectReason),
}

/// Fixed-threshold similarity policy.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MatchPolicy {
    threshold: f64,
}

impl Default for MatchPolicy {
    fn default() -> Self {
        Self { threshold: DEFAULT_SIMILARITY_THRESHOLD }
    }
}

impl MatchPolicy {
    pub fn new(threshold: f64) -> Self {
        Self { threshold }
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    pub fn decide(&self, similarity: f64) -> Verdict {
        if similarity >= self.threshold {
            Verdict::Accept
        } else {
            Verdict::Reject
        }
    }

    /// Judge the closest candidate. An empty set is rejected outright.
    pub fn evaluate(&self, candidates: &[Candidate]) -> MatchDecision {
        let best = candidates
            .iter()
            .min_by(|a, b| a.distance.total_cmp(&b.distance));

        let Some(best) = best else {
            return MatchDecision::Reject(RejectReason::NoCandidates);
        };

        let similarity = best.similarity();
        match self.decide(similarity) {
            Verdict::Accept => MatchDecision::Accept { user_id: best.user_id.clone(), similarity },
            Verdict::Reject => MatchDecision::Reject(RejectReason::BelowThreshold {
                user_id: best.user_id.clone(),
                similarity,
            }),
        }
    }
}
