use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::*;

/// Every way an engine operation can be rejected. A rejected operation
/// leaves all state exactly as it was.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum MarketError {
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("{0} not found")]
    NotFound(String),
    #[error("invalid state: {0}")]
    InvalidState(String),
    #[error("challenge {challenge} window closed at {window_end}")]
    WindowClosed {
        challenge: ChallengeId,
        window_end: Timestamp,
    },
    #[error("challenge {0} was already completed")]
    AlreadyCompleted(ChallengeId),
    #[error("vote of {voter} on prediction {prediction} was already claimed")]
    AlreadyClaimed {
        prediction: PredictionId,
        voter: UserId,
    },
    #[error("not eligible: {0}")]
    NotEligible(String),
    #[error("access denied: {0}")]
    Unauthorized(String),
    #[error("paying {requested} would exceed the {remaining} left in the pool of prediction {prediction}")]
    InsufficientPool {
        prediction: PredictionId,
        requested: Amount,
        remaining: Amount,
    },
}
impl MarketError {
    pub fn prediction_not_found(id: PredictionId) -> Self {
        Self::NotFound(format!("prediction {}", id))
    }
    pub fn vote_not_found(prediction: PredictionId, voter: &str) -> Self {
        Self::NotFound(format!("vote of {} on prediction {}", voter, prediction))
    }
    pub fn challenge_not_found(id: ChallengeId) -> Self {
        Self::NotFound(format!("challenge {}", id))
    }
}
