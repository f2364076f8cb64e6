use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::*;

/// Identity handed over by the session layer in front of the service.
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq, Eq)]
pub struct Session {
    pub user: UserId,
}
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct PostRequest<T> {
    pub session: Session,
    pub data: T,
}
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct NewPredictionRequest {
    pub title: String,
    pub description: String,
    pub target_date: DateTime<Utc>,
    pub target_value: u64,
    pub category: Category,
    pub auto_resolvable: bool,
}
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct VoteRequest {
    pub prediction: PredictionId,
    pub voter: UserId,
    pub is_yes: bool,
    pub amount: Amount,
}
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ProgressRequest {
    pub prediction: PredictionId,
    pub current_value: u64,
}
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ResolveRequest {
    pub prediction: PredictionId,
    pub outcome: Option<Outcome>,
    #[serde(default)]
    pub force: bool,
}
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct CompleteChallengeRequest {
    pub challenge: ChallengeId,
    pub evidence: Evidence,
}
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct ChallengeRequest {
    pub challenge: ChallengeId,
}
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct PredictionRequest {
    pub prediction: PredictionId,
}
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct PredictionUserRequest {
    pub prediction: PredictionId,
    pub user: UserId,
}
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct UserRequest {
    pub user: UserId,
}
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Default)]
pub struct PredictionsFilter {
    pub status: Option<PredictionStatus>,
    pub category: Option<Category>,
    pub creator: Option<UserId>,
}
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct LeaderboardRequest {
    pub limit: usize,
}
