use serde::{Deserialize, Serialize};

pub type Amount = u64;
pub type Timestamp = i64;
pub type UserId = String;
pub type PredictionId = i64;
pub type ChallengeId = i64;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Prediction {
    pub id: PredictionId,
    pub creator: UserId,
    pub title: String,
    pub description: String,
    pub target_date: Timestamp,
    pub target_value: u64,
    pub current_value: u64,
    pub category: Category,
    pub total_staked: Amount,
    pub yes_votes: Amount,
    pub no_votes: Amount,
    pub status: PredictionStatus,
    pub outcome: Outcome,
    pub auto_resolvable: bool,
    pub created_at: Timestamp,
    pub resolved_at: Option<Timestamp>,
}
impl Prediction {
    /// Stake on the given side.
    pub fn side_total(&self, is_yes: bool) -> Amount {
        if is_yes {
            self.yes_votes
        } else {
            self.no_votes
        }
    }
    /// `Some(true)` for YES, `Some(false)` for NO, `None` while unresolved.
    pub fn winning_side(&self) -> Option<bool> {
        match (self.status, self.outcome) {
            (PredictionStatus::Resolved, Outcome::Yes) => Some(true),
            (PredictionStatus::Resolved, Outcome::No) => Some(false),
            _ => None,
        }
    }
}
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Vote {
    pub prediction: PredictionId,
    pub voter: UserId,
    pub is_yes: bool,
    pub amount: Amount,
    pub claimed: bool,
    pub created_at: Timestamp,
}
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SweatEquityChallenge {
    pub id: ChallengeId,
    pub prediction: PredictionId,
    pub voter: UserId,
    pub required_additional_amount: u64,
    pub window_start: Timestamp,
    pub window_end: Timestamp,
    pub status: ChallengeStatus,
    pub verified_amount: Option<u64>,
}
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct VerifiedProof {
    pub amount: u64,
}
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Evidence {
    pub source: String,
    pub reported_amount: u64,
}
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct FeeSplit {
    pub charity: Amount,
    pub maintenance: Amount,
    pub net: Amount,
}
impl FeeSplit {
    pub fn gross(&self) -> Amount {
        self.charity + self.maintenance + self.net
    }
}
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Payout {
    pub prediction: PredictionId,
    pub voter: UserId,
    pub kind: PayoutKind,
    pub gross: Amount,
    pub fees: FeeSplit,
    pub paid_at: Timestamp,
    /// False until custody accepted every part of the payout.
    #[serde(default)]
    pub transferred: bool,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum Category {
    Fitness,
    Chain,
    Community,
    Custom,
}
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum PredictionStatus {
    Active,
    Resolved,
    Cancelled,
}
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum Outcome {
    Unresolved,
    Yes,
    No,
}
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ChallengeStatus {
    Open,
    Completed,
    Expired,
}
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum PayoutKind {
    Winnings,
    Recovery,
    Refund,
}
/// Who is asking for a resolution or cancellation.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum Authority {
    Public,
    Oracle,
}
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub enum UserRole {
    User,
    Oracle,
    Admin,
}
impl UserRole {
    pub fn authority(&self) -> Authority {
        match self {
            Self::User => Authority::Public,
            Self::Oracle | Self::Admin => Authority::Oracle,
        }
    }
}
/// Where custody sends value after a claim.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Recipient {
    User(UserId),
    Charity,
    Maintenance,
}
