use serde::{Deserialize, Serialize};

use super::*;

/// Pool shares in parts per million. The multipliers are the gross payout
/// per staked unit a winner of that side would get, also in ppm, before fees.
#[derive(PartialEq, Debug, Serialize, Deserialize, Clone, Eq)]
pub struct OddsResponse {
    pub prediction: PredictionId,
    pub yes_share_ppm: u32,
    pub no_share_ppm: u32,
    pub yes_multiplier_ppm: Option<u64>,
    pub no_multiplier_ppm: Option<u64>,
}
#[derive(PartialEq, Debug, Serialize, Deserialize, Clone, Eq)]
pub struct LeaderboardEntry {
    pub user: UserId,
    pub total_staked: Amount,
    pub predictions: u32,
    pub total_net_paid: Amount,
}
#[derive(PartialEq, Debug, Serialize, Deserialize, Clone, Eq, Default)]
pub struct StatsResponse {
    pub predictions: u32,
    pub active: u32,
    pub resolved: u32,
    pub cancelled: u32,
    pub total_staked: Amount,
    pub total_disbursed: Amount,
    /// Part of `total_disbursed` paid from the recovery reserve.
    pub total_recovered: Amount,
    pub charity_collected: Amount,
    pub maintenance_collected: Amount,
    pub open_challenges: u32,
    pub completed_challenges: u32,
}
#[derive(PartialEq, Debug, Serialize, Deserialize, Clone, Eq)]
pub struct BalanceEntry {
    pub recipient: Recipient,
    pub amount: Amount,
}
#[derive(PartialEq, Debug, Serialize, Deserialize, Clone, Eq)]
pub struct ResolveResponse {
    pub prediction: PredictionId,
    pub outcome: Outcome,
}
