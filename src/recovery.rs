use crate::api::*;
use log::debug;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub const DEFAULT_CHALLENGE_WINDOW_SECS: i64 = 24 * 60 * 60;

/// Decides how much extra a losing voter has to prove to win back part of
/// the stake. Has to be a pure function of the prediction.
pub trait RequirementPolicy {
    fn required_additional_amount(&self, prediction: &Prediction) -> u64;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "rule", rename_all = "snake_case")]
pub enum RequirementRule {
    /// Whatever is still missing to reach the target, but at least `minimum`.
    Shortfall { minimum: u64 },
    Fixed { amount: u64 },
}
impl Default for RequirementRule {
    fn default() -> Self {
        Self::Shortfall { minimum: 1 }
    }
}
impl RequirementPolicy for RequirementRule {
    fn required_additional_amount(&self, prediction: &Prediction) -> u64 {
        match *self {
            Self::Shortfall { minimum } => prediction
                .target_value
                .saturating_sub(prediction.current_value)
                .max(minimum),
            Self::Fixed { amount } => amount,
        }
    }
}

/// Sweat-equity challenges of losing voters.
pub struct RecoveryBook {
    challenges: BTreeMap<ChallengeId, SweatEquityChallenge>,
    next_id: ChallengeId,
    window: i64,
    requirement: Box<dyn RequirementPolicy + Send + Sync>,
}
impl RecoveryBook {
    pub fn new(window: i64, requirement: Box<dyn RequirementPolicy + Send + Sync>) -> Self {
        Self {
            challenges: BTreeMap::new(),
            next_id: 1,
            window,
            requirement,
        }
    }
    pub fn window(&self) -> i64 {
        self.window
    }
    /// Opens a challenge for `vote`. The caller has checked that the vote
    /// lost and is still unclaimed.
    pub(crate) fn open(
        &mut self,
        prediction: &Prediction,
        vote: &Vote,
        now: Timestamp,
    ) -> Result<ChallengeId, MarketError> {
        if let Some(existing) = self.challenge_for(prediction.id, &vote.voter) {
            match existing.status {
                ChallengeStatus::Open if now > existing.window_end => {}
                ChallengeStatus::Open => {
                    return Err(MarketError::InvalidState(format!(
                        "challenge {} is still open until {}",
                        existing.id, existing.window_end
                    )))
                }
                ChallengeStatus::Completed => {
                    return Err(MarketError::InvalidState(format!(
                        "challenge {} was already completed",
                        existing.id
                    )))
                }
                ChallengeStatus::Expired => {}
            }
        }
        let window_end = now.checked_add(self.window).ok_or_else(|| {
            MarketError::InvalidInput(format!("challenge window from {} overflows", now))
        })?;

        // Nothing can fail past this point.
        if let Some(stale) = self.challenge_for(prediction.id, &vote.voter).map(|c| c.id) {
            self.expire(stale, now)?;
        }
        let id = self.next_id;
        let challenge = SweatEquityChallenge {
            id,
            prediction: prediction.id,
            voter: vote.voter.clone(),
            required_additional_amount: self.requirement.required_additional_amount(prediction),
            window_start: now,
            window_end,
            status: ChallengeStatus::Open,
            verified_amount: None,
        };
        debug!(
            "Opened challenge {} for {} on prediction {}, {} more needed until {}",
            id, vote.voter, prediction.id, challenge.required_additional_amount, window_end
        );
        self.challenges.insert(id, challenge);
        self.next_id += 1;
        Ok(id)
    }
    pub fn complete(
        &mut self,
        challenge: ChallengeId,
        now: Timestamp,
        proof: VerifiedProof,
    ) -> Result<(), MarketError> {
        let current = self
            .challenges
            .get_mut(&challenge)
            .ok_or_else(|| MarketError::challenge_not_found(challenge))?;
        match current.status {
            ChallengeStatus::Completed => return Err(MarketError::AlreadyCompleted(challenge)),
            ChallengeStatus::Expired => {
                return Err(MarketError::WindowClosed {
                    challenge,
                    window_end: current.window_end,
                })
            }
            ChallengeStatus::Open => {}
        }
        if now > current.window_end {
            return Err(MarketError::WindowClosed {
                challenge,
                window_end: current.window_end,
            });
        }
        if now < current.window_start {
            return Err(MarketError::InvalidState(format!(
                "challenge {} opens at {}",
                challenge, current.window_start
            )));
        }
        if proof.amount < current.required_additional_amount {
            return Err(MarketError::InvalidInput(format!(
                "proof covers {} but {} are required",
                proof.amount, current.required_additional_amount
            )));
        }
        current.status = ChallengeStatus::Completed;
        current.verified_amount = Some(proof.amount);
        Ok(())
    }
    /// Expires an open challenge whose window has passed. Calling it on any
    /// other challenge leaves it untouched.
    pub fn expire(
        &mut self,
        challenge: ChallengeId,
        now: Timestamp,
    ) -> Result<ChallengeStatus, MarketError> {
        let current = self
            .challenges
            .get_mut(&challenge)
            .ok_or_else(|| MarketError::challenge_not_found(challenge))?;
        if current.status == ChallengeStatus::Open && now > current.window_end {
            current.status = ChallengeStatus::Expired;
            debug!("Challenge {} expired", challenge);
        }
        Ok(current.status)
    }
    pub fn expire_due(&mut self, now: Timestamp) -> Vec<ChallengeId> {
        let mut expired = vec![];
        for challenge in self.challenges.values_mut() {
            if challenge.status == ChallengeStatus::Open && now > challenge.window_end {
                challenge.status = ChallengeStatus::Expired;
                expired.push(challenge.id);
            }
        }
        expired
    }
    pub fn challenge(&self, id: ChallengeId) -> Result<&SweatEquityChallenge, MarketError> {
        self.challenges
            .get(&id)
            .ok_or_else(|| MarketError::challenge_not_found(id))
    }
    /// Latest challenge of a voter on a prediction.
    pub fn challenge_for(
        &self,
        prediction: PredictionId,
        voter: &str,
    ) -> Option<&SweatEquityChallenge> {
        self.challenges
            .values()
            .rev()
            .find(|c| c.prediction == prediction && c.voter == voter)
    }
    pub fn has_completed(&self, prediction: PredictionId, voter: &str) -> bool {
        self.challenges.values().any(|c| {
            c.prediction == prediction && c.voter == voter && c.status == ChallengeStatus::Completed
        })
    }
    pub fn challenges_on(&self, prediction: PredictionId) -> Vec<&SweatEquityChallenge> {
        self.challenges
            .values()
            .filter(|c| c.prediction == prediction)
            .collect()
    }
    pub fn all(&self) -> impl Iterator<Item = &SweatEquityChallenge> {
        self.challenges.values()
    }
    pub fn next_id(&self) -> ChallengeId {
        self.next_id
    }
    pub(crate) fn restore(
        &mut self,
        prediction: PredictionId,
        challenges: Vec<SweatEquityChallenge>,
        next_id: ChallengeId,
    ) {
        self.challenges.retain(|_, c| c.prediction != prediction);
        for challenge in challenges {
            self.load(challenge);
        }
        self.next_id = next_id;
    }
    pub(crate) fn load(&mut self, challenge: SweatEquityChallenge) {
        self.next_id = self.next_id.max(challenge.id + 1);
        self.challenges.insert(challenge.id, challenge);
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn resolved(target_value: u64, current_value: u64) -> Prediction {
        Prediction {
            id: 1,
            creator: "alice".into(),
            title: "pushups".into(),
            description: String::new(),
            target_date: 1000,
            target_value,
            current_value,
            category: Category::Fitness,
            total_staked: 15,
            yes_votes: 10,
            no_votes: 5,
            status: PredictionStatus::Resolved,
            outcome: Outcome::Yes,
            auto_resolvable: true,
            created_at: 0,
            resolved_at: Some(1000),
        }
    }
    fn losing_vote() -> Vote {
        Vote {
            prediction: 1,
            voter: "carol".into(),
            is_yes: false,
            amount: 5,
            claimed: false,
            created_at: 1,
        }
    }
    fn book() -> RecoveryBook {
        RecoveryBook::new(
            DEFAULT_CHALLENGE_WINDOW_SECS,
            Box::new(RequirementRule::default()),
        )
    }

    #[test]
    fn requirement_rules() {
        assert_eq!(
            RequirementRule::Shortfall { minimum: 1 }.required_additional_amount(&resolved(100, 70)),
            30
        );
        assert_eq!(
            RequirementRule::Shortfall { minimum: 10 }
                .required_additional_amount(&resolved(100, 120)),
            10
        );
        assert_eq!(
            RequirementRule::Fixed { amount: 25 }.required_additional_amount(&resolved(100, 0)),
            25
        );
    }
    #[test]
    fn window_is_inclusive_at_both_ends() {
        let mut book = book();
        let id = book.open(&resolved(100, 70), &losing_vote(), 2000).unwrap();
        let challenge = book.challenge(id).unwrap().clone();
        assert_eq!(challenge.window_end, 2000 + DEFAULT_CHALLENGE_WINDOW_SECS);
        assert_eq!(challenge.required_additional_amount, 30);

        assert!(matches!(
            book.complete(id, challenge.window_end + 1, VerifiedProof { amount: 30 }),
            Err(MarketError::WindowClosed { .. })
        ));
        book.complete(id, challenge.window_end, VerifiedProof { amount: 30 })
            .unwrap();
        assert_eq!(book.challenge(id).unwrap().verified_amount, Some(30));
        assert_eq!(
            book.complete(id, challenge.window_end, VerifiedProof { amount: 30 }),
            Err(MarketError::AlreadyCompleted(id))
        );
        assert!(book.has_completed(1, "carol"));
    }
    #[test]
    fn short_proofs_are_rejected_without_closing_the_challenge() {
        let mut book = book();
        let id = book.open(&resolved(100, 70), &losing_vote(), 2000).unwrap();
        assert!(matches!(
            book.complete(id, 2100, VerifiedProof { amount: 29 }),
            Err(MarketError::InvalidInput(_))
        ));
        assert_eq!(book.challenge(id).unwrap().status, ChallengeStatus::Open);
    }
    #[test]
    fn expire_is_idempotent() {
        let mut book = book();
        let id = book.open(&resolved(100, 70), &losing_vote(), 2000).unwrap();
        let end = book.challenge(id).unwrap().window_end;
        assert_eq!(book.expire(id, end).unwrap(), ChallengeStatus::Open);
        assert_eq!(book.expire(id, end + 1).unwrap(), ChallengeStatus::Expired);
        assert_eq!(book.expire(id, end + 50).unwrap(), ChallengeStatus::Expired);
        assert!(matches!(
            book.complete(id, end, VerifiedProof { amount: 30 }),
            Err(MarketError::WindowClosed { .. })
        ));
        assert!(book.expire(99, end).is_err());
    }
    #[test]
    fn only_one_live_challenge_per_vote() {
        let mut book = book();
        let first = book.open(&resolved(100, 70), &losing_vote(), 2000).unwrap();
        assert!(matches!(
            book.open(&resolved(100, 70), &losing_vote(), 2001),
            Err(MarketError::InvalidState(_))
        ));
        let end = book.challenge(first).unwrap().window_end;
        // A stale open challenge gets expired and replaced.
        let second = book.open(&resolved(100, 70), &losing_vote(), end + 1).unwrap();
        assert_eq!(
            book.challenge(first).unwrap().status,
            ChallengeStatus::Expired
        );
        assert_eq!(book.challenge_for(1, "carol").unwrap().id, second);
        assert_eq!(book.expire_due(end + 2), Vec::<ChallengeId>::new());
        let second_end = book.challenge(second).unwrap().window_end;
        assert_eq!(book.expire_due(second_end + 1), vec![second]);
        // Each retry gets a fresh window of the same length.
        let third = book
            .open(&resolved(100, 70), &losing_vote(), second_end + 2)
            .unwrap();
        let third = book.challenge(third).unwrap();
        assert_eq!(third.window_start, second_end + 2);
        assert_eq!(
            third.window_end - third.window_start,
            DEFAULT_CHALLENGE_WINDOW_SECS
        );
    }
    #[test]
    fn proofs_before_the_window_opens_are_rejected() {
        let mut book = book();
        let id = book.open(&resolved(100, 70), &losing_vote(), 2000).unwrap();
        assert!(matches!(
            book.complete(id, 1999, VerifiedProof { amount: 30 }),
            Err(MarketError::InvalidState(_))
        ));
        let challenge = book.challenge(id).unwrap();
        assert_eq!(challenge.status, ChallengeStatus::Open);
        assert_eq!(challenge.verified_amount, None);
        book.complete(id, 2000, VerifiedProof { amount: 30 }).unwrap();
        assert!(book.has_completed(1, "carol"));
    }
}
