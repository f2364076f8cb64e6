use crate::api::*;
use crate::fees::FeePolicy;
use crate::ledger::{Ledger, NewPrediction};
use crate::payout::{PayoutCalculator, DEFAULT_RECOVERY_PERCENT};
use crate::recovery::{RecoveryBook, RequirementRule, DEFAULT_CHALLENGE_WINDOW_SECS};
use crate::resolution::{Resolution, ResolutionEngine};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EngineConfig {
    pub fees: FeePolicy,
    pub recovery_percent: u8,
    pub challenge_window_secs: i64,
    pub requirement: RequirementRule,
}
impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            fees: FeePolicy::default(),
            recovery_percent: DEFAULT_RECOVERY_PERCENT,
            challenge_window_secs: DEFAULT_CHALLENGE_WINDOW_SECS,
            requirement: RequirementRule::default(),
        }
    }
}

/// A prediction with everything that hangs off it. Unit of persistence.
#[derive(Debug, Clone, PartialEq)]
pub struct Scope {
    pub prediction: Prediction,
    pub votes: Vec<Vote>,
    pub challenges: Vec<SweatEquityChallenge>,
    pub payouts: Vec<Payout>,
}

/// State of one prediction scope and the id counters before an operation.
#[derive(Debug, Clone)]
pub struct ScopeSnapshot {
    prediction: PredictionId,
    scope: Option<Scope>,
    next_prediction: PredictionId,
    next_challenge: ChallengeId,
}
impl ScopeSnapshot {
    pub fn prediction(&self) -> PredictionId {
        self.prediction
    }
}

/// The settlement engine. Every mutating call either applies completely or
/// returns an error and leaves the engine untouched.
pub struct Engine {
    ledger: Ledger,
    fees: FeePolicy,
    recovery: RecoveryBook,
    payouts: PayoutCalculator,
}
impl Engine {
    pub fn new(config: EngineConfig) -> Result<Self, MarketError> {
        if config.challenge_window_secs <= 0 {
            return Err(MarketError::InvalidInput(format!(
                "challenge window was {}s but has to be positive",
                config.challenge_window_secs
            )));
        }
        Ok(Self {
            ledger: Ledger::default(),
            fees: config.fees,
            recovery: RecoveryBook::new(
                config.challenge_window_secs,
                Box::new(config.requirement),
            ),
            payouts: PayoutCalculator::new(config.recovery_percent)?,
        })
    }
    pub fn fees(&self) -> &FeePolicy {
        &self.fees
    }

    // Ledger
    pub fn create_prediction(
        &mut self,
        creator: &str,
        fields: NewPrediction,
        now: Timestamp,
    ) -> Result<PredictionId, MarketError> {
        self.ledger.create_prediction(creator, fields, now)
    }
    pub fn vote(
        &mut self,
        prediction: PredictionId,
        voter: &str,
        is_yes: bool,
        amount: Amount,
        now: Timestamp,
    ) -> Result<Vote, MarketError> {
        self.ledger.vote(prediction, voter, is_yes, amount, now)
    }
    pub fn record_progress(
        &mut self,
        prediction: PredictionId,
        current_value: u64,
    ) -> Result<(), MarketError> {
        self.ledger.record_progress(prediction, current_value)
    }
    pub fn get_prediction(&self, id: PredictionId) -> Result<&Prediction, MarketError> {
        self.ledger.get_prediction(id)
    }
    pub fn get_user_vote(&self, id: PredictionId, voter: &str) -> Result<&Vote, MarketError> {
        self.ledger.get_user_vote(id, voter)
    }
    pub fn predictions(&self, filter: &PredictionsFilter) -> Vec<&Prediction> {
        self.ledger.predictions(filter)
    }
    pub fn votes_of(&self, voter: &str) -> Vec<&Vote> {
        self.ledger.votes_of(voter)
    }
    pub fn votes_on(&self, prediction: PredictionId) -> Vec<&Vote> {
        self.ledger.votes_on(prediction)
    }

    // Resolution
    pub fn resolve(
        &mut self,
        prediction: PredictionId,
        resolution: Resolution,
        authority: Authority,
        now: Timestamp,
    ) -> Result<Outcome, MarketError> {
        ResolutionEngine::resolve(&mut self.ledger, prediction, resolution, authority, now)
    }
    pub fn cancel(
        &mut self,
        prediction: PredictionId,
        authority: Authority,
        caller: &str,
        now: Timestamp,
    ) -> Result<(), MarketError> {
        ResolutionEngine::cancel(&mut self.ledger, prediction, authority, caller, now)
    }

    // Recovery
    pub fn open_challenge(
        &mut self,
        prediction: PredictionId,
        voter: &str,
        now: Timestamp,
    ) -> Result<ChallengeId, MarketError> {
        let current = self.ledger.get_prediction(prediction)?;
        let winning_side = match current.winning_side() {
            Some(side) => side,
            None => {
                return Err(MarketError::InvalidState(format!(
                    "prediction {} is {} and not resolved",
                    prediction, current.status
                )))
            }
        };
        let vote = self.ledger.get_user_vote(prediction, voter)?;
        if vote.is_yes == winning_side {
            return Err(MarketError::NotEligible(format!(
                "{} won prediction {} and has nothing to recover",
                voter, prediction
            )));
        }
        if vote.claimed {
            return Err(MarketError::AlreadyClaimed {
                prediction,
                voter: voter.to_string(),
            });
        }
        self.recovery.open(current, vote, now)
    }
    pub fn complete_challenge(
        &mut self,
        challenge: ChallengeId,
        now: Timestamp,
        proof: VerifiedProof,
    ) -> Result<(), MarketError> {
        self.recovery.complete(challenge, now, proof)
    }
    pub fn expire_challenge(
        &mut self,
        challenge: ChallengeId,
        now: Timestamp,
    ) -> Result<ChallengeStatus, MarketError> {
        self.recovery.expire(challenge, now)
    }
    pub fn expire_due(&mut self, now: Timestamp) -> Vec<ChallengeId> {
        self.recovery.expire_due(now)
    }
    pub fn challenge(&self, id: ChallengeId) -> Result<&SweatEquityChallenge, MarketError> {
        self.recovery.challenge(id)
    }
    pub fn challenges_on(&self, prediction: PredictionId) -> Vec<&SweatEquityChallenge> {
        self.recovery.challenges_on(prediction)
    }

    // Payouts
    pub fn claim(
        &mut self,
        prediction: PredictionId,
        voter: &str,
        now: Timestamp,
    ) -> Result<Payout, MarketError> {
        self.payouts.claim(
            &mut self.ledger,
            &self.recovery,
            &self.fees,
            prediction,
            voter,
            now,
        )
    }
    pub fn preview_claim(
        &self,
        prediction: PredictionId,
        voter: &str,
        now: Timestamp,
    ) -> Result<Payout, MarketError> {
        self.payouts
            .preview(&self.ledger, &self.recovery, &self.fees, prediction, voter, now)
    }
    pub fn payouts_on(&self, prediction: PredictionId) -> Vec<&Payout> {
        self.payouts.payouts_on(prediction)
    }
    pub fn disbursed(&self, prediction: PredictionId) -> Amount {
        self.payouts.disbursed(prediction)
    }
    pub fn recovered(&self, prediction: PredictionId) -> Amount {
        self.payouts.recovered(prediction)
    }
    pub fn pending_transfers(&self) -> Vec<&Payout> {
        self.payouts.pending_transfers()
    }
    pub fn mark_transferred(
        &mut self,
        prediction: PredictionId,
        voter: &str,
    ) -> Result<(), MarketError> {
        self.payouts.mark_transferred(prediction, voter)
    }

    // Read models
    pub fn odds(&self, prediction: PredictionId) -> Result<OddsResponse, MarketError> {
        let current = self.ledger.get_prediction(prediction)?;
        let million = Decimal::from(1_000_000u32);
        let total = Decimal::from(current.total_staked);
        let share = |side: Amount| -> u32 {
            if current.total_staked == 0 {
                return 0;
            }
            (Decimal::from(side) * million / total)
                .trunc()
                .to_u32()
                .unwrap_or(0)
        };
        let multiplier = |side: Amount| -> Option<u64> {
            if side == 0 {
                return None;
            }
            (total * million / Decimal::from(side)).trunc().to_u64()
        };
        Ok(OddsResponse {
            prediction,
            yes_share_ppm: share(current.yes_votes),
            no_share_ppm: share(current.no_votes),
            yes_multiplier_ppm: multiplier(current.yes_votes),
            no_multiplier_ppm: multiplier(current.no_votes),
        })
    }
    pub fn leaderboard(&self, limit: usize) -> Vec<LeaderboardEntry> {
        let mut entries: BTreeMap<&str, LeaderboardEntry> = BTreeMap::new();
        for vote in self.ledger.all_votes() {
            let entry = entries
                .entry(vote.voter.as_str())
                .or_insert_with(|| LeaderboardEntry {
                    user: vote.voter.clone(),
                    total_staked: 0,
                    predictions: 0,
                    total_net_paid: 0,
                });
            entry.total_staked = entry.total_staked.saturating_add(vote.amount);
            entry.predictions += 1;
        }
        for payout in self.payouts.all() {
            if let Some(entry) = entries.get_mut(payout.voter.as_str()) {
                entry.total_net_paid = entry.total_net_paid.saturating_add(payout.fees.net);
            }
        }
        let mut entries: Vec<LeaderboardEntry> = entries.into_values().collect();
        entries.sort_by(|a, b| {
            b.total_staked
                .cmp(&a.total_staked)
                .then_with(|| a.user.cmp(&b.user))
        });
        entries.truncate(limit);
        entries
    }
    pub fn stats(&self) -> StatsResponse {
        let mut stats = StatsResponse::default();
        for prediction in self.ledger.predictions(&PredictionsFilter::default()) {
            stats.predictions += 1;
            match prediction.status {
                PredictionStatus::Active => stats.active += 1,
                PredictionStatus::Resolved => stats.resolved += 1,
                PredictionStatus::Cancelled => stats.cancelled += 1,
            }
            stats.total_staked = stats.total_staked.saturating_add(prediction.total_staked);
        }
        for payout in self.payouts.all() {
            stats.total_disbursed = stats.total_disbursed.saturating_add(payout.gross);
            if !payout.kind.from_pool() {
                stats.total_recovered = stats.total_recovered.saturating_add(payout.gross);
            }
            stats.charity_collected = stats.charity_collected.saturating_add(payout.fees.charity);
            stats.maintenance_collected = stats
                .maintenance_collected
                .saturating_add(payout.fees.maintenance);
        }
        for challenge in self.recovery.all() {
            match challenge.status {
                ChallengeStatus::Open => stats.open_challenges += 1,
                ChallengeStatus::Completed => stats.completed_challenges += 1,
                ChallengeStatus::Expired => {}
            }
        }
        stats
    }

    // Persistence support
    pub fn next_prediction_id(&self) -> PredictionId {
        self.ledger.next_id()
    }
    pub fn scope(&self, prediction: PredictionId) -> Option<Scope> {
        let (current, votes) = self.ledger.scope(prediction)?;
        Some(Scope {
            prediction: current,
            votes,
            challenges: self
                .recovery
                .challenges_on(prediction)
                .into_iter()
                .cloned()
                .collect(),
            payouts: self
                .payouts
                .payouts_on(prediction)
                .into_iter()
                .cloned()
                .collect(),
        })
    }
    pub fn snapshot(&self, prediction: PredictionId) -> ScopeSnapshot {
        ScopeSnapshot {
            prediction,
            scope: self.scope(prediction),
            next_prediction: self.ledger.next_id(),
            next_challenge: self.recovery.next_id(),
        }
    }
    /// Puts a scope back exactly as it was when `snapshot` was taken.
    pub fn restore(&mut self, snapshot: ScopeSnapshot) {
        let ScopeSnapshot {
            prediction,
            scope,
            next_prediction,
            next_challenge,
        } = snapshot;
        match scope {
            Some(scope) => {
                self.ledger.restore(
                    prediction,
                    Some((scope.prediction, scope.votes)),
                    next_prediction,
                );
                self.recovery
                    .restore(prediction, scope.challenges, next_challenge);
                self.payouts.restore(prediction, scope.payouts);
            }
            None => {
                self.ledger.restore(prediction, None, next_prediction);
                self.recovery.restore(prediction, vec![], next_challenge);
                self.payouts.restore(prediction, vec![]);
            }
        }
    }
    /// Adds a stored scope, used when starting from a database.
    pub fn load(&mut self, scope: Scope) {
        let prediction = scope.prediction.id;
        self.ledger.load(scope.prediction, scope.votes);
        for challenge in scope.challenges {
            self.recovery.load(challenge);
        }
        for payout in scope.payouts {
            debug_assert_eq!(payout.prediction, prediction);
            self.payouts.load(payout);
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::ledger::test::fields;

    const START: Timestamp = 1_700_000_000;

    /// Scenario setup: alice creates, bob stakes 10 on YES, carol 5 on NO.
    fn scenario(auto_resolvable: bool) -> (Engine, PredictionId) {
        let mut engine = Engine::new(EngineConfig::default()).unwrap();
        let mut new = fields(START + 1000, 100);
        new.auto_resolvable = auto_resolvable;
        let id = engine.create_prediction("alice", new, START).unwrap();
        engine.vote(id, "bob", true, 10, START + 1).unwrap();
        engine.vote(id, "carol", false, 5, START + 2).unwrap();
        (engine, id)
    }
    fn resolve_yes(engine: &mut Engine, id: PredictionId) {
        engine
            .resolve(
                id,
                Resolution {
                    outcome: Some(Outcome::Yes),
                    force: false,
                },
                Authority::Oracle,
                START + 1000,
            )
            .unwrap();
    }

    #[test]
    fn winner_claims_parimutuel_share_minus_fees() {
        let (mut engine, id) = scenario(false);
        resolve_yes(&mut engine, id);
        let payout = engine.claim(id, "bob", START + 1001).unwrap();
        assert_eq!(payout.kind, PayoutKind::Winnings);
        assert_eq!(payout.gross, 15);
        assert_eq!(payout.fees.net, 12);
        assert_eq!(payout.fees.charity + payout.fees.maintenance, 3);
        assert!(engine.get_user_vote(id, "bob").unwrap().claimed);

        assert!(matches!(
            engine.claim(id, "carol", START + 1001),
            Err(MarketError::NotEligible(_))
        ));
        assert!(matches!(
            engine.claim(id, "bob", START + 1002),
            Err(MarketError::AlreadyClaimed { .. })
        ));
        assert_eq!(engine.disbursed(id), 15);
    }
    #[test]
    fn loser_recovers_after_completed_challenge() {
        let (mut engine, id) = scenario(false);
        resolve_yes(&mut engine, id);
        assert!(matches!(
            engine.open_challenge(id, "bob", START + 1001),
            Err(MarketError::NotEligible(_))
        ));
        let challenge = engine.open_challenge(id, "carol", START + 1001).unwrap();
        assert!(matches!(
            engine.claim(id, "carol", START + 1002),
            Err(MarketError::NotEligible(_))
        ));
        let required = engine.challenge(challenge).unwrap().required_additional_amount;
        engine
            .complete_challenge(challenge, START + 5000, VerifiedProof { amount: required })
            .unwrap();
        let payout = engine.claim(id, "carol", START + 5001).unwrap();
        assert_eq!(payout.kind, PayoutKind::Recovery);
        assert_eq!(payout.gross, 4);
        assert_eq!(payout.fees.gross(), 4);
        assert!(matches!(
            engine.claim(id, "carol", START + 5002),
            Err(MarketError::AlreadyClaimed { .. })
        ));
        assert!(matches!(
            engine.open_challenge(id, "carol", START + 5003),
            Err(MarketError::AlreadyClaimed { .. })
        ));
    }
    #[test]
    fn expired_challenge_leaves_the_stake_forfeited() {
        let (mut engine, id) = scenario(false);
        resolve_yes(&mut engine, id);
        let challenge = engine.open_challenge(id, "carol", START + 1001).unwrap();
        let window_end = engine.challenge(challenge).unwrap().window_end;
        assert_eq!(
            engine.expire_challenge(challenge, window_end + 1).unwrap(),
            ChallengeStatus::Expired
        );
        assert_eq!(
            engine.expire_challenge(challenge, window_end + 2).unwrap(),
            ChallengeStatus::Expired
        );
        assert!(matches!(
            engine.complete_challenge(challenge, window_end + 3, VerifiedProof { amount: 1000 }),
            Err(MarketError::WindowClosed { .. })
        ));
        assert!(matches!(
            engine.claim(id, "carol", window_end + 4),
            Err(MarketError::NotEligible(_))
        ));
    }
    #[test]
    fn cancellation_refunds_without_fees() {
        let (mut engine, id) = scenario(false);
        engine.cancel(id, Authority::Oracle, "oracle", START + 10).unwrap();
        for (voter, amount) in [("bob", 10), ("carol", 5)] {
            let payout = engine.claim(id, voter, START + 11).unwrap();
            assert_eq!(payout.kind, PayoutKind::Refund);
            assert_eq!(payout.fees.net, amount);
            assert_eq!(payout.fees.charity + payout.fees.maintenance, 0);
        }
        assert_eq!(engine.disbursed(id), 15);
        assert!(matches!(
            engine.open_challenge(id, "carol", START + 12),
            Err(MarketError::InvalidState(_))
        ));
    }
    fn recovered_carol(engine: &mut Engine, id: PredictionId, now: Timestamp) {
        let challenge = engine.open_challenge(id, "carol", now).unwrap();
        engine
            .complete_challenge(challenge, now + 1, VerifiedProof { amount: 100 })
            .unwrap();
    }
    #[test]
    fn winnings_then_recovery() {
        let (mut engine, id) = scenario(false);
        resolve_yes(&mut engine, id);
        let bob = engine.claim(id, "bob", START + 1001).unwrap();
        assert_eq!((bob.gross, bob.fees.net), (15, 12));
        recovered_carol(&mut engine, id, START + 1002);
        let carol = engine.claim(id, "carol", START + 1004).unwrap();
        assert_eq!(carol.kind, PayoutKind::Recovery);
        assert_eq!(carol.gross, 4);
        assert_eq!(engine.disbursed(id), 15);
        assert_eq!(engine.recovered(id), 4);
    }
    #[test]
    fn recovery_never_reduces_winnings() {
        let (mut engine, id) = scenario(false);
        resolve_yes(&mut engine, id);
        recovered_carol(&mut engine, id, START + 1001);
        assert_eq!(engine.claim(id, "carol", START + 1003).unwrap().gross, 4);
        let bob = engine.claim(id, "bob", START + 1004).unwrap();
        assert_eq!((bob.gross, bob.fees.net), (15, 12));
        assert!(engine.disbursed(id) <= engine.get_prediction(id).unwrap().total_staked);
    }
    #[test]
    fn inconsistent_books_can_not_overdraw_the_pool() {
        let (mut engine, id) = scenario(false);
        resolve_yes(&mut engine, id);
        engine.payouts.load(Payout {
            prediction: id,
            voter: "mallory".into(),
            kind: PayoutKind::Winnings,
            gross: 10,
            fees: FeePolicy::refund(10),
            paid_at: START + 1000,
            transferred: true,
        });
        let before = engine.scope(id);
        assert!(matches!(
            engine.claim(id, "bob", START + 1001),
            Err(MarketError::InsufficientPool {
                requested: 15,
                remaining: 5,
                ..
            })
        ));
        assert_eq!(engine.scope(id), before);
    }
    #[test]
    fn transfers_stay_pending_until_marked() {
        let (mut engine, id) = scenario(false);
        resolve_yes(&mut engine, id);
        let payout = engine.claim(id, "bob", START + 1001).unwrap();
        assert!(!payout.transferred);
        assert_eq!(engine.pending_transfers(), vec![&payout]);
        engine.mark_transferred(id, "bob").unwrap();
        assert!(engine.pending_transfers().is_empty());
    }
    #[test]
    fn many_winners_never_exceed_the_pool() {
        let mut engine = Engine::new(EngineConfig::default()).unwrap();
        let id = engine
            .create_prediction("alice", fields(START + 1000, 100), START)
            .unwrap();
        for (i, amount) in [3u64, 7, 11, 13, 17].iter().enumerate() {
            engine
                .vote(id, &format!("yes{}", i), true, *amount, START + 1)
                .unwrap();
        }
        engine.vote(id, "no", false, 29, START + 1).unwrap();
        resolve_yes(&mut engine, id);
        let mut paid = 0;
        for i in 0..5 {
            paid += engine.claim(id, &format!("yes{}", i), START + 1001).unwrap().gross;
        }
        assert!(paid <= engine.get_prediction(id).unwrap().total_staked);
        assert_eq!(paid, engine.disbursed(id));
    }
    #[test]
    fn zero_stake_resolution_pays_nothing() {
        let mut engine = Engine::new(EngineConfig::default()).unwrap();
        let mut new = fields(START + 1000, 100);
        new.auto_resolvable = true;
        let id = engine.create_prediction("alice", new, START).unwrap();
        assert_eq!(
            engine
                .resolve(id, Resolution::default(), Authority::Public, START + 1000)
                .unwrap(),
            Outcome::No
        );
        assert!(engine.payouts_on(id).is_empty());
        assert!(matches!(
            engine.claim(id, "bob", START + 1001),
            Err(MarketError::NotFound(_))
        ));
    }
    #[test]
    fn claims_wait_for_the_outcome() {
        let (mut engine, id) = scenario(true);
        assert!(matches!(
            engine.claim(id, "bob", START + 3),
            Err(MarketError::InvalidState(_))
        ));
        assert!(matches!(
            engine.open_challenge(id, "carol", START + 3),
            Err(MarketError::InvalidState(_))
        ));
    }
    #[test]
    fn odds_and_read_models() {
        let (mut engine, id) = scenario(false);
        let odds = engine.odds(id).unwrap();
        assert_eq!(odds.yes_share_ppm, 666_666);
        assert_eq!(odds.no_share_ppm, 333_333);
        assert_eq!(odds.yes_multiplier_ppm, Some(1_500_000));
        assert_eq!(odds.no_multiplier_ppm, Some(3_000_000));

        resolve_yes(&mut engine, id);
        engine.claim(id, "bob", START + 1001).unwrap();
        let board = engine.leaderboard(10);
        assert_eq!(board[0].user, "bob");
        assert_eq!(board[0].total_net_paid, 12);
        assert_eq!(board[1].user, "carol");
        assert_eq!(engine.leaderboard(1).len(), 1);

        let stats = engine.stats();
        assert_eq!(stats.predictions, 1);
        assert_eq!(stats.resolved, 1);
        assert_eq!(stats.total_staked, 15);
        assert_eq!(stats.total_disbursed, 15);
        assert_eq!(stats.charity_collected, 2);
        assert_eq!(stats.maintenance_collected, 1);
    }
    #[test]
    fn snapshot_restore_round_trip() {
        let (mut engine, id) = scenario(false);
        resolve_yes(&mut engine, id);
        let snapshot = engine.snapshot(id);
        let before = engine.scope(id);
        engine.open_challenge(id, "carol", START + 1001).unwrap();
        engine.claim(id, "bob", START + 1002).unwrap();
        engine.restore(snapshot);
        assert_eq!(engine.scope(id), before);
        // The restored counter hands out the same challenge id again.
        let challenge = engine.open_challenge(id, "carol", START + 1003).unwrap();
        assert_eq!(challenge, 1);

        let snapshot = engine.snapshot(engine.next_prediction_id());
        let created = engine
            .create_prediction("dave", fields(START + 9000, 1), START + 1004)
            .unwrap();
        assert_eq!(snapshot.prediction(), created);
        engine.restore(snapshot);
        assert!(engine.get_prediction(created).is_err());
        assert_eq!(engine.next_prediction_id(), created);
    }
    #[test]
    fn load_rebuilds_counters() {
        let (engine, id) = scenario(false);
        let scope = engine.scope(id).unwrap();
        let mut fresh = Engine::new(EngineConfig::default()).unwrap();
        fresh.load(scope.clone());
        assert_eq!(fresh.scope(id), Some(scope));
        assert_eq!(fresh.next_prediction_id(), id + 1);
    }
}
