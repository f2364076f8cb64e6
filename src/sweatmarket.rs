use crate::api::*;
use crate::custody::{self, Custody};
use crate::db::DB;
use crate::engine::{Engine, EngineConfig, ScopeSnapshot};
use crate::ledger::NewPrediction;
use crate::resolution::Resolution;
use crate::verifier::{verify_evidence, FitnessVerifier};
use anyhow::{Context, Result};
use log::{debug, error, trace};
use std::collections::HashSet;
use std::sync::Arc;

/// The settlement engine behind sessions, storage, custody and the fitness
/// verifier.
pub struct SweatMarket {
    engine: Engine,
    db: Arc<Box<dyn DB + Send + Sync>>,
    custody: Arc<Box<dyn Custody + Send + Sync>>,
    verifier: Arc<Box<dyn FitnessVerifier + Send + Sync>>,
    admins: HashSet<UserId>,
    oracles: HashSet<UserId>,
    test: bool,
}

impl SweatMarket {
    pub async fn new(
        db: Box<dyn DB + Send + Sync>,
        custody: Box<dyn Custody + Send + Sync>,
        verifier: Box<dyn FitnessVerifier + Send + Sync>,
        config: EngineConfig,
        admins: Vec<UserId>,
        oracles: Vec<UserId>,
        test: bool,
    ) -> Result<Self> {
        let mut engine = Engine::new(config)?;
        let scopes = db
            .load_scopes()
            .await
            .context("couldn't load stored predictions")?;
        debug!("Loaded {} predictions from the database", scopes.len());
        for scope in scopes {
            engine.load(scope);
        }
        Ok(Self {
            engine,
            db: Arc::new(db),
            custody: Arc::new(custody),
            verifier: Arc::new(verifier),
            admins: admins.into_iter().collect(),
            oracles: oracles.into_iter().collect(),
            test,
        })
    }
    pub fn engine(&self) -> &Engine {
        &self.engine
    }

    pub fn check_access(&self, session: &Session) -> UserRole {
        if self.test || self.admins.contains(&session.user) {
            UserRole::Admin
        } else if self.oracles.contains(&session.user) {
            UserRole::Oracle
        } else {
            UserRole::User
        }
    }
    pub fn check_access_for_user(&self, user: &str, session: &Session) -> Result<()> {
        if let UserRole::User = self.check_access(session) {
            if user != session.user {
                return Err(MarketError::Unauthorized(format!(
                    "{} can't act on behalf of {}",
                    session.user, user
                ))
                .into());
            }
        }
        Ok(())
    }
    fn check_oracle(&self, session: &Session) -> Result<()> {
        if let UserRole::User = self.check_access(session) {
            return Err(MarketError::Unauthorized(format!(
                "{} is neither oracle nor admin",
                session.user
            ))
            .into());
        }
        Ok(())
    }

    /// Writes the scope touched since `snapshot` to the database and rolls
    /// the engine back to `snapshot` if that fails.
    async fn persist(&mut self, snapshot: ScopeSnapshot) -> Result<()> {
        let prediction = snapshot.prediction();
        let Some(scope) = self.engine.scope(prediction) else {
            return Ok(());
        };
        if let Err(e) = self.db.save_scope(&scope).await {
            error!(
                "Couldn't store prediction {}, rolling back: {:#}",
                prediction, e
            );
            self.engine.restore(snapshot);
            return Err(e.context(format!("couldn't store prediction {}", prediction)));
        }
        Ok(())
    }

    pub async fn new_prediction(
        &mut self,
        request: NewPredictionRequest,
        session: Session,
        now: Timestamp,
    ) -> Result<PredictionId> {
        let fields = NewPrediction {
            title: request.title,
            description: request.description,
            target_date: request.target_date.timestamp(),
            target_value: request.target_value,
            category: request.category,
            auto_resolvable: request.auto_resolvable,
        };
        let snapshot = self.engine.snapshot(self.engine.next_prediction_id());
        let id = self
            .engine
            .create_prediction(&session.user, fields, now)
            .context("couldn't create prediction")?;
        self.persist(snapshot).await?;
        debug!("{} created prediction {}", session.user, id);
        Ok(id)
    }
    pub async fn vote(
        &mut self,
        request: VoteRequest,
        session: Session,
        now: Timestamp,
    ) -> Result<Vote> {
        self.check_access_for_user(&request.voter, &session)?;
        let snapshot = self.engine.snapshot(request.prediction);
        let vote = self
            .engine
            .vote(
                request.prediction,
                &request.voter,
                request.is_yes,
                request.amount,
                now,
            )
            .with_context(|| format!("couldn't vote on prediction {}", request.prediction))?;
        self.persist(snapshot).await?;
        debug!(
            "{} staked {} on {} for prediction {}",
            request.voter,
            request.amount,
            if request.is_yes { "yes" } else { "no" },
            request.prediction
        );
        Ok(vote)
    }
    pub async fn record_progress(&mut self, request: ProgressRequest, session: Session) -> Result<()> {
        self.check_oracle(&session)?;
        let snapshot = self.engine.snapshot(request.prediction);
        self.engine
            .record_progress(request.prediction, request.current_value)
            .with_context(|| {
                format!("couldn't record progress of prediction {}", request.prediction)
            })?;
        self.persist(snapshot).await?;
        debug!(
            "Progress of prediction {} is now {}",
            request.prediction, request.current_value
        );
        Ok(())
    }
    pub async fn resolve(
        &mut self,
        request: ResolveRequest,
        session: Session,
        now: Timestamp,
    ) -> Result<Outcome> {
        let authority = self.check_access(&session).authority();
        let snapshot = self.engine.snapshot(request.prediction);
        let outcome = self
            .engine
            .resolve(
                request.prediction,
                Resolution {
                    outcome: request.outcome,
                    force: request.force,
                },
                authority,
                now,
            )
            .with_context(|| format!("couldn't resolve prediction {}", request.prediction))?;
        self.persist(snapshot).await?;
        Ok(outcome)
    }
    pub async fn cancel(
        &mut self,
        prediction: PredictionId,
        session: Session,
        now: Timestamp,
    ) -> Result<()> {
        let authority = self.check_access(&session).authority();
        let snapshot = self.engine.snapshot(prediction);
        self.engine
            .cancel(prediction, authority, &session.user, now)
            .with_context(|| format!("couldn't cancel prediction {}", prediction))?;
        self.persist(snapshot).await
    }
    pub async fn open_challenge(
        &mut self,
        request: PredictionUserRequest,
        session: Session,
        now: Timestamp,
    ) -> Result<ChallengeId> {
        self.check_access_for_user(&request.user, &session)?;
        let snapshot = self.engine.snapshot(request.prediction);
        let challenge = self
            .engine
            .open_challenge(request.prediction, &request.user, now)
            .with_context(|| {
                format!(
                    "couldn't open a challenge for {} on prediction {}",
                    request.user, request.prediction
                )
            })?;
        self.persist(snapshot).await?;
        Ok(challenge)
    }
    /// Looks up what evidence for `challenge` has to be checked against and
    /// who checks it. Verification then runs without holding the market, see
    /// [`SweatMarket::apply_proof`].
    pub fn verification(
        &self,
        challenge: ChallengeId,
        session: &Session,
    ) -> Result<(Arc<Box<dyn FitnessVerifier + Send + Sync>>, SweatEquityChallenge)> {
        let challenge = self.engine.challenge(challenge)?.clone();
        self.check_access_for_user(&challenge.voter, session)?;
        Ok((self.verifier.clone(), challenge))
    }
    pub async fn apply_proof(
        &mut self,
        challenge: &SweatEquityChallenge,
        proof: VerifiedProof,
        now: Timestamp,
    ) -> Result<()> {
        let snapshot = self.engine.snapshot(challenge.prediction);
        self.engine
            .complete_challenge(challenge.id, now, proof)
            .with_context(|| format!("couldn't complete challenge {}", challenge.id))?;
        self.persist(snapshot).await?;
        debug!(
            "{} completed challenge {} with {}",
            challenge.voter, challenge.id, proof.amount
        );
        Ok(())
    }
    pub async fn complete_challenge(
        &mut self,
        request: CompleteChallengeRequest,
        session: Session,
        now: Timestamp,
    ) -> Result<()> {
        let (verifier, challenge) = self.verification(request.challenge, &session)?;
        let proof = verify_evidence(&**verifier, &challenge, &request.evidence).await?;
        self.apply_proof(&challenge, proof, now).await
    }
    pub async fn expire_challenge(
        &mut self,
        challenge: ChallengeId,
        now: Timestamp,
    ) -> Result<ChallengeStatus> {
        let prediction = self.engine.challenge(challenge)?.prediction;
        let snapshot = self.engine.snapshot(prediction);
        let status = self.engine.expire_challenge(challenge, now)?;
        self.persist(snapshot).await?;
        Ok(status)
    }
    /// Expires every open challenge whose window has passed. A failed write
    /// keeps the expiry in memory only, so the stored rows stay OPEN until the
    /// next successful save of their prediction or the next batch after a
    /// restart.
    pub async fn expire_due(&mut self, now: Timestamp) -> Result<Vec<ChallengeId>> {
        let expired = self.engine.expire_due(now);
        if expired.is_empty() {
            return Ok(expired);
        }
        let challenges = expired
            .iter()
            .map(|id| self.engine.challenge(*id).cloned())
            .collect::<Result<Vec<_>, _>>()?;
        if let Err(e) = self.db.save_challenges(&challenges).await {
            error!("Couldn't store {} expired challenges: {:#}", challenges.len(), e);
        }
        debug!("Expired challenges {:?}", expired);
        Ok(expired)
    }
    pub async fn claim(
        &mut self,
        request: PredictionUserRequest,
        session: Session,
        now: Timestamp,
    ) -> Result<Payout> {
        self.check_access_for_user(&request.user, &session)?;
        let snapshot = self.engine.snapshot(request.prediction);
        let payout = self
            .engine
            .claim(request.prediction, &request.user, now)
            .with_context(|| {
                format!(
                    "couldn't claim for {} on prediction {}",
                    request.user, request.prediction
                )
            })?;
        self.persist(snapshot).await?;
        Ok(self.transfer(payout).await)
    }
    /// Hands a recorded payout to custody. A failed transfer leaves the payout
    /// pending for [`SweatMarket::retry_transfers`].
    async fn transfer(&mut self, mut payout: Payout) -> Payout {
        if let Err(e) = custody::disburse(&**self.custody, &payout).await {
            error!(
                "Transfer of {} to {} on prediction {} failed, keeping it pending: {:#}",
                payout.gross, payout.voter, payout.prediction, e
            );
            return payout;
        }
        payout.transferred = true;
        if let Err(e) = self.engine.mark_transferred(payout.prediction, &payout.voter) {
            error!("Couldn't mark transfer to {} as done: {}", payout.voter, e);
            return payout;
        }
        if let Some(scope) = self.engine.scope(payout.prediction) {
            if let Err(e) = self.db.save_scope(&scope).await {
                error!(
                    "Transfer to {} on prediction {} is done but couldn't be stored: {:#}",
                    payout.voter, payout.prediction, e
                );
            }
        }
        debug!(
            "Transferred {} to {} on prediction {}",
            payout.fees.net, payout.voter, payout.prediction
        );
        payout
    }
    /// Retries every payout custody has not accepted yet and returns the ones
    /// that went through.
    pub async fn retry_transfers(&mut self) -> Vec<Payout> {
        let pending: Vec<Payout> = self
            .engine
            .pending_transfers()
            .into_iter()
            .cloned()
            .collect();
        let mut transferred = vec![];
        for payout in pending {
            let payout = self.transfer(payout).await;
            if payout.transferred {
                transferred.push(payout);
            }
        }
        transferred
    }

    pub fn get_prediction(&self, prediction: PredictionId) -> Result<Prediction> {
        trace!("get_prediction {}", prediction);
        Ok(self.engine.get_prediction(prediction)?.clone())
    }
    pub fn get_user_vote(&self, prediction: PredictionId, user: &str) -> Result<Vote> {
        Ok(self.engine.get_user_vote(prediction, user)?.clone())
    }
    pub fn get_predictions(&self, filter: &PredictionsFilter) -> Vec<Prediction> {
        self.engine
            .predictions(filter)
            .into_iter()
            .cloned()
            .collect()
    }
    pub fn get_user_votes(&self, user: &str) -> Vec<Vote> {
        self.engine.votes_of(user).into_iter().cloned().collect()
    }
    pub fn get_challenges(&self, prediction: PredictionId) -> Result<Vec<SweatEquityChallenge>> {
        self.engine.get_prediction(prediction)?;
        Ok(self
            .engine
            .challenges_on(prediction)
            .into_iter()
            .cloned()
            .collect())
    }
    pub fn get_odds(&self, prediction: PredictionId) -> Result<OddsResponse> {
        Ok(self.engine.odds(prediction)?)
    }
    pub fn get_claimable(
        &self,
        prediction: PredictionId,
        user: &str,
        now: Timestamp,
    ) -> Result<Payout> {
        Ok(self.engine.preview_claim(prediction, user, now)?)
    }
    pub fn get_leaderboard(&self, limit: usize) -> Vec<LeaderboardEntry> {
        self.engine.leaderboard(limit)
    }
    pub fn get_stats(&self) -> StatsResponse {
        self.engine.stats()
    }
    pub async fn get_balances(&self) -> Result<Vec<BalanceEntry>> {
        self.custody.balances().await
    }
}
