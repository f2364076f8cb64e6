use crate::api::*;
use log::trace;
use std::collections::BTreeMap;

/// Fields a creator chooses for a new prediction.
#[derive(Debug, Clone, PartialEq)]
pub struct NewPrediction {
    pub title: String,
    pub description: String,
    pub target_date: Timestamp,
    pub target_value: u64,
    pub category: Category,
    pub auto_resolvable: bool,
}

/// Authoritative state of predictions and votes. Stake accumulators are
/// only ever touched in here.
#[derive(Debug, Clone)]
pub struct Ledger {
    predictions: BTreeMap<PredictionId, Prediction>,
    votes: BTreeMap<(PredictionId, UserId), Vote>,
    next_id: PredictionId,
}
impl Default for Ledger {
    fn default() -> Self {
        Self {
            predictions: BTreeMap::new(),
            votes: BTreeMap::new(),
            next_id: 1,
        }
    }
}
impl Ledger {
    pub fn create_prediction(
        &mut self,
        creator: &str,
        fields: NewPrediction,
        now: Timestamp,
    ) -> Result<PredictionId, MarketError> {
        if fields.target_date <= now {
            return Err(MarketError::InvalidInput(format!(
                "target date {} has to be after {}",
                fields.target_date, now
            )));
        }
        if fields.title.trim().is_empty() {
            return Err(MarketError::InvalidInput(
                "prediction needs a title".to_string(),
            ));
        }
        let id = self.next_id;
        self.predictions.insert(
            id,
            Prediction {
                id,
                creator: creator.to_string(),
                title: fields.title,
                description: fields.description,
                target_date: fields.target_date,
                target_value: fields.target_value,
                current_value: 0,
                category: fields.category,
                total_staked: 0,
                yes_votes: 0,
                no_votes: 0,
                status: PredictionStatus::Active,
                outcome: Outcome::Unresolved,
                auto_resolvable: fields.auto_resolvable,
                created_at: now,
                resolved_at: None,
            },
        );
        self.next_id += 1;
        Ok(id)
    }
    pub fn vote(
        &mut self,
        prediction: PredictionId,
        voter: &str,
        is_yes: bool,
        amount: Amount,
        now: Timestamp,
    ) -> Result<Vote, MarketError> {
        let current = self.get_prediction(prediction)?;
        if current.status != PredictionStatus::Active {
            return Err(MarketError::InvalidState(format!(
                "prediction {} is {} and takes no more votes",
                prediction, current.status
            )));
        }
        if now >= current.target_date {
            return Err(MarketError::InvalidState(format!(
                "voting on prediction {} ended at {}",
                prediction, current.target_date
            )));
        }
        if amount == 0 {
            return Err(MarketError::InvalidInput(
                "vote amount has to be greater than 0".to_string(),
            ));
        }
        let key = (prediction, voter.to_string());
        let existing = self.votes.get(&key);
        if let Some(vote) = existing {
            if vote.is_yes != is_yes {
                return Err(MarketError::InvalidInput(format!(
                    "{} already voted {} on prediction {} and can't switch sides",
                    voter,
                    if vote.is_yes { "yes" } else { "no" },
                    prediction
                )));
            }
        }
        let overflow = || MarketError::InvalidInput("stake overflows the pool".to_string());
        let total_staked = current.total_staked.checked_add(amount).ok_or_else(overflow)?;
        let side_total = current
            .side_total(is_yes)
            .checked_add(amount)
            .ok_or_else(overflow)?;
        let vote_amount = existing
            .map_or(0, |vote| vote.amount)
            .checked_add(amount)
            .ok_or_else(overflow)?;

        // Nothing can fail past this point.
        let current = self
            .predictions
            .get_mut(&prediction)
            .ok_or_else(|| MarketError::prediction_not_found(prediction))?;
        current.total_staked = total_staked;
        if is_yes {
            current.yes_votes = side_total;
        } else {
            current.no_votes = side_total;
        }
        let vote = self.votes.entry(key).or_insert_with(|| Vote {
            prediction,
            voter: voter.to_string(),
            is_yes,
            amount: 0,
            claimed: false,
            created_at: now,
        });
        vote.amount = vote_amount;
        Ok(vote.clone())
    }
    pub fn record_progress(
        &mut self,
        prediction: PredictionId,
        current_value: u64,
    ) -> Result<(), MarketError> {
        let current = self
            .predictions
            .get_mut(&prediction)
            .ok_or_else(|| MarketError::prediction_not_found(prediction))?;
        if current.status != PredictionStatus::Active {
            return Err(MarketError::InvalidState(format!(
                "progress of prediction {} is frozen since it is {}",
                prediction, current.status
            )));
        }
        current.current_value = current_value;
        Ok(())
    }
    pub fn get_prediction(&self, id: PredictionId) -> Result<&Prediction, MarketError> {
        trace!("Looking up prediction {}", id);
        self.predictions
            .get(&id)
            .ok_or_else(|| MarketError::prediction_not_found(id))
    }
    pub fn get_user_vote(&self, id: PredictionId, voter: &str) -> Result<&Vote, MarketError> {
        self.get_prediction(id)?;
        self.votes
            .get(&(id, voter.to_string()))
            .ok_or_else(|| MarketError::vote_not_found(id, voter))
    }
    pub fn predictions(&self, filter: &PredictionsFilter) -> Vec<&Prediction> {
        self.predictions
            .values()
            .filter(|p| filter.status.map_or(true, |status| p.status == status))
            .filter(|p| filter.category.map_or(true, |category| p.category == category))
            .filter(|p| {
                filter
                    .creator
                    .as_ref()
                    .map_or(true, |creator| &p.creator == creator)
            })
            .collect()
    }
    pub fn votes_on(&self, prediction: PredictionId) -> Vec<&Vote> {
        self.votes
            .range((prediction, String::new())..(prediction + 1, String::new()))
            .map(|(_, vote)| vote)
            .collect()
    }
    pub fn votes_of(&self, voter: &str) -> Vec<&Vote> {
        self.votes
            .values()
            .filter(|vote| vote.voter == voter)
            .collect()
    }
    pub fn all_votes(&self) -> impl Iterator<Item = &Vote> {
        self.votes.values()
    }
    pub fn next_id(&self) -> PredictionId {
        self.next_id
    }

    /// Moves an active prediction into a terminal status.
    pub(crate) fn close(
        &mut self,
        prediction: PredictionId,
        status: PredictionStatus,
        outcome: Outcome,
        at: Timestamp,
    ) -> Result<(), MarketError> {
        let current = self
            .predictions
            .get_mut(&prediction)
            .ok_or_else(|| MarketError::prediction_not_found(prediction))?;
        if current.status != PredictionStatus::Active {
            return Err(MarketError::InvalidState(format!(
                "prediction {} is already {}",
                prediction, current.status
            )));
        }
        current.status = status;
        current.outcome = outcome;
        current.resolved_at = Some(at);
        Ok(())
    }
    pub(crate) fn mark_claimed(
        &mut self,
        prediction: PredictionId,
        voter: &str,
    ) -> Result<(), MarketError> {
        let vote = self
            .votes
            .get_mut(&(prediction, voter.to_string()))
            .ok_or_else(|| MarketError::vote_not_found(prediction, voter))?;
        if vote.claimed {
            return Err(MarketError::AlreadyClaimed {
                prediction,
                voter: voter.to_string(),
            });
        }
        vote.claimed = true;
        Ok(())
    }
    /// Copies a prediction and its votes out, `None` if it doesn't exist.
    pub(crate) fn scope(&self, prediction: PredictionId) -> Option<(Prediction, Vec<Vote>)> {
        let current = self.predictions.get(&prediction)?.clone();
        let votes = self.votes_on(prediction).into_iter().cloned().collect();
        Some((current, votes))
    }
    /// Replaces everything stored for `prediction` with `scope`.
    pub(crate) fn restore(
        &mut self,
        prediction: PredictionId,
        scope: Option<(Prediction, Vec<Vote>)>,
        next_id: PredictionId,
    ) {
        self.predictions.remove(&prediction);
        self.votes
            .retain(|(vote_prediction, _), _| *vote_prediction != prediction);
        if let Some((current, votes)) = scope {
            self.load(current, votes);
        }
        self.next_id = next_id;
    }
    pub(crate) fn load(&mut self, prediction: Prediction, votes: Vec<Vote>) {
        self.next_id = self.next_id.max(prediction.id + 1);
        for vote in votes {
            self.votes
                .insert((vote.prediction, vote.voter.clone()), vote);
        }
        self.predictions.insert(prediction.id, prediction);
    }
}
