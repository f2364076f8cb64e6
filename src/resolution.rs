use crate::api::*;
use crate::ledger::Ledger;
use log::debug;

/// What a resolver hands in. Auto-resolvable predictions may leave the
/// outcome empty.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Resolution {
    pub outcome: Option<Outcome>,
    pub force: bool,
}

/// Moves predictions from ACTIVE into RESOLVED or CANCELLED. Both are
/// terminal.
pub struct ResolutionEngine;

impl ResolutionEngine {
    pub fn resolve(
        ledger: &mut Ledger,
        prediction: PredictionId,
        resolution: Resolution,
        authority: Authority,
        now: Timestamp,
    ) -> Result<Outcome, MarketError> {
        let current = ledger.get_prediction(prediction)?;
        if current.status != PredictionStatus::Active {
            return Err(MarketError::InvalidState(format!(
                "prediction {} is already {}",
                prediction, current.status
            )));
        }
        if resolution.force && authority != Authority::Oracle {
            return Err(MarketError::Unauthorized(
                "only an oracle can force a resolution".to_string(),
            ));
        }
        let outcome = if current.auto_resolvable {
            let computed = Self::computed_outcome(current);
            match resolution.outcome {
                None => {}
                Some(supplied) if supplied == computed => {}
                Some(supplied) => {
                    return Err(MarketError::InvalidInput(format!(
                        "prediction {} resolves to {} on its own, not {}",
                        prediction, computed, supplied
                    )))
                }
            }
            computed
        } else {
            if authority != Authority::Oracle {
                return Err(MarketError::Unauthorized(format!(
                    "prediction {} can only be resolved by an oracle",
                    prediction
                )));
            }
            match resolution.outcome {
                Some(outcome @ (Outcome::Yes | Outcome::No)) => outcome,
                _ => {
                    return Err(MarketError::InvalidInput(format!(
                        "prediction {} needs a yes or no outcome",
                        prediction
                    )))
                }
            }
        };
        if now < current.target_date && !resolution.force {
            return Err(MarketError::InvalidState(format!(
                "prediction {} can't be resolved before {}",
                prediction, current.target_date
            )));
        }
        if current.total_staked == 0 {
            debug!("Prediction {} resolves without any stake", prediction);
        }
        ledger.close(prediction, PredictionStatus::Resolved, outcome, now)?;
        debug!("Resolved prediction {} as {}", prediction, outcome);
        Ok(outcome)
    }
    pub fn cancel(
        ledger: &mut Ledger,
        prediction: PredictionId,
        authority: Authority,
        caller: &str,
        now: Timestamp,
    ) -> Result<(), MarketError> {
        let current = ledger.get_prediction(prediction)?;
        if current.status != PredictionStatus::Active {
            return Err(MarketError::InvalidState(format!(
                "prediction {} is already {}",
                prediction, current.status
            )));
        }
        let creator_without_stake = current.creator == caller && current.total_staked == 0;
        if authority != Authority::Oracle && !creator_without_stake {
            return Err(MarketError::Unauthorized(format!(
                "prediction {} can only be cancelled by an oracle",
                prediction
            )));
        }
        ledger.close(
            prediction,
            PredictionStatus::Cancelled,
            Outcome::Unresolved,
            now,
        )?;
        debug!("Cancelled prediction {}", prediction);
        Ok(())
    }
    /// YES once the tracked value reached the target.
    pub fn computed_outcome(prediction: &Prediction) -> Outcome {
        if prediction.current_value >= prediction.target_value {
            Outcome::Yes
        } else {
            Outcome::No
        }
    }
}
