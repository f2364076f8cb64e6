use crate::api::*;
use crate::fees::FeePolicy;
use crate::ledger::Ledger;
use crate::recovery::RecoveryBook;
use log::{debug, error};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::collections::BTreeMap;

pub const DEFAULT_RECOVERY_PERCENT: u8 = 80;

/// Works out what a vote may claim and keeps the record of every claim
/// that was paid.
#[derive(Debug, Clone)]
pub struct PayoutCalculator {
    payouts: BTreeMap<(PredictionId, UserId), Payout>,
    recovery_percent: u8,
}
impl PayoutCalculator {
    pub fn new(recovery_percent: u8) -> Result<Self, MarketError> {
        if recovery_percent > 100 {
            return Err(MarketError::InvalidInput(format!(
                "recovery percent was {} but may be at most 100",
                recovery_percent
            )));
        }
        Ok(Self {
            payouts: BTreeMap::new(),
            recovery_percent,
        })
    }
    pub fn recovery_percent(&self) -> u8 {
        self.recovery_percent
    }
    /// What `claim` would pay right now, without changing anything.
    pub fn preview(
        &self,
        ledger: &Ledger,
        recovery: &RecoveryBook,
        fees: &FeePolicy,
        prediction: PredictionId,
        voter: &str,
        now: Timestamp,
    ) -> Result<Payout, MarketError> {
        let current = ledger.get_prediction(prediction)?;
        let vote = ledger.get_user_vote(prediction, voter)?;
        if vote.claimed {
            return Err(MarketError::AlreadyClaimed {
                prediction,
                voter: voter.to_string(),
            });
        }
        let (kind, gross, split) = match current.status {
            PredictionStatus::Active => {
                return Err(MarketError::InvalidState(format!(
                    "prediction {} is still active",
                    prediction
                )))
            }
            PredictionStatus::Cancelled => (
                PayoutKind::Refund,
                vote.amount,
                FeePolicy::refund(vote.amount),
            ),
            PredictionStatus::Resolved => {
                let winning_side = current.winning_side().ok_or_else(|| {
                    MarketError::InvalidState(format!(
                        "prediction {} is resolved without an outcome",
                        prediction
                    ))
                })?;
                if vote.is_yes == winning_side {
                    let gross = Self::calculate_winnings(
                        vote.amount,
                        current.side_total(winning_side),
                        current.side_total(!winning_side),
                    )?;
                    (PayoutKind::Winnings, gross, fees.split(gross))
                } else if recovery.has_completed(prediction, voter) {
                    let gross = Self::calculate_recovery(vote.amount, self.recovery_percent)?;
                    (PayoutKind::Recovery, gross, fees.split(gross))
                } else {
                    return Err(MarketError::NotEligible(format!(
                        "{} lost prediction {} and has no completed challenge",
                        voter, prediction
                    )));
                }
            }
        };
        let disbursed = self.disbursed(prediction);
        let remaining = current.total_staked.saturating_sub(disbursed);
        if kind.from_pool() && gross > remaining {
            error!(
                "Paying {} to {} would make prediction {} insolvent: {} staked, {} already paid",
                gross, voter, prediction, current.total_staked, disbursed
            );
            return Err(MarketError::InsufficientPool {
                prediction,
                requested: gross,
                remaining,
            });
        }
        Ok(Payout {
            prediction,
            voter: voter.to_string(),
            kind,
            gross,
            fees: split,
            paid_at: now,
            transferred: false,
        })
    }
    pub(crate) fn claim(
        &mut self,
        ledger: &mut Ledger,
        recovery: &RecoveryBook,
        fees: &FeePolicy,
        prediction: PredictionId,
        voter: &str,
        now: Timestamp,
    ) -> Result<Payout, MarketError> {
        let payout = self.preview(ledger, recovery, fees, prediction, voter, now)?;
        ledger.mark_claimed(prediction, voter)?;
        debug!(
            "Paid {:?} of {} ({} net) to {} on prediction {}",
            payout.kind, payout.gross, payout.fees.net, voter, prediction
        );
        self.payouts
            .insert((prediction, voter.to_string()), payout.clone());
        Ok(payout)
    }
    pub fn calculate_winnings(
        bet_amount: Amount,
        winning_amount: Amount,
        losing_amount: Amount,
    ) -> Result<Amount, MarketError> {
        //! The share of the losing pool is truncated, so winners together
        //! never get more than the pool holds. The dust stays in the pool.
        if winning_amount == 0 {
            return Err(MarketError::InvalidState(
                "winning side holds no stake".to_string(),
            ));
        }
        let share = (Decimal::from(bet_amount) * Decimal::from(losing_amount)
            / Decimal::from(winning_amount))
        .trunc();
        let gross = Decimal::from(bet_amount) + share;
        gross.to_u64().ok_or_else(|| {
            MarketError::InvalidInput(format!("payout of {} does not fit an amount", gross))
        })
    }
    pub fn calculate_recovery(bet_amount: Amount, recovery_percent: u8) -> Result<Amount, MarketError> {
        //! See [`calculate_winnings()`]
        let gross =
            (Decimal::from(bet_amount) * Decimal::from(recovery_percent) / dec!(100)).trunc();
        gross.to_u64().ok_or_else(|| {
            MarketError::InvalidInput(format!("recovery of {} does not fit an amount", gross))
        })
    }
    /// Gross paid out of the stake pool of `prediction`.
    pub fn disbursed(&self, prediction: PredictionId) -> Amount {
        self.payouts_on(prediction)
            .iter()
            .filter(|p| p.kind.from_pool())
            .map(|p| p.gross)
            .sum()
    }
    /// Gross paid out of the recovery reserve for losers of `prediction`.
    pub fn recovered(&self, prediction: PredictionId) -> Amount {
        self.payouts_on(prediction)
            .iter()
            .filter(|p| !p.kind.from_pool())
            .map(|p| p.gross)
            .sum()
    }
    pub fn pending_transfers(&self) -> Vec<&Payout> {
        self.payouts.values().filter(|p| !p.transferred).collect()
    }
    pub(crate) fn mark_transferred(
        &mut self,
        prediction: PredictionId,
        voter: &str,
    ) -> Result<(), MarketError> {
        let payout = self
            .payouts
            .get_mut(&(prediction, voter.to_string()))
            .ok_or_else(|| {
                MarketError::NotFound(format!(
                    "no payout for {} on prediction {}",
                    voter, prediction
                ))
            })?;
        payout.transferred = true;
        Ok(())
    }
    pub fn payouts_on(&self, prediction: PredictionId) -> Vec<&Payout> {
        self.payouts
            .range((prediction, String::new())..(prediction + 1, String::new()))
            .map(|(_, payout)| payout)
            .collect()
    }
    pub fn all(&self) -> impl Iterator<Item = &Payout> {
        self.payouts.values()
    }
    pub(crate) fn restore(&mut self, prediction: PredictionId, payouts: Vec<Payout>) {
        self.payouts
            .retain(|(payout_prediction, _), _| *payout_prediction != prediction);
        for payout in payouts {
            self.load(payout);
        }
    }
    pub(crate) fn load(&mut self, payout: Payout) {
        self.payouts
            .insert((payout.prediction, payout.voter.clone()), payout);
    }
}
