use crate::api::*;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

pub const DEFAULT_CHARITY_FEE_PERCENT: u8 = 15;
pub const DEFAULT_MAINTENANCE_FEE_PERCENT: u8 = 5;

/// Fixed split of every gross payout into charity, maintenance and the
/// part that reaches the user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeePolicy {
    charity_fee_percent: u8,
    maintenance_fee_percent: u8,
}
impl FeePolicy {
    pub fn new(charity_fee_percent: u8, maintenance_fee_percent: u8) -> Result<Self, MarketError> {
        if charity_fee_percent as u16 + maintenance_fee_percent as u16 > 100 {
            return Err(MarketError::InvalidInput(format!(
                "fees add up to {}% but may be at most 100%",
                charity_fee_percent as u16 + maintenance_fee_percent as u16
            )));
        }
        Ok(Self {
            charity_fee_percent,
            maintenance_fee_percent,
        })
    }
    /// No fees at all, every payout reaches the user in full.
    pub fn free() -> Self {
        Self {
            charity_fee_percent: 0,
            maintenance_fee_percent: 0,
        }
    }
    pub fn charity_fee_percent(&self) -> u8 {
        self.charity_fee_percent
    }
    pub fn maintenance_fee_percent(&self) -> u8 {
        self.maintenance_fee_percent
    }
    pub fn split(&self, gross: Amount) -> FeeSplit {
        //! Fees are truncated, so rounding dust always stays with the user.
        //! The total fee is truncated once and charity is truncated on its
        //! own; maintenance takes what is left of the total fee. That way
        //! 15 at 15% + 5% splits into 2 + 1 + 12 instead of losing a unit
        //! to double truncation.
        let gross_dec = Decimal::from(gross);
        let total_percent =
            Decimal::from(self.charity_fee_percent) + Decimal::from(self.maintenance_fee_percent);
        let total_fee = Self::truncate(gross_dec * total_percent / dec!(100));
        let charity =
            Self::truncate(gross_dec * Decimal::from(self.charity_fee_percent) / dec!(100));
        let maintenance = total_fee.saturating_sub(charity);
        FeeSplit {
            charity,
            maintenance,
            net: gross - total_fee,
        }
    }
    /// Split without any fee, used for refunds of cancelled predictions.
    pub fn refund(gross: Amount) -> FeeSplit {
        FeeSplit {
            charity: 0,
            maintenance: 0,
            net: gross,
        }
    }
    fn truncate(value: Decimal) -> Amount {
        // Fees never exceed the gross, so they always fit back into an Amount.
        value.trunc().to_u64().unwrap_or(0)
    }
}
impl Default for FeePolicy {
    fn default() -> Self {
        Self {
            charity_fee_percent: DEFAULT_CHARITY_FEE_PERCENT,
            maintenance_fee_percent: DEFAULT_MAINTENANCE_FEE_PERCENT,
        }
    }
}
