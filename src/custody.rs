use crate::api::{Amount, BalanceEntry, Payout, Recipient};
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use log::debug;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

/// Holds the staked value and moves it out once a claim was recorded.
#[async_trait]
pub trait Custody {
    async fn transfer(&self, to: Recipient, amount: Amount) -> Result<()>;
    async fn balances(&self) -> Result<Vec<BalanceEntry>>;
}

/// Sends the three parts of a payout to their recipients. Empty parts are
/// skipped.
pub async fn disburse(custody: &(dyn Custody + Send + Sync), payout: &Payout) -> Result<()> {
    let parts = [
        (Recipient::User(payout.voter.clone()), payout.fees.net),
        (Recipient::Charity, payout.fees.charity),
        (Recipient::Maintenance, payout.fees.maintenance),
    ];
    for (recipient, amount) in parts {
        if amount > 0 {
            custody.transfer(recipient, amount).await?;
        }
    }
    Ok(())
}

#[derive(Debug, Default, Clone)]
pub struct InMemoryCustody {
    balances: Arc<Mutex<BTreeMap<Recipient, Amount>>>,
}
#[async_trait]
impl Custody for InMemoryCustody {
    async fn transfer(&self, to: Recipient, amount: Amount) -> Result<()> {
        let mut balances = self
            .balances
            .lock()
            .map_err(|_| anyhow!("custody balances are poisoned"))?;
        let balance = balances.entry(to.clone()).or_insert(0);
        *balance = balance
            .checked_add(amount)
            .ok_or_else(|| anyhow!("balance of {} overflows", to))?;
        debug!("Transferred {} to {}", amount, to);
        Ok(())
    }
    async fn balances(&self) -> Result<Vec<BalanceEntry>> {
        let balances = self
            .balances
            .lock()
            .map_err(|_| anyhow!("custody balances are poisoned"))?;
        Ok(balances
            .iter()
            .map(|(recipient, amount)| BalanceEntry {
                recipient: recipient.clone(),
                amount: *amount,
            })
            .collect())
    }
}
