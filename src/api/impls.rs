use std::{
    fmt::{Display, Formatter},
    str::FromStr,
};

use anyhow::bail;

use super::*;

impl Display for Category {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let output = match self {
            Self::Fitness => "Fitness",
            Self::Chain => "Chain",
            Self::Community => "Community",
            Self::Custom => "Custom",
        };
        write!(f, "{}", output)
    }
}
impl FromStr for Category {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "Fitness" => Ok(Self::Fitness),
            "Chain" => Ok(Self::Chain),
            "Community" => Ok(Self::Community),
            "Custom" => Ok(Self::Custom),
            e => bail!("Couldn't deserialize to Category: {}", e),
        }
    }
}
impl Display for PredictionStatus {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let output = match self {
            Self::Active => "Active",
            Self::Resolved => "Resolved",
            Self::Cancelled => "Cancelled",
        };
        write!(f, "{}", output)
    }
}
impl FromStr for PredictionStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "Active" => Ok(Self::Active),
            "Resolved" => Ok(Self::Resolved),
            "Cancelled" => Ok(Self::Cancelled),
            e => bail!("Couldn't deserialize to PredictionStatus: {}", e),
        }
    }
}
impl Display for Outcome {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let output = match self {
            Self::Unresolved => "Unresolved",
            Self::Yes => "Yes",
            Self::No => "No",
        };
        write!(f, "{}", output)
    }
}
impl FromStr for Outcome {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "Unresolved" => Ok(Self::Unresolved),
            "Yes" => Ok(Self::Yes),
            "No" => Ok(Self::No),
            e => bail!("Couldn't deserialize to Outcome: {}", e),
        }
    }
}
impl Display for ChallengeStatus {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let output = match self {
            Self::Open => "Open",
            Self::Completed => "Completed",
            Self::Expired => "Expired",
        };
        write!(f, "{}", output)
    }
}
impl FromStr for ChallengeStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "Open" => Ok(Self::Open),
            "Completed" => Ok(Self::Completed),
            "Expired" => Ok(Self::Expired),
            e => bail!("Couldn't deserialize to ChallengeStatus: {}", e),
        }
    }
}
impl PayoutKind {
    /// Winnings and refunds come out of the prediction's stake pool,
    /// recoveries out of the platform's recovery reserve.
    pub fn from_pool(&self) -> bool {
        !matches!(self, Self::Recovery)
    }
}
impl Display for PayoutKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let output = match self {
            Self::Winnings => "Winnings",
            Self::Recovery => "Recovery",
            Self::Refund => "Refund",
        };
        write!(f, "{}", output)
    }
}
impl FromStr for PayoutKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "Winnings" => Ok(Self::Winnings),
            "Recovery" => Ok(Self::Recovery),
            "Refund" => Ok(Self::Refund),
            e => bail!("Couldn't deserialize to PayoutKind: {}", e),
        }
    }
}
impl Display for UserRole {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let output = match self {
            Self::User => "User",
            Self::Oracle => "Oracle",
            Self::Admin => "Admin",
        };
        write!(f, "{}", output)
    }
}
impl FromStr for UserRole {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "User" => Ok(Self::User),
            "Oracle" => Ok(Self::Oracle),
            "Admin" => Ok(Self::Admin),
            e => bail!("Couldn't deserialize to UserRole: {}", e),
        }
    }
}
impl Default for UserRole {
    fn default() -> Self {
        UserRole::User
    }
}
impl Display for Recipient {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::User(user) => write!(f, "{}", user),
            Self::Charity => write!(f, "charity"),
            Self::Maintenance => write!(f, "maintenance"),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn stored_names_parse_back() {
        for status in [
            PredictionStatus::Active,
            PredictionStatus::Resolved,
            PredictionStatus::Cancelled,
        ] {
            assert_eq!(
                PredictionStatus::from_str(&status.to_string()).unwrap(),
                status
            );
        }
        assert_eq!(Outcome::from_str("Yes").unwrap(), Outcome::Yes);
        assert_eq!(
            ChallengeStatus::from_str("Expired").unwrap(),
            ChallengeStatus::Expired
        );
        assert!(Category::from_str("Cardio").is_err());
    }
}
