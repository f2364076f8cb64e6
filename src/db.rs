use crate::api::*;
use crate::engine::Scope;
use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow};
use sqlx::{query, Executor, Row, SqlitePool};
use std::collections::BTreeMap;
use std::str::FromStr;

#[async_trait]
pub trait DB {
    /// Writes a prediction with its votes, challenges and payouts in one
    /// transaction.
    async fn save_scope(&self, scope: &Scope) -> Result<()>;
    async fn save_challenges(&self, challenges: &[SweatEquityChallenge]) -> Result<()>;
    async fn load_scopes(&self) -> Result<Vec<Scope>>;
}
pub struct SQLite {
    connection: SqlitePool,
}
impl SQLite {
    pub async fn new(url: &str) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(url)
            .with_context(|| format!("invalid database url {}", url))?
            .create_if_missing(true);
        // A single connection keeps an in-memory database alive and shared.
        let connection = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await
            .with_context(|| format!("couldn't open database {}", url))?;
        connection
            .execute(
                "CREATE TABLE IF NOT EXISTS predictions (\
                id INTEGER PRIMARY KEY,\
                creator NOT NULL,\
                title NOT NULL,\
                description NOT NULL,\
                target_date NOT NULL,\
                target_value NOT NULL,\
                current_value NOT NULL,\
                category NOT NULL,\
                total_staked NOT NULL,\
                yes_votes NOT NULL,\
                no_votes NOT NULL,\
                status NOT NULL,\
                outcome NOT NULL,\
                auto_resolvable NOT NULL,\
                created_at NOT NULL,\
                resolved_at\
                )",
            )
            .await?;
        connection
            .execute(
                "CREATE TABLE IF NOT EXISTS votes (\
                prediction NOT NULL,\
                voter NOT NULL,\
                is_yes NOT NULL,\
                amount NOT NULL,\
                claimed NOT NULL,\
                created_at NOT NULL,\
                PRIMARY KEY (prediction, voter)\
                )",
            )
            .await?;
        connection
            .execute(
                "CREATE TABLE IF NOT EXISTS challenges (\
                id INTEGER PRIMARY KEY,\
                prediction NOT NULL,\
                voter NOT NULL,\
                required_additional_amount NOT NULL,\
                window_start NOT NULL,\
                window_end NOT NULL,\
                status NOT NULL,\
                verified_amount\
                )",
            )
            .await?;
        connection
            .execute(
                "CREATE TABLE IF NOT EXISTS payouts (\
                prediction NOT NULL,\
                voter NOT NULL,\
                kind NOT NULL,\
                gross NOT NULL,\
                charity NOT NULL,\
                maintenance NOT NULL,\
                net NOT NULL,\
                paid_at NOT NULL,\
                transferred NOT NULL,\
                PRIMARY KEY (prediction, voter)\
                )",
            )
            .await?;
        Ok(Self { connection })
    }
}

/// SQLite integers are signed, amounts are stored as i64 and checked on the
/// way in and out.
fn to_db(amount: u64) -> Result<i64> {
    i64::try_from(amount).with_context(|| format!("{} is too large to store", amount))
}
fn from_db(value: i64) -> Result<u64> {
    u64::try_from(value).with_context(|| format!("stored amount {} is negative", value))
}
fn amount(row: &SqliteRow, column: &str) -> Result<u64> {
    from_db(row.try_get(column)?)
}

fn prediction_from_row(row: &SqliteRow) -> Result<Prediction> {
    Ok(Prediction {
        id: row.try_get("id")?,
        creator: row.try_get("creator")?,
        title: row.try_get("title")?,
        description: row.try_get("description")?,
        target_date: row.try_get("target_date")?,
        target_value: amount(row, "target_value")?,
        current_value: amount(row, "current_value")?,
        category: Category::from_str(row.try_get("category")?)?,
        total_staked: amount(row, "total_staked")?,
        yes_votes: amount(row, "yes_votes")?,
        no_votes: amount(row, "no_votes")?,
        status: PredictionStatus::from_str(row.try_get("status")?)?,
        outcome: Outcome::from_str(row.try_get("outcome")?)?,
        auto_resolvable: row.try_get("auto_resolvable")?,
        created_at: row.try_get("created_at")?,
        resolved_at: row.try_get("resolved_at")?,
    })
}
fn vote_from_row(row: &SqliteRow) -> Result<Vote> {
    Ok(Vote {
        prediction: row.try_get("prediction")?,
        voter: row.try_get("voter")?,
        is_yes: row.try_get("is_yes")?,
        amount: amount(row, "amount")?,
        claimed: row.try_get("claimed")?,
        created_at: row.try_get("created_at")?,
    })
}
fn challenge_from_row(row: &SqliteRow) -> Result<SweatEquityChallenge> {
    let verified_amount: Option<i64> = row.try_get("verified_amount")?;
    Ok(SweatEquityChallenge {
        id: row.try_get("id")?,
        prediction: row.try_get("prediction")?,
        voter: row.try_get("voter")?,
        required_additional_amount: amount(row, "required_additional_amount")?,
        window_start: row.try_get("window_start")?,
        window_end: row.try_get("window_end")?,
        status: ChallengeStatus::from_str(row.try_get("status")?)?,
        verified_amount: verified_amount.map(from_db).transpose()?,
    })
}
fn payout_from_row(row: &SqliteRow) -> Result<Payout> {
    Ok(Payout {
        prediction: row.try_get("prediction")?,
        voter: row.try_get("voter")?,
        kind: PayoutKind::from_str(row.try_get("kind")?)?,
        gross: amount(row, "gross")?,
        fees: FeeSplit {
            charity: amount(row, "charity")?,
            maintenance: amount(row, "maintenance")?,
            net: amount(row, "net")?,
        },
        paid_at: row.try_get("paid_at")?,
        transferred: row.try_get("transferred")?,
    })
}

async fn upsert_challenge<'c, E>(executor: E, challenge: &SweatEquityChallenge) -> Result<()>
where
    E: Executor<'c, Database = sqlx::Sqlite>,
{
    let verified_amount = challenge.verified_amount.map(to_db).transpose()?;
    executor
        .execute(
            query(
                "INSERT OR REPLACE INTO challenges (\
                id,\
                prediction,\
                voter,\
                required_additional_amount,\
                window_start,\
                window_end,\
                status,\
                verified_amount) \
                VALUES (?,?,?,?,?,?,?,?)",
            )
            .bind(challenge.id)
            .bind(challenge.prediction)
            .bind(challenge.voter.clone())
            .bind(to_db(challenge.required_additional_amount)?)
            .bind(challenge.window_start)
            .bind(challenge.window_end)
            .bind(challenge.status.to_string())
            .bind(verified_amount),
        )
        .await
        .with_context(|| format!("couldn't store challenge {}", challenge.id))?;
    Ok(())
}

#[async_trait]
impl DB for SQLite {
    async fn save_scope(&self, scope: &Scope) -> Result<()> {
        let prediction = &scope.prediction;
        let mut tx = self.connection.begin().await?;
        query(
            "INSERT OR REPLACE INTO predictions (\
            id,\
            creator,\
            title,\
            description,\
            target_date,\
            target_value,\
            current_value,\
            category,\
            total_staked,\
            yes_votes,\
            no_votes,\
            status,\
            outcome,\
            auto_resolvable,\
            created_at,\
            resolved_at) \
            VALUES (?,?,?,?,?,?,?,?,?,?,?,?,?,?,?,?)",
        )
        .bind(prediction.id)
        .bind(prediction.creator.clone())
        .bind(prediction.title.clone())
        .bind(prediction.description.clone())
        .bind(prediction.target_date)
        .bind(to_db(prediction.target_value)?)
        .bind(to_db(prediction.current_value)?)
        .bind(prediction.category.to_string())
        .bind(to_db(prediction.total_staked)?)
        .bind(to_db(prediction.yes_votes)?)
        .bind(to_db(prediction.no_votes)?)
        .bind(prediction.status.to_string())
        .bind(prediction.outcome.to_string())
        .bind(prediction.auto_resolvable)
        .bind(prediction.created_at)
        .bind(prediction.resolved_at)
        .execute(&mut *tx)
        .await
        .with_context(|| format!("couldn't store prediction {}", prediction.id))?;
        for vote in &scope.votes {
            query(
                "INSERT OR REPLACE INTO votes (\
                prediction,\
                voter,\
                is_yes,\
                amount,\
                claimed,\
                created_at) \
                VALUES (?,?,?,?,?,?)",
            )
            .bind(vote.prediction)
            .bind(vote.voter.clone())
            .bind(vote.is_yes)
            .bind(to_db(vote.amount)?)
            .bind(vote.claimed)
            .bind(vote.created_at)
            .execute(&mut *tx)
            .await
            .with_context(|| {
                format!(
                    "couldn't store vote of {} on prediction {}",
                    vote.voter, vote.prediction
                )
            })?;
        }
        for challenge in &scope.challenges {
            upsert_challenge(&mut *tx, challenge).await?;
        }
        for payout in &scope.payouts {
            query(
                "INSERT OR REPLACE INTO payouts (\
                prediction,\
                voter,\
                kind,\
                gross,\
                charity,\
                maintenance,\
                net,\
                paid_at,\
                transferred) \
                VALUES (?,?,?,?,?,?,?,?,?)",
            )
            .bind(payout.prediction)
            .bind(payout.voter.clone())
            .bind(payout.kind.to_string())
            .bind(to_db(payout.gross)?)
            .bind(to_db(payout.fees.charity)?)
            .bind(to_db(payout.fees.maintenance)?)
            .bind(to_db(payout.fees.net)?)
            .bind(payout.paid_at)
            .bind(payout.transferred)
            .execute(&mut *tx)
            .await
            .with_context(|| {
                format!(
                    "couldn't store payout of {} on prediction {}",
                    payout.voter, payout.prediction
                )
            })?;
        }
        tx.commit().await?;
        Ok(())
    }
    async fn save_challenges(&self, challenges: &[SweatEquityChallenge]) -> Result<()> {
        let mut tx = self.connection.begin().await?;
        for challenge in challenges {
            upsert_challenge(&mut *tx, challenge).await?;
        }
        tx.commit().await?;
        Ok(())
    }
    async fn load_scopes(&self) -> Result<Vec<Scope>> {
        let mut scopes = BTreeMap::new();
        let rows = self
            .connection
            .fetch_all(query("SELECT * FROM predictions ORDER BY id"))
            .await?;
        for row in rows {
            let prediction = prediction_from_row(&row)?;
            scopes.insert(
                prediction.id,
                Scope {
                    prediction,
                    votes: vec![],
                    challenges: vec![],
                    payouts: vec![],
                },
            );
        }
        let rows = self
            .connection
            .fetch_all(query("SELECT * FROM votes"))
            .await?;
        for row in rows {
            let vote = vote_from_row(&row)?;
            scopes
                .get_mut(&vote.prediction)
                .with_context(|| format!("vote for unknown prediction {}", vote.prediction))?
                .votes
                .push(vote);
        }
        let rows = self
            .connection
            .fetch_all(query("SELECT * FROM challenges ORDER BY id"))
            .await?;
        for row in rows {
            let challenge = challenge_from_row(&row)?;
            scopes
                .get_mut(&challenge.prediction)
                .with_context(|| {
                    format!("challenge for unknown prediction {}", challenge.prediction)
                })?
                .challenges
                .push(challenge);
        }
        let rows = self
            .connection
            .fetch_all(query("SELECT * FROM payouts"))
            .await?;
        for row in rows {
            let payout = payout_from_row(&row)?;
            scopes
                .get_mut(&payout.prediction)
                .with_context(|| format!("payout for unknown prediction {}", payout.prediction))?
                .payouts
                .push(payout);
        }
        Ok(scopes.into_values().collect())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn scope() -> Scope {
        Scope {
            prediction: Prediction {
                id: 3,
                creator: "alice".into(),
                title: "100 pushups".into(),
                description: String::new(),
                target_date: 1000,
                target_value: 100,
                current_value: 70,
                category: Category::Fitness,
                total_staked: 15,
                yes_votes: 10,
                no_votes: 5,
                status: PredictionStatus::Resolved,
                outcome: Outcome::Yes,
                auto_resolvable: true,
                created_at: 0,
                resolved_at: Some(1000),
            },
            votes: vec![
                Vote {
                    prediction: 3,
                    voter: "bob".into(),
                    is_yes: true,
                    amount: 10,
                    claimed: true,
                    created_at: 1,
                },
                Vote {
                    prediction: 3,
                    voter: "carol".into(),
                    is_yes: false,
                    amount: 5,
                    claimed: false,
                    created_at: 2,
                },
            ],
            challenges: vec![SweatEquityChallenge {
                id: 1,
                prediction: 3,
                voter: "carol".into(),
                required_additional_amount: 30,
                window_start: 1001,
                window_end: 87401,
                status: ChallengeStatus::Open,
                verified_amount: None,
            }],
            payouts: vec![Payout {
                prediction: 3,
                voter: "bob".into(),
                kind: PayoutKind::Winnings,
                gross: 15,
                fees: FeeSplit {
                    charity: 2,
                    maintenance: 1,
                    net: 12,
                },
                paid_at: 1001,
                transferred: true,
            }],
        }
    }

    #[tokio::test]
    async fn scope_survives_a_round_trip() {
        let db = SQLite::new("sqlite::memory:").await.unwrap();
        let scope = scope();
        db.save_scope(&scope).await.unwrap();
        assert_eq!(db.load_scopes().await.unwrap(), vec![scope]);
    }
    #[tokio::test]
    async fn saving_again_replaces_rows() {
        let db = SQLite::new("sqlite::memory:").await.unwrap();
        let mut scope = scope();
        db.save_scope(&scope).await.unwrap();
        scope.votes[1].claimed = true;
        scope.challenges[0].status = ChallengeStatus::Completed;
        scope.challenges[0].verified_amount = Some(31);
        db.save_scope(&scope).await.unwrap();
        let loaded = db.load_scopes().await.unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0], scope);
    }
    #[tokio::test]
    async fn challenges_are_saved_on_their_own() {
        let db = SQLite::new("sqlite::memory:").await.unwrap();
        let scope = scope();
        db.save_scope(&scope).await.unwrap();
        let mut expired = scope.challenges[0].clone();
        expired.status = ChallengeStatus::Expired;
        db.save_challenges(&[expired.clone()]).await.unwrap();
        assert_eq!(
            db.load_scopes().await.unwrap()[0].challenges,
            vec![expired]
        );
    }
    #[tokio::test]
    async fn oversized_amounts_are_rejected() {
        let db = SQLite::new("sqlite::memory:").await.unwrap();
        let mut scope = scope();
        scope.prediction.target_value = u64::MAX;
        assert!(db.save_scope(&scope).await.is_err());
        assert!(db.load_scopes().await.unwrap().is_empty());
    }
}
