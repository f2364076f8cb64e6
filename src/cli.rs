use anyhow::Result;
use api::*;
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use serde::Serialize;

use crate::client::Client;

mod api;
mod client;

#[derive(Parser)]
struct Args {
    #[command(subcommand)]
    command: Commands,
    #[arg(short, long)]
    url: String,
    /// Session user the requests are sent as
    #[arg(short = 's', long)]
    user: String,
}
#[derive(Subcommand)]
enum Commands {
    NewPrediction {
        #[arg(short, long)]
        title: String,
        #[arg(short, long, default_value = "")]
        description: String,
        /// RFC 3339, e.g. 2030-01-01T00:00:00Z
        #[arg(long)]
        target_date: DateTime<Utc>,
        #[arg(long)]
        target_value: u64,
        #[arg(short, long, default_value = "Fitness")]
        category: Category,
        #[arg(short, long)]
        auto_resolvable: bool,
    },
    Vote {
        #[arg(short, long)]
        prediction: PredictionId,
        #[arg(short, long)]
        yes: bool,
        #[arg(short, long)]
        amount: Amount,
    },
    RecordProgress {
        #[arg(short, long)]
        prediction: PredictionId,
        #[arg(short, long)]
        value: u64,
    },
    Resolve {
        #[arg(short, long)]
        prediction: PredictionId,
        #[arg(short, long)]
        outcome: Option<Outcome>,
        #[arg(short, long)]
        force: bool,
    },
    Cancel {
        #[arg(short, long)]
        prediction: PredictionId,
    },
    OpenChallenge {
        #[arg(short, long)]
        prediction: PredictionId,
    },
    CompleteChallenge {
        #[arg(short, long)]
        challenge: ChallengeId,
        #[arg(long)]
        source: String,
        #[arg(short, long)]
        amount: u64,
    },
    ExpireChallenge {
        #[arg(short, long)]
        challenge: ChallengeId,
    },
    Claim {
        #[arg(short, long)]
        prediction: PredictionId,
    },
    GetPredictions {
        #[arg(long)]
        status: Option<PredictionStatus>,
        #[arg(short, long)]
        category: Option<Category>,
        #[arg(long)]
        creator: Option<UserId>,
    },
    GetPrediction {
        #[arg(short, long)]
        prediction: PredictionId,
    },
    GetVotes {
        /// Defaults to the session user
        #[arg(long)]
        of: Option<UserId>,
    },
    GetChallenges {
        #[arg(short, long)]
        prediction: PredictionId,
    },
    GetClaimable {
        #[arg(short, long)]
        prediction: PredictionId,
    },
    GetLeaderboard {
        #[arg(short, long, default_value_t = 10)]
        limit: usize,
    },
    GetStats,
    GetBalances,
}

fn print(value: &impl Serialize) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Args::parse();
    let user = cli.user;
    let client = Client::new(cli.url, user.clone());

    match cli.command {
        Commands::NewPrediction {
            title,
            description,
            target_date,
            target_value,
            category,
            auto_resolvable,
        } => {
            let request = NewPredictionRequest {
                title,
                description,
                target_date,
                target_value,
                category,
                auto_resolvable,
            };
            let id = client.new_prediction(request).await?;
            println!("Created new prediction: {}", id);
        }
        Commands::Vote {
            prediction,
            yes,
            amount,
        } => {
            let request = VoteRequest {
                prediction,
                voter: user,
                is_yes: yes,
                amount,
            };
            print(&client.vote(request).await?)?;
        }
        Commands::RecordProgress { prediction, value } => {
            client
                .record_progress(ProgressRequest {
                    prediction,
                    current_value: value,
                })
                .await?;
        }
        Commands::Resolve {
            prediction,
            outcome,
            force,
        } => {
            let response = client
                .resolve(ResolveRequest {
                    prediction,
                    outcome,
                    force,
                })
                .await?;
            println!("Prediction {} resolved as {}", prediction, response.outcome);
        }
        Commands::Cancel { prediction } => {
            client.cancel(prediction).await?;
        }
        Commands::OpenChallenge { prediction } => {
            let challenge = client
                .open_challenge(PredictionUserRequest { prediction, user })
                .await?;
            println!("Opened challenge {}", challenge);
        }
        Commands::CompleteChallenge {
            challenge,
            source,
            amount,
        } => {
            client
                .complete_challenge(CompleteChallengeRequest {
                    challenge,
                    evidence: Evidence {
                        source,
                        reported_amount: amount,
                    },
                })
                .await?;
        }
        Commands::ExpireChallenge { challenge } => {
            let status = client.expire_challenge(challenge).await?;
            println!("Challenge {} is {}", challenge, status);
        }
        Commands::Claim { prediction } => {
            print(
                &client
                    .claim(PredictionUserRequest { prediction, user })
                    .await?,
            )?;
        }
        Commands::GetPredictions {
            status,
            category,
            creator,
        } => {
            let filter = PredictionsFilter {
                status,
                category,
                creator,
            };
            print(&client.get_predictions(&filter).await?)?;
        }
        Commands::GetPrediction { prediction } => {
            print(&client.get_prediction(prediction).await?)?;
            print(&client.get_odds(prediction).await?)?;
        }
        Commands::GetVotes { of } => {
            print(&client.get_user_votes(of.unwrap_or(user)).await?)?;
        }
        Commands::GetChallenges { prediction } => {
            print(&client.get_challenges(prediction).await?)?;
        }
        Commands::GetClaimable { prediction } => {
            print(
                &client
                    .get_claimable(PredictionUserRequest { prediction, user })
                    .await?,
            )?;
        }
        Commands::GetLeaderboard { limit } => {
            print(&client.get_leaderboard(limit).await?)?;
        }
        Commands::GetStats => {
            print(&client.get_stats().await?)?;
        }
        Commands::GetBalances => {
            print(&client.get_balances().await?)?;
        }
    }
    Ok(())
}
