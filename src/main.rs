use crate::api::*;
use crate::custody::InMemoryCustody;
use crate::db::SQLite;
use crate::settings::Settings;
use crate::sweatmarket::SweatMarket;
use crate::verifier::{verify_evidence, FitnessVerifier, HttpVerifier, TrustingVerifier};
use anyhow::{Context, Result};
use axum::extract::{Json, Query, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::Router;
use axum_macros::debug_handler;
use chrono::Utc;
use clap::Parser;
use env_logger::{Builder, WriteStyle};
use log::{debug, error, info};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;

mod api;
mod client;
mod custody;
mod db;
mod engine;
mod fees;
mod ledger;
mod payout;
mod recovery;
mod resolution;
mod settings;
mod sweatmarket;
mod verifier;

fn now() -> Timestamp {
    Utc::now().timestamp()
}

#[debug_handler]
async fn new_prediction(
    State(state): State<Arc<RwLock<SweatMarket>>>,
    Json(request): Json<PostRequest<NewPredictionRequest>>,
) -> Result<(StatusCode, Json<PredictionId>), (StatusCode, String)> {
    let mut backend = state.write().await;
    let title = request.data.title.clone();
    let id = backend
        .new_prediction(request.data, request.session, now())
        .await
        .map_err(map_any_err_and_code)?;
    debug!("Created prediction {}: {}", id, title);
    Ok((StatusCode::CREATED, Json(id)))
}
#[debug_handler]
async fn vote(
    State(state): State<Arc<RwLock<SweatMarket>>>,
    Json(request): Json<PostRequest<VoteRequest>>,
) -> Result<Json<Vote>, (StatusCode, String)> {
    let mut backend = state.write().await;
    let vote = backend
        .vote(request.data, request.session, now())
        .await
        .map_err(map_any_err_and_code)?;
    Ok(Json(vote))
}
async fn record_progress(
    State(state): State<Arc<RwLock<SweatMarket>>>,
    Json(request): Json<PostRequest<ProgressRequest>>,
) -> Result<(), (StatusCode, String)> {
    let mut backend = state.write().await;
    backend
        .record_progress(request.data, request.session)
        .await
        .map_err(map_any_err_and_code)?;
    Ok(())
}
#[debug_handler]
async fn resolve(
    State(state): State<Arc<RwLock<SweatMarket>>>,
    Json(request): Json<PostRequest<ResolveRequest>>,
) -> Result<Json<ResolveResponse>, (StatusCode, String)> {
    let mut backend = state.write().await;
    let prediction = request.data.prediction;
    debug!(
        "{} resolves prediction {} with {:?}",
        request.session.user, prediction, request.data.outcome
    );
    let outcome = backend
        .resolve(request.data, request.session, now())
        .await
        .map_err(map_any_err_and_code)?;
    Ok(Json(ResolveResponse {
        prediction,
        outcome,
    }))
}
async fn cancel(
    State(state): State<Arc<RwLock<SweatMarket>>>,
    Json(request): Json<PostRequest<PredictionRequest>>,
) -> Result<(), (StatusCode, String)> {
    let mut backend = state.write().await;
    backend
        .cancel(request.data.prediction, request.session, now())
        .await
        .map_err(map_any_err_and_code)?;
    Ok(())
}
async fn open_challenge(
    State(state): State<Arc<RwLock<SweatMarket>>>,
    Json(request): Json<PostRequest<PredictionUserRequest>>,
) -> Result<(StatusCode, Json<ChallengeId>), (StatusCode, String)> {
    let mut backend = state.write().await;
    let challenge = backend
        .open_challenge(request.data, request.session, now())
        .await
        .map_err(map_any_err_and_code)?;
    Ok((StatusCode::CREATED, Json(challenge)))
}
async fn complete_challenge(
    State(state): State<Arc<RwLock<SweatMarket>>>,
    Json(request): Json<PostRequest<CompleteChallengeRequest>>,
) -> Result<(), (StatusCode, String)> {
    let (verifier, challenge) = state
        .read()
        .await
        .verification(request.data.challenge, &request.session)
        .map_err(map_any_err_and_code)?;
    let proof = verify_evidence(&**verifier, &challenge, &request.data.evidence)
        .await
        .map_err(map_any_err_and_code)?;
    let mut backend = state.write().await;
    backend
        .apply_proof(&challenge, proof, now())
        .await
        .map_err(map_any_err_and_code)?;
    Ok(())
}
async fn expire_challenge(
    State(state): State<Arc<RwLock<SweatMarket>>>,
    Json(request): Json<PostRequest<ChallengeRequest>>,
) -> Result<Json<ChallengeStatus>, (StatusCode, String)> {
    let mut backend = state.write().await;
    let status = backend
        .expire_challenge(request.data.challenge, now())
        .await
        .map_err(map_any_err_and_code)?;
    debug!(
        "{} checked challenge {}, it is {}",
        request.session.user, request.data.challenge, status
    );
    Ok(Json(status))
}
#[debug_handler]
async fn claim(
    State(state): State<Arc<RwLock<SweatMarket>>>,
    Json(request): Json<PostRequest<PredictionUserRequest>>,
) -> Result<Json<Payout>, (StatusCode, String)> {
    let mut backend = state.write().await;
    let payout = backend
        .claim(request.data, request.session, now())
        .await
        .map_err(map_any_err_and_code)?;
    Ok(Json(payout))
}

async fn get_prediction(
    State(state): State<Arc<RwLock<SweatMarket>>>,
    Json(request): Json<PredictionRequest>,
) -> Result<Json<Prediction>, (StatusCode, String)> {
    let backend = state.read().await;
    let prediction = backend
        .get_prediction(request.prediction)
        .map_err(map_any_err_and_code)?;
    Ok(Json(prediction))
}
async fn get_user_vote(
    State(state): State<Arc<RwLock<SweatMarket>>>,
    Json(request): Json<PredictionUserRequest>,
) -> Result<Json<Vote>, (StatusCode, String)> {
    let backend = state.read().await;
    let vote = backend
        .get_user_vote(request.prediction, &request.user)
        .map_err(map_any_err_and_code)?;
    Ok(Json(vote))
}
async fn get_predictions(
    State(state): State<Arc<RwLock<SweatMarket>>>,
    Query(filter): Query<PredictionsFilter>,
) -> Json<Vec<Prediction>> {
    let backend = state.read().await;
    Json(backend.get_predictions(&filter))
}
async fn get_user_votes(
    State(state): State<Arc<RwLock<SweatMarket>>>,
    Json(request): Json<UserRequest>,
) -> Json<Vec<Vote>> {
    let backend = state.read().await;
    Json(backend.get_user_votes(&request.user))
}
async fn get_challenges(
    State(state): State<Arc<RwLock<SweatMarket>>>,
    Json(request): Json<PredictionRequest>,
) -> Result<Json<Vec<SweatEquityChallenge>>, (StatusCode, String)> {
    let backend = state.read().await;
    let challenges = backend
        .get_challenges(request.prediction)
        .map_err(map_any_err_and_code)?;
    Ok(Json(challenges))
}
async fn get_odds(
    State(state): State<Arc<RwLock<SweatMarket>>>,
    Json(request): Json<PredictionRequest>,
) -> Result<Json<OddsResponse>, (StatusCode, String)> {
    let backend = state.read().await;
    let odds = backend
        .get_odds(request.prediction)
        .map_err(map_any_err_and_code)?;
    Ok(Json(odds))
}
async fn get_claimable(
    State(state): State<Arc<RwLock<SweatMarket>>>,
    Json(request): Json<PredictionUserRequest>,
) -> Result<Json<Payout>, (StatusCode, String)> {
    let backend = state.read().await;
    let payout = backend
        .get_claimable(request.prediction, &request.user, now())
        .map_err(map_any_err_and_code)?;
    Ok(Json(payout))
}
async fn get_leaderboard(
    State(state): State<Arc<RwLock<SweatMarket>>>,
    Json(request): Json<LeaderboardRequest>,
) -> Json<Vec<LeaderboardEntry>> {
    let backend = state.read().await;
    Json(backend.get_leaderboard(request.limit))
}
async fn get_stats(State(state): State<Arc<RwLock<SweatMarket>>>) -> Json<StatsResponse> {
    let backend = state.read().await;
    Json(backend.get_stats())
}
async fn get_balances(
    State(state): State<Arc<RwLock<SweatMarket>>>,
) -> Result<Json<Vec<BalanceEntry>>, (StatusCode, String)> {
    let backend = state.read().await;
    let balances = backend
        .get_balances()
        .await
        .map_err(map_any_err_and_code)?;
    Ok(Json(balances))
}

#[derive(Parser)]
struct Args {
    #[arg(short, long)]
    admin: Vec<String>,
    #[arg(short, long)]
    port: Option<u16>,
    #[arg(short, long)]
    test: bool,
    #[arg(short, long)]
    db: Option<String>,
    #[arg(short, long)]
    config: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Args::parse();
    let mut settings = Settings::load(cli.config.as_deref())?;
    settings.admins.extend(cli.admin);
    if let Some(port) = cli.port {
        settings.port = port;
    }
    if let Some(db) = cli.db {
        settings.db = db;
    }
    settings.test |= cli.test;
    Builder::default()
        .filter_level(settings.log_level()?)
        .write_style(WriteStyle::Always)
        .init();
    let (_port, handle) = run_server(settings).await?;
    handle.await?;
    Ok(())
}

fn router(state: Arc<RwLock<SweatMarket>>) -> Router {
    Router::new()
        .route("/new_prediction", post(new_prediction))
        .route("/vote", post(vote))
        .route("/record_progress", post(record_progress))
        .route("/resolve", post(resolve))
        .route("/cancel", post(cancel))
        .route("/open_challenge", post(open_challenge))
        .route("/complete_challenge", post(complete_challenge))
        .route("/expire_challenge", post(expire_challenge))
        .route("/claim", post(claim))
        .route("/get_prediction", post(get_prediction))
        .route("/get_user_vote", post(get_user_vote))
        .route("/get_predictions", get(get_predictions))
        .route("/get_user_votes", post(get_user_votes))
        .route("/get_challenges", post(get_challenges))
        .route("/get_odds", post(get_odds))
        .route("/get_claimable", post(get_claimable))
        .route("/get_leaderboard", post(get_leaderboard))
        .route("/get_stats", get(get_stats))
        .route("/get_balances", get(get_balances))
        .with_state(state)
}

async fn build_market(settings: &Settings) -> Result<SweatMarket> {
    let verifier: Box<dyn FitnessVerifier + Send + Sync> = match &settings.verifier_url {
        Some(url) => Box::new(HttpVerifier::new(
            url.clone(),
            Duration::from_secs(settings.verifier_timeout_secs),
        )?),
        None => Box::new(TrustingVerifier),
    };
    SweatMarket::new(
        Box::new(SQLite::new(&settings.db).await?),
        Box::new(InMemoryCustody::default()),
        verifier,
        settings.engine_config()?,
        settings.admins.clone(),
        settings.oracles.clone(),
        settings.test,
    )
    .await
}

/// Expires due challenges and retries pending transfers on a fixed interval.
fn spawn_expiry(state: Arc<RwLock<SweatMarket>>, every: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(every);
        loop {
            interval.tick().await;
            let mut backend = state.write().await;
            if let Err(e) = backend.expire_due(now()).await {
                error!("Expiring challenges failed: {:#}", e);
            }
            let transferred = backend.retry_transfers().await;
            if !transferred.is_empty() {
                info!("Retried {} pending transfers", transferred.len());
            }
        }
    })
}

async fn run_server(settings: Settings) -> Result<(u16, JoinHandle<()>)> {
    let state = Arc::new(RwLock::new(
        build_market(&settings)
            .await
            .context("couldn't set up the market")?,
    ));
    if settings.expiry_interval_secs > 0 {
        spawn_expiry(
            state.clone(),
            Duration::from_secs(settings.expiry_interval_secs),
        );
    }
    let app = router(state);

    let addr = SocketAddr::from(([127, 0, 0, 1], settings.port));
    let server = axum::Server::try_bind(&addr)?.serve(app.into_make_service());
    let port = server.local_addr().port();
    info!("Listening on {}", server.local_addr());
    let handle = tokio::spawn(async move {
        if let Err(e) = server.await {
            error!("Server stopped: {}", e);
        }
    });
    Ok((port, handle))
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::client::Client;
    use axum::body::Body;
    use axum::http::Request;
    use chrono::Duration as ChronoDuration;
    use tower::ServiceExt;

    fn test_settings() -> Settings {
        Settings {
            port: 0,
            test: true,
            expiry_interval_secs: 0,
            ..Settings::default()
        }
    }
    fn client_for(port: u16, user: &str) -> Client {
        Client::new(
            "http://127.0.0.1:".to_string() + port.to_string().as_str(),
            user.to_string(),
        )
    }
    fn new_prediction_request() -> NewPredictionRequest {
        NewPredictionRequest {
            title: "100 pushups".into(),
            description: "Community does 100 pushups".into(),
            target_date: Utc::now() + ChronoDuration::days(1),
            target_value: 100,
            category: Category::Fitness,
            auto_resolvable: false,
        }
    }

    #[tokio::test]
    async fn new_prediction() {
        let (port, _) = run_server(test_settings()).await.unwrap();
        let client = client_for(port, "alice");

        client.get_prediction(1).await.unwrap_err();
        let id = client
            .new_prediction(new_prediction_request())
            .await
            .unwrap();
        let prediction = client.get_prediction(id).await.unwrap();
        assert_eq!(prediction.creator, "alice");
        assert_eq!(prediction.status, PredictionStatus::Active);
        assert_eq!(prediction.total_staked, 0);

        let filter = PredictionsFilter {
            category: Some(Category::Fitness),
            ..PredictionsFilter::default()
        };
        assert_eq!(client.get_predictions(&filter).await.unwrap().len(), 1);
        let filter = PredictionsFilter {
            status: Some(PredictionStatus::Resolved),
            ..PredictionsFilter::default()
        };
        assert!(client.get_predictions(&filter).await.unwrap().is_empty());

        let mut past = new_prediction_request();
        past.target_date = Utc::now() - ChronoDuration::days(1);
        let e = client.new_prediction(past).await.unwrap_err();
        assert!(e.to_string().starts_with("400"));
    }

    #[tokio::test]
    async fn all() {
        let (port, _) = run_server(test_settings()).await.unwrap();
        let alice = client_for(port, "alice");
        let bob = client_for(port, "bob");
        let carol = client_for(port, "carol");

        let id = alice
            .new_prediction(new_prediction_request())
            .await
            .unwrap();
        for (client, is_yes, amount) in [(&bob, true, 10), (&carol, false, 5)] {
            client
                .vote(VoteRequest {
                    prediction: id,
                    voter: client.user().clone(),
                    is_yes,
                    amount,
                })
                .await
                .unwrap();
        }
        let odds = alice.get_odds(id).await.unwrap();
        assert_eq!(odds.yes_share_ppm, 666_666);
        let e = bob
            .claim(PredictionUserRequest {
                prediction: id,
                user: "bob".into(),
            })
            .await
            .unwrap_err();
        assert!(e.to_string().starts_with("409"));

        // Test mode makes every session an admin, so alice may force it.
        let resolved = alice
            .resolve(ResolveRequest {
                prediction: id,
                outcome: Some(Outcome::Yes),
                force: true,
            })
            .await
            .unwrap();
        assert_eq!(resolved.outcome, Outcome::Yes);

        let challenge = carol
            .open_challenge(PredictionUserRequest {
                prediction: id,
                user: "carol".into(),
            })
            .await
            .unwrap();
        let challenges = carol.get_challenges(id).await.unwrap();
        assert_eq!(challenges[0].required_additional_amount, 100);
        carol
            .complete_challenge(CompleteChallengeRequest {
                challenge,
                evidence: Evidence {
                    source: "watch".into(),
                    reported_amount: 100,
                },
            })
            .await
            .unwrap();
        let recovery = carol
            .claim(PredictionUserRequest {
                prediction: id,
                user: "carol".into(),
            })
            .await
            .unwrap();
        assert_eq!(recovery.gross, 4);
        assert_eq!(recovery.kind, PayoutKind::Recovery);
        assert!(recovery.transferred);

        // The recovery is not taken from the pool bob is paid from.
        let bob_claim = PredictionUserRequest {
            prediction: id,
            user: "bob".into(),
        };
        let claimable = bob.get_claimable(bob_claim.clone()).await.unwrap();
        assert_eq!(claimable.gross, 15);
        let winnings = bob.claim(bob_claim).await.unwrap();
        assert_eq!(winnings.fees.net, 12);

        let stats = alice.get_stats().await.unwrap();
        assert_eq!(stats.resolved, 1);
        assert_eq!(stats.total_disbursed, 19);
        assert_eq!(stats.total_recovered, 4);
        let balances = alice.get_balances().await.unwrap();
        assert!(balances.contains(&BalanceEntry {
            recipient: Recipient::User("carol".into()),
            amount: 4
        }));
        assert!(balances.contains(&BalanceEntry {
            recipient: Recipient::User("bob".into()),
            amount: 12
        }));
        let board = alice.get_leaderboard(1).await.unwrap();
        assert_eq!(board[0].user, "bob");
        assert_eq!(alice.get_user_votes("carol".into()).await.unwrap().len(), 1);
        assert!(
            alice
                .get_user_vote(PredictionUserRequest {
                    prediction: id,
                    user: "carol".into()
                })
                .await
                .unwrap()
                .claimed
        );
        assert_eq!(
            alice.expire_challenge(challenge).await.unwrap(),
            ChallengeStatus::Completed
        );
    }

    #[tokio::test]
    async fn refunds_after_cancel() {
        let (port, _) = run_server(test_settings()).await.unwrap();
        let bob = client_for(port, "bob");
        let id = bob.new_prediction(new_prediction_request()).await.unwrap();
        bob.record_progress(ProgressRequest {
            prediction: id,
            current_value: 42,
        })
        .await
        .unwrap();
        bob.vote(VoteRequest {
            prediction: id,
            voter: "bob".into(),
            is_yes: false,
            amount: 7,
        })
        .await
        .unwrap();
        bob.cancel(id).await.unwrap();
        let refund = bob
            .claim(PredictionUserRequest {
                prediction: id,
                user: "bob".into(),
            })
            .await
            .unwrap();
        assert_eq!(refund.kind, PayoutKind::Refund);
        assert_eq!(refund.fees.net, 7);
        assert_eq!(bob.get_prediction(id).await.unwrap().current_value, 42);
    }

    struct StuckVerifier;
    #[async_trait::async_trait]
    impl FitnessVerifier for StuckVerifier {
        async fn verify(
            &self,
            _challenge: &SweatEquityChallenge,
            _evidence: &Evidence,
        ) -> Result<VerifiedProof> {
            std::future::pending().await
        }
    }

    #[tokio::test]
    async fn slow_verifier_does_not_block_other_routes() {
        let mut market = SweatMarket::new(
            Box::new(SQLite::new("sqlite::memory:").await.unwrap()),
            Box::new(InMemoryCustody::default()),
            Box::new(StuckVerifier),
            test_settings().engine_config().unwrap(),
            vec![],
            vec![],
            true,
        )
        .await
        .unwrap();
        let admin = Session {
            user: "alice".into(),
        };
        let id = market
            .new_prediction(new_prediction_request(), admin.clone(), now())
            .await
            .unwrap();
        for (voter, is_yes) in [("bob", true), ("carol", false)] {
            market
                .vote(
                    VoteRequest {
                        prediction: id,
                        voter: voter.into(),
                        is_yes,
                        amount: 5,
                    },
                    admin.clone(),
                    now(),
                )
                .await
                .unwrap();
        }
        market
            .resolve(
                ResolveRequest {
                    prediction: id,
                    outcome: Some(Outcome::Yes),
                    force: true,
                },
                admin.clone(),
                now(),
            )
            .await
            .unwrap();
        let challenge = market
            .open_challenge(
                PredictionUserRequest {
                    prediction: id,
                    user: "carol".into(),
                },
                admin.clone(),
                now(),
            )
            .await
            .unwrap();
        let app = router(Arc::new(RwLock::new(market)));

        let body = serde_json::to_string(&PostRequest {
            session: Session {
                user: "carol".into(),
            },
            data: CompleteChallengeRequest {
                challenge,
                evidence: Evidence {
                    source: "watch".into(),
                    reported_amount: 100,
                },
            },
        })
        .unwrap();
        let stuck = tokio::spawn(app.clone().oneshot(
            Request::builder()
                .method("POST")
                .uri("/complete_challenge")
                .header("content-type", "application/json")
                .body(Body::from(body))
                .unwrap(),
        ));
        tokio::time::sleep(Duration::from_millis(100)).await;

        let response = tokio::time::timeout(
            Duration::from_secs(5),
            app.clone().oneshot(
                Request::builder()
                    .uri("/get_stats")
                    .body(Body::empty())
                    .unwrap(),
            ),
        )
        .await
        .unwrap()
        .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = serde_json::to_string(&PostRequest {
            session: Session { user: "bob".into() },
            data: PredictionUserRequest {
                prediction: id,
                user: "bob".into(),
            },
        })
        .unwrap();
        let response = tokio::time::timeout(
            Duration::from_secs(5),
            app.oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/claim")
                    .header("content-type", "application/json")
                    .body(Body::from(body))
                    .unwrap(),
            ),
        )
        .await
        .unwrap()
        .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert!(!stuck.is_finished());
        stuck.abort();
    }

    #[tokio::test]
    async fn router_maps_errors_to_status_codes() {
        let market = build_market(&test_settings()).await.unwrap();
        let app = router(Arc::new(RwLock::new(market)));

        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .uri("/get_stats")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/get_prediction")
                    .header("content-type", "application/json")
                    .body(Body::from(r#"{"prediction":42}"#))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
