use anyhow::{bail, Result};
use reqwest::{Response, StatusCode};
use serde::{de::DeserializeOwned, Serialize};

use crate::api::*;

pub struct Client {
    url: String,
    client: reqwest::Client,
    session: Session,
}

pub async fn bail_if_err(response: Response, expected_code: StatusCode) -> Result<Response> {
    if response.status() != expected_code {
        bail!("{}: {}", response.status(), response.text().await?)
    }
    Ok(response)
}

impl Client {
    pub fn new(url: String, user: UserId) -> Self {
        let client = reqwest::Client::new();
        Self {
            url,
            client,
            session: Session { user },
        }
    }
    pub fn user(&self) -> &UserId {
        &self.session.user
    }
    async fn post<T: Serialize>(&self, path: &str, data: T, expected_code: StatusCode) -> Result<Response> {
        let request = PostRequest {
            session: self.session.clone(),
            data,
        };
        let response = self
            .client
            .post(self.url.clone() + path)
            .json(&request)
            .send()
            .await?;
        bail_if_err(response, expected_code).await
    }
    async fn query<T: Serialize, R: DeserializeOwned>(&self, path: &str, request: T) -> Result<R> {
        let response = self
            .client
            .post(self.url.clone() + path)
            .json(&request)
            .send()
            .await?;
        let response = bail_if_err(response, StatusCode::OK).await?;
        Ok(response.json::<R>().await?)
    }
    async fn get<R: DeserializeOwned>(&self, path: &str) -> Result<R> {
        let response = self.client.get(self.url.clone() + path).send().await?;
        let response = bail_if_err(response, StatusCode::OK).await?;
        Ok(response.json::<R>().await?)
    }

    pub async fn new_prediction(&self, request: NewPredictionRequest) -> Result<PredictionId> {
        let response = self
            .post("/new_prediction", request, StatusCode::CREATED)
            .await?;
        Ok(response.json::<PredictionId>().await?)
    }
    pub async fn vote(&self, request: VoteRequest) -> Result<Vote> {
        let response = self.post("/vote", request, StatusCode::OK).await?;
        Ok(response.json::<Vote>().await?)
    }
    pub async fn record_progress(&self, request: ProgressRequest) -> Result<()> {
        self.post("/record_progress", request, StatusCode::OK)
            .await?;
        Ok(())
    }
    pub async fn resolve(&self, request: ResolveRequest) -> Result<ResolveResponse> {
        let response = self.post("/resolve", request, StatusCode::OK).await?;
        Ok(response.json::<ResolveResponse>().await?)
    }
    pub async fn cancel(&self, prediction: PredictionId) -> Result<()> {
        self.post("/cancel", PredictionRequest { prediction }, StatusCode::OK)
            .await?;
        Ok(())
    }
    pub async fn open_challenge(&self, request: PredictionUserRequest) -> Result<ChallengeId> {
        let response = self
            .post("/open_challenge", request, StatusCode::CREATED)
            .await?;
        Ok(response.json::<ChallengeId>().await?)
    }
    pub async fn complete_challenge(&self, request: CompleteChallengeRequest) -> Result<()> {
        self.post("/complete_challenge", request, StatusCode::OK)
            .await?;
        Ok(())
    }
    pub async fn expire_challenge(&self, challenge: ChallengeId) -> Result<ChallengeStatus> {
        let response = self
            .post(
                "/expire_challenge",
                ChallengeRequest { challenge },
                StatusCode::OK,
            )
            .await?;
        Ok(response.json::<ChallengeStatus>().await?)
    }
    pub async fn claim(&self, request: PredictionUserRequest) -> Result<Payout> {
        let response = self.post("/claim", request, StatusCode::OK).await?;
        Ok(response.json::<Payout>().await?)
    }

    pub async fn get_prediction(&self, prediction: PredictionId) -> Result<Prediction> {
        self.query("/get_prediction", PredictionRequest { prediction })
            .await
    }
    pub async fn get_user_vote(&self, request: PredictionUserRequest) -> Result<Vote> {
        self.query("/get_user_vote", request).await
    }
    pub async fn get_predictions(&self, filter: &PredictionsFilter) -> Result<Vec<Prediction>> {
        let response = self
            .client
            .get(self.url.clone() + "/get_predictions")
            .query(filter)
            .send()
            .await?;
        let response = bail_if_err(response, StatusCode::OK).await?;
        Ok(response.json::<Vec<Prediction>>().await?)
    }
    pub async fn get_user_votes(&self, user: UserId) -> Result<Vec<Vote>> {
        self.query("/get_user_votes", UserRequest { user }).await
    }
    pub async fn get_challenges(&self, prediction: PredictionId) -> Result<Vec<SweatEquityChallenge>> {
        self.query("/get_challenges", PredictionRequest { prediction })
            .await
    }
    pub async fn get_odds(&self, prediction: PredictionId) -> Result<OddsResponse> {
        self.query("/get_odds", PredictionRequest { prediction })
            .await
    }
    pub async fn get_claimable(&self, request: PredictionUserRequest) -> Result<Payout> {
        self.query("/get_claimable", request).await
    }
    pub async fn get_leaderboard(&self, limit: usize) -> Result<Vec<LeaderboardEntry>> {
        self.query("/get_leaderboard", LeaderboardRequest { limit })
            .await
    }
    pub async fn get_stats(&self) -> Result<StatsResponse> {
        self.get("/get_stats").await
    }
    pub async fn get_balances(&self) -> Result<Vec<BalanceEntry>> {
        self.get("/get_balances").await
    }
}
