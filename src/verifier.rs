use crate::api::*;
use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use log::debug;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Turns evidence submitted for a challenge into a proof the recovery book
/// accepts. Runs outside the engine, the engine only sees the proof.
#[async_trait]
pub trait FitnessVerifier {
    async fn verify(
        &self,
        challenge: &SweatEquityChallenge,
        evidence: &Evidence,
    ) -> Result<VerifiedProof>;
}

/// Runs `verifier` on the evidence for `challenge`.
pub async fn verify_evidence(
    verifier: &(dyn FitnessVerifier + Send + Sync),
    challenge: &SweatEquityChallenge,
    evidence: &Evidence,
) -> Result<VerifiedProof> {
    verifier
        .verify(challenge, evidence)
        .await
        .with_context(|| format!("couldn't verify evidence for challenge {}", challenge.id))
}

/// Takes reported amounts at face value. Meant for tests and trusted setups.
#[derive(Debug, Default, Clone)]
pub struct TrustingVerifier;
#[async_trait]
impl FitnessVerifier for TrustingVerifier {
    async fn verify(
        &self,
        _challenge: &SweatEquityChallenge,
        evidence: &Evidence,
    ) -> Result<VerifiedProof> {
        Ok(VerifiedProof {
            amount: evidence.reported_amount,
        })
    }
}

/// Asks an external fitness service to check the evidence.
#[derive(Debug, Clone)]
pub struct HttpVerifier {
    client: Client,
    pub url: String,
}
impl HttpVerifier {
    pub fn new(url: String, timeout: Duration) -> Result<Self> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self { client, url })
    }
}
#[async_trait]
impl FitnessVerifier for HttpVerifier {
    async fn verify(
        &self,
        challenge: &SweatEquityChallenge,
        evidence: &Evidence,
    ) -> Result<VerifiedProof> {
        let request = VerifyRequest {
            challenge: challenge.id,
            voter: challenge.voter.clone(),
            required_additional_amount: challenge.required_additional_amount,
            source: evidence.source.clone(),
            reported_amount: evidence.reported_amount,
        };
        let response = self
            .client
            .post(self.url.clone() + "/verify")
            .json(&request)
            .send()
            .await?;
        if response.status() != StatusCode::OK {
            bail!(
                "Couldn't verify evidence for challenge {}: {}",
                challenge.id,
                response.text().await?
            )
        }
        let json = response.json::<VerifyResponse>().await?;
        debug!(
            "Verifier answered {:?} for challenge {}",
            json, challenge.id
        );
        if !json.verified {
            return Err(MarketError::InvalidInput(format!(
                "evidence from {} for challenge {} was rejected",
                evidence.source, challenge.id
            ))
            .into());
        }
        Ok(VerifiedProof {
            amount: json.amount,
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct VerifyRequest {
    challenge: ChallengeId,
    voter: UserId,
    required_additional_amount: u64,
    source: String,
    reported_amount: u64,
}
#[derive(Debug, Clone, Serialize, Deserialize)]
struct VerifyResponse {
    verified: bool,
    amount: u64,
}
