//! Request/response boundary around the loaded encoder and classifier.

use std::path::Path;

use chrono::Local;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::artifacts::ArtifactSet;
use crate::encoder::{self, EncoderState};
use crate::error::{FraudError, Result};
use crate::forest::FraudForest;
use crate::transaction::{parse_timestamp, Location, Transaction};

pub const HIGH_RISK_THRESHOLD: f64 = 0.5;
pub const MEDIUM_RISK_THRESHOLD: f64 = 0.2;

/// A transaction to score, as a caller submits it.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ScoreRequest {
    pub amount: f64,
    pub city: String,
    pub province: String,
    #[serde(default)]
    pub merchant: Option<String>,
    /// Defaults to the current local time.
    #[serde(default)]
    pub date: Option<String>,
}

impl ScoreRequest {
    pub fn to_transaction(&self) -> Result<Transaction> {
        let timestamp = match self.date.as_deref() {
            Some(text) => parse_timestamp(text)?,
            None => Local::now().naive_local(),
        };
        Transaction::new(
            self.amount,
            timestamp,
            self.merchant.clone().unwrap_or_default(),
            Location::new(&self.city, &self.province)?,
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ScoreResponse {
    pub fraud_probability: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ReplyBody {
    Score(ScoreResponse),
    Error { error: String },
}

/// HTTP-style status plus body, one per request.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Reply {
    pub status: u16,
    #[serde(flatten)]
    pub body: ReplyBody,
}

impl Reply {
    fn bad_request(error: impl ToString) -> Self {
        Self {
            status: 400,
            body: ReplyBody::Error {
                error: error.to_string(),
            },
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RiskLevel {
    Low,
    Medium,
    High,
}

impl RiskLevel {
    pub fn from_probability(probability: f64) -> Self {
        if probability >= HIGH_RISK_THRESHOLD {
            RiskLevel::High
        } else if probability >= MEDIUM_RISK_THRESHOLD {
            RiskLevel::Medium
        } else {
            RiskLevel::Low
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            RiskLevel::Low => "Low Risk",
            RiskLevel::Medium => "Medium Risk",
            RiskLevel::High => "High Risk",
        }
    }
}

/// Everything a request needs, loaded once at startup and only read afterwards.
#[derive(Debug, Clone)]
pub struct ServingContext {
    artifact_set: String,
    encoder: EncoderState,
    classifier: FraudForest,
}

impl ServingContext {
    pub fn load(dir: &Path) -> Result<Self> {
        ArtifactSet::load(dir).map(Self::from)
    }

    pub fn artifact_set(&self) -> &str {
        &self.artifact_set
    }

    pub fn encoder(&self) -> &EncoderState {
        &self.encoder
    }

    pub fn classifier(&self) -> &FraudForest {
        &self.classifier
    }

    pub fn score(&self, transaction: &Transaction) -> Result<f64> {
        let vector = encoder::encode_one(transaction, &self.encoder);
        self.classifier.predict_probability(vector.as_slice())
    }

    pub fn handle(&self, request: &ScoreRequest) -> Result<ScoreResponse> {
        let transaction = request.to_transaction()?;
        let fraud_probability = self.score(&transaction)?;
        debug!(
            amount = transaction.amount,
            location = %transaction.location.key(),
            merchant = %transaction.merchant_reference,
            fraud_probability,
            "transaction scored"
        );
        Ok(ScoreResponse { fraud_probability })
    }

    pub fn respond(&self, request: &ScoreRequest) -> Reply {
        match self.handle(request) {
            Ok(response) => Reply {
                status: 200,
                body: ReplyBody::Score(response),
            },
            Err(e) => {
                warn!(error = %e, "request rejected");
                Reply::bad_request(error_message(&e))
            }
        }
    }

    /// Parses one JSON request and answers it; malformed JSON is a 400 like any
    /// other rejected request.
    pub fn respond_json(&self, line: &str) -> Reply {
        match serde_json::from_str::<ScoreRequest>(line) {
            Ok(request) => self.respond(&request),
            Err(e) => {
                warn!(error = %e, "unreadable request");
                Reply::bad_request(format!("invalid request: {e}"))
            }
        }
    }
}

impl From<ArtifactSet> for ServingContext {
    fn from(set: ArtifactSet) -> Self {
        Self {
            artifact_set: set.id,
            encoder: set.encoder,
            classifier: set.classifier,
        }
    }
}

fn error_message(error: &FraudError) -> String {
    match error {
        FraudError::Data(msg) => msg.clone(),
        other => other.to_string(),
    }
}
