//! Feature encoding shared by training and inference.
//!
//! A feature vector is laid out as
//! `[location one-hot][merchant one-hot][amount_scaled][hour][day_of_week]`,
//! with each one-hot block ordered by its fit-time vocabulary. Training rows
//! and scored transactions go through the same [`EncoderState::encode_one`],
//! so the column layout cannot drift between the two.

use std::collections::BTreeSet;

use ndarray::{Array1, Array2};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{FraudError, Result};
use crate::transaction::{LabeledTransaction, Transaction};

/// Columns after the two one-hot blocks: scaled amount, hour, day of week.
pub const TRAILING_COLUMNS: usize = 3;

/// Closed, sorted set of category tokens observed at fit time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "Vec<String>", into = "Vec<String>")]
pub struct Vocabulary {
    tokens: Vec<String>,
}

impl Vocabulary {
    pub fn fit<'a>(tokens: impl IntoIterator<Item = &'a str>) -> Self {
        let distinct: BTreeSet<&str> = tokens.into_iter().collect();
        Self {
            tokens: distinct.into_iter().map(str::to_string).collect(),
        }
    }

    /// Rebuilds a vocabulary from persisted tokens, rejecting any that are
    /// out of order or repeated.
    pub fn from_tokens(tokens: Vec<String>) -> Result<Self> {
        if let Some(pair) = tokens.windows(2).find(|w| w[0] >= w[1]) {
            return Err(FraudError::artifact(format!(
                "vocabulary is not strictly sorted at {:?} / {:?}",
                pair[0], pair[1]
            )));
        }
        Ok(Self { tokens })
    }

    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }

    pub fn tokens(&self) -> &[String] {
        &self.tokens
    }

    pub fn index_of(&self, token: &str) -> Option<usize> {
        self.tokens
            .binary_search_by(|probe| probe.as_str().cmp(token))
            .ok()
    }

    /// Sets the indicator for `token` in `block`. An unseen token leaves the
    /// block all zero and returns `false`.
    fn write_one_hot(&self, token: &str, block: &mut [f64]) -> bool {
        match self.index_of(token) {
            Some(idx) => {
                block[idx] = 1.0;
                true
            }
            None => false,
        }
    }
}

impl TryFrom<Vec<String>> for Vocabulary {
    type Error = FraudError;

    fn try_from(tokens: Vec<String>) -> Result<Self> {
        Self::from_tokens(tokens)
    }
}

impl From<Vocabulary> for Vec<String> {
    fn from(vocabulary: Vocabulary) -> Self {
        vocabulary.tokens
    }
}

/// Frozen mean and population standard deviation of the training amounts.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AmountScaler {
    pub mean: f64,
    pub std: f64,
}

impl AmountScaler {
    pub fn fit(amounts: &[f64]) -> Result<Self> {
        if amounts.is_empty() {
            return Err(FraudError::data("cannot fit amount scaler on zero rows"));
        }
        // Identical amounts have exactly zero spread.
        if amounts.iter().all(|&a| a == amounts[0]) {
            return Ok(Self {
                mean: amounts[0],
                std: 0.0,
            });
        }
        let n = amounts.len() as f64;
        let mean = amounts.iter().sum::<f64>() / n;
        let variance = amounts.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / n;
        Ok(Self {
            mean,
            std: variance.sqrt(),
        })
    }

    pub fn is_degenerate(&self) -> bool {
        !self.std.is_finite() || self.std == 0.0
    }

    /// `(amount - mean) / std`, or `0.0` when the spread is degenerate or the
    /// result is not finite.
    pub fn scale(&self, amount: f64) -> f64 {
        if self.is_degenerate() {
            return 0.0;
        }
        let scaled = (amount - self.mean) / self.std;
        if scaled.is_finite() {
            scaled
        } else {
            0.0
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FeatureVector {
    values: Vec<f64>,
}

impl FeatureVector {
    pub fn as_slice(&self) -> &[f64] {
        &self.values
    }
}

/// Vocabularies and amount statistics learned once and replayed unchanged.
#[derive(Debug, Clone, PartialEq)]
pub struct EncoderState {
    pub location: Vocabulary,
    pub merchant: Vocabulary,
    pub amount: AmountScaler,
}

impl EncoderState {
    /// Number of columns every encoded vector has.
    pub fn width(&self) -> usize {
        self.location.len() + self.merchant.len() + TRAILING_COLUMNS
    }

    pub fn feature_names(&self) -> Vec<String> {
        let mut names = Vec::with_capacity(self.width());
        names.extend(self.location.tokens().iter().map(|t| format!("location_{t}")));
        names.extend(self.merchant.tokens().iter().map(|t| format!("ref_{t}")));
        names.extend(["amount_scaled", "hour", "day_of_week"].map(String::from));
        names
    }

    pub fn encode_one(&self, transaction: &Transaction) -> FeatureVector {
        let mut values = vec![0.0; self.width()];
        let (location_block, rest) = values.split_at_mut(self.location.len());
        let (merchant_block, trailing) = rest.split_at_mut(self.merchant.len());

        let location_key = transaction.location.key();
        if !self.location.write_one_hot(&location_key, location_block) {
            debug!(token = %location_key, "unseen location, zero block");
        }
        if !self
            .merchant
            .write_one_hot(&transaction.merchant_reference, merchant_block)
        {
            debug!(token = %transaction.merchant_reference, "unseen merchant, zero block");
        }

        let time = transaction.time_features();
        trailing[0] = self.amount.scale(transaction.amount);
        trailing[1] = f64::from(time.hour_of_day);
        trailing[2] = f64::from(time.day_of_week);

        FeatureVector { values }
    }
}

/// Encoder state together with the training corpus already encoded by it.
#[derive(Debug, Clone)]
pub struct FittedEncoder {
    pub state: EncoderState,
    pub features: Array2<f64>,
    /// 1 = fraud, 0 = clean.
    pub labels: Array1<usize>,
}

pub fn fit(rows: &[LabeledTransaction]) -> Result<FittedEncoder> {
    if rows.is_empty() {
        return Err(FraudError::data("training corpus is empty"));
    }

    let location_keys: Vec<String> = rows.iter().map(|r| r.transaction.location.key()).collect();
    let amounts: Vec<f64> = rows.iter().map(|r| r.transaction.amount).collect();

    let state = EncoderState {
        location: Vocabulary::fit(location_keys.iter().map(String::as_str)),
        merchant: Vocabulary::fit(
            rows.iter()
                .map(|r| r.transaction.merchant_reference.as_str()),
        ),
        amount: AmountScaler::fit(&amounts)?,
    };

    let width = state.width();
    let mut features = Array2::zeros((rows.len(), width));
    for (i, row) in rows.iter().enumerate() {
        let encoded = state.encode_one(&row.transaction);
        for (j, &value) in encoded.as_slice().iter().enumerate() {
            features[[i, j]] = value;
        }
    }
    let labels: Array1<usize> = rows.iter().map(|r| usize::from(r.is_fraud)).collect();

    info!(
        rows = rows.len(),
        width,
        locations = state.location.len(),
        merchants = state.merchant.len(),
        amount_mean = state.amount.mean,
        amount_std = state.amount.std,
        degenerate_amount = state.amount.is_degenerate(),
        "encoder fitted"
    );

    Ok(FittedEncoder {
        state,
        features,
        labels,
    })
}

pub fn encode_one(transaction: &Transaction, state: &EncoderState) -> FeatureVector {
    state.encode_one(transaction)
}
