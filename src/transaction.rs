//! Transaction records: the raw shape read from a corpus or request, and the
//! validated shape the encoder consumes.

use chrono::{DateTime, Datelike, NaiveDate, NaiveDateTime, Timelike};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{FraudError, Result};

const TIMESTAMP_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M",
    "%Y-%m-%dT%H:%M",
];

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawLocation {
    pub city: Option<String>,
    pub province: Option<String>,
}

/// One corpus row as it appears on disk. Every field is optional here so that
/// a missing or mistyped value can be reported by name instead of failing the
/// whole file.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawTransaction {
    pub user: Option<String>,
    pub amount: Option<Value>,
    pub date: Option<String>,
    #[serde(rename = "ref")]
    pub merchant_reference: Option<String>,
    pub location: Option<RawLocation>,
    pub event_label: Option<Value>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Location {
    pub city: String,
    pub province: String,
}

impl Location {
    pub fn new(city: &str, province: &str) -> Result<Self> {
        if city.trim().is_empty() {
            return Err(FraudError::data("location.city is empty"));
        }
        if province.trim().is_empty() {
            return Err(FraudError::data("location.province is empty"));
        }
        Ok(Self {
            city: city.to_string(),
            province: province.to_string(),
        })
    }

    /// The categorical token the location block is keyed on: `city_province`.
    pub fn key(&self) -> String {
        format!("{}_{}", self.city, self.province)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeFeatures {
    pub hour_of_day: u32,
    /// 0 = Monday .. 6 = Sunday.
    pub day_of_week: u32,
}

/// Shared by the fit and the inference encode paths; both call this and nothing else.
pub fn derive_time_features(timestamp: &NaiveDateTime) -> TimeFeatures {
    TimeFeatures {
        hour_of_day: timestamp.hour(),
        day_of_week: timestamp.weekday().num_days_from_monday(),
    }
}

pub fn parse_timestamp(text: &str) -> Result<NaiveDateTime> {
    let text = text.trim();
    for format in TIMESTAMP_FORMATS {
        if let Ok(ts) = NaiveDateTime::parse_from_str(text, format) {
            return Ok(ts);
        }
    }
    // Offset-carrying timestamps keep the wall clock of their own offset.
    if let Ok(ts) = DateTime::parse_from_rfc3339(text) {
        return Ok(ts.naive_local());
    }
    if let Some(ts) = NaiveDate::parse_from_str(text, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
    {
        return Ok(ts);
    }
    Err(FraudError::data(format!("malformed timestamp {text:?}")))
}

#[derive(Debug, Clone, PartialEq)]
pub struct Transaction {
    pub amount: f64,
    pub timestamp: NaiveDateTime,
    pub merchant_reference: String,
    pub location: Location,
}

impl Transaction {
    pub fn new(
        amount: f64,
        timestamp: NaiveDateTime,
        merchant_reference: impl Into<String>,
        location: Location,
    ) -> Result<Self> {
        if !amount.is_finite() {
            return Err(FraudError::data(format!("amount {amount} is not finite")));
        }
        if amount < 0.0 {
            return Err(FraudError::data(format!("amount {amount} is negative")));
        }
        Ok(Self {
            amount,
            timestamp,
            merchant_reference: merchant_reference.into(),
            location,
        })
    }

    pub fn time_features(&self) -> TimeFeatures {
        derive_time_features(&self.timestamp)
    }
}

impl TryFrom<&RawTransaction> for Transaction {
    type Error = FraudError;

    fn try_from(raw: &RawTransaction) -> Result<Self> {
        let amount = match &raw.amount {
            Some(Value::Number(n)) => n
                .as_f64()
                .ok_or_else(|| FraudError::data(format!("amount {n} is not representable")))?,
            Some(other) => {
                return Err(FraudError::data(format!(
                    "amount must be a number, got {other}"
                )))
            }
            None => return Err(FraudError::data("missing field `amount`")),
        };
        let date = raw
            .date
            .as_deref()
            .ok_or_else(|| FraudError::data("missing field `date`"))?;
        let merchant = raw
            .merchant_reference
            .as_deref()
            .ok_or_else(|| FraudError::data("missing field `ref`"))?;
        let location = raw
            .location
            .as_ref()
            .ok_or_else(|| FraudError::data("missing field `location`"))?;
        let city = location
            .city
            .as_deref()
            .ok_or_else(|| FraudError::data("missing field `location.city`"))?;
        let province = location
            .province
            .as_deref()
            .ok_or_else(|| FraudError::data("missing field `location.province`"))?;

        Transaction::new(
            amount,
            parse_timestamp(date)?,
            merchant,
            Location::new(city, province)?,
        )
    }
}

/// A historical transaction together with its fraud flag.
#[derive(Debug, Clone, PartialEq)]
pub struct LabeledTransaction {
    pub transaction: Transaction,
    pub is_fraud: bool,
}

impl TryFrom<&RawTransaction> for LabeledTransaction {
    type Error = FraudError;

    fn try_from(raw: &RawTransaction) -> Result<Self> {
        let transaction = Transaction::try_from(raw)?;
        let is_fraud = match &raw.event_label {
            Some(Value::Bool(flag)) => *flag,
            Some(Value::Number(n)) if n.as_f64() == Some(0.0) => false,
            Some(Value::Number(n)) if n.as_f64() == Some(1.0) => true,
            Some(other) => {
                return Err(FraudError::data(format!(
                    "event_label must be 0 or 1, got {other}"
                )))
            }
            None => return Err(FraudError::data("missing field `event_label`")),
        };
        Ok(Self {
            transaction,
            is_fraud,
        })
    }
}
