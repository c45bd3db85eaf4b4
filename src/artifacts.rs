//! The four-file artifact set written by training and read by serving.
//!
//! Every file wraps its payload in an envelope naming the format version, the
//! training run (`artifact_set`) and which artifact it is. A set only loads
//! when all four files are present and agree on version and run.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::Utc;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{info, warn};

use crate::encoder::{AmountScaler, EncoderState, Vocabulary};
use crate::error::{FraudError, Result};
use crate::forest::FraudForest;

pub const FORMAT_VERSION: u32 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactKind {
    Classifier,
    LocationEncoder,
    MerchantEncoder,
    AmountScaler,
}

impl ArtifactKind {
    pub const ALL: [ArtifactKind; 4] = [
        ArtifactKind::Classifier,
        ArtifactKind::LocationEncoder,
        ArtifactKind::MerchantEncoder,
        ArtifactKind::AmountScaler,
    ];

    pub fn file_name(self) -> &'static str {
        match self {
            ArtifactKind::Classifier => "transaction_model.json",
            ArtifactKind::LocationEncoder => "location_encoder.json",
            ArtifactKind::MerchantEncoder => "merchant_encoder.json",
            ArtifactKind::AmountScaler => "amount_scaler.json",
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct Envelope<T> {
    format_version: u32,
    artifact_set: String,
    kind: ArtifactKind,
    payload: T,
}

/// Encoder state and classifier from one training run.
#[derive(Debug, Clone)]
pub struct ArtifactSet {
    pub id: String,
    pub encoder: EncoderState,
    pub classifier: FraudForest,
}

impl ArtifactSet {
    /// Bundles freshly trained parts under a new run identifier.
    pub fn new(encoder: EncoderState, classifier: FraudForest) -> Self {
        Self {
            id: Utc::now().format("%Y%m%dT%H%M%S%.6fZ").to_string(),
            encoder,
            classifier,
        }
    }

    pub fn save(&self, dir: &Path) -> Result<()> {
        if self.classifier.n_features() != self.encoder.width() {
            return Err(FraudError::artifact(format!(
                "classifier expects {} features but encoder produces {}",
                self.classifier.n_features(),
                self.encoder.width()
            )));
        }

        let documents = [
            (ArtifactKind::Classifier, self.envelope(ArtifactKind::Classifier, &self.classifier)?),
            (
                ArtifactKind::LocationEncoder,
                self.envelope(ArtifactKind::LocationEncoder, &self.encoder.location)?,
            ),
            (
                ArtifactKind::MerchantEncoder,
                self.envelope(ArtifactKind::MerchantEncoder, &self.encoder.merchant)?,
            ),
            (
                ArtifactKind::AmountScaler,
                self.envelope(ArtifactKind::AmountScaler, &self.encoder.amount)?,
            ),
        ];

        fs::create_dir_all(dir)?;

        // All four are staged before any is renamed into place.
        let mut staged: Vec<(PathBuf, PathBuf)> = Vec::with_capacity(documents.len());
        for (kind, body) in &documents {
            let target = dir.join(kind.file_name());
            let temp = dir.join(format!(".{}.tmp", kind.file_name()));
            if let Err(e) = fs::write(&temp, body) {
                discard(&staged);
                let _ = fs::remove_file(&temp);
                return Err(e.into());
            }
            staged.push((temp, target));
        }
        for (temp, target) in &staged {
            if let Err(e) = fs::rename(temp, target) {
                discard(&staged);
                return Err(e.into());
            }
        }

        info!(dir = %dir.display(), artifact_set = %self.id, "artifact set saved");
        Ok(())
    }

    pub fn load(dir: &Path) -> Result<Self> {
        let missing: Vec<&str> = ArtifactKind::ALL
            .iter()
            .map(|kind| kind.file_name())
            .filter(|name| !dir.join(name).is_file())
            .collect();
        if !missing.is_empty() {
            return Err(FraudError::artifact(format!(
                "incomplete artifact set in {}: missing {}",
                dir.display(),
                missing.join(", ")
            )));
        }

        let (set_id, classifier): (String, FraudForest) =
            read_artifact(dir, ArtifactKind::Classifier)?;
        let (location_id, location): (String, Vocabulary) =
            read_artifact(dir, ArtifactKind::LocationEncoder)?;
        let (merchant_id, merchant): (String, Vocabulary) =
            read_artifact(dir, ArtifactKind::MerchantEncoder)?;
        let (scaler_id, amount): (String, AmountScaler) =
            read_artifact(dir, ArtifactKind::AmountScaler)?;

        for (kind, id) in [
            (ArtifactKind::LocationEncoder, &location_id),
            (ArtifactKind::MerchantEncoder, &merchant_id),
            (ArtifactKind::AmountScaler, &scaler_id),
        ] {
            if *id != set_id {
                return Err(FraudError::artifact(format!(
                    "{} belongs to artifact set {id}, classifier to {set_id}",
                    kind.file_name()
                )));
            }
        }

        if !amount.mean.is_finite() || !(amount.std >= 0.0) {
            return Err(FraudError::artifact(format!(
                "amount scaler holds invalid statistics mean={} std={}",
                amount.mean, amount.std
            )));
        }
        classifier.validate()?;

        let encoder = EncoderState {
            location,
            merchant,
            amount,
        };
        if classifier.n_features() != encoder.width() {
            return Err(FraudError::artifact(format!(
                "classifier expects {} features but encoder produces {}",
                classifier.n_features(),
                encoder.width()
            )));
        }

        info!(
            dir = %dir.display(),
            artifact_set = %set_id,
            trees = classifier.n_trees(),
            width = encoder.width(),
            "artifact set loaded"
        );
        Ok(Self {
            id: set_id,
            encoder,
            classifier,
        })
    }

    fn envelope<T: Serialize>(&self, kind: ArtifactKind, payload: &T) -> Result<String> {
        let envelope = Envelope {
            format_version: FORMAT_VERSION,
            artifact_set: self.id.clone(),
            kind,
            payload,
        };
        Ok(serde_json::to_string_pretty(&envelope)?)
    }
}

fn discard(staged: &[(PathBuf, PathBuf)]) {
    for (temp, _) in staged {
        if let Err(e) = fs::remove_file(temp) {
            warn!(file = %temp.display(), error = %e, "could not remove staged artifact");
        }
    }
}

fn read_artifact<T: DeserializeOwned>(dir: &Path, kind: ArtifactKind) -> Result<(String, T)> {
    let path = dir.join(kind.file_name());
    let corrupt = |e: &dyn std::fmt::Display| {
        FraudError::artifact(format!("corrupt artifact {}: {e}", path.display()))
    };

    let text = fs::read_to_string(&path)?;
    let envelope: Envelope<Value> = serde_json::from_str(&text).map_err(|e| corrupt(&e))?;
    if envelope.format_version != FORMAT_VERSION {
        return Err(FraudError::artifact(format!(
            "{} has format version {}, expected {FORMAT_VERSION}",
            path.display(),
            envelope.format_version
        )));
    }
    if envelope.kind != kind {
        return Err(FraudError::artifact(format!(
            "{} holds a {:?} artifact, expected {kind:?}",
            path.display(),
            envelope.kind
        )));
    }
    let payload = serde_json::from_value(envelope.payload).map_err(|e| corrupt(&e))?;
    Ok((envelope.artifact_set, payload))
}
