//! One-shot training run: corpus → encoder → holdout split → forest → artifacts.

use std::fs;
use std::path::Path;

use ndarray::Axis;
use tracing::info;

use crate::artifacts::ArtifactSet;
use crate::config::TrainingConfig;
use crate::encoder;
use crate::error::Result;
use crate::evaluation::{evaluate, EvaluationReport, DEFAULT_THRESHOLD};
use crate::forest::FraudForest;
use crate::split::train_holdout_split;
use crate::transaction::LabeledTransaction;

pub const EVALUATION_FILE: &str = "evaluation.json";

#[derive(Debug, Clone)]
pub struct TrainingOutcome {
    pub artifacts: ArtifactSet,
    pub report: EvaluationReport,
    pub train_rows: usize,
    pub holdout_rows: usize,
}

/// Fits the encoder on every row, trains the forest on the training part of a
/// seeded split and scores the holdout part. Nothing is written to disk.
pub fn train(rows: &[LabeledTransaction], config: &TrainingConfig) -> Result<TrainingOutcome> {
    let fitted = encoder::fit(rows)?;
    let split = train_holdout_split(rows.len(), config.holdout_ratio, config.seed)?;

    let train_x = fitted.features.select(Axis(0), &split.train);
    let train_y = fitted.labels.select(Axis(0), &split.train);
    let holdout_x = fitted.features.select(Axis(0), &split.holdout);
    let holdout_y = fitted.labels.select(Axis(0), &split.holdout);

    let classifier = FraudForest::train(train_x.view(), train_y.view(), &config.forest_params())?;
    let report = evaluate(&classifier, holdout_x.view(), holdout_y.view(), DEFAULT_THRESHOLD)?;

    info!(
        train_rows = split.train.len(),
        holdout_rows = split.holdout.len(),
        accuracy = ?report.accuracy,
        recall = ?report.recall,
        "training run finished"
    );

    Ok(TrainingOutcome {
        artifacts: ArtifactSet::new(fitted.state, classifier),
        report,
        train_rows: split.train.len(),
        holdout_rows: split.holdout.len(),
    })
}

impl TrainingOutcome {
    /// Writes the artifact set, then the evaluation report beside it.
    pub fn persist(&self, dir: &Path) -> Result<()> {
        self.artifacts.save(dir)?;
        fs::write(
            dir.join(EVALUATION_FILE),
            serde_json::to_string_pretty(&self.report)?,
        )?;
        Ok(())
    }
}
