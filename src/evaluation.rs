use ndarray::{ArrayView1, ArrayView2, Axis};
use serde::Serialize;

use crate::error::{FraudError, Result};
use crate::forest::FraudForest;

pub const DEFAULT_THRESHOLD: f64 = 0.5;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ConfusionMatrix {
    pub true_positives: usize,
    pub false_positives: usize,
    pub true_negatives: usize,
    pub false_negatives: usize,
}

impl ConfusionMatrix {
    pub fn record(&mut self, predicted_fraud: bool, actual_fraud: bool) {
        match (predicted_fraud, actual_fraud) {
            (true, true) => self.true_positives += 1,
            (true, false) => self.false_positives += 1,
            (false, false) => self.true_negatives += 1,
            (false, true) => self.false_negatives += 1,
        }
    }

    pub fn total(&self) -> usize {
        self.true_positives + self.false_positives + self.true_negatives + self.false_negatives
    }

    pub fn accuracy(&self) -> Option<f64> {
        ratio(self.true_positives + self.true_negatives, self.total())
    }

    pub fn precision(&self) -> Option<f64> {
        ratio(self.true_positives, self.true_positives + self.false_positives)
    }

    pub fn recall(&self) -> Option<f64> {
        ratio(self.true_positives, self.true_positives + self.false_negatives)
    }

    pub fn f1(&self) -> Option<f64> {
        let (p, r) = (self.precision()?, self.recall()?);
        if p + r > 0.0 {
            Some(2.0 * p * r / (p + r))
        } else {
            Some(0.0)
        }
    }
}

fn ratio(numerator: usize, denominator: usize) -> Option<f64> {
    (denominator > 0).then(|| numerator as f64 / denominator as f64)
}

/// Holdout scores of a trained forest. Metrics that would divide by zero are `None`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EvaluationReport {
    pub threshold: f64,
    pub support: usize,
    pub confusion: ConfusionMatrix,
    pub accuracy: Option<f64>,
    pub precision: Option<f64>,
    pub recall: Option<f64>,
    pub f1: Option<f64>,
}

pub fn evaluate(
    classifier: &FraudForest,
    features: ArrayView2<f64>,
    labels: ArrayView1<usize>,
    threshold: f64,
) -> Result<EvaluationReport> {
    if features.nrows() != labels.len() {
        return Err(FraudError::data(format!(
            "{} holdout rows but {} labels",
            features.nrows(),
            labels.len()
        )));
    }

    let mut confusion = ConfusionMatrix::default();
    for (row, &label) in features.axis_iter(Axis(0)).zip(labels.iter()) {
        let vector = row.to_vec();
        let probability = classifier.predict_probability(&vector)?;
        confusion.record(probability >= threshold, label == 1);
    }

    Ok(EvaluationReport {
        threshold,
        support: confusion.total(),
        accuracy: confusion.accuracy(),
        precision: confusion.precision(),
        recall: confusion.recall(),
        f1: confusion.f1(),
        confusion,
    })
}
