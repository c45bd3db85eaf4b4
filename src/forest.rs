//! Bagged decision-tree ensemble for the fraud / clean decision.
//!
//! Each member is a `linfa-trees` decision tree fitted on a bootstrap sample of
//! the training rows and a random subset of the feature columns. Samples are
//! weighted inversely to their class frequency so the rare fraud class is not
//! drowned out. The fraud probability of a vector is the share of members that
//! vote fraud.

use linfa::traits::{Fit, PredictInplace};
use linfa::Dataset;
use linfa_trees::{DecisionTree, SplitQuality};
use ndarray::{Array1, Array2, ArrayView1, ArrayView2, Axis};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{FraudError, Result};

const FRAUD: usize = 1;
// Leaves and splits are limited by impurity, not by accumulated sample weight.
const MIN_WEIGHT: f32 = 1e-6;

/// How many feature columns each tree gets to see.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MaxFeatures {
    /// `ceil(sqrt(n_features))`
    Sqrt,
    All,
    Count(usize),
}

impl MaxFeatures {
    pub fn resolve(self, n_features: usize) -> usize {
        let k = match self {
            MaxFeatures::Sqrt => (n_features as f64).sqrt().ceil() as usize,
            MaxFeatures::All => n_features,
            MaxFeatures::Count(k) => k,
        };
        k.clamp(1, n_features.max(1))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForestParams {
    pub n_trees: usize,
    pub max_depth: Option<usize>,
    pub max_features: MaxFeatures,
    pub seed: u64,
}

impl Default for ForestParams {
    fn default() -> Self {
        Self {
            n_trees: 100,
            max_depth: None,
            max_features: MaxFeatures::Sqrt,
            seed: 42,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Member {
    /// Feature columns this tree was fitted on, ascending.
    columns: Vec<usize>,
    tree: DecisionTree<f64, usize>,
}

impl Member {
    fn votes_fraud(&self, vector: &[f64]) -> bool {
        let records = Array2::from_shape_fn((1, self.columns.len()), |(_, j)| {
            vector[self.columns[j]]
        });
        let mut prediction: Array1<usize> = self.tree.default_target(&records);
        self.tree.predict_inplace(&records, &mut prediction);
        prediction[0] == FRAUD
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FraudForest {
    n_features: usize,
    members: Vec<Member>,
}

/// `n / (n_classes * count_c)` for the two classes; a class that does not
/// occur gets weight 0.
pub fn balanced_class_weights(labels: ArrayView1<usize>) -> [f64; 2] {
    let n = labels.len() as f64;
    let fraud = labels.iter().filter(|&&l| l == FRAUD).count() as f64;
    let clean = n - fraud;
    let weight = |count: f64| if count > 0.0 { n / (2.0 * count) } else { 0.0 };
    [weight(clean), weight(fraud)]
}

impl FraudForest {
    pub fn train(
        features: ArrayView2<f64>,
        labels: ArrayView1<usize>,
        params: &ForestParams,
    ) -> Result<Self> {
        let (n_rows, n_features) = features.dim();
        if n_rows == 0 || n_features == 0 {
            return Err(FraudError::Training(format!(
                "cannot fit on a {n_rows}x{n_features} matrix"
            )));
        }
        if labels.len() != n_rows {
            return Err(FraudError::Training(format!(
                "{} labels for {n_rows} rows",
                labels.len()
            )));
        }
        if let Some(bad) = labels.iter().find(|&&l| l > FRAUD) {
            return Err(FraudError::Training(format!("label {bad} is not 0 or 1")));
        }
        if params.n_trees == 0 {
            return Err(FraudError::Training("forest needs at least one tree".into()));
        }

        let class_weights = balanced_class_weights(labels);
        let n_columns = params.max_features.resolve(n_features);
        let tree_params = DecisionTree::<f64, usize>::params()
            .split_quality(SplitQuality::Gini)
            .max_depth(params.max_depth)
            .min_weight_split(MIN_WEIGHT)
            .min_weight_leaf(MIN_WEIGHT);

        let mut rng = StdRng::seed_from_u64(params.seed);
        let mut members = Vec::with_capacity(params.n_trees);
        for t in 0..params.n_trees {
            let rows: Vec<usize> = (0..n_rows).map(|_| rng.gen_range(0..n_rows)).collect();
            let mut columns = rand::seq::index::sample(&mut rng, n_features, n_columns).into_vec();
            columns.sort_unstable();

            let records = features.select(Axis(0), &rows).select(Axis(1), &columns);
            let targets: Array1<usize> = rows.iter().map(|&r| labels[r]).collect();
            let weights: Array1<f32> = rows
                .iter()
                .map(|&r| class_weights[labels[r]] as f32)
                .collect();
            let dataset = Dataset::new(records, targets).with_weights(weights);

            let tree = tree_params
                .fit(&dataset)
                .map_err(|e| FraudError::Training(format!("tree {t}: {e}")))?;
            debug!(tree = t, columns = ?columns, "tree fitted");
            members.push(Member { columns, tree });
        }

        info!(
            trees = members.len(),
            rows = n_rows,
            features = n_features,
            columns_per_tree = n_columns,
            clean_weight = class_weights[0],
            fraud_weight = class_weights[1],
            "forest trained"
        );
        Ok(Self {
            n_features,
            members,
        })
    }

    /// Share of trees voting fraud. Pure: the same vector always gets the same value.
    pub fn predict_probability(&self, vector: &[f64]) -> Result<f64> {
        if vector.len() != self.n_features {
            return Err(FraudError::data(format!(
                "feature vector has {} columns, classifier expects {}",
                vector.len(),
                self.n_features
            )));
        }
        let votes = self
            .members
            .iter()
            .filter(|member| member.votes_fraud(vector))
            .count();
        Ok(votes as f64 / self.members.len() as f64)
    }

    pub fn n_features(&self) -> usize {
        self.n_features
    }

    pub fn n_trees(&self) -> usize {
        self.members.len()
    }

    /// Checks a deserialized forest before it is used for scoring.
    pub fn validate(&self) -> Result<()> {
        if self.members.is_empty() {
            return Err(FraudError::artifact("classifier has no trees"));
        }
        for (i, member) in self.members.iter().enumerate() {
            if member.columns.is_empty() || member.columns.iter().any(|&c| c >= self.n_features) {
                return Err(FraudError::artifact(format!(
                    "tree {i} references columns outside 0..{}",
                    self.n_features
                )));
            }
        }
        Ok(())
    }
}
