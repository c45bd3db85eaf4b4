use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;

use crate::error::{FraudError, Result};

/// Row indices of the training and holdout parts of a corpus.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Split {
    pub train: Vec<usize>,
    pub holdout: Vec<usize>,
}

/// Shuffles `0..n_rows` with `seed` and holds out `ceil(n_rows * holdout_ratio)`
/// rows, always leaving at least one row to train on.
pub fn train_holdout_split(n_rows: usize, holdout_ratio: f64, seed: u64) -> Result<Split> {
    if !(0.0..1.0).contains(&holdout_ratio) {
        return Err(FraudError::data(format!(
            "holdout ratio {holdout_ratio} must be in [0, 1)"
        )));
    }
    if n_rows == 0 {
        return Err(FraudError::data("cannot split zero rows"));
    }

    let mut indices: Vec<usize> = (0..n_rows).collect();
    let mut rng = StdRng::seed_from_u64(seed);
    indices.shuffle(&mut rng);

    let n_holdout = ((n_rows as f64 * holdout_ratio).ceil() as usize).min(n_rows - 1);
    let train = indices.split_off(n_holdout);
    Ok(Split {
        train,
        holdout: indices,
    })
}
