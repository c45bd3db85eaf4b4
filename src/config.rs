//! Configuration for training and serving.

use std::path::{Path, PathBuf};

use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::forest::{ForestParams, MaxFeatures};

pub const DEFAULT_CONFIG_PATH: &str = "config/fraud_scoring.toml";
pub const ENV_PREFIX: &str = "FRAUD_SCORING";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AppConfig {
    pub corpus: CorpusConfig,
    pub training: TrainingConfig,
    pub artifacts: ArtifactsConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CorpusConfig {
    /// JSON array or `.csv` file of historical transactions
    pub path: PathBuf,
    /// Only this user's transactions are used for training
    pub user: String,
}

impl Default for CorpusConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("transactions.json"),
            user: "user_1".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingConfig {
    pub n_trees: usize,
    /// Share of the corpus held out for evaluation
    pub holdout_ratio: f64,
    /// Seeds both the holdout split and the forest
    pub seed: u64,
    #[serde(default)]
    pub max_depth: Option<usize>,
    pub max_features: MaxFeatures,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        let forest = ForestParams::default();
        Self {
            n_trees: forest.n_trees,
            holdout_ratio: 0.2,
            seed: forest.seed,
            max_depth: forest.max_depth,
            max_features: forest.max_features,
        }
    }
}

impl TrainingConfig {
    pub fn forest_params(&self) -> ForestParams {
        ForestParams {
            n_trees: self.n_trees,
            max_depth: self.max_depth,
            max_features: self.max_features,
            seed: self.seed,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArtifactsConfig {
    /// Directory holding the four-file artifact set
    pub dir: PathBuf,
}

impl Default for ArtifactsConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("models"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,
    /// Log format (json, pretty)
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
        }
    }
}

impl AppConfig {
    /// Defaults, then the default config file if present, then the environment.
    pub fn load() -> Result<Self> {
        Self::build(Path::new(DEFAULT_CONFIG_PATH), false)
    }

    /// Like [`AppConfig::load`], but the file at `path` must exist.
    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::build(path.as_ref(), true)
    }

    fn build(path: &Path, required: bool) -> Result<Self> {
        let config = Config::builder()
            .add_source(Config::try_from(&AppConfig::default())?)
            .add_source(File::from(path).required(required))
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;
        Ok(config.try_deserialize()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.corpus.user, "user_1");
        assert_eq!(config.training.n_trees, 100);
        assert_eq!(config.training.holdout_ratio, 0.2);
        assert_eq!(config.training.seed, 42);
        assert_eq!(config.training.max_features, MaxFeatures::Sqrt);
        assert_eq!(config.artifacts.dir, PathBuf::from("models"));
    }

    #[test]
    fn test_file_overrides_defaults() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            "[training]\nn_trees = 7\nmax_features = \"all\"\n\n[corpus]\nuser = \"user_9\""
        )
        .unwrap();

        let config = AppConfig::load_from_path(file.path()).unwrap();
        assert_eq!(config.training.n_trees, 7);
        assert_eq!(config.training.max_features, MaxFeatures::All);
        assert_eq!(config.corpus.user, "user_9");
        // untouched sections keep their defaults
        assert_eq!(config.training.seed, 42);
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_missing_required_file_fails() {
        let result = AppConfig::load_from_path("/definitely/not/here.toml");
        assert!(result.is_err());
    }
}
