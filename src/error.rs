use thiserror::Error;

pub type Result<T> = std::result::Result<T, FraudError>;

#[derive(Debug, Error)]
pub enum FraudError {
    /// A transaction is missing a field, carries a malformed one, or the corpus is empty.
    #[error("data error: {0}")]
    Data(String),

    /// The persisted artifact set is missing, corrupt or mismatched.
    #[error("artifact error: {0}")]
    Artifact(String),

    #[error("training failed: {0}")]
    Training(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Csv(#[from] csv::Error),

    #[error(transparent)]
    Config(#[from] config::ConfigError),
}

impl FraudError {
    pub fn data(msg: impl Into<String>) -> Self {
        Self::Data(msg.into())
    }

    pub fn artifact(msg: impl Into<String>) -> Self {
        Self::Artifact(msg.into())
    }
}
