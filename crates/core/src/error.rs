use thiserror::Error;

pub type OptimizerResult<T> = Result<T, OptimizerError>;

#[derive(Error, Debug)]
pub enum OptimizerError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Campaign data error: {0}")]
    Data(String),

    #[error("Ad platform error: {0}")]
    Platform(String),

    #[error("Ad platform call timed out after {0}s")]
    PlatformTimeout(u64),

    #[error("Insufficient sample size: {0}")]
    Statistical(String),

    #[error("Job queue error: {0}")]
    Queue(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),
}
