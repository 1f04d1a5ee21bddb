use thiserror::Error;

pub type DripResult<T> = Result<T, DripError>;

#[derive(Error, Debug)]
pub enum DripError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid sequence: {0}")]
    InvalidSequence(String),

    #[error("Invalid state transition: {0}")]
    InvalidTransition(String),

    #[error("Subscriber inactive: {0}")]
    SubscriberInactive(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),
}
