use thiserror::Error;

#[derive(Debug, Error)]
pub enum DeskError {
    /// Missing credentials, unknown vendor, missing agent parameters.
    #[error("Config error: {0}")]
    Config(String),

    /// The vendor answered with a non-success status or without a body.
    #[error("{vendor} API error {status}: {body}")]
    Transport {
        vendor: String,
        status: u16,
        body: String,
    },

    /// Connection-level failure, including a read failing mid-stream.
    #[error("HTTP error: {0}")]
    Http(String),

    #[error("Store error: {0}")]
    Store(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl DeskError {
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    pub fn is_config(&self) -> bool {
        matches!(self, Self::Config(_))
    }
}

pub type Result<T> = std::result::Result<T, DeskError>;
