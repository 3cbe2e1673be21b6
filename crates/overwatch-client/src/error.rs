use std::time::Duration;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum GatewayError {
    /// The platform imposed a cooldown; the caller must wait at least this
    /// long before the operation can succeed.
    #[error("flood wait: retry after {0:?}")]
    FloodWait(Duration),

    #[error("not found: {0}")]
    NotFound(String),

    /// The scope type does not support the requested operation.
    #[error("unsupported: {0}")]
    Unsupported(String),

    #[error("bridge http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("gateway error: {0}")]
    Other(String),
}

impl GatewayError {
    /// The mandated cooldown, when this error is a rate-limit signal.
    pub fn flood_wait(&self) -> Option<Duration> {
        match self {
            GatewayError::FloodWait(d) => Some(*d),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, GatewayError>;
