use thiserror::Error;

/// Error taxonomy shared by every store and service operation. Each variant
/// maps to exactly one HTTP status at the API layer and carries a
/// human-readable message.
#[derive(Debug, Error)]
pub enum Error {
    /// The addressed resource id does not exist at all.
    #[error("{0} not found")]
    NotFound(&'static str),
    /// The resource exists but the caller holds no sufficient role on it.
    #[error("forbidden: {0}")]
    Forbidden(&'static str),
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("conflict: {0}")]
    Conflict(&'static str),
    /// Store unavailable or timed out; safe for the caller to retry.
    #[error("store unavailable: {0}")]
    Transient(String),
    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Stable machine-readable kind, surfaced in error response bodies.
    pub fn kind(&self) -> &'static str {
        match self {
            Error::NotFound(_) => "not_found",
            Error::Forbidden(_) => "forbidden",
            Error::InvalidInput(_) => "invalid_input",
            Error::Conflict(_) => "conflict",
            Error::Transient(_) => "transient",
            Error::Internal(_) => "internal",
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Transient(err.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Internal(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, Error>;
