use thiserror::Error;

/// Failure of an external collaborator call (market data, signals, executor, account state).
///
/// These are transient by nature: the orchestrator degrades the one affected
/// operation and carries on with the rest of the cycle.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum CollaboratorError {
    #[error("{collaborator} timed out after {secs}s")]
    Timeout { collaborator: String, secs: u64 },

    #[error("transport error: {0}")]
    Transport(String),

    #[error("invalid response: {0}")]
    InvalidResponse(String),

    #[error("unavailable: {0}")]
    Unavailable(String),
}

impl From<reqwest::Error> for CollaboratorError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            Self::InvalidResponse(err.to_string())
        } else {
            Self::Transport(err.to_string())
        }
    }
}

/// Whole-cycle failures. Anything narrower becomes a rejection or a diagnostic.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum CycleError {
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("market data unavailable: {0}")]
    MarketDataUnavailable(String),

    #[error("a cycle is already in progress")]
    CycleInProgress,
}

#[derive(Debug, Clone, Error, PartialEq)]
pub enum LedgerError {
    #[error("invalid fill for {symbol}: {reason}")]
    InvalidFill { symbol: String, reason: String },
}

/// Invalid or missing configuration values.
#[derive(Debug, Clone, Error, PartialEq)]
#[error("{field}: {reason}")]
pub struct ConfigError {
    pub field: String,
    pub reason: String,
}

impl ConfigError {
    pub fn new(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            reason: reason.into(),
        }
    }
}

impl From<ConfigError> for CycleError {
    fn from(err: ConfigError) -> Self {
        Self::Configuration(err.to_string())
    }
}
