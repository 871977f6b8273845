use thiserror::Error;

/// Failures raised by a cache store.
///
/// A miss is not an error: stores return `Ok(None)` for that.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum CacheError {
    /// Reading or writing the backing storage failed.
    #[error("cache I/O error on {path}: {message}")]
    Io { path: String, message: String },

    /// A stored entry could not be decoded. Only that entry is affected.
    #[error("inconsistent cache entry {path}: {message}")]
    Inconsistent { path: String, message: String },
}

impl CacheError {
    pub fn io(path: impl std::fmt::Display, err: impl std::fmt::Display) -> Self {
        CacheError::Io {
            path: path.to_string(),
            message: err.to_string(),
        }
    }

    pub fn inconsistent(path: impl std::fmt::Display, err: impl std::fmt::Display) -> Self {
        CacheError::Inconsistent {
            path: path.to_string(),
            message: err.to_string(),
        }
    }
}

/// Failures of a live API call. Reported per request key.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum LiveCallError {
    #[error("authentication rejected ({status})")]
    Auth { status: u16 },

    #[error("rate limited by the API")]
    RateLimited,

    #[error("daily call budget of {limit} exhausted")]
    BudgetExhausted { limit: u64 },

    #[error("API returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("network error: {0}")]
    Network(String),

    #[error("could not decode API response: {0}")]
    Decode(String),
}

/// Why a single record of an export run could not be produced.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum PlanError {
    #[error(transparent)]
    Live(#[from] LiveCallError),

    /// The run was cancelled before a live call for this record was issued.
    #[error("export run cancelled before the record was fetched")]
    Cancelled,

    /// The record does not carry every selected field.
    #[error("record is missing selected fields: {}", missing.join(", "))]
    IncompleteRecord { missing: Vec<String> },
}
