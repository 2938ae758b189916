//! Gateway Error Types
//!
//! One error enum for the whole crate, split along the propagation
//! boundaries: validation errors fail fast before any backend call,
//! upstream errors are classified by the rotator, persistence errors are
//! logged and swallowed.

use std::fmt;

/// Main error type for gateway operations
#[derive(Debug)]
pub enum Error {
    /// Malformed or missing request fields
    Validation(String),

    /// Requested model is not in the configured tier list
    ModelNotFound {
        model: String,
        available: Vec<String>,
    },

    /// Input the backend translation cannot express (e.g. image parts)
    UnsupportedInput(String),

    /// Error reported by the backend; the rotator decides whether it is
    /// recoverable by rotation or fatal
    Upstream {
        status: Option<u16>,
        message: String,
    },

    /// Every tier and credential in the search space has been tried
    NoAvailableKeys,

    /// Round-robin pool ran out of acceptable entries
    PoolExhausted,

    /// A key source was read successfully but contained no keys
    NoKeysFound(String),

    /// A key source could not be fetched or read
    SourceUnavailable(String),

    /// Durable store read/write failed (never surfaced to callers)
    Persistence(String),

    /// Streaming transport or decode failure
    Stream(String),

    /// Configuration errors (invalid values, unreadable files)
    Config(String),
}

impl Error {
    /// HTTP status the error maps to at the request boundary.
    ///
    /// `NoAvailableKeys` and `PoolExhausted` deliberately share 500 with
    /// fatal upstream errors but keep distinct messages, so operators can
    /// tell "backend broken" from "capacity exhausted" in the body.
    pub fn http_status(&self) -> u16 {
        match self {
            Error::Validation(_) | Error::ModelNotFound { .. } | Error::UnsupportedInput(_) => 400,
            _ => 500,
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Validation(msg) => write!(f, "Invalid request: {}", msg),
            Error::ModelNotFound { model, available } => {
                write!(
                    f,
                    "Model '{}' not found. Available models: {}",
                    model,
                    available.join(", ")
                )
            }
            Error::UnsupportedInput(msg) => write!(f, "Unsupported input: {}", msg),
            Error::Upstream { status, message } => match status {
                Some(code) => write!(f, "Upstream error (HTTP {}): {}", code, message),
                None => write!(f, "Upstream error: {}", message),
            },
            Error::NoAvailableKeys => {
                write!(f, "All credentials exhausted across every model tier")
            }
            Error::PoolExhausted => write!(f, "No usable credential left in the pool"),
            Error::NoKeysFound(source) => {
                write!(f, "Key source '{}' contained no keys", source)
            }
            Error::SourceUnavailable(msg) => write!(f, "Key source unavailable: {}", msg),
            Error::Persistence(msg) => write!(f, "Persistence failure: {}", msg),
            Error::Stream(msg) => write!(f, "Streaming error: {}", msg),
            Error::Config(msg) => write!(f, "Configuration error: {}", msg),
        }
    }
}

impl std::error::Error for Error {}

impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Self {
        let status = err.status().map(|s| s.as_u16());
        if err.is_timeout() {
            Error::Upstream {
                status,
                message: format!("request timeout: {}", err),
            }
        } else if err.is_connect() {
            Error::Upstream {
                status,
                message: format!("connection failed: {}", err),
            }
        } else {
            Error::Upstream {
                status,
                message: err.to_string(),
            }
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Persistence(err.to_string())
    }
}

/// Result type alias for gateway operations
pub type Result<T> = std::result::Result<T, Error>;
