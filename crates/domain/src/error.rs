/// Shared error type used across all payportal crates.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("IO: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("HTTP: {0}")]
    Http(String),

    #[error("not found")]
    NotFound,

    #[error("session expired")]
    Expired,

    #[error("session is in a terminal state")]
    Terminal,

    #[error("illegal transition: {from} -> {to}")]
    IllegalTransition { from: String, to: String },

    #[error("invalid webhook signature: {0}")]
    SignatureInvalid(String),

    #[error("provider {provider}: {message}")]
    ProviderUnavailable { provider: String, message: String },

    #[error("no active mandate on file")]
    NoActiveMandate,

    #[error("validation: {0}")]
    Validation(String),

    #[error("config: {0}")]
    Config(String),

    #[error("{0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, Error>;
