use std::path::PathBuf;

/// Failure to resolve credentials before any remote contact.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required configuration keys: {}", .0.join(", "))]
    MissingKeys(Vec<&'static str>),
    #[error("failed to read config file {}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: ini::Error,
    },
}

/// Failure to obtain an authenticated session.
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    /// The login endpoint answered and rejected the credentials.
    #[error("Salesforce authentication failed: {0}")]
    Failed(String),
    /// Anything else: transport errors, unreadable login responses.
    #[error("Unexpected error during authentication: {0}")]
    Unexpected(String),
}

/// Failure of a single call against the REST API.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("resource not found: {0}")]
    NotFound(String),
    #[error("API error ({status}): {message}")]
    Status { status: u16, message: String },
    #[error(transparent)]
    Transport(#[from] ureq::Error),
    #[error(transparent)]
    Decode(#[from] serde_json::Error),
}

/// Failure of an account operation.
#[derive(Debug, thiserror::Error)]
pub enum AccountError {
    #[error(transparent)]
    Auth(#[from] AuthError),
    #[error("{0}")]
    Validation(String),
    #[error("{0}")]
    NotFound(String),
    #[error("Multiple accounts found with {field}: {value} ({matches} matches)")]
    AmbiguousReference {
        field: &'static str,
        value: String,
        matches: usize,
    },
    #[error("Unexpected response code: {0}")]
    UnexpectedStatus(u16),
    #[error(transparent)]
    Remote(#[from] ApiError),
}
