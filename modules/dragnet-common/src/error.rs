use thiserror::Error;

/// Typed failure produced by a source adapter. The retry policy classifies
/// these; they never propagate to the job as raw errors.
#[derive(Debug, Clone, Error)]
pub enum FetchError {
    /// Anti-bot wall, CAPTCHA, or off-domain redirect (regional filtering).
    #[error("blocked by target: {0}")]
    Blocked(String),

    /// Timeout, 5xx, connection reset. Worth retrying.
    #[error("transient failure: {0}")]
    Transient(String),

    #[error("not found: {0}")]
    NotFound(String),

    /// Unparseable or empty content.
    #[error("invalid content: {0}")]
    InvalidContent(String),
}

impl FetchError {
    pub fn kind(&self) -> FailureKind {
        match self {
            FetchError::Blocked(_) => FailureKind::Blocked,
            FetchError::Transient(_) => FailureKind::Transient,
            FetchError::NotFound(_) => FailureKind::NotFound,
            FetchError::InvalidContent(_) => FailureKind::InvalidContent,
        }
    }
}

impl From<reqwest::Error> for FetchError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() || err.is_connect() {
            FetchError::Transient(err.to_string())
        } else if err.is_status() {
            match err.status() {
                Some(s) if s.is_server_error() => FetchError::Transient(err.to_string()),
                Some(s) if s.as_u16() == 404 => FetchError::NotFound(err.to_string()),
                _ => FetchError::Transient(err.to_string()),
            }
        } else if err.is_decode() {
            FetchError::InvalidContent(err.to_string())
        } else {
            FetchError::Transient(err.to_string())
        }
    }
}

/// Failure classification without the message payload. Used for retry
/// decisions and for the job's error summary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailureKind {
    Blocked,
    Transient,
    NotFound,
    InvalidContent,
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FailureKind::Blocked => write!(f, "blocked"),
            FailureKind::Transient => write!(f, "transient"),
            FailureKind::NotFound => write!(f, "not_found"),
            FailureKind::InvalidContent => write!(f, "invalid_content"),
        }
    }
}

#[derive(Debug, Error)]
pub enum DragnetError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Keyword expansion unavailable: {0}")]
    ExpansionUnavailable(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Unknown job: {0}")]
    UnknownJob(uuid::Uuid),

    #[error("Job {id} is {status} and cannot be cancelled")]
    InvalidCancel { id: uuid::Uuid, status: String },

    #[error(transparent)]
    Anyhow(#[from] anyhow::Error),
}
