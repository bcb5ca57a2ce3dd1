use std::fmt;
use thiserror::Error;
use tracing::debug;

/// Maximum number of characters of a provider error body kept in an error message.
const MAX_DETAIL_CHARS: usize = 160;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    RateLimited,
    Server(u16),
    Network,
    Timeout,
    Client(u16),
    Malformed,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureKind::RateLimited => write!(f, "rate limited"),
            FailureKind::Server(status) => write!(f, "server error {status}"),
            FailureKind::Network => write!(f, "network error"),
            FailureKind::Timeout => write!(f, "timeout"),
            FailureKind::Client(status) => write!(f, "client error {status}"),
            FailureKind::Malformed => write!(f, "malformed response"),
        }
    }
}

/// A failed call to an external embedding or rerank provider.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{kind}: {message}")]
pub struct ProviderFailure {
    pub kind: FailureKind,
    pub message: String,
}

impl ProviderFailure {
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: truncate_detail(&message.into()),
        }
    }

    pub fn from_status(status: u16, body: &str) -> Self {
        let kind = match status {
            429 => FailureKind::RateLimited,
            500..=599 => FailureKind::Server(status),
            _ => FailureKind::Client(status),
        };
        if !body.trim().is_empty() {
            debug!(status, body = %truncate_detail(body), "provider error body");
        }
        Self::new(kind, "provider request failed")
    }

    pub fn from_transport(error: &reqwest::Error) -> Self {
        if error.is_timeout() {
            Self::new(FailureKind::Timeout, "request timed out")
        } else if error.is_decode() {
            Self::new(FailureKind::Malformed, "response body could not be decoded")
        } else {
            Self::new(FailureKind::Network, "request could not be completed")
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(
            self.kind,
            FailureKind::RateLimited | FailureKind::Server(_) | FailureKind::Network | FailureKind::Timeout
        )
    }
}

#[derive(Debug, Error)]
pub enum EmbeddingError {
    #[error("embedding failed after {attempts} attempt(s): {source}")]
    Exhausted {
        attempts: u32,
        #[source]
        source: ProviderFailure,
    },

    #[error("embedding failed: {0}")]
    Terminal(#[source] ProviderFailure),

    #[error("text at index {index} is empty")]
    EmptyText { index: usize },
}

impl EmbeddingError {
    /// The provider failure behind this error, if the provider was reached.
    pub fn failure(&self) -> Option<&ProviderFailure> {
        match self {
            EmbeddingError::Exhausted { source, .. } => Some(source),
            EmbeddingError::Terminal(source) => Some(source),
            EmbeddingError::EmptyText { .. } => None,
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("missing api key: {0}")]
    MissingKey(&'static str),

    #[error("invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("invalid response from {backend}: {details}")]
    BackendResponse { backend: String, details: String },

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("url parse error: {0}")]
    Url(#[from] url::ParseError),

    #[error("serialize error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("store request failed: {0}")]
    Request(String),
}

#[derive(Debug, Error)]
pub enum RagError {
    #[error(transparent)]
    Embedding(#[from] EmbeddingError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("invalid request: {0}")]
    InvalidRequest(String),
}

pub type Result<T, E = RagError> = std::result::Result<T, E>;

pub(crate) fn truncate_detail(detail: &str) -> String {
    let trimmed = detail.trim();
    if trimmed.chars().count() <= MAX_DETAIL_CHARS {
        return trimmed.to_string();
    }
    let mut short: String = trimmed.chars().take(MAX_DETAIL_CHARS).collect();
    short.push_str("...");
    short
}
