//! Error types shared by the library and the CLI

use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// Errors surfaced by the library outside of a single reconciliation pass
#[derive(Error, Debug)]
pub enum AodError {
    #[error("failed to read file at {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to unmarshal yaml to {target}: {source}")]
    Yaml {
        target: &'static str,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("failed to parse config: {0}")]
    Config(#[from] toml::de::Error),

    #[error("invalid config: {0}")]
    InvalidConfig(String),

    #[error("failed to validate IamRequest: {0}")]
    Validation(#[from] ValidationErrors),

    #[error("failed to create policy store client: {0}")]
    Http(#[from] reqwest::Error),

    #[error(transparent)]
    Reconcile(#[from] ReconcileError),
}

pub type Result<T> = std::result::Result<T, AodError>;

/// Every problem found while validating a request, in discovery order
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationErrors(pub Vec<String>);

impl std::error::Error for ValidationErrors {}

impl fmt::Display for ValidationErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0.join("\n"))
    }
}

/// A managed condition expression that could not be read back as an expiry
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ExpiryDecodeError {
    #[error(
        "expression {expression:?} does not match format \"request.time < timestamp('YYYY-MM-DDTHH:MM:SSZ')\""
    )]
    Malformed { expression: String },

    #[error("failed to parse expiration {expression:?}: {source}")]
    InvalidTimestamp {
        expression: String,
        #[source]
        source: chrono::ParseError,
    },

    #[error("expiration {expression:?} is out of range: {source}")]
    OutOfRange {
        expression: String,
        #[source]
        source: ExpiryRangeError,
    },
}

/// An instant outside the four-digit years an RFC 3339 timestamp can carry
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("expiry {at} is outside the supported range of years 0001 through 9999")]
pub struct ExpiryRangeError {
    pub at: chrono::DateTime<chrono::Utc>,
}

/// Classification of a policy store failure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StoreErrorKind {
    Unavailable,
    DeadlineExceeded,
    ResourceExhausted,
    /// Concurrent modification, e.g. an etag mismatch on write
    Aborted,
    Internal,
    InvalidArgument,
    Unauthenticated,
    PermissionDenied,
    NotFound,
    FailedPrecondition,
}

impl StoreErrorKind {
    pub fn is_retryable(self) -> bool {
        matches!(
            self,
            Self::Unavailable
                | Self::DeadlineExceeded
                | Self::ResourceExhausted
                | Self::Aborted
                | Self::Internal
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Unavailable => "unavailable",
            Self::DeadlineExceeded => "deadline exceeded",
            Self::ResourceExhausted => "resource exhausted",
            Self::Aborted => "aborted",
            Self::Internal => "internal",
            Self::InvalidArgument => "invalid argument",
            Self::Unauthenticated => "unauthenticated",
            Self::PermissionDenied => "permission denied",
            Self::NotFound => "not found",
            Self::FailedPrecondition => "failed precondition",
        }
    }
}

impl fmt::Display for StoreErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Failure reported by a policy store client on get or set
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{kind}: {message}")]
pub struct StoreError {
    pub kind: StoreErrorKind,
    pub message: String,
}

impl StoreError {
    pub fn new(kind: StoreErrorKind, message: impl Into<String>) -> Self {
        StoreError {
            kind,
            message: message.into(),
        }
    }

    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::new(StoreErrorKind::Unavailable, message)
    }

    pub fn permission_denied(message: impl Into<String>) -> Self {
        Self::new(StoreErrorKind::PermissionDenied, message)
    }

    pub fn is_retryable(&self) -> bool {
        self.kind.is_retryable()
    }
}

/// Failure of one scope; never aborts the other scopes of a request
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ScopeError {
    #[error("failed to handle policy update for resource {scope}: resource isn't one of [organizations, folders, projects]")]
    InvalidScope { scope: String },

    #[error("failed to handle policy update for resource {scope}: failed to {operation} IAM policy: {source}")]
    Store {
        scope: String,
        operation: &'static str,
        #[source]
        source: StoreError,
    },

    #[error("failed to handle policy update for resource {scope}: gave up after {attempts} attempts: {source}")]
    RetriesExhausted {
        scope: String,
        attempts: u32,
        #[source]
        source: StoreError,
    },

    #[error("failed to handle policy update for resource {scope}: cancelled")]
    Cancelled { scope: String },
}

impl ScopeError {
    pub fn scope(&self) -> &str {
        match self {
            ScopeError::InvalidScope { scope }
            | ScopeError::Store { scope, .. }
            | ScopeError::RetriesExhausted { scope, .. }
            | ScopeError::Cancelled { scope } => scope,
        }
    }
}

/// All scope failures of one request, joined line by line
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconcileError {
    pub failures: Vec<ScopeError>,
}

impl std::error::Error for ReconcileError {}

impl fmt::Display for ReconcileError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, failure) in self.failures.iter().enumerate() {
            if i > 0 {
                f.write_str("\n")?;
            }
            write!(f, "{}", failure)?;
        }
        Ok(())
    }
}
