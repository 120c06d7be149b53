//! Error taxonomy shared by the chat client.
//!
//! Backend and completion failures are typed at the collaborator boundary and
//! converted into an [`AppError`] bucket by the component that caught them.

use thiserror::Error;

/// Failure talking to the hosted auth/database/storage collaborator (or the
/// local SQLite row store standing in for it).
#[derive(Error, Debug, Clone, PartialEq)]
pub enum BackendError {
    #[error("not signed in")]
    Unauthenticated,

    #[error("backend returned {status}: {message}")]
    Http { status: u16, message: String },

    #[error("backend unreachable: {0}")]
    Transport(String),

    #[error("unexpected backend payload: {0}")]
    Decode(String),

    #[error("{entity} not found")]
    NotFound { entity: &'static str },

    #[error("local store error: {0}")]
    Local(String),
}

impl BackendError {
    pub fn http(status: u16, message: impl Into<String>) -> Self {
        Self::Http {
            status,
            message: message.into(),
        }
    }

    /// Message text as reported by the backend, used for matching well-known
    /// auth failures such as "Email not confirmed".
    pub fn message(&self) -> String {
        match self {
            BackendError::Http { message, .. } => message.clone(),
            other => other.to_string(),
        }
    }
}

impl From<reqwest::Error> for BackendError {
    fn from(error: reqwest::Error) -> Self {
        if error.is_decode() {
            BackendError::Decode(error.to_string())
        } else {
            BackendError::Transport(error.to_string())
        }
    }
}

impl From<rusqlite::Error> for BackendError {
    fn from(error: rusqlite::Error) -> Self {
        BackendError::Local(error.to_string())
    }
}

impl From<serde_json::Error> for BackendError {
    fn from(error: serde_json::Error) -> Self {
        BackendError::Decode(error.to_string())
    }
}

/// Failure of a chat-completion request.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CompletionError {
    /// The request was aborted through its cancellation token.
    #[error("request cancelled")]
    Cancelled,

    #[error("completion API error {status}: {body}")]
    Http { status: u16, body: String },

    #[error("completion API unreachable: {0}")]
    Transport(String),

    #[error("completion API returned no choices")]
    EmptyChoices,

    #[error("failed to parse completion response: {0}")]
    Decode(String),

    #[error("no completion provider configured")]
    NoProvider,
}

impl CompletionError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, CompletionError::Cancelled)
    }
}

/// Follow-up action offered alongside an auth error notice.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Remediation {
    ResendVerification { email: String },
    ResetPassword { email: String },
}

/// User-facing error buckets.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum AppError {
    /// Bad input; raised before any network call and mutates no state.
    #[error("{0}")]
    Validation(String),

    #[error("{message}")]
    Auth {
        message: String,
        remediation: Option<Remediation>,
    },

    #[error(transparent)]
    Completion(#[from] CompletionError),

    #[error("could not save: {0}")]
    Persistence(#[from] BackendError),

    #[error("{0}")]
    LocalResource(String),

    #[error("{what} timed out after {seconds}s")]
    Timeout { what: &'static str, seconds: u64 },
}

impl AppError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    pub fn auth(message: impl Into<String>) -> Self {
        Self::Auth {
            message: message.into(),
            remediation: None,
        }
    }

    pub fn local(message: impl Into<String>) -> Self {
        Self::LocalResource(message.into())
    }
}
