use std::fmt;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Webhook verification failed: {0}")]
    WebhookVerification(String),

    #[error("Tracker error: {0}")]
    Tracker(#[from] TrackerError),

    #[error("Linkage for job '{job}' changed concurrently (expected revision {expected}, found {found})")]
    StoreConflict {
        job: String,
        expected: u64,
        found: u64,
    },

    #[error("Linkage store error: {0}")]
    Store(String),

    #[error("Template rendering failed: {0}")]
    Render(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("TOML decode error: {0}")]
    TomlDecode(#[from] toml::de::Error),

    #[error("TOML encode error: {0}")]
    TomlEncode(#[from] toml::ser::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl AppError {
    /// Whether a fresh evaluation of the same build may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, AppError::StoreConflict { .. })
    }
}

pub type Result<T> = std::result::Result<T, AppError>;

/// The tracker operation that was in flight when a call failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackerStep {
    GetIssue,
    CreateIssue,
    AddComment,
    Reopen,
    Close,
    SetLabels,
}

impl fmt::Display for TrackerStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TrackerStep::GetIssue => "get-issue",
            TrackerStep::CreateIssue => "create-issue",
            TrackerStep::AddComment => "add-comment",
            TrackerStep::Reopen => "reopen",
            TrackerStep::Close => "close",
            TrackerStep::SetLabels => "set-labels",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackerErrorCategory {
    /// Connection failures, timeouts, malformed responses.
    Network,
    Unauthorized,
    RateLimited,
    NotFound,
    /// The request was rejected for any other reason.
    Rejected,
    /// The caller did not supply what the step needs.
    InvalidRequest,
}

impl TrackerErrorCategory {
    pub fn from_status(status: u16) -> Self {
        match status {
            401 | 403 => TrackerErrorCategory::Unauthorized,
            404 | 410 => TrackerErrorCategory::NotFound,
            429 => TrackerErrorCategory::RateLimited,
            _ => TrackerErrorCategory::Rejected,
        }
    }
}

impl fmt::Display for TrackerErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TrackerErrorCategory::Network => "network",
            TrackerErrorCategory::Unauthorized => "unauthorized",
            TrackerErrorCategory::RateLimited => "rate-limited",
            TrackerErrorCategory::NotFound => "not-found",
            TrackerErrorCategory::Rejected => "rejected",
            TrackerErrorCategory::InvalidRequest => "invalid-request",
        };
        f.write_str(name)
    }
}

/// A failed tracker call, tagged with the step that failed.
#[derive(Debug, Clone, Error)]
#[error("{step} failed ({category}{}): {message}", .status.map(|s| format!(", HTTP {s}")).unwrap_or_default())]
pub struct TrackerError {
    pub step: TrackerStep,
    pub status: Option<u16>,
    pub category: TrackerErrorCategory,
    pub message: String,
}

impl TrackerError {
    pub fn from_status(step: TrackerStep, status: u16, message: impl Into<String>) -> Self {
        Self {
            step,
            status: Some(status),
            category: TrackerErrorCategory::from_status(status),
            message: message.into(),
        }
    }

    pub fn network(step: TrackerStep, message: impl Into<String>) -> Self {
        Self {
            step,
            status: None,
            category: TrackerErrorCategory::Network,
            message: message.into(),
        }
    }

    pub fn invalid_request(step: TrackerStep, message: impl Into<String>) -> Self {
        Self {
            step,
            status: None,
            category: TrackerErrorCategory::InvalidRequest,
            message: message.into(),
        }
    }
}
