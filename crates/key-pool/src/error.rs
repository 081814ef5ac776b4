//! Error types for pool operations and terminal generation failures

use std::fmt;

/// Errors from pool operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PoolError {
    /// No credentials are loaded. This is a configuration problem, not
    /// something a retry can fix.
    #[error("credential pool is empty")]
    Empty,
}

/// Result alias for pool operations.
pub type Result<T> = std::result::Result<T, PoolError>;

/// Closed taxonomy of failure causes for a single upstream attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailureKind {
    CredentialInvalid,
    QuotaExceeded,
    ModelUnavailable,
    ContentPolicyBlocked,
    MalformedResponse,
    UnknownTransient,
}

impl FailureKind {
    /// Label for metrics and logging.
    pub fn label(&self) -> &'static str {
        match self {
            FailureKind::CredentialInvalid => "credential_invalid",
            FailureKind::QuotaExceeded => "quota_exceeded",
            FailureKind::ModelUnavailable => "model_unavailable",
            FailureKind::ContentPolicyBlocked => "content_policy_blocked",
            FailureKind::MalformedResponse => "malformed_response",
            FailureKind::UnknownTransient => "unknown_transient",
        }
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// A classified attempt failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Failure {
    pub kind: FailureKind,
    pub message: String,
    /// Harm category reported by the upstream for policy blocks.
    pub category: Option<String>,
}

impl Failure {
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            category: None,
        }
    }

    pub fn with_category(mut self, category: Option<String>) -> Self {
        self.category = category;
        self
    }
}

impl fmt::Display for Failure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

/// Terminal outcome of a failed generation, after all retries and failover.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GenerationError {
    #[error("no credentials loaded")]
    NoCredentials,

    #[error("all credentials are invalid")]
    AllCredentialsInvalid,

    #[error("all credentials are rate limited")]
    AllCredentialsRateLimited,

    #[error("model unavailable: {message}")]
    ModelUnavailable { message: String },

    #[error("content blocked: {reason}")]
    ContentBlocked {
        reason: String,
        category: Option<String>,
    },

    #[error("generation failed ({kind}): {message}")]
    Failed { kind: FailureKind, message: String },
}

impl GenerationError {
    /// Convert the last classified failure into a terminal error.
    ///
    /// Key-level kinds collapse into pool-wide errors because they are only
    /// surfaced once every usable key has been tried.
    pub fn from_failure(failure: Failure) -> Self {
        match failure.kind {
            FailureKind::CredentialInvalid => GenerationError::AllCredentialsInvalid,
            FailureKind::QuotaExceeded => GenerationError::AllCredentialsRateLimited,
            FailureKind::ModelUnavailable => GenerationError::ModelUnavailable {
                message: failure.message,
            },
            FailureKind::ContentPolicyBlocked => GenerationError::ContentBlocked {
                reason: failure.message,
                category: failure.category,
            },
            kind => GenerationError::Failed {
                kind,
                message: failure.message,
            },
        }
    }

    /// Stable machine-readable error type.
    pub fn error_type(&self) -> &'static str {
        match self {
            GenerationError::NoCredentials => "no_credentials",
            GenerationError::AllCredentialsInvalid => "all_credentials_invalid",
            GenerationError::AllCredentialsRateLimited => "all_credentials_rate_limited",
            GenerationError::ModelUnavailable { .. } => "model_unavailable",
            GenerationError::ContentBlocked { .. } => "content_blocked",
            GenerationError::Failed { .. } => "generation_failed",
        }
    }

    /// One human-readable sentence for the end user.
    pub fn user_message(&self) -> String {
        match self {
            GenerationError::NoCredentials => {
                "No API keys are loaded. Add at least one Gemini API key.".to_string()
            }
            GenerationError::AllCredentialsInvalid => {
                "All API keys were rejected as invalid. Check your keys and try again.".to_string()
            }
            GenerationError::AllCredentialsRateLimited => {
                "All API keys have reached their rate limit. Wait a minute and try again."
                    .to_string()
            }
            GenerationError::ModelUnavailable { message } => {
                format!("The selected model is not available: {message}")
            }
            GenerationError::ContentBlocked { reason, category } => match category {
                Some(category) => {
                    format!("The request was blocked by the safety filter ({category}): {reason}")
                }
                None => format!("The request was blocked: {reason}"),
            },
            GenerationError::Failed { message, .. } => format!("Generation failed: {message}"),
        }
    }
}

impl From<PoolError> for GenerationError {
    fn from(err: PoolError) -> Self {
        match err {
            PoolError::Empty => GenerationError::NoCredentials,
        }
    }
}
