//! Provider abstraction for the upstream generative API
//!
//! Defines the `Provider` trait that decouples the failover core from the
//! transport. `GeminiProvider` speaks the Gemini `generateContent` REST API;
//! tests substitute scripted providers that return canned responses.
//!
//! Providers return a typed `ProviderError` carrying the HTTP status, the
//! Google RPC status and the `ErrorInfo` reason when the upstream supplies
//! them, so the classifier can decide on structured codes and fall back to
//! message matching only when nothing structured is available.

pub mod gemini;
pub mod types;

pub use gemini::GeminiProvider;
pub use types::{
    AspectRatio, Candidate, CandidateContent, ContentPart, GenerateContentResponse,
    GenerationConfig, GenerationRequest, InlineData, ModelId, Payload, PromptFeedback,
    ResponsePart, SafetyRating,
};

use std::future::Future;
use std::pin::Pin;

/// Errors from a single upstream call.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProviderError {
    /// The upstream answered with a non-success status.
    #[error("upstream returned {status}: {message}")]
    Api {
        status: u16,
        /// Google RPC status string, e.g. `RESOURCE_EXHAUSTED`
        rpc_status: Option<String>,
        /// `google.rpc.ErrorInfo` reason, e.g. `API_KEY_INVALID`
        reason: Option<String>,
        message: String,
    },

    /// The request never produced a response (connect, timeout, TLS).
    #[error("upstream request failed: {0}")]
    Transport(String),

    /// The upstream answered 2xx but the body was not a valid response.
    #[error("upstream response could not be decoded: {0}")]
    Decode(String),
}

impl ProviderError {
    /// HTTP status for API errors.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Api { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Human-readable message without the variant prefix.
    pub fn message(&self) -> &str {
        match self {
            Self::Api { message, .. } => message,
            Self::Transport(message) | Self::Decode(message) => message,
        }
    }
}

/// Result alias for provider operations.
pub type Result<T> = std::result::Result<T, ProviderError>;

/// Boxed future returned by provider methods.
pub type ProviderFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T>> + Send + 'a>>;

/// Abstraction over the external generative API.
///
/// Every call performs exactly one upstream request with the given API key.
/// Retrying, failover and pacing are the caller's concern.
///
/// Uses `Pin<Box<dyn Future>>` return types for dyn-compatibility (`Arc<dyn Provider>`).
pub trait Provider: Send + Sync {
    /// Identifier for logging (e.g. "gemini")
    fn id(&self) -> &str;

    /// Perform one generation call.
    fn generate<'a>(
        &'a self,
        api_key: &'a str,
        request: &'a GenerationRequest,
    ) -> ProviderFuture<'a, GenerateContentResponse>;

    /// Check that a key is accepted by the upstream without generating anything.
    fn validate_key<'a>(&'a self, api_key: &'a str) -> ProviderFuture<'a, ()>;
}
