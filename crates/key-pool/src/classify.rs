//! Outcome classification for Gemini responses and errors
//!
//! Structured signals decide first: HTTP status, Google RPC status and the
//! `ErrorInfo` reason. Only when none of those match does the classifier fall
//! back to lower-cased substring patterns on the error message. Checks run in
//! a fixed order (invalid key, then model, then quota) because an invalid-key
//! message may also mention permissions or quotas.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use provider::{GenerateContentResponse, GenerationRequest, Payload, ProviderError};

use crate::error::{Failure, FailureKind};

/// Messages indicating the API key itself was rejected.
const INVALID_KEY_PATTERNS: &[&str] = &["api key not valid", "api_key_invalid", "permission denied"];

/// Messages indicating a rate limit or quota exhaustion.
const QUOTA_PATTERNS: &[&str] = &[
    "quota",
    "rate limit",
    "resource exhausted",
    "resource_exhausted",
    "too many requests",
    "429",
];

/// `ErrorInfo` reasons for a rejected key.
const INVALID_KEY_REASONS: &[&str] = &["API_KEY_INVALID", "API_KEY_EXPIRED"];

/// Finish reasons that mean the model completed normally.
const NORMAL_FINISH_REASONS: &[&str] = &["STOP", "FINISH_REASON_UNSPECIFIED"];

/// Characters of a text-only reply echoed back when an image was required.
const TEXT_ECHO_LIMIT: usize = 150;

/// What a successful call must produce.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Expectation {
    /// Only an inline image counts as success.
    Image,
    /// Non-empty text counts as success; an image is accepted too.
    Text,
}

impl Expectation {
    pub fn for_request(request: &GenerationRequest) -> Self {
        if request.config.image_output {
            Expectation::Image
        } else {
            Expectation::Text
        }
    }
}

/// Result of classifying one attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClassifiedOutcome {
    Success(Payload),
    /// Wait and retry with the same credential.
    RetryableSameCredential(Failure),
    /// Retry immediately with a different credential.
    RetryableDifferentCredential(Failure),
    /// Stop; no credential can fix this.
    Fatal(Failure),
}

impl ClassifiedOutcome {
    /// Label for metrics and logging.
    pub fn label(&self) -> &'static str {
        match self {
            ClassifiedOutcome::Success(_) => "success",
            ClassifiedOutcome::RetryableSameCredential(f)
            | ClassifiedOutcome::RetryableDifferentCredential(f)
            | ClassifiedOutcome::Fatal(f) => f.kind.label(),
        }
    }

    fn from_failure(failure: Failure) -> Self {
        match failure.kind {
            FailureKind::QuotaExceeded => ClassifiedOutcome::RetryableSameCredential(failure),
            FailureKind::CredentialInvalid => {
                ClassifiedOutcome::RetryableDifferentCredential(failure)
            }
            _ => ClassifiedOutcome::Fatal(failure),
        }
    }
}

/// Classify one provider call.
pub fn classify(
    result: Result<GenerateContentResponse, ProviderError>,
    expectation: Expectation,
) -> ClassifiedOutcome {
    match result {
        Ok(response) => classify_response(response, expectation),
        Err(err) => {
            let kind = classify_error(&err);
            ClassifiedOutcome::from_failure(Failure::new(kind, err.message()))
        }
    }
}

/// Classify a provider error into a failure kind.
pub fn classify_error(err: &ProviderError) -> FailureKind {
    match err {
        ProviderError::Api {
            status,
            rpc_status,
            reason,
            message,
        } => classify_api_error(*status, rpc_status.as_deref(), reason.as_deref())
            .unwrap_or_else(|| classify_message(message)),
        ProviderError::Decode(_) => FailureKind::MalformedResponse,
        ProviderError::Transport(_) => FailureKind::UnknownTransient,
    }
}

/// Classification from structured error fields, `None` when inconclusive.
fn classify_api_error(
    status: u16,
    rpc_status: Option<&str>,
    reason: Option<&str>,
) -> Option<FailureKind> {
    let invalid_reason = reason.is_some_and(|r| INVALID_KEY_REASONS.contains(&r));
    if invalid_reason
        || matches!(status, 401 | 403)
        || matches!(rpc_status, Some("UNAUTHENTICATED" | "PERMISSION_DENIED"))
    {
        return Some(FailureKind::CredentialInvalid);
    }
    if status == 404 || rpc_status == Some("NOT_FOUND") {
        return Some(FailureKind::ModelUnavailable);
    }
    if status == 429 || rpc_status == Some("RESOURCE_EXHAUSTED") {
        return Some(FailureKind::QuotaExceeded);
    }
    None
}

/// Fallback classification on the lower-cased error message.
pub fn classify_message(message: &str) -> FailureKind {
    let lower = message.to_lowercase();
    if INVALID_KEY_PATTERNS.iter().any(|p| lower.contains(p)) {
        return FailureKind::CredentialInvalid;
    }
    let model_missing = lower.contains("model")
        && (lower.contains("not found") || lower.contains("not supported"));
    if model_missing || lower.contains("404") {
        return FailureKind::ModelUnavailable;
    }
    if QUOTA_PATTERNS.iter().any(|p| lower.contains(p)) {
        return FailureKind::QuotaExceeded;
    }
    FailureKind::UnknownTransient
}

/// Classify a successfully decoded response body.
pub fn classify_response(
    response: GenerateContentResponse,
    expectation: Expectation,
) -> ClassifiedOutcome {
    if let Some(reason) = response
        .prompt_feedback
        .and_then(|feedback| feedback.block_reason)
    {
        return blocked(format!("prompt blocked: {reason}"), None);
    }

    let Some(candidate) = response.candidates.into_iter().next() else {
        return malformed("response contained no candidates");
    };

    let parts = candidate.content.map(|c| c.parts).unwrap_or_default();
    let text: String = parts
        .iter()
        .filter_map(|p| p.text.as_deref())
        .collect::<Vec<_>>()
        .join("");
    let text = text.trim();

    // Usable text is kept even when generation stopped early
    if expectation == Expectation::Text && !text.is_empty() {
        return ClassifiedOutcome::Success(Payload::Text(text.to_string()));
    }

    let abnormal_finish = candidate
        .finish_reason
        .as_deref()
        .filter(|finish| !NORMAL_FINISH_REASONS.contains(finish));
    if let Some(finish) = abnormal_finish {
        let category = (finish == "SAFETY")
            .then(|| {
                candidate
                    .safety_ratings
                    .iter()
                    .find(|rating| rating.blocked)
                    .map(|rating| rating.category.clone())
            })
            .flatten();
        return blocked(format!("generation stopped: {finish}"), category);
    }

    if parts.is_empty() {
        return malformed("candidate contained no content parts");
    }

    if let Some(inline) = parts.iter().find_map(|p| p.inline_data.as_ref()) {
        return match STANDARD.decode(inline.data.as_bytes()) {
            Ok(data) => ClassifiedOutcome::Success(Payload::Image {
                mime_type: inline.mime_type.clone(),
                data,
            }),
            Err(e) => malformed(format!("inline image data is not valid base64: {e}")),
        };
    }

    match expectation {
        Expectation::Text => malformed("response contained no text"),
        Expectation::Image if !text.is_empty() => blocked(
            format!(
                "model returned text instead of an image: {}",
                truncate(text, TEXT_ECHO_LIMIT)
            ),
            None,
        ),
        Expectation::Image => malformed("response contained no image"),
    }
}

fn blocked(reason: String, category: Option<String>) -> ClassifiedOutcome {
    ClassifiedOutcome::Fatal(
        Failure::new(FailureKind::ContentPolicyBlocked, reason).with_category(category),
    )
}

fn malformed(message: impl Into<String>) -> ClassifiedOutcome {
    ClassifiedOutcome::Fatal(Failure::new(FailureKind::MalformedResponse, message))
}

fn truncate(text: &str, limit: usize) -> String {
    match text.char_indices().nth(limit) {
        Some((end, _)) => format!("{}...", &text[..end]),
        None => text.to_string(),
    }
}
