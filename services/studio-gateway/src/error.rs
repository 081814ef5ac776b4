//! Per-request error types and their JSON rendering

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use key_pool::GenerationError;
use thiserror::Error;

/// Errors that end an HTTP request.
///
/// Startup failures go through `anyhow` in `main`; everything here becomes a
/// `{"error":{"type","message","request_id"}}` response.
#[derive(Error, Debug)]
pub enum ApiError {
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("batch has {got} tasks, at most {max} are allowed")]
    BatchTooLarge { got: usize, max: usize },

    #[error("none of the submitted credentials passed validation")]
    NoValidCredentials,

    #[error(transparent)]
    Generation(#[from] GenerationError),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::InvalidRequest(_) | Self::NoValidCredentials => StatusCode::BAD_REQUEST,
            Self::BatchTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            Self::Generation(err) => match err {
                GenerationError::NoCredentials => StatusCode::SERVICE_UNAVAILABLE,
                GenerationError::AllCredentialsInvalid => StatusCode::BAD_GATEWAY,
                GenerationError::AllCredentialsRateLimited => StatusCode::TOO_MANY_REQUESTS,
                GenerationError::ModelUnavailable { .. } => StatusCode::NOT_FOUND,
                GenerationError::ContentBlocked { .. } => StatusCode::UNPROCESSABLE_ENTITY,
                GenerationError::Failed { .. } => StatusCode::BAD_GATEWAY,
            },
        }
    }

    pub fn error_type(&self) -> &'static str {
        match self {
            Self::InvalidRequest(_) => "invalid_request",
            Self::BatchTooLarge { .. } => "batch_too_large",
            Self::NoValidCredentials => "no_valid_credentials",
            Self::Generation(err) => err.error_type(),
        }
    }

    fn message(&self) -> String {
        match self {
            Self::Generation(err) => err.user_message(),
            other => other.to_string(),
        }
    }

    pub fn respond(self, request_id: &str) -> Response {
        let mut body = serde_json::json!({
            "error": {
                "type": self.error_type(),
                "message": self.message(),
                "request_id": request_id,
            }
        });
        if let Self::Generation(GenerationError::ContentBlocked {
            category: Some(category),
            ..
        }) = &self
        {
            body["error"]["category"] = serde_json::json!(category);
        }
        json_response(self.status(), &body)
    }
}

/// Fresh request id: `req_` followed by a simple-format UUID.
pub fn new_request_id() -> String {
    format!("req_{}", uuid::Uuid::new_v4().as_simple())
}

pub fn json_response(status: StatusCode, body: &serde_json::Value) -> Response {
    (
        status,
        [(axum::http::header::CONTENT_TYPE, "application/json")],
        body.to_string(),
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use key_pool::FailureKind;

    async fn body_json(response: Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(response.into_body(), 1024 * 1024)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[test]
    fn generation_errors_map_to_statuses() {
        let cases = [
            (GenerationError::NoCredentials, StatusCode::SERVICE_UNAVAILABLE),
            (GenerationError::AllCredentialsInvalid, StatusCode::BAD_GATEWAY),
            (
                GenerationError::AllCredentialsRateLimited,
                StatusCode::TOO_MANY_REQUESTS,
            ),
            (
                GenerationError::ModelUnavailable {
                    message: "not found".into(),
                },
                StatusCode::NOT_FOUND,
            ),
            (
                GenerationError::ContentBlocked {
                    reason: "SAFETY".into(),
                    category: None,
                },
                StatusCode::UNPROCESSABLE_ENTITY,
            ),
            (
                GenerationError::Failed {
                    kind: FailureKind::MalformedResponse,
                    message: "no image".into(),
                },
                StatusCode::BAD_GATEWAY,
            ),
        ];
        for (err, status) in cases {
            assert_eq!(ApiError::from(err.clone()).status(), status, "{err:?}");
        }
    }

    #[tokio::test]
    async fn response_body_carries_type_message_and_request_id() {
        let response = ApiError::Generation(GenerationError::AllCredentialsRateLimited)
            .respond("req_abc");
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(
            response.headers()[axum::http::header::CONTENT_TYPE],
            "application/json"
        );

        let json = body_json(response).await;
        assert_eq!(json["error"]["type"], "all_credentials_rate_limited");
        assert_eq!(json["error"]["request_id"], "req_abc");
        assert_eq!(
            json["error"]["message"],
            GenerationError::AllCredentialsRateLimited.user_message()
        );
    }

    #[tokio::test]
    async fn content_block_includes_category() {
        let response = ApiError::Generation(GenerationError::ContentBlocked {
            reason: "SAFETY".into(),
            category: Some("HARM_CATEGORY_DANGEROUS_CONTENT".into()),
        })
        .respond("req_1");

        let json = body_json(response).await;
        assert_eq!(json["error"]["type"], "content_blocked");
        assert_eq!(json["error"]["category"], "HARM_CATEGORY_DANGEROUS_CONTENT");
    }

    #[tokio::test]
    async fn request_errors_use_display_message() {
        let response = ApiError::BatchTooLarge { got: 9, max: 4 }.respond("req_2");
        assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
        let json = body_json(response).await;
        assert_eq!(json["error"]["type"], "batch_too_large");
        assert_eq!(json["error"]["message"], "batch has 9 tasks, at most 4 are allowed");
        assert!(json["error"].get("category").is_none());
    }

    #[test]
    fn request_ids_are_prefixed_and_unique() {
        let a = new_request_id();
        let b = new_request_id();
        assert!(a.starts_with("req_"));
        assert_eq!(a.len(), 4 + 32);
        assert_ne!(a, b);
    }
}
