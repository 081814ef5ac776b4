//! Admin API for credential management
//!
//! Runs on a separate listener (default 127.0.0.1:9090) so API keys are never
//! submitted through the public address.
//!
//! Endpoints:
//! - `GET /admin/credentials`: pool health with per-key status and usage
//! - `PUT /admin/credentials`: replace all keys, optionally validating them first
//! - `POST /admin/credentials/reset`: return every key to active

use std::sync::Arc;

use axum::Json;
use axum::Router;
use axum::extract::State;
use axum::extract::rejection::JsonRejection;
use axum::http::StatusCode;
use axum::response::Response;
use axum::routing::{get, post};
use common::Secret;
use key_pool::classify::classify_error;
use key_pool::{FailureKind, Session};
use provider::Provider;
use serde::Deserialize;
use tracing::{info, warn};

use crate::error::{ApiError, json_response, new_request_id};

/// Shared state for admin API handlers.
#[derive(Clone)]
pub struct AdminState {
    session: Arc<Session>,
    provider: Arc<dyn Provider>,
}

impl AdminState {
    pub fn new(session: Arc<Session>, provider: Arc<dyn Provider>) -> Self {
        Self { session, provider }
    }
}

pub fn build_admin_router(state: AdminState) -> Router {
    Router::new()
        .route(
            "/admin/credentials",
            get(list_credentials).put(load_credentials),
        )
        .route("/admin/credentials/reset", post(reset_credentials))
        .with_state(state)
}

#[derive(Debug, Deserialize)]
pub struct LoadCredentials {
    keys: Vec<String>,
    /// Ask the upstream about each key and drop the ones it rejects
    #[serde(default)]
    validate: bool,
}

/// GET /admin/credentials: never exposes keys, only their fingerprints.
async fn list_credentials(State(state): State<AdminState>) -> Response {
    json_response(StatusCode::OK, &state.session.health().await)
}

/// PUT /admin/credentials: replace the pool and forget all usage.
async fn load_credentials(
    State(state): State<AdminState>,
    body: Result<Json<LoadCredentials>, JsonRejection>,
) -> Response {
    let request_id = new_request_id();
    match run_load(&state, body).await {
        Ok(body) => json_response(StatusCode::OK, &body),
        Err(err) => {
            warn!(request_id = %request_id, error = %err, "credential load failed");
            err.respond(&request_id)
        }
    }
}

async fn run_load(
    state: &AdminState,
    body: Result<Json<LoadCredentials>, JsonRejection>,
) -> Result<serde_json::Value, ApiError> {
    let Json(body) = body.map_err(|e| ApiError::InvalidRequest(e.body_text()))?;

    let submitted: Vec<Secret<String>> = body
        .keys
        .iter()
        .map(|key| key.trim())
        .filter(|key| !key.is_empty())
        .map(|key| Secret::new(key.to_owned()))
        .collect();
    if submitted.is_empty() {
        return Err(ApiError::InvalidRequest("keys must not be empty".into()));
    }

    let total = submitted.len();
    let keys = if body.validate {
        let accepted = validate_keys(state.provider.as_ref(), submitted).await;
        if accepted.is_empty() {
            return Err(ApiError::NoValidCredentials);
        }
        accepted
    } else {
        submitted
    };

    let loaded = state
        .session
        .load_credentials(keys.iter().map(|key| key.expose().as_str()))
        .await;
    info!(
        submitted = total,
        rejected = total - keys.len(),
        loaded,
        "credentials replaced"
    );

    Ok(serde_json::json!({
        "loaded": loaded,
        "rejected": total - keys.len(),
        "pool": state.session.health().await,
    }))
}

/// Keep the keys the upstream accepts.
///
/// Only a definite invalid-key answer drops a key. A key that cannot be
/// checked right now (quota, network) is kept and left to the failover path.
async fn validate_keys(provider: &dyn Provider, keys: Vec<Secret<String>>) -> Vec<Secret<String>> {
    let mut accepted = Vec::with_capacity(keys.len());
    for key in keys {
        match provider.validate_key(key.expose()).await {
            Ok(()) => accepted.push(key),
            Err(err) if classify_error(&err) == FailureKind::CredentialInvalid => {
                warn!(credential_id = %key.fingerprint(), error = %err, "credential rejected by upstream");
            }
            Err(err) => {
                warn!(
                    credential_id = %key.fingerprint(),
                    error = %err,
                    "credential could not be validated, keeping it"
                );
                accepted.push(key);
            }
        }
    }
    accepted
}

/// POST /admin/credentials/reset
async fn reset_credentials(State(state): State<AdminState>) -> Response {
    state.session.reset_all().await;
    info!("all credentials reset to active");
    json_response(StatusCode::OK, &state.session.health().await)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use key_pool::{CredentialStatus, RateLimits};
    use provider::{GenerateContentResponse, GenerationRequest, ProviderError, ProviderFuture};
    use tower::ServiceExt;

    /// Rejects keys containing "bad", cannot reach the upstream for keys
    /// containing "offline".
    struct KeyCheckProvider;

    impl Provider for KeyCheckProvider {
        fn id(&self) -> &str {
            "key-check"
        }

        fn generate<'a>(
            &'a self,
            _api_key: &'a str,
            _request: &'a GenerationRequest,
        ) -> ProviderFuture<'a, GenerateContentResponse> {
            Box::pin(async { Err(ProviderError::Transport("not used".into())) })
        }

        fn validate_key<'a>(&'a self, api_key: &'a str) -> ProviderFuture<'a, ()> {
            Box::pin(async move {
                if api_key.contains("bad") {
                    Err(ProviderError::Api {
                        status: 400,
                        rpc_status: Some("INVALID_ARGUMENT".into()),
                        reason: Some("API_KEY_INVALID".into()),
                        message: "API key not valid. Please pass a valid API key.".into(),
                    })
                } else if api_key.contains("offline") {
                    Err(ProviderError::Transport("connection refused".into()))
                } else {
                    Ok(())
                }
            })
        }
    }

    fn test_state() -> AdminState {
        AdminState::new(
            Arc::new(Session::new(RateLimits::default())),
            Arc::new(KeyCheckProvider),
        )
    }

    async fn send(app: Router, method: &str, uri: &str, body: Option<&str>) -> (StatusCode, serde_json::Value) {
        let request = Request::builder()
            .method(method)
            .uri(uri)
            .header("content-type", "application/json")
            .body(body.map_or_else(Body::empty, |b| Body::from(b.to_owned())))
            .unwrap();
        let response = app.oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), 1024 * 1024)
            .await
            .unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[tokio::test]
    async fn load_replaces_pool_and_reports_health() {
        let state = test_state();
        let app = build_admin_router(state.clone());

        let (status, json) = send(
            app,
            "PUT",
            "/admin/credentials",
            Some(r#"{"keys":["AIza-one","  ","AIza-two","AIza-one"]}"#),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["loaded"], 2, "blank and duplicate keys are dropped");
        assert_eq!(json["pool"]["credentials_total"], 2);
        assert_eq!(state.session.usable_count().await, 2);

        let raw = json.to_string();
        assert!(!raw.contains("AIza-one"), "keys must never be echoed");
    }

    #[tokio::test]
    async fn validation_drops_rejected_keys_and_keeps_unreachable_ones() {
        let state = test_state();
        let app = build_admin_router(state.clone());

        let (status, json) = send(
            app,
            "PUT",
            "/admin/credentials",
            Some(r#"{"keys":["AIza-good","AIza-bad","AIza-offline"],"validate":true}"#),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["loaded"], 2);
        assert_eq!(json["rejected"], 1);
        let bad_id = Secret::new("AIza-bad".to_string()).fingerprint();
        assert_eq!(state.session.status(&bad_id).await, None);
    }

    #[tokio::test]
    async fn validation_with_no_survivors_fails_and_keeps_old_pool() {
        let state = test_state();
        state.session.load_credentials(["AIza-existing"]).await;
        let app = build_admin_router(state.clone());

        let (status, json) = send(
            app,
            "PUT",
            "/admin/credentials",
            Some(r#"{"keys":["AIza-bad-1","AIza-bad-2"],"validate":true}"#),
        )
        .await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(json["error"]["type"], "no_valid_credentials");
        assert!(json["error"]["request_id"].as_str().unwrap().starts_with("req_"));
        assert_eq!(state.session.usable_count().await, 1);
    }

    #[tokio::test]
    async fn empty_key_list_is_rejected() {
        let (status, json) = send(
            build_admin_router(test_state()),
            "PUT",
            "/admin/credentials",
            Some(r#"{"keys":[" "]}"#),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(json["error"]["type"], "invalid_request");
    }

    #[tokio::test]
    async fn malformed_body_is_invalid_request() {
        let (status, json) = send(
            build_admin_router(test_state()),
            "PUT",
            "/admin/credentials",
            Some(r#"{"keys":"AIza-one"}"#),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(json["error"]["type"], "invalid_request");
    }

    #[tokio::test]
    async fn list_shows_fingerprints_and_statuses() {
        let state = test_state();
        state.session.load_credentials(["AIza-one"]).await;

        let (status, json) = send(
            build_admin_router(state),
            "GET",
            "/admin/credentials",
            None,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["status"], "healthy");
        let id = Secret::new("AIza-one".to_string()).fingerprint();
        assert_eq!(json["credentials"][0]["id"], id);
        assert_eq!(json["credentials"][0]["status"], "active");
    }

    #[tokio::test]
    async fn reset_reactivates_invalid_credentials() {
        let state = test_state();
        state.session.load_credentials(["AIza-one"]).await;
        let id = Secret::new("AIza-one".to_string()).fingerprint();
        state.session.mark_invalid(&id).await;

        let (status, _) = send(
            build_admin_router(state.clone()),
            "POST",
            "/admin/credentials/reset",
            None,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(
            state.session.status(&id).await,
            Some(CredentialStatus::Active)
        );
    }
}
