//! Generation endpoints
//!
//! `POST /v1/generate` runs one generation through the failover executor.
//! `POST /v1/batches` runs several generations for one model through the
//! paced scheduler. Both wait on the dispatch gate so concurrent HTTP
//! requests queue instead of interleaving upstream calls.

use std::time::Instant;

use axum::Json;
use axum::extract::State;
use axum::extract::rejection::JsonRejection;
use axum::http::StatusCode;
use axum::response::Response;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use provider::{AspectRatio, ContentPart, GenerationRequest, ModelId, Payload};
use serde::Deserialize;
use tracing::{info, warn};

use crate::AppState;
use crate::error::{ApiError, json_response, new_request_id};
use crate::metrics;

/// One content part as submitted over HTTP.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PartBody {
    Text {
        text: String,
    },
    /// `data` is base64, optionally wrapped in a `data:<mime>;base64,` URI
    Image {
        mime_type: String,
        data: String,
    },
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputKind {
    #[default]
    Image,
    Text,
}

#[derive(Debug, Deserialize)]
pub struct GenerateBody {
    pub model: ModelId,
    pub parts: Vec<PartBody>,
    #[serde(default)]
    pub output: OutputKind,
    #[serde(default)]
    pub aspect_ratio: Option<AspectRatio>,
}

#[derive(Debug, Deserialize)]
pub struct BatchBody {
    pub model: ModelId,
    pub tasks: Vec<BatchTask>,
    #[serde(default)]
    pub output: OutputKind,
    #[serde(default)]
    pub aspect_ratio: Option<AspectRatio>,
}

#[derive(Debug, Deserialize)]
pub struct BatchTask {
    pub parts: Vec<PartBody>,
}

fn strip_data_uri(data: &str) -> &str {
    match data.strip_prefix("data:") {
        Some(rest) => rest.split_once(";base64,").map_or(data, |(_, encoded)| encoded),
        None => data,
    }
}

fn decode_parts(parts: Vec<PartBody>) -> Result<Vec<ContentPart>, ApiError> {
    if parts.is_empty() {
        return Err(ApiError::InvalidRequest("parts must not be empty".into()));
    }
    parts
        .into_iter()
        .enumerate()
        .map(|(index, part)| match part {
            PartBody::Text { text } => Ok(ContentPart::Text(text)),
            PartBody::Image { mime_type, data } => STANDARD
                .decode(strip_data_uri(data.trim()))
                .map(|data| ContentPart::Image { mime_type, data })
                .map_err(|e| {
                    ApiError::InvalidRequest(format!("part {index}: image data is not base64: {e}"))
                }),
        })
        .collect()
}

fn build_request(
    model: ModelId,
    output: OutputKind,
    aspect_ratio: Option<AspectRatio>,
    parts: Vec<ContentPart>,
) -> GenerationRequest {
    match output {
        OutputKind::Image => GenerationRequest::image(model, parts, aspect_ratio),
        OutputKind::Text => GenerationRequest::text(model, parts),
    }
}

fn render(payload: &Payload) -> serde_json::Value {
    match payload {
        Payload::Image { mime_type, .. } => serde_json::json!({
            "type": "image",
            "mime_type": mime_type,
            "data_uri": payload.to_data_uri(),
        }),
        Payload::Text(text) => serde_json::json!({
            "type": "text",
            "text": text,
        }),
    }
}

/// Finish a request: log failures, render the response, count it.
fn finish(
    route: &'static str,
    request_id: &str,
    started: Instant,
    result: Result<serde_json::Value, ApiError>,
) -> Response {
    let response = match result {
        Ok(mut body) => {
            body["request_id"] = serde_json::json!(request_id);
            json_response(StatusCode::OK, &body)
        }
        Err(err) => {
            warn!(request_id, route, error_type = err.error_type(), error = %err, "request failed");
            err.respond(request_id)
        }
    };
    metrics::record_request(
        route,
        response.status().as_u16(),
        started.elapsed().as_secs_f64(),
    );
    response
}

pub async fn generate(
    State(state): State<AppState>,
    body: Result<Json<GenerateBody>, JsonRejection>,
) -> Response {
    let request_id = new_request_id();
    let started = Instant::now();
    let result = run_generate(&state, &request_id, body).await;
    finish("generate", &request_id, started, result)
}

async fn run_generate(
    state: &AppState,
    request_id: &str,
    body: Result<Json<GenerateBody>, JsonRejection>,
) -> Result<serde_json::Value, ApiError> {
    let Json(body) = body.map_err(|e| ApiError::InvalidRequest(e.body_text()))?;
    let request = build_request(
        body.model,
        body.output,
        body.aspect_ratio,
        decode_parts(body.parts)?,
    );

    let _gate = state.dispatch.lock().await;
    info!(request_id, model = %request.model, parts = request.parts.len(), "generation started");
    let payload = state.executor.generate(&request).await?;

    Ok(serde_json::json!({ "result": render(&payload) }))
}

pub async fn batch(
    State(state): State<AppState>,
    body: Result<Json<BatchBody>, JsonRejection>,
) -> Response {
    let request_id = new_request_id();
    let started = Instant::now();
    let result = run_batch(&state, &request_id, body).await;
    finish("batches", &request_id, started, result)
}

async fn run_batch(
    state: &AppState,
    request_id: &str,
    body: Result<Json<BatchBody>, JsonRejection>,
) -> Result<serde_json::Value, ApiError> {
    let Json(BatchBody {
        model,
        tasks,
        output,
        aspect_ratio,
    }) = body.map_err(|e| ApiError::InvalidRequest(e.body_text()))?;

    if tasks.is_empty() {
        return Err(ApiError::InvalidRequest("tasks must not be empty".into()));
    }
    if tasks.len() > state.max_batch_tasks {
        return Err(ApiError::BatchTooLarge {
            got: tasks.len(),
            max: state.max_batch_tasks,
        });
    }

    let requests = tasks
        .into_iter()
        .map(|task| {
            decode_parts(task.parts).map(|parts| build_request(model, output, aspect_ratio, parts))
        })
        .collect::<Result<Vec<_>, _>>()?;

    let _gate = state.dispatch.lock().await;
    info!(request_id, %model, tasks = requests.len(), "batch started");
    let scheduled = requests
        .iter()
        .map(|request| state.executor.task(request))
        .collect();
    let payloads = state.scheduler.run(model, scheduled).await?;

    metrics::record_batch_results(payloads.len(), requests.len() - payloads.len());

    Ok(serde_json::json!({
        "requested": requests.len(),
        "succeeded": payloads.len(),
        "results": payloads.iter().map(render).collect::<Vec<_>>(),
    }))
}
