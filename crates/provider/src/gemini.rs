//! Gemini REST provider: one `generateContent` call per invocation.
//!
//! The API key travels in the `x-goog-api-key` header, never in the URL, so it
//! cannot leak into access logs. Non-2xx responses are parsed from Google's
//! JSON error envelope into a typed `ProviderError::Api`.

use std::time::Duration;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use reqwest::header::CONTENT_TYPE;
use serde::Deserialize;
use tracing::debug;

use crate::types::{ContentPart, GenerateContentResponse, GenerationRequest};
use crate::{Provider, ProviderError, ProviderFuture};

/// Public Gemini API host.
pub const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com";

/// Header carrying the API key.
const API_KEY_HEADER: &str = "x-goog-api-key";

/// `@type` of the detail entry that carries a machine-readable reason.
const ERROR_INFO_TYPE: &str = "type.googleapis.com/google.rpc.ErrorInfo";

/// Gemini `generateContent` client.
pub struct GeminiProvider {
    client: reqwest::Client,
    base_url: String,
    timeout: Duration,
}

impl GeminiProvider {
    pub fn new(client: reqwest::Client, base_url: impl Into<String>, timeout: Duration) -> Self {
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            timeout,
        }
    }

    fn generate_url(&self, request: &GenerationRequest) -> String {
        format!(
            "{}/v1beta/models/{}:generateContent",
            self.base_url,
            request.model.as_str()
        )
    }

    fn models_url(&self) -> String {
        format!("{}/v1beta/models", self.base_url)
    }

    async fn send(
        &self,
        builder: reqwest::RequestBuilder,
    ) -> crate::Result<(u16, Vec<u8>)> {
        let response = builder
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| ProviderError::Transport(e.to_string()))?;
        let status = response.status().as_u16();
        let bytes = response
            .bytes()
            .await
            .map_err(|e| ProviderError::Transport(format!("reading response body: {e}")))?;
        Ok((status, bytes.to_vec()))
    }
}

impl Provider for GeminiProvider {
    fn id(&self) -> &str {
        "gemini"
    }

    fn generate<'a>(
        &'a self,
        api_key: &'a str,
        request: &'a GenerationRequest,
    ) -> ProviderFuture<'a, GenerateContentResponse> {
        Box::pin(async move {
            let body = serde_json::to_vec(&build_request_body(request))
                .map_err(|e| ProviderError::Transport(format!("encoding request body: {e}")))?;
            let url = self.generate_url(request);
            debug!(model = %request.model, parts = request.parts.len(), "calling generateContent");

            let builder = self
                .client
                .post(&url)
                .header(API_KEY_HEADER, api_key)
                .header(CONTENT_TYPE, "application/json")
                .body(body);
            let (status, bytes) = self.send(builder).await?;

            if !(200..300).contains(&status) {
                return Err(parse_error_body(status, &bytes));
            }
            serde_json::from_slice(&bytes).map_err(|e| ProviderError::Decode(e.to_string()))
        })
    }

    fn validate_key<'a>(&'a self, api_key: &'a str) -> ProviderFuture<'a, ()> {
        Box::pin(async move {
            let builder = self
                .client
                .get(self.models_url())
                .header(API_KEY_HEADER, api_key);
            let (status, bytes) = self.send(builder).await?;
            if (200..300).contains(&status) {
                Ok(())
            } else {
                Err(parse_error_body(status, &bytes))
            }
        })
    }
}

/// Build the `generateContent` JSON body.
///
/// Image parts are base64-encoded as `inlineData`. Image output requests both
/// IMAGE and TEXT modalities, since the image models reject IMAGE alone.
pub fn build_request_body(request: &GenerationRequest) -> serde_json::Value {
    let parts: Vec<serde_json::Value> = request
        .parts
        .iter()
        .map(|part| match part {
            ContentPart::Image { mime_type, data } => serde_json::json!({
                "inlineData": {
                    "mimeType": mime_type,
                    "data": STANDARD.encode(data),
                }
            }),
            ContentPart::Text(text) => serde_json::json!({ "text": text }),
        })
        .collect();

    let mut body = serde_json::json!({
        "contents": [{ "parts": parts }]
    });

    if request.config.image_output {
        let mut generation_config = serde_json::json!({
            "responseModalities": ["IMAGE", "TEXT"]
        });
        if let Some(ratio) = request.config.aspect_ratio {
            generation_config["imageConfig"] = serde_json::json!({ "aspectRatio": ratio.as_str() });
        }
        body["generationConfig"] = generation_config;
    }

    body
}

/// Parse Google's JSON error envelope into a typed API error.
///
/// Falls back to the raw body text (or a status-only message) when the body
/// is not the expected envelope.
pub fn parse_error_body(status: u16, body: &[u8]) -> ProviderError {
    #[derive(Deserialize)]
    struct Envelope {
        error: ErrorBody,
    }

    #[derive(Deserialize)]
    struct ErrorBody {
        #[serde(default)]
        message: String,
        #[serde(default)]
        status: Option<String>,
        #[serde(default)]
        details: Vec<ErrorDetail>,
    }

    #[derive(Deserialize)]
    struct ErrorDetail {
        #[serde(rename = "@type", default)]
        ty: String,
        #[serde(default)]
        reason: Option<String>,
    }

    match serde_json::from_slice::<Envelope>(body) {
        Ok(envelope) => {
            let reason = envelope
                .error
                .details
                .into_iter()
                .filter(|d| d.ty == ERROR_INFO_TYPE)
                .find_map(|d| d.reason.filter(|r| !r.is_empty()));
            let message = if envelope.error.message.is_empty() {
                format!("HTTP {status}")
            } else {
                envelope.error.message
            };
            ProviderError::Api {
                status,
                rpc_status: envelope.error.status.filter(|s| !s.is_empty()),
                reason,
                message,
            }
        }
        Err(_) => {
            let text = String::from_utf8_lossy(body).trim().to_string();
            ProviderError::Api {
                status,
                rpc_status: None,
                reason: None,
                message: if text.is_empty() {
                    format!("HTTP {status}")
                } else {
                    text
                },
            }
        }
    }
}
