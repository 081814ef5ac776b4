//! Generation request and response model
//!
//! Request types are the caller-facing shape of one generation (model, ordered
//! content parts, output config). Response types mirror the subset of the
//! Gemini `GenerateContentResponse` JSON the classifier inspects; every field
//! is optional on the wire so partial or blocked responses still decode.

use std::fmt;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde::{Deserialize, Serialize};

/// External models the gateway can route to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ModelId {
    /// Image-capable experimental flash model
    #[serde(rename = "gemini-2.0-flash-exp")]
    Gemini20FlashExp,
    /// Text-only flash model
    #[serde(rename = "gemini-2.0-flash")]
    Gemini20Flash,
    #[serde(rename = "gemini-2.5-flash-image")]
    Gemini25FlashImage,
}

impl ModelId {
    /// Model name as used in the upstream URL path.
    pub fn as_str(&self) -> &'static str {
        match self {
            ModelId::Gemini20FlashExp => "gemini-2.0-flash-exp",
            ModelId::Gemini20Flash => "gemini-2.0-flash",
            ModelId::Gemini25FlashImage => "gemini-2.5-flash-image",
        }
    }
}

impl fmt::Display for ModelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Output aspect ratios accepted by the image models.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AspectRatio {
    #[serde(rename = "1:1")]
    Square,
    #[serde(rename = "3:4")]
    Portrait3x4,
    #[serde(rename = "4:3")]
    Landscape4x3,
    #[serde(rename = "9:16")]
    Portrait9x16,
    #[serde(rename = "16:9")]
    Landscape16x9,
}

impl AspectRatio {
    pub fn as_str(&self) -> &'static str {
        match self {
            AspectRatio::Square => "1:1",
            AspectRatio::Portrait3x4 => "3:4",
            AspectRatio::Landscape4x3 => "4:3",
            AspectRatio::Portrait9x16 => "9:16",
            AspectRatio::Landscape16x9 => "16:9",
        }
    }
}

/// One ordered piece of request content.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContentPart {
    Image { mime_type: String, data: Vec<u8> },
    Text(String),
}

/// Per-call output configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GenerationConfig {
    pub aspect_ratio: Option<AspectRatio>,
    /// When set, the call only succeeds if the model returns an image.
    pub image_output: bool,
}

/// A single generation request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenerationRequest {
    pub model: ModelId,
    pub parts: Vec<ContentPart>,
    pub config: GenerationConfig,
}

impl GenerationRequest {
    /// Request that must produce an image.
    pub fn image(model: ModelId, parts: Vec<ContentPart>, aspect_ratio: Option<AspectRatio>) -> Self {
        Self {
            model,
            parts,
            config: GenerationConfig {
                aspect_ratio,
                image_output: true,
            },
        }
    }

    /// Request that produces text.
    pub fn text(model: ModelId, parts: Vec<ContentPart>) -> Self {
        Self {
            model,
            parts,
            config: GenerationConfig::default(),
        }
    }
}

/// Usable result of a successful generation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    Image { mime_type: String, data: Vec<u8> },
    Text(String),
}

impl Payload {
    /// Render an image payload as `data:<mime>;base64,<data>`.
    pub fn to_data_uri(&self) -> Option<String> {
        match self {
            Payload::Image { mime_type, data } => {
                Some(format!("data:{mime_type};base64,{}", STANDARD.encode(data)))
            }
            Payload::Text(_) => None,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateContentResponse {
    #[serde(default)]
    pub candidates: Vec<Candidate>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt_feedback: Option<PromptFeedback>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PromptFeedback {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub block_reason: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Candidate {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<CandidateContent>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finish_reason: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub safety_ratings: Vec<SafetyRating>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CandidateContent {
    #[serde(default)]
    pub parts: Vec<ResponsePart>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResponsePart {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inline_data: Option<InlineData>,
}

/// Base64-encoded inline blob as it appears on the wire.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InlineData {
    pub mime_type: String,
    pub data: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SafetyRating {
    pub category: String,
    #[serde(default)]
    pub blocked: bool,
}
