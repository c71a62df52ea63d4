//! Candidate image validation
//!
//! [`ImageValidator`] judges whether an image depicts a product.
//! [`GeminiImageValidator`] downloads the image and asks a Gemini vision model
//! for a JSON verdict.

use async_trait::async_trait;
use base64::Engine;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::num::NonZeroU32;
use std::time::Duration;
use thiserror::Error;

const GEMINI_URL: &str =
    "https://generativelanguage.googleapis.com/v1beta/models/gemini-1.5-flash:generateContent";
const USER_AGENT: &str = concat!("flyer-resolver/", env!("CARGO_PKG_VERSION"));
const REQUESTS_PER_SECOND: u32 = 2;
/// Larger images are rejected while downloading
const MAX_IMAGE_BYTES: usize = 15 * 1024 * 1024;
const UNPARSEABLE_REPLY: &str = "Failed to parse AI response";

#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("Image download failed: {0}")]
    ImageFetch(String),

    #[error("Network error: {0}")]
    NetworkError(String),

    #[error("Validation API error {0}: {1}")]
    ApiError(u16, String),

    #[error("Validator credentials not configured")]
    MissingCredentials,
}

/// Validator judgement for one candidate
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationVerdict {
    pub is_valid: bool,
    /// Always within `[0, 1]`
    pub confidence: f64,
    pub notes: String,
    pub suggested_categories: Vec<String>,
}

impl ValidationVerdict {
    pub fn new(is_valid: bool, confidence: f64, notes: impl Into<String>) -> Self {
        Self {
            is_valid,
            confidence: clamp_confidence(confidence),
            notes: notes.into(),
            suggested_categories: Vec::new(),
        }
    }

    fn rejected(notes: impl Into<String>) -> Self {
        Self::new(false, 0.0, notes)
    }
}

fn clamp_confidence(confidence: f64) -> f64 {
    if confidence.is_nan() {
        0.0
    } else {
        confidence.clamp(0.0, 1.0)
    }
}

#[async_trait]
pub trait ImageValidator: Send + Sync {
    fn name(&self) -> &'static str;

    async fn validate(
        &self,
        image_url: &str,
        product_name: &str,
        description: Option<&str>,
    ) -> Result<ValidationVerdict, ValidationError>;
}

/// Verdict as the model writes it
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ModelVerdict {
    #[serde(default)]
    is_valid: bool,
    #[serde(default)]
    confidence: f64,
    #[serde(default)]
    notes: String,
    #[serde(default)]
    suggested_categories: Vec<String>,
}

/// Turn free model text into a verdict
///
/// The JSON object spans the first `{` to the last `}`. No object yields a
/// generic rejection; an object that fails to parse yields a rejection
/// carrying the raw reply as notes.
fn parse_model_reply(text: &str) -> ValidationVerdict {
    let object = match (text.find('{'), text.rfind('}')) {
        (Some(start), Some(end)) if start < end => &text[start..=end],
        _ => return ValidationVerdict::rejected(UNPARSEABLE_REPLY),
    };

    match serde_json::from_str::<ModelVerdict>(object) {
        Ok(verdict) => ValidationVerdict {
            is_valid: verdict.is_valid,
            confidence: clamp_confidence(verdict.confidence),
            notes: verdict.notes,
            suggested_categories: verdict.suggested_categories,
        },
        Err(_) => ValidationVerdict::rejected(text),
    }
}

fn build_prompt(product_name: &str, description: Option<&str>) -> String {
    let described = description
        .map(|d| format!(" with the description \"{}\"", d))
        .unwrap_or_default();

    format!(
        "Analyze this image and decide whether it shows the product \"{}\"{}.\n\n\
         Answer in JSON with these fields:\n\
         - \"isValid\": boolean, true if the image shows the product\n\
         - \"confidence\": number from 0 to 1\n\
         - \"notes\": string with remarks about the decision\n\
         - \"suggestedCategories\": array of category strings for the image",
        product_name, described
    )
}

#[derive(Debug, Deserialize)]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<GenerateCandidate>,
}

#[derive(Debug, Deserialize)]
struct GenerateCandidate {
    content: Option<GenerateContent>,
}

#[derive(Debug, Deserialize)]
struct GenerateContent {
    #[serde(default)]
    parts: Vec<GeneratePart>,
}

#[derive(Debug, Deserialize)]
struct GeneratePart {
    text: Option<String>,
}

impl GenerateContentResponse {
    fn first_text(&self) -> &str {
        self.candidates
            .first()
            .and_then(|c| c.content.as_ref())
            .and_then(|c| c.parts.first())
            .and_then(|p| p.text.as_deref())
            .unwrap_or("{}")
    }
}

pub struct GeminiImageValidator {
    http_client: reqwest::Client,
    rate_limiter: governor::RateLimiter<
        governor::state::NotKeyed,
        governor::state::InMemoryState,
        governor::clock::DefaultClock,
    >,
    api_key: String,
}

impl GeminiImageValidator {
    pub fn new(api_key: String) -> Result<Self, ValidationError> {
        if api_key.trim().is_empty() {
            return Err(ValidationError::MissingCredentials);
        }

        let http_client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(Duration::from_secs(60))
            .build()
            .map_err(|e| ValidationError::NetworkError(e.to_string()))?;

        let quota = governor::Quota::per_second(
            NonZeroU32::new(REQUESTS_PER_SECOND).unwrap_or(NonZeroU32::MIN),
        );

        Ok(Self {
            http_client,
            rate_limiter: governor::RateLimiter::direct(quota),
            api_key,
        })
    }

    async fn fetch_image(&self, image_url: &str) -> Result<(String, Vec<u8>), ValidationError> {
        let mut response = self
            .http_client
            .get(image_url)
            .send()
            .await
            .map_err(|e| ValidationError::ImageFetch(e.to_string()))?;

        if !response.status().is_success() {
            return Err(ValidationError::ImageFetch(format!("HTTP {}", response.status())));
        }

        let mime_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|v| v.split(';').next().unwrap_or(v).trim().to_string())
            .unwrap_or_else(|| "image/jpeg".to_string());

        let mut body = BoundedBody::new(response.content_length(), MAX_IMAGE_BYTES)?;
        while let Some(chunk) = response
            .chunk()
            .await
            .map_err(|e| ValidationError::ImageFetch(e.to_string()))?
        {
            body.push(&chunk)?;
        }

        Ok((mime_type, body.into_bytes()))
    }
}

#[async_trait]
impl ImageValidator for GeminiImageValidator {
    fn name(&self) -> &'static str {
        "gemini"
    }

    async fn validate(
        &self,
        image_url: &str,
        product_name: &str,
        description: Option<&str>,
    ) -> Result<ValidationVerdict, ValidationError> {
        let (mime_type, image) = self.fetch_image(image_url).await?;
        let encoded = base64::engine::general_purpose::STANDARD.encode(&image);

        let body = json!({
            "contents": [{
                "parts": [
                    { "text": build_prompt(product_name, description) },
                    { "inline_data": { "mime_type": mime_type, "data": encoded } }
                ]
            }]
        });

        self.rate_limiter.until_ready().await;

        let response = self
            .http_client
            .post(GEMINI_URL)
            .query(&[("key", self.api_key.as_str())])
            .json(&body)
            .send()
            .await
            .map_err(|e| ValidationError::NetworkError(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(ValidationError::ApiError(status.as_u16(), error_text));
        }

        // An unreadable envelope is treated like an unreadable reply: rejection, not error
        let text = response
            .text()
            .await
            .map_err(|e| ValidationError::NetworkError(e.to_string()))?;
        let verdict = match serde_json::from_str::<GenerateContentResponse>(&text) {
            Ok(envelope) => parse_model_reply(envelope.first_text()),
            Err(_) => ValidationVerdict::rejected(text),
        };

        tracing::debug!(
            image_url = %image_url,
            is_valid = verdict.is_valid,
            confidence = verdict.confidence,
            "Image validated"
        );

        Ok(verdict)
    }
}

/// Download buffer that refuses bodies larger than `limit`
///
/// A declared `Content-Length` over the limit is refused before any byte is
/// read; otherwise the body is refused as soon as the received bytes pass it.
#[derive(Debug)]
struct BoundedBody {
    bytes: Vec<u8>,
    limit: usize,
}

impl BoundedBody {
    fn new(declared_length: Option<u64>, limit: usize) -> Result<Self, ValidationError> {
        let capacity = match declared_length {
            Some(len) if len > limit as u64 => return Err(too_large(len, limit)),
            Some(len) => len as usize,
            None => 0,
        };
        Ok(Self {
            bytes: Vec::with_capacity(capacity),
            limit,
        })
    }

    fn push(&mut self, chunk: &[u8]) -> Result<(), ValidationError> {
        let received = self.bytes.len() + chunk.len();
        if received > self.limit {
            return Err(too_large(received as u64, self.limit));
        }
        self.bytes.extend_from_slice(chunk);
        Ok(())
    }

    fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }
}

fn too_large(len: u64, limit: usize) -> ValidationError {
    ValidationError::ImageFetch(format!("image is at least {} bytes, limit is {}", len, limit))
}
