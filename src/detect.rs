use std::io::Cursor;
use std::time::Duration;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use serde::{Deserialize, Serialize};

use crate::config::AppConfig;
use crate::models::DiseaseAnalysisResult;
use crate::parse;

// ── Constants ────────────────────────────────────────────────────────────────

pub const MAX_IMAGE_BYTES: usize = 10 * 1024 * 1024;

const JPEG_QUALITY: u8 = 85;
const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);
const USER_AGENT: &str = "leaf-disease-api/1.0";

const ANALYSIS_PROMPT: &str = r#"IMPORTANT: First determine if this image contains a plant leaf or vegetation. If the image shows humans, animals, objects, buildings, or anything other than plant leaves/vegetation, return the "invalid_image" response format below.

If this is a valid leaf/plant image, analyze it for diseases and return the results in JSON format.

Please identify:
1. Whether this is actually a leaf/plant image
2. Disease name (if any)
3. Disease type/category or invalid_image
4. Severity level (mild, moderate, severe)
5. Confidence score (0-100%)
6. Symptoms observed
7. Possible causes
8. Treatment recommendations

For NON-LEAF images (humans, animals, objects, or not detected as leaves, etc.), return this format:
{
    "disease_detected": false,
    "disease_name": null,
    "disease_type": "invalid_image",
    "severity": "none",
    "confidence": 95,
    "symptoms": ["This image does not contain a plant leaf"],
    "possible_causes": ["Invalid image type uploaded"],
    "treatment": ["Please upload an image of a plant leaf for disease analysis"]
}

For VALID LEAF images, return this format:
{
    "disease_detected": true/false,
    "disease_name": "name of disease or null",
    "disease_type": "fungal/bacterial/viral/pest/nutrient deficiency/healthy",
    "severity": "mild/moderate/severe/none",
    "confidence": 85,
    "symptoms": ["list", "of", "symptoms"],
    "possible_causes": ["list", "of", "causes"],
    "treatment": ["list", "of", "treatments"]
}"#;

// ── Error type ───────────────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum DetectionError {
    #[error("no image data provided")]
    EmptyImage,
    #[error("image exceeds the 10 MB upload limit")]
    ImageTooLarge,
    #[error("could not decode image: {0}")]
    InvalidImage(String),
    #[error("invalid base64 image data: {0}")]
    InvalidBase64(#[from] base64::DecodeError),
    #[error("model API returned {status}: {body}")]
    Upstream { status: u16, body: String },
    #[error("model API request failed: {0}")]
    Request(String),
    #[error("model reply contained no content")]
    EmptyReply,
    #[error("unable to parse model reply as JSON: {0}...")]
    UnparseableReply(String),
}

// ── OpenAI-compatible chat types ─────────────────────────────────────────────

#[derive(Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
    temperature: f32,
    max_completion_tokens: u32,
    top_p: f32,
    stream: bool,
}

#[derive(Serialize)]
struct ChatMessage {
    role: String,
    content: serde_json::Value,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatResponseMessage,
}

#[derive(Deserialize)]
struct ChatResponseMessage {
    content: Option<String>,
}

// ── Detector ─────────────────────────────────────────────────────────────────

/// One-shot client for the hosted vision model. Holds the pooled HTTP client
/// and the chat-completions endpoint derived from config.
pub struct Detector {
    client: reqwest::Client,
    config: AppConfig,
}

impl Detector {
    pub fn new(config: AppConfig) -> Result<Self, DetectionError> {
        let client = reqwest::ClientBuilder::new()
            .connect_timeout(CONNECT_TIMEOUT)
            .timeout(REQUEST_TIMEOUT)
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| DetectionError::Request(e.to_string()))?;
        tracing::info!(
            "detector configured: api_base={}, model={}",
            config.api_base,
            config.model_name
        );
        Ok(Detector { client, config })
    }

    /// Analyze raw uploaded image bytes (the multipart path).
    pub async fn analyze_bytes(
        &self,
        bytes: &[u8],
        temperature: Option<f32>,
        max_tokens: Option<u32>,
    ) -> Result<DiseaseAnalysisResult, DetectionError> {
        let data_url = image_bytes_to_data_url(bytes)?;
        self.call_model(&data_url, temperature, max_tokens).await
    }

    /// Analyze a base64-encoded image, with or without a `data:` URL prefix
    /// (the JSON path). The payload is decoded and re-validated rather than
    /// forwarded blind, so undecodable uploads fail before the API call.
    pub async fn analyze_base64(
        &self,
        base64_image: &str,
        temperature: Option<f32>,
        max_tokens: Option<u32>,
    ) -> Result<DiseaseAnalysisResult, DetectionError> {
        let stripped = strip_data_url_prefix(base64_image);
        if stripped.is_empty() {
            return Err(DetectionError::EmptyImage);
        }
        let bytes = BASE64.decode(stripped.trim())?;
        self.analyze_bytes(&bytes, temperature, max_tokens).await
    }

    async fn call_model(
        &self,
        data_url: &str,
        temperature: Option<f32>,
        max_tokens: Option<u32>,
    ) -> Result<DiseaseAnalysisResult, DetectionError> {
        tracing::info!("starting analysis for uploaded image");

        let request = ChatRequest {
            model: self.config.model_name.clone(),
            messages: vec![ChatMessage {
                role: "user".to_string(),
                content: serde_json::json!([
                    {"type": "text", "text": ANALYSIS_PROMPT},
                    {"type": "image_url", "image_url": {"url": data_url}}
                ]),
            }],
            temperature: temperature.unwrap_or(self.config.temperature),
            max_completion_tokens: max_tokens.unwrap_or(self.config.max_completion_tokens),
            top_p: 1.0,
            stream: false,
        };

        let response = self
            .client
            .post(format!("{}/chat/completions", self.config.api_base))
            .bearer_auth(&self.config.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    DetectionError::Request(format!("timeout: {}", e))
                } else if e.is_connect() {
                    DetectionError::Request(format!("connect error: {}", e))
                } else {
                    DetectionError::Request(e.to_string())
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::error!("model API returned {}: {}", status, body);
            return Err(DetectionError::Upstream {
                status: status.as_u16(),
                body,
            });
        }

        let chat: ChatResponse = response
            .json()
            .await
            .map_err(|e| DetectionError::Request(e.to_string()))?;
        tracing::info!("API request completed successfully");

        let content = chat
            .choices
            .first()
            .and_then(|c| c.message.content.as_deref())
            .filter(|c| !c.trim().is_empty())
            .ok_or(DetectionError::EmptyReply)?;

        parse::parse_response(content)
    }
}

// ── Image intake helpers ─────────────────────────────────────────────────────

/// Decode, validate, and re-encode an upload as a JPEG data URL. Re-encoding
/// normalizes the eight accepted input formats to the single mime type the
/// prompt message declares.
fn image_bytes_to_data_url(bytes: &[u8]) -> Result<String, DetectionError> {
    if bytes.is_empty() {
        return Err(DetectionError::EmptyImage);
    }
    if bytes.len() > MAX_IMAGE_BYTES {
        return Err(DetectionError::ImageTooLarge);
    }

    let img = image::load_from_memory(bytes)
        .map_err(|e| DetectionError::InvalidImage(e.to_string()))?;

    let mut jpeg = Vec::new();
    let encoder = image::codecs::jpeg::JpegEncoder::new_with_quality(
        Cursor::new(&mut jpeg),
        JPEG_QUALITY,
    );
    // Alpha channels are not representable in JPEG.
    img.to_rgb8()
        .write_with_encoder(encoder)
        .map_err(|e| DetectionError::InvalidImage(e.to_string()))?;

    Ok(format!("data:image/jpeg;base64,{}", BASE64.encode(&jpeg)))
}

fn strip_data_url_prefix(input: &str) -> &str {
    let trimmed = input.trim();
    if trimmed.starts_with("data:") {
        trimmed.split_once(',').map(|(_, rest)| rest).unwrap_or("")
    } else {
        trimmed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn png_fixture() -> Vec<u8> {
        let img = image::RgbImage::from_pixel(4, 4, image::Rgb([40, 160, 60]));
        let mut out = Vec::new();
        image::DynamicImage::ImageRgb8(img)
            .write_to(&mut Cursor::new(&mut out), image::ImageFormat::Png)
            .unwrap();
        out
    }

    #[test]
    fn strips_data_url_prefix() {
        assert_eq!(
            strip_data_url_prefix("data:image/png;base64,aGVsbG8="),
            "aGVsbG8="
        );
        assert_eq!(strip_data_url_prefix("aGVsbG8="), "aGVsbG8=");
        assert_eq!(strip_data_url_prefix("data:image/png;base64"), "");
    }

    #[test]
    fn reencodes_upload_as_jpeg_data_url() {
        let data_url = image_bytes_to_data_url(&png_fixture()).unwrap();
        let b64 = data_url.strip_prefix("data:image/jpeg;base64,").unwrap();
        let jpeg = BASE64.decode(b64).unwrap();
        assert_eq!(
            image::guess_format(&jpeg).unwrap(),
            image::ImageFormat::Jpeg
        );
    }

    #[test]
    fn rejects_empty_upload() {
        assert!(matches!(
            image_bytes_to_data_url(&[]),
            Err(DetectionError::EmptyImage)
        ));
    }

    #[test]
    fn rejects_non_image_upload() {
        assert!(matches!(
            image_bytes_to_data_url(b"definitely not pixels"),
            Err(DetectionError::InvalidImage(_))
        ));
    }

    #[test]
    fn rejects_oversized_upload() {
        let huge = vec![0u8; MAX_IMAGE_BYTES + 1];
        assert!(matches!(
            image_bytes_to_data_url(&huge),
            Err(DetectionError::ImageTooLarge)
        ));
    }

    #[test]
    fn chat_request_wire_shape() {
        let request = ChatRequest {
            model: "test-model".to_string(),
            messages: vec![ChatMessage {
                role: "user".to_string(),
                content: serde_json::json!([
                    {"type": "text", "text": ANALYSIS_PROMPT},
                    {"type": "image_url", "image_url": {"url": "data:image/jpeg;base64,AA=="}}
                ]),
            }],
            temperature: 0.3,
            max_completion_tokens: 1024,
            top_p: 1.0,
            stream: false,
        };
        let wire: serde_json::Value =
            serde_json::from_str(&serde_json::to_string(&request).unwrap()).unwrap();
        assert_eq!(wire["model"], "test-model");
        assert_eq!(wire["messages"][0]["role"], "user");
        assert_eq!(wire["messages"][0]["content"][1]["type"], "image_url");
        assert_eq!(wire["max_completion_tokens"], 1024);
        assert_eq!(wire["stream"], false);
    }

    #[test]
    fn chat_response_tolerates_missing_content() {
        let chat: ChatResponse = serde_json::from_str(
            r#"{"choices": [{"message": {"role": "assistant", "content": null}}]}"#,
        )
        .unwrap();
        assert!(chat.choices[0].message.content.is_none());
    }
}
