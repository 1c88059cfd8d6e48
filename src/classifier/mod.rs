//! Classifier - External Image Classification Adapter
//!
//! ## Responsibilities
//!
//! - Send a reference image to the external classification service
//! - Parse the returned material / objects / spoken response
//! - Rotate API keys and models on rate limiting
//!
//! The service is a black box: the core validates nothing about the
//! returned categories beyond the presence of a usable `material` field.

use crate::error::{Error, Result};
use base64::prelude::*;
use futures::future::BoxFuture;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::time::Duration;

/// Material value meaning "nothing actionable found".
pub const NONE_SENTINEL: &str = "none";

/// A detected sub-object with the service's confidence in it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectedObject {
    pub name: String,
    #[serde(default)]
    pub confidence: f32,
}

/// Parsed classification result.
#[derive(Debug, Clone)]
pub struct Verdict {
    /// `None` when the service returned the none-sentinel
    pub material: Option<String>,
    /// Detected objects, most confident first (service order)
    pub objects: Vec<DetectedObject>,
    /// Short text for the station to speak
    pub spoken_response: String,
}

impl Verdict {
    /// Confidence of the top object, 0.0 if none were reported.
    pub fn top_confidence(&self) -> f32 {
        self.objects.first().map(|o| o.confidence).unwrap_or(0.0)
    }
}

/// External classifier seam. Implemented by `GeminiClient` in production
/// and by scripted doubles in tests.
pub trait Classifier: Send + Sync {
    fn classify(&self, image_jpeg: Vec<u8>) -> BoxFuture<'_, Result<Verdict>>;
}

const PROMPT_TEXT: &str = r#"You are the AI of an automated waste-sorting station. A human has placed an object in front of the camera for analysis. Identify the main material of the object in the image and answer in JSON.

## System context:
- After your classification, a mechanical system moves the object into the matching bin.
- Your spoken response must be short and reflect that you are part of this physical system.

## Classification rules:
1. Classify the main material as one of: "plastic", "organic", "metal".
2. If you cannot identify the material, answer with "material": "none".
3. Always include a list of the objects you see.

## Strict output format (JSON):
```json
{
  "material": "plastic|organic|metal|none",
  "objects": [
    {
      "name": "example: aluminium can",
      "confidence": 0.95
    }
  ],
  "spoken_response": "A response that first names the object, then the material and the action taken."
}
```"#;

/// Gemini API configuration
#[derive(Debug, Clone)]
pub struct GeminiConfig {
    /// API keys, tried in order when a key is rate limited
    pub api_keys: Vec<String>,
    /// Models, tried in order per key
    pub models: Vec<String>,
    pub timeout: Duration,
}

impl Default for GeminiConfig {
    fn default() -> Self {
        Self {
            api_keys: Vec::new(),
            models: vec![
                "gemini-1.5-flash-latest".to_string(),
                "gemini-pro".to_string(),
            ],
            timeout: Duration::from_secs(30),
        }
    }
}

/// Gemini generateContent client
#[derive(Debug)]
pub struct GeminiClient {
    client: reqwest::Client,
    config: GeminiConfig,
    base_url: String,
}

impl GeminiClient {
    pub fn new(config: GeminiConfig) -> Result<Self> {
        if config.api_keys.is_empty() {
            return Err(Error::Config(
                "no classifier API keys configured (GEMINI_API_KEYS)".to_string(),
            ));
        }
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| Error::Config(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            config,
            base_url: "https://generativelanguage.googleapis.com/v1beta".to_string(),
        })
    }

    async fn classify_inner(&self, image_jpeg: Vec<u8>) -> Result<Verdict> {
        let encoded = BASE64_STANDARD.encode(&image_jpeg);
        let payload = json!({
            "contents": [{
                "parts": [
                    { "text": PROMPT_TEXT },
                    { "inline_data": { "mime_type": "image/jpeg", "data": encoded } }
                ]
            }]
        });

        // Rotate key x model on rate limiting; other failures abort.
        for (key_index, api_key) in self.config.api_keys.iter().enumerate() {
            for model in &self.config.models {
                let url = format!(
                    "{}/models/{}:generateContent?key={}",
                    self.base_url, model, api_key
                );

                let resp = self
                    .client
                    .post(&url)
                    .json(&payload)
                    .send()
                    .await
                    .map_err(|e| Error::Classifier(format!("request failed: {}", e)))?;

                if resp.status() == StatusCode::TOO_MANY_REQUESTS {
                    tracing::warn!(
                        key_index = key_index,
                        model = %model,
                        "Classifier rate limited, rotating"
                    );
                    continue;
                }

                if !resp.status().is_success() {
                    return Err(Error::Classifier(format!(
                        "classifier returned {}",
                        resp.status()
                    )));
                }

                let body: serde_json::Value = resp
                    .json()
                    .await
                    .map_err(|e| Error::Classifier(format!("response read failed: {}", e)))?;

                let text = body["candidates"][0]["content"]["parts"][0]["text"]
                    .as_str()
                    .ok_or_else(|| {
                        Error::Classifier("response had no candidate text".to_string())
                    })?;

                return parse_verdict(text);
            }
        }

        Err(Error::Classifier(
            "all API keys and models are rate limited".to_string(),
        ))
    }
}

impl Classifier for GeminiClient {
    fn classify(&self, image_jpeg: Vec<u8>) -> BoxFuture<'_, Result<Verdict>> {
        Box::pin(self.classify_inner(image_jpeg))
    }
}

/// The model tends to wrap the JSON in a markdown code fence.
fn strip_code_fence(text: &str) -> &str {
    let t = text.trim();
    let t = t
        .strip_prefix("```json")
        .or_else(|| t.strip_prefix("```"))
        .unwrap_or(t);
    let t = t.strip_suffix("```").unwrap_or(t);
    t.trim()
}

/// Parse the model's JSON answer into a `Verdict`.
///
/// A response without a `material` field is unusable and maps to
/// `ClassifierFailure`; the none-sentinel (or JSON null) maps to
/// `material: None`.
fn parse_verdict(text: &str) -> Result<Verdict> {
    let cleaned = strip_code_fence(text);
    let value: serde_json::Value = serde_json::from_str(cleaned)
        .map_err(|e| Error::Classifier(format!("unparseable response: {}", e)))?;

    let material_field = value
        .get("material")
        .ok_or_else(|| Error::Classifier("response missing material field".to_string()))?;

    let material = match material_field.as_str() {
        Some(m) => {
            let m = m.trim();
            if m.is_empty() || m.eq_ignore_ascii_case(NONE_SENTINEL) || m.eq_ignore_ascii_case("null")
            {
                None
            } else {
                Some(m.to_string())
            }
        }
        None => None, // JSON null
    };

    let objects: Vec<DetectedObject> = value
        .get("objects")
        .cloned()
        .map(serde_json::from_value)
        .transpose()
        .map_err(|e| Error::Classifier(format!("malformed objects list: {}", e)))?
        .unwrap_or_default();

    let spoken_response = value
        .get("spoken_response")
        .and_then(|v| v.as_str())
        .unwrap_or("")
        .to_string();

    Ok(Verdict {
        material,
        objects,
        spoken_response,
    })
}
