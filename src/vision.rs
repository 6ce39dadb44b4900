//! Vision/LLM provider abstraction and the OpenAI-compatible client.
//!
//! The pipeline consumes the model as a black box: a prompt plus an
//! optional binary attachment in, free text out. The response is expected
//! to contain JSON but is not guaranteed well-formed; repair lives in
//! [`crate::repair`], not here.

use std::time::Duration;

use anyhow::{bail, Result};
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use serde_json::json;

use crate::config::VisionConfig;
use crate::error::ApiError;

/// A binary payload (page render, image, or whole PDF) shipped alongside
/// the instruction prompt.
#[derive(Debug, Clone)]
pub struct Attachment {
    pub mime: String,
    pub bytes: Vec<u8>,
}

/// One request to the vision/LLM API.
#[derive(Debug, Clone)]
pub struct VisionRequest {
    pub prompt: String,
    pub attachment: Option<Attachment>,
}

impl VisionRequest {
    pub fn text(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            attachment: None,
        }
    }

    pub fn with_attachment(prompt: impl Into<String>, mime: &str, bytes: &[u8]) -> Self {
        Self {
            prompt: prompt.into(),
            attachment: Some(Attachment {
                mime: mime.to_string(),
                bytes: bytes.to_vec(),
            }),
        }
    }
}

/// Trait for vision-capable language models.
///
/// Implementations must map upstream throttling to
/// [`ApiError::RateLimited`] so the batch executor can retry.
#[async_trait]
pub trait VisionModel: Send + Sync {
    async fn generate(&self, request: &VisionRequest) -> Result<String, ApiError>;
}

#[async_trait]
impl<V: VisionModel + ?Sized> VisionModel for std::sync::Arc<V> {
    async fn generate(&self, request: &VisionRequest) -> Result<String, ApiError> {
        (**self).generate(request).await
    }
}

/// Client for an OpenAI-compatible chat-completions endpoint with vision
/// input. Attachments are inlined as base64 data URLs.
pub struct OpenAiVisionClient {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
}

impl OpenAiVisionClient {
    /// Build a client from configuration. The API key is read from the
    /// `OPENAI_API_KEY` environment variable.
    pub fn new(config: &VisionConfig) -> Result<Self> {
        let Ok(api_key) = std::env::var("OPENAI_API_KEY") else {
            bail!("OPENAI_API_KEY environment variable not set");
        };

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            client,
            base_url: config
                .base_url
                .clone()
                .unwrap_or_else(|| "https://api.openai.com".to_string()),
            api_key,
            model: config.model.clone(),
        })
    }
}

#[async_trait]
impl VisionModel for OpenAiVisionClient {
    async fn generate(&self, request: &VisionRequest) -> Result<String, ApiError> {
        let content = match &request.attachment {
            Some(att) => {
                let data_url = format!("data:{};base64,{}", att.mime, BASE64.encode(&att.bytes));
                json!([
                    { "type": "text", "text": request.prompt },
                    { "type": "image_url", "image_url": { "url": data_url } },
                ])
            }
            None => json!(request.prompt),
        };

        let body = json!({
            "model": self.model,
            "messages": [{ "role": "user", "content": content }],
        });

        let response = self
            .client
            .post(format!("{}/v1/chat/completions", self.base_url))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if status.as_u16() == 429 {
            return Err(ApiError::RateLimited);
        }
        if !status.is_success() {
            let body_text = response.text().await.unwrap_or_default();
            return Err(ApiError::Http {
                status: status.as_u16(),
                body: body_text,
            });
        }

        let payload: serde_json::Value = response
            .json()
            .await
            .map_err(|e| ApiError::InvalidResponse(e.to_string()))?;

        payload["choices"][0]["message"]["content"]
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| ApiError::InvalidResponse("missing choices[0].message.content".into()))
    }
}
