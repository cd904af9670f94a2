use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use crate::config::AiDefaults;
use crate::error::{AppError, Result};
use crate::models::AiConfig;

const MAX_TOKENS: u32 = 4096;

/// Fully resolved model settings for one call: user overrides on top of the
/// configured defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelConfig {
    pub base_url: String,
    pub model: String,
    pub api_key: String,
    pub image_model: Option<String>,
}

impl ModelConfig {
    pub fn resolve(defaults: &AiDefaults, user: Option<&AiConfig>) -> Result<Self> {
        fn non_empty(value: Option<&String>) -> Option<String> {
            value.map(|s| s.trim().to_string()).filter(|s| !s.is_empty())
        }

        let api_key = non_empty(user.and_then(|u| u.api_key.as_ref()))
            .or_else(|| non_empty(defaults.api_key.as_ref()))
            .ok_or_else(|| AppError::Completion("no API key configured".to_string()))?;

        let base_url = non_empty(user.and_then(|u| u.base_url.as_ref()))
            .unwrap_or_else(|| defaults.base_url.clone());

        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            model: non_empty(user.and_then(|u| u.model.as_ref()))
                .unwrap_or_else(|| defaults.model.clone()),
            api_key,
            image_model: defaults.image_model.clone(),
        })
    }
}

/// Text completion (and optional image generation) against some model
/// endpoint.
#[async_trait]
pub trait CompletionService: Send + Sync {
    async fn complete(&self, system: &str, user: &str, model: &ModelConfig) -> Result<String>;

    async fn generate_image(&self, _prompt: &str, _model: &ModelConfig) -> Result<Option<String>> {
        Ok(None)
    }
}

#[derive(Debug, Serialize)]
struct ChatRequest {
    model: String,
    max_tokens: u32,
    temperature: f32,
    messages: Vec<Message>,
}

#[derive(Debug, Serialize)]
struct Message {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    content: Option<String>,
}

#[derive(Debug, Serialize)]
struct ImageRequest {
    model: String,
    prompt: String,
    n: u32,
    size: String,
}

#[derive(Debug, Deserialize)]
struct ImageResponse {
    data: Vec<ImageData>,
}

#[derive(Debug, Deserialize)]
struct ImageData {
    url: Option<String>,
}

/// OpenAI-compatible `/chat/completions` and `/images/generations` client.
pub struct OpenAiClient {
    client: Client,
}

impl OpenAiClient {
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self { client })
    }

    async fn error_for_status(response: reqwest::Response) -> Result<reqwest::Response> {
        if response.status().is_success() {
            return Ok(response);
        }
        let status = response.status().as_u16();
        let body = response.text().await.unwrap_or_default();
        Err(AppError::CompletionStatus {
            status,
            body: body.chars().take(500).collect(),
        })
    }
}

#[async_trait]
impl CompletionService for OpenAiClient {
    async fn complete(&self, system: &str, user: &str, model: &ModelConfig) -> Result<String> {
        let request = ChatRequest {
            model: model.model.clone(),
            max_tokens: MAX_TOKENS,
            temperature: 0.3,
            messages: vec![
                Message {
                    role: "system".to_string(),
                    content: system.to_string(),
                },
                Message {
                    role: "user".to_string(),
                    content: user.to_string(),
                },
            ],
        };

        let response = self
            .client
            .post(format!("{}/chat/completions", model.base_url))
            .bearer_auth(&model.api_key)
            .json(&request)
            .send()
            .await?;
        let response = Self::error_for_status(response).await?;

        let chat: ChatResponse = response.json().await?;
        let text = chat
            .choices
            .into_iter()
            .filter_map(|c| c.message.content)
            .collect::<Vec<_>>()
            .join("\n");

        tracing::debug!("Completion from {} returned {} chars", model.model, text.len());
        Ok(text)
    }

    async fn generate_image(&self, prompt: &str, model: &ModelConfig) -> Result<Option<String>> {
        let Some(image_model) = model.image_model.clone() else {
            return Ok(None);
        };

        let request = ImageRequest {
            model: image_model,
            prompt: prompt.to_string(),
            n: 1,
            size: "1024x1024".to_string(),
        };

        let response = self
            .client
            .post(format!("{}/images/generations", model.base_url))
            .bearer_auth(&model.api_key)
            .json(&request)
            .send()
            .await?;
        let response = Self::error_for_status(response).await?;

        let images: ImageResponse = response.json().await?;
        Ok(images.data.into_iter().find_map(|d| d.url))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn defaults() -> AiDefaults {
        AiDefaults {
            api_key: Some("server-key".into()),
            ..AiDefaults::default()
        }
    }

    #[test]
    fn user_overrides_win_and_trailing_slash_is_trimmed() {
        let user = AiConfig {
            base_url: Some("https://llm.example.com/v1/".into()),
            model: Some("deepseek-chat".into()),
            api_key: Some("user-key".into()),
            ..AiConfig::default()
        };
        let resolved = ModelConfig::resolve(&defaults(), Some(&user)).unwrap();
        assert_eq!(resolved.base_url, "https://llm.example.com/v1");
        assert_eq!(resolved.model, "deepseek-chat");
        assert_eq!(resolved.api_key, "user-key");
    }

    #[test]
    fn blank_user_values_fall_back_to_defaults() {
        let user = AiConfig {
            api_key: Some("   ".into()),
            model: Some(String::new()),
            ..AiConfig::default()
        };
        let resolved = ModelConfig::resolve(&defaults(), Some(&user)).unwrap();
        assert_eq!(resolved.api_key, "server-key");
        assert_eq!(resolved.model, AiDefaults::default().model);
    }

    #[test]
    fn missing_key_is_fatal() {
        let err = ModelConfig::resolve(&AiDefaults::default(), None).unwrap_err();
        assert!(matches!(err, AppError::Completion(_)));
        assert!(!err.is_retryable());
    }
}
