use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::json;
use thiserror::Error;

const HTTP_TIMEOUT: Duration = Duration::from_secs(30);
const SYSTEM_PROMPT: &str =
    "You are a financial analyst expert providing stock market analysis.";

#[derive(Debug, Error)]
pub enum LlmError {
    #[error("request timed out")]
    Timeout,
    #[error("rate limited")]
    RateLimited,
    #[error("network error: {0}")]
    Network(String),
    #[error("API error: {0}")]
    Api(String),
    #[error("invalid response: {0}")]
    InvalidResponse(String),
    #[error("unknown provider: {0}")]
    UnknownProvider(String),
    #[error("no API key configured for {0}")]
    MissingKey(String),
}

impl LlmError {
    fn from_reqwest(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            LlmError::Timeout
        } else {
            LlmError::Network(e.to_string())
        }
    }
}

/// Uniform surface over the vendor chat APIs: one prompt in, the response
/// text and total token count out. Implementations never panic on bad
/// upstream responses.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    async fn generate_analysis_with_usage(
        &self,
        prompt: &str,
        max_tokens: u32,
    ) -> Result<(String, i64), LlmError>;

    fn provider_name(&self) -> String;

    fn model(&self) -> &str;
}

fn build_client() -> Client {
    Client::builder()
        .timeout(HTTP_TIMEOUT)
        .build()
        .unwrap_or_default()
}

async fn check_status(resp: reqwest::Response) -> Result<reqwest::Response, LlmError> {
    let status = resp.status();
    if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
        return Err(LlmError::RateLimited);
    }
    if !status.is_success() {
        let detail = resp.text().await.unwrap_or_else(|_| "unknown error".to_string());
        return Err(LlmError::Api(format!("HTTP {}: {}", status, detail)));
    }
    Ok(resp)
}

// ==============================================================================
// OpenAI (also the wire shape xAI speaks)
// ==============================================================================

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    max_tokens: u32,
    temperature: f32,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
    usage: Option<ChatUsage>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ChatResponseMessage {
    content: String,
}

#[derive(Debug, Deserialize)]
struct ChatUsage {
    #[serde(default)]
    total_tokens: i64,
}

pub struct OpenAiProvider {
    api_key: String,
    model: String,
    client: Client,
}

impl OpenAiProvider {
    pub fn new(api_key: String, model: Option<String>) -> Self {
        Self {
            api_key,
            model: model.unwrap_or_else(|| "gpt-4o".to_string()),
            client: build_client(),
        }
    }
}

async fn chat_completions(
    client: &Client,
    url: &str,
    api_key: &str,
    model: &str,
    prompt: &str,
    max_tokens: u32,
) -> Result<(String, i64), LlmError> {
    let request = ChatRequest {
        model,
        messages: vec![
            ChatMessage { role: "system", content: SYSTEM_PROMPT },
            ChatMessage { role: "user", content: prompt },
        ],
        max_tokens,
        temperature: 0.7,
    };

    let resp = client
        .post(url)
        .header("Authorization", format!("Bearer {}", api_key))
        .json(&request)
        .send()
        .await
        .map_err(LlmError::from_reqwest)?;
    let resp = check_status(resp).await?;

    let body: ChatResponse = resp
        .json()
        .await
        .map_err(|e| LlmError::InvalidResponse(e.to_string()))?;
    let text = body
        .choices
        .first()
        .map(|c| c.message.content.trim().to_string())
        .ok_or_else(|| LlmError::InvalidResponse("no choices in response".to_string()))?;
    let tokens = body.usage.map(|u| u.total_tokens).unwrap_or(0);
    Ok((text, tokens))
}

#[async_trait]
impl LlmProvider for OpenAiProvider {
    async fn generate_analysis_with_usage(
        &self,
        prompt: &str,
        max_tokens: u32,
    ) -> Result<(String, i64), LlmError> {
        chat_completions(
            &self.client,
            "https://api.openai.com/v1/chat/completions",
            &self.api_key,
            &self.model,
            prompt,
            max_tokens,
        )
        .await
    }

    fn provider_name(&self) -> String {
        format!("OpenAI ({})", self.model)
    }

    fn model(&self) -> &str {
        &self.model
    }
}

// ==============================================================================
// Anthropic
// ==============================================================================

#[derive(Debug, Deserialize)]
struct AnthropicResponse {
    content: Vec<AnthropicContent>,
    usage: Option<AnthropicUsage>,
}

#[derive(Debug, Deserialize)]
struct AnthropicContent {
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct AnthropicUsage {
    #[serde(default)]
    input_tokens: i64,
    #[serde(default)]
    output_tokens: i64,
}

pub struct AnthropicProvider {
    api_key: String,
    model: String,
    client: Client,
}

impl AnthropicProvider {
    pub fn new(api_key: String, model: Option<String>) -> Self {
        Self {
            api_key,
            model: model.unwrap_or_else(|| "claude-3-5-sonnet-20241022".to_string()),
            client: build_client(),
        }
    }
}

#[async_trait]
impl LlmProvider for AnthropicProvider {
    async fn generate_analysis_with_usage(
        &self,
        prompt: &str,
        max_tokens: u32,
    ) -> Result<(String, i64), LlmError> {
        let request = json!({
            "model": self.model,
            "max_tokens": max_tokens,
            "messages": [{"role": "user", "content": prompt}],
            "system": SYSTEM_PROMPT,
        });

        let resp = self
            .client
            .post("https://api.anthropic.com/v1/messages")
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", "2023-06-01")
            .json(&request)
            .send()
            .await
            .map_err(LlmError::from_reqwest)?;
        let resp = check_status(resp).await?;

        let body: AnthropicResponse = resp
            .json()
            .await
            .map_err(|e| LlmError::InvalidResponse(e.to_string()))?;
        let text = body
            .content
            .first()
            .and_then(|c| c.text.as_ref())
            .map(|t| t.trim().to_string())
            .ok_or_else(|| LlmError::InvalidResponse("no content in response".to_string()))?;
        let tokens = body
            .usage
            .map(|u| u.input_tokens + u.output_tokens)
            .unwrap_or(0);
        Ok((text, tokens))
    }

    fn provider_name(&self) -> String {
        format!("Anthropic ({})", self.model)
    }

    fn model(&self) -> &str {
        &self.model
    }
}

// ==============================================================================
// Google Gemini
// ==============================================================================

#[derive(Debug, Deserialize)]
struct GeminiResponse {
    #[serde(default)]
    candidates: Vec<GeminiCandidate>,
    #[serde(rename = "usageMetadata")]
    usage_metadata: Option<GeminiUsage>,
}

#[derive(Debug, Deserialize)]
struct GeminiCandidate {
    content: Option<GeminiContent>,
}

#[derive(Debug, Deserialize)]
struct GeminiContent {
    #[serde(default)]
    parts: Vec<GeminiPart>,
}

#[derive(Debug, Deserialize)]
struct GeminiPart {
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GeminiUsage {
    #[serde(rename = "totalTokenCount", default)]
    total_token_count: i64,
}

pub struct GoogleProvider {
    api_key: String,
    model: String,
    client: Client,
}

impl GoogleProvider {
    pub fn new(api_key: String, model: Option<String>) -> Self {
        Self {
            api_key,
            model: model.unwrap_or_else(|| "gemini-2.5-flash".to_string()),
            client: build_client(),
        }
    }
}

#[async_trait]
impl LlmProvider for GoogleProvider {
    async fn generate_analysis_with_usage(
        &self,
        prompt: &str,
        max_tokens: u32,
    ) -> Result<(String, i64), LlmError> {
        let url = format!(
            "https://generativelanguage.googleapis.com/v1beta/models/{}:generateContent",
            self.model
        );
        let request = json!({
            "contents": [{"parts": [{"text": format!("{} {}", SYSTEM_PROMPT, prompt)}]}],
            "generationConfig": {"maxOutputTokens": max_tokens, "temperature": 0.7},
        });

        let resp = self
            .client
            .post(&url)
            .query(&[("key", &self.api_key)])
            .json(&request)
            .send()
            .await
            .map_err(LlmError::from_reqwest)?;
        let resp = check_status(resp).await?;

        let body: GeminiResponse = resp
            .json()
            .await
            .map_err(|e| LlmError::InvalidResponse(e.to_string()))?;
        let text = body
            .candidates
            .first()
            .and_then(|c| c.content.as_ref())
            .and_then(|c| c.parts.first())
            .and_then(|p| p.text.as_ref())
            .map(|t| t.trim().to_string())
            .ok_or_else(|| LlmError::InvalidResponse("no candidates in response".to_string()))?;
        let tokens = body
            .usage_metadata
            .map(|u| u.total_token_count)
            .unwrap_or(0);
        Ok((text, tokens))
    }

    fn provider_name(&self) -> String {
        format!("Google ({})", self.model)
    }

    fn model(&self) -> &str {
        &self.model
    }
}

// ==============================================================================
// xAI Grok (OpenAI-compatible wire shape)
// ==============================================================================

pub struct GrokProvider {
    api_key: String,
    model: String,
    client: Client,
}

impl GrokProvider {
    pub fn new(api_key: String, model: Option<String>) -> Self {
        Self {
            api_key,
            model: model.unwrap_or_else(|| "grok-4".to_string()),
            client: build_client(),
        }
    }
}

#[async_trait]
impl LlmProvider for GrokProvider {
    async fn generate_analysis_with_usage(
        &self,
        prompt: &str,
        max_tokens: u32,
    ) -> Result<(String, i64), LlmError> {
        chat_completions(
            &self.client,
            "https://api.x.ai/v1/chat/completions",
            &self.api_key,
            &self.model,
            prompt,
            max_tokens,
        )
        .await
    }

    fn provider_name(&self) -> String {
        format!("xAI ({})", self.model)
    }

    fn model(&self) -> &str {
        &self.model
    }
}

// ==============================================================================
// Factory
// ==============================================================================

pub struct ProviderFactory;

impl ProviderFactory {
    pub const PROVIDER_IDS: &'static [&'static str] = &["openai", "anthropic", "google", "grok"];

    pub fn create(
        provider_name: &str,
        api_key: String,
        model: Option<String>,
    ) -> Result<Arc<dyn LlmProvider>, LlmError> {
        match provider_name.to_lowercase().as_str() {
            "openai" => Ok(Arc::new(OpenAiProvider::new(api_key, model))),
            "anthropic" => Ok(Arc::new(AnthropicProvider::new(api_key, model))),
            "google" => Ok(Arc::new(GoogleProvider::new(api_key, model))),
            "grok" | "xai" => Ok(Arc::new(GrokProvider::new(api_key, model))),
            other => Err(LlmError::UnknownProvider(other.to_string())),
        }
    }

    pub fn available_providers() -> serde_json::Value {
        json!([
            {
                "id": "openai",
                "name": "OpenAI (ChatGPT)",
                "models": ["gpt-4o", "gpt-4o-mini", "gpt-4-turbo", "gpt-4"],
                "default_model": "gpt-4o",
            },
            {
                "id": "anthropic",
                "name": "Anthropic (Claude)",
                "models": ["claude-3-5-sonnet-20241022", "claude-3-5-haiku-20241022", "claude-3-opus-20240229"],
                "default_model": "claude-3-5-sonnet-20241022",
            },
            {
                "id": "google",
                "name": "Google (Gemini)",
                "models": ["gemini-2.5-flash", "gemini-2.5-pro", "gemini-2.0-flash"],
                "default_model": "gemini-2.5-flash",
            },
            {
                "id": "grok",
                "name": "xAI (Grok)",
                "models": ["grok-4", "grok-2", "grok-latest"],
                "default_model": "grok-4",
            }
        ])
    }
}

/// Issue a tiny prompt to prove the configuration works end to end.
pub async fn test_provider_connection(
    provider_name: &str,
    api_key: String,
    model: Option<String>,
) -> serde_json::Value {
    let provider = match ProviderFactory::create(provider_name, api_key, model) {
        Ok(p) => p,
        Err(e) => return json!({"success": false, "error": e.to_string()}),
    };

    match provider
        .generate_analysis_with_usage("Say 'OK' if you can read this.", 10)
        .await
    {
        Ok(_) => json!({"success": true, "provider": provider.provider_name()}),
        Err(e) => json!({"success": false, "error": e.to_string()}),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_factory_known_and_unknown() {
        assert!(ProviderFactory::create("anthropic", "k".into(), None).is_ok());
        assert!(ProviderFactory::create("OPENAI", "k".into(), None).is_ok());
        assert!(ProviderFactory::create("xai", "k".into(), None).is_ok());
        assert!(matches!(
            ProviderFactory::create("cohere", "k".into(), None),
            Err(LlmError::UnknownProvider(_))
        ));
    }

    #[test]
    fn test_default_models() {
        let p = ProviderFactory::create("grok", "k".into(), None).unwrap();
        assert_eq!(p.model(), "grok-4");
        let p = ProviderFactory::create("openai", "k".into(), Some("gpt-4o-mini".into())).unwrap();
        assert_eq!(p.model(), "gpt-4o-mini");
    }
}
