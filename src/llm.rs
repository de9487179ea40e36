use crate::config::Config;
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine};
use serde::{Deserialize, Serialize};
use log::debug;
use std::fmt::Debug;
use std::time::Duration;
use thiserror::Error;
use url::Url;

const GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta/";
const OPENAI_BASE_URL: &str = "https://api.openai.com/v1";
pub const FALLBACK_GEMINI_MODEL: &str = "models/gemini-1.5-flash";

/// One piece of a multimodal prompt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Part {
    Text(String),
    Image { mime_type: String, data: Vec<u8> },
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ModelInput {
    pub parts: Vec<Part>,
}

impl ModelInput {
    pub fn text(mut self, text: impl Into<String>) -> Self {
        self.parts.push(Part::Text(text.into()));
        self
    }

    pub fn image(mut self, mime_type: impl Into<String>, data: Vec<u8>) -> Self {
        self.parts.push(Part::Image {
            mime_type: mime_type.into(),
            data,
        });
        self
    }
}

/// Non-success answer from a provider, with whatever structured code it reported.
#[derive(Debug, Error)]
#[error("{provider} API error (HTTP {status}): {message}")]
pub struct ApiError {
    pub provider: &'static str,
    pub status: u16,
    pub code: Option<String>,
    pub message: String,
}

/// A successful HTTP answer that carries no text to work with: blocked prompt,
/// empty candidate or a body we cannot read. Resending the same request will not fix it.
#[derive(Debug, Error)]
#[error("{provider} returned no usable content: {reason}")]
pub struct EmptyResponse {
    pub provider: &'static str,
    pub reason: String,
}

#[async_trait]
pub trait LlmClient: Send + Sync + Debug {
    async fn generate(&self, input: &ModelInput) -> Result<String>;

    /// Models usable for content generation.
    async fn list_models(&self) -> Result<Vec<String>>;
}

pub fn create_llm(config: &Config, model_override: Option<&str>) -> Result<Box<dyn LlmClient>> {
    match config.llm.provider.as_str() {
        "gemini" => {
            let cfg = config.llm.gemini.as_ref().context("Gemini config missing")?;
            let api_key = cfg.resolved_api_key().context("Gemini API key missing")?;
            let model = model_override.unwrap_or(&cfg.model);
            Ok(Box::new(GeminiClient::new(&api_key, model, config.llm.request_timeout())?))
        }
        "openai" => {
            let cfg = config.llm.openai.as_ref().context("OpenAI config missing")?;
            let api_key = cfg.resolved_api_key().context("OpenAI API key missing")?;
            let model = model_override.unwrap_or(&cfg.model);
            Ok(Box::new(OpenAIClient::new(
                &api_key,
                model,
                cfg.base_url.as_deref(),
                config.llm.request_timeout(),
            )?))
        }
        _ => Err(anyhow!("Unknown LLM provider: {}", config.llm.provider)),
    }
}

#[derive(Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Deserialize, Debug)]
struct ErrorBody {
    message: String,
    #[serde(default)]
    status: Option<String>,
    #[serde(default, rename = "type")]
    kind: Option<String>,
}

fn api_error(provider: &'static str, status: u16, body: &str) -> ApiError {
    match serde_json::from_str::<ErrorEnvelope>(body) {
        Ok(envelope) => ApiError {
            provider,
            status,
            code: envelope.error.status.or(envelope.error.kind),
            message: envelope.error.message,
        },
        Err(_) => ApiError {
            provider,
            status,
            code: None,
            message: body.trim().to_string(),
        },
    }
}

fn http_client(timeout: Duration) -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .context("Failed to build HTTP client")
}

async fn read_failure(provider: &'static str, resp: reqwest::Response) -> anyhow::Error {
    let status = resp.status().as_u16();
    let body = resp.text().await.unwrap_or_default();
    api_error(provider, status, &body).into()
}

// --- Gemini ---
#[derive(Debug)]
struct GeminiClient {
    api_key: String,
    model: String,
    client: reqwest::Client,
}

impl GeminiClient {
    fn new(api_key: &str, model: &str, timeout: Duration) -> Result<Self> {
        Ok(Self {
            api_key: api_key.to_string(),
            model: model.trim_start_matches("models/").to_string(),
            client: http_client(timeout)?,
        })
    }

    fn endpoint(&self, path: &str) -> Result<Url> {
        let mut url = Url::parse(GEMINI_BASE_URL)?
            .join(path)
            .with_context(|| format!("Invalid Gemini endpoint: {path}"))?;
        url.query_pairs_mut().append_pair("key", &self.api_key);
        Ok(url)
    }
}

#[derive(Serialize)]
struct GeminiRequest {
    contents: Vec<GeminiContent>,
    generation_config: GeminiGenerationConfig,
}

#[derive(Serialize)]
struct GeminiGenerationConfig {
    response_mime_type: String,
}

#[derive(Serialize)]
struct GeminiContent {
    role: String,
    parts: Vec<GeminiPart>,
}

#[derive(Serialize)]
#[serde(untagged)]
enum GeminiPart {
    Text { text: String },
    InlineData { inline_data: GeminiBlob },
}

#[derive(Serialize)]
struct GeminiBlob {
    mime_type: String,
    data: String,
}

impl From<&Part> for GeminiPart {
    fn from(part: &Part) -> Self {
        match part {
            Part::Text(text) => GeminiPart::Text { text: text.clone() },
            Part::Image { mime_type, data } => GeminiPart::InlineData {
                inline_data: GeminiBlob {
                    mime_type: mime_type.clone(),
                    data: STANDARD.encode(data),
                },
            },
        }
    }
}

fn gemini_request(input: &ModelInput) -> GeminiRequest {
    GeminiRequest {
        contents: vec![GeminiContent {
            role: "user".to_string(),
            parts: input.parts.iter().map(GeminiPart::from).collect(),
        }],
        generation_config: GeminiGenerationConfig {
            response_mime_type: "application/json".to_string(),
        },
    }
}

#[derive(Deserialize)]
struct GeminiResponse {
    candidates: Option<Vec<GeminiCandidate>>,
    error: Option<ErrorBody>,
    #[serde(rename = "promptFeedback")]
    prompt_feedback: Option<GeminiPromptFeedback>,
}

#[derive(Deserialize)]
struct GeminiPromptFeedback {
    #[serde(rename = "blockReason")]
    block_reason: Option<String>,
}

#[derive(Deserialize)]
struct GeminiCandidate {
    content: Option<GeminiContentResponse>,
    #[serde(rename = "finishReason")]
    finish_reason: Option<String>,
}

#[derive(Deserialize)]
struct GeminiContentResponse {
    #[serde(default)]
    parts: Vec<GeminiPartResponse>,
}

#[derive(Deserialize)]
struct GeminiPartResponse {
    #[serde(default)]
    text: String,
}

#[derive(Deserialize)]
struct GeminiModelList {
    #[serde(default)]
    models: Vec<GeminiModel>,
}

#[derive(Deserialize)]
struct GeminiModel {
    name: String,
    #[serde(default, rename = "supportedGenerationMethods")]
    supported_generation_methods: Vec<String>,
}

fn generation_models(list: GeminiModelList) -> Vec<String> {
    let models: Vec<String> = list
        .models
        .into_iter()
        .filter(|m| m.supported_generation_methods.iter().any(|g| g == "generateContent"))
        .map(|m| m.name)
        .collect();
    if models.is_empty() {
        vec![FALLBACK_GEMINI_MODEL.to_string()]
    } else {
        models
    }
}

fn empty(provider: &'static str, reason: impl Into<String>) -> anyhow::Error {
    EmptyResponse {
        provider,
        reason: reason.into(),
    }
    .into()
}

/// Text of the first candidate. The body only goes to the debug log, never into the error.
fn gemini_text(body: &str) -> Result<String> {
    let result: GeminiResponse = serde_json::from_str(body).map_err(|e| {
        debug!("Unreadable Gemini response: {}", body);
        empty("Gemini", format!("unreadable response ({:?} error)", e.classify()))
    })?;

    if let Some(err) = result.error {
        return Err(ApiError {
            provider: "Gemini",
            status: 200,
            code: err.status,
            message: err.message,
        }
        .into());
    }

    if let Some(first) = result.candidates.as_ref().and_then(|c| c.first()) {
        if let Some(content) = &first.content {
            let text: String = content.parts.iter().map(|p| p.text.as_str()).collect();
            if !text.is_empty() {
                return Ok(text);
            }
        }
        let reason = first.finish_reason.as_deref().unwrap_or("UNKNOWN");
        return Err(empty("Gemini", format!("finish reason {reason}")));
    }

    debug!("Gemini response without candidates: {}", body);
    match result.prompt_feedback.and_then(|f| f.block_reason) {
        Some(reason) => Err(empty("Gemini", format!("prompt blocked ({reason})"))),
        None => Err(empty("Gemini", "no candidates")),
    }
}

#[async_trait]
impl LlmClient for GeminiClient {
    async fn generate(&self, input: &ModelInput) -> Result<String> {
        let url = self.endpoint(&format!("models/{}:generateContent", self.model))?;

        let resp = self.client.post(url).json(&gemini_request(input)).send().await?;

        if !resp.status().is_success() {
            return Err(read_failure("Gemini", resp).await);
        }

        let response_text = resp.text().await?;
        gemini_text(&response_text)
    }

    async fn list_models(&self) -> Result<Vec<String>> {
        let mut url = self.endpoint("models")?;
        url.query_pairs_mut().append_pair("pageSize", "1000");

        let resp = self.client.get(url).send().await?;
        if !resp.status().is_success() {
            return Err(read_failure("Gemini", resp).await);
        }
        let list: GeminiModelList = resp.json().await.context("Failed to parse Gemini model list")?;
        Ok(generation_models(list))
    }
}

// --- OpenAI ---

#[derive(Debug)]
struct OpenAIClient {
    api_key: String,
    model: String,
    base_url: String,
    client: reqwest::Client,
}

impl OpenAIClient {
    fn new(api_key: &str, model: &str, base_url: Option<&str>, timeout: Duration) -> Result<Self> {
        Ok(Self {
            api_key: api_key.to_string(),
            model: model.to_string(),
            base_url: base_url.unwrap_or(OPENAI_BASE_URL).trim_end_matches('/').to_string(),
            client: http_client(timeout)?,
        })
    }
}

#[derive(Serialize)]
struct OpenAIRequest {
    model: String,
    messages: Vec<OpenAIMessage>,
    response_format: OpenAIResponseFormat,
}

#[derive(Serialize)]
struct OpenAIResponseFormat {
    #[serde(rename = "type")]
    kind: String,
}

#[derive(Serialize)]
struct OpenAIMessage {
    role: String,
    content: Vec<OpenAIContentPart>,
}

#[derive(Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum OpenAIContentPart {
    Text { text: String },
    ImageUrl { image_url: OpenAIImageUrl },
}

#[derive(Serialize)]
struct OpenAIImageUrl {
    url: String,
}

impl From<&Part> for OpenAIContentPart {
    fn from(part: &Part) -> Self {
        match part {
            Part::Text(text) => OpenAIContentPart::Text { text: text.clone() },
            Part::Image { mime_type, data } => OpenAIContentPart::ImageUrl {
                image_url: OpenAIImageUrl {
                    url: format!("data:{};base64,{}", mime_type, STANDARD.encode(data)),
                },
            },
        }
    }
}

#[derive(Deserialize)]
struct OpenAIResponse {
    choices: Vec<OpenAIChoice>,
}

#[derive(Deserialize)]
struct OpenAIChoice {
    message: OpenAIMessageResponse,
}

#[derive(Deserialize)]
struct OpenAIMessageResponse {
    content: Option<String>,
}

#[derive(Deserialize)]
struct OpenAIModelList {
    #[serde(default)]
    data: Vec<OpenAIModel>,
}

#[derive(Deserialize)]
struct OpenAIModel {
    id: String,
}

fn openai_text(body: &str) -> Result<String> {
    let result: OpenAIResponse = serde_json::from_str(body).map_err(|e| {
        debug!("Unreadable OpenAI response: {}", body);
        empty("OpenAI", format!("unreadable response ({:?} error)", e.classify()))
    })?;
    result
        .choices
        .into_iter()
        .next()
        .and_then(|choice| choice.message.content)
        .filter(|content| !content.trim().is_empty())
        .ok_or_else(|| empty("OpenAI", "missing message content"))
}

#[async_trait]
impl LlmClient for OpenAIClient {
    async fn generate(&self, input: &ModelInput) -> Result<String> {
        let url = format!("{}/chat/completions", self.base_url);

        let request_body = OpenAIRequest {
            model: self.model.clone(),
            messages: vec![OpenAIMessage {
                role: "user".to_string(),
                content: input.parts.iter().map(OpenAIContentPart::from).collect(),
            }],
            response_format: OpenAIResponseFormat {
                kind: "json_object".to_string(),
            },
        };

        let resp = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&request_body)
            .send()
            .await?;

        if !resp.status().is_success() {
            return Err(read_failure("OpenAI", resp).await);
        }

        let response_text = resp.text().await?;
        openai_text(&response_text)
    }

    async fn list_models(&self) -> Result<Vec<String>> {
        let url = format!("{}/models", self.base_url);
        let resp = self
            .client
            .get(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .send()
            .await?;
        if !resp.status().is_success() {
            return Err(read_failure("OpenAI", resp).await);
        }
        let list: OpenAIModelList = resp.json().await.context("Failed to parse OpenAI model list")?;
        let mut ids: Vec<String> = list.data.into_iter().map(|m| m.id).collect();
        ids.sort();
        Ok(ids)
    }
}
