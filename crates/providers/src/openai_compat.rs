//! OpenAI-compatible model clients.
//!
//! Works with: OpenAI, OpenRouter, Ollama, and any endpoint exposing
//! `/chat/completions` with image inputs. Image generation uses
//! `/images/generations`.

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use browserclaw_core::decision::{HistoryEntry, VisionDecider};
use browserclaw_core::error::{DecisionError, GenerationError};
use browserclaw_core::generation::{GeneratedImage, ImageGenerator};
use browserclaw_core::intent::{ActionIntent, IntentParseOptions};
use browserclaw_core::plan::{PlanRevision, TaskPlan};
use serde::Deserialize;
use tracing::{debug, trace};

use crate::http;
use crate::prompt;

/// A vision decider speaking the OpenAI chat completions protocol.
pub struct OpenAiCompatVision {
    name: String,
    base_url: String,
    api_key: String,
    model: String,
    temperature: f32,
    system_prompt: String,
    parse: IntentParseOptions,
    client: reqwest::Client,
}

impl OpenAiCompatVision {
    pub fn new(
        name: impl Into<String>,
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        model: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            model: model.into(),
            temperature: 0.4,
            system_prompt: prompt::system_prompt(1280, 720),
            parse: IntentParseOptions::default(),
            client: http::client(),
        }
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    /// Describe the real viewport size to the model.
    pub fn with_viewport(mut self, width: u32, height: u32) -> Self {
        self.system_prompt = prompt::system_prompt(width, height);
        self
    }

    pub fn with_parse_options(mut self, parse: IntentParseOptions) -> Self {
        self.parse = parse;
        self
    }

    fn request_body(&self, screenshot: &[u8], instruction: &str, history: &[HistoryEntry]) -> serde_json::Value {
        let image_url = format!("data:image/jpeg;base64,{}", BASE64.encode(screenshot));
        serde_json::json!({
            "model": self.model,
            "temperature": self.temperature,
            "response_format": { "type": "json_object" },
            "messages": [
                { "role": "system", "content": self.system_prompt },
                {
                    "role": "user",
                    "content": [
                        { "type": "text", "text": prompt::user_prompt(instruction, history) },
                        { "type": "image_url", "image_url": { "url": image_url } },
                    ],
                },
            ],
        })
    }

    fn plan_body(&self, goal: &str, revision: Option<PlanRevision<'_>>) -> serde_json::Value {
        serde_json::json!({
            "model": self.model,
            "temperature": PLANNING_TEMPERATURE,
            "response_format": { "type": "json_object" },
            "messages": [
                { "role": "user", "content": prompt::planning_prompt(goal, revision) },
            ],
        })
    }

    fn intent_from_response(&self, response: ChatResponse) -> Result<ActionIntent, DecisionError> {
        let content = first_content(response)?;
        trace!(provider = %self.name, content = %content, "Raw decision");
        Ok(ActionIntent::from_model_output(&content, &self.parse))
    }

    fn plan_from_response(&self, response: ChatResponse) -> Result<TaskPlan, DecisionError> {
        let content = first_content(response)?;
        trace!(provider = %self.name, content = %content, "Raw plan");
        TaskPlan::from_model_output(&content).map_err(DecisionError::InvalidResponse)
    }

    async fn chat(&self, body: &serde_json::Value) -> Result<ChatResponse, DecisionError> {
        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(body)
            .send()
            .await
            .map_err(http::network_decision_error)?;

        if !response.status().is_success() {
            return Err(http::decision_error(&self.name, response).await);
        }

        response
            .json()
            .await
            .map_err(|e| DecisionError::InvalidResponse(format!("failed to parse response: {e}")))
    }
}

/// Plans should be stable across retries.
const PLANNING_TEMPERATURE: f32 = 0.2;

fn first_content(response: ChatResponse) -> Result<String, DecisionError> {
    response
        .choices
        .into_iter()
        .next()
        .and_then(|c| c.message.content)
        .ok_or_else(|| DecisionError::InvalidResponse("no choices in response".into()))
}

#[async_trait]
impl VisionDecider for OpenAiCompatVision {
    fn name(&self) -> &str {
        &self.name
    }

    async fn decide(
        &self,
        screenshot: &[u8],
        instruction: &str,
        history: &[HistoryEntry],
    ) -> Result<ActionIntent, DecisionError> {
        debug!(
            provider = %self.name,
            model = %self.model,
            screenshot_bytes = screenshot.len(),
            history = history.len(),
            "Sending decision request"
        );
        let body = self
            .chat(&self.request_body(screenshot, instruction, history))
            .await?;
        self.intent_from_response(body)
    }

    async fn plan(&self, goal: &str, revision: Option<PlanRevision<'_>>) -> Result<TaskPlan, DecisionError> {
        debug!(
            provider = %self.name,
            model = %self.model,
            revising = revision.is_some(),
            "Sending planning request"
        );
        let body = self.chat(&self.plan_body(goal, revision)).await?;
        self.plan_from_response(body)
    }

    async fn health_check(&self) -> Result<bool, DecisionError> {
        let response = self
            .client
            .get(format!("{}/models", self.base_url))
            .bearer_auth(&self.api_key)
            .send()
            .await
            .map_err(http::network_decision_error)?;
        Ok(response.status().is_success())
    }
}

/// Image generation over `/images/generations`.
pub struct OpenAiImageGenerator {
    name: String,
    base_url: String,
    api_key: String,
    model: String,
    client: reqwest::Client,
}

impl OpenAiImageGenerator {
    pub fn new(
        name: impl Into<String>,
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        model: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            model: model.into(),
            client: http::client(),
        }
    }

    fn request_body(&self, prompt: &str) -> serde_json::Value {
        let mut body = serde_json::json!({
            "model": self.model,
            "prompt": prompt,
            "n": 1,
        });
        // Only the DALL-E models accept a response format; newer ones always return base64.
        if self.model.starts_with("dall-e") {
            body["response_format"] = serde_json::json!("b64_json");
        }
        body
    }

    async fn download(&self, url: &str) -> Result<GeneratedImage, GenerationError> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(http::network_generation_error)?;
        if !response.status().is_success() {
            return Err(http::generation_error(&self.name, response).await);
        }
        let mime_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("image/png")
            .to_string();
        let bytes = response
            .bytes()
            .await
            .map_err(http::network_generation_error)?;
        Ok(GeneratedImage {
            bytes: bytes.to_vec(),
            mime_type,
        })
    }
}

#[async_trait]
impl ImageGenerator for OpenAiImageGenerator {
    fn name(&self) -> &str {
        &self.name
    }

    async fn generate(&self, prompt: &str) -> Result<GeneratedImage, GenerationError> {
        let url = format!("{}/images/generations", self.base_url);
        debug!(provider = %self.name, model = %self.model, "Sending image request");

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&self.request_body(prompt))
            .send()
            .await
            .map_err(http::network_generation_error)?;

        if !response.status().is_success() {
            return Err(http::generation_error(&self.name, response).await);
        }

        let body: ImagesResponse = response
            .json()
            .await
            .map_err(|e| GenerationError::Decode(format!("failed to parse response: {e}")))?;

        match first_image(body)? {
            ImagePayload::Inline(bytes) => Ok(GeneratedImage {
                bytes,
                mime_type: "image/png".into(),
            }),
            ImagePayload::Remote(url) => self.download(&url).await,
        }
    }
}

enum ImagePayload {
    Inline(Vec<u8>),
    Remote(String),
}

fn first_image(body: ImagesResponse) -> Result<ImagePayload, GenerationError> {
    let datum = body
        .data
        .into_iter()
        .next()
        .ok_or(GenerationError::EmptyResponse)?;
    if let Some(b64) = datum.b64_json {
        let bytes = BASE64
            .decode(b64.trim())
            .map_err(|e| GenerationError::Decode(e.to_string()))?;
        return Ok(ImagePayload::Inline(bytes));
    }
    datum
        .url
        .map(ImagePayload::Remote)
        .ok_or(GenerationError::EmptyResponse)
}

// --- OpenAI API types (internal) ---

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ImagesResponse {
    #[serde(default)]
    data: Vec<ImageDatum>,
}

#[derive(Debug, Deserialize)]
struct ImageDatum {
    b64_json: Option<String>,
    url: Option<String>,
}
