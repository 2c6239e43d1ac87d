//! Google Gemini clients over the `generateContent` REST endpoint.

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

pub const GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

/// Vision decider backed by a multimodal Gemini model.
pub struct GeminiVision {
    base_url: String,
    api_key: String,
    model: String,
    temperature: f32,
    system_prompt: String,
    parse: IntentParseOptions,
    client: reqwest::Client,
}

impl GeminiVision {
    pub fn new(api_key: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            base_url: GEMINI_BASE_URL.to_string(),
            api_key: api_key.into(),
            model: model.into(),
            temperature: 0.4,
            system_prompt: prompt::system_prompt(1280, 720),
            parse: IntentParseOptions::default(),
            client: http::client(),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn with_viewport(mut self, width: u32, height: u32) -> Self {
        self.system_prompt = prompt::system_prompt(width, height);
        self
    }

    pub fn with_parse_options(mut self, parse: IntentParseOptions) -> Self {
        self.parse = parse;
        self
    }

    fn endpoint(&self) -> String {
        format!("{}/models/{}:generateContent", self.base_url, self.model)
    }

    fn request_body(&self, screenshot: &[u8], instruction: &str, history: &[HistoryEntry]) -> serde_json::Value {
        serde_json::json!({
            "systemInstruction": { "parts": [{ "text": self.system_prompt }] },
            "contents": [{
                "role": "user",
                "parts": [
                    { "text": prompt::user_prompt(instruction, history) },
                    { "inlineData": { "mimeType": "image/jpeg", "data": BASE64.encode(screenshot) } },
                ],
            }],
            "generationConfig": {
                "temperature": self.temperature,
                "responseMimeType": "application/json",
            },
        })
    }

    fn plan_body(goal: &str, revision: Option<PlanRevision<'_>>) -> serde_json::Value {
        serde_json::json!({
            "contents": [{
                "role": "user",
                "parts": [{ "text": prompt::planning_prompt(goal, revision) }],
            }],
            "generationConfig": {
                "temperature": 0.2,
                "responseMimeType": "application/json",
            },
        })
    }

    fn intent_from_response(&self, response: GenerateResponse) -> Result<ActionIntent, DecisionError> {
        let text = response
            .text()
            .ok_or_else(|| DecisionError::InvalidResponse("no text in response".into()))?;
        trace!(model = %self.model, content = %text, "Raw decision");
        Ok(ActionIntent::from_model_output(&text, &self.parse))
    }

    fn plan_from_response(&self, response: GenerateResponse) -> Result<TaskPlan, DecisionError> {
        let text = response
            .text()
            .ok_or_else(|| DecisionError::InvalidResponse("no text in response".into()))?;
        trace!(model = %self.model, content = %text, "Raw plan");
        TaskPlan::from_model_output(&text).map_err(DecisionError::InvalidResponse)
    }

    async fn generate(&self, body: &serde_json::Value) -> Result<GenerateResponse, DecisionError> {
        let response = self
            .client
            .post(self.endpoint())
            .header("x-goog-api-key", &self.api_key)
            .json(body)
            .send()
            .await
            .map_err(http::network_decision_error)?;

        if !response.status().is_success() {
            return Err(http::decision_error("gemini", response).await);
        }

        response
            .json()
            .await
            .map_err(|e| DecisionError::InvalidResponse(format!("failed to parse response: {e}")))
    }
}

#[async_trait]
impl VisionDecider for GeminiVision {
    fn name(&self) -> &str {
        "gemini"
    }

    async fn decide(
        &self,
        screenshot: &[u8],
        instruction: &str,
        history: &[HistoryEntry],
    ) -> Result<ActionIntent, DecisionError> {
        debug!(
            model = %self.model,
            screenshot_bytes = screenshot.len(),
            history = history.len(),
            "Sending decision request"
        );
        let body = self
            .generate(&self.request_body(screenshot, instruction, history))
            .await?;
        self.intent_from_response(body)
    }

    async fn plan(&self, goal: &str, revision: Option<PlanRevision<'_>>) -> Result<TaskPlan, DecisionError> {
        debug!(model = %self.model, revising = revision.is_some(), "Sending planning request");
        let body = self.generate(&Self::plan_body(goal, revision)).await?;
        self.plan_from_response(body)
    }

    async fn health_check(&self) -> Result<bool, DecisionError> {
        let response = self
            .client
            .get(format!("{}/models/{}", self.base_url, self.model))
            .header("x-goog-api-key", &self.api_key)
            .send()
            .await
            .map_err(http::network_decision_error)?;
        Ok(response.status().is_success())
    }
}

/// Image generation with a Gemini image model.
pub struct GeminiImageGenerator {
    base_url: String,
    api_key: String,
    model: String,
    client: reqwest::Client,
}

impl GeminiImageGenerator {
    pub fn new(api_key: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            base_url: GEMINI_BASE_URL.to_string(),
            api_key: api_key.into(),
            model: model.into(),
            client: http::client(),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    fn request_body(prompt: &str) -> serde_json::Value {
        serde_json::json!({
            "contents": [{ "role": "user", "parts": [{ "text": prompt }] }],
            "generationConfig": { "responseModalities": ["TEXT", "IMAGE"] },
        })
    }
}

#[async_trait]
impl ImageGenerator for GeminiImageGenerator {
    fn name(&self) -> &str {
        "gemini"
    }

    async fn generate(&self, prompt: &str) -> Result<GeneratedImage, GenerationError> {
        let url = format!("{}/models/{}:generateContent", self.base_url, self.model);
        debug!(model = %self.model, "Sending image request");

        let response = self
            .client
            .post(&url)
            .header("x-goog-api-key", &self.api_key)
            .json(&Self::request_body(prompt))
            .send()
            .await
            .map_err(http::network_generation_error)?;

        if !response.status().is_success() {
            return Err(http::generation_error("gemini", response).await);
        }

        let body: GenerateResponse = response
            .json()
            .await
            .map_err(|e| GenerationError::Decode(format!("failed to parse response: {e}")))?;
        body.image()
    }
}

// --- Gemini API types (internal) ---

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    #[serde(default)]
    content: Option<Content>,
}

#[derive(Debug, Deserialize)]
struct Content {
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Part {
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    inline_data: Option<InlineData>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct InlineData {
    mime_type: String,
    data: String,
}

impl GenerateResponse {
    fn parts(&self) -> impl Iterator<Item = &Part> {
        self.candidates
            .first()
            .and_then(|c| c.content.as_ref())
            .into_iter()
            .flat_map(|c| c.parts.iter())
    }

    /// All text parts of the first candidate, joined.
    fn text(&self) -> Option<String> {
        let text: String = self.parts().filter_map(|p| p.text.as_deref()).collect();
        (!text.trim().is_empty()).then_some(text)
    }

    fn image(&self) -> Result<GeneratedImage, GenerationError> {
        let inline = self
            .parts()
            .find_map(|p| p.inline_data.as_ref())
            .ok_or(GenerationError::EmptyResponse)?;
        let bytes = BASE64
            .decode(inline.data.trim())
            .map_err(|e| GenerationError::Decode(e.to_string()))?;
        Ok(GeneratedImage {
            bytes,
            mime_type: inline.mime_type.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use browserclaw_core::intent::IntentKind;

    #[test]
    fn endpoint_and_body() {
        let vision = GeminiVision::new("key", "gemini-3-flash-preview").with_temperature(0.2);
        assert_eq!(
            vision.endpoint(),
            "https://generativelanguage.googleapis.com/v1beta/models/gemini-3-flash-preview:generateContent"
        );

        let body = vision.request_body(b"jpeg", "open the menu", &[]);
        assert_eq!(body["generationConfig"]["responseMimeType"], "application/json");
        let parts = &body["contents"][0]["parts"];
        assert!(parts[0]["text"].as_str().unwrap().contains("open the menu"));
        assert_eq!(parts[1]["inlineData"]["mimeType"], "image/jpeg");
        assert_eq!(parts[1]["inlineData"]["data"], BASE64.encode(b"jpeg"));
        assert!(
            body["systemInstruction"]["parts"][0]["text"]
                .as_str()
                .unwrap()
                .contains("duckduckgo")
        );
    }

    #[test]
    fn text_parts_become_intent() {
        let response: GenerateResponse = serde_json::from_str(
            r#"{"candidates":[{"content":{"role":"model","parts":[
                {"text":"{\"action\":\"key\",\"key\":\"Enter\","},
                {"text":"\"reasoning\":\"submit search\"}"}
            ]}}]}"#,
        )
        .unwrap();
        let vision = GeminiVision::new("key", "m");
        let intent = vision.intent_from_response(response).unwrap();
        assert_eq!(
            intent.kind,
            IntentKind::PressKey {
                key: "Enter".into()
            }
        );
    }

    #[test]
    fn plan_request_and_response() {
        let body = GeminiVision::plan_body("compare two laptops", None);
        assert!(body.get("systemInstruction").is_none());
        assert_eq!(body["generationConfig"]["responseMimeType"], "application/json");
        assert!(body["contents"][0]["parts"][0]["text"]
            .as_str()
            .unwrap()
            .contains("compare two laptops"));

        let response: GenerateResponse = serde_json::from_str(
            r#"{"candidates":[{"content":{"parts":[
                {"text":"{\"plan\":[\"open the first review\"],\"estimated_steps\":4}"}
            ]}}]}"#,
        )
        .unwrap();
        let plan = GeminiVision::new("key", "m").plan_from_response(response).unwrap();
        assert_eq!(plan.steps, vec!["open the first review"]);
        assert_eq!(plan.estimated_steps, 4);
    }

    #[test]
    fn blocked_response_is_invalid() {
        let response: GenerateResponse =
            serde_json::from_str(r#"{"promptFeedback":{"blockReason":"SAFETY"}}"#).unwrap();
        let vision = GeminiVision::new("key", "m");
        assert!(matches!(
            vision.intent_from_response(response),
            Err(DecisionError::InvalidResponse(_))
        ));
    }

    #[test]
    fn inline_image_is_decoded() {
        let response: GenerateResponse = serde_json::from_value(serde_json::json!({
            "candidates": [{ "content": { "parts": [
                { "text": "Here you go" },
                { "inlineData": { "mimeType": "image/png", "data": BASE64.encode(b"png") } }
            ]}}]
        }))
        .unwrap();
        let image = response.image().unwrap();
        assert_eq!(image.bytes, b"png");
        assert_eq!(image.mime_type, "image/png");
    }

    #[test]
    fn text_only_image_reply_is_empty() {
        let response: GenerateResponse = serde_json::from_str(
            r#"{"candidates":[{"content":{"parts":[{"text":"I can't draw that."}]}}]}"#,
        )
        .unwrap();
        assert!(matches!(response.image(), Err(GenerationError::EmptyResponse)));
    }

    #[test]
    fn image_request_asks_for_image_modality() {
        let body = GeminiImageGenerator::request_body("a red fox");
        assert_eq!(body["contents"][0]["parts"][0]["text"], "a red fox");
        assert_eq!(body["generationConfig"]["responseModalities"][1], "IMAGE");
    }
}
