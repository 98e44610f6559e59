//! OpenAI-compatible chat completions client.

use assembly::{GenerationError, TextGenerator};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::join_url;
use crate::config::LlmSettings;

const SYSTEM_PROMPT: &str =
    "You write short, friendly social media posts for a retro video game account. \
     Reply with the post text only.";

pub struct ChatCompletionsGenerator {
    client: reqwest::Client,
    url: String,
    model: String,
    temperature: f32,
    api_key: Option<String>,
}

impl ChatCompletionsGenerator {
    pub fn new(client: reqwest::Client, settings: &LlmSettings) -> Self {
        Self {
            client,
            url: join_url(&settings.base_url, "chat/completions"),
            model: settings.model.clone(),
            temperature: settings.temperature,
            api_key: settings.api_key.clone(),
        }
    }

    fn request_body<'a>(&'a self, prompt: &'a str, max_tokens: u32) -> ChatRequest<'a> {
        ChatRequest {
            model: &self.model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: SYSTEM_PROMPT,
                },
                ChatMessage {
                    role: "user",
                    content: prompt,
                },
            ],
            max_tokens,
            temperature: self.temperature,
        }
    }
}

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
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    #[serde(default)]
    content: Option<String>,
}

fn first_content(response: ChatResponse) -> Result<String, GenerationError> {
    response
        .choices
        .into_iter()
        .next()
        .and_then(|c| c.message.content)
        .map(|text| text.trim().to_string())
        .filter(|text| !text.is_empty())
        .ok_or(GenerationError::Empty)
}

#[async_trait]
impl TextGenerator for ChatCompletionsGenerator {
    async fn generate(&self, prompt: &str, max_tokens: u32) -> Result<String, GenerationError> {
        let start = std::time::Instant::now();
        let mut request = self
            .client
            .post(&self.url)
            .json(&self.request_body(prompt, max_tokens));
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request
            .send()
            .await
            .map_err(|e| GenerationError::Request(e.to_string()))?;

        let status = response.status();
        if status.as_u16() == 429 {
            let body = response.text().await.unwrap_or_default();
            return Err(GenerationError::Quota(body));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(GenerationError::Request(format!(
                "chat completions error ({status}): {body}"
            )));
        }

        let parsed: ChatResponse = response
            .json()
            .await
            .map_err(|e| GenerationError::Request(format!("response parse error: {e}")))?;
        let text = first_content(parsed)?;
        tracing::debug!(
            model = %self.model,
            chars = text.chars().count(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Text generated"
        );
        Ok(text)
    }
}
