//! OpenAI-compatible chat-completions narrator.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{biography_prompt, era_name_prompt, NarrationError, Narrator};
use crate::config::NarratorSettings;
use crate::eras::model::Era;

/// Narrator backed by a `/chat/completions` endpoint (Groq, OpenAI, a local gateway).
pub struct ChatNarrator {
    client: Client,
    base_url: String,
    api_key: Option<String>,
    model: String,
}

impl ChatNarrator {
    pub fn new(settings: &NarratorSettings) -> Self {
        Self {
            client: Client::new(),
            base_url: settings.base_url.trim_end_matches('/').to_string(),
            api_key: settings.api_key.clone(),
            model: settings.model.clone(),
        }
    }

    async fn complete(&self, prompt: String, temperature: f32, max_tokens: u32) -> Result<String, NarrationError> {
        let url = format!("{}/chat/completions", self.base_url);
        let request = ChatRequest {
            model: &self.model,
            messages: vec![ChatMessage {
                role: "user",
                content: prompt,
            }],
            temperature,
            max_tokens,
        };

        debug!(model = %self.model, "sending completion request");

        let mut builder = self.client.post(&url).json(&request);
        if let Some(ref key) = self.api_key {
            builder = builder.header("Authorization", format!("Bearer {}", key));
        }

        let res = builder
            .send()
            .await
            .map_err(|e| NarrationError::Connection(e.to_string()))?;

        let status = res.status();
        if !status.is_success() {
            let body = res.text().await.unwrap_or_default();
            return Err(NarrationError::Api {
                status: status.as_u16(),
                message: body,
            });
        }

        let body: ChatResponse = res
            .json()
            .await
            .map_err(|e| NarrationError::InvalidResponse(format!("completion parse failed: {}", e)))?;

        Ok(first_choice_text(body))
    }
}

#[async_trait]
impl Narrator for ChatNarrator {
    async fn narrate(&self, era: &Era) -> Result<String, NarrationError> {
        self.complete(biography_prompt(era), 0.7, 256).await
    }

    async fn name_era(&self, era: &Era) -> Result<String, NarrationError> {
        self.complete(era_name_prompt(era), 0.9, 24).await
    }
}

fn first_choice_text(body: ChatResponse) -> String {
    body.choices
        .into_iter()
        .next()
        .and_then(|c| c.message.content)
        .map(|s| s.trim().to_string())
        .unwrap_or_default()
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f32,
    max_tokens: u32,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: String,
}

#[derive(Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Deserialize)]
struct ChatChoiceMessage {
    content: Option<String>,
}
