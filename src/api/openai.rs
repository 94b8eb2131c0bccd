// OpenAI chat completions client

use anyhow::{Context, Result};
use reqwest::Client;
use serde::Serialize;
use serde_json::Value;
use std::time::Duration;
use tracing::warn;

use crate::models::OpenAiSettings;

pub const NO_API_KEY: &str = "No OpenAI API key configured.";

const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);
const CONNECT_TIMEOUT: Duration = Duration::from_secs(20);
/// How much of an unrecognized body is echoed back.
const PREVIEW_CHARS: usize = 100;

#[derive(Debug, Clone)]
pub struct OpenAiClient {
    settings: OpenAiSettings,
    client: Client,
}

#[derive(Debug, Serialize)]
pub struct ChatRequest<'a> {
    pub model: &'a str,
    pub messages: Vec<ChatMessage<'a>>,
    pub temperature: f64,
}

#[derive(Debug, Serialize)]
pub struct ChatMessage<'a> {
    pub role: &'static str,
    pub content: &'a str,
}

impl OpenAiClient {
    pub fn new(settings: OpenAiSettings) -> Result<Self> {
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .connect_timeout(CONNECT_TIMEOUT)
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self { settings, client })
    }

    pub fn chat_request<'a>(&'a self, prompt: &'a str) -> ChatRequest<'a> {
        ChatRequest {
            model: &self.settings.model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: &self.settings.system_role,
                },
                ChatMessage {
                    role: "user",
                    content: prompt,
                },
            ],
            temperature: 0.7,
        }
    }

    /// Send one chat completion. Every failure comes back as readable text.
    pub async fn complete(&self, prompt: &str) -> String {
        if self.settings.api_key.trim().is_empty() {
            return NO_API_KEY.to_string();
        }

        match self.post(prompt).await {
            Ok(body) => extract_reply(&body),
            Err(e) => {
                warn!(error = %e, "openai request failed");
                format!("Request error: {e:#}")
            }
        }
    }

    async fn post(&self, prompt: &str) -> Result<String> {
        let url = format!(
            "{}/chat/completions",
            self.settings.base_url.trim_end_matches('/')
        );

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.settings.api_key)
            .json(&self.chat_request(prompt))
            .send()
            .await
            .context("Failed to send chat request")?;

        response
            .text()
            .await
            .context("Failed to read chat response")
    }
}

/// Pull the reply out of a chat completions body.
pub fn extract_reply(body: &str) -> String {
    let json = serde_json::from_str::<Value>(body).unwrap_or(Value::Null);

    if let Some(content) = json
        .pointer("/choices/0/message/content")
        .and_then(Value::as_str)
    {
        return content.to_string();
    }
    if let Some(message) = json.pointer("/error/message").and_then(Value::as_str) {
        return format!("API Error: {message}");
    }

    let preview: String = body.chars().take(PREVIEW_CHARS).collect();
    format!("Unknown response format: {preview}...")
}
