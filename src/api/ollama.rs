// Ollama API client

use anyhow::{Context, Result};
use bytes::Bytes;
use futures::stream::{Stream, StreamExt};
use regex::Regex;
use reqwest::Client;
use serde::Serialize;
use serde_json::Value;
use std::pin::Pin;
use std::sync::LazyLock;
use std::time::Duration;
use tracing::{debug, warn};

use crate::models::OllamaSettings;

/// `num_predict` of the blocking request.
const BLOCKING_NUM_PREDICT: i64 = 512;
const DEFAULT_TEMPERATURE: f64 = 0.7;
const CONNECT_TIMEOUT: Duration = Duration::from_secs(20);

static LINE_BREAK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\r\n|\n|\r").expect("valid regex"));

pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes>> + Send>>;

#[derive(Debug, Clone)]
pub struct OllamaClient {
    settings: OllamaSettings,
    client: Client,
}

#[derive(Debug, Serialize)]
pub struct GenerateRequest {
    pub model: String,
    pub prompt: String,
    pub stream: bool,
    pub options: GenerateOptions,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub format: Option<Value>,
}

#[derive(Debug, Serialize)]
pub struct GenerateOptions {
    pub num_predict: i64,
    pub temperature: f64,
}

impl OllamaClient {
    pub fn new(settings: OllamaSettings) -> Result<Self> {
        let client = Client::builder()
            .timeout(settings.effective_timeout())
            .connect_timeout(CONNECT_TIMEOUT)
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self { settings, client })
    }

    pub const fn settings(&self) -> &OllamaSettings {
        &self.settings
    }

    /// Body of a streaming request. A configured schema switches to
    /// deterministic structured output.
    pub fn stream_request(&self, prompt: &str) -> GenerateRequest {
        let format = self.settings.schema_value();
        let temperature = if format.is_some() { 0.0 } else { DEFAULT_TEMPERATURE };
        GenerateRequest {
            model: self.settings.model.clone(),
            prompt: prompt.to_string(),
            stream: true,
            options: GenerateOptions {
                num_predict: self.settings.effective_num_predict(),
                temperature,
            },
            format,
        }
    }

    pub fn blocking_request(&self, prompt: &str) -> GenerateRequest {
        GenerateRequest {
            model: self.settings.model.clone(),
            prompt: prompt.to_string(),
            stream: false,
            options: GenerateOptions {
                num_predict: BLOCKING_NUM_PREDICT,
                temperature: DEFAULT_TEMPERATURE,
            },
            format: self.settings.schema_value(),
        }
    }

    /// Start a streaming generation and hand back the raw NDJSON body.
    pub async fn generate_bytes(&self, prompt: &str) -> Result<ByteStream> {
        let url = self.settings.generate_url();
        let request = self.stream_request(prompt);
        debug!(%url, model = %request.model, "opening upstream stream");

        let response = self
            .client
            .post(&url)
            .json(&request)
            .send()
            .await
            .context("Failed to send generate request")?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            anyhow::bail!("{}", upstream_error(status, &text));
        }

        let stream = response
            .bytes_stream()
            .map(|chunk| chunk.map_err(|e| anyhow::anyhow!("Stream error: {e}")));

        Ok(Box::pin(stream))
    }

    /// Blocking generation. Returns the reply text.
    pub async fn generate(&self, prompt: &str) -> Result<String> {
        let url = self.settings.generate_url();
        let request = self.blocking_request(prompt);
        let has_schema = request.format.is_some();

        let response = self
            .client
            .post(&url)
            .json(&request)
            .send()
            .await
            .context("Failed to send generate request")?;

        let raw = response
            .text()
            .await
            .context("Failed to read generate response")?;

        Ok(process_reply(&raw, has_schema))
    }

    /// [`Self::generate`] with failures turned into readable text.
    pub async fn complete(&self, prompt: &str) -> String {
        if !self.settings.is_configured() {
            return "Ollama endpoint not configured.".to_string();
        }
        match self.generate(prompt).await {
            Ok(text) => text,
            Err(e) => {
                warn!(error = %e, "ollama request failed");
                format!("Request error: {e:#}")
            }
        }
    }

    pub async fn health_check(&self) -> Result<bool> {
        let url = format!("{}/api/tags", self.settings.endpoint.trim_end_matches('/'));

        Ok(self
            .client
            .get(&url)
            .send()
            .await
            .is_ok_and(|response| response.status().is_success()))
    }
}

fn upstream_error(status: reqwest::StatusCode, body: &str) -> String {
    serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|v| v.get("error").and_then(Value::as_str).map(str::to_string))
        .unwrap_or_else(|| format!("upstream returned {status}"))
}

/// Extract the reply text from a blocking `/api/generate` body.
///
/// Accepts a single JSON object or an NDJSON stream whose `response` fields
/// are concatenated. With a schema, a reply that parses as JSON is
/// re-serialized pretty-printed.
pub fn process_reply(raw: &str, has_schema: bool) -> String {
    let trimmed = raw.trim();

    if trimmed.starts_with('{') {
        if let Ok(json) = serde_json::from_str::<Value>(trimmed) {
            if let Some(text) = json.get("response").and_then(Value::as_str) {
                if has_schema {
                    if let Some(pretty) = pretty_json(text) {
                        return pretty;
                    }
                }
                return text.to_string();
            }
        }
    }

    let mut full_text = String::new();
    for line in LINE_BREAK.split(raw).filter(|line| !line.is_empty()) {
        let Ok(Value::Object(record)) = serde_json::from_str::<Value>(line) else {
            continue;
        };
        if let Some(text) = record.get("response").and_then(Value::as_str) {
            full_text.push_str(text);
        }
        match record.get("error") {
            None | Some(Value::Null) => {}
            Some(Value::String(message)) => return format!("Ollama Error: {message}"),
            Some(other) => return format!("Ollama Error: {other}"),
        }
    }

    if has_schema {
        if let (Some(start), Some(end)) = (full_text.find('{'), full_text.rfind('}')) {
            if start < end {
                if let Some(pretty) = pretty_json(&full_text[start..=end]) {
                    return pretty;
                }
            }
        }
    }

    if full_text.is_empty() {
        raw.to_string()
    } else {
        full_text
    }
}

fn pretty_json(text: &str) -> Option<String> {
    let value = serde_json::from_str::<Value>(text).ok()?;
    serde_json::to_string_pretty(&value).ok()
}
