use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;

use crate::api::Provider;

const MIN_TIMEOUT_SECS: u64 = 30;
const DEFAULT_TIMEOUT_SECS: u64 = 180;
const DEFAULT_NUM_PREDICT: i64 = 256;
const DEFAULT_INACTIVITY_SECS: u64 = 30;
const DEFAULT_WATCHDOG_SECS: u64 = 2;

pub const DEFAULT_SYSTEM_ROLE: &str =
    "You are an experienced teacher who writes clear, well-structured lesson plans in Markdown.";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub ollama: OllamaSettings,
    #[serde(default)]
    pub openai: OpenAiSettings,
    #[serde(default)]
    pub server: ServerSettings,
    #[serde(default)]
    pub client: ClientSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OllamaSettings {
    pub endpoint: String,
    pub model: String,
    pub num_predict: i64,
    pub timeout_secs: u64,
    /// JSON schema passed as the `format` option. Ignored unless it parses
    /// as a JSON object or array.
    pub schema: Option<String>,
}

impl Default for OllamaSettings {
    fn default() -> Self {
        Self {
            endpoint: "http://localhost:11434".to_string(),
            model: "llama3".to_string(),
            num_predict: DEFAULT_NUM_PREDICT,
            timeout_secs: DEFAULT_TIMEOUT_SECS,
            schema: None,
        }
    }
}

impl OllamaSettings {
    pub fn is_configured(&self) -> bool {
        !self.endpoint.trim().is_empty() && !self.model.trim().is_empty()
    }

    pub const fn effective_num_predict(&self) -> i64 {
        if self.num_predict <= 0 {
            DEFAULT_NUM_PREDICT
        } else {
            self.num_predict
        }
    }

    pub const fn effective_timeout(&self) -> Duration {
        if self.timeout_secs < MIN_TIMEOUT_SECS {
            Duration::from_secs(DEFAULT_TIMEOUT_SECS)
        } else {
            Duration::from_secs(self.timeout_secs)
        }
    }

    pub fn schema_value(&self) -> Option<Value> {
        let raw = self.schema.as_deref()?.trim();
        if raw.is_empty() {
            return None;
        }
        match serde_json::from_str::<Value>(raw) {
            Ok(value @ (Value::Object(_) | Value::Array(_))) => Some(value),
            _ => None,
        }
    }

    pub fn generate_url(&self) -> String {
        format!("{}/api/generate", self.endpoint.trim_end_matches('/'))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OpenAiSettings {
    pub api_key: String,
    pub model: String,
    pub base_url: String,
    pub system_role: String,
}

impl Default for OpenAiSettings {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            model: "gpt-3.5-turbo".to_string(),
            base_url: "https://api.openai.com/v1".to_string(),
            system_role: DEFAULT_SYSTEM_ROLE.to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    pub bind: String,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1:8080".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientSettings {
    /// SSE endpoint. Without one every request goes through the blocking path.
    pub stream_url: Option<String>,
    pub provider: Provider,
    pub courseid: i64,
    pub inactivity_timeout_secs: u64,
    pub watchdog_interval_secs: u64,
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            stream_url: Some("http://127.0.0.1:8080/stream".to_string()),
            provider: Provider::Ollama,
            courseid: 1,
            inactivity_timeout_secs: DEFAULT_INACTIVITY_SECS,
            watchdog_interval_secs: DEFAULT_WATCHDOG_SECS,
        }
    }
}

impl ClientSettings {
    /// Zero falls back to the default.
    pub const fn inactivity_timeout(&self) -> Duration {
        if self.inactivity_timeout_secs == 0 {
            Duration::from_secs(DEFAULT_INACTIVITY_SECS)
        } else {
            Duration::from_secs(self.inactivity_timeout_secs)
        }
    }

    /// Never zero, the ticker cannot run with an empty period.
    pub const fn watchdog_interval(&self) -> Duration {
        if self.watchdog_interval_secs == 0 {
            Duration::from_secs(DEFAULT_WATCHDOG_SECS)
        } else {
            Duration::from_secs(self.watchdog_interval_secs)
        }
    }
}

/// Parameters of one lesson generation request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LessonRequest {
    pub courseid: i64,
    #[serde(default)]
    pub provider: Provider,
    #[serde(default)]
    pub prompt: String,
    #[serde(default)]
    pub topic: String,
    #[serde(default)]
    pub lesson: String,
    #[serde(default)]
    pub outcomes: String,
}

impl LessonRequest {
    pub fn new(courseid: i64, provider: Provider, prompt: impl Into<String>) -> Self {
        Self {
            courseid,
            provider,
            prompt: prompt.into(),
            topic: String::new(),
            lesson: String::new(),
            outcomes: String::new(),
        }
    }

    /// The prompt to send, built from the form fields when none was given.
    pub fn effective_prompt(&self) -> String {
        if self.prompt.trim().is_empty() {
            format!(
                "Topic: {}\nLesson: {}\nOutcomes: {}",
                self.topic, self.lesson, self.outcomes
            )
        } else {
            self.prompt.clone()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_app_config_default() {
        let config = AppConfig::default();
        assert_eq!(config.ollama.endpoint, "http://localhost:11434");
        assert_eq!(config.ollama.model, "llama3");
        assert_eq!(config.client.inactivity_timeout(), Duration::from_secs(30));
        assert_eq!(config.client.watchdog_interval(), Duration::from_secs(2));
        assert_eq!(config.client.provider, Provider::Ollama);
    }

    #[test]
    fn test_num_predict_clamp() {
        let mut settings = OllamaSettings {
            num_predict: 0,
            ..Default::default()
        };
        assert_eq!(settings.effective_num_predict(), 256);
        settings.num_predict = -5;
        assert_eq!(settings.effective_num_predict(), 256);
        settings.num_predict = 1024;
        assert_eq!(settings.effective_num_predict(), 1024);
    }

    #[test]
    fn test_timeout_clamp() {
        let mut settings = OllamaSettings {
            timeout_secs: 10,
            ..Default::default()
        };
        assert_eq!(settings.effective_timeout(), Duration::from_secs(180));
        settings.timeout_secs = 45;
        assert_eq!(settings.effective_timeout(), Duration::from_secs(45));
    }

    #[test]
    fn test_client_timing_clamp() {
        let settings = ClientSettings {
            inactivity_timeout_secs: 0,
            watchdog_interval_secs: 0,
            ..Default::default()
        };
        assert_eq!(settings.inactivity_timeout(), Duration::from_secs(30));
        assert_eq!(settings.watchdog_interval(), Duration::from_secs(2));

        let settings = ClientSettings {
            inactivity_timeout_secs: 60,
            watchdog_interval_secs: 5,
            ..Default::default()
        };
        assert_eq!(settings.inactivity_timeout(), Duration::from_secs(60));
        assert_eq!(settings.watchdog_interval(), Duration::from_secs(5));
    }

    #[test]
    fn test_schema_value_accepts_only_objects_and_arrays() {
        let mut settings = OllamaSettings::default();
        assert!(settings.schema_value().is_none());
        settings.schema = Some(r#"{"type":"object"}"#.to_string());
        assert!(settings.schema_value().is_some());
        settings.schema = Some("\"json\"".to_string());
        assert!(settings.schema_value().is_none());
        settings.schema = Some("{broken".to_string());
        assert!(settings.schema_value().is_none());
    }

    #[test]
    fn test_generate_url_trims_trailing_slash() {
        let settings = OllamaSettings {
            endpoint: "http://host:11434/".to_string(),
            ..Default::default()
        };
        assert_eq!(settings.generate_url(), "http://host:11434/api/generate");
    }

    #[test]
    fn test_prompt_is_synthesized_when_empty() {
        let mut request = LessonRequest::new(3, Provider::Ollama, "");
        request.topic = "Fractions".to_string();
        request.lesson = "Halves".to_string();
        request.outcomes = "Compare halves".to_string();
        assert_eq!(
            request.effective_prompt(),
            "Topic: Fractions\nLesson: Halves\nOutcomes: Compare halves"
        );

        let request = LessonRequest::new(3, Provider::Ollama, "Write a plan");
        assert_eq!(request.effective_prompt(), "Write a plan");
    }

    #[test]
    fn test_partial_config_fills_defaults() {
        let config: AppConfig = toml::from_str("[ollama]\nmodel = \"qwen3:4b\"\n").unwrap();
        assert_eq!(config.ollama.model, "qwen3:4b");
        assert_eq!(config.ollama.endpoint, "http://localhost:11434");
        assert_eq!(config.server.bind, "127.0.0.1:8080");
    }
}
