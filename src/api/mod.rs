// Model provider clients

pub mod ollama;
pub mod openai;

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::models::AppConfig;

pub use ollama::OllamaClient;
pub use openai::OpenAiClient;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    #[default]
    Ollama,
    OpenAi,
}

impl Provider {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Ollama => "ollama",
            Self::OpenAi => "openai",
        }
    }

    /// Only the local backend produces an incremental token stream.
    pub const fn supports_streaming(self) -> bool {
        matches!(self, Self::Ollama)
    }

    pub const fn toggle(self) -> Self {
        match self {
            Self::Ollama => Self::OpenAi,
            Self::OpenAi => Self::Ollama,
        }
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Unknown provider specified.")]
pub struct UnknownProvider(pub String);

impl FromStr for Provider {
    type Err = UnknownProvider;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "ollama" => Ok(Self::Ollama),
            "openai" => Ok(Self::OpenAi),
            _ => Err(UnknownProvider(s.to_string())),
        }
    }
}

/// One blocking request that returns either the reply text or a readable
/// error message. Failures are never surfaced as `Err`.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Completion: Send + Sync {
    async fn send(&self, provider: Provider, prompt: &str) -> String;
}

/// Dispatches completions to the configured backends.
#[derive(Debug, Clone)]
pub struct ProviderClient {
    ollama: OllamaClient,
    openai: OpenAiClient,
}

impl ProviderClient {
    pub fn new(config: &AppConfig) -> Result<Self> {
        Ok(Self {
            ollama: OllamaClient::new(config.ollama.clone())?,
            openai: OpenAiClient::new(config.openai.clone())?,
        })
    }
}

#[async_trait]
impl Completion for ProviderClient {
    async fn send(&self, provider: Provider, prompt: &str) -> String {
        match provider {
            Provider::Ollama => self.ollama.complete(prompt).await,
            Provider::OpenAi => self.openai.complete(prompt).await,
        }
    }
}
