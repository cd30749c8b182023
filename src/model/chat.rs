use std::{str::FromStr, time::Duration};

use log::debug;
use serde::{Deserialize, Serialize};

use super::{CompletionRequest, GenerativeModel};
use crate::error::ModelError;

/// Service replies are truncated to this many characters in errors
const MAX_ERROR_BODY: usize = 512;

/// Chat completions API flavor
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
pub enum Flavor {
    /// OpenAI compatible `{endpoint}/chat/completions`, bearer token
    #[default]
    OpenAi,
    /// Azure OpenAI deployment, `api-key` header
    Azure,
}

impl FromStr for Flavor {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "openai" => Ok(Self::OpenAi),
            "azure" => Ok(Self::Azure),
            other => Err(format!("unknown model flavor \"{}\"", other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ModelSettings {
    /// Service base URL
    pub endpoint: Option<String>,
    pub api_key: Option<String>,
    /// Model name (deployment name, for Azure)
    pub model: Option<String>,
    /// Azure API version
    pub api_version: String,
    pub flavor: Flavor,
    pub temperature: f64,
    pub max_tokens: u32,
    /// Request timeout
    pub timeout: Duration,
}

impl Default for ModelSettings {
    fn default() -> Self {
        Self {
            endpoint: None,
            api_key: None,
            model: None,
            api_version: "2024-02-01".to_string(),
            flavor: Flavor::default(),
            temperature: 0.7,
            max_tokens: 4096,
            timeout: Duration::from_secs(120),
        }
    }
}

impl ModelSettings {
    pub fn is_configured(&self) -> bool {
        self.url().is_some()
    }

    /// Chat completions URL
    fn url(&self) -> Option<String> {
        let endpoint = self.endpoint.as_ref()?.trim_end_matches('/');
        let model = self.model.as_ref()?;

        match self.flavor {
            Flavor::OpenAi => Some(format!("{}/chat/completions", endpoint)),
            Flavor::Azure => Some(format!(
                "{}/openai/deployments/{}/chat/completions?api-version={}",
                endpoint, model, self.api_version
            )),
        }
    }
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

/// Request body for /chat/completions
#[derive(Serialize)]
struct ChatRequest<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    model: Option<&'a str>,
    messages: Vec<ChatMessage<'a>>,
    temperature: f64,
    max_tokens: u32,
}

/// Response body from /chat/completions
#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatReply,
}

#[derive(Deserialize)]
struct ChatReply {
    #[serde(default)]
    content: Option<String>,
}

/// HTTP chat completions client. The HTTP client is built per request,
/// so nothing is held between two attempts.
#[derive(Debug, Clone)]
pub struct ChatModel {
    settings: ModelSettings,
}

impl ChatModel {
    pub fn new(settings: ModelSettings) -> Self {
        Self { settings }
    }

    fn body<'a>(&'a self, request: &'a CompletionRequest) -> ChatRequest<'a> {
        ChatRequest {
            model: match self.settings.flavor {
                Flavor::OpenAi => self.settings.model.as_deref(),
                Flavor::Azure => None,
            },
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: &request.system,
                },
                ChatMessage {
                    role: "user",
                    content: &request.user,
                },
            ],
            temperature: self.settings.temperature,
            max_tokens: self.settings.max_tokens,
        }
    }
}

impl GenerativeModel for ChatModel {
    fn complete(&self, request: &CompletionRequest) -> Result<String, ModelError> {
        let url = self.settings.url().ok_or(ModelError::NotConfigured)?;

        let client = reqwest::blocking::Client::builder()
            .timeout(self.settings.timeout)
            .build()
            .map_err(|e| ModelError::Http(e.to_string()))?;

        let mut builder = client.post(&url).json(&self.body(request));

        if let Some(key) = &self.settings.api_key {
            builder = match self.settings.flavor {
                Flavor::OpenAi => builder.bearer_auth(key),
                Flavor::Azure => builder.header("api-key", key),
            };
        }

        debug!("POST {} ({} prompt bytes)", url, request.user.len());

        let response = builder.send().map_err(|e| {
            if e.is_connect() {
                ModelError::Connection(url.clone())
            } else if e.is_timeout() {
                ModelError::Timeout(self.settings.timeout.as_secs())
            } else {
                ModelError::Http(e.to_string())
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            return Err(ModelError::Status {
                status: status.as_u16(),
                body: body.chars().take(MAX_ERROR_BODY).collect(),
            });
        }

        let parsed: ChatResponse = response
            .json()
            .map_err(|e| ModelError::Response(e.to_string()))?;

        parsed
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .filter(|content| !content.trim().is_empty())
            .ok_or_else(|| ModelError::Response("no completion content".to_string()))
    }
}
