use std::time::Duration;

use futures::future::BoxFuture;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

use atomflow_core::config::ModelConfig;
use atomflow_core::error::{AtomflowError, Result};
use atomflow_core::traits::ChatModel;
use atomflow_core::types::{ChatMessage, ChatResponse};

const DEFAULT_BASE_URL: &str = "http://localhost:11434";

/// Ollama chat client (`POST /api/chat`, non-streaming).
pub struct OllamaClient {
    http: Client,
    base_url: String,
}

impl OllamaClient {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Self {
        Self {
            http: Client::builder()
                .timeout(timeout)
                .build()
                .unwrap_or_else(|_| Client::new()),
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    pub fn from_config(config: &ModelConfig) -> Self {
        Self::new(&config.base_url, Duration::from_secs(config.timeout_secs))
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

impl Default for OllamaClient {
    fn default() -> Self {
        Self::new(DEFAULT_BASE_URL, Duration::from_secs(300))
    }
}

// Request types
#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    stream: bool,
}

// Response types
#[derive(Deserialize, Debug)]
struct ChatReply {
    #[serde(default)]
    model: Option<String>,
    message: ReplyMessage,
}

#[derive(Deserialize, Debug)]
struct ReplyMessage {
    #[serde(default)]
    content: String,
}

fn parse_reply(body: &str, requested_model: &str) -> Result<ChatResponse> {
    let reply: ChatReply =
        serde_json::from_str(body).map_err(|e| AtomflowError::ModelParse(e.to_string()))?;
    Ok(ChatResponse {
        content: reply.message.content,
        model: reply.model.unwrap_or_else(|| requested_model.to_string()),
    })
}

fn request_error(e: reqwest::Error) -> AtomflowError {
    if e.is_connect() {
        AtomflowError::ModelUnavailable(e.to_string())
    } else if e.is_timeout() {
        AtomflowError::ModelTimeout(e.to_string())
    } else {
        AtomflowError::ModelRequest {
            status: e.status().map(|s| s.as_u16()),
            message: e.to_string(),
        }
    }
}

impl ChatModel for OllamaClient {
    fn name(&self) -> &str {
        "ollama"
    }

    fn chat(&self, model: &str, messages: Vec<ChatMessage>) -> BoxFuture<'_, Result<ChatResponse>> {
        let model = model.to_string();

        Box::pin(async move {
            let url = format!("{}/api/chat", self.base_url);
            let body = ChatRequest {
                model: &model,
                messages: &messages,
                stream: false,
            };

            debug!(url = %url, model = %model, "Calling model server");

            let response = self
                .http
                .post(&url)
                .json(&body)
                .send()
                .await
                .map_err(request_error)?;

            let status = response.status();
            let text = response.text().await.map_err(request_error)?;

            if !status.is_success() {
                return Err(AtomflowError::ModelRequest {
                    status: Some(status.as_u16()),
                    message: format!("HTTP {}: {}", status, text),
                });
            }

            parse_reply(&text, &model)
        })
    }

    fn ping(&self) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            let url = format!("{}/api/tags", self.base_url);
            let response = self.http.get(&url).send().await.map_err(request_error)?;
            if response.status().is_success() {
                Ok(())
            } else {
                Err(AtomflowError::ModelUnavailable(format!(
                    "HTTP {} from {}",
                    response.status(),
                    url
                )))
            }
        })
    }
}
