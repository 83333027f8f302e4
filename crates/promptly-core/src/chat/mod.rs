use std::{fmt, str::FromStr};

use anyhow::Result;
use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt};
use serde::{Deserialize, Serialize};

/// How the CLI renders a response.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
}

impl OutputFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            OutputFormat::Text => "text",
            OutputFormat::Json => "json",
        }
    }
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "text" => Ok(OutputFormat::Text),
            "json" => Ok(OutputFormat::Json),
            other => Err(format!("unknown output format `{other}` (expected text or json)")),
        }
    }
}

/// A single prompt sent to a chat model.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChatRequest {
    /// Free-form user prompt.
    pub prompt: String,
    /// Optional system prompt; clients supply their own when absent.
    pub system: Option<String>,
    pub model: String,
    pub temperature: f32,
    pub max_tokens: Option<u32>,
    /// Ask the model to reply with a JSON object.
    pub json_reply: bool,
}

/// Completed response payload.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChatResponse {
    /// Model that produced the answer, as reported by the server.
    pub model: String,
    pub content: String,
}

/// Contract for any chat backend (OpenAI-compatible, stub).
#[async_trait]
pub trait ChatClient: Send + Sync {
    /// Short name used for logging.
    fn name(&self) -> &'static str;

    /// Send the request and wait for the full answer.
    async fn complete(&self, request: ChatRequest) -> Result<ChatResponse>;

    /// Send the request and yield content deltas as they arrive.
    async fn stream(&self, request: ChatRequest) -> Result<BoxStream<'static, Result<String>>>;
}

/// Client that echoes the prompt; useful for tests and offline smoke checks.
pub struct EchoClient;

impl EchoClient {
    fn answer(request: &ChatRequest) -> String {
        format!("Echo: {}", request.prompt)
    }
}

#[async_trait]
impl ChatClient for EchoClient {
    fn name(&self) -> &'static str {
        "echo"
    }

    async fn complete(&self, request: ChatRequest) -> Result<ChatResponse> {
        Ok(ChatResponse {
            model: request.model.clone(),
            content: Self::answer(&request),
        })
    }

    async fn stream(&self, request: ChatRequest) -> Result<BoxStream<'static, Result<String>>> {
        let words: Vec<Result<String>> = Self::answer(&request)
            .split_inclusive(' ')
            .map(|word| Ok(word.to_string()))
            .collect();
        Ok(stream::iter(words).boxed())
    }
}
