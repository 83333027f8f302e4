use anyhow::{Context, Result};
use async_openai::{
    config::OpenAIConfig,
    types::chat::{
        ChatCompletionRequestMessage, ChatCompletionRequestSystemMessageArgs,
        ChatCompletionRequestSystemMessageContent, ChatCompletionRequestUserMessageArgs,
        ChatCompletionRequestUserMessageContent, CreateChatCompletionRequest,
        CreateChatCompletionRequestArgs,
    },
    Client,
};
use async_trait::async_trait;
use futures::stream::{BoxStream, StreamExt};
use promptly_core::chat::{ChatClient, ChatRequest, ChatResponse};
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

const DEFAULT_SYSTEM_PROMPT: &str =
    "You are a concise, helpful assistant answering from the command line.";
const JSON_REPLY_INSTRUCTION: &str = "Reply with a single valid JSON object and nothing else.";

/// Connection settings for an OpenAI-compatible endpoint.
#[derive(Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct OpenAiSettings {
    pub api_key: String,
    /// Overrides the default `https://api.openai.com/v1`.
    pub api_base: Option<String>,
}

impl std::fmt::Debug for OpenAiSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAiSettings")
            .field("api_key", &"<redacted>")
            .field("api_base", &self.api_base)
            .finish()
    }
}

impl OpenAiSettings {
    pub fn new(api_key: String) -> Self {
        Self {
            api_key,
            api_base: None,
        }
    }
}

/// Chat-completions client built on `async-openai`.
pub struct OpenAiChatClient {
    client: Client<OpenAIConfig>,
}

impl OpenAiChatClient {
    pub fn new(settings: OpenAiSettings) -> Result<Self> {
        let mut config = OpenAIConfig::new().with_api_key(&settings.api_key);
        if let Some(base) = settings.api_base.as_deref().filter(|b| !b.trim().is_empty()) {
            config = config.with_api_base(base.trim_end_matches('/'));
        }
        let client = Client::with_config(config);
        Ok(Self { client })
    }

    fn build_request(request: ChatRequest) -> Result<CreateChatCompletionRequest> {
        let mut system_prompt = request
            .system
            .clone()
            .unwrap_or_else(|| DEFAULT_SYSTEM_PROMPT.to_string());
        if request.json_reply {
            system_prompt.push('\n');
            system_prompt.push_str(JSON_REPLY_INSTRUCTION);
        }

        let system = ChatCompletionRequestMessage::System(
            ChatCompletionRequestSystemMessageArgs::default()
                .content(ChatCompletionRequestSystemMessageContent::Text(system_prompt))
                .build()
                .context("building system message")?,
        );

        let user = ChatCompletionRequestMessage::User(
            ChatCompletionRequestUserMessageArgs::default()
                .content(ChatCompletionRequestUserMessageContent::Text(request.prompt))
                .build()
                .context("building user message")?,
        );

        let mut builder = CreateChatCompletionRequestArgs::default();
        builder
            .model(request.model)
            .messages(vec![system, user])
            .temperature(request.temperature);
        if let Some(max_tokens) = request.max_tokens {
            builder.max_tokens(max_tokens);
        }
        builder.build().context("building chat completion request")
    }
}

#[async_trait]
impl ChatClient for OpenAiChatClient {
    fn name(&self) -> &'static str {
        "openai"
    }

    #[instrument(skip_all, fields(client = "openai", model = %request.model))]
    async fn complete(&self, request: ChatRequest) -> Result<ChatResponse> {
        let req = Self::build_request(request)?;

        let resp = self
            .client
            .chat()
            .create(req)
            .await
            .context("chat completion failed")?;

        let model = resp.model.clone();
        let choice = resp
            .choices
            .into_iter()
            .next()
            .context("server returned no choices")?;
        let content = choice
            .message
            .content
            .unwrap_or_default()
            .trim()
            .to_string();

        Ok(ChatResponse { model, content })
    }

    #[instrument(skip_all, fields(client = "openai", model = %request.model))]
    async fn stream(&self, request: ChatRequest) -> Result<BoxStream<'static, Result<String>>> {
        let req = Self::build_request(request)?;

        let stream = self
            .client
            .chat()
            .create_stream(req)
            .await
            .context("opening chat completion stream failed")?;
        debug!("chat completion stream opened");

        let deltas = stream.filter_map(|chunk| async move {
            match chunk {
                Ok(response) => response
                    .choices
                    .into_iter()
                    .next()
                    .and_then(|choice| choice.delta.content)
                    .filter(|content| !content.is_empty())
                    .map(Ok),
                Err(err) => Some(Err(anyhow::Error::new(err).context("stream chunk failed"))),
            }
        });
        Ok(deltas.boxed())
    }
}
