use std::io::{self, IsTerminal, Read, Write};

use color_eyre::{eyre::bail, Result};
use futures::StreamExt;
use promptly_agent::openai::{OpenAiChatClient, OpenAiSettings};
use promptly_core::{
    chat::{ChatClient, ChatRequest, EchoClient, OutputFormat},
    settings::{ModelConfiguration, UserSettings},
};
use promptly_storage::{provider::carries_any_marker, settings_store::SettingsStore};
use serde::Serialize;
use tracing::{debug, warn};

use crate::{cli::AskArgs, config};

/// Everything needed to issue one request, after overrides are applied.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedAsk {
    pub configuration: ModelConfiguration,
    pub format: OutputFormat,
    pub stream: bool,
}

/// Envelope printed for `--format json`.
#[derive(Debug, Serialize)]
struct JsonOutput<'a> {
    model: &'a str,
    configuration: &'a str,
    /// The reply as JSON when it parses, otherwise as a string.
    content: serde_json::Value,
}

/// Load settings, resolve the configuration, send the prompt, render the reply.
pub async fn run(args: AskArgs, store: &SettingsStore) -> Result<()> {
    let prompt = read_prompt(&args.prompt)?;
    let settings = store.load();
    let resolved = resolve(&settings, &args)?;

    let client: Box<dyn ChatClient> = if args.echo {
        Box::new(EchoClient)
    } else {
        let api_key = resolve_api_key(&resolved.configuration)?;
        Box::new(
            OpenAiChatClient::new(OpenAiSettings {
                api_key,
                api_base: resolved.configuration.base_url.clone(),
            })
            .map_err(|e| color_eyre::eyre::eyre!(e.to_string()))?,
        )
    };
    debug!(
        client = client.name(),
        configuration = %resolved.configuration.id,
        model = %resolved.configuration.model,
        stream = resolved.stream,
        "sending prompt"
    );

    let request = build_request(&resolved, prompt, args.system.clone());
    let mut stdout = io::stdout().lock();
    render(client.as_ref(), &resolved, request, &mut stdout).await
}

/// Pick the configuration (explicit id, else default, else built-in defaults)
/// and layer the command-line overrides on top.
pub fn resolve(settings: &UserSettings, args: &AskArgs) -> Result<ResolvedAsk> {
    let mut configuration = match args.config.as_deref() {
        Some(id) => match settings.find(id) {
            Some(config) => config.clone(),
            None => bail!("no such configuration: {id} (see `promptly config list`)"),
        },
        None => match settings.default_configuration() {
            Some(config) => config.clone(),
            None => {
                debug!("no model configurations saved, using built-in defaults");
                ModelConfiguration::create_default()
            }
        },
    };

    if let Some(model) = &args.model {
        configuration.model = model.clone();
    }
    if let Some(temperature) = args.temperature {
        configuration.temperature = temperature;
    }
    if let Some(max_tokens) = args.max_tokens {
        configuration.max_tokens = Some(max_tokens);
    }
    let format = args.format.unwrap_or_else(|| configuration.output_format());
    let stream = args.stream_override().unwrap_or(configuration.stream);

    Ok(ResolvedAsk {
        configuration,
        format,
        stream,
    })
}

/// The configuration's key, else the environment. A key that is still
/// encrypted after load could not be decrypted on this machine and is
/// rejected rather than sent to the server.
fn resolve_api_key(configuration: &ModelConfiguration) -> Result<String> {
    match configuration.api_key.as_deref().filter(|k| !k.is_empty()) {
        Some(key) if carries_any_marker(key) => bail!(
            "the API key for configuration `{}` could not be decrypted on this machine; \
             set it again with `promptly config add --id {} --api-key <KEY>`",
            configuration.id,
            configuration.id
        ),
        Some(key) => Ok(key.to_string()),
        None => config::env_api_key().ok_or_else(|| {
            color_eyre::eyre::eyre!(
                "no API key for configuration `{}`; add one with `promptly config add --id {} \
                 --api-key <KEY>` or set {}",
                configuration.id,
                configuration.id,
                config::API_KEY_ENVS.join(" / ")
            )
        }),
    }
}

fn build_request(resolved: &ResolvedAsk, prompt: String, system: Option<String>) -> ChatRequest {
    ChatRequest {
        prompt,
        system,
        model: resolved.configuration.model.clone(),
        temperature: resolved.configuration.temperature,
        max_tokens: resolved.configuration.max_tokens,
        json_reply: resolved.format == OutputFormat::Json,
    }
}

/// Prompt words joined by spaces, or stdin when none were given.
fn read_prompt(words: &[String]) -> Result<String> {
    let joined = words.join(" ");
    if !joined.trim().is_empty() {
        return Ok(joined);
    }
    let stdin = io::stdin();
    if stdin.is_terminal() {
        bail!("no prompt given; pass it as arguments or pipe it on stdin");
    }
    let mut buf = String::new();
    stdin.lock().read_to_string(&mut buf)?;
    if buf.trim().is_empty() {
        bail!("prompt on stdin was empty");
    }
    Ok(buf.trim_end().to_string())
}

/// Send `request` and write the reply to `out` in the resolved format.
pub async fn render(
    client: &dyn ChatClient,
    resolved: &ResolvedAsk,
    request: ChatRequest,
    out: &mut impl Write,
) -> Result<()> {
    let model = request.model.clone();

    if !resolved.stream {
        let response = client
            .complete(request)
            .await
            .map_err(|e| color_eyre::eyre::eyre!("{e:#}"))?;
        return match resolved.format {
            OutputFormat::Text => {
                writeln!(out, "{}", response.content)?;
                Ok(())
            }
            OutputFormat::Json => write_json(
                out,
                &response.model,
                &resolved.configuration.id,
                &response.content,
            ),
        };
    }

    let mut deltas = client
        .stream(request)
        .await
        .map_err(|e| color_eyre::eyre::eyre!("{e:#}"))?;
    let mut collected = String::new();
    while let Some(delta) = deltas.next().await {
        let delta = match delta {
            Ok(delta) => delta,
            Err(err) => {
                if resolved.format == OutputFormat::Text && !collected.is_empty() {
                    writeln!(out)?;
                }
                warn!(error = %err, "stream ended with an error");
                return Err(color_eyre::eyre::eyre!("{err:#}"));
            }
        };
        if resolved.format == OutputFormat::Text {
            out.write_all(delta.as_bytes())?;
            out.flush()?;
        }
        collected.push_str(&delta);
    }

    match resolved.format {
        OutputFormat::Text => {
            writeln!(out)?;
            Ok(())
        }
        OutputFormat::Json => write_json(out, &model, &resolved.configuration.id, &collected),
    }
}

fn write_json(
    out: &mut impl Write,
    model: &str,
    configuration: &str,
    content: &str,
) -> Result<()> {
    let content = serde_json::from_str(content.trim())
        .unwrap_or_else(|_| serde_json::Value::String(content.to_string()));
    let body = serde_json::to_string_pretty(&JsonOutput {
        model,
        configuration,
        content,
    })?;
    writeln!(out, "{body}")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage;

    fn settings_with(configs: Vec<ModelConfiguration>) -> UserSettings {
        let mut settings = UserSettings::create_default();
        for config in configs {
            settings.upsert(config);
        }
        settings
    }

    fn config(id: &str) -> ModelConfiguration {
        ModelConfiguration {
            id: id.into(),
            name: id.into(),
            ..ModelConfiguration::create_default()
        }
    }

    async fn render_to_string(resolved: &ResolvedAsk, prompt: &str) -> String {
        let request = build_request(resolved, prompt.into(), None);
        let mut out = Vec::new();
        render(&EchoClient, resolved, request, &mut out)
            .await
            .expect("render");
        String::from_utf8(out).expect("utf8")
    }

    #[test]
    fn resolve_uses_default_configuration() {
        let mut second = config("b");
        second.model = "gpt-4o".into();
        let mut settings = settings_with(vec![config("a"), second]);
        settings.set_default("b");

        let resolved = resolve(&settings, &AskArgs::default()).expect("resolve");
        assert_eq!(resolved.configuration.id, "b");
        assert_eq!(resolved.configuration.model, "gpt-4o");
        assert_eq!(resolved.format, OutputFormat::Text);
        assert!(!resolved.stream);
    }

    #[test]
    fn resolve_applies_overrides() {
        let mut streaming = config("a");
        streaming.stream = true;
        streaming.format = "json".into();
        let settings = settings_with(vec![streaming]);

        let args = AskArgs {
            model: Some("local-llama".into()),
            temperature: Some(0.1),
            max_tokens: Some(42),
            format: Some(OutputFormat::Text),
            no_stream: true,
            ..AskArgs::default()
        };
        let resolved = resolve(&settings, &args).expect("resolve");
        assert_eq!(resolved.configuration.model, "local-llama");
        assert_eq!(resolved.configuration.temperature, 0.1);
        assert_eq!(resolved.configuration.max_tokens, Some(42));
        assert_eq!(resolved.format, OutputFormat::Text);
        assert!(!resolved.stream);
    }

    #[test]
    fn resolve_rejects_unknown_configuration() {
        let settings = settings_with(vec![config("a")]);
        let args = AskArgs {
            config: Some("missing".into()),
            ..AskArgs::default()
        };
        assert!(resolve(&settings, &args).is_err());
    }

    #[test]
    fn resolve_falls_back_to_builtin_defaults() {
        let resolved =
            resolve(&UserSettings::create_default(), &AskArgs::default()).expect("resolve");
        assert_eq!(resolved.configuration, ModelConfiguration::create_default());
    }

    #[test]
    fn undecryptable_key_is_rejected() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = storage::test_store(dir.path());
        let ciphertext = store.provider().encrypt("sk-secret").expect("encrypt");
        let mut configuration = config("a");
        configuration.api_key = Some(ciphertext);

        let err = resolve_api_key(&configuration).expect_err("should reject");
        assert!(err.to_string().contains("could not be decrypted"));
    }

    #[test]
    fn key_encrypted_by_other_provider_is_rejected() {
        let mut configuration = config("a");
        configuration.api_key = Some("DPAPI:AQAAANCMnd8BFdERjHoAwE".into());

        let err = resolve_api_key(&configuration).expect_err("should reject");
        assert!(err.to_string().contains("could not be decrypted"));
    }

    #[test]
    fn plaintext_key_is_used() {
        let mut configuration = config("a");
        configuration.api_key = Some("sk-live".into());

        assert_eq!(resolve_api_key(&configuration).expect("key"), "sk-live");
    }

    #[tokio::test]
    async fn renders_text() {
        let resolved = resolve(&settings_with(vec![config("a")]), &AskArgs::default())
            .expect("resolve");
        assert_eq!(render_to_string(&resolved, "hello").await, "Echo: hello\n");
    }

    #[tokio::test]
    async fn renders_streamed_text() {
        let args = AskArgs {
            stream: true,
            ..AskArgs::default()
        };
        let resolved = resolve(&settings_with(vec![config("a")]), &args).expect("resolve");
        assert_eq!(
            render_to_string(&resolved, "hello there").await,
            "Echo: hello there\n"
        );
    }

    #[tokio::test]
    async fn renders_json_envelope() {
        let args = AskArgs {
            format: Some(OutputFormat::Json),
            ..AskArgs::default()
        };
        let resolved = resolve(&settings_with(vec![config("a")]), &args).expect("resolve");
        let output = render_to_string(&resolved, "hello").await;

        let json: serde_json::Value = serde_json::from_str(&output).expect("valid json");
        assert_eq!(json["configuration"], "a");
        assert_eq!(json["model"], "gpt-3.5-turbo");
        assert_eq!(json["content"], "Echo: hello");
    }

    #[tokio::test]
    async fn streamed_json_is_collected_before_printing() {
        let args = AskArgs {
            format: Some(OutputFormat::Json),
            stream: true,
            ..AskArgs::default()
        };
        let resolved = resolve(&settings_with(vec![config("a")]), &args).expect("resolve");
        let output = render_to_string(&resolved, "a b c").await;

        let json: serde_json::Value = serde_json::from_str(&output).expect("valid json");
        assert_eq!(json["content"], "Echo: a b c");
    }

    #[test]
    fn json_reply_is_embedded_when_valid() {
        let mut out = Vec::new();
        write_json(&mut out, "m", "c", r#"{"answer": 42}"#).expect("write");
        let json: serde_json::Value = serde_json::from_slice(&out).expect("json");
        assert_eq!(json["content"]["answer"], 42);
    }

    #[test]
    fn prompt_words_are_joined() {
        let prompt = read_prompt(&["what".into(), "is".into(), "rust".into()]).expect("prompt");
        assert_eq!(prompt, "what is rust");
    }
}
