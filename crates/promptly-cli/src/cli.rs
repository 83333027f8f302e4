use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use promptly_core::chat::OutputFormat;

/// CLI surface definition.
#[derive(Parser, Debug)]
#[command(
    name = "promptly",
    about = "Send prompts to OpenAI-compatible chat models from the terminal",
    version,
    propagate_version = true
)]
pub struct Cli {
    /// Settings file (defaults to <config dir>/promptly/settings.json).
    #[arg(long, global = true, env = "PROMPTLY_SETTINGS", value_name = "PATH")]
    pub settings: Option<PathBuf>,

    /// Log debug output to stderr (RUST_LOG takes precedence).
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum Command {
    /// Send a prompt using the default (or selected) model configuration.
    Ask(AskArgs),
    /// Manage model configurations.
    #[command(subcommand)]
    Config(ConfigCommand),
    /// Print version and exit.
    Version,
    /// Check the encryption provider and settings file.
    Health,
}

#[derive(Args, Debug, Clone, PartialEq, Default)]
pub struct AskArgs {
    /// Prompt text; read from stdin when omitted.
    pub prompt: Vec<String>,

    /// Model configuration id to use instead of the default.
    #[arg(short, long, value_name = "ID")]
    pub config: Option<String>,

    /// Override the configured model.
    #[arg(short, long)]
    pub model: Option<String>,

    /// Override the output format (text or json).
    #[arg(short, long)]
    pub format: Option<OutputFormat>,

    /// Stream tokens as they arrive.
    #[arg(long, conflicts_with = "no_stream")]
    pub stream: bool,

    /// Wait for the full response even if the configuration streams.
    #[arg(long)]
    pub no_stream: bool,

    #[arg(short, long)]
    pub temperature: Option<f32>,

    #[arg(long)]
    pub max_tokens: Option<u32>,

    /// Replace the default system prompt.
    #[arg(long)]
    pub system: Option<String>,

    /// Answer locally without calling the API.
    #[arg(long)]
    pub echo: bool,
}

impl AskArgs {
    /// Explicit stream choice, if any flag was given.
    pub fn stream_override(&self) -> Option<bool> {
        match (self.stream, self.no_stream) {
            (true, _) => Some(true),
            (_, true) => Some(false),
            _ => None,
        }
    }
}

#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum ConfigCommand {
    /// List model configurations.
    List,
    /// Show one configuration (the default when no id is given).
    Show { id: Option<String> },
    /// Add a configuration, or update the one with the same id.
    Add(AddArgs),
    /// Remove a configuration.
    Remove { id: String },
    /// Make a configuration the default.
    Default { id: String },
    /// Delete all configurations.
    Reset,
    /// Print the settings file path.
    Path,
}

#[derive(Args, Debug, Clone, PartialEq, Default)]
pub struct AddArgs {
    #[arg(long)]
    pub id: String,
    /// Display name (defaults to the id for new configurations).
    #[arg(long)]
    pub name: Option<String>,
    /// Stored encrypted at rest.
    #[arg(long)]
    pub api_key: Option<String>,
    #[arg(long)]
    pub base_url: Option<String>,
    #[arg(long)]
    pub model: Option<String>,
    #[arg(long)]
    pub temperature: Option<f32>,
    #[arg(long)]
    pub max_tokens: Option<u32>,
    #[arg(long)]
    pub format: Option<OutputFormat>,
    /// Stream responses by default (true or false).
    #[arg(long)]
    pub stream: Option<bool>,
    /// Also make this the default configuration.
    #[arg(long)]
    pub default: bool,
}
