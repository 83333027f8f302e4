mod ask;
mod cli;
mod config;
mod settings_cmd;
mod storage;

use clap::Parser;
use color_eyre::Result;
use promptly_core::crypto::EncryptionProvider;
use promptly_storage::{provider::carries_any_marker, settings_store::SettingsStore};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Entry point wiring the CLI to the settings store and chat client.
#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    let cli = cli::Cli::parse();
    init_tracing(cli.verbose);

    match cli.command {
        cli::Command::Version => print_version(),
        cli::Command::Ask(args) => {
            let store = storage::open_store(cli.settings.as_deref())?;
            ask::run(args, &store).await?
        }
        cli::Command::Config(cmd) => {
            let store = storage::open_store(cli.settings.as_deref())?;
            settings_cmd::handle(cmd, &store, &mut std::io::stdout().lock())?
        }
        cli::Command::Health => {
            let store = storage::open_store(cli.settings.as_deref())?;
            run_health_check(&store)?
        }
    }

    Ok(())
}

fn init_tracing(verbose: bool) {
    // Logs go to stderr; stdout is reserved for responses.
    let default_level = if verbose { "debug" } else { "warn" };
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_target(false)
        .with_writer(std::io::stderr);
    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .init();
}

fn print_version() {
    println!("promptly {}", env!("CARGO_PKG_VERSION"));
}

/// Round-trips a sample value through the provider and loads the settings file.
fn run_health_check(store: &SettingsStore) -> Result<()> {
    run_provider_health(store.provider())?;
    println!("Encryption ({}): ok", store.provider().name());

    let settings = store.load();
    println!(
        "Settings: {} ({} configurations, default: {})",
        store.path().display(),
        settings.model_configurations.len(),
        if settings.default_model_configuration_id.is_empty() {
            "none"
        } else {
            settings.default_model_configuration_id.as_str()
        }
    );
    let undecryptable = settings
        .model_configurations
        .iter()
        .filter(|c| c.api_key.as_deref().is_some_and(carries_any_marker))
        .count();
    if undecryptable > 0 {
        color_eyre::eyre::bail!("{undecryptable} API key(s) could not be decrypted");
    }
    Ok(())
}

fn run_provider_health(provider: &dyn EncryptionProvider) -> Result<()> {
    let sample = "health-check";
    let encrypted = provider
        .encrypt(sample)
        .map_err(|e| color_eyre::eyre::eyre!(e.to_string()))?;
    let round_trip = provider
        .decrypt(&encrypted)
        .map_err(|e| color_eyre::eyre::eyre!(e.to_string()))?;

    if !provider.is_encrypted(&encrypted) || round_trip != sample {
        color_eyre::eyre::bail!("encryption round-trip failed");
    }
    Ok(())
}
