use std::io::Write;

use color_eyre::{eyre::bail, Result};
use promptly_core::settings::{ModelConfiguration, UserSettings};
use promptly_storage::{provider::carries_any_marker, settings_store::SettingsStore};
use tracing::info;

use crate::cli::{AddArgs, ConfigCommand};

/// Execute a `config` subcommand against the settings store. Every mutation
/// is followed by a full save.
pub fn handle(cmd: ConfigCommand, store: &SettingsStore, out: &mut impl Write) -> Result<()> {
    match cmd {
        ConfigCommand::List => {
            let settings = store.load();
            if settings.model_configurations.is_empty() {
                writeln!(
                    out,
                    "No model configurations yet. Add one with `promptly config add --id <id>`."
                )?;
                return Ok(());
            }
            for config in &settings.model_configurations {
                let marker = if config.id == settings.default_model_configuration_id {
                    "*"
                } else {
                    " "
                };
                writeln!(
                    out,
                    "{marker} {} ({}) model={} format={} stream={} key={}",
                    config.id,
                    config.name,
                    config.model,
                    config.format,
                    config.stream,
                    key_status(config)
                )?;
            }
        }
        ConfigCommand::Show { id } => {
            let settings = store.load();
            let config = match id.as_deref() {
                Some(id) => settings.find(id),
                None => settings.default_configuration(),
            };
            let Some(config) = config else {
                bail!("no such configuration: {}", id.as_deref().unwrap_or("<default>"));
            };
            write_details(out, config, &settings)?;
        }
        ConfigCommand::Add(args) => {
            let mut settings = store.load();
            let make_default = args.default;
            let id = args.id.clone();
            let existing = settings.find(&id).cloned();
            let updated = existing.is_some();
            settings.upsert(apply_add(existing, args)?);
            if make_default {
                settings.set_default(&id);
            }
            save(store, &settings)?;
            info!(configuration = %id, updated, "configuration saved");
            let verb = if updated { "Updated" } else { "Added" };
            writeln!(out, "{verb} configuration {id}")?;
        }
        ConfigCommand::Remove { id } => {
            let mut settings = store.load();
            if !settings.remove(&id) {
                bail!("no such configuration: {id}");
            }
            save(store, &settings)?;
            writeln!(out, "Removed configuration {id}")?;
        }
        ConfigCommand::Default { id } => {
            let mut settings = store.load();
            if !settings.set_default(&id) {
                bail!("no such configuration: {id}");
            }
            save(store, &settings)?;
            writeln!(out, "Default configuration is now {id}")?;
        }
        ConfigCommand::Reset => {
            store
                .reset_to_default()
                .map_err(|e| color_eyre::eyre::eyre!(e.to_string()))?;
            writeln!(out, "Settings reset at {}", store.path().display())?;
        }
        ConfigCommand::Path => {
            writeln!(out, "{}", store.path().display())?;
        }
    }
    Ok(())
}

fn save(store: &SettingsStore, settings: &UserSettings) -> Result<()> {
    store
        .save(settings)
        .map_err(|e| color_eyre::eyre::eyre!(e.to_string()))
}

/// Build the configuration to store: flags layered over the existing entry,
/// or over the defaults for a new one.
fn apply_add(existing: Option<ModelConfiguration>, args: AddArgs) -> Result<ModelConfiguration> {
    if args.id.trim().is_empty() {
        bail!("configuration id must not be empty");
    }
    let mut config = existing.unwrap_or_else(|| ModelConfiguration {
        id: args.id.clone(),
        name: args.id.clone(),
        ..ModelConfiguration::create_default()
    });

    if let Some(name) = args.name {
        config.name = name;
    }
    if let Some(api_key) = args.api_key {
        config.api_key = Some(api_key).filter(|k| !k.is_empty());
    }
    if let Some(base_url) = args.base_url {
        config.base_url = Some(base_url).filter(|u| !u.is_empty());
    }
    if let Some(model) = args.model {
        config.model = model;
    }
    if let Some(temperature) = args.temperature {
        if !(0.0..=2.0).contains(&temperature) {
            bail!("temperature must be between 0.0 and 2.0");
        }
        config.temperature = temperature;
    }
    if let Some(max_tokens) = args.max_tokens {
        config.max_tokens = Some(max_tokens);
    }
    if let Some(format) = args.format {
        config.format = format.as_str().to_string();
    }
    if let Some(stream) = args.stream {
        config.stream = stream;
    }
    Ok(config)
}

fn key_status(config: &ModelConfiguration) -> &'static str {
    match config.api_key.as_deref() {
        None | Some("") => "none",
        Some(key) if carries_any_marker(key) => "undecryptable",
        Some(_) => "set",
    }
}

fn write_details(
    out: &mut impl Write,
    config: &ModelConfiguration,
    settings: &UserSettings,
) -> Result<()> {
    let is_default = config.id == settings.default_model_configuration_id;
    writeln!(out, "id:          {}", config.id)?;
    writeln!(out, "name:        {}", config.name)?;
    writeln!(out, "default:     {is_default}")?;
    writeln!(out, "model:       {}", config.model)?;
    writeln!(
        out,
        "base url:    {}",
        config.base_url.as_deref().unwrap_or("(api default)")
    )?;
    writeln!(out, "temperature: {}", config.temperature)?;
    match config.max_tokens {
        Some(max) => writeln!(out, "max tokens:  {max}")?,
        None => writeln!(out, "max tokens:  (unset)")?,
    }
    writeln!(out, "format:      {}", config.format)?;
    writeln!(out, "stream:      {}", config.stream)?;
    writeln!(out, "api key:     {}", key_status(config))?;
    Ok(())
}
