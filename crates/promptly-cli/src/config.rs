use std::path::{Path, PathBuf};

use color_eyre::Result;
use dirs::config_dir;
use promptly_storage::provider::ProviderKind;

pub const ENCRYPTION_ENV: &str = "PROMPTLY_ENCRYPTION";
/// Checked in order when a configuration carries no API key.
pub const API_KEY_ENVS: [&str; 2] = ["PROMPTLY_API_KEY", "OPENAI_API_KEY"];

/// Resolve the settings file: explicit override (flag or `PROMPTLY_SETTINGS`),
/// else the platform config directory.
pub fn settings_path(explicit: Option<&Path>) -> Result<PathBuf> {
    match explicit {
        Some(path) => Ok(path.to_path_buf()),
        None => default_path(),
    }
}

/// Resolve the default settings path (platform aware).
pub fn default_path() -> Result<PathBuf> {
    let base = config_dir().ok_or_else(|| color_eyre::eyre::eyre!("no config dir available"))?;
    Ok(base.join("promptly").join("settings.json"))
}

/// Encryption provider requested via `PROMPTLY_ENCRYPTION`, else the platform default.
pub fn provider_kind() -> Result<ProviderKind> {
    provider_kind_from(std::env::var(ENCRYPTION_ENV).ok().as_deref())
}

fn provider_kind_from(raw: Option<&str>) -> Result<ProviderKind> {
    match raw.map(str::trim).filter(|v| !v.is_empty()) {
        Some(value) => value
            .parse()
            .map_err(|e: String| color_eyre::eyre::eyre!("{ENCRYPTION_ENV}: {e}")),
        None => Ok(ProviderKind::platform_default()),
    }
}

/// API key from the environment, for configurations without one.
pub fn env_api_key() -> Option<String> {
    env_api_key_from(|var| std::env::var(var).ok())
}

/// First non-blank key among [`API_KEY_ENVS`], in order.
fn env_api_key_from(lookup: impl Fn(&str) -> Option<String>) -> Option<String> {
    API_KEY_ENVS
        .iter()
        .find_map(|var| lookup(var).filter(|key| !key.trim().is_empty()))
}
