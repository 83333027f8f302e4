use std::path::Path;

use color_eyre::Result;
use promptly_storage::{provider::build_provider, settings_store::SettingsStore};
use tracing::debug;

use crate::config;

/// Build the settings store with the platform's encryption provider.
/// Provider construction failure aborts the command.
pub fn open_store(explicit: Option<&Path>) -> Result<SettingsStore> {
    let path = config::settings_path(explicit)?;
    let kind = config::provider_kind()?;
    let provider = build_provider(kind).map_err(|e| color_eyre::eyre::eyre!(e.to_string()))?;
    debug!(path = %path.display(), provider = provider.name(), "opening settings store");
    Ok(SettingsStore::new(path, provider))
}

/// Helper for tests: a store under `dir` with a fixed key.
#[cfg(test)]
pub fn test_store(dir: &Path) -> SettingsStore {
    use std::sync::Arc;

    use promptly_storage::{key_provider::StaticKeyProvider, portable::PortableEncryption};

    let provider = PortableEncryption::new(&StaticKeyProvider::new([5u8; 32])).expect("provider");
    SettingsStore::new(dir.join("settings.json"), Arc::new(provider))
}
