use std::{
    fs,
    io::{self, Write},
    path::{Path, PathBuf},
    sync::Arc,
};

use promptly_core::{crypto::EncryptionProvider, settings::UserSettings};
use tempfile::NamedTempFile;
use thiserror::Error;
use tracing::{debug, error, info, instrument, warn};

use crate::provider::KNOWN_MARKERS;

/// Errors that stop a save. Load never fails; it falls back to defaults.
#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("failed to create settings directory {}: {source}", path.display())]
    CreateDir { path: PathBuf, source: io::Error },
    #[error("failed to write settings file {}: {source}", path.display())]
    Write { path: PathBuf, source: io::Error },
    #[error("failed to serialize settings: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("invalid settings path: {}", .0.display())]
    InvalidPath(PathBuf),
}

/// JSON settings file with the API keys encrypted at rest.
///
/// Callers only ever see plaintext: `load` decrypts marked fields and `save`
/// encrypts a copy of the document, leaving the caller's value untouched.
pub struct SettingsStore {
    path: PathBuf,
    provider: Arc<dyn EncryptionProvider>,
}

impl SettingsStore {
    pub fn new(path: impl Into<PathBuf>, provider: Arc<dyn EncryptionProvider>) -> Self {
        Self {
            path: path.into(),
            provider,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn provider(&self) -> &dyn EncryptionProvider {
        self.provider.as_ref()
    }

    /// Read, repair, and decrypt the settings document.
    ///
    /// A missing, empty, unreadable, or corrupt file yields
    /// [`UserSettings::create_default`].
    #[instrument(skip_all, fields(path = %self.path.display()))]
    pub fn load(&self) -> UserSettings {
        let contents = match fs::read_to_string(&self.path) {
            Ok(contents) => contents,
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                debug!("settings file not found, using defaults");
                return UserSettings::create_default();
            }
            Err(err) => {
                error!(error = %err, "failed to read settings file, using defaults");
                return UserSettings::create_default();
            }
        };

        if contents.trim().is_empty() {
            warn!("settings file is empty, using defaults");
            return UserSettings::create_default();
        }

        let parsed: Option<UserSettings> = match serde_json::from_str(&contents) {
            Ok(parsed) => parsed,
            Err(err) => {
                error!(error = %err, "settings file is not valid JSON, using defaults");
                return UserSettings::create_default();
            }
        };
        let Some(mut settings) = parsed else {
            warn!("settings document is null, using defaults");
            return UserSettings::create_default();
        };

        if settings.repair() {
            info!("repaired settings document");
        }
        self.decrypt_fields(&mut settings);
        settings
    }

    /// Encrypt a copy of `settings` and write it over the settings file.
    #[instrument(skip_all, fields(path = %self.path.display()))]
    pub fn save(&self, settings: &UserSettings) -> Result<(), SettingsError> {
        let parent = self
            .path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        fs::create_dir_all(parent).map_err(|source| SettingsError::CreateDir {
            path: parent.to_path_buf(),
            source,
        })?;

        let mut on_disk = settings.clone();
        self.encrypt_fields(&mut on_disk);

        let json = serde_json::to_string_pretty(&on_disk)?;
        write_file(&self.path, parent, json.as_bytes())?;
        restrict_permissions(&self.path);

        info!(
            configurations = on_disk.model_configurations.len(),
            "settings saved"
        );
        Ok(())
    }

    /// Overwrite the file with an empty document and return it.
    pub fn reset_to_default(&self) -> Result<UserSettings, SettingsError> {
        let settings = UserSettings::create_default();
        self.save(&settings)?;
        Ok(settings)
    }

    fn decrypt_fields(&self, settings: &mut UserSettings) {
        let provider = self.provider.as_ref();
        settings.for_each_encrypted_field(|id, field| {
            let Some(value) = field.value.as_mut() else {
                return;
            };
            if !provider.is_encrypted(value) {
                if let Some(marker) = foreign_marker(provider, value) {
                    warn!(
                        configuration = id,
                        field = field.name,
                        marker,
                        "value was encrypted by another provider, leaving as is"
                    );
                }
                return;
            }
            match provider.decrypt(value) {
                Ok(plaintext) => *value = plaintext,
                Err(err) => error!(
                    configuration = id,
                    field = field.name,
                    error = %err,
                    "failed to decrypt field, leaving encrypted value in place"
                ),
            }
        });
    }

    fn encrypt_fields(&self, settings: &mut UserSettings) {
        let provider = self.provider.as_ref();
        settings.for_each_encrypted_field(|id, field| {
            let Some(value) = field.value.as_mut() else {
                return;
            };
            if value.is_empty() || provider.is_encrypted(value) {
                return;
            }
            match provider.encrypt(value) {
                Ok(ciphertext) => *value = ciphertext,
                Err(err) => error!(
                    configuration = id,
                    field = field.name,
                    error = %err,
                    "failed to encrypt field, writing plaintext"
                ),
            }
        });
    }
}

fn foreign_marker(provider: &dyn EncryptionProvider, value: &str) -> Option<&'static str> {
    KNOWN_MARKERS
        .into_iter()
        .filter(|marker| *marker != provider.marker())
        .find(|marker| value.starts_with(marker))
}

fn write_file(path: &Path, dir: &Path, body: &[u8]) -> Result<(), SettingsError> {
    let write_err = |source| SettingsError::Write {
        path: path.to_path_buf(),
        source,
    };
    if path.file_name().is_none() {
        return Err(SettingsError::InvalidPath(path.to_path_buf()));
    }

    let mut tmp = NamedTempFile::new_in(dir).map_err(write_err)?;
    tmp.write_all(body).map_err(write_err)?;
    tmp.flush().map_err(write_err)?;
    tmp.persist(path).map_err(|e| write_err(e.error))?;
    Ok(())
}

#[cfg(unix)]
fn restrict_permissions(path: &Path) {
    use std::os::unix::fs::PermissionsExt;

    if let Err(err) = fs::set_permissions(path, fs::Permissions::from_mode(0o600)) {
        warn!(error = %err, "failed to restrict settings file permissions");
    }
}

#[cfg(not(unix))]
fn restrict_permissions(_path: &Path) {}

#[cfg(test)]
mod tests {
    use promptly_core::{crypto::CryptoError, settings::ModelConfiguration};

    use super::*;
    use crate::{
        key_provider::StaticKeyProvider,
        portable::{PortableEncryption, PORTABLE_MARKER},
        provider::PLATFORM_NATIVE_MARKER,
    };

    fn portable() -> Arc<dyn EncryptionProvider> {
        Arc::new(PortableEncryption::new(&StaticKeyProvider::new([3u8; 32])).expect("provider"))
    }

    fn store_in(dir: &Path) -> SettingsStore {
        SettingsStore::new(dir.join("settings.json"), portable())
    }

    fn config(id: &str, api_key: Option<&str>) -> ModelConfiguration {
        ModelConfiguration {
            id: id.into(),
            name: format!("Config {id}"),
            api_key: api_key.map(str::to_string),
            ..ModelConfiguration::create_default()
        }
    }

    /// Provider whose operations always fail.
    struct BrokenProvider;

    impl EncryptionProvider for BrokenProvider {
        fn name(&self) -> &'static str {
            "broken"
        }

        fn marker(&self) -> &'static str {
            PORTABLE_MARKER
        }

        fn encrypt(&self, _plaintext: &str) -> Result<String, CryptoError> {
            Err(CryptoError::Encrypt {
                reason: "boom".into(),
            })
        }

        fn decrypt(&self, _ciphertext: &str) -> Result<String, CryptoError> {
            Err(CryptoError::Decrypt {
                reason: "boom".into(),
            })
        }
    }

    #[test]
    fn missing_file_returns_defaults() {
        let dir = tempfile::tempdir().expect("tempdir");
        let settings = store_in(dir.path()).load();

        assert!(settings.model_configurations.is_empty());
        assert_eq!(settings.default_model_configuration_id, "");
        assert_eq!(settings, UserSettings::create_default());
    }

    #[test]
    fn invalid_json_returns_same_defaults_as_missing_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = store_in(dir.path());
        fs::write(store.path(), "invalid json content").expect("write");

        assert_eq!(store.load(), UserSettings::create_default());
    }

    #[test]
    fn empty_and_null_documents_return_defaults() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = store_in(dir.path());

        fs::write(store.path(), "  \n\t").expect("write");
        assert_eq!(store.load(), UserSettings::create_default());

        fs::write(store.path(), "null").expect("write");
        assert_eq!(store.load(), UserSettings::create_default());
    }

    #[test]
    fn load_repairs_dangling_default_and_missing_fields() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = store_in(dir.path());
        fs::write(
            store.path(),
            r#"{
                "modelConfigurations": [
                    { "id": "first", "name": "First", "model": "", "temperature": 0.2 },
                    { "id": "second", "name": "Second", "model": "gpt-4o", "format": "json" }
                ],
                "defaultModelConfigurationId": "does-not-exist",
                "refreshInterval": 15
            }"#,
        )
        .expect("write");

        let settings = store.load();
        assert_eq!(settings.default_model_configuration_id, "first");
        assert_eq!(settings.model_configurations[0].model, "gpt-3.5-turbo");
        assert_eq!(settings.model_configurations[0].format, "text");
        assert_eq!(settings.model_configurations[1].format, "json");
        assert_eq!(settings.refresh_interval, 15);
    }

    #[test]
    fn save_never_writes_plaintext_secret() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = store_in(dir.path());
        let mut settings = UserSettings::create_default();
        settings.upsert(config("main", Some("secret-123")));

        store.save(&settings).expect("save");

        let raw = fs::read_to_string(store.path()).expect("read");
        assert!(!raw.contains("secret-123"), "plaintext must not be stored");
        let json: serde_json::Value = serde_json::from_str(&raw).expect("json");
        let api_key = json["modelConfigurations"][0]["apiKey"]
            .as_str()
            .expect("apiKey string");
        assert!(api_key.starts_with(PORTABLE_MARKER));
    }

    #[test]
    fn save_does_not_mutate_callers_document() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = store_in(dir.path());
        let mut settings = UserSettings::create_default();
        settings.upsert(config("main", Some("secret-123")));
        let before = settings.clone();

        store.save(&settings).expect("save");

        assert_eq!(
            settings.model_configurations[0].api_key.as_deref(),
            Some("secret-123")
        );
        assert_eq!(settings, before);
    }

    #[test]
    fn load_decrypts_marked_values() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = store_in(dir.path());
        let ciphertext = store.provider().encrypt("secret-123").expect("encrypt");
        let doc = serde_json::json!({
            "modelConfigurations": [
                { "id": "main", "name": "Main", "apiKey": ciphertext, "model": "gpt-4o",
                  "temperature": 0.7, "format": "text", "stream": false }
            ],
            "defaultModelConfigurationId": "main",
            "refreshInterval": 60
        });
        fs::write(store.path(), doc.to_string()).expect("write");

        let settings = store.load();
        assert_eq!(
            settings.model_configurations[0].api_key.as_deref(),
            Some("secret-123")
        );
    }

    #[test]
    fn load_keeps_legacy_plaintext_keys() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = store_in(dir.path());
        fs::write(
            store.path(),
            r#"{"modelConfigurations":[{"id":"old","name":"Old","apiKey":"sk-plain","model":"m"}]}"#,
        )
        .expect("write");

        let settings = store.load();
        assert_eq!(
            settings.model_configurations[0].api_key.as_deref(),
            Some("sk-plain")
        );
    }

    #[test]
    fn round_trip_preserves_every_field() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = store_in(dir.path());

        let mut settings = UserSettings::create_default();
        settings.upsert(ModelConfiguration {
            base_url: Some("https://llm.internal/v1".into()),
            max_tokens: Some(512),
            temperature: 0.1,
            format: "json".into(),
            stream: true,
            ..config("with-key", Some("sk-abc"))
        });
        settings.upsert(config("without-key", None));
        settings.set_default("without-key");
        settings.refresh_interval = 120;

        store.save(&settings).expect("save");
        assert_eq!(store.load(), settings);
    }

    #[test]
    fn decrypt_failure_leaves_ciphertext_in_place() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("settings.json");
        let good = SettingsStore::new(&path, portable());
        let mut settings = UserSettings::create_default();
        settings.upsert(config("a", Some("secret-a")));
        settings.upsert(config("b", None));
        good.save(&settings).expect("save");

        let broken = SettingsStore::new(&path, Arc::new(BrokenProvider));
        let loaded = broken.load();

        let key = loaded.model_configurations[0].api_key.as_deref().expect("key");
        assert!(key.starts_with(PORTABLE_MARKER));
        assert_eq!(loaded.model_configurations[1].id, "b");
    }

    #[test]
    fn wrong_key_leaves_ciphertext_in_place() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("settings.json");
        let mut settings = UserSettings::create_default();
        settings.upsert(config("a", Some("secret-a")));
        SettingsStore::new(&path, portable()).save(&settings).expect("save");

        let other_key: Arc<dyn EncryptionProvider> = Arc::new(
            PortableEncryption::new(&StaticKeyProvider::new([4u8; 32])).expect("provider"),
        );
        let loaded = SettingsStore::new(&path, other_key).load();
        assert_ne!(
            loaded.model_configurations[0].api_key.as_deref(),
            Some("secret-a")
        );
    }

    #[test]
    fn encrypt_failure_still_saves() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = SettingsStore::new(dir.path().join("settings.json"), Arc::new(BrokenProvider));
        let mut settings = UserSettings::create_default();
        settings.upsert(config("a", Some("secret-a")));

        store.save(&settings).expect("save proceeds");
        let raw = fs::read_to_string(store.path()).expect("read");
        assert!(raw.contains("secret-a"));
    }

    #[test]
    fn already_encrypted_values_are_not_encrypted_twice() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = store_in(dir.path());
        let ciphertext = store.provider().encrypt("secret-123").expect("encrypt");
        let mut settings = UserSettings::create_default();
        settings.upsert(config("a", Some(&ciphertext)));

        store.save(&settings).expect("save");
        let raw = fs::read_to_string(store.path()).expect("read");
        assert!(raw.contains(&ciphertext));
        assert_eq!(
            store.load().model_configurations[0].api_key.as_deref(),
            Some("secret-123")
        );
    }

    #[test]
    fn save_creates_missing_directories_and_overwrites() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = SettingsStore::new(dir.path().join("nested/deeper/settings.json"), portable());
        let mut settings = UserSettings::create_default();
        settings.upsert(config("a", None));
        settings.upsert(config("b", None));
        store.save(&settings).expect("first save");

        settings.remove("b");
        store.save(&settings).expect("second save");

        let loaded = store.load();
        assert_eq!(loaded.model_configurations.len(), 1);
        let raw = fs::read_to_string(store.path()).expect("read");
        assert!(raw.contains("\n  \""), "expected indented JSON");
        assert!(raw.contains("\"defaultModelConfigurationId\""));
    }

    #[test]
    fn save_fails_when_directory_cannot_be_created() {
        let dir = tempfile::tempdir().expect("tempdir");
        let blocker = dir.path().join("not-a-dir");
        fs::write(&blocker, "file").expect("write");
        let store = SettingsStore::new(blocker.join("settings.json"), portable());

        let err = store
            .save(&UserSettings::create_default())
            .expect_err("should fail");
        assert!(matches!(err, SettingsError::CreateDir { .. }));
    }

    #[test]
    fn save_fails_when_target_is_a_directory() {
        let dir = tempfile::tempdir().expect("tempdir");
        let target = dir.path().join("settings.json");
        fs::create_dir(&target).expect("mkdir");
        let store = SettingsStore::new(&target, portable());

        let err = store
            .save(&UserSettings::create_default())
            .expect_err("should fail");
        assert!(matches!(err, SettingsError::Write { .. }));
    }

    #[test]
    fn foreign_ciphertext_survives_load_and_save() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = store_in(dir.path());
        let foreign = format!("{PLATFORM_NATIVE_MARKER}AQAAANCMnd8BFdERjHoAwE");
        fs::write(
            store.path(),
            serde_json::json!({
                "modelConfigurations": [{ "id": "win", "name": "Win", "apiKey": foreign }],
                "defaultModelConfigurationId": "win"
            })
            .to_string(),
        )
        .expect("write");

        let loaded = store.load();
        assert_eq!(
            loaded.model_configurations[0].api_key.as_deref(),
            Some(foreign.as_str())
        );

        store.save(&loaded).expect("save");
        let raw = fs::read_to_string(store.path()).expect("read");
        assert!(!raw.contains(&foreign));
        assert_eq!(
            store.load().model_configurations[0].api_key.as_deref(),
            Some(foreign.as_str())
        );
    }

    #[test]
    fn reset_to_default_overwrites_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = store_in(dir.path());
        let mut settings = UserSettings::create_default();
        settings.upsert(config("a", Some("secret-a")));
        store.save(&settings).expect("save");

        let reset = store.reset_to_default().expect("reset");
        assert_eq!(reset, UserSettings::create_default());
        assert_eq!(store.load(), UserSettings::create_default());
    }

    #[cfg(unix)]
    #[test]
    fn saved_file_is_owner_only() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().expect("tempdir");
        let store = store_in(dir.path());
        store.save(&UserSettings::create_default()).expect("save");

        let mode = fs::metadata(store.path()).expect("metadata").permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }
}
