//! The persisted settings document: named model configurations plus the id of
//! the one used by default.

mod encrypted_fields;

pub use encrypted_fields::{EncryptedField, EncryptedFields};

use serde::{Deserialize, Deserializer, Serialize};
use tracing::debug;

use crate::chat::OutputFormat;

pub const DEFAULT_CONFIGURATION_ID: &str = "default";
pub const DEFAULT_CONFIGURATION_NAME: &str = "Default Configuration";
pub const DEFAULT_MODEL: &str = "gpt-3.5-turbo";
pub const DEFAULT_FORMAT: &str = "text";
pub const DEFAULT_TEMPERATURE: f32 = 0.7;
/// Seconds. Advisory only.
pub const DEFAULT_REFRESH_INTERVAL: u64 = 60;

/// One named endpoint/model profile.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ModelConfiguration {
    /// Unique key within the document.
    #[serde(default, deserialize_with = "null_as_default")]
    pub id: String,
    /// Display name.
    #[serde(default, deserialize_with = "null_as_default")]
    pub name: String,
    /// Secret; encrypted at rest (see [`EncryptedFields`]).
    #[serde(default)]
    pub api_key: Option<String>,
    /// Overrides the default API endpoint.
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub model: String,
    #[serde(
        default = "default_temperature",
        deserialize_with = "null_as_default_temperature"
    )]
    pub temperature: f32,
    #[serde(default)]
    pub max_tokens: Option<u32>,
    /// `"text"` or `"json"`.
    #[serde(default, deserialize_with = "null_as_default")]
    pub format: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub stream: bool,
}

impl ModelConfiguration {
    /// Configuration populated with the fixed defaults and no API key.
    pub fn create_default() -> Self {
        Self {
            id: DEFAULT_CONFIGURATION_ID.to_string(),
            name: DEFAULT_CONFIGURATION_NAME.to_string(),
            api_key: None,
            base_url: None,
            model: DEFAULT_MODEL.to_string(),
            temperature: DEFAULT_TEMPERATURE,
            max_tokens: None,
            format: DEFAULT_FORMAT.to_string(),
            stream: false,
        }
    }

    /// Parsed output format; unknown values fall back to text.
    pub fn output_format(&self) -> OutputFormat {
        self.format.parse().unwrap_or_else(|_| {
            debug!(id = %self.id, format = %self.format, "unknown format, using text");
            OutputFormat::Text
        })
    }

    pub fn has_api_key(&self) -> bool {
        self.api_key.as_deref().is_some_and(|key| !key.is_empty())
    }

    /// Backfill required fields left empty. Returns true if anything changed.
    fn repair(&mut self) -> bool {
        let mut changed = false;
        for (value, fallback) in [
            (&mut self.model, DEFAULT_MODEL),
            (&mut self.format, DEFAULT_FORMAT),
            (&mut self.id, DEFAULT_CONFIGURATION_ID),
            (&mut self.name, DEFAULT_CONFIGURATION_NAME),
        ] {
            if value.trim().is_empty() {
                *value = fallback.to_string();
                changed = true;
            }
        }
        changed
    }
}

impl Default for ModelConfiguration {
    fn default() -> Self {
        Self::create_default()
    }
}

/// Top-level persisted unit. One per settings file.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct UserSettings {
    #[serde(default, deserialize_with = "null_as_default")]
    pub model_configurations: Vec<ModelConfiguration>,
    /// Must name an existing configuration whenever the list is non-empty.
    #[serde(default, deserialize_with = "null_as_default")]
    pub default_model_configuration_id: String,
    #[serde(
        default = "default_refresh_interval",
        deserialize_with = "null_as_default_refresh_interval"
    )]
    pub refresh_interval: u64,
}

impl UserSettings {
    /// Empty document: no configurations, no default id.
    pub fn create_default() -> Self {
        Self {
            model_configurations: Vec::new(),
            default_model_configuration_id: String::new(),
            refresh_interval: DEFAULT_REFRESH_INTERVAL,
        }
    }

    /// Enforce the structural invariants: every configuration has its
    /// required fields, and the default id names an existing configuration
    /// (the first one) or is empty when there are none.
    ///
    /// Returns true if anything was changed.
    pub fn repair(&mut self) -> bool {
        let mut changed = false;
        for config in &mut self.model_configurations {
            changed |= config.repair();
        }

        let dangling = self.find(&self.default_model_configuration_id).is_none();
        if dangling {
            let replacement = self
                .model_configurations
                .first()
                .map(|config| config.id.clone())
                .unwrap_or_default();
            if replacement != self.default_model_configuration_id {
                debug!(
                    from = %self.default_model_configuration_id,
                    to = %replacement,
                    "repairing default configuration id"
                );
                self.default_model_configuration_id = replacement;
                changed = true;
            }
        }
        changed
    }

    pub fn find(&self, id: &str) -> Option<&ModelConfiguration> {
        if id.is_empty() {
            return None;
        }
        self.model_configurations.iter().find(|c| c.id == id)
    }

    pub fn find_mut(&mut self, id: &str) -> Option<&mut ModelConfiguration> {
        if id.is_empty() {
            return None;
        }
        self.model_configurations.iter_mut().find(|c| c.id == id)
    }

    /// The configuration named by the default id, if any.
    pub fn default_configuration(&self) -> Option<&ModelConfiguration> {
        self.find(&self.default_model_configuration_id)
    }

    /// Add a configuration, or replace the one with the same id in place.
    /// The first configuration added to an empty document becomes the default.
    pub fn upsert(&mut self, config: ModelConfiguration) {
        match self.find_mut(&config.id) {
            Some(existing) => *existing = config,
            None => self.model_configurations.push(config),
        }
        self.repair();
    }

    /// Remove the configuration with `id`. Returns false if none matched.
    pub fn remove(&mut self, id: &str) -> bool {
        let before = self.model_configurations.len();
        self.model_configurations.retain(|c| c.id != id);
        let removed = self.model_configurations.len() != before;
        if removed {
            self.repair();
        }
        removed
    }

    /// Point the default id at `id`. Returns false if no such configuration.
    pub fn set_default(&mut self, id: &str) -> bool {
        if self.find(id).is_none() {
            return false;
        }
        self.default_model_configuration_id = id.to_string();
        true
    }
}

impl Default for UserSettings {
    fn default() -> Self {
        Self::create_default()
    }
}

fn default_temperature() -> f32 {
    DEFAULT_TEMPERATURE
}

fn default_refresh_interval() -> u64 {
    DEFAULT_REFRESH_INTERVAL
}

/// Treat an explicit JSON `null` like a missing key.
fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

fn null_as_default_temperature<'de, D>(deserializer: D) -> Result<f32, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<f32>::deserialize(deserializer)?.unwrap_or(DEFAULT_TEMPERATURE))
}

fn null_as_default_refresh_interval<'de, D>(deserializer: D) -> Result<u64, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<u64>::deserialize(deserializer)?.unwrap_or(DEFAULT_REFRESH_INTERVAL))
}
