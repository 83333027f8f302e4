use super::{ModelConfiguration, UserSettings};

/// Mutable handle to one field that must be encrypted at rest.
#[derive(Debug)]
pub struct EncryptedField<'a> {
    /// Serialized field name, for logging. Never log the value.
    pub name: &'static str,
    pub value: &'a mut Option<String>,
}

/// Types that carry secrets list the fields holding them here.
///
/// Anything not returned by [`EncryptedFields::encrypted_fields`] is written
/// to disk as-is.
pub trait EncryptedFields {
    /// Serialized names of the encrypted fields, in a stable order.
    const ENCRYPTED_FIELD_NAMES: &'static [&'static str];

    fn encrypted_fields(&mut self) -> Vec<EncryptedField<'_>>;
}

impl EncryptedFields for ModelConfiguration {
    const ENCRYPTED_FIELD_NAMES: &'static [&'static str] = &["apiKey"];

    fn encrypted_fields(&mut self) -> Vec<EncryptedField<'_>> {
        vec![EncryptedField {
            name: "apiKey",
            value: &mut self.api_key,
        }]
    }
}

impl UserSettings {
    /// Visit every encrypted field of every configuration, with the owning
    /// configuration's id.
    pub fn for_each_encrypted_field(&mut self, mut visit: impl FnMut(&str, EncryptedField<'_>)) {
        for config in &mut self.model_configurations {
            let id = config.id.clone();
            for field in config.encrypted_fields() {
                visit(&id, field);
            }
        }
    }
}
