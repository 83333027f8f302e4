use thiserror::Error;

/// Errors produced by encryption providers.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CryptoError {
    /// Key material could not be derived or loaded.
    #[error("key derivation failed: {reason}")]
    KeyDerivation { reason: String },
    /// The cipher could not be initialised with the derived key.
    #[error("cipher init failed: {reason}")]
    CipherInit { reason: String },
    #[error("encrypt failed: {reason}")]
    Encrypt { reason: String },
    #[error("decrypt failed: {reason}")]
    Decrypt { reason: String },
    /// Marker was present but the payload is not valid base64 / too short.
    #[error("malformed ciphertext: {reason}")]
    Malformed { reason: String },
    /// The requested provider is not available on this platform.
    #[error("encryption provider `{provider}` is not supported on {platform}")]
    UnsupportedPlatform {
        provider: &'static str,
        platform: &'static str,
    },
}

/// Encrypts individual string values for storage at rest.
///
/// Ciphertext is tagged with a provider-specific marker prefix so that
/// plaintext and encrypted values can live side by side in the same file.
/// Implementations hold their key material for their whole lifetime; the
/// methods themselves carry no other state.
pub trait EncryptionProvider: Send + Sync {
    /// Short name used for logging.
    fn name(&self) -> &'static str;

    /// Marker prefix this provider puts in front of its ciphertext.
    fn marker(&self) -> &'static str;

    /// Encrypt `plaintext`. Empty input is returned unchanged.
    fn encrypt(&self, plaintext: &str) -> Result<String, CryptoError>;

    /// Decrypt a marker-prefixed value. Values without the marker are
    /// returned unchanged.
    fn decrypt(&self, ciphertext: &str) -> Result<String, CryptoError>;

    /// True iff `value` is non-empty and carries this provider's marker.
    fn is_encrypted(&self, value: &str) -> bool {
        !value.is_empty() && value.starts_with(self.marker())
    }

    fn encrypt_optional(&self, plaintext: Option<&str>) -> Result<Option<String>, CryptoError> {
        plaintext.map(|value| self.encrypt(value)).transpose()
    }

    fn decrypt_optional(&self, ciphertext: Option<&str>) -> Result<Option<String>, CryptoError> {
        ciphertext.map(|value| self.decrypt(value)).transpose()
    }
}
