use aes_gcm::{
    aead::{Aead, AeadCore, KeyInit, OsRng},
    Aes256Gcm, Nonce,
};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use promptly_core::crypto::{CryptoError, EncryptionProvider};
use tracing::debug;

use crate::key_provider::{KeyMaterial, KeyProvider};

/// Marker prefix for values written by [`PortableEncryption`].
pub const PORTABLE_MARKER: &str = "ENC:";

const NONCE_SIZE: usize = 12;

/// AES-256-GCM with a key fetched once at construction.
///
/// Output is `ENC:` + base64(nonce || ciphertext || tag). Every call uses a
/// fresh random nonce, so equal plaintexts never produce equal ciphertexts.
pub struct PortableEncryption {
    cipher: Aes256Gcm,
    key_id: String,
}

impl PortableEncryption {
    pub fn new(key_provider: &impl KeyProvider) -> Result<Self, CryptoError> {
        let material = key_provider.key()?;
        Self::from_key(&material)
    }

    pub fn from_key(material: &KeyMaterial) -> Result<Self, CryptoError> {
        let cipher = Aes256Gcm::new_from_slice(&material.bytes).map_err(|e| {
            CryptoError::CipherInit {
                reason: e.to_string(),
            }
        })?;
        debug!(key_id = %material.id, "portable encryption ready");
        Ok(Self {
            cipher,
            key_id: material.id.clone(),
        })
    }

    pub fn key_id(&self) -> &str {
        &self.key_id
    }
}

impl EncryptionProvider for PortableEncryption {
    fn name(&self) -> &'static str {
        "aes-gcm"
    }

    fn marker(&self) -> &'static str {
        PORTABLE_MARKER
    }

    fn encrypt(&self, plaintext: &str) -> Result<String, CryptoError> {
        if plaintext.is_empty() {
            return Ok(String::new());
        }

        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
        let ciphertext = self
            .cipher
            .encrypt(&nonce, plaintext.as_bytes())
            .map_err(|e| CryptoError::Encrypt {
                reason: e.to_string(),
            })?;

        let mut payload = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
        payload.extend_from_slice(nonce.as_slice());
        payload.extend_from_slice(&ciphertext);
        Ok(format!("{PORTABLE_MARKER}{}", STANDARD.encode(payload)))
    }

    fn decrypt(&self, ciphertext: &str) -> Result<String, CryptoError> {
        let Some(encoded) = ciphertext.strip_prefix(PORTABLE_MARKER) else {
            return Ok(ciphertext.to_string());
        };

        let payload = STANDARD.decode(encoded).map_err(|e| CryptoError::Malformed {
            reason: format!("base64 decode failed: {e}"),
        })?;
        if payload.len() < NONCE_SIZE {
            return Err(CryptoError::Malformed {
                reason: "ciphertext too short".to_string(),
            });
        }

        let (nonce_bytes, body) = payload.split_at(NONCE_SIZE);
        let plaintext = self
            .cipher
            .decrypt(Nonce::from_slice(nonce_bytes), body)
            .map_err(|e| CryptoError::Decrypt {
                reason: e.to_string(),
            })?;

        String::from_utf8(plaintext).map_err(|e| CryptoError::Decrypt {
            reason: format!("plaintext is not utf-8: {e}"),
        })
    }
}
