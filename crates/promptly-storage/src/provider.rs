use std::{str::FromStr, sync::Arc};

use promptly_core::crypto::{CryptoError, EncryptionProvider};
use tracing::info;

use crate::{
    key_provider::MachineKeyProvider,
    portable::{PortableEncryption, PORTABLE_MARKER},
};

/// Marker prefix for values written by the Windows DPAPI provider. Defined on
/// every platform so foreign ciphertext can be recognised.
pub const PLATFORM_NATIVE_MARKER: &str = "DPAPI:";

/// Markers of every provider this crate knows, whatever the platform.
pub const KNOWN_MARKERS: [&str; 2] = [PORTABLE_MARKER, PLATFORM_NATIVE_MARKER];

/// True if `value` still carries any provider's marker, i.e. it is ciphertext
/// that the active provider could not (or did not) turn back into plaintext.
pub fn carries_any_marker(value: &str) -> bool {
    !value.is_empty() && KNOWN_MARKERS.iter().any(|marker| value.starts_with(marker))
}

/// Which encryption provider protects the settings file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderKind {
    /// AES-256-GCM with a machine-derived key; available everywhere.
    Portable,
    /// OS per-user data protection (DPAPI); Windows only.
    PlatformNative,
}

impl ProviderKind {
    /// Platform-native where the OS offers it, portable elsewhere.
    pub fn platform_default() -> Self {
        if cfg!(windows) {
            ProviderKind::PlatformNative
        } else {
            ProviderKind::Portable
        }
    }
}

impl FromStr for ProviderKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "portable" | "aes" => Ok(ProviderKind::Portable),
            "native" | "platform" | "dpapi" => Ok(ProviderKind::PlatformNative),
            other => Err(format!(
                "unknown encryption provider `{other}` (expected portable or native)"
            )),
        }
    }
}

/// Construct the provider for `kind`. Key derivation happens here, once.
pub fn build_provider(kind: ProviderKind) -> Result<Arc<dyn EncryptionProvider>, CryptoError> {
    let provider: Arc<dyn EncryptionProvider> = match kind {
        ProviderKind::Portable => {
            Arc::new(PortableEncryption::new(&MachineKeyProvider::current()?)?)
        }
        ProviderKind::PlatformNative => native_provider()?,
    };
    info!(provider = provider.name(), "encryption provider initialised");
    Ok(provider)
}

#[cfg(windows)]
fn native_provider() -> Result<Arc<dyn EncryptionProvider>, CryptoError> {
    Ok(Arc::new(crate::dpapi::DpapiEncryption::new()?))
}

#[cfg(not(windows))]
fn native_provider() -> Result<Arc<dyn EncryptionProvider>, CryptoError> {
    Err(CryptoError::UnsupportedPlatform {
        provider: "dpapi",
        platform: std::env::consts::OS,
    })
}
