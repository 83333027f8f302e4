use pbkdf2::pbkdf2_hmac;
use promptly_core::crypto::CryptoError;
use sha2::Sha256;
use tracing::debug;

/// PBKDF2 rounds for the machine key.
pub const KEY_DERIVATION_ROUNDS: u32 = 10_000;

const APP_SEED: &str = "promptly-cli/settings-encryption/v1";
const KEY_SALT: &[u8] = b"promptly.settings.salt.v1";

/// Key material used for encryption at rest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyMaterial {
    /// Identifier for logging (never log key bytes).
    pub id: String,
    /// 256-bit symmetric key.
    pub bytes: [u8; 32],
}

/// Provides the symmetric key for the portable provider.
pub trait KeyProvider: Send + Sync {
    fn key(&self) -> Result<KeyMaterial, CryptoError>;
}

/// Facts about the current machine and account the key is bound to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MachineIdentity {
    pub machine_name: String,
    pub user_name: String,
    pub platform: String,
    pub processor_count: usize,
}

impl MachineIdentity {
    pub fn current() -> Result<Self, CryptoError> {
        let machine_name = hostname::get()
            .map_err(|e| CryptoError::KeyDerivation {
                reason: format!("hostname unavailable: {e}"),
            })?
            .to_string_lossy()
            .to_string();

        let user_name = ["USER", "USERNAME", "LOGNAME"]
            .iter()
            .find_map(|var| std::env::var(var).ok().filter(|v| !v.is_empty()))
            .unwrap_or_else(|| "unknown-user".to_string());

        let processor_count = std::thread::available_parallelism()
            .map(|n| n.get())
            .map_err(|e| CryptoError::KeyDerivation {
                reason: format!("processor count unavailable: {e}"),
            })?;

        Ok(Self {
            machine_name,
            user_name,
            platform: std::env::consts::OS.to_string(),
            processor_count,
        })
    }

    fn seed(&self) -> String {
        format!(
            "{}|{}|{}|{}|{}",
            self.machine_name, self.user_name, self.platform, self.processor_count, APP_SEED
        )
    }
}

/// Derives the key from the machine identity with PBKDF2-HMAC-SHA256.
/// Stable across runs for the same machine, user, and OS.
#[derive(Debug, Clone)]
pub struct MachineKeyProvider {
    identity: MachineIdentity,
}

impl MachineKeyProvider {
    pub fn current() -> Result<Self, CryptoError> {
        Ok(Self::new(MachineIdentity::current()?))
    }

    pub fn new(identity: MachineIdentity) -> Self {
        Self { identity }
    }
}

impl KeyProvider for MachineKeyProvider {
    fn key(&self) -> Result<KeyMaterial, CryptoError> {
        debug!(
            platform = %self.identity.platform,
            rounds = KEY_DERIVATION_ROUNDS,
            "deriving machine key"
        );
        let mut bytes = [0u8; 32];
        pbkdf2_hmac::<Sha256>(
            self.identity.seed().as_bytes(),
            KEY_SALT,
            KEY_DERIVATION_ROUNDS,
            &mut bytes,
        );
        Ok(KeyMaterial {
            id: "machine".to_string(),
            bytes,
        })
    }
}

/// Fixed key for tests and tooling that must not depend on the host.
#[derive(Debug, Clone)]
pub struct StaticKeyProvider {
    material: KeyMaterial,
}

impl StaticKeyProvider {
    pub fn new(bytes: [u8; 32]) -> Self {
        Self {
            material: KeyMaterial {
                id: "static".to_string(),
                bytes,
            },
        }
    }
}

impl KeyProvider for StaticKeyProvider {
    fn key(&self) -> Result<KeyMaterial, CryptoError> {
        Ok(self.material.clone())
    }
}
