//! Settings persistence with selective field encryption.
//! AES-GCM with a machine-derived key everywhere; Windows DPAPI where available.

pub mod key_provider;
pub mod portable;
#[cfg(windows)]
pub mod dpapi;
pub mod provider;
pub mod settings_store;
