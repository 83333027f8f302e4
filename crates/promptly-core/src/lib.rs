//! Core abstractions for Promptly: chat client contracts, the persisted
//! settings document, and the encryption contract used for secrets at rest.
//! This crate is intentionally small to keep dependency surface minimal.

pub mod chat;
pub mod crypto;
pub mod settings;
