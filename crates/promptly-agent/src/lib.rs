//! Chat client for OpenAI-compatible chat-completion APIs.

pub mod openai;
