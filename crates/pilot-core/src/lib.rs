//! pilot-core: Shared library for the shellpilot agent
//!
//! Provides:
//! - Configuration loading (pilot.toml)
//! - Gemini API client behind the `ModelClient` trait
//! - Exponential backoff retry wrapper
//! - Append-only conversation transcript

pub mod config;
pub mod conversation;
pub mod gemini;
pub mod retry;

pub use config::{AgentSettings, Config, HarmThreshold, ModelConfig, PathsConfig, SafetyConfig};
pub use conversation::{ConversationStore, Message, Role};
pub use gemini::{GeminiClient, ModelClient};
pub use retry::{retry, RetryConfig};
