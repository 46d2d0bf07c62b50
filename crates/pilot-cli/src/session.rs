//! Conversation session with the remote model
//!
//! A session owns its transcript and its model handle. Separate users must
//! get separate sessions.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use pilot_core::{retry, ConversationStore, ModelClient, RetryConfig, Role};
use std::fs;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info};

/// Fixed model turn recorded after the pilot prompt
pub const PILOT_ACKNOWLEDGEMENT: &str = "OK, I'm going to follow these instructions exactly. I'm ready to send some commands! And always format my json properly!";

/// Load the pilot prompt that opens every session
pub fn load_pilot_prompt(path: &Path) -> Result<String> {
    let prompt = fs::read_to_string(path)
        .with_context(|| format!("Pilot prompt not found at {}", path.display()))?;

    if prompt.trim().is_empty() {
        anyhow::bail!("Pilot prompt at {} is empty", path.display());
    }

    info!(path = %path.display(), "Pilot prompt loaded successfully");
    Ok(prompt)
}

/// Live conversation: transcript plus the model it is held with
pub struct Session {
    transcript: ConversationStore,
    client: Arc<dyn ModelClient>,
    started_at: DateTime<Utc>,
}

impl Session {
    /// Start a session seeded with the pilot prompt and its acknowledgement
    pub fn start(client: Arc<dyn ModelClient>, pilot_prompt: &str) -> Self {
        let mut transcript = ConversationStore::new();
        transcript.append(Role::User, pilot_prompt);
        transcript.append(Role::Model, PILOT_ACKNOWLEDGEMENT);

        Self {
            transcript,
            client,
            started_at: Utc::now(),
        }
    }

    /// Record `prompt`, send the transcript and record the reply
    ///
    /// The prompt stays in the transcript even when every attempt fails.
    pub async fn send(&mut self, prompt: String, policy: &RetryConfig) -> Result<String> {
        self.transcript.append(Role::User, prompt);

        let client = &self.client;
        let snapshot = self.transcript.snapshot();
        debug!(messages = snapshot.len(), "Sending transcript to model");

        let reply = retry(policy, move || client.generate(snapshot))
            .await
            .context("Model request failed")?;

        self.transcript.append(Role::Model, reply.clone());
        Ok(reply)
    }

    #[cfg(test)]
    pub fn transcript(&self) -> &[pilot_core::Message] {
        self.transcript.snapshot()
    }

    pub fn len(&self) -> usize {
        self.transcript.len()
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }
}
