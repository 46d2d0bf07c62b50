//! Structured reply extraction from raw model output
//!
//! The model is asked to answer with `{"response": ..., "command": ...}` but
//! regularly wraps the object in prose or breaks lines inside string values.
//! Recovery drops every line break, keeps the span from
//! the first `{` to the last `}` and parses that.

use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

/// Reserved command value meaning "nothing to run"
pub const NO_COMMAND: &str = "none";

/// A model turn after validation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    Structured(StructuredReply),
    /// The text did not contain a usable reply object
    Invalid,
}

/// Validated `{response, command}` payload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StructuredReply {
    /// Text meant for the human
    pub response: String,
    /// Shell command to run; `None` when the model sent the sentinel or no command
    pub command: Option<String>,
}

#[derive(Deserialize)]
struct RawReply {
    response: String,
    #[serde(default)]
    command: Option<String>,
}

impl From<RawReply> for StructuredReply {
    fn from(raw: RawReply) -> Self {
        let command = raw
            .command
            .filter(|c| !c.trim().is_empty() && !c.trim().eq_ignore_ascii_case(NO_COMMAND));
        Self {
            response: raw.response,
            command,
        }
    }
}

/// Extract a structured reply from raw model text. Never fails.
pub fn interpret(raw: &str) -> Reply {
    let normalized = normalize(raw);
    let candidate = json_span(&normalized);

    let value: Value = match serde_json::from_str(candidate) {
        Ok(v) => v,
        Err(e) => {
            debug!(error = %e, "Reply is not valid JSON");
            return Reply::Invalid;
        }
    };

    if !value.is_object() {
        debug!("Reply JSON is not an object");
        return Reply::Invalid;
    }

    match serde_json::from_value::<RawReply>(value) {
        Ok(raw) => Reply::Structured(raw.into()),
        Err(e) => {
            debug!(error = %e, "Reply object does not match the reply contract");
            Reply::Invalid
        }
    }
}

/// Trim and remove escaped and literal line breaks
fn normalize(raw: &str) -> String {
    raw.trim()
        .replace("\\n", "")
        .replace("\\r", "")
        .replace(['\n', '\r'], "")
}

/// Slice from the first `{` to the last `}` when both exist in that order
fn json_span(text: &str) -> &str {
    match (text.find('{'), text.rfind('}')) {
        (Some(start), Some(end)) if start < end => &text[start..=end],
        _ => text,
    }
}
