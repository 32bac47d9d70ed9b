//! Wire envelope exchanged over a node link.

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

/// One message exchanged over a node link.
///
/// A frame that expects a reply carries a correlation `uuid`; the matching
/// reply echoes it back. Fire-and-forget frames carry none. The payload is
/// opaque here; its shape is a contract between the two handlers that
/// speak the given `kind`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Frame {
    /// Semantic kind of the message, e.g. `"auth"` or `"pong"`.
    #[serde(rename = "type")]
    pub kind: String,
    /// Payload; shape depends on `kind`. Missing on the wire parses as
    /// JSON null.
    #[serde(default)]
    pub data: Value,
    /// Correlation id linking a request frame to its reply.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uuid: Option<String>,
}

impl Frame {
    /// Fire-and-forget frame with no correlation id.
    pub fn notification(kind: impl Into<String>, data: Value) -> Self {
        Self {
            kind: kind.into(),
            data,
            uuid: None,
        }
    }

    /// Error frame with the conventional `errorLevel` / `errorMessage`
    /// payload.
    pub fn error(level: ErrorLevel, message: impl Into<String>) -> Self {
        Self::notification(
            "error",
            json!({ "errorLevel": level, "errorMessage": message.into() }),
        )
    }

    /// The synthetic reply a request resolves with when its deadline
    /// passes. Synthesized locally and never transmitted, so it carries no
    /// correlation id.
    pub fn timeout_error() -> Self {
        Self::error(ErrorLevel::Timeout, "Timeout")
    }
}

/// Severity tag carried in the `errorLevel` field of error frames.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorLevel {
    /// A request's deadline passed with no reply.
    Timeout,
    /// Recoverable problem with an inbound frame; the link stays usable.
    Warning,
    /// The frame was rejected outright (failed auth, unusable payload).
    Severe,
}

impl ErrorLevel {
    /// Wire string for this level.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Timeout => "TIMEOUT",
            Self::Warning => "WARNING",
            Self::Severe => "SEVERE",
        }
    }
}

impl std::fmt::Display for ErrorLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
