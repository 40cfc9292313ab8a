//! Session record types persisted per conversation.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Message role in a conversation history.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    /// User message
    User,
    /// Assistant (AI) response
    Assistant,
    /// System message
    System,
}

impl MessageRole {
    /// Convert to string representation for backend storage.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Assistant => "assistant",
            Self::System => "system",
        }
    }

    /// Parse from string representation.
    pub fn parse(s: &str) -> Self {
        match s {
            "assistant" => Self::Assistant,
            "system" => Self::System,
            _ => Self::User, // Default fallback
        }
    }
}

/// A single role-tagged entry in a conversation history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: MessageRole,
    pub content: String,
}

impl ChatMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self { role: MessageRole::User, content: content.into() }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self { role: MessageRole::Assistant, content: content.into() }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self { role: MessageRole::System, content: content.into() }
    }
}

/// Token usage counters reported by a provider for one generation cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct TokenUsage {
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub total_tokens: u64,
}

impl TokenUsage {
    pub const fn new(input_tokens: u64, output_tokens: u64) -> Self {
        Self { input_tokens, output_tokens, total_tokens: input_tokens + output_tokens }
    }
}

/// Processing status of the current generation cycle.
///
/// Starts at `Processing` on creation; `Completed` and `Error` are
/// terminal for that cycle. A new request for the conversation starts
/// a new cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Processing,
    Completed,
    Error,
}

impl SessionStatus {
    /// Convert to string representation for backend storage.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Error => "error",
        }
    }

    /// Parse from string representation.
    pub fn parse(s: &str) -> Self {
        match s {
            "completed" => Self::Completed,
            "error" => Self::Error,
            _ => Self::Processing, // Default fallback
        }
    }

    /// Whether this status ends a generation cycle.
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Error)
    }
}

/// Persisted state for one conversation identifier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionRecord {
    /// Status of the current generation cycle.
    pub status: SessionStatus,
    /// Last response text (or the recorded error message when `status` is `Error`).
    pub response: Option<String>,
    /// Ordered message history. Append-only: the core never reorders or
    /// drops entries, only appends what callers hand it.
    pub messages: Vec<ChatMessage>,
    /// Token usage for the last completed cycle.
    pub usage: Option<TokenUsage>,
    /// Free-form caller-supplied fields, opaque to the core.
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
    /// Unix seconds of the last successful write. Sole input to expiry.
    pub last_activity: i64,
}

impl SessionRecord {
    /// Fresh record for a conversation that just received its first message.
    pub fn new() -> Self {
        Self {
            status: SessionStatus::Processing,
            response: None,
            messages: Vec::new(),
            usage: None,
            metadata: HashMap::new(),
            last_activity: Utc::now().timestamp(),
        }
    }

    /// Refresh `last_activity` to now. Called by the store on every
    /// successful write.
    pub fn touch(&mut self) {
        self.last_activity = Utc::now().timestamp();
    }

    /// Seconds of inactivity relative to `now`.
    pub const fn idle_seconds(&self, now: i64) -> i64 {
        now - self.last_activity
    }

    /// Merge a partial update into this record and refresh `last_activity`.
    ///
    /// History entries are appended, never replaced.
    pub fn apply(&mut self, update: SessionUpdate) {
        if let Some(status) = update.status {
            self.status = status;
        }
        if let Some(response) = update.response {
            self.response = Some(response);
        }
        self.messages.extend(update.append_messages);
        if let Some(usage) = update.usage {
            self.usage = Some(usage);
        }
        self.metadata.extend(update.metadata);
        self.touch();
    }
}

impl Default for SessionRecord {
    fn default() -> Self {
        Self::new()
    }
}

/// Partial merge applied by `SessionStore::update`.
///
/// Every field is optional; `append_messages` makes history merges
/// append-only by construction.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SessionUpdate {
    pub status: Option<SessionStatus>,
    pub response: Option<String>,
    #[serde(default)]
    pub append_messages: Vec<ChatMessage>,
    pub usage: Option<TokenUsage>,
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
}

impl SessionUpdate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_status(mut self, status: SessionStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn with_response(mut self, response: impl Into<String>) -> Self {
        self.response = Some(response.into());
        self
    }

    pub fn with_message(mut self, message: ChatMessage) -> Self {
        self.append_messages.push(message);
        self
    }

    pub fn with_usage(mut self, usage: TokenUsage) -> Self {
        self.usage = Some(usage);
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }
}
