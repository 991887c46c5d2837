//! Conversation persistence layer.
//!
//! SQLite-backed storage for conversations, their immutable message history,
//! and the mutable per-conversation context carried across turns.

mod sqlite;

pub use sqlite::SqliteStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::detect::{EmotionalState, Language};
use crate::error::StorageResult;

/// Transport a conversation arrived on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Channel {
    /// In-app web chat widget.
    Web,
    /// WhatsApp bridge.
    Whatsapp,
}

impl std::fmt::Display for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Channel::Web => write!(f, "web"),
            Channel::Whatsapp => write!(f, "whatsapp"),
        }
    }
}

impl std::str::FromStr for Channel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "web" => Ok(Channel::Web),
            "whatsapp" => Ok(Channel::Whatsapp),
            _ => Err(format!("Unknown channel: {}", s)),
        }
    }
}

/// Author of a message turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Role::User => write!(f, "user"),
            Role::Assistant => write!(f, "assistant"),
        }
    }
}

impl std::str::FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "user" => Ok(Role::User),
            "assistant" => Ok(Role::Assistant),
            _ => Err(format!("Unknown role: {}", s)),
        }
    }
}

/// Safety risk level carried in the conversation context. High is sticky
/// after a crisis turn until the user indicates safety.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    #[default]
    Low,
    Moderate,
    High,
}

impl std::fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RiskLevel::Low => write!(f, "low"),
            RiskLevel::Moderate => write!(f, "moderate"),
            RiskLevel::High => write!(f, "high"),
        }
    }
}

/// Mutable per-conversation summary, owned exclusively by its Conversation.
/// Updated by whole-object replacement after every turn.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConversationContext {
    /// Topic ids discussed so far (set semantics, insertion order kept).
    #[serde(default)]
    pub topics_discussed: Vec<String>,
    #[serde(default)]
    pub emotional_state: EmotionalState,
    #[serde(default)]
    pub risk_level: RiskLevel,
    /// Monotonic turn counter.
    #[serde(default)]
    pub session_count: i64,
    #[serde(default)]
    pub language_preference: Language,
}

impl ConversationContext {
    /// Add a topic if not already present.
    pub fn note_topic(&mut self, topic: impl Into<String>) {
        let topic = topic.into();
        if !self.topics_discussed.contains(&topic) {
            self.topics_discussed.push(topic);
        }
    }
}

/// A continuous dialogue on one channel. At most one active conversation
/// exists per `(session_id, channel)` pair.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Conversation {
    pub id: String,
    /// Opaque client-supplied token, unique per device or WhatsApp thread.
    pub session_id: String,
    pub channel: Channel,
    /// Anonymous sessions are allowed.
    pub user_id: Option<String>,
    /// Last resolved language.
    pub language: Language,
    pub context: ConversationContext,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Conversation {
    /// Create a new conversation for a session/channel pair.
    pub fn new(session_id: impl Into<String>, channel: Channel) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            session_id: session_id.into(),
            channel,
            user_id: None,
            language: Language::En,
            context: ConversationContext::default(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Attach a user id.
    pub fn with_user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }
}

/// An immutable turn. Created once, never mutated; ordering is by creation
/// time and stable for history replay.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredMessage {
    pub id: String,
    pub conversation_id: String,
    pub role: Role,
    pub content: String,
    /// Optional turn metadata: knowledge-sources count, flow step, category.
    pub metadata: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
}

impl StoredMessage {
    /// Create a new message turn.
    pub fn new(
        conversation_id: impl Into<String>,
        role: Role,
        content: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            conversation_id: conversation_id.into(),
            role,
            content: content.into(),
            metadata: None,
            created_at: Utc::now(),
        }
    }

    /// Set metadata.
    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = Some(metadata);
        self
    }
}

/// Storage trait for conversation persistence.
#[async_trait]
pub trait ConversationStore: Send + Sync {
    /// Find the conversation for `(session_id, channel)`, creating it if
    /// absent. Idempotent, and safe under concurrent first calls: the
    /// uniqueness constraint lives in the storage layer, so the second
    /// caller observes the row created by the first.
    async fn find_or_create(
        &self,
        session_id: &str,
        channel: Channel,
        user_id: Option<&str>,
    ) -> StorageResult<Conversation>;

    /// Look up a conversation without creating it.
    async fn get_conversation(
        &self,
        session_id: &str,
        channel: Channel,
    ) -> StorageResult<Option<Conversation>>;

    /// Append an immutable message turn.
    async fn append_message(&self, message: &StoredMessage) -> StorageResult<()>;

    /// Replace the conversation context wholesale and record the last
    /// resolved language. Whole-object replacement avoids partial-update
    /// races; callers re-read-merge before writing.
    async fn update_context(
        &self,
        conversation_id: &str,
        context: &ConversationContext,
        language: Language,
    ) -> StorageResult<()>;

    /// The most recent `limit` messages, returned oldest-to-newest.
    async fn recent_messages(
        &self,
        conversation_id: &str,
        limit: u32,
    ) -> StorageResult<Vec<StoredMessage>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_channel_round_trip() {
        assert_eq!("whatsapp".parse::<Channel>().unwrap(), Channel::Whatsapp);
        assert_eq!(Channel::Web.to_string(), "web");
        assert!("sms".parse::<Channel>().is_err());
    }

    #[test]
    fn test_risk_level_ordering() {
        assert!(RiskLevel::High > RiskLevel::Moderate);
        assert!(RiskLevel::Moderate > RiskLevel::Low);
    }

    #[test]
    fn test_note_topic_is_set_like() {
        let mut ctx = ConversationContext::default();
        ctx.note_topic("stress");
        ctx.note_topic("anxiety");
        ctx.note_topic("stress");
        assert_eq!(ctx.topics_discussed, vec!["stress", "anxiety"]);
    }

    #[test]
    fn test_context_serde_defaults() {
        let ctx: ConversationContext = serde_json::from_str("{}").unwrap();
        assert_eq!(ctx.risk_level, RiskLevel::Low);
        assert_eq!(ctx.session_count, 0);
    }

    #[test]
    fn test_message_builder() {
        let msg = StoredMessage::new("conv-1", Role::Assistant, "hello")
            .with_metadata(serde_json::json!({ "category": "stress" }));
        assert_eq!(msg.conversation_id, "conv-1");
        assert_eq!(msg.role, Role::Assistant);
        assert!(msg.metadata.is_some());
    }
}
