use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::migrate::Migrator;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::str::FromStr;
use tracing::info;

use super::{Channel, Conversation, ConversationContext, ConversationStore, Role, StoredMessage};
use crate::config::DatabaseConfig;
use crate::detect::Language;
use crate::error::{StorageError, StorageResult};

/// Static migrator that embeds migrations at compile time
static MIGRATOR: Migrator = sqlx::migrate!("./migrations");

/// SQLite-backed conversation store
#[derive(Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Create a new SQLite store instance
    pub async fn new(config: &DatabaseConfig) -> StorageResult<Self> {
        // Ensure parent directory exists
        if let Some(parent) = config.path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| StorageError::Connection {
                message: format!("Failed to create database directory: {}", e),
            })?;
        }

        let database_url = format!("sqlite://{}?mode=rwc", config.path.display());

        let options = SqliteConnectOptions::from_str(&database_url)
            .map_err(|e| StorageError::Connection {
                message: format!("Invalid database URL: {}", e),
            })?
            .create_if_missing(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(config.max_connections)
            .connect_with(options)
            .await
            .map_err(|e| StorageError::Connection {
                message: format!("Failed to connect to database: {}", e),
            })?;

        let store = Self { pool };
        store.run_migrations().await?;

        Ok(store)
    }

    /// Create an in-memory store for tests. A single connection keeps the
    /// same in-memory database alive across the pool's lifetime.
    pub async fn new_in_memory() -> StorageResult<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")
            .map_err(|e| StorageError::Connection {
                message: format!("Invalid database URL: {}", e),
            })?
            .create_if_missing(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await
            .map_err(|e| StorageError::Connection {
                message: format!("Failed to connect to in-memory database: {}", e),
            })?;

        let store = Self { pool };
        store.run_migrations().await?;

        Ok(store)
    }

    /// Run database migrations using embedded sqlx migrations
    async fn run_migrations(&self) -> StorageResult<()> {
        info!("Running database migrations...");

        MIGRATOR
            .run(&self.pool)
            .await
            .map_err(|e| StorageError::Migration {
                message: format!("Failed to run migrations: {}", e),
            })?;

        info!("Database migrations completed successfully");
        Ok(())
    }

    /// Get the underlying pool for advanced queries
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

#[async_trait]
impl ConversationStore for SqliteStore {
    async fn find_or_create(
        &self,
        session_id: &str,
        channel: Channel,
        user_id: Option<&str>,
    ) -> StorageResult<Conversation> {
        let candidate = Conversation::new(session_id, channel);
        let context = serde_json::to_string(&candidate.context).unwrap_or_default();

        // The unique index on (session_id, channel) makes this safe under
        // concurrent first turns: the loser of the race inserts nothing and
        // the re-select below observes the winner's row.
        sqlx::query(
            r#"
            INSERT INTO conversations (id, session_id, channel, user_id, language, context, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT (session_id, channel) DO NOTHING
            "#,
        )
        .bind(&candidate.id)
        .bind(session_id)
        .bind(channel.to_string())
        .bind(user_id)
        .bind(candidate.language.to_string())
        .bind(&context)
        .bind(candidate.created_at.to_rfc3339())
        .bind(candidate.updated_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        let row: ConversationRow = sqlx::query_as(
            r#"
            SELECT id, session_id, channel, user_id, language, context, created_at, updated_at
            FROM conversations
            WHERE session_id = ? AND channel = ?
            "#,
        )
        .bind(session_id)
        .bind(channel.to_string())
        .fetch_one(&self.pool)
        .await?;

        Ok(row.into())
    }

    async fn get_conversation(
        &self,
        session_id: &str,
        channel: Channel,
    ) -> StorageResult<Option<Conversation>> {
        let row: Option<ConversationRow> = sqlx::query_as(
            r#"
            SELECT id, session_id, channel, user_id, language, context, created_at, updated_at
            FROM conversations
            WHERE session_id = ? AND channel = ?
            "#,
        )
        .bind(session_id)
        .bind(channel.to_string())
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|r| r.into()))
    }

    async fn append_message(&self, message: &StoredMessage) -> StorageResult<()> {
        let metadata = message
            .metadata
            .as_ref()
            .map(|m| serde_json::to_string(m).unwrap_or_default());

        sqlx::query(
            r#"
            INSERT INTO messages (id, conversation_id, role, content, metadata, created_at)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&message.id)
        .bind(&message.conversation_id)
        .bind(message.role.to_string())
        .bind(&message.content)
        .bind(&metadata)
        .bind(message.created_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn update_context(
        &self,
        conversation_id: &str,
        context: &ConversationContext,
        language: Language,
    ) -> StorageResult<()> {
        let context_json = serde_json::to_string(context).unwrap_or_default();

        let result = sqlx::query(
            r#"
            UPDATE conversations
            SET context = ?, language = ?, updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(&context_json)
        .bind(language.to_string())
        .bind(Utc::now().to_rfc3339())
        .bind(conversation_id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StorageError::ConversationNotFound {
                conversation_id: conversation_id.to_string(),
            });
        }

        Ok(())
    }

    async fn recent_messages(
        &self,
        conversation_id: &str,
        limit: u32,
    ) -> StorageResult<Vec<StoredMessage>> {
        // Newest window first, then reversed to oldest-to-newest for replay.
        // rowid breaks created_at ties so ordering stays stable.
        let rows: Vec<MessageRow> = sqlx::query_as(
            r#"
            SELECT id, conversation_id, role, content, metadata, created_at
            FROM messages
            WHERE conversation_id = ?
            ORDER BY created_at DESC, rowid DESC
            LIMIT ?
            "#,
        )
        .bind(conversation_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        let mut messages: Vec<StoredMessage> = rows.into_iter().map(|r| r.into()).collect();
        messages.reverse();
        Ok(messages)
    }
}

#[derive(sqlx::FromRow)]
struct ConversationRow {
    id: String,
    session_id: String,
    channel: String,
    user_id: Option<String>,
    language: String,
    context: String,
    created_at: String,
    updated_at: String,
}

impl From<ConversationRow> for Conversation {
    fn from(row: ConversationRow) -> Self {
        Self {
            id: row.id,
            session_id: row.session_id,
            channel: row.channel.parse().unwrap_or(Channel::Web),
            user_id: row.user_id,
            language: row.language.parse().unwrap_or_default(),
            context: serde_json::from_str(&row.context).unwrap_or_default(),
            created_at: DateTime::parse_from_rfc3339(&row.created_at)
                .map(|dt| dt.with_timezone(&Utc))
                .unwrap_or_else(|_| Utc::now()),
            updated_at: DateTime::parse_from_rfc3339(&row.updated_at)
                .map(|dt| dt.with_timezone(&Utc))
                .unwrap_or_else(|_| Utc::now()),
        }
    }
}

#[derive(sqlx::FromRow)]
struct MessageRow {
    id: String,
    conversation_id: String,
    role: String,
    content: String,
    metadata: Option<String>,
    created_at: String,
}

impl From<MessageRow> for StoredMessage {
    fn from(row: MessageRow) -> Self {
        Self {
            id: row.id,
            conversation_id: row.conversation_id,
            role: row.role.parse().unwrap_or(Role::User),
            content: row.content,
            metadata: row.metadata.and_then(|s| serde_json::from_str(&s).ok()),
            created_at: DateTime::parse_from_rfc3339(&row.created_at)
                .map(|dt| dt.with_timezone(&Utc))
                .unwrap_or_else(|_| Utc::now()),
        }
    }
}
