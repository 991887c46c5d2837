//! Delayed check-in scheduling.
//!
//! After a medication or symptom reply, a single check-in message is
//! appended to the conversation once the delay elapses, unless the session
//! is closed or a newer turn reschedules it first. At most one pending
//! follow-up exists per conversation.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::detect::Language;
use crate::prompts;
use crate::storage::{ConversationStore, Role, SqliteStore, StoredMessage};

/// Registry of pending follow-up tasks, keyed by conversation id. Each entry
/// carries a sequence number so a delivered task can tell whether the entry
/// under its key is still its own or a newer replacement.
pub struct FollowUpRegistry {
    tasks: Arc<Mutex<HashMap<String, (u64, JoinHandle<()>)>>>,
    next_seq: AtomicU64,
}

impl FollowUpRegistry {
    pub fn new() -> Self {
        Self {
            tasks: Arc::new(Mutex::new(HashMap::new())),
            next_seq: AtomicU64::new(0),
        }
    }

    /// Schedule a check-in for a conversation, replacing any pending one.
    /// Delivery is best effort: a storage failure is logged and dropped.
    pub async fn schedule(
        &self,
        conversation_id: String,
        store: SqliteStore,
        language: Language,
        delay: Duration,
    ) {
        let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);
        let tasks = Arc::clone(&self.tasks);
        let task_conversation = conversation_id.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;

            let check_in = StoredMessage::new(
                &task_conversation,
                Role::Assistant,
                prompts::follow_up_message(language),
            )
            .with_metadata(serde_json::json!({ "category": "follow_up" }));

            if let Err(e) = store.append_message(&check_in).await {
                warn!(
                    error = %e,
                    conversation = %task_conversation,
                    "Failed to deliver scheduled check-in"
                );
            } else {
                debug!(conversation = %task_conversation, "Scheduled check-in delivered");
            }

            // Delivered: clear our own registry entry, unless a newer turn
            // already replaced it.
            let mut map = tasks.lock().await;
            if map.get(&task_conversation).is_some_and(|(s, _)| *s == seq) {
                map.remove(&task_conversation);
            }
        });

        // At most one pending check-in per conversation: a newer turn
        // replaces and aborts the older timer.
        if let Some((_, previous)) = self
            .tasks
            .lock()
            .await
            .insert(conversation_id, (seq, handle))
        {
            previous.abort();
        }
    }

    /// Cancel the pending follow-up for a conversation, if any.
    pub async fn cancel(&self, conversation_id: &str) {
        if let Some((_, handle)) = self.tasks.lock().await.remove(conversation_id) {
            handle.abort();
            debug!(conversation = %conversation_id, "Cancelled pending check-in");
        }
    }

    /// Abort every pending follow-up. Used at shutdown.
    pub async fn cancel_all(&self) {
        let mut map = self.tasks.lock().await;
        for (_, (_, handle)) in map.drain() {
            handle.abort();
        }
    }

    /// Number of pending follow-ups (for tests).
    pub async fn pending(&self) -> usize {
        self.tasks.lock().await.len()
    }
}

impl Default for FollowUpRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::Channel;

    async fn store_with_conversation() -> (SqliteStore, String) {
        let store = SqliteStore::new_in_memory().await.unwrap();
        let conversation = store
            .find_or_create("s-followup", Channel::Web, None)
            .await
            .unwrap();
        (store, conversation.id)
    }

    #[tokio::test]
    async fn test_delivered_check_in_clears_its_entry() {
        let (store, conversation_id) = store_with_conversation().await;
        let registry = FollowUpRegistry::new();

        registry
            .schedule(
                conversation_id.clone(),
                store.clone(),
                Language::En,
                Duration::from_millis(10),
            )
            .await;
        assert_eq!(registry.pending().await, 1);

        // Wait out delivery; the registry entry goes with it.
        for _ in 0..100 {
            if registry.pending().await == 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert_eq!(registry.pending().await, 0);

        let messages = store.recent_messages(&conversation_id, 10).await.unwrap();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].content, prompts::follow_up_message(Language::En));
    }

    #[tokio::test]
    async fn test_cancel_before_delivery_leaves_no_message() {
        let (store, conversation_id) = store_with_conversation().await;
        let registry = FollowUpRegistry::new();

        registry
            .schedule(
                conversation_id.clone(),
                store.clone(),
                Language::Sw,
                Duration::from_secs(60),
            )
            .await;
        registry.cancel(&conversation_id).await;
        assert_eq!(registry.pending().await, 0);

        let messages = store.recent_messages(&conversation_id, 10).await.unwrap();
        assert!(messages.is_empty());
    }

    #[tokio::test]
    async fn test_reschedule_keeps_one_pending_entry() {
        let (store, conversation_id) = store_with_conversation().await;
        let registry = FollowUpRegistry::new();

        registry
            .schedule(
                conversation_id.clone(),
                store.clone(),
                Language::En,
                Duration::from_secs(60),
            )
            .await;
        registry
            .schedule(conversation_id, store, Language::En, Duration::from_secs(60))
            .await;
        assert_eq!(registry.pending().await, 1);

        registry.cancel_all().await;
        assert_eq!(registry.pending().await, 0);
    }
}
