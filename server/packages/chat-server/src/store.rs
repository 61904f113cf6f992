use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use utoipa::ToSchema;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum ChatRole {
    User,
    Assistant,
}

/// Message lifecycle: `Pending -> Streaming -> Completed | Error`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum ChatStatus {
    Pending,
    Streaming,
    Completed,
    Error,
}

impl ChatStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Error)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    pub message_id: String,
    pub session_id: String,
    pub role: ChatRole,
    pub content: String,
    pub status: ChatStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_count: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
}

#[derive(Debug)]
struct StoredMessage {
    /// Insertion sequence, used for stable listing order. Timestamps alone
    /// can tie within one request.
    seq: u64,
    message: ChatMessage,
}

/// In-memory message store.
///
/// Terminal transitions are idempotent: once a message is `Completed` or
/// `Error`, later transition attempts are no-ops that return the stored row
/// unchanged. That is what lets the finalizer run unconditionally.
#[derive(Debug, Default)]
pub struct MessageStore {
    next_seq: AtomicU64,
    messages: RwLock<HashMap<String, StoredMessage>>,
}

impl MessageStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn create(
        &self,
        session_id: &str,
        role: ChatRole,
        content: &str,
    ) -> ChatMessage {
        let message = ChatMessage {
            message_id: Uuid::new_v4().to_string(),
            session_id: session_id.to_string(),
            role,
            content: content.to_string(),
            status: ChatStatus::Pending,
            error_message: None,
            created_at: Utc::now(),
            completed_at: None,
            token_count: None,
            duration_ms: None,
        };
        let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);
        let mut messages = self.messages.write().await;
        messages.insert(
            message.message_id.clone(),
            StoredMessage {
                seq,
                message: message.clone(),
            },
        );
        message
    }

    pub async fn get(&self, session_id: &str, message_id: &str) -> Option<ChatMessage> {
        let messages = self.messages.read().await;
        messages
            .get(message_id)
            .filter(|stored| stored.message.session_id == session_id)
            .map(|stored| stored.message.clone())
    }

    /// Messages for one session in creation order, plus the total count
    /// before the `offset`/`limit` window is applied.
    pub async fn list(
        &self,
        session_id: &str,
        limit: usize,
        offset: usize,
    ) -> (Vec<ChatMessage>, usize) {
        let messages = self.messages.read().await;
        let mut rows: Vec<&StoredMessage> = messages
            .values()
            .filter(|stored| stored.message.session_id == session_id)
            .collect();
        rows.sort_by_key(|stored| stored.seq);
        let total = rows.len();
        let page = rows
            .into_iter()
            .skip(offset)
            .take(limit)
            .map(|stored| stored.message.clone())
            .collect();
        (page, total)
    }

    /// Most recent non-terminal transition: `Pending -> Streaming`. Ignored
    /// for terminal messages.
    pub async fn set_streaming(&self, message_id: &str) -> Option<ChatMessage> {
        let mut messages = self.messages.write().await;
        let stored = messages.get_mut(message_id)?;
        if !stored.message.status.is_terminal() {
            stored.message.status = ChatStatus::Streaming;
        }
        Some(stored.message.clone())
    }

    pub async fn set_completed(
        &self,
        message_id: &str,
        content: &str,
        token_count: Option<u64>,
        duration_ms: Option<u64>,
    ) -> Option<ChatMessage> {
        let mut messages = self.messages.write().await;
        let stored = messages.get_mut(message_id)?;
        if stored.message.status.is_terminal() {
            return Some(stored.message.clone());
        }
        stored.message.status = ChatStatus::Completed;
        stored.message.content = content.to_string();
        stored.message.completed_at = Some(Utc::now());
        stored.message.token_count = token_count;
        stored.message.duration_ms = duration_ms;
        Some(stored.message.clone())
    }

    pub async fn set_failed(&self, message_id: &str, error_message: &str) -> Option<ChatMessage> {
        let mut messages = self.messages.write().await;
        let stored = messages.get_mut(message_id)?;
        if stored.message.status.is_terminal() {
            return Some(stored.message.clone());
        }
        stored.message.status = ChatStatus::Error;
        stored.message.error_message = Some(error_message.to_string());
        stored.message.completed_at = Some(Utc::now());
        Some(stored.message.clone())
    }

    /// The user message that prompted `assistant_message_id`: the closest
    /// earlier user-role row in the same session.
    pub async fn user_message_before(
        &self,
        session_id: &str,
        assistant_message_id: &str,
    ) -> Option<ChatMessage> {
        let messages = self.messages.read().await;
        let assistant_seq = messages
            .get(assistant_message_id)
            .filter(|stored| stored.message.session_id == session_id)?
            .seq;
        messages
            .values()
            .filter(|stored| {
                stored.message.session_id == session_id
                    && stored.message.role == ChatRole::User
                    && stored.seq < assistant_seq
            })
            .max_by_key(|stored| stored.seq)
            .map(|stored| stored.message.clone())
    }

    pub async fn delete(&self, session_id: &str, message_id: &str) -> bool {
        let mut messages = self.messages.write().await;
        match messages.get(message_id) {
            Some(stored) if stored.message.session_id == session_id => {
                messages.remove(message_id);
                true
            }
            _ => false,
        }
    }

    pub async fn clear(&self, session_id: &str) -> usize {
        let mut messages = self.messages.write().await;
        let before = messages.len();
        messages.retain(|_, stored| stored.message.session_id != session_id);
        before - messages.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn list_preserves_creation_order() {
        let store = MessageStore::new();
        let first = store.create("s1", ChatRole::User, "one").await;
        let second = store.create("s1", ChatRole::Assistant, "").await;
        store.create("s2", ChatRole::User, "other session").await;

        let (rows, total) = store.list("s1", 50, 0).await;
        assert_eq!(total, 2);
        assert_eq!(rows[0].message_id, first.message_id);
        assert_eq!(rows[1].message_id, second.message_id);
    }

    #[tokio::test]
    async fn list_windows_with_limit_and_offset() {
        let store = MessageStore::new();
        for i in 0..5 {
            store.create("s1", ChatRole::User, &format!("m{i}")).await;
        }
        let (rows, total) = store.list("s1", 2, 1).await;
        assert_eq!(total, 5);
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].content, "m1");
        assert_eq!(rows[1].content, "m2");
    }

    #[tokio::test]
    async fn terminal_status_is_sticky() {
        let store = MessageStore::new();
        let message = store.create("s1", ChatRole::Assistant, "").await;

        let completed = store
            .set_completed(&message.message_id, "Paris", Some(42), Some(3064))
            .await
            .unwrap();
        assert_eq!(completed.status, ChatStatus::Completed);
        assert_eq!(completed.content, "Paris");

        // A second terminal transition must not overwrite the first.
        let after = store
            .set_failed(&message.message_id, "late failure")
            .await
            .unwrap();
        assert_eq!(after.status, ChatStatus::Completed);
        assert_eq!(after.content, "Paris");
        assert_eq!(after.error_message, None);

        let again = store
            .set_completed(&message.message_id, "overwritten", None, None)
            .await
            .unwrap();
        assert_eq!(again.content, "Paris");
        assert_eq!(again.token_count, Some(42));
    }

    #[tokio::test]
    async fn set_streaming_skips_terminal_messages() {
        let store = MessageStore::new();
        let message = store.create("s1", ChatRole::Assistant, "").await;
        store.set_failed(&message.message_id, "boom").await;
        let after = store.set_streaming(&message.message_id).await.unwrap();
        assert_eq!(after.status, ChatStatus::Error);
    }

    #[tokio::test]
    async fn finds_prompting_user_message() {
        let store = MessageStore::new();
        store.create("s1", ChatRole::User, "earlier question").await;
        let user = store.create("s1", ChatRole::User, "the question").await;
        let assistant = store.create("s1", ChatRole::Assistant, "").await;

        let found = store
            .user_message_before("s1", &assistant.message_id)
            .await
            .unwrap();
        assert_eq!(found.message_id, user.message_id);
    }

    #[tokio::test]
    async fn delete_is_session_scoped() {
        let store = MessageStore::new();
        let message = store.create("s1", ChatRole::User, "hi").await;
        assert!(!store.delete("s2", &message.message_id).await);
        assert!(store.delete("s1", &message.message_id).await);
        assert!(store.get("s1", &message.message_id).await.is_none());
    }

    #[tokio::test]
    async fn clear_removes_only_one_session() {
        let store = MessageStore::new();
        store.create("s1", ChatRole::User, "a").await;
        store.create("s1", ChatRole::Assistant, "").await;
        store.create("s2", ChatRole::User, "b").await;
        assert_eq!(store.clear("s1").await, 2);
        let (_, total) = store.list("s2", 50, 0).await;
        assert_eq!(total, 1);
    }
}
