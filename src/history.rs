//! Conversation history, keyed by user id.
//!
//! Writes are best-effort from the synthesizer's point of view: a failed
//! append is logged and the answer is returned anyway. Reads return the
//! oldest-first tail the prompt builder feeds into the template.

use std::collections::{HashMap, VecDeque};
use std::sync::RwLock;
use std::time::{Duration, Instant};

use async_trait::async_trait;

use crate::config::HistoryConfig;
use crate::error::CoreError;
use crate::types::ConversationTurn;

/// Per-user conversation log.
#[async_trait]
pub trait HistoryStore: Send + Sync {
    /// Append one turn to the user's history.
    async fn append(&self, user_id: &str, turn: ConversationTurn) -> Result<(), CoreError>;

    /// The most recent `limit` turns, oldest first.
    async fn read(&self, user_id: &str, limit: usize) -> Result<Vec<ConversationTurn>, CoreError>;
}

struct UserHistory {
    turns: VecDeque<ConversationTurn>,
    expires_at: Instant,
}

/// In-memory history with per-user TTL and a bounded turn count.
///
/// Each append refreshes the TTL; an expired history is dropped on the next
/// access, mirroring store-with-expiry semantics.
pub struct InMemoryHistoryStore {
    users: RwLock<HashMap<String, UserHistory>>,
    ttl: Duration,
    max_turns: usize,
}

impl InMemoryHistoryStore {
    pub fn new(config: &HistoryConfig) -> Self {
        Self {
            users: RwLock::new(HashMap::new()),
            ttl: config.ttl,
            // Keep a few exchanges beyond the prompt tail so the tail stays
            // full while old turns age out.
            max_turns: config.tail_turns.max(1) * 4,
        }
    }
}

#[async_trait]
impl HistoryStore for InMemoryHistoryStore {
    async fn append(&self, user_id: &str, turn: ConversationTurn) -> Result<(), CoreError> {
        let now = Instant::now();
        let mut users = self.users.write().expect("history lock poisoned");
        let history = users
            .entry(user_id.to_string())
            .or_insert_with(|| UserHistory {
                turns: VecDeque::new(),
                expires_at: now + self.ttl,
            });
        if history.expires_at <= now {
            history.turns.clear();
        }
        history.turns.push_back(turn);
        while history.turns.len() > self.max_turns {
            history.turns.pop_front();
        }
        history.expires_at = now + self.ttl;
        Ok(())
    }

    async fn read(&self, user_id: &str, limit: usize) -> Result<Vec<ConversationTurn>, CoreError> {
        let now = Instant::now();
        let users = self.users.read().expect("history lock poisoned");
        let Some(history) = users.get(user_id) else {
            return Ok(Vec::new());
        };
        if history.expires_at <= now {
            return Ok(Vec::new());
        }
        let skip = history.turns.len().saturating_sub(limit);
        Ok(history.turns.iter().skip(skip).cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store(ttl: Duration) -> InMemoryHistoryStore {
        InMemoryHistoryStore::new(&HistoryConfig {
            tail_turns: 3,
            ttl,
        })
    }

    #[tokio::test]
    async fn test_read_returns_tail_oldest_first() {
        let store = store(Duration::from_secs(60));
        for i in 0..5 {
            store
                .append("u1", ConversationTurn::user(format!("q{}", i)))
                .await
                .unwrap();
        }

        let tail = store.read("u1", 2).await.unwrap();
        assert_eq!(tail.len(), 2);
        assert_eq!(tail[0].text, "q3");
        assert_eq!(tail[1].text, "q4");
    }

    #[tokio::test]
    async fn test_histories_are_per_user() {
        let store = store(Duration::from_secs(60));
        store
            .append("u1", ConversationTurn::user("hello"))
            .await
            .unwrap();

        assert!(store.read("u2", 10).await.unwrap().is_empty());
        assert_eq!(store.read("u1", 10).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_expired_history_reads_empty() {
        let store = store(Duration::from_millis(0));
        store
            .append("u1", ConversationTurn::user("hello"))
            .await
            .unwrap();

        assert!(store.read("u1", 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_turn_count_is_bounded() {
        let store = store(Duration::from_secs(60));
        for i in 0..100 {
            store
                .append("u1", ConversationTurn::user(format!("q{}", i)))
                .await
                .unwrap();
        }

        let all = store.read("u1", 1000).await.unwrap();
        assert_eq!(all.len(), 12); // tail_turns * 4
        assert_eq!(all.last().unwrap().text, "q99");
    }
}
