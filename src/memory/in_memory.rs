//! 进程内记忆后端：测试与 `backend = "memory"` 使用，重启即丢失

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use super::personality::TraitVector;
use super::store::{rank_by_similarity, HistoryStore, StoreError};
use super::turn::{ConversationTurn, MemoryType};

struct StoredRow {
    turn: ConversationTurn,
    embedding: Option<Vec<f32>>,
}

/// 内存实现：按插入顺序保存所有轮次
#[derive(Default)]
pub struct InMemoryStore {
    turns: RwLock<Vec<StoredRow>>,
    traits: RwLock<HashMap<String, TraitVector>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// 当前保存的总轮数
    pub async fn len(&self) -> usize {
        self.turns.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.turns.read().await.is_empty()
    }
}

#[async_trait]
impl HistoryStore for InMemoryStore {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn insert(&self, turn: &ConversationTurn, embedding: Option<&[f32]>) -> Result<(), StoreError> {
        self.turns.write().await.push(StoredRow {
            turn: turn.clone(),
            embedding: embedding.filter(|e| !e.is_empty()).map(<[f32]>::to_vec),
        });
        Ok(())
    }

    async fn recent(
        &self,
        conversation_id: &str,
        limit: usize,
        memory_type: Option<&MemoryType>,
    ) -> Result<Vec<ConversationTurn>, StoreError> {
        let turns = self.turns.read().await;
        let mut picked: Vec<ConversationTurn> = turns
            .iter()
            .rev()
            .map(|row| &row.turn)
            .filter(|t| t.conversation_id == conversation_id)
            .filter(|t| memory_type.map_or(true, |m| &t.memory_type == m))
            .take(limit)
            .cloned()
            .collect();
        picked.reverse();
        Ok(picked)
    }

    async fn search_similar(
        &self,
        conversation_id: &str,
        embedding: &[f32],
        k: usize,
    ) -> Result<Vec<ConversationTurn>, StoreError> {
        let turns = self.turns.read().await;
        let candidates = turns.iter().filter_map(|row| {
            let vector = row.embedding.as_ref()?;
            (row.turn.conversation_id == conversation_id).then(|| (row.turn.clone(), vector.clone()))
        });
        Ok(rank_by_similarity(candidates, embedding, k))
    }

    async fn delete_before(
        &self,
        cutoff: DateTime<Utc>,
        memory_type: Option<&MemoryType>,
    ) -> Result<u64, StoreError> {
        let mut turns = self.turns.write().await;
        let before = turns.len();
        turns.retain(|row| {
            let t = &row.turn;
            let matches_type = memory_type.map_or(true, |m| &t.memory_type == m);
            !(matches_type && t.created_at < cutoff)
        });
        Ok((before - turns.len()) as u64)
    }

    async fn load_traits(&self, user_id: &str) -> Result<Option<TraitVector>, StoreError> {
        Ok(self.traits.read().await.get(user_id).cloned())
    }

    async fn save_traits(&self, user_id: &str, traits: &TraitVector) -> Result<(), StoreError> {
        self.traits
            .write()
            .await
            .insert(user_id.to_string(), traits.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn turn(conv: &str, n: usize) -> ConversationTurn {
        ConversationTurn::new(conv, format!("q{}", n), format!("a{}", n), "telegram")
    }

    #[tokio::test]
    async fn test_recent_is_oldest_first_and_limited() {
        let store = InMemoryStore::new();
        for i in 0..5 {
            store.insert(&turn("u1", i), None).await.unwrap();
        }
        store.insert(&turn("u2", 99), None).await.unwrap();

        let recent = store.recent("u1", 3, None).await.unwrap();
        let users: Vec<_> = recent.iter().map(|t| t.user_message.as_str()).collect();
        assert_eq!(users, vec!["q2", "q3", "q4"]);
    }

    #[tokio::test]
    async fn test_memory_type_filter() {
        let store = InMemoryStore::new();
        store.insert(&turn("u1", 1), None).await.unwrap();
        store
            .insert(&turn("u1", 2).with_memory_type(MemoryType::Personality), None)
            .await
            .unwrap();

        let daily = store.recent("u1", 10, Some(&MemoryType::Daily)).await.unwrap();
        assert_eq!(daily.len(), 1);
        let all = store.recent("u1", 10, None).await.unwrap();
        assert_eq!(all.len(), 2);
    }

    #[tokio::test]
    async fn test_delete_before() {
        let store = InMemoryStore::new();
        let old = turn("u1", 1).with_created_at(Utc::now() - Duration::days(40));
        store.insert(&old, None).await.unwrap();
        store.insert(&turn("u1", 2), None).await.unwrap();

        let removed = store
            .delete_before(Utc::now() - Duration::days(30), Some(&MemoryType::Daily))
            .await
            .unwrap();
        assert_eq!(removed, 1);
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn test_search_similar_ranks_by_stored_embedding() {
        let store = InMemoryStore::new();
        store.insert(&turn("u1", 1), Some(&[1.0, 0.0])).await.unwrap();
        store.insert(&turn("u1", 2), Some(&[0.0, 1.0])).await.unwrap();
        store.insert(&turn("u1", 3), None).await.unwrap();
        store.insert(&turn("u2", 4), Some(&[1.0, 0.0])).await.unwrap();

        let hits = store.search_similar("u1", &[0.9, 0.1], 5).await.unwrap();
        let users: Vec<_> = hits.iter().map(|t| t.user_message.as_str()).collect();
        assert_eq!(users, vec!["q1", "q2"]);
    }
}
