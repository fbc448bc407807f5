//! 记忆后端抽象
//!
//! HistoryStore 是一张只追加的对话表（外加一张性格向量表）的最小接口：
//! 写一行、按会话取最近 N 行、相似度检索、按时间清理。Supabase / SQLite / 内存三种实现。

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use super::personality::TraitVector;
use super::turn::{ConversationTurn, MemoryType};

/// 记忆库读写错误
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("http error: {0}")]
    Http(String),

    #[error("store returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("database error: {0}")]
    Database(String),

    #[error("decode error: {0}")]
    Decode(String),

    #[error("{0} not supported by this store")]
    Unsupported(&'static str),
}

impl From<reqwest::Error> for StoreError {
    fn from(e: reqwest::Error) -> Self {
        StoreError::Http(e.to_string())
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(e: serde_json::Error) -> Self {
        StoreError::Decode(e.to_string())
    }
}

/// 记忆后端接口
#[async_trait]
pub trait HistoryStore: Send + Sync {
    /// 后端名（日志用）
    fn name(&self) -> &'static str;

    /// 写入一轮对话；embedding 为用户文字的向量（未启用嵌入时为 None）
    async fn insert(
        &self,
        turn: &ConversationTurn,
        embedding: Option<&[f32]>,
    ) -> Result<(), StoreError>;

    /// 取某会话最近 limit 轮，旧的在前
    async fn recent(
        &self,
        conversation_id: &str,
        limit: usize,
        memory_type: Option<&MemoryType>,
    ) -> Result<Vec<ConversationTurn>, StoreError>;

    /// 相似度检索，按相似度从高到低；不保存向量的后端返回 Unsupported
    async fn search_similar(
        &self,
        _conversation_id: &str,
        _embedding: &[f32],
        _k: usize,
    ) -> Result<Vec<ConversationTurn>, StoreError> {
        Err(StoreError::Unsupported("similarity search"))
    }

    /// 删除 cutoff 之前的记忆，返回删除行数
    async fn delete_before(
        &self,
        cutoff: DateTime<Utc>,
        memory_type: Option<&MemoryType>,
    ) -> Result<u64, StoreError>;

    async fn load_traits(&self, user_id: &str) -> Result<Option<TraitVector>, StoreError>;

    async fn save_traits(&self, user_id: &str, traits: &TraitVector) -> Result<(), StoreError>;
}

/// 余弦相似度；维度不同或含零向量时为 0
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}

/// 本地后端共用：按与 query 的相似度取前 k 条，同分时新的在前
pub(crate) fn rank_by_similarity<I>(candidates: I, query: &[f32], k: usize) -> Vec<ConversationTurn>
where
    I: IntoIterator<Item = (ConversationTurn, Vec<f32>)>,
{
    let mut scored: Vec<(f32, usize, ConversationTurn)> = candidates
        .into_iter()
        .enumerate()
        .map(|(i, (turn, embedding))| (cosine_similarity(query, &embedding), i, turn))
        .collect();
    scored.sort_by(|a, b| b.0.total_cmp(&a.0).then(b.1.cmp(&a.1)));
    scored.into_iter().take(k).map(|(_, _, turn)| turn).collect()
}

/// 空实现：不记忆时使用
#[derive(Clone, Default)]
pub struct NoopStore;

#[async_trait]
impl HistoryStore for NoopStore {
    fn name(&self) -> &'static str {
        "none"
    }

    async fn insert(&self, _turn: &ConversationTurn, _embedding: Option<&[f32]>) -> Result<(), StoreError> {
        Ok(())
    }

    async fn recent(
        &self,
        _conversation_id: &str,
        _limit: usize,
        _memory_type: Option<&MemoryType>,
    ) -> Result<Vec<ConversationTurn>, StoreError> {
        Ok(Vec::new())
    }

    async fn delete_before(
        &self,
        _cutoff: DateTime<Utc>,
        _memory_type: Option<&MemoryType>,
    ) -> Result<u64, StoreError> {
        Ok(0)
    }

    async fn load_traits(&self, _user_id: &str) -> Result<Option<TraitVector>, StoreError> {
        Ok(None)
    }

    async fn save_traits(&self, _user_id: &str, _traits: &TraitVector) -> Result<(), StoreError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cosine_similarity() {
        assert!((cosine_similarity(&[1.0, 0.0], &[1.0, 0.0]) - 1.0).abs() < 1e-6);
        assert!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]).abs() < 1e-6);
        assert_eq!(cosine_similarity(&[1.0], &[1.0, 0.0]), 0.0);
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 0.0]), 0.0);
    }

    #[test]
    fn test_rank_by_similarity_prefers_closest_then_newest() {
        let turn = |q: &str| ConversationTurn::new("u", q, "a", "telegram");
        let ranked = rank_by_similarity(
            vec![
                (turn("far"), vec![0.0, 1.0]),
                (turn("close-old"), vec![1.0, 0.1]),
                (turn("close-new"), vec![1.0, 0.1]),
            ],
            &[1.0, 0.0],
            2,
        );
        let users: Vec<_> = ranked.iter().map(|t| t.user_message.as_str()).collect();
        assert_eq!(users, vec!["close-new", "close-old"]);
    }

    #[tokio::test]
    async fn test_noop_store_has_no_similarity_search() {
        let err = NoopStore.search_similar("u", &[1.0], 3).await.unwrap_err();
        assert!(matches!(err, StoreError::Unsupported(_)));
    }
}
