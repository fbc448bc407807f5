//! 记忆客户端：对 HistoryStore 的尽力而为包装
//!
//! record 永远不会失败（失败只记日志）；fetch_recent 失败时返回回退缓存或空列表。
//! 记忆库出问题不能挡住回复。

use std::sync::Arc;

use chrono::Utc;

use super::cache::RecentTurnsCache;
use super::personality::TraitVector;
use super::store::{HistoryStore, StoreError};
use super::turn::{ConversationTurn, MemoryType};
use crate::llm::EmbeddingProvider;

/// /recall 无向量时，关键词过滤扫描的行数
const KEYWORD_SCAN_ROWS: usize = 50;

pub struct HistoryClient {
    store: Arc<dyn HistoryStore>,
    embedder: Option<Arc<dyn EmbeddingProvider>>,
    memory_type: Option<MemoryType>,
    platform: String,
    cache: Option<RecentTurnsCache>,
}

impl HistoryClient {
    pub fn new(store: Arc<dyn HistoryStore>, platform: impl Into<String>) -> Self {
        Self {
            store,
            embedder: None,
            memory_type: Some(MemoryType::Daily),
            platform: platform.into(),
            cache: None,
        }
    }

    pub fn with_embedder(mut self, embedder: Option<Arc<dyn EmbeddingProvider>>) -> Self {
        self.embedder = embedder;
        self
    }

    /// 取历史时按 memory_type 过滤；None 表示只按 conversation_id
    pub fn with_memory_type_filter(mut self, memory_type: Option<MemoryType>) -> Self {
        self.memory_type = memory_type;
        self
    }

    /// 启用回退缓存（capacity 为每会话保留轮数，0 表示关闭）
    pub fn with_fallback_cache(mut self, capacity: usize) -> Self {
        self.cache = (capacity > 0).then(|| RecentTurnsCache::new(capacity));
        self
    }

    pub fn store_name(&self) -> &'static str {
        self.store.name()
    }

    /// 写入一轮对话；失败只记日志
    pub async fn record(&self, conversation_id: &str, user_text: &str, bot_text: &str) {
        let turn = ConversationTurn::new(conversation_id, user_text, bot_text, &self.platform);

        let embedding = match &self.embedder {
            Some(embedder) => match embedder.embed(user_text).await {
                Ok(v) => Some(v),
                Err(e) => {
                    tracing::warn!(conversation_id, "embedding failed, storing row without it: {}", e);
                    None
                }
            },
            None => None,
        };

        match self.store.insert(&turn, embedding.as_deref()).await {
            Ok(()) => tracing::info!(
                conversation_id,
                store = self.store.name(),
                "✅ 成功將記憶儲存"
            ),
            Err(e) => tracing::warn!(
                conversation_id,
                store = self.store.name(),
                "❌ 記憶儲存失敗：{}",
                e
            ),
        }

        if let Some(cache) = &self.cache {
            cache.push(turn);
        }
    }

    /// 最近 limit 轮，旧的在前；失败时返回回退缓存（未启用则为空）
    pub async fn fetch_recent(&self, conversation_id: &str, limit: usize) -> Vec<ConversationTurn> {
        if limit == 0 {
            return Vec::new();
        }
        match self
            .store
            .recent(conversation_id, limit, self.memory_type.as_ref())
            .await
        {
            Ok(turns) => turns,
            Err(e) => {
                tracing::warn!(conversation_id, "❌ 回溯記憶時發生錯誤：{}", e);
                self.cache
                    .as_ref()
                    .map(|c| c.recent(conversation_id, limit))
                    .unwrap_or_default()
            }
        }
    }

    /// 检索过去的对话：字面命中的在前，有嵌入时再用相似度检索补足 k 条
    pub async fn recall(&self, conversation_id: &str, query: &str, k: usize) -> Vec<ConversationTurn> {
        let query = query.trim();
        if query.is_empty() {
            return self.fetch_recent(conversation_id, k).await;
        }

        let mut hits = self.keyword_hits(conversation_id, query, k).await;
        if hits.len() < k {
            for turn in self.similar(conversation_id, query, k).await {
                if hits.len() >= k {
                    break;
                }
                if !hits.contains(&turn) {
                    hits.push(turn);
                }
            }
        }
        hits
    }

    /// 最近若干行里包含 query 的，取最新的 k 条（旧的在前）
    async fn keyword_hits(&self, conversation_id: &str, query: &str, k: usize) -> Vec<ConversationTurn> {
        let needle = query.to_lowercase();
        let mut hits: Vec<ConversationTurn> = self
            .fetch_recent(conversation_id, KEYWORD_SCAN_ROWS)
            .await
            .into_iter()
            .filter(|t| {
                t.user_message.to_lowercase().contains(&needle)
                    || t.assistant_message.to_lowercase().contains(&needle)
            })
            .collect();
        let skip = hits.len().saturating_sub(k);
        hits.drain(..skip);
        hits
    }

    /// 向量检索；未配置嵌入、后端不支持或出错时为空
    async fn similar(&self, conversation_id: &str, query: &str, k: usize) -> Vec<ConversationTurn> {
        let Some(embedder) = &self.embedder else {
            return Vec::new();
        };
        let vector = match embedder.embed(query).await {
            Ok(v) if !v.is_empty() => v,
            Ok(_) => return Vec::new(),
            Err(e) => {
                tracing::warn!(conversation_id, "embedding failed: {}", e);
                return Vec::new();
            }
        };
        match self.store.search_similar(conversation_id, &vector, k).await {
            Ok(turns) => turns,
            Err(StoreError::Unsupported(_)) => Vec::new(),
            Err(e) => {
                tracing::warn!(conversation_id, "similarity search failed: {}", e);
                Vec::new()
            }
        }
    }

    /// 读取性格向量；没有或读取失败时给默认值
    pub async fn traits(&self, user_id: &str) -> TraitVector {
        match self.store.load_traits(user_id).await {
            Ok(Some(t)) => t,
            Ok(None) => TraitVector::default(),
            Err(e) => {
                tracing::warn!(user_id, "load traits failed: {}", e);
                TraitVector::default()
            }
        }
    }

    pub async fn save_traits(&self, user_id: &str, traits: &TraitVector) {
        if let Err(e) = self.store.save_traits(user_id, traits).await {
            tracing::warn!(user_id, "save traits failed: {}", e);
        }
    }

    /// 清理 retention_days 之前的 daily 记忆
    pub async fn cleanup(&self, retention_days: i64) -> u64 {
        let cutoff = Utc::now() - chrono::Duration::days(retention_days);
        match self
            .store
            .delete_before(cutoff, Some(&MemoryType::Daily))
            .await
        {
            Ok(n) => {
                tracing::info!(removed = n, %cutoff, "memory cleanup done");
                n
            }
            Err(e) => {
                tracing::warn!("memory cleanup failed: {}", e);
                0
            }
        }
    }
}
