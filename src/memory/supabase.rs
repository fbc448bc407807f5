//! Supabase 记忆后端（PostgREST over reqwest）
//!
//! - 写入：`POST /rest/v1/{memory_table}`
//! - 最近对话：`GET /rest/v1/{memory_table}?conversation_id=eq.X&memory_type=eq.Y&order=id.desc&limit=N`
//! - 相似度检索：`POST /rest/v1/rpc/{match_function}`（由数据库里的存储过程完成）
//! - 清理：`DELETE /rest/v1/{memory_table}?created_at=lt.T`
//! - 性格向量：`{traits_table}` 以 user_id 为主键 upsert

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use reqwest::{Client, RequestBuilder, Response};
use serde::{Deserialize, Serialize};

use super::personality::TraitVector;
use super::store::{HistoryStore, StoreError};
use super::turn::{ConversationTurn, MemoryType};
use crate::config::StoreSection;

const SELECT_COLUMNS: &str =
    "conversation_id,user_message,assistant_message,created_at,memory_type,platform";

/// 单次请求超时（秒）
const REQUEST_TIMEOUT_SECS: u64 = 15;

/// PostgREST 客户端
pub struct SupabaseStore {
    client: Client,
    base_url: String,
    api_key: String,
    memory_table: String,
    traits_table: String,
    match_function: String,
}

#[derive(Debug, Serialize)]
struct InsertRow<'a> {
    conversation_id: &'a str,
    user_message: &'a str,
    assistant_message: &'a str,
    created_at: String,
    memory_type: &'a str,
    platform: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    embedding: Option<&'a [f32]>,
}

/// 表里读回来的一行；老数据可能缺列
#[derive(Debug, Deserialize)]
struct MemoryRow {
    conversation_id: String,
    #[serde(default)]
    user_message: Option<String>,
    #[serde(default)]
    assistant_message: Option<String>,
    #[serde(default)]
    created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    memory_type: Option<String>,
    #[serde(default)]
    platform: Option<String>,
}

impl From<MemoryRow> for ConversationTurn {
    fn from(row: MemoryRow) -> Self {
        ConversationTurn {
            conversation_id: row.conversation_id,
            user_message: row.user_message.unwrap_or_default(),
            assistant_message: row.assistant_message.unwrap_or_default(),
            created_at: row.created_at.unwrap_or_else(Utc::now),
            memory_type: row
                .memory_type
                .as_deref()
                .map(MemoryType::parse)
                .unwrap_or_default(),
            platform: row.platform.unwrap_or_default(),
        }
    }
}

#[derive(Debug, Serialize)]
struct MatchRequest<'a> {
    query_embedding: &'a [f32],
    match_count: usize,
    filter_conversation_id: &'a str,
}

#[derive(Debug, Serialize)]
struct TraitsRow<'a> {
    user_id: &'a str,
    traits: &'a TraitVector,
    updated_at: String,
}

#[derive(Debug, Deserialize)]
struct TraitsSelect {
    traits: TraitVector,
}

impl SupabaseStore {
    pub fn new(base_url: &str, api_key: &str) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            memory_table: "xiaochenguang_memories".to_string(),
            traits_table: "xiaochenguang_traits".to_string(),
            match_function: "match_memories".to_string(),
        }
    }

    /// 从 [store] 配置创建；URL 或 Key 缺失时返回 None
    pub fn from_config(cfg: &StoreSection) -> Option<Self> {
        if !cfg.supabase_configured() {
            return None;
        }
        let url = cfg.supabase_url.as_deref()?;
        let key = cfg.supabase_key.as_deref()?;
        Some(
            Self::new(url, key)
                .with_tables(&cfg.memory_table, &cfg.traits_table)
                .with_match_function(&cfg.match_function),
        )
    }

    pub fn with_tables(mut self, memory_table: &str, traits_table: &str) -> Self {
        self.memory_table = memory_table.to_string();
        self.traits_table = traits_table.to_string();
        self
    }

    pub fn with_match_function(mut self, name: &str) -> Self {
        self.match_function = name.to_string();
        self
    }

    fn rest_url(&self, path: &str) -> String {
        format!("{}/rest/v1/{}", self.base_url, path)
    }

    fn authed(&self, req: RequestBuilder) -> RequestBuilder {
        req.header("apikey", &self.api_key)
            .bearer_auth(&self.api_key)
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
    }

    async fn check(response: Response) -> Result<Response, StoreError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(StoreError::Status {
            status: status.as_u16(),
            body,
        })
    }
}

fn timestamp(t: &DateTime<Utc>) -> String {
    t.to_rfc3339_opts(SecondsFormat::Micros, true)
}

#[async_trait]
impl HistoryStore for SupabaseStore {
    fn name(&self) -> &'static str {
        "supabase"
    }

    async fn insert(
        &self,
        turn: &ConversationTurn,
        embedding: Option<&[f32]>,
    ) -> Result<(), StoreError> {
        let row = InsertRow {
            conversation_id: &turn.conversation_id,
            user_message: &turn.user_message,
            assistant_message: &turn.assistant_message,
            created_at: timestamp(&turn.created_at),
            memory_type: turn.memory_type.as_str(),
            platform: &turn.platform,
            embedding: embedding.filter(|e| !e.is_empty()),
        };
        let response = self
            .authed(self.client.post(self.rest_url(&self.memory_table)))
            .header("Prefer", "return=minimal")
            .json(&row)
            .send()
            .await?;
        Self::check(response).await?;
        tracing::debug!(conversation_id = %turn.conversation_id, "memory row inserted");
        Ok(())
    }

    async fn recent(
        &self,
        conversation_id: &str,
        limit: usize,
        memory_type: Option<&MemoryType>,
    ) -> Result<Vec<ConversationTurn>, StoreError> {
        let mut query: Vec<(&str, String)> = vec![
            ("select", SELECT_COLUMNS.to_string()),
            ("conversation_id", format!("eq.{}", conversation_id)),
        ];
        if let Some(t) = memory_type {
            query.push(("memory_type", format!("eq.{}", t.as_str())));
        }
        query.push(("order", "id.desc".to_string()));
        query.push(("limit", limit.to_string()));

        let response = self
            .authed(self.client.get(self.rest_url(&self.memory_table)))
            .query(&query)
            .send()
            .await?;
        let rows: Vec<MemoryRow> = Self::check(response).await?.json().await?;

        let mut turns: Vec<ConversationTurn> = rows.into_iter().map(Into::into).collect();
        // 反转让旧的在前、新的在后
        turns.reverse();
        Ok(turns)
    }

    async fn search_similar(
        &self,
        conversation_id: &str,
        embedding: &[f32],
        k: usize,
    ) -> Result<Vec<ConversationTurn>, StoreError> {
        let body = MatchRequest {
            query_embedding: embedding,
            match_count: k,
            filter_conversation_id: conversation_id,
        };
        let response = self
            .authed(
                self.client
                    .post(self.rest_url(&format!("rpc/{}", self.match_function))),
            )
            .json(&body)
            .send()
            .await?;
        let rows: Vec<MemoryRow> = Self::check(response).await?.json().await?;
        Ok(rows.into_iter().map(Into::into).collect())
    }

    async fn delete_before(
        &self,
        cutoff: DateTime<Utc>,
        memory_type: Option<&MemoryType>,
    ) -> Result<u64, StoreError> {
        let mut query: Vec<(&str, String)> = vec![
            ("created_at", format!("lt.{}", timestamp(&cutoff))),
            ("select", "id".to_string()),
        ];
        if let Some(t) = memory_type {
            query.push(("memory_type", format!("eq.{}", t.as_str())));
        }
        let response = self
            .authed(self.client.delete(self.rest_url(&self.memory_table)))
            .header("Prefer", "return=representation")
            .query(&query)
            .send()
            .await?;
        let deleted: Vec<serde_json::Value> = Self::check(response).await?.json().await?;
        Ok(deleted.len() as u64)
    }

    async fn load_traits(&self, user_id: &str) -> Result<Option<TraitVector>, StoreError> {
        let query = [
            ("select", "traits".to_string()),
            ("user_id", format!("eq.{}", user_id)),
            ("limit", "1".to_string()),
        ];
        let response = self
            .authed(self.client.get(self.rest_url(&self.traits_table)))
            .query(&query)
            .send()
            .await?;
        let rows: Vec<TraitsSelect> = Self::check(response).await?.json().await?;
        Ok(rows.into_iter().next().map(|r| r.traits))
    }

    async fn save_traits(&self, user_id: &str, traits: &TraitVector) -> Result<(), StoreError> {
        let row = TraitsRow {
            user_id,
            traits,
            updated_at: timestamp(&Utc::now()),
        };
        let response = self
            .authed(self.client.post(self.rest_url(&self.traits_table)))
            .header("Prefer", "resolution=merge-duplicates,return=minimal")
            .json(&row)
            .send()
            .await?;
        Self::check(response).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_config_requires_url_and_key() {
        let mut cfg = StoreSection::default();
        assert!(SupabaseStore::from_config(&cfg).is_none());
        cfg.supabase_url = Some("https://x.supabase.co/".into());
        cfg.supabase_key = Some("key".into());
        let store = SupabaseStore::from_config(&cfg).unwrap();
        assert_eq!(store.rest_url("t"), "https://x.supabase.co/rest/v1/t");
    }

    #[test]
    fn test_row_with_missing_columns() {
        let row: MemoryRow = serde_json::from_str(
            r#"{"conversation_id":"42","user_message":"hi","assistant_message":null}"#,
        )
        .unwrap();
        let turn: ConversationTurn = row.into();
        assert_eq!(turn.user_message, "hi");
        assert_eq!(turn.assistant_message, "");
        assert_eq!(turn.memory_type, MemoryType::Daily);
    }
}
