//! 本地 SQLite 记忆后端（sqlx，需要 `sqlite` feature）
//!
//! 没有 Supabase 时的替代：同样的两张表结构，放在本地文件里。
//! 时间一律存为固定格式的 RFC3339（UTC、微秒、Z 结尾），可直接按字符串比较。

use std::path::Path;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::sqlite::{SqlitePool, SqlitePoolOptions};
use sqlx::Row;

use super::personality::TraitVector;
use super::store::{rank_by_similarity, HistoryStore, StoreError};
use super::turn::{ConversationTurn, MemoryType};

impl From<sqlx::Error> for StoreError {
    fn from(e: sqlx::Error) -> Self {
        StoreError::Database(e.to_string())
    }
}

fn timestamp(t: &DateTime<Utc>) -> String {
    t.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// 未指定表名时使用
pub const DEFAULT_MEMORY_TABLE: &str = "memories";
pub const DEFAULT_TRAITS_TABLE: &str = "traits";

/// 表名会直接拼进 SQL，只接受字母、数字与下划线
fn checked_table_name(name: &str) -> Result<String, StoreError> {
    let valid = name
        .chars()
        .next()
        .map_or(false, |c| c.is_ascii_alphabetic() || c == '_')
        && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_');
    if valid {
        Ok(name.to_string())
    } else {
        Err(StoreError::Database(format!("invalid table name: {:?}", name)))
    }
}

/// SQLite 持久化
pub struct SqliteStore {
    pool: SqlitePool,
    memory_table: String,
    traits_table: String,
}

impl SqliteStore {
    /// 打开（不存在则创建）数据库文件并建默认表
    pub async fn open(db_path: impl AsRef<Path>) -> Result<Self, StoreError> {
        Self::open_with_tables(db_path, DEFAULT_MEMORY_TABLE, DEFAULT_TRAITS_TABLE).await
    }

    /// 同 open，但使用指定的记忆表与性格表名（对应 store.memory_table / traits_table）
    pub async fn open_with_tables(
        db_path: impl AsRef<Path>,
        memory_table: &str,
        traits_table: &str,
    ) -> Result<Self, StoreError> {
        let memory_table = checked_table_name(memory_table)?;
        let traits_table = checked_table_name(traits_table)?;
        if let Some(parent) = db_path.as_ref().parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| StoreError::Database(e.to_string()))?;
            }
        }
        let db_url = format!("sqlite:{}?mode=rwc", db_path.as_ref().display());
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect(&db_url)
            .await?;
        Self::from_pool(pool, memory_table, traits_table).await
    }

    /// 内存数据库（单连接，测试用）
    pub async fn in_memory() -> Result<Self, StoreError> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await?;
        Self::from_pool(
            pool,
            DEFAULT_MEMORY_TABLE.to_string(),
            DEFAULT_TRAITS_TABLE.to_string(),
        )
        .await
    }

    async fn from_pool(
        pool: SqlitePool,
        memory_table: String,
        traits_table: String,
    ) -> Result<Self, StoreError> {
        let store = Self {
            pool,
            memory_table,
            traits_table,
        };
        store.init_tables().await?;
        Ok(store)
    }

    async fn init_tables(&self) -> Result<(), StoreError> {
        let memories = &self.memory_table;
        sqlx::query(&format!(
            "CREATE TABLE IF NOT EXISTS {memories} (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                conversation_id TEXT NOT NULL,
                user_message TEXT NOT NULL,
                assistant_message TEXT NOT NULL,
                created_at TEXT NOT NULL,
                memory_type TEXT NOT NULL,
                platform TEXT NOT NULL,
                embedding TEXT
            )"
        ))
        .execute(&self.pool)
        .await?;

        sqlx::query(&format!(
            "CREATE INDEX IF NOT EXISTS idx_{memories}_conversation ON {memories}(conversation_id)"
        ))
        .execute(&self.pool)
        .await?;

        sqlx::query(&format!(
            "CREATE TABLE IF NOT EXISTS {} (
                user_id TEXT PRIMARY KEY,
                traits TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )",
            self.traits_table
        ))
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    fn row_to_turn(row: &sqlx::sqlite::SqliteRow) -> Result<ConversationTurn, StoreError> {
        let created: String = row.get("created_at");
        let created_at = DateTime::parse_from_rfc3339(&created)
            .map(|t| t.with_timezone(&Utc))
            .map_err(|e| StoreError::Decode(e.to_string()))?;
        let memory_type: String = row.get("memory_type");
        Ok(ConversationTurn {
            conversation_id: row.get("conversation_id"),
            user_message: row.get("user_message"),
            assistant_message: row.get("assistant_message"),
            created_at,
            memory_type: MemoryType::parse(&memory_type),
            platform: row.get("platform"),
        })
    }

    /// 关闭连接池
    pub async fn close(&self) {
        self.pool.close().await;
    }
}

#[async_trait]
impl HistoryStore for SqliteStore {
    fn name(&self) -> &'static str {
        "sqlite"
    }

    async fn insert(
        &self,
        turn: &ConversationTurn,
        embedding: Option<&[f32]>,
    ) -> Result<(), StoreError> {
        let embedding = match embedding.filter(|e| !e.is_empty()) {
            Some(e) => Some(serde_json::to_string(e)?),
            None => None,
        };
        sqlx::query(&format!(
            "INSERT INTO {} (conversation_id, user_message, assistant_message, created_at, memory_type, platform, embedding)
             VALUES (?, ?, ?, ?, ?, ?, ?)",
            self.memory_table
        ))
        .bind(&turn.conversation_id)
        .bind(&turn.user_message)
        .bind(&turn.assistant_message)
        .bind(timestamp(&turn.created_at))
        .bind(turn.memory_type.as_str())
        .bind(&turn.platform)
        .bind(embedding)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn recent(
        &self,
        conversation_id: &str,
        limit: usize,
        memory_type: Option<&MemoryType>,
    ) -> Result<Vec<ConversationTurn>, StoreError> {
        let rows = match memory_type {
            Some(t) => {
                sqlx::query(&format!(
                    "SELECT * FROM {} WHERE conversation_id = ? AND memory_type = ?
                     ORDER BY id DESC LIMIT ?",
                    self.memory_table
                ))
                .bind(conversation_id)
                .bind(t.as_str())
                .bind(limit as i64)
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query(&format!(
                    "SELECT * FROM {} WHERE conversation_id = ? ORDER BY id DESC LIMIT ?",
                    self.memory_table
                ))
                .bind(conversation_id)
                .bind(limit as i64)
                .fetch_all(&self.pool)
                .await?
            }
        };

        let mut turns = rows
            .iter()
            .map(Self::row_to_turn)
            .collect::<Result<Vec<_>, _>>()?;
        turns.reverse();
        Ok(turns)
    }

    async fn search_similar(
        &self,
        conversation_id: &str,
        embedding: &[f32],
        k: usize,
    ) -> Result<Vec<ConversationTurn>, StoreError> {
        let rows = sqlx::query(&format!(
            "SELECT * FROM {} WHERE conversation_id = ? AND embedding IS NOT NULL ORDER BY id",
            self.memory_table
        ))
        .bind(conversation_id)
        .fetch_all(&self.pool)
        .await?;

        let mut candidates = Vec::with_capacity(rows.len());
        for row in &rows {
            let raw: String = row.get("embedding");
            let vector: Vec<f32> = serde_json::from_str(&raw)?;
            candidates.push((Self::row_to_turn(row)?, vector));
        }
        Ok(rank_by_similarity(candidates, embedding, k))
    }

    async fn delete_before(
        &self,
        cutoff: DateTime<Utc>,
        memory_type: Option<&MemoryType>,
    ) -> Result<u64, StoreError> {
        let result = match memory_type {
            Some(t) => {
                sqlx::query(&format!(
                    "DELETE FROM {} WHERE created_at < ? AND memory_type = ?",
                    self.memory_table
                ))
                    .bind(timestamp(&cutoff))
                    .bind(t.as_str())
                    .execute(&self.pool)
                    .await?
            }
            None => {
                sqlx::query(&format!(
                    "DELETE FROM {} WHERE created_at < ?",
                    self.memory_table
                ))
                    .bind(timestamp(&cutoff))
                    .execute(&self.pool)
                    .await?
            }
        };
        Ok(result.rows_affected())
    }

    async fn load_traits(&self, user_id: &str) -> Result<Option<TraitVector>, StoreError> {
        let row = sqlx::query(&format!(
            "SELECT traits FROM {} WHERE user_id = ?",
            self.traits_table
        ))
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await?;
        match row {
            Some(row) => {
                let blob: String = row.get("traits");
                Ok(Some(serde_json::from_str(&blob)?))
            }
            None => Ok(None),
        }
    }

    async fn save_traits(&self, user_id: &str, traits: &TraitVector) -> Result<(), StoreError> {
        sqlx::query(&format!(
            "INSERT INTO {} (user_id, traits, updated_at) VALUES (?, ?, ?)
             ON CONFLICT(user_id) DO UPDATE SET traits = excluded.traits, updated_at = excluded.updated_at",
            self.traits_table
        ))
        .bind(user_id)
        .bind(serde_json::to_string(traits)?)
        .bind(timestamp(&Utc::now()))
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
