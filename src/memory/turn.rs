//! 对话轮次：一问一答，一行记忆

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// 记忆类型标签（memory_type 列）
#[derive(Clone, Debug, PartialEq, Eq, Hash, Default)]
pub enum MemoryType {
    /// 日常对话
    #[default]
    Daily,
    /// 性格相关
    Personality,
    Other(String),
}

impl MemoryType {
    pub fn as_str(&self) -> &str {
        match self {
            MemoryType::Daily => "daily",
            MemoryType::Personality => "personality",
            MemoryType::Other(s) => s.as_str(),
        }
    }

    pub fn parse(s: &str) -> Self {
        match s.trim() {
            "daily" => MemoryType::Daily,
            "personality" => MemoryType::Personality,
            other => MemoryType::Other(other.to_string()),
        }
    }
}

impl fmt::Display for MemoryType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for MemoryType {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for MemoryType {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Ok(MemoryType::parse(&s))
    }
}

/// 一轮对话（写入后不再修改）
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ConversationTurn {
    pub conversation_id: String,
    pub user_message: String,
    pub assistant_message: String,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub memory_type: MemoryType,
    pub platform: String,
}

impl ConversationTurn {
    /// 以当前时间创建 daily 记忆
    pub fn new(
        conversation_id: impl Into<String>,
        user_message: impl Into<String>,
        assistant_message: impl Into<String>,
        platform: impl Into<String>,
    ) -> Self {
        Self {
            conversation_id: conversation_id.into(),
            user_message: user_message.into(),
            assistant_message: assistant_message.into(),
            created_at: Utc::now(),
            memory_type: MemoryType::Daily,
            platform: platform.into(),
        }
    }

    pub fn with_memory_type(mut self, memory_type: MemoryType) -> Self {
        self.memory_type = memory_type;
        self
    }

    pub fn with_created_at(mut self, created_at: DateTime<Utc>) -> Self {
        self.created_at = created_at;
        self
    }
}
