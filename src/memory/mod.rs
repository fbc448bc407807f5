//! 记忆层：对话消息、对话轮次、记忆后端（Supabase / SQLite / 内存）、情绪与性格

pub mod cache;
pub mod conversation;
pub mod history;
pub mod in_memory;
pub mod personality;
#[cfg(feature = "sqlite")]
pub mod sqlite;
pub mod store;
pub mod supabase;
pub mod turn;

pub use cache::RecentTurnsCache;
pub use conversation::{ImageInput, Message, Role};
pub use history::HistoryClient;
pub use in_memory::InMemoryStore;
pub use personality::{classify_emotion, Emotion, EmotionReading, TraitVector, TRAIT_NAMES};
#[cfg(feature = "sqlite")]
pub use sqlite::SqliteStore;
pub use store::{HistoryStore, NoopStore, StoreError};
pub use supabase::SupabaseStore;
pub use turn::{ConversationTurn, MemoryType};
