//! 消息平台集成：与平台无关的入站事件、发送接口，以及 Telegram 实现
//!
//! Telegram 默认走 getUpdates 长轮询；`webhook` feature 下可改用 axum Webhook（需公网域名）。

pub mod pending;
pub mod telegram;
#[cfg(feature = "webhook")]
pub mod webhook;

use async_trait::async_trait;

use crate::core::BotError;

pub use pending::{PendingDownloads, PendingFile};
pub use telegram::TelegramClient;

/// 单条消息上限（Telegram 为 4096，留余量）
pub const MAX_MESSAGE_CHARS: usize = 4000;

/// 入站事件
#[derive(Debug, Clone, PartialEq)]
pub enum IncomingEvent {
    Text {
        chat_id: i64,
        user_id: String,
        user_name: Option<String>,
        text: String,
    },
    Document {
        chat_id: i64,
        user_id: String,
        file_id: String,
        file_name: String,
        caption: Option<String>,
    },
    /// 只保留最大尺寸的那张
    Photo {
        chat_id: i64,
        user_id: String,
        file_id: String,
        caption: Option<String>,
    },
    /// 内联按钮回调
    Callback {
        chat_id: i64,
        user_id: String,
        callback_id: String,
        data: String,
    },
}

impl IncomingEvent {
    pub fn chat_id(&self) -> i64 {
        match self {
            IncomingEvent::Text { chat_id, .. }
            | IncomingEvent::Document { chat_id, .. }
            | IncomingEvent::Photo { chat_id, .. }
            | IncomingEvent::Callback { chat_id, .. } => *chat_id,
        }
    }

    /// 会话 ID 即发送者 ID
    pub fn user_id(&self) -> &str {
        match self {
            IncomingEvent::Text { user_id, .. }
            | IncomingEvent::Document { user_id, .. }
            | IncomingEvent::Photo { user_id, .. }
            | IncomingEvent::Callback { user_id, .. } => user_id,
        }
    }
}

/// 回复下方的内联按钮
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InlineButton {
    pub text: String,
    pub callback_data: String,
}

/// 下载得到的文件
#[derive(Debug, Clone)]
pub struct DownloadedFile {
    /// 平台侧的路径（如 photos/file_1.jpg），用于判断扩展名
    pub file_path: String,
    pub bytes: Vec<u8>,
}

/// 发送 / 下载接口，测试里用假实现替换
#[async_trait]
pub trait Transport: Send + Sync {
    /// 发送文字；超长时分段，按钮附在最后一段
    async fn send_text(
        &self,
        chat_id: i64,
        text: &str,
        button: Option<&InlineButton>,
    ) -> Result<(), BotError>;

    async fn send_document(
        &self,
        chat_id: i64,
        file_name: &str,
        bytes: Vec<u8>,
    ) -> Result<(), BotError>;

    async fn download(&self, file_id: &str) -> Result<DownloadedFile, BotError>;

    /// 应答回调（去掉按钮上的转圈）
    async fn answer_callback(&self, callback_id: &str) -> Result<(), BotError>;
}

/// 入站事件处理者
#[async_trait]
pub trait EventHandler: Send + Sync {
    async fn handle_event(&self, event: IncomingEvent);
}

/// 按字符数分段
pub fn split_message(text: &str, max_chars: usize) -> Vec<String> {
    if max_chars == 0 || text.chars().count() <= max_chars {
        return vec![text.to_string()];
    }
    text.chars()
        .collect::<Vec<_>>()
        .chunks(max_chars)
        .map(|c| c.iter().collect())
        .collect()
}
