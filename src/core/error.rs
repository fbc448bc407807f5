//! 机器人错误类型与面向用户的提示
//!
//! 所有网络调用的失败都收敛到 BotError 的几个分支；`user_message` 是唯一把错误翻译成回复文字的地方。

use thiserror::Error;

use crate::llm::LlmError;
use crate::memory::StoreError;

/// 单条消息处理过程中可能出现的错误
#[derive(Error, Debug)]
pub enum BotError {
    /// 下载附件 / 调用消息平台失败
    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Completion error: {0}")]
    Completion(#[from] LlmError),

    /// 记忆库读写失败（只记日志，不回给用户）
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Unsupported file format: {extension}")]
    UnsupportedFormat {
        extension: String,
        supported: Vec<String>,
    },

    #[error("Extraction failed: {0}")]
    Extraction(String),

    #[error("Config error: {0}")]
    Config(String),
}

/// 大模型调用失败时唯一的道歉回复
pub const COMPLETION_APOLOGY: &str = "哈尼～連接出現小問題，請稍後再試 💛";

impl BotError {
    /// 错误 → 回复给用户的文字
    pub fn user_message(&self) -> String {
        match self {
            BotError::Transport(_) => "📂 檔案下載失敗，請再試一次。".to_string(),
            BotError::Completion(_) => COMPLETION_APOLOGY.to_string(),
            BotError::Store(_) => COMPLETION_APOLOGY.to_string(),
            BotError::UnsupportedFormat {
                extension,
                supported,
            } => {
                let ext = if extension.is_empty() {
                    "(無副檔名)"
                } else {
                    extension.as_str()
                };
                format!(
                    "⚠ 不支援的檔案格式: {}\n支援格式: {}",
                    ext,
                    supported.join(", ")
                )
            }
            BotError::Extraction(_) => {
                "⚠ 檔案裡似乎沒有可以讀取的內容，請檢查檔案格式。".to_string()
            }
            BotError::Config(msg) => format!("⚙ 設定有誤：{}", msg),
        }
    }

    /// 是否需要上报到错误追踪服务：只有补全失败
    pub fn is_reportable(&self) -> bool {
        matches!(self, BotError::Completion(_))
    }
}
