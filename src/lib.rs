//! 小宸光 - Telegram 对话中继机器人
//!
//! 模块划分：
//! - **agent**: 对话主流程（读历史 → 组 prompt → 补全 → 回复 → 写历史）
//! - **config**: 应用配置加载（.env + TOML + 环境变量）
//! - **core**: 错误类型与面向用户的提示
//! - **intake**: 文件 / 图片接收与内容提取
//! - **integrations**: 消息平台（Telegram 长轮询 / Webhook）
//! - **llm**: 大模型客户端抽象与实现（OpenAI 兼容 / Mock）、嵌入
//! - **memory**: 对话记忆后端（Supabase / SQLite / 内存）、情绪与性格
//! - **observability**: 日志初始化与错误上报
//! - **prompt**: 人设与消息组装

pub mod agent;
pub mod config;
pub mod core;
pub mod intake;
pub mod integrations;
pub mod llm;
pub mod memory;
pub mod observability;
pub mod prompt;

pub use agent::{ChatBot, BotSettings};
