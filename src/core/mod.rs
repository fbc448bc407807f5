//! 核心：错误类型与用户提示

pub mod error;

pub use error::{BotError, COMPLETION_APOLOGY};
