//! Telegram Bot API 客户端
//!
//! 接收：getUpdates 长轮询（offset = 上次最大 update_id + 1），每个 update 单独 spawn 处理，
//! 轮询本身不等待处理结果；出错时退避 5 秒。
//! 发送：sendMessage（分段 + 内联按钮）、sendDocument（multipart）、getFile + 下载。

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::Deserialize;

use super::{
    split_message, DownloadedFile, EventHandler, IncomingEvent, InlineButton, Transport,
    MAX_MESSAGE_CHARS,
};
use crate::config::TelegramSection;
use crate::core::BotError;

/// 普通 API 调用超时（秒）
const API_TIMEOUT_SECS: u64 = 30;
/// 轮询出错后的退避（秒）
const POLL_BACKOFF_SECS: u64 = 5;

// ---- Bot API 类型 ----

#[derive(Debug, Deserialize)]
struct TelegramResponse<T> {
    ok: bool,
    result: Option<T>,
    description: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Update {
    pub update_id: i64,
    pub message: Option<TelegramMessage>,
    pub callback_query: Option<CallbackQuery>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TelegramMessage {
    pub message_id: i64,
    pub from: Option<TelegramUser>,
    pub chat: TelegramChat,
    pub text: Option<String>,
    pub caption: Option<String>,
    pub document: Option<TelegramDocument>,
    pub photo: Option<Vec<PhotoSize>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TelegramUser {
    pub id: i64,
    pub first_name: Option<String>,
    pub username: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TelegramChat {
    pub id: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TelegramDocument {
    pub file_id: String,
    pub file_name: Option<String>,
    pub mime_type: Option<String>,
    pub file_size: Option<i64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PhotoSize {
    pub file_id: String,
    pub width: u32,
    pub height: u32,
    pub file_size: Option<i64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CallbackQuery {
    pub id: String,
    pub from: TelegramUser,
    pub message: Option<TelegramMessage>,
    pub data: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TelegramFile {
    file_path: Option<String>,
}

/// Update → 入站事件；不关心的类型（贴图、语音等）返回 None
pub fn to_event(update: Update) -> Option<IncomingEvent> {
    if let Some(cb) = update.callback_query {
        let chat_id = cb.message.as_ref().map(|m| m.chat.id).unwrap_or(cb.from.id);
        return Some(IncomingEvent::Callback {
            chat_id,
            user_id: cb.from.id.to_string(),
            callback_id: cb.id,
            data: cb.data.unwrap_or_default(),
        });
    }

    let message = update.message?;
    let from = message.from?;
    let chat_id = message.chat.id;
    let user_id = from.id.to_string();
    let caption = message.caption.filter(|c| !c.trim().is_empty());

    if let Some(text) = message.text {
        return Some(IncomingEvent::Text {
            chat_id,
            user_id,
            user_name: from.first_name.or(from.username),
            text,
        });
    }

    if let Some(doc) = message.document {
        return Some(IncomingEvent::Document {
            chat_id,
            user_id,
            file_id: doc.file_id,
            file_name: doc.file_name.unwrap_or_default(),
            caption,
        });
    }

    if let Some(photos) = message.photo {
        let best = photos
            .into_iter()
            .max_by_key(|p| (p.file_size.unwrap_or(0), p.width as u64 * p.height as u64))?;
        return Some(IncomingEvent::Photo {
            chat_id,
            user_id,
            file_id: best.file_id,
            caption,
        });
    }

    None
}

fn transport_err(e: impl std::fmt::Display) -> BotError {
    BotError::Transport(e.to_string())
}

/// Telegram 客户端
pub struct TelegramClient {
    client: Client,
    bot_token: String,
    api_base: String,
    polling_timeout: u32,
    last_update_id: AtomicI64,
}

impl TelegramClient {
    pub fn new(bot_token: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            bot_token: bot_token.into(),
            api_base: "https://api.telegram.org".to_string(),
            polling_timeout: 30,
            last_update_id: AtomicI64::new(0),
        }
    }

    pub fn from_config(cfg: &TelegramSection) -> Self {
        Self::new(cfg.bot_token.clone())
            .with_api_base(&cfg.api_base)
            .with_polling_timeout(cfg.polling_timeout)
    }

    /// 测试时指向 mock 服务器
    pub fn with_api_base(mut self, api_base: &str) -> Self {
        self.api_base = api_base.trim_end_matches('/').to_string();
        self
    }

    pub fn with_polling_timeout(mut self, secs: u32) -> Self {
        self.polling_timeout = secs;
        self
    }

    pub fn last_update_id(&self) -> i64 {
        self.last_update_id.load(Ordering::SeqCst)
    }

    fn api_url(&self, method: &str) -> String {
        format!("{}/bot{}/{}", self.api_base, self.bot_token, method)
    }

    fn file_url(&self, file_path: &str) -> String {
        format!("{}/file/bot{}/{}", self.api_base, self.bot_token, file_path)
    }

    async fn unwrap_response<T: DeserializeOwned>(
        method: &str,
        response: reqwest::Response,
    ) -> Result<T, BotError> {
        let status = response.status();
        let body: TelegramResponse<T> = response.json().await.map_err(transport_err)?;
        if !body.ok {
            return Err(BotError::Transport(format!(
                "{} failed ({}): {}",
                method,
                status,
                body.description.unwrap_or_default()
            )));
        }
        body.result
            .ok_or_else(|| BotError::Transport(format!("{} returned ok but no result", method)))
    }

    /// JSON 参数的 API 调用
    async fn call<T: DeserializeOwned>(
        &self,
        method: &str,
        params: &serde_json::Value,
        timeout: Duration,
    ) -> Result<T, BotError> {
        let response = self
            .client
            .post(self.api_url(method))
            .json(params)
            .timeout(timeout)
            .send()
            .await
            .map_err(transport_err)?;
        Self::unwrap_response(method, response).await
    }

    /// 一次长轮询；成功后推进 offset
    pub async fn get_updates(&self) -> Result<Vec<Update>, BotError> {
        let offset = self.last_update_id();
        let params = serde_json::json!({
            "offset": if offset > 0 { offset + 1 } else { 0 },
            "timeout": self.polling_timeout,
            "allowed_updates": ["message", "callback_query"],
        });
        let updates: Vec<Update> = self
            .call(
                "getUpdates",
                &params,
                Duration::from_secs(self.polling_timeout as u64 + 10),
            )
            .await?;
        if let Some(max) = updates.iter().map(|u| u.update_id).max() {
            self.last_update_id.store(max, Ordering::SeqCst);
        }
        Ok(updates)
    }

    /// 长轮询主循环：每个事件独立 spawn，不阻塞下一次轮询
    pub async fn run_polling(self: Arc<Self>, handler: Arc<dyn EventHandler>) {
        tracing::info!("Starting Telegram polling");
        loop {
            match self.get_updates().await {
                Ok(updates) => {
                    for update in updates {
                        let update_id = update.update_id;
                        let Some(event) = to_event(update) else {
                            tracing::debug!(update_id, "ignoring unsupported update");
                            continue;
                        };
                        let handler = handler.clone();
                        tokio::spawn(async move {
                            handler.handle_event(event).await;
                        });
                    }
                }
                Err(e) => {
                    tracing::error!("Telegram polling error: {}", e);
                    tokio::time::sleep(Duration::from_secs(POLL_BACKOFF_SECS)).await;
                }
            }
        }
    }

    /// 注册 Webhook（secret 会出现在每个请求的 X-Telegram-Bot-Api-Secret-Token 头里）
    pub async fn set_webhook(&self, url: &str, secret: Option<&str>) -> Result<(), BotError> {
        let mut params = serde_json::json!({
            "url": url,
            "allowed_updates": ["message", "callback_query"],
        });
        if let Some(s) = secret {
            params["secret_token"] = serde_json::Value::String(s.to_string());
        }
        let _: bool = self
            .call("setWebhook", &params, Duration::from_secs(API_TIMEOUT_SECS))
            .await?;
        Ok(())
    }

    /// 轮询前清掉残留的 Webhook，否则 getUpdates 会 409
    pub async fn delete_webhook(&self) -> Result<(), BotError> {
        let _: bool = self
            .call(
                "deleteWebhook",
                &serde_json::json!({}),
                Duration::from_secs(API_TIMEOUT_SECS),
            )
            .await?;
        Ok(())
    }
}

#[async_trait]
impl Transport for TelegramClient {
    async fn send_text(
        &self,
        chat_id: i64,
        text: &str,
        button: Option<&InlineButton>,
    ) -> Result<(), BotError> {
        let chunks = split_message(text, MAX_MESSAGE_CHARS);
        let last = chunks.len().saturating_sub(1);
        for (i, chunk) in chunks.iter().enumerate() {
            let mut params = serde_json::json!({
                "chat_id": chat_id,
                "text": chunk,
            });
            if let (true, Some(b)) = (i == last, button) {
                params["reply_markup"] = serde_json::json!({
                    "inline_keyboard": [[{ "text": b.text, "callback_data": b.callback_data }]]
                });
            }
            let _: serde_json::Value = self
                .call("sendMessage", &params, Duration::from_secs(API_TIMEOUT_SECS))
                .await?;
        }
        Ok(())
    }

    async fn send_document(
        &self,
        chat_id: i64,
        file_name: &str,
        bytes: Vec<u8>,
    ) -> Result<(), BotError> {
        let part = Part::bytes(bytes)
            .file_name(file_name.to_string())
            .mime_str("text/plain; charset=utf-8")
            .map_err(transport_err)?;
        let form = Form::new()
            .text("chat_id", chat_id.to_string())
            .part("document", part);
        let response = self
            .client
            .post(self.api_url("sendDocument"))
            .multipart(form)
            .timeout(Duration::from_secs(API_TIMEOUT_SECS))
            .send()
            .await
            .map_err(transport_err)?;
        let _: serde_json::Value = Self::unwrap_response("sendDocument", response).await?;
        Ok(())
    }

    async fn download(&self, file_id: &str) -> Result<DownloadedFile, BotError> {
        let file: TelegramFile = self
            .call(
                "getFile",
                &serde_json::json!({ "file_id": file_id }),
                Duration::from_secs(API_TIMEOUT_SECS),
            )
            .await?;
        let file_path = file
            .file_path
            .ok_or_else(|| BotError::Transport("getFile returned no file_path".to_string()))?;

        let response = self
            .client
            .get(self.file_url(&file_path))
            .timeout(Duration::from_secs(API_TIMEOUT_SECS))
            .send()
            .await
            .map_err(transport_err)?;
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(BotError::Transport(format!(
                "file download failed ({}): {}",
                status, body
            )));
        }
        let bytes = response.bytes().await.map_err(transport_err)?;
        Ok(DownloadedFile {
            file_path,
            bytes: bytes.to_vec(),
        })
    }

    async fn answer_callback(&self, callback_id: &str) -> Result<(), BotError> {
        let _: bool = self
            .call(
                "answerCallbackQuery",
                &serde_json::json!({ "callback_query_id": callback_id }),
                Duration::from_secs(API_TIMEOUT_SECS),
            )
            .await?;
        Ok(())
    }
}
