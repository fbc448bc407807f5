//! Telegram Webhook 入口（需 `webhook` feature 与公网域名）
//!
//! POST /webhook 收到 update 后立刻回 200，处理放到后台任务里。

use std::sync::Arc;

use axum::{
    extract::State,
    http::{HeaderMap, StatusCode},
    routing::{get, post},
    Json, Router,
};

use super::telegram::{to_event, Update};
use super::EventHandler;

const SECRET_HEADER: &str = "x-telegram-bot-api-secret-token";

/// Webhook 服务状态
pub struct WebhookState {
    pub handler: Arc<dyn EventHandler>,
    /// 设置后要求请求头里的 secret 一致
    pub secret: Option<String>,
}

/// 创建路由：/webhook 与 /health
pub fn create_router(state: Arc<WebhookState>) -> Router {
    Router::new()
        .route("/webhook", post(webhook_receive))
        .route("/health", get(|| async { "OK" }))
        .with_state(state)
}

/// POST /webhook - 接收 Telegram update
async fn webhook_receive(
    State(state): State<Arc<WebhookState>>,
    headers: HeaderMap,
    Json(update): Json<Update>,
) -> StatusCode {
    if let Some(expected) = state.secret.as_deref() {
        let given = headers.get(SECRET_HEADER).and_then(|v| v.to_str().ok());
        if given != Some(expected) {
            tracing::warn!(update_id = update.update_id, "webhook secret mismatch");
            return StatusCode::UNAUTHORIZED;
        }
    }

    let update_id = update.update_id;
    match to_event(update) {
        Some(event) => {
            let handler = state.handler.clone();
            tokio::spawn(async move {
                handler.handle_event(event).await;
            });
        }
        None => tracing::debug!(update_id, "ignoring unsupported update"),
    }
    StatusCode::OK
}
