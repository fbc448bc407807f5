//! 小宸光 Webhook 服务
//!
//! 通过 Telegram Webhook 接收消息（需公网 HTTPS 域名）。
//!
//! 环境变量:
//! - BOT_TOKEN: Telegram Bot Token
//! - WEBHOOK_URL: 公网地址（如 https://bot.example.com/webhook），设置后启动时自动 setWebhook
//! - TELEGRAM_WEBHOOK_SECRET: 可选，校验请求头
//! - PORT: 监听端口（默认 8000）
//!
//! 启动: cargo run --bin chenguang-webhook --features webhook

use std::sync::Arc;

use anyhow::Context;
use chenguang::agent::{create_bot, spawn_retention_sweep};
use chenguang::config::load_config;
use chenguang::integrations::webhook::{create_router, WebhookState};
use chenguang::integrations::{TelegramClient, Transport};
use chenguang::observability;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    observability::init();

    let cfg = load_config(None).context("Failed to load config")?;
    cfg.log_secret_check();
    if let Err(e) = cfg.validate() {
        tracing::error!("❌ 無法啟動：{}", e);
        std::process::exit(1);
    }

    let telegram = Arc::new(TelegramClient::from_config(&cfg.telegram));
    if let Some(url) = cfg.telegram.webhook_url.as_deref() {
        telegram
            .set_webhook(url, cfg.telegram.webhook_secret.as_deref())
            .await
            .context("setWebhook failed")?;
        tracing::info!("Webhook registered: {}", url);
    }

    let transport: Arc<dyn Transport> = telegram;
    let bot = Arc::new(create_bot(&cfg, transport).await.context("Failed to create bot")?);
    let _sweep = spawn_retention_sweep(bot.clone(), &cfg.store);

    let state = Arc::new(WebhookState {
        handler: bot,
        secret: cfg.telegram.webhook_secret.clone(),
    });
    let app = create_router(state);

    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], cfg.telegram.port));
    tracing::info!("💛 小宸光在 Port {} 等待訊息", cfg.telegram.port);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
