//! 小宸光 - Telegram 长轮询入口
//!
//! 初始化日志、加载配置、组装机器人，然后进入 getUpdates 主循环，Ctrl+C 退出。

use std::sync::Arc;

use anyhow::Context;
use chenguang::agent::{create_bot, spawn_retention_sweep};
use chenguang::config::load_config;
use chenguang::integrations::{EventHandler, TelegramClient, Transport};
use chenguang::observability;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    observability::init();
    tracing::info!("🌟 小宸光靈魂啟動中...");

    let cfg = load_config(None).context("Failed to load config")?;
    cfg.log_secret_check();
    if let Err(e) = cfg.validate() {
        tracing::error!("❌ 無法啟動：{}", e);
        std::process::exit(1);
    }

    let telegram = Arc::new(TelegramClient::from_config(&cfg.telegram));
    if let Err(e) = telegram.delete_webhook().await {
        tracing::warn!("deleteWebhook failed, polling may conflict: {}", e);
    }

    let transport: Arc<dyn Transport> = telegram.clone();
    let bot = Arc::new(
        create_bot(&cfg, transport)
            .await
            .context("Failed to create bot")?,
    );
    let _sweep = spawn_retention_sweep(bot.clone(), &cfg.store);

    tracing::info!("✨ 小宸光靈魂同步完成，準備與哈尼對話...");
    let handler: Arc<dyn EventHandler> = bot;
    tokio::select! {
        _ = telegram.run_polling(handler) => {}
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("收到 Ctrl+C，小宸光下線");
        }
    }

    Ok(())
}
