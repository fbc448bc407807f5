//! 可观测性：tracing 初始化与错误上报

use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use serde::Serialize;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::config::TelemetrySection;

/// 日志初始化：RUST_LOG 优先，未设置时为 info
pub fn init() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer())
        .init();
}

/// 上报的错误事件
#[derive(Debug, Clone, Serialize)]
pub struct ErrorEvent {
    /// 出错的环节，如 "completion"、"download"
    pub stage: String,
    pub message: String,
    pub conversation_id: Option<String>,
    pub timestamp: String,
}

impl ErrorEvent {
    pub fn new(stage: &str, message: impl Into<String>, conversation_id: Option<&str>) -> Self {
        Self {
            stage: stage.to_string(),
            message: message.into(),
            conversation_id: conversation_id.map(str::to_string),
            timestamp: Utc::now().to_rfc3339(),
        }
    }
}

/// 错误上报；实现不得返回错误，失败只记日志
#[async_trait]
pub trait ErrorReporter: Send + Sync {
    async fn report(&self, event: ErrorEvent);
}

/// 未配置 DSN 时使用
pub struct NoopReporter;

#[async_trait]
impl ErrorReporter for NoopReporter {
    async fn report(&self, _event: ErrorEvent) {}
}

/// 以 JSON POST 到配置的地址
pub struct WebhookReporter {
    client: reqwest::Client,
    url: String,
}

impl WebhookReporter {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            url: url.into(),
        }
    }
}

#[async_trait]
impl ErrorReporter for WebhookReporter {
    async fn report(&self, event: ErrorEvent) {
        let result = self
            .client
            .post(&self.url)
            .json(&event)
            .timeout(Duration::from_secs(10))
            .send()
            .await;
        match result {
            Ok(resp) if resp.status().is_success() => {}
            Ok(resp) => tracing::warn!(status = %resp.status(), "error report rejected"),
            Err(e) => tracing::warn!("error report failed: {}", e),
        }
    }
}

/// 可用的上报地址：http(s) 且不带用户信息（带 key@ 的多半是 Sentry DSN，不能直接 POST）
fn report_url(cfg: &TelemetrySection) -> Option<&str> {
    let raw = cfg.dsn.as_deref().map(str::trim).filter(|d| !d.is_empty())?;
    match reqwest::Url::parse(raw) {
        Ok(url) if matches!(url.scheme(), "http" | "https") && url.username().is_empty() => Some(raw),
        _ => {
            tracing::warn!("telemetry.dsn is not a plain http(s) webhook URL, error reporting disabled");
            None
        }
    }
}

/// 有可用地址时上报到该地址，否则不上报
pub fn create_reporter(cfg: &TelemetrySection) -> std::sync::Arc<dyn ErrorReporter> {
    match report_url(cfg) {
        Some(url) => {
            tracing::info!("error reporting enabled");
            std::sync::Arc::new(WebhookReporter::new(url))
        }
        None => std::sync::Arc::new(NoopReporter),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn section(dsn: &str) -> TelemetrySection {
        TelemetrySection {
            dsn: Some(dsn.to_string()),
        }
    }

    #[test]
    fn test_report_url_accepts_only_plain_webhooks() {
        let ok = section("https://hooks.example.com/errors");
        assert_eq!(report_url(&ok), Some("https://hooks.example.com/errors"));
        assert_eq!(report_url(&section("https://abc123@o1.ingest.sentry.io/42")), None);
        assert_eq!(report_url(&section("not a url")), None);
        assert_eq!(report_url(&section("  ")), None);
        assert_eq!(report_url(&TelemetrySection::default()), None);
    }

    #[tokio::test]
    async fn test_webhook_reporter_posts_event_json() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/errors"))
            .and(body_partial_json(serde_json::json!({
                "stage": "completion",
                "message": "request timed out",
                "conversation_id": "42",
            })))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let reporter = create_reporter(&section(&format!("{}/errors", server.uri())));
        reporter
            .report(ErrorEvent::new("completion", "request timed out", Some("42")))
            .await;
    }
}
