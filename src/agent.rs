//! 对话主流程
//!
//! 每个入站事件走同一条路：读历史 → 组 prompt → 调大模型 → 回复 → 写历史。
//! 大模型失败时只回一句道歉、不写历史；记忆库失败只记日志，不挡回复。
//! 所有外部依赖（大模型、记忆库、消息平台、错误上报）都在构造时注入。

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::config::{AppConfig, StoreBackend, StoreSection};
use crate::core::BotError;
use crate::integrations::{
    EventHandler, IncomingEvent, InlineButton, PendingDownloads, Transport,
};
use crate::intake::{self, DEFAULT_IMAGE_PROMPT};
use crate::llm::{create_embedder_from_config, LlmClient, OpenAiClient};
use crate::memory::{
    classify_emotion, HistoryClient, HistoryStore, ImageInput, InMemoryStore, MemoryType, Message,
    NoopStore, SupabaseStore,
};
use crate::observability::{create_reporter, ErrorEvent, ErrorReporter, NoopReporter};
use crate::prompt::{build_prompt, Persona, PersonaSelector};

/// 内联按钮文字
pub const FULL_CONTENT_BUTTON: &str = "下载完整内容";
/// /recall 返回条数
const RECALL_LIMIT: usize = 5;
/// 待下载表容量
const PENDING_CAPACITY: usize = 256;

/// 与流程相关的配置项
#[derive(Debug, Clone)]
pub struct BotSettings {
    pub name: String,
    pub history_limit: usize,
    pub personality_enabled: bool,
    pub upload_dir: PathBuf,
    pub preview_chars: usize,
    pub max_prompt_chars: usize,
    pub supported_extensions: Vec<String>,
}

impl Default for BotSettings {
    fn default() -> Self {
        Self::from(&AppConfig::default())
    }
}

impl From<&AppConfig> for BotSettings {
    fn from(cfg: &AppConfig) -> Self {
        Self {
            name: cfg.app.name.clone(),
            history_limit: cfg.app.history_limit,
            personality_enabled: cfg.personality.enabled,
            upload_dir: cfg.files.upload_dir.clone(),
            preview_chars: cfg.files.preview_chars,
            max_prompt_chars: cfg.files.max_prompt_chars,
            supported_extensions: cfg.files.supported_extensions.clone(),
        }
    }
}

/// 一次对话的输入
struct Turn {
    chat_id: i64,
    user_id: String,
    message: Message,
    /// 写进历史的用户侧文字
    record_as: String,
    use_vision: bool,
    button: Option<InlineButton>,
}

/// 机器人：持有所有注入的客户端
pub struct ChatBot {
    llm: Arc<dyn LlmClient>,
    vision_llm: Arc<dyn LlmClient>,
    history: HistoryClient,
    personas: PersonaSelector,
    transport: Arc<dyn Transport>,
    reporter: Arc<dyn ErrorReporter>,
    pending: PendingDownloads,
    settings: BotSettings,
}

impl ChatBot {
    pub fn new(
        llm: Arc<dyn LlmClient>,
        history: HistoryClient,
        transport: Arc<dyn Transport>,
    ) -> Self {
        Self {
            vision_llm: llm.clone(),
            llm,
            history,
            personas: PersonaSelector::single(Persona::default()),
            transport,
            reporter: Arc::new(NoopReporter),
            pending: PendingDownloads::new(PENDING_CAPACITY),
            settings: BotSettings::default(),
        }
    }

    pub fn with_vision_llm(mut self, llm: Arc<dyn LlmClient>) -> Self {
        self.vision_llm = llm;
        self
    }

    pub fn with_personas(mut self, personas: PersonaSelector) -> Self {
        self.personas = personas;
        self
    }

    pub fn with_reporter(mut self, reporter: Arc<dyn ErrorReporter>) -> Self {
        self.reporter = reporter;
        self
    }

    pub fn with_settings(mut self, settings: BotSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn history(&self) -> &HistoryClient {
        &self.history
    }

    pub fn pending(&self) -> &PendingDownloads {
        &self.pending
    }

    /// 纯文字：命令或普通对话
    pub async fn handle_text(&self, chat_id: i64, user_id: &str, text: &str) {
        let trimmed = text.trim();
        if trimmed.is_empty() {
            return;
        }
        if trimmed.starts_with('/') {
            self.handle_command(chat_id, user_id, trimmed).await;
            return;
        }
        self.converse(Turn {
            chat_id,
            user_id: user_id.to_string(),
            message: Message::user(text),
            record_as: text.to_string(),
            use_vision: false,
            button: None,
        })
        .await;
    }

    /// 文件：检查格式 → 下载 → 落盘 → 提取 → 对话
    pub async fn handle_document(
        &self,
        chat_id: i64,
        user_id: &str,
        file_id: &str,
        file_name: &str,
        caption: Option<&str>,
    ) {
        let content = match self.ingest_document(user_id, file_id, file_name).await {
            Ok(c) => c,
            Err(e) => {
                self.fail(chat_id, user_id, "document", &e).await;
                return;
            }
        };

        let prompt = intake::file_prompt(file_name, caption, &content, self.settings.max_prompt_chars);
        let (preview, truncated) = intake::preview(&content, self.settings.preview_chars);
        let button = truncated.then(|| InlineButton {
            text: FULL_CONTENT_BUTTON.to_string(),
            callback_data: self.pending.insert(full_content_name(file_name), content.clone()),
        });

        let mut record_as = format!("[檔案] {}", file_name);
        if let Some(c) = caption.map(str::trim).filter(|c| !c.is_empty()) {
            record_as.push(' ');
            record_as.push_str(c);
        }
        record_as.push('\n');
        record_as.push_str(&preview);

        self.converse(Turn {
            chat_id,
            user_id: user_id.to_string(),
            message: Message::user(prompt),
            record_as,
            use_vision: false,
            button,
        })
        .await;
    }

    /// 返回提取的文字；格式不对时不发任何网络请求
    async fn ingest_document(
        &self,
        user_id: &str,
        file_id: &str,
        file_name: &str,
    ) -> Result<String, BotError> {
        let ext = intake::check_supported(file_name, &self.settings.supported_extensions)?;
        tracing::info!(user_id, file_name, "收到檔案");

        let file = self.transport.download(file_id).await?;
        let path = intake::upload_path(&self.settings.upload_dir, user_id, file_name);
        if let Err(e) = intake::save_upload(&path, &file.bytes).await {
            tracing::warn!(user_id, "upload not saved: {}", e);
        }

        let content = intake::extract_text_blocking(ext, file.bytes).await?;
        tracing::debug!(user_id, chars = content.chars().count(), "file content extracted");
        Ok(content)
    }

    /// 图片：下载最大尺寸 → 与说明文字一起送给看图模型
    pub async fn handle_photo(
        &self,
        chat_id: i64,
        user_id: &str,
        file_id: &str,
        caption: Option<&str>,
    ) {
        let file = match self.transport.download(file_id).await {
            Ok(f) => f,
            Err(e) => {
                self.fail(chat_id, user_id, "download", &e).await;
                return;
            }
        };

        let text = caption
            .map(str::trim)
            .filter(|c| !c.is_empty())
            .unwrap_or(DEFAULT_IMAGE_PROMPT);
        let image = ImageInput::new(intake::image_mime(&file.file_path), file.bytes);

        self.converse(Turn {
            chat_id,
            user_id: user_id.to_string(),
            message: Message::user(text).with_image(image),
            record_as: format!("[圖片] {}", text),
            use_vision: true,
            button: None,
        })
        .await;
    }

    /// 「下载完整内容」按钮
    pub async fn handle_callback(&self, chat_id: i64, callback_id: &str, data: &str) {
        if let Err(e) = self.transport.answer_callback(callback_id).await {
            tracing::warn!(callback_id, "answerCallbackQuery failed: {}", e);
        }
        let Some(file) = self.pending.get(data) else {
            self.send(chat_id, "⌛ 這份內容已經過期了，請重新上傳檔案。").await;
            return;
        };
        if let Err(e) = self
            .transport
            .send_document(chat_id, &file.file_name, file.content.into_bytes())
            .await
        {
            tracing::error!(chat_id, "sendDocument failed: {}", e);
            self.send(chat_id, &e.user_message()).await;
        }
    }

    /// /start、/help、/recall；其它命令回一句提示
    pub async fn handle_command(&self, chat_id: i64, user_id: &str, text: &str) {
        let (head, arg) = text.split_once(char::is_whitespace).unwrap_or((text, ""));
        let command = head.split('@').next().unwrap_or(head);
        let reply = match command {
            "/start" => format!(
                "哈尼～我是{}，直接跟我說話、丟檔案或圖片給我都可以 💛",
                self.settings.name
            ),
            "/help" => self.help_text(),
            "/recall" => self.recall_text(user_id, arg.trim()).await,
            _ => "這個指令我還不會～輸入 /help 看看可以做什麼。".to_string(),
        };
        self.send(chat_id, &reply).await;
    }

    fn help_text(&self) -> String {
        format!(
            "可以這樣用我：\n- 直接傳文字聊天\n- 上傳檔案（{}）幫你讀內容\n- 傳圖片，我會看圖回答\n- /recall 關鍵字：找回以前聊過的內容",
            self.settings.supported_extensions.join(", ")
        )
    }

    async fn recall_text(&self, user_id: &str, query: &str) -> String {
        let turns = self.history.recall(user_id, query, RECALL_LIMIT).await;
        if turns.is_empty() {
            return "找不到相關的記憶。".to_string();
        }
        let mut lines = vec![format!("找到 {} 則記憶：", turns.len())];
        for t in turns {
            lines.push(format!(
                "• {} 使用者: {}\n  {}: {}",
                t.created_at.format("%m-%d %H:%M"),
                t.user_message.trim(),
                self.settings.name,
                t.assistant_message.trim()
            ));
        }
        lines.join("\n")
    }

    /// 读历史 → 组 prompt → 补全 → 回复 → 写历史
    async fn converse(&self, turn: Turn) {
        let Turn {
            chat_id,
            user_id,
            message,
            record_as,
            use_vision,
            button,
        } = turn;

        let history = self
            .history
            .fetch_recent(&user_id, self.settings.history_limit)
            .await;

        let style_hint = if self.settings.personality_enabled {
            self.update_personality(&user_id, &message.content).await
        } else {
            None
        };

        let persona = self.personas.pick();
        let messages = build_prompt(
            persona,
            &history,
            message,
            self.settings.history_limit,
            style_hint.as_deref(),
        );

        let llm = if use_vision { &self.vision_llm } else { &self.llm };
        let reply = match llm.complete(&messages).await {
            Ok(r) => r,
            Err(e) => {
                self.fail(chat_id, &user_id, "completion", &BotError::Completion(e))
                    .await;
                return;
            }
        };

        if let Err(e) = self.transport.send_text(chat_id, &reply, button.as_ref()).await {
            tracing::error!(chat_id, user_id = %user_id, "❌ 回覆發送失敗：{}", e);
            self.report("send", &e, &user_id).await;
            return;
        }
        tracing::info!(user_id = %user_id, "✅ 小宸光成功回覆");

        self.history.record(&user_id, &record_as, &reply).await;
    }

    /// 情绪识别 → 调整并保存性格 → 返回语气提示
    async fn update_personality(&self, user_id: &str, text: &str) -> Option<String> {
        let reading = classify_emotion(text);
        let hint = reading.style_hint()?;
        let mut traits = self.history.traits(user_id).await;
        traits.apply(&reading);
        self.history.save_traits(user_id, &traits).await;
        tracing::debug!(user_id, emotion = %reading.label, intensity = reading.intensity, "emotion");
        Some(hint)
    }

    /// 失败：记日志、必要时上报，并回一条对应的提示
    async fn fail(&self, chat_id: i64, user_id: &str, stage: &str, err: &BotError) {
        tracing::error!(user_id, stage, "❌ 處理訊息錯誤：{}", err);
        if err.is_reportable() {
            self.report(stage, err, user_id).await;
        }
        self.send(chat_id, &err.user_message()).await;
    }

    async fn report(&self, stage: &str, err: &BotError, user_id: &str) {
        self.reporter
            .report(ErrorEvent::new(stage, err.to_string(), Some(user_id)))
            .await;
    }

    async fn send(&self, chat_id: i64, text: &str) {
        if let Err(e) = self.transport.send_text(chat_id, text, None).await {
            tracing::error!(chat_id, "send failed: {}", e);
        }
    }
}

#[async_trait]
impl EventHandler for ChatBot {
    async fn handle_event(&self, event: IncomingEvent) {
        match event {
            IncomingEvent::Text {
                chat_id,
                user_id,
                user_name,
                text,
            } => {
                tracing::debug!(user_id = %user_id, user_name = ?user_name, "text message");
                self.handle_text(chat_id, &user_id, &text).await;
            }
            IncomingEvent::Document {
                chat_id,
                user_id,
                file_id,
                file_name,
                caption,
            } => {
                self.handle_document(chat_id, &user_id, &file_id, &file_name, caption.as_deref())
                    .await;
            }
            IncomingEvent::Photo {
                chat_id,
                user_id,
                file_id,
                caption,
            } => {
                self.handle_photo(chat_id, &user_id, &file_id, caption.as_deref())
                    .await;
            }
            IncomingEvent::Callback {
                chat_id,
                callback_id,
                data,
                ..
            } => {
                self.handle_callback(chat_id, &callback_id, &data).await;
            }
        }
    }
}

/// a.pdf → a.txt
fn full_content_name(file_name: &str) -> String {
    let stem = std::path::Path::new(file_name)
        .file_stem()
        .and_then(|s| s.to_str())
        .filter(|s| !s.is_empty())
        .unwrap_or("content");
    format!("{}.txt", stem)
}

/// 按 [store] 选择记忆后端
pub async fn build_store(cfg: &StoreSection) -> Result<Arc<dyn HistoryStore>, BotError> {
    match cfg.backend {
        StoreBackend::Supabase => SupabaseStore::from_config(cfg)
            .map(|s| Arc::new(s) as Arc<dyn HistoryStore>)
            .ok_or_else(|| BotError::Config("store.backend = supabase 需要 SUPABASE_URL 與 SUPABASE_KEY".into())),
        StoreBackend::Sqlite => open_sqlite(cfg).await,
        StoreBackend::Memory => Ok(Arc::new(InMemoryStore::new())),
        StoreBackend::None => Ok(Arc::new(NoopStore)),
        StoreBackend::Auto => {
            if let Some(s) = SupabaseStore::from_config(cfg) {
                return Ok(Arc::new(s));
            }
            if cfg.sqlite_path.is_some() {
                return open_sqlite(cfg).await;
            }
            tracing::warn!("no Supabase or SQLite configured, memories live in process only");
            Ok(Arc::new(InMemoryStore::new()))
        }
    }
}

#[cfg(feature = "sqlite")]
async fn open_sqlite(cfg: &StoreSection) -> Result<Arc<dyn HistoryStore>, BotError> {
    let path = cfg
        .sqlite_path
        .clone()
        .unwrap_or_else(|| PathBuf::from("data/chenguang.db"));
    let store =
        crate::memory::SqliteStore::open_with_tables(&path, &cfg.memory_table, &cfg.traits_table)
            .await?;
    tracing::info!(path = %path.display(), table = %cfg.memory_table, "SQLite memory store opened");
    Ok(Arc::new(store))
}

#[cfg(not(feature = "sqlite"))]
async fn open_sqlite(_cfg: &StoreSection) -> Result<Arc<dyn HistoryStore>, BotError> {
    Err(BotError::Config(
        "SQLite 後端需要以 --features sqlite 編譯".to_string(),
    ))
}

/// 按配置组装机器人（两个入口共用）
pub async fn create_bot(
    cfg: &AppConfig,
    transport: Arc<dyn Transport>,
) -> Result<ChatBot, BotError> {
    let store = build_store(&cfg.store).await?;
    tracing::info!(store = store.name(), "memory store ready");

    let history = HistoryClient::new(store, cfg.app.platform.clone())
        .with_embedder(create_embedder_from_config(&cfg.llm))
        .with_memory_type_filter(cfg.history_filter().map(MemoryType::parse))
        .with_fallback_cache(cfg.store.fallback_cache);

    let text_llm = OpenAiClient::from_config(&cfg.llm);
    let vision_llm = OpenAiClient::from_config(&cfg.llm).with_model(cfg.vision_model());

    let personas = PersonaSelector::from_entropy(Persona::styles_from(
        &cfg.app.name,
        cfg.app.persona_path.as_deref(),
    ));

    Ok(ChatBot::new(Arc::new(text_llm), history, transport)
        .with_vision_llm(Arc::new(vision_llm))
        .with_personas(personas)
        .with_reporter(create_reporter(&cfg.telemetry))
        .with_settings(BotSettings::from(cfg)))
}

/// 定期清理过期的 daily 记忆；未设置保留天数时不启动
pub fn spawn_retention_sweep(
    bot: Arc<ChatBot>,
    cfg: &StoreSection,
) -> Option<tokio::task::JoinHandle<()>> {
    let days = cfg.retention_days.filter(|d| *d > 0)?;
    let every = Duration::from_secs(cfg.cleanup_interval_secs.max(60));
    tracing::info!(retention_days = days, interval_secs = every.as_secs(), "memory cleanup scheduled");
    Some(tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        loop {
            ticker.tick().await;
            bot.history().cleanup(days).await;
        }
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_full_content_name() {
        assert_eq!(full_content_name("報告.pdf"), "報告.txt");
        assert_eq!(full_content_name(""), "content.txt");
    }

    #[tokio::test]
    async fn test_build_store_selection() {
        let mut cfg = StoreSection::default();
        assert_eq!(build_store(&cfg).await.unwrap().name(), "memory");

        cfg.backend = StoreBackend::None;
        assert_eq!(build_store(&cfg).await.unwrap().name(), "none");

        cfg.backend = StoreBackend::Supabase;
        assert!(matches!(build_store(&cfg).await, Err(BotError::Config(_))));

        cfg.supabase_url = Some("https://x.supabase.co".into());
        cfg.supabase_key = Some("k".into());
        assert_eq!(build_store(&cfg).await.unwrap().name(), "supabase");

        cfg.backend = StoreBackend::Auto;
        assert_eq!(build_store(&cfg).await.unwrap().name(), "supabase");
    }

    #[cfg(feature = "sqlite")]
    #[tokio::test]
    async fn test_build_store_sqlite() {
        let dir = tempfile::TempDir::new().unwrap();
        let cfg = StoreSection {
            sqlite_path: Some(dir.path().join("m.db")),
            ..StoreSection::default()
        };
        assert_eq!(build_store(&cfg).await.unwrap().name(), "sqlite");
    }
}
