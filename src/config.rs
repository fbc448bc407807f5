//! 应用配置：从 .env、config/default.toml 与环境变量加载
//!
//! 加载顺序：先用 dotenvy 读 .env，再读 TOML 文件，然后用环境变量 `CHENGUANG__*` 覆盖
//! （双下划线表示嵌套，如 `CHENGUANG__LLM__MODEL=gpt-4o`），最后套用扁平的旧式变量
//! （`BOT_TOKEN`、`OPENAI_API_KEY`、`SUPABASE_URL`、`TEMP`、`MAX_OUTPUT_TOKENS` 等）。

use std::path::PathBuf;

use serde::Deserialize;

use crate::core::BotError;

/// 应用配置根（对应 config/default.toml 的顶层）
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    #[serde(default)]
    pub app: AppSection,
    #[serde(default)]
    pub telegram: TelegramSection,
    #[serde(default)]
    pub llm: LlmSection,
    #[serde(default)]
    pub store: StoreSection,
    #[serde(default)]
    pub files: FilesSection,
    #[serde(default)]
    pub personality: PersonalitySection,
    #[serde(default)]
    pub telemetry: TelemetrySection,
}

/// [app] 段：机器人名、历史轮数、平台标记
#[derive(Debug, Clone, Deserialize)]
pub struct AppSection {
    #[serde(default = "default_name")]
    pub name: String,
    /// 每次回复前带入的最近对话条数
    #[serde(default = "default_history_limit")]
    pub history_limit: usize,
    /// 写入记忆表的 platform 字段
    #[serde(default = "default_platform")]
    pub platform: String,
    /// 人设文件（Markdown）；不存在时使用内置人设
    pub persona_path: Option<PathBuf>,
}

fn default_name() -> String {
    "小宸光".to_string()
}

fn default_history_limit() -> usize {
    6
}

fn default_platform() -> String {
    "telegram".to_string()
}

impl Default for AppSection {
    fn default() -> Self {
        Self {
            name: default_name(),
            history_limit: default_history_limit(),
            platform: default_platform(),
            persona_path: None,
        }
    }
}

/// [telegram] 段：Bot Token 与轮询参数
#[derive(Debug, Clone, Deserialize)]
pub struct TelegramSection {
    #[serde(default)]
    pub bot_token: String,
    #[serde(default = "default_api_base")]
    pub api_base: String,
    /// getUpdates 长轮询超时（秒）
    #[serde(default = "default_polling_timeout")]
    pub polling_timeout: u32,
    /// Webhook 模式监听端口
    #[serde(default = "default_port")]
    pub port: u16,
    /// Webhook 公网地址（如 https://bot.example.com/webhook）；设置后启动时调用 setWebhook
    pub webhook_url: Option<String>,
    /// 校验 X-Telegram-Bot-Api-Secret-Token 请求头
    pub webhook_secret: Option<String>,
}

fn default_api_base() -> String {
    "https://api.telegram.org".to_string()
}

fn default_polling_timeout() -> u32 {
    30
}

fn default_port() -> u16 {
    8000
}

impl Default for TelegramSection {
    fn default() -> Self {
        Self {
            bot_token: String::new(),
            api_base: default_api_base(),
            polling_timeout: default_polling_timeout(),
            port: default_port(),
            webhook_url: None,
            webhook_secret: None,
        }
    }
}

/// [llm] 段：模型、采样参数与超时
#[derive(Debug, Clone, Deserialize)]
pub struct LlmSection {
    pub api_key: Option<String>,
    pub base_url: Option<String>,
    #[serde(default = "default_model")]
    pub model: String,
    /// 看图用的模型，未设置时与 model 相同
    pub vision_model: Option<String>,
    /// 嵌入模型；未设置时不做向量检索
    pub embedding_model: Option<String>,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default)]
    pub presence_penalty: f32,
    #[serde(default)]
    pub frequency_penalty: f32,
    /// 以旧字段 max_tokens 发送输出上限（多数 OpenAI 兼容服务只认这个）；
    /// false 时改用 max_completion_tokens
    #[serde(default = "default_true")]
    pub legacy_max_tokens: bool,
    #[serde(default)]
    pub timeouts: LlmTimeoutsSection,
}

fn default_true() -> bool {
    true
}

fn default_model() -> String {
    "gpt-4o-mini".to_string()
}

fn default_temperature() -> f32 {
    0.3
}

fn default_max_tokens() -> u32 {
    220
}

impl Default for LlmSection {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: None,
            model: default_model(),
            vision_model: None,
            embedding_model: None,
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
            presence_penalty: 0.0,
            frequency_penalty: 0.0,
            legacy_max_tokens: true,
            timeouts: LlmTimeoutsSection::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LlmTimeoutsSection {
    #[serde(default = "default_request_timeout")]
    pub request: u64,
}

fn default_request_timeout() -> u64 {
    60
}

impl Default for LlmTimeoutsSection {
    fn default() -> Self {
        Self {
            request: default_request_timeout(),
        }
    }
}

/// 记忆后端
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    /// 有 Supabase 配置时用 Supabase，否则本地 SQLite，再否则内存
    #[default]
    Auto,
    Supabase,
    Sqlite,
    Memory,
    /// 不记忆
    None,
}

/// [store] 段：Supabase / SQLite 连接与表名、过滤、清理
#[derive(Debug, Clone, Deserialize)]
pub struct StoreSection {
    #[serde(default)]
    pub backend: StoreBackend,
    pub supabase_url: Option<String>,
    pub supabase_key: Option<String>,
    /// SQLite 文件路径（如 data/chenguang.db）
    pub sqlite_path: Option<PathBuf>,
    #[serde(default = "default_memory_table")]
    pub memory_table: String,
    #[serde(default = "default_traits_table")]
    pub traits_table: String,
    /// Supabase 相似度检索的存储过程名
    #[serde(default = "default_match_function")]
    pub match_function: String,
    /// 取历史时按 memory_type 过滤；设为空字符串则只按 conversation_id 取
    #[serde(default = "default_history_memory_type")]
    pub history_memory_type: String,
    /// 远端读取失败时的内存回退缓存（每会话条数，0 表示关闭）
    #[serde(default = "default_fallback_cache")]
    pub fallback_cache: usize,
    /// 保留天数；未设置时不清理
    pub retention_days: Option<i64>,
    #[serde(default = "default_cleanup_interval")]
    pub cleanup_interval_secs: u64,
}

fn default_memory_table() -> String {
    "xiaochenguang_memories".to_string()
}

fn default_traits_table() -> String {
    "xiaochenguang_traits".to_string()
}

fn default_match_function() -> String {
    "match_memories".to_string()
}

fn default_history_memory_type() -> String {
    "daily".to_string()
}

fn default_fallback_cache() -> usize {
    20
}

fn default_cleanup_interval() -> u64 {
    3600
}

impl Default for StoreSection {
    fn default() -> Self {
        Self {
            backend: StoreBackend::default(),
            supabase_url: None,
            supabase_key: None,
            sqlite_path: None,
            memory_table: default_memory_table(),
            traits_table: default_traits_table(),
            match_function: default_match_function(),
            history_memory_type: default_history_memory_type(),
            fallback_cache: default_fallback_cache(),
            retention_days: None,
            cleanup_interval_secs: default_cleanup_interval(),
        }
    }
}

impl StoreSection {
    /// Supabase URL 与 Key 都存在且非空
    pub fn supabase_configured(&self) -> bool {
        let filled = |v: &Option<String>| v.as_deref().is_some_and(|s| !s.trim().is_empty());
        filled(&self.supabase_url) && filled(&self.supabase_key)
    }
}

/// [files] 段：上传目录、预览长度、支持格式
#[derive(Debug, Clone, Deserialize)]
pub struct FilesSection {
    #[serde(default = "default_upload_dir")]
    pub upload_dir: PathBuf,
    /// 超过该字符数时附「下载完整内容」按钮
    #[serde(default = "default_preview_chars")]
    pub preview_chars: usize,
    /// 送进大模型的文件内容上限（字符）
    #[serde(default = "default_max_prompt_chars")]
    pub max_prompt_chars: usize,
    #[serde(default = "default_supported_extensions")]
    pub supported_extensions: Vec<String>,
}

fn default_upload_dir() -> PathBuf {
    PathBuf::from("uploads")
}

fn default_preview_chars() -> usize {
    200
}

fn default_max_prompt_chars() -> usize {
    12_000
}

fn default_supported_extensions() -> Vec<String> {
    vec![".txt".into(), ".md".into(), ".pdf".into(), ".docx".into()]
}

impl Default for FilesSection {
    fn default() -> Self {
        Self {
            upload_dir: default_upload_dir(),
            preview_chars: default_preview_chars(),
            max_prompt_chars: default_max_prompt_chars(),
            supported_extensions: default_supported_extensions(),
        }
    }
}

/// [personality] 段：情绪识别与性格向量
#[derive(Debug, Clone, Deserialize, Default)]
pub struct PersonalitySection {
    #[serde(default)]
    pub enabled: bool,
}

/// [telemetry] 段：错误上报地址
#[derive(Debug, Clone, Deserialize, Default)]
pub struct TelemetrySection {
    /// 接收 JSON 错误事件的 http(s) Webhook 地址（不是 Sentry DSN）
    pub dsn: Option<String>,
}

impl AppConfig {
    /// 套用扁平的旧式环境变量；lookup 可注入以便测试
    pub fn apply_env_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(v) = get("BOT_TOKEN").or_else(|| get("TELEGRAM_BOT_TOKEN")) {
            self.telegram.bot_token = v;
        }
        if let Some(v) = get("OPENAI_API_KEY") {
            self.llm.api_key = Some(v);
        }
        if let Some(v) = get("OPENAI_BASE_URL") {
            self.llm.base_url = Some(v);
        }
        if let Some(v) = get("OPENAI_MODEL").or_else(|| get("OPENAI_TEXT_MODEL")) {
            self.llm.model = v;
        }
        if let Some(v) = get("OPENAI_VISION_MODEL") {
            self.llm.vision_model = Some(v);
        }
        if let Some(v) = get("EMBEDDING_MODEL") {
            self.llm.embedding_model = Some(v);
        }
        if let Some(v) = get("TEMP").and_then(|v| v.parse().ok()) {
            self.llm.temperature = v;
        }
        if let Some(v) = get("MAX_OUTPUT_TOKENS").and_then(|v| v.parse().ok()) {
            self.llm.max_tokens = v;
        }
        if let Some(v) = get("PRESENCE_PENALTY").and_then(|v| v.parse().ok()) {
            self.llm.presence_penalty = v;
        }
        if let Some(v) = get("FREQUENCY_PENALTY").and_then(|v| v.parse().ok()) {
            self.llm.frequency_penalty = v;
        }
        if let Some(v) = get("SUPABASE_URL") {
            self.store.supabase_url = Some(v);
        }
        if let Some(v) = get("SUPABASE_KEY") {
            self.store.supabase_key = Some(v);
        }
        if let Some(v) = get("DATABASE_URL") {
            let path = v.strip_prefix("sqlite:").unwrap_or(&v).to_string();
            self.store.sqlite_path = Some(PathBuf::from(path));
        }
        if let Some(v) = get("MEMORY_TABLE") {
            self.store.memory_table = v;
        }
        if let Some(v) = get("ERROR_DSN") {
            self.telemetry.dsn = Some(v);
        } else if get("SENTRY_DSN").is_some() {
            tracing::warn!("SENTRY_DSN is ignored: error reports are posted as JSON to ERROR_DSN (a webhook URL)");
        }
        if let Some(v) = get("PORT").and_then(|v| v.parse().ok()) {
            self.telegram.port = v;
        }
        if let Some(v) = get("WEBHOOK_URL") {
            self.telegram.webhook_url = Some(v);
        }
        if let Some(v) = get("TELEGRAM_WEBHOOK_SECRET") {
            self.telegram.webhook_secret = Some(v);
        }
    }

    /// 启动前检查：没有 Bot Token 无法运行
    pub fn validate(&self) -> Result<(), BotError> {
        if self.telegram.bot_token.trim().is_empty() {
            return Err(BotError::Config("BOT_TOKEN 未设定".to_string()));
        }
        if self.app.history_limit == 0 {
            return Err(BotError::Config("app.history_limit 必须大于 0".to_string()));
        }
        Ok(())
    }

    /// 看图模型：未单独配置时沿用文字模型
    pub fn vision_model(&self) -> &str {
        self.llm.vision_model.as_deref().unwrap_or(&self.llm.model)
    }

    /// 取历史时的 memory_type 过滤值；空字符串表示不过滤
    pub fn history_filter(&self) -> Option<&str> {
        let t = self.store.history_memory_type.trim();
        (!t.is_empty()).then_some(t)
    }

    /// 逐项打印「已设定 / 未设定」，不输出具体值
    pub fn log_secret_check(&self) {
        let mark = |set: bool| if set { "✅ 已设定" } else { "❌ 未设定" };
        tracing::info!("BOT_TOKEN: {}", mark(!self.telegram.bot_token.is_empty()));
        tracing::info!("OPENAI_API_KEY: {}", mark(self.llm.api_key.is_some()));
        tracing::info!("SUPABASE_URL: {}", mark(self.store.supabase_url.is_some()));
        tracing::info!("SUPABASE_KEY: {}", mark(self.store.supabase_key.is_some()));
    }
}

/// 从 config 目录加载配置，环境变量 CHENGUANG__* 与旧式扁平变量可覆盖
///
/// 1. dotenvy 读取 .env（不存在则忽略）
/// 2. 按顺序查找 config/default.toml、../config/default.toml、default.toml，找到则作为第一源
/// 3. 若传入 config_path 且文件存在，则追加该文件（可覆盖前面的键）
/// 4. 叠加环境变量 CHENGUANG__*（双下划线表示嵌套键）
/// 5. 套用 BOT_TOKEN / OPENAI_API_KEY / SUPABASE_URL 等旧式变量
pub fn load_config(config_path: Option<PathBuf>) -> Result<AppConfig, config::ConfigError> {
    let _ = dotenvy::dotenv();

    let mut builder = config::Config::builder();

    let default_names = ["config/default", "../config/default", "default"];
    for name in default_names {
        let path = format!("{}.toml", name);
        if std::path::Path::new(&path).exists() {
            builder = builder.add_source(config::File::with_name(name).required(false));
            break;
        }
    }

    if let Some(ref path) = config_path {
        if path.exists() {
            builder = builder.add_source(config::File::from(path.clone()).required(false));
        }
    }

    builder = builder.add_source(
        config::Environment::with_prefix("CHENGUANG")
            .separator("__")
            .try_parsing(true),
    );

    let mut cfg: AppConfig = builder.build()?.try_deserialize()?;
    cfg.apply_env_overrides(|k| std::env::var(k).ok());
    Ok(cfg)
}
