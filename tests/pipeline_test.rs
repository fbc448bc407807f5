//! 对话主流程集成测试：假的消息平台 + Mock 大模型 + 内存 / 故障记忆库

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chenguang::agent::{spawn_retention_sweep, BotSettings, ChatBot, FULL_CONTENT_BUTTON};
use chenguang::config::StoreSection;
use chenguang::core::{BotError, COMPLETION_APOLOGY};
use chenguang::integrations::{DownloadedFile, EventHandler, IncomingEvent, InlineButton, Transport};
use chenguang::llm::{LlmError, MockLlmClient};
use chenguang::memory::{
    classify_emotion, ConversationTurn, HistoryClient, HistoryStore, InMemoryStore, MemoryType,
    Role, StoreError, TraitVector,
};
use chrono::{DateTime, Duration, Utc};
use tempfile::TempDir;

/// 记录所有发出去的消息
#[derive(Default)]
struct RecordingTransport {
    texts: Mutex<Vec<(i64, String, Option<InlineButton>)>>,
    documents: Mutex<Vec<(i64, String, Vec<u8>)>>,
    files: HashMap<String, DownloadedFile>,
    downloads: Mutex<usize>,
}

impl RecordingTransport {
    fn with_file(mut self, file_id: &str, file_path: &str, bytes: &[u8]) -> Self {
        self.files.insert(
            file_id.to_string(),
            DownloadedFile {
                file_path: file_path.to_string(),
                bytes: bytes.to_vec(),
            },
        );
        self
    }

    fn texts(&self) -> Vec<String> {
        self.texts.lock().unwrap().iter().map(|(_, t, _)| t.clone()).collect()
    }

    fn last_button(&self) -> Option<InlineButton> {
        self.texts.lock().unwrap().last().and_then(|(_, _, b)| b.clone())
    }

    fn download_count(&self) -> usize {
        *self.downloads.lock().unwrap()
    }
}

#[async_trait]
impl Transport for RecordingTransport {
    async fn send_text(
        &self,
        chat_id: i64,
        text: &str,
        button: Option<&InlineButton>,
    ) -> Result<(), BotError> {
        self.texts
            .lock()
            .unwrap()
            .push((chat_id, text.to_string(), button.cloned()));
        Ok(())
    }

    async fn send_document(
        &self,
        chat_id: i64,
        file_name: &str,
        bytes: Vec<u8>,
    ) -> Result<(), BotError> {
        self.documents
            .lock()
            .unwrap()
            .push((chat_id, file_name.to_string(), bytes));
        Ok(())
    }

    async fn download(&self, file_id: &str) -> Result<DownloadedFile, BotError> {
        *self.downloads.lock().unwrap() += 1;
        self.files
            .get(file_id)
            .cloned()
            .ok_or_else(|| BotError::Transport(format!("no such file {}", file_id)))
    }

    async fn answer_callback(&self, _callback_id: &str) -> Result<(), BotError> {
        Ok(())
    }
}

/// 读写全部失败的记忆库
struct FailingStore;

#[async_trait]
impl HistoryStore for FailingStore {
    fn name(&self) -> &'static str {
        "failing"
    }
    async fn insert(&self, _t: &ConversationTurn, _e: Option<&[f32]>) -> Result<(), StoreError> {
        Err(StoreError::Status {
            status: 503,
            body: "unavailable".into(),
        })
    }
    async fn recent(
        &self,
        _c: &str,
        _l: usize,
        _m: Option<&MemoryType>,
    ) -> Result<Vec<ConversationTurn>, StoreError> {
        Err(StoreError::Http("timeout".into()))
    }
    async fn delete_before(
        &self,
        _c: DateTime<Utc>,
        _m: Option<&MemoryType>,
    ) -> Result<u64, StoreError> {
        Err(StoreError::Http("timeout".into()))
    }
    async fn load_traits(&self, _u: &str) -> Result<Option<TraitVector>, StoreError> {
        Err(StoreError::Http("timeout".into()))
    }
    async fn save_traits(&self, _u: &str, _t: &TraitVector) -> Result<(), StoreError> {
        Err(StoreError::Http("timeout".into()))
    }
}

struct Harness {
    bot: ChatBot,
    llm: Arc<MockLlmClient>,
    store: Arc<InMemoryStore>,
    transport: Arc<RecordingTransport>,
    _dir: TempDir,
}

fn harness(llm: MockLlmClient, transport: RecordingTransport) -> Harness {
    let dir = TempDir::new().unwrap();
    let llm = Arc::new(llm);
    let store = Arc::new(InMemoryStore::new());
    let transport = Arc::new(transport);
    let settings = BotSettings {
        upload_dir: dir.path().to_path_buf(),
        ..BotSettings::default()
    };
    let bot = ChatBot::new(
        llm.clone(),
        HistoryClient::new(store.clone(), "telegram"),
        transport.clone(),
    )
    .with_settings(settings);
    Harness {
        bot,
        llm,
        store,
        transport,
        _dir: dir,
    }
}

#[tokio::test]
async fn test_text_reply_is_sent_and_recorded() {
    let h = harness(MockLlmClient::replying("懂，先深呼吸。"), RecordingTransport::default());

    h.bot.handle_text(42, "42", "今天好累").await;

    assert_eq!(h.transport.texts(), vec!["懂，先深呼吸。"]);
    let rows = h.store.recent("42", 10, None).await.unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].user_message, "今天好累");
    assert_eq!(rows[0].assistant_message, "懂，先深呼吸。");
    assert_eq!(rows[0].memory_type, MemoryType::Daily);
    assert_eq!(rows[0].platform, "telegram");
}

#[tokio::test]
async fn test_completion_failure_sends_one_apology_and_writes_nothing() {
    let h = harness(
        MockLlmClient::failing(LlmError::RateLimited("429".into())),
        RecordingTransport::default(),
    );

    h.bot.handle_text(42, "42", "在嗎").await;

    assert_eq!(h.transport.texts(), vec![COMPLETION_APOLOGY]);
    assert!(h.store.is_empty().await);
}

#[tokio::test]
async fn test_store_failure_never_blocks_reply() {
    let transport = Arc::new(RecordingTransport::default());
    let llm = Arc::new(MockLlmClient::replying("收到"));
    let bot = ChatBot::new(
        llm.clone(),
        HistoryClient::new(Arc::new(FailingStore), "telegram"),
        transport.clone(),
    );

    bot.handle_text(42, "42", "hello").await;

    assert_eq!(transport.texts(), vec!["收到"]);
    assert_eq!(llm.call_count(), 1);
}

#[tokio::test]
async fn test_second_turn_sees_first_in_prompt() {
    let h = harness(MockLlmClient::new(), RecordingTransport::default());

    h.bot.handle_text(42, "42", "喵喵生病了").await;
    h.bot.handle_text(42, "42", "還要注意什麼").await;

    let calls = h.llm.calls();
    assert_eq!(calls.len(), 2);
    let second = &calls[1];
    let block = second
        .iter()
        .find(|m| m.content.starts_with("[最近對話]"))
        .expect("history block");
    assert!(block.content.contains("使用者: 喵喵生病了"));
    assert!(block.content.contains("小宸光: Echo from Mock: 喵喵生病了"));
    assert_eq!(second.last().unwrap().content, "還要注意什麼");

    // 首轮没有历史块
    assert!(!calls[0].iter().any(|m| m.content.starts_with("[最近對話]")));
}

#[tokio::test]
async fn test_unsupported_file_makes_no_network_calls() {
    let h = harness(MockLlmClient::new(), RecordingTransport::default());

    h.bot
        .handle_document(42, "42", "F1", "setup.exe", None)
        .await;

    let texts = h.transport.texts();
    assert_eq!(texts.len(), 1);
    assert!(texts[0].contains(".exe"));
    assert!(texts[0].contains(".txt"));
    assert_eq!(h.transport.download_count(), 0);
    assert_eq!(h.llm.call_count(), 0);
    assert!(h.store.is_empty().await);
}

#[tokio::test]
async fn test_txt_document_goes_through_pipeline() {
    let raw = "第一行\n第二行";
    let transport = RecordingTransport::default().with_file("F1", "documents/file_1.txt", raw.as_bytes());
    let h = harness(MockLlmClient::replying("這份筆記在講兩件事。"), transport);

    h.bot
        .handle_document(42, "42", "F1", "notes.txt", Some("幫我摘要"))
        .await;

    let calls = h.llm.calls();
    assert_eq!(calls.len(), 1);
    let user = calls[0].last().unwrap();
    assert_eq!(user.role, Role::User);
    assert!(user.content.contains("notes.txt"));
    assert!(user.content.contains("幫我摘要"));
    assert!(user.content.ends_with(raw));

    assert_eq!(h.transport.texts(), vec!["這份筆記在講兩件事。"]);
    assert!(h.transport.last_button().is_none());

    let saved = h._dir.path().join("42").join("notes.txt");
    assert_eq!(std::fs::read_to_string(saved).unwrap(), raw);
    assert_eq!(h.store.len().await, 1);
}

#[tokio::test]
async fn test_long_document_offers_full_download() {
    let raw = "喵".repeat(500);
    let transport = RecordingTransport::default().with_file("F2", "documents/file_2.md", raw.as_bytes());
    let h = harness(MockLlmClient::replying("很長的文件。"), transport);

    h.bot.handle_document(42, "42", "F2", "long.md", None).await;

    let button = h.transport.last_button().expect("button");
    assert_eq!(button.text, FULL_CONTENT_BUTTON);

    h.bot
        .handle_event(IncomingEvent::Callback {
            chat_id: 42,
            user_id: "42".into(),
            callback_id: "cb".into(),
            data: button.callback_data.clone(),
        })
        .await;

    let docs = h.transport.documents.lock().unwrap().clone();
    assert_eq!(docs.len(), 1);
    assert_eq!(docs[0].1, "long.txt");
    assert_eq!(String::from_utf8(docs[0].2.clone()).unwrap(), raw);
}

#[tokio::test]
async fn test_empty_document_reports_extraction_error() {
    let transport = RecordingTransport::default().with_file("F3", "documents/file_3.txt", b"   \n");
    let h = harness(MockLlmClient::new(), transport);

    h.bot.handle_document(42, "42", "F3", "empty.txt", None).await;

    assert_eq!(
        h.transport.texts(),
        vec!["⚠ 檔案裡似乎沒有可以讀取的內容，請檢查檔案格式。"]
    );
    assert_eq!(h.llm.call_count(), 0);
}

#[tokio::test]
async fn test_photo_uses_vision_client_with_image() {
    let transport = RecordingTransport::default().with_file("P1", "photos/file_9.png", &[0x89, 0x50]);
    let h = harness(MockLlmClient::replying("text model"), transport);
    let vision = Arc::new(MockLlmClient::replying("一隻橘貓在睡覺。"));
    let bot = h.bot.with_vision_llm(vision.clone());

    bot.handle_photo(42, "42", "P1", None).await;

    assert_eq!(h.llm.call_count(), 0);
    let calls = vision.calls();
    let user = calls[0].last().unwrap();
    assert_eq!(user.content, "请描述这张图片");
    let image = user.image.as_ref().expect("image attached");
    assert_eq!(image.mime_type, "image/png");
    assert_eq!(h.transport.texts(), vec!["一隻橘貓在睡覺。"]);
}

#[tokio::test]
async fn test_download_failure_message() {
    let h = harness(MockLlmClient::new(), RecordingTransport::default());

    h.bot.handle_photo(42, "42", "missing", Some("看看")).await;

    assert_eq!(h.transport.texts(), vec!["📂 檔案下載失敗，請再試一次。"]);
    assert_eq!(h.llm.call_count(), 0);
}

#[tokio::test]
async fn test_commands() {
    let h = harness(MockLlmClient::replying("好"), RecordingTransport::default());

    h.bot.handle_text(42, "42", "喵喵今天打疫苗").await;
    h.bot.handle_text(42, "42", "/recall 疫苗").await;
    h.bot.handle_text(42, "42", "/help").await;
    h.bot.handle_text(42, "42", "/start@xcg_bot").await;
    h.bot.handle_text(42, "42", "/unknown").await;

    let texts = h.transport.texts();
    assert_eq!(texts.len(), 5);
    assert!(texts[1].contains("喵喵今天打疫苗"));
    assert!(texts[2].contains(".docx"));
    assert!(texts[3].contains("小宸光"));
    assert!(texts[4].contains("/help"));
    // 命令不进大模型也不写历史
    assert_eq!(h.llm.call_count(), 1);
    assert_eq!(h.store.len().await, 1);
}

#[tokio::test]
async fn test_expired_download_button() {
    let h = harness(MockLlmClient::new(), RecordingTransport::default());

    h.bot.handle_callback(42, "cb", "full:gone").await;

    let texts = h.transport.texts();
    assert_eq!(texts.len(), 1);
    assert!(texts[0].contains("過期"));
}

fn personality_bot(llm: Arc<MockLlmClient>, store: Arc<InMemoryStore>) -> ChatBot {
    ChatBot::new(
        llm,
        HistoryClient::new(store, "telegram"),
        Arc::new(RecordingTransport::default()),
    )
    .with_settings(BotSettings {
        personality_enabled: true,
        ..BotSettings::default()
    })
}

#[tokio::test]
async fn test_emotion_adds_style_hint_and_saves_traits() {
    let llm = Arc::new(MockLlmClient::replying("抱抱你"));
    let store = Arc::new(InMemoryStore::new());
    let bot = personality_bot(llm.clone(), store.clone());
    let text = "好難過，想哭";

    bot.handle_text(42, "42", text).await;

    let calls = llm.calls();
    let prompt = &calls[0];
    let n = prompt.len();
    assert_eq!(prompt[n - 1].role, Role::User);
    assert_eq!(prompt[n - 1].content, text);
    assert_eq!(prompt[n - 2].role, Role::System);
    assert!(prompt[n - 2].content.starts_with("[情緒]"));

    let mut expected = TraitVector::default();
    expected.apply(&classify_emotion(text));
    let saved = store.load_traits("42").await.unwrap().unwrap();
    assert_eq!(saved, expected);
    assert!(saved.get("warmth") > 0.5);
    assert!(saved.get("playfulness") < 0.5);
}

#[tokio::test]
async fn test_neutral_message_leaves_traits_alone() {
    let llm = Arc::new(MockLlmClient::replying("好喔"));
    let store = Arc::new(InMemoryStore::new());
    let bot = personality_bot(llm.clone(), store.clone());

    bot.handle_text(42, "42", "晚餐吃拉麵").await;

    assert!(store.load_traits("42").await.unwrap().is_none());
    let calls = llm.calls();
    assert!(calls[0].iter().all(|m| !m.content.starts_with("[情緒]")));
}

#[tokio::test]
async fn test_retention_sweep_removes_old_daily_rows() {
    let h = harness(MockLlmClient::new(), RecordingTransport::default());
    let old = ConversationTurn::new("42", "舊的", "舊的", "telegram")
        .with_created_at(Utc::now() - Duration::days(40));
    h.store.insert(&old, None).await.unwrap();
    h.store
        .insert(&ConversationTurn::new("42", "新的", "新的", "telegram"), None)
        .await
        .unwrap();

    let bot = Arc::new(h.bot);
    assert!(spawn_retention_sweep(bot.clone(), &StoreSection::default()).is_none());

    let cfg = StoreSection {
        retention_days: Some(30),
        ..StoreSection::default()
    };
    let sweep = spawn_retention_sweep(bot, &cfg).unwrap();

    // interval 的第一次 tick 立即触发
    tokio::time::timeout(std::time::Duration::from_secs(5), async {
        while h.store.len().await != 1 {
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap();
    sweep.abort();

    let rows = h.store.recent("42", 10, None).await.unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].user_message, "新的");
}
