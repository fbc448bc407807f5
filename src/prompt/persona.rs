//! 人设：system prompt、示范对话（few-shots）与手写长期记忆
//!
//! 运行期不可变。PersonaSelector 持有一个或多个语气风格，每次请求挑一个；
//! 随机源可注入（固定种子时结果可复现）。

use std::path::Path;
use std::sync::Mutex;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

const SYSTEM_PROMPT: &str = "你是「小宸光」，溫柔、務實、俏皮但不浮誇。
回覆原則：
- 先一句接住重點/同理 → 再給 2–4 個【可馬上執行】的步驟（條列）。
- 非必要時每則 ≤ 150 字；精準、不要贅字。
- 禁止自我介紹、禁止套話、禁止無意義的反問（不要用「你覺得呢？」等結尾）。
- 只在需要時加 1–2 個表情符號。
- 若使用者未要求詳解，回答要比對方更短；需要詳細時再展開。
- 提到：哈尼／喵喵／Supabase／Telegram，用對方熟悉的詞並給具體做法。";

/// 俏皮风格在基础 prompt 后追加的一段
const PLAYFUL_TAIL: &str = "
今天語氣再輕快一點：可以用一句俏皮話開場，但步驟仍然要具體。";

const FEW_SHOTS: &[(&str, &str)] = &[
    (
        "喵喵生病，我有點焦慮。",
        "懂，看到牠不舒服會揪心。\n- 找安靜角落，放牠熟悉的毯子\n- 記錄吃喝與上廁所\n- 超過 8 小時不吃不喝就聯絡醫院\n我在，慢慢來。",
    ),
    (
        "幫我把剛剛的想法存成筆記",
        "收到。我會以「心情小品」分類，標籤：喵喵、醫院。之後要查可用：/recall 喵喵。",
    ),
];

const LONG_TERM_NOTES: &[&str] = &[
    "- 使用者常用語音寫心情小品，想一鍵匯入 Notion。",
    "- 正在打造：Telegram+Supabase 的私人助理；後續會接 n8n。",
    "- 偏好：一步一步、能直接操作的指令；不要套話與反詰問。",
];

/// 一个人设风格
#[derive(Debug, Clone, PartialEq)]
pub struct Persona {
    pub name: String,
    pub system_prompt: String,
    pub few_shots: Vec<(String, String)>,
    pub long_term_notes: Vec<String>,
}

impl Default for Persona {
    fn default() -> Self {
        Self {
            name: "小宸光".to_string(),
            system_prompt: SYSTEM_PROMPT.to_string(),
            few_shots: FEW_SHOTS
                .iter()
                .map(|(u, a)| (u.to_string(), a.to_string()))
                .collect(),
            long_term_notes: LONG_TERM_NOTES.iter().map(|s| s.to_string()).collect(),
        }
    }
}

impl Persona {
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = prompt.into();
        self
    }

    /// 内置风格：温柔务实（默认）与俏皮
    pub fn builtin_styles() -> Vec<Persona> {
        let base = Persona::default();
        let playful = base
            .clone()
            .with_system_prompt(format!("{}{}", SYSTEM_PROMPT, PLAYFUL_TAIL));
        vec![base, playful]
    }

    /// 从文件读 system prompt；文件不存在或为空时返回 None
    pub fn load_system_prompt(path: &Path) -> Option<String> {
        match std::fs::read_to_string(path) {
            Ok(text) if !text.trim().is_empty() => Some(text.trim().to_string()),
            Ok(_) => {
                tracing::warn!(path = %path.display(), "persona file is empty, using builtin");
                None
            }
            Err(e) => {
                tracing::warn!(path = %path.display(), "persona file unreadable, using builtin: {}", e);
                None
            }
        }
    }

    /// 按配置构建风格列表：有人设文件时只用文件里的 prompt
    pub fn styles_from(name: &str, persona_path: Option<&Path>) -> Vec<Persona> {
        match persona_path.and_then(Self::load_system_prompt) {
            Some(prompt) => vec![Persona::default().with_name(name).with_system_prompt(prompt)],
            None => Self::builtin_styles()
                .into_iter()
                .map(|p| p.with_name(name))
                .collect(),
        }
    }
}

/// 每次请求挑一个风格
pub struct PersonaSelector {
    styles: Vec<Persona>,
    rng: Mutex<StdRng>,
}

impl PersonaSelector {
    /// styles 为空时退回默认人设
    pub fn new(styles: Vec<Persona>, rng: StdRng) -> Self {
        let styles = if styles.is_empty() {
            vec![Persona::default()]
        } else {
            styles
        };
        Self {
            styles,
            rng: Mutex::new(rng),
        }
    }

    pub fn seeded(styles: Vec<Persona>, seed: u64) -> Self {
        Self::new(styles, StdRng::seed_from_u64(seed))
    }

    pub fn from_entropy(styles: Vec<Persona>) -> Self {
        Self::new(styles, StdRng::from_entropy())
    }

    pub fn single(persona: Persona) -> Self {
        Self::seeded(vec![persona], 0)
    }

    pub fn styles(&self) -> &[Persona] {
        &self.styles
    }

    pub fn pick(&self) -> &Persona {
        if self.styles.len() == 1 {
            return &self.styles[0];
        }
        let idx = {
            let mut rng = self.rng.lock().unwrap_or_else(|e| e.into_inner());
            rng.gen_range(0..self.styles.len())
        };
        &self.styles[idx]
    }
}
