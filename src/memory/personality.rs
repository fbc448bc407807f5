//! 情绪识别与性格向量
//!
//! classify_emotion 是纯函数：按加权关键词给文本打分，得到一个情绪标签与强度。
//! TraitVector 根据识别结果做小幅调整，所有值始终夹在 [0, 1]。

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// 情绪标签
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Emotion {
    Joy,
    Sadness,
    Anxiety,
    Anger,
    Affection,
    Neutral,
}

impl Emotion {
    fn label_zh(self) -> &'static str {
        match self {
            Emotion::Joy => "開心",
            Emotion::Sadness => "難過",
            Emotion::Anxiety => "焦慮",
            Emotion::Anger => "生氣",
            Emotion::Affection => "撒嬌",
            Emotion::Neutral => "平穩",
        }
    }
}

impl fmt::Display for Emotion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label_zh())
    }
}

/// 识别结果：标签 + 强度（0..=1）
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EmotionReading {
    pub label: Emotion,
    pub intensity: f32,
}

impl EmotionReading {
    pub fn neutral() -> Self {
        Self {
            label: Emotion::Neutral,
            intensity: 0.0,
        }
    }

    /// 拼进 prompt 的语气提示；平稳时不加
    pub fn style_hint(&self) -> Option<String> {
        let advice = match self.label {
            Emotion::Neutral => return None,
            Emotion::Joy => "跟著開心，語氣可以俏皮一點。",
            Emotion::Sadness => "先一句同理，再給很小、做得到的步驟。",
            Emotion::Anxiety => "先穩住情緒，步驟要具體、可以馬上做。",
            Emotion::Anger => "不辯解、不說教，先接住再給做法。",
            Emotion::Affection => "溫柔回應，可以撒嬌回去，但保持簡短。",
        };
        Some(format!(
            "[情緒]\n使用者目前：{}（強度 {:.1}）。{}",
            self.label, self.intensity, advice
        ))
    }
}

/// 关键词表：(情绪, 关键词, 权重)，繁简与英文都收
const LEXICON: &[(Emotion, &str, f32)] = &[
    (Emotion::Joy, "開心", 1.0),
    (Emotion::Joy, "开心", 1.0),
    (Emotion::Joy, "高興", 1.0),
    (Emotion::Joy, "高兴", 1.0),
    (Emotion::Joy, "太好了", 1.0),
    (Emotion::Joy, "哈哈", 0.5),
    (Emotion::Joy, "happy", 1.0),
    (Emotion::Joy, "yay", 0.5),
    (Emotion::Sadness, "難過", 1.0),
    (Emotion::Sadness, "难过", 1.0),
    (Emotion::Sadness, "傷心", 1.0),
    (Emotion::Sadness, "伤心", 1.0),
    (Emotion::Sadness, "想哭", 1.0),
    (Emotion::Sadness, "失落", 0.8),
    (Emotion::Sadness, "sad", 1.0),
    (Emotion::Anxiety, "焦慮", 1.0),
    (Emotion::Anxiety, "焦虑", 1.0),
    (Emotion::Anxiety, "擔心", 0.8),
    (Emotion::Anxiety, "担心", 0.8),
    (Emotion::Anxiety, "緊張", 0.8),
    (Emotion::Anxiety, "紧张", 0.8),
    (Emotion::Anxiety, "生病", 0.5),
    (Emotion::Anxiety, "anxious", 1.0),
    (Emotion::Anxiety, "worried", 1.0),
    (Emotion::Anger, "生氣", 1.0),
    (Emotion::Anger, "生气", 1.0),
    (Emotion::Anger, "氣死", 1.0),
    (Emotion::Anger, "气死", 1.0),
    (Emotion::Anger, "討厭", 0.8),
    (Emotion::Anger, "讨厌", 0.8),
    (Emotion::Anger, "煩", 0.5),
    (Emotion::Anger, "烦", 0.5),
    (Emotion::Anger, "angry", 1.0),
    (Emotion::Affection, "愛你", 1.0),
    (Emotion::Affection, "爱你", 1.0),
    (Emotion::Affection, "想你", 1.0),
    (Emotion::Affection, "抱抱", 0.8),
    (Emotion::Affection, "親親", 0.8),
    (Emotion::Affection, "亲亲", 0.8),
    (Emotion::Affection, "love you", 1.0),
];

/// 平手时的优先顺序
const PRIORITY: [Emotion; 5] = [
    Emotion::Anger,
    Emotion::Anxiety,
    Emotion::Sadness,
    Emotion::Affection,
    Emotion::Joy,
];

/// 文本 → 情绪；没有命中任何关键词时为 Neutral / 0
pub fn classify_emotion(text: &str) -> EmotionReading {
    let lower = text.to_lowercase();
    let mut scores: BTreeMap<usize, f32> = BTreeMap::new();

    for (emotion, keyword, weight) in LEXICON {
        let hits = lower.matches(keyword).count();
        if hits > 0 {
            let idx = PRIORITY.iter().position(|e| e == emotion).unwrap_or(PRIORITY.len());
            *scores.entry(idx).or_insert(0.0) += weight * hits as f32;
        }
    }

    let best = scores
        .iter()
        .fold(None::<(usize, f32)>, |acc, (&idx, &score)| match acc {
            Some((_, s)) if s >= score => acc,
            _ => Some((idx, score)),
        });

    let Some((idx, score)) = best else {
        return EmotionReading::neutral();
    };
    let Some(&label) = PRIORITY.get(idx) else {
        return EmotionReading::neutral();
    };

    let exclaims = text.chars().filter(|c| *c == '!' || *c == '！').count().min(3);
    let intensity = (score / 3.0 + exclaims as f32 * 0.1).clamp(0.0, 1.0);

    EmotionReading { label, intensity }
}

/// 性格维度
pub const TRAIT_NAMES: [&str; 4] = ["warmth", "playfulness", "patience", "directness"];

/// 每次调整的基础步长（乘以强度）
const STEP: f32 = 0.02;

/// 性格向量：trait → [0, 1]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TraitVector(BTreeMap<String, f32>);

impl Default for TraitVector {
    fn default() -> Self {
        Self(TRAIT_NAMES.iter().map(|n| (n.to_string(), 0.5)).collect())
    }
}

impl TraitVector {
    pub fn get(&self, name: &str) -> f32 {
        self.0.get(name).copied().unwrap_or(0.5)
    }

    pub fn set(&mut self, name: &str, value: f32) {
        self.0.insert(name.to_string(), value.clamp(0.0, 1.0));
    }

    fn nudge(&mut self, name: &str, direction: f32, intensity: f32) {
        let v = self.get(name) + direction * STEP * intensity;
        self.set(name, v);
    }

    /// 根据一次情绪识别调整性格
    pub fn apply(&mut self, reading: &EmotionReading) {
        let i = reading.intensity;
        match reading.label {
            Emotion::Neutral => {}
            Emotion::Joy => {
                self.nudge("playfulness", 1.0, i);
                self.nudge("warmth", 1.0, i);
            }
            Emotion::Sadness => {
                self.nudge("warmth", 1.0, i);
                self.nudge("patience", 1.0, i);
                self.nudge("playfulness", -1.0, i);
            }
            Emotion::Anxiety => {
                self.nudge("patience", 1.0, i);
                self.nudge("directness", 1.0, i);
            }
            Emotion::Anger => {
                self.nudge("patience", 1.0, i);
                self.nudge("playfulness", -1.0, i);
            }
            Emotion::Affection => {
                self.nudge("warmth", 1.0, i);
                self.nudge("playfulness", 1.0, i);
            }
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, f32)> {
        self.0.iter().map(|(k, v)| (k.as_str(), *v))
    }
}
