//! 组装发给大模型的消息列表（纯函数，无 IO）
//!
//! 顺序固定：人设 → 示范对话 → [長期記憶] → [最近對話] → 语气提示 → 用户消息。
//! 可选块内容为空时整块省略。

use crate::memory::{ConversationTurn, Message};

use super::persona::Persona;

pub const LONG_TERM_HEADER: &str = "[長期記憶]";
pub const RECENT_HEADER: &str = "[最近對話]";
const USER_TAG: &str = "使用者";

/// history 为旧的在前；只取最后 min(history.len(), limit) 轮
pub fn build_prompt(
    persona: &Persona,
    history: &[ConversationTurn],
    user_message: Message,
    limit: usize,
    style_hint: Option<&str>,
) -> Vec<Message> {
    let mut messages = Vec::with_capacity(4 + persona.few_shots.len() * 2);
    messages.push(Message::system(persona.system_prompt.clone()));

    for (user, assistant) in &persona.few_shots {
        messages.push(Message::user(user.clone()));
        messages.push(Message::assistant(assistant.clone()));
    }

    if !persona.long_term_notes.is_empty() {
        messages.push(Message::system(format!(
            "{}\n{}",
            LONG_TERM_HEADER,
            persona.long_term_notes.join("\n")
        )));
    }

    if let Some(block) = recent_block(&persona.name, history, limit) {
        messages.push(Message::system(block));
    }

    if let Some(hint) = style_hint.filter(|h| !h.trim().is_empty()) {
        messages.push(Message::system(hint.to_string()));
    }

    messages.push(user_message);
    messages
}

/// 「使用者: …」/「小宸光: …」逐行；没有可用内容时为 None
fn recent_block(bot_tag: &str, history: &[ConversationTurn], limit: usize) -> Option<String> {
    let skip = history.len().saturating_sub(limit);
    let mut lines = Vec::new();
    for turn in &history[skip..] {
        let user = turn.user_message.trim();
        if !user.is_empty() {
            lines.push(format!("{}: {}", USER_TAG, user));
        }
        let bot = turn.assistant_message.trim();
        if !bot.is_empty() {
            lines.push(format!("{}: {}", bot_tag, bot));
        }
    }
    if lines.is_empty() {
        return None;
    }
    Some(format!("{}\n{}", RECENT_HEADER, lines.join("\n")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{ImageInput, Role};

    fn turns(n: usize) -> Vec<ConversationTurn> {
        (0..n)
            .map(|i| ConversationTurn::new("42", format!("q{}", i), format!("a{}", i), "telegram"))
            .collect()
    }

    fn bare_persona() -> Persona {
        Persona {
            long_term_notes: Vec::new(),
            ..Persona::default()
        }
    }

    #[test]
    fn test_empty_history_is_persona_fewshots_user() {
        let persona = bare_persona();
        let msgs = build_prompt(&persona, &[], Message::user("M"), 6, None);

        assert_eq!(msgs.len(), 1 + persona.few_shots.len() * 2 + 1);
        assert_eq!(msgs[0], Message::system(persona.system_prompt.clone()));
        for (i, (u, a)) in persona.few_shots.iter().enumerate() {
            assert_eq!(msgs[1 + i * 2], Message::user(u.clone()));
            assert_eq!(msgs[2 + i * 2], Message::assistant(a.clone()));
        }
        assert_eq!(msgs.last(), Some(&Message::user("M")));
    }

    #[test]
    fn test_history_block_holds_min_of_n_and_limit() {
        let persona = bare_persona();
        for (n, limit) in [(10, 6), (3, 6), (6, 6), (1, 12)] {
            let msgs = build_prompt(&persona, &turns(n), Message::user("M"), limit, None);
            let block = msgs
                .iter()
                .find(|m| m.content.starts_with(RECENT_HEADER))
                .unwrap();
            let expected = n.min(limit);
            let user_lines = block.content.lines().filter(|l| l.starts_with("使用者: ")).count();
            assert_eq!(user_lines, expected);

            // 旧的在前
            let first = format!("使用者: q{}", n - expected);
            let last = format!("使用者: q{}", n - 1);
            let lines: Vec<&str> = block.content.lines().collect();
            assert_eq!(lines[1], first);
            assert_eq!(lines[lines.len() - 2], last);
        }
    }

    #[test]
    fn test_blank_texts_skipped_and_trimmed() {
        let persona = bare_persona();
        let history = vec![
            ConversationTurn::new("42", "  hi  ", "", "telegram"),
            ConversationTurn::new("42", "   ", "   ", "telegram"),
        ];
        let msgs = build_prompt(&persona, &history, Message::user("M"), 6, None);
        let block = &msgs[msgs.len() - 2];
        assert_eq!(block.content, "[最近對話]\n使用者: hi");
    }

    #[test]
    fn test_all_blocks_in_order() {
        let persona = Persona::default();
        let image = ImageInput::new("image/jpeg", vec![1, 2, 3]);
        let msgs = build_prompt(
            &persona,
            &turns(2),
            Message::user("看看這張").with_image(image.clone()),
            6,
            Some("[情緒]\n使用者目前：開心"),
        );
        let n = msgs.len();
        assert!(msgs[n - 4].content.starts_with(LONG_TERM_HEADER));
        assert!(msgs[n - 3].content.starts_with(RECENT_HEADER));
        assert!(msgs[n - 3].content.contains("小宸光: a1"));
        assert!(msgs[n - 2].content.starts_with("[情緒]"));
        assert_eq!(msgs[n - 1].role, Role::User);
        assert_eq!(msgs[n - 1].image, Some(image));
    }
}
