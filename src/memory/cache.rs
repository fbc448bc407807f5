//! 远端读取失败时的回退缓存
//!
//! 每个会话保留最近 N 轮（环形缓冲，超出时丢弃最旧的），只在进程内。

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use super::turn::ConversationTurn;

#[derive(Debug)]
pub struct RecentTurnsCache {
    turns: Mutex<HashMap<String, VecDeque<ConversationTurn>>>,
    capacity: usize,
}

impl RecentTurnsCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            turns: Mutex::new(HashMap::new()),
            capacity,
        }
    }

    pub fn push(&self, turn: ConversationTurn) {
        if self.capacity == 0 {
            return;
        }
        let mut map = self.turns.lock().unwrap_or_else(|e| e.into_inner());
        let ring = map.entry(turn.conversation_id.clone()).or_default();
        ring.push_back(turn);
        while ring.len() > self.capacity {
            ring.pop_front();
        }
    }

    /// 最近 limit 轮，旧的在前
    pub fn recent(&self, conversation_id: &str, limit: usize) -> Vec<ConversationTurn> {
        let map = self.turns.lock().unwrap_or_else(|e| e.into_inner());
        let Some(ring) = map.get(conversation_id) else {
            return Vec::new();
        };
        let skip = ring.len().saturating_sub(limit);
        ring.iter().skip(skip).cloned().collect()
    }

    pub fn len(&self, conversation_id: &str) -> usize {
        let map = self.turns.lock().unwrap_or_else(|e| e.into_inner());
        map.get(conversation_id).map_or(0, |r| r.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ring_drops_oldest() {
        let cache = RecentTurnsCache::new(3);
        for i in 0..5 {
            cache.push(ConversationTurn::new("c", format!("q{}", i), "a", "telegram"));
        }
        assert_eq!(cache.len("c"), 3);
        let recent = cache.recent("c", 2);
        assert_eq!(recent[0].user_message, "q3");
        assert_eq!(recent[1].user_message, "q4");
        assert!(cache.recent("other", 2).is_empty());
    }

    #[test]
    fn test_zero_capacity_keeps_nothing() {
        let cache = RecentTurnsCache::new(0);
        cache.push(ConversationTurn::new("c", "q", "a", "telegram"));
        assert_eq!(cache.len("c"), 0);
    }
}
