//! 「下载完整内容」按钮背后的待下载表
//!
//! 以 uuid 为键保存完整文字，容量有限，超出时淘汰最早的一条。重启即丢失。

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use uuid::Uuid;

/// 回调数据前缀：`full:<key>`
pub const FULL_CONTENT_PREFIX: &str = "full:";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingFile {
    pub file_name: String,
    pub content: String,
}

#[derive(Debug, Default)]
struct Inner {
    files: HashMap<String, PendingFile>,
    order: VecDeque<String>,
}

#[derive(Debug)]
pub struct PendingDownloads {
    inner: Mutex<Inner>,
    capacity: usize,
}

impl PendingDownloads {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            capacity: capacity.max(1),
        }
    }

    /// 存入并返回按钮的 callback_data
    pub fn insert(&self, file_name: impl Into<String>, content: impl Into<String>) -> String {
        let key = Uuid::new_v4().simple().to_string();
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.files.insert(
            key.clone(),
            PendingFile {
                file_name: file_name.into(),
                content: content.into(),
            },
        );
        inner.order.push_back(key.clone());
        while inner.order.len() > self.capacity {
            if let Some(old) = inner.order.pop_front() {
                inner.files.remove(&old);
            }
        }
        format!("{}{}", FULL_CONTENT_PREFIX, key)
    }

    /// 按 callback_data 查找；可以重复下载
    pub fn get(&self, callback_data: &str) -> Option<PendingFile> {
        let key = callback_data.strip_prefix(FULL_CONTENT_PREFIX)?;
        let inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.files.get(key).cloned()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap_or_else(|e| e.into_inner()).files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
