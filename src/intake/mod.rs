//! 文件与图片接收：格式检查、落盘、内容提取、预览
//!
//! 格式检查在任何网络请求之前完成；不支持的扩展名直接返回 UnsupportedFormat。

pub mod extract;

use std::path::{Path, PathBuf};

use crate::core::BotError;

pub use extract::{decode_plain, extract_text, extract_text_blocking};

/// 图片没有说明文字时使用的提示
pub const DEFAULT_IMAGE_PROMPT: &str = "请描述这张图片";

/// 小写、带点的扩展名；没有扩展名时为空字符串
pub fn normalized_extension(file_name: &str) -> String {
    Path::new(file_name)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| format!(".{}", e.to_lowercase()))
        .unwrap_or_default()
}

/// 检查扩展名是否在白名单内（大小写不敏感），通过时返回规范化的扩展名
pub fn check_supported(file_name: &str, supported: &[String]) -> Result<String, BotError> {
    let ext = normalized_extension(file_name);
    let ok = !ext.is_empty() && supported.iter().any(|s| s.eq_ignore_ascii_case(&ext));
    if ok {
        Ok(ext)
    } else {
        Err(BotError::UnsupportedFormat {
            extension: ext,
            supported: supported.to_vec(),
        })
    }
}

/// 去掉路径分隔符与控制字符，只保留最后一段文件名
pub fn sanitize_file_name(name: &str) -> String {
    let base = name.rsplit(['/', '\\']).next().unwrap_or(name);
    let cleaned: String = base
        .chars()
        .map(|c| {
            if c.is_control() || matches!(c, ':' | '*' | '?' | '"' | '<' | '>' | '|') {
                '_'
            } else {
                c
            }
        })
        .collect();
    let cleaned = cleaned.trim().trim_start_matches('.').to_string();
    if cleaned.is_empty() {
        "upload".to_string()
    } else {
        cleaned
    }
}

/// uploads/<user_id>/<file_name>
pub fn upload_path(upload_dir: &Path, user_id: &str, file_name: &str) -> PathBuf {
    upload_dir
        .join(sanitize_file_name(user_id))
        .join(sanitize_file_name(file_name))
}

/// 写入用户目录（目录不存在则创建）
pub async fn save_upload(path: &Path, bytes: &[u8]) -> Result<(), BotError> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| BotError::Transport(format!("create {}: {}", parent.display(), e)))?;
    }
    tokio::fs::write(path, bytes)
        .await
        .map_err(|e| BotError::Transport(format!("write {}: {}", path.display(), e)))?;
    tracing::debug!(path = %path.display(), size = bytes.len(), "upload saved");
    Ok(())
}

/// 取前 max_chars 个字符；被截断时第二个值为 true
pub fn preview(text: &str, max_chars: usize) -> (String, bool) {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => (text[..idx].to_string(), true),
        None => (text.to_string(), false),
    }
}

/// 文件内容作为用户消息：文件名 + 说明 + 内容（超长时截断）
pub fn file_prompt(file_name: &str, caption: Option<&str>, content: &str, max_chars: usize) -> String {
    let (body, truncated) = preview(content, max_chars);
    let mut prompt = format!("[檔案] {}\n", file_name);
    if let Some(c) = caption.map(str::trim).filter(|c| !c.is_empty()) {
        prompt.push_str(c);
        prompt.push('\n');
    }
    prompt.push_str("---\n");
    prompt.push_str(&body);
    if truncated {
        prompt.push_str("\n…(內容過長，已截斷)");
    }
    prompt
}

/// 图片 file_path 的扩展名 → MIME
pub fn image_mime(file_path: &str) -> &'static str {
    match normalized_extension(file_path).as_str() {
        ".png" => "image/png",
        ".webp" => "image/webp",
        ".gif" => "image/gif",
        _ => "image/jpeg",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn supported() -> Vec<String> {
        vec![".txt".into(), ".md".into(), ".pdf".into(), ".docx".into()]
    }

    #[test]
    fn test_extension_allow_list() {
        assert_eq!(check_supported("Notes.TXT", &supported()).unwrap(), ".txt");
        assert_eq!(check_supported("a.b.docx", &supported()).unwrap(), ".docx");

        let err = check_supported("setup.exe", &supported()).unwrap_err();
        let msg = err.user_message();
        assert!(msg.contains(".exe"));
        for ext in supported() {
            assert!(msg.contains(&ext));
        }

        assert!(matches!(
            check_supported("README", &supported()),
            Err(BotError::UnsupportedFormat { .. })
        ));
    }

    #[test]
    fn test_sanitize_and_upload_path() {
        assert_eq!(sanitize_file_name("../../etc/passwd"), "passwd");
        assert_eq!(sanitize_file_name("a:b?.txt"), "a_b_.txt");
        assert_eq!(sanitize_file_name(".."), "upload");
        assert_eq!(
            upload_path(Path::new("uploads"), "42", "報告.pdf"),
            PathBuf::from("uploads/42/報告.pdf")
        );
    }

    #[test]
    fn test_preview_counts_chars_not_bytes() {
        let (p, cut) = preview("喵喵喵喵", 2);
        assert_eq!(p, "喵喵");
        assert!(cut);
        let (p, cut) = preview("short", 200);
        assert_eq!(p, "short");
        assert!(!cut);
    }

    #[test]
    fn test_file_prompt() {
        let prompt = file_prompt("a.txt", Some(" 幫我摘要 "), "內容", 100);
        assert_eq!(prompt, "[檔案] a.txt\n幫我摘要\n---\n內容");
    }

    #[tokio::test]
    async fn test_save_upload_creates_user_dir() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = upload_path(dir.path(), "42", "a.txt");
        save_upload(&path, b"hello").await.unwrap();
        assert_eq!(std::fs::read(&path).unwrap(), b"hello");
    }
}
