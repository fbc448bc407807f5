//! 文件内容提取：txt / md / pdf / docx
//!
//! 纯文本先按 UTF-8 解码，失败时试 Big5，再不行就有损 UTF-8。
//! PDF 交给 pdf-extract；docx 解压 word/document.xml 收集 `<w:t>` 文字，段落之间换行。

use std::io::{Cursor, Read};
use std::sync::OnceLock;

use regex::Regex;

use crate::core::BotError;

/// 按扩展名（小写、带点）提取文字；内容为空时返回 Extraction
pub fn extract_text(extension: &str, bytes: &[u8]) -> Result<String, BotError> {
    let text = match extension {
        ".txt" | ".md" => decode_plain(bytes),
        ".pdf" => extract_pdf(bytes)?,
        ".docx" => extract_docx(bytes)?,
        other => {
            return Err(BotError::Extraction(format!(
                "no extractor for extension {}",
                other
            )))
        }
    };
    if text.trim().is_empty() {
        return Err(BotError::Extraction("no readable content".to_string()));
    }
    Ok(text)
}

/// 在阻塞线程池里提取（PDF 解析较重，也可能 panic）
pub async fn extract_text_blocking(extension: String, bytes: Vec<u8>) -> Result<String, BotError> {
    tokio::task::spawn_blocking(move || extract_text(&extension, &bytes))
        .await
        .map_err(|e| BotError::Extraction(format!("extractor crashed: {}", e)))?
}

/// UTF-8 → Big5 → 有损 UTF-8
pub fn decode_plain(bytes: &[u8]) -> String {
    if let Ok(s) = std::str::from_utf8(bytes) {
        return s.to_string();
    }
    if let Some(s) = encoding_rs::BIG5.decode_without_bom_handling_and_without_replacement(bytes) {
        tracing::debug!("decoded upload as Big5");
        return s.into_owned();
    }
    String::from_utf8_lossy(bytes).into_owned()
}

fn extract_pdf(bytes: &[u8]) -> Result<String, BotError> {
    pdf_extract::extract_text_from_mem(bytes)
        .map_err(|e| BotError::Extraction(format!("pdf: {}", e)))
}

static DOCX_TOKEN_RE: OnceLock<Option<Regex>> = OnceLock::new();

fn extract_docx(bytes: &[u8]) -> Result<String, BotError> {
    let mut archive = zip::ZipArchive::new(Cursor::new(bytes))
        .map_err(|e| BotError::Extraction(format!("docx: {}", e)))?;
    let mut xml = String::new();
    archive
        .by_name("word/document.xml")
        .map_err(|e| BotError::Extraction(format!("docx: {}", e)))?
        .read_to_string(&mut xml)
        .map_err(|e| BotError::Extraction(format!("docx: {}", e)))?;
    docx_xml_to_text(&xml)
}

/// `<w:t>` 文字按顺序拼接；`</w:p>` 处换行
fn docx_xml_to_text(xml: &str) -> Result<String, BotError> {
    let re = DOCX_TOKEN_RE
        .get_or_init(|| Regex::new(r"<w:t(?:\s[^>]*)?>([^<]*)</w:t>|</w:p>").ok())
        .as_ref()
        .ok_or_else(|| BotError::Extraction("docx token pattern".to_string()))?;

    let mut paragraphs = Vec::new();
    let mut current = String::new();
    for cap in re.captures_iter(xml) {
        match cap.get(1) {
            Some(run) => current.push_str(&unescape_xml(run.as_str())),
            None => {
                paragraphs.push(std::mem::take(&mut current));
            }
        }
    }
    if !current.is_empty() {
        paragraphs.push(current);
    }
    Ok(paragraphs.join("\n").trim().to_string())
}

fn unescape_xml(s: &str) -> String {
    s.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&apos;", "'")
        .replace("&amp;", "&")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_txt_equals_raw_bytes() {
        let raw = "第一行\nsecond line 🐱\n";
        assert_eq!(extract_text(".txt", raw.as_bytes()).unwrap(), raw);
        assert_eq!(extract_text(".md", b"# title").unwrap(), "# title");
    }

    #[test]
    fn test_big5_fallback() {
        // 「中文」的 Big5 编码
        let big5 = [0xA4, 0xA4, 0xA4, 0xE5];
        assert_eq!(decode_plain(&big5), "中文");
    }

    #[test]
    fn test_whitespace_only_is_extraction_error() {
        let err = extract_text(".txt", b"  \n\t ").unwrap_err();
        assert!(matches!(err, BotError::Extraction(_)));
    }

    #[test]
    fn test_docx_paragraphs() {
        let xml = r#"<w:document><w:body>
            <w:p><w:r><w:t>Hello</w:t></w:r><w:r><w:t xml:space="preserve"> world</w:t></w:r></w:p>
            <w:tbl></w:tbl>
            <w:p><w:r><w:t>a &amp; b</w:t></w:r></w:p>
        </w:body></w:document>"#;
        assert_eq!(docx_xml_to_text(xml).unwrap(), "Hello world\na & b");
    }

    #[test]
    fn test_docx_archive() {
        let mut buf = Cursor::new(Vec::new());
        {
            let mut zip = zip::ZipWriter::new(&mut buf);
            zip.start_file("word/document.xml", zip::write::SimpleFileOptions::default())
                .unwrap();
            zip.write_all(b"<w:p><w:r><w:t>\xE5\x96\xB5\xE5\x96\xB5</w:t></w:r></w:p>")
                .unwrap();
            zip.finish().unwrap();
        }
        assert_eq!(extract_text(".docx", buf.get_ref()).unwrap(), "喵喵");
    }

    #[test]
    fn test_broken_docx_is_extraction_error() {
        assert!(matches!(
            extract_text(".docx", b"not a zip"),
            Err(BotError::Extraction(_))
        ));
    }
}
