//! 分词：中英文混合
//!
//! 含 CJK 字符时用 jieba-rs 切词，否则按空白切分。供本地哈希嵌入与 token 估算使用。

use std::sync::OnceLock;

use jieba_rs::Jieba;

static JIEBA: OnceLock<Jieba> = OnceLock::new();

fn jieba() -> &'static Jieba {
    JIEBA.get_or_init(Jieba::new)
}

fn is_cjk(c: char) -> bool {
    matches!(c,
        '\u{4E00}'..='\u{9FFF}' |
        '\u{3400}'..='\u{4DBF}' |
        '\u{F900}'..='\u{FAFF}' |
        '\u{3040}'..='\u{309F}' |
        '\u{30A0}'..='\u{30FF}'
    )
}

pub fn contains_cjk(text: &str) -> bool {
    text.chars().any(is_cjk)
}

/// 去掉词首尾的标点，保留内部字符（如 "don't"、"v1.2"）
fn strip_punct(word: &str) -> &str {
    word.trim_matches(|c: char| !c.is_alphanumeric() && !is_cjk(c))
}

/// 切词并转小写；英文过滤单字符，中文保留单字
pub fn tokenize(text: &str) -> Vec<String> {
    let text = text.trim();
    if text.is_empty() {
        return Vec::new();
    }

    if contains_cjk(text) {
        jieba()
            .cut_for_search(text, true)
            .into_iter()
            .map(strip_punct)
            .filter(|s| !s.is_empty())
            .map(|s| s.to_lowercase())
            .filter(|s| s.chars().count() > 1 || s.chars().next().is_some_and(is_cjk))
            .collect()
    } else {
        text.split_whitespace()
            .map(strip_punct)
            .map(|s| s.to_lowercase())
            .filter(|s| s.chars().count() > 1)
            .collect()
    }
}

/// 估算 token 数（会话 total_tokens 累计用）：非空文本至少计 1
pub fn estimate_tokens(text: &str) -> u64 {
    if text.trim().is_empty() {
        return 0;
    }
    (tokenize(text).len() as u64).max(1)
}
