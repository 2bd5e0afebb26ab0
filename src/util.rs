use serde::Deserialize;
use serde_json::Value;

pub fn truncate_string(text: &str, max_bytes: usize) -> String {
    if text.len() <= max_bytes {
        return text.to_string();
    }
    let mut truncated = String::new();
    for ch in text.chars() {
        if truncated.len() + ch.len_utf8() > max_bytes {
            break;
        }
        truncated.push(ch);
    }
    truncated
}

/// Drop a surrounding Markdown code fence (```json ... ```), if any.
pub fn strip_code_fences(raw: &str) -> String {
    let trimmed = raw.trim();
    if !trimmed.starts_with("```") {
        return trimmed.to_string();
    }
    let mut lines: Vec<&str> = trimmed.lines().collect();
    if let Some(first) = lines.first() {
        if first.trim_start().starts_with("```") {
            lines.remove(0);
        }
    }
    if let Some(last) = lines.last() {
        if last.trim_start().starts_with("```") {
            lines.pop();
        }
    }
    lines.join("\n").trim().to_string()
}

/// Every JSON object or array embedded in free text, in order of appearance.
///
/// Each `{` or `[` is tried as the start of a value, so values nested in an
/// earlier one are yielded again after it.
pub fn embedded_json_values(raw: &str) -> impl Iterator<Item = Value> + '_ {
    raw.char_indices()
        .filter(|&(_, ch)| ch == '{' || ch == '[')
        .filter_map(move |(idx, _)| {
            let mut deserializer = serde_json::Deserializer::from_str(&raw[idx..]);
            Value::deserialize(&mut deserializer).ok()
        })
}

/// Lowercase a label and collapse each run of non-alphanumerics into `_`.
pub fn slug(label: &str) -> String {
    let mut out = String::with_capacity(label.len());
    for ch in label.trim().chars().flat_map(char::to_lowercase) {
        if ch.is_alphanumeric() {
            out.push(ch);
        } else if !out.ends_with('_') {
            out.push('_');
        }
    }
    out.trim_matches('_').to_string()
}
