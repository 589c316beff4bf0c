//! 校验和规范化
//!
//! 统一使用 base64 编码的 128 位 MD5 摘要。调用方可以传入 32 位十六进制、
//! base64 字符串或原始字节，结果都会落到同一种形式。

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde_json::Value;

/// 原始摘要字节 -> 规范形式
pub fn from_bytes(raw: &[u8]) -> String {
    STANDARD.encode(raw)
}

/// 字符串摘要 -> 规范形式，空串返回 None
pub fn canonicalize(raw: &str) -> Option<String> {
    let raw = raw.trim().trim_matches('"');
    let raw = raw.strip_prefix("md5-").unwrap_or(raw);
    if raw.is_empty() {
        return None;
    }

    if raw.len() == 32 && raw.bytes().all(|b| b.is_ascii_hexdigit()) {
        if let Ok(bytes) = hex::decode(raw) {
            return Some(from_bytes(&bytes));
        }
    }

    Some(raw.to_string())
}

/// 从清单里的 JSON 值读取摘要：字符串或字节数组
pub fn from_value(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => canonicalize(s),
        Value::Array(items) => {
            let bytes = items
                .iter()
                .map(|v| v.as_u64().and_then(|n| u8::try_from(n).ok()))
                .collect::<Option<Vec<u8>>>()?;
            if bytes.is_empty() {
                None
            } else {
                Some(from_bytes(&bytes))
            }
        }
        _ => None,
    }
}

/// 计算数据的规范摘要
pub fn digest(data: &[u8]) -> String {
    from_bytes(&md5::compute(data).0)
}
