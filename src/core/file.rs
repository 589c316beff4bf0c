//! 清单文件登记 - 把各种形状的输入清单规范化为 File 记录

use crate::core::checksum;
use crate::error::{Result, SyncError};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::borrow::Borrow;
use std::collections::BTreeMap;
use std::fmt;
use std::ops::Bound;

/// 调用方提供的原始清单：相对路径 -> 元数据对象
pub type Manifest = BTreeMap<String, Value>;

const CHECKSUM_FIELDS: &[&str] = &[
    "md5",
    "content-md5",
    "contentMd5",
    "content_md5",
    "digest",
    "computed-md5",
    "computedMd5",
    "computed_md5",
    "checksum",
];

const SIZE_FIELDS: &[&str] = &[
    "size",
    "length",
    "content-length",
    "contentLength",
    "content_length",
];

const TYPE_FIELDS: &[&str] = &[
    "type",
    "content-type",
    "contentType",
    "content_type",
    "mime-type",
    "mimeType",
    "mime_type",
];

/// 文件标识（同步根下的相对路径）
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FileName(String);

impl FileName {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Borrow<str> for FileName {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for FileName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// 文件生命周期状态
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileStatus {
    #[default]
    Unset,
    Sent,
    Match,
    Delete,
    Error,
}

impl fmt::Display for FileStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(match self {
            FileStatus::Unset => "unset",
            FileStatus::Sent => "sent",
            FileStatus::Match => "match",
            FileStatus::Delete => "delete",
            FileStatus::Error => "error",
        })
    }
}

/// 清单中的一个文件
#[derive(Debug, Clone, PartialEq)]
pub struct File {
    pub name: FileName,
    /// base64 编码的 MD5，未知为 None
    pub checksum: Option<String>,
    pub size: Option<u64>,
    pub content_type: Option<String>,
    /// 小写的头部名 -> 值
    pub headers: BTreeMap<String, String>,
    /// 为 true 时不做任何比较，直接视为一致
    pub skip: bool,
    pub status: FileStatus,
    pub started: bool,
    pub error: Option<SyncError>,
}

impl File {
    /// 从原始元数据构建文件记录
    pub fn from_metadata(
        name: &str,
        raw: &Value,
        global_headers: &BTreeMap<String, String>,
    ) -> Result<Self> {
        let name = name.trim_start_matches('/');
        if name.is_empty() {
            return Err(SyncError::config("manifest entry with empty name"));
        }

        let empty = serde_json::Map::new();
        let meta = match raw {
            Value::Object(map) => map,
            Value::Null => &empty,
            other => {
                return Err(SyncError::config(format!(
                    "manifest entry {name} must be an object, got {other}"
                )))
            }
        };

        let checksum = field(meta, CHECKSUM_FIELDS).and_then(checksum::from_value);
        let size = field(meta, SIZE_FIELDS).and_then(as_size);
        let content_type = field(meta, TYPE_FIELDS).and_then(|v| v.as_str().map(str::to_string));
        let skip = meta.get("skip").and_then(Value::as_bool).unwrap_or(false);

        let mut headers: BTreeMap<String, String> = global_headers
            .iter()
            .map(|(k, v)| (k.to_lowercase(), v.clone()))
            .collect();
        if let Some(Value::Object(own)) = meta.get("headers") {
            for (k, v) in own {
                if let Some(v) = header_value(v) {
                    headers.insert(k.to_lowercase(), v);
                }
            }
        }

        Ok(Self {
            name: FileName::new(name),
            checksum,
            size,
            content_type,
            headers,
            skip,
            status: FileStatus::Unset,
            started: false,
            error: None,
        })
    }

    /// 标记已派发任务，重复标记返回 false
    pub fn mark_started(&mut self) -> bool {
        if self.started {
            return false;
        }
        self.started = true;
        true
    }
}

/// 按别名顺序取第一个存在的字段，null 与空串视为不存在
fn field<'a>(meta: &'a serde_json::Map<String, Value>, names: &[&str]) -> Option<&'a Value> {
    names.iter().find_map(|n| match meta.get(*n) {
        None | Some(Value::Null) => None,
        Some(Value::String(s)) if s.is_empty() => None,
        Some(v) => Some(v),
    })
}

fn as_size(value: &Value) -> Option<u64> {
    match value {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn header_value(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

/// 规范化后的清单，按名称有序
#[derive(Debug, Default)]
pub struct FileRegistry {
    files: BTreeMap<FileName, File>,
}

impl FileRegistry {
    /// 规范化整个清单
    pub fn canonicalize(
        manifest: &Manifest,
        global_headers: &BTreeMap<String, String>,
    ) -> Result<Self> {
        let mut files = BTreeMap::new();
        for (name, raw) in manifest {
            let file = File::from_metadata(name, raw, global_headers)?;
            files.insert(file.name.clone(), file);
        }
        Ok(Self { files })
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    pub fn get(&self, name: &str) -> Option<&File> {
        self.files.get(name)
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut File> {
        self.files.get_mut(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &File> {
        self.files.values()
    }

    /// 是否有清单文件位于该目录之下
    pub fn has_descendant(&self, dir: &str) -> bool {
        let prefix = format!("{}/", dir.trim_end_matches('/'));
        self.files
            .range::<str, _>((Bound::Included(prefix.as_str()), Bound::Unbounded))
            .next()
            .is_some_and(|(name, _)| name.as_str().starts_with(&prefix))
    }

    /// 尚未派发任务的文件名
    pub fn unstarted(&self) -> Vec<FileName> {
        self.files
            .values()
            .filter(|f| !f.started)
            .map(|f| f.name.clone())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn no_headers() -> BTreeMap<String, String> {
        BTreeMap::new()
    }

    #[test]
    fn aliases_are_probed_in_order() {
        let file = File::from_metadata(
            "a.txt",
            &json!({
                "contentLength": "12",
                "mime_type": "text/plain",
                "computed-md5": "60b725f10c9c85c70d97880dfe8191b3",
                "digest": "digest-precedes-computed-md5"
            }),
            &no_headers(),
        )
        .unwrap();

        assert_eq!(file.size, Some(12));
        assert_eq!(file.content_type.as_deref(), Some("text/plain"));
        assert_eq!(file.checksum.as_deref(), Some("digest-precedes-computed-md5"));
        assert_eq!(file.status, FileStatus::Unset);
        assert!(!file.started);
    }

    #[test]
    fn missing_aliases_leave_fields_absent() {
        let file = File::from_metadata("b", &json!({ "md5": "", "size": null }), &no_headers())
            .unwrap();
        assert_eq!(file.checksum, None);
        assert_eq!(file.size, None);
        assert_eq!(file.content_type, None);
        assert!(!file.skip);
    }

    #[test]
    fn per_file_headers_override_global_ones() {
        let mut global = BTreeMap::new();
        global.insert("Access-Control-Allow-Methods".to_string(), "GET".to_string());
        global.insert("cache-control".to_string(), "no-cache".to_string());

        let file = File::from_metadata(
            "c",
            &json!({ "headers": { "Cache-Control": "max-age=60", "X-Count": 3 } }),
            &global,
        )
        .unwrap();

        assert_eq!(file.headers["access-control-allow-methods"], "GET");
        assert_eq!(file.headers["cache-control"], "max-age=60");
        assert_eq!(file.headers["x-count"], "3");
    }

    #[test]
    fn bad_entries_are_configuration_errors() {
        let err = File::from_metadata("d", &json!("nope"), &no_headers()).unwrap_err();
        assert!(matches!(err, SyncError::Configuration(_)));

        let err = File::from_metadata("/", &json!({}), &no_headers()).unwrap_err();
        assert!(matches!(err, SyncError::Configuration(_)));
    }

    #[test]
    fn started_flips_once() {
        let mut file = File::from_metadata("e", &Value::Null, &no_headers()).unwrap();
        assert!(file.mark_started());
        assert!(!file.mark_started());
    }

    #[test]
    fn descendant_lookup_uses_directory_boundaries() {
        let mut manifest = Manifest::new();
        manifest.insert("dir/a".into(), json!({}));
        manifest.insert("dirt".into(), json!({}));
        manifest.insert("x/y/z".into(), json!({}));
        let registry = FileRegistry::canonicalize(&manifest, &no_headers()).unwrap();

        assert!(registry.has_descendant("dir"));
        assert!(registry.has_descendant("x"));
        assert!(registry.has_descendant("x/y/"));
        assert!(!registry.has_descendant("di"));
        assert!(!registry.has_descendant("dirt"));
        assert!(!registry.has_descendant("x/y/z"));
        assert_eq!(registry.unstarted().len(), 3);
    }
}
