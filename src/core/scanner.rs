//! 本地目录扫描 - 生成同步清单

use crate::core::checksum;
use crate::core::file::Manifest;
use crate::error::{Result, SyncError};
use serde_json::{json, Map, Value};
use std::io::Read;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

/// 扫描配置
#[derive(Debug, Clone)]
pub struct ScanConfig {
    /// 排除规则（glob patterns）
    pub exclude_patterns: Vec<String>,
    /// 是否计算 MD5
    pub checksums: bool,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            exclude_patterns: vec![
                // 常见的排除模式
                ".git/**".to_string(),
                ".svn/**".to_string(),
                "node_modules/**".to_string(),
                ".DS_Store".to_string(),
                "Thumbs.db".to_string(),
                "*.tmp".to_string(),
                "*.temp".to_string(),
                "~*".to_string(),
            ],
            checksums: false,
        }
    }
}

/// 本地目录扫描器
pub struct LocalScanner {
    root: PathBuf,
    config: ScanConfig,
}

impl LocalScanner {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self::with_config(root, ScanConfig::default())
    }

    pub fn with_config(root: impl Into<PathBuf>, config: ScanConfig) -> Self {
        Self {
            root: root.into(),
            config,
        }
    }

    /// 扫描并返回清单；目录遍历在阻塞线程上进行
    pub async fn scan(self) -> Result<Manifest> {
        tokio::task::spawn_blocking(move || self.scan_blocking())
            .await
            .map_err(|e| SyncError::config(format!("scan task failed: {e}")))?
    }

    fn scan_blocking(&self) -> Result<Manifest> {
        if !self.root.is_dir() {
            return Err(SyncError::config(format!(
                "{} is not a directory",
                self.root.display()
            )));
        }
        info!("开始扫描本地目录: {}", self.root.display());

        let mut manifest = Manifest::new();
        let mut excluded = 0usize;

        let walker = WalkDir::new(&self.root)
            .follow_links(false)
            .into_iter()
            .filter_entry(|entry| {
                let Some(rel) = relative_path(&self.root, entry.path()) else {
                    return true;
                };
                let keep = !self.should_exclude(&rel, entry.file_type().is_dir());
                if !keep {
                    debug!("排除: {}", rel);
                    excluded += 1;
                }
                keep
            });

        for entry in walker {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    warn!("跳过无法读取的条目: {}", e);
                    continue;
                }
            };
            if !entry.file_type().is_file() {
                continue;
            }
            let Some(rel) = relative_path(&self.root, entry.path()) else {
                continue;
            };

            let size = entry.metadata().map(|m| m.len()).ok();
            let mut meta = Map::new();
            if let Some(size) = size {
                meta.insert("size".into(), json!(size));
            }
            if let Some(mime) = guess_type(&rel) {
                meta.insert("type".into(), json!(mime));
            }
            if self.config.checksums {
                match file_md5(entry.path()) {
                    Ok(sum) => {
                        meta.insert("md5".into(), json!(sum));
                    }
                    Err(e) => warn!("计算摘要失败 {}: {}", rel, e),
                }
            }
            manifest.insert(rel, Value::Object(meta));
        }

        info!("扫描完成: {} 个文件, {} 个被排除", manifest.len(), excluded);
        Ok(manifest)
    }

    /// 检查路径是否应该被排除
    fn should_exclude(&self, path: &str, is_dir: bool) -> bool {
        self.config.exclude_patterns.iter().any(|pattern| {
            matches_pattern(path, pattern)
                || (is_dir && matches_pattern(&format!("{path}/"), pattern))
        })
    }
}

/// 简单的 glob 模式匹配
fn matches_pattern(path: &str, pattern: &str) -> bool {
    let path = path.to_lowercase();
    let pattern = pattern.to_lowercase();

    // ** 匹配任意层级
    if let Some((prefix, suffix)) = pattern.split_once("**") {
        let prefix = prefix.trim_end_matches('/');
        let suffix = suffix.trim_start_matches('/');
        if !prefix.is_empty() && path != prefix && !path.starts_with(&format!("{prefix}/")) {
            return false;
        }
        return suffix.is_empty() || path.ends_with(suffix);
    }

    let name = path.rsplit('/').next().unwrap_or(&path);

    if pattern.contains('*') {
        let re = format!("^{}$", regex::escape(&pattern).replace("\\*", "[^/]*"));
        return regex::Regex::new(&re)
            .map(|re| re.is_match(&path) || re.is_match(name))
            .unwrap_or(false);
    }

    path == pattern || name == pattern
}

fn relative_path(root: &Path, path: &Path) -> Option<String> {
    let rel = path.strip_prefix(root).ok()?;
    let parts = rel
        .components()
        .map(|c| c.as_os_str().to_str())
        .collect::<Option<Vec<_>>>()?;
    (!parts.is_empty()).then(|| parts.join("/"))
}

fn file_md5(path: &Path) -> std::io::Result<String> {
    let mut file = std::fs::File::open(path)?;
    let mut ctx = md5::Context::new();
    let mut buf = vec![0u8; 64 * 1024];
    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        ctx.consume(&buf[..n]);
    }
    Ok(checksum::from_bytes(&ctx.compute().0))
}

/// 按扩展名猜测内容类型
fn guess_type(path: &str) -> Option<&'static str> {
    let ext = Path::new(path).extension()?.to_str()?.to_lowercase();
    let mime = match ext.as_str() {
        "html" | "htm" => "text/html",
        "css" => "text/css",
        "js" | "mjs" => "application/javascript",
        "json" => "application/json",
        "txt" | "md" => "text/plain",
        "xml" => "application/xml",
        "svg" => "image/svg+xml",
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "ico" => "image/x-icon",
        "pdf" => "application/pdf",
        "zip" => "application/zip",
        "gz" => "application/gzip",
        "wasm" => "application/wasm",
        "mp4" => "video/mp4",
        "mp3" => "audio/mpeg",
        "woff" => "font/woff",
        "woff2" => "font/woff2",
        _ => return None,
    };
    Some(mime)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn glob_patterns() {
        assert!(matches_pattern(".git/config", ".git/**"));
        assert!(matches_pattern(".git", ".git/**"));
        assert!(!matches_pattern("src/.gitignore", ".git/**"));
        assert!(matches_pattern("a/b/file.TMP", "*.tmp"));
        assert!(matches_pattern("docs/~draft", "~*"));
        assert!(matches_pattern("x/.DS_Store", ".DS_Store"));
        assert!(!matches_pattern("index.html", "*.tmp"));
    }

    #[test]
    fn content_type_guess() {
        assert_eq!(guess_type("a/index.HTML"), Some("text/html"));
        assert_eq!(guess_type("noext"), None);
    }

    #[tokio::test]
    async fn scans_files_with_metadata() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir_all(dir.path().join("css")).unwrap();
        std::fs::create_dir_all(dir.path().join(".git")).unwrap();
        std::fs::write(dir.path().join("index.html"), "a\n").unwrap();
        std::fs::write(dir.path().join("css/site.css"), "body{}").unwrap();
        std::fs::write(dir.path().join(".git/HEAD"), "ref").unwrap();
        std::fs::write(dir.path().join("scratch.tmp"), "x").unwrap();

        let config = ScanConfig {
            checksums: true,
            ..Default::default()
        };
        let manifest = LocalScanner::with_config(dir.path(), config).scan().await.unwrap();

        assert_eq!(
            manifest.keys().cloned().collect::<Vec<_>>(),
            vec!["css/site.css".to_string(), "index.html".to_string()]
        );
        let index = &manifest["index.html"];
        assert_eq!(index["size"], 2);
        assert_eq!(index["type"], "text/html");
        assert_eq!(index["md5"], "YLcl8QychccNl4gN/oGRsw==");
        assert!(manifest["css/site.css"].get("md5").is_some());
    }

    #[tokio::test]
    async fn missing_directory_is_a_configuration_error() {
        let dir = TempDir::new().unwrap();
        let err = LocalScanner::new(dir.path().join("nope")).scan().await.unwrap_err();
        assert!(matches!(err, SyncError::Configuration(_)));
    }
}
