//! 应用配置模块

use crate::error::{Result, SyncError};
use crate::logging::LogConfig;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::time::Duration;

/// 同步根路径的家目录前缀
pub const HOME_SENTINEL: &str = "~~";

/// 同步选项（调用参数中可序列化的部分）
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncOptions {
    /// 远程同步根
    #[serde(default)]
    pub path: String,
    /// 所有文件共用的默认头部
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    /// 最大并发任务数
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    /// 单任务超时（毫秒），为空或 0 表示不启用
    #[serde(default)]
    pub timeout_ms: Option<u64>,
    /// 删除清单中不存在的远程文件
    #[serde(default)]
    pub delete: bool,
    /// 只删除，不上传（隐含 delete）
    #[serde(default)]
    pub only_delete: bool,
    /// 模拟运行，不修改远程
    #[serde(default)]
    pub dry_run: bool,
    /// 任务超时也计为错误
    #[serde(default)]
    pub strict: bool,
    /// `~~` 前缀展开的目标
    #[serde(default)]
    pub home: Option<String>,
}

fn default_concurrency() -> usize {
    50
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            path: String::new(),
            headers: BTreeMap::new(),
            concurrency: default_concurrency(),
            timeout_ms: None,
            delete: false,
            only_delete: false,
            dry_run: false,
            strict: false,
            home: None,
        }
    }
}

impl SyncOptions {
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            ..Default::default()
        }
    }

    /// 在任何异步工作开始前检查参数
    pub fn validate(&self) -> Result<()> {
        if self.path.trim().is_empty() {
            return Err(SyncError::config("path is required"));
        }
        if self.concurrency == 0 {
            return Err(SyncError::config("concurrency must be a positive number"));
        }
        Ok(())
    }

    /// 是否启用删除
    pub fn deletes(&self) -> bool {
        self.delete || self.only_delete
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_ms
            .filter(|ms| *ms > 0)
            .map(Duration::from_millis)
    }

    /// 规范化后的同步根：去掉尾部斜杠，展开 `~~`
    pub fn root(&self) -> String {
        let path = match self.path.strip_prefix(HOME_SENTINEL) {
            Some(rest) => {
                let home = self.home.as_deref().unwrap_or("").trim_end_matches('/');
                format!("{}{}", home, rest)
            }
            None => self.path.clone(),
        };
        path.trim_end_matches('/').to_string()
    }
}

/// 远程存储配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum StoreConfig {
    Fs {
        root: String,
    },
    #[serde(rename_all = "camelCase")]
    S3 {
        bucket: String,
        region: String,
        access_key: String,
        secret_key: String,
        #[serde(default)]
        endpoint: Option<String>,
        #[serde(default)]
        prefix: Option<String>,
    },
    Webdav {
        endpoint: String,
        username: String,
        password: String,
        #[serde(default)]
        root: Option<String>,
    },
}

/// 配置文件内容
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppConfig {
    #[serde(default)]
    pub store: Option<StoreConfig>,
    #[serde(default)]
    pub sync: SyncOptions,
    #[serde(default)]
    pub log: LogConfig,
}

impl AppConfig {
    /// 从 JSON 配置文件加载
    pub fn load(config_file: &Path) -> Result<Self> {
        let content = fs::read_to_string(config_file).map_err(|e| {
            SyncError::config(format!("cannot read {}: {}", config_file.display(), e))
        })?;
        serde_json::from_str(&content).map_err(|e| {
            SyncError::config(format!("invalid config {}: {}", config_file.display(), e))
        })
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            store: None,
            sync: SyncOptions::default(),
            log: LogConfig::default(),
        }
    }
}
