//! 同步错误类型

use std::time::Duration;
use thiserror::Error;

use crate::storage::StoreError;

/// 同步过程中可能出现的错误
///
/// `Clone` 是必须的：同一个错误会同时挂到文件、任务、结果表和首个错误上。
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SyncError {
    /// 调用参数不合法，在任何异步任务开始前同步返回
    #[error("invalid configuration: {0}")]
    Configuration(String),

    /// 远程路径不存在，通常作为分支条件被吸收
    #[error("remote path not found: {0}")]
    NotFound(String),

    /// 存储操作因其他原因失败
    #[error("transport error on {path}: {message}")]
    Transport { path: String, message: String },

    /// 任务超时，仅作提示，不会中止任务
    #[error("task {task_id} ({kind}) exceeded {timeout:?}")]
    Timeout {
        task_id: u64,
        kind: String,
        timeout: Duration,
    },

    /// 上传内容提供方失败
    #[error("upload source failed for {name}: {message}")]
    UploadSource { name: String, message: String },
}

impl SyncError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, SyncError::NotFound(_))
    }

    pub fn config(message: impl Into<String>) -> Self {
        SyncError::Configuration(message.into())
    }

    pub fn transport(path: impl Into<String>, message: impl ToString) -> Self {
        SyncError::Transport {
            path: path.into(),
            message: message.to_string(),
        }
    }

    pub fn upload_source(name: impl Into<String>, message: impl ToString) -> Self {
        SyncError::UploadSource {
            name: name.into(),
            message: message.to_string(),
        }
    }
}

impl From<StoreError> for SyncError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(path) => SyncError::NotFound(path),
            StoreError::Body { path, source } => SyncError::upload_source(path, source),
            StoreError::Io { path, source } => SyncError::transport(path, source),
            StoreError::Backend { path, message } => SyncError::Transport { path, message },
        }
    }
}

pub type Result<T, E = SyncError> = std::result::Result<T, E>;
