pub mod opendal_store;
pub mod source;

use crate::core::checksum;
use crate::core::file::File;
use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

pub use opendal_store::{create_store, OpendalStore};
pub use source::{ChecksumFetch, LocalSource, UploadSource};

// ============ 公共常量 ============

/// 非 IO 操作超时（秒）- stat, delete 等
pub const OP_TIMEOUT_SECS: u64 = 60;
/// IO 操作超时（秒）- read, write 等
pub const IO_TIMEOUT_SECS: u64 = 300;

/// 上传内容流
pub type ByteStream = BoxStream<'static, std::io::Result<Bytes>>;

/// 存储层错误
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("not found: {0}")]
    NotFound(String),

    /// 上传内容流本身出错
    #[error("body stream for {path} failed: {source}")]
    Body {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("I/O error at {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("backend error at {path}: {message}")]
    Backend { path: String, message: String },
}

/// 远程条目类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryKind {
    Directory,
    Object,
}

/// 目录列表返回的一项
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteEntry {
    pub kind: EntryKind,
    /// 被列出的目录（绝对路径）
    pub parent: String,
    pub name: String,
    pub size: Option<u64>,
    /// 较新的列表接口会直接带上摘要，省一次 stat
    pub checksum: Option<String>,
}

impl RemoteEntry {
    pub fn path(&self) -> String {
        join_path(&self.parent, &self.name)
    }
}

/// stat / put 返回的对象元数据
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ObjectMeta {
    pub size: Option<u64>,
    pub checksum: Option<String>,
    pub status_code: Option<u16>,
    /// 原始响应头（小写）
    pub headers: BTreeMap<String, String>,
}

impl ObjectMeta {
    /// 把响应头里的 content-length / content-md5 / computed-md5 补到规范字段上
    pub fn normalized(mut self) -> Self {
        if self.size.is_none() {
            self.size = self
                .headers
                .get("content-length")
                .and_then(|v| v.trim().parse().ok());
        }

        self.checksum = self
            .checksum
            .take()
            .or_else(|| self.headers.get("content-md5").cloned())
            .or_else(|| self.headers.get("computed-md5").cloned())
            .and_then(|c| checksum::canonicalize(&c));

        self
    }
}

/// 拼接远程路径，空的父路径表示存储根
pub fn join_path(parent: &str, name: &str) -> String {
    let parent = parent.trim_end_matches('/');
    let name = name.trim_start_matches('/');
    if parent.is_empty() {
        name.to_string()
    } else {
        format!("{}/{}", parent, name)
    }
}

/// 远程对象存储接口
#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// 列出目录的直接子项；目录不存在时流以 NotFound 结束
    fn walk<'a>(&'a self, path: &'a str) -> BoxStream<'a, Result<RemoteEntry, StoreError>>;

    /// 获取对象元数据
    async fn stat(&self, path: &str) -> Result<ObjectMeta, StoreError>;

    /// 上传对象，父目录按需创建
    async fn put(&self, path: &str, body: ByteStream, file: &File)
        -> Result<ObjectMeta, StoreError>;

    /// 删除单个对象
    async fn unlink(&self, path: &str) -> Result<(), StoreError>;

    /// 递归删除目录
    async fn remove_recursive(&self, path: &str) -> Result<(), StoreError>;

    /// 创建目录
    async fn mkdir(&self, path: &str) -> Result<(), StoreError>;

    /// 获取存储名称（用于日志）
    fn name(&self) -> &str;
}
