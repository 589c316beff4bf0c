//! 上传内容来源与外部摘要计算

use super::ByteStream;
use crate::core::file::File;
use crate::error::SyncError;
use async_trait::async_trait;
use futures::StreamExt;
use std::future::Future;
use std::path::PathBuf;
use tokio_util::io::ReaderStream;

/// 为需要上传的文件提供内容
#[async_trait]
pub trait UploadSource: Send + Sync {
    async fn request(&self, file: &File) -> Result<ByteStream, SyncError>;
}

#[async_trait]
impl<F, Fut> UploadSource for F
where
    F: Fn(File) -> Fut + Send + Sync,
    Fut: Future<Output = Result<ByteStream, SyncError>> + Send,
{
    async fn request(&self, file: &File) -> Result<ByteStream, SyncError> {
        (self)(file.clone()).await
    }
}

/// 在清单没有摘要时，按需计算文件摘要（十六进制或 base64 均可）
#[async_trait]
pub trait ChecksumFetch: Send + Sync {
    async fn fetch(&self, file: &File) -> Result<String, SyncError>;
}

#[async_trait]
impl<F, Fut> ChecksumFetch for F
where
    F: Fn(File) -> Fut + Send + Sync,
    Fut: Future<Output = Result<String, SyncError>> + Send,
{
    async fn fetch(&self, file: &File) -> Result<String, SyncError> {
        (self)(file.clone()).await
    }
}

/// 从本地目录读取上传内容
pub struct LocalSource {
    base_path: PathBuf,
}

impl LocalSource {
    pub fn new(base_path: impl Into<PathBuf>) -> Self {
        Self {
            base_path: base_path.into(),
        }
    }

    fn resolve_path(&self, name: &str) -> PathBuf {
        self.base_path.join(name.trim_start_matches('/'))
    }
}

#[async_trait]
impl UploadSource for LocalSource {
    async fn request(&self, file: &File) -> Result<ByteStream, SyncError> {
        let path = self.resolve_path(file.name.as_str());
        let handle = tokio::fs::File::open(&path)
            .await
            .map_err(|e| SyncError::upload_source(file.name.as_str(), e))?;
        Ok(ReaderStream::new(handle).boxed())
    }
}

#[async_trait]
impl ChecksumFetch for LocalSource {
    async fn fetch(&self, file: &File) -> Result<String, SyncError> {
        let path = self.resolve_path(file.name.as_str());
        let data = tokio::fs::read(&path)
            .await
            .map_err(|e| SyncError::upload_source(file.name.as_str(), e))?;
        Ok(crate::core::checksum::digest(&data))
    }
}
