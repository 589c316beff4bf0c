use super::{
    ByteStream, EntryKind, ObjectMeta, RemoteEntry, RemoteStore, StoreError,
    IO_TIMEOUT_SECS, OP_TIMEOUT_SECS,
};
use crate::config::StoreConfig;
use crate::core::checksum;
use crate::core::file::File;
use crate::error::SyncError;
use async_trait::async_trait;
use bytes::BytesMut;
use futures::stream::BoxStream;
use futures::{StreamExt, TryFutureExt, TryStreamExt};
use opendal::{layers::TimeoutLayer, Metakey, Operator};
use std::sync::Arc;
use std::time::Duration;

/// 基于 opendal 的远程存储（fs / s3 / webdav）
pub struct OpendalStore {
    operator: Operator,
    name: String,
    /// WebDAV 之类的服务写入前需要逐级创建父目录
    create_parents: bool,
}

impl OpendalStore {
    pub fn new(operator: Operator, name: impl Into<String>, create_parents: bool) -> Self {
        Self {
            operator,
            name: name.into(),
            create_parents,
        }
    }

    fn dir_path(path: &str) -> String {
        let path = path.trim_matches('/');
        if path.is_empty() {
            "/".to_string()
        } else {
            format!("{}/", path)
        }
    }

    fn map_err(path: &str, err: opendal::Error) -> StoreError {
        if err.kind() == opendal::ErrorKind::NotFound {
            StoreError::NotFound(path.to_string())
        } else {
            StoreError::Backend {
                path: path.to_string(),
                message: err.to_string(),
            }
        }
    }

    fn checksum_of(meta: &opendal::Metadata) -> Option<String> {
        meta.content_md5()
            .or_else(|| meta.etag())
            .and_then(checksum::canonicalize)
    }

    async fn ensure_parents(&self, path: &str) {
        let Some((parent, _)) = path.trim_start_matches('/').rsplit_once('/') else {
            return;
        };
        let mut current = String::new();
        for part in parent.split('/').filter(|s| !s.is_empty()) {
            current.push_str(part);
            current.push('/');
            // 忽略错误，目录可能已存在
            let _ = self.operator.create_dir(&current).await;
        }
    }
}

#[async_trait]
impl RemoteStore for OpendalStore {
    fn walk<'a>(&'a self, path: &'a str) -> BoxStream<'a, Result<RemoteEntry, StoreError>> {
        let dir = Self::dir_path(path);
        let parent = path.trim_end_matches('/').to_string();

        async move {
            let lister = self
                .operator
                .lister_with(&dir)
                .metakey(Metakey::ContentLength | Metakey::Mode | Metakey::ContentMd5 | Metakey::Etag)
                .await
                .map_err(|e| Self::map_err(&dir, e))?;

            let listed = dir.clone();
            Ok::<_, StoreError>(
                lister
                    .map_err(move |e| Self::map_err(&listed, e))
                    .try_filter_map(move |entry| {
                        let own = entry.path().trim_matches('/') == dir.trim_matches('/');
                        let name = entry.name().trim_end_matches('/').to_string();
                        let result = if own || name.is_empty() {
                            None
                        } else {
                            let meta = entry.metadata();
                            let kind = if meta.is_dir() {
                                EntryKind::Directory
                            } else {
                                EntryKind::Object
                            };
                            Some(RemoteEntry {
                                kind,
                                parent: parent.clone(),
                                name,
                                size: (kind == EntryKind::Object).then(|| meta.content_length()),
                                checksum: Self::checksum_of(meta),
                            })
                        };
                        futures::future::ready(Ok(result))
                    }),
            )
        }
        .try_flatten_stream()
        .boxed()
    }

    async fn stat(&self, path: &str) -> Result<ObjectMeta, StoreError> {
        let meta = self
            .operator
            .stat(path)
            .await
            .map_err(|e| Self::map_err(path, e))?;
        Ok(ObjectMeta {
            size: Some(meta.content_length()),
            checksum: Self::checksum_of(&meta),
            status_code: Some(200),
            headers: Default::default(),
        })
    }

    async fn put(
        &self,
        path: &str,
        mut body: ByteStream,
        file: &File,
    ) -> Result<ObjectMeta, StoreError> {
        let mut data = BytesMut::new();
        while let Some(chunk) = body.next().await {
            let chunk = chunk.map_err(|source| StoreError::Body {
                path: path.to_string(),
                source,
            })?;
            data.extend_from_slice(&chunk);
        }

        let size = data.len() as u64;
        let digest = checksum::digest(&data);

        if self.create_parents {
            self.ensure_parents(path).await;
        }

        let mut writer = self.operator.write_with(path, data.freeze());
        if let Some(content_type) = file
            .content_type
            .as_deref()
            .or_else(|| file.headers.get("content-type").map(String::as_str))
        {
            writer = writer.content_type(content_type);
        }
        if let Some(cache_control) = file.headers.get("cache-control") {
            writer = writer.cache_control(cache_control);
        }
        writer.await.map_err(|e| Self::map_err(path, e))?;

        Ok(ObjectMeta {
            size: Some(size),
            checksum: Some(digest),
            status_code: Some(204),
            headers: Default::default(),
        })
    }

    async fn unlink(&self, path: &str) -> Result<(), StoreError> {
        self.operator
            .delete(path)
            .await
            .map_err(|e| Self::map_err(path, e))
    }

    async fn remove_recursive(&self, path: &str) -> Result<(), StoreError> {
        let dir = Self::dir_path(path);
        self.operator
            .remove_all(&dir)
            .await
            .map_err(|e| Self::map_err(&dir, e))?;
        // 文件系统后端会留下空目录本身
        match self.operator.delete(&dir).await {
            Err(e) if e.kind() != opendal::ErrorKind::NotFound => Err(Self::map_err(&dir, e)),
            _ => Ok(()),
        }
    }

    async fn mkdir(&self, path: &str) -> Result<(), StoreError> {
        let dir = Self::dir_path(path);
        self.operator
            .create_dir(&dir)
            .await
            .map_err(|e| Self::map_err(&dir, e))
    }

    fn name(&self) -> &str {
        &self.name
    }
}

fn build_err(err: opendal::Error) -> SyncError {
    SyncError::config(format!("failed to build store: {err}"))
}

/// 根据配置创建存储实例
pub fn create_store(config: &StoreConfig) -> Result<Arc<dyn RemoteStore>, SyncError> {
    let timeouts = TimeoutLayer::default()
        .with_timeout(Duration::from_secs(OP_TIMEOUT_SECS))
        .with_io_timeout(Duration::from_secs(IO_TIMEOUT_SECS));

    match config {
        StoreConfig::Fs { root } => {
            use opendal::services::Fs;

            tracing::info!("初始化本地存储: {}", root);
            let operator = Operator::new(Fs::default().root(root))
                .map_err(build_err)?
                .finish();
            Ok(Arc::new(OpendalStore::new(operator, format!("fs:{}", root), false)))
        }
        StoreConfig::S3 {
            bucket,
            region,
            access_key,
            secret_key,
            endpoint,
            prefix,
        } => {
            use opendal::services::S3;

            let mut builder = S3::default()
                .bucket(bucket)
                .region(region)
                .access_key_id(access_key)
                .secret_access_key(secret_key);
            if let Some(ep) = endpoint {
                builder = builder.endpoint(ep);
            }
            if let Some(p) = prefix {
                builder = builder.root(p);
            }

            tracing::info!("初始化S3存储: bucket={}, region={}", bucket, region);
            let operator = Operator::new(builder)
                .map_err(build_err)?
                .layer(timeouts)
                .finish();
            let name = format!(
                "s3://{}{}",
                bucket,
                prefix.as_deref().map(|p| format!("/{}", p)).unwrap_or_default()
            );
            Ok(Arc::new(OpendalStore::new(operator, name, false)))
        }
        StoreConfig::Webdav {
            endpoint,
            username,
            password,
            root,
        } => {
            use opendal::services::Webdav;

            let mut builder = Webdav::default()
                .endpoint(endpoint)
                .username(username)
                .password(password);
            if let Some(r) = root {
                builder = builder.root(r);
            }

            tracing::info!("创建WebDAV存储: endpoint={}, root={:?}", endpoint, root);
            let operator = Operator::new(builder)
                .map_err(build_err)?
                .layer(timeouts)
                .finish();
            let name = format!(
                "webdav://{}{}",
                endpoint.trim_end_matches('/'),
                root.as_deref()
                    .map(|r| format!("/{}", r.trim_start_matches('/')))
                    .unwrap_or_default()
            );
            Ok(Arc::new(OpendalStore::new(operator, name, true)))
        }
    }
}
