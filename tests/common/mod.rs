//! 内存对象存储与上传源，记录每次操作供断言使用

#![allow(dead_code)]

use async_trait::async_trait;
use bytes::Bytes;
use cloudmirror_lib::core::checksum;
use cloudmirror_lib::core::{File, Manifest, SyncEvent};
use cloudmirror_lib::error::SyncError;
use cloudmirror_lib::storage::{
    ByteStream, EntryKind, ObjectMeta, RemoteEntry, RemoteStore, StoreError, UploadSource,
};
use futures::stream::{self, BoxStream};
use futures::{StreamExt, TryFutureExt, TryStreamExt};
use serde_json::json;
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;

#[derive(Debug, Clone)]
struct Stored {
    data: Vec<u8>,
    headers: BTreeMap<String, String>,
    content_type: Option<String>,
}

#[derive(Default)]
struct Journal {
    walks: Vec<String>,
    stats: Vec<String>,
    puts: Vec<String>,
    unlinks: Vec<String>,
    rmrs: Vec<String>,
}

#[derive(Default)]
pub struct MemoryStore {
    objects: Mutex<BTreeMap<String, Stored>>,
    journal: Mutex<Journal>,
    failing: Mutex<HashSet<String>>,
    delay: Duration,
    /// 列表结果不带摘要，迫使引擎去 stat
    bare_listing: bool,
    active: AtomicUsize,
    peak: AtomicUsize,
}

struct OpGuard<'a>(&'a AtomicUsize);

impl Drop for OpGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl MemoryStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn with_delay(delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            delay,
            ..Default::default()
        })
    }

    pub fn with_bare_listing() -> Arc<Self> {
        Arc::new(Self {
            bare_listing: true,
            ..Default::default()
        })
    }

    pub fn seed(&self, path: &str, data: &[u8]) {
        self.objects.lock().unwrap().insert(
            path.to_string(),
            Stored {
                data: data.to_vec(),
                headers: BTreeMap::new(),
                content_type: None,
            },
        );
    }

    /// 对该路径的任何操作都返回后端错误
    pub fn fail_on(&self, path: &str) {
        self.failing.lock().unwrap().insert(path.to_string());
    }

    pub fn keys(&self) -> Vec<String> {
        self.objects.lock().unwrap().keys().cloned().collect()
    }

    pub fn data(&self, path: &str) -> Option<Vec<u8>> {
        self.objects.lock().unwrap().get(path).map(|s| s.data.clone())
    }

    pub fn headers(&self, path: &str) -> BTreeMap<String, String> {
        self.objects
            .lock()
            .unwrap()
            .get(path)
            .map(|s| s.headers.clone())
            .unwrap_or_default()
    }

    pub fn content_type(&self, path: &str) -> Option<String> {
        self.objects
            .lock()
            .unwrap()
            .get(path)
            .and_then(|s| s.content_type.clone())
    }

    pub fn walks(&self) -> Vec<String> {
        self.journal.lock().unwrap().walks.clone()
    }

    pub fn stats(&self) -> Vec<String> {
        self.journal.lock().unwrap().stats.clone()
    }

    pub fn puts(&self) -> Vec<String> {
        self.journal.lock().unwrap().puts.clone()
    }

    pub fn unlinks(&self) -> Vec<String> {
        self.journal.lock().unwrap().unlinks.clone()
    }

    pub fn rmrs(&self) -> Vec<String> {
        self.journal.lock().unwrap().rmrs.clone()
    }

    /// 写操作总数（put / unlink / rmr）
    pub fn mutations(&self) -> usize {
        let journal = self.journal.lock().unwrap();
        journal.puts.len() + journal.unlinks.len() + journal.rmrs.len()
    }

    /// 同时进行中的操作峰值
    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    async fn begin(&self) -> OpGuard<'_> {
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        let guard = OpGuard(&self.active);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        guard
    }

    fn check(&self, path: &str) -> Result<(), StoreError> {
        if self.failing.lock().unwrap().contains(path) {
            return Err(StoreError::Backend {
                path: path.to_string(),
                message: "injected failure".to_string(),
            });
        }
        Ok(())
    }

    fn list(&self, dir: &str) -> Result<Vec<RemoteEntry>, StoreError> {
        let dir = dir.trim_end_matches('/');
        let prefix = if dir.is_empty() {
            String::new()
        } else {
            format!("{dir}/")
        };

        let objects = self.objects.lock().unwrap();
        let mut dirs = BTreeSet::new();
        let mut entries = Vec::new();
        let mut any = false;
        for (key, stored) in objects.iter() {
            let Some(rest) = key.strip_prefix(prefix.as_str()) else {
                continue;
            };
            any = true;
            match rest.split_once('/') {
                Some((child, _)) => {
                    dirs.insert(child.to_string());
                }
                None => entries.push(RemoteEntry {
                    kind: EntryKind::Object,
                    parent: dir.to_string(),
                    name: rest.to_string(),
                    size: Some(stored.data.len() as u64),
                    checksum: (!self.bare_listing).then(|| checksum::digest(&stored.data)),
                }),
            }
        }

        if !any && !dir.is_empty() {
            return Err(StoreError::NotFound(dir.to_string()));
        }

        entries.extend(dirs.into_iter().map(|name| RemoteEntry {
            kind: EntryKind::Directory,
            parent: dir.to_string(),
            name,
            size: None,
            checksum: None,
        }));
        Ok(entries)
    }
}

#[async_trait]
impl RemoteStore for MemoryStore {
    fn walk<'a>(&'a self, path: &'a str) -> BoxStream<'a, Result<RemoteEntry, StoreError>> {
        async move {
            let _op = self.begin().await;
            self.journal.lock().unwrap().walks.push(path.to_string());
            self.check(path)?;
            let entries = self.list(path)?;
            Ok::<_, StoreError>(stream::iter(entries.into_iter().map(Ok::<_, StoreError>)))
        }
        .try_flatten_stream()
        .boxed()
    }

    async fn stat(&self, path: &str) -> Result<ObjectMeta, StoreError> {
        let _op = self.begin().await;
        self.journal.lock().unwrap().stats.push(path.to_string());
        self.check(path)?;
        let objects = self.objects.lock().unwrap();
        let stored = objects
            .get(path)
            .ok_or_else(|| StoreError::NotFound(path.to_string()))?;
        // 只给响应头，由引擎规范化
        let mut headers = BTreeMap::new();
        headers.insert("content-length".to_string(), stored.data.len().to_string());
        headers.insert("content-md5".to_string(), checksum::digest(&stored.data));
        Ok(ObjectMeta {
            status_code: Some(200),
            headers,
            ..Default::default()
        })
    }

    async fn put(&self, path: &str, body: ByteStream, file: &File) -> Result<ObjectMeta, StoreError> {
        let _op = self.begin().await;
        self.journal.lock().unwrap().puts.push(path.to_string());
        self.check(path)?;

        let chunks = body
            .try_collect::<Vec<Bytes>>()
            .map_err(|source| StoreError::Body {
                path: path.to_string(),
                source,
            })
            .await?;
        let data = chunks.concat();

        let mut headers = BTreeMap::new();
        headers.insert("content-length".to_string(), data.len().to_string());
        headers.insert("computed-md5".to_string(), format!("{:x}", md5::compute(&data)));

        self.objects.lock().unwrap().insert(
            path.to_string(),
            Stored {
                data,
                headers: file.headers.clone(),
                content_type: file.content_type.clone(),
            },
        );
        Ok(ObjectMeta {
            status_code: Some(204),
            headers,
            ..Default::default()
        })
    }

    async fn unlink(&self, path: &str) -> Result<(), StoreError> {
        let _op = self.begin().await;
        self.journal.lock().unwrap().unlinks.push(path.to_string());
        self.check(path)?;
        self.objects
            .lock()
            .unwrap()
            .remove(path)
            .map(|_| ())
            .ok_or_else(|| StoreError::NotFound(path.to_string()))
    }

    async fn remove_recursive(&self, path: &str) -> Result<(), StoreError> {
        let _op = self.begin().await;
        self.journal.lock().unwrap().rmrs.push(path.to_string());
        self.check(path)?;
        let prefix = format!("{}/", path.trim_end_matches('/'));
        let mut objects = self.objects.lock().unwrap();
        let before = objects.len();
        objects.retain(|key, _| !key.starts_with(&prefix));
        if objects.len() == before {
            return Err(StoreError::NotFound(path.to_string()));
        }
        Ok(())
    }

    async fn mkdir(&self, _path: &str) -> Result<(), StoreError> {
        Ok(())
    }

    fn name(&self) -> &str {
        "memory"
    }
}

/// 内存中的本地文件内容
#[derive(Clone, Default)]
pub struct MemorySource {
    files: Arc<BTreeMap<String, Vec<u8>>>,
    requests: Arc<AtomicUsize>,
}

impl MemorySource {
    pub fn new(files: &[(&str, &[u8])]) -> Self {
        Self {
            files: Arc::new(
                files
                    .iter()
                    .map(|(name, data)| (name.to_string(), data.to_vec()))
                    .collect(),
            ),
            requests: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn requests(&self) -> usize {
        self.requests.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl UploadSource for MemorySource {
    async fn request(&self, file: &File) -> Result<ByteStream, SyncError> {
        self.requests.fetch_add(1, Ordering::SeqCst);
        let data = self
            .files
            .get(file.name.as_str())
            .cloned()
            .ok_or_else(|| SyncError::upload_source(file.name.as_str(), "no such local file"))?;
        Ok(stream::once(async move { Ok(Bytes::from(data)) }).boxed())
    }
}

/// 带 size 与 md5 的清单
pub fn manifest(files: &[(&str, &[u8])]) -> Manifest {
    files
        .iter()
        .map(|(name, data)| {
            (
                name.to_string(),
                json!({ "size": data.len(), "md5": checksum::digest(data) }),
            )
        })
        .collect()
}

/// 运行结束后取出全部已发出的事件
pub fn drain(rx: &mut mpsc::UnboundedReceiver<SyncEvent>) -> Vec<SyncEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}
