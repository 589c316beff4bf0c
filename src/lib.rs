pub mod config;
pub mod core;
pub mod error;
pub mod logging;
pub mod storage;

pub use config::{AppConfig, StoreConfig, SyncOptions};
pub use core::{
    File, FileStatus, LocalScanner, Manifest, Outcome, ScanConfig, Summary, SyncBuilder, SyncEngine,
    SyncEvent, SyncReport,
};
pub use error::{Result, SyncError};
pub use storage::{create_store, LocalSource, RemoteStore, UploadSource};

use std::sync::Arc;

/// 用默认设置运行一次同步
pub async fn sync(
    manifest: Manifest,
    options: SyncOptions,
    store: Arc<dyn RemoteStore>,
    source: impl UploadSource + 'static,
) -> Result<SyncReport> {
    let engine = SyncEngine::builder(manifest, options)
        .store(store)
        .source(source)
        .build()?;
    Ok(engine.run().await)
}
