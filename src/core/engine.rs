use crate::config::SyncOptions;
use crate::core::diff::{self, RemoteView, Verdict};
use crate::core::file::{File, FileName, FileRegistry, FileStatus, Manifest};
use crate::core::report::{Outcome, SyncEvent, SyncReport};
use crate::core::scheduler::{Scheduler, SchedulerEvent};
use crate::core::task::{Finished, Task, TaskFuture, TaskKind, TaskOutput};
use crate::error::{Result, SyncError};
use crate::storage::{join_path, ChecksumFetch, EntryKind, RemoteStore, UploadSource};
use chrono::Utc;
use futures::FutureExt;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, error, info};
use uuid::Uuid;

/// 任务完成后的下一步
#[derive(Debug)]
pub(super) enum Step {
    /// 一次目录遍历结束
    Walked { dir: String },
    /// 远程摘要补齐后重新判定
    RemoteChecksum { remote: RemoteView },
    /// 本地摘要补齐后重新判定
    LocalChecksum { remote: RemoteView },
    Uploaded,
    Deleted { relative: String, kind: EntryKind },
}

/// 任务执行所需的外部协作者
pub(super) struct RunContext {
    pub store: Arc<dyn RemoteStore>,
    pub source: Arc<dyn UploadSource>,
    pub checksum_fetch: Option<Arc<dyn ChecksumFetch>>,
    pub dry_run: bool,
}

/// 同步引擎构建器
pub struct SyncBuilder {
    manifest: Manifest,
    options: SyncOptions,
    store: Option<Arc<dyn RemoteStore>>,
    source: Option<Arc<dyn UploadSource>>,
    checksum_fetch: Option<Arc<dyn ChecksumFetch>>,
    events: Option<mpsc::UnboundedSender<SyncEvent>>,
}

impl SyncBuilder {
    pub fn store(mut self, store: Arc<dyn RemoteStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn source(mut self, source: impl UploadSource + 'static) -> Self {
        self.source = Some(Arc::new(source));
        self
    }

    pub fn checksum_fetch(mut self, fetch: impl ChecksumFetch + 'static) -> Self {
        self.checksum_fetch = Some(Arc::new(fetch));
        self
    }

    /// 订阅同步事件
    pub fn events(mut self, tx: mpsc::UnboundedSender<SyncEvent>) -> Self {
        self.events = Some(tx);
        self
    }

    /// 校验参数并规范化清单，不做任何异步工作
    pub fn build(self) -> Result<SyncEngine> {
        let store = self
            .store
            .ok_or_else(|| SyncError::config("store handle required"))?;
        let source = self
            .source
            .ok_or_else(|| SyncError::config("upload source required"))?;
        self.options.validate()?;

        let files = FileRegistry::canonicalize(&self.manifest, &self.options.headers)?;
        let scheduler = Scheduler::new(
            self.options.concurrency,
            self.options.timeout(),
            self.options.dry_run,
        );

        Ok(SyncEngine {
            ctx: Arc::new(RunContext {
                store,
                source,
                checksum_fetch: self.checksum_fetch,
                dry_run: self.options.dry_run,
            }),
            root: self.options.root(),
            options: self.options,
            files,
            scheduler,
            walks: 0,
            results: BTreeMap::new(),
            first_error: None,
            delete_started: false,
            removing: BTreeMap::new(),
            events: self.events,
            run_id: Uuid::new_v4(),
        })
    }
}

/// 单次同步运行的全部状态，运行结束即丢弃
pub struct SyncEngine {
    pub(super) ctx: Arc<RunContext>,
    pub(super) options: SyncOptions,
    pub(super) root: String,
    pub(super) files: FileRegistry,
    pub(super) scheduler: Scheduler<Step>,
    /// 尚未结束的目录遍历数
    pub(super) walks: usize,
    pub(super) results: BTreeMap<String, Outcome>,
    pub(super) first_error: Option<SyncError>,
    pub(super) delete_started: bool,
    /// 在途删除（相对路径）及排在其后的上传
    pub(super) removing: BTreeMap<String, Vec<FileName>>,
    pub(super) events: Option<mpsc::UnboundedSender<SyncEvent>>,
    pub(super) run_id: Uuid,
}

impl SyncEngine {
    pub fn builder(manifest: Manifest, options: SyncOptions) -> SyncBuilder {
        SyncBuilder {
            manifest,
            options,
            store: None,
            source: None,
            checksum_fetch: None,
            events: None,
        }
    }

    /// 运行同步直到所有任务结束
    pub async fn run(mut self) -> SyncReport {
        let start_time = Utc::now();
        info!(
            "开始同步: {}:/{} ({} 个文件, run={}{})",
            self.ctx.store.name(),
            self.root,
            self.files.len(),
            self.run_id,
            if self.options.dry_run { ", 模拟运行" } else { "" }
        );

        self.start_walk(self.root.clone());

        while !self.scheduler.is_complete() {
            let Some(event) = self.scheduler.next_event().await else {
                error!(
                    "调度器没有在途任务但未完成 (walks={}, queued={})",
                    self.walks,
                    self.scheduler.queued()
                );
                break;
            };
            match event {
                SchedulerEvent::TimedOut {
                    id,
                    kind,
                    label,
                    timeout,
                } => {
                    let error = SyncError::Timeout {
                        task_id: id,
                        kind: kind.to_string(),
                        timeout,
                    };
                    // 严格模式下超时计为错误，任务仍占用并发槽
                    if self.options.strict {
                        self.raise(error.clone());
                    }
                    self.emit(SyncEvent::TimedOut { label, error });
                }
                SchedulerEvent::Finished(done) => self.on_finished(done),
            }
            self.scheduler.dispatch();
        }

        let report = SyncReport {
            run_id: self.run_id,
            root: self.root.clone(),
            start_time,
            end_time: Utc::now(),
            dry_run: self.options.dry_run,
            results: std::mem::take(&mut self.results),
            first_error: self.first_error.take(),
        };
        let summary = report.summary();
        info!(
            "同步完成: 上传 {}, 一致 {}, 删除 {}, 失败 {} (用时 {:?})",
            summary.sent,
            summary.matched,
            summary.deleted,
            summary.failed,
            report.duration()
        );
        self.emit(SyncEvent::Complete { summary });
        report
    }

    pub(super) fn emit(&self, event: SyncEvent) {
        if let Some(tx) = &self.events {
            let _ = tx.send(event);
        }
    }

    /// 同步根下的远程路径
    pub(super) fn remote_path(&self, name: &str) -> String {
        join_path(&self.root, name)
    }

    pub(super) fn submit(&mut self, task: Task<Step>) {
        if self.scheduler.is_finalized() {
            // 收尾之后只允许已开始文件的后续任务
            let started = task
                .file
                .as_ref()
                .and_then(|name| self.files.get(name.as_str()))
                .is_some_and(|f| f.started);
            debug_assert!(started, "new task {} submitted after finalization", task.label);
        }
        self.scheduler.submit(task);
    }

    fn on_finished(&mut self, done: Finished<Step>) {
        let Finished {
            kind,
            file,
            label,
            then,
            result,
            ..
        } = done;

        match then {
            Step::Walked { dir } => self.on_listing(&dir, result),
            Step::Deleted { relative, kind } => self.on_removed(relative, kind, result),
            Step::RemoteChecksum { remote } => {
                let Some(name) = file else { return };
                match result {
                    Ok(TaskOutput::Meta(meta)) => self.decide(name.as_str(), remote.with_stat(meta)),
                    Err(e) if e.is_not_found() => {
                        debug!("远程对象已消失，改为上传: {}", name);
                        self.send(name.as_str());
                    }
                    Err(e) => self.fail_file(name.as_str(), e),
                    Ok(other) => self.unexpected(Some(&name), kind, &label, other),
                }
            }
            Step::LocalChecksum { remote } => {
                let Some(name) = file else { return };
                match result {
                    Ok(TaskOutput::Checksum(sum)) if sum.is_empty() => self.fail_file(
                        name.as_str(),
                        SyncError::upload_source(name.as_str(), "checksum fetch returned no digest"),
                    ),
                    Ok(TaskOutput::Checksum(sum)) => {
                        if let Some(f) = self.files.get_mut(name.as_str()) {
                            f.checksum = Some(sum);
                        }
                        self.decide(name.as_str(), remote);
                    }
                    Err(e) => self.fail_file(name.as_str(), e),
                    Ok(other) => self.unexpected(Some(&name), kind, &label, other),
                }
            }
            Step::Uploaded => {
                let Some(name) = file else { return };
                match result {
                    Ok(TaskOutput::Meta(meta)) => {
                        self.settle(
                            name.as_str(),
                            Outcome::new(FileStatus::Sent, meta.size, meta.checksum),
                        );
                    }
                    Ok(TaskOutput::DryRun) => {
                        let outcome = self
                            .files
                            .get(name.as_str())
                            .map(|f| Outcome::new(FileStatus::Sent, f.size, f.checksum.clone()))
                            .unwrap_or_else(|| Outcome::new(FileStatus::Sent, None, None));
                        self.settle(name.as_str(), outcome);
                    }
                    Err(e) => self.fail_file(name.as_str(), e),
                    Ok(other) => self.unexpected(Some(&name), kind, &label, other),
                }
            }
        }
    }

    fn unexpected(&mut self, file: Option<&FileName>, kind: TaskKind, label: &str, output: TaskOutput) {
        let err = SyncError::transport(label, format!("unexpected {kind} result: {output:?}"));
        match file {
            Some(name) => self.fail_file(name.as_str(), err),
            None => self.raise(err),
        }
    }

    /// 对一个已在远程出现的文件做判定
    pub(super) fn decide(&mut self, name: &str, remote: RemoteView) {
        let Some(file) = self.files.get(name) else {
            return;
        };
        let verdict = diff::decide(file, &remote, self.ctx.checksum_fetch.is_some());
        debug!("判定 {}: {:?}", name, verdict);

        match verdict {
            Verdict::Match => {
                let outcome = Outcome::new(
                    FileStatus::Match,
                    remote.size,
                    remote.checksum.clone().or_else(|| file.checksum.clone()),
                );
                self.settle(name, outcome);
            }
            Verdict::Send => self.send(name),
            Verdict::FetchRemoteChecksum => {
                let path = self.remote_path(name);
                let work = stat_work(self.ctx.clone(), path.clone());
                self.submit(
                    Task::new(TaskKind::Info, path, work, Step::RemoteChecksum { remote })
                        .with_file(FileName::new(name)),
                );
            }
            Verdict::FetchLocalChecksum => {
                let work = checksum_work(self.ctx.clone(), file.clone());
                self.submit(
                    Task::new(TaskKind::GetChecksum, name, work, Step::LocalChecksum { remote })
                        .with_file(FileName::new(name)),
                );
            }
        }
    }

    /// 安排上传
    pub(super) fn send(&mut self, name: &str) {
        let Some(file) = self.files.get(name).cloned() else {
            return;
        };
        let path = self.remote_path(name);
        debug!("上传 {} -> {}", name, path);
        let work = upload_work(self.ctx.clone(), path.clone(), file);
        self.submit(Task::new(TaskKind::Send, path, work, Step::Uploaded).with_file(FileName::new(name)));
    }

    /// 记录文件的最终结果
    pub(super) fn settle(&mut self, name: &str, outcome: Outcome) {
        if let Some(file) = self.files.get_mut(name) {
            file.status = outcome.status;
            file.error = outcome.error.clone();
        }
        debug!("文件 {}: {}", name, outcome.status);
        self.emit(SyncEvent::File {
            name: name.to_string(),
            status: outcome.status,
            outcome: outcome.clone(),
        });
        self.results.insert(name.to_string(), outcome);
    }

    /// 文件级错误：记到文件上并作为顶层错误上报，同步继续
    pub(super) fn fail_file(&mut self, name: &str, err: SyncError) {
        error!("文件 {} 同步失败: {}", name, err);
        if self.first_error.is_none() {
            self.first_error = Some(err.clone());
        }
        self.emit(SyncEvent::Error(err.clone()));
        self.settle(name, Outcome::failed(err));
    }

    /// 没有归属文件的错误，作为顶层错误上报
    pub(super) fn raise(&mut self, err: SyncError) {
        error!("同步错误: {}", err);
        if self.first_error.is_none() {
            self.first_error = Some(err.clone());
        }
        self.emit(SyncEvent::Error(err));
    }
}

pub(super) fn walk_work(ctx: Arc<RunContext>, dir: String) -> TaskFuture {
    use futures::TryStreamExt;

    async move {
        let entries = ctx.store.walk(&dir).try_collect::<Vec<_>>().await?;
        Ok(TaskOutput::Listing(entries))
    }
    .boxed()
}

fn stat_work(ctx: Arc<RunContext>, path: String) -> TaskFuture {
    async move {
        let meta = ctx.store.stat(&path).await?;
        Ok(TaskOutput::Meta(meta))
    }
    .boxed()
}

fn checksum_work(ctx: Arc<RunContext>, file: File) -> TaskFuture {
    async move {
        let Some(fetch) = ctx.checksum_fetch.as_ref() else {
            return Err(SyncError::config("no checksum fetcher configured"));
        };
        let sum = fetch.fetch(&file).await?;
        Ok(TaskOutput::Checksum(sum))
    }
    .boxed()
}

fn upload_work(ctx: Arc<RunContext>, path: String, file: File) -> TaskFuture {
    async move {
        debug_assert!(!ctx.dry_run, "upload of {} reached during dry run", file.name);
        let body = ctx.source.request(&file).await?;
        let meta = ctx.store.put(&path, body, &file).await?;
        Ok(TaskOutput::Meta(meta))
    }
    .boxed()
}

pub(super) fn unlink_work(ctx: Arc<RunContext>, path: String) -> TaskFuture {
    async move {
        ctx.store.unlink(&path).await?;
        Ok(TaskOutput::Removed)
    }
    .boxed()
}

pub(super) fn rmr_work(ctx: Arc<RunContext>, path: String) -> TaskFuture {
    async move {
        ctx.store.remove_recursive(&path).await?;
        Ok(TaskOutput::Removed)
    }
    .boxed()
}
