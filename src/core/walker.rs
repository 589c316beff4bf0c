//! 远程遍历：把列出的条目归类为进入、判定、删除或忽略

use super::engine::{walk_work, Step, SyncEngine};
use crate::core::diff::RemoteView;
use crate::core::report::SyncEvent;
use crate::core::task::{Task, TaskKind, TaskOutput, TaskResult};
use crate::error::SyncError;
use crate::storage::{EntryKind, RemoteEntry};
use tracing::{debug, info, warn};

impl SyncEngine {
    /// 计数先于派发增加，遍历结束时减少
    pub(super) fn start_walk(&mut self, dir: String) {
        self.walks += 1;
        debug!("遍历目录: {:?} (进行中 {})", dir, self.walks);
        let work = walk_work(self.ctx.clone(), dir.clone());
        self.submit(Task::new(TaskKind::Walk, dir.clone(), work, Step::Walked { dir }));
    }

    pub(super) fn on_listing(&mut self, dir: &str, result: TaskResult) {
        match result {
            Ok(TaskOutput::Listing(entries)) => {
                debug!("目录 {:?} 包含 {} 个条目", dir, entries.len());
                for entry in entries {
                    self.classify(entry);
                }
            }
            Err(e) if e.is_not_found() => {
                debug!("远程目录不存在，视为空: {:?}", dir);
            }
            Err(e) => self.raise(e),
            Ok(other) => self.raise(SyncError::transport(
                dir,
                format!("unexpected walk result: {other:?}"),
            )),
        }
        self.walk_ended();
    }

    fn classify(&mut self, entry: RemoteEntry) {
        let path = entry.path();
        let Some(relative) = self.relative(&path) else {
            warn!("忽略同步根之外的条目: {}", path);
            return;
        };

        let deletes = self.options.deletes();
        let known = match entry.kind {
            EntryKind::Directory => self.files.has_descendant(&relative),
            EntryKind::Object => self.files.get(&relative).is_some(),
        };
        if !known && !deletes {
            debug!("忽略清单外的远程条目: {}", relative);
            return;
        }

        self.emit(SyncEvent::EntrySeen {
            path: path.clone(),
            relative: relative.clone(),
            kind: entry.kind,
        });

        if !known {
            self.remove(relative, path, entry.kind);
            return;
        }

        match entry.kind {
            EntryKind::Directory => self.start_walk(path),
            EntryKind::Object => {
                let Some(file) = self.files.get_mut(&relative) else {
                    return;
                };
                if !file.mark_started() {
                    return;
                }
                if self.options.only_delete {
                    debug!("仅删除模式，保留 {}", relative);
                    return;
                }
                self.decide(&relative, RemoteView::from(&entry));
            }
        }
    }

    fn walk_ended(&mut self) {
        self.walks = self.walks.saturating_sub(1);
        if self.walks > 0 {
            return;
        }
        info!("远程遍历结束");
        self.flush_unsent();
        self.scheduler.finalize();
    }

    /// 远程没有出现过的文件：跳过的记为一致，其余上传
    fn flush_unsent(&mut self) {
        if self.options.only_delete {
            debug!("仅删除模式，不上传新文件");
            return;
        }

        let pending = self.files.unstarted();
        if !pending.is_empty() {
            info!("{} 个文件在远程不存在", pending.len());
        }
        for name in pending {
            let Some(file) = self.files.get_mut(name.as_str()) else {
                continue;
            };
            file.mark_started();
            if file.skip {
                let view = RemoteView {
                    size: file.size,
                    checksum: file.checksum.clone(),
                    probed: false,
                };
                self.decide(name.as_str(), view);
            } else if let Some(blocker) = self.blocking_removal(name.as_str()) {
                self.defer_send(&blocker, name);
            } else {
                self.send(name.as_str());
            }
        }
    }

    /// 远程路径相对同步根的部分；根本身或根之外返回 None
    pub(super) fn relative(&self, path: &str) -> Option<String> {
        let path = path.trim_end_matches('/');
        let rest = if self.root.is_empty() {
            path.trim_start_matches('/')
        } else {
            path.strip_prefix(self.root.as_str())?.strip_prefix('/')?
        };
        (!rest.is_empty()).then(|| rest.to_string())
    }
}
