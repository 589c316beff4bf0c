//! 删除远程多余条目

use super::engine::{rmr_work, unlink_work, Step, SyncEngine};
use crate::core::file::FileName;
use crate::core::report::{Outcome, SyncEvent};
use crate::core::task::{Task, TaskKind, TaskResult};
use crate::storage::EntryKind;
use tracing::{debug, info};

impl SyncEngine {
    /// 对象用 unlink，目录整棵删除
    pub(super) fn remove(&mut self, relative: String, path: String, kind: EntryKind) {
        if !self.delete_started {
            self.delete_started = true;
            info!("开始删除远程多余条目");
            self.emit(SyncEvent::DeleteStart);
        }

        let (task_kind, work) = match kind {
            EntryKind::Object => (TaskKind::Unlink, unlink_work(self.ctx.clone(), path.clone())),
            EntryKind::Directory => (TaskKind::Rmr, rmr_work(self.ctx.clone(), path.clone())),
        };
        debug!("删除 {} ({})", path, task_kind);
        self.removing.insert(relative.clone(), Vec::new());
        self.submit(Task::new(task_kind, path, work, Step::Deleted { relative, kind }));
    }

    /// 正在删除的路径与文件同名或是其上级目录时，返回该路径
    pub(super) fn blocking_removal(&self, name: &str) -> Option<String> {
        self.removing
            .keys()
            .find(|pending| {
                name == pending.as_str()
                    || name
                        .strip_prefix(pending.as_str())
                        .is_some_and(|rest| rest.starts_with('/'))
            })
            .cloned()
    }

    /// 上传排在删除之后
    pub(super) fn defer_send(&mut self, blocker: &str, name: FileName) {
        debug!("{} 等待 {} 删除完成后再上传", name, blocker);
        if let Some(waiting) = self.removing.get_mut(blocker) {
            waiting.push(name);
        }
    }

    pub(super) fn on_removed(&mut self, relative: String, kind: EntryKind, result: TaskResult) {
        let waiting = self.removing.remove(&relative).unwrap_or_default();
        match result {
            Err(e) if !e.is_not_found() => self.raise(e),
            _ => {
                debug!("已删除: {}", relative);
                self.emit(SyncEvent::Deleted {
                    path: relative.clone(),
                    kind,
                });
                // 与清单文件同名的目录以 "name/" 记录
                let key = if self.files.get(&relative).is_some() {
                    format!("{relative}/")
                } else {
                    relative
                };
                self.results.insert(key, Outcome::deleted());
            }
        }
        for name in waiting {
            self.send(name.as_str());
        }
    }
}
