//! 调度单元

use crate::core::checksum;
use crate::core::file::FileName;
use crate::error::SyncError;
use crate::storage::{ObjectMeta, RemoteEntry};
use futures::future::BoxFuture;
use std::fmt;

pub type TaskId = u64;

/// 任务类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskKind {
    Walk,
    Info,
    Send,
    Unlink,
    Rmr,
    GetChecksum,
}

impl TaskKind {
    /// 只读任务在模拟运行时照常执行
    pub fn is_read_only(self) -> bool {
        matches!(self, TaskKind::Walk | TaskKind::Info | TaskKind::GetChecksum)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TaskKind::Walk => "walk",
            TaskKind::Info => "info",
            TaskKind::Send => "send",
            TaskKind::Unlink => "unlink",
            TaskKind::Rmr => "rmr",
            TaskKind::GetChecksum => "getChecksum",
        }
    }
}

impl fmt::Display for TaskKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 任务产出
#[derive(Debug, Clone, PartialEq)]
pub enum TaskOutput {
    Listing(Vec<RemoteEntry>),
    Meta(ObjectMeta),
    Removed,
    Checksum(String),
    /// 模拟运行替换掉的写操作
    DryRun,
}

impl TaskOutput {
    pub(crate) fn normalized(self) -> Self {
        match self {
            TaskOutput::Meta(meta) => TaskOutput::Meta(meta.normalized()),
            TaskOutput::Checksum(raw) => match checksum::canonicalize(&raw) {
                Some(sum) => TaskOutput::Checksum(sum),
                None => TaskOutput::Checksum(String::new()),
            },
            other => other,
        }
    }
}

pub type TaskResult = Result<TaskOutput, SyncError>;
pub type TaskFuture = BoxFuture<'static, TaskResult>;

/// 一个待调度的任务；`then` 描述完成后要做的事
pub struct Task<C> {
    pub kind: TaskKind,
    pub file: Option<FileName>,
    /// 日志 / 超时事件里使用的描述，一般是远程路径
    pub label: String,
    pub work: TaskFuture,
    pub then: C,
}

impl<C> Task<C> {
    pub fn new(kind: TaskKind, label: impl Into<String>, work: TaskFuture, then: C) -> Self {
        Self {
            kind,
            file: None,
            label: label.into(),
            work,
            then,
        }
    }

    pub fn with_file(mut self, file: FileName) -> Self {
        self.file = Some(file);
        self
    }
}

impl<C: fmt::Debug> fmt::Debug for Task<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task")
            .field("kind", &self.kind)
            .field("file", &self.file)
            .field("label", &self.label)
            .field("then", &self.then)
            .finish_non_exhaustive()
    }
}

/// 已完成的任务
#[derive(Debug)]
pub struct Finished<C> {
    pub id: TaskId,
    pub kind: TaskKind,
    pub file: Option<FileName>,
    pub label: String,
    pub then: C,
    pub result: TaskResult,
}
