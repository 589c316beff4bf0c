//! 同步结果与事件

use crate::core::file::FileStatus;
use crate::error::SyncError;
use crate::storage::EntryKind;
use chrono::{DateTime, Utc};
use serde::{Serialize, Serializer};
use std::collections::BTreeMap;
use std::time::Duration;
use uuid::Uuid;

/// 单个路径的最终结果
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Outcome {
    pub status: FileStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub checksum: Option<String>,
    #[serde(
        skip_serializing_if = "Option::is_none",
        serialize_with = "serialize_error"
    )]
    pub error: Option<SyncError>,
}

fn serialize_error<S: Serializer>(error: &Option<SyncError>, s: S) -> Result<S::Ok, S::Error> {
    match error {
        Some(e) => s.serialize_some(&e.to_string()),
        None => s.serialize_none(),
    }
}

impl Outcome {
    pub fn new(status: FileStatus, size: Option<u64>, checksum: Option<String>) -> Self {
        Self {
            status,
            size,
            checksum,
            error: None,
        }
    }

    pub fn failed(error: SyncError) -> Self {
        Self {
            status: FileStatus::Error,
            size: None,
            checksum: None,
            error: Some(error),
        }
    }

    pub fn deleted() -> Self {
        Self::new(FileStatus::Delete, None, None)
    }
}

/// 各状态计数
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Summary {
    pub sent: usize,
    pub matched: usize,
    pub deleted: usize,
    pub failed: usize,
}

/// 同步过程中的状态转换通知
#[derive(Debug, Clone)]
pub enum SyncEvent {
    /// 遍历看到一个远程条目
    EntrySeen {
        path: String,
        relative: String,
        kind: EntryKind,
    },
    /// 文件得到最终状态（sent / match / error）
    File {
        name: String,
        status: FileStatus,
        outcome: Outcome,
    },
    /// 第一次安排删除
    DeleteStart,
    /// 远程条目已删除
    Deleted { path: String, kind: EntryKind },
    /// 任务超时提示，`error` 总是 `SyncError::Timeout`
    TimedOut { label: String, error: SyncError },
    /// 顶层错误
    Error(SyncError),
    /// 同步结束，每次运行恰好一次
    Complete { summary: Summary },
}

/// 同步报告
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncReport {
    pub run_id: Uuid,
    pub root: String,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub dry_run: bool,
    pub results: BTreeMap<String, Outcome>,
    #[serde(serialize_with = "serialize_error")]
    pub first_error: Option<SyncError>,
}

impl SyncReport {
    pub fn summary(&self) -> Summary {
        let mut summary = Summary::default();
        for outcome in self.results.values() {
            match outcome.status {
                FileStatus::Sent => summary.sent += 1,
                FileStatus::Match => summary.matched += 1,
                FileStatus::Delete => summary.deleted += 1,
                FileStatus::Error => summary.failed += 1,
                FileStatus::Unset => {}
            }
        }
        summary
    }

    /// 路径 -> 摘要（只包含已知摘要的条目）
    pub fn checksums(&self) -> BTreeMap<String, String> {
        self.results
            .iter()
            .filter_map(|(k, v)| v.checksum.clone().map(|c| (k.clone(), c)))
            .collect()
    }

    /// 指定状态的路径
    pub fn paths_with(&self, status: FileStatus) -> Vec<&str> {
        self.results
            .iter()
            .filter(|(_, v)| v.status == status)
            .map(|(k, _)| k.as_str())
            .collect()
    }

    pub fn duration(&self) -> Duration {
        (self.end_time - self.start_time).to_std().unwrap_or_default()
    }
}
