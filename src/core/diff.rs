//! 差异判定
//!
//! 每个文件的判定是一个小状态机：`decide` 要么直接给出结论（一致 / 上传），
//! 要么要求先补齐某一侧的摘要；补齐之后再次调用 `decide` 即完成一次状态转换。

use crate::core::file::File;
use crate::storage::{ObjectMeta, RemoteEntry};

/// 判定所需的远程元数据
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RemoteView {
    pub size: Option<u64>,
    pub checksum: Option<String>,
    /// 已经 stat 过，不会再去取远程摘要
    pub probed: bool,
}

impl RemoteView {
    /// 合并 stat 的结果
    pub fn with_stat(self, meta: ObjectMeta) -> Self {
        Self {
            size: meta.size.or(self.size),
            checksum: meta.checksum.or(self.checksum),
            probed: true,
        }
    }
}

impl From<&RemoteEntry> for RemoteView {
    fn from(entry: &RemoteEntry) -> Self {
        Self {
            size: entry.size,
            checksum: entry.checksum.clone(),
            probed: false,
        }
    }
}

/// 判定结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// 远程已一致
    Match,
    /// 需要上传
    Send,
    /// 本地摘要已知，远程未知，先 stat
    FetchRemoteChecksum,
    /// 两边都没有摘要，先调用外部摘要计算
    FetchLocalChecksum,
}

/// 按优先级判定一个文件
pub fn decide(file: &File, remote: &RemoteView, can_fetch_local: bool) -> Verdict {
    if file.skip {
        return Verdict::Match;
    }

    if let (Some(local), Some(theirs)) = (file.size, remote.size) {
        if local != theirs {
            return Verdict::Send;
        }
    }

    if let Some(local) = &file.checksum {
        return match &remote.checksum {
            Some(theirs) if theirs == local => Verdict::Match,
            Some(_) => Verdict::Send,
            None if remote.probed => Verdict::Send,
            None => Verdict::FetchRemoteChecksum,
        };
    }

    if can_fetch_local {
        return Verdict::FetchLocalChecksum;
    }

    match file.size {
        None => Verdict::Send,
        Some(local) if remote.size == Some(local) => Verdict::Match,
        Some(_) => Verdict::Send,
    }
}
