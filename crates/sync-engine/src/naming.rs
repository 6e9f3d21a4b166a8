//! 文件名约定
//!
//! 远程文件的状态完全由文件名编码：
//! - `<name>`：可认领
//! - `<name>.processing`：已认领，进程内无认领者时视为孤儿重新处理
//! - `<name>.FAILED`：终态，不再被发现
//! - `processed/<name>[.<时间戳>]`：已归档

use chrono::{DateTime, Utc};

pub const PROCESSING_SUFFIX: &str = ".processing";
pub const FAILED_SUFFIX: &str = ".FAILED";
pub const ARCHIVE_DIR: &str = "processed";

/// 目录中条目名的生命周期状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryName<'a> {
    Bare(&'a str),
    Processing(&'a str),
    Failed,
}

pub fn classify(name: &str) -> EntryName<'_> {
    if name.ends_with(FAILED_SUFFIX) {
        EntryName::Failed
    } else if let Some(base) = name.strip_suffix(PROCESSING_SUFFIX).filter(|b| !b.is_empty()) {
        EntryName::Processing(base)
    } else {
        EntryName::Bare(name)
    }
}

pub fn processing_name(base: &str) -> String {
    format!("{}{}", base, PROCESSING_SUFFIX)
}

/// 毫秒精度的 UTC 时间戳，如 `20260301093015123`
pub fn timestamp(now: DateTime<Utc>) -> String {
    now.format("%Y%m%d%H%M%S%3f").to_string()
}

fn with_attempt(stamp: &str, attempt: u32) -> String {
    if attempt == 0 {
        stamp.to_string()
    } else {
        format!("{}-{}", stamp, attempt)
    }
}

/// 归档名候选：第 0 次为原名，之后追加时间戳（必要时再加序号）
pub fn archive_candidate(base: &str, now: DateTime<Utc>, attempt: u32) -> String {
    match attempt {
        0 => base.to_string(),
        n => format!("{}.{}", base, with_attempt(&timestamp(now), n - 1)),
    }
}

/// 失败文件名候选：`<name>.FAILED`，冲突时 `<name>.<时间戳>.FAILED`
pub fn failed_candidate(base: &str, now: DateTime<Utc>, attempt: u32) -> String {
    match attempt {
        0 => format!("{}{}", base, FAILED_SUFFIX),
        n => format!(
            "{}.{}{}",
            base,
            with_attempt(&timestamp(now), n - 1),
            FAILED_SUFFIX
        ),
    }
}

/// 导出文件名候选：`<prefix>_<时间戳>.csv`
pub fn export_candidate(prefix: &str, now: DateTime<Utc>, attempt: u32) -> String {
    match attempt {
        0 => format!("{}_{}.csv", prefix, timestamp(now)),
        n => format!("{}_{}_{}.csv", prefix, timestamp(now), n),
    }
}
