use crate::error::InvalidOperation;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// 任务 ID
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(String);

impl JobId {
    /// 生成新的随机任务 ID
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// 短 ID（用于线程名和日志）
    pub fn short(&self) -> &str {
        let end = self
            .0
            .char_indices()
            .nth(8)
            .map(|(idx, _)| idx)
            .unwrap_or(self.0.len());
        &self.0[..end]
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for JobId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for JobId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// 传输方向
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    /// 下载
    Download,
    /// 上传
    Upload,
    /// 服务器间复制
    Copy,
    /// 双向同步
    Sync,
}

impl Direction {
    /// 方向名称（小写）
    pub fn name(&self) -> &'static str {
        match self {
            Direction::Download => "download",
            Direction::Upload => "upload",
            Direction::Copy => "copy",
            Direction::Sync => "sync",
        }
    }

    /// 是否支持单一速率限速
    ///
    /// 同步任务同时包含上传和下载，单个速率值无法表达两个方向
    pub fn supports_bandwidth(&self) -> bool {
        !matches!(self, Direction::Sync)
    }

    /// 完成后是否在本地产生新文件
    pub fn creates_local_items(&self) -> bool {
        matches!(self, Direction::Download | Direction::Sync)
    }
}

/// 任务生命周期状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    /// 排队中（已注册，等待传输位）
    Queued,
    /// 运行中
    Running,
    /// 已完成
    Complete,
    /// 未完成（失败、被停止或放弃）
    Incomplete,
    /// 已取消（排队中被整体撤销，例如退出程序）
    Cancelled,
}

impl JobStatus {
    pub fn is_running(&self) -> bool {
        matches!(self, JobStatus::Running)
    }

    pub fn is_complete(&self) -> bool {
        matches!(self, JobStatus::Complete)
    }
}

/// 带宽限制
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Bandwidth {
    /// 不限速
    Unlimited,
    /// 限速（bytes/s）
    Limited(u64),
}

impl Bandwidth {
    /// 由速率创建，0 表示不限速
    pub fn from_rate(bytes_per_sec: u64) -> Self {
        if bytes_per_sec == 0 {
            Bandwidth::Unlimited
        } else {
            Bandwidth::Limited(bytes_per_sec)
        }
    }

    pub fn rate(&self) -> Option<u64> {
        match self {
            Bandwidth::Unlimited => None,
            Bandwidth::Limited(rate) => Some(*rate),
        }
    }
}

impl Default for Bandwidth {
    fn default() -> Self {
        Bandwidth::Unlimited
    }
}

/// 启动选项
///
/// `resume` 与 `reload` 互斥，都不设置时由引擎自行决定
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferOptions {
    /// 续传
    pub resume: bool,
    /// 重新传输（丢弃已有进度）
    pub reload: bool,
}

impl TransferOptions {
    pub fn resume() -> Self {
        Self {
            resume: true,
            reload: false,
        }
    }

    pub fn reload() -> Self {
        Self {
            resume: false,
            reload: true,
        }
    }

    /// 校验互斥标志
    pub fn validate(&self) -> Result<(), InvalidOperation> {
        if self.resume && self.reload {
            return Err(InvalidOperation::ConflictingOptions);
        }
        Ok(())
    }
}
