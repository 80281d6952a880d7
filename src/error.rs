//! 错误类型定义
//!
//! - `InvalidOperation`：调用方违反本地约定，调用点立即拒绝，不会重试
//! - `CoordinatorError`：协调器对外 API 的统一错误

use crate::job::JobId;
use crate::marshal::MarshalError;
use thiserror::Error;

/// 非法操作（本地约定违例）
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InvalidOperation {
    /// 同时请求续传与重新传输
    #[error("不能同时请求续传与重新传输")]
    ConflictingOptions,
    /// 任务正在运行，不允许移除
    #[error("任务正在运行，无法移除: {0}")]
    JobRunning(JobId),
    /// 任务已有活动的后台执行器
    #[error("任务已在执行或排队中: {0}")]
    AlreadyActive(JobId),
    /// 任务已完成，不能续传
    #[error("任务已完成，无法续传: {0}")]
    AlreadyComplete(JobId),
    /// 未注册的任务
    #[error("任务不存在: {0}")]
    UnknownJob(JobId),
}

/// 协调器错误
#[derive(Debug, Error)]
pub enum CoordinatorError {
    #[error(transparent)]
    Invalid(#[from] InvalidOperation),
    #[error(transparent)]
    Marshal(#[from] MarshalError),
    #[error("协调线程启动失败: {0}")]
    Spawn(#[from] std::io::Error),
}

impl CoordinatorError {
    /// 是否为调用方违例（而非协调线程不可用）
    pub fn is_invalid_operation(&self) -> bool {
        matches!(self, CoordinatorError::Invalid(_))
    }
}
