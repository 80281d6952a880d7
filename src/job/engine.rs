//! 传输引擎接口
//!
//! `TransferJob` 由外部引擎实现，本库只负责调度、取消和观察

use crate::alert::{DecisionPrompt, ErrorDecisionCache};
use crate::job::failure::TransferFailure;
use crate::job::types::{Bandwidth, Direction, JobId, TransferOptions};
use crate::progress::ProgressThrottler;
use chrono::{DateTime, Utc};
use std::fmt;
use std::path::PathBuf;
use std::time::Instant;
use tokio_util::sync::CancellationToken;

/// 一个传输任务
///
/// 计数器（已传输/总大小）由引擎自己的工作线程写入，协调线程无锁读取，
/// 实现方应使用原子类型保存
pub trait TransferJob: Send + Sync + fmt::Debug {
    /// 任务 ID
    fn id(&self) -> &JobId;

    /// 传输方向
    fn direction(&self) -> Direction;

    /// 根条目
    fn roots(&self) -> Vec<PathBuf>;

    /// 远端主机（网络诊断时使用）
    fn host(&self) -> &str;

    /// 执行传输（在工作线程中调用）
    ///
    /// 返回 `Ok(true)` 表示传输成功结束，`Ok(false)` 表示未完成退出
    /// （例如观察到取消），`Err` 交由告警协议决定重试或放弃
    fn run(&self, ctx: &mut JobContext<'_>) -> Result<bool, TransferFailure>;

    /// 已传输字节数
    fn transferred(&self) -> u64;

    /// 总字节数（未知时为 0）
    fn total(&self) -> u64;

    /// 是否已全部完成
    fn is_complete(&self) -> bool;

    /// 通知引擎取消（引擎在分片之间检查）
    fn cancel(&self);

    /// 当前带宽限制
    fn bandwidth(&self) -> Bandwidth;

    /// 设置带宽限制
    fn set_bandwidth(&self, bandwidth: Bandwidth);

    /// 最近一次活动时间
    fn timestamp(&self) -> Option<DateTime<Utc>>;
}

/// 工作线程向协调线程上报的通道
pub trait JobReporter: Send + Sync {
    /// 进度变化（协调线程会重新读取计数器）
    fn progress(&self, id: &JobId);

    /// 活动消息
    fn message(&self, id: &JobId, message: &str);

    /// 协议会话日志（`request` 为 true 表示发出的请求，否则为响应）
    fn transcript(&self, _id: &JobId, _request: bool, _line: &str) {}
}

/// 引擎执行上下文
///
/// 在 `run()` 期间提供取消检查、进度上报以及"跳过此错误继续"的决策入口
pub struct JobContext<'a> {
    id: &'a JobId,
    options: TransferOptions,
    attempt: u32,
    token: &'a CancellationToken,
    reporter: &'a dyn JobReporter,
    throttler: &'a mut ProgressThrottler,
    errors: &'a mut ErrorDecisionCache,
    prompt: &'a dyn DecisionPrompt,
}

impl<'a> JobContext<'a> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        id: &'a JobId,
        options: TransferOptions,
        attempt: u32,
        token: &'a CancellationToken,
        reporter: &'a dyn JobReporter,
        throttler: &'a mut ProgressThrottler,
        errors: &'a mut ErrorDecisionCache,
        prompt: &'a dyn DecisionPrompt,
    ) -> Self {
        Self {
            id,
            options,
            attempt,
            token,
            reporter,
            throttler,
            errors,
            prompt,
        }
    }

    pub fn id(&self) -> &JobId {
        self.id
    }

    pub fn options(&self) -> TransferOptions {
        self.options
    }

    /// 第几次执行（从 1 开始）
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    /// 是否已请求取消
    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// 上报进度（按节流间隔合并）
    pub fn progress(&mut self) {
        if self.throttler.should_emit(Instant::now()) {
            self.reporter.progress(self.id);
        }
    }

    /// 上报活动消息
    pub fn message(&self, message: &str) {
        self.reporter.message(self.id, message);
    }

    /// 记录一行协议会话日志
    pub fn transcript(&self, request: bool, line: &str) {
        self.reporter.transcript(self.id, request, line);
    }

    /// 单个条目出错时询问是否继续传输其余条目
    ///
    /// 用户勾选"总是"后，本任务后续同类询问直接返回缓存结果
    pub fn should_continue(&mut self, failure: &TransferFailure) -> bool {
        self.errors.decide(self.prompt, failure)
    }
}
