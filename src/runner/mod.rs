//! 后台任务执行器
//!
//! 一个 `TransferAction` 对应一次 `start()`：
//! - `init()` / `finish()` / `cleanup()` 在协调线程执行
//! - `run()` 在工作线程执行，失败时经告警协议决定重试或放弃
//!
//! 状态机: `Initialized → Running → Finishing → Cleanup → Done`，
//! 取消或不可恢复的失败可从 `Running` 直接进入 `Cleanup`

use crate::alert::{AlertProtocol, DecisionPrompt, ErrorDecisionCache};
use crate::config::QueueConfig;
use crate::coordinator::QueueObserver;
use crate::job::{JobContext, JobId, JobReporter, TransferJob, TransferOptions};
use crate::marshal::panic_message;
use crate::progress::ProgressThrottler;
use crate::registry::{JobHandle, RevealedItem};
use serde::{Deserialize, Serialize};
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// 完成回调（只在任务完成时调用一次）
pub type CompletionCallback = Box<dyn FnOnce(&JobId) + Send + 'static>;

/// 执行器状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunnerState {
    Initialized,
    Running,
    Finishing,
    Cleanup,
    Done,
}

impl RunnerState {
    /// 是否允许迁移到 `next`
    pub fn can_transition_to(self, next: RunnerState) -> bool {
        use RunnerState::*;
        matches!(
            (self, next),
            (Initialized, Running)
                | (Initialized, Cleanup)
                | (Running, Finishing)
                | (Running, Cleanup)
                | (Finishing, Cleanup)
                | (Cleanup, Done)
        )
    }
}

/// 执行结果
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunOutcome {
    /// 尚未执行
    Pending,
    /// 传输成功结束
    Completed,
    /// 被取消
    Stopped,
    /// 失败后放弃，或引擎未完成即返回
    Aborted,
    /// 引擎或生命周期钩子 panic
    Faulted,
}

impl RunOutcome {
    pub fn is_completed(&self) -> bool {
        matches!(self, RunOutcome::Completed)
    }
}

/// 工作线程共享的环境
#[derive(Clone)]
pub struct WorkerEnv {
    /// 任务级失败决策
    pub alert: AlertProtocol,
    /// 条目级错误询问入口
    pub prompt: Arc<dyn DecisionPrompt>,
    /// 进度/消息上报
    pub reporter: Arc<dyn JobReporter>,
}

/// 单个任务的后台执行器
pub struct TransferAction {
    job: Arc<dyn TransferJob>,
    handle: Arc<JobHandle>,
    options: TransferOptions,
    callback: Option<CompletionCallback>,
    token: CancellationToken,
    errors: ErrorDecisionCache,
    throttler: ProgressThrottler,
    state: RunnerState,
    attempts: u32,
    outcome: RunOutcome,
}

impl TransferAction {
    pub fn new(
        job: Arc<dyn TransferJob>,
        handle: Arc<JobHandle>,
        options: TransferOptions,
        callback: Option<CompletionCallback>,
        throttler: ProgressThrottler,
    ) -> Self {
        Self {
            job,
            handle,
            options,
            callback,
            token: CancellationToken::new(),
            errors: ErrorDecisionCache::new(),
            throttler,
            state: RunnerState::Initialized,
            attempts: 0,
            outcome: RunOutcome::Pending,
        }
    }

    pub fn id(&self) -> &JobId {
        self.job.id()
    }

    pub fn job(&self) -> &Arc<dyn TransferJob> {
        &self.job
    }

    pub fn handle(&self) -> &Arc<JobHandle> {
        &self.handle
    }

    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    pub fn state(&self) -> RunnerState {
        self.state
    }

    pub fn outcome(&self) -> RunOutcome {
        self.outcome
    }

    /// 已执行次数（包含重试）
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// 强制结束（钩子 panic 时使用）
    pub(crate) fn fault(&mut self) {
        self.outcome = RunOutcome::Faulted;
    }

    fn transition(&mut self, next: RunnerState) {
        if self.state == next {
            return;
        }
        if !self.state.can_transition_to(next) {
            error!(
                "任务 {} 非法状态迁移: {:?} -> {:?}",
                self.job.id(),
                self.state,
                next
            );
            return;
        }
        debug!("任务 {} 执行器状态: {:?} -> {:?}", self.job.id(), self.state, next);
        self.state = next;
    }

    /// 协调线程：执行前准备，按配置把观察界面提到前台
    pub fn init(&mut self, observer: &dyn QueueObserver, config: &QueueConfig) {
        self.transition(RunnerState::Running);
        if config.order_front_on_start {
            observer.show();
        }
    }

    /// 工作线程：执行传输，失败时询问是否重试
    pub fn run(&mut self, env: &WorkerEnv) -> RunOutcome {
        let id = self.job.id().clone();
        let job = Arc::clone(&self.job);

        let outcome = loop {
            if self.token.is_cancelled() {
                break RunOutcome::Stopped;
            }
            self.attempts += 1;
            self.throttler.reset();
            info!("任务 {} 开始执行 (第 {} 次)", id, self.attempts);

            let result = {
                let mut ctx = JobContext::new(
                    &id,
                    self.options,
                    self.attempts,
                    &self.token,
                    env.reporter.as_ref(),
                    &mut self.throttler,
                    &mut self.errors,
                    env.prompt.as_ref(),
                );
                panic::catch_unwind(AssertUnwindSafe(|| job.run(&mut ctx)))
            };

            match result {
                Ok(Ok(true)) => break RunOutcome::Completed,
                Ok(Ok(false)) => {
                    break if self.token.is_cancelled() {
                        RunOutcome::Stopped
                    } else {
                        RunOutcome::Aborted
                    };
                }
                Ok(Err(failure)) => {
                    // 已请求取消时不再询问
                    if self.token.is_cancelled() {
                        break RunOutcome::Stopped;
                    }
                    warn!("任务 {} 传输失败: {} ({:?})", id, failure, failure.kind());
                    if !env.alert.decide(job.as_ref(), &failure) {
                        break RunOutcome::Aborted;
                    }
                }
                Err(payload) => {
                    error!("任务 {} 传输引擎异常: {}", id, panic_message(payload.as_ref()));
                    break RunOutcome::Faulted;
                }
            }
        };

        self.outcome = outcome;
        if outcome.is_completed() {
            self.transition(RunnerState::Finishing);
        } else {
            self.transition(RunnerState::Cleanup);
        }
        outcome
    }

    /// 协调线程：任务完成时调用完成回调（最多一次）
    pub fn finish(&mut self) {
        if !self.outcome.is_completed() {
            return;
        }
        if let Some(callback) = self.callback.take() {
            callback(self.job.id());
        }
    }

    /// 协调线程：收尾，总会执行
    ///
    /// `running` 为除本任务外仍在运行的任务数
    pub fn cleanup(&mut self, observer: &dyn QueueObserver, config: &QueueConfig, running: usize) {
        self.transition(RunnerState::Cleanup);
        if !self.outcome.is_completed() {
            return;
        }
        if self.job.direction().creates_local_items() {
            let items: Vec<RevealedItem> = self.handle.roots().iter().map(RevealedItem::new).collect();
            if !items.is_empty() {
                observer.reveal(&items);
            }
        }
        if config.order_back_on_stop && running == 0 {
            observer.hide();
        }
    }

    /// 结束
    pub fn done(&mut self) {
        self.transition(RunnerState::Done);
        info!(
            "任务 {} 执行结束: {:?}, 共执行 {} 次",
            self.job.id(),
            self.outcome,
            self.attempts
        );
    }
}

impl std::fmt::Debug for TransferAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransferAction")
            .field("job", self.job.id())
            .field("state", &self.state)
            .field("attempts", &self.attempts)
            .field("outcome", &self.outcome)
            .finish()
    }
}
