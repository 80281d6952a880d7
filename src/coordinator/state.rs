//! 协调线程独占的队列状态
//!
//! 这里的方法只会在协调线程上被调用（通过 `Marshaler` 投递），
//! 因此不需要任何锁

use crate::alert::{Decision, DecisionPrompt, DecisionRequest};
use crate::config::QueueConfig;
use crate::coordinator::observer::QueueObserver;
use crate::coordinator::store::JobStore;
use crate::coordinator::ThrottleOutcome;
use crate::error::InvalidOperation;
use crate::job::{Bandwidth, JobId, JobReporter, JobStatus, TransferJob, TransferOptions};
use crate::marshal::{panic_message, Marshaler};
use crate::progress::{ProgressAggregator, ProgressInput, ProgressThrottler};
use crate::registry::{ControllerBinding, JobHandle, JobRegistry};
use crate::runner::{CompletionCallback, TransferAction, WorkerEnv};
use std::collections::{HashMap, VecDeque};
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

pub(crate) struct QueueState {
    pub(crate) config: QueueConfig,
    pub(crate) registry: JobRegistry,
    pub(crate) binding: ControllerBinding,
    aggregator: ProgressAggregator,
    observer: Arc<dyn QueueObserver>,
    store: Arc<dyn JobStore>,
    env: WorkerEnv,
    marshaler: Marshaler<QueueState>,
    /// 运行中任务的取消令牌
    active: HashMap<JobId, CancellationToken>,
    /// 等待传输位的执行器
    waiting: VecDeque<TransferAction>,
    max_transfers: usize,
}

impl QueueState {
    pub(crate) fn new(
        config: QueueConfig,
        registry: JobRegistry,
        observer: Arc<dyn QueueObserver>,
        store: Arc<dyn JobStore>,
        env: WorkerEnv,
        marshaler: Marshaler<QueueState>,
    ) -> Self {
        let max_transfers = config.max_transfers.max(1);
        Self {
            aggregator: ProgressAggregator::new(config.progress_bound),
            config,
            registry,
            binding: ControllerBinding::new(),
            observer,
            store,
            env,
            marshaler,
            active: HashMap::new(),
            waiting: VecDeque::new(),
            max_transfers,
        }
    }

    /// 提交任务：已有活动执行器时拒绝，传输位已满时排队
    pub(crate) fn start(
        &mut self,
        job: Arc<dyn TransferJob>,
        options: TransferOptions,
        callback: Option<CompletionCallback>,
    ) -> Result<Arc<JobHandle>, InvalidOperation> {
        options.validate()?;
        let id = job.id().clone();
        if self.is_active(&id) {
            warn!("任务 {} 已在执行或排队中，跳过重复提交", id);
            return Err(InvalidOperation::AlreadyActive(id));
        }

        // 注册表中已有同 ID 任务时沿用已登记的实例
        let job = self.registry.get(&id).unwrap_or(job);
        if options.resume && job.is_complete() {
            warn!("任务 {} 已完成，拒绝续传", id);
            return Err(InvalidOperation::AlreadyComplete(id));
        }
        if !self.registry.contains(&id) {
            self.registry.add(Arc::clone(&job));
        }
        let handle = self.binding.get_or_create(job.as_ref());
        let action = TransferAction::new(
            job,
            Arc::clone(&handle),
            options,
            callback,
            ProgressThrottler::with_millis(self.config.progress_throttle_ms),
        );

        if self.active.len() < self.max_transfers {
            self.launch(action);
        } else {
            info!(
                "传输位已满 ({}/{})，任务 {} 进入等待队列",
                self.active.len(),
                self.max_transfers,
                id
            );
            self.waiting.push_back(action);
            self.set_status(&id, JobStatus::Queued);
        }
        Ok(handle)
    }

    fn is_active(&self, id: &JobId) -> bool {
        self.active.contains_key(id) || self.waiting.iter().any(|action| action.id() == id)
    }

    /// 运行 `init()` 并把执行器交给新的工作线程
    fn launch(&mut self, mut action: TransferAction) {
        let id = action.id().clone();
        let observer = Arc::clone(&self.observer);
        let init = panic::catch_unwind(AssertUnwindSafe(|| action.init(observer.as_ref(), &self.config)));
        if let Err(payload) = init {
            error!("任务 {} init 异常: {}", id, panic_message(payload.as_ref()));
            action.fault();
            self.settle(action);
            return;
        }

        self.active.insert(id.clone(), action.token().clone());
        self.set_status(&id, JobStatus::Running);

        let env = self.env.clone();
        let marshaler = self.marshaler.clone();
        let worker_id = id.clone();
        let spawned = thread::Builder::new()
            .name(format!("transfer-{}", id.short()))
            .spawn(move || {
                let mut action = action;
                action.run(&env);
                if let Err(e) = marshaler.post(move |state: &mut QueueState| state.complete_action(action)) {
                    warn!("任务 {} 结束时协调线程不可用: {}", worker_id, e);
                }
            });

        if let Err(e) = spawned {
            error!("任务 {} 工作线程启动失败: {}", id, e);
            self.active.remove(&id);
            self.set_status(&id, JobStatus::Incomplete);
        }
    }

    /// 工作线程结束后回到协调线程：finish → cleanup → done，然后补位
    pub(crate) fn complete_action(&mut self, action: TransferAction) {
        self.active.remove(action.id());
        self.settle(action);
        self.promote();
    }

    fn settle(&mut self, mut action: TransferAction) {
        let id = action.id().clone();

        let finish = panic::catch_unwind(AssertUnwindSafe(|| action.finish()));
        if let Err(payload) = finish {
            error!("任务 {} finish 异常: {}", id, panic_message(payload.as_ref()));
            action.fault();
        }

        let status = if action.outcome().is_completed() {
            JobStatus::Complete
        } else {
            JobStatus::Incomplete
        };
        self.set_status(&id, status);

        let observer = Arc::clone(&self.observer);
        let running = self.registry.running_count();
        let cleanup = panic::catch_unwind(AssertUnwindSafe(|| {
            action.cleanup(observer.as_ref(), &self.config, running)
        }));
        if let Err(payload) = cleanup {
            error!("任务 {} cleanup 异常: {}", id, panic_message(payload.as_ref()));
            action.fault();
            self.set_status(&id, JobStatus::Incomplete);
        }

        action.done();
    }

    /// 按空闲传输位启动等待中的任务
    fn promote(&mut self) {
        while self.active.len() < self.max_transfers {
            let Some(action) = self.waiting.pop_front() else {
                break;
            };
            debug!("任务 {} 从等待队列启动", action.id());
            self.launch(action);
        }
    }

    /// 更新状态并通知观察者，同时刷新进度快照
    pub(crate) fn set_status(&mut self, id: &JobId, status: JobStatus) {
        let changed = self.registry.set_status(id, status);
        if let Some(handle) = self.binding.get(id) {
            handle.set_status(status);
            if changed {
                self.observer.on_status(&handle, status);
            }
        }
        self.refresh_progress(id);
    }

    /// 重新计算进度快照
    pub(crate) fn refresh_progress(&mut self, id: &JobId) {
        let (Some(job), Some(handle)) = (self.registry.get(id), self.binding.get(id)) else {
            return;
        };
        let status = self.registry.status(id).unwrap_or(JobStatus::Queued);
        let input = ProgressInput {
            transferred: job.transferred(),
            total: job.total(),
            queued: status == JobStatus::Queued,
            running: status.is_running(),
            complete: status.is_complete(),
            direction: job.direction(),
        };
        let snapshot = self.aggregator.snapshot(&input, job.timestamp());
        handle.set_snapshot(snapshot.clone());
        self.observer.on_progress(&handle, &snapshot);
    }

    pub(crate) fn forward_message(&mut self, id: &JobId, message: &str) {
        if let Some(handle) = self.binding.get(id) {
            self.observer.message(&handle, message);
        }
    }

    /// 会话日志只在日志面板可见时转发
    pub(crate) fn forward_transcript(&mut self, id: &JobId, request: bool, line: &str) {
        if !self.observer.is_transcript_visible() {
            return;
        }
        if let Some(handle) = self.binding.get(id) {
            self.observer.transcript(&handle, request, line);
        }
    }

    /// 同步询问观察者；要求界面可见的询问在界面不可见时直接放弃
    pub(crate) fn request_decision(&mut self, request: DecisionRequest) -> Decision {
        if request.requires_visible_surface && !self.observer.is_visible() {
            debug!("观察界面不可见，放弃询问: {}", request.title);
            return Decision::unavailable();
        }
        self.observer.request_decision(request)
    }

    /// 只取消运行中的任务；排队中的任务保持原状态
    pub(crate) fn stop(&mut self, id: &JobId) -> bool {
        let Some(token) = self.active.get(id) else {
            debug!("任务 {} 未在运行，忽略停止请求", id);
            return false;
        };
        info!("停止任务: {}", id);
        token.cancel();
        if let Some(job) = self.registry.get(id) {
            job.cancel();
        }
        true
    }

    pub(crate) fn remove(&mut self, id: &JobId) -> Result<(), InvalidOperation> {
        self.registry.remove(id)?;
        self.waiting.retain(|action| action.id() != id);
        self.binding.release(id);
        info!("任务已移除: {}", id);
        Ok(())
    }

    /// 单个移除：移除后立即保存任务集合
    pub(crate) fn remove_and_save(&mut self, id: &JobId) -> Result<(), InvalidOperation> {
        self.remove(id)?;
        self.save_store();
        Ok(())
    }

    fn save_store(&self) {
        if let Err(e) = self.store.save() {
            warn!("保存任务集合失败: {:#}", e);
        }
    }

    /// 移除所有未运行且已完成的任务，然后保存任务集合
    pub(crate) fn clean_completed(&mut self) -> usize {
        let mut removed = 0;
        for id in self.registry.completed_ids() {
            match self.remove(&id) {
                Ok(()) => removed += 1,
                Err(e) => warn!("清理任务 {} 失败: {}", id, e),
            }
        }
        self.save_store();
        info!("已清理 {} 个完成的任务", removed);
        removed
    }

    pub(crate) fn set_bandwidth(&mut self, id: &JobId, bandwidth: Bandwidth) -> Result<ThrottleOutcome, InvalidOperation> {
        let job = self
            .registry
            .get(id)
            .ok_or_else(|| InvalidOperation::UnknownJob(id.clone()))?;
        if !job.direction().supports_bandwidth() {
            debug!("同步任务不支持单一限速: {}", id);
            return Ok(ThrottleOutcome::Unsupported);
        }
        job.set_bandwidth(bandwidth);
        info!("任务 {} 限速设置为 {:?}", id, bandwidth);
        Ok(ThrottleOutcome::Applied)
    }

    pub(crate) fn can_terminate(&self) -> bool {
        self.registry.running_count() == 0
    }

    /// 有任务运行时询问是否退出；确认后停止运行中的任务并取消等待中的任务
    pub(crate) fn confirm_termination(&mut self) -> bool {
        if self.can_terminate() {
            return true;
        }
        let request = DecisionRequest::new(
            "Transfer in progress",
            "There are files currently being transferred. Quit anyway?",
        )
        .with_options(["Exit", "Cancel"]);
        let decision = self.observer.request_decision(request);
        if !decision.is(0) {
            info!("用户取消退出");
            return false;
        }

        // 先清空等待队列，避免运行中的任务结束后补位
        let waiting: Vec<TransferAction> = self.waiting.drain(..).collect();
        for action in waiting {
            let id = action.id().clone();
            self.set_status(&id, JobStatus::Cancelled);
        }
        let running: Vec<JobId> = self.active.keys().cloned().collect();
        for id in running {
            self.stop(&id);
        }
        true
    }

    pub(crate) fn set_max_transfers(&mut self, max_transfers: usize) {
        self.max_transfers = max_transfers.max(1);
        info!("最大同时传输数: {}", self.max_transfers);
        self.promote();
    }

    pub(crate) fn max_transfers(&self) -> usize {
        self.max_transfers
    }

    pub(crate) fn waiting_count(&self) -> usize {
        self.waiting.len()
    }
}

/// 工作线程使用的决策入口：阻塞直到协调线程给出答复
#[derive(Clone)]
pub(crate) struct MarshaledPrompt {
    pub(crate) marshaler: Marshaler<QueueState>,
}

impl DecisionPrompt for MarshaledPrompt {
    fn prompt(&self, request: DecisionRequest) -> Decision {
        self.marshaler
            .send(move |state: &mut QueueState| state.request_decision(request))
            .unwrap_or_else(|e| {
                warn!("无法向协调线程发起询问: {}", e);
                Decision::unavailable()
            })
    }
}

/// 工作线程使用的上报入口：投递后立即返回
#[derive(Clone)]
pub(crate) struct MarshaledReporter {
    pub(crate) marshaler: Marshaler<QueueState>,
}

impl JobReporter for MarshaledReporter {
    fn progress(&self, id: &JobId) {
        let id = id.clone();
        let _ = self
            .marshaler
            .post(move |state: &mut QueueState| state.refresh_progress(&id));
    }

    fn message(&self, id: &JobId, message: &str) {
        let id = id.clone();
        let message = message.to_string();
        let _ = self
            .marshaler
            .post(move |state: &mut QueueState| state.forward_message(&id, &message));
    }

    fn transcript(&self, id: &JobId, request: bool, line: &str) {
        let id = id.clone();
        let line = line.to_string();
        let _ = self
            .marshaler
            .post(move |state: &mut QueueState| state.forward_transcript(&id, request, &line));
    }
}
