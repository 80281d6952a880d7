//! 协调器
//!
//! 对外提供异步 API，所有状态修改都投递到唯一的协调线程执行：
//! - `state.rs`: 协调线程独占的队列状态
//! - `observer.rs`: 观察界面接口、队列事件与事件通道观察者
//! - `store.rs`: 外部任务集合接口

mod observer;
mod state;
mod store;

pub use observer::{DecisionPolicy, EventChannelObserver, EventPriority, QueueEvent, QueueObserver};
pub use store::{JobStore, MemoryJobStore};

use crate::alert::{AlertProtocol, LoggingProbe, ReachabilityProbe};
use crate::config::QueueConfig;
use crate::error::CoordinatorError;
use crate::job::{Bandwidth, JobId, JobStatus, TransferJob, TransferOptions};
use crate::marshal::Marshaler;
use crate::progress::format_size;
use crate::registry::{JobHandle, JobRegistry};
use crate::runner::{CompletionCallback, WorkerEnv};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use state::{MarshaledPrompt, MarshaledReporter, QueueState};
use std::sync::Arc;
use std::thread::JoinHandle;
use store::{ObserverMirror, StoreMirror};
use tracing::{info, warn};

/// 限速设置结果
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ThrottleOutcome {
    /// 已应用
    Applied,
    /// 该方向不支持单一限速（同步任务）
    Unsupported,
}

/// 限速档位
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BandwidthOption {
    pub bandwidth: Bandwidth,
    pub label: String,
}

impl BandwidthOption {
    fn new(bandwidth: Bandwidth) -> Self {
        let label = match bandwidth {
            Bandwidth::Unlimited => "Unlimited".to_string(),
            Bandwidth::Limited(rate) => format!("{}/s", format_size(rate)),
        };
        Self { bandwidth, label }
    }
}

/// 协调器构建器
pub struct CoordinatorBuilder {
    config: QueueConfig,
    observer: Arc<dyn QueueObserver>,
    store: Arc<dyn JobStore>,
    probe: Arc<dyn ReachabilityProbe>,
}

impl CoordinatorBuilder {
    pub fn new(config: QueueConfig, observer: Arc<dyn QueueObserver>) -> Self {
        Self {
            config,
            observer,
            store: Arc::new(MemoryJobStore::new()),
            probe: Arc::new(LoggingProbe),
        }
    }

    /// 外部任务集合
    pub fn store(mut self, store: Arc<dyn JobStore>) -> Self {
        self.store = store;
        self
    }

    /// 网络诊断实现
    pub fn probe(mut self, probe: Arc<dyn ReachabilityProbe>) -> Self {
        self.probe = probe;
        self
    }

    /// 启动协调线程
    pub fn build(self) -> Result<Coordinator, CoordinatorError> {
        let (marshaler, main_loop) = Marshaler::<QueueState>::channel();

        let prompt = Arc::new(MarshaledPrompt {
            marshaler: marshaler.clone(),
        });
        let env = WorkerEnv {
            alert: AlertProtocol::new(prompt.clone(), self.probe),
            prompt,
            reporter: Arc::new(MarshaledReporter {
                marshaler: marshaler.clone(),
            }),
        };

        let mut registry = JobRegistry::new();
        registry.subscribe(Box::new(StoreMirror(Arc::clone(&self.store))));
        registry.subscribe(Box::new(ObserverMirror(Arc::clone(&self.observer))));

        let bandwidth_options = std::iter::once(Bandwidth::Unlimited)
            .chain(self.config.bandwidth_options.iter().map(|rate| Bandwidth::from_rate(*rate)))
            .map(BandwidthOption::new)
            .collect();

        let state = QueueState::new(
            self.config,
            registry,
            self.observer,
            self.store,
            env,
            marshaler.clone(),
        );
        let thread = main_loop.spawn("transfer-coordinator", state)?;
        info!("协调器已启动");

        Ok(Coordinator {
            marshaler,
            thread: Mutex::new(Some(thread)),
            bandwidth_options,
        })
    }
}

/// 协调器句柄
pub struct Coordinator {
    marshaler: Marshaler<QueueState>,
    thread: Mutex<Option<JoinHandle<QueueState>>>,
    bandwidth_options: Vec<BandwidthOption>,
}

impl Coordinator {
    pub fn builder(config: QueueConfig, observer: Arc<dyn QueueObserver>) -> CoordinatorBuilder {
        CoordinatorBuilder::new(config, observer)
    }

    /// 提交任务
    ///
    /// 同时请求续传和重新传输、任务已在执行/排队、或对已完成的任务续传时返回
    /// `InvalidOperation`
    pub async fn start(
        &self,
        job: Arc<dyn TransferJob>,
        options: TransferOptions,
        callback: Option<CompletionCallback>,
    ) -> Result<Arc<JobHandle>, CoordinatorError> {
        Ok(self
            .marshaler
            .request(move |state| state.start(job, options, callback))
            .await??)
    }

    /// 停止运行中的任务，其他状态下无操作；返回是否发出了取消
    pub async fn stop(&self, id: &JobId) -> Result<bool, CoordinatorError> {
        let id = id.clone();
        Ok(self.marshaler.request(move |state| state.stop(&id)).await?)
    }

    /// 移除任务（运行中拒绝），成功后保存任务集合
    pub async fn remove(&self, id: &JobId) -> Result<(), CoordinatorError> {
        let id = id.clone();
        Ok(self.marshaler.request(move |state| state.remove_and_save(&id)).await??)
    }

    /// 移除所有已完成的任务，返回移除数量
    pub async fn clean_completed(&self) -> Result<usize, CoordinatorError> {
        Ok(self.marshaler.request(|state| state.clean_completed()).await?)
    }

    /// 设置限速
    pub async fn set_bandwidth(&self, id: &JobId, bandwidth: Bandwidth) -> Result<ThrottleOutcome, CoordinatorError> {
        let id = id.clone();
        Ok(self
            .marshaler
            .request(move |state| state.set_bandwidth(&id, bandwidth))
            .await??)
    }

    /// 没有任务运行时可以直接退出
    pub async fn can_terminate(&self) -> Result<bool, CoordinatorError> {
        Ok(self.marshaler.request(|state| state.can_terminate()).await?)
    }

    /// 询问是否退出，确认后停止所有任务
    pub async fn confirm_termination(&self) -> Result<bool, CoordinatorError> {
        Ok(self.marshaler.request(|state| state.confirm_termination()).await?)
    }

    /// 调整同时运行的最大任务数（至少 1）
    pub async fn set_max_transfers(&self, max_transfers: usize) -> Result<(), CoordinatorError> {
        Ok(self
            .marshaler
            .request(move |state| state.set_max_transfers(max_transfers))
            .await?)
    }

    pub async fn max_transfers(&self) -> Result<usize, CoordinatorError> {
        Ok(self.marshaler.request(|state| state.max_transfers()).await?)
    }

    pub async fn waiting_count(&self) -> Result<usize, CoordinatorError> {
        Ok(self.marshaler.request(|state| state.waiting_count()).await?)
    }

    /// 任务的观察者句柄
    pub async fn handle(&self, id: &JobId) -> Result<Option<Arc<JobHandle>>, CoordinatorError> {
        let id = id.clone();
        Ok(self.marshaler.request(move |state| state.binding.get(&id)).await?)
    }

    pub async fn status(&self, id: &JobId) -> Result<Option<JobStatus>, CoordinatorError> {
        let id = id.clone();
        Ok(self.marshaler.request(move |state| state.registry.status(&id)).await?)
    }

    /// 所有任务及其状态（按加入顺序）
    pub async fn jobs(&self) -> Result<Vec<(JobId, JobStatus)>, CoordinatorError> {
        Ok(self
            .marshaler
            .request(|state| -> Vec<(JobId, JobStatus)> {
                state
                    .registry
                    .iter()
                    .map(|entry| (entry.job.id().clone(), entry.status))
                    .collect()
            })
            .await?)
    }

    /// 当前存在的观察者句柄数
    pub async fn handle_count(&self) -> Result<usize, CoordinatorError> {
        Ok(self.marshaler.request(|state| state.binding.len()).await?)
    }

    /// 可选的限速档位（第一项为不限速）
    pub fn bandwidth_options(&self) -> &[BandwidthOption] {
        &self.bandwidth_options
    }

    /// 关闭协调线程（已排队的消息处理完后退出）
    pub async fn shutdown(&self) -> Result<(), CoordinatorError> {
        self.marshaler.shutdown()?;
        let thread = self.thread.lock().take();
        if let Some(thread) = thread {
            let joined = tokio::task::spawn_blocking(move || thread.join()).await;
            if !matches!(joined, Ok(Ok(_))) {
                warn!("协调线程退出异常");
            }
        }
        info!("协调器已关闭");
        Ok(())
    }
}

impl Drop for Coordinator {
    fn drop(&mut self) {
        if self.thread.lock().is_some() {
            let _ = self.marshaler.shutdown();
        }
    }
}

impl std::fmt::Debug for Coordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Coordinator")
            .field("marshaler", &self.marshaler)
            .finish_non_exhaustive()
    }
}
