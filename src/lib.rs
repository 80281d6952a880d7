// Transfer Queue Library
// 后台传输任务协调与进度/告警通知核心库

// 配置管理模块
pub mod config;

// 日志模块
pub mod logging;

// 错误类型
pub mod error;

// 传输任务（外部引擎接口）
pub mod job;

// 进度换算模块
pub mod progress;

// 协调线程消息派发
pub mod marshal;

// 失败告警与决策缓存
pub mod alert;

// 任务注册表与观察者句柄绑定
pub mod registry;

// 后台任务执行器
pub mod runner;

// 协调器（对外 API）
pub mod coordinator;

// 导出常用类型
pub use alert::{
    AlertProtocol, Decision, DecisionPrompt, DecisionRequest, ErrorDecisionCache,
    LoggingProbe, ReachabilityProbe,
};
pub use config::{AppConfig, LogConfig, QueueConfig};
pub use coordinator::{
    BandwidthOption, Coordinator, CoordinatorBuilder, EventChannelObserver, EventPriority, JobStore,
    MemoryJobStore, QueueEvent, QueueObserver, ThrottleOutcome,
};
pub use error::{CoordinatorError, InvalidOperation};
pub use job::{
    Bandwidth, Direction, FailureKind, JobContext, JobId, JobReporter, JobStatus,
    SimulatedTransfer, TransferFailure, TransferJob, TransferOptions,
};
pub use marshal::{MarshalError, Marshaler};
pub use progress::{
    DefaultStatusFormatter, ProgressAggregator, ProgressSnapshot, ProgressThrottler,
    StatusCategory, StatusFormatter, UI_SAFE_BOUND,
};
pub use registry::{ControllerBinding, JobHandle, JobRegistry, RevealedItem};
pub use runner::{CompletionCallback, RunOutcome, RunnerState, TransferAction, WorkerEnv};
