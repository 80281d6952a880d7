//! 观察界面接口与事件通道实现
//!
//! 所有回调都在协调线程上调用，实现方不需要自行加锁保证顺序

use crate::alert::{Decision, DecisionRequest};
use crate::job::{JobId, JobStatus};
use crate::progress::{DefaultStatusFormatter, ProgressSnapshot, StatusFormatter};
use crate::registry::{JobHandle, RevealedItem};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::mpsc;
use tracing::warn;

/// 观察界面
pub trait QueueObserver: Send + Sync {
    /// 任务加入队列
    fn added(&self, _id: &JobId) {}

    /// 任务移出队列
    fn removed(&self, _id: &JobId) {}

    /// 队列中某个任务的状态变化
    fn changed(&self, _id: &JobId) {}

    /// 进度快照刷新
    fn on_progress(&self, _handle: &JobHandle, _snapshot: &ProgressSnapshot) {}

    /// 任务开始/停止
    fn on_status(&self, _handle: &JobHandle, _status: JobStatus) {}

    /// 活动消息
    fn message(&self, _handle: &JobHandle, _message: &str) {}

    /// 协议会话日志（只在 `is_transcript_visible` 为 true 时调用）
    fn transcript(&self, _handle: &JobHandle, _request: bool, _line: &str) {}

    /// 日志面板是否展开
    fn is_transcript_visible(&self) -> bool {
        false
    }

    /// 显示并置于前台
    fn show(&self) {}

    /// 收起
    fn hide(&self) {}

    /// 展示本地条目
    fn reveal(&self, _items: &[RevealedItem]) {}

    /// 界面当前是否可见
    fn is_visible(&self) -> bool {
        true
    }

    /// 同步询问用户（阻塞协调线程直到得到答复）
    fn request_decision(&self, request: DecisionRequest) -> Decision;
}

/// 事件优先级
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum EventPriority {
    /// 低优先级：进度、消息
    Low = 0,
    /// 中优先级：状态变更
    Medium = 1,
    /// 高优先级：增删、询问等关键事件
    High = 2,
}

/// 队列事件
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event_type", rename_all = "snake_case")]
pub enum QueueEvent {
    /// 任务加入
    Added { job_id: JobId },
    /// 任务移除
    Removed { job_id: JobId },
    /// 队列中任务变化
    Changed { job_id: JobId },
    /// 进度更新
    Progress {
        job_id: JobId,
        snapshot: ProgressSnapshot,
        status_text: String,
    },
    /// 状态变更
    StatusChanged { job_id: JobId, status: JobStatus },
    /// 活动消息
    Message { job_id: JobId, message: String },
    /// 协议会话日志
    Transcript {
        job_id: JobId,
        request: bool,
        line: String,
    },
    /// 界面显示
    Shown,
    /// 界面收起
    Hidden,
    /// 展示本地条目
    Revealed { items: Vec<RevealedItem> },
    /// 用户决策
    Decided {
        request: DecisionRequest,
        decision: Decision,
    },
}

impl QueueEvent {
    /// 关联的任务 ID（界面级事件为 None）
    pub fn job_id(&self) -> Option<&JobId> {
        match self {
            QueueEvent::Added { job_id }
            | QueueEvent::Removed { job_id }
            | QueueEvent::Changed { job_id }
            | QueueEvent::Progress { job_id, .. }
            | QueueEvent::StatusChanged { job_id, .. }
            | QueueEvent::Message { job_id, .. }
            | QueueEvent::Transcript { job_id, .. } => Some(job_id),
            QueueEvent::Shown
            | QueueEvent::Hidden
            | QueueEvent::Revealed { .. }
            | QueueEvent::Decided { .. } => None,
        }
    }

    pub fn priority(&self) -> EventPriority {
        match self {
            QueueEvent::Progress { .. } | QueueEvent::Message { .. } | QueueEvent::Transcript { .. } => {
                EventPriority::Low
            }
            QueueEvent::StatusChanged { .. }
            | QueueEvent::Changed { .. }
            | QueueEvent::Shown
            | QueueEvent::Hidden
            | QueueEvent::Revealed { .. } => EventPriority::Medium,
            QueueEvent::Added { .. } | QueueEvent::Removed { .. } | QueueEvent::Decided { .. } => {
                EventPriority::High
            }
        }
    }

    pub fn event_type_name(&self) -> &'static str {
        match self {
            QueueEvent::Added { .. } => "added",
            QueueEvent::Removed { .. } => "removed",
            QueueEvent::Changed { .. } => "changed",
            QueueEvent::Progress { .. } => "progress",
            QueueEvent::StatusChanged { .. } => "status_changed",
            QueueEvent::Message { .. } => "message",
            QueueEvent::Transcript { .. } => "transcript",
            QueueEvent::Shown => "shown",
            QueueEvent::Hidden => "hidden",
            QueueEvent::Revealed { .. } => "revealed",
            QueueEvent::Decided { .. } => "decided",
        }
    }
}

/// 决策策略
pub type DecisionPolicy = Box<dyn Fn(&DecisionRequest) -> Decision + Send + Sync>;

/// 把所有通知转发到 mpsc 通道的观察者
///
/// 决策由构造时传入的策略同步给出，结果同样作为事件发出
pub struct EventChannelObserver {
    tx: mpsc::UnboundedSender<QueueEvent>,
    policy: DecisionPolicy,
    formatter: Box<dyn StatusFormatter>,
    visible: AtomicBool,
    transcript_visible: AtomicBool,
}

impl EventChannelObserver {
    pub fn new<F>(policy: F) -> (Self, mpsc::UnboundedReceiver<QueueEvent>)
    where
        F: Fn(&DecisionRequest) -> Decision + Send + Sync + 'static,
    {
        let (tx, rx) = mpsc::unbounded_channel();
        let observer = Self {
            tx,
            policy: Box::new(policy),
            formatter: Box::new(DefaultStatusFormatter),
            visible: AtomicBool::new(true),
            transcript_visible: AtomicBool::new(false),
        };
        (observer, rx)
    }

    /// 替换状态文字格式化器
    pub fn with_formatter(mut self, formatter: impl StatusFormatter + 'static) -> Self {
        self.formatter = Box::new(formatter);
        self
    }

    /// 展开/收起日志面板
    pub fn set_transcript_visible(&self, visible: bool) {
        self.transcript_visible.store(visible, Ordering::SeqCst);
    }

    fn emit(&self, event: QueueEvent) {
        if self.tx.send(event).is_err() {
            warn!("事件接收端已关闭，丢弃事件");
        }
    }
}

impl QueueObserver for EventChannelObserver {
    fn added(&self, id: &JobId) {
        self.emit(QueueEvent::Added { job_id: id.clone() });
    }

    fn removed(&self, id: &JobId) {
        self.emit(QueueEvent::Removed { job_id: id.clone() });
    }

    fn changed(&self, id: &JobId) {
        self.emit(QueueEvent::Changed { job_id: id.clone() });
    }

    fn on_progress(&self, handle: &JobHandle, snapshot: &ProgressSnapshot) {
        self.emit(QueueEvent::Progress {
            job_id: handle.id().clone(),
            snapshot: snapshot.clone(),
            status_text: self.formatter.format(&snapshot.status),
        });
    }

    fn on_status(&self, handle: &JobHandle, status: JobStatus) {
        self.emit(QueueEvent::StatusChanged {
            job_id: handle.id().clone(),
            status,
        });
    }

    fn message(&self, handle: &JobHandle, message: &str) {
        self.emit(QueueEvent::Message {
            job_id: handle.id().clone(),
            message: message.to_string(),
        });
    }

    fn transcript(&self, handle: &JobHandle, request: bool, line: &str) {
        self.emit(QueueEvent::Transcript {
            job_id: handle.id().clone(),
            request,
            line: line.to_string(),
        });
    }

    fn is_transcript_visible(&self) -> bool {
        self.transcript_visible.load(Ordering::SeqCst)
    }

    fn show(&self) {
        self.visible.store(true, Ordering::SeqCst);
        self.emit(QueueEvent::Shown);
    }

    fn hide(&self) {
        self.visible.store(false, Ordering::SeqCst);
        self.emit(QueueEvent::Hidden);
    }

    fn reveal(&self, items: &[RevealedItem]) {
        self.emit(QueueEvent::Revealed {
            items: items.to_vec(),
        });
    }

    fn is_visible(&self) -> bool {
        self.visible.load(Ordering::SeqCst)
    }

    fn request_decision(&self, request: DecisionRequest) -> Decision {
        let decision = (self.policy)(&request);
        self.emit(QueueEvent::Decided { request, decision });
        decision
    }
}
