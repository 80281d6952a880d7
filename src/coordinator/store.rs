//! 任务集合持久化接口
//!
//! 实际落盘由外部实现，协调器只在成员变化时同步调用

use crate::coordinator::QueueObserver;
use crate::job::{JobId, JobStatus, TransferJob};
use crate::registry::RegistryListener;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// 外部任务集合
pub trait JobStore: Send + Sync {
    fn add(&self, job: &Arc<dyn TransferJob>);

    fn remove(&self, id: &JobId);

    fn contains(&self, id: &JobId) -> bool;

    /// 持久化当前集合
    fn save(&self) -> anyhow::Result<()>;
}

/// 内存实现（不落盘，记录保存次数）
#[derive(Debug, Default)]
pub struct MemoryJobStore {
    ids: Mutex<Vec<JobId>>,
    saves: AtomicUsize,
}

impl MemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn ids(&self) -> Vec<JobId> {
        self.ids.lock().clone()
    }

    pub fn saves(&self) -> usize {
        self.saves.load(Ordering::SeqCst)
    }
}

impl JobStore for MemoryJobStore {
    fn add(&self, job: &Arc<dyn TransferJob>) {
        let mut ids = self.ids.lock();
        if !ids.contains(job.id()) {
            ids.push(job.id().clone());
        }
    }

    fn remove(&self, id: &JobId) {
        self.ids.lock().retain(|existing| existing != id);
    }

    fn contains(&self, id: &JobId) -> bool {
        self.ids.lock().contains(id)
    }

    fn save(&self) -> anyhow::Result<()> {
        self.saves.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// 把注册表成员变化同步到任务集合
pub(crate) struct StoreMirror(pub Arc<dyn JobStore>);

impl RegistryListener for StoreMirror {
    fn added(&mut self, job: &Arc<dyn TransferJob>) {
        if !self.0.contains(job.id()) {
            self.0.add(job);
        }
    }

    fn removed(&mut self, job: &Arc<dyn TransferJob>) {
        self.0.remove(job.id());
    }
}

/// 把注册表成员变化转发给观察界面
pub(crate) struct ObserverMirror(pub Arc<dyn QueueObserver>);

impl RegistryListener for ObserverMirror {
    fn added(&mut self, job: &Arc<dyn TransferJob>) {
        self.0.added(job.id());
    }

    fn removed(&mut self, job: &Arc<dyn TransferJob>) {
        self.0.removed(job.id());
    }

    fn changed(&mut self, job: &Arc<dyn TransferJob>, _status: JobStatus) {
        self.0.changed(job.id());
    }
}
