//! 任务注册表
//!
//! 有序保存所有已知任务及其生命周期状态，只在协调线程中修改

use crate::error::InvalidOperation;
use crate::job::{JobId, JobStatus, TransferJob};
use std::sync::Arc;
use tracing::debug;

/// 成员变化监听器
pub trait RegistryListener: Send {
    /// 任务加入注册表
    fn added(&mut self, _job: &Arc<dyn TransferJob>) {}

    /// 任务移出注册表
    fn removed(&mut self, _job: &Arc<dyn TransferJob>) {}

    /// 任务状态变化
    fn changed(&mut self, _job: &Arc<dyn TransferJob>, _status: JobStatus) {}
}

/// 已注册任务
#[derive(Debug, Clone)]
pub struct RegisteredJob {
    pub job: Arc<dyn TransferJob>,
    pub status: JobStatus,
}

/// 任务注册表
#[derive(Default)]
pub struct JobRegistry {
    jobs: Vec<RegisteredJob>,
    listeners: Vec<Box<dyn RegistryListener>>,
}

impl JobRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 添加监听器
    pub fn subscribe(&mut self, listener: Box<dyn RegistryListener>) {
        self.listeners.push(listener);
    }

    /// 添加任务（已存在时返回 false，不重复加入）
    pub fn add(&mut self, job: Arc<dyn TransferJob>) -> bool {
        if self.contains(job.id()) {
            return false;
        }
        debug!("注册任务: {}", job.id());
        self.jobs.push(RegisteredJob {
            job: Arc::clone(&job),
            status: JobStatus::Queued,
        });
        for listener in self.listeners.iter_mut() {
            listener.added(&job);
        }
        true
    }

    pub fn contains(&self, id: &JobId) -> bool {
        self.position(id).is_some()
    }

    pub fn get(&self, id: &JobId) -> Option<Arc<dyn TransferJob>> {
        self.position(id).map(|idx| Arc::clone(&self.jobs[idx].job))
    }

    pub fn status(&self, id: &JobId) -> Option<JobStatus> {
        self.position(id).map(|idx| self.jobs[idx].status)
    }

    /// 更新状态，状态实际变化时返回 true 并通知监听器
    pub fn set_status(&mut self, id: &JobId, status: JobStatus) -> bool {
        let Some(idx) = self.position(id) else {
            return false;
        };
        let entry = &mut self.jobs[idx];
        if entry.status == status {
            return false;
        }
        debug!("任务 {} 状态: {:?} -> {:?}", id, entry.status, status);
        entry.status = status;
        let job = Arc::clone(&entry.job);
        for listener in self.listeners.iter_mut() {
            listener.changed(&job, status);
        }
        true
    }

    /// 移除任务，运行中的任务拒绝移除且不做任何修改
    pub fn remove(&mut self, id: &JobId) -> Result<Arc<dyn TransferJob>, InvalidOperation> {
        let idx = self
            .position(id)
            .ok_or_else(|| InvalidOperation::UnknownJob(id.clone()))?;
        if self.jobs[idx].status.is_running() {
            return Err(InvalidOperation::JobRunning(id.clone()));
        }
        let entry = self.jobs.remove(idx);
        debug!("移除任务: {}", id);
        for listener in self.listeners.iter_mut() {
            listener.removed(&entry.job);
        }
        Ok(entry.job)
    }

    pub fn running_count(&self) -> usize {
        self.jobs.iter().filter(|entry| entry.status.is_running()).count()
    }

    /// 未运行且已完成的任务
    pub fn completed_ids(&self) -> Vec<JobId> {
        self.jobs
            .iter()
            .filter(|entry| !entry.status.is_running() && entry.status.is_complete())
            .map(|entry| entry.job.id().clone())
            .collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &RegisteredJob> {
        self.jobs.iter()
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    fn position(&self, id: &JobId) -> Option<usize> {
        self.jobs.iter().position(|entry| entry.job.id() == id)
    }
}

impl std::fmt::Debug for JobRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobRegistry")
            .field("jobs", &self.jobs.len())
            .field("listeners", &self.listeners.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::{Direction, SimulatedTransfer};
    use parking_lot::Mutex;

    #[derive(Clone, Default)]
    struct EventLog(Arc<Mutex<Vec<String>>>);

    impl RegistryListener for EventLog {
        fn added(&mut self, job: &Arc<dyn TransferJob>) {
            self.0.lock().push(format!("added {}", job.id()));
        }

        fn removed(&mut self, job: &Arc<dyn TransferJob>) {
            self.0.lock().push(format!("removed {}", job.id()));
        }

        fn changed(&mut self, job: &Arc<dyn TransferJob>, status: JobStatus) {
            self.0.lock().push(format!("changed {} {:?}", job.id(), status));
        }
    }

    fn job() -> Arc<dyn TransferJob> {
        Arc::new(SimulatedTransfer::new(Direction::Download, 100))
    }

    #[test]
    fn test_add_is_idempotent() {
        let mut registry = JobRegistry::new();
        let log = EventLog::default();
        registry.subscribe(Box::new(log.clone()));

        let a = job();
        assert!(registry.add(Arc::clone(&a)));
        assert!(!registry.add(Arc::clone(&a)));
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.status(a.id()), Some(JobStatus::Queued));
        assert_eq!(log.0.lock().len(), 1);
    }

    #[test]
    fn test_remove_running_is_rejected() {
        let mut registry = JobRegistry::new();
        let a = job();
        registry.add(Arc::clone(&a));
        registry.set_status(a.id(), JobStatus::Running);

        assert_eq!(
            registry.remove(a.id()).unwrap_err(),
            InvalidOperation::JobRunning(a.id().clone())
        );
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.status(a.id()), Some(JobStatus::Running));

        registry.set_status(a.id(), JobStatus::Incomplete);
        assert!(registry.remove(a.id()).is_ok());
        assert!(registry.is_empty());
    }

    #[test]
    fn test_remove_unknown() {
        let mut registry = JobRegistry::new();
        let id = JobId::from("missing");
        assert_eq!(registry.remove(&id).unwrap_err(), InvalidOperation::UnknownJob(id));
    }

    #[test]
    fn test_completed_ids_and_listeners() {
        let mut registry = JobRegistry::new();
        let log = EventLog::default();
        registry.subscribe(Box::new(log.clone()));

        let a = job();
        let b = job();
        let c = job();
        for j in [&a, &b, &c] {
            registry.add(Arc::clone(j));
        }
        registry.set_status(a.id(), JobStatus::Complete);
        registry.set_status(b.id(), JobStatus::Running);
        // 重复设置相同状态不通知
        assert!(!registry.set_status(b.id(), JobStatus::Running));

        assert_eq!(registry.completed_ids(), vec![a.id().clone()]);
        assert_eq!(registry.running_count(), 1);
        assert_eq!(log.0.lock().len(), 5);
    }
}
