//! 任务与观察者句柄的一一绑定
//!
//! 句柄在首次引用时创建，之后始终返回同一个实例；任务移除时一并销毁

use crate::job::{Direction, JobId, JobStatus, TransferJob};
use crate::progress::ProgressSnapshot;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

/// 观察者句柄
///
/// 快照与状态由协调线程写入，观察者可在任意线程读取
#[derive(Debug)]
pub struct JobHandle {
    id: JobId,
    /// 创建序号（从 1 开始，永不复用）
    serial: u64,
    direction: Direction,
    roots: Vec<PathBuf>,
    snapshot: RwLock<ProgressSnapshot>,
    status: RwLock<JobStatus>,
}

impl JobHandle {
    fn new(job: &dyn TransferJob, serial: u64) -> Self {
        Self {
            id: job.id().clone(),
            serial,
            direction: job.direction(),
            roots: job.roots(),
            snapshot: RwLock::new(ProgressSnapshot::initial()),
            status: RwLock::new(JobStatus::Queued),
        }
    }

    pub fn id(&self) -> &JobId {
        &self.id
    }

    pub fn serial(&self) -> u64 {
        self.serial
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    pub fn roots(&self) -> &[PathBuf] {
        &self.roots
    }

    /// 最近一次进度快照
    pub fn snapshot(&self) -> ProgressSnapshot {
        self.snapshot.read().clone()
    }

    pub fn status(&self) -> JobStatus {
        *self.status.read()
    }

    pub(crate) fn set_snapshot(&self, snapshot: ProgressSnapshot) {
        *self.snapshot.write() = snapshot;
    }

    pub(crate) fn set_status(&self, status: JobStatus) {
        *self.status.write() = status;
    }
}

/// 句柄绑定表
#[derive(Debug, Default)]
pub struct ControllerBinding {
    handles: HashMap<JobId, Arc<JobHandle>>,
    created: u64,
}

impl ControllerBinding {
    pub fn new() -> Self {
        Self::default()
    }

    /// 获取句柄，不存在时创建并登记
    pub fn get_or_create(&mut self, job: &dyn TransferJob) -> Arc<JobHandle> {
        match self.handles.entry(job.id().clone()) {
            Entry::Occupied(entry) => Arc::clone(entry.get()),
            Entry::Vacant(entry) => {
                self.created += 1;
                debug!("创建观察者句柄: {} (#{})", job.id(), self.created);
                let handle = Arc::new(JobHandle::new(job, self.created));
                Arc::clone(entry.insert(handle))
            }
        }
    }

    pub fn get(&self, id: &JobId) -> Option<Arc<JobHandle>> {
        self.handles.get(id).cloned()
    }

    /// 销毁句柄
    pub fn release(&mut self, id: &JobId) -> Option<Arc<JobHandle>> {
        let handle = self.handles.remove(id);
        if handle.is_some() {
            debug!("销毁观察者句柄: {}", id);
        }
        handle
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    /// 累计创建的句柄数
    pub fn created(&self) -> u64 {
        self.created
    }
}

/// 完成后需要在界面中展示的本地条目
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RevealedItem {
    pub path: PathBuf,
    /// 文件名以 "." 开头
    pub hidden: bool,
}

impl RevealedItem {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let hidden = is_hidden(&path);
        Self { path, hidden }
    }
}

fn is_hidden(path: &Path) -> bool {
    path.file_name()
        .and_then(|name| name.to_str())
        .map(|name| name.starts_with('.'))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::SimulatedTransfer;

    #[test]
    fn test_get_or_create_is_one_to_one() {
        let mut binding = ControllerBinding::new();
        let job = SimulatedTransfer::new(Direction::Upload, 10).with_root("/data/report.pdf");

        let first = binding.get_or_create(&job);
        let second = binding.get_or_create(&job);
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(binding.len(), 1);
        assert_eq!(binding.created(), 1);
        assert_eq!(first.roots(), &[PathBuf::from("/data/report.pdf")]);
        assert_eq!(first.status(), JobStatus::Queued);
        assert!(first.snapshot().indeterminate);
    }

    #[test]
    fn test_release_then_recreate_gets_new_serial() {
        let mut binding = ControllerBinding::new();
        let job = SimulatedTransfer::new(Direction::Download, 10);

        let first = binding.get_or_create(&job);
        assert!(binding.release(job.id()).is_some());
        assert!(binding.release(job.id()).is_none());
        assert!(binding.get(job.id()).is_none());

        let second = binding.get_or_create(&job);
        assert_ne!(first.serial(), second.serial());
        assert_eq!(binding.created(), 2);
    }

    #[test]
    fn test_revealed_item_hidden_flag() {
        assert!(RevealedItem::new("/home/me/.config").hidden);
        assert!(!RevealedItem::new("/home/me/notes.txt").hidden);
        assert!(!RevealedItem::new("/").hidden);
    }
}
