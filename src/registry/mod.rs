//! 任务注册表与观察者句柄
//!
//! 两者都归协调线程独占，其他线程只能通过 `Marshaler` 访问

mod binding;
mod jobs;

pub use binding::{ControllerBinding, JobHandle, RevealedItem};
pub use jobs::{JobRegistry, RegisteredJob, RegistryListener};
