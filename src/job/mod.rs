// 传输任务模块
//
// 传输引擎本身不在本库范围内，这里只定义引擎需要实现的接口
// 以及一个用于演示和测试的模拟引擎

pub mod engine;
pub mod failure;
pub mod simulated;
pub mod types;

pub use engine::{JobContext, JobReporter, TransferJob};
pub use failure::{FailureKind, TransferFailure};
pub use simulated::SimulatedTransfer;
pub use types::{Bandwidth, Direction, JobId, JobStatus, TransferOptions};
