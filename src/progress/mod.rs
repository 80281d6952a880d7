//! 进度模块
//!
//! - `aggregator.rs`: 将 64 位字节计数换算为界面安全的有界整数进度，并推导状态类别
//! - `throttle.rs`: 进度上报节流，避免事件风暴

mod aggregator;
mod throttle;

pub use aggregator::{
    format_size, DefaultStatusFormatter, ProgressAggregator, ProgressInput, ProgressSnapshot,
    StatusCategory, StatusFormatter, UI_SAFE_BOUND,
};
pub use throttle::{ProgressThrottler, DEFAULT_THROTTLE_INTERVAL_MS};
