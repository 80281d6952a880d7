//! 进度上报节流器
//!
//! 每个后台执行器持有一个，只在工作线程内使用，因此不需要原子操作。
//! 开始、停止等状态事件不经过节流，始终刷新快照

use std::time::{Duration, Instant};

/// 默认节流间隔（毫秒）
pub const DEFAULT_THROTTLE_INTERVAL_MS: u64 = 200;

/// 进度上报节流器
#[derive(Debug, Clone)]
pub struct ProgressThrottler {
    /// 上次上报时间
    last_emit: Option<Instant>,
    /// 最小上报间隔
    interval: Duration,
}

impl ProgressThrottler {
    pub fn new(interval: Duration) -> Self {
        Self {
            last_emit: None,
            interval,
        }
    }

    pub fn with_millis(interval_ms: u64) -> Self {
        Self::new(Duration::from_millis(interval_ms))
    }

    /// 距离上次上报超过间隔时返回 true 并记录本次时间
    pub fn should_emit(&mut self, now: Instant) -> bool {
        let due = match self.last_emit {
            None => true,
            Some(last) => now.saturating_duration_since(last) >= self.interval,
        };
        if due {
            self.last_emit = Some(now);
        }
        due
    }

    /// 重置（重试前调用，保证新一轮的第一次进度立即上报）
    pub fn reset(&mut self) {
        self.last_emit = None;
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }
}

impl Default for ProgressThrottler {
    fn default() -> Self {
        Self::with_millis(DEFAULT_THROTTLE_INTERVAL_MS)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_throttler_basic() {
        let mut throttler = ProgressThrottler::with_millis(100);
        let start = Instant::now();

        // 第一次应该上报
        assert!(throttler.should_emit(start));
        // 间隔内不上报
        assert!(!throttler.should_emit(start + Duration::from_millis(50)));
        // 超过间隔后上报
        assert!(throttler.should_emit(start + Duration::from_millis(100)));
        assert!(!throttler.should_emit(start + Duration::from_millis(150)));
    }

    #[test]
    fn test_reset() {
        let mut throttler = ProgressThrottler::with_millis(1000);
        let start = Instant::now();

        assert!(throttler.should_emit(start));
        assert!(!throttler.should_emit(start));

        throttler.reset();
        assert!(throttler.should_emit(start));
    }

    #[test]
    fn test_zero_interval_always_emits() {
        let mut throttler = ProgressThrottler::with_millis(0);
        let now = Instant::now();
        assert!(throttler.should_emit(now));
        assert!(throttler.should_emit(now));
    }
}
