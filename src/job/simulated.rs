//! 模拟传输引擎
//!
//! 按固定分片推进计数器，可在指定偏移处注入失败，用于演示程序和测试

use crate::job::engine::{JobContext, TransferJob};
use crate::job::failure::TransferFailure;
use crate::job::types::{Bandwidth, Direction, JobId};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::time::Duration;

/// 注入的失败
#[derive(Debug, Clone)]
struct ScriptedFailure {
    /// 在已传输字节数达到该偏移时触发
    offset: u64,
    failure: TransferFailure,
    /// true: 整个任务失败；false: 单个条目失败，询问是否继续
    fatal: bool,
}

/// 模拟传输任务
#[derive(Debug)]
pub struct SimulatedTransfer {
    id: JobId,
    direction: Direction,
    roots: Vec<PathBuf>,
    host: String,
    total: u64,
    chunk_size: u64,
    chunk_delay: Duration,
    transferred: AtomicU64,
    complete: AtomicBool,
    cancelled: AtomicBool,
    runs: AtomicU32,
    bandwidth: Mutex<Bandwidth>,
    timestamp: Mutex<Option<DateTime<Utc>>>,
    failures: Mutex<VecDeque<ScriptedFailure>>,
}

impl SimulatedTransfer {
    pub fn new(direction: Direction, total: u64) -> Self {
        Self {
            id: JobId::new(),
            direction,
            roots: Vec::new(),
            host: "localhost".to_string(),
            total,
            chunk_size: (total / 10).max(1),
            chunk_delay: Duration::from_millis(5),
            transferred: AtomicU64::new(0),
            complete: AtomicBool::new(false),
            cancelled: AtomicBool::new(false),
            runs: AtomicU32::new(0),
            bandwidth: Mutex::new(Bandwidth::Unlimited),
            timestamp: Mutex::new(None),
            failures: Mutex::new(VecDeque::new()),
        }
    }

    /// 设置分片大小和每个分片的耗时
    pub fn with_chunks(mut self, chunk_size: u64, chunk_delay: Duration) -> Self {
        self.chunk_size = chunk_size.max(1);
        self.chunk_delay = chunk_delay;
        self
    }

    pub fn with_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.roots.push(root.into());
        self
    }

    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    /// 在指定偏移处让整个任务失败一次
    pub fn fail_at(self, offset: u64, failure: TransferFailure) -> Self {
        self.failures.lock().push_back(ScriptedFailure {
            offset,
            failure,
            fatal: true,
        });
        self
    }

    /// 在指定偏移处产生一个可跳过的条目错误
    pub fn skippable_error_at(self, offset: u64, failure: TransferFailure) -> Self {
        self.failures.lock().push_back(ScriptedFailure {
            offset,
            failure,
            fatal: false,
        });
        self
    }

    /// `run()` 被调用的次数
    pub fn runs(&self) -> u32 {
        self.runs.load(Ordering::SeqCst)
    }

    fn take_due_failure(&self, done: u64) -> Option<ScriptedFailure> {
        let mut failures = self.failures.lock();
        match failures.front() {
            Some(next) if next.offset <= done => failures.pop_front(),
            _ => None,
        }
    }

    /// 按带宽限制计算一个分片的耗时
    fn pace(&self, bytes: u64) -> Duration {
        match *self.bandwidth.lock() {
            Bandwidth::Unlimited => self.chunk_delay,
            Bandwidth::Limited(rate) => {
                let limited = Duration::from_secs_f64(bytes as f64 / rate as f64);
                limited.max(self.chunk_delay)
            }
        }
    }
}

impl TransferJob for SimulatedTransfer {
    fn id(&self) -> &JobId {
        &self.id
    }

    fn direction(&self) -> Direction {
        self.direction
    }

    fn roots(&self) -> Vec<PathBuf> {
        self.roots.clone()
    }

    fn host(&self) -> &str {
        &self.host
    }

    fn run(&self, ctx: &mut JobContext<'_>) -> Result<bool, TransferFailure> {
        self.runs.fetch_add(1, Ordering::SeqCst);
        self.cancelled.store(false, Ordering::SeqCst);

        if ctx.options().reload {
            self.transferred.store(0, Ordering::SeqCst);
            self.complete.store(false, Ordering::SeqCst);
        }
        ctx.message(&format!("Transferring to {}", self.host));
        ctx.transcript(
            true,
            &format!("{:?} {} bytes from offset {}", self.direction, self.total, self.transferred()),
        );

        loop {
            if ctx.is_cancelled() || self.cancelled.load(Ordering::SeqCst) {
                return Ok(false);
            }

            let done = self.transferred.load(Ordering::SeqCst);
            if done >= self.total {
                break;
            }

            if let Some(scripted) = self.take_due_failure(done) {
                if scripted.fatal {
                    return Err(scripted.failure);
                }
                if !ctx.should_continue(&scripted.failure) {
                    return Ok(false);
                }
            }

            let bytes = self.chunk_size.min(self.total - done);
            std::thread::sleep(self.pace(bytes));
            self.transferred.fetch_add(bytes, Ordering::SeqCst);
            *self.timestamp.lock() = Some(Utc::now());
            ctx.progress();
        }

        self.complete.store(true, Ordering::SeqCst);
        ctx.transcript(false, "226 Transfer complete");
        Ok(true)
    }

    fn transferred(&self) -> u64 {
        self.transferred.load(Ordering::SeqCst)
    }

    fn total(&self) -> u64 {
        self.total
    }

    fn is_complete(&self) -> bool {
        self.complete.load(Ordering::SeqCst)
    }

    fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    fn bandwidth(&self) -> Bandwidth {
        *self.bandwidth.lock()
    }

    fn set_bandwidth(&self, bandwidth: Bandwidth) {
        *self.bandwidth.lock() = bandwidth;
    }

    fn timestamp(&self) -> Option<DateTime<Utc>> {
        *self.timestamp.lock()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alert::{Decision, DecisionPrompt, DecisionRequest, ErrorDecisionCache};
    use crate::job::engine::JobReporter;
    use crate::job::types::TransferOptions;
    use crate::progress::ProgressThrottler;
    use std::sync::atomic::AtomicUsize;
    use tokio_util::sync::CancellationToken;

    #[derive(Default)]
    struct CountingReporter {
        progress: AtomicUsize,
    }

    impl JobReporter for CountingReporter {
        fn progress(&self, _id: &JobId) {
            self.progress.fetch_add(1, Ordering::SeqCst);
        }

        fn message(&self, _id: &JobId, _message: &str) {}
    }

    struct FixedPrompt(usize);

    impl DecisionPrompt for FixedPrompt {
        fn prompt(&self, _request: DecisionRequest) -> Decision {
            Decision::choose(self.0)
        }
    }

    fn run_once(job: &SimulatedTransfer, token: &CancellationToken, choice: usize) -> Result<bool, TransferFailure> {
        let reporter = CountingReporter::default();
        let mut throttler = ProgressThrottler::with_millis(0);
        let mut errors = ErrorDecisionCache::new();
        let prompt = FixedPrompt(choice);
        let id = job.id().clone();
        let mut ctx = JobContext::new(
            &id,
            TransferOptions::default(),
            1,
            token,
            &reporter,
            &mut throttler,
            &mut errors,
            &prompt,
        );
        job.run(&mut ctx)
    }

    #[test]
    fn test_runs_to_completion() {
        let job = SimulatedTransfer::new(Direction::Download, 1000).with_chunks(100, Duration::ZERO);
        let token = CancellationToken::new();

        assert_eq!(run_once(&job, &token, 0), Ok(true));
        assert!(job.is_complete());
        assert_eq!(job.transferred(), 1000);
        assert!(job.timestamp().is_some());
    }

    #[test]
    fn test_cancelled_before_start() {
        let job = SimulatedTransfer::new(Direction::Upload, 1000).with_chunks(100, Duration::ZERO);
        let token = CancellationToken::new();
        token.cancel();

        assert_eq!(run_once(&job, &token, 0), Ok(false));
        assert!(!job.is_complete());
        assert_eq!(job.transferred(), 0);
    }

    #[test]
    fn test_fatal_failure_fires_once() {
        let job = SimulatedTransfer::new(Direction::Download, 1000)
            .with_chunks(100, Duration::ZERO)
            .fail_at(500, TransferFailure::network("Connection reset"));
        let token = CancellationToken::new();

        let first = run_once(&job, &token, 0);
        assert!(matches!(first, Err(ref f) if f.is_network()));
        assert_eq!(job.transferred(), 500);

        // 续传时不再触发同一个失败
        assert_eq!(run_once(&job, &token, 0), Ok(true));
        assert_eq!(job.runs(), 2);
    }

    #[test]
    fn test_skippable_error_declined() {
        let job = SimulatedTransfer::new(Direction::Download, 1000)
            .with_chunks(100, Duration::ZERO)
            .skippable_error_at(200, TransferFailure::application("Permission denied"));
        let token = CancellationToken::new();

        // 选择 "Cancel"（索引 1）
        assert_eq!(run_once(&job, &token, 1), Ok(false));
        assert!(!job.is_complete());
    }

    #[test]
    fn test_zero_size_completes_immediately() {
        let job = SimulatedTransfer::new(Direction::Copy, 0);
        let token = CancellationToken::new();
        assert_eq!(run_once(&job, &token, 0), Ok(true));
        assert!(job.is_complete());
    }
}
