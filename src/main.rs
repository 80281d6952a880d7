use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use transfer_queue::{
    logging, AppConfig, Bandwidth, Coordinator, Decision, Direction, EventChannelObserver, JobStatus,
    SimulatedTransfer, TransferFailure, TransferJob, TransferOptions,
};

/// 默认配置文件路径
const DEFAULT_CONFIG_PATH: &str = "config/app.toml";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| DEFAULT_CONFIG_PATH.to_string());
    let config = AppConfig::load_or_default(&config_path).await;

    // 🔥 日志守卫必须保持存活
    let _log_guard = logging::init_logging(&config.log);

    info!("Transfer Queue v{} 启动中...", env!("CARGO_PKG_VERSION"));

    // 演示决策：第一次失败时重试，之后一律取消/退出
    let prompts = Arc::new(AtomicUsize::new(0));
    let (observer, mut events) = EventChannelObserver::new(move |request| {
        let n = prompts.fetch_add(1, Ordering::SeqCst);
        if request.title == "Transfer in progress" {
            return Decision::choose(0);
        }
        if n == 0 {
            Decision::choose(0)
        } else {
            Decision::choose(request.options.len().saturating_sub(1))
        }
    });

    let printer = tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            match serde_json::to_string(&event) {
                Ok(json) => println!("{}", json),
                Err(e) => warn!("事件序列化失败: {}", e),
            }
        }
    });

    let observer = Arc::new(observer);
    observer.set_transcript_visible(true);
    let coordinator = Coordinator::builder(config.queue.clone(), observer).build()?;
    for option in coordinator.bandwidth_options() {
        info!("可选限速: {}", option.label);
    }

    let download: Arc<dyn TransferJob> = Arc::new(
        SimulatedTransfer::new(Direction::Download, 8 * 1024 * 1024)
            .with_chunks(512 * 1024, Duration::from_millis(20))
            .with_host("files.example.org")
            .with_root("downloads/archive.tar.gz")
            .fail_at(4 * 1024 * 1024, TransferFailure::network("Connection reset by peer")),
    );
    let upload: Arc<dyn TransferJob> = Arc::new(
        SimulatedTransfer::new(Direction::Upload, 2 * 1024 * 1024)
            .with_chunks(256 * 1024, Duration::from_millis(30)),
    );
    let sync: Arc<dyn TransferJob> = Arc::new(
        SimulatedTransfer::new(Direction::Sync, 1024 * 1024)
            .with_chunks(128 * 1024, Duration::from_millis(25))
            .with_root("sync/.settings"),
    );

    let jobs = vec![download, upload, sync];
    for job in &jobs {
        let id = job.id().clone();
        coordinator
            .start(
                Arc::clone(job),
                TransferOptions::default(),
                Some(Box::new(move |_| info!("任务完成回调: {}", id))),
            )
            .await?;
    }

    let outcome = coordinator
        .set_bandwidth(jobs[2].id(), Bandwidth::Limited(64 * 1024))
        .await?;
    info!("同步任务限速结果: {:?}", outcome);

    // 等待所有任务结束
    loop {
        let statuses = coordinator.jobs().await?;
        let pending = statuses
            .iter()
            .filter(|(_, status)| matches!(status, JobStatus::Queued | JobStatus::Running))
            .count();
        if pending == 0 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }

    for (id, status) in coordinator.jobs().await? {
        info!("任务 {} 最终状态: {:?}", id.short(), status);
    }

    let removed = coordinator.clean_completed().await?;
    info!("清理完成任务: {}", removed);

    if coordinator.confirm_termination().await? {
        coordinator.shutdown().await?;
    }
    drop(coordinator);
    let _ = printer.await;

    info!("Transfer Queue 已退出");
    Ok(())
}
