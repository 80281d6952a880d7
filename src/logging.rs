//! 日志初始化
//!
//! 控制台输出 + 可选的文件输出。日志文件以启动时间命名，超过大小上限时
//! 追加序号滚动（`transfer-queue.<启动时间>_N.log`），启动时清理过期文件

use crate::config::LogConfig;
use chrono::{Local, NaiveDate};
use parking_lot::Mutex;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{
    fmt::{self, time::ChronoLocal},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter,
};

/// 日志文件名前缀
const LOG_FILE_PREFIX: &str = "transfer-queue.";
const LOG_FILE_SUFFIX: &str = ".log";
const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.3f";

/// 按大小滚动的日志文件
struct RollingState {
    dir: PathBuf,
    /// 启动时间（YYYY-MM-DD-HHMMSS）
    stamp: String,
    index: u32,
    max_size: u64,
    written: u64,
    file: Option<File>,
}

impl RollingState {
    fn open(dir: PathBuf, max_size: u64) -> io::Result<Self> {
        let mut state = Self {
            dir,
            stamp: Local::now().format("%Y-%m-%d-%H%M%S").to_string(),
            index: 0,
            max_size: max_size.max(1),
            written: 0,
            file: None,
        };
        state.open_current()?;
        Ok(state)
    }

    fn path_for(&self, index: u32) -> PathBuf {
        let name = match index {
            0 => format!("{}{}{}", LOG_FILE_PREFIX, self.stamp, LOG_FILE_SUFFIX),
            n => format!("{}{}_{}{}", LOG_FILE_PREFIX, self.stamp, n, LOG_FILE_SUFFIX),
        };
        self.dir.join(name)
    }

    fn open_current(&mut self) -> io::Result<()> {
        let path = self.path_for(self.index);
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        self.written = file.metadata().map(|m| m.len()).unwrap_or(0);
        self.file = Some(file);
        Ok(())
    }

    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        // 空文件总能写入，避免单条超大日志无限滚动
        if self.written > 0 && self.written + buf.len() as u64 > self.max_size {
            if let Some(mut file) = self.file.take() {
                file.flush()?;
            }
            self.index += 1;
            self.open_current()?;
        }
        let file = self
            .file
            .as_mut()
            .ok_or_else(|| io::Error::new(io::ErrorKind::Other, "日志文件未打开"))?;
        let n = file.write(buf)?;
        self.written += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        match self.file.as_mut() {
            Some(file) => file.flush(),
            None => Ok(()),
        }
    }
}

/// 可在线程间共享的滚动日志写入器
#[derive(Clone)]
pub struct RollingLogWriter {
    state: Arc<Mutex<RollingState>>,
}

impl RollingLogWriter {
    pub fn new(dir: impl Into<PathBuf>, max_size: u64) -> io::Result<Self> {
        let state = RollingState::open(dir.into(), max_size)?;
        Ok(Self {
            state: Arc::new(Mutex::new(state)),
        })
    }

    /// 当前写入的文件
    pub fn current_path(&self) -> PathBuf {
        let state = self.state.lock();
        state.path_for(state.index)
    }
}

impl Write for RollingLogWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.state.lock().write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.state.lock().flush()
    }
}

/// 日志守卫，必须保持存活，否则后台写入线程会提前退出
pub struct LogGuard {
    _file_guard: Option<WorkerGuard>,
}

/// 初始化全局日志订阅器
///
/// 环境变量 `RUST_LOG` 优先于配置中的级别；文件输出不可用时回退到仅控制台
pub fn init_logging(config: &LogConfig) -> LogGuard {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));

    let console_layer = fmt::layer()
        .with_target(true)
        .with_level(true)
        .with_timer(ChronoLocal::new(TIMESTAMP_FORMAT.to_string()))
        .with_ansi(true);

    let writer = if config.enabled {
        match open_log_writer(config) {
            Ok(writer) => Some(writer),
            Err(e) => {
                eprintln!("日志文件不可用，仅输出到控制台: {:?}, 错误: {}", config.log_dir, e);
                None
            }
        }
    } else {
        None
    };

    let Some(writer) = writer else {
        let _ = tracing_subscriber::registry()
            .with(env_filter)
            .with(console_layer)
            .try_init();
        info!("日志系统初始化完成（仅控制台输出）");
        return LogGuard { _file_guard: None };
    };

    let (non_blocking, file_guard) = tracing_appender::non_blocking(writer);
    let file_layer = fmt::layer()
        .with_target(true)
        .with_level(true)
        .with_timer(ChronoLocal::new(TIMESTAMP_FORMAT.to_string()))
        .with_ansi(false)
        .with_writer(non_blocking);

    let _ = tracing_subscriber::registry()
        .with(env_filter)
        .with(console_layer)
        .with(file_layer)
        .try_init();

    info!(
        "日志系统初始化完成: 目录={:?}, 保留天数={}, 级别={}, 单文件最大={:.1}MB",
        config.log_dir,
        config.retention_days,
        config.level,
        config.max_file_size as f64 / 1024.0 / 1024.0
    );

    let removed = cleanup_old_logs(&config.log_dir, config.retention_days, Local::now().date_naive());
    if removed > 0 {
        info!("已清理 {} 个过期日志文件", removed);
    }

    LogGuard {
        _file_guard: Some(file_guard),
    }
}

fn open_log_writer(config: &LogConfig) -> io::Result<RollingLogWriter> {
    fs::create_dir_all(&config.log_dir)?;
    RollingLogWriter::new(config.log_dir.clone(), config.max_file_size)
}

/// 删除超过保留天数的日志文件，返回删除数量
fn cleanup_old_logs(log_dir: &Path, retention_days: u32, today: NaiveDate) -> usize {
    let retention = chrono::Duration::days(retention_days as i64);

    let entries = match fs::read_dir(log_dir) {
        Ok(entries) => entries,
        Err(e) => {
            warn!("读取日志目录失败: {:?}, 错误: {}", log_dir, e);
            return 0;
        }
    };

    let mut removed = 0;
    for entry in entries.flatten() {
        let path = entry.path();
        if !path.is_file() {
            continue;
        }
        let Some(name) = path.file_name().and_then(|s| s.to_str()) else {
            continue;
        };
        if !name.starts_with(LOG_FILE_PREFIX) || !name.ends_with(LOG_FILE_SUFFIX) {
            continue;
        }

        // 文件名中没有可解析的日期时按修改时间判断
        let expired = match extract_date_from_filename(name) {
            Some(date) => today.signed_duration_since(date) > retention,
            None => modified_before(&entry, retention),
        };
        if !expired {
            continue;
        }

        match fs::remove_file(&path) {
            Ok(()) => {
                removed += 1;
                debug!("已删除过期日志文件: {:?}", path);
            }
            Err(e) => warn!("删除过期日志文件失败: {:?}, 错误: {}", path, e),
        }
    }
    removed
}

/// `transfer-queue.YYYY-MM-DD-HHMMSS[_N].log` -> YYYY-MM-DD
fn extract_date_from_filename(filename: &str) -> Option<NaiveDate> {
    let stem = filename
        .strip_prefix(LOG_FILE_PREFIX)?
        .strip_suffix(LOG_FILE_SUFFIX)?;
    let date = stem.get(..10)?;
    NaiveDate::parse_from_str(date, "%Y-%m-%d").ok()
}

fn modified_before(entry: &fs::DirEntry, retention: chrono::Duration) -> bool {
    let Ok(modified) = entry.metadata().and_then(|m| m.modified()) else {
        return false;
    };
    let modified: chrono::DateTime<chrono::Utc> = modified.into();
    chrono::Utc::now().signed_duration_since(modified) > retention
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_extract_date_from_filename() {
        let date = NaiveDate::from_ymd_opt(2024, 3, 9).unwrap();
        assert_eq!(
            extract_date_from_filename("transfer-queue.2024-03-09-101500.log"),
            Some(date)
        );
        assert_eq!(
            extract_date_from_filename("transfer-queue.2024-03-09-101500_3.log"),
            Some(date)
        );
        assert_eq!(extract_date_from_filename("transfer-queue.broken.log"), None);
        assert_eq!(extract_date_from_filename("other.2024-03-09.log"), None);
    }

    #[test]
    fn test_writer_rotates_by_size() {
        let dir = TempDir::new().unwrap();
        let mut writer = RollingLogWriter::new(dir.path(), 16).unwrap();
        let first = writer.current_path();

        writer.write_all(b"0123456789").unwrap();
        writer.write_all(b"0123456789").unwrap();
        writer.flush().unwrap();

        let second = writer.current_path();
        assert_ne!(first, second);
        assert!(second.to_string_lossy().ends_with("_1.log"));
        assert_eq!(fs::read(&first).unwrap().len(), 10);
        assert_eq!(fs::read(&second).unwrap().len(), 10);
    }

    #[test]
    fn test_cleanup_removes_only_expired_logs() {
        let dir = TempDir::new().unwrap();
        let old = dir.path().join("transfer-queue.2024-01-01-080000.log");
        let recent = dir.path().join("transfer-queue.2024-01-09-080000_2.log");
        let unrelated = dir.path().join("notes.2024-01-01.log");
        for path in [&old, &recent, &unrelated] {
            fs::write(path, "x").unwrap();
        }

        let today = NaiveDate::from_ymd_opt(2024, 1, 10).unwrap();
        assert_eq!(cleanup_old_logs(dir.path(), 7, today), 1);
        assert!(!old.exists());
        assert!(recent.exists());
        assert!(unrelated.exists());
    }
}
