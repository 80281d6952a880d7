// 配置管理模块

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tokio::fs;

use crate::progress::{DEFAULT_THROTTLE_INTERVAL_MS, UI_SAFE_BOUND};

/// 应用配置
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// 传输队列配置
    #[serde(default)]
    pub queue: QueueConfig,
    /// 日志配置
    #[serde(default)]
    pub log: LogConfig,
}

/// 传输队列配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueConfig {
    /// 任务开始时把观察界面提到前台
    #[serde(default = "default_order_front_on_start")]
    pub order_front_on_start: bool,
    /// 全部任务结束后收起观察界面
    #[serde(default = "default_order_back_on_stop")]
    pub order_back_on_stop: bool,
    /// 同时运行的最大任务数（至少 1）
    #[serde(default = "default_max_transfers")]
    pub max_transfers: usize,
    /// 可选的限速档位（bytes/s）
    #[serde(default = "default_bandwidth_options")]
    pub bandwidth_options: Vec<u64>,
    /// 界面进度条整数上界
    #[serde(default = "default_progress_bound")]
    pub progress_bound: u64,
    /// 进度上报最小间隔（毫秒）
    #[serde(default = "default_progress_throttle_ms")]
    pub progress_throttle_ms: u64,
}

fn default_order_front_on_start() -> bool {
    true
}

fn default_order_back_on_stop() -> bool {
    true
}

fn default_max_transfers() -> usize {
    2
}

fn default_bandwidth_options() -> Vec<u64> {
    // 5KB/s ~ 10MB/s
    vec![
        5 * 1024,
        10 * 1024,
        50 * 1024,
        100 * 1024,
        500 * 1024,
        1024 * 1024,
        5 * 1024 * 1024,
        10 * 1024 * 1024,
    ]
}

fn default_progress_bound() -> u64 {
    UI_SAFE_BOUND
}

fn default_progress_throttle_ms() -> u64 {
    DEFAULT_THROTTLE_INTERVAL_MS
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            order_front_on_start: default_order_front_on_start(),
            order_back_on_stop: default_order_back_on_stop(),
            max_transfers: default_max_transfers(),
            bandwidth_options: default_bandwidth_options(),
            progress_bound: default_progress_bound(),
            progress_throttle_ms: default_progress_throttle_ms(),
        }
    }
}

impl QueueConfig {
    /// 验证配置
    pub fn validate(&self) -> Result<()> {
        if self.max_transfers == 0 {
            anyhow::bail!("max_transfers 必须大于 0");
        }
        if self.progress_bound == 0 {
            anyhow::bail!("progress_bound 必须大于 0");
        }
        if self.bandwidth_options.iter().any(|rate| *rate == 0) {
            anyhow::bail!("bandwidth_options 中不能包含 0（不限速档位自动提供）");
        }
        Ok(())
    }
}

/// 日志配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogConfig {
    /// 是否启用日志文件持久化
    #[serde(default = "default_log_enabled")]
    pub enabled: bool,
    /// 日志文件保存目录
    #[serde(default = "default_log_dir")]
    pub log_dir: PathBuf,
    /// 日志保留天数（默认 7 天）
    #[serde(default = "default_log_retention_days")]
    pub retention_days: u32,
    /// 日志级别（默认 info）
    #[serde(default = "default_log_level")]
    pub level: String,
    /// 单个日志文件最大大小（字节，默认 50MB）
    #[serde(default = "default_log_max_file_size")]
    pub max_file_size: u64,
}

fn default_log_enabled() -> bool {
    true
}

fn default_log_dir() -> PathBuf {
    PathBuf::from("logs")
}

fn default_log_retention_days() -> u32 {
    7
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_max_file_size() -> u64 {
    50 * 1024 * 1024 // 50MB
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            enabled: default_log_enabled(),
            log_dir: default_log_dir(),
            retention_days: default_log_retention_days(),
            level: default_log_level(),
            max_file_size: default_log_max_file_size(),
        }
    }
}

impl AppConfig {
    /// 从文件加载配置
    pub async fn load_from_file(path: &str) -> Result<Self> {
        let content = fs::read_to_string(path)
            .await
            .context("Failed to read config file")?;

        let config: AppConfig = toml::from_str(&content).context("Failed to parse config file")?;

        config
            .queue
            .validate()
            .context("配置文件中的队列配置验证失败")?;

        Ok(config)
    }

    /// 保存配置到文件（自动创建父目录）
    pub async fn save_to_file(&self, path: &str) -> Result<()> {
        self.queue.validate().context("保存配置失败：队列配置无效")?;

        let content = toml::to_string_pretty(self).context("Failed to serialize config")?;

        // 确保父目录存在
        if let Some(parent) = std::path::Path::new(path).parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)
                    .await
                    .context("Failed to create config directory")?;
            }
        }

        fs::write(path, content)
            .await
            .context("Failed to write config file")?;

        Ok(())
    }

    /// 加载配置，失败时使用默认配置并尝试写回
    pub async fn load_or_default(path: &str) -> Self {
        match Self::load_from_file(path).await {
            Ok(config) => {
                tracing::info!("配置文件加载成功: {}", path);
                config
            }
            Err(e) => {
                tracing::warn!("配置文件加载失败，使用默认配置: {:#}", e);
                let default_config = Self::default();

                if let Err(e) = default_config.save_to_file(path).await {
                    tracing::error!("保存默认配置失败: {}", e);
                }

                default_config
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::{NamedTempFile, TempDir};

    #[tokio::test]
    async fn test_default_config() {
        let config = AppConfig::default();
        assert!(config.queue.order_front_on_start);
        assert!(config.queue.order_back_on_stop);
        assert_eq!(config.queue.max_transfers, 2);
        assert_eq!(config.queue.progress_bound, 2_147_483_647);
        assert_eq!(config.queue.progress_throttle_ms, 200);
        assert_eq!(config.log.level, "info");
    }

    #[tokio::test]
    async fn test_save_and_load() {
        let temp_file = NamedTempFile::new().unwrap();
        let path = temp_file.path().to_str().unwrap();

        let mut config = AppConfig::default();
        config.queue.max_transfers = 4;
        config.queue.bandwidth_options = vec![1024, 2048];
        config.save_to_file(path).await.unwrap();

        let loaded = AppConfig::load_from_file(path).await.unwrap();
        assert_eq!(loaded.queue, config.queue);
        assert_eq!(loaded.log, config.log);
    }

    #[tokio::test]
    async fn test_partial_file_uses_defaults() {
        let temp_file = NamedTempFile::new().unwrap();
        let path = temp_file.path().to_str().unwrap();
        fs::write(path, "[queue]\nmax_transfers = 1\n").await.unwrap();

        let loaded = AppConfig::load_from_file(path).await.unwrap();
        assert_eq!(loaded.queue.max_transfers, 1);
        assert!(loaded.queue.order_front_on_start);
        assert!(loaded.log.enabled);
    }

    #[tokio::test]
    async fn test_invalid_queue_rejected() {
        let temp_file = NamedTempFile::new().unwrap();
        let path = temp_file.path().to_str().unwrap();
        fs::write(path, "[queue]\nmax_transfers = 0\n").await.unwrap();

        assert!(AppConfig::load_from_file(path).await.is_err());
    }

    #[tokio::test]
    async fn test_load_or_default_writes_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config").join("app.toml");
        let path = path.to_str().unwrap();

        let config = AppConfig::load_or_default(path).await;
        assert_eq!(config.queue, QueueConfig::default());
        assert!(std::path::Path::new(path).exists());
    }
}
