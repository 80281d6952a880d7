//! 进度换算
//!
//! 字节计数按 u64 语义处理，界面进度条只能容纳有界整数（默认 `i32::MAX`）。
//! 总大小超出上界时按比例缩放，保证相对进度不变且不会溢出

use crate::job::Direction;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// 界面安全整数上界（32 位有符号整数最大值）
pub const UI_SAFE_BOUND: u64 = i32::MAX as u64;

/// 状态类别（只选择语义，文字由外部格式化器决定）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "direction", rename_all = "snake_case")]
pub enum StatusCategory {
    /// 排队等待
    Queued,
    /// 传输中
    InProgress,
    /// 已完成（带方向）
    Complete(Direction),
    /// 未完成
    Incomplete,
}

/// 状态文字格式化器
pub trait StatusFormatter: Send + Sync {
    fn format(&self, status: &StatusCategory) -> String;
}

/// 默认英文格式化器
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultStatusFormatter;

impl StatusFormatter for DefaultStatusFormatter {
    fn format(&self, status: &StatusCategory) -> String {
        match status {
            StatusCategory::Queued => "Queued".to_string(),
            StatusCategory::InProgress => "In progress".to_string(),
            StatusCategory::Complete(direction) => {
                let name = direction.name();
                let mut chars = name.chars();
                match chars.next() {
                    Some(first) => format!("{}{} complete", first.to_uppercase(), chars.as_str()),
                    None => "Complete".to_string(),
                }
            }
            StatusCategory::Incomplete => "Transfer incomplete".to_string(),
        }
    }
}

/// 换算输入
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProgressInput {
    pub transferred: u64,
    pub total: u64,
    pub queued: bool,
    pub running: bool,
    pub complete: bool,
    pub direction: Direction,
}

/// 进度快照（每次重新计算，不做局部更新）
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressSnapshot {
    /// 不确定进度（未开始或大小未知）
    pub indeterminate: bool,
    /// 当前值
    pub value: u64,
    /// 最大值
    pub maximum: u64,
    /// 状态类别
    pub status: StatusCategory,
    /// "已传输 of 总大小"
    pub progress_text: String,
    /// 停止后显示的最近活动时间
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
}

impl ProgressSnapshot {
    /// 新任务的初始快照
    pub fn initial() -> Self {
        Self {
            indeterminate: true,
            value: 0,
            maximum: 0,
            status: StatusCategory::Queued,
            progress_text: String::new(),
            timestamp: None,
        }
    }

    /// 进度百分比（不确定时为 None）
    pub fn percent(&self) -> Option<f64> {
        if self.indeterminate || self.maximum == 0 {
            return None;
        }
        Some(self.value as f64 / self.maximum as f64 * 100.0)
    }
}

/// 进度换算器
#[derive(Debug, Clone, Copy)]
pub struct ProgressAggregator {
    bound: u64,
}

impl ProgressAggregator {
    /// 创建换算器，`bound` 为界面整数上界（至少为 1）
    pub fn new(bound: u64) -> Self {
        Self {
            bound: bound.max(1),
        }
    }

    pub fn bound(&self) -> u64 {
        self.bound
    }

    /// 计算 (value, maximum)；未开始或大小未知时返回 None
    pub fn scale(&self, transferred: u64, total: u64) -> Option<(u64, u64)> {
        if transferred == 0 || total == 0 {
            return None;
        }
        if total > self.bound {
            // 四舍五入：round(bound * transferred / total)，u128 避免乘法溢出
            let bound = self.bound as u128;
            let scaled = (bound * transferred as u128 + total as u128 / 2) / total as u128;
            let value = scaled.min(bound) as u64;
            Some((value, self.bound))
        } else {
            Some((transferred.min(total), total))
        }
    }

    /// 推导状态类别
    pub fn status(&self, input: &ProgressInput) -> StatusCategory {
        if input.running {
            StatusCategory::InProgress
        } else if input.complete {
            StatusCategory::Complete(input.direction)
        } else if input.queued {
            StatusCategory::Queued
        } else {
            StatusCategory::Incomplete
        }
    }

    /// 生成完整快照
    pub fn snapshot(&self, input: &ProgressInput, timestamp: Option<DateTime<Utc>>) -> ProgressSnapshot {
        let (indeterminate, value, maximum) = match self.scale(input.transferred, input.total) {
            Some((value, maximum)) => (false, value, maximum),
            None => (true, 0, 0),
        };
        ProgressSnapshot {
            indeterminate,
            value,
            maximum,
            status: self.status(input),
            progress_text: format!(
                "{} of {}",
                format_size(input.transferred),
                format_size(input.total)
            ),
            // 传输中不显示时间
            timestamp: if input.running { None } else { timestamp },
        }
    }
}

impl Default for ProgressAggregator {
    fn default() -> Self {
        Self::new(UI_SAFE_BOUND)
    }
}

/// 格式化文件大小为人类可读格式
pub fn format_size(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = 1024 * KB;
    const GB: u64 = 1024 * MB;
    const TB: u64 = 1024 * GB;

    if bytes >= TB {
        format!("{:.2} TB", bytes as f64 / TB as f64)
    } else if bytes >= GB {
        format!("{:.2} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.2} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.2} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} B", bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn input(transferred: u64, total: u64, running: bool, complete: bool) -> ProgressInput {
        ProgressInput {
            transferred,
            total,
            queued: false,
            running,
            complete,
            direction: Direction::Download,
        }
    }

    #[test]
    fn test_scaled_scenario_exceeding_32_bit() {
        let aggregator = ProgressAggregator::default();
        let snapshot = aggregator.snapshot(&input(5_000_000_000, 10_000_000_000, true, false), None);

        assert!(!snapshot.indeterminate);
        assert_eq!(snapshot.maximum, 2_147_483_647);
        assert!(snapshot.value.abs_diff(1_073_741_823) <= 1);
    }

    #[test]
    fn test_small_total_is_not_scaled() {
        let aggregator = ProgressAggregator::default();
        assert_eq!(aggregator.scale(250, 1000), Some((250, 1000)));
        // 已传输超过总大小时截断
        assert_eq!(aggregator.scale(1200, 1000), Some((1000, 1000)));
    }

    #[test]
    fn test_status_categories() {
        let aggregator = ProgressAggregator::default();
        assert_eq!(aggregator.status(&input(1, 2, true, false)), StatusCategory::InProgress);
        // 运行中优先于完成标志
        assert_eq!(aggregator.status(&input(2, 2, true, true)), StatusCategory::InProgress);
        assert_eq!(
            aggregator.status(&input(2, 2, false, true)),
            StatusCategory::Complete(Direction::Download)
        );
        assert_eq!(aggregator.status(&input(1, 2, false, false)), StatusCategory::Incomplete);

        let mut queued = input(0, 2, false, false);
        queued.queued = true;
        assert_eq!(aggregator.status(&queued), StatusCategory::Queued);
    }

    #[test]
    fn test_timestamp_hidden_while_running() {
        let aggregator = ProgressAggregator::default();
        let now = Utc::now();
        assert_eq!(aggregator.snapshot(&input(1, 2, true, false), Some(now)).timestamp, None);
        assert_eq!(aggregator.snapshot(&input(1, 2, false, false), Some(now)).timestamp, Some(now));
    }

    #[test]
    fn test_default_status_text() {
        let formatter = DefaultStatusFormatter;
        assert_eq!(formatter.format(&StatusCategory::InProgress), "In progress");
        assert_eq!(
            formatter.format(&StatusCategory::Complete(Direction::Upload)),
            "Upload complete"
        );
        assert_eq!(formatter.format(&StatusCategory::Incomplete), "Transfer incomplete");
    }

    #[test]
    fn test_progress_text() {
        let aggregator = ProgressAggregator::default();
        let snapshot = aggregator.snapshot(&input(512, 2048, true, false), None);
        assert_eq!(snapshot.progress_text, "512 B of 2.00 KB");
        assert_eq!(snapshot.percent(), Some(25.0));
    }

    #[test]
    fn test_format_size() {
        assert_eq!(format_size(0), "0 B");
        assert_eq!(format_size(1536), "1.50 KB");
        assert_eq!(format_size(5 * 1024 * 1024), "5.00 MB");
        assert_eq!(format_size(3 * 1024 * 1024 * 1024), "3.00 GB");
    }

    proptest! {
        #[test]
        fn prop_value_never_exceeds_maximum(total in 1u64.., fraction in 0.0f64..=1.0) {
            let transferred = ((total as f64 * fraction) as u64).clamp(1, total);
            let aggregator = ProgressAggregator::default();
            let (value, maximum) = aggregator.scale(transferred, total).unwrap();

            prop_assert!(value <= maximum);
            prop_assert!(maximum <= UI_SAFE_BOUND);
            let expected = transferred as f64 / total as f64;
            let actual = value as f64 / maximum as f64;
            // 允许 1 个单位的舍入误差
            prop_assert!((expected - actual).abs() <= 1.0 / maximum as f64 + 1e-9);
        }

        #[test]
        fn prop_full_transfer_above_bound_is_exact(total in (UI_SAFE_BOUND + 1)..) {
            let aggregator = ProgressAggregator::default();
            let (value, maximum) = aggregator.scale(total, total).unwrap();
            prop_assert_eq!(maximum, UI_SAFE_BOUND);
            prop_assert_eq!(value, maximum);
        }

        #[test]
        fn prop_zero_counts_are_indeterminate(
            other in any::<u64>(),
            running in any::<bool>(),
            complete in any::<bool>(),
            zero_total in any::<bool>(),
        ) {
            let aggregator = ProgressAggregator::default();
            let (transferred, total) = if zero_total { (other, 0) } else { (0, other) };
            let snapshot = aggregator.snapshot(&input(transferred, total, running, complete), None);
            prop_assert!(snapshot.indeterminate);
        }
    }
}
