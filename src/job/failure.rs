//! 传输失败类型
//!
//! 失败分类由引擎在构造时确定，本库只通过穷举匹配使用分类来决定提示内容

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// 失败分类
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FailureKind {
    /// 网络可达性问题（连接重置、超时、DNS 解析失败等）
    Network,
    /// 其他应用层错误
    Application,
}

/// 引擎在 `run()` 中抛出的传输失败
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct TransferFailure {
    message: String,
    detail: Option<String>,
    kind: FailureKind,
}

impl TransferFailure {
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            detail: None,
            kind,
        }
    }

    /// 网络类失败
    pub fn network(message: impl Into<String>) -> Self {
        Self::new(FailureKind::Network, message)
    }

    /// 应用类失败
    pub fn application(message: impl Into<String>) -> Self {
        Self::new(FailureKind::Application, message)
    }

    /// 附加详细信息
    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn detail(&self) -> Option<&str> {
        self.detail.as_deref()
    }

    pub fn kind(&self) -> FailureKind {
        self.kind
    }

    pub fn is_network(&self) -> bool {
        self.kind == FailureKind::Network
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failure_classification() {
        let failure = TransferFailure::network("Connection reset").with_detail("peer closed");
        assert!(failure.is_network());
        assert_eq!(failure.message(), "Connection reset");
        assert_eq!(failure.detail(), Some("peer closed"));
        assert_eq!(failure.to_string(), "Connection reset");

        let failure = TransferFailure::application("Permission denied");
        assert_eq!(failure.kind(), FailureKind::Application);
        assert_eq!(failure.detail(), None);
    }
}
