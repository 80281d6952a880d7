//! 告警与决策模块
//!
//! 传输失败时阻塞工作线程，由协调线程向观察者发起同步询问：
//! - `protocol.rs`: 任务级失败，决定重试或放弃（网络错误额外提供诊断）
//! - `cache.rs`: 条目级错误，决定继续或取消，支持"总是"记忆

mod cache;
mod protocol;

pub use cache::ErrorDecisionCache;
pub use protocol::{AlertProtocol, LoggingProbe, ReachabilityProbe};

use serde::{Deserialize, Serialize};

/// 一次决策询问
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecisionRequest {
    /// 标题
    pub title: String,
    /// 正文
    pub message: String,
    /// 详细信息
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    /// 可选按钮（按索引返回）
    pub options: Vec<String>,
    /// "总是"复选框文字（None 表示不显示复选框）
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub always_label: Option<String>,
    /// 观察界面不可见时直接放弃询问
    #[serde(default)]
    pub requires_visible_surface: bool,
}

impl DecisionRequest {
    pub fn new(title: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            message: message.into(),
            detail: None,
            options: Vec::new(),
            always_label: None,
            requires_visible_surface: false,
        }
    }

    pub fn with_detail(mut self, detail: Option<String>) -> Self {
        self.detail = detail;
        self
    }

    pub fn with_options<I, S>(mut self, options: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.options = options.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_always(mut self, label: impl Into<String>) -> Self {
        self.always_label = Some(label.into());
        self
    }

    pub fn visible_only(mut self) -> Self {
        self.requires_visible_surface = true;
        self
    }

    /// 按钮文字
    pub fn option(&self, index: usize) -> Option<&str> {
        self.options.get(index).map(String::as_str)
    }
}

/// 观察者给出的决策
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Decision {
    /// 所选按钮索引（None 表示对话框被直接关闭）
    pub choice: Option<usize>,
    /// 是否勾选"总是"
    #[serde(default)]
    pub always: bool,
    /// 询问没有显示出来（界面不可见或协调线程不可用）
    #[serde(default)]
    pub unavailable: bool,
}

impl Decision {
    pub fn choose(index: usize) -> Self {
        Self {
            choice: Some(index),
            always: false,
            unavailable: false,
        }
    }

    /// 选择并勾选"总是"
    pub fn always(index: usize) -> Self {
        Self {
            choice: Some(index),
            always: true,
            unavailable: false,
        }
    }

    /// 未作选择
    pub fn dismissed() -> Self {
        Self {
            choice: None,
            always: false,
            unavailable: false,
        }
    }

    /// 关闭对话框但勾选了"总是"
    pub fn dismissed_always() -> Self {
        Self {
            always: true,
            ..Self::dismissed()
        }
    }

    /// 询问无法显示
    pub fn unavailable() -> Self {
        Self {
            unavailable: true,
            ..Self::dismissed()
        }
    }

    pub fn is(&self, index: usize) -> bool {
        self.choice == Some(index)
    }
}

/// 同步决策入口
///
/// 工作线程调用时会阻塞，直到协调线程得到观察者的答复
pub trait DecisionPrompt: Send + Sync {
    fn prompt(&self, request: DecisionRequest) -> Decision;
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use parking_lot::Mutex;
    use std::collections::VecDeque;

    /// 按脚本依次回答并记录所有询问
    #[derive(Default)]
    pub struct ScriptedPrompt {
        answers: Mutex<VecDeque<Decision>>,
        pub requests: Mutex<Vec<DecisionRequest>>,
    }

    impl ScriptedPrompt {
        pub fn new(answers: impl IntoIterator<Item = Decision>) -> Self {
            Self {
                answers: Mutex::new(answers.into_iter().collect()),
                requests: Mutex::new(Vec::new()),
            }
        }

        pub fn count(&self) -> usize {
            self.requests.lock().len()
        }
    }

    impl DecisionPrompt for ScriptedPrompt {
        fn prompt(&self, request: DecisionRequest) -> Decision {
            self.requests.lock().push(request);
            self.answers
                .lock()
                .pop_front()
                .unwrap_or_else(Decision::dismissed)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_builder() {
        let request = DecisionRequest::new("Error", "Connection refused")
            .with_detail(Some("timeout".to_string()))
            .with_options(["Continue", "Cancel"])
            .with_always("Always")
            .visible_only();

        assert_eq!(request.option(1), Some("Cancel"));
        assert_eq!(request.option(2), None);
        assert_eq!(request.always_label.as_deref(), Some("Always"));
        assert!(request.requires_visible_surface);
    }

    #[test]
    fn test_decision_constructors() {
        assert!(Decision::choose(0).is(0));
        assert!(!Decision::choose(0).always);
        assert!(Decision::always(1).always);
        assert_eq!(Decision::dismissed().choice, None);
        assert!(Decision::dismissed_always().always);
        assert!(Decision::unavailable().unavailable);
        assert!(!Decision::dismissed().unavailable);
    }
}
