//! 条目级错误的"继续/取消"决策缓存
//!
//! 每个后台执行器持有一个实例，随执行器一起销毁

use super::{DecisionPrompt, DecisionRequest};
use crate::job::TransferFailure;
use tracing::debug;

const CANCEL: usize = 1;

/// 决策缓存
#[derive(Debug, Clone, Default)]
pub struct ErrorDecisionCache {
    /// 记住的答复
    option: bool,
    /// 一旦置位，后续询问直接返回 `option`
    suppressed: bool,
}

impl ErrorDecisionCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// 是否继续传输其余条目
    pub fn decide(&mut self, prompt: &dyn DecisionPrompt, failure: &TransferFailure) -> bool {
        if self.suppressed {
            debug!("使用已记住的决策: {}", self.option);
            return self.option;
        }

        let request = DecisionRequest::new("Error", failure.message())
            .with_detail(failure.detail().map(str::to_string))
            .with_options(["Continue", "Cancel"])
            .with_always("Always")
            .visible_only();
        let decision = prompt.prompt(request);
        if decision.unavailable {
            debug!("询问未能显示，取消传输");
            return false;
        }

        // 只有明确选择"取消"才中止；直接关闭对话框视为继续
        let answer = !decision.is(CANCEL);
        if decision.always {
            self.suppressed = true;
            self.option = answer;
        }
        answer
    }

    pub fn is_suppressed(&self) -> bool {
        self.suppressed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alert::testing::ScriptedPrompt;
    use crate::alert::Decision;

    fn failure() -> TransferFailure {
        TransferFailure::application("Permission denied").with_detail("/tmp/a.txt")
    }

    #[test]
    fn test_always_continue_is_cached() {
        let prompt = ScriptedPrompt::new([Decision::always(0)]);
        let mut cache = ErrorDecisionCache::new();

        assert!(cache.decide(&prompt, &failure()));
        assert!(cache.is_suppressed());
        for _ in 0..5 {
            assert!(cache.decide(&prompt, &failure()));
        }
        assert_eq!(prompt.count(), 1);

        let request = &prompt.requests.lock()[0];
        assert_eq!(request.options, vec!["Continue", "Cancel"]);
        assert!(request.requires_visible_surface);
    }

    #[test]
    fn test_cancel_without_always_prompts_again() {
        let prompt = ScriptedPrompt::new([Decision::choose(1), Decision::choose(0)]);
        let mut cache = ErrorDecisionCache::new();

        assert!(!cache.decide(&prompt, &failure()));
        assert!(!cache.is_suppressed());
        assert!(cache.decide(&prompt, &failure()));
        assert_eq!(prompt.count(), 2);
    }

    #[test]
    fn test_always_cancel_is_cached() {
        let prompt = ScriptedPrompt::new([Decision::always(1)]);
        let mut cache = ErrorDecisionCache::new();

        assert!(!cache.decide(&prompt, &failure()));
        assert!(!cache.decide(&prompt, &failure()));
        assert_eq!(prompt.count(), 1);
    }

    #[test]
    fn test_dismissed_continues_without_caching() {
        let prompt = ScriptedPrompt::new([Decision::dismissed(), Decision::choose(1)]);
        let mut cache = ErrorDecisionCache::new();

        assert!(cache.decide(&prompt, &failure()));
        assert!(!cache.is_suppressed());
        assert!(!cache.decide(&prompt, &failure()));
        assert_eq!(prompt.count(), 2);
    }

    #[test]
    fn test_dismissed_with_always_caches_continue() {
        let prompt = ScriptedPrompt::new([Decision::dismissed_always()]);
        let mut cache = ErrorDecisionCache::new();

        assert!(cache.decide(&prompt, &failure()));
        assert!(cache.is_suppressed());
        assert!(cache.decide(&prompt, &failure()));
        assert_eq!(prompt.count(), 1);
    }

    #[test]
    fn test_unavailable_prompt_aborts_without_caching() {
        let prompt = ScriptedPrompt::new([Decision::unavailable(), Decision::always(0)]);
        let mut cache = ErrorDecisionCache::new();

        assert!(!cache.decide(&prompt, &failure()));
        assert!(!cache.is_suppressed());
        assert!(cache.decide(&prompt, &failure()));
        assert_eq!(prompt.count(), 2);
    }
}
