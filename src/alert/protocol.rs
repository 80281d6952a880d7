//! 任务失败处理：重试或放弃

use super::{Decision, DecisionPrompt, DecisionRequest};
use crate::job::{FailureKind, TransferFailure, TransferJob};
use std::sync::Arc;
use tracing::{info, warn};

const TRY_AGAIN: &str = "Try Again";
const NETWORK_DIAGNOSTICS: &str = "Network Diagnostics";
const CANCEL: &str = "Cancel";

/// 网络可达性诊断
pub trait ReachabilityProbe: Send + Sync {
    fn diagnose(&self, host: &str);
}

/// 只记录日志的诊断实现
#[derive(Debug, Clone, Copy, Default)]
pub struct LoggingProbe;

impl ReachabilityProbe for LoggingProbe {
    fn diagnose(&self, host: &str) {
        info!("网络诊断: host={}", host);
    }
}

/// 任务失败决策协议
#[derive(Clone)]
pub struct AlertProtocol {
    prompt: Arc<dyn DecisionPrompt>,
    probe: Arc<dyn ReachabilityProbe>,
}

impl AlertProtocol {
    pub fn new(prompt: Arc<dyn DecisionPrompt>, probe: Arc<dyn ReachabilityProbe>) -> Self {
        Self { prompt, probe }
    }

    /// 询问是否重试（true = 重试，false = 放弃）
    ///
    /// 网络错误选择诊断后会重新询问，而不是直接结束
    pub fn decide(&self, job: &dyn TransferJob, failure: &TransferFailure) -> bool {
        let (title, options): (&str, &[&str]) = match failure.kind() {
            FailureKind::Network => ("Connection failed", &[TRY_AGAIN, NETWORK_DIAGNOSTICS, CANCEL]),
            FailureKind::Application => ("Transfer failed", &[TRY_AGAIN, CANCEL]),
        };

        loop {
            let request = DecisionRequest::new(title, failure.message())
                .with_detail(failure.detail().map(str::to_string))
                .with_options(options.iter().copied());
            let decision: Decision = self.prompt.prompt(request);

            match decision.choice.and_then(|index| options.get(index).copied()) {
                Some(TRY_AGAIN) => {
                    info!("任务 {} 选择重试", job.id());
                    return true;
                }
                Some(NETWORK_DIAGNOSTICS) => {
                    self.probe.diagnose(job.host());
                }
                _ => {
                    warn!("任务 {} 放弃重试: {}", job.id(), failure);
                    return false;
                }
            }
        }
    }
}

impl std::fmt::Debug for AlertProtocol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AlertProtocol").finish_non_exhaustive()
    }
}
