//! 运行状态：用户输入、grounding 结果、计划、知识库、最终产物与诊断记录
//!
//! SharedState 由一次运行独占，路由器在任务之间顺序写入；能力处理器只拿到只读快照。

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::core::resilience::ExecutionOutcome;
use crate::plan::Plan;

/// 用户画像
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserProfile {
    /// 年级，如 "11"
    pub class_level: String,
    /// 考试局，如 "CBSE"
    pub board: String,
    /// 目标考试，如 "NEET"
    pub target_exam: String,
}

/// 多模态 grounding 输出
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroundedContext {
    /// subject / chapter / sub_topic 等
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
    #[serde(default)]
    pub image_analysis: String,
}

/// 运行诊断：逐次执行记录 + 汇总
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunDiagnostics {
    pub events: Vec<ExecutionOutcome>,
    /// 使用了兜底的 label
    pub fallbacks: Vec<String>,
    /// 每个 label 实际发生的重试次数（attempts - 1），不是配置的重试上限
    pub retries: BTreeMap<String, u32>,
    pub timings_ms: BTreeMap<String, u64>,
    /// 跳过的任务、丢弃的字段、计划降级原因
    #[serde(default)]
    pub warnings: Vec<String>,
}

impl RunDiagnostics {
    /// 并入一次执行器调用的结果
    pub fn record(&mut self, outcome: ExecutionOutcome) {
        if outcome.fallback_used && !self.fallbacks.contains(&outcome.label) {
            self.fallbacks.push(outcome.label.clone());
        }
        self.retries.insert(outcome.label.clone(), outcome.retries);
        self.timings_ms
            .insert(outcome.label.clone(), outcome.duration_ms);
        self.events.push(outcome);
    }

    pub fn warn(&mut self, message: impl Into<String>) {
        let message = message.into();
        tracing::warn!("{}", message);
        self.warnings.push(message);
    }
}

/// 整次运行共享的可变状态
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SharedState {
    pub run_id: String,
    /// RFC 3339 时间戳
    #[serde(default)]
    pub started_at: String,
    pub user_profile: UserProfile,
    pub grounded_context: GroundedContext,
    pub plan: Option<Plan>,
    /// 能力 ID → 该能力的产出；保持完成顺序，同键后写覆盖
    pub knowledge_base: Map<String, Value>,
    pub question_bank: Map<String, Value>,
    pub solver_output: Map<String, Value>,
    pub evaluation: Map<String, Value>,
    pub diagnostics: RunDiagnostics,
}

impl SharedState {
    pub fn new(user_profile: UserProfile) -> Self {
        Self {
            run_id: format!("run_{}", uuid::Uuid::new_v4()),
            started_at: chrono::Utc::now().to_rfc3339(),
            user_profile,
            ..Self::default()
        }
    }

    /// 当前计划的 planning_context（尚无计划时为空）
    pub fn planning_context(&self) -> BTreeMap<String, String> {
        self.plan
            .as_ref()
            .map(|p| p.planning_context.clone())
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn outcome(label: &str, attempts: u32, fallback_used: bool) -> ExecutionOutcome {
        ExecutionOutcome {
            label: label.to_string(),
            attempts,
            retries: attempts - 1,
            fallback_used,
            timed_out: false,
            error: None,
            duration_ms: 7,
        }
    }

    #[test]
    fn test_record_folds_outcome() {
        let mut diag = RunDiagnostics::default();
        diag.record(outcome("node:planner", 1, false));
        diag.record(outcome("capability:solver", 2, true));
        diag.record(outcome("capability:solver", 2, true));

        assert_eq!(diag.events.len(), 3);
        assert_eq!(diag.fallbacks, vec!["capability:solver"]);
        assert_eq!(diag.retries["node:planner"], 0);
        assert_eq!(diag.retries["capability:solver"], 1);
        assert_eq!(diag.timings_ms["capability:solver"], 7);
    }

    #[test]
    fn test_new_state_is_empty() {
        let state = SharedState::new(UserProfile::default());
        assert!(state.run_id.starts_with("run_"));
        assert!(chrono::DateTime::parse_from_rfc3339(&state.started_at).is_ok());
        assert!(state.knowledge_base.is_empty());
        assert!(state.plan.is_none());
        assert!(state.planning_context().is_empty());
    }

    #[test]
    fn test_diagnostics_wire_shape() {
        let value = serde_json::to_value(RunDiagnostics::default()).unwrap();
        for key in ["events", "fallbacks", "retries", "timings_ms"] {
            assert!(value.get(key).is_some(), "missing {key}");
        }
    }
}
