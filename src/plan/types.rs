//! 计划类型定义
//!
//! 与 Planner 产出的 JSON 线协议一一对应：planning_context / objective / subtasks / execution_order。

use std::collections::BTreeMap;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::capabilities::CapabilityId;

/// 任务优先级
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub enum Priority {
    High,
    Medium,
    Low,
}

impl Priority {
    /// 宽松解析（大小写、首尾空白不敏感），供 repair 使用
    pub fn parse_lenient(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "high" => Some(Priority::High),
            "medium" => Some(Priority::Medium),
            "low" => Some(Priority::Low),
            _ => None,
        }
    }
}

impl Default for Priority {
    fn default() -> Self {
        Priority::Medium
    }
}

/// 计划中的单个任务
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct TaskDescriptor {
    /// 计划内唯一；执行前会被规范化为 executed_by 的能力 ID
    pub task_id: String,
    pub purpose: String,
    pub expected_output: String,
    pub priority: Priority,
    pub executed_by: CapabilityId,
}

/// 执行计划
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct Plan {
    pub planning_context: BTreeMap<String, String>,
    pub objective: String,
    pub subtasks: Vec<TaskDescriptor>,
    /// 只能引用 subtasks 中存在的 task_id
    pub execution_order: Vec<String>,
}

impl Plan {
    pub fn task(&self, task_id: &str) -> Option<&TaskDescriptor> {
        self.subtasks.iter().find(|t| t.task_id == task_id)
    }

    /// 按 subtasks 顺序列出各任务的能力
    pub fn capabilities(&self) -> Vec<CapabilityId> {
        self.subtasks.iter().map(|t| t.executed_by).collect()
    }

    /// Plan 的 JSON Schema 字符串，可拼入 Planner 的 system prompt
    pub fn schema_json() -> String {
        let schema = schemars::schema_for!(Plan);
        serde_json::to_string_pretty(&schema).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_priority_lenient() {
        assert_eq!(Priority::parse_lenient(" HIGH "), Some(Priority::High));
        assert_eq!(Priority::parse_lenient("low"), Some(Priority::Low));
        assert_eq!(Priority::parse_lenient("urgent"), None);
    }

    #[test]
    fn test_schema_mentions_capability_ids() {
        let schema = Plan::schema_json();
        assert!(schema.contains("execution_order"));
        assert!(schema.contains("question_generator"));
    }
}
