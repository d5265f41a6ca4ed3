//! Planner：向 LLM 请求执行计划
//!
//! 提示词列出可用能力与 Plan 的 JSON Schema；回复经 extract_json 取出 JSON 后原样交给 resolve_plan，
//! 是否合法由校验 / 修复 / 兜底决定。

use std::sync::{Arc, OnceLock};

use async_trait::async_trait;
use regex::Regex;
use serde_json::Value;

use crate::capabilities::CapabilityId;
use crate::core::state::{GroundedContext, UserProfile};
use crate::llm::{LlmClient, Message};
use crate::plan::Plan;

/// 计划来源：返回未经校验的原始 JSON
#[async_trait]
pub trait PlanSource: Send + Sync {
    async fn generate_plan(
        &self,
        profile: &UserProfile,
        grounded: &GroundedContext,
    ) -> Result<Value, String>;
}

static JSON_BLOCK_RE: OnceLock<Option<Regex>> = OnceLock::new();

/// 从 LLM 回复中取出 JSON：去掉 ``` 围栏，直接解析失败时取第一个 `{` / `[` 到最后一个 `}` / `]`
pub fn extract_json(text: &str) -> Result<Value, String> {
    let mut body = text.trim();
    if let Some(rest) = body.strip_prefix("```") {
        let rest = rest.strip_prefix("json").unwrap_or(rest);
        body = rest.strip_suffix("```").unwrap_or(rest).trim();
    }

    if let Ok(value) = serde_json::from_str(body) {
        return Ok(value);
    }

    let re = JSON_BLOCK_RE
        .get_or_init(|| Regex::new(r"(?s)(\{.*\}|\[.*\])").ok())
        .as_ref()
        .ok_or_else(|| "JSON pattern unavailable".to_string())?;
    let block = re
        .find(body)
        .ok_or_else(|| "No JSON object found in LLM output".to_string())?;
    serde_json::from_str(block.as_str()).map_err(|e| format!("Invalid JSON in LLM output: {}", e))
}

/// 基于 LLM 的 Planner
pub struct LlmPlanner {
    llm: Arc<dyn LlmClient>,
    system_prompt: String,
}

impl LlmPlanner {
    pub fn new(llm: Arc<dyn LlmClient>) -> Self {
        Self {
            llm,
            system_prompt: default_system_prompt(),
        }
    }

    pub fn system_prompt(&self) -> &str {
        &self.system_prompt
    }

    fn user_prompt(profile: &UserProfile, grounded: &GroundedContext) -> String {
        let meta = |key: &str| grounded.metadata.get(key).map(String::as_str).unwrap_or("");
        format!(
            "STUDENT CONTEXT:\n- Class: {}\n- Board: {}\n- Target exam: {}\n\n\
             GROUNDED CONTENT:\n- Subject: {}\n- Chapter: {}\n- Sub-topic: {}\n\n\
             IMAGE ANALYSIS:\n{}\n\n\
             Return ONLY the plan JSON.",
            profile.class_level,
            profile.board,
            profile.target_exam,
            meta("subject"),
            meta("chapter"),
            meta("sub_topic"),
            grounded.image_analysis,
        )
    }
}

fn default_system_prompt() -> String {
    let capabilities = CapabilityId::ALL
        .iter()
        .map(|id| format!("- {}: {}", id, id.description()))
        .collect::<Vec<_>>()
        .join("\n");
    format!(
        "You are the planner of an exam question generation pipeline.\n\
         Break the request into subtasks and assign each to exactly one capability.\n\
         Use each capability at most once. executed_by must be one of the ids below.\n\n\
         CAPABILITIES:\n{}\n\n\
         OUTPUT SCHEMA:\n{}",
        capabilities,
        Plan::schema_json()
    )
}

#[async_trait]
impl PlanSource for LlmPlanner {
    async fn generate_plan(
        &self,
        profile: &UserProfile,
        grounded: &GroundedContext,
    ) -> Result<Value, String> {
        let messages = [
            Message::system(self.system_prompt.clone()),
            Message::user(Self::user_prompt(profile, grounded)),
        ];
        let reply = self.llm.complete(&messages).await?;
        tracing::debug!("Planner raw output: {}", reply);
        extract_json(&reply)
    }
}

/// 固定计划（CLI --plan 与测试使用）
pub struct StaticPlan(pub Value);

#[async_trait]
impl PlanSource for StaticPlan {
    async fn generate_plan(
        &self,
        _profile: &UserProfile,
        _grounded: &GroundedContext,
    ) -> Result<Value, String> {
        Ok(self.0.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::MockLlmClient;
    use serde_json::json;

    #[test]
    fn test_extract_plain_json() {
        assert_eq!(extract_json(r#"{"a": 1}"#).unwrap(), json!({"a": 1}));
    }

    #[test]
    fn test_extract_fenced_json() {
        let text = "```json\n{\"objective\": \"x\"}\n```";
        assert_eq!(extract_json(text).unwrap()["objective"], "x");
    }

    #[test]
    fn test_extract_embedded_json() {
        let text = "Here is the plan:\n{\"subtasks\": []}\nHope it helps.";
        assert_eq!(extract_json(text).unwrap(), json!({"subtasks": []}));

        let list = "questions: [1, 2] done";
        assert_eq!(extract_json(list).unwrap(), json!([1, 2]));
    }

    #[test]
    fn test_extract_fails_without_json() {
        assert!(extract_json("no structure here").is_err());
        assert!(extract_json("{broken").is_err());
    }

    #[test]
    fn test_system_prompt_lists_capabilities() {
        let planner = LlmPlanner::new(Arc::new(MockLlmClient::new()));
        for id in CapabilityId::ALL {
            assert!(planner.system_prompt().contains(id.as_str()));
        }
        assert!(planner.system_prompt().contains("execution_order"));
    }

    #[tokio::test]
    async fn test_generate_plan_parses_reply() {
        let mock = Arc::new(MockLlmClient::with_replies([
            "```json\n{\"objective\": \"generate\"}\n```",
        ]));
        let planner = LlmPlanner::new(mock.clone());
        let raw = planner
            .generate_plan(&UserProfile::default(), &GroundedContext::default())
            .await
            .unwrap();
        assert_eq!(raw["objective"], "generate");
        assert_eq!(mock.calls(), 1);
    }

    #[tokio::test]
    async fn test_generate_plan_propagates_llm_error() {
        let mock = MockLlmClient::new();
        mock.push_error("quota exceeded");
        let planner = LlmPlanner::new(Arc::new(mock));
        let err = planner
            .generate_plan(&UserProfile::default(), &GroundedContext::default())
            .await
            .unwrap_err();
        assert_eq!(err, "quota exceeded");
    }
}
