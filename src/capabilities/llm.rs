//! 基于 LLM 的能力实现
//!
//! 分析类能力把回复文本写入 knowledge_base；出题 / 解题 / 评估类能力要求 JSON 回复，写入各自的产物字段。
//! 回复形状是否规范交给合并层处理，这里只负责取出 JSON。

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Map, Value};

use crate::capabilities::{Capability, CapabilityId, CapabilityRegistry, RunContext};
use crate::core::state::SharedState;
use crate::core::CapabilityError;
use crate::llm::{LlmClient, Message};
use crate::plan::{extract_json, TaskDescriptor};

pub struct LlmCapability {
    id: CapabilityId,
    llm: Arc<dyn LlmClient>,
}

impl LlmCapability {
    pub fn new(id: CapabilityId, llm: Arc<dyn LlmClient>) -> Self {
        Self { id, llm }
    }

    fn system_prompt(&self) -> String {
        let mut prompt = format!(
            "You are the {} of an exam question generation pipeline. {}",
            self.id,
            self.id.description()
        );
        if self.id.artifact_field().is_some() {
            prompt.push_str(
                "\nRespond with ONLY a JSON object with keys \"mcq\", \"short_answer\" and \"long_answer\", each a list.",
            );
        }
        prompt
    }

    fn user_prompt(&self, ctx: &RunContext, task: &TaskDescriptor, state: &SharedState) -> String {
        let academic = ctx
            .planning_context
            .iter()
            .map(|(k, v)| format!("- {}: {}", k, v))
            .collect::<Vec<_>>()
            .join("\n");

        let mut prompt = format!(
            "TASK PURPOSE:\n{}\n\nEXPECTED OUTPUT:\n{}\n\nACADEMIC CONTEXT:\n{}\n\nSOURCE CONTENT:\n{}",
            task.purpose, task.expected_output, academic, ctx.grounded_context.image_analysis
        );
        if !state.knowledge_base.is_empty() {
            prompt.push_str(&format!("\n\nPRIOR RESULTS:\n{}", pretty(&state.knowledge_base)));
        }
        if matches!(self.id, CapabilityId::Solver | CapabilityId::Evaluator) {
            prompt.push_str(&format!("\n\nQUESTIONS:\n{}", pretty(&state.question_bank)));
        }
        if self.id == CapabilityId::Evaluator {
            prompt.push_str(&format!("\n\nSOLUTIONS:\n{}", pretty(&state.solver_output)));
        }
        prompt
    }
}

fn pretty(map: &Map<String, Value>) -> String {
    serde_json::to_string_pretty(map).unwrap_or_default()
}

#[async_trait]
impl Capability for LlmCapability {
    fn id(&self) -> CapabilityId {
        self.id
    }

    async fn execute(
        &self,
        ctx: &RunContext,
        task: &TaskDescriptor,
        state: &SharedState,
    ) -> Result<Value, CapabilityError> {
        let messages = [
            Message::system(self.system_prompt()),
            Message::user(self.user_prompt(ctx, task, state)),
        ];
        let reply = self
            .llm
            .complete(&messages)
            .await
            .map_err(CapabilityError::Llm)?;

        match self.id.artifact_field() {
            None => Ok(json!({ "knowledge_base": { self.id.as_str(): reply.trim() } })),
            Some(field) => {
                let artifact = extract_json(&reply).map_err(CapabilityError::Parse)?;
                Ok(json!({ field: artifact }))
            }
        }
    }
}

/// 为全部六种能力注册共用同一 LLM 的默认实现
pub fn register_llm_capabilities(registry: &mut CapabilityRegistry, llm: Arc<dyn LlmClient>) {
    for id in CapabilityId::ALL {
        registry.register(LlmCapability::new(id, llm.clone()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::state::UserProfile;
    use crate::llm::MockLlmClient;
    use crate::plan::Priority;

    fn task(purpose: &str) -> TaskDescriptor {
        TaskDescriptor {
            task_id: "t".into(),
            purpose: purpose.into(),
            expected_output: "o".into(),
            priority: Priority::Medium,
            executed_by: CapabilityId::ContentAnalyzer,
        }
    }

    #[tokio::test]
    async fn test_text_capability_writes_knowledge() {
        let llm = Arc::new(MockLlmClient::with_replies(["  photosynthesis facts \n"]));
        let cap = LlmCapability::new(CapabilityId::ContentAnalyzer, llm);
        let state = SharedState::new(UserProfile::default());
        let update = cap
            .execute(&RunContext::from_state(&state), &task("extract"), &state)
            .await
            .unwrap();
        assert_eq!(update, json!({"knowledge_base": {"content_analyzer": "photosynthesis facts"}}));
    }

    #[tokio::test]
    async fn test_artifact_capability_parses_json() {
        let llm = Arc::new(MockLlmClient::with_replies([
            "```json\n{\"mcq\": [{\"question\": \"Q1\"}]}\n```",
        ]));
        let cap = LlmCapability::new(CapabilityId::QuestionGenerator, llm);
        let state = SharedState::new(UserProfile::default());
        let update = cap
            .execute(&RunContext::from_state(&state), &task("generate"), &state)
            .await
            .unwrap();
        assert_eq!(update["question_bank"]["mcq"][0]["question"], "Q1");
    }

    #[tokio::test]
    async fn test_unparseable_artifact_is_error() {
        let llm = Arc::new(MockLlmClient::with_replies(["sorry, I cannot"]));
        let cap = LlmCapability::new(CapabilityId::Solver, llm);
        let state = SharedState::new(UserProfile::default());
        let err = cap
            .execute(&RunContext::from_state(&state), &task("solve"), &state)
            .await
            .unwrap_err();
        assert!(matches!(err, CapabilityError::Parse(_)));
    }

    #[test]
    fn test_evaluator_prompt_includes_questions_and_solutions() {
        let cap = LlmCapability::new(CapabilityId::Evaluator, Arc::new(MockLlmClient::new()));
        let mut state = SharedState::new(UserProfile::default());
        state.question_bank.insert("mcq".into(), json!(["Q-marker"]));
        state.solver_output.insert("mcq".into(), json!(["S-marker"]));
        let prompt = cap.user_prompt(&RunContext::from_state(&state), &task("evaluate"), &state);
        assert!(prompt.contains("Q-marker"));
        assert!(prompt.contains("S-marker"));
    }

    #[test]
    fn test_register_all() {
        let mut registry = CapabilityRegistry::new();
        register_llm_capabilities(&mut registry, Arc::new(MockLlmClient::new()));
        assert!(registry.missing().is_empty());
    }
}
