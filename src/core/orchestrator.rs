//! 主编排：一次运行的完整流水线
//!
//! grounding（node:multimodal）→ 规划（node:planner）→ 校验 / 修复 / 兜底 → 任务路由 → RunOutput。
//! 阶段失败都会降级（空上下文、兜底计划），只有部署级错误才终止运行。

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::capabilities::{register_llm_capabilities, CapabilityRegistry};
use crate::config::{AppConfig, LlmSection, NODE_MULTIMODAL, NODE_PLANNER};
use crate::core::grounding::GroundingSource;
use crate::core::resilience::{run_with_fallback, run_with_retry, RetryPolicy};
use crate::core::router::TaskRouter;
use crate::core::snapshot::SnapshotStore;
use crate::core::state::{GroundedContext, RunDiagnostics, SharedState, UserProfile};
use crate::core::PipelineError;
use crate::llm::{create_deepseek_client, LlmClient, MockLlmClient, OpenAiClient};
use crate::plan::{resolve_plan, LlmPlanner, PlanOrigin, PlanSource};

pub const LABEL_MULTIMODAL: &str = "node:multimodal";
pub const LABEL_PLANNER: &str = "node:planner";

/// 一次运行的对外结果
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunOutput {
    pub run_id: String,
    pub started_at: String,
    pub finished_at: String,
    pub plan_source: PlanOrigin,
    pub questions: Map<String, Value>,
    pub solutions: Map<String, Value>,
    pub evaluation: Map<String, Value>,
    pub knowledge_base: Map<String, Value>,
    pub diagnostics: RunDiagnostics,
}

impl RunOutput {
    fn from_state(state: SharedState, plan_source: PlanOrigin) -> Self {
        Self {
            run_id: state.run_id,
            started_at: state.started_at,
            finished_at: chrono::Utc::now().to_rfc3339(),
            plan_source,
            questions: state.question_bank,
            solutions: state.solver_output,
            evaluation: state.evaluation,
            knowledge_base: state.knowledge_base,
            diagnostics: state.diagnostics,
        }
    }
}

pub struct Pipeline {
    grounding: Arc<dyn GroundingSource>,
    planner: Arc<dyn PlanSource>,
    router: TaskRouter,
    grounding_policy: RetryPolicy,
    planner_policy: RetryPolicy,
    snapshots: Option<Arc<SnapshotStore>>,
}

impl Pipeline {
    /// 所有策略默认为单次尝试、不限时；用 with_*_policy 调整
    pub fn new(
        grounding: Arc<dyn GroundingSource>,
        planner: Arc<dyn PlanSource>,
        registry: CapabilityRegistry,
    ) -> Self {
        Self {
            grounding,
            planner,
            router: TaskRouter::new(Arc::new(registry), RetryPolicy::new()),
            grounding_policy: RetryPolicy::new(),
            planner_policy: RetryPolicy::new(),
            snapshots: None,
        }
    }

    pub fn with_stage_policies(mut self, grounding: RetryPolicy, planner: RetryPolicy) -> Self {
        self.grounding_policy = grounding;
        self.planner_policy = planner;
        self
    }

    /// 能力调用策略（所有任务共用）
    pub fn with_capability_policy(mut self, policy: RetryPolicy) -> Self {
        self.router = self.router.with_policy(policy);
        self
    }

    pub fn with_snapshots(mut self, store: SnapshotStore) -> Self {
        let store = Arc::new(store);
        self.router = self.router.with_snapshots(store.clone());
        self.snapshots = Some(store);
        self
    }

    fn snapshot(&self, state: &SharedState, label: &str) {
        if let Some(store) = &self.snapshots {
            store.save_or_warn(state, label);
        }
    }

    pub async fn run(
        &self,
        profile: UserProfile,
        image: impl Into<String>,
    ) -> Result<RunOutput, PipelineError> {
        let mut state = SharedState::new(profile);
        tracing::info!(run_id = %state.run_id, "Pipeline started");

        let grounded = self.ground(&mut state, image.into()).await;
        state.grounded_context = grounded;
        self.snapshot(&state, LABEL_MULTIMODAL);

        let raw = self.generate_plan(&mut state).await;
        let resolved = resolve_plan(raw.as_ref(), &state.user_profile, &state.grounded_context);
        for note in &resolved.notes {
            state.diagnostics.warn(format!("Plan degraded: {}", note));
        }
        tracing::info!(
            "Using {:?} plan with {} tasks",
            resolved.origin,
            resolved.plan.subtasks.len()
        );
        state.plan = Some(resolved.plan.clone());
        self.snapshot(&state, LABEL_PLANNER);

        if let Err(e) = self.router.execute(resolved.plan, &mut state).await {
            tracing::error!(run_id = %state.run_id, "Run aborted: {}", e);
            return Err(e);
        }
        self.snapshot(&state, "complete");

        tracing::info!(
            run_id = %state.run_id,
            fallbacks = state.diagnostics.fallbacks.len(),
            "Pipeline finished"
        );
        Ok(RunOutput::from_state(state, resolved.origin))
    }

    async fn ground(&self, state: &mut SharedState, image: String) -> GroundedContext {
        let grounding = self.grounding.clone();
        let profile = Arc::new(state.user_profile.clone());
        let image: Arc<str> = Arc::from(image);

        let (context, outcome) = run_with_fallback(
            LABEL_MULTIMODAL,
            &self.grounding_policy,
            || {
                let grounding = grounding.clone();
                let profile = profile.clone();
                let image = image.clone();
                async move { grounding.ground(&profile, &image).await }
            },
            |_| GroundedContext::default(),
        )
        .await;
        state.diagnostics.record(outcome);
        context
    }

    /// Planner 阶段；重试耗尽返回 None，由 resolve_plan 合成兜底计划
    async fn generate_plan(&self, state: &mut SharedState) -> Option<Value> {
        let planner = self.planner.clone();
        let profile = Arc::new(state.user_profile.clone());
        let grounded = Arc::new(state.grounded_context.clone());

        let result = run_with_retry(LABEL_PLANNER, &self.planner_policy, || {
            let planner = planner.clone();
            let profile = profile.clone();
            let grounded = grounded.clone();
            async move { planner.generate_plan(&profile, &grounded).await }
        })
        .await;

        match result {
            Ok((raw, outcome)) => {
                state.diagnostics.record(outcome);
                Some(raw)
            }
            Err(failure) => {
                let err = PipelineError::from_stage_failure(&failure);
                let mut outcome = failure.outcome;
                outcome.fallback_used = true;
                state.diagnostics.record(outcome);
                state.diagnostics.warn(err.to_string());
                None
            }
        }
    }
}

/// 按 [llm] 段选择后端；缺少 API Key 时退回 Mock
pub fn create_llm_from_config(cfg: &LlmSection) -> Result<Arc<dyn LlmClient>, PipelineError> {
    let has_key = |name: &str| std::env::var(name).is_ok();
    match cfg.provider.to_lowercase().as_str() {
        "mock" => Ok(Arc::new(MockLlmClient::new())),
        "deepseek" if has_key("DEEPSEEK_API_KEY") || has_key("OPENAI_API_KEY") => {
            let client = create_deepseek_client(cfg.model.as_deref());
            tracing::info!("Using DeepSeek LLM ({})", client.model());
            Ok(Arc::new(client))
        }
        "openai" if has_key("OPENAI_API_KEY") => {
            let model = cfg.model.as_deref().unwrap_or("gpt-4o-mini");
            tracing::info!("Using OpenAI LLM ({})", model);
            Ok(Arc::new(OpenAiClient::new(cfg.base_url.as_deref(), model, None)))
        }
        "deepseek" | "openai" => {
            tracing::warn!("No API key set for provider '{}', using Mock LLM", cfg.provider);
            Ok(Arc::new(MockLlmClient::new()))
        }
        other => Err(PipelineError::Config(format!("Unknown LLM provider: {}", other))),
    }
}

/// 按配置组装流水线：LLM Planner + 六个 LLM 能力 + 配置中的重试策略与快照目录
///
/// planner 为 None 时使用 LlmPlanner。
pub fn create_pipeline(
    cfg: &AppConfig,
    llm: Arc<dyn LlmClient>,
    grounding: Arc<dyn GroundingSource>,
    planner: Option<Arc<dyn PlanSource>>,
) -> Pipeline {
    let mut registry = CapabilityRegistry::new();
    register_llm_capabilities(&mut registry, llm.clone());
    let planner = planner.unwrap_or_else(|| Arc::new(LlmPlanner::new(llm)));

    let resilience = &cfg.resilience;
    let mut pipeline = Pipeline::new(grounding, planner, registry)
        .with_stage_policies(
            resilience.node_policy(NODE_MULTIMODAL),
            resilience.node_policy(NODE_PLANNER),
        )
        .with_capability_policy(resilience.capability_policy());
    if let Some(dir) = &cfg.app.snapshot_dir {
        let store = SnapshotStore::new(dir);
        tracing::info!("Writing run snapshots to {}", store.root().display());
        pipeline = pipeline.with_snapshots(store);
    }
    pipeline
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::grounding::StaticGrounding;
    use crate::plan::StaticPlan;
    use async_trait::async_trait;
    use serde_json::json;
    use std::time::Duration;

    struct FailingPlanner;

    #[async_trait]
    impl PlanSource for FailingPlanner {
        async fn generate_plan(
            &self,
            _profile: &UserProfile,
            _grounded: &GroundedContext,
        ) -> Result<Value, String> {
            Err("planner offline".into())
        }
    }

    struct FailingGrounding;

    #[async_trait]
    impl GroundingSource for FailingGrounding {
        async fn ground(&self, _profile: &UserProfile, _image: &str) -> Result<GroundedContext, String> {
            Err("vision model down".into())
        }
    }

    fn llm_registry(replies: &[&str]) -> CapabilityRegistry {
        let mut registry = CapabilityRegistry::new();
        register_llm_capabilities(&mut registry, Arc::new(MockLlmClient::with_replies(replies.to_vec())));
        registry
    }

    fn profile() -> UserProfile {
        UserProfile {
            class_level: "12".into(),
            board: "CBSE".into(),
            target_exam: "JEE".into(),
        }
    }

    #[tokio::test]
    async fn test_planner_failure_uses_fallback_plan() {
        let pipeline = Pipeline::new(
            Arc::new(StaticGrounding::default()),
            Arc::new(FailingPlanner),
            llm_registry(&["concepts", "patterns", r#"{"mcq": [{"q": "1"}]}"#]),
        )
        .with_stage_policies(RetryPolicy::new(), RetryPolicy::new().with_retries(1));

        let output = pipeline.run(profile(), "optics").await.unwrap();
        assert_eq!(output.plan_source, PlanOrigin::Fallback);
        assert!(output.diagnostics.fallbacks.contains(&LABEL_PLANNER.to_string()));
        assert_eq!(output.diagnostics.retries[LABEL_PLANNER], 1);
        assert_eq!(output.questions["mcq"][0]["q"], "1");
        let keys: Vec<&str> = output.knowledge_base.keys().map(String::as_str).collect();
        assert_eq!(keys, vec!["content_analyzer", "exam_pattern_analyst", "question_generator"]);
    }

    #[tokio::test]
    async fn test_grounding_failure_falls_back_to_empty_context() {
        let pipeline = Pipeline::new(
            Arc::new(FailingGrounding),
            Arc::new(FailingPlanner),
            llm_registry(&["a", "b", "not json"]),
        );
        let output = pipeline.run(profile(), "x").await.unwrap();
        assert!(output.diagnostics.fallbacks.contains(&LABEL_MULTIMODAL.to_string()));
        // 出题回复无法解析，走能力兜底
        assert!(output
            .diagnostics
            .fallbacks
            .contains(&"capability:question_generator".to_string()));
        assert_eq!(output.questions["mcq"], json!([]));
    }

    #[tokio::test]
    async fn test_duplicate_plan_is_replaced_before_routing() {
        let raw = json!({
            "planning_context": {}, "objective": "x",
            "subtasks": [
                {"task_id": "a", "purpose": "p", "expected_output": "o", "priority": "High", "executed_by": "solver"},
                {"task_id": "b", "purpose": "p", "expected_output": "o", "priority": "High", "executed_by": "solver"}
            ],
            "execution_order": ["a", "b"]
        });
        let pipeline = Pipeline::new(
            Arc::new(StaticGrounding::default()),
            Arc::new(StaticPlan(raw)),
            llm_registry(&[]),
        );
        let output = pipeline.run(profile(), "x").await.unwrap();
        assert_eq!(output.plan_source, PlanOrigin::Fallback);
    }

    #[tokio::test]
    async fn test_missing_handler_aborts_run() {
        let pipeline = Pipeline::new(
            Arc::new(StaticGrounding::default()),
            Arc::new(FailingPlanner),
            CapabilityRegistry::new(),
        );
        let err = pipeline.run(profile(), "x").await.unwrap_err();
        assert!(err.is_fatal());
    }

    #[tokio::test]
    async fn test_snapshots_written_per_stage() {
        let dir = tempfile::tempdir().unwrap();
        let pipeline = Pipeline::new(
            Arc::new(StaticGrounding::default()),
            Arc::new(FailingPlanner),
            llm_registry(&[]),
        )
        .with_capability_policy(RetryPolicy::new().with_timeout(Duration::from_secs(5)))
        .with_snapshots(SnapshotStore::new(dir.path()));
        let output = pipeline.run(profile(), "x").await.unwrap();

        // multimodal + planner + 三个任务 + complete
        let written = std::fs::read_dir(dir.path().join(&output.run_id)).unwrap().count();
        assert_eq!(written, 6);
    }

    #[test]
    fn test_llm_selection() {
        let mock = LlmSection {
            provider: "mock".into(),
            ..LlmSection::default()
        };
        assert!(create_llm_from_config(&mock).is_ok());

        let unknown = LlmSection {
            provider: "carrier-pigeon".into(),
            ..LlmSection::default()
        };
        assert!(matches!(
            create_llm_from_config(&unknown),
            Err(PipelineError::Config(_))
        ));
    }
}
