//! 任务路由器
//!
//! 先规范化 task_id（同一能力出现两次即致命错误，任何任务都不会执行），
//! 再按 execution_order 严格顺序执行：查找任务 → 解析能力处理器 → 经执行器（重试/超时/兜底）调用 →
//! 合并局部更新 → 在 knowledge_base 中以能力 ID 记录完成情况。

use std::sync::Arc;

use serde_json::{json, Value};

use crate::capabilities::{CapabilityRegistry, RunContext};
use crate::core::merge::merge_update;
use crate::core::resilience::{run_with_fallback, RetryPolicy};
use crate::core::snapshot::SnapshotStore;
use crate::core::state::SharedState;
use crate::core::PipelineError;
use crate::plan::{normalize_task_ids, Plan};

pub struct TaskRouter {
    registry: Arc<CapabilityRegistry>,
    policy: RetryPolicy,
    snapshots: Option<Arc<SnapshotStore>>,
}

impl TaskRouter {
    pub fn new(registry: Arc<CapabilityRegistry>, policy: RetryPolicy) -> Self {
        Self {
            registry,
            policy,
            snapshots: None,
        }
    }

    pub fn with_snapshots(mut self, store: Arc<SnapshotStore>) -> Self {
        self.snapshots = Some(store);
        self
    }

    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// 执行计划并就地更新共享状态；仅在重复能力分配或处理器缺失时返回错误
    pub async fn execute(&self, mut plan: Plan, state: &mut SharedState) -> Result<(), PipelineError> {
        normalize_task_ids(&mut plan)?;
        state.plan = Some(plan.clone());

        let ctx = Arc::new(RunContext::from_state(state));

        tracing::info!("Executing {} tasks", plan.execution_order.len());

        for task_id in &plan.execution_order {
            let Some(task) = plan.task(task_id) else {
                state
                    .diagnostics
                    .warn(format!("Skipping unknown task_id: {task_id}"));
                continue;
            };

            let capability = task.executed_by;
            let Some(handler) = self.registry.get(capability) else {
                tracing::error!("No handler registered for capability '{}'", capability);
                return Err(PipelineError::UnknownCapability(capability.to_string()));
            };

            tracing::info!("Running task {} with capability {}", task_id, capability);
            let label = format!("capability:{capability}");
            let snapshot = Arc::new(state.clone());
            let task = Arc::new(task.clone());

            let (update, outcome) = run_with_fallback(
                &label,
                &self.policy,
                || {
                    let handler = handler.clone();
                    let ctx = ctx.clone();
                    let task = task.clone();
                    let snapshot = snapshot.clone();
                    async move { handler.execute(&ctx, &task, &snapshot).await }
                },
                |_| capability.fallback_update(),
            )
            .await;
            state.diagnostics.record(outcome);

            let knowledge = merge_update(state, capability, update.clone());
            let entry = knowledge.unwrap_or_else(|| completion_record(&capability.to_string(), update));
            state.knowledge_base.insert(capability.to_string(), entry);

            tracing::info!("Completed task {}", task_id);
            if let Some(store) = &self.snapshots {
                store.save_or_warn(state, &format!("task:{capability}"));
            }
        }

        tracing::info!("Task execution complete");
        Ok(())
    }
}

/// 处理器未写 knowledge_base 时记录的完成条目
fn completion_record(capability: &str, output: Value) -> Value {
    json!({ "capability": capability, "output": output })
}
