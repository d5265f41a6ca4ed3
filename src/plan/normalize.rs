//! task_id 规范化
//!
//! knowledge_base 以能力 ID 为键，因此一个计划中每种能力最多只能出现一次；
//! 规范化把每个任务的 task_id 改写为其 executed_by，并同步改写 execution_order。
//! 发现重复能力或重复 task_id 时直接报错，计划保持原样。

use std::collections::HashMap;

use crate::capabilities::CapabilityId;
use crate::core::PlanError;
use crate::plan::Plan;

/// 检查是否有两个任务指向同一能力
pub fn check_unique_capabilities(plan: &Plan) -> Result<(), PlanError> {
    let mut seen: HashMap<CapabilityId, &str> = HashMap::new();
    for task in &plan.subtasks {
        if let Some(first) = seen.insert(task.executed_by, &task.task_id) {
            return Err(PlanError::DuplicateCapabilityAssignment {
                capability: task.executed_by.to_string(),
                first: first.to_string(),
                second: task.task_id.clone(),
            });
        }
    }
    Ok(())
}

/// 把 task_id 改写为能力 ID；execution_order 中无法对应的 ID 原样保留（由路由器跳过并告警）
pub fn normalize_task_ids(plan: &mut Plan) -> Result<(), PlanError> {
    check_unique_capabilities(plan)?;

    let mut renames: HashMap<String, String> = HashMap::new();
    for task in &plan.subtasks {
        if renames
            .insert(task.task_id.clone(), task.executed_by.to_string())
            .is_some()
        {
            return Err(PlanError::Schema(format!("duplicate task_id: {}", task.task_id)));
        }
    }

    for task in &mut plan.subtasks {
        task.task_id = task.executed_by.to_string();
    }
    for tid in &mut plan.execution_order {
        if let Some(new_id) = renames.get(tid.as_str()) {
            *tid = new_id.clone();
        }
    }
    Ok(())
}
