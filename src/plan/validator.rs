//! 计划结构校验
//!
//! 对 Planner 产出的原始 JSON 做纯结构检查（不看 purpose / expected_output 的内容）：
//! 1. 顶层键恰好为四个必需键
//! 2. subtasks、execution_order 均为数组
//! 3. 每个任务包含五个必需字段
//! 4. executed_by 为已知能力
//! 5. task_id 互不重复
//! 6. execution_order 只引用已有的 task_id
//!
//! 无副作用，可重复调用。

use std::collections::BTreeSet;

use serde_json::Value;

use crate::capabilities::CapabilityId;
use crate::core::PlanError;
use crate::plan::Plan;

pub const REQUIRED_TOP_KEYS: [&str; 4] =
    ["planning_context", "objective", "subtasks", "execution_order"];

pub const REQUIRED_TASK_FIELDS: [&str; 5] =
    ["task_id", "purpose", "expected_output", "priority", "executed_by"];

/// 校验原始计划；成功时无返回值
pub fn validate_plan(raw: &Value) -> Result<(), PlanError> {
    let obj = raw
        .as_object()
        .ok_or_else(|| PlanError::Schema("plan must be a JSON object".to_string()))?;

    let keys: BTreeSet<&str> = obj.keys().map(String::as_str).collect();
    let required: BTreeSet<&str> = REQUIRED_TOP_KEYS.into_iter().collect();
    if keys != required {
        let missing: Vec<&str> = required.difference(&keys).copied().collect();
        let extra: Vec<&str> = keys.difference(&required).copied().collect();
        return Err(PlanError::Schema(format!(
            "invalid top-level keys (missing: {missing:?}, unexpected: {extra:?})"
        )));
    }

    let subtasks = obj["subtasks"]
        .as_array()
        .ok_or_else(|| PlanError::Schema("subtasks must be a list".to_string()))?;
    let execution_order = obj["execution_order"]
        .as_array()
        .ok_or_else(|| PlanError::Schema("execution_order must be a list".to_string()))?;

    let mut tasks = Vec::with_capacity(subtasks.len());
    for (idx, task) in subtasks.iter().enumerate() {
        let task = task
            .as_object()
            .ok_or_else(|| PlanError::Schema(format!("subtask #{idx} is not an object")))?;
        if let Some(field) = REQUIRED_TASK_FIELDS.iter().find(|f| !task.contains_key(**f)) {
            return Err(PlanError::Schema(format!("task missing required field: {field}")));
        }
        tasks.push(task);
    }

    for task in &tasks {
        let agent = &task["executed_by"];
        let known = agent
            .as_str()
            .map(|s| s.parse::<CapabilityId>().is_ok())
            .unwrap_or(false);
        if !known {
            return Err(PlanError::Schema(format!("invalid capability id: {agent}")));
        }
    }

    let mut task_ids: Vec<&Value> = Vec::with_capacity(tasks.len());
    for task in &tasks {
        let tid = &task["task_id"];
        if task_ids.contains(&tid) {
            return Err(PlanError::Schema(format!("duplicate task_id: {tid}")));
        }
        task_ids.push(tid);
    }

    if let Some(tid) = execution_order.iter().find(|tid| !task_ids.contains(tid)) {
        return Err(PlanError::Schema(format!(
            "execution_order references unknown task_id: {tid}"
        )));
    }

    Ok(())
}

/// 校验并解码为强类型 Plan；字段类型不符（如 priority 取值非法）同样视为 Schema 错误
pub fn parse_plan(raw: &Value) -> Result<Plan, PlanError> {
    validate_plan(raw)?;
    serde_json::from_value(raw.clone())
        .map_err(|e| PlanError::Schema(format!("plan field has wrong type: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn valid_plan() -> Value {
        json!({
            "planning_context": {
                "class": "11", "board": "CBSE", "target_exam": "NEET",
                "subject": "Chemistry", "chapter": "Test", "sub_topic": "Test"
            },
            "objective": "generate_exam_aligned_questions",
            "subtasks": [{
                "task_id": "extract",
                "purpose": "Extract",
                "expected_output": "Extracted content",
                "priority": "High",
                "executed_by": "content_analyzer"
            }],
            "execution_order": ["extract"]
        })
    }

    #[test]
    fn test_accepts_valid_plan() {
        validate_plan(&valid_plan()).unwrap();
        let plan = parse_plan(&valid_plan()).unwrap();
        assert_eq!(plan.subtasks[0].executed_by, CapabilityId::ContentAnalyzer);
    }

    #[test]
    fn test_validation_is_repeatable() {
        let plan = valid_plan();
        validate_plan(&plan).unwrap();
        validate_plan(&plan).unwrap();
    }

    #[test]
    fn test_rejects_non_object() {
        assert!(matches!(validate_plan(&json!([1, 2])), Err(PlanError::Schema(_))));
    }

    #[test]
    fn test_rejects_missing_and_extra_keys() {
        let mut plan = valid_plan();
        plan.as_object_mut().unwrap().remove("objective");
        assert!(matches!(validate_plan(&plan), Err(PlanError::Schema(_))));

        let mut plan = valid_plan();
        plan["notes"] = json!("extra");
        let err = validate_plan(&plan).unwrap_err();
        assert!(err.to_string().contains("notes"));
    }

    #[test]
    fn test_rejects_non_list_subtasks() {
        let mut plan = valid_plan();
        plan["subtasks"] = json!({"a": 1});
        assert!(validate_plan(&plan).unwrap_err().to_string().contains("subtasks"));

        let mut plan = valid_plan();
        plan["execution_order"] = json!("extract");
        assert!(validate_plan(&plan)
            .unwrap_err()
            .to_string()
            .contains("execution_order"));
    }

    #[test]
    fn test_rejects_missing_task_field() {
        let mut plan = valid_plan();
        plan["subtasks"][0].as_object_mut().unwrap().remove("priority");
        assert!(validate_plan(&plan).unwrap_err().to_string().contains("priority"));
    }

    #[test]
    fn test_rejects_invalid_capability() {
        let mut plan = valid_plan();
        plan["subtasks"][0]["executed_by"] = json!("unknown_agent");
        assert!(matches!(validate_plan(&plan), Err(PlanError::Schema(_))));
    }

    #[test]
    fn test_missing_field_reported_before_bad_capability() {
        let mut plan = valid_plan();
        plan["subtasks"][0]["executed_by"] = json!("unknown_agent");
        let mut second = plan["subtasks"][0].clone();
        second["task_id"] = json!("second");
        second.as_object_mut().unwrap().remove("purpose");
        plan["subtasks"].as_array_mut().unwrap().push(second);
        let err = validate_plan(&plan).unwrap_err().to_string();
        assert!(err.contains("purpose"), "{err}");
    }

    #[test]
    fn test_rejects_duplicate_task_id() {
        let mut plan = valid_plan();
        let mut second = plan["subtasks"][0].clone();
        second["executed_by"] = json!("solver");
        plan["subtasks"].as_array_mut().unwrap().push(second);
        let err = validate_plan(&plan).unwrap_err().to_string();
        assert!(err.contains("duplicate task_id"), "{err}");
    }

    #[test]
    fn test_rejects_dangling_execution_order() {
        let mut plan = valid_plan();
        plan["execution_order"] = json!(["extract", "ghost"]);
        assert!(validate_plan(&plan).unwrap_err().to_string().contains("ghost"));
    }

    #[test]
    fn test_every_capability_accepted() {
        for id in CapabilityId::ALL {
            let mut plan = valid_plan();
            plan["subtasks"][0]["executed_by"] = json!(id.as_str());
            validate_plan(&plan).unwrap();
        }
    }

    #[test]
    fn test_parse_rejects_bad_priority_value() {
        let mut plan = valid_plan();
        plan["subtasks"][0]["priority"] = json!("Urgent");
        validate_plan(&plan).unwrap();
        assert!(matches!(parse_plan(&plan), Err(PlanError::Schema(_))));
    }
}
