//! 计划修复与兜底计划合成
//!
//! repair：对 executed_by 非法的任务依次尝试「别名表精确匹配 → task_id 关键词启发式 → 默认 evaluator」，
//! 重复的 task_id 追加 `_2`、`_3` 后缀并紧跟原 ID 排入执行顺序；
//! 再把 execution_order 过滤为仍存在的 ID（为空时按 subtasks 原顺序重建）。确定性、对任何列表形状的输入都能给出结果。
//! fallback：只用已有的用户画像与 grounding 元数据合成三步最小计划，不依赖任何外部调用。

use std::collections::BTreeMap;

use serde_json::{Map, Value};

use crate::capabilities::CapabilityId;
use crate::core::state::{GroundedContext, UserProfile};
use crate::core::PlanError;
use crate::plan::{Plan, Priority, TaskDescriptor};

/// 常见自由文本写法 → 规范能力 ID（键已小写、单空格）
const ALIASES: &[(&str, CapabilityId)] = &[
    ("content analyzer", CapabilityId::ContentAnalyzer),
    ("content_analyzer_agent", CapabilityId::ContentAnalyzer),
    ("concept extractor", CapabilityId::ContentAnalyzer),
    ("exam analyst", CapabilityId::ExamPatternAnalyst),
    ("exam pattern agent", CapabilityId::ExamPatternAnalyst),
    ("question designer agent", CapabilityId::QuestionDesigner),
    ("distractor agent", CapabilityId::QuestionDesigner),
    ("generator", CapabilityId::QuestionGenerator),
    ("question writer", CapabilityId::QuestionGenerator),
    ("solution agent", CapabilityId::Solver),
    ("answer solver", CapabilityId::Solver),
    ("teacher", CapabilityId::Evaluator),
    ("examiner", CapabilityId::Evaluator),
];

/// task_id 关键词规则，按顺序匹配，先命中者生效
const KEYWORD_RULES: &[(&str, CapabilityId)] = &[
    ("extract", CapabilityId::ContentAnalyzer),
    ("analy", CapabilityId::ContentAnalyzer),
    ("exam", CapabilityId::ExamPatternAnalyst),
    ("design", CapabilityId::QuestionDesigner),
    ("generate", CapabilityId::QuestionGenerator),
    ("solve", CapabilityId::Solver),
];

const DEFAULT_CAPABILITY: CapabilityId = CapabilityId::Evaluator;

/// 小写、去首尾空白、折叠内部空白
fn normalize_label(raw: &str) -> String {
    raw.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// 别名表查找（大小写与空白不敏感）
pub fn lookup_alias(raw: &str) -> Option<CapabilityId> {
    let key = normalize_label(raw);
    ALIASES
        .iter()
        .find(|(alias, _)| *alias == key)
        .map(|(_, id)| *id)
}

/// 按 task_id 关键词推断能力，未命中时为 evaluator
pub fn infer_from_task_id(task_id: &str) -> CapabilityId {
    let tid = task_id.to_lowercase();
    KEYWORD_RULES
        .iter()
        .find(|(keyword, _)| tid.contains(keyword))
        .map(|(_, id)| *id)
        .unwrap_or(DEFAULT_CAPABILITY)
}

/// 解析单个任务的能力：规范 ID → 别名 → 关键词启发式
pub fn resolve_capability(executed_by: &str, task_id: &str) -> CapabilityId {
    let normalized = normalize_label(executed_by);
    normalized
        .parse::<CapabilityId>()
        .ok()
        .or_else(|| lookup_alias(&normalized))
        .unwrap_or_else(|| infer_from_task_id(task_id))
}

fn value_to_text(value: Option<&Value>) -> String {
    match value {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Null) | None => String::new(),
        Some(other) => other.to_string(),
    }
}

fn repair_planning_context(value: Option<&Value>) -> BTreeMap<String, String> {
    value
        .and_then(Value::as_object)
        .map(|ctx| {
            ctx.iter()
                .map(|(k, v)| (k.clone(), value_to_text(Some(v))))
                .collect()
        })
        .unwrap_or_default()
}

fn repair_task(idx: usize, task: &Map<String, Value>) -> TaskDescriptor {
    let mut task_id = value_to_text(task.get("task_id")).trim().to_string();
    if task_id.is_empty() {
        task_id = format!("task_{}", idx + 1);
    }

    let raw_agent = value_to_text(task.get("executed_by"));
    let executed_by = resolve_capability(&raw_agent, &task_id);
    if raw_agent != executed_by.as_str() {
        tracing::warn!(
            "Task '{}': executed_by '{}' repaired to '{}'",
            task_id,
            raw_agent,
            executed_by
        );
    }

    let priority = task
        .get("priority")
        .and_then(Value::as_str)
        .and_then(Priority::parse_lenient)
        .unwrap_or_default();

    TaskDescriptor {
        task_id,
        purpose: value_to_text(task.get("purpose")),
        expected_output: value_to_text(task.get("expected_output")),
        priority,
        executed_by,
    }
}

fn dedup_task_id(task_id: &str, existing: &[TaskDescriptor]) -> String {
    (2..)
        .map(|n| format!("{task_id}_{n}"))
        .find(|candidate| existing.iter().all(|t| &t.task_id != candidate))
        .unwrap_or_else(|| task_id.to_string())
}

/// 尽力修复原始计划；输入根本不是计划形状（非对象 / subtasks 非数组）或修复后无任务时失败
pub fn repair_plan(raw: &Value) -> Result<Plan, PlanError> {
    let obj = raw
        .as_object()
        .ok_or_else(|| PlanError::RepairFailure("plan is not a JSON object".to_string()))?;

    let raw_tasks = match obj.get("subtasks") {
        None | Some(Value::Null) => &[][..],
        Some(Value::Array(items)) => items.as_slice(),
        Some(_) => {
            return Err(PlanError::RepairFailure("subtasks is not a list".to_string()));
        }
    };

    let mut subtasks: Vec<TaskDescriptor> = Vec::with_capacity(raw_tasks.len());
    // 原 task_id → 因重复而改名后的 ID
    let mut renamed: Vec<(String, String)> = Vec::new();
    for (idx, item) in raw_tasks.iter().enumerate() {
        let Some(task) = item.as_object() else {
            tracing::warn!("Dropping subtask #{} that is not an object", idx);
            continue;
        };
        let mut task = repair_task(idx, task);
        if subtasks.iter().any(|t| t.task_id == task.task_id) {
            let unique = dedup_task_id(&task.task_id, &subtasks);
            tracing::warn!("Duplicate task_id '{}' renamed to '{}'", task.task_id, unique);
            renamed.push((task.task_id.clone(), unique.clone()));
            task.task_id = unique;
        }
        subtasks.push(task);
    }
    if subtasks.is_empty() {
        return Err(PlanError::RepairFailure("plan has no usable subtasks".to_string()));
    }

    let valid_ids: Vec<&str> = subtasks.iter().map(|t| t.task_id.as_str()).collect();
    let mut execution_order: Vec<String> = Vec::new();
    for tid in obj
        .get("execution_order")
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
        .filter_map(Value::as_str)
        .filter(|tid| valid_ids.contains(tid))
    {
        if execution_order.iter().any(|seen| seen == tid) {
            continue;
        }
        execution_order.push(tid.to_string());
        // 改名的任务紧跟在原 ID 之后执行
        execution_order.extend(
            renamed
                .iter()
                .filter(|(original, _)| original == tid)
                .map(|(_, unique)| unique.clone()),
        );
    }
    if execution_order.is_empty() {
        execution_order = valid_ids.iter().map(|s| s.to_string()).collect();
    }

    tracing::warn!("Planner output repaired");
    Ok(Plan {
        planning_context: repair_planning_context(obj.get("planning_context")),
        objective: value_to_text(obj.get("objective")),
        subtasks,
        execution_order,
    })
}

pub const FALLBACK_OBJECTIVE: &str = "generate_exam_aligned_questions";

/// 合成三步兜底计划：内容抽取 → 考点分析 → 出题，总是成功
pub fn fallback_plan(profile: &UserProfile, grounded: &GroundedContext) -> Plan {
    let meta = |key: &str| grounded.metadata.get(key).cloned().unwrap_or_default();

    let planning_context = BTreeMap::from([
        ("class".to_string(), profile.class_level.clone()),
        ("board".to_string(), profile.board.clone()),
        ("target_exam".to_string(), profile.target_exam.clone()),
        ("subject".to_string(), meta("subject")),
        ("chapter".to_string(), meta("chapter")),
        ("sub_topic".to_string(), meta("sub_topic")),
    ]);

    let task = |task_id: &str, purpose: &str, expected: &str, executed_by| TaskDescriptor {
        task_id: task_id.to_string(),
        purpose: purpose.to_string(),
        expected_output: expected.to_string(),
        priority: Priority::High,
        executed_by,
    };

    let subtasks = vec![
        task(
            "extract_core_content",
            "Extract key concepts and facts",
            "Structured list of concepts and facts",
            CapabilityId::ContentAnalyzer,
        ),
        task(
            "analyze_exam_alignment",
            "Identify exam relevance and question styles",
            "Exam-aligned insights",
            CapabilityId::ExamPatternAnalyst,
        ),
        task(
            "generate_questions",
            "Generate final questions and answers",
            "Structured question bank",
            CapabilityId::QuestionGenerator,
        ),
    ];
    let execution_order = subtasks.iter().map(|t| t.task_id.clone()).collect();

    Plan {
        planning_context,
        objective: FALLBACK_OBJECTIVE.to_string(),
        subtasks,
        execution_order,
    }
}
