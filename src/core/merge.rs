//! 状态合并与产物规范化
//!
//! 能力处理器返回「局部更新」：字段名 → 新值，可含 knowledge_base 子映射。
//! - knowledge_base：若含当前能力 ID 的条目取其值；否则单条目映射取唯一值；否则整体原样存入
//! - question_bank / solver_output / evaluation：先规范化再写入（裸数组包装为三类容器，非集合替换为空容器）
//! - 其它字段：丢弃并记录告警

use serde_json::{Map, Value};

use crate::capabilities::CapabilityId;
use crate::core::state::SharedState;

pub const QUESTION_CATEGORIES: [&str; 3] = ["mcq", "short_answer", "long_answer"];

/// 规范的空三类容器 {mcq: [], short_answer: [], long_answer: []}
pub fn empty_question_set() -> Map<String, Value> {
    QUESTION_CATEGORIES
        .iter()
        .map(|c| (c.to_string(), Value::Array(Vec::new())))
        .collect()
}

fn wrap_as_mcq(items: Vec<Value>) -> Map<String, Value> {
    let mut set = empty_question_set();
    set.insert("mcq".to_string(), Value::Array(items));
    set
}

/// 共享状态中可由能力写入的字段
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StateField {
    KnowledgeBase,
    QuestionBank,
    SolverOutput,
    Evaluation,
}

impl StateField {
    pub fn from_key(key: &str) -> Option<Self> {
        match key {
            "knowledge_base" => Some(StateField::KnowledgeBase),
            "question_bank" => Some(StateField::QuestionBank),
            "solver_output" => Some(StateField::SolverOutput),
            "evaluation" => Some(StateField::Evaluation),
            _ => None,
        }
    }
}

/// 规范化产物；第二个返回值表示是否发生了强制转换
pub fn normalize_artifact(field: StateField, value: Value) -> (Map<String, Value>, bool) {
    match (field, value) {
        (_, Value::Object(map)) => (map, false),
        (StateField::Evaluation, Value::Array(items)) => {
            let mut set = wrap_as_mcq(items);
            set.insert(
                "overall_feedback".to_string(),
                Value::String("Evaluator returned a list; wrapped for safety.".to_string()),
            );
            (set, true)
        }
        (StateField::Evaluation, _) => {
            let mut set = empty_question_set();
            set.insert(
                "overall_feedback".to_string(),
                Value::String("Evaluator output was not an object; coerced.".to_string()),
            );
            (set, true)
        }
        (_, Value::Array(items)) => (wrap_as_mcq(items), true),
        (_, _) => (empty_question_set(), true),
    }
}

/// 解开 knowledge_base 更新中的偶然嵌套
fn unwrap_knowledge(capability: CapabilityId, value: Value) -> Value {
    let mut map = match value {
        Value::Object(map) => map,
        other => return other,
    };
    if let Some(own) = map.remove(capability.as_str()) {
        return own;
    }
    if map.len() == 1 {
        if let Some((_, sole)) = map.into_iter().next() {
            return sole;
        }
        return Value::Null;
    }
    Value::Object(map)
}

/// 把一次能力更新并入共享状态；返回本次写入 knowledge_base 的值（若有）
pub fn merge_update(state: &mut SharedState, capability: CapabilityId, update: Value) -> Option<Value> {
    let fields = match update {
        Value::Object(fields) => fields,
        other => {
            state.diagnostics.warn(format!(
                "Capability '{capability}' returned a non-object update; stored verbatim in knowledge_base"
            ));
            state
                .knowledge_base
                .insert(capability.to_string(), other.clone());
            return Some(other);
        }
    };

    let mut knowledge = None;
    for (key, value) in fields {
        match StateField::from_key(&key) {
            Some(StateField::KnowledgeBase) => {
                let entry = unwrap_knowledge(capability, value);
                state
                    .knowledge_base
                    .insert(capability.to_string(), entry.clone());
                knowledge = Some(entry);
            }
            Some(field) => {
                let (normalized, coerced) = normalize_artifact(field, value);
                if coerced {
                    state.diagnostics.warn(format!(
                        "Capability '{capability}' returned a malformed '{key}'; normalized"
                    ));
                }
                let slot = match field {
                    StateField::QuestionBank => &mut state.question_bank,
                    StateField::SolverOutput => &mut state.solver_output,
                    _ => &mut state.evaluation,
                };
                *slot = normalized;
            }
            None => {
                state.diagnostics.warn(format!(
                    "Ignoring unknown state field '{key}' from capability '{capability}'"
                ));
            }
        }
    }
    knowledge
}
