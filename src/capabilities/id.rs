//! 能力标识：固定、封闭的六种能力
//!
//! 计划中的 executed_by 只能取这些值；每种能力自带描述（用于 Planner 提示词）与兜底结果。

use std::fmt;
use std::str::FromStr;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::core::merge::empty_question_set;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum CapabilityId {
    ContentAnalyzer,
    ExamPatternAnalyst,
    QuestionDesigner,
    QuestionGenerator,
    Solver,
    Evaluator,
}

impl CapabilityId {
    pub const ALL: [CapabilityId; 6] = [
        CapabilityId::ContentAnalyzer,
        CapabilityId::ExamPatternAnalyst,
        CapabilityId::QuestionDesigner,
        CapabilityId::QuestionGenerator,
        CapabilityId::Solver,
        CapabilityId::Evaluator,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            CapabilityId::ContentAnalyzer => "content_analyzer",
            CapabilityId::ExamPatternAnalyst => "exam_pattern_analyst",
            CapabilityId::QuestionDesigner => "question_designer",
            CapabilityId::QuestionGenerator => "question_generator",
            CapabilityId::Solver => "solver",
            CapabilityId::Evaluator => "evaluator",
        }
    }

    /// 人类可读描述（供 Planner 提示词与调试）
    pub fn description(&self) -> &'static str {
        match self {
            CapabilityId::ContentAnalyzer => {
                "Extracts key concepts, definitions, facts, equations, reactions and relationships from the given content."
            }
            CapabilityId::ExamPatternAnalyst => {
                "Analyzes how the content is tested in the target exam: question types, depth, weightage, common pitfalls."
            }
            CapabilityId::QuestionDesigner => {
                "Designs question intent, difficulty and distractors without generating final questions."
            }
            CapabilityId::QuestionGenerator => {
                "Generates final exam-aligned questions and model answers in structured JSON."
            }
            CapabilityId::Solver => {
                "Solves generated questions step by step, including numerical and conceptual reasoning."
            }
            CapabilityId::Evaluator => {
                "Evaluates solutions using board- and exam-specific criteria and suggests improvements."
            }
        }
    }

    /// 该能力产出的最终产物字段（分析类能力只写 knowledge_base）
    pub fn artifact_field(&self) -> Option<&'static str> {
        match self {
            CapabilityId::QuestionGenerator => Some("question_bank"),
            CapabilityId::Solver => Some("solver_output"),
            CapabilityId::Evaluator => Some("evaluation"),
            _ => None,
        }
    }

    /// 重试耗尽后的中性结果，形状与该能力的正常输出一致
    pub fn fallback_update(&self) -> Value {
        match self {
            CapabilityId::ContentAnalyzer
            | CapabilityId::ExamPatternAnalyst
            | CapabilityId::QuestionDesigner => json!({
                "knowledge_base": { self.as_str(): "" }
            }),
            CapabilityId::QuestionGenerator => json!({ "question_bank": empty_question_set() }),
            CapabilityId::Solver => json!({ "solver_output": empty_question_set() }),
            CapabilityId::Evaluator => {
                let mut evaluation = empty_question_set();
                evaluation.insert(
                    "overall_feedback".to_string(),
                    Value::String("Evaluation unavailable; evaluator fallback used.".to_string()),
                );
                json!({ "evaluation": evaluation })
            }
        }
    }
}

impl fmt::Display for CapabilityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CapabilityId {
    type Err = String;

    /// 只接受规范 ID；别名与启发式归 repair 处理
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        CapabilityId::ALL
            .into_iter()
            .find(|id| id.as_str() == s)
            .ok_or_else(|| format!("Invalid capability id: {s}"))
    }
}
