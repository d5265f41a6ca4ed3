//! 计划层：类型、结构校验、修复与兜底、task_id 规范化、Planner
//!
//! resolve_plan 实现「校验 → 修复 → 兜底」三级降级：无论 Planner 输出什么，总能得到一份可执行的计划。

pub mod normalize;
pub mod planner;
pub mod repair;
pub mod types;
pub mod validator;

pub use normalize::{check_unique_capabilities, normalize_task_ids};
pub use planner::{extract_json, LlmPlanner, PlanSource, StaticPlan};
pub use repair::{fallback_plan, repair_plan, resolve_capability};
pub use types::{Plan, Priority, TaskDescriptor};
pub use validator::{parse_plan, validate_plan};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::core::state::{GroundedContext, UserProfile};

/// 最终采用的计划来自哪一级
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanOrigin {
    /// Planner 原样输出通过校验
    Generated,
    Repaired,
    Fallback,
}

#[derive(Debug, Clone)]
pub struct ResolvedPlan {
    pub plan: Plan,
    pub origin: PlanOrigin,
    /// 降级原因（供诊断记录）
    pub notes: Vec<String>,
}

/// 三级降级得到可执行计划；raw 为 None 表示 Planner 阶段没有产出
///
/// 重复能力分配在这里视为不可用的计划并继续降级，路由器那一层仍会把它当作致命错误。
pub fn resolve_plan(
    raw: Option<&Value>,
    profile: &UserProfile,
    grounded: &GroundedContext,
) -> ResolvedPlan {
    let mut notes = Vec::new();

    let Some(raw) = raw else {
        notes.push("planner produced no plan".to_string());
        return ResolvedPlan {
            plan: fallback_plan(profile, grounded),
            origin: PlanOrigin::Fallback,
            notes,
        };
    };

    match parse_plan(raw).and_then(|plan| check_unique_capabilities(&plan).map(|_| plan)) {
        Ok(plan) => {
            return ResolvedPlan {
                plan,
                origin: PlanOrigin::Generated,
                notes,
            }
        }
        Err(e) => {
            tracing::warn!("Planner output rejected: {}", e);
            notes.push(e.to_string());
        }
    }

    let repaired = repair_plan(raw).and_then(|plan| {
        parse_plan(&serde_json::to_value(&plan).unwrap_or(Value::Null))?;
        check_unique_capabilities(&plan)?;
        Ok(plan)
    });
    match repaired {
        Ok(plan) => ResolvedPlan {
            plan,
            origin: PlanOrigin::Repaired,
            notes,
        },
        Err(e) => {
            tracing::warn!("Plan repair failed, using fallback plan: {}", e);
            notes.push(e.to_string());
            ResolvedPlan {
                plan: fallback_plan(profile, grounded),
                origin: PlanOrigin::Fallback,
                notes,
            }
        }
    }
}
