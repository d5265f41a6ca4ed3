//! 流水线错误类型
//!
//! 计划层错误（Schema / Repair / 重复能力分配）由编排器逐级降级处理；
//! UnknownCapability 与 DuplicateCapabilityAssignment 属于部署级错误，直接终止本次运行。

use std::fmt;

use thiserror::Error;

use crate::core::resilience::{AttemptError, RetryFailure};

/// 计划校验、修复、ID 规范化阶段的错误
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PlanError {
    /// 结构不合法，可交给 repair 修复
    #[error("Schema error: {0}")]
    Schema(String),

    /// 修复失败，可交给 fallback 合成
    #[error("Repair failed: {0}")]
    RepairFailure(String),

    /// 同一能力被分配给两个任务
    #[error("Capability '{capability}' assigned to both '{first}' and '{second}'")]
    DuplicateCapabilityAssignment {
        capability: String,
        first: String,
        second: String,
    },
}

/// 能力处理器返回的错误（可重试）
#[derive(Error, Debug, Clone)]
pub enum CapabilityError {
    #[error("LLM error: {0}")]
    Llm(String),

    #[error("Output parse error: {0}")]
    Parse(String),

    #[error("Capability failed: {0}")]
    Failed(String),
}

/// 一次运行中可能向调用方暴露的错误
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error(transparent)]
    Plan(#[from] PlanError),

    /// 计划通过了校验但注册表中没有对应处理器（注册表漂移）
    #[error("No handler registered for capability: {0}")]
    UnknownCapability(String),

    #[error("'{label}' timed out after {after_ms}ms")]
    Timeout { label: String, after_ms: u64 },

    /// 无兜底的流水线阶段在重试耗尽后失败
    #[error("Stage '{label}' failed: {message}")]
    Stage { label: String, message: String },

    #[error("Config error: {0}")]
    Config(String),
}

impl PipelineError {
    /// 无兜底阶段重试耗尽后的错误：最后一次超时记为 Timeout，否则为 Stage
    pub fn from_stage_failure<E: fmt::Display>(failure: &RetryFailure<E>) -> Self {
        let label = failure.outcome.label.clone();
        match &failure.last_error {
            AttemptError::TimedOut { after_ms } => PipelineError::Timeout {
                label,
                after_ms: *after_ms,
            },
            other => PipelineError::Stage {
                label,
                message: other.to_string(),
            },
        }
    }

    /// 是否为终止整次运行的部署级错误
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            PipelineError::UnknownCapability(_)
                | PipelineError::Plan(PlanError::DuplicateCapabilityAssignment { .. })
        )
    }
}
