//! Tutorflow - 出题流水线编排
//!
//! 模块划分：
//! - **capabilities**: 能力 ID、Capability trait 与注册表、基于 LLM 的默认实现
//! - **config**: 应用配置加载（TOML + 环境变量）
//! - **core**: 重试执行器、共享状态与合并、任务路由、快照、主流水线
//! - **llm**: LLM 客户端抽象与实现（OpenAI 兼容 / DeepSeek / Mock）
//! - **observability**: tracing 初始化
//! - **plan**: 计划类型、结构校验、修复与兜底、task_id 规范化、Planner

pub mod capabilities;
pub mod config;
pub mod core;
pub mod llm;
pub mod observability;
pub mod plan;

pub use crate::core::{Pipeline, PipelineError, RunOutput};
