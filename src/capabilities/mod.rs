//! 能力层：封闭的能力 ID 集合、Capability trait 与注册表、基于 LLM 的默认实现

pub mod id;
pub mod llm;
pub mod registry;

pub use id::CapabilityId;
pub use llm::{register_llm_capabilities, LlmCapability};
pub use registry::{Capability, CapabilityRegistry, RunContext};
