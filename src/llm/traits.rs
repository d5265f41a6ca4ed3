//! LLM 客户端抽象
//!
//! Planner 与基于 LLM 的能力都只依赖 LlmClient::complete；后端可以是 OpenAI 兼容端点或脚本化 Mock。

use async_trait::async_trait;

use crate::llm::Message;

#[async_trait]
pub trait LlmClient: Send + Sync {
    /// 非流式完成，返回首条回复文本
    async fn complete(&self, messages: &[Message]) -> Result<String, String>;
}
