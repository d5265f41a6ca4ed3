//! Grounding 来源：把输入图片 / 内容解析为学科元数据与内容摘要

use async_trait::async_trait;

use crate::core::state::{GroundedContext, UserProfile};

#[async_trait]
pub trait GroundingSource: Send + Sync {
    async fn ground(&self, profile: &UserProfile, image: &str) -> Result<GroundedContext, String>;
}

/// 固定上下文（CLI --context 与测试使用）
#[derive(Debug, Clone, Default)]
pub struct StaticGrounding(pub GroundedContext);

#[async_trait]
impl GroundingSource for StaticGrounding {
    async fn ground(&self, _profile: &UserProfile, image: &str) -> Result<GroundedContext, String> {
        let mut context = self.0.clone();
        // 未预置内容摘要时把输入原文作为摘要
        if context.image_analysis.is_empty() {
            context.image_analysis = image.to_string();
        }
        Ok(context)
    }
}
