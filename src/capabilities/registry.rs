//! 能力注册表
//!
//! 所有能力实现 Capability trait（id / execute），由 CapabilityRegistry 按 CapabilityId 注册与查找。
//! 注册表在启动时构建一次，之后只读；路由器查不到处理器即视为部署缺陷。

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::capabilities::CapabilityId;
use crate::core::state::{GroundedContext, SharedState, UserProfile};
use crate::core::CapabilityError;
use crate::plan::TaskDescriptor;

/// 交给能力处理器的只读运行上下文
#[derive(Debug, Clone, Default)]
pub struct RunContext {
    pub run_id: String,
    pub user_profile: UserProfile,
    pub grounded_context: GroundedContext,
    pub planning_context: BTreeMap<String, String>,
}

impl RunContext {
    pub fn from_state(state: &SharedState) -> Self {
        Self {
            run_id: state.run_id.clone(),
            user_profile: state.user_profile.clone(),
            grounded_context: state.grounded_context.clone(),
            planning_context: state.planning_context(),
        }
    }
}

/// 能力 trait：给定任务描述与当前状态快照，返回局部状态更新
///
/// 实现不保证幂等、不保证按时返回、不保证输出类型正确；调用方负责超时、重试与规范化。
#[async_trait]
pub trait Capability: Send + Sync {
    fn id(&self) -> CapabilityId;

    async fn execute(
        &self,
        ctx: &RunContext,
        task: &TaskDescriptor,
        state: &SharedState,
    ) -> Result<Value, CapabilityError>;
}

/// 能力注册表：CapabilityId → Arc<dyn Capability>
#[derive(Default, Clone)]
pub struct CapabilityRegistry {
    handlers: BTreeMap<CapabilityId, Arc<dyn Capability>>,
}

impl CapabilityRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 注册处理器；同一能力重复注册时后者覆盖
    pub fn register(&mut self, capability: impl Capability + 'static) {
        self.register_arc(Arc::new(capability));
    }

    pub fn register_arc(&mut self, capability: Arc<dyn Capability>) {
        self.handlers.insert(capability.id(), capability);
    }

    pub fn get(&self, id: CapabilityId) -> Option<Arc<dyn Capability>> {
        self.handlers.get(&id).cloned()
    }

    pub fn ids(&self) -> Vec<CapabilityId> {
        self.handlers.keys().copied().collect()
    }

    /// 尚未注册处理器的能力
    pub fn missing(&self) -> Vec<CapabilityId> {
        CapabilityId::ALL
            .into_iter()
            .filter(|id| !self.handlers.contains_key(id))
            .collect()
    }
}
