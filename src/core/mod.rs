//! 核心编排层：错误类型、重试执行器、共享状态与合并、任务路由、快照、主流水线

pub mod error;
pub mod grounding;
pub mod merge;
pub mod orchestrator;
pub mod resilience;
pub mod router;
pub mod snapshot;
pub mod state;

pub use error::{CapabilityError, PipelineError, PlanError};
pub use grounding::{GroundingSource, StaticGrounding};
pub use merge::{empty_question_set, merge_update, normalize_artifact, StateField};
pub use orchestrator::{create_llm_from_config, create_pipeline, Pipeline, RunOutput};
pub use resilience::{
    run_with_fallback, run_with_retry, AttemptError, ExecutionOutcome, RetryFailure, RetryPolicy,
};
pub use router::TaskRouter;
pub use snapshot::SnapshotStore;
pub use state::{GroundedContext, RunDiagnostics, SharedState, UserProfile};
