//! 沙箱：生成代码的落盘、隔离求值与清理
//!
//! - **routine**: GeneratedRoutine（模型产出的函数）
//! - **artifact**: 临时工件存储
//! - **capability**: 隔离上下文的能力白名单
//! - **runtime / node**: 求值运行时抽象与 Node.js vm 实现
//! - **invocation**: 调用表达式构造
//! - **executor**: persist → load → invoke → cleanup

pub mod artifact;
pub mod capability;
pub mod executor;
pub mod invocation;
pub mod node;
pub mod routine;
pub mod runtime;

pub use artifact::{ArtifactError, ArtifactId, ArtifactStore, FsArtifactStore};
pub use capability::{Capability, CapabilitySet};
pub use executor::{
    ExecutionOutcome, ExecutionPhase, ExecutionReport, FailureKind, SandboxedExecutor,
};
pub use invocation::{invocation_expression, is_js_identifier};
pub use node::NodeVmRuntime;
pub use routine::{routine_schema_json, GeneratedRoutine};
pub use runtime::{EvalContext, EvalError, EvalRuntime};
