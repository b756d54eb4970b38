//! 沙箱执行器
//!
//! 单次执行的四个阶段：
//! 1. Persist：源码写入新的独占工件
//! 2. Load：从磁盘读回工件（保证执行的正是落盘内容），在新建的隔离上下文中求值，受 budget 约束
//! 3. Invoke：在同一上下文中求值 `name(args...)`，受 budget 约束
//! 4. Cleanup：无论成功、失败、超时还是调用方提前丢弃 future，都删除工件；删除失败只作为警告，不覆盖结果
//!
//! 超时双重保护：运行时内部按 budget 中断求值，执行器再以 budget + kill_grace 包住每个阶段，
//! 因此最坏耗时约为 2 × (budget + kill_grace)。

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;
use serde_json::Value;
use tokio::time::timeout;

use crate::sandbox::{
    invocation_expression, is_js_identifier, ArtifactError, ArtifactId, ArtifactStore,
    CapabilitySet, EvalContext, EvalError, EvalRuntime, GeneratedRoutine,
};

/// 执行阶段
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionPhase {
    Persist,
    Load,
    Invoke,
    Cleanup,
}

impl fmt::Display for ExecutionPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ExecutionPhase::Persist => "persist",
            ExecutionPhase::Load => "load",
            ExecutionPhase::Invoke => "invoke",
            ExecutionPhase::Cleanup => "cleanup",
        };
        f.write_str(s)
    }
}

/// 失败类别；日志与遥测按此区分，面向用户的文案可以统一
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FailureKind {
    /// 没能从模型输出得到函数
    Synthesis,
    /// 工件写入失败
    Io,
    /// 读回、编译、求值或函数名校验失败
    Load,
    Timeout { phase: ExecutionPhase },
    /// 调用时抛出异常
    Runtime,
    /// 工件删除失败（只出现在警告里）
    Cleanup,
}

impl FailureKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureKind::Synthesis => "synthesis",
            FailureKind::Io => "io",
            FailureKind::Load => "load",
            FailureKind::Timeout { .. } => "timeout",
            FailureKind::Runtime => "runtime",
            FailureKind::Cleanup => "cleanup",
        }
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureKind::Timeout { phase } => write!(f, "timeout during {}", phase),
            other => f.write_str(other.as_str()),
        }
    }
}

/// 一次执行的结果
#[derive(Debug, Clone, PartialEq)]
pub enum ExecutionOutcome {
    Success(Value),
    Failure { kind: FailureKind, message: String },
}

impl ExecutionOutcome {
    pub fn failure(kind: FailureKind, message: impl Into<String>) -> Self {
        Self::Failure {
            kind,
            message: message.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success(_))
    }

    pub fn failure_kind(&self) -> Option<FailureKind> {
        match self {
            Self::Success(_) => None,
            Self::Failure { kind, .. } => Some(*kind),
        }
    }

    /// 折叠为交给回答生成的上下文文本
    pub fn as_context(&self) -> String {
        match self {
            Self::Success(Value::String(s)) => format!("Function executed with result: {}", s),
            Self::Success(v) => format!("Function executed with result: {}", v),
            Self::Failure { kind, message } => {
                format!("Function execution failed ({}): {}", kind, message)
            }
        }
    }
}

/// execute 的返回：结果本身 + 工件标识 + 清理警告
#[derive(Debug, Clone)]
pub struct ExecutionReport {
    pub artifact: ArtifactId,
    pub outcome: ExecutionOutcome,
    pub cleanup_warning: Option<String>,
    pub elapsed: Duration,
}

/// 持有工件直到显式释放；若 future 在中途被丢弃，Drop 时在后台删除工件
struct ArtifactGuard {
    store: Arc<dyn ArtifactStore>,
    id: Option<ArtifactId>,
}

impl ArtifactGuard {
    fn new(store: Arc<dyn ArtifactStore>, id: ArtifactId) -> Self {
        Self {
            store,
            id: Some(id),
        }
    }

    async fn release(mut self) -> Result<(), ArtifactError> {
        match self.id.take() {
            Some(id) => self.store.remove(&id).await,
            None => Ok(()),
        }
    }
}

impl Drop for ArtifactGuard {
    fn drop(&mut self) {
        let Some(id) = self.id.take() else {
            return;
        };
        let store = Arc::clone(&self.store);
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    if let Err(e) = store.remove(&id).await {
                        tracing::warn!(artifact = %id, error = %e, "deferred artifact cleanup failed");
                    }
                });
            }
            Err(_) => tracing::warn!(artifact = %id, "no runtime to clean up abandoned artifact"),
        }
    }
}

/// 沙箱执行器：运行时、工件存储与能力集合均由外部注入
pub struct SandboxedExecutor {
    runtime: Arc<dyn EvalRuntime>,
    store: Arc<dyn ArtifactStore>,
    capabilities: CapabilitySet,
    kill_grace: Duration,
}

impl SandboxedExecutor {
    pub fn new(
        runtime: Arc<dyn EvalRuntime>,
        store: Arc<dyn ArtifactStore>,
        capabilities: CapabilitySet,
    ) -> Self {
        Self {
            runtime,
            store,
            capabilities,
            kill_grace: Duration::from_millis(500),
        }
    }

    pub fn with_kill_grace(mut self, grace: Duration) -> Self {
        self.kill_grace = grace;
        self
    }

    pub fn capabilities(&self) -> &CapabilitySet {
        &self.capabilities
    }

    /// 执行一次生成的函数；routine 被消费，不会被再次使用
    pub async fn execute(&self, routine: GeneratedRoutine, budget: Duration) -> ExecutionReport {
        let start = Instant::now();
        let artifact = ArtifactId::fresh();
        let guard = ArtifactGuard::new(Arc::clone(&self.store), artifact.clone());

        let outcome = self.run_phases(&artifact, &routine, budget).await;

        let cleanup_warning = match guard.release().await {
            Ok(()) => None,
            Err(e) => {
                tracing::warn!(
                    artifact = %artifact,
                    kind = FailureKind::Cleanup.as_str(),
                    error = %e,
                    "artifact cleanup failed"
                );
                Some(e.to_string())
            }
        };

        let elapsed = start.elapsed();
        let audit = serde_json::json!({
            "event": "routine_audit",
            "artifact": artifact.as_str(),
            "function": routine.function_name,
            "ok": outcome.is_success(),
            "outcome": outcome.failure_kind().map(|k| k.to_string()).unwrap_or_else(|| "ok".to_string()),
            "duration_ms": elapsed.as_millis() as u64,
            "args_preview": args_preview(&routine.arguments),
            "cleanup_ok": cleanup_warning.is_none(),
        });
        tracing::info!(audit = %audit, "routine");

        ExecutionReport {
            artifact,
            outcome,
            cleanup_warning,
            elapsed,
        }
    }

    async fn run_phases(
        &self,
        artifact: &ArtifactId,
        routine: &GeneratedRoutine,
        budget: Duration,
    ) -> ExecutionOutcome {
        if let Err(e) = self.store.write(artifact, &routine.source_code).await {
            return ExecutionOutcome::failure(FailureKind::Io, e.to_string());
        }

        let source = match self.store.read(artifact).await {
            Ok(s) => s,
            Err(e) => return ExecutionOutcome::failure(FailureKind::Load, e.to_string()),
        };

        if !is_js_identifier(&routine.function_name) {
            return ExecutionOutcome::failure(
                FailureKind::Load,
                format!("'{}' is not a valid function name", routine.function_name),
            );
        }

        let mut ctx = match self.runtime.create_context(&self.capabilities).await {
            Ok(ctx) => ctx,
            Err(e) => return ExecutionOutcome::failure(FailureKind::Load, e.to_string()),
        };
        let outcome = self.load_and_invoke(ctx.as_mut(), &source, routine, budget).await;
        ctx.close().await;
        outcome
    }

    async fn load_and_invoke(
        &self,
        ctx: &mut dyn EvalContext,
        source: &str,
        routine: &GeneratedRoutine,
        budget: Duration,
    ) -> ExecutionOutcome {
        let hard_limit = budget + self.kill_grace;

        match timeout(hard_limit, ctx.load(source, &routine.function_name, budget)).await {
            Err(_) => {
                return ExecutionOutcome::failure(
                    FailureKind::Timeout {
                        phase: ExecutionPhase::Load,
                    },
                    format!("load did not finish within {}ms", budget.as_millis()),
                )
            }
            Ok(Err(EvalError::Timeout(msg))) => {
                return ExecutionOutcome::failure(
                    FailureKind::Timeout {
                        phase: ExecutionPhase::Load,
                    },
                    msg,
                )
            }
            Ok(Err(e)) => return ExecutionOutcome::failure(FailureKind::Load, e.to_string()),
            Ok(Ok(())) => {}
        }

        let expression = invocation_expression(&routine.function_name, &routine.arguments);
        match timeout(hard_limit, ctx.invoke(&expression, budget)).await {
            Err(_) => ExecutionOutcome::failure(
                FailureKind::Timeout {
                    phase: ExecutionPhase::Invoke,
                },
                format!("invocation did not finish within {}ms", budget.as_millis()),
            ),
            Ok(Err(EvalError::Timeout(msg))) => ExecutionOutcome::failure(
                FailureKind::Timeout {
                    phase: ExecutionPhase::Invoke,
                },
                msg,
            ),
            Ok(Err(e)) => ExecutionOutcome::failure(FailureKind::Runtime, e.to_string()),
            Ok(Ok(value)) => ExecutionOutcome::Success(value),
        }
    }
}

fn args_preview(args: &[Value]) -> String {
    let s = Value::Array(args.to_vec()).to_string();
    if s.len() > 200 {
        format!("{}...", s.chars().take(200).collect::<String>())
    } else {
        s
    }
}
