//! 隔离求值运行时抽象
//!
//! EvalRuntime 按能力集合创建全新的 EvalContext；一个 EvalContext 只服务一次执行（先 load 再 invoke），
//! 用完即 close，不跨查询复用。

use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

use crate::sandbox::CapabilitySet;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EvalError {
    /// 运行时自身判定超出预算
    #[error("timed out: {0}")]
    Timeout(String),

    /// 编译错误或代码抛出的异常
    #[error("{0}")]
    Thrown(String),

    /// 无法启动运行时（如找不到 node）
    #[error("runtime unavailable: {0}")]
    Unavailable(String),

    #[error("runtime protocol error: {0}")]
    Protocol(String),
}

#[async_trait]
pub trait EvalRuntime: Send + Sync {
    async fn create_context(
        &self,
        capabilities: &CapabilitySet,
    ) -> Result<Box<dyn EvalContext>, EvalError>;
}

#[async_trait]
pub trait EvalContext: Send {
    /// 在上下文中求值整段源码，并确认 `function_name` 解析为函数
    async fn load(
        &mut self,
        source: &str,
        function_name: &str,
        budget: Duration,
    ) -> Result<(), EvalError>;

    /// 在同一上下文中求值调用表达式，返回 JSON 形式的结果（undefined 记为 null）
    async fn invoke(&mut self, expression: &str, budget: Duration) -> Result<Value, EvalError>;

    /// 丢弃上下文并释放底层资源
    async fn close(self: Box<Self>) {}
}
