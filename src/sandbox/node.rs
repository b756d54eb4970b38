//! Node.js vm 运行时
//!
//! 每个 EvalContext 是一个独立的 `node -e <harness>` 子进程，进程内只有一个 vm 上下文，
//! 上下文中的全局对象由能力白名单决定。宿主与子进程之间是按行 JSON：
//! 请求写入 stdin，回复写到 stdout 并带每个进程随机生成的前缀；harness 在每条回复前先换行，
//! 宿主按前缀在行内查找回复，前缀之前的内容与没有前缀的行（生成代码自己写的 stdout）只记日志。
//! 子进程环境变量被清空（仅保留 PATH），并设置 kill_on_drop，上下文被丢弃时进程随之结束。

use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::task::JoinHandle;

use crate::sandbox::{CapabilitySet, EvalContext, EvalError, EvalRuntime};

const HARNESS: &str = include_str!("harness.js");

/// 以 Node.js 子进程承载隔离上下文
#[derive(Debug, Clone)]
pub struct NodeVmRuntime {
    node_bin: String,
}

impl NodeVmRuntime {
    pub fn new(node_bin: impl Into<String>) -> Self {
        Self {
            node_bin: node_bin.into(),
        }
    }

    /// `node --version` 能否成功执行
    pub async fn is_available(&self) -> bool {
        Command::new(&self.node_bin)
            .arg("--version")
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await
            .map(|s| s.success())
            .unwrap_or(false)
    }
}

impl Default for NodeVmRuntime {
    fn default() -> Self {
        Self::new("node")
    }
}

#[async_trait]
impl EvalRuntime for NodeVmRuntime {
    async fn create_context(
        &self,
        capabilities: &CapabilitySet,
    ) -> Result<Box<dyn EvalContext>, EvalError> {
        let marker = format!("@@forager:{}@@", uuid::Uuid::new_v4().simple());
        let caps = serde_json::to_string(&capabilities.names())
            .map_err(|e| EvalError::Protocol(e.to_string()))?;

        let mut cmd = Command::new(&self.node_bin);
        cmd.arg("-e")
            .arg(HARNESS)
            .env_clear()
            .env("FORAGER_MARKER", &marker)
            .env("FORAGER_CAPABILITIES", caps)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Ok(path) = std::env::var("PATH") {
            cmd.env("PATH", path);
        }

        let mut child = cmd
            .spawn()
            .map_err(|e| EvalError::Unavailable(format!("failed to start {}: {}", self.node_bin, e)))?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| EvalError::Protocol("runtime stdin unavailable".to_string()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| EvalError::Protocol("runtime stdout unavailable".to_string()))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| EvalError::Protocol("runtime stderr unavailable".to_string()))?;

        // 生成代码的 console 输出
        let stderr_task = tokio::spawn(async move {
            let mut lines = BufReader::new(stderr).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                tracing::debug!(target: "forager::routine", "{}", line);
            }
        });

        tracing::debug!(pid = ?child.id(), capabilities = ?capabilities.names(), "node vm context created");

        Ok(Box::new(NodeVmContext {
            child,
            stdin,
            stdout: BufReader::new(stdout).lines(),
            stderr_task,
            marker,
        }))
    }
}

/// harness 的单条回复
#[derive(Debug, Deserialize)]
struct HarnessReply {
    ok: bool,
    #[serde(default)]
    kind: Option<String>,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    value: Option<Value>,
}

impl HarnessReply {
    fn into_result(self) -> Result<Value, EvalError> {
        if self.ok {
            return Ok(self.value.unwrap_or(Value::Null));
        }
        let message = self.message.unwrap_or_else(|| "unknown error".to_string());
        match self.kind.as_deref() {
            Some("timeout") => Err(EvalError::Timeout(message)),
            Some("protocol") => Err(EvalError::Protocol(message)),
            _ => Err(EvalError::Thrown(message)),
        }
    }
}

pub struct NodeVmContext {
    child: Child,
    stdin: ChildStdin,
    stdout: Lines<BufReader<ChildStdout>>,
    stderr_task: JoinHandle<()>,
    marker: String,
}

impl NodeVmContext {
    async fn request(&mut self, payload: &Value) -> Result<HarnessReply, EvalError> {
        let mut line =
            serde_json::to_string(payload).map_err(|e| EvalError::Protocol(e.to_string()))?;
        line.push('\n');
        self.stdin
            .write_all(line.as_bytes())
            .await
            .map_err(|e| EvalError::Protocol(format!("write to runtime failed: {}", e)))?;
        self.stdin
            .flush()
            .await
            .map_err(|e| EvalError::Protocol(format!("flush to runtime failed: {}", e)))?;

        loop {
            match self.stdout.next_line().await {
                Ok(Some(l)) => match l.find(&self.marker) {
                    Some(at) => {
                        let (before, reply) = l.split_at(at);
                        if !before.is_empty() {
                            tracing::debug!(target: "forager::routine", stdout = %before);
                        }
                        return serde_json::from_str(&reply[self.marker.len()..])
                            .map_err(|e| EvalError::Protocol(format!("bad reply: {}", e)));
                    }
                    None if l.is_empty() => {}
                    None => tracing::debug!(target: "forager::routine", stdout = %l),
                },
                Ok(None) => {
                    let status = self.child.try_wait().ok().flatten();
                    return Err(EvalError::Protocol(format!(
                        "runtime exited before replying (status: {:?})",
                        status
                    )));
                }
                Err(e) => return Err(EvalError::Protocol(format!("read from runtime failed: {}", e))),
            }
        }
    }
}

#[async_trait]
impl EvalContext for NodeVmContext {
    async fn load(
        &mut self,
        source: &str,
        function_name: &str,
        budget: Duration,
    ) -> Result<(), EvalError> {
        let reply = self
            .request(&json!({
                "op": "load",
                "source": source,
                "functionName": function_name,
                "timeoutMs": budget.as_millis() as u64,
            }))
            .await?;
        reply.into_result().map(|_| ())
    }

    async fn invoke(&mut self, expression: &str, budget: Duration) -> Result<Value, EvalError> {
        let reply = self
            .request(&json!({
                "op": "invoke",
                "expression": expression,
                "timeoutMs": budget.as_millis() as u64,
            }))
            .await?;
        reply.into_result()
    }

    async fn close(self: Box<Self>) {
        let mut this = *self;
        let _ = this.child.start_kill();
        let _ = this.child.wait().await;
    }
}

impl Drop for NodeVmContext {
    fn drop(&mut self) {
        self.stderr_task.abort();
    }
}
