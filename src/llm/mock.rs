//! Mock LLM 客户端（用于测试与无 API Key 的本地运行）
//!
//! - MockLlmClient：按调用选项给出固定形状的回复（判定恒为 false，普通补全回显最后一条 User 消息）
//! - ScriptedLlmClient：按顺序返回预设回复，并记录每次收到的消息序列，供流水线测试断言

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;

use crate::llm::{CompletionOptions, LlmClient, LlmError, TokenUsage};
use crate::memory::{Message, Role};

/// Mock 客户端：不访问网络
#[derive(Debug, Default)]
pub struct MockLlmClient;

#[async_trait]
impl LlmClient for MockLlmClient {
    async fn complete(
        &self,
        messages: &[Message],
        options: CompletionOptions,
    ) -> Result<String, LlmError> {
        if options.structured_output {
            return Ok(r#"{"code": "function mockRoutine() { return null; }", "params": [], "functionName": "mockRoutine"}"#.to_string());
        }
        if options.deterministic {
            return Ok("false".to_string());
        }
        let last_user = messages
            .iter()
            .rev()
            .find(|m| m.role == Role::User)
            .map(|m| m.content.as_str())
            .unwrap_or("(no input)");
        Ok(format!("Echo from Mock: {}", last_user))
    }
}

/// 一次被记录的调用
#[derive(Debug, Clone)]
pub struct RecordedCall {
    pub messages: Vec<Message>,
    pub options: CompletionOptions,
}

/// 脚本化客户端：依次弹出预设结果；脚本耗尽时返回 Api 错误
#[derive(Debug, Default)]
pub struct ScriptedLlmClient {
    replies: Mutex<VecDeque<Result<String, LlmError>>>,
    calls: Mutex<Vec<RecordedCall>>,
    usage: TokenUsage,
    /// 每次成功回复计入的 (prompt, completion) token 数
    usage_per_call: (u64, u64),
}

impl ScriptedLlmClient {
    pub fn new(replies: Vec<Result<String, LlmError>>) -> Self {
        Self {
            replies: Mutex::new(replies.into()),
            calls: Mutex::new(Vec::new()),
            ..Self::default()
        }
    }

    pub fn with_usage_per_call(mut self, prompt: u64, completion: u64) -> Self {
        self.usage_per_call = (prompt, completion);
        self
    }

    /// 全部为成功回复的便捷构造
    pub fn with_replies<I, S>(replies: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::new(replies.into_iter().map(|r| Ok(r.into())).collect())
    }

    /// 每次调用都失败
    pub fn always_failing() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().map(|c| c.len()).unwrap_or(0)
    }
}

#[async_trait]
impl LlmClient for ScriptedLlmClient {
    async fn complete(
        &self,
        messages: &[Message],
        options: CompletionOptions,
    ) -> Result<String, LlmError> {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(RecordedCall {
                messages: messages.to_vec(),
                options,
            });
        }
        let reply = self
            .replies
            .lock()
            .ok()
            .and_then(|mut r| r.pop_front())
            .unwrap_or_else(|| Err(LlmError::Api("script exhausted".to_string())));
        if reply.is_ok() {
            self.usage.add(self.usage_per_call.0, self.usage_per_call.1);
        }
        reply
    }

    fn token_usage(&self) -> (u64, u64, u64) {
        self.usage.get()
    }
}
