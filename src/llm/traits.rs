//! LLM 客户端抽象
//!
//! 所有后端（OpenAI 兼容 / Mock）实现 LlmClient：complete 接收完整消息序列与调用选项，返回首条回复文本。
//! 客户端由调用方显式构造并注入（Arc<dyn LlmClient>），不存在全局单例。

use async_trait::async_trait;
use thiserror::Error;

use crate::memory::Message;

/// 单次补全的调用选项
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CompletionOptions {
    /// 低温度采样，尽量让同一输入得到同一输出（判定 / 代码生成）
    pub deterministic: bool,
    /// 要求模型输出单个 JSON 对象（json_object 模式）
    pub structured_output: bool,
}

impl CompletionOptions {
    /// 普通对话：默认温度、自由文本
    pub fn free_text() -> Self {
        Self::default()
    }

    pub fn deterministic() -> Self {
        Self {
            deterministic: true,
            structured_output: false,
        }
    }

    pub fn structured() -> Self {
        Self {
            deterministic: true,
            structured_output: true,
        }
    }
}

/// LLM 调用错误
#[derive(Error, Debug, Clone)]
pub enum LlmError {
    #[error("request build failed: {0}")]
    Request(String),

    #[error("api error: {0}")]
    Api(String),

    #[error("empty completion")]
    EmptyCompletion,
}

/// LLM 客户端 trait：非流式完成
#[async_trait]
pub trait LlmClient: Send + Sync {
    async fn complete(
        &self,
        messages: &[Message],
        options: CompletionOptions,
    ) -> Result<String, LlmError>;

    /// 获取累计 token 使用统计：(prompt_tokens, completion_tokens, total_tokens)
    /// 默认返回 (0, 0, 0)，具体实现可覆盖
    fn token_usage(&self) -> (u64, u64, u64) {
        (0, 0, 0)
    }
}
