//! 回答错误：面向调用方的失败原因，带稳定的原因码
//!
//! 原因码用于 HTTP 响应体与日志；DecisionFault 与 CleanupFault 在内部消化，不会出现在这里。

use thiserror::Error;

use crate::llm::LlmError;
use crate::pipeline::SynthesisError;
use crate::retrieval::RetrievalError;

#[derive(Error, Debug)]
pub enum AnswerError {
    #[error("query is empty")]
    EmptyQuery,

    /// 检索路径没有命中任何段落
    #[error("No relevant information found.")]
    NoMatches,

    #[error("retrieval failed: {0}")]
    Retrieval(#[from] RetrievalError),

    /// 生成路径拿不到可执行函数；不会退回检索路径
    #[error("failed to generate function and parameters: {0}")]
    Synthesis(#[from] SynthesisError),

    /// 回答生成阶段的模型错误
    #[error("answer generation failed: {0}")]
    Llm(#[from] LlmError),
}

impl AnswerError {
    pub fn code(&self) -> &'static str {
        match self {
            AnswerError::EmptyQuery => "empty_query",
            AnswerError::NoMatches => "no_matches",
            AnswerError::Retrieval(_) => "retrieval_failed",
            AnswerError::Synthesis(_) => "synthesis_failed",
            AnswerError::Llm(_) => "llm_failed",
        }
    }

    /// 调用方输入本身有问题（而非服务端故障）
    pub fn is_client_error(&self) -> bool {
        matches!(self, AnswerError::EmptyQuery)
    }
}
