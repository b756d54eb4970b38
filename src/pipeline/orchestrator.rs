//! 查询编排
//!
//! 生成路径：判定为 true → 检索段落作为 API 上下文（检索失败或为空只当作空上下文）→ 生成函数 →
//! 沙箱执行 → 把执行结果折叠成上下文文本 → 生成回答。生成失败直接返回 Synthesis 错误，不执行、不退回检索路径。
//!
//! 检索路径：判定为 false → 检索；零命中返回 NoMatches 且不调用回答生成；否则按排名以空行拼接段落再生成回答。

use std::sync::Arc;
use std::time::Duration;

use crate::core::{AnswerError, QueryPhase, QueryTrace};
use crate::llm::LlmClient;
use crate::memory::Message;
use crate::pipeline::{AnswerComposer, DecisionOracle, RoutineSynthesizer};
use crate::retrieval::{ContextRetriever, Passage};
use crate::sandbox::{FailureKind, SandboxedExecutor};

pub struct Orchestrator {
    llm: Arc<dyn LlmClient>,
    oracle: DecisionOracle,
    synthesizer: RoutineSynthesizer,
    composer: AnswerComposer,
    retriever: Arc<dyn ContextRetriever>,
    executor: Arc<SandboxedExecutor>,
    top_k: usize,
    execution_timeout: Duration,
}

impl Orchestrator {
    /// 判定、生成与回答共用一个 LLM 客户端
    pub fn new(
        llm: Arc<dyn LlmClient>,
        retriever: Arc<dyn ContextRetriever>,
        executor: Arc<SandboxedExecutor>,
    ) -> Self {
        Self {
            oracle: DecisionOracle::new(Arc::clone(&llm)),
            synthesizer: RoutineSynthesizer::new(Arc::clone(&llm)),
            composer: AnswerComposer::new(Arc::clone(&llm)),
            llm,
            retriever,
            executor,
            top_k: 5,
            execution_timeout: Duration::from_millis(1000),
        }
    }

    pub fn with_top_k(mut self, top_k: usize) -> Self {
        self.top_k = top_k.max(1);
        self
    }

    pub fn with_execution_timeout(mut self, timeout: Duration) -> Self {
        self.execution_timeout = timeout;
        self
    }

    pub async fn answer(&self, history: &[Message], query: &str) -> Result<String, AnswerError> {
        self.answer_traced(history, query).await.0
    }

    /// 同 answer，并返回经过的阶段与执行报告
    pub async fn answer_traced(
        &self,
        history: &[Message],
        query: &str,
    ) -> (Result<String, AnswerError>, QueryTrace) {
        let mut trace = QueryTrace::default();
        let (_, _, tokens_before) = self.llm.token_usage();
        let result = self.run(history, query, &mut trace).await;
        let (prompt, completion, tokens_after) = self.llm.token_usage();
        trace.tokens_used = tokens_after.saturating_sub(tokens_before);
        tracing::info!(
            tokens_used = trace.tokens_used,
            prompt_tokens_total = prompt,
            completion_tokens_total = completion,
            "llm token usage"
        );
        match &result {
            Ok(_) => trace.enter(QueryPhase::Done),
            Err(e) => {
                tracing::warn!(code = e.code(), error = %e, "query failed");
                trace.enter(QueryPhase::Failed);
            }
        }
        (result, trace)
    }

    async fn run(
        &self,
        history: &[Message],
        query: &str,
        trace: &mut QueryTrace,
    ) -> Result<String, AnswerError> {
        let query = query.trim();
        if query.is_empty() {
            return Err(AnswerError::EmptyQuery);
        }

        trace.enter(QueryPhase::Deciding);
        let generate = self.oracle.decide(history, query).await;
        trace.generated = Some(generate);

        if generate {
            self.generation_path(history, query, trace).await
        } else {
            self.retrieval_path(history, query, trace).await
        }
    }

    async fn generation_path(
        &self,
        history: &[Message],
        query: &str,
        trace: &mut QueryTrace,
    ) -> Result<String, AnswerError> {
        trace.enter(QueryPhase::Retrieving);
        let api_context = match self.retriever.retrieve(query, history, self.top_k).await {
            Ok(passages) => join_passages(&passages),
            Err(e) => {
                tracing::warn!(error = %e, "context for generation unavailable");
                String::new()
            }
        };

        trace.enter(QueryPhase::Synthesizing);
        let routine = match self.synthesizer.synthesize(query, &api_context).await {
            Ok(routine) => routine,
            Err(e) => {
                trace.failure = Some(FailureKind::Synthesis);
                return Err(e.into());
            }
        };

        trace.enter(QueryPhase::Executing);
        let report = self.executor.execute(routine, self.execution_timeout).await;
        let context = report.outcome.as_context();
        trace.failure = report.outcome.failure_kind();
        trace.execution = Some(report);

        trace.enter(QueryPhase::Composing);
        self.composer.compose(&context, history, query).await
    }

    async fn retrieval_path(
        &self,
        history: &[Message],
        query: &str,
        trace: &mut QueryTrace,
    ) -> Result<String, AnswerError> {
        trace.enter(QueryPhase::Retrieving);
        let passages = self.retriever.retrieve(query, history, self.top_k).await?;
        if passages.is_empty() {
            return Err(AnswerError::NoMatches);
        }

        trace.enter(QueryPhase::Composing);
        self.composer
            .compose(&join_passages(&passages), history, query)
            .await
    }
}

fn join_passages(passages: &[Passage]) -> String {
    passages
        .iter()
        .map(|p| p.text.as_str())
        .collect::<Vec<_>>()
        .join("\n\n")
}
