//! 上下文检索器：把历史与问题拼成一段文本，嵌入后查询向量索引

use std::sync::Arc;

use async_trait::async_trait;

use crate::llm::EmbeddingProvider;
use crate::memory::{transcript_with_query, Message};
use crate::retrieval::{RetrievalError, VectorStore};

/// 一条检索到的段落，按排名顺序返回
#[derive(Debug, Clone, PartialEq)]
pub struct Passage {
    pub text: String,
    pub score: f32,
}

#[async_trait]
pub trait ContextRetriever: Send + Sync {
    /// 返回至多 top_k 条段落；没有命中时为 Ok(空)，与 Err 区分
    async fn retrieve(
        &self,
        query: &str,
        history: &[Message],
        top_k: usize,
    ) -> Result<Vec<Passage>, RetrievalError>;
}

pub struct EmbeddingRetriever {
    embedder: Arc<dyn EmbeddingProvider>,
    store: Arc<dyn VectorStore>,
}

impl EmbeddingRetriever {
    pub fn new(embedder: Arc<dyn EmbeddingProvider>, store: Arc<dyn VectorStore>) -> Self {
        Self { embedder, store }
    }
}

#[async_trait]
impl ContextRetriever for EmbeddingRetriever {
    async fn retrieve(
        &self,
        query: &str,
        history: &[Message],
        top_k: usize,
    ) -> Result<Vec<Passage>, RetrievalError> {
        let text = transcript_with_query(history, query);
        let vector = self.embedder.embed(&text).await?;
        if vector.is_empty() {
            return Err(RetrievalError::EmptyEmbedding);
        }
        let matches = self.store.query(&vector, top_k).await?;
        tracing::debug!(top_k, hits = matches.len(), "context retrieved");
        Ok(matches
            .into_iter()
            .map(|m| Passage {
                text: m.text().to_string(),
                score: m.score,
            })
            .collect())
    }
}

/// 未配置嵌入服务时使用：每次检索都报错，由编排层按检索失败处理
pub struct DisabledRetriever {
    reason: String,
}

impl DisabledRetriever {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

#[async_trait]
impl ContextRetriever for DisabledRetriever {
    async fn retrieve(
        &self,
        _query: &str,
        _history: &[Message],
        _top_k: usize,
    ) -> Result<Vec<Passage>, RetrievalError> {
        Err(RetrievalError::Store(self.reason.clone()))
    }
}
