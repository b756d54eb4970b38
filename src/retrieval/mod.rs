//! 检索：向量索引抽象（Pinecone / 内存）与上下文检索器
//!
//! - **pinecone**: Pinecone REST 索引（query / upsert）
//! - **memory**: 进程内余弦相似度索引，未配置 Pinecone 时使用
//! - **retriever**: 历史 + 问题 → 嵌入 → top-K 段落

pub mod memory;
pub mod pinecone;
pub mod retriever;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

use crate::llm::LlmError;

pub use memory::InMemoryIndex;
pub use pinecone::PineconeIndex;
pub use retriever::{ContextRetriever, DisabledRetriever, EmbeddingRetriever, Passage};

#[derive(Error, Debug, Clone)]
pub enum RetrievalError {
    #[error("embedding failed: {0}")]
    Embedding(#[from] LlmError),

    #[error("embedding was empty")]
    EmptyEmbedding,

    #[error("vector store error: {0}")]
    Store(String),
}

/// 待写入索引的一条记录；metadata.text 为检索时返回的正文
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VectorRecord {
    pub id: String,
    pub values: Vec<f32>,
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

/// 一条查询命中
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VectorMatch {
    pub id: String,
    #[serde(default)]
    pub score: f32,
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

impl VectorMatch {
    /// metadata.text，缺失时为空串
    pub fn text(&self) -> &str {
        self.metadata
            .get("text")
            .and_then(Value::as_str)
            .unwrap_or_default()
    }
}

/// 向量索引
#[async_trait]
pub trait VectorStore: Send + Sync {
    /// 按相似度降序返回至多 top_k 条
    async fn query(&self, vector: &[f32], top_k: usize) -> Result<Vec<VectorMatch>, RetrievalError>;

    /// 写入或覆盖记录，返回写入条数
    async fn upsert(&self, records: Vec<VectorRecord>) -> Result<usize, RetrievalError>;
}
