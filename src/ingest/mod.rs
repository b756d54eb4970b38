//! 入库：对话线程 → 嵌入 → 向量索引，以及轮询游标

pub mod cursor;
pub mod threads;

use thiserror::Error;

use crate::llm::LlmError;
use crate::retrieval::RetrievalError;

pub use cursor::{CursorState, CursorStore, FileCursorStore};
pub use threads::{newest_ts, resume_cursor, ts_value, ChatMessage, ChatThread, IngestReport, ThreadIngestor};

#[derive(Error, Debug)]
pub enum IngestError {
    #[error("embedding failed: {0}")]
    Embedding(#[from] LlmError),

    #[error("vector store write failed: {0}")]
    Store(#[from] RetrievalError),

    #[error("cursor: {0}")]
    Cursor(String),

    #[error("source: {0}")]
    Source(String),
}
