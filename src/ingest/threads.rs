//! 对话线程入库
//!
//! 一个线程 = 父消息 + 按时间升序的回复。正文为父消息文本后接各条回复文本（逐行），
//! 嵌入后以 `thread-{parent_ts}` 为 id 写入向量索引，metadata 带 channel / parentUser / parentTs / parentText / text。
//! 单个线程嵌入失败只跳过该线程；写入失败则整批失败，调用方据此决定是否推进游标。

use std::cmp::Ordering;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::ingest::IngestError;
use crate::llm::EmbeddingProvider;
use crate::retrieval::{VectorRecord, VectorStore};

/// 聊天平台上的一条消息（只保留入库需要的字段）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub ts: String,
    #[serde(default)]
    pub user: Option<String>,
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub thread_ts: Option<String>,
    #[serde(default)]
    pub reply_count: Option<u32>,
}

impl ChatMessage {
    pub fn new(ts: impl Into<String>, user: Option<&str>, text: impl Into<String>) -> Self {
        Self {
            ts: ts.into(),
            user: user.map(String::from),
            text: text.into(),
            thread_ts: None,
            reply_count: None,
        }
    }
}

/// 一个完整线程；messages 含父消息，按 ts 升序
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatThread {
    pub channel: String,
    pub parent: ChatMessage,
    pub messages: Vec<ChatMessage>,
}

/// Slack 风格的 ts（"1736883900.123456"）转为可比较的数值；无法解析时视为 0
pub fn ts_value(ts: &str) -> f64 {
    ts.parse::<f64>().unwrap_or(0.0)
}

fn cmp_ts(a: &str, b: &str) -> Ordering {
    ts_value(a)
        .partial_cmp(&ts_value(b))
        .unwrap_or(Ordering::Equal)
}

impl ChatThread {
    /// 合并父消息与回复：去掉与父消息同 ts 的重复项并按 ts 升序排列
    pub fn assemble(channel: impl Into<String>, parent: ChatMessage, replies: Vec<ChatMessage>) -> Self {
        let mut messages = vec![parent.clone()];
        messages.extend(replies.into_iter().filter(|r| r.ts != parent.ts));
        messages.sort_by(|a, b| cmp_ts(&a.ts, &b.ts));
        Self {
            channel: channel.into(),
            parent,
            messages,
        }
    }

    pub fn replies(&self) -> impl Iterator<Item = &ChatMessage> {
        self.messages.iter().filter(move |m| m.ts != self.parent.ts)
    }

    /// 入库正文：父消息一行，之后每条回复一行
    pub fn text(&self) -> String {
        let mut lines = Vec::new();
        if !self.parent.text.trim().is_empty() {
            lines.push(self.parent.text.as_str());
        }
        lines.extend(
            self.replies()
                .map(|m| m.text.as_str())
                .filter(|t| !t.trim().is_empty()),
        );
        lines.join("\n")
    }

    pub fn record_id(&self) -> String {
        format!("thread-{}", self.parent.ts)
    }

    /// 线程内最新消息的 ts
    pub fn latest_ts(&self) -> &str {
        self.messages
            .iter()
            .map(|m| m.ts.as_str())
            .max_by(|a, b| cmp_ts(a, b))
            .unwrap_or(self.parent.ts.as_str())
    }

    fn metadata(&self, text: String) -> Map<String, Value> {
        let mut metadata = Map::new();
        metadata.insert("channel".into(), Value::String(self.channel.clone()));
        metadata.insert(
            "parentUser".into(),
            self.parent.user.clone().map(Value::String).unwrap_or(Value::Null),
        );
        metadata.insert("parentTs".into(), Value::String(self.parent.ts.clone()));
        metadata.insert("parentText".into(), Value::String(self.parent.text.clone()));
        metadata.insert("text".into(), Value::String(text));
        metadata
    }
}

/// 一批线程中最新的 ts，与当前游标取较大者
pub fn newest_ts(current: &str, threads: &[ChatThread]) -> String {
    threads
        .iter()
        .map(ChatThread::latest_ts)
        .chain(std::iter::once(current))
        .max_by(|a, b| cmp_ts(a, b))
        .unwrap_or(current)
        .to_string()
}

/// 批次全部成功时可推进到的游标；有线程失败时只推进到最早失败线程之前已成功的父消息，
/// 下次轮询会从那里重新拉取（同 id 覆盖写入）
pub fn resume_cursor(current: &str, threads: &[ChatThread], failed_parents: &[String]) -> String {
    let Some(cutoff) = failed_parents
        .iter()
        .map(|ts| ts_value(ts))
        .min_by(|a, b| a.partial_cmp(b).unwrap_or(Ordering::Equal))
    else {
        return newest_ts(current, threads);
    };
    threads
        .iter()
        .map(|t| t.parent.ts.as_str())
        .filter(|ts| ts_value(ts) < cutoff)
        .chain(std::iter::once(current))
        .max_by(|a, b| cmp_ts(a, b))
        .unwrap_or(current)
        .to_string()
}

/// 入库结果
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct IngestReport {
    pub upserted: usize,
    pub skipped_empty: usize,
    pub skipped_failed: usize,
    /// 嵌入失败、未写入的线程的父消息 ts
    pub failed_parents: Vec<String>,
}

pub struct ThreadIngestor {
    embedder: Arc<dyn EmbeddingProvider>,
    store: Arc<dyn VectorStore>,
}

impl ThreadIngestor {
    pub fn new(embedder: Arc<dyn EmbeddingProvider>, store: Arc<dyn VectorStore>) -> Self {
        Self { embedder, store }
    }

    pub async fn ingest(&self, threads: &[ChatThread]) -> Result<IngestReport, IngestError> {
        let mut report = IngestReport::default();
        let mut records = Vec::with_capacity(threads.len());

        for thread in threads {
            let text = thread.text();
            if text.trim().is_empty() {
                report.skipped_empty += 1;
                continue;
            }
            let values = match self.embedder.embed(&text).await {
                Ok(v) if !v.is_empty() => v,
                Ok(_) => {
                    tracing::warn!(thread = %thread.record_id(), "empty embedding, thread skipped");
                    report.skipped_failed += 1;
                    report.failed_parents.push(thread.parent.ts.clone());
                    continue;
                }
                Err(e) => {
                    tracing::warn!(thread = %thread.record_id(), error = %e, "embedding failed, thread skipped");
                    report.skipped_failed += 1;
                    report.failed_parents.push(thread.parent.ts.clone());
                    continue;
                }
            };
            records.push(VectorRecord {
                id: thread.record_id(),
                values,
                metadata: thread.metadata(text),
            });
        }

        if !records.is_empty() {
            report.upserted = self.store.upsert(records).await?;
        }
        tracing::info!(
            upserted = report.upserted,
            skipped_empty = report.skipped_empty,
            skipped_failed = report.skipped_failed,
            "threads ingested"
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::LlmError;
    use crate::retrieval::{InMemoryIndex, RetrievalError, VectorMatch};
    use async_trait::async_trait;

    struct LengthEmbedder;

    #[async_trait]
    impl EmbeddingProvider for LengthEmbedder {
        async fn embed(&self, text: &str) -> Result<Vec<f32>, LlmError> {
            if text.contains("poison") {
                return Err(LlmError::Api("rejected".into()));
            }
            Ok(vec![1.0, text.len() as f32])
        }
    }

    struct DownStore;

    #[async_trait]
    impl VectorStore for DownStore {
        async fn query(&self, _v: &[f32], _k: usize) -> Result<Vec<VectorMatch>, RetrievalError> {
            Ok(vec![])
        }

        async fn upsert(&self, _r: Vec<VectorRecord>) -> Result<usize, RetrievalError> {
            Err(RetrievalError::Store("503".into()))
        }
    }

    fn thread(parent_ts: &str, parent_text: &str, replies: &[(&str, &str)]) -> ChatThread {
        ChatThread::assemble(
            "C1",
            ChatMessage::new(parent_ts, Some("U1"), parent_text),
            replies
                .iter()
                .map(|(ts, text)| ChatMessage::new(*ts, Some("U2"), *text))
                .collect(),
        )
    }

    #[test]
    fn test_assemble_sorts_and_dedupes_parent() {
        let t = ChatThread::assemble(
            "C1",
            ChatMessage::new("100.5", Some("U1"), "question"),
            vec![
                ChatMessage::new("102.0", None, "second"),
                ChatMessage::new("100.5", Some("U1"), "question"),
                ChatMessage::new("101.0", None, "first"),
            ],
        );
        let order: Vec<&str> = t.messages.iter().map(|m| m.ts.as_str()).collect();
        assert_eq!(order, vec!["100.5", "101.0", "102.0"]);
        assert_eq!(t.text(), "question\nfirst\nsecond");
        assert_eq!(t.record_id(), "thread-100.5");
        assert_eq!(t.latest_ts(), "102.0");
    }

    #[test]
    fn test_newest_ts_never_moves_backwards() {
        let threads = vec![thread("5.0", "a", &[("7.5", "b")]), thread("6.0", "c", &[])];
        assert_eq!(newest_ts("1.0", &threads), "7.5");
        assert_eq!(newest_ts("9.0", &threads), "9.0");
        assert_eq!(newest_ts("3.0", &[]), "3.0");
    }

    #[test]
    fn test_resume_cursor_stops_before_failed_thread() {
        let threads = vec![
            thread("5.0", "a", &[("7.5", "b")]),
            thread("6.0", "c", &[]),
            thread("8.0", "d", &[]),
        ];
        assert_eq!(resume_cursor("1.0", &threads, &[]), "7.5");
        assert_eq!(resume_cursor("1.0", &threads, &["6.0".to_string()]), "5.0");
        assert_eq!(resume_cursor("1.0", &threads, &["8.0".to_string(), "5.0".to_string()]), "1.0");
    }

    #[tokio::test]
    async fn test_ingest_writes_records_with_metadata() {
        let index = Arc::new(InMemoryIndex::default());
        let ingestor = ThreadIngestor::new(Arc::new(LengthEmbedder), index.clone());
        let threads = vec![
            thread("1.0", "how do I rotate keys?", &[("2.0", "use the admin console")]),
            thread("3.0", "   ", &[]),
            thread("4.0", "poison", &[]),
        ];

        let report = ingestor.ingest(&threads).await.unwrap();
        assert_eq!(
            report,
            IngestReport {
                upserted: 1,
                skipped_empty: 1,
                skipped_failed: 1,
                failed_parents: vec!["4.0".to_string()],
            }
        );

        let hits = index.query(&[1.0, 30.0], 5).await.unwrap();
        assert_eq!(hits[0].id, "thread-1.0");
        assert_eq!(hits[0].text(), "how do I rotate keys?\nuse the admin console");
        assert_eq!(hits[0].metadata["parentUser"], "U1");
        assert_eq!(hits[0].metadata["channel"], "C1");
        assert_eq!(hits[0].metadata["parentTs"], "1.0");
    }

    #[tokio::test]
    async fn test_upsert_failure_fails_batch() {
        let ingestor = ThreadIngestor::new(Arc::new(LengthEmbedder), Arc::new(DownStore));
        let err = ingestor
            .ingest(&[thread("1.0", "hello", &[])])
            .await
            .unwrap_err();
        assert!(matches!(err, IngestError::Store(_)));
    }
}
