//! 进程内向量索引：余弦相似度，容量满时淘汰最早写入的记录

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::retrieval::{RetrievalError, VectorMatch, VectorRecord, VectorStore};

pub struct InMemoryIndex {
    entries: RwLock<Vec<VectorRecord>>,
    max_entries: usize,
}

impl InMemoryIndex {
    pub fn new(max_entries: usize) -> Self {
        Self {
            entries: RwLock::new(Vec::new()),
            max_entries,
        }
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}

impl Default for InMemoryIndex {
    fn default() -> Self {
        Self::new(10_000)
    }
}

#[async_trait]
impl VectorStore for InMemoryIndex {
    async fn query(&self, vector: &[f32], top_k: usize) -> Result<Vec<VectorMatch>, RetrievalError> {
        let entries = self.entries.read().await;
        let mut scored: Vec<(f32, &VectorRecord)> = entries
            .iter()
            .map(|r| (cosine_similarity(vector, &r.values), r))
            .filter(|(score, _)| *score > 0.0)
            .collect();
        scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));

        Ok(scored
            .into_iter()
            .take(top_k)
            .map(|(score, r)| VectorMatch {
                id: r.id.clone(),
                score,
                metadata: r.metadata.clone(),
            })
            .collect())
    }

    async fn upsert(&self, records: Vec<VectorRecord>) -> Result<usize, RetrievalError> {
        let mut entries = self.entries.write().await;
        let count = records.len();
        for record in records {
            if record.values.is_empty() {
                return Err(RetrievalError::EmptyEmbedding);
            }
            entries.retain(|e| e.id != record.id);
            entries.push(record);
        }
        if entries.len() > self.max_entries {
            let overflow = entries.len() - self.max_entries;
            entries.drain(0..overflow);
        }
        Ok(count)
    }
}

fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        0.0
    } else {
        dot / (norm_a * norm_b)
    }
}
