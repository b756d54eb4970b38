//! Pinecone 索引（REST 数据面）
//!
//! `POST {host}/query` 与 `POST {host}/vectors/upsert`，以 `Api-Key` 头鉴权；
//! host 为索引的数据面地址，缺省 scheme 时补 https://。

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::retrieval::{RetrievalError, VectorMatch, VectorRecord, VectorStore};

pub struct PineconeIndex {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    namespace: Option<String>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct QueryRequest<'a> {
    vector: &'a [f32],
    top_k: usize,
    include_metadata: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    namespace: Option<&'a str>,
}

#[derive(Deserialize)]
struct QueryResponse {
    #[serde(default)]
    matches: Vec<VectorMatch>,
}

#[derive(Serialize)]
struct UpsertRequest<'a> {
    vectors: &'a [VectorRecord],
    #[serde(skip_serializing_if = "Option::is_none")]
    namespace: Option<&'a str>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct UpsertResponse {
    #[serde(default)]
    upserted_count: usize,
}

impl PineconeIndex {
    pub fn new(host: &str, api_key: impl Into<String>, namespace: Option<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: normalize_host(host),
            api_key: api_key.into(),
            namespace: namespace.filter(|n| !n.is_empty()),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn post<B: Serialize + ?Sized, R: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<R, RetrievalError> {
        let url = format!("{}{}", self.base_url, path);
        let resp = self
            .client
            .post(&url)
            .header("Api-Key", &self.api_key)
            .json(body)
            .send()
            .await
            .map_err(|e| RetrievalError::Store(e.to_string()))?;

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(RetrievalError::Store(format!("{} {}: {}", path, status, text)));
        }
        resp.json::<R>()
            .await
            .map_err(|e| RetrievalError::Store(format!("bad response from {}: {}", path, e)))
    }
}

fn normalize_host(host: &str) -> String {
    let host = host.trim().trim_end_matches('/');
    if host.starts_with("http://") || host.starts_with("https://") {
        host.to_string()
    } else {
        format!("https://{}", host)
    }
}

#[async_trait]
impl VectorStore for PineconeIndex {
    async fn query(&self, vector: &[f32], top_k: usize) -> Result<Vec<VectorMatch>, RetrievalError> {
        let body = QueryRequest {
            vector,
            top_k,
            include_metadata: true,
            namespace: self.namespace.as_deref(),
        };
        let resp: QueryResponse = self.post("/query", &body).await?;
        Ok(resp.matches)
    }

    async fn upsert(&self, records: Vec<VectorRecord>) -> Result<usize, RetrievalError> {
        if records.is_empty() {
            return Ok(0);
        }
        let body = UpsertRequest {
            vectors: &records,
            namespace: self.namespace.as_deref(),
        };
        let resp: UpsertResponse = self.post("/vectors/upsert", &body).await?;
        tracing::info!(count = resp.upserted_count, "pinecone upsert");
        Ok(resp.upserted_count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_host_normalization() {
        assert_eq!(normalize_host("idx-abc.svc.pinecone.io"), "https://idx-abc.svc.pinecone.io");
        assert_eq!(normalize_host("http://localhost:5080/"), "http://localhost:5080");
    }

    #[test]
    fn test_query_body_shape() {
        let body = QueryRequest {
            vector: &[0.5, 0.25],
            top_k: 5,
            include_metadata: true,
            namespace: None,
        };
        assert_eq!(
            serde_json::to_value(&body).unwrap(),
            json!({"vector": [0.5, 0.25], "topK": 5, "includeMetadata": true})
        );
    }

    #[test]
    fn test_query_response_parsing() {
        let resp: QueryResponse = serde_json::from_value(json!({
            "matches": [
                {"id": "thread-1", "score": 0.91, "metadata": {"text": "deploy steps"}},
                {"id": "thread-2", "score": 0.52}
            ],
            "namespace": ""
        }))
        .unwrap();
        assert_eq!(resp.matches.len(), 2);
        assert_eq!(resp.matches[0].text(), "deploy steps");
        assert_eq!(resp.matches[1].text(), "");

        let empty: QueryResponse = serde_json::from_value(json!({})).unwrap();
        assert!(empty.matches.is_empty());
    }
}
