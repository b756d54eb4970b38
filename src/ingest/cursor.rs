//! 轮询游标：最后一次成功入库的消息 ts，持久化为 JSON 文件
//!
//! 只有整批写入向量索引成功后才推进；文件不存在时从 "0" 开始。

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ingest::IngestError;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CursorState {
    pub last_processed_ts: String,
    pub updated_at: DateTime<Utc>,
}

#[async_trait]
pub trait CursorStore: Send + Sync {
    async fn load(&self) -> Result<String, IngestError>;

    async fn save(&self, ts: &str) -> Result<(), IngestError>;
}

pub struct FileCursorStore {
    path: PathBuf,
}

impl FileCursorStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl CursorStore for FileCursorStore {
    async fn load(&self) -> Result<String, IngestError> {
        let raw = match tokio::fs::read_to_string(&self.path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!(path = %self.path.display(), "no cursor yet, starting from 0");
                return Ok("0".to_string());
            }
            Err(e) => return Err(IngestError::Cursor(e.to_string())),
        };
        let state: CursorState =
            serde_json::from_str(&raw).map_err(|e| IngestError::Cursor(e.to_string()))?;
        Ok(state.last_processed_ts)
    }

    async fn save(&self, ts: &str) -> Result<(), IngestError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent)
                    .await
                    .map_err(|e| IngestError::Cursor(e.to_string()))?;
            }
        }
        let state = CursorState {
            last_processed_ts: ts.to_string(),
            updated_at: Utc::now(),
        };
        let json =
            serde_json::to_string_pretty(&state).map_err(|e| IngestError::Cursor(e.to_string()))?;
        // 先写临时文件再 rename，避免中途崩溃留下半个文件
        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, json)
            .await
            .map_err(|e| IngestError::Cursor(e.to_string()))?;
        tokio::fs::rename(&tmp, &self.path)
            .await
            .map_err(|e| IngestError::Cursor(e.to_string()))?;
        tracing::info!(ts, "cursor advanced");
        Ok(())
    }
}
