//! 临时工件存储：生成代码在执行期间的落盘形态
//!
//! 每次执行分配一个新的 ArtifactId（uuid v4），对应目录下独占的 `routine-<uuid>.js`；
//! 写入使用 create_new，同名文件已存在时直接失败，绝不覆盖其它执行的工件。

use std::fmt;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use thiserror::Error;
use tokio::io::AsyncWriteExt;

/// 单次执行独占的工件标识
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ArtifactId(String);

impl ArtifactId {
    pub fn fresh() -> Self {
        Self(format!("routine-{}", uuid::Uuid::new_v4()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ArtifactId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Error, Debug)]
pub enum ArtifactError {
    #[error("artifact {id} already exists")]
    AlreadyExists { id: String },

    #[error("artifact {id}: {source}")]
    Io {
        id: String,
        #[source]
        source: std::io::Error,
    },
}

/// 临时工件存储接口：write / read / remove，命名由调用方保证独占
#[async_trait]
pub trait ArtifactStore: Send + Sync {
    async fn write(&self, id: &ArtifactId, content: &str) -> Result<(), ArtifactError>;

    async fn read(&self, id: &ArtifactId) -> Result<String, ArtifactError>;

    /// 删除工件；工件本就不存在时视为成功
    async fn remove(&self, id: &ArtifactId) -> Result<(), ArtifactError>;
}

/// 文件系统实现：所有工件放在同一目录下
#[derive(Debug, Clone)]
pub struct FsArtifactStore {
    root: PathBuf,
}

impl FsArtifactStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn path_of(&self, id: &ArtifactId) -> PathBuf {
        self.root.join(format!("{}.js", id.as_str()))
    }

    pub fn exists(&self, id: &ArtifactId) -> bool {
        self.path_of(id).exists()
    }
}

fn io_err(id: &ArtifactId, source: std::io::Error) -> ArtifactError {
    ArtifactError::Io {
        id: id.to_string(),
        source,
    }
}

#[async_trait]
impl ArtifactStore for FsArtifactStore {
    async fn write(&self, id: &ArtifactId, content: &str) -> Result<(), ArtifactError> {
        tokio::fs::create_dir_all(&self.root)
            .await
            .map_err(|e| io_err(id, e))?;
        let mut file = tokio::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(self.path_of(id))
            .await
            .map_err(|e| match e.kind() {
                std::io::ErrorKind::AlreadyExists => ArtifactError::AlreadyExists { id: id.to_string() },
                _ => io_err(id, e),
            })?;
        file.write_all(content.as_bytes())
            .await
            .map_err(|e| io_err(id, e))?;
        file.flush().await.map_err(|e| io_err(id, e))?;
        Ok(())
    }

    async fn read(&self, id: &ArtifactId) -> Result<String, ArtifactError> {
        tokio::fs::read_to_string(self.path_of(id))
            .await
            .map_err(|e| io_err(id, e))
    }

    async fn remove(&self, id: &ArtifactId) -> Result<(), ArtifactError> {
        match tokio::fs::remove_file(self.path_of(id)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(io_err(id, e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fresh_ids_are_unique() {
        let a = ArtifactId::fresh();
        let b = ArtifactId::fresh();
        assert_ne!(a, b);
        assert!(a.as_str().starts_with("routine-"));
    }

    #[tokio::test]
    async fn test_write_read_remove() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsArtifactStore::new(dir.path().join("nested"));
        let id = ArtifactId::fresh();

        store.write(&id, "function f() {}").await.unwrap();
        assert!(store.exists(&id));
        assert_eq!(store.read(&id).await.unwrap(), "function f() {}");

        store.remove(&id).await.unwrap();
        assert!(!store.exists(&id));
        // 二次删除不报错
        store.remove(&id).await.unwrap();
    }

    #[tokio::test]
    async fn test_write_refuses_existing_artifact() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsArtifactStore::new(dir.path());
        let id = ArtifactId::fresh();
        store.write(&id, "a").await.unwrap();
        let err = store.write(&id, "b").await.unwrap_err();
        assert!(matches!(err, ArtifactError::AlreadyExists { .. }));
        assert_eq!(store.read(&id).await.unwrap(), "a");
    }

    #[tokio::test]
    async fn test_read_missing_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsArtifactStore::new(dir.path());
        assert!(store.read(&ArtifactId::fresh()).await.is_err());
    }
}
