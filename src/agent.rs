//! 服务装配
//!
//! 从 AppConfig 显式构造所有协作者（LLM、嵌入、向量索引、沙箱执行器）并组装 Orchestrator，
//! 供 CLI / HTTP / Slack 共用；不存在全局单例。
//! - 没有 OpenAI Key 时使用 Mock LLM，且不启用嵌入（检索会报 retrieval_failed）
//! - 没有 Pinecone host / Key 时使用进程内索引

use std::sync::Arc;
use std::time::Duration;

use crate::config::AppConfig;
use crate::ingest::ThreadIngestor;
use crate::llm::{create_embedder_from_config, EmbeddingProvider, LlmClient, MockLlmClient, OpenAiClient};
use crate::pipeline::Orchestrator;
use crate::retrieval::{
    ContextRetriever, DisabledRetriever, EmbeddingRetriever, InMemoryIndex, PineconeIndex,
    VectorStore,
};
use crate::sandbox::{CapabilitySet, FsArtifactStore, NodeVmRuntime, SandboxedExecutor};

/// 装配好的服务，可在多个请求 / 任务之间共享
#[derive(Clone)]
pub struct AppServices {
    pub orchestrator: Arc<Orchestrator>,
    pub executor: Arc<SandboxedExecutor>,
    pub vector_store: Arc<dyn VectorStore>,
    /// 嵌入服务可用时才有
    pub ingestor: Option<Arc<ThreadIngestor>>,
}

fn openai_key(cfg: &AppConfig) -> Option<String> {
    cfg.llm
        .api_key
        .clone()
        .or_else(|| std::env::var("OPENAI_API_KEY").ok())
        .filter(|k| !k.trim().is_empty())
}

pub fn create_llm_from_config(cfg: &AppConfig) -> Arc<dyn LlmClient> {
    match openai_key(cfg) {
        Some(key) => {
            tracing::info!("Using OpenAI LLM ({})", cfg.llm.model);
            Arc::new(
                OpenAiClient::new(cfg.llm.base_url.as_deref(), &cfg.llm.model, Some(&key))
                    .with_temperatures(cfg.llm.decision_temperature, cfg.llm.synthesis_temperature),
            )
        }
        None => {
            tracing::warn!("No API key set, using Mock LLM");
            Arc::new(MockLlmClient)
        }
    }
}

pub fn create_embedder(cfg: &AppConfig) -> Option<Arc<dyn EmbeddingProvider>> {
    let key = openai_key(cfg);
    create_embedder_from_config(
        cfg.llm.base_url.as_deref(),
        &cfg.embedding.model,
        key.as_deref(),
    )
}

pub fn create_vector_store(cfg: &AppConfig) -> Arc<dyn VectorStore> {
    let key = cfg
        .vector_store
        .api_key
        .clone()
        .or_else(|| std::env::var("PINECONE_API_KEY").ok())
        .filter(|k| !k.trim().is_empty());
    match (cfg.vector_store.host.as_deref(), key) {
        (Some(host), Some(key)) if !host.trim().is_empty() => {
            let index = PineconeIndex::new(host, key, cfg.vector_store.namespace.clone());
            tracing::info!("Using Pinecone index at {}", index.base_url());
            Arc::new(index)
        }
        _ => {
            tracing::warn!("Pinecone not configured, using in-memory index");
            Arc::new(InMemoryIndex::default())
        }
    }
}

pub fn create_executor(cfg: &AppConfig) -> SandboxedExecutor {
    let capabilities: CapabilitySet = cfg.sandbox.capabilities.iter().copied().collect();
    let artifact_dir = cfg.sandbox.artifact_dir();
    tracing::info!(
        node = %cfg.sandbox.node_bin,
        artifact_dir = %artifact_dir.display(),
        capabilities = ?capabilities.names(),
        "sandbox configured"
    );
    SandboxedExecutor::new(
        Arc::new(NodeVmRuntime::new(cfg.sandbox.node_bin.clone())),
        Arc::new(FsArtifactStore::new(artifact_dir)),
        capabilities,
    )
    .with_kill_grace(Duration::from_millis(cfg.sandbox.kill_grace_ms))
}

/// 由给定的 LLM 与嵌入服务装配（测试可注入替身）
pub fn build_services_with(
    cfg: &AppConfig,
    llm: Arc<dyn LlmClient>,
    embedder: Option<Arc<dyn EmbeddingProvider>>,
    vector_store: Arc<dyn VectorStore>,
) -> AppServices {
    let executor = Arc::new(create_executor(cfg));
    let retriever: Arc<dyn ContextRetriever> = match &embedder {
        Some(embedder) => Arc::new(EmbeddingRetriever::new(
            Arc::clone(embedder),
            Arc::clone(&vector_store),
        )),
        None => Arc::new(DisabledRetriever::new("no embedding provider configured")),
    };
    let ingestor = embedder
        .map(|e| Arc::new(ThreadIngestor::new(e, Arc::clone(&vector_store))));

    let orchestrator = Orchestrator::new(llm, retriever, Arc::clone(&executor))
        .with_top_k(cfg.retrieval.top_k)
        .with_execution_timeout(Duration::from_millis(cfg.sandbox.timeout_ms));

    AppServices {
        orchestrator: Arc::new(orchestrator),
        executor,
        vector_store,
        ingestor,
    }
}

pub fn build_services(cfg: &AppConfig) -> AppServices {
    build_services_with(
        cfg,
        create_llm_from_config(cfg),
        create_embedder(cfg),
        create_vector_store(cfg),
    )
}

pub fn build_orchestrator(cfg: &AppConfig) -> Arc<Orchestrator> {
    build_services(cfg).orchestrator
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{LlmError, ScriptedLlmClient};
    use crate::ingest::{ChatMessage, ChatThread};
    use crate::sandbox::Capability;
    use async_trait::async_trait;

    struct ConstEmbedder;

    #[async_trait]
    impl EmbeddingProvider for ConstEmbedder {
        async fn embed(&self, _text: &str) -> Result<Vec<f32>, LlmError> {
            Ok(vec![1.0, 1.0])
        }
    }

    #[test]
    fn test_unconfigured_vector_store_is_in_memory() {
        let mut cfg = AppConfig::default();
        cfg.vector_store.host = None;
        // 不 panic 且可用即可；具体类型不暴露
        let _store = create_vector_store(&cfg);
    }

    #[test]
    fn test_executor_uses_configured_capabilities() {
        let mut cfg = AppConfig::default();
        cfg.sandbox.capabilities = vec![Capability::Console, Capability::Url, Capability::Console];
        let exec = create_executor(&cfg);
        assert_eq!(exec.capabilities().names(), vec!["console", "url"]);
    }

    #[test]
    fn test_services_expose_shared_executor() {
        let mut cfg = AppConfig::default();
        cfg.sandbox.capabilities = vec![Capability::Timers];
        let services = build_services_with(
            &cfg,
            Arc::new(ScriptedLlmClient::default()),
            None,
            Arc::new(InMemoryIndex::default()),
        );
        assert_eq!(services.executor.capabilities().names(), vec!["timers"]);
        let copy = services.clone();
        assert!(Arc::ptr_eq(&copy.executor, &services.executor));
    }

    #[tokio::test]
    async fn test_ingested_threads_are_answerable() {
        let cfg = AppConfig::default();
        let llm = Arc::new(ScriptedLlmClient::with_replies(["false", "Use the admin console."]));
        let services = build_services_with(
            &cfg,
            llm.clone(),
            Some(Arc::new(ConstEmbedder)),
            Arc::new(InMemoryIndex::default()),
        );

        let thread = ChatThread::assemble(
            "C1",
            ChatMessage::new("1.0", Some("U1"), "how do I rotate keys?"),
            vec![ChatMessage::new("2.0", Some("U2"), "admin console > keys")],
        );
        services
            .ingestor
            .as_ref()
            .unwrap()
            .ingest(&[thread])
            .await
            .unwrap();

        let answer = services
            .orchestrator
            .answer(&[], "rotate keys?")
            .await
            .unwrap();
        assert_eq!(answer, "Use the admin console.");
        assert!(llm.calls()[1]
            .messages
            .last()
            .unwrap()
            .content
            .contains("admin console > keys"));
    }

    #[tokio::test]
    async fn test_without_embedder_retrieval_fails_cleanly() {
        let cfg = AppConfig::default();
        let services = build_services_with(
            &cfg,
            Arc::new(ScriptedLlmClient::with_replies(["false"])),
            None,
            Arc::new(InMemoryIndex::default()),
        );
        assert!(services.ingestor.is_none());
        let err = services.orchestrator.answer(&[], "q").await.unwrap_err();
        assert_eq!(err.code(), "retrieval_failed");
    }
}
