//! 应用配置：从 config/default.toml 与环境变量加载
//!
//! 加载顺序：先读 TOML 文件，再用环境变量 `FORAGER__*` 覆盖（双下划线表示嵌套，如 `FORAGER__SANDBOX__TIMEOUT_MS=2000`）。
//! 各段均提供与 serde 默认值一致的 Default 实现，缺少配置文件时也能直接运行。

use std::path::PathBuf;

use serde::Deserialize;

use crate::sandbox::Capability;

/// 应用配置根（对应 config/default.toml 的顶层）
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub llm: LlmSection,
    pub embedding: EmbeddingSection,
    pub vector_store: VectorStoreSection,
    pub retrieval: RetrievalSection,
    pub sandbox: SandboxSection,
    pub web: WebSection,
    pub slack: SlackSection,
}

/// [llm] 段：模型、端点与两档低温度
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LlmSection {
    pub model: String,
    pub base_url: Option<String>,
    pub api_key: Option<String>,
    /// true/false 判定使用的温度
    pub decision_temperature: f32,
    /// 函数生成使用的温度
    pub synthesis_temperature: f32,
}

impl Default for LlmSection {
    fn default() -> Self {
        Self {
            model: "gpt-4o".to_string(),
            base_url: None,
            api_key: None,
            decision_temperature: 0.1,
            synthesis_temperature: 0.0,
        }
    }
}

/// [embedding] 段
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EmbeddingSection {
    pub model: String,
}

impl Default for EmbeddingSection {
    fn default() -> Self {
        Self {
            model: "text-embedding-ada-002".to_string(),
        }
    }
}

/// [vector_store] 段：Pinecone 索引地址（不含协议时自动补 https://）
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct VectorStoreSection {
    pub host: Option<String>,
    pub api_key: Option<String>,
    pub namespace: Option<String>,
}

/// [retrieval] 段
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RetrievalSection {
    pub top_k: usize,
}

impl Default for RetrievalSection {
    fn default() -> Self {
        Self { top_k: 5 }
    }
}

/// [sandbox] 段：Node 路径、单阶段超时、强杀宽限、临时文件目录与能力白名单
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SandboxSection {
    pub node_bin: String,
    /// 加载与调用各自的预算（毫秒）
    pub timeout_ms: u64,
    /// 运行时自身超时后，宿主再等待多久才强杀子进程
    pub kill_grace_ms: u64,
    /// 未设置时用系统临时目录下的 forager-routines
    pub artifact_dir: Option<PathBuf>,
    pub capabilities: Vec<Capability>,
}

impl Default for SandboxSection {
    fn default() -> Self {
        Self {
            node_bin: "node".to_string(),
            timeout_ms: 1000,
            kill_grace_ms: 500,
            artifact_dir: None,
            capabilities: Capability::ALL.to_vec(),
        }
    }
}

impl SandboxSection {
    pub fn artifact_dir(&self) -> PathBuf {
        self.artifact_dir
            .clone()
            .unwrap_or_else(|| std::env::temp_dir().join("forager-routines"))
    }
}

/// [web] 段
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WebSection {
    pub port: u16,
}

impl Default for WebSection {
    fn default() -> Self {
        Self { port: 3001 }
    }
}

/// [slack] 段：Bot Token、Bot 用户 ID、入库频道与轮询游标
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SlackSection {
    pub bot_token: Option<String>,
    /// 请求签名密钥；留空时读取 SLACK_SIGNING_SECRET
    pub signing_secret: Option<String>,
    /// 形如 U088MTBNGLS；为空时启动时通过 auth.test 获取
    pub bot_user_id: Option<String>,
    /// 轮询入库的频道；为空则不启动轮询
    pub channel_id: Option<String>,
    pub poll_interval_secs: u64,
    pub cursor_path: PathBuf,
    pub port: u16,
}

impl Default for SlackSection {
    fn default() -> Self {
        Self {
            bot_token: None,
            signing_secret: None,
            bot_user_id: None,
            channel_id: None,
            poll_interval_secs: 300,
            cursor_path: PathBuf::from("workspace/slack_cursor.json"),
            port: 3002,
        }
    }
}

/// 从 config 目录加载配置，环境变量 FORAGER__* 可覆盖
///
/// 1. 按顺序查找 config/default.toml、../config/default.toml、default.toml，找到则作为第一源
/// 2. 若传入 config_path 且文件存在，则追加该文件（可覆盖前面的键）
/// 3. 最后叠加环境变量 FORAGER__*（双下划线表示嵌套键）
pub fn load_config(config_path: Option<PathBuf>) -> Result<AppConfig, config::ConfigError> {
    let mut builder = config::Config::builder();

    let default_names = ["config/default", "../config/default", "default"];
    for name in default_names {
        let path = format!("{}.toml", name);
        if std::path::Path::new(&path).exists() {
            builder = builder.add_source(config::File::with_name(name).required(false));
            break;
        }
    }

    if let Some(ref path) = config_path {
        if path.exists() {
            builder = builder.add_source(config::File::from(path.clone()).required(false));
        }
    }

    builder = builder.add_source(
        config::Environment::with_prefix("FORAGER")
            .separator("__")
            .try_parsing(true),
    );

    let c = builder.build()?;
    c.try_deserialize()
}
