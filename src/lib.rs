//! forager - 检索增强问答助手
//!
//! 模块划分：
//! - **agent**: 按配置装配 LLM、嵌入、向量索引、沙箱与编排器
//! - **config**: 应用配置加载（TOML + 环境变量）
//! - **core**: 回答错误、查询阶段、优雅关闭
//! - **ingest**: 对话线程入库与轮询游标
//! - **integrations**: HTTP 接口与 Slack 机器人
//! - **llm**: LLM / 嵌入客户端抽象与实现（OpenAI 兼容 / Mock）
//! - **memory**: 对话消息
//! - **pipeline**: 判定、生成、执行、作答的编排
//! - **retrieval**: 向量索引（Pinecone / 内存）与上下文检索
//! - **sandbox**: 生成函数在隔离上下文中的执行

pub mod agent;
pub mod config;
pub mod core;
pub mod ingest;
pub mod integrations;
pub mod llm;
pub mod memory;
pub mod observability;
pub mod pipeline;
pub mod retrieval;
pub mod sandbox;

pub use agent::{build_orchestrator, build_services, AppServices};
pub use pipeline::Orchestrator;
