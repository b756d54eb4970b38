//! 核心类型：回答错误、查询阶段、关闭信号

pub mod error;
pub mod shutdown;
pub mod state;

pub use error::AnswerError;
pub use shutdown::ShutdownManager;
pub use state::{QueryPhase, QueryTrace};
