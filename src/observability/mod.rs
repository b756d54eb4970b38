//! 可观测性：tracing 订阅者，默认 info，可通过 RUST_LOG 覆盖（如 `RUST_LOG=forager::routine=debug` 查看生成代码的 console 输出）
//!
//! 日志写到 stderr，CLI 的回答独占 stdout。

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

pub fn init() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    // 重复初始化（如测试）时忽略
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr))
        .try_init();
}
