//! forager HTTP 服务
//!
//! - POST /api/chat   {query, history?} → {answer}
//! - POST /api/ingest {threads}         → {upserted, ...}
//! - GET  /api/health
//!
//! 配置见 config/default.toml，端口为 [web].port（环境变量 FORAGER__WEB__PORT 可覆盖）。
//!
//! 启动: cargo run --bin forager-web --features web

#[cfg(feature = "web")]
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    use std::path::PathBuf;
    use std::sync::Arc;

    use forager::agent::build_services;
    use forager::config::{load_config, AppConfig};
    use forager::core::ShutdownManager;
    use forager::integrations::http::{create_router, HttpState};

    forager::observability::init();

    let config_path = std::env::var("FORAGER_CONFIG").ok().map(PathBuf::from);
    let cfg = load_config(config_path).unwrap_or_else(|e| {
        tracing::warn!("config load failed ({}), using defaults", e);
        AppConfig::default()
    });

    let services = build_services(&cfg);
    if services.ingestor.is_none() {
        tracing::warn!("no embedding provider configured: retrieval and /api/ingest are disabled");
    }
    let app = create_router(Arc::new(HttpState::from(&services)));

    let shutdown = Arc::new(ShutdownManager::new());
    shutdown.install_signal_handlers();

    let addr: std::net::SocketAddr = format!("0.0.0.0:{}", cfg.web.port).parse()?;
    tracing::info!("forager web server listening on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    let token = shutdown.token();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move { token.cancelled().await })
        .await?;

    tracing::info!("forager web server stopped");
    Ok(())
}

#[cfg(not(feature = "web"))]
fn main() {
    eprintln!("build with --features web: cargo run --bin forager-web --features web");
    std::process::exit(1);
}
