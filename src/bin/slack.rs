//! forager Slack 机器人
//!
//! 事件订阅地址: http://YOUR_HOST:<port>/slack/events（订阅 app_mention 与 message.channels）。
//! 配置了 [slack].channel_id 且有嵌入服务时，同时按 poll_interval_secs 轮询该频道并把新线程写入索引。
//!
//! 环境变量:
//! - SLACK_BOT_TOKEN（或 FORAGER__SLACK__BOT_TOKEN）: Bot Token
//! - SLACK_SIGNING_SECRET（或 FORAGER__SLACK__SIGNING_SECRET）: 请求签名密钥，必填
//! - OPENAI_API_KEY: LLM 与嵌入
//!
//! 启动: cargo run --bin forager-slack --features slack

#[cfg(feature = "slack")]
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    use std::path::PathBuf;
    use std::sync::Arc;
    use std::time::Duration;

    use anyhow::Context;
    use forager::agent::build_services;
    use forager::config::{load_config, AppConfig};
    use forager::core::ShutdownManager;
    use forager::ingest::FileCursorStore;
    use forager::integrations::slack::{create_router, SlackClient, SlackState, ThreadPoller};

    forager::observability::init();

    let config_path = std::env::var("FORAGER_CONFIG").ok().map(PathBuf::from);
    let cfg = load_config(config_path).unwrap_or_else(|e| {
        tracing::warn!("config load failed ({}), using defaults", e);
        AppConfig::default()
    });

    let token = cfg
        .slack
        .bot_token
        .clone()
        .or_else(|| std::env::var("SLACK_BOT_TOKEN").ok())
        .filter(|t| !t.trim().is_empty())
        .context("SLACK_BOT_TOKEN must be set")?;
    let signing_secret = cfg
        .slack
        .signing_secret
        .clone()
        .or_else(|| std::env::var("SLACK_SIGNING_SECRET").ok())
        .filter(|s| !s.trim().is_empty())
        .context("SLACK_SIGNING_SECRET must be set")?;
    let client = SlackClient::new(token);

    let bot_user_id = match cfg.slack.bot_user_id.clone().filter(|id| !id.is_empty()) {
        Some(id) => id,
        None => client.auth_test().await.context("resolve bot user id via auth.test")?,
    };
    tracing::info!(bot_user_id = %bot_user_id, "Slack bot identity resolved");

    let api = Arc::new(client);
    let services = build_services(&cfg);

    let shutdown = Arc::new(ShutdownManager::new());
    shutdown.install_signal_handlers();

    match (cfg.slack.channel_id.clone(), services.ingestor.clone()) {
        (Some(channel), Some(ingestor)) => {
            let poller = ThreadPoller::new(
                api.clone(),
                ingestor,
                Arc::new(FileCursorStore::new(cfg.slack.cursor_path.clone())),
                channel.clone(),
                Duration::from_secs(cfg.slack.poll_interval_secs.max(1)),
            );
            tracing::info!(channel = %channel, every_secs = cfg.slack.poll_interval_secs, "starting thread poller");
            tokio::spawn(poller.run(shutdown.token()));
        }
        (Some(_), None) => {
            tracing::warn!("slack.channel_id set but no embedding provider configured; poller disabled")
        }
        (None, _) => tracing::info!("slack.channel_id not set; poller disabled"),
    }

    let state = Arc::new(
        SlackState::new(services.orchestrator, api, bot_user_id).with_signing_secret(signing_secret),
    );
    let app = create_router(state);

    let addr: std::net::SocketAddr = format!("0.0.0.0:{}", cfg.slack.port).parse()?;
    tracing::info!("forager Slack server listening on http://{}", addr);
    tracing::info!("Event URL: http://YOUR_HOST:{}/slack/events", cfg.slack.port);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    let cancel = shutdown.token();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move { cancel.cancelled().await })
        .await?;

    Ok(())
}

#[cfg(not(feature = "slack"))]
fn main() {
    eprintln!("build with --features slack: cargo run --bin forager-slack --features slack");
    std::process::exit(1);
}
