//! forager 命令行
//!
//! - `forager ask <question...>`（或直接 `forager <question...>`）：用配置好的服务回答一个问题
//! - `forager ingest <threads.json>`：把 JSON 数组形式的线程写入向量索引
//! - `forager exec <routine.json>`：在沙箱中执行一个 {code, params, functionName} 并打印结果

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Context};
use forager::agent::build_services;
use forager::config::{load_config, AppConfig};
use forager::ingest::ChatThread;
use forager::sandbox::{ExecutionOutcome, GeneratedRoutine};

const USAGE: &str = "usage: forager [ask] <question...> | forager ingest <threads.json> | forager exec <routine.json>";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    forager::observability::init();

    let config_path = std::env::var("FORAGER_CONFIG").ok().map(PathBuf::from);
    let cfg = load_config(config_path).unwrap_or_else(|e| {
        tracing::warn!("config load failed ({}), using defaults", e);
        AppConfig::default()
    });

    let args: Vec<String> = std::env::args().skip(1).collect();
    match args.first().map(String::as_str) {
        None | Some("-h") | Some("--help") => {
            eprintln!("{}", USAGE);
            Ok(())
        }
        Some("ingest") => {
            let path = args.get(1).context(USAGE)?;
            ingest(&cfg, path).await
        }
        Some("exec") => {
            let path = args.get(1).context(USAGE)?;
            exec(&cfg, path).await
        }
        Some("ask") => ask(&cfg, &args[1..].join(" ")).await,
        Some(_) => ask(&cfg, &args.join(" ")).await,
    }
}

async fn ask(cfg: &AppConfig, question: &str) -> anyhow::Result<()> {
    let services = build_services(cfg);
    match services.orchestrator.answer(&[], question).await {
        Ok(answer) => {
            println!("{}", answer);
            Ok(())
        }
        Err(e) => bail!("{} ({})", e, e.code()),
    }
}

async fn ingest(cfg: &AppConfig, path: &str) -> anyhow::Result<()> {
    let raw = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("read {}", path))?;
    let threads: Vec<ChatThread> =
        serde_json::from_str(&raw).with_context(|| format!("parse {}", path))?;
    let services = build_services(cfg);
    let ingestor = services
        .ingestor
        .context("ingest needs an embedding provider (set OPENAI_API_KEY)")?;
    let report = ingestor.ingest(&threads).await?;
    println!(
        "upserted {} thread(s), skipped {} empty, {} failed",
        report.upserted, report.skipped_empty, report.skipped_failed
    );
    Ok(())
}

async fn exec(cfg: &AppConfig, path: &str) -> anyhow::Result<()> {
    let raw = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("read {}", path))?;
    let routine: GeneratedRoutine =
        serde_json::from_str(&raw).with_context(|| format!("parse {}", path))?;
    let executor = build_services(cfg).executor;
    let report = executor
        .execute(routine, Duration::from_millis(cfg.sandbox.timeout_ms))
        .await;
    if let Some(w) = &report.cleanup_warning {
        eprintln!("warning: {}", w);
    }
    match report.outcome {
        ExecutionOutcome::Success(value) => {
            println!("{}", serde_json::to_string_pretty(&value)?);
            Ok(())
        }
        ExecutionOutcome::Failure { kind, message } => bail!("{}: {}", kind, message),
    }
}
