//! SheetLink Daemon - Headless 后台守护进程
//!
//! 用法: `sheetlink-daemon [workbook.xlsx] [--config sheetlink.json]`
//!
//! 给出工作簿路径时直接建立新链接，否则尝试恢复上次会话持久化的链接。

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use sl_core::{EngineConfig, EventKind};
use sl_sync::{AutosaveTrigger, LinkOutcome, NativeFileHost, SyncEngine};

struct Args {
    workbook: Option<PathBuf>,
    config: Option<PathBuf>,
}

fn parse_args() -> anyhow::Result<Args> {
    let mut args = Args { workbook: None, config: None };
    let mut iter = std::env::args().skip(1);
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--config" | "-c" => {
                let path = iter.next().context("--config requires a path")?;
                args.config = Some(PathBuf::from(path));
            }
            _ if args.workbook.is_none() => args.workbook = Some(PathBuf::from(arg)),
            _ => anyhow::bail!("unexpected argument: {arg}"),
        }
    }
    Ok(args)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 初始化日志
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "sheetlink_daemon=info,sl_sync=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = parse_args()?;
    let config = EngineConfig::load(args.config.as_deref()).context("loading configuration")?;
    tracing::info!(durable = %config.durable_kv_url, fast = %config.fast_kv_dir.display(), "SheetLink Daemon starting...");

    let host = Arc::new(NativeFileHost::new());
    let engine = SyncEngine::bootstrap(config, host.clone()).await?;

    let origin = engine.load_initial().await?;
    tracing::info!(?origin, records = engine.store().len(), "initial dataset loaded");

    // 提示与链接状态写入日志
    let mut events = engine.subscribe();
    tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            match event.kind {
                EventKind::Notice(notice) => tracing::warn!(?notice, "action required"),
                EventKind::LinkStatusChanged(status) => tracing::info!(status = status.as_str(), "link status"),
                EventKind::DatasetReplaced { origin } => {
                    tracing::info!(?origin, revision = event.revision, "dataset replaced")
                }
                _ => {}
            }
        }
    });

    let outcome = match args.workbook {
        Some(path) => {
            host.select(path);
            engine.pick_and_go_live().await
        }
        None => engine.resume_live().await,
    };
    match outcome {
        Ok(LinkOutcome::Live { records }) => tracing::info!(records, "live link established"),
        Ok(LinkOutcome::NeedsManualPick { reason }) => {
            tracing::warn!(%reason, "no live link; restart with a workbook path to link one")
        }
        Ok(LinkOutcome::Cancelled) => tracing::warn!("no workbook selected"),
        Err(err) => tracing::error!(error = %err, "live link could not be established"),
    }

    tracing::info!("SheetLink Daemon is ready!");
    tracing::info!("Press Ctrl+C to shutdown...");

    // 等待关闭信号
    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutting down...");
    if let Some(report) = engine.shutdown().await {
        tracing::info!(trigger = AutosaveTrigger::BeforeUnload.as_str(), revision = report.revision, "final autosave done");
    }

    Ok(())
}
