//! SheetLink CLI - 命令行交互接口

use std::io::{self, BufRead, Write};
use std::path::Path;
use std::sync::Arc;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use sl_core::{CellValue, EngineConfig, Patch};
use sl_sync::{AutosaveTrigger, LinkOutcome, NativeFileHost, SyncEngine, WATCHDOG_TASK};

/// 数字按数值写入，其余按文本
fn parse_value(raw: &str) -> CellValue {
    match raw.parse::<f64>() {
        Ok(n) => CellValue::Number(n),
        Err(_) => CellValue::text(raw),
    }
}

fn print_outcome(outcome: sl_core::Result<LinkOutcome>) {
    match outcome {
        Ok(LinkOutcome::Live { records }) => println!("Live: {} records loaded", records),
        Ok(LinkOutcome::NeedsManualPick { reason }) => println!("Manual pick required: {}", reason),
        Ok(LinkOutcome::Cancelled) => println!("No file selected. Use 'live <path>'."),
        Err(err) => println!("Error: {}", err),
    }
}

fn show(engine: &SyncEngine) {
    let snapshot = engine.snapshot();
    let columns = snapshot.dataset.columns();
    println!("#\t{}", columns.join("\t"));
    for (idx, record) in snapshot.dataset.records().iter().enumerate() {
        let cells: Vec<String> = columns
            .iter()
            .map(|c| record.get(c).map(|v| v.as_text()).unwrap_or_default())
            .collect();
        println!("{}\t{}", idx, cells.join("\t"));
    }
    println!();
    println!("Uncovered:        {:?}", snapshot.views.uncovered);
    println!("On leave:         {:?}", snapshot.views.on_leave);
    println!("Contracts ending: {:?}", snapshot.views.contracts_ending);
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 初始化日志
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "sheetlink_cli=info,sl_sync=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = EngineConfig::load(None)?;
    let host = Arc::new(NativeFileHost::new());
    let engine = SyncEngine::bootstrap(config, host.clone()).await?;
    let origin = engine.load_initial().await?;

    println!("SheetLink CLI v{}", env!("CARGO_PKG_VERSION"));
    match origin {
        Some(origin) => println!("Loaded {} records ({:?}).", engine.store().len(), origin),
        None => println!("No stored dataset. Use 'import <path>' or 'live <path>'."),
    }
    println!("Type 'help' for available commands, 'quit' to exit.");
    println!();

    let stdin = io::stdin();
    let mut stdout = io::stdout();

    loop {
        print!("sl> ");
        stdout.flush()?;

        let mut input = String::new();
        if stdin.lock().read_line(&mut input)? == 0 {
            engine.shutdown().await;
            break;
        }
        let input = input.trim();

        if input.is_empty() {
            continue;
        }

        let parts: Vec<&str> = input.split_whitespace().collect();
        let command = parts[0];

        match command {
            "help" => {
                println!("Available commands:");
                println!("  help                    - Show this help message");
                println!("  status                  - Show link and store status");
                println!("  live [path]             - Resume the live link, or link the given workbook");
                println!("  show                    - Print the dataset and derived views");
                println!("  set <row> <col> <value> - Edit one cell");
                println!("  sync                    - Write the dataset to the linked workbook now");
                println!("  reload                  - Re-read the linked workbook now");
                println!("  save                    - Save to the local tiers");
                println!("  import <path>           - One-shot import of a workbook");
                println!("  export <path>           - One-shot export to a workbook");
                println!("  disconnect              - Drop the live link (kept for next session)");
                println!("  quit / exit             - Save and exit");
            }
            "status" => {
                let snapshot = engine.snapshot();
                println!("Link Status:");
                println!("  Link:     {}", engine.link_state().as_str());
                println!("  Status:   {}", engine.status().as_str());
                println!("  Watchdog: {:?}", engine.scheduler().state(WATCHDOG_TASK));
                println!("Store:");
                println!("  Records:  {}", snapshot.dataset.len());
                println!("  Revision: {}", snapshot.revision);
                println!("  Dirty:    {}", snapshot.dirty);
            }
            "live" => {
                let outcome = match parts.get(1) {
                    Some(path) => {
                        host.select(*path);
                        engine.pick_and_go_live().await
                    }
                    None => engine.go_live().await,
                };
                print_outcome(outcome);
            }
            "show" => show(&engine),
            "set" => {
                if parts.len() < 4 {
                    println!("Usage: set <row> <col> <value>");
                    continue;
                }
                let Ok(row) = parts[1].parse::<usize>() else {
                    println!("Invalid row: {}", parts[1]);
                    continue;
                };
                let value = parse_value(&parts[3..].join(" "));
                match engine.apply_mutation(&[Patch::set(row, parts[2], value)]) {
                    Ok(revision) => println!("Updated (revision {})", revision),
                    Err(err) => println!("Error: {}", err),
                }
            }
            "sync" => match engine.sync_now().await {
                Ok(outcome) => println!("{:?}", outcome),
                Err(err) => println!("Error: {}", err),
            },
            "reload" => match engine.reload_now().await {
                Ok(outcome) => println!("{:?}", outcome),
                Err(err) => println!("Error: {}", err),
            },
            "save" => match engine.lifecycle(AutosaveTrigger::Manual).await {
                Some(report) => println!("Saved revision {} to {:?}", report.revision, report.tiers),
                None => println!("Nothing to save."),
            },
            "import" | "export" => {
                let Some(path) = parts.get(1).map(Path::new) else {
                    println!("Usage: {} <path>", command);
                    continue;
                };
                let result = if command == "import" {
                    engine.import_once(path).await.map(|n| format!("Imported {} records", n))
                } else {
                    engine.export_once(path).await.map(|n| format!("Exported {} bytes", n))
                };
                match result {
                    Ok(message) => println!("{}", message),
                    Err(err) => println!("Error: {}", err),
                }
            }
            "disconnect" => {
                engine.disconnect();
                println!("Disconnected.");
            }
            "quit" | "exit" => {
                engine.shutdown().await;
                println!("Goodbye!");
                break;
            }
            _ => {
                println!("Unknown command: {}", command);
                println!("Type 'help' for available commands.");
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_value() {
        assert_eq!(parse_value("42"), CellValue::Number(42.0));
        assert_eq!(parse_value("CUBIERTO"), CellValue::text("CUBIERTO"));
    }
}
