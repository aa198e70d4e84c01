//! Read-only audit view over the tradeguard SQLite store.
//!
//! Usage:
//!   audit <command> [options]
//!
//! Commands:
//!   events [--type=<event.type>] [--limit=N]   - Recent audit events
//!   recon [--limit=N]                          - Reconciliation history
//!   replay [--strategy=<name>] [--limit=N]     - Execution replay rows
//!
//! Options:
//!   --db=<path>   SQLite file (default: SQLITE_PATH or ./tradeguard.sqlite)
//!   --json        Output as JSON lines

use anyhow::{bail, Result};
use serde::Serialize;

use tradeguard::config::Config;
use tradeguard::events::EventType;
use tradeguard::storage::AuditStore;

struct Args {
    command: String,
    db: String,
    limit: usize,
    event_type: Option<String>,
    strategy: Option<String>,
    as_json: bool,
}

fn parse_args() -> Result<Args> {
    let argv: Vec<String> = std::env::args().collect();
    let Some(command) = argv.get(1).cloned() else {
        print_usage();
        std::process::exit(1);
    };
    let mut args = Args {
        command,
        db: Config::from_env().sqlite_path,
        limit: 20,
        event_type: None,
        strategy: None,
        as_json: false,
    };
    for arg in &argv[2..] {
        if let Some(v) = arg.strip_prefix("--db=") {
            args.db = v.to_string();
        } else if let Some(v) = arg.strip_prefix("--limit=") {
            args.limit = v.parse()?;
        } else if let Some(v) = arg.strip_prefix("--type=") {
            if EventType::parse(v).is_none() {
                bail!("unknown event type: {}", v);
            }
            args.event_type = Some(v.to_string());
        } else if let Some(v) = arg.strip_prefix("--strategy=") {
            args.strategy = Some(v.to_string());
        } else if arg == "--json" {
            args.as_json = true;
        } else {
            bail!("unknown option: {}", arg);
        }
    }
    Ok(args)
}

fn print_usage() {
    eprintln!("Usage: audit <events|recon|replay> [--db=PATH] [--limit=N] [--type=T] [--strategy=S] [--json]");
}

fn emit_json<T: Serialize>(rows: &[T]) -> Result<()> {
    for r in rows {
        println!("{}", serde_json::to_string(r)?);
    }
    Ok(())
}

fn main() -> Result<()> {
    let args = parse_args()?;
    if !std::path::Path::new(&args.db).exists() {
        bail!("store not found: {}", args.db);
    }
    let store = AuditStore::open_read_only(&args.db)?;

    match args.command.as_str() {
        "events" => {
            let rows = store.get_events(args.event_type.as_deref(), args.limit)?;
            if args.as_json {
                return emit_json(&rows);
            }
            println!("{} events", rows.len());
            for e in &rows {
                let mut line = format!("{:>6} {} [{}] {} {}", e.id, e.timestamp, e.severity, e.event_type, e.message);
                if let Some(t) = &e.ticker {
                    line.push_str(&format!(" ticker={}", t));
                }
                if let Some(o) = &e.order_id {
                    line.push_str(&format!(" order={}", o));
                }
                println!("{}", line);
            }
        }
        "recon" => {
            let rows = store.get_reconciliations(args.limit)?;
            if args.as_json {
                return emit_json(&rows);
            }
            println!("{} reconciliations", rows.len());
            for r in &rows {
                println!(
                    "{:>6} {} {:<8} matched={} mismatches={} critical={} level={}",
                    r.id, r.timestamp, r.status, r.matched, r.mismatches, r.critical_count, r.safety_level
                );
            }
        }
        "replay" => {
            let rows = match &args.strategy {
                Some(s) => store.get_execution_replays_by_strategy(s, args.limit)?,
                None => store.get_execution_replays(args.limit)?,
            };
            if args.as_json {
                return emit_json(&rows);
            }
            println!("{} executions", rows.len());
            for r in &rows {
                let dir = match r.direction_match {
                    Some(true) => "hit",
                    Some(false) => "miss",
                    None => "-",
                };
                println!(
                    "{:>6} {} {} {} signal={:.0} exec={:.0} slip={:.3}% pnl={:.2}% bt={} {}",
                    r.id,
                    r.ticker,
                    r.strategy,
                    r.side,
                    r.signal_price,
                    r.execution_price,
                    r.slippage_pct * 100.0,
                    r.pnl_pct * 100.0,
                    r.bt_predicted_return.map(|v| format!("{:.2}%", v * 100.0)).unwrap_or_else(|| "-".into()),
                    dir
                );
            }
        }
        other => {
            print_usage();
            bail!("unknown command: {}", other);
        }
    }
    Ok(())
}
