//! CLI surface (spec.md §6). `start`/`stop` drive the engine; the rest are
//! read-only introspection reading persisted state directly out of sqlite —
//! there is no IPC channel to a running process, so these commands read the
//! same `dhan_scalper:v1` keys the engine itself writes (grounded in
//! `interfaces::config_loader`'s "core never touches the filesystem/YAML
//! directly" split: only this layer does).

use crate::application::wallet::WalletSnapshot;
use crate::domain::ports::PersistStore;
use crate::domain::session::{session_id, trading_day, Mode, SessionReport};
use crate::domain::types::Position;
use crate::infrastructure::persistence::{Database, SqlitePersistStore};
use anyhow::{Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "scalper", author, version, about = "Intraday options-scalping engine", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
pub enum ModeArg {
    Paper,
    Live,
}

impl From<ModeArg> for Mode {
    fn from(value: ModeArg) -> Self {
        match value {
            ModeArg::Paper => Mode::Paper,
            ModeArg::Live => Mode::Live,
        }
    }
}

#[derive(Subcommand)]
pub enum Command {
    /// Start the engine and run it until stopped
    Start {
        /// Per-symbol config file (SYMBOL__<SYMBOL>__<field>=value lines)
        #[arg(short = 'c', long, value_name = "FILE")]
        config: PathBuf,
        /// Trading mode
        #[arg(short = 'm', long, value_enum, default_value_t = ModeArg::Paper)]
        mode: ModeArg,
        /// Run for this many minutes, then stop automatically; omit to run until signalled
        #[arg(short = 't', long)]
        minutes: Option<u64>,
        /// Suppress the startup banner
        #[arg(short = 'q', long)]
        quiet: bool,
    },
    /// Signal a running engine to shut down gracefully
    Stop,
    /// Whether a started engine is running and the current session id
    Status {
        #[arg(short = 'm', long, value_enum, default_value_t = ModeArg::Paper)]
        mode: ModeArg,
    },
    /// Print the wallet snapshot
    Balance,
    /// List positions for the current session
    Positions {
        #[arg(short = 'm', long, value_enum, default_value_t = ModeArg::Paper)]
        mode: ModeArg,
    },
    /// List filled trades for the current session
    Orders {
        #[arg(short = 'm', long, value_enum, default_value_t = ModeArg::Paper)]
        mode: ModeArg,
    },
    /// Print the finalized session report
    Report {
        /// Look up a specific session id instead of today's
        #[arg(long)]
        session_id: Option<String>,
        /// Same as the default (today's session) — accepted for symmetry with --session-id
        #[arg(long)]
        latest: bool,
        #[arg(short = 'm', long, value_enum, default_value_t = ModeArg::Paper)]
        mode: ModeArg,
    },
}

fn pid_file_path() -> PathBuf {
    std::env::var("SCALPER_PID_FILE").map(PathBuf::from).unwrap_or_else(|_| PathBuf::from("scalper.pid"))
}

pub fn write_pid_file() -> Result<()> {
    std::fs::write(pid_file_path(), std::process::id().to_string()).context("failed to write pid file")
}

pub fn remove_pid_file() {
    let _ = std::fs::remove_file(pid_file_path());
}

fn read_pid_file() -> Option<u32> {
    std::fs::read_to_string(pid_file_path()).ok()?.trim().parse().ok()
}

/// Sends SIGTERM to the pid recorded by `write_pid_file`. The running
/// engine's `tokio::signal::unix::SignalKind::terminate()` handler picks it
/// up and runs the same `Engine::stop()` path ctrl-c does.
pub async fn handle_stop() -> Result<()> {
    let Some(pid) = read_pid_file() else {
        println!("no running engine found ({} is absent)", pid_file_path().display());
        return Ok(());
    };
    let status = std::process::Command::new("kill")
        .args(["-TERM", &pid.to_string()])
        .status()
        .context("failed to invoke kill")?;
    if status.success() {
        println!("sent shutdown signal to pid {pid}");
    } else {
        println!("pid {pid} not found; removing stale pid file");
        remove_pid_file();
    }
    Ok(())
}

async fn open_store() -> Result<SqlitePersistStore> {
    let db_url = std::env::var("DATABASE_URL").unwrap_or_else(|_| "sqlite://./data/scalper.db".to_string());
    let db = Database::new(&db_url).await.context("failed to open database")?;
    Ok(SqlitePersistStore::new(&db))
}

fn current_session_id(mode: Mode) -> String {
    session_id(mode, trading_day(Utc::now()))
}

pub async fn handle_status(mode: Mode) -> Result<()> {
    match read_pid_file() {
        Some(pid) => println!("engine running (pid {pid})"),
        None => println!("engine not running"),
    }
    println!("current session: {}", current_session_id(mode));
    Ok(())
}

pub async fn handle_balance() -> Result<()> {
    let store = open_store().await?;
    match store.get("dhan_scalper:v1:balance").await.context("failed to read balance")? {
        Some(raw) => {
            let snapshot: WalletSnapshot = serde_json::from_str(&raw).context("malformed balance record")?;
            println!("{}", serde_json::to_string_pretty(&snapshot)?);
        }
        None => println!("no balance recorded yet"),
    }
    Ok(())
}

pub async fn handle_positions(mode: Mode) -> Result<()> {
    let store = open_store().await?;
    let key = format!("dhan_scalper:v1:positions:{}", current_session_id(mode));
    match store.get(&key).await.context("failed to read positions")? {
        Some(raw) => {
            let positions: Vec<Position> = serde_json::from_str(&raw).context("malformed positions record")?;
            println!("{}", serde_json::to_string_pretty(&positions)?);
        }
        None => println!("no positions recorded for {}", current_session_id(mode)),
    }
    Ok(())
}

async fn load_report(mode: Mode, session_id_override: Option<String>) -> Result<Option<SessionReport>> {
    let store = open_store().await?;
    let id = session_id_override.unwrap_or_else(|| current_session_id(mode));
    let key = format!("dhan_scalper:v1:session:{id}");
    match store.get(&key).await.context("failed to read session report")? {
        Some(raw) => Ok(Some(serde_json::from_str(&raw).context("malformed session report")?)),
        None => Ok(None),
    }
}

/// Trades are only persisted as part of the finalized session report — there
/// is no separate order log, so this surfaces the same `trades[]` spec.md §6
/// describes under the report schema.
pub async fn handle_orders(mode: Mode) -> Result<()> {
    match load_report(mode, None).await? {
        Some(report) => println!("{}", serde_json::to_string_pretty(&report.trades)?),
        None => println!("no session report for {} yet", current_session_id(mode)),
    }
    Ok(())
}

pub async fn handle_report(mode: Mode, session_id_override: Option<String>, _latest: bool) -> Result<()> {
    let id = session_id_override.clone().unwrap_or_else(|| current_session_id(mode));
    match load_report(mode, session_id_override).await? {
        Some(report) => println!("{}", serde_json::to_string_pretty(&report)?),
        None => println!("no session report found for {id}"),
    }
    Ok(())
}
