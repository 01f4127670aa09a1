//! Process entry point: loads `.env`, wires `tracing-subscriber`, parses the
//! CLI, and for `start` constructs every adapter `Engine::build` needs.
//! Mirrors the teacher's `main.rs` staged bootstrap (env load → logging →
//! config → build → run), minus the embedded UI this crate has no equivalent
//! of.

use anyhow::{Context, Result};
use clap::Parser;
use scalper_core::application::engine::Engine;
use scalper_core::application::instrument_master::InMemoryInstrumentMaster;
use scalper_core::config::{Credentials, EngineConfig};
use scalper_core::domain::ports::{Broker, InstrumentLookup, LtpLookup, Notifier, PersistStore, StreamTransport};
use scalper_core::domain::session::Mode;
use scalper_core::infrastructure::broker::{DhanLiveBroker, PaperBroker};
use scalper_core::infrastructure::market_data::{RestLtpLookup, WebSocketTransport};
use scalper_core::infrastructure::notify::{ConsoleNotifier, TelegramNotifier};
use scalper_core::infrastructure::persistence::{Database, SqlitePersistStore};
use scalper_core::interfaces::cli;
use scalper_core::interfaces::config_loader;
use scalper_core::interfaces::{Cli, Command};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::EnvFilter;

fn init_tracing() {
    let filter = EnvFilter::try_from_env("LOG_LEVEL").unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_target(false).with_env_filter(filter).init();
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    init_tracing();

    let cli = Cli::parse();
    match cli.command {
        Command::Start { config, mode, minutes, quiet } => run_start(config, mode.into(), minutes, quiet).await,
        Command::Stop => cli::handle_stop().await,
        Command::Status { mode } => cli::handle_status(mode.into()).await,
        Command::Balance => cli::handle_balance().await,
        Command::Positions { mode } => cli::handle_positions(mode.into()).await,
        Command::Orders { mode } => cli::handle_orders(mode.into()).await,
        Command::Report { session_id, latest, mode } => cli::handle_report(mode.into(), session_id, latest).await,
    }
}

async fn run_start(config_path: PathBuf, mode: Mode, minutes: Option<u64>, quiet: bool) -> Result<()> {
    if !quiet {
        info!(%mode, "scalper: starting");
    }

    let raw_symbols = config_loader::load_symbol_table(&config_path)?;
    let symbols = scalper_core::config::symbol_configs_from_map(&raw_symbols)?;
    let engine_config = EngineConfig::from_env(mode, symbols)?;
    let creds = Credentials::from_env_for_mode(mode)?;

    let db_url = std::env::var("DATABASE_URL").unwrap_or_else(|_| "sqlite://./data/scalper.db".to_string());
    let db = Database::new(&db_url).await?;
    let persist: Arc<dyn PersistStore> = Arc::new(SqlitePersistStore::new(&db));

    // Paper and live share the same real-time feed; only order execution
    // differs by mode (paper fills are simulated, never sent to the broker).
    let broker: Arc<dyn Broker> = match mode {
        Mode::Paper => Arc::new(PaperBroker::new(engine_config.starting_balance)),
        Mode::Live => Arc::new(DhanLiveBroker::new(creds.base_url.clone(), creds.client_id.clone(), creds.access_token.clone())),
    };

    let feed_url = std::env::var("FEED_WS_URL").unwrap_or_else(|_| "wss://api-feed.dhan.co".to_string());
    let transport: Arc<dyn StreamTransport> = Arc::new(WebSocketTransport::new(feed_url, creds.access_token.clone()));

    let instrument_csv = std::env::var("INSTRUMENT_MASTER_CSV").ok();
    let instruments = config_loader::load_instrument_master(instrument_csv.as_deref());
    let instrument_lookup: Arc<dyn InstrumentLookup> = Arc::new(InMemoryInstrumentMaster::new(instruments));

    let notifier: Arc<dyn Notifier> = match (&creds.telegram_bot_token, &creds.telegram_chat_id) {
        (Some(token), Some(chat_id)) => Arc::new(TelegramNotifier::new(token.clone(), chat_id.clone())),
        _ => Arc::new(ConsoleNotifier),
    };

    let ltp_lookup: Option<Arc<dyn LtpLookup>> = Some(Arc::new(RestLtpLookup::new(creds.base_url.clone(), creds.access_token.clone())));

    let engine = Engine::build(engine_config, broker, transport, instrument_lookup, persist, notifier, ltp_lookup)
        .await
        .context("failed to build engine")?;

    cli::write_pid_file()?;
    let run_for = minutes.map(|m| Duration::from_secs(m * 60));
    let result = engine.run(run_for).await;
    cli::remove_pid_file();
    result
}
