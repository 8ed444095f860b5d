mod config;
mod dispatch;
mod error;
mod exchange;
mod history;
mod indicator;
mod model;
mod notifier;
mod storage;
mod store;
mod strategy;
mod watcher;

use std::cmp::Ordering;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use clap::{Parser, Subcommand};
use derive_more::{Display, Error};
use error_stack::{Report, ResultExt};
use parking_lot::RwLock;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use config::AppConfig;
use dispatch::SignalDispatcher;
use exchange::rest::FuturesRestClient;
use exchange::stream::StreamClient;
use model::Signal;
use notifier::Notifier;
use notifier::telegram::TelegramNotifier;
use notifier::terminal::TerminalNotifier;
use storage::Storage;
use storage::sqlite::SqliteStorage;
use store::MemoryStore;
use strategy::Strategy;
use watcher::PositionWatcher;

#[derive(Debug, Display, Error)]
pub enum AppError {
    #[display("configuration error")]
    Config,
    #[display("storage error")]
    Storage,
}

#[derive(Parser)]
#[command(name = "futures-scanner", about = "Binance futures signal scanner and paper trader")]
struct Cli {
    /// Path to the TOML configuration file
    #[arg(short, long, default_value = "config.toml")]
    config: String,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run the live scanner and paper trader
    Run,
    /// Show recent signals and their trade outcomes
    Report {
        /// Number of signals to list
        #[arg(long, default_value_t = 20)]
        limit: usize,
        /// Specific signal id to inspect
        #[arg(long)]
        signal_id: Option<i64>,
    },
}

#[tokio::main]
async fn main() {
    if let Err(report) = run().await {
        eprintln!("{report:?}");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), Report<AppError>> {
    let cli = Cli::parse();
    let config =
        Arc::new(config::load(Path::new(&cli.config)).change_context(AppError::Config)?);

    init_tracing(&config);

    match cli.command.unwrap_or(Command::Run) {
        Command::Run => run_live(config).await,
        Command::Report { limit, signal_id } => run_report(&config, limit, signal_id).await,
    }
}

fn init_tracing(config: &AppConfig) {
    let filter = EnvFilter::new(&config.general.log_level);
    match config.general.log_format.as_str() {
        "json" => {
            tracing_subscriber::fmt()
                .json()
                .with_env_filter(filter)
                .init();
        }
        _ => {
            tracing_subscriber::fmt().with_env_filter(filter).init();
        }
    }
}

async fn open_storage(config: &AppConfig) -> Result<Arc<dyn Storage>, Report<AppError>> {
    let data_dir = &config.general.data_dir;
    std::fs::create_dir_all(data_dir)
        .change_context(AppError::Storage)
        .attach_with(|| format!("data_dir: {data_dir}"))?;

    let db_path = format!("{data_dir}/futures-scanner.db");
    let storage: Arc<dyn Storage> = Arc::new(
        SqliteStorage::open(Path::new(&db_path))
            .await
            .change_context(AppError::Storage)?,
    );
    Ok(storage)
}

fn build_notifier(config: &AppConfig) -> Arc<dyn Notifier> {
    if config.telegram.bot_token.is_empty() || config.telegram.chat_id.is_empty() {
        info!("telegram credentials missing, notifications go to the log");
        Arc::new(TerminalNotifier)
    } else {
        Arc::new(TelegramNotifier::new(
            config.telegram.bot_token.clone(),
            config.telegram.chat_id.clone(),
        ))
    }
}

fn fallback_symbols() -> Vec<String> {
    ["BTCUSDT", "ETHUSDT", "SOLUSDT"]
        .into_iter()
        .map(String::from)
        .collect()
}

/// Symbol listing with a hard-coded fallback so startup never dies on a
/// flaky exchangeInfo call.
async fn fetch_symbols(rest: &FuturesRestClient, limit: usize) -> Vec<String> {
    match rest.fetch_tradable_symbols(limit).await {
        Ok(symbols) if !symbols.is_empty() => symbols,
        Ok(_) => {
            warn!("symbol fetch returned an empty list, using fallback set");
            fallback_symbols()
        }
        Err(e) => {
            error!(error = ?e, "symbol fetch failed, using fallback set");
            fallback_symbols()
        }
    }
}

async fn run_live(config: Arc<AppConfig>) -> Result<(), Report<AppError>> {
    info!(version = env!("CARGO_PKG_VERSION"), "scanner starting");

    let storage = open_storage(&config).await?;
    let rest = Arc::new(FuturesRestClient::new());
    let symbols = fetch_symbols(&rest, config.market.top_volume_limit).await;
    info!(count = symbols.len(), "symbol universe ready");

    let store = Arc::new(MemoryStore::new(store::DEFAULT_CAPACITY));
    let notifier = build_notifier(&config);
    let watcher = Arc::new(PositionWatcher::new(
        Arc::clone(&store),
        Arc::clone(&storage),
        Arc::clone(&notifier),
        config.risk.trade_control_seconds,
        config.risk.time_stop_hours,
    ));
    let dispatcher = Arc::new(SignalDispatcher::new(
        Arc::clone(&storage),
        Arc::clone(&notifier),
        Arc::clone(&watcher),
    ));

    let timeframes = config.stream.parsed_timeframes();
    let stream = Arc::new(StreamClient::new(
        Arc::clone(&store),
        symbols.clone(),
        timeframes.clone(),
        Duration::from_secs(config.stream.reconnect_delay_seconds),
    ));

    let active_strategy = strategy::build(
        &config.scan.active_strategy,
        &config,
        Arc::clone(&store),
    )
    .ok_or_else(|| {
        Report::new(AppError::Config)
            .attach(format!("unknown strategy: {}", config.scan.active_strategy))
    })?;
    info!(
        strategy = active_strategy.id(),
        timeframes = ?active_strategy.required_timeframes(),
        "strategy loaded"
    );
    for timeframe in active_strategy.required_timeframes() {
        if !timeframes.contains(timeframe) {
            warn!(
                timeframe = %timeframe,
                "strategy requires a timeframe the stream does not carry; it will only see preloaded history"
            );
        }
    }

    dispatcher
        .send_notification(&format!(
            "🚀 <b>futures-scanner active</b>\n📡 Mode: scanner & paper trading\n📊 {} symbols tracked\n⚡ WebSocket kline + mark price",
            symbols.len()
        ))
        .await;

    // History preload runs detached: streaming starts in parallel and
    // the scan loop waits out the warmup anyway.
    {
        let rest = Arc::clone(&rest);
        let store = Arc::clone(&store);
        let symbols = symbols.clone();
        let timeframes = timeframes.clone();
        let limit = config.history.preload_limit;
        let max_concurrent = config.history.max_concurrent_requests;
        tokio::spawn(async move {
            history::preload(rest, store, &symbols, &timeframes, limit, max_concurrent).await;
        });
    }

    let shared_symbols = Arc::new(RwLock::new(symbols));
    let cancel = CancellationToken::new();
    let mut tasks: JoinSet<()> = JoinSet::new();

    {
        let stream = Arc::clone(&stream);
        let cancel = cancel.clone();
        tasks.spawn(async move { stream.run(cancel).await });
    }
    {
        let watcher = Arc::clone(&watcher);
        let cancel = cancel.clone();
        tasks.spawn(async move { watcher.run(cancel).await });
    }
    tasks.spawn(scan_loop(
        Arc::clone(&config),
        Arc::clone(&active_strategy),
        Arc::clone(&dispatcher),
        Arc::clone(&watcher),
        Arc::clone(&store),
        Arc::clone(&shared_symbols),
        cancel.clone(),
    ));
    tasks.spawn(symbol_refresh_loop(
        Arc::clone(&config),
        Arc::clone(&rest),
        Arc::clone(&stream),
        Arc::clone(&shared_symbols),
        cancel.clone(),
    ));

    // ── Shutdown ──────────────────────────────────────────────────────
    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            if let Err(e) = result {
                error!(error = %e, "failed to listen for shutdown signal");
            }
            info!("shutdown signal received");
        }
        Some(result) = tasks.join_next() => {
            match result {
                Ok(()) => warn!("a core task exited, shutting down"),
                Err(e) => error!(error = %e, "a core task failed, shutting down"),
            }
        }
    }

    cancel.cancel();
    let drain = async {
        while tasks.join_next().await.is_some() {}
    };
    if tokio::time::timeout(Duration::from_secs(10), drain).await.is_err() {
        warn!("tasks did not stop in time, aborting");
        tasks.abort_all();
    }

    dispatcher
        .send_notification("🔴 <b>futures-scanner stopped.</b>")
        .await;
    storage.close().await;
    info!("shutdown complete");
    Ok(())
}

// ── Scan loop ─────────────────────────────────────────────────────────

async fn scan_loop(
    config: Arc<AppConfig>,
    strategy: Arc<dyn Strategy>,
    dispatcher: Arc<SignalDispatcher>,
    watcher: Arc<PositionWatcher>,
    store: Arc<MemoryStore>,
    symbols: Arc<RwLock<Vec<String>>>,
    cancel: CancellationToken,
) {
    info!(
        interval_secs = config.scan.scan_interval_seconds,
        "scan loop started"
    );

    // Let the stream and preloader accumulate closed candles first.
    info!(seconds = config.scan.warmup_seconds, "waiting for warmup");
    tokio::select! {
        _ = cancel.cancelled() => return,
        _ = sleep(Duration::from_secs(config.scan.warmup_seconds)) => {}
    }

    loop {
        let scan_start = Instant::now();
        let tracked = watcher.tracked_symbols();
        let candidates: Vec<String> = symbols
            .read()
            .iter()
            .filter(|symbol| !tracked.contains(*symbol))
            .cloned()
            .collect();
        info!(
            candidates = candidates.len(),
            tracked = tracked.len(),
            symbols_with_data = store.available_symbols().len(),
            "scan cycle started"
        );

        let semaphore = Arc::new(Semaphore::new(config.scan.max_parallel_tasks));
        let mut evaluations: JoinSet<Option<Signal>> = JoinSet::new();
        for symbol in candidates {
            let strategy = Arc::clone(&strategy);
            let semaphore = Arc::clone(&semaphore);
            evaluations.spawn(async move {
                let _permit = semaphore.acquire_owned().await.ok()?;
                strategy.evaluate(&symbol)
            });
        }

        let mut signals = Vec::new();
        while let Some(result) = evaluations.join_next().await {
            match result {
                Ok(Some(signal)) => signals.push(signal),
                Ok(None) => {}
                // A panicking strategy is a bug, but it must not take
                // the scan down with it.
                Err(e) => error!(error = %e, "strategy evaluation failed"),
            }
        }

        info!(
            signals_found = signals.len(),
            elapsed_ms = scan_start.elapsed().as_millis() as u64,
            "scan cycle complete"
        );

        for signal in rank_signals(signals, config.scan.max_tracked_signals) {
            if let Err(e) = dispatcher.dispatch(&signal).await {
                error!(error = ?e, symbol = %signal.symbol, "signal dispatch failed");
            }
        }

        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = sleep(Duration::from_secs(config.scan.scan_interval_seconds)) => {}
        }
    }
    info!("scan loop stopped");
}

/// Strongest volume spikes first, capped at `max_count`.
fn rank_signals(mut signals: Vec<Signal>, max_count: usize) -> Vec<Signal> {
    signals.sort_by(|a, b| {
        b.spike_ratio
            .partial_cmp(&a.spike_ratio)
            .unwrap_or(Ordering::Equal)
    });
    signals.truncate(max_count);
    signals
}

// ── Symbol refresh loop ───────────────────────────────────────────────

async fn symbol_refresh_loop(
    config: Arc<AppConfig>,
    rest: Arc<FuturesRestClient>,
    stream: Arc<StreamClient>,
    symbols: Arc<RwLock<Vec<String>>>,
    cancel: CancellationToken,
) {
    let interval = Duration::from_secs(config.market.market_refresh_hours * 3600);
    info!(interval_secs = interval.as_secs(), "symbol refresh loop started");

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = sleep(interval) => {}
        }

        match rest
            .fetch_tradable_symbols(config.market.top_volume_limit)
            .await
        {
            Ok(new_symbols) if !new_symbols.is_empty() => {
                let count = new_symbols.len();
                *symbols.write() = new_symbols.clone();
                stream.update_symbols(new_symbols);
                info!(count, "symbol list refreshed");
            }
            Ok(_) => warn!("symbol refresh returned an empty list, keeping current set"),
            Err(e) => error!(error = ?e, "symbol refresh failed, keeping current set"),
        }
    }
    info!("symbol refresh loop stopped");
}

// ── Report subcommand ─────────────────────────────────────────────────

async fn run_report(
    config: &AppConfig,
    limit: usize,
    signal_id: Option<i64>,
) -> Result<(), Report<AppError>> {
    let storage = open_storage(config).await?;

    if let Some(id) = signal_id {
        report_single_signal(storage.as_ref(), id).await?;
        storage.close().await;
        return Ok(());
    }

    let signals = storage
        .list_recent_signals(limit)
        .await
        .change_context(AppError::Storage)?;

    if signals.is_empty() {
        println!("no signals recorded");
        storage.close().await;
        return Ok(());
    }

    for signal in signals {
        let trade = storage
            .get_trade(signal.id)
            .await
            .change_context(AppError::Storage)?;

        match trade {
            Some(trade) => println!(
                "id={} created_at={} symbol={} side={} entry={:.6} tp={:.6} sl={:.6} spike={:.4} closed={} close_price={:.6} pnl={:+.2}%",
                signal.id,
                signal.created_at,
                signal.symbol,
                signal.side,
                signal.entry_price,
                signal.tp_price,
                signal.sl_price,
                signal.spike_ratio,
                trade.close_reason,
                trade.close_price,
                trade.pnl_percent
            ),
            None => println!(
                "id={} created_at={} symbol={} side={} entry={:.6} tp={:.6} sl={:.6} spike={:.4} open",
                signal.id,
                signal.created_at,
                signal.symbol,
                signal.side,
                signal.entry_price,
                signal.tp_price,
                signal.sl_price,
                signal.spike_ratio
            ),
        }
    }

    storage.close().await;
    Ok(())
}

async fn report_single_signal(storage: &dyn Storage, id: i64) -> Result<(), Report<AppError>> {
    let signal = storage
        .get_signal(id)
        .await
        .change_context(AppError::Storage)?;

    let Some(signal) = signal else {
        println!("no signal found for id={id}");
        return Ok(());
    };

    println!(
        "id={} created_at={} symbol={} side={} entry={:.6} tp={:.6} sl={:.6} spike={:.4}",
        signal.id,
        signal.created_at,
        signal.symbol,
        signal.side,
        signal.entry_price,
        signal.tp_price,
        signal.sl_price,
        signal.spike_ratio
    );

    if let Some(snapshot) = storage
        .get_snapshot(id)
        .await
        .change_context(AppError::Storage)?
    {
        println!(
            "snapshot: ema_fast={:.6} ema_slow={:.6} current_volume={:.2} avg_volume={:.2}",
            snapshot.ema_fast_value,
            snapshot.ema_slow_value,
            snapshot.current_volume,
            snapshot.avg_volume
        );
    }

    match storage
        .get_trade(id)
        .await
        .change_context(AppError::Storage)?
    {
        Some(trade) => println!(
            "closed: reason={} close_price={:.6} pnl={:+.2}% at {}",
            trade.close_reason, trade.close_price, trade.pnl_percent, trade.closed_at
        ),
        None => println!("still open (no trade recorded)"),
    }

    Ok(())
}
