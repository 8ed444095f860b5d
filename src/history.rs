use std::sync::Arc;
use std::time::Instant;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::exchange::rest::FuturesRestClient;
use crate::model::TimeFrame;
use crate::store::MemoryStore;

/// Fill the store with recent closed candles before streaming has had a
/// chance to accumulate any. Strategies need dozens of bars per
/// timeframe; without this, warmup would take tens of minutes.
///
/// Concurrency is bounded by a semaphore; the REST client's rate
/// limiter spaces the requests out. Individual fetch failures are
/// logged and skipped — the preload as a whole always completes.
pub async fn preload(
    rest: Arc<FuturesRestClient>,
    store: Arc<MemoryStore>,
    symbols: &[String],
    timeframes: &[TimeFrame],
    limit: usize,
    max_concurrent: usize,
) {
    let started = Instant::now();
    info!(
        symbol_count = symbols.len(),
        timeframe_count = timeframes.len(),
        limit,
        "history preload started"
    );

    let semaphore = Arc::new(Semaphore::new(max_concurrent));
    let mut jobs = JoinSet::new();

    for symbol in symbols {
        for &timeframe in timeframes {
            let rest = Arc::clone(&rest);
            let store = Arc::clone(&store);
            let semaphore = Arc::clone(&semaphore);
            let symbol = symbol.clone();

            jobs.spawn(async move {
                let Ok(_permit) = semaphore.acquire_owned().await else {
                    return 0;
                };
                match rest.fetch_klines(&symbol, timeframe, limit).await {
                    Ok(candles) => {
                        let count = candles.len();
                        for candle in candles {
                            store.update_candle(&symbol, timeframe, candle, true);
                        }
                        debug!(symbol = %symbol, timeframe = %timeframe, count, "history loaded");
                        count
                    }
                    Err(e) => {
                        warn!(
                            error = ?e,
                            symbol = %symbol,
                            timeframe = %timeframe,
                            "history fetch failed (skipped)"
                        );
                        0
                    }
                }
            });
        }
    }

    let mut loaded = 0usize;
    while let Some(result) = jobs.join_next().await {
        loaded += result.unwrap_or(0);
    }

    info!(
        candles = loaded,
        elapsed_ms = started.elapsed().as_millis() as u64,
        "history preload complete"
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn preload_with_no_symbols_completes_immediately() {
        let rest = Arc::new(FuturesRestClient::new());
        let store = Arc::new(MemoryStore::new(16));
        preload(rest, Arc::clone(&store), &[], &[TimeFrame::Min1], 250, 20).await;
        assert!(store.available_symbols().is_empty());
    }
}
