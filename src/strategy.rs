pub mod ema_volume;
pub mod rsi_macd;
pub mod volatility_ema;

use std::sync::Arc;

use crate::config::AppConfig;
use crate::model::{Signal, TimeFrame};
use crate::store::MemoryStore;

/// A signal-generating strategy.
///
/// Strategies read exclusively from `MemoryStore` snapshots and do no
/// I/O — `evaluate` is pure computation and never blocks on anything
/// but the store's short-lived locks.
pub trait Strategy: Send + Sync {
    /// Registry key for this strategy (e.g. `"ema_volume"`).
    fn id(&self) -> &'static str;

    /// Timeframes the strategy reads; the stream client must be
    /// configured to carry at least these.
    fn required_timeframes(&self) -> &[TimeFrame];

    /// Evaluate one symbol. `None` means "no signal" — including the
    /// insufficient-data case, which is not an error.
    fn evaluate(&self, symbol: &str) -> Option<Signal>;
}

/// Registry keys accepted by `build` and `scan.active_strategy`.
pub const KNOWN_IDS: &[&str] = &["ema_volume", "rsi_macd", "volatility_ema"];

/// Construct a strategy by registry key.
pub fn build(id: &str, config: &AppConfig, store: Arc<MemoryStore>) -> Option<Arc<dyn Strategy>> {
    match id {
        "ema_volume" => Some(Arc::new(ema_volume::EmaVolume::new(
            &config.strategy,
            &config.risk,
            store,
        ))),
        "rsi_macd" => Some(Arc::new(rsi_macd::RsiMacd::new(store))),
        "volatility_ema" => Some(Arc::new(volatility_ema::VolatilityEma::new(
            &config.strategy,
            store,
        ))),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;

    #[test]
    fn every_known_id_builds() {
        let config = AppConfig::default();
        for id in KNOWN_IDS {
            let store = Arc::new(MemoryStore::new(16));
            let strategy = build(id, &config, store).expect("known id must build");
            assert_eq!(strategy.id(), *id);
            assert!(!strategy.required_timeframes().is_empty());
        }
    }

    #[test]
    fn unknown_id_is_rejected() {
        let config = AppConfig::default();
        let store = Arc::new(MemoryStore::new(16));
        assert!(build("grid_bot", &config, store).is_none());
    }
}
