use std::collections::HashMap;
use std::sync::Arc;

use chrono::{Duration, Utc};
use error_stack::{Report, ResultExt};
use tracing::debug;

use crate::aggregator::{AggregatorClient, MoexCredentials};
use crate::error::StoreKeeperError;
use crate::model::{Aggregator, CandleRow, TickerNaming};
use crate::storage::Storage;

/// Default market/engine hints applied to a naming before it is handed to
/// an aggregator adapter. Not persisted: the ticker catalogue's unique key
/// is `(name, aggregator, timespan)` only, so these only ever affect the
/// upstream request URL.
#[derive(Debug, Clone)]
pub struct MarketHints {
    pub market: String,
    pub engine: String,
}

impl Default for MarketHints {
    fn default() -> Self {
        Self {
            market: "shares".to_string(),
            engine: "stock".to_string(),
        }
    }
}

/// Cache façade over the persistent store and the aggregator adapters;
/// the only component the expression evaluator calls into.
pub struct StoreKeeper {
    storage: Arc<dyn Storage>,
    aggregators: HashMap<Aggregator, AggregatorClient>,
    moex_hints: MarketHints,
}

impl StoreKeeper {
    pub fn new(storage: Arc<dyn Storage>, moex_credentials: Option<MoexCredentials>) -> Self {
        Self::with_hints(storage, moex_credentials, MarketHints::default())
    }

    pub fn with_hints(
        storage: Arc<dyn Storage>,
        moex_credentials: Option<MoexCredentials>,
        moex_hints: MarketHints,
    ) -> Self {
        let mut aggregators = HashMap::new();
        aggregators.insert(Aggregator::Moex, AggregatorClient::new(Aggregator::Moex, None));
        aggregators.insert(
            Aggregator::MoexAnalytic,
            AggregatorClient::new(Aggregator::MoexAnalytic, moex_credentials),
        );
        Self {
            storage,
            aggregators,
            moex_hints,
        }
    }

    /// `startBar`/`endBar` are relative, non-positive bar offsets from now;
    /// zero means the current bar. Translated to wall-clock time by
    /// `now + offset * barWidth(naming.timespan)`.
    pub async fn get_ticker(
        &self,
        naming: &TickerNaming,
        start_bar: i64,
        end_bar: i64,
    ) -> Result<Vec<CandleRow>, Report<StoreKeeperError>> {
        if start_bar >= end_bar {
            return Err(Report::new(StoreKeeperError::ValueError));
        }

        let aggregator = self.aggregators.get(&naming.aggregator).ok_or_else(|| {
            Report::new(StoreKeeperError::UnknownAggregator {
                aggregator: naming.aggregator,
            })
        })?;

        let now = Utc::now();
        let bar_minutes = naming.timespan.to_minutes();
        let start_time = now + Duration::minutes(start_bar * bar_minutes);
        let end_time = now + Duration::minutes(end_bar * bar_minutes);
        let start_ts = start_time.timestamp();
        let end_ts = end_time.timestamp();
        let wanted_bars = end_bar - start_bar;

        let cached = self
            .storage
            .read_candles(naming, start_ts, end_ts)
            .await
            .change_context(StoreKeeperError::Fetch)?;

        if let Some(rows) = &cached {
            if rows.len() as i64 >= wanted_bars {
                return Ok(rows.clone());
            }
        }

        debug!(
            symbol = %naming.symbol,
            aggregator = %naming.aggregator,
            start_ts,
            end_ts,
            "cache miss, refetching from upstream"
        );

        let fetched = aggregator
            .download(&self.hinted_naming(naming), start_time, end_time)
            .await
            .change_context(StoreKeeperError::Fetch)?;

        let clipped: Vec<CandleRow> = fetched
            .into_iter()
            .filter(|row| row.datetime >= start_ts && row.datetime <= end_ts)
            .collect();

        if !clipped.is_empty() {
            self.storage
                .upsert_candles(naming, &clipped)
                .await
                .change_context(StoreKeeperError::Fetch)?;
        }

        let mut result = clipped;
        result.sort_by_key(|r| r.datetime);
        result.dedup_by_key(|r| r.datetime);
        Ok(result)
    }

    /// Apply the configured market/engine hints to a naming built by the
    /// expression rewrite pass (which always uses the library defaults).
    /// Only meaningful for `Aggregator::Moex`; left untouched otherwise.
    fn hinted_naming(&self, naming: &TickerNaming) -> TickerNaming {
        if naming.aggregator != Aggregator::Moex {
            return naming.clone();
        }
        TickerNaming {
            market: self.moex_hints.market.clone(),
            engine: self.moex_hints.engine.clone(),
            ..naming.clone()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::TimeSpan;
    use crate::storage::sqlite::SqliteStorage;

    async fn in_memory_storage() -> Arc<dyn Storage> {
        Arc::new(SqliteStorage::open_in_memory().await)
    }

    #[tokio::test]
    async fn get_ticker_rejects_reversed_window() {
        let storage = in_memory_storage().await;
        let keeper = StoreKeeper::new(storage, None);
        let naming = TickerNaming::new("YNDX", Aggregator::Moex, TimeSpan::Minute);

        let err = keeper.get_ticker(&naming, 0, 0).await.unwrap_err();
        assert!(matches!(
            err.current_context(),
            StoreKeeperError::ValueError
        ));
    }

    #[tokio::test]
    async fn get_ticker_serves_from_cache_when_enough_bars() {
        let storage = in_memory_storage().await;
        let naming = TickerNaming::new("YNDX", Aggregator::Moex, TimeSpan::Minute);
        let now = Utc::now().timestamp();
        storage
            .upsert_candles(
                &naming,
                &[CandleRow {
                    datetime: now,
                    mean_price: Some(2500.0),
                    ..Default::default()
                }],
            )
            .await
            .unwrap();

        let keeper = StoreKeeper::new(storage, None);
        let rows = keeper.get_ticker(&naming, -1, 0).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].mean_price, Some(2500.0));
    }

    #[tokio::test]
    async fn hinted_naming_applies_configured_market_and_engine_for_moex() {
        let storage = in_memory_storage().await;
        let keeper = StoreKeeper::with_hints(
            storage,
            None,
            MarketHints {
                market: "futures".to_string(),
                engine: "stock_fut".to_string(),
            },
        );
        let naming = TickerNaming::new("RIZ3", Aggregator::Moex, TimeSpan::Minute);
        let hinted = keeper.hinted_naming(&naming);
        assert_eq!(hinted.market, "futures");
        assert_eq!(hinted.engine, "stock_fut");
    }

    #[tokio::test]
    async fn hinted_naming_leaves_non_moex_namings_untouched() {
        let storage = in_memory_storage().await;
        let keeper = StoreKeeper::with_hints(
            storage,
            None,
            MarketHints {
                market: "futures".to_string(),
                engine: "stock_fut".to_string(),
            },
        );
        let naming = TickerNaming::new("RIZ3", Aggregator::MoexAnalytic, TimeSpan::Minute);
        let hinted = keeper.hinted_naming(&naming);
        assert_eq!(hinted.market, naming.market);
        assert_eq!(hinted.engine, naming.engine);
    }
}
