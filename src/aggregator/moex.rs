use std::num::NonZeroU32;
use std::sync::Arc;

use chrono::{DateTime, NaiveDateTime, Utc};
use error_stack::{Report, ResultExt};
use futures::future::BoxFuture;
use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use serde::Deserialize;
use serde_json::Value;

use crate::error::AggregatorError;
use crate::model::{CandleRow, TickerNaming};

const MOEX_REQUESTS_PER_SECOND: u32 = 5;

const AGG: &str = "moex";

/// Adapter for MOEX ISS candle data: `(open+close)/2` mean, high, low and
/// traded volume per bar.
pub struct MoexClient {
    client: reqwest::Client,
    rate_limiter: Arc<DefaultDirectRateLimiter>,
}

impl MoexClient {
    pub fn new() -> Self {
        let quota = Quota::per_second(NonZeroU32::new(MOEX_REQUESTS_PER_SECOND).unwrap());
        Self {
            client: reqwest::Client::new(),
            rate_limiter: Arc::new(RateLimiter::direct(quota)),
        }
    }

    pub fn download(
        &self,
        naming: &TickerNaming,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> BoxFuture<'_, Result<Vec<CandleRow>, Report<AggregatorError>>> {
        let symbol = naming.symbol.clone();
        let market = naming.market.clone();
        let engine = naming.engine.clone();
        let interval = naming.timespan.moex_interval();

        Box::pin(async move {
            self.rate_limiter.until_ready().await;

            let url = format!(
                "https://iss.moex.com/iss/engines/{engine}/markets/{market}/securities/{symbol}/candles.json"
            );
            let response = self
                .client
                .get(&url)
                .query(&[
                    ("from", start.format("%Y-%m-%d").to_string()),
                    ("till", end.format("%Y-%m-%d").to_string()),
                    ("interval", interval.to_string()),
                ])
                .send()
                .await
                .change_context(AggregatorError::FetchFailed { aggregator: AGG })?;

            if !response.status().is_success() {
                return Err(Report::new(AggregatorError::FetchFailed { aggregator: AGG })
                    .attach_printable(format!("HTTP status: {}", response.status())));
            }

            let body: IssResponse = response
                .json()
                .await
                .change_context(AggregatorError::DecodeFailed { aggregator: AGG })?;

            parse_candles(body.candles)
        })
    }
}

impl Default for MoexClient {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Deserialize)]
struct IssResponse {
    candles: IssTable,
}

#[derive(Debug, Deserialize)]
struct IssTable {
    columns: Vec<String>,
    data: Vec<Vec<Value>>,
}

fn parse_candles(table: IssTable) -> Result<Vec<CandleRow>, Report<AggregatorError>> {
    let col = |name: &str| -> Result<usize, Report<AggregatorError>> {
        table
            .columns
            .iter()
            .position(|c| c == name)
            .ok_or_else(|| {
                Report::new(AggregatorError::DecodeFailed { aggregator: AGG })
                    .attach_printable(format!("missing column: {name}"))
            })
    };
    let open_idx = col("open")?;
    let close_idx = col("close")?;
    let high_idx = col("high")?;
    let low_idx = col("low")?;
    let volume_idx = col("volume")?;
    let begin_idx = col("begin")?;

    let mut rows = Vec::with_capacity(table.data.len());
    for record in &table.data {
        let open = value_f64(record, open_idx)?;
        let close = value_f64(record, close_idx)?;
        let high = value_f64(record, high_idx)?;
        let low = value_f64(record, low_idx)?;
        let volume = value_f64(record, volume_idx)?;
        let begin = value_str(record, begin_idx)?;

        let datetime = NaiveDateTime::parse_from_str(&begin, "%Y-%m-%d %H:%M:%S")
            .change_context(AggregatorError::DecodeFailed { aggregator: AGG })?
            .and_utc()
            .timestamp();

        rows.push(CandleRow {
            datetime,
            mean_price: Some((open + close) / 2.0),
            volume: Some(volume),
            high: Some(high),
            low: Some(low),
            ..Default::default()
        });
    }

    rows.sort_by_key(|r| r.datetime);
    rows.dedup_by_key(|r| r.datetime);
    Ok(rows)
}

fn value_f64(record: &[Value], idx: usize) -> Result<f64, Report<AggregatorError>> {
    record
        .get(idx)
        .and_then(Value::as_f64)
        .ok_or_else(|| Report::new(AggregatorError::DecodeFailed { aggregator: AGG }))
}

fn value_str(record: &[Value], idx: usize) -> Result<String, Report<AggregatorError>> {
    record
        .get(idx)
        .and_then(Value::as_str)
        .map(str::to_owned)
        .ok_or_else(|| Report::new(AggregatorError::DecodeFailed { aggregator: AGG }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_candles_computes_mean_and_sorts() {
        let table = IssTable {
            columns: vec![
                "open".into(),
                "close".into(),
                "high".into(),
                "low".into(),
                "value".into(),
                "volume".into(),
                "begin".into(),
                "end".into(),
            ],
            data: vec![
                vec![
                    Value::from(110.0),
                    Value::from(120.0),
                    Value::from(125.0),
                    Value::from(105.0),
                    Value::from(0.0),
                    Value::from(500.0),
                    Value::String("2024-01-02 10:01:00".into()),
                    Value::String("2024-01-02 10:02:00".into()),
                ],
                vec![
                    Value::from(100.0),
                    Value::from(110.0),
                    Value::from(115.0),
                    Value::from(95.0),
                    Value::from(0.0),
                    Value::from(300.0),
                    Value::String("2024-01-02 10:00:00".into()),
                    Value::String("2024-01-02 10:01:00".into()),
                ],
            ],
        };

        let rows = parse_candles(table).unwrap();
        assert_eq!(rows.len(), 2);
        assert!(rows[0].datetime < rows[1].datetime);
        assert_eq!(rows[1].mean_price, Some(115.0));
        assert_eq!(rows[1].volume, Some(500.0));
    }

    #[test]
    fn parse_candles_missing_column_fails() {
        let table = IssTable {
            columns: vec!["open".into()],
            data: vec![],
        };
        assert!(parse_candles(table).is_err());
    }
}
