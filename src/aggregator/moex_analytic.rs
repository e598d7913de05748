use std::collections::HashMap;

use chrono::{DateTime, Duration, NaiveDateTime, Utc};
use error_stack::{Report, ResultExt};
use futures::future::BoxFuture;
use serde::Deserialize;
use serde_json::Value;
use tokio::sync::Mutex;

use crate::aggregator::MoexCredentials;
use crate::error::AggregatorError;
use crate::model::{CandleRow, TickerNaming};

const AGG: &str = "moex_analytic";
const MIN_DELAY_MINUTES: i64 = 5;
const BUCKET_SECONDS: i64 = 300;

/// Adapter for MOEX futures open-interest analytics
/// (`analyticalproducts/futoi`), restricted to the legal-entity
/// (`clgroup == 'YUR'`) subset and resampled to the requested bar width.
///
/// Requires a session cookie obtained from `moex_login_password`; without
/// credentials every `download` call fails with `FetchFailed`.
pub struct MoexAnalyticClient {
    client: reqwest::Client,
    credentials: Option<MoexCredentials>,
    authenticated: Mutex<bool>,
}

impl MoexAnalyticClient {
    pub fn new(credentials: Option<MoexCredentials>) -> Self {
        let client = reqwest::Client::builder()
            .cookie_store(true)
            .build()
            .unwrap_or_default();
        Self {
            client,
            credentials,
            authenticated: Mutex::new(false),
        }
    }

    async fn ensure_session(&self) -> Result<(), Report<AggregatorError>> {
        let mut authenticated = self.authenticated.lock().await;
        if *authenticated {
            return Ok(());
        }

        let Some(credentials) = &self.credentials else {
            return Err(Report::new(AggregatorError::FetchFailed { aggregator: AGG })
                .attach_printable("no moex analytics credentials configured"));
        };

        let response = self
            .client
            .get("https://passport.moex.com/authenticate")
            .basic_auth(&credentials.login, Some(&credentials.password))
            .send()
            .await
            .change_context(AggregatorError::FetchFailed { aggregator: AGG })?;

        if !response.status().is_success() {
            return Err(Report::new(AggregatorError::FetchFailed { aggregator: AGG })
                .attach_printable(format!("authentication failed: {}", response.status())));
        }

        *authenticated = true;
        Ok(())
    }

    async fn fetch_two_day_chunk(
        &self,
        symbol: &str,
        start_from: DateTime<Utc>,
    ) -> Result<FutoiTable, Report<AggregatorError>> {
        let url = format!(
            "https://iss.moex.com/iss/analyticalproducts/futoi/securities/{symbol}.json"
        );
        let till = start_from + Duration::days(1);
        let response = self
            .client
            .get(&url)
            .query(&[
                ("from", start_from.format("%Y-%m-%d").to_string()),
                ("till", till.format("%Y-%m-%d").to_string()),
            ])
            .send()
            .await
            .change_context(AggregatorError::FetchFailed { aggregator: AGG })?;

        if !response.status().is_success() {
            return Err(Report::new(AggregatorError::FetchFailed { aggregator: AGG })
                .attach_printable(format!("HTTP status: {}", response.status())));
        }

        let body: FutoiResponse = response
            .json()
            .await
            .change_context(AggregatorError::DecodeFailed { aggregator: AGG })?;
        Ok(body.futoi)
    }

    pub fn download(
        &self,
        naming: &TickerNaming,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> BoxFuture<'_, Result<Vec<CandleRow>, Report<AggregatorError>>> {
        let symbol = naming.symbol.clone();
        let bar_seconds = naming.timespan.to_minutes() * 60;

        Box::pin(async move {
            if Utc::now() - start < Duration::minutes(MIN_DELAY_MINUTES) {
                return Ok(Vec::new());
            }

            self.ensure_session().await?;

            let mut cursor = start;
            let mut records: Vec<FutoiRecord> = Vec::new();
            while cursor.date_naive() <= end.date_naive() {
                let table = self.fetch_two_day_chunk(&symbol, cursor).await?;
                records.extend(parse_futoi_records(&table)?);
                cursor += Duration::days(2);
            }

            let filtered: Vec<FutoiRecord> =
                records.into_iter().filter(|r| r.legal_entity).collect();

            Ok(resample(filtered, bar_seconds))
        })
    }
}

#[derive(Debug, Deserialize)]
struct FutoiResponse {
    futoi: FutoiTable,
}

#[derive(Debug, Deserialize)]
struct FutoiTable {
    columns: Vec<String>,
    data: Vec<Vec<Value>>,
}

struct FutoiRecord {
    timestamp: i64,
    legal_entity: bool,
    long: f64,
    short: f64,
    long_numb: f64,
    short_numb: f64,
}

fn parse_futoi_records(table: &FutoiTable) -> Result<Vec<FutoiRecord>, Report<AggregatorError>> {
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
    let tradedate_idx = col("tradedate")?;
    let tradetime_idx = col("tradetime")?;
    let clgroup_idx = col("clgroup")?;
    let long_idx = col("pos_long")?;
    let short_idx = col("pos_short")?;
    let long_numb_idx = col("pos_long_num")?;
    let short_numb_idx = col("pos_short_num")?;

    let mut out = Vec::with_capacity(table.data.len());
    for record in &table.data {
        let tradedate = value_str(record, tradedate_idx)?;
        let tradetime = value_str(record, tradetime_idx)?;
        let clgroup = value_str(record, clgroup_idx)?;
        let long = value_f64(record, long_idx)?;
        let short = value_f64(record, short_idx)?;
        let long_numb = value_f64(record, long_numb_idx)?;
        let short_numb = value_f64(record, short_numb_idx)?;

        let naive = NaiveDateTime::parse_from_str(
            &format!("{tradedate} {tradetime}"),
            "%Y-%m-%d %H:%M:%S",
        )
        .change_context(AggregatorError::DecodeFailed { aggregator: AGG })?;
        let raw_timestamp = naive.and_utc().timestamp();
        let timestamp = ((raw_timestamp as f64 / BUCKET_SECONDS as f64).round() as i64) * BUCKET_SECONDS;

        out.push(FutoiRecord {
            timestamp,
            legal_entity: clgroup == "YUR",
            long,
            // upstream reports short interest as a positive count; negate
            // to match the sign convention of long interest.
            short: -short,
            long_numb,
            short_numb,
        });
    }
    Ok(out)
}

fn resample(records: Vec<FutoiRecord>, bar_seconds: i64) -> Vec<CandleRow> {
    struct Accum {
        long_sum: f64,
        short_sum: f64,
        long_numb_sum: f64,
        short_numb_sum: f64,
        count: f64,
    }

    let mut buckets: HashMap<i64, Accum> = HashMap::new();
    for record in records {
        let bucket = (record.timestamp as f64 / bar_seconds as f64).floor() as i64 * bar_seconds;
        let entry = buckets.entry(bucket).or_insert(Accum {
            long_sum: 0.0,
            short_sum: 0.0,
            long_numb_sum: 0.0,
            short_numb_sum: 0.0,
            count: 0.0,
        });
        entry.long_sum += record.long;
        entry.short_sum += record.short;
        entry.long_numb_sum += record.long_numb;
        entry.short_numb_sum += record.short_numb;
        entry.count += 1.0;
    }

    let mut rows: Vec<CandleRow> = buckets
        .into_iter()
        .map(|(datetime, accum)| CandleRow {
            datetime,
            long: Some(accum.long_sum / accum.count),
            short: Some(accum.short_sum / accum.count),
            number_long: Some(accum.long_numb_sum / accum.count),
            number_short: Some(accum.short_numb_sum / accum.count),
            ..Default::default()
        })
        .collect();

    rows.sort_by_key(|r| r.datetime);
    rows
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

    fn record(timestamp: i64, legal_entity: bool, long: f64, short: f64) -> FutoiRecord {
        FutoiRecord {
            timestamp,
            legal_entity,
            long,
            short,
            long_numb: 1.0,
            short_numb: 1.0,
        }
    }

    #[test]
    fn resample_averages_within_bucket() {
        let records = vec![record(0, true, 10.0, -2.0), record(120, true, 20.0, -4.0)];
        let rows = resample(records, 300);
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].long, Some(15.0));
        assert_eq!(rows[0].short, Some(-3.0));
    }

    #[test]
    fn resample_splits_across_bar_boundaries() {
        let records = vec![record(0, true, 10.0, -1.0), record(400, true, 20.0, -1.0)];
        let rows = resample(records, 300);
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].datetime, 0);
        assert_eq!(rows[1].datetime, 300);
    }

    #[test]
    fn parse_futoi_records_filters_legal_entity_flag() {
        let table = FutoiTable {
            columns: vec![
                "tradedate".into(),
                "tradetime".into(),
                "clgroup".into(),
                "pos_long".into(),
                "pos_short".into(),
                "pos_long_num".into(),
                "pos_short_num".into(),
            ],
            data: vec![
                vec![
                    Value::String("2024-01-02".into()),
                    Value::String("10:00:00".into()),
                    Value::String("YUR".into()),
                    Value::from(100.0),
                    Value::from(50.0),
                    Value::from(3.0),
                    Value::from(2.0),
                ],
                vec![
                    Value::String("2024-01-02".into()),
                    Value::String("10:00:00".into()),
                    Value::String("FIZ".into()),
                    Value::from(100.0),
                    Value::from(50.0),
                    Value::from(3.0),
                    Value::from(2.0),
                ],
            ],
        };

        let records = parse_futoi_records(&table).unwrap();
        assert_eq!(records.len(), 2);
        assert!(records[0].legal_entity);
        assert!(!records[1].legal_entity);
        assert_eq!(records[0].short, -50.0);
    }
}
