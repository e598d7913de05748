use std::path::Path;
use std::str::FromStr;

use error_stack::{Report, ResultExt};
use futures::future::BoxFuture;
use sqlx::{
    Row, SqlitePool,
    sqlite::{SqliteConnectOptions, SqliteJournalMode},
};

use crate::error::StorageError;
use crate::model::{CandleRow, Notification, TickerNaming};
use crate::storage::Storage;

pub struct SqliteStorage {
    pool: SqlitePool,
}

impl SqliteStorage {
    /// Open (or create) a SQLite database at `path` and run migrations.
    pub async fn open(path: &Path) -> Result<Self, Report<StorageError>> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .change_context(StorageError::Migration)
                .attach_printable_lazy(|| format!("cannot create data directory: {}", parent.display()))?;
        }

        let opts = SqliteConnectOptions::from_str(&format!("sqlite:{}", path.display()))
            .change_context(StorageError::Migration)?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal);

        let pool = SqlitePool::connect_with(opts)
            .await
            .change_context(StorageError::Migration)
            .attach_printable_lazy(|| format!("database path: {}", path.display()))?;

        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .change_context(StorageError::Migration)?;

        Ok(Self { pool })
    }

    /// Open an in-memory database, migrated, for use in other modules'
    /// tests.
    #[cfg(test)]
    pub(crate) async fn open_in_memory() -> Self {
        Self::in_memory().await
    }

    /// Open an in-memory database, migrated, for tests.
    #[cfg(test)]
    async fn in_memory() -> Self {
        let opts = SqliteConnectOptions::from_str("sqlite::memory:")
            .unwrap()
            .create_if_missing(true);
        let pool = SqlitePool::connect_with(opts).await.unwrap();
        sqlx::migrate!("./migrations").run(&pool).await.unwrap();
        Self { pool }
    }

    /// Look up the catalogue row for `naming`, if any.
    async fn find_ticker_id(&self, naming: &TickerNaming) -> Result<Option<i64>, Report<StorageError>> {
        let row: Option<(i64,)> = sqlx::query_as(
            "SELECT id FROM ticker WHERE name = ? AND aggregator = ? AND timespan = ?",
        )
        .bind(&naming.symbol)
        .bind(naming.aggregator.short_code())
        .bind(naming.timespan.db_interval().to_string())
        .fetch_optional(&self.pool)
        .await
        .change_context(StorageError::Query)?;
        Ok(row.map(|(id,)| id))
    }

    /// Ensure the catalogue row and backing candle table exist for
    /// `naming`, creating both on first call.
    async fn ensure_ticker(&self, naming: &TickerNaming) -> Result<(), Report<StorageError>> {
        if self.find_ticker_id(naming).await?.is_some() {
            return Ok(());
        }

        sqlx::query(
            "INSERT OR IGNORE INTO ticker (name, aggregator, timespan) VALUES (?, ?, ?)",
        )
        .bind(&naming.symbol)
        .bind(naming.aggregator.short_code())
        .bind(naming.timespan.db_interval().to_string())
        .execute(&self.pool)
        .await
        .change_context(StorageError::Insert)?;

        let create = format!(
            "CREATE TABLE IF NOT EXISTS {table} (\
                datetime INTEGER PRIMARY KEY, \
                mean_price REAL, \
                volume REAL, \
                high REAL, \
                low REAL, \
                long REAL, \
                short REAL, \
                number_long REAL, \
                number_short REAL\
            )",
            table = naming.storing_name(),
        );
        sqlx::query(&create)
            .execute(&self.pool)
            .await
            .change_context(StorageError::Insert)?;

        Ok(())
    }
}

/// Table names are built with `format!` because SQLite cannot bind
/// identifiers as query parameters; `TickerNaming::storing_name` derives
/// them only from an aggregator short code and a timespan letter, both
/// fixed enums, and the ticker symbol, which is validated here before
/// ever reaching a dynamic query.
fn validate_symbol(symbol: &str) -> Result<(), Report<StorageError>> {
    let ok = !symbol.is_empty()
        && symbol
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
    if ok {
        Ok(())
    } else {
        Err(Report::new(StorageError::Insert)
            .attach_printable(format!("invalid ticker symbol: {symbol}")))
    }
}

impl Storage for SqliteStorage {
    fn upsert_candles(
        &self,
        naming: &TickerNaming,
        rows: &[CandleRow],
    ) -> BoxFuture<'_, Result<(), Report<StorageError>>> {
        let naming = naming.clone();
        let rows = rows.to_vec();
        Box::pin(async move {
            if rows.is_empty() {
                return Ok(());
            }
            validate_symbol(&naming.symbol)?;
            self.ensure_ticker(&naming).await?;

            let table = naming.storing_name();
            let mut tx = self
                .pool
                .begin()
                .await
                .change_context(StorageError::Insert)?;

            for row in &rows {
                let sql = format!(
                    "INSERT OR REPLACE INTO {table} \
                     (datetime, mean_price, volume, high, low, long, short, number_long, number_short) \
                     VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
                );
                sqlx::query(&sql)
                    .bind(row.datetime)
                    .bind(row.mean_price)
                    .bind(row.volume)
                    .bind(row.high)
                    .bind(row.low)
                    .bind(row.long)
                    .bind(row.short)
                    .bind(row.number_long)
                    .bind(row.number_short)
                    .execute(&mut *tx)
                    .await
                    .change_context(StorageError::Insert)?;
            }

            tx.commit().await.change_context(StorageError::Insert)?;
            Ok(())
        })
    }

    fn read_candles(
        &self,
        naming: &TickerNaming,
        start: i64,
        end: i64,
    ) -> BoxFuture<'_, Result<Option<Vec<CandleRow>>, Report<StorageError>>> {
        let naming = naming.clone();
        Box::pin(async move {
            validate_symbol(&naming.symbol)?;
            if self.find_ticker_id(&naming).await?.is_none() {
                return Ok(None);
            }

            let table = naming.storing_name();
            let sql = format!(
                "SELECT datetime, mean_price, volume, high, low, long, short, number_long, number_short \
                 FROM {table} WHERE datetime >= ? AND datetime <= ? ORDER BY datetime ASC",
            );
            let rows = sqlx::query(&sql)
                .bind(start)
                .bind(end)
                .fetch_all(&self.pool)
                .await
                .change_context(StorageError::Query)?;

            let mut candles: Vec<CandleRow> = rows
                .into_iter()
                .map(|r| CandleRow {
                    datetime: r.get("datetime"),
                    mean_price: r.get("mean_price"),
                    volume: r.get("volume"),
                    high: r.get("high"),
                    low: r.get("low"),
                    long: r.get("long"),
                    short: r.get("short"),
                    number_long: r.get("number_long"),
                    number_short: r.get("number_short"),
                })
                .collect();

            // Keep-latest dedup on read: INSERT OR REPLACE already enforces
            // this on write, but a belt-and-braces pass here keeps the
            // invariant true even if a future writer bypasses upsert.
            candles.sort_by_key(|c| c.datetime);
            candles.dedup_by_key(|c| c.datetime);
            Ok(Some(candles))
        })
    }

    fn add_notification(
        &self,
        chat_id: i64,
        compiled_condition: &str,
        origin_condition: &str,
    ) -> BoxFuture<'_, Result<Notification, Report<StorageError>>> {
        let compiled_condition = compiled_condition.to_string();
        let origin_condition = origin_condition.to_string();
        Box::pin(async move {
            let existing: Option<(i64, i64, String, String)> = sqlx::query_as(
                "SELECT id, chat_id, compiled_condition, origin_condition FROM notification \
                 WHERE chat_id = ? AND compiled_condition = ?",
            )
            .bind(chat_id)
            .bind(&compiled_condition)
            .fetch_optional(&self.pool)
            .await
            .change_context(StorageError::Query)?;

            if let Some((id, chat_id, compiled_condition, origin_condition)) = existing {
                return Ok(Notification {
                    id,
                    chat_id,
                    compiled_condition,
                    origin_condition,
                });
            }

            let result = sqlx::query(
                "INSERT INTO notification (chat_id, compiled_condition, origin_condition) \
                 VALUES (?, ?, ?)",
            )
            .bind(chat_id)
            .bind(&compiled_condition)
            .bind(&origin_condition)
            .execute(&self.pool)
            .await
            .change_context(StorageError::Insert)?;

            Ok(Notification {
                id: result.last_insert_rowid(),
                chat_id,
                compiled_condition,
                origin_condition,
            })
        })
    }

    fn get_notifications(
        &self,
        chat_id: Option<i64>,
    ) -> BoxFuture<'_, Result<Vec<Notification>, Report<StorageError>>> {
        Box::pin(async move {
            let rows: Vec<(i64, i64, String, String)> = if let Some(chat_id) = chat_id {
                sqlx::query_as(
                    "SELECT id, chat_id, compiled_condition, origin_condition FROM notification \
                     WHERE chat_id = ? ORDER BY id ASC",
                )
                .bind(chat_id)
                .fetch_all(&self.pool)
                .await
                .change_context(StorageError::Query)?
            } else {
                sqlx::query_as(
                    "SELECT id, chat_id, compiled_condition, origin_condition FROM notification \
                     ORDER BY id ASC",
                )
                .fetch_all(&self.pool)
                .await
                .change_context(StorageError::Query)?
            };

            Ok(rows
                .into_iter()
                .map(|(id, chat_id, compiled_condition, origin_condition)| Notification {
                    id,
                    chat_id,
                    compiled_condition,
                    origin_condition,
                })
                .collect())
        })
    }

    fn remove_notification(&self, id: i64) -> BoxFuture<'_, Result<(), Report<StorageError>>> {
        Box::pin(async move {
            let result = sqlx::query("DELETE FROM notification WHERE id = ?")
                .bind(id)
                .execute(&self.pool)
                .await
                .change_context(StorageError::Insert)?;

            if result.rows_affected() == 0 {
                return Err(Report::new(StorageError::NonexistentNotification));
            }
            Ok(())
        })
    }
}
