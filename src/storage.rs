pub mod sqlite;

use error_stack::Report;
use futures::future::BoxFuture;

use crate::error::StorageError;
use crate::model::{CandleRow, Notification, TickerNaming};

/// Persistent store over the ticker catalogue, per-ticker candle tables and
/// the notification catalogue. Every operation is a short-lived
/// transaction; callers that need atomicity across multiple calls (delete
/// from store, then drop from an in-memory map) sequence them explicitly.
pub trait Storage: Send + Sync {
    /// Insert `rows` for `naming`, creating the catalogue entry and backing
    /// table on first call. On timestamp collision the later-written row
    /// wins.
    fn upsert_candles(
        &self,
        naming: &TickerNaming,
        rows: &[CandleRow],
    ) -> BoxFuture<'_, Result<(), Report<StorageError>>>;

    /// Rows in `[start, end]`, ascending by `datetime`, deduplicated.
    /// `None` if no catalogue entry exists for `naming`.
    fn read_candles(
        &self,
        naming: &TickerNaming,
        start: i64,
        end: i64,
    ) -> BoxFuture<'_, Result<Option<Vec<CandleRow>>, Report<StorageError>>>;

    /// Insert a notification, or return the existing row unchanged if one
    /// with the same `(chat_id, compiled_condition)` already exists.
    fn add_notification(
        &self,
        chat_id: i64,
        compiled_condition: &str,
        origin_condition: &str,
    ) -> BoxFuture<'_, Result<Notification, Report<StorageError>>>;

    /// All notifications, optionally filtered to one chat.
    fn get_notifications(
        &self,
        chat_id: Option<i64>,
    ) -> BoxFuture<'_, Result<Vec<Notification>, Report<StorageError>>>;

    /// Delete a notification by id. `NonexistentNotification` if missing.
    fn remove_notification(&self, id: i64) -> BoxFuture<'_, Result<(), Report<StorageError>>>;
}
