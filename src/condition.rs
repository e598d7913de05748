//! The condition processor: owns the active-notification map and the
//! per-notification lifecycle `Draft → Persisted → (Active ⇌ Inactive) →
//! Removed`.

use std::collections::HashMap;
use std::sync::Arc;

use error_stack::{Report, ResultExt};
use futures::future::join_all;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::error::{ConditionError, StorageError};
use crate::expr::{self, evaluate_as_bool};
use crate::model::Notification;
use crate::notifier::Notifier;
use crate::storage::Storage;
use crate::store_keeper::StoreKeeper;

/// How many notifications a tick evaluates concurrently. Bounds how many
/// simultaneous upstream fetches a single tick can open.
const TICK_FAN_OUT: usize = 16;

pub struct ConditionProcessor {
    storage: Arc<dyn Storage>,
    store_keeper: Arc<StoreKeeper>,
    notifier: Arc<dyn Notifier>,
    notifications: Mutex<HashMap<i64, Notification>>,
}

impl ConditionProcessor {
    /// Reconstruct the in-memory active set from the store.
    pub async fn bootstrap(
        storage: Arc<dyn Storage>,
        store_keeper: Arc<StoreKeeper>,
        notifier: Arc<dyn Notifier>,
    ) -> Result<Self, Report<StorageError>> {
        let rows = storage.get_notifications(None).await?;
        let notifications = rows.into_iter().map(|n| (n.id, n)).collect();
        info!(count = notifications.len() as u64, "notifications reconstructed from store");

        Ok(Self {
            storage,
            store_keeper,
            notifier,
            notifications: Mutex::new(notifications),
        })
    }

    /// Parse/rewrite/validate `text`, then perform one trial evaluation
    /// against the store-keeper. On success, persists and activates the
    /// notification. The trial evaluation's truth value is discarded even
    /// if true — no immediate notification is emitted from
    /// `create_condition`, matching the original bot's behavior.
    pub async fn create_condition(
        &self,
        chat_id: i64,
        text: &str,
    ) -> Result<Notification, Report<ConditionError>> {
        let compiled = expr::compile(text).map_err(|report| {
            let context: ConditionError = report.current_context().into();
            Report::new(context).attach_printable(format!("condition: {text}"))
        })?;

        let _trial = evaluate_as_bool(&compiled, &self.store_keeper)
            .await
            .map_err(|report| {
                let context: ConditionError = report.current_context().into();
                Report::new(context).attach_printable(format!("condition: {text}"))
            })?;

        let compiled_text = expr::compiled::render(&compiled);
        let notification = self
            .storage
            .add_notification(chat_id, &compiled_text, text)
            .await
            .change_context(ConditionError::Storage)?;

        self.notifications
            .lock()
            .await
            .insert(notification.id, notification.clone());
        debug!(id = notification.id, chat_id, "notification persisted and activated");

        Ok(notification)
    }

    /// Notifications for `chat_id`, stable order by id.
    pub async fn list_notifications(&self, chat_id: i64) -> Vec<Notification> {
        let map = self.notifications.lock().await;
        let mut result: Vec<Notification> = map
            .values()
            .filter(|n| n.chat_id == chat_id)
            .cloned()
            .collect();
        result.sort_by_key(|n| n.id);
        result
    }

    /// Remove from the store, then the in-memory map — in that order, so a
    /// crash between the two can only leave the map stale, never the store.
    pub async fn remove_notification(&self, id: i64) -> Result<(), Report<ConditionError>> {
        self.storage.remove_notification(id).await.map_err(|report| {
            match report.current_context() {
                StorageError::NonexistentNotification => {
                    Report::new(ConditionError::NonexistentNotification)
                }
                _ => report.change_context(ConditionError::Storage),
            }
        })?;

        self.notifications.lock().await.remove(&id);
        Ok(())
    }

    /// Re-evaluate every active notification, group truthy ones by chat and
    /// send one message per chat. Never propagates a per-notification
    /// failure; those are logged and skipped.
    pub async fn tick(&self) {
        let snapshot: Vec<Notification> = self.notifications.lock().await.values().cloned().collect();
        if snapshot.is_empty() {
            return;
        }

        let mut activated_by_chat: HashMap<i64, Vec<String>> = HashMap::new();

        for chunk in snapshot.chunks(TICK_FAN_OUT) {
            let evaluations = join_all(chunk.iter().map(|n| self.evaluate_one(n))).await;
            for (notification, is_active) in chunk.iter().zip(evaluations) {
                if is_active {
                    activated_by_chat
                        .entry(notification.chat_id)
                        .or_default()
                        .push(notification.origin_condition.clone());
                }
            }
        }

        for (chat_id, conditions) in activated_by_chat {
            let text = format!("Following conditions activated:\n\n{}", conditions.join("\n\n"));
            self.notifier.notify(chat_id, &text).await;
        }
    }

    async fn evaluate_one(&self, notification: &Notification) -> bool {
        let compiled = match expr::compiled::parse(&notification.compiled_condition) {
            Ok(expr) => expr,
            Err(report) => {
                warn!(id = notification.id, error = ?report, "compiled condition failed to parse, skipping tick");
                return false;
            }
        };

        match evaluate_as_bool(&compiled, &self.store_keeper).await {
            Ok(result) => result,
            Err(report) => {
                info!(id = notification.id, error = ?report, "evaluation failed this tick, skipping");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Aggregator, CandleRow, TickerNaming, TimeSpan};
    use crate::storage::sqlite::SqliteStorage;
    use crate::store_keeper::StoreKeeper;
    use chrono::Utc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct RecordingNotifier {
        sent: Mutex<Vec<(i64, String)>>,
    }

    impl RecordingNotifier {
        fn new() -> Self {
            Self {
                sent: Mutex::new(Vec::new()),
            }
        }
    }

    impl Notifier for RecordingNotifier {
        fn notify(&self, chat_id: i64, text: &str) -> futures::future::BoxFuture<'_, ()> {
            let text = text.to_string();
            Box::pin(async move {
                self.sent.lock().await.push((chat_id, text));
            })
        }
    }

    async fn seeded_processor(mean: f64) -> (ConditionProcessor, Arc<RecordingNotifier>) {
        let storage: Arc<dyn Storage> = Arc::new(SqliteStorage::open_in_memory().await);
        let naming = TickerNaming::new("YNDX", Aggregator::Moex, TimeSpan::Minute);
        storage
            .upsert_candles(
                &naming,
                &[CandleRow {
                    datetime: Utc::now().timestamp(),
                    mean_price: Some(mean),
                    ..Default::default()
                }],
            )
            .await
            .unwrap();

        let store_keeper = Arc::new(StoreKeeper::new(Arc::clone(&storage), None));
        let notifier = Arc::new(RecordingNotifier::new());
        let processor = ConditionProcessor::bootstrap(storage, store_keeper, Arc::clone(&notifier) as Arc<dyn Notifier>)
            .await
            .unwrap();
        (processor, notifier)
    }

    #[tokio::test]
    async fn create_condition_persists_and_activates() {
        let (processor, _notifier) = seeded_processor(2500.0).await;
        let notification = processor
            .create_condition(1, "#YNDX.mean[C]>2000")
            .await
            .unwrap();

        let listed = processor.list_notifications(1).await;
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].id, notification.id);
    }

    #[tokio::test]
    async fn create_condition_rejects_wrong_syntax() {
        let (processor, _notifier) = seeded_processor(2500.0).await;
        let err = processor
            .create_condition(1, "#YNDX.mean[C]+__import__(os)>0")
            .await
            .unwrap_err();
        assert!(matches!(
            err.current_context(),
            ConditionError::WrongCondition { .. }
        ));
    }

    #[tokio::test]
    async fn create_condition_rejects_unknown_aggregator() {
        let (processor, _notifier) = seeded_processor(2500.0).await;
        let err = processor
            .create_condition(1, "#FOO:BAR.mean[C]>1")
            .await
            .unwrap_err();
        assert!(matches!(
            err.current_context(),
            ConditionError::NonexistentAggregator { short } if short == "foo"
        ));
    }

    #[tokio::test]
    async fn create_condition_is_idempotent_by_id() {
        let (processor, _notifier) = seeded_processor(2500.0).await;
        let first = processor.create_condition(1, "#YNDX.mean[C]>0").await.unwrap();
        let second = processor.create_condition(1, "#YNDX.mean[C]>0").await.unwrap();
        assert_eq!(first.id, second.id);
    }

    #[tokio::test]
    async fn remove_then_list_excludes_it() {
        let (processor, _notifier) = seeded_processor(2500.0).await;
        let notification = processor.create_condition(1, "#YNDX.mean[C]>0").await.unwrap();

        processor.remove_notification(notification.id).await.unwrap();
        assert!(processor.list_notifications(1).await.is_empty());
    }

    #[tokio::test]
    async fn remove_unknown_id_fails() {
        let (processor, _notifier) = seeded_processor(2500.0).await;
        let err = processor.remove_notification(9999).await.unwrap_err();
        assert!(matches!(
            err.current_context(),
            ConditionError::NonexistentNotification
        ));
    }

    #[tokio::test]
    async fn tick_groups_activations_by_chat() {
        let (processor, notifier) = seeded_processor(2500.0).await;
        processor.create_condition(1, "#YNDX.mean[C]>2000").await.unwrap();
        processor.create_condition(1, "#YNDX.mean[C]>0").await.unwrap();
        processor.create_condition(2, "#YNDX.mean[C]>9999").await.unwrap();

        processor.tick().await;

        let sent = notifier.sent.lock().await;
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].0, 1);
        assert!(sent[0].1.contains("#YNDX.mean[C]>2000"));
        assert!(sent[0].1.contains("#YNDX.mean[C]>0"));
    }

    #[tokio::test]
    async fn tick_with_no_notifications_sends_nothing() {
        let (processor, notifier) = seeded_processor(2500.0).await;
        processor.tick().await;
        assert!(notifier.sent.lock().await.is_empty());
    }

    #[tokio::test]
    async fn bootstrap_reconstructs_map_from_store() {
        let storage: Arc<dyn Storage> = Arc::new(SqliteStorage::open_in_memory().await);
        storage.add_notification(7, "cond", "#YNDX.mean[C]>0").await.unwrap();

        let store_keeper = Arc::new(StoreKeeper::new(Arc::clone(&storage), None));
        let notifier: Arc<dyn Notifier> = Arc::new(RecordingNotifier::new());
        let processor = ConditionProcessor::bootstrap(storage, store_keeper, notifier)
            .await
            .unwrap();

        assert_eq!(processor.list_notifications(7).await.len(), 1);
    }

    // Regression guard for the `Tick` fan-out bound: not a behavioural
    // assertion, just confirms a batch larger than `TICK_FAN_OUT` doesn't
    // panic or drop entries.
    #[tokio::test]
    async fn tick_handles_more_notifications_than_the_fan_out_width() {
        let (processor, _notifier) = seeded_processor(2500.0).await;
        let created = AtomicUsize::new(0);
        for i in 0..(TICK_FAN_OUT * 2 + 3) {
            processor
                .create_condition(1, &format!("#YNDX.mean[C]>{i}"))
                .await
                .unwrap();
            created.fetch_add(1, Ordering::Relaxed);
        }
        processor.tick().await;
        assert_eq!(created.load(Ordering::Relaxed), TICK_FAN_OUT * 2 + 3);
    }
}
