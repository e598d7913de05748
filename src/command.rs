//! Thin reply-text adapter over `ConditionProcessor`: `/add`, `/remove`,
//! `/list`, `/help` as plain async methods returning the string a chat
//! transport should send back. No chat transport is embedded here; a
//! dispatcher just forwards `chat_id` and raw text and relays the reply.

use std::sync::Arc;

use crate::condition::ConditionProcessor;
use crate::error::ConditionError;

const HELP_TEXT: &str = "\
Commands:
/add <expr>    add a notification rule
/remove <id>   remove a notification by id
/list          list your active notifications
/help [cmd]    show this message, or help for one command";

const HELP_ADD: &str = "/add <expr> — add a notification rule, e.g. /add #YNDX.mean[C]>2000";
const HELP_REMOVE: &str = "/remove <id> — remove a notification by its id, shown by /list";
const HELP_LIST: &str = "/list — show your active notifications and their ids";
const HELP_HELP: &str = "/help [cmd] — show this message, or help for one command";

pub struct CommandSurface {
    processor: Arc<ConditionProcessor>,
}

impl CommandSurface {
    pub fn new(processor: Arc<ConditionProcessor>) -> Self {
        Self { processor }
    }

    pub async fn add(&self, chat_id: i64, expr: &str) -> String {
        match self.processor.create_condition(chat_id, expr).await {
            Ok(_) => "Rule saved!".to_string(),
            Err(report) => match report.current_context() {
                ConditionError::WrongCondition { .. } => "Wrong syntax".to_string(),
                context @ ConditionError::NonexistentAggregator { .. } => context.to_string(),
                context @ ConditionError::NonexistentTicker { .. } => context.to_string(),
                other => {
                    tracing::error!(chat_id, error = ?report, "unexpected failure adding condition");
                    debug_assert!(
                        !matches!(other, ConditionError::NonexistentNotification),
                        "create_condition never returns NonexistentNotification"
                    );
                    String::new()
                }
            },
        }
    }

    pub async fn remove(&self, id_text: &str) -> String {
        let Ok(id) = id_text.trim().parse::<i64>() else {
            return "Wrong notification id".to_string();
        };

        match self.processor.remove_notification(id).await {
            Ok(()) => "Notification removed!".to_string(),
            Err(_) => "Wrong notification id".to_string(),
        }
    }

    pub async fn list(&self, chat_id: i64) -> String {
        let notifications = self.processor.list_notifications(chat_id).await;
        if notifications.is_empty() {
            return "You have no any notifications".to_string();
        }

        notifications
            .iter()
            .map(|n| format!("{}   {}", n.id, n.origin_condition))
            .collect::<Vec<_>>()
            .join("\n")
    }

    pub async fn help(&self, cmd: Option<&str>) -> String {
        match cmd.map(str::trim).filter(|c| !c.is_empty()) {
            None => HELP_TEXT.to_string(),
            Some("add") => HELP_ADD.to_string(),
            Some("remove") => HELP_REMOVE.to_string(),
            Some("list") => HELP_LIST.to_string(),
            Some("help") => HELP_HELP.to_string(),
            Some(other) => format!("I don't know command {other}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Aggregator, CandleRow, TickerNaming, TimeSpan};
    use crate::notifier::Notifier;
    use crate::storage::sqlite::SqliteStorage;
    use crate::storage::Storage;
    use crate::store_keeper::StoreKeeper;
    use chrono::Utc;

    struct NullNotifier;
    impl Notifier for NullNotifier {
        fn notify(&self, _chat_id: i64, _text: &str) -> futures::future::BoxFuture<'_, ()> {
            Box::pin(async {})
        }
    }

    async fn command_surface() -> CommandSurface {
        let storage: Arc<dyn Storage> = Arc::new(SqliteStorage::open_in_memory().await);
        let naming = TickerNaming::new("YNDX", Aggregator::Moex, TimeSpan::Minute);
        storage
            .upsert_candles(
                &naming,
                &[CandleRow {
                    datetime: Utc::now().timestamp(),
                    mean_price: Some(2500.0),
                    ..Default::default()
                }],
            )
            .await
            .unwrap();

        let store_keeper = Arc::new(StoreKeeper::new(Arc::clone(&storage), None));
        let notifier: Arc<dyn Notifier> = Arc::new(NullNotifier);
        let processor = Arc::new(
            ConditionProcessor::bootstrap(storage, store_keeper, notifier)
                .await
                .unwrap(),
        );
        CommandSurface::new(processor)
    }

    #[tokio::test]
    async fn add_valid_condition_replies_saved() {
        let surface = command_surface().await;
        assert_eq!(surface.add(1, "#YNDX.mean[C]>2000").await, "Rule saved!");
    }

    #[tokio::test]
    async fn add_invalid_syntax_replies_wrong_syntax() {
        let surface = command_surface().await;
        let reply = surface
            .add(1, "#YNDX.mean[C]+__import__(os)>0")
            .await;
        assert_eq!(reply, "Wrong syntax");
    }

    #[tokio::test]
    async fn add_unknown_aggregator_names_it() {
        let surface = command_surface().await;
        let reply = surface.add(1, "#FOO:BAR.mean[C]>1").await;
        assert_eq!(reply, "there's no such aggregator as foo");
    }

    #[tokio::test]
    async fn list_is_empty_message_when_no_notifications() {
        let surface = command_surface().await;
        assert_eq!(surface.list(1).await, "You have no any notifications");
    }

    #[tokio::test]
    async fn list_shows_id_and_origin_condition() {
        let surface = command_surface().await;
        surface.add(1, "#YNDX.mean[C]>0").await;
        let listing = surface.list(1).await;
        assert!(listing.contains("#YNDX.mean[C]>0"));
    }

    #[tokio::test]
    async fn remove_unparseable_id_replies_wrong_id() {
        let surface = command_surface().await;
        assert_eq!(surface.remove("not-a-number").await, "Wrong notification id");
    }

    #[tokio::test]
    async fn remove_unknown_id_replies_wrong_id() {
        let surface = command_surface().await;
        assert_eq!(surface.remove("9999").await, "Wrong notification id");
    }

    #[tokio::test]
    async fn remove_existing_id_succeeds() {
        let surface = command_surface().await;
        surface.add(1, "#YNDX.mean[C]>0").await;
        let id_text = surface.list(1).await;
        let id = id_text.split_whitespace().next().unwrap();
        assert_eq!(surface.remove(id).await, "Notification removed!");
        assert_eq!(surface.list(1).await, "You have no any notifications");
    }

    #[tokio::test]
    async fn help_with_no_argument_returns_canned_text() {
        let surface = command_surface().await;
        let reply = surface.help(None).await;
        assert!(reply.contains("/add"));
        assert!(reply.contains("/remove"));
    }

    #[tokio::test]
    async fn help_with_known_command_returns_its_line() {
        let surface = command_surface().await;
        assert_eq!(surface.help(Some("add")).await, HELP_ADD);
    }

    #[tokio::test]
    async fn help_with_unknown_command_says_so() {
        let surface = command_surface().await;
        assert_eq!(surface.help(Some("bogus")).await, "I don't know command bogus");
    }
}
