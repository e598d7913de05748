use futures::future::BoxFuture;

use crate::notifier::Notifier;

/// Stand-in for the real chat transport: logs rather than sending. Suitable
/// for running the service standalone, or as the sink under test.
pub struct TerminalNotifier;

impl Notifier for TerminalNotifier {
    fn notify(&self, chat_id: i64, text: &str) -> BoxFuture<'_, ()> {
        Box::pin(async move {
            tracing::info!(chat_id, "{text}");
        })
    }
}
