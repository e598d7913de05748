pub mod terminal;

use futures::future::BoxFuture;

/// The chat transport's outbound `send(chat_id, text)` primitive. The chat
/// transport itself is an external collaborator out of scope for this
/// crate; a real implementation is a drop-in alternate `Notifier`.
pub trait Notifier: Send + Sync {
    fn notify(&self, chat_id: i64, text: &str) -> BoxFuture<'_, ()>;
}
