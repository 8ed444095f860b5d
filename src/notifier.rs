pub mod telegram;
pub mod terminal;

use error_stack::Report;
use futures::future::BoxFuture;

use crate::error::NotifierError;

/// Sink for outbound notifications.
///
/// Delivery is best-effort everywhere: callers log failures and carry
/// on. Uses `BoxFuture` instead of `async fn` in trait to keep the
/// trait object-safe (`dyn Notifier`).
pub trait Notifier: Send + Sync {
    fn send(&self, text: &str) -> BoxFuture<'_, Result<(), Report<NotifierError>>>;
}
