use error_stack::Report;
use futures::future::BoxFuture;

use crate::error::NotifierError;
use crate::notifier::Notifier;

/// Log-only notifier used when Telegram credentials are not configured.
pub struct TerminalNotifier;

impl Notifier for TerminalNotifier {
    fn send(&self, text: &str) -> BoxFuture<'_, Result<(), Report<NotifierError>>> {
        tracing::info!("NOTIFY: {text}");
        Box::pin(async { Ok(()) })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn terminal_notifier_always_succeeds() {
        let notifier = TerminalNotifier;
        assert!(notifier.send("🚀 scanner active").await.is_ok());
    }
}
