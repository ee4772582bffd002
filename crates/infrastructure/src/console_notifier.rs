//! Console notifier for development. Logs messages to tracing output.

use async_trait::async_trait;
use trellis_application::Notifier;
use trellis_core::AppResult;
use tracing::info;

/// Development notifier that logs messages to the console.
#[derive(Clone)]
pub struct ConsoleNotifier;

impl ConsoleNotifier {
    /// Creates a new console notifier.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl Default for ConsoleNotifier {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Notifier for ConsoleNotifier {
    async fn notify(&self, recipients: &[String], message: &str) -> AppResult<()> {
        info!(
            recipients = recipients.join(", "),
            "--- NOTIFICATION (console) ---\nTo: {}\n\n{}\n--- END NOTIFICATION ---",
            recipients.join(", "),
            message
        );

        Ok(())
    }
}
