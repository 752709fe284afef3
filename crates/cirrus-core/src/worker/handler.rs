//! MessageHandler - application code behind a queue worker.

use async_trait::async_trait;

use crate::domain::ServiceError;

/// Processes one message taken from a queue.
///
/// `Ok` deletes the message; `Err` abandons it so it is delivered again,
/// until the processing trial limit sends it to quarantine.
///
/// ```ignore
/// struct SendInvoice;
///
/// #[async_trait]
/// impl MessageHandler<Invoice> for SendInvoice {
///     async fn handle(&self, invoice: Invoice) -> Result<(), ServiceError> {
///         mailer.send(&invoice).await.map_err(|e| ServiceError::other(e.to_string()))
///     }
/// }
/// ```
#[async_trait]
pub trait MessageHandler<T: Send + 'static>: Send + Sync {
    async fn handle(&self, message: T) -> Result<(), ServiceError>;
}
