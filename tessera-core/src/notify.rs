use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Events the core raises towards the notification collaborator.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NotificationEvent {
    CancellationApprovalRequested,
    RefundManualActionRequired,
    OrderCanceled,
    OrderRefunded,
}

/// Fire-and-forget notification delivery. Implementations must never let a
/// delivery failure propagate into the caller's state transition.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, event: NotificationEvent, recipient: &str, context: serde_json::Value);
}

/// Notifier that drops everything, for flows that run without delivery wired up.
pub struct NoopNotifier;

#[async_trait]
impl Notifier for NoopNotifier {
    async fn notify(&self, _event: NotificationEvent, _recipient: &str, _context: serde_json::Value) {}
}
