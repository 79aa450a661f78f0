use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// How a refund is returned to the buyer.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RefundMethod {
    /// Money goes back through the original payment channel.
    Direct,
    /// Credit is issued as a gift card instead of moving money.
    GiftCard,
}

/// Failure modes of a refund attempt. Transient failures may be retried,
/// permanent ones must not.
#[derive(Debug, Clone, thiserror::Error)]
pub enum RefundError {
    #[error("Transient refund failure: {0}")]
    Transient(String),

    #[error("Permanent refund failure: {0}")]
    Permanent(String),
}

/// Abstract refund capability of whatever payment provider collected the
/// order's money. Modeled after provider plugins that report whether they
/// can refund automatically and then either transfer the money back or fail.
#[async_trait]
pub trait RefundGateway: Send + Sync {
    /// Whether the provider behind `payment_method` can refund without
    /// staff intervention.
    fn supports_auto_refund(&self, payment_method: &str) -> bool;

    /// Transfer `amount` (minor currency units) back to the buyer.
    async fn refund(
        &self,
        order_id: Uuid,
        amount: i64,
        method: RefundMethod,
    ) -> Result<(), RefundError>;
}
