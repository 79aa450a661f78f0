use crate::config::{CancellationBranch, PolicyConfig};
use crate::models::{
    ApprovalRequest, ApprovalState, CancellationRequest, Order, OrderStatus, RefundInstruction,
    RefundSource,
};
use crate::store::{OrderStore, StoreError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tessera_catalog::tax::{TaxRuleSet, TaxedPrice};
use tessera_core::notify::{NotificationEvent, Notifier};
use tessera_core::payment::RefundMethod;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CancellationDenialReason {
    NotAllowed,
    OutsideWindow,
}

/// The computed financial split of an allowed cancellation, exposed to the
/// presentation layer for display before commit.
#[derive(Debug, Clone)]
pub struct CancellationOutcome {
    /// Fee the organizer keeps, minor currency units.
    pub retained: i64,
    /// Amount returned to the buyer, clamped to >= 0.
    pub refund_amount: i64,
    pub method: RefundMethod,
    /// Tax split of the retained fee, when one applies.
    pub retained_tax: Option<TaxedPrice>,
    /// Present when there is money to move.
    pub instruction: Option<RefundInstruction>,
}

#[derive(Debug, Clone)]
pub enum CancellationDecision {
    Denied(CancellationDenialReason),
    /// The policy requires an organizer decision before any money moves.
    RequiresApproval(ApprovalRequest),
    Proceed(CancellationOutcome),
}

/// Evaluate a cancellation request against the policy snapshot. Pure; the
/// order and config are read-only and nothing is persisted here.
pub fn evaluate(
    order: &Order,
    request: &CancellationRequest,
    config: &PolicyConfig,
    rules: &TaxRuleSet,
    now: DateTime<Utc>,
) -> CancellationDecision {
    let branch = match order.status {
        OrderStatus::Pending => config.unpaid_branch(),
        OrderStatus::Paid => config.paid_branch(),
        _ => return CancellationDecision::Denied(CancellationDenialReason::NotAllowed),
    };

    if !branch.allow {
        return CancellationDecision::Denied(CancellationDenialReason::NotAllowed);
    }
    if let Some(until) = branch.until {
        if now > until {
            return CancellationDecision::Denied(CancellationDenialReason::OutsideWindow);
        }
    }

    if branch.require_approval {
        // No split is computed yet; it is recomputed once a human decides.
        return CancellationDecision::RequiresApproval(ApprovalRequest::new(order.id, request.id));
    }

    CancellationDecision::Proceed(split(order, request.id, &branch, config, rules))
}

/// Compute the retained fee and refund for one branch:
/// `retained = keep ? max(fixed, paid * pct / 100) + (keep_fees ? fees : 0) : 0`,
/// refund clamped to >= 0.
fn split(
    order: &Order,
    cancellation_id: uuid::Uuid,
    branch: &CancellationBranch,
    config: &PolicyConfig,
    rules: &TaxRuleSet,
) -> CancellationOutcome {
    let retained = if branch.keep {
        let percentage = (order.paid_amount as f64 * branch.keep_percentage / 100.0).round() as i64;
        let base = branch.keep_fixed.max(percentage);
        base + if branch.keep_fees { order.fee_total() } else { 0 }
    } else {
        0
    };

    let refund_amount = (order.paid_amount - retained).max(0);

    let method = if branch.refund_as_giftcard {
        RefundMethod::GiftCard
    } else {
        RefundMethod::Direct
    };

    // The retained fee is taxed under the dedicated cancellation rule when
    // configured, otherwise under the order's original rule.
    let retained_tax = if retained > 0 {
        config
            .tax_rule_cancellation
            .and_then(|id| rules.get(id))
            .or_else(|| order.positions.first().and_then(|p| rules.get(p.price.rule)))
            .map(|rule| rule.tax(retained))
    } else {
        None
    };

    let instruction = (refund_amount > 0).then(|| {
        RefundInstruction::new(
            order.id,
            refund_amount,
            method,
            RefundSource::Cancellation(cancellation_id),
        )
    });

    CancellationOutcome {
        retained,
        refund_amount,
        method,
        retained_tax,
        instruction,
    }
}

/// Commit an allowed cancellation. Atomic on the order aggregate:
/// an unpaid order transitions to Canceled; a paid order is flagged
/// refund-pending and stays Paid until the refund coordinator reports
/// success. A second concurrent commit on the same order fails.
pub fn commit(
    store: &OrderStore,
    order_id: uuid::Uuid,
    outcome: &CancellationOutcome,
) -> Result<Option<RefundInstruction>, StoreError> {
    store.with_order(order_id, |order| match order.status {
        OrderStatus::Pending => {
            order.update_status(OrderStatus::Canceled);
            tracing::info!(code = %order.code, "unpaid order canceled");
            Ok(())
        }
        OrderStatus::Paid => {
            if order.refund_pending {
                return Err(StoreError::InvalidTransition {
                    expected: "PAID".to_string(),
                    actual: "PAID (refund already pending)".to_string(),
                });
            }
            order.refund_pending = true;
            tracing::info!(code = %order.code, refund = outcome.refund_amount, "cancellation committed, refund pending");
            Ok(())
        }
        other => Err(StoreError::InvalidTransition {
            expected: "PENDING or PAID".to_string(),
            actual: format!("{:?}", other),
        }),
    })??;

    Ok(outcome.instruction.clone())
}

/// Record an organizer's approval and produce the financial split, computed
/// at approval time so interim payments or fee edits are reflected.
pub fn approve(
    approval: &mut ApprovalRequest,
    order: &Order,
    config: &PolicyConfig,
    rules: &TaxRuleSet,
) -> CancellationOutcome {
    approval.state = ApprovalState::Approved;
    approval.decided_at = Some(Utc::now());
    split(order, approval.cancellation_id, &config.paid_branch(), config, rules)
}

/// Record an organizer's denial; the order is left untouched.
pub fn deny(approval: &mut ApprovalRequest) {
    approval.state = ApprovalState::Denied;
    approval.decided_at = Some(Utc::now());
}

/// Tell the organizer a cancellation is waiting for their decision.
/// Fire-and-forget: delivery failure never blocks the state transition.
pub async fn announce_approval_request(
    notifier: &dyn Notifier,
    order: &Order,
    approval: &ApprovalRequest,
) {
    notifier
        .notify(
            NotificationEvent::CancellationApprovalRequested,
            "organizer",
            serde_json::json!({
                "order": order.code,
                "approval_id": approval.id,
                "requested_at": approval.requested_at,
            }),
        )
        .await;
}
