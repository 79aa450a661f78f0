use crate::models::{OrderStatus, RefundInstruction, RefundInstructionStatus, RefundSource};
use crate::store::OrderStore;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tessera_core::notify::{NotificationEvent, Notifier};
use tessera_core::payment::{RefundError, RefundGateway};
use tokio::sync::Notify;
use uuid::Uuid;

/// Final outcome of one refund instruction.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RefundOutcome {
    Executed,
    ManualActionRequired,
}

/// Durable marker that an automatic refund could not be completed and
/// needs staff intervention.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManualActionRecord {
    pub instruction_id: Uuid,
    pub order_id: Uuid,
    pub amount: i64,
    pub reason: String,
    pub created_at: DateTime<Utc>,
}

/// Retry policy for transient refund failures.
#[derive(Debug, Clone, Copy)]
pub struct BackoffPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(50),
        }
    }
}

struct Inner {
    gateway: Arc<dyn RefundGateway>,
    notifier: Arc<dyn Notifier>,
    store: Arc<OrderStore>,
    backoff: BackoffPolicy,
    /// Instruction ids whose attempt sequence has been claimed. The claim
    /// is atomic, so at most one sequence ever runs per id.
    started: Mutex<HashSet<Uuid>>,
    outcomes: Mutex<HashMap<Uuid, RefundOutcome>>,
    /// Woken whenever an outcome is recorded, so duplicate callers can
    /// block until the in-flight sequence settles.
    settled: Notify,
    manual_actions: Mutex<Vec<ManualActionRecord>>,
}

/// Executes refund instructions against the payment capability.
///
/// Guarantees: exactly one attempt sequence per instruction id; replays
/// return the stored outcome without moving money again; a permanent
/// failure or unsupported provider produces a durable manual-action record
/// plus a notification instead of being dropped; and an attempt sequence
/// runs to completion even if the caller's own request is cancelled or
/// times out mid-flight.
pub struct RefundCoordinator {
    inner: Arc<Inner>,
}

impl RefundCoordinator {
    pub fn new(
        gateway: Arc<dyn RefundGateway>,
        notifier: Arc<dyn Notifier>,
        store: Arc<OrderStore>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                gateway,
                notifier,
                store,
                backoff: BackoffPolicy::default(),
                started: Mutex::new(HashSet::new()),
                outcomes: Mutex::new(HashMap::new()),
                settled: Notify::new(),
                manual_actions: Mutex::new(Vec::new()),
            }),
        }
    }

    pub fn with_backoff(self, backoff: BackoffPolicy) -> Self {
        // Rebuild rather than mutate: the coordinator may already be shared.
        let inner = &self.inner;
        Self {
            inner: Arc::new(Inner {
                gateway: inner.gateway.clone(),
                notifier: inner.notifier.clone(),
                store: inner.store.clone(),
                backoff,
                started: Mutex::new(HashSet::new()),
                outcomes: Mutex::new(HashMap::new()),
                settled: Notify::new(),
                manual_actions: Mutex::new(Vec::new()),
            }),
        }
    }

    pub fn outcome_of(&self, instruction_id: Uuid) -> Option<RefundOutcome> {
        self.inner.outcomes.lock().unwrap().get(&instruction_id).copied()
    }

    pub fn instruction_status(&self, instruction_id: Uuid) -> RefundInstructionStatus {
        match self.outcome_of(instruction_id) {
            Some(RefundOutcome::Executed) => RefundInstructionStatus::Executed,
            Some(RefundOutcome::ManualActionRequired) => RefundInstructionStatus::ManualActionRequired,
            None => RefundInstructionStatus::Pending,
        }
    }

    pub fn manual_actions(&self) -> Vec<ManualActionRecord> {
        self.inner.manual_actions.lock().unwrap().clone()
    }

    /// Execute a refund instruction.
    ///
    /// Callers should wrap this in their own timeout and treat a timeout as
    /// transient: the attempt sequence keeps running in a spawned task and
    /// records its outcome regardless.
    pub async fn execute(&self, instruction: RefundInstruction) -> RefundOutcome {
        let id = instruction.id;

        // Replay of a settled instruction is a no-op.
        if let Some(outcome) = self.outcome_of(id) {
            return outcome;
        }

        let claimed = self.inner.started.lock().unwrap().insert(id);
        if !claimed {
            // Another sequence for this id is in flight; block until it
            // records its outcome rather than starting a second one.
            loop {
                // Register for the wakeup before re-checking, so a
                // recording between the check and the await is not missed.
                let settled = self.inner.settled.notified();
                if let Some(outcome) = self.outcome_of(id) {
                    return outcome;
                }
                settled.await;
            }
        }

        let task = tokio::spawn(Self::run_sequence(
            Arc::clone(&self.inner),
            instruction.clone(),
        ));
        match task.await {
            Ok(outcome) => outcome,
            Err(_) => {
                // The sequence aborted mid-flight. Settle the instruction so
                // status queries and duplicate callers do not hang on Pending.
                if let Some(outcome) = self.outcome_of(id) {
                    return outcome;
                }
                self.inner
                    .manual_actions
                    .lock()
                    .unwrap()
                    .push(ManualActionRecord {
                        instruction_id: id,
                        order_id: instruction.order_id,
                        amount: instruction.amount,
                        reason: "refund task aborted before completing".to_string(),
                        created_at: Utc::now(),
                    });
                Self::record_outcome(&self.inner, id, RefundOutcome::ManualActionRequired)
            }
        }
    }

    /// Store the final outcome once and wake anything waiting on it.
    /// Returns the stored value, which wins over a later duplicate.
    fn record_outcome(inner: &Inner, id: Uuid, outcome: RefundOutcome) -> RefundOutcome {
        let settled = *inner.outcomes.lock().unwrap().entry(id).or_insert(outcome);
        inner.settled.notify_waiters();
        settled
    }

    async fn run_sequence(inner: Arc<Inner>, instruction: RefundInstruction) -> RefundOutcome {
        let payment_method = inner
            .store
            .get(instruction.order_id)
            .map(|o| o.payment_method)
            .unwrap_or_default();

        if !inner.gateway.supports_auto_refund(&payment_method) {
            return Self::manual_fallback(
                &inner,
                &instruction,
                format!("provider '{}' does not support automatic refunds", payment_method),
            )
            .await;
        }

        let mut attempt = 0;
        loop {
            attempt += 1;
            match inner
                .gateway
                .refund(instruction.order_id, instruction.amount, instruction.method)
                .await
            {
                Ok(()) => {
                    Self::finish_order(&inner, &instruction).await;
                    Self::record_outcome(&inner, instruction.id, RefundOutcome::Executed);
                    tracing::info!(
                        instruction = %instruction.id,
                        amount = instruction.amount,
                        "refund executed"
                    );
                    return RefundOutcome::Executed;
                }
                Err(RefundError::Transient(reason)) => {
                    if attempt >= inner.backoff.max_attempts {
                        return Self::manual_fallback(
                            &inner,
                            &instruction,
                            format!("retries exhausted: {}", reason),
                        )
                        .await;
                    }
                    tracing::warn!(
                        instruction = %instruction.id,
                        attempt,
                        %reason,
                        "transient refund failure, retrying"
                    );
                    tokio::time::sleep(inner.backoff.base_delay * attempt).await;
                }
                Err(RefundError::Permanent(reason)) => {
                    return Self::manual_fallback(&inner, &instruction, reason).await;
                }
            }
        }
    }

    /// Move the order to its terminal refund state once the money moved.
    /// Only cancellation refunds close out the order; a change-sourced
    /// partial refund leaves the order as is.
    async fn finish_order(inner: &Inner, instruction: &RefundInstruction) {
        if !matches!(instruction.source, RefundSource::Cancellation(_)) {
            return;
        }
        let _ = inner.store.with_order(instruction.order_id, |order| {
            if order.status == OrderStatus::Paid {
                let new_status = if instruction.amount >= order.paid_amount {
                    OrderStatus::Refunded
                } else {
                    OrderStatus::PartiallyRefunded
                };
                order.update_status(new_status);
                order.refund_pending = false;
            }
        });
        inner
            .notifier
            .notify(
                NotificationEvent::OrderRefunded,
                "buyer",
                serde_json::json!({
                    "order_id": instruction.order_id,
                    "amount": instruction.amount,
                }),
            )
            .await;
    }

    async fn manual_fallback(
        inner: &Inner,
        instruction: &RefundInstruction,
        reason: String,
    ) -> RefundOutcome {
        tracing::warn!(
            instruction = %instruction.id,
            %reason,
            "refund needs manual action"
        );
        inner.manual_actions.lock().unwrap().push(ManualActionRecord {
            instruction_id: instruction.id,
            order_id: instruction.order_id,
            amount: instruction.amount,
            reason: reason.clone(),
            created_at: Utc::now(),
        });
        Self::record_outcome(inner, instruction.id, RefundOutcome::ManualActionRequired);
        inner
            .notifier
            .notify(
                NotificationEvent::RefundManualActionRequired,
                "organizer",
                serde_json::json!({
                    "instruction_id": instruction.id,
                    "order_id": instruction.order_id,
                    "amount": instruction.amount,
                    "reason": reason,
                }),
            )
            .await;
        RefundOutcome::ManualActionRequired
    }
}
