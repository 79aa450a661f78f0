use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tessera_catalog::tax::TaxedPrice;
use tessera_core::payment::RefundMethod;
use uuid::Uuid;

/// Order status in the lifecycle.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStatus {
    Pending,
    Paid,
    Expired,
    Canceled,
    PartiallyRefunded,
    Refunded,
}

/// The single source of truth for a buyer's purchase.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order {
    pub id: Uuid,
    pub code: String,
    pub customer: String,
    pub status: OrderStatus,
    pub positions: Vec<OrderPosition>,
    pub fees: Vec<Fee>,
    /// Amount actually collected, minor currency units.
    pub paid_amount: i64,
    pub payment_method: String,
    pub checked_in: bool,
    /// Set while a cancellation refund is awaiting execution, so a second
    /// concurrent cancellation cannot also commit.
    pub refund_pending: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Order {
    pub fn new(customer: String, payment_method: String) -> Self {
        let now = Utc::now();
        let id = Uuid::new_v4();
        Self {
            id,
            code: Self::generate_code(&id),
            customer,
            status: OrderStatus::Pending,
            positions: Vec::new(),
            fees: Vec::new(),
            paid_amount: 0,
            payment_method,
            checked_in: false,
            refund_pending: false,
            created_at: now,
            updated_at: now,
        }
    }

    /// Short human-facing order code derived from the id.
    fn generate_code(id: &Uuid) -> String {
        id.simple().to_string()[..10].to_uppercase()
    }

    pub fn add_position(&mut self, position: OrderPosition) {
        self.positions.push(position);
        self.updated_at = Utc::now();
    }

    pub fn add_fee(&mut self, fee: Fee) {
        self.fees.push(fee);
        self.updated_at = Utc::now();
    }

    /// Gross total across positions and fees.
    pub fn total(&self) -> i64 {
        let positions: i64 = self.positions.iter().map(|p| p.price.gross).sum();
        positions + self.fee_total()
    }

    pub fn fee_total(&self) -> i64 {
        self.fees.iter().map(|f| f.amount).sum()
    }

    pub fn position(&self, position_id: Uuid) -> Option<&OrderPosition> {
        self.positions.iter().find(|p| p.id == position_id)
    }

    pub fn update_status(&mut self, new_status: OrderStatus) {
        self.status = new_status;
        self.updated_at = Utc::now();
    }

    /// Record a successful payment.
    pub fn mark_paid(&mut self, amount: i64) {
        self.paid_amount = amount;
        self.update_status(OrderStatus::Paid);
    }

    pub fn check_in(&mut self) {
        self.checked_in = true;
        self.updated_at = Utc::now();
    }
}

/// An individual priced line within an order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderPosition {
    pub id: Uuid,
    pub item_id: Uuid,
    pub variation_id: Option<Uuid>,
    pub price: TaxedPrice,
    /// Parent position when this is an add-on.
    pub addon_to: Option<Uuid>,
}

impl OrderPosition {
    pub fn new(item_id: Uuid, variation_id: Option<Uuid>, price: TaxedPrice) -> Self {
        Self {
            id: Uuid::new_v4(),
            item_id,
            variation_id,
            price,
            addon_to: None,
        }
    }
}

/// A service or payment fee attached to an order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Fee {
    pub id: Uuid,
    pub description: String,
    pub amount: i64,
    pub tax_rule: Option<Uuid>,
}

impl Fee {
    pub fn new(description: impl Into<String>, amount: i64, tax_rule: Option<Uuid>) -> Self {
        Self {
            id: Uuid::new_v4(),
            description: description.into(),
            amount,
            tax_rule,
        }
    }
}

/// Who raised a self-service request.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Requester {
    Buyer,
    Attendee,
}

/// A requested modification of one order position.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ChangeOperation {
    /// Swap a position to another variation of an item.
    VariationSwap {
        position_id: Uuid,
        /// Item the new variation belongs to; must match the position's item.
        item_id: Uuid,
        new_variation_id: Uuid,
        /// Listed price of the new variation, pre-tax-split.
        new_price: i64,
    },
    /// Attach an add-on product to an existing position.
    AddAddon {
        parent_position_id: Uuid,
        item_id: Uuid,
        price: i64,
        tax_rule: Option<Uuid>,
    },
}

/// A buyer- or attendee-initiated change request. Transient: evaluated and
/// either rejected or committed immediately.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChangeRequest {
    pub id: Uuid,
    pub order_id: Uuid,
    pub requester: Requester,
    pub operations: Vec<ChangeOperation>,
    pub requested_at: DateTime<Utc>,
}

impl ChangeRequest {
    pub fn new(order_id: Uuid, requester: Requester, operations: Vec<ChangeOperation>) -> Self {
        Self {
            id: Uuid::new_v4(),
            order_id,
            requester,
            operations,
            requested_at: Utc::now(),
        }
    }
}

/// A buyer-initiated cancellation request. Transient.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CancellationRequest {
    pub id: Uuid,
    pub order_id: Uuid,
    pub requester: Requester,
    pub requested_at: DateTime<Utc>,
}

impl CancellationRequest {
    pub fn new(order_id: Uuid, requester: Requester) -> Self {
        Self {
            id: Uuid::new_v4(),
            order_id,
            requester,
            requested_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ApprovalState {
    Pending,
    Approved,
    Denied,
}

/// A cancellation held for a human organizer decision.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApprovalRequest {
    pub id: Uuid,
    pub order_id: Uuid,
    pub cancellation_id: Uuid,
    pub state: ApprovalState,
    pub requested_at: DateTime<Utc>,
    pub decided_at: Option<DateTime<Utc>>,
}

impl ApprovalRequest {
    pub fn new(order_id: Uuid, cancellation_id: Uuid) -> Self {
        Self {
            id: Uuid::new_v4(),
            order_id,
            cancellation_id,
            state: ApprovalState::Pending,
            requested_at: Utc::now(),
            decided_at: None,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RefundInstructionStatus {
    Pending,
    Executed,
    ManualActionRequired,
}

/// Which self-service decision produced a refund instruction.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum RefundSource {
    Cancellation(Uuid),
    Change(Uuid),
}

/// A committed financial outcome awaiting execution. Created by a policy
/// engine, consumed exactly once by the refund execution coordinator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefundInstruction {
    pub id: Uuid,
    pub order_id: Uuid,
    pub amount: i64,
    pub method: RefundMethod,
    pub source: RefundSource,
    pub status: RefundInstructionStatus,
    pub created_at: DateTime<Utc>,
}

impl RefundInstruction {
    pub fn new(order_id: Uuid, amount: i64, method: RefundMethod, source: RefundSource) -> Self {
        Self {
            id: Uuid::new_v4(),
            order_id,
            amount,
            method,
            source,
            status: RefundInstructionStatus::Pending,
            created_at: Utc::now(),
        }
    }
}
