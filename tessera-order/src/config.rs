use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// How a buyer-chosen replacement price may relate to the old price.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PriceChangeMode {
    /// Any price difference is allowed.
    Any,
    /// The new price must be equal to or higher than the old one.
    EqualOrHigher,
    /// The new price must match the old one exactly.
    EqualOnly,
}

/// The organizer-configured self-service policy for one event, loaded as a
/// single immutable snapshot per evaluation so a policy edit mid-evaluation
/// can never produce a mixed decision.
///
/// All monetary fields are minor currency units; percentages are percent
/// values (10.0 = 10 %).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyConfig {
    // Buyer-initiated order changes.
    pub change_allow_user_variation: bool,
    pub change_allow_user_addons: bool,
    pub change_allow_user_until: Option<DateTime<Utc>>,
    pub change_allow_user_price: PriceChangeMode,
    pub change_allow_user_if_checked_in: bool,
    pub change_allow_attendee: bool,

    // Cancellation of unpaid orders.
    pub cancel_allow_user: bool,
    pub cancel_allow_user_until: Option<DateTime<Utc>>,
    pub cancel_allow_user_unpaid_keep: bool,
    pub cancel_allow_user_unpaid_keep_fixed: i64,
    pub cancel_allow_user_unpaid_keep_percentage: f64,
    pub cancel_allow_user_unpaid_keep_fees: bool,

    // Cancellation of paid orders.
    pub cancel_allow_user_paid: bool,
    pub cancel_allow_user_paid_until: Option<DateTime<Utc>>,
    pub cancel_allow_user_paid_require_approval: bool,
    pub cancel_allow_user_paid_keep: bool,
    pub cancel_allow_user_paid_keep_fixed: i64,
    pub cancel_allow_user_paid_keep_percentage: f64,
    pub cancel_allow_user_paid_keep_fees: bool,
    pub cancel_allow_user_paid_adjust_fees: bool,
    pub cancel_allow_user_paid_adjust_fees_explanation: String,
    /// Rounding granularity applied to buyer-initiated price deltas.
    pub cancel_allow_user_paid_adjust_fees_step: i64,
    pub cancel_allow_user_paid_refund_as_giftcard: bool,

    /// Whether allowed negative price deltas and cancellation refunds are
    /// refunded automatically.
    pub automatic_refunds: bool,
    /// Tax rule applied to a retained cancellation fee; falls back to the
    /// order's original rule when unset.
    pub tax_rule_cancellation: Option<Uuid>,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            change_allow_user_variation: false,
            change_allow_user_addons: false,
            change_allow_user_until: None,
            change_allow_user_price: PriceChangeMode::EqualOrHigher,
            change_allow_user_if_checked_in: false,
            change_allow_attendee: false,

            cancel_allow_user: true,
            cancel_allow_user_until: None,
            cancel_allow_user_unpaid_keep: false,
            cancel_allow_user_unpaid_keep_fixed: 0,
            cancel_allow_user_unpaid_keep_percentage: 0.0,
            cancel_allow_user_unpaid_keep_fees: false,

            cancel_allow_user_paid: false,
            cancel_allow_user_paid_until: None,
            cancel_allow_user_paid_require_approval: false,
            cancel_allow_user_paid_keep: false,
            cancel_allow_user_paid_keep_fixed: 0,
            cancel_allow_user_paid_keep_percentage: 0.0,
            cancel_allow_user_paid_keep_fees: false,
            cancel_allow_user_paid_adjust_fees: false,
            cancel_allow_user_paid_adjust_fees_explanation: String::new(),
            cancel_allow_user_paid_adjust_fees_step: 0,
            cancel_allow_user_paid_refund_as_giftcard: false,

            automatic_refunds: true,
            tax_rule_cancellation: None,
        }
    }
}

/// The cancellation knobs for one branch (paid or unpaid), flattened so the
/// engine evaluates both branches through the same code path.
#[derive(Debug, Clone, Copy)]
pub struct CancellationBranch {
    pub allow: bool,
    pub until: Option<DateTime<Utc>>,
    pub keep: bool,
    pub keep_fixed: i64,
    pub keep_percentage: f64,
    pub keep_fees: bool,
    pub require_approval: bool,
    pub refund_as_giftcard: bool,
}

impl PolicyConfig {
    pub fn unpaid_branch(&self) -> CancellationBranch {
        CancellationBranch {
            allow: self.cancel_allow_user,
            until: self.cancel_allow_user_until,
            keep: self.cancel_allow_user_unpaid_keep,
            keep_fixed: self.cancel_allow_user_unpaid_keep_fixed,
            keep_percentage: self.cancel_allow_user_unpaid_keep_percentage,
            keep_fees: self.cancel_allow_user_unpaid_keep_fees,
            require_approval: false,
            refund_as_giftcard: false,
        }
    }

    pub fn paid_branch(&self) -> CancellationBranch {
        CancellationBranch {
            allow: self.cancel_allow_user_paid,
            until: self.cancel_allow_user_paid_until,
            keep: self.cancel_allow_user_paid_keep,
            keep_fixed: self.cancel_allow_user_paid_keep_fixed,
            keep_percentage: self.cancel_allow_user_paid_keep_percentage,
            keep_fees: self.cancel_allow_user_paid_keep_fees,
            require_approval: self.cancel_allow_user_paid_require_approval,
            refund_as_giftcard: self.cancel_allow_user_paid_refund_as_giftcard,
        }
    }
}
