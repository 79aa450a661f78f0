use crate::models::{Order, OrderPosition};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tessera_catalog::reservation::{ReservationError, ReservationManager};
use tessera_catalog::tax::TaxRuleSet;
use uuid::Uuid;

/// One stage of the buyer-facing purchase workflow, in priority order.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CheckoutStepKind {
    CartReview,
    AddonSelection,
    Questions,
    Payment,
    Confirm,
}

impl CheckoutStepKind {
    /// Whether this step applies to the order-in-progress. Evaluated at
    /// entry time, so context entered in earlier steps counts.
    pub fn is_applicable(&self, context: &CheckoutContext) -> bool {
        match self {
            CheckoutStepKind::CartReview => true,
            CheckoutStepKind::AddonSelection => context.addon_eligible,
            CheckoutStepKind::Questions => !context.required_questions.is_empty(),
            CheckoutStepKind::Payment => context.total > 0,
            CheckoutStepKind::Confirm => true,
        }
    }
}

/// Accumulated order-in-progress data. Serializable so the caller can
/// persist it between interactions and resume within the reservation's TTL.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckoutContext {
    pub reservation_token: Uuid,
    pub customer: String,
    /// Gross cart total at reservation time, minor currency units.
    pub total: i64,
    pub addon_eligible: bool,
    pub required_questions: Vec<String>,
    pub answers: HashMap<String, String>,
    pub payment_method: Option<String>,
}

/// The externally persisted piece of the flow: current step plus context.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckoutState {
    pub current: usize,
    pub context: CheckoutContext,
}

/// Outcome of a successful `advance`.
#[derive(Debug)]
pub enum Advance {
    Moved(CheckoutStepKind),
    Confirmed(Order),
}

/// Resumable state machine driving a buyer through the applicable checkout
/// steps and committing the reservation into an order at the end.
pub struct CheckoutFlow {
    steps: Vec<CheckoutStepKind>,
    state: CheckoutState,
}

impl CheckoutFlow {
    const DEFAULT_STEPS: [CheckoutStepKind; 5] = [
        CheckoutStepKind::CartReview,
        CheckoutStepKind::AddonSelection,
        CheckoutStepKind::Questions,
        CheckoutStepKind::Payment,
        CheckoutStepKind::Confirm,
    ];

    /// Start a flow over an existing reservation.
    pub fn begin(
        manager: &ReservationManager,
        token: Uuid,
        customer: impl Into<String>,
        addon_eligible: bool,
        required_questions: Vec<String>,
    ) -> Result<Self, CheckoutError> {
        let reservation = manager.get(token).ok_or(CheckoutError::ReservationExpired)?;
        if reservation.is_expired(chrono::Utc::now()) {
            return Err(CheckoutError::ReservationExpired);
        }

        let context = CheckoutContext {
            reservation_token: token,
            customer: customer.into(),
            total: reservation.total(),
            addon_eligible,
            required_questions,
            answers: HashMap::new(),
            payment_method: None,
        };

        let mut flow = Self {
            steps: Self::DEFAULT_STEPS.to_vec(),
            state: CheckoutState {
                current: 0,
                context,
            },
        };
        // Skip over leading inapplicable steps (CartReview always applies,
        // so this is a no-op today; it keeps custom step lists honest).
        if !flow.current_step().is_applicable(&flow.state.context) {
            if let Some(next) = flow.next_applicable(flow.state.current) {
                flow.state.current = next;
            }
        }
        Ok(flow)
    }

    /// Rebuild a flow from externally persisted state.
    pub fn resume(state: CheckoutState) -> Self {
        Self {
            steps: Self::DEFAULT_STEPS.to_vec(),
            state,
        }
    }

    pub fn state(&self) -> &CheckoutState {
        &self.state
    }

    pub fn current_step(&self) -> CheckoutStepKind {
        self.steps[self.state.current]
    }

    pub fn set_payment_method(&mut self, method: impl Into<String>) {
        self.state.context.payment_method = Some(method.into());
    }

    pub fn answer(&mut self, question: impl Into<String>, answer: impl Into<String>) {
        self.state.context.answers.insert(question.into(), answer.into());
    }

    fn next_applicable(&self, from: usize) -> Option<usize> {
        self.steps
            .iter()
            .enumerate()
            .skip(from + 1)
            .find(|(_, step)| step.is_applicable(&self.state.context))
            .map(|(i, _)| i)
    }

    fn prev_applicable(&self, from: usize) -> Option<usize> {
        self.steps[..from]
            .iter()
            .enumerate()
            .rev()
            .find(|(_, step)| step.is_applicable(&self.state.context))
            .map(|(i, _)| i)
    }

    /// Validate the current step and move forward; when no applicable step
    /// remains, consume the reservation and commit the order.
    pub fn advance(
        &mut self,
        manager: &ReservationManager,
        rules: &TaxRuleSet,
    ) -> Result<Advance, CheckoutError> {
        // The hold must still be alive for any forward movement.
        match manager.get(self.state.context.reservation_token) {
            Some(r) if !r.is_expired(chrono::Utc::now()) => {}
            _ => return Err(CheckoutError::ReservationExpired),
        }

        self.validate_current()?;

        match self.next_applicable(self.state.current) {
            Some(next) => {
                self.state.current = next;
                Ok(Advance::Moved(self.steps[next]))
            }
            None => self.commit(manager, rules).map(Advance::Confirmed),
        }
    }

    /// Move to the previous applicable step without discarding entered data.
    pub fn back(&mut self) -> CheckoutStepKind {
        if let Some(prev) = self.prev_applicable(self.state.current) {
            self.state.current = prev;
        }
        self.current_step()
    }

    fn validate_current(&self) -> Result<(), CheckoutError> {
        let context = &self.state.context;
        match self.current_step() {
            CheckoutStepKind::Questions => {
                for question in &context.required_questions {
                    if !context.answers.contains_key(question) {
                        return Err(CheckoutError::StepValidationFailed(format!(
                            "question '{}' not answered",
                            question
                        )));
                    }
                }
                Ok(())
            }
            CheckoutStepKind::Payment => {
                if context.payment_method.is_none() {
                    return Err(CheckoutError::StepValidationFailed(
                        "no payment method selected".to_string(),
                    ));
                }
                Ok(())
            }
            _ => Ok(()),
        }
    }

    /// Consume the reservation and create the order. Free orders need no
    /// payment and are confirmed as paid immediately.
    fn commit(
        &self,
        manager: &ReservationManager,
        rules: &TaxRuleSet,
    ) -> Result<Order, CheckoutError> {
        let context = &self.state.context;

        // Resolve the tax rule for every line before the reservation is
        // consumed, so a misconfigured rule set leaves the hold intact.
        let reservation = manager
            .get(context.reservation_token)
            .ok_or(CheckoutError::ReservationExpired)?;
        let mut priced = Vec::with_capacity(reservation.lines.len());
        for line in &reservation.lines {
            let rule = line
                .tax_rule
                .and_then(|id| rules.get(id))
                .or_else(|| rules.default_rule())
                .ok_or_else(|| {
                    CheckoutError::StepValidationFailed("no tax rule configured".to_string())
                })?;
            priced.push((line.clone(), rule.clone()));
        }

        if let Err(e) = manager.confirm(context.reservation_token) {
            return Err(match e {
                ReservationError::Inventory(e) => {
                    CheckoutError::StepValidationFailed(e.to_string())
                }
                _ => CheckoutError::ReservationExpired,
            });
        }

        let payment_method = context
            .payment_method
            .clone()
            .unwrap_or_else(|| "free".to_string());
        let mut order = Order::new(context.customer.clone(), payment_method);

        for (line, rule) in &priced {
            for _ in 0..line.quantity {
                order.add_position(OrderPosition::new(
                    line.item_id,
                    line.variation_id,
                    rule.tax(line.unit_price),
                ));
            }
        }

        if order.total() == 0 {
            order.mark_paid(0);
        }

        tracing::info!(code = %order.code, total = order.total(), "checkout confirmed");
        Ok(order)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum CheckoutError {
    #[error("Step validation failed: {0}")]
    StepValidationFailed(String),

    #[error("Reservation expired")]
    ReservationExpired,
}
