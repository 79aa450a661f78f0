use crate::config::{PolicyConfig, PriceChangeMode};
use crate::models::{ChangeOperation, ChangeRequest, Order, OrderPosition, RefundInstruction, RefundSource, Requester};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tessera_catalog::tax::TaxRuleSet;
use tessera_core::payment::RefundMethod;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ChangeDenialReason {
    OutsideWindow,
    AlreadyCheckedIn,
    NotPermitted,
}

/// Decision for a change request. Denials are values to branch on for
/// presentation, never faults.
#[derive(Debug, Clone)]
pub enum ChangeDecision {
    Allowed {
        /// `new - old` gross price difference after step rounding. Positive
        /// deltas must be collected externally before the change commits.
        price_delta: i64,
        /// Emitted when the delta is negative and automatic refunds are on.
        refund: Option<RefundInstruction>,
    },
    Denied(ChangeDenialReason),
}

/// Evaluate a change request against the policy snapshot. Pure: no state is
/// touched; committing an allowed change is `apply`.
///
/// Rules are checked in order and the first failing rule wins.
pub fn evaluate(
    order: &Order,
    request: &ChangeRequest,
    config: &PolicyConfig,
    rules: &TaxRuleSet,
    now: DateTime<Utc>,
) -> ChangeDecision {
    if let Some(until) = config.change_allow_user_until {
        if now > until {
            return ChangeDecision::Denied(ChangeDenialReason::OutsideWindow);
        }
    }

    if order.checked_in && !config.change_allow_user_if_checked_in {
        return ChangeDecision::Denied(ChangeDenialReason::AlreadyCheckedIn);
    }

    if request.requester == Requester::Attendee && !config.change_allow_attendee {
        return ChangeDecision::Denied(ChangeDenialReason::NotPermitted);
    }

    for operation in &request.operations {
        match operation {
            ChangeOperation::VariationSwap {
                position_id, item_id, ..
            } => {
                if !config.change_allow_user_variation {
                    return ChangeDecision::Denied(ChangeDenialReason::NotPermitted);
                }
                let Some(position) = order.position(*position_id) else {
                    return ChangeDecision::Denied(ChangeDenialReason::NotPermitted);
                };
                // A variation swap may not leave the product.
                if position.item_id != *item_id {
                    return ChangeDecision::Denied(ChangeDenialReason::NotPermitted);
                }
            }
            ChangeOperation::AddAddon { parent_position_id, .. } => {
                if !config.change_allow_user_addons {
                    return ChangeDecision::Denied(ChangeDenialReason::NotPermitted);
                }
                if order.position(*parent_position_id).is_none() {
                    return ChangeDecision::Denied(ChangeDenialReason::NotPermitted);
                }
            }
        }
    }

    let raw_delta = price_delta(order, request, rules);
    match config.change_allow_user_price {
        PriceChangeMode::Any => {}
        PriceChangeMode::EqualOrHigher if raw_delta < 0 => {
            return ChangeDecision::Denied(ChangeDenialReason::NotPermitted);
        }
        PriceChangeMode::EqualOnly if raw_delta != 0 => {
            return ChangeDecision::Denied(ChangeDenialReason::NotPermitted);
        }
        _ => {}
    }

    let delta = round_to_step(raw_delta, config.cancel_allow_user_paid_adjust_fees_step);

    let refund = if delta < 0 && config.automatic_refunds {
        let method = if config.cancel_allow_user_paid_refund_as_giftcard {
            RefundMethod::GiftCard
        } else {
            RefundMethod::Direct
        };
        Some(RefundInstruction::new(
            order.id,
            -delta,
            method,
            RefundSource::Change(request.id),
        ))
    } else {
        None
    };

    ChangeDecision::Allowed {
        price_delta: delta,
        refund,
    }
}

/// Commit an allowed change onto the order. Fees are never altered by a
/// buyer-initiated change.
pub fn apply(order: &mut Order, request: &ChangeRequest, rules: &TaxRuleSet) {
    for operation in &request.operations {
        match operation {
            ChangeOperation::VariationSwap {
                position_id,
                new_variation_id,
                new_price,
                ..
            } => {
                // Price and variation move together; a position whose rule
                // cannot be resolved stays untouched rather than half-swapped.
                let rule = order
                    .position(*position_id)
                    .and_then(|p| rules.get(p.price.rule));
                if let Some(rule) = rule {
                    let priced = rule.tax(*new_price);
                    if let Some(position) =
                        order.positions.iter_mut().find(|p| p.id == *position_id)
                    {
                        position.price = priced;
                        position.variation_id = Some(*new_variation_id);
                    }
                }
            }
            ChangeOperation::AddAddon {
                parent_position_id,
                item_id,
                price,
                tax_rule,
            } => {
                let rule = tax_rule
                    .and_then(|id| rules.get(id))
                    .or_else(|| rules.default_rule());
                if let Some(rule) = rule {
                    let mut position = OrderPosition::new(*item_id, None, rule.tax(*price));
                    position.addon_to = Some(*parent_position_id);
                    order.add_position(position);
                }
            }
        }
    }
    order.updated_at = Utc::now();
}

/// Gross price difference the request would produce, via the tax resolver
/// on the new configuration.
fn price_delta(order: &Order, request: &ChangeRequest, rules: &TaxRuleSet) -> i64 {
    let mut delta = 0;
    for operation in &request.operations {
        match operation {
            ChangeOperation::VariationSwap {
                position_id,
                new_price,
                ..
            } => {
                if let Some(position) = order.position(*position_id) {
                    let new_gross = rules
                        .get(position.price.rule)
                        .map(|rule| rule.tax(*new_price).gross)
                        .unwrap_or(*new_price);
                    delta += new_gross - position.price.gross;
                }
            }
            ChangeOperation::AddAddon { price, tax_rule, .. } => {
                let rule = tax_rule
                    .and_then(|id| rules.get(id))
                    .or_else(|| rules.default_rule());
                delta += rule.map(|r| r.tax(*price).gross).unwrap_or(*price);
            }
        }
    }
    delta
}

/// Round a delta to the configured fee-adjustment granularity, nearest
/// multiple with ties away from zero. A step of 0 or 1 leaves it unchanged.
fn round_to_step(delta: i64, step: i64) -> i64 {
    if step <= 1 {
        return delta;
    }
    ((delta as f64 / step as f64).round() as i64) * step
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use tessera_catalog::tax::TaxRule;
    use uuid::Uuid;

    fn order_with_position(price: i64) -> (Order, TaxRuleSet, Uuid, Uuid) {
        let mut rules = TaxRuleSet::new();
        let rule_id = rules.insert(TaxRule::new("VAT 19%", 19.0, true, false).unwrap());
        let mut order = Order::new("buyer@example.com".to_string(), "banktransfer".to_string());
        let item_id = Uuid::new_v4();
        let rule = rules.get(rule_id).unwrap().clone();
        order.add_position(OrderPosition::new(item_id, Some(Uuid::new_v4()), rule.tax(price)));
        let position_id = order.positions[0].id;
        (order, rules, item_id, position_id)
    }

    fn permissive_config() -> PolicyConfig {
        PolicyConfig {
            change_allow_user_variation: true,
            change_allow_user_addons: true,
            change_allow_user_price: PriceChangeMode::Any,
            ..PolicyConfig::default()
        }
    }

    fn swap(position_id: Uuid, item_id: Uuid, new_price: i64) -> ChangeOperation {
        ChangeOperation::VariationSwap {
            position_id,
            item_id,
            new_variation_id: Uuid::new_v4(),
            new_price,
        }
    }

    #[test]
    fn test_denied_outside_window() {
        let (order, rules, item_id, position_id) = order_with_position(10000);
        let config = PolicyConfig {
            change_allow_user_until: Some(Utc::now() - Duration::hours(1)),
            ..permissive_config()
        };
        let request = ChangeRequest::new(order.id, Requester::Buyer, vec![swap(position_id, item_id, 12000)]);

        let decision = evaluate(&order, &request, &config, &rules, Utc::now());
        assert!(matches!(
            decision,
            ChangeDecision::Denied(ChangeDenialReason::OutsideWindow)
        ));
    }

    #[test]
    fn test_denied_already_checked_in() {
        let (mut order, rules, item_id, position_id) = order_with_position(10000);
        order.check_in();
        let request = ChangeRequest::new(order.id, Requester::Buyer, vec![swap(position_id, item_id, 12000)]);

        let decision = evaluate(&order, &request, &permissive_config(), &rules, Utc::now());
        assert!(matches!(
            decision,
            ChangeDecision::Denied(ChangeDenialReason::AlreadyCheckedIn)
        ));
    }

    #[test]
    fn test_denied_cross_product_swap() {
        let (order, rules, _item_id, position_id) = order_with_position(10000);
        let other_item = Uuid::new_v4();
        let request = ChangeRequest::new(order.id, Requester::Buyer, vec![swap(position_id, other_item, 12000)]);

        let decision = evaluate(&order, &request, &permissive_config(), &rules, Utc::now());
        assert!(matches!(
            decision,
            ChangeDecision::Denied(ChangeDenialReason::NotPermitted)
        ));
    }

    #[test]
    fn test_denied_variation_swap_disabled() {
        let (order, rules, item_id, position_id) = order_with_position(10000);
        let config = PolicyConfig {
            change_allow_user_variation: false,
            ..permissive_config()
        };
        let request = ChangeRequest::new(order.id, Requester::Buyer, vec![swap(position_id, item_id, 12000)]);

        let decision = evaluate(&order, &request, &config, &rules, Utc::now());
        assert!(matches!(
            decision,
            ChangeDecision::Denied(ChangeDenialReason::NotPermitted)
        ));
    }

    #[test]
    fn test_denied_attendee_when_not_allowed() {
        let (order, rules, item_id, position_id) = order_with_position(10000);
        let request =
            ChangeRequest::new(order.id, Requester::Attendee, vec![swap(position_id, item_id, 10000)]);

        let decision = evaluate(&order, &request, &permissive_config(), &rules, Utc::now());
        assert!(matches!(
            decision,
            ChangeDecision::Denied(ChangeDenialReason::NotPermitted)
        ));
    }

    #[test]
    fn test_denied_cheaper_variation_under_equal_or_higher() {
        let (order, rules, item_id, position_id) = order_with_position(10000);
        let config = PolicyConfig {
            change_allow_user_price: PriceChangeMode::EqualOrHigher,
            ..permissive_config()
        };
        let request = ChangeRequest::new(order.id, Requester::Buyer, vec![swap(position_id, item_id, 8000)]);

        let decision = evaluate(&order, &request, &config, &rules, Utc::now());
        assert!(matches!(
            decision,
            ChangeDecision::Denied(ChangeDenialReason::NotPermitted)
        ));
    }

    #[test]
    fn test_downgrade_emits_refund_instruction() {
        let (order, rules, item_id, position_id) = order_with_position(10000);
        let request = ChangeRequest::new(order.id, Requester::Buyer, vec![swap(position_id, item_id, 8000)]);

        let decision = evaluate(&order, &request, &permissive_config(), &rules, Utc::now());
        match decision {
            ChangeDecision::Allowed { price_delta, refund } => {
                assert_eq!(price_delta, -2000);
                let refund = refund.unwrap();
                assert_eq!(refund.amount, 2000);
                assert_eq!(refund.method, RefundMethod::Direct);
                assert!(matches!(refund.source, RefundSource::Change(id) if id == request.id));
            }
            other => panic!("expected allowed, got {:?}", other),
        }
    }

    #[test]
    fn test_downgrade_refund_as_giftcard() {
        let (order, rules, item_id, position_id) = order_with_position(10000);
        let config = PolicyConfig {
            cancel_allow_user_paid_refund_as_giftcard: true,
            ..permissive_config()
        };
        let request = ChangeRequest::new(order.id, Requester::Buyer, vec![swap(position_id, item_id, 8000)]);

        match evaluate(&order, &request, &config, &rules, Utc::now()) {
            ChangeDecision::Allowed { refund: Some(refund), .. } => {
                assert_eq!(refund.method, RefundMethod::GiftCard);
            }
            other => panic!("expected refund, got {:?}", other),
        }
    }

    #[test]
    fn test_upgrade_requires_external_collection() {
        let (order, rules, item_id, position_id) = order_with_position(10000);
        let request = ChangeRequest::new(order.id, Requester::Buyer, vec![swap(position_id, item_id, 12500)]);

        match evaluate(&order, &request, &permissive_config(), &rules, Utc::now()) {
            ChangeDecision::Allowed { price_delta, refund } => {
                assert_eq!(price_delta, 2500);
                assert!(refund.is_none());
            }
            other => panic!("expected allowed, got {:?}", other),
        }
    }

    #[test]
    fn test_delta_rounded_to_fee_step() {
        let (order, rules, item_id, position_id) = order_with_position(10000);
        let config = PolicyConfig {
            cancel_allow_user_paid_adjust_fees_step: 500,
            ..permissive_config()
        };
        // Raw delta -1230 rounds to the nearest 5.00 step: -1000.
        let request = ChangeRequest::new(order.id, Requester::Buyer, vec![swap(position_id, item_id, 8770)]);

        match evaluate(&order, &request, &config, &rules, Utc::now()) {
            ChangeDecision::Allowed { price_delta, refund } => {
                assert_eq!(price_delta, -1000);
                assert_eq!(refund.unwrap().amount, 1000);
            }
            other => panic!("expected allowed, got {:?}", other),
        }
    }

    #[test]
    fn test_apply_swaps_variation_and_leaves_fees() {
        let (mut order, rules, item_id, position_id) = order_with_position(10000);
        order.add_fee(crate::models::Fee::new("Booking fee", 500, None));
        let fee_total = order.fee_total();

        let new_variation = Uuid::new_v4();
        let request = ChangeRequest::new(
            order.id,
            Requester::Buyer,
            vec![ChangeOperation::VariationSwap {
                position_id,
                item_id,
                new_variation_id: new_variation,
                new_price: 8000,
            }],
        );
        apply(&mut order, &request, &rules);

        let position = order.position(position_id).unwrap();
        assert_eq!(position.variation_id, Some(new_variation));
        assert_eq!(position.price.gross, 8000);
        assert_eq!(order.fee_total(), fee_total);
    }

    #[test]
    fn test_apply_with_unknown_rule_leaves_position_unchanged() {
        let (mut order, _rules, item_id, position_id) = order_with_position(10000);
        let before = order.position(position_id).unwrap().clone();

        // Rule set without the rule the position was priced under.
        let mut other_rules = TaxRuleSet::new();
        other_rules.insert(TaxRule::new("VAT 7%", 7.0, true, false).unwrap());
        let request = ChangeRequest::new(
            order.id,
            Requester::Buyer,
            vec![swap(position_id, item_id, 8000)],
        );
        apply(&mut order, &request, &other_rules);

        let position = order.position(position_id).unwrap();
        assert_eq!(position.variation_id, before.variation_id);
        assert_eq!(position.price, before.price);
    }

    #[test]
    fn test_apply_adds_addon_position() {
        let (mut order, rules, _item_id, position_id) = order_with_position(10000);
        let addon_item = Uuid::new_v4();
        let request = ChangeRequest::new(
            order.id,
            Requester::Buyer,
            vec![ChangeOperation::AddAddon {
                parent_position_id: position_id,
                item_id: addon_item,
                price: 1500,
                tax_rule: None,
            }],
        );
        apply(&mut order, &request, &rules);

        assert_eq!(order.positions.len(), 2);
        let addon = order.positions.iter().find(|p| p.item_id == addon_item).unwrap();
        assert_eq!(addon.addon_to, Some(position_id));
        assert_eq!(addon.price.gross, 1500);
    }
}
