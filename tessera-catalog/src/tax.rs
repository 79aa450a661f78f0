use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A configurable tax rule attached to an event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaxRule {
    pub id: Uuid,
    pub name: String,
    /// Tax rate in percent, e.g. 19.0 for 19 %.
    pub rate: f64,
    /// When set, listed prices already contain the tax.
    pub price_includes_tax: bool,
    /// EU reverse charge: liability shifts to the buyer, no tax is charged.
    pub eu_reverse_charge: bool,
    pub default: bool,
}

/// Price split produced by applying a tax rule. All amounts are minor
/// currency units; `net + tax` always equals `gross`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct TaxedPrice {
    pub gross: i64,
    pub net: i64,
    pub tax: i64,
    pub rule: Uuid,
}

impl TaxRule {
    pub fn new(
        name: impl Into<String>,
        rate: f64,
        price_includes_tax: bool,
        eu_reverse_charge: bool,
    ) -> Result<Self, TaxError> {
        if rate < 0.0 {
            return Err(TaxError::InvalidRate(rate));
        }
        Ok(Self {
            id: Uuid::new_v4(),
            name: name.into(),
            rate,
            price_includes_tax,
            eu_reverse_charge,
            default: false,
        })
    }

    /// Whether this rule actually charges tax.
    pub fn tax_applicable(&self) -> bool {
        !self.eu_reverse_charge && self.rate > 0.0
    }

    /// Split a price into net and tax under this rule.
    ///
    /// Reverse-charge rules suppress the tax but are still recorded on the
    /// resulting price for compliance reporting.
    pub fn tax(&self, price: i64) -> TaxedPrice {
        if !self.tax_applicable() {
            return TaxedPrice {
                gross: price,
                net: price,
                tax: 0,
                rule: self.id,
            };
        }

        if self.price_includes_tax {
            // Price is gross; carve the tax out so net + tax == price exactly.
            let tax = round_cents(price as f64 * self.rate / (100.0 + self.rate));
            TaxedPrice {
                gross: price,
                net: price - tax,
                tax,
                rule: self.id,
            }
        } else {
            let tax = round_cents(price as f64 * self.rate / 100.0);
            TaxedPrice {
                gross: price + tax,
                net: price,
                tax,
                rule: self.id,
            }
        }
    }
}

/// Round to the nearest minor currency unit, ties away from zero.
fn round_cents(value: f64) -> i64 {
    value.round() as i64
}

/// The set of tax rules configured for one event.
///
/// Maintains the invariant that exactly one rule carries `default = true`
/// as long as the set is non-empty.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TaxRuleSet {
    rules: Vec<TaxRule>,
}

impl TaxRuleSet {
    pub fn new() -> Self {
        Self { rules: Vec::new() }
    }

    /// Add a rule to the set. The first rule added becomes the default; a
    /// rule added with `default = true` displaces the previous default.
    pub fn insert(&mut self, mut rule: TaxRule) -> Uuid {
        if self.rules.is_empty() {
            rule.default = true;
        } else if rule.default {
            for existing in &mut self.rules {
                existing.default = false;
            }
        }
        let id = rule.id;
        self.rules.push(rule);
        id
    }

    /// Make `rule_id` the default, clearing the flag on all siblings in the
    /// same mutation.
    pub fn set_default(&mut self, rule_id: Uuid) -> Result<(), TaxError> {
        if !self.rules.iter().any(|r| r.id == rule_id) {
            return Err(TaxError::RuleNotFound(rule_id));
        }
        for rule in &mut self.rules {
            rule.default = rule.id == rule_id;
        }
        Ok(())
    }

    pub fn get(&self, rule_id: Uuid) -> Option<&TaxRule> {
        self.rules.iter().find(|r| r.id == rule_id)
    }

    pub fn default_rule(&self) -> Option<&TaxRule> {
        self.rules.iter().find(|r| r.default)
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum TaxError {
    #[error("Invalid tax rate: {0}")]
    InvalidRate(f64),

    #[error("Tax rule not found: {0}")]
    RuleNotFound(Uuid),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_inclusive_split_preserves_gross() {
        let rule = TaxRule::new("VAT 19%", 19.0, true, false).unwrap();

        // 100.00 gross at 19 % inclusive: tax = 15.97, net = 84.03
        let price = rule.tax(10000);
        assert_eq!(price.tax, 1597);
        assert_eq!(price.net, 8403);
        assert_eq!(price.net + price.tax, price.gross);

        // Property holds for awkward amounts too.
        for gross in [1, 99, 333, 12345, 999999] {
            let p = rule.tax(gross);
            assert_eq!(p.net + p.tax, gross);
        }
    }

    #[test]
    fn test_exclusive_adds_tax_on_top() {
        let rule = TaxRule::new("VAT 7%", 7.0, false, false).unwrap();

        let price = rule.tax(10000);
        assert_eq!(price.net, 10000);
        assert_eq!(price.tax, 700);
        assert_eq!(price.gross, 10700);
    }

    #[test]
    fn test_reverse_charge_suppresses_tax() {
        let rule = TaxRule::new("Reverse charge", 19.0, true, true).unwrap();

        let price = rule.tax(10000);
        assert_eq!(price.tax, 0);
        assert_eq!(price.net, 10000);
        // Rule reference is still recorded for compliance reporting.
        assert_eq!(price.rule, rule.id);
    }

    #[test]
    fn test_negative_rate_rejected() {
        assert!(matches!(
            TaxRule::new("Broken", -1.0, true, false),
            Err(TaxError::InvalidRate(_))
        ));
    }

    #[test]
    fn test_single_default_invariant() {
        let mut set = TaxRuleSet::new();
        let first = set.insert(TaxRule::new("VAT 19%", 19.0, true, false).unwrap());
        let second = set.insert(TaxRule::new("VAT 7%", 7.0, true, false).unwrap());

        // First inserted rule is the default.
        assert_eq!(set.default_rule().unwrap().id, first);

        set.set_default(second).unwrap();
        let defaults: Vec<_> = [first, second]
            .into_iter()
            .filter(|id| set.get(*id).unwrap().default)
            .collect();
        assert_eq!(defaults.len(), 1);
        assert_eq!(set.default_rule().unwrap().id, second);
    }

    #[test]
    fn test_set_default_unknown_rule() {
        let mut set = TaxRuleSet::new();
        set.insert(TaxRule::new("VAT 19%", 19.0, true, false).unwrap());

        assert!(matches!(
            set.set_default(Uuid::new_v4()),
            Err(TaxError::RuleNotFound(_))
        ));
    }
}
