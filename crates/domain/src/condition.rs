use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::path::resolve;

/// Comparison operator used by condition leaves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConditionOperator {
    /// Deep equality after numeric coercion.
    Eq,
    /// Negated deep equality; true when the field is missing.
    Neq,
    /// Ordered greater-than comparison.
    Gt,
    /// Ordered greater-or-equal comparison.
    Gte,
    /// Ordered less-than comparison.
    Lt,
    /// Ordered less-or-equal comparison.
    Lte,
    /// Membership of the field value in the configured array.
    In,
    /// Substring of a string field or element of an array field.
    Contains,
    /// Regular-expression match over the field rendered as a string.
    Regex,
}

impl ConditionOperator {
    /// Returns stable configuration value.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Eq => "eq",
            Self::Neq => "neq",
            Self::Gt => "gt",
            Self::Gte => "gte",
            Self::Lt => "lt",
            Self::Lte => "lte",
            Self::In => "in",
            Self::Contains => "contains",
            Self::Regex => "regex",
        }
    }
}

/// Boolean expression tree evaluated against an execution context.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Condition {
    /// Conjunction; empty list evaluates to true.
    All {
        /// Child conditions combined with logical AND.
        and: Vec<Condition>,
    },
    /// Disjunction; empty list evaluates to false.
    Any {
        /// Child conditions combined with logical OR.
        or: Vec<Condition>,
    },
    /// Negation of the inner condition.
    Not {
        /// Inverted child condition.
        not: Box<Condition>,
    },
    /// Leaf comparison of one resolved field against a configured value.
    Leaf {
        /// Dotted path resolved against the evaluation root.
        field: String,
        /// Comparison operator.
        operator: ConditionOperator,
        /// Comparison value; optional only in the serialized form.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        value: Option<Value>,
    },
}

impl Condition {
    /// Evaluates the condition against an evaluation root.
    ///
    /// Pure and total: malformed leaves (missing value, uncompilable regex)
    /// evaluate to false rather than erroring. Composites short-circuit.
    #[must_use]
    pub fn evaluate(&self, root: &Value) -> bool {
        match self {
            Self::All { and } => and.iter().all(|child| child.evaluate(root)),
            Self::Any { or } => or.iter().any(|child| child.evaluate(root)),
            Self::Not { not } => !not.evaluate(root),
            Self::Leaf {
                field,
                operator,
                value,
            } => evaluate_leaf(root, field.as_str(), *operator, value.as_ref()),
        }
    }
}

fn evaluate_leaf(
    root: &Value,
    field: &str,
    operator: ConditionOperator,
    expected: Option<&Value>,
) -> bool {
    let Some(actual) = resolve(root, field) else {
        // A missing field fails every comparison except "not equal".
        return operator == ConditionOperator::Neq;
    };

    let Some(expected) = expected else {
        return false;
    };

    match operator {
        ConditionOperator::Eq => values_equal(actual, expected),
        ConditionOperator::Neq => !values_equal(actual, expected),
        ConditionOperator::Gt => compare_ordered(actual, expected)
            .is_some_and(|ordering| ordering == std::cmp::Ordering::Greater),
        ConditionOperator::Gte => compare_ordered(actual, expected)
            .is_some_and(|ordering| ordering != std::cmp::Ordering::Less),
        ConditionOperator::Lt => compare_ordered(actual, expected)
            .is_some_and(|ordering| ordering == std::cmp::Ordering::Less),
        ConditionOperator::Lte => compare_ordered(actual, expected)
            .is_some_and(|ordering| ordering != std::cmp::Ordering::Greater),
        ConditionOperator::In => expected
            .as_array()
            .is_some_and(|candidates| candidates.iter().any(|entry| values_equal(actual, entry))),
        ConditionOperator::Contains => match actual {
            Value::String(text) => expected
                .as_str()
                .is_some_and(|needle| text.contains(needle)),
            Value::Array(entries) => entries.iter().any(|entry| values_equal(entry, expected)),
            _ => false,
        },
        ConditionOperator::Regex => expected.as_str().is_some_and(|pattern| {
            Regex::new(pattern)
                .map(|regex| regex.is_match(render_as_text(actual).as_str()))
                .unwrap_or(false)
        }),
    }
}

/// Deep equality with integer/float coercion at the top level.
fn values_equal(left: &Value, right: &Value) -> bool {
    if let (Some(left_number), Some(right_number)) = (left.as_f64(), right.as_f64()) {
        return left_number == right_number;
    }

    left == right
}

/// Orders two values as numbers when both coerce, otherwise as strings.
fn compare_ordered(left: &Value, right: &Value) -> Option<std::cmp::Ordering> {
    if let (Some(left_number), Some(right_number)) = (numeric(left), numeric(right)) {
        return left_number.partial_cmp(&right_number);
    }

    match (left, right) {
        (Value::String(left_text), Value::String(right_text)) => {
            Some(left_text.as_str().cmp(right_text.as_str()))
        }
        _ => None,
    }
}

fn numeric(value: &Value) -> Option<f64> {
    value
        .as_f64()
        .or_else(|| value.as_str().and_then(|text| text.parse::<f64>().ok()))
}

fn render_as_text(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;
    use serde_json::{Value, json};

    use super::{Condition, ConditionOperator};

    fn leaf(field: &str, operator: ConditionOperator, value: Value) -> Condition {
        Condition::Leaf {
            field: field.to_owned(),
            operator,
            value: Some(value),
        }
    }

    #[test]
    fn deserializes_spec_shapes() {
        let parsed: Condition = serde_json::from_value(json!({
            "and": [
                {"field": "trigger.order.total", "operator": "gt", "value": 1000},
                {"not": {"field": "trigger.order.test", "operator": "eq", "value": true}},
            ]
        }))
        .unwrap();

        let root = json!({"trigger": {"order": {"total": 1500}}});
        assert!(parsed.evaluate(&root));
    }

    #[test]
    fn numeric_coercion_applies_to_equality() {
        let root = json!({"amount": 10});
        assert!(leaf("amount", ConditionOperator::Eq, json!(10.0)).evaluate(&root));
    }

    #[test]
    fn missing_field_is_true_only_for_neq() {
        let root = json!({});
        assert!(leaf("absent", ConditionOperator::Neq, json!(1)).evaluate(&root));
        assert!(!leaf("absent", ConditionOperator::Eq, json!(1)).evaluate(&root));
        assert!(!leaf("absent", ConditionOperator::Gt, json!(1)).evaluate(&root));
        assert!(!leaf("absent", ConditionOperator::In, json!([1])).evaluate(&root));
    }

    #[test]
    fn ordered_comparison_requires_comparable_sides() {
        let root = json!({"total": "150", "name": "beta", "flag": true});
        assert!(leaf("total", ConditionOperator::Gt, json!(100)).evaluate(&root));
        assert!(leaf("name", ConditionOperator::Gt, json!("alpha")).evaluate(&root));
        assert!(!leaf("flag", ConditionOperator::Gt, json!(0)).evaluate(&root));
    }

    #[test]
    fn contains_covers_substrings_and_array_membership() {
        let root = json!({"sku": "ab-123", "tags": ["hot", "new"]});
        assert!(leaf("sku", ConditionOperator::Contains, json!("-12")).evaluate(&root));
        assert!(leaf("tags", ConditionOperator::Contains, json!("new")).evaluate(&root));
        assert!(!leaf("tags", ConditionOperator::Contains, json!("old")).evaluate(&root));
    }

    #[test]
    fn in_matches_by_coerced_equality() {
        let root = json!({"code": 7});
        assert!(leaf("code", ConditionOperator::In, json!([5, 7.0, 9])).evaluate(&root));
        assert!(!leaf("code", ConditionOperator::In, json!("7")).evaluate(&root));
    }

    #[test]
    fn uncompilable_regex_evaluates_to_false() {
        let root = json!({"sku": "ab-123"});
        assert!(leaf("sku", ConditionOperator::Regex, json!("^ab-")).evaluate(&root));
        assert!(!leaf("sku", ConditionOperator::Regex, json!("(unclosed")).evaluate(&root));
    }

    #[test]
    fn empty_composites_have_identity_semantics() {
        let root = json!({});
        assert!(Condition::All { and: Vec::new() }.evaluate(&root));
        assert!(!Condition::Any { or: Vec::new() }.evaluate(&root));
    }

    fn arbitrary_condition() -> impl Strategy<Value = Condition> {
        let operator = prop_oneof![
            Just(ConditionOperator::Eq),
            Just(ConditionOperator::Neq),
            Just(ConditionOperator::Gt),
            Just(ConditionOperator::Lte),
            Just(ConditionOperator::In),
            Just(ConditionOperator::Contains),
        ];
        let leaf = ("[a-c]{1,3}", operator, any::<i64>()).prop_map(|(field, operator, value)| {
            Condition::Leaf {
                field,
                operator,
                value: Some(Value::from(value)),
            }
        });

        leaf.prop_recursive(3, 12, 3, |inner| {
            prop_oneof![
                proptest::collection::vec(inner.clone(), 0..3).prop_map(|and| Condition::All { and }),
                proptest::collection::vec(inner.clone(), 0..3).prop_map(|or| Condition::Any { or }),
                inner.prop_map(|child| Condition::Not {
                    not: Box::new(child)
                }),
            ]
        })
    }

    fn arbitrary_root() -> impl Strategy<Value = Value> {
        proptest::collection::hash_map("[a-c]{1,3}", any::<i64>(), 0..4)
            .prop_map(|entries| serde_json::json!(entries))
    }

    proptest! {
        #[test]
        fn negation_round_trips(condition in arbitrary_condition(), root in arbitrary_root()) {
            let negated = Condition::Not { not: Box::new(condition.clone()) };
            prop_assert_eq!(negated.evaluate(&root), !condition.evaluate(&root));
        }

        #[test]
        fn de_morgan_holds(
            left in arbitrary_condition(),
            right in arbitrary_condition(),
            root in arbitrary_root(),
        ) {
            let not = |condition: Condition| Condition::Not { not: Box::new(condition) };
            let conjunction = Condition::All { and: vec![left.clone(), right.clone()] };
            let disjunction_of_negations = Condition::Any {
                or: vec![not(left), not(right)],
            };

            prop_assert_eq!(
                not(conjunction).evaluate(&root),
                disjunction_of_negations.evaluate(&root)
            );
        }
    }
}
