//! `enableWhen` evaluation.

use std::cmp::Ordering;

use crate::node::{Node, NodeBase};
use crate::template::{EnableBehavior, EnableWhen, EnableWhenOperator};
use crate::value::{AnswerType, AnswerValue};

/// A node's own enablement: its enable expression if declared, else its
/// `enableWhen` conditions resolved through its scope.
pub(crate) fn own_enablement(base: &NodeBase) -> bool {
    if let Some(slot) = &base.registry.enable_when {
        return slot.boolean(&base.ctx).unwrap_or(false);
    }
    evaluate(
        &base.template.enable_when,
        base.template.enable_behavior(),
        |link_id| base.scope.lookup_node(link_id),
    )
}

/// Combines `conditions` with `behavior`; no conditions means enabled.
pub(crate) fn evaluate(
    conditions: &[EnableWhen],
    behavior: EnableBehavior,
    lookup: impl Fn(&str) -> Option<Node>,
) -> bool {
    if conditions.is_empty() {
        return true;
    }
    let mut results = conditions
        .iter()
        .map(|condition| target_satisfies(condition, lookup(&condition.question)));
    match behavior {
        EnableBehavior::Any => results.any(|holds| holds),
        EnableBehavior::All => results.all(|holds| holds),
    }
}

fn target_satisfies(condition: &EnableWhen, target: Option<Node>) -> bool {
    let Some(node) = target else {
        return false;
    };
    let Some(question) = node.as_question() else {
        return false;
    };
    // A disabled target has no answers as far as conditions are concerned.
    let answers = if node.is_enabled() {
        question.answer_values()
    } else {
        Vec::new()
    };
    condition_holds(condition, question.answer_type(), &answers)
}

/// One condition against the target's answer values.
pub(crate) fn condition_holds(
    condition: &EnableWhen,
    kind: AnswerType,
    answers: &[AnswerValue],
) -> bool {
    let meaningful: Vec<&AnswerValue> = answers
        .iter()
        .filter(|value| value.is_meaningful())
        .collect();

    match condition.operator {
        EnableWhenOperator::Exists => match condition.expected() {
            Some(AnswerValue::Boolean(expected)) if condition.answer_count() == 1 => {
                !meaningful.is_empty() == expected
            }
            _ => false,
        },
        // `=` and `!=` only see the `answer[x]` matching the target's type.
        EnableWhenOperator::Equal => condition
            .expected_as(kind)
            .is_some_and(|expected| meaningful.iter().any(|value| value.type_eq(&expected))),
        EnableWhenOperator::NotEqual => condition.expected_as(kind).is_some_and(|expected| {
            meaningful.iter().any(|value| {
                value.answer_type() == expected.answer_type() && !value.type_eq(&expected)
            })
        }),
        EnableWhenOperator::Greater
        | EnableWhenOperator::Less
        | EnableWhenOperator::GreaterOrEqual
        | EnableWhenOperator::LessOrEqual => {
            if !kind.is_ordered() {
                return false;
            }
            let Some(expected) = condition.expected_as(kind) else {
                return false;
            };
            meaningful.iter().any(|value| {
                value
                    .compare(&expected)
                    .is_some_and(|ordering| operator_accepts(condition.operator, ordering))
            })
        }
    }
}

fn operator_accepts(operator: EnableWhenOperator, ordering: Ordering) -> bool {
    match operator {
        EnableWhenOperator::Greater => ordering.is_gt(),
        EnableWhenOperator::Less => ordering.is_lt(),
        EnableWhenOperator::GreaterOrEqual => ordering.is_ge(),
        EnableWhenOperator::LessOrEqual => ordering.is_le(),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::Quantity;
    use serde_json::json;

    fn condition(value: serde_json::Value) -> EnableWhen {
        serde_json::from_value(value).expect("fixture should deserialize")
    }

    #[test]
    fn exists_ignores_blank_strings() {
        let exists = condition(json!({
            "question": "control", "operator": "exists", "answerBoolean": true
        }));
        let blank = [AnswerValue::String("   ".into())];
        let filled = [AnswerValue::String("hi".into())];
        assert!(!condition_holds(&exists, AnswerType::String, &blank));
        assert!(condition_holds(&exists, AnswerType::String, &filled));

        let missing = condition(json!({
            "question": "control", "operator": "exists", "answerBoolean": false
        }));
        assert!(condition_holds(&missing, AnswerType::String, &blank));
    }

    #[test]
    fn exists_ignores_the_condition_id_and_extensions() {
        let exists = condition(json!({
            "id": "ew1",
            "extension": [{ "url": "http://example.org/note", "valueString": "x" }],
            "question": "control", "operator": "exists", "answerBoolean": true
        }));
        assert!(condition_holds(
            &exists,
            AnswerType::String,
            &[AnswerValue::String("hi".into())]
        ));
    }

    #[test]
    fn equality_operators_agree_on_mismatched_answer_types() {
        let eq = condition(json!({ "question": "n", "operator": "=", "answerDecimal": 3 }));
        let ne = condition(json!({ "question": "n", "operator": "!=", "answerDecimal": 3 }));
        let gt = condition(json!({ "question": "n", "operator": ">", "answerDecimal": 1 }));
        let answers = [AnswerValue::Integer(3)];
        assert!(!condition_holds(&eq, AnswerType::Integer, &answers));
        assert!(!condition_holds(&ne, AnswerType::Integer, &answers));
        assert!(!condition_holds(&gt, AnswerType::Integer, &answers));

        let uri = condition(json!({ "question": "s", "operator": "!=", "answerUri": "a" }));
        assert!(!condition_holds(&uri, AnswerType::String, &[AnswerValue::String("b".into())]));
    }

    #[test]
    fn exists_with_a_non_boolean_expectation_is_false() {
        let invalid = condition(json!({
            "question": "control", "operator": "exists", "answerString": "x"
        }));
        assert!(!condition_holds(
            &invalid,
            AnswerType::String,
            &[AnswerValue::String("x".into())]
        ));
    }

    #[test]
    fn not_equal_needs_a_comparable_answer() {
        let ne = condition(json!({ "question": "n", "operator": "!=", "answerInteger": 3 }));
        assert!(!condition_holds(&ne, AnswerType::Integer, &[]));
        assert!(!condition_holds(&ne, AnswerType::Integer, &[AnswerValue::Integer(3)]));
        assert!(condition_holds(
            &ne,
            AnswerType::Integer,
            &[AnswerValue::Integer(3), AnswerValue::Integer(4)]
        ));
    }

    #[test]
    fn equal_without_a_matching_answer_property_is_false() {
        let eq = condition(json!({ "question": "n", "operator": "=", "answerString": "3" }));
        assert!(!condition_holds(&eq, AnswerType::Integer, &[AnswerValue::Integer(3)]));
    }

    #[test]
    fn ordering_is_an_or_across_repeats() {
        let gte = condition(json!({ "question": "n", "operator": ">=", "answerInteger": 3 }));
        let answers = [AnswerValue::Integer(1), AnswerValue::Integer(5)];
        assert!(condition_holds(&gte, AnswerType::Integer, &answers));
        assert!(!condition_holds(&gte, AnswerType::Integer, &answers[..1]));
    }

    #[test]
    fn quantity_ordering_requires_matching_units() {
        let gt = condition(json!({
            "question": "w", "operator": ">",
            "answerQuantity": { "value": 50, "unit": "kg" }
        }));
        let pounds = [AnswerValue::Quantity(Quantity::new(150.0, "lb"))];
        let kilos = [AnswerValue::Quantity(Quantity::new(60.0, "kg"))];
        assert!(!condition_holds(&gt, AnswerType::Quantity, &pounds));
        assert!(condition_holds(&gt, AnswerType::Quantity, &kilos));
    }

    #[test]
    fn ordering_on_codings_is_unsupported() {
        let gt = condition(json!({
            "question": "c", "operator": ">", "answerCoding": { "code": "a" }
        }));
        let answers = [AnswerValue::Coding(crate::value::Coding::new("s", "b"))];
        assert!(!condition_holds(&gt, AnswerType::Coding, &answers));
    }

    #[test]
    fn empty_condition_lists_enable() {
        assert!(evaluate(&[], EnableBehavior::All, |_| None));
        let missing = condition(json!({ "question": "x", "operator": "exists", "answerBoolean": true }));
        assert!(!evaluate(&[missing], EnableBehavior::Any, |_| None));
    }
}
