mod common;

use proptest::prelude::*;
use serde_json::{Value, json};

use common::{answers_of, expression_extension, form, form_with_config, node, question};
use sdc_forms::{AnswerValue, FormConfig, urls};

fn bounded_repeating(min: i64, max: i64) -> Value {
    json!({
        "item": [{
            "linkId": "meds",
            "type": "string",
            "repeats": true,
            "extension": [
                { "url": urls::MIN_OCCURS, "valueInteger": min },
                { "url": urls::MAX_OCCURS, "valueInteger": max }
            ]
        }]
    })
}

#[test]
fn baseline_seeds_empty_answers_up_to_min_occurs() {
    let form = form(bounded_repeating(2, 3));
    let meds = question(&form, "meds");
    assert_eq!(meds.min_occurs(), 2);
    assert_eq!(meds.max_occurs(), Some(3));
    assert_eq!(meds.answers().len(), 2);
    assert!(meds.answers().iter().all(|answer| answer.value().is_none()));
    assert!(!meds.can_remove());
    assert!(meds.can_add());
}

#[test]
fn seeding_stops_at_the_configured_ceiling() {
    let config = FormConfig {
        max_seeded_repeats: 4,
        ..FormConfig::default()
    };
    let form = form_with_config(
        json!({
            "item": [
                {
                    "linkId": "meds",
                    "type": "string",
                    "repeats": true,
                    "extension": [{ "url": urls::MIN_OCCURS, "valueInteger": 1_000_000 }]
                },
                {
                    "linkId": "visit",
                    "type": "group",
                    "repeats": true,
                    "extension": [{ "url": urls::MIN_OCCURS, "valueInteger": 1_000_000 }],
                    "item": [{ "linkId": "date", "type": "date" }]
                }
            ]
        }),
        config,
    );
    assert_eq!(question(&form, "meds").answers().len(), 4);
    let visits = node(&form, "visit")
        .as_wrapper()
        .cloned()
        .expect("repeating groups are wrapped");
    assert_eq!(visits.instances().len(), 4);
}

#[test]
fn add_and_remove_respect_the_bounds() {
    let form = form(bounded_repeating(1, 2));
    let meds = question(&form, "meds");
    assert_eq!(meds.answers().len(), 1);

    let second = meds
        .add_answer(Some(AnswerValue::String("aspirin".into())))
        .expect("capacity for a second answer");
    assert!(meds.add_answer(None).is_none());
    assert_eq!(meds.answers().len(), 2);

    assert!(meds.remove_answer(&second));
    let only = meds.answers()[0].clone();
    assert!(!meds.remove_answer(&only));
    assert_eq!(meds.answers().len(), 1);
}

#[test]
fn answer_tokens_stay_unique_after_removal() {
    let form = form(bounded_repeating(0, 5));
    let meds = question(&form, "meds");
    let first = meds.add_answer(None).expect("add");
    let second = meds.add_answer(None).expect("add");
    assert_eq!(first.token(), "meds/0");
    assert_eq!(second.token(), "meds/1");
    assert!(meds.remove_answer(&first));
    let third = meds.add_answer(None).expect("add");
    assert_eq!(third.token(), "meds/2");
}

#[test]
fn required_defaults_min_occurs_to_one() {
    let form = form(json!({
        "item": [
            { "linkId": "name", "type": "string", "required": true },
            { "linkId": "nick", "type": "string" }
        ]
    }));
    let name = question(&form, "name");
    assert_eq!(name.min_occurs(), 1);
    assert_eq!(name.answers().len(), 1);
    assert_eq!(question(&form, "nick").min_occurs(), 0);
    assert!(question(&form, "nick").answers().is_empty());
}

#[test]
fn non_repeating_questions_hold_at_most_one_answer() {
    let form = form(json!({
        "item": [{ "linkId": "single", "type": "integer" }]
    }));
    let single = question(&form, "single");
    assert_eq!(single.max_occurs(), Some(1));
    single.add_answer(Some(AnswerValue::Integer(1))).expect("first answer");
    assert!(single.add_answer(Some(AnswerValue::Integer(2))).is_none());
    assert!(single.set_value_by_user(Some(AnswerValue::Integer(3))));
    assert_eq!(single.answer_values(), vec![AnswerValue::Integer(3)]);
}

#[test]
fn min_occurs_follows_its_expression() {
    let form = form(json!({
        "item": [
            { "linkId": "count", "type": "integer" },
            { "linkId": "names", "type": "string", "repeats": true, "extension": [{
                "url": urls::MIN_OCCURS,
                "valueExpression": common::expression(answers_of("count"))
            }] }
        ]
    }));
    let names = question(&form, "names");
    assert_eq!(names.min_occurs(), 0);
    question(&form, "count").set_value_by_user(Some(AnswerValue::Integer(3)));
    assert_eq!(names.min_occurs(), 3);
    assert_eq!(names.answers().len(), 3);

    question(&form, "count").set_value_by_user(Some(AnswerValue::Integer(-2)));
    assert_eq!(names.min_occurs(), 0);
}

#[test]
fn max_occurs_expression_caps_additions() {
    let form = form(json!({
        "item": [{
            "linkId": "names",
            "type": "string",
            "repeats": true,
            "extension": [
                expression_extension(urls::MAX_OCCURS, json!({ "op": "literal", "value": 2 }))
            ]
        }]
    }));
    let names = question(&form, "names");
    assert_eq!(names.max_occurs(), Some(2));
    names.add_answer(None).expect("first");
    names.add_answer(None).expect("second");
    assert!(names.add_answer(None).is_none());
}

#[derive(Debug, Clone)]
enum Op {
    Add,
    Remove(usize),
}

fn op() -> impl Strategy<Value = Op> {
    prop_oneof![Just(Op::Add), (0usize..6).prop_map(Op::Remove)]
}

proptest! {
    #[test]
    fn answer_count_stays_within_occurs(
        min in 0i64..3,
        extra in 0i64..3,
        ops in proptest::collection::vec(op(), 0..24),
    ) {
        let max = min + extra.max(1);
        let form = form(bounded_repeating(min, max));
        let meds = question(&form, "meds");
        for op in ops {
            match op {
                Op::Add => {
                    meds.add_answer(Some(AnswerValue::String("x".into())));
                }
                Op::Remove(index) => {
                    let answers = meds.answers();
                    if let Some(answer) = answers.get(index % answers.len().max(1)) {
                        meds.remove_answer(answer);
                    }
                }
            }
            let len = meds.answers().len() as i64;
            prop_assert!(len >= min, "{len} answers below min {min}");
            prop_assert!(len <= max, "{len} answers above max {max}");
        }
    }
}
