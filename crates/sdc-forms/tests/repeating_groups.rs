mod common;

use std::rc::Rc;

use serde_json::{Value, json};

use common::{answers_of, expression_extension, form, form_with_response, node, question};
use sdc_forms::{AnswerValue, Form, GroupNode, GroupWrapperNode, Node, urls};

fn household() -> Value {
    json!({
        "item": [{
            "linkId": "member",
            "type": "group",
            "repeats": true,
            "item": [
                { "linkId": "name", "type": "string" },
                { "linkId": "works", "type": "boolean" },
                {
                    "linkId": "employer",
                    "type": "string",
                    "enableWhen": [{ "question": "works", "operator": "=", "answerBoolean": true }]
                }
            ]
        }]
    })
}

fn wrapper(form: &Form) -> Rc<GroupWrapperNode> {
    node(form, "member")
        .as_wrapper()
        .cloned()
        .expect("repeating groups are wrapped")
}

fn child(instance: &Rc<GroupNode>, link_id: &str) -> Node {
    instance
        .children()
        .iter()
        .find(|node| node.link_id() == link_id)
        .cloned()
        .unwrap_or_else(|| panic!("`{link_id}` should exist in {}", instance.token()))
}

fn seeded() -> Form {
    form_with_response(
        household(),
        json!({ "item": [
            { "linkId": "member", "item": [
                { "linkId": "name", "answer": [{ "valueString": "Ada" }] },
                { "linkId": "works", "answer": [{ "valueBoolean": true }] }
            ] },
            { "linkId": "member", "item": [
                { "linkId": "name", "answer": [{ "valueString": "Charles" }] },
                { "linkId": "works", "answer": [{ "valueBoolean": false }] }
            ] }
        ] }),
    )
}

#[test]
fn instances_are_seeded_from_the_response() {
    let form = seeded();
    let tokens: Vec<String> = wrapper(&form)
        .instances()
        .iter()
        .map(|instance| instance.token().to_string())
        .collect();
    assert_eq!(tokens, vec!["member/0", "member/1"]);
    assert_eq!(form.response().item.len(), 2);
}

#[test]
fn enable_when_resolves_within_each_instance() {
    let form = seeded();
    let instances = wrapper(&form).instances();
    assert!(child(&instances[0], "employer").is_enabled());
    assert!(!child(&instances[1], "employer").is_enabled());

    child(&instances[1], "works")
        .as_question()
        .expect("works is a question")
        .set_value_by_user(Some(AnswerValue::Boolean(true)));
    assert!(child(&instances[1], "employer").is_enabled());
}

#[test]
fn instances_can_be_added_and_removed() {
    let form = seeded();
    let members = wrapper(&form);
    let added = members.add_instance().expect("unbounded groups grow");
    assert_eq!(added.token(), "member/2");
    assert_eq!(members.instances().len(), 3);

    assert!(members.remove_instance(&members.instances()[0]));
    let tokens: Vec<String> = members
        .instances()
        .iter()
        .map(|instance| instance.token().to_string())
        .collect();
    assert_eq!(tokens, vec!["member/1", "member/2"]);

    let persisted = form.response();
    assert_eq!(persisted.item.len(), 1, "the empty new instance is not persisted");
}

#[test]
fn required_repeating_groups_keep_one_instance() {
    let form = form(json!({
        "item": [{
            "linkId": "member",
            "type": "group",
            "repeats": true,
            "required": true,
            "item": [{ "linkId": "name", "type": "string" }]
        }]
    }));
    let members = wrapper(&form);
    assert_eq!(members.instances().len(), 1);
    assert!(!members.can_remove());
    assert!(!members.remove_instance(&members.instances()[0]));

    assert!(!form.validate_all());
    let issues = form.all_issues();
    assert_eq!(issues.len(), 1);
    assert_eq!(issues[0].expression.as_deref(), Some("member"));
}

#[test]
fn optional_repeating_groups_start_empty() {
    let form = form(household());
    assert!(wrapper(&form).instances().is_empty());
    assert!(form.validate_all());
}

#[test]
fn removed_instances_release_nested_calculations() {
    let form = form(json!({
        "item": [
            { "linkId": "base", "type": "integer" },
            {
                "linkId": "member",
                "type": "group",
                "repeats": true,
                "item": [{ "linkId": "echo", "type": "integer", "extension": [
                    expression_extension(urls::CALCULATED_EXPRESSION, json!({
                        "op": "sum", "expressions": [answers_of("base")]
                    }))
                ] }]
            }
        ]
    }));
    let members = wrapper(&form);
    let first = members.add_instance().expect("optional groups can grow");
    let second = members.add_instance().expect("unbounded groups can grow");
    question(&form, "base").set_value_by_user(Some(AnswerValue::Integer(1)));

    let removed_echo = child(&first, "echo")
        .as_question()
        .cloned()
        .expect("echo is a question");
    let kept_echo = child(&second, "echo")
        .as_question()
        .cloned()
        .expect("echo is a question");
    assert_eq!(removed_echo.answer_values(), vec![AnswerValue::Integer(1)]);

    assert!(members.remove_instance(&first));
    question(&form, "base").set_value_by_user(Some(AnswerValue::Integer(5)));

    assert_eq!(removed_echo.answer_values(), vec![AnswerValue::Integer(1)]);
    assert_eq!(kept_echo.answer_values(), vec![AnswerValue::Integer(5)]);
    assert_eq!(members.instances().len(), 1);
}
