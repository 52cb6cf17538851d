#![allow(dead_code)]

use std::rc::Rc;

use serde_json::{Value, json};

use sdc_forms::{
    Form, FormConfig, JSON_EXPR_LANGUAGE, Node, Questionnaire, QuestionnaireResponse,
    QuestionNode,
};

pub fn questionnaire(value: Value) -> Questionnaire {
    serde_json::from_value(value).expect("fixture should deserialize")
}

pub fn response(value: Value) -> QuestionnaireResponse {
    serde_json::from_value(value).expect("fixture should deserialize")
}

pub fn form(value: Value) -> Form {
    Form::new(questionnaire(value)).expect("form should build")
}

pub fn form_with_response(value: Value, seed: Value) -> Form {
    Form::builder(questionnaire(value))
        .with_response(response(seed))
        .build()
        .expect("form should build")
}

pub fn form_with_config(value: Value, config: FormConfig) -> Form {
    Form::builder(questionnaire(value))
        .with_config(config)
        .build()
        .expect("form should build")
}

/// `valueExpression` payload carrying a JSON expression tree.
pub fn expression(tree: Value) -> Value {
    json!({ "language": JSON_EXPR_LANGUAGE, "expression": tree.to_string() })
}

/// Extension at `url` whose value is the expression `tree`.
pub fn expression_extension(url: &str, tree: Value) -> Value {
    json!({ "url": url, "valueExpression": expression(tree) })
}

pub fn answers_of(link_id: &str) -> Value {
    json!({ "op": "answers", "link_id": link_id })
}

pub fn literal(value: Value) -> Value {
    json!({ "op": "literal", "value": value })
}

pub fn node(form: &Form, link_id: &str) -> Node {
    form.find(link_id)
        .unwrap_or_else(|| panic!("node `{link_id}` should exist"))
}

pub fn question(form: &Form, link_id: &str) -> Rc<QuestionNode> {
    node(form, link_id)
        .as_question()
        .cloned()
        .unwrap_or_else(|| panic!("`{link_id}` should be a question"))
}
