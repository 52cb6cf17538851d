mod common;

use serde_json::json;

use common::{form, node, question};
use sdc_forms::{AnswerValue, FormConfig, IssueCode, Severity, urls};

fn codes(form: &sdc_forms::Form) -> Vec<IssueCode> {
    form.all_issues().into_iter().map(|issue| issue.code).collect()
}

#[test]
fn required_questions_block_submission_until_answered() {
    let form = form(json!({
        "item": [{ "linkId": "name", "type": "string", "required": true }]
    }));
    assert!(form.all_issues().is_empty(), "pristine forms stay quiet");

    assert!(!form.validate_all());
    assert!(form.is_submit_attempted());
    let issues = form.all_issues();
    assert_eq!(issues.len(), 1);
    assert_eq!(issues[0].code, IssueCode::Required);
    assert_eq!(issues[0].severity, Severity::Error);
    assert_eq!(issues[0].expression.as_deref(), Some("name"));

    question(&form, "name").set_value_by_user(Some(AnswerValue::String("Ada".into())));
    assert!(form.all_issues().is_empty());
    assert!(form.validate_all());
    assert!(!form.is_submit_attempted());
}

#[test]
fn blank_strings_do_not_satisfy_required() {
    let form = form(json!({
        "item": [{ "linkId": "name", "type": "string", "required": true }]
    }));
    question(&form, "name").set_value_by_user(Some(AnswerValue::String("   ".into())));
    assert_eq!(codes(&form), vec![IssueCode::Required]);
}

#[test]
fn constraints_only_report_once_edited() {
    let form = form(json!({
        "item": [{ "linkId": "code", "type": "string", "maxLength": 3 }]
    }));
    let code = question(&form, "code");
    assert!(form.all_issues().is_empty());

    code.set_value_by_user(Some(AnswerValue::String("abcd".into())));
    assert_eq!(codes(&form), vec![IssueCode::TooLong]);

    code.set_value_by_user(Some(AnswerValue::String("abc".into())));
    assert!(form.all_issues().is_empty());
}

#[test]
fn numeric_bounds_and_precision_are_checked() {
    let form = form(json!({
        "item": [
            {
                "linkId": "age",
                "type": "integer",
                "extension": [
                    { "url": urls::MIN_VALUE, "valueInteger": 0 },
                    { "url": urls::MAX_VALUE, "valueInteger": 120 }
                ]
            },
            {
                "linkId": "weight",
                "type": "decimal",
                "extension": [{ "url": urls::MAX_DECIMAL_PLACES, "valueInteger": 1 }]
            }
        ]
    }));
    let age = question(&form, "age");
    age.set_value_by_user(Some(AnswerValue::Integer(130)));
    let issues = node(&form, "age").issues();
    assert_eq!(issues.len(), 1);
    assert!(issues[0].diagnostics.contains("maximum"));

    age.set_value_by_user(Some(AnswerValue::Integer(-1)));
    assert!(node(&form, "age").issues()[0].diagnostics.contains("minimum"));

    age.set_value_by_user(Some(AnswerValue::Integer(40)));
    assert!(node(&form, "age").issues().is_empty());

    question(&form, "weight").set_value_by_user(Some(AnswerValue::Decimal(72.25)));
    assert_eq!(codes(&form), vec![IssueCode::Value]);
}

#[test]
fn text_patterns_are_anchored() {
    let form = form(json!({
        "item": [{
            "linkId": "zip",
            "type": "string",
            "extension": [{ "url": urls::REGEX, "valueString": "[0-9]{5}" }]
        }]
    }));
    let zip = question(&form, "zip");
    zip.set_value_by_user(Some(AnswerValue::String("123456".into())));
    assert_eq!(codes(&form), vec![IssueCode::Value]);
    zip.set_value_by_user(Some(AnswerValue::String("12345".into())));
    assert!(form.all_issues().is_empty());
}

#[test]
fn invalid_patterns_warn_without_blocking() {
    let form = form(json!({
        "item": [{
            "linkId": "zip",
            "type": "string",
            "extension": [{ "url": urls::REGEX, "valueString": "([0-9]" }]
        }]
    }));
    question(&form, "zip").set_value_by_user(Some(AnswerValue::String("1".into())));
    let issues = form.all_issues();
    assert_eq!(issues.len(), 1);
    assert_eq!(issues[0].severity, Severity::Warning);
    assert_eq!(issues[0].code, IssueCode::Processing);
    assert!(form.validate_all());
}

fn legacy_questionnaire() -> serde_json::Value {
    json!({
        "item": [
            {
                "linkId": "size",
                "type": "choice",
                "answerOption": [{ "valueCoding": { "code": "s" } }, { "valueCoding": { "code": "m" } }]
            },
            { "linkId": "name", "type": "string", "required": true }
        ]
    })
}

fn legacy_response() -> sdc_forms::QuestionnaireResponse {
    common::response(json!({
        "item": [{ "linkId": "size", "answer": [{ "valueCoding": { "code": "xl" } }] }]
    }))
}

#[test]
fn legacy_answers_warn_by_default() {
    let form = sdc_forms::Form::builder(common::questionnaire(legacy_questionnaire()))
        .with_response(legacy_response())
        .build()
        .expect("form should build");
    assert!(!form.validate_all());
    let legacy: Vec<_> = form
        .all_issues()
        .into_iter()
        .filter(|issue| issue.expression.as_deref() == Some("size"))
        .collect();
    assert_eq!(legacy.len(), 1);
    assert_eq!(legacy[0].severity, Severity::Warning);
    assert!(legacy[0].diagnostics.contains("xl"));

    question(&form, "name").set_value_by_user(Some(AnswerValue::String("Ada".into())));
    assert!(form.validate_all(), "warnings never block");
}

#[test]
fn strict_matching_turns_legacy_answers_into_errors() {
    let config = FormConfig {
        strict_option_matching: true,
        ..FormConfig::default()
    };
    let form = sdc_forms::Form::builder(common::questionnaire(legacy_questionnaire()))
        .with_response(legacy_response())
        .with_config(config)
        .build()
        .expect("form should build");
    question(&form, "name").set_value_by_user(Some(AnswerValue::String("Ada".into())));
    assert!(!form.validate_all());
    let issues = form.all_issues();
    assert_eq!(issues.len(), 1);
    assert_eq!(issues[0].severity, Severity::Error);
    assert_eq!(issues[0].code, IssueCode::Value);
}
