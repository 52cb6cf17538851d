use std::fs;
use std::path::PathBuf;

use assert_cmd::Command;
use predicates::prelude::*;
use serde_json::{Value, json};
use tempfile::TempDir;

fn write(dir: &TempDir, name: &str, value: &Value) -> PathBuf {
    let path = dir.path().join(name);
    fs::write(&path, serde_json::to_string_pretty(value).expect("fixture should encode"))
        .expect("fixture should be written");
    path
}

fn questionnaire() -> Value {
    json!({
        "resourceType": "Questionnaire",
        "url": "http://example.org/Questionnaire/intake",
        "item": [
            { "linkId": "name", "type": "string", "required": true },
            { "linkId": "smoker", "type": "boolean" },
            {
                "linkId": "packs",
                "type": "integer",
                "enableWhen": [{ "question": "smoker", "operator": "=", "answerBoolean": true }]
            }
        ]
    })
}

fn sdc_forms() -> Command {
    Command::cargo_bin("sdc-forms").expect("binary should be built")
}

#[test]
fn response_prints_the_persisted_projection() {
    let dir = TempDir::new().expect("temp dir");
    let q = write(&dir, "q.json", &questionnaire());
    let r = write(
        &dir,
        "r.json",
        &json!({ "item": [
            { "linkId": "name", "answer": [{ "valueString": "Ada" }] },
            { "linkId": "packs", "answer": [{ "valueInteger": 3 }] }
        ] }),
    );

    let output = sdc_forms()
        .arg("response")
        .arg(&q)
        .arg("--response")
        .arg(&r)
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    let response: Value = serde_json::from_slice(&output).expect("stdout is JSON");
    assert_eq!(response["questionnaire"], "http://example.org/Questionnaire/intake");
    assert_eq!(response["item"].as_array().map(Vec::len), Some(1));
    assert_eq!(response["item"][0]["linkId"], "name");
}

#[test]
fn expression_context_includes_disabled_items() {
    let dir = TempDir::new().expect("temp dir");
    let q = write(&dir, "q.json", &questionnaire());

    sdc_forms()
        .arg("response")
        .arg(&q)
        .arg("--expression-context")
        .assert()
        .success()
        .stdout(predicate::str::contains("\"packs\""));
}

#[test]
fn validate_fails_on_blocking_issues() {
    let dir = TempDir::new().expect("temp dir");
    let q = write(&dir, "q.json", &questionnaire());

    sdc_forms()
        .arg("validate")
        .arg(&q)
        .assert()
        .code(1)
        .stdout(predicate::str::contains("name: a value is required"));
}

#[test]
fn validate_accepts_complete_responses() {
    let dir = TempDir::new().expect("temp dir");
    let q = write(&dir, "q.json", &questionnaire());
    let r = write(
        &dir,
        "r.json",
        &json!({ "item": [{ "linkId": "name", "answer": [{ "valueString": "Ada" }] }] }),
    );

    sdc_forms()
        .args(["validate", "--json"])
        .arg(&q)
        .arg("--response")
        .arg(&r)
        .assert()
        .success()
        .stdout(predicate::str::diff("[]\n"));
}

#[test]
fn strict_config_turns_legacy_answers_into_failures() {
    let dir = TempDir::new().expect("temp dir");
    let q = write(
        &dir,
        "q.json",
        &json!({ "item": [{
            "linkId": "size",
            "type": "choice",
            "answerOption": [{ "valueCoding": { "code": "s" } }]
        }] }),
    );
    let r = write(
        &dir,
        "r.json",
        &json!({ "item": [{ "linkId": "size", "answer": [{ "valueCoding": { "code": "xl" } }] }] }),
    );
    let config = dir.path().join("engine.toml");
    fs::write(&config, "strict_option_matching = true\n").expect("config should be written");

    sdc_forms()
        .arg("validate")
        .arg(&q)
        .arg("--response")
        .arg(&r)
        .assert()
        .success();

    sdc_forms()
        .arg("--config")
        .arg(&config)
        .arg("validate")
        .arg(&q)
        .arg("--response")
        .arg(&r)
        .assert()
        .code(1)
        .stdout(predicate::str::contains("no longer an available option"));
}

#[test]
fn questionnaires_without_link_ids_are_rejected() {
    let dir = TempDir::new().expect("temp dir");
    let q = write(&dir, "q.json", &json!({ "item": [{ "type": "string" }] }));

    sdc_forms()
        .arg("response")
        .arg(&q)
        .assert()
        .code(2)
        .stderr(predicate::str::contains("linkId"));
}

#[test]
fn schema_describes_questionnaires() {
    sdc_forms()
        .arg("schema")
        .assert()
        .success()
        .stdout(predicate::str::contains("linkId"));
}

#[test]
fn schema_describes_engine_config() {
    sdc_forms()
        .args(["schema", "config"])
        .assert()
        .success()
        .stdout(predicate::str::contains("max_flush_passes"));
}
