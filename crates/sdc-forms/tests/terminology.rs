mod common;

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::json;

use common::{form_with_config, question};
use sdc_forms::{
    Coding, FormConfig, IssueCode, OptionsState, TerminologyClient, TerminologyError,
    ValueSetCache, urls,
};

const STATUS: &str = "http://example.org/ValueSet/status";

/// Answers from a fixed table and records every request.
#[derive(Default)]
struct ScriptedClient {
    replies: HashMap<String, Result<Vec<Coding>, TerminologyError>>,
    calls: Mutex<Vec<String>>,
}

impl ScriptedClient {
    fn reply(mut self, server: &str, reply: Result<Vec<Coding>, TerminologyError>) -> Self {
        self.replies.insert(server.to_string(), reply);
        self
    }

    fn calls(&self) -> Vec<String> {
        self.calls.lock().expect("calls lock").clone()
    }
}

#[async_trait]
impl TerminologyClient for ScriptedClient {
    async fn expand(&self, server: &str, _url: &str) -> Result<Vec<Coding>, TerminologyError> {
        self.calls.lock().expect("calls lock").push(server.to_string());
        self.replies
            .get(server)
            .cloned()
            .unwrap_or_else(|| {
                Err(TerminologyError::Transport {
                    server: server.to_string(),
                    message: "unscripted".into(),
                })
            })
    }
}

fn codings() -> Vec<Coding> {
    vec![
        Coding::new("http://example.org/status", "active").with_display("Active"),
        Coding::new("http://example.org/status", "done").with_display("Done"),
    ]
}

fn status(code: u16, server: &str) -> TerminologyError {
    TerminologyError::Status {
        server: server.to_string(),
        status: code,
    }
}

fn servers(names: &[&str]) -> Vec<String> {
    names.iter().map(|name| name.to_string()).collect()
}

#[tokio::test]
async fn expansions_are_cached_per_server_and_url() {
    let client = Arc::new(ScriptedClient::default().reply("a", Ok(codings())));
    let cache = ValueSetCache::with_client(client.clone());

    let first = cache.expand(STATUS, &servers(&["a"])).await.expect("expands");
    let second = cache.expand(STATUS, &servers(&["a"])).await.expect("expands");
    assert_eq!(first, second);
    assert_eq!(client.calls(), vec!["a"]);
    assert_eq!(cache.len(), 1);
}

#[tokio::test]
async fn server_errors_fall_through_to_the_next_server() {
    let client = Arc::new(
        ScriptedClient::default()
            .reply("a", Err(status(503, "a")))
            .reply("b", Ok(codings())),
    );
    let cache = ValueSetCache::with_client(client.clone());

    let expanded = cache
        .expand(STATUS, &servers(&["a", "b"]))
        .await
        .expect("second server answers");
    assert_eq!(expanded.len(), 2);
    assert_eq!(client.calls(), vec!["a", "b"]);
}

#[tokio::test]
async fn client_errors_stop_the_fallback() {
    let client = Arc::new(
        ScriptedClient::default()
            .reply("a", Err(status(404, "a")))
            .reply("b", Ok(codings())),
    );
    let cache = ValueSetCache::with_client(client.clone());

    let err = cache
        .expand(STATUS, &servers(&["a", "b"]))
        .await
        .expect_err("4xx is final");
    assert!(err.is_client_error());
    assert_eq!(client.calls(), vec!["a"]);
}

#[tokio::test]
async fn failures_are_evicted_and_retried() {
    let client = Arc::new(ScriptedClient::default().reply("a", Err(status(500, "a"))));
    let cache = ValueSetCache::with_client(client.clone());

    assert!(cache.expand(STATUS, &servers(&["a"])).await.is_err());
    assert!(cache.is_empty());
    assert!(cache.expand(STATUS, &servers(&["a"])).await.is_err());
    assert_eq!(client.calls(), vec!["a", "a"]);
}

#[tokio::test]
async fn no_servers_is_an_error() {
    let cache = ValueSetCache::new(ScriptedClient::default());
    let err = cache.expand(STATUS, &[]).await.expect_err("nothing to ask");
    assert_eq!(
        err,
        TerminologyError::NoServer {
            url: STATUS.to_string()
        }
    );
}

fn status_form(config: FormConfig) -> sdc_forms::Form {
    form_with_config(
        json!({
            "item": [{
                "linkId": "status",
                "type": "choice",
                "answerValueSet": STATUS,
                "answerOption": [{ "valueCoding": { "code": "unknown" } }]
            }]
        }),
        config,
    )
}

fn config(servers: &[&str]) -> FormConfig {
    FormConfig {
        terminology_servers: servers.iter().map(|s| s.to_string()).collect(),
        ..FormConfig::default()
    }
}

#[tokio::test]
async fn expanded_value_sets_become_options() {
    let form = status_form(config(&["a"]));
    let status = question(&form, "status");
    assert_eq!(status.options_state(), OptionsState::Loading);

    let cache = ValueSetCache::new(ScriptedClient::default().reply("a", Ok(codings())));
    assert!(form.expand_value_sets(&cache).await.is_empty());

    assert_eq!(status.options_state(), OptionsState::Ready);
    let labels: Vec<String> = status.options().into_iter().map(|o| o.label).collect();
    assert_eq!(labels, vec!["Active", "Done"]);
    assert!(form.all_issues().is_empty());
}

#[tokio::test]
async fn failed_expansions_fall_back_to_static_options() {
    let form = status_form(config(&["a"]));
    let status = question(&form, "status");

    let cache = ValueSetCache::new(ScriptedClient::default().reply("a", Err(status_code(404))));
    let failures = form.expand_value_sets(&cache).await;
    assert_eq!(failures.len(), 1);

    assert!(matches!(status.options_state(), OptionsState::Failed(_)));
    let labels: Vec<String> = status.options().into_iter().map(|o| o.label).collect();
    assert_eq!(labels, vec!["unknown"]);

    let issues = form.all_issues();
    assert_eq!(issues.len(), 1);
    assert_eq!(issues[0].code, IssueCode::Processing);
    assert!(!issues[0].is_blocking());
}

fn status_code(code: u16) -> TerminologyError {
    status(code, "a")
}

#[tokio::test]
async fn preferred_servers_come_before_configured_ones() {
    let form = form_with_config(
        json!({
            "item": [{
                "linkId": "status",
                "type": "choice",
                "answerValueSet": STATUS,
                "extension": [{ "url": urls::PREFERRED_TERMINOLOGY_SERVER, "valueUrl": "item" }]
            }]
        }),
        config(&["configured"]),
    );
    let client = Arc::new(ScriptedClient::default().reply("item", Ok(codings())));
    let cache = ValueSetCache::with_client(client.clone());
    assert!(form.expand_value_sets(&cache).await.is_empty());
    assert_eq!(client.calls(), vec!["item"]);
}

#[tokio::test]
async fn shared_value_sets_try_every_item_preferred_server() {
    let form = form_with_config(
        json!({
            "item": [
                {
                    "linkId": "status",
                    "type": "choice",
                    "answerValueSet": STATUS,
                    "extension": [{ "url": urls::PREFERRED_TERMINOLOGY_SERVER, "valueUrl": "first" }]
                },
                {
                    "linkId": "previous",
                    "type": "choice",
                    "answerValueSet": STATUS,
                    "extension": [{ "url": urls::PREFERRED_TERMINOLOGY_SERVER, "valueUrl": "second" }]
                }
            ]
        }),
        config(&[]),
    );
    let client = Arc::new(
        ScriptedClient::default()
            .reply("first", Err(status(503, "first")))
            .reply("second", Ok(codings())),
    );
    let cache = ValueSetCache::with_client(client.clone());
    assert!(form.expand_value_sets(&cache).await.is_empty());
    assert_eq!(client.calls(), vec!["first", "second"]);
    assert_eq!(question(&form, "previous").options_state(), OptionsState::Ready);
    assert_eq!(question(&form, "status").options_state(), OptionsState::Ready);
}
