//! Value-set expansion: caching and server fallback policy.
//!
//! Transport lives behind [`TerminologyClient`]. [`ValueSetCache`] shares one
//! in-flight expansion per `(server, url)` pair, walks the preferred servers in
//! order and only falls through to the next one when the failure was not a
//! 4xx response. Failed entries are evicted so a later load retries.

use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use futures::FutureExt;
use futures::future::{BoxFuture, Shared};
use serde_json::Value;
use tracing::{debug, warn};

use crate::error::TerminologyError;
use crate::value::Coding;

/// Expansion state published to option lists.
#[derive(Debug, Clone, PartialEq)]
pub enum ValueSetState {
    Pending,
    Ready(Vec<Coding>),
    Failed(String),
}

#[async_trait]
pub trait TerminologyClient: Send + Sync {
    /// Expands the canonical value set `url` on `server`.
    async fn expand(&self, server: &str, url: &str) -> Result<Vec<Coding>, TerminologyError>;
}

type Expansion = Shared<BoxFuture<'static, Result<Vec<Coding>, TerminologyError>>>;

pub struct ValueSetCache {
    client: Arc<dyn TerminologyClient>,
    entries: DashMap<(String, String), Expansion>,
}

impl std::fmt::Debug for ValueSetCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ValueSetCache")
            .field("entries", &self.entries.len())
            .finish()
    }
}

impl ValueSetCache {
    pub fn new(client: impl TerminologyClient + 'static) -> Self {
        Self::with_client(Arc::new(client))
    }

    pub fn with_client(client: Arc<dyn TerminologyClient>) -> Self {
        Self {
            client,
            entries: DashMap::new(),
        }
    }

    /// Number of cached or in-flight expansions.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn entry(&self, server: &str, url: &str) -> Expansion {
        let key = (server.to_string(), url.to_string());
        self.entries
            .entry(key)
            .or_insert_with(|| {
                let client = self.client.clone();
                let (server, url) = (server.to_string(), url.to_string());
                async move { client.expand(&server, &url).await }
                    .boxed()
                    .shared()
            })
            .clone()
    }

    /// Expands `url`, trying `servers` in order.
    pub async fn expand(
        &self,
        url: &str,
        servers: &[String],
    ) -> Result<Vec<Coding>, TerminologyError> {
        let mut last_error = None;
        for server in servers {
            match self.entry(server, url).await {
                Ok(codings) => {
                    debug!(%server, %url, count = codings.len(), "value set expanded");
                    return Ok(codings);
                }
                Err(err) => {
                    self.entries.remove(&(server.clone(), url.to_string()));
                    if err.is_client_error() {
                        warn!(%server, %url, error = %err, "value set rejected, not retrying");
                        return Err(err);
                    }
                    warn!(%server, %url, error = %err, "value set expansion failed, trying next server");
                    last_error = Some(err);
                }
            }
        }
        Err(last_error.unwrap_or_else(|| TerminologyError::NoServer {
            url: url.to_string(),
        }))
    }
}

/// Flattens `expansion.contains` (including nested groups) into codings.
pub fn parse_expansion(value_set: &Value) -> Result<Vec<Coding>, String> {
    fn walk(entries: &[Value], out: &mut Vec<Coding>) {
        for entry in entries {
            let abstract_entry = entry
                .get("abstract")
                .and_then(Value::as_bool)
                .unwrap_or(false);
            if !abstract_entry && entry.get("code").is_some() {
                let text = |key: &str| entry.get(key).and_then(Value::as_str).map(str::to_string);
                out.push(Coding {
                    system: text("system"),
                    version: text("version"),
                    code: text("code"),
                    display: text("display"),
                });
            }
            if let Some(nested) = entry.get("contains").and_then(Value::as_array) {
                walk(nested, out);
            }
        }
    }

    let expansion = value_set
        .get("expansion")
        .ok_or_else(|| "response carries no expansion".to_string())?;
    let mut codings = Vec::new();
    if let Some(contains) = expansion.get("contains").and_then(Value::as_array) {
        walk(contains, &mut codings);
    }
    Ok(codings)
}

#[cfg(feature = "http")]
pub use http::HttpTerminologyClient;

#[cfg(feature = "http")]
mod http {
    use async_trait::async_trait;
    use serde_json::Value;

    use super::{TerminologyClient, parse_expansion};
    use crate::error::TerminologyError;
    use crate::value::Coding;

    /// `GET {server}/ValueSet/$expand?url=...` over `reqwest`.
    #[derive(Debug, Clone, Default)]
    pub struct HttpTerminologyClient {
        http: reqwest::Client,
    }

    impl HttpTerminologyClient {
        pub fn new(http: reqwest::Client) -> Self {
            Self { http }
        }
    }

    #[async_trait]
    impl TerminologyClient for HttpTerminologyClient {
        async fn expand(&self, server: &str, url: &str) -> Result<Vec<Coding>, TerminologyError> {
            let transport = |message: String| TerminologyError::Transport {
                server: server.to_string(),
                message,
            };
            let mut endpoint =
                url::Url::parse(&format!("{}/ValueSet/$expand", server.trim_end_matches('/')))
                    .map_err(|err| transport(err.to_string()))?;
            endpoint.query_pairs_mut().append_pair("url", url);

            let response = self
                .http
                .get(endpoint)
                .header("Accept", "application/fhir+json")
                .send()
                .await
                .map_err(|err| transport(err.to_string()))?;
            let status = response.status();
            if !status.is_success() {
                return Err(TerminologyError::Status {
                    server: server.to_string(),
                    status: status.as_u16(),
                });
            }
            let body: Value = response
                .json()
                .await
                .map_err(|err| TerminologyError::Malformed {
                    server: server.to_string(),
                    message: err.to_string(),
                })?;
            parse_expansion(&body).map_err(|message| TerminologyError::Malformed {
                server: server.to_string(),
                message,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn nested_contains_are_flattened_and_abstract_entries_skipped() {
        let codings = parse_expansion(&json!({
            "resourceType": "ValueSet",
            "expansion": { "contains": [
                { "system": "s", "code": "a", "display": "A" },
                { "abstract": true, "code": "grp", "contains": [
                    { "system": "s", "code": "b" }
                ] }
            ] }
        }))
        .expect("expansion should parse");
        let codes: Vec<_> = codings.iter().filter_map(|c| c.code.as_deref()).collect();
        assert_eq!(codes, ["a", "b"]);
    }

    #[test]
    fn missing_expansion_is_malformed() {
        assert!(parse_expansion(&json!({ "resourceType": "ValueSet" })).is_err());
    }
}
