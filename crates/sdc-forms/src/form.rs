//! Form orchestrator: builds the node tree and projects responses.

use std::cell::Cell;
use std::collections::HashMap;
use std::rc::Rc;

use serde_json::Value;
use tracing::{debug, info, warn};

use crate::config::FormConfig;
use crate::context::FormContext;
use crate::error::{FormError, TerminologyError};
use crate::expr::{ExpressionEvaluator, JsonExprEvaluator};
use crate::issue::{Issue, IssueCode};
use crate::node::{Node, SnapshotMode, build_children};
use crate::reactive::Memo;
use crate::registry::ExpressionRegistry;
use crate::response::QuestionnaireResponse;
use crate::scope::Scope;
use crate::template::{ItemType, Questionnaire, QuestionnaireItem};
use crate::terminology::{ValueSetCache, ValueSetState};

/// Builder for [`Form`].
pub struct FormBuilder {
    questionnaire: Questionnaire,
    response: Option<QuestionnaireResponse>,
    evaluator: Option<Rc<dyn ExpressionEvaluator>>,
    config: FormConfig,
}

impl FormBuilder {
    /// Seeds answers from a persisted response.
    pub fn with_response(mut self, response: QuestionnaireResponse) -> Self {
        self.response = Some(response);
        self
    }

    pub fn with_evaluator(mut self, evaluator: impl ExpressionEvaluator + 'static) -> Self {
        self.evaluator = Some(Rc::new(evaluator));
        self
    }

    pub fn with_config(mut self, config: FormConfig) -> Self {
        self.config = config;
        self
    }

    pub fn build(self) -> Result<Form, FormError> {
        self.questionnaire.check_link_ids()?;
        let questionnaire = Rc::new(self.questionnaire);
        let evaluator = self
            .evaluator
            .unwrap_or_else(|| Rc::new(JsonExprEvaluator));
        let ctx = Rc::new(FormContext::new(questionnaire.clone(), evaluator, self.config));

        let scope = Scope::root();
        let (registry, mut issues) =
            ExpressionRegistry::for_questionnaire(&ctx, &questionnaire, &scope);
        let mut response = self.response.unwrap_or_default();
        let seed = std::mem::take(&mut response.item);
        let nodes = build_children(&ctx, &questionnaire.item, None, None, &scope, &seed);
        issues.extend(structure_issues(&questionnaire));

        let inner = Rc::new(FormInner {
            response: Memo::new(&ctx.runtime),
            expression_response: Memo::new(&ctx.runtime),
            disposed: Cell::new(false),
            header: QuestionnaireResponse {
                questionnaire: response.questionnaire.or_else(|| questionnaire.url.clone()),
                status: response.status.or_else(|| Some("in-progress".to_string())),
                ..response
            },
            ctx,
            scope,
            registry,
            nodes,
            issues,
        });
        let weak = Rc::downgrade(&inner);
        inner.ctx.coordinator.set_resource(move || {
            weak.upgrade()
                .map(|inner| inner.expression_response())
                .unwrap_or(Value::Null)
        });
        inner.ctx.flush();
        debug!(
            nodes = inner.nodes.len(),
            issues = inner.issues.len(),
            "form built"
        );
        Ok(Form { inner })
    }
}

struct FormInner {
    ctx: Rc<FormContext>,
    scope: Rc<Scope>,
    registry: ExpressionRegistry,
    nodes: Vec<Node>,
    issues: Vec<Issue>,
    /// Resource metadata without items.
    header: QuestionnaireResponse,
    response: Memo<QuestionnaireResponse>,
    expression_response: Memo<Value>,
    disposed: Cell<bool>,
}

impl FormInner {
    fn snapshot(&self, mode: SnapshotMode) -> QuestionnaireResponse {
        QuestionnaireResponse {
            item: self
                .nodes
                .iter()
                .flat_map(|node| node.response_items(mode))
                .collect(),
            ..self.header.clone()
        }
    }

    fn expression_response(&self) -> Value {
        self.expression_response.get(|_| {
            serde_json::to_value(self.snapshot(SnapshotMode::Expression)).unwrap_or(Value::Null)
        })
    }
}

/// A live form instance.
#[derive(Clone)]
pub struct Form {
    inner: Rc<FormInner>,
}

impl std::fmt::Debug for Form {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Form")
            .field("nodes", &self.inner.nodes.len())
            .field("disposed", &self.inner.disposed.get())
            .finish()
    }
}

impl Form {
    pub fn builder(questionnaire: Questionnaire) -> FormBuilder {
        FormBuilder {
            questionnaire,
            response: None,
            evaluator: None,
            config: FormConfig::default(),
        }
    }

    /// Blank form with the builtin evaluator and default configuration.
    pub fn new(questionnaire: Questionnaire) -> Result<Self, FormError> {
        Self::builder(questionnaire).build()
    }

    pub fn questionnaire(&self) -> &Questionnaire {
        &self.inner.ctx.questionnaire
    }

    pub fn config(&self) -> &FormConfig {
        &self.inner.ctx.config
    }

    /// Top-level nodes.
    pub fn nodes(&self) -> &[Node] {
        &self.inner.nodes
    }

    /// Every live node, depth first.
    pub fn descendants(&self) -> Vec<Node> {
        self.inner
            .nodes
            .iter()
            .flat_map(Node::descendants)
            .collect()
    }

    /// First node with `link_id`, depth first.
    pub fn find(&self, link_id: &str) -> Option<Node> {
        self.descendants()
            .into_iter()
            .find(|node| !node.is_answer() && node.link_id() == link_id)
    }

    pub fn find_by_token(&self, token: &str) -> Option<Node> {
        self.descendants()
            .into_iter()
            .find(|node| node.token() == token)
    }

    /// Persisted projection: enabled nodes with content only.
    pub fn response(&self) -> QuestionnaireResponse {
        self.inner
            .response
            .get(|_| self.inner.snapshot(SnapshotMode::Persisted))
    }

    /// Expression-context projection: every node, enabled or not.
    pub fn expression_response(&self) -> Value {
        self.inner.expression_response()
    }

    /// Current value of a variable bound at questionnaire level.
    pub fn variable(&self, name: &str) -> Option<Vec<Value>> {
        self.inner
            .scope
            .lookup_expression(name)
            .map(|slot| slot.values(&self.inner.ctx))
    }

    /// Form-level issues: structure problems and questionnaire variables.
    pub fn issues(&self) -> Vec<Issue> {
        let mut issues = self.inner.issues.clone();
        issues.extend(self.inner.registry.evaluation_issues(&self.inner.ctx));
        issues
    }

    /// Form-level issues followed by the issues of every node.
    pub fn all_issues(&self) -> Vec<Issue> {
        let mut issues = self.issues();
        for node in self.descendants() {
            issues.extend(node.issues());
        }
        issues
    }

    pub fn is_submit_attempted(&self) -> bool {
        self.inner.ctx.submit_attempted.get()
    }

    /// Validates the whole tree as if submitting.
    ///
    /// On success the submit flag is cleared again, so later edits are only
    /// validated once dirty.
    pub fn validate_all(&self) -> bool {
        let ctx = &self.inner.ctx;
        ctx.submit_attempted.set(true);
        ctx.flush();
        let blocking = self
            .all_issues()
            .into_iter()
            .filter(Issue::is_blocking)
            .count();
        if blocking == 0 {
            ctx.submit_attempted.set(false);
            ctx.flush();
        }
        info!(blocking, "form validated");
        blocking == 0
    }

    /// Resolves every referenced value set through `cache` and publishes the
    /// results to the option lists. Returns the failures, which the affected
    /// questions also report as issues.
    pub async fn expand_value_sets(&self, cache: &ValueSetCache) -> Vec<TerminologyError> {
        let ctx = self.inner.ctx.clone();
        let mut failures = Vec::new();
        for (url, servers) in value_set_requests(&ctx) {
            match cache.expand(&url, &servers).await {
                Ok(codings) => ctx.publish_value_set(&url, ValueSetState::Ready(codings)),
                Err(err) => {
                    warn!(%url, error = %err, "falling back to static answer options");
                    ctx.publish_value_set(&url, ValueSetState::Failed(err.to_string()));
                    failures.push(err);
                }
            }
        }
        ctx.flush();
        failures
    }

    /// Releases every reaction of the tree. The form stays readable.
    pub fn dispose(&self) {
        if self.inner.disposed.replace(true) {
            return;
        }
        for node in &self.inner.nodes {
            node.dispose();
        }
    }
}

/// Each value-set URL once, with the preferred servers of every item that
/// uses it in document order: item, then questionnaire, then configuration.
fn value_set_requests(ctx: &FormContext) -> Vec<(String, Vec<String>)> {
    fn walk(
        items: &[QuestionnaireItem],
        fallback: &[String],
        positions: &mut HashMap<String, usize>,
        out: &mut Vec<(String, Vec<String>)>,
    ) {
        for item in items {
            if let Some(url) = &item.answer_value_set {
                let mut servers = item.preferred_servers();
                if servers.is_empty() {
                    servers = fallback.to_vec();
                }
                let position = *positions.entry(url.clone()).or_insert_with(|| {
                    out.push((url.clone(), Vec::new()));
                    out.len() - 1
                });
                let merged = &mut out[position].1;
                for server in servers {
                    if !merged.contains(&server) {
                        merged.push(server);
                    }
                }
            }
            walk(&item.item, fallback, positions, out);
        }
    }

    let mut fallback = ctx.questionnaire.preferred_servers();
    if fallback.is_empty() {
        fallback = ctx.config.terminology_servers.clone();
    }
    let mut out = Vec::new();
    walk(&ctx.questionnaire.item, &fallback, &mut HashMap::new(), &mut out);
    out
}

/// Authoring mistakes around `header`, `footer` and `page` item controls.
fn structure_issues(questionnaire: &Questionnaire) -> Vec<Issue> {
    fn is_group_with(item: &QuestionnaireItem, control: &str) -> bool {
        item.item_type == ItemType::Group && item.item_control() == Some(control)
    }

    fn nested_pages(items: &[QuestionnaireItem], out: &mut Vec<String>) {
        for item in items {
            if is_group_with(item, "page") {
                out.push(item.key().to_string());
            }
            nested_pages(&item.item, out);
        }
    }

    let mut issues = Vec::new();
    let top = &questionnaire.item;
    for control in ["header", "footer"] {
        let count = top.iter().filter(|item| is_group_with(item, control)).count();
        if count > 1 {
            issues.push(Issue::warning(
                IssueCode::Structure,
                format!("{count} {control} groups declared, only one is allowed"),
            ));
        }
    }

    let pages = top.iter().filter(|item| is_group_with(item, "page")).count();
    if pages > 0 {
        let strays: Vec<&str> = top
            .iter()
            .filter(|item| {
                !is_group_with(item, "page")
                    && !is_group_with(item, "header")
                    && !is_group_with(item, "footer")
            })
            .map(QuestionnaireItem::key)
            .collect();
        if !strays.is_empty() {
            issues.push(Issue::warning(
                IssueCode::Structure,
                format!(
                    "page groups must not have non-page siblings: {}",
                    strays.join(", ")
                ),
            ));
        }
    }

    let mut nested = Vec::new();
    for item in top {
        nested_pages(&item.item, &mut nested);
    }
    if !nested.is_empty() {
        issues.push(Issue::warning(
            IssueCode::Structure,
            format!("page groups cannot be nested: {}", nested.join(", ")),
        ));
    }

    for issue in &issues {
        warn!(diagnostics = %issue.diagnostics, "questionnaire structure issue");
    }
    issues
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn questionnaire(value: Value) -> Questionnaire {
        serde_json::from_value(value).expect("fixture should deserialize")
    }

    fn control(code: &str) -> Value {
        json!([{
            "url": "http://hl7.org/fhir/StructureDefinition/questionnaire-itemControl",
            "valueCodeableConcept": {"coding": [{"code": code}]}
        }])
    }

    #[test]
    fn duplicate_headers_and_nested_pages_are_reported() {
        let q = questionnaire(json!({
            "item": [
                {"linkId": "h1", "type": "group", "extension": control("header")},
                {"linkId": "h2", "type": "group", "extension": control("header")},
                {"linkId": "p1", "type": "group", "extension": control("page"), "item": [
                    {"linkId": "p2", "type": "group", "extension": control("page")}
                ]}
            ]
        }));
        let issues = structure_issues(&q);
        assert_eq!(issues.len(), 2);
        assert!(issues.iter().all(|issue| issue.code == IssueCode::Structure));
        assert!(issues[1].diagnostics.contains("p2"));
    }

    #[test]
    fn pages_with_loose_siblings_are_reported() {
        let q = questionnaire(json!({
            "item": [
                {"linkId": "p1", "type": "group", "extension": control("page")},
                {"linkId": "loose", "type": "string"}
            ]
        }));
        let issues = structure_issues(&q);
        assert_eq!(issues.len(), 1);
        assert!(issues[0].diagnostics.contains("loose"));
    }
}
