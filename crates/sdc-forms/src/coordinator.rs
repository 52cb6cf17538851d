//! Dependency-tracked slot evaluation and bounded write-back.

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;

use serde_json::Value;
use tracing::{debug, warn};

use crate::context::FormContext;
use crate::expr::{Environment, ExpressionEvaluator};
use crate::node::WeakNode;
use crate::scope::Scope;
use crate::slot::{ExpressionSlot, SlotId, SlotRequest, SlotResult};

/// Result of [`EvaluationCoordinator::track_write`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum WriteOutcome {
    /// The target already matched; the pass counter was reset.
    Stable,
    /// A change was written; the pass counter advanced.
    Applied,
    /// The slot used up its passes for this cycle; nothing ran.
    Suppressed,
}

type ResourceProvider = Box<dyn Fn() -> Value>;

pub(crate) struct EvaluationCoordinator {
    evaluator: Rc<dyn ExpressionEvaluator>,
    max_passes: usize,
    next_slot: Cell<usize>,
    passes: RefCell<HashMap<SlotId, usize>>,
    resource: RefCell<Option<ResourceProvider>>,
}

impl fmt::Debug for EvaluationCoordinator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EvaluationCoordinator")
            .field("slots", &self.next_slot.get())
            .field("max_passes", &self.max_passes)
            .finish()
    }
}

impl EvaluationCoordinator {
    pub(crate) fn new(evaluator: Rc<dyn ExpressionEvaluator>, max_passes: usize) -> Self {
        Self {
            evaluator,
            max_passes: max_passes.max(1),
            next_slot: Cell::new(0),
            passes: RefCell::new(HashMap::new()),
            resource: RefCell::new(None),
        }
    }

    /// Installs the `%resource` source once the form exists.
    pub(crate) fn set_resource(&self, provider: impl Fn() -> Value + 'static) {
        *self.resource.borrow_mut() = Some(Box::new(provider));
    }

    pub(crate) fn resource(&self) -> Value {
        self.resource
            .borrow()
            .as_ref()
            .map(|provider| provider())
            .unwrap_or(Value::Null)
    }

    /// Creates and registers a slot. Each call yields a fresh id.
    pub(crate) fn create_slot(
        &self,
        ctx: &FormContext,
        request: SlotRequest,
        scope: &Rc<Scope>,
        owner: Option<WeakNode>,
    ) -> Rc<ExpressionSlot> {
        let id = SlotId(self.next_slot.get());
        self.next_slot.set(id.0 + 1);
        debug!(slot = %id, purpose = request.purpose.label(), "registered expression slot");
        Rc::new(ExpressionSlot::new(ctx, id, request, scope, owner))
    }

    /// Evaluates `slot` in its scope. Failures keep the previous values.
    pub(crate) fn evaluate(
        &self,
        ctx: &FormContext,
        slot: &ExpressionSlot,
        previous: Option<&SlotResult>,
    ) -> SlotResult {
        let base = Environment::new()
            .with_deferred("resource", || vec![ctx.resource()])
            .with_deferred("context", || slot.context_value(ctx))
            .with_value("questionnaire", vec![ctx.questionnaire_json.clone()])
            .with_deferred("qitem", || slot.qitem());
        let env = match slot.scope() {
            Some(scope) => scope.merge_environment(ctx, base),
            None => base,
        };
        match self.evaluator.evaluate(&env, &slot.expression, slot.kind) {
            Ok(values) => SlotResult {
                values,
                error: None,
            },
            Err(err) => {
                warn!(slot = %slot.id, purpose = slot.purpose.label(), error = %err, "expression evaluation failed");
                SlotResult {
                    values: previous.map(|p| p.values.clone()).unwrap_or_default(),
                    error: Some(err.to_string()),
                }
            }
        }
    }

    /// Runs `write`, which returns `true` when nothing had to change.
    ///
    /// Consecutive applied writes of one slot are capped per cycle so a value
    /// that feeds back into its own expression settles or stops.
    pub(crate) fn track_write(
        &self,
        slot: &ExpressionSlot,
        write: impl FnOnce() -> bool,
    ) -> WriteOutcome {
        let used = self.passes.borrow().get(&slot.id).copied().unwrap_or(0);
        if used >= self.max_passes {
            warn!(slot = %slot.id, passes = used, "calculated value did not settle, suppressing writes");
            return WriteOutcome::Suppressed;
        }
        if write() {
            self.passes.borrow_mut().remove(&slot.id);
            WriteOutcome::Stable
        } else {
            *self.passes.borrow_mut().entry(slot.id).or_insert(0) += 1;
            WriteOutcome::Applied
        }
    }

    #[cfg(test)]
    pub(crate) fn passes(&self, slot: &ExpressionSlot) -> usize {
        self.passes.borrow().get(&slot.id).copied().unwrap_or(0)
    }

    /// Starts a new mutation cycle.
    pub(crate) fn begin_cycle(&self) {
        self.passes.borrow_mut().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::{ExpressionKind, JsonExprEvaluator};
    use crate::slot::{SlotPurpose, SlotRequest};

    fn slot(ctx: &FormContext, expression: &str) -> Rc<ExpressionSlot> {
        let request = SlotRequest {
            purpose: SlotPurpose::Calculated,
            name: None,
            expression: expression.to_string(),
            kind: ExpressionKind::Any,
        };
        ctx.coordinator
            .create_slot(ctx, request, &Scope::root(), None)
    }

    #[test]
    fn applied_writes_are_capped_until_the_next_cycle() {
        let ctx = FormContext::detached();
        let slot = slot(&ctx, r#"{"op":"literal","value":1}"#);
        let coordinator = EvaluationCoordinator::new(Rc::new(JsonExprEvaluator), 2);

        assert_eq!(coordinator.track_write(&slot, || false), WriteOutcome::Applied);
        assert_eq!(coordinator.track_write(&slot, || false), WriteOutcome::Applied);
        assert_eq!(coordinator.passes(&slot), 2);
        assert_eq!(coordinator.track_write(&slot, || false), WriteOutcome::Suppressed);

        coordinator.begin_cycle();
        assert_eq!(coordinator.passes(&slot), 0);
        assert_eq!(coordinator.track_write(&slot, || true), WriteOutcome::Stable);
    }

    #[test]
    fn stable_writes_reset_the_counter() {
        let ctx = FormContext::detached();
        let slot = slot(&ctx, r#"{"op":"literal","value":1}"#);
        let coordinator = EvaluationCoordinator::new(Rc::new(JsonExprEvaluator), 3);

        coordinator.track_write(&slot, || false);
        assert_eq!(coordinator.passes(&slot), 1);
        assert_eq!(coordinator.track_write(&slot, || true), WriteOutcome::Stable);
        assert_eq!(coordinator.passes(&slot), 0);
    }

    #[test]
    fn failed_evaluations_keep_the_previous_values() {
        let ctx = FormContext::detached();
        let broken = slot(&ctx, "not json");
        let previous = SlotResult {
            values: vec![Value::from(4)],
            error: None,
        };
        let result = ctx.coordinator.evaluate(&ctx, &broken, Some(&previous));
        assert_eq!(result.values, previous.values);
        assert!(result.error.is_some());
    }

    #[test]
    fn slot_ids_are_unique() {
        let ctx = FormContext::detached();
        let first = slot(&ctx, "1");
        let second = slot(&ctx, "1");
        assert_ne!(first.id, second.id);
    }
}
