use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use serde_json::Value;

use crate::config::FormConfig;
use crate::coordinator::EvaluationCoordinator;
use crate::expr::ExpressionEvaluator;
use crate::reactive::{Runtime, Signal};
use crate::template::Questionnaire;
use crate::terminology::ValueSetState;

/// State shared by every node of one form.
#[derive(Debug)]
pub(crate) struct FormContext {
    pub(crate) runtime: Rc<Runtime>,
    pub(crate) coordinator: EvaluationCoordinator,
    pub(crate) config: FormConfig,
    pub(crate) questionnaire: Rc<Questionnaire>,
    pub(crate) questionnaire_json: Value,
    pub(crate) submit_attempted: Signal<bool>,
    value_sets: RefCell<HashMap<String, Rc<Signal<ValueSetState>>>>,
}

impl FormContext {
    pub(crate) fn new(
        questionnaire: Rc<Questionnaire>,
        evaluator: Rc<dyn ExpressionEvaluator>,
        config: FormConfig,
    ) -> Self {
        let runtime = Runtime::new();
        Self {
            coordinator: EvaluationCoordinator::new(evaluator, config.max_evaluation_passes),
            questionnaire_json: serde_json::to_value(&*questionnaire).unwrap_or(Value::Null),
            submit_attempted: Signal::new(&runtime, false),
            value_sets: RefCell::new(HashMap::new()),
            questionnaire,
            config,
            runtime,
        }
    }

    /// Settles every reaction after a mutation.
    pub(crate) fn flush(&self) -> bool {
        self.coordinator.begin_cycle();
        self.runtime.flush(self.config.max_flush_passes)
    }

    pub(crate) fn resource(&self) -> Value {
        self.coordinator.resource()
    }

    fn value_set_signal(&self, url: &str) -> Rc<Signal<ValueSetState>> {
        self.value_sets
            .borrow_mut()
            .entry(url.to_string())
            .or_insert_with(|| Rc::new(Signal::new(&self.runtime, ValueSetState::Pending)))
            .clone()
    }

    /// Current expansion state of `url`, tracked.
    pub(crate) fn value_set(&self, url: &str) -> ValueSetState {
        self.value_set_signal(url).get()
    }

    pub(crate) fn publish_value_set(&self, url: &str, state: ValueSetState) {
        self.value_set_signal(url).set(state);
    }
}

#[cfg(test)]
impl FormContext {
    /// Context of an empty questionnaire with the builtin evaluator.
    pub(crate) fn detached() -> Self {
        Self::new(
            Rc::new(Questionnaire::default()),
            Rc::new(crate::expr::JsonExprEvaluator),
            FormConfig::default(),
        )
    }
}
