//! Boundary to the expression language.
//!
//! The engine never interprets expression text itself. Every slot hands its
//! text to an [`ExpressionEvaluator`] together with an [`Environment`] that
//! resolves `%name` references lazily.

mod json;

pub use json::{JSON_EXPR_LANGUAGE, JsonExpr, JsonExprEvaluator};

use std::collections::BTreeMap;
use std::fmt;

use once_cell::unsync::OnceCell;
use serde_json::Value;

use crate::error::EvalError;
use crate::value::AnswerType;

/// Type the caller expects back from an expression.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExpressionKind {
    Boolean,
    Integer,
    String,
    Quantity,
    Answer(AnswerType),
    Any,
}

/// `(environment, expression, declared type) -> collection | error`.
pub trait ExpressionEvaluator {
    fn evaluate(
        &self,
        env: &Environment<'_>,
        expression: &str,
        kind: ExpressionKind,
    ) -> Result<Vec<Value>, EvalError>;
}

impl<F> ExpressionEvaluator for F
where
    F: Fn(&Environment<'_>, &str, ExpressionKind) -> Result<Vec<Value>, EvalError>,
{
    fn evaluate(
        &self,
        env: &Environment<'_>,
        expression: &str,
        kind: ExpressionKind,
    ) -> Result<Vec<Value>, EvalError> {
        self(env, expression, kind)
    }
}

enum Binding<'a> {
    Ready(Vec<Value>),
    Deferred {
        cell: OnceCell<Vec<Value>>,
        load: Box<dyn Fn() -> Vec<Value> + 'a>,
    },
}

type Fallback<'a> = Box<dyn Fn(&str) -> Option<Vec<Value>> + 'a>;

/// Named values visible to one evaluation.
///
/// Explicit bindings win; any other name goes to the fallback, which for slot
/// evaluations walks the scope chain for a variable of that name.
#[derive(Default)]
pub struct Environment<'a> {
    bindings: BTreeMap<String, Binding<'a>>,
    fallback: Option<Fallback<'a>>,
}

impl fmt::Debug for Environment<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Environment")
            .field("bindings", &self.bindings.keys().collect::<Vec<_>>())
            .field("fallback", &self.fallback.is_some())
            .finish()
    }
}

impl<'a> Environment<'a> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_value(mut self, name: impl Into<String>, values: Vec<Value>) -> Self {
        self.bindings.insert(name.into(), Binding::Ready(values));
        self
    }

    /// Binds `name` to a value computed on first access.
    pub fn with_deferred(
        mut self,
        name: impl Into<String>,
        load: impl Fn() -> Vec<Value> + 'a,
    ) -> Self {
        self.bindings.insert(
            name.into(),
            Binding::Deferred {
                cell: OnceCell::new(),
                load: Box::new(load),
            },
        );
        self
    }

    pub fn with_fallback(mut self, fallback: impl Fn(&str) -> Option<Vec<Value>> + 'a) -> Self {
        self.fallback = Some(Box::new(fallback));
        self
    }

    /// Resolves `name` (with or without the leading `%`).
    pub fn get(&self, name: &str) -> Option<Vec<Value>> {
        let name = name.strip_prefix('%').unwrap_or(name);
        match self.bindings.get(name) {
            Some(Binding::Ready(values)) => Some(values.clone()),
            Some(Binding::Deferred { cell, load }) => Some(cell.get_or_init(|| load()).clone()),
            None => self.fallback.as_ref().and_then(|fallback| fallback(name)),
        }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.bindings
            .contains_key(name.strip_prefix('%').unwrap_or(name))
    }
}
