//! One compiled expression binding and its cached result.

use std::fmt;
use std::rc::{Rc, Weak};

use serde_json::Value;

use crate::context::FormContext;
use crate::expr::ExpressionKind;
use crate::node::WeakNode;
use crate::reactive::Memo;
use crate::scope::Scope;
use crate::value::{AnswerType, AnswerValue};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub(crate) struct SlotId(pub(crate) usize);

impl fmt::Display for SlotId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "slot#{}", self.0)
    }
}

/// What a slot is evaluated for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) enum SlotPurpose {
    EnableWhen,
    Initial,
    Calculated,
    Answer,
    MinValue,
    MaxValue,
    MinQuantity,
    MaxQuantity,
    MinOccurs,
    MaxOccurs,
    Required,
    Text,
    ReadOnly,
    Repeats,
    Toggle,
    Variable,
}

impl SlotPurpose {
    pub(crate) fn label(self) -> &'static str {
        match self {
            SlotPurpose::EnableWhen => "enableWhenExpression",
            SlotPurpose::Initial => "initialExpression",
            SlotPurpose::Calculated => "calculatedExpression",
            SlotPurpose::Answer => "answerExpression",
            SlotPurpose::MinValue => "minValue",
            SlotPurpose::MaxValue => "maxValue",
            SlotPurpose::MinQuantity => "minQuantity",
            SlotPurpose::MaxQuantity => "maxQuantity",
            SlotPurpose::MinOccurs => "minOccurs",
            SlotPurpose::MaxOccurs => "maxOccurs",
            SlotPurpose::Required => "required",
            SlotPurpose::Text => "text",
            SlotPurpose::ReadOnly => "readOnly",
            SlotPurpose::Repeats => "repeats",
            SlotPurpose::Toggle => "answerOptionsToggleExpression",
            SlotPurpose::Variable => "variable",
        }
    }
}

/// Last evaluation outcome. On failure `values` keeps the last good result.
#[derive(Debug, Clone, Default, PartialEq)]
pub(crate) struct SlotResult {
    pub(crate) values: Vec<Value>,
    pub(crate) error: Option<String>,
}

/// Everything a slot needs besides its placement.
#[derive(Debug, Clone)]
pub(crate) struct SlotRequest {
    pub(crate) purpose: SlotPurpose,
    pub(crate) name: Option<String>,
    pub(crate) expression: String,
    pub(crate) kind: ExpressionKind,
}

pub(crate) struct ExpressionSlot {
    pub(crate) id: SlotId,
    pub(crate) purpose: SlotPurpose,
    pub(crate) name: Option<String>,
    pub(crate) expression: String,
    pub(crate) kind: ExpressionKind,
    scope: Weak<Scope>,
    owner: Option<WeakNode>,
    result: Memo<SlotResult>,
}

impl fmt::Debug for ExpressionSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExpressionSlot")
            .field("id", &self.id)
            .field("purpose", &self.purpose)
            .field("name", &self.name)
            .field("expression", &self.expression)
            .finish()
    }
}

impl ExpressionSlot {
    pub(crate) fn new(
        ctx: &FormContext,
        id: SlotId,
        request: SlotRequest,
        scope: &Rc<Scope>,
        owner: Option<WeakNode>,
    ) -> Self {
        Self {
            id,
            purpose: request.purpose,
            name: request.name,
            expression: request.expression,
            kind: request.kind,
            scope: Rc::downgrade(scope),
            owner,
            result: Memo::new(&ctx.runtime),
        }
    }

    pub(crate) fn scope(&self) -> Option<Rc<Scope>> {
        self.scope.upgrade()
    }

    /// `%context`: the owning node's expression item, or the whole
    /// expression response for questionnaire-level slots.
    pub(crate) fn context_value(&self, ctx: &FormContext) -> Vec<Value> {
        match self.owner.as_ref().and_then(WeakNode::upgrade) {
            Some(node) => vec![node.expression_item()],
            None => vec![ctx.resource()],
        }
    }

    /// `%qitem`: template item of the owning node.
    pub(crate) fn qitem(&self) -> Vec<Value> {
        self.owner
            .as_ref()
            .and_then(WeakNode::upgrade)
            .and_then(|node| serde_json::to_value(node.template()).ok())
            .into_iter()
            .collect()
    }

    pub(crate) fn result(&self, ctx: &FormContext) -> SlotResult {
        self.result
            .get(|previous| ctx.coordinator.evaluate(ctx, self, previous))
    }

    pub(crate) fn values(&self, ctx: &FormContext) -> Vec<Value> {
        self.result(ctx).values
    }

    pub(crate) fn error(&self, ctx: &FormContext) -> Option<String> {
        self.result(ctx).error
    }

    /// First value as a boolean; `None` for an empty or non-boolean result.
    pub(crate) fn boolean(&self, ctx: &FormContext) -> Option<bool> {
        match self.values(ctx).first()? {
            Value::Bool(flag) => Some(*flag),
            Value::String(text) => text.parse().ok(),
            _ => None,
        }
    }

    /// First value as a non-negative integer.
    pub(crate) fn count(&self, ctx: &FormContext) -> Option<usize> {
        let number = self.values(ctx).first()?.as_f64()?;
        Some(if number <= 0.0 { 0 } else { number.floor() as usize })
    }

    pub(crate) fn string(&self, ctx: &FormContext) -> Option<String> {
        match self.values(ctx).first()? {
            Value::String(text) => Some(text.clone()),
            Value::Null => None,
            other => Some(other.to_string()),
        }
    }

    /// Results decoded as `kind`; bare codes and shaped objects both decode,
    /// anything else is dropped.
    pub(crate) fn answer_values(&self, ctx: &FormContext, kind: AnswerType) -> Vec<AnswerValue> {
        self.values(ctx)
            .iter()
            .filter_map(|value| AnswerValue::from_json(kind, value))
            .collect()
    }
}
