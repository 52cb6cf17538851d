//! Per-node set of expression slots, built once from the template item.

use std::rc::Rc;

use tracing::warn;

use crate::context::FormContext;
use crate::expr::ExpressionKind;
use crate::issue::{Issue, IssueCode};
use crate::node::WeakNode;
use crate::scope::Scope;
use crate::slot::{ExpressionSlot, SlotPurpose, SlotRequest};
use crate::template::{Expression, Extension, Questionnaire, QuestionnaireItem, urls};
use crate::value::{AnswerType, AnswerValue};

/// Which slots a node builds for its template item.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum RegistryMode {
    All,
    /// Repeating-group containers; variables belong to each instance.
    WithoutVariables,
    /// Repeating-group instances.
    VariablesOnly,
}

/// One option toggle: the options it names and the expression enabling them.
#[derive(Debug, Clone)]
pub(crate) struct OptionToggle {
    pub(crate) options: Vec<AnswerValue>,
    pub(crate) slot: Rc<ExpressionSlot>,
}

#[derive(Debug, Default)]
pub(crate) struct ExpressionRegistry {
    pub(crate) enable_when: Option<Rc<ExpressionSlot>>,
    pub(crate) initial: Option<Rc<ExpressionSlot>>,
    pub(crate) calculated: Option<Rc<ExpressionSlot>>,
    pub(crate) answer: Option<Rc<ExpressionSlot>>,
    pub(crate) min_value: Option<Rc<ExpressionSlot>>,
    pub(crate) max_value: Option<Rc<ExpressionSlot>>,
    pub(crate) min_quantity: Option<Rc<ExpressionSlot>>,
    pub(crate) max_quantity: Option<Rc<ExpressionSlot>>,
    pub(crate) min_occurs: Option<Rc<ExpressionSlot>>,
    pub(crate) max_occurs: Option<Rc<ExpressionSlot>>,
    pub(crate) required: Option<Rc<ExpressionSlot>>,
    pub(crate) text: Option<Rc<ExpressionSlot>>,
    pub(crate) read_only: Option<Rc<ExpressionSlot>>,
    pub(crate) repeats: Option<Rc<ExpressionSlot>>,
    pub(crate) toggles: Vec<OptionToggle>,
    pub(crate) variables: Vec<Rc<ExpressionSlot>>,
}

struct Builder<'a> {
    ctx: &'a FormContext,
    scope: &'a Rc<Scope>,
    owner: Option<WeakNode>,
    issues: Vec<Issue>,
}

impl Builder<'_> {
    fn slot(
        &mut self,
        purpose: SlotPurpose,
        expression: Option<Expression>,
        kind: ExpressionKind,
    ) -> Option<Rc<ExpressionSlot>> {
        let expression = expression?;
        let Some(text) = expression.expression.filter(|text| !text.trim().is_empty()) else {
            self.issues.push(Issue::warning(
                IssueCode::Invalid,
                format!("{} extension has no expression text", purpose.label()),
            ));
            return None;
        };
        let request = SlotRequest {
            purpose,
            name: expression.name,
            expression: text,
            kind,
        };
        Some(
            self.ctx
                .coordinator
                .create_slot(self.ctx, request, self.scope, self.owner.clone()),
        )
    }

    fn variables(&mut self, declared: Vec<Expression>) -> Vec<Rc<ExpressionSlot>> {
        let mut slots = Vec::new();
        for expression in declared {
            let Some(name) = expression.name.clone().filter(|name| !name.is_empty()) else {
                self.issues.push(Issue::warning(
                    IssueCode::Invalid,
                    "variable extension is missing a name",
                ));
                continue;
            };
            let Some(slot) = self.slot(SlotPurpose::Variable, Some(expression), ExpressionKind::Any)
            else {
                continue;
            };
            match self.scope.register_expression(&name, &slot) {
                Ok(()) => slots.push(slot),
                Err(err) => {
                    warn!(%name, error = %err, "variable ignored");
                    self.issues
                        .push(Issue::warning(IssueCode::Invalid, err.to_string()));
                }
            }
        }
        slots
    }
}

impl ExpressionRegistry {
    /// Builds the registry of `item`, binding variables into `scope`.
    pub(crate) fn for_item(
        ctx: &FormContext,
        item: &QuestionnaireItem,
        scope: &Rc<Scope>,
        owner: WeakNode,
        mode: RegistryMode,
    ) -> (Self, Vec<Issue>) {
        let mut builder = Builder {
            ctx,
            scope,
            owner: Some(owner),
            issues: Vec::new(),
        };
        let mut registry = Self::default();

        if mode != RegistryMode::WithoutVariables {
            registry.variables = builder.variables(item.variables());
        }
        if mode == RegistryMode::VariablesOnly {
            return (registry, builder.issues);
        }

        let answer_kind = item
            .answer_type()
            .map_or(ExpressionKind::Any, ExpressionKind::Answer);
        let bound = |url: &str| item.extension(url).and_then(Extension::expression);

        registry.enable_when = builder.slot(
            SlotPurpose::EnableWhen,
            item.expression(urls::ENABLE_WHEN_EXPRESSION),
            ExpressionKind::Boolean,
        );
        registry.initial = builder.slot(
            SlotPurpose::Initial,
            item.expression(urls::INITIAL_EXPRESSION),
            answer_kind,
        );
        registry.calculated = builder.slot(
            SlotPurpose::Calculated,
            item.expression(urls::CALCULATED_EXPRESSION),
            answer_kind,
        );
        registry.answer = builder.slot(
            SlotPurpose::Answer,
            item.expression(urls::ANSWER_EXPRESSION),
            answer_kind,
        );
        registry.min_value = builder.slot(SlotPurpose::MinValue, bound(urls::MIN_VALUE), answer_kind);
        registry.max_value = builder.slot(SlotPurpose::MaxValue, bound(urls::MAX_VALUE), answer_kind);
        registry.min_quantity = builder.slot(
            SlotPurpose::MinQuantity,
            bound(urls::MIN_QUANTITY),
            ExpressionKind::Quantity,
        );
        registry.max_quantity = builder.slot(
            SlotPurpose::MaxQuantity,
            bound(urls::MAX_QUANTITY),
            ExpressionKind::Quantity,
        );
        registry.min_occurs = builder.slot(
            SlotPurpose::MinOccurs,
            bound(urls::MIN_OCCURS),
            ExpressionKind::Integer,
        );
        registry.max_occurs = builder.slot(
            SlotPurpose::MaxOccurs,
            bound(urls::MAX_OCCURS),
            ExpressionKind::Integer,
        );
        registry.required = builder.slot(
            SlotPurpose::Required,
            QuestionnaireItem::element_expression(item.required_element.as_ref()),
            ExpressionKind::Boolean,
        );
        registry.text = builder.slot(
            SlotPurpose::Text,
            QuestionnaireItem::element_expression(item.text_element.as_ref()),
            ExpressionKind::String,
        );
        registry.read_only = builder.slot(
            SlotPurpose::ReadOnly,
            QuestionnaireItem::element_expression(item.read_only_element.as_ref()),
            ExpressionKind::Boolean,
        );
        registry.repeats = builder.slot(
            SlotPurpose::Repeats,
            QuestionnaireItem::element_expression(item.repeats_element.as_ref()),
            ExpressionKind::Boolean,
        );

        for (index, toggle) in item.toggles().into_iter().enumerate() {
            if toggle.options.is_empty() {
                builder.issues.push(Issue::warning(
                    IssueCode::Invalid,
                    format!("option toggle #{index} names no option"),
                ));
                continue;
            }
            if toggle.expression.is_none() {
                builder.issues.push(Issue::warning(
                    IssueCode::Invalid,
                    format!("option toggle #{index} has no expression"),
                ));
                continue;
            }
            if let Some(slot) =
                builder.slot(SlotPurpose::Toggle, toggle.expression, ExpressionKind::Boolean)
            {
                registry.toggles.push(OptionToggle {
                    options: toggle.options,
                    slot,
                });
            }
        }

        (registry, builder.issues)
    }

    /// Questionnaire-level variables, bound into the root scope.
    pub(crate) fn for_questionnaire(
        ctx: &FormContext,
        questionnaire: &Questionnaire,
        scope: &Rc<Scope>,
    ) -> (Self, Vec<Issue>) {
        let mut builder = Builder {
            ctx,
            scope,
            owner: None,
            issues: Vec::new(),
        };
        let registry = Self {
            variables: builder.variables(questionnaire.variables()),
            ..Self::default()
        };
        (registry, builder.issues)
    }

    /// Every slot, for error reporting.
    pub(crate) fn slots(&self) -> impl Iterator<Item = &Rc<ExpressionSlot>> {
        [
            &self.enable_when,
            &self.initial,
            &self.calculated,
            &self.answer,
            &self.min_value,
            &self.max_value,
            &self.min_quantity,
            &self.max_quantity,
            &self.min_occurs,
            &self.max_occurs,
            &self.required,
            &self.text,
            &self.read_only,
            &self.repeats,
        ]
        .into_iter()
        .flatten()
        .chain(self.toggles.iter().map(|toggle| &toggle.slot))
        .chain(self.variables.iter())
    }

    /// Evaluation failures as recoverable issues.
    pub(crate) fn evaluation_issues(&self, ctx: &FormContext) -> Vec<Issue> {
        self.slots()
            .filter_map(|slot| {
                slot.error(ctx).map(|error| {
                    Issue::warning(
                        IssueCode::Processing,
                        format!("{} failed: {error}", slot.purpose.label()),
                    )
                })
            })
            .collect()
    }

    /// Value bound of `purpose` as `kind`: expression first, then the static
    /// extension value.
    pub(crate) fn bound(
        &self,
        ctx: &FormContext,
        item: &QuestionnaireItem,
        purpose: SlotPurpose,
        kind: AnswerType,
    ) -> Option<AnswerValue> {
        let (slot, url) = match purpose {
            SlotPurpose::MinValue => (&self.min_value, urls::MIN_VALUE),
            SlotPurpose::MaxValue => (&self.max_value, urls::MAX_VALUE),
            SlotPurpose::MinQuantity => (&self.min_quantity, urls::MIN_QUANTITY),
            SlotPurpose::MaxQuantity => (&self.max_quantity, urls::MAX_QUANTITY),
            _ => return None,
        };
        slot.as_ref()
            .and_then(|slot| slot.answer_values(ctx, kind).into_iter().next())
            .or_else(|| item.extension(url).and_then(|ext| ext.typed_as(kind)))
    }

    /// Occurrence bound: expression, then static extension value.
    pub(crate) fn occurs(
        &self,
        ctx: &FormContext,
        item: &QuestionnaireItem,
        purpose: SlotPurpose,
    ) -> Option<usize> {
        let (slot, url) = match purpose {
            SlotPurpose::MinOccurs => (&self.min_occurs, urls::MIN_OCCURS),
            SlotPurpose::MaxOccurs => (&self.max_occurs, urls::MAX_OCCURS),
            _ => return None,
        };
        slot.as_ref().and_then(|slot| slot.count(ctx)).or_else(|| {
            item.extension(url)
                .and_then(Extension::integer)
                .map(|value| usize::try_from(value).unwrap_or(0))
        })
    }
}
