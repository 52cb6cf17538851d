//! Answer options: source resolution, toggles, selection bookkeeping.

use std::rc::Rc;

use crate::issue::{Issue, IssueCode};
use crate::node::{AnswerNode, Node, QuestionNode};
use crate::template::QuestionnaireItem;
use crate::terminology::ValueSetState;
use crate::value::{AnswerType, AnswerValue, NULL_TOKEN, value_token};

/// Whether the option list is final.
#[derive(Debug, Clone, Default, PartialEq)]
pub enum OptionsState {
    #[default]
    Ready,
    /// A value-set expansion is still outstanding.
    Loading,
    /// The option source failed; the list holds the fallback.
    Failed(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OptionOrigin {
    /// From the answer expression, value set or `answerOption`.
    Inherent,
    /// A free value the answer constraint allows.
    Custom,
    /// A stored value no option matches; shown but not selectable.
    Legacy,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedOption {
    pub token: String,
    pub value: Option<AnswerValue>,
    pub label: String,
    pub disabled: bool,
    pub origin: OptionOrigin,
}

/// How one current answer relates to the option list.
#[derive(Debug, Clone, PartialEq)]
pub struct Selection {
    pub answer_token: String,
    pub option_token: String,
    pub value: AnswerValue,
    pub origin: OptionOrigin,
}

/// Inherent options with their load state.
#[derive(Debug, Clone, Default, PartialEq)]
pub(crate) struct OptionSet {
    pub(crate) options: Vec<ResolvedOption>,
    pub(crate) state: OptionsState,
}

/// Bookkeeping of a "specify other" answer awaiting confirmation.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct PendingCustom {
    previous: Option<AnswerValue>,
    created: bool,
}

fn push_unique(options: &mut Vec<ResolvedOption>, value: AnswerValue, origin: OptionOrigin) {
    let token = value.token();
    if options.iter().all(|option| option.token != token) {
        options.push(ResolvedOption {
            label: value.label(),
            disabled: origin == OptionOrigin::Legacy,
            value: Some(value),
            token,
            origin,
        });
    }
}

fn static_options(item: &QuestionnaireItem) -> Vec<AnswerValue> {
    item.answer_option
        .iter()
        .filter_map(|option| option.value())
        .collect()
}

fn inherent(value: Option<AnswerValue>, label: String) -> ResolvedOption {
    ResolvedOption {
        token: value_token(value.as_ref()),
        value,
        label,
        disabled: false,
        origin: OptionOrigin::Inherent,
    }
}

impl QuestionNode {
    fn resolve_options(&self) -> OptionSet {
        let ctx = &self.base.ctx;
        let item = &self.base.template;
        let kind = self.answer_type();

        let (values, state) = if let Some(slot) = &self.base.registry.answer {
            let state = slot
                .error(ctx)
                .map_or(OptionsState::Ready, OptionsState::Failed);
            (slot.answer_values(ctx, kind), state)
        } else if let Some(url) = &item.answer_value_set {
            match ctx.value_set(url) {
                ValueSetState::Ready(codings) => (
                    codings.into_iter().map(AnswerValue::Coding).collect(),
                    OptionsState::Ready,
                ),
                ValueSetState::Pending => (Vec::new(), OptionsState::Loading),
                ValueSetState::Failed(error) => (static_options(item), OptionsState::Failed(error)),
            }
        } else {
            (static_options(item), OptionsState::Ready)
        };

        let mut options: Vec<ResolvedOption> = values
            .into_iter()
            .map(|value| {
                let label = value.label();
                inherent(Some(value), label)
            })
            .collect();

        if kind == AnswerType::Boolean && options.is_empty() && !item.has_options() {
            options.push(inherent(Some(AnswerValue::Boolean(true)), "Yes".into()));
            options.push(inherent(Some(AnswerValue::Boolean(false)), "No".into()));
            if !self.repeats() {
                options.push(inherent(None, "Unanswered".into()));
            }
        }

        let toggles = &self.base.registry.toggles;
        for option in &mut options {
            let Some(value) = &option.value else {
                continue;
            };
            let mut named = toggles
                .iter()
                .filter(|toggle| toggle.options.iter().any(|o| o.type_eq(value)))
                .peekable();
            if named.peek().is_some() {
                option.disabled = !named.any(|toggle| toggle.slot.boolean(ctx) == Some(true));
            }
        }

        OptionSet { options, state }
    }

    fn inherent_options(&self) -> OptionSet {
        self.option_set.get(|_| self.resolve_options())
    }

    pub fn options_state(&self) -> OptionsState {
        self.inherent_options().state
    }

    fn allows_custom(&self) -> bool {
        self.base.template.answer_constraint().allows_custom()
    }

    /// Whether this question picks from an option list at all.
    pub fn has_option_list(&self) -> bool {
        self.base.template.has_options() || self.answer_type() == AnswerType::Boolean
    }

    /// A rejected value-set expansion; answer expression failures are
    /// reported with the other slot errors.
    pub(crate) fn option_issues(&self) -> Vec<Issue> {
        if self.base.registry.answer.is_some() {
            return Vec::new();
        }
        match self.options_state() {
            OptionsState::Failed(error) => vec![
                Issue::warning(
                    IssueCode::Processing,
                    format!("answer options could not be expanded: {error}"),
                )
                .at(self.token()),
            ],
            _ => Vec::new(),
        }
    }

    /// Answers whose value is not among the current options.
    pub fn legacy_answers(&self) -> Vec<Selection> {
        self.selected()
            .into_iter()
            .filter(|selection| selection.origin == OptionOrigin::Legacy)
            .collect()
    }

    /// Classifies every non-empty answer against the option list.
    pub fn selected(&self) -> Vec<Selection> {
        let inherent = self.inherent_options().options;
        let remembered = self.custom_options.get();
        self.answers()
            .iter()
            .filter_map(|answer| {
                let value = answer.value.get()?;
                let origin = if inherent
                    .iter()
                    .any(|option| option.value.as_ref().is_some_and(|o| o.type_eq(&value)))
                {
                    OptionOrigin::Inherent
                } else if remembered.iter().any(|custom| custom.type_eq(&value))
                    || self.allows_custom()
                    || !self.has_option_list()
                {
                    OptionOrigin::Custom
                } else {
                    OptionOrigin::Legacy
                };
                let option_token = match origin {
                    OptionOrigin::Inherent => inherent
                        .iter()
                        .find(|option| option.value.as_ref().is_some_and(|o| o.type_eq(&value)))
                        .map(|option| option.token.clone())
                        .unwrap_or_else(|| value.token()),
                    _ => value.token(),
                };
                Some(Selection {
                    answer_token: answer.token().to_string(),
                    option_token,
                    value,
                    origin,
                })
            })
            .collect()
    }

    /// Inherent options, then remembered custom values, then legacy answers.
    pub fn options(&self) -> Vec<ResolvedOption> {
        let mut options = self.inherent_options().options;
        for custom in self.custom_options.get() {
            push_unique(&mut options, custom, OptionOrigin::Custom);
        }
        for selection in self.selected() {
            if selection.origin != OptionOrigin::Inherent {
                push_unique(&mut options, selection.value, selection.origin);
            }
        }
        options
    }

    /// Case-insensitive label search.
    pub fn filter_options(&self, query: &str) -> Vec<ResolvedOption> {
        let query = query.trim().to_lowercase();
        self.options()
            .into_iter()
            .filter(|option| query.is_empty() || option.label.to_lowercase().contains(&query))
            .collect()
    }

    /// Answer currently holding the option with `token`.
    fn find_answer(&self, token: &str) -> Option<Rc<AnswerNode>> {
        let selection = self
            .selected()
            .into_iter()
            .find(|selection| selection.option_token == token)?;
        self.answers
            .get_untracked()
            .into_iter()
            .find(|answer| answer.token() == selection.answer_token)
    }

    /// Selects the option with `token`. Disabled options are refused.
    pub fn select_option(self: &Rc<Self>, token: &str) -> bool {
        let Some(option) = self.options().into_iter().find(|option| option.token == token) else {
            return false;
        };
        if option.disabled {
            return false;
        }
        let Some(value) = option.value else {
            return self.set_value_by_user(None);
        };
        if !self.repeats() {
            return self.set_value_by_user(Some(value));
        }
        if self.find_answer(token).is_some() {
            return true;
        }
        let empty = self.answers.get_untracked().into_iter().find(|answer| {
            answer.value.get_untracked().is_none() && answer.pending.get_untracked().is_none()
        });
        match empty {
            Some(answer) => answer.set_value_by_user(Some(value)),
            None => self.add_answer(Some(value)).is_some(),
        }
    }

    pub fn deselect_option(self: &Rc<Self>, token: &str) -> bool {
        if token == NULL_TOKEN {
            return true;
        }
        let Some(answer) = self.find_answer(token) else {
            return false;
        };
        if self.repeats() && self.can_remove() {
            self.remove_answer(&answer)
        } else {
            answer.set_value_by_user(None)
        }
    }

    fn pending_answer(&self) -> Option<Rc<AnswerNode>> {
        self.answers
            .get_untracked()
            .into_iter()
            .find(|answer| answer.pending.get_untracked().is_some())
    }

    /// Reserves an answer for a free value.
    pub fn begin_custom_answer(self: &Rc<Self>) -> Option<Rc<AnswerNode>> {
        if !self.allows_custom() || self.is_read_only() {
            return None;
        }
        if let Some(pending) = self.pending_answer() {
            return Some(pending);
        }
        let reusable = if self.repeats() {
            self.answers
                .get_untracked()
                .into_iter()
                .find(|answer| answer.value.get_untracked().is_none())
        } else {
            self.answers.get_untracked().first().cloned()
        };
        let (answer, created) = match reusable {
            Some(answer) => (answer, false),
            None => {
                if !self.can_add() {
                    return None;
                }
                let answer = self.add_answer(None)?;
                (answer, true)
            }
        };
        let previous = answer.value.get_untracked();
        answer.pending.set(Some(PendingCustom { previous, created }));
        answer.value.set(None);
        self.commit_user_edit();
        Some(answer)
    }

    /// Drops the reserved answer, or restores what it held before.
    pub fn cancel_custom_answer(self: &Rc<Self>) -> bool {
        let Some(answer) = self.pending_answer() else {
            return false;
        };
        let Some(pending) = answer.pending.get_untracked() else {
            return false;
        };
        answer.pending.set(None);
        if pending.created {
            self.detach_answer(&answer)
        } else {
            answer.value.set(pending.previous);
            self.commit_user_edit();
            true
        }
    }

    /// Stores `value` in the reserved answer and remembers it as an option.
    pub fn confirm_custom_answer(self: &Rc<Self>, value: AnswerValue) -> bool {
        if !value.is_meaningful() {
            return false;
        }
        let Some(answer) = self.pending_answer() else {
            return false;
        };
        answer.pending.set(None);
        answer.value.set(Some(value.clone()));
        self.remember_custom(value);
        self.commit_user_edit();
        true
    }

    fn remember_custom(&self, value: AnswerValue) {
        let known = self
            .custom_options
            .with(|customs| customs.iter().any(|custom| custom.type_eq(&value)));
        if !known {
            self.custom_options.update(|customs| customs.push(value));
        }
    }

    /// Keeps custom answers listed after they are deselected.
    pub(crate) fn remember_custom_selections(&self) {
        if self.options_state() != OptionsState::Ready {
            return;
        }
        for selection in self.selected() {
            if selection.origin == OptionOrigin::Custom {
                self.remember_custom(selection.value);
            }
        }
    }
}

impl Node {
    /// Options of a question node; empty for any other node.
    pub fn options(&self) -> Vec<ResolvedOption> {
        self.as_question()
            .map(|question| question.options())
            .unwrap_or_default()
    }
}
