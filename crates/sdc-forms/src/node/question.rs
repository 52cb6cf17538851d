use std::cell::Cell;
use std::rc::{Rc, Weak};

use once_cell::unsync::OnceCell;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{
    AnswerNode, Node, NodeBase, Placement, SnapshotMode, WeakNode, child_token, seeding_floor,
};
use crate::coordinator::WriteOutcome;
use crate::issue::Issue;
use crate::options::OptionSet;
use crate::reactive::{Memo, Signal};
use crate::registry::RegistryMode;
use crate::response::{ResponseAnswer, ResponseItem};
use crate::slot::SlotPurpose;
use crate::validate;
use crate::value::{AnswerType, AnswerValue};

/// Provenance of a question's current answers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Lifecycle {
    #[default]
    Pristine,
    Template,
    Response,
    Expression,
    /// Edited by the user; calculated values no longer overwrite it.
    Manual,
}

/// A question and its answers.
#[derive(Debug)]
pub struct QuestionNode {
    pub(crate) base: NodeBase,
    answer_type: AnswerType,
    pub(crate) answers: Signal<Vec<Rc<AnswerNode>>>,
    pub(crate) lifecycle: Signal<Lifecycle>,
    next_answer: Cell<usize>,
    calculation_checked: Cell<bool>,
    pub(crate) custom_options: Signal<Vec<AnswerValue>>,
    pub(crate) option_set: Memo<OptionSet>,
    pattern: OnceCell<Option<Result<Regex, regex::Error>>>,
}

impl QuestionNode {
    pub(crate) fn new(placement: Placement, response: Option<&ResponseItem>) -> Rc<Self> {
        let scope = placement.scope.extend(false);
        let runtime = placement.ctx.runtime.clone();
        let answer_type = placement
            .template
            .answer_type()
            .unwrap_or(AnswerType::String);
        let question = Rc::new_cyclic(|weak: &Weak<Self>| Self {
            base: NodeBase::new(
                Placement { scope, ..placement },
                WeakNode::Question(weak.clone()),
                Some(RegistryMode::All),
            ),
            answer_type,
            answers: Signal::new(&runtime, Vec::new()),
            lifecycle: Signal::new(&runtime, Lifecycle::Pristine),
            next_answer: Cell::new(0),
            calculation_checked: Cell::new(false),
            custom_options: Signal::new(&runtime, Vec::new()),
            option_set: Memo::new(&runtime),
            pattern: OnceCell::new(),
        });
        question.seed(response);
        question.install_reactions();
        question
    }

    /// Response answers win over `initial`, which wins over `initialSelected`.
    fn seed(self: &Rc<Self>, response: Option<&ResponseItem>) {
        let template = self.base.template.clone();
        let (answers, lifecycle) = match response.filter(|item| !item.answer.is_empty()) {
            Some(item) => (
                item.answer
                    .iter()
                    .map(|answer| self.make_answer(answer.value.clone(), &answer.item))
                    .collect::<Vec<_>>(),
                Lifecycle::Response,
            ),
            None => {
                let mut values = template.initial_values();
                if values.is_empty() {
                    values = template.initially_selected();
                }
                let lifecycle = if values.is_empty() {
                    Lifecycle::Pristine
                } else {
                    Lifecycle::Template
                };
                (
                    values
                        .into_iter()
                        .map(|value| self.make_answer(Some(value), &[]))
                        .collect(),
                    lifecycle,
                )
            }
        };
        let mut answers = answers;
        if !template.is_repeating() && answers.len() > 1 {
            for extra in answers.split_off(1) {
                Node::Answer(extra).dispose();
            }
        }
        debug!(token = %self.base.token, ?lifecycle, answers = answers.len(), "seeded question");
        self.answers.update(|current| *current = answers);
        self.lifecycle.set(lifecycle);
    }

    fn make_answer(
        self: &Rc<Self>,
        value: Option<AnswerValue>,
        responses: &[ResponseItem],
    ) -> Rc<AnswerNode> {
        let index = self.next_answer.get();
        self.next_answer.set(index + 1);
        let token = child_token(Some(&self.base.token), &index.to_string());
        AnswerNode::new(self, token, value, responses)
    }

    fn install_reactions(self: &Rc<Self>) {
        if let Some(slot) = self.base.registry.initial.clone() {
            let weak = Rc::downgrade(self);
            self.base.add_reaction("initial-expression", move || {
                let Some(question) = weak.upgrade() else {
                    return;
                };
                if question.lifecycle.get() != Lifecycle::Pristine {
                    return;
                }
                let values = slot.answer_values(&question.base.ctx, question.answer_type);
                if values.is_empty() {
                    return;
                }
                question.replace_values(values);
                question.lifecycle.set(Lifecycle::Expression);
            });
        }

        if let Some(slot) = self.base.registry.calculated.clone() {
            let weak = Rc::downgrade(self);
            self.base.add_reaction("calculated-expression", move || {
                let Some(question) = weak.upgrade() else {
                    return;
                };
                let lifecycle = question.lifecycle.get();
                if lifecycle == Lifecycle::Manual {
                    return;
                }
                let ctx = &question.base.ctx;
                let result = slot.result(ctx);
                if result.error.is_some() {
                    return;
                }
                let values = slot.answer_values(ctx, question.answer_type);
                if !question.calculation_checked.replace(true)
                    && lifecycle == Lifecycle::Response
                    && !question.matches_values(&values)
                {
                    debug!(token = %question.base.token, "stored answer differs from calculation, keeping it");
                    question.lifecycle.set(Lifecycle::Manual);
                    return;
                }
                let outcome = ctx.coordinator.track_write(&slot, || {
                    if question.matches_values(&values) {
                        return true;
                    }
                    question.replace_values(values.clone());
                    question.lifecycle.set(Lifecycle::Expression);
                    false
                });
                if outcome == WriteOutcome::Applied {
                    debug!(token = %question.base.token, "calculated value applied");
                }
            });
        }

        let weak = Rc::downgrade(self);
        self.base.add_reaction("answer-baseline", move || {
            let Some(question) = weak.upgrade() else {
                return;
            };
            if !question.repeats() && question.answers.with(Vec::len) > 1 {
                let extra = question.answers.update(|answers| answers.split_off(1));
                for answer in extra {
                    Node::Answer(answer).dispose();
                }
            }
            let floor = seeding_floor(
                &question.base,
                question.min_occurs(),
                question.max_occurs(),
            );
            while question.answers.with(Vec::len) < floor && question.can_add() {
                let answer = question
                    .base
                    .ctx
                    .runtime
                    .untracked(|| question.make_answer(None, &[]));
                question.answers.update(|answers| answers.push(answer));
            }
        });

        if self.base.template.answer_constraint().allows_custom() {
            let weak = Rc::downgrade(self);
            self.base.add_reaction("remember-custom-answers", move || {
                if let Some(question) = weak.upgrade() {
                    question.remember_custom_selections();
                }
            });
        }
    }

    /// Current answer values, in order, ignoring empty answers.
    pub fn answer_values(&self) -> Vec<AnswerValue> {
        self.answers
            .get()
            .iter()
            .filter_map(|answer| answer.value.get())
            .collect()
    }

    fn matches_values(&self, values: &[AnswerValue]) -> bool {
        let current = self.answer_values();
        current.len() == values.len() && current.iter().zip(values).all(|(a, b)| a == b)
    }

    /// Writes `values` into the answer list, reusing answers in place.
    fn replace_values(self: &Rc<Self>, mut values: Vec<AnswerValue>) {
        if !self.repeats() {
            values.truncate(1);
        }
        let answers = self.answers.get_untracked();
        if values.is_empty() {
            for answer in &answers {
                answer.value.set(None);
            }
            return;
        }
        for (index, value) in values.iter().enumerate() {
            match answers.get(index) {
                Some(answer) => {
                    answer.value.set(Some(value.clone()));
                }
                None => {
                    let answer = self.make_answer(Some(value.clone()), &[]);
                    self.answers.update(|answers| answers.push(answer));
                }
            }
        }
        if answers.len() > values.len() {
            let extra = self.answers.update(|answers| answers.split_off(values.len()));
            for answer in extra {
                Node::Answer(answer).dispose();
            }
        }
    }

    pub fn token(&self) -> &str {
        &self.base.token
    }

    pub fn link_id(&self) -> &str {
        self.base.link_id()
    }

    pub fn text(&self) -> Option<String> {
        self.base.text()
    }

    pub fn answer_type(&self) -> AnswerType {
        self.answer_type
    }

    pub fn answers(&self) -> Vec<Rc<AnswerNode>> {
        self.answers.get()
    }

    pub fn lifecycle(&self) -> Lifecycle {
        self.lifecycle.get()
    }

    pub fn required(&self) -> bool {
        self.base
            .registry
            .required
            .as_ref()
            .and_then(|slot| slot.boolean(&self.base.ctx))
            .unwrap_or_else(|| self.base.template.is_required())
    }

    pub fn repeats(&self) -> bool {
        self.base
            .registry
            .repeats
            .as_ref()
            .and_then(|slot| slot.boolean(&self.base.ctx))
            .unwrap_or_else(|| self.base.template.is_repeating())
    }

    pub fn min_occurs(&self) -> usize {
        self.base
            .registry
            .occurs(&self.base.ctx, &self.base.template, SlotPurpose::MinOccurs)
            .unwrap_or(usize::from(self.required()))
    }

    /// The anchored `regex` constraint, compiled on first use.
    pub(crate) fn pattern(&self) -> Option<&Result<Regex, regex::Error>> {
        self.pattern
            .get_or_init(|| self.base.template.regex().map(validate::compile_pattern))
            .as_ref()
    }

    /// Always `Some(1)` for a non-repeating question; `None` is unbounded.
    pub fn max_occurs(&self) -> Option<usize> {
        if !self.repeats() {
            return Some(1);
        }
        self.base
            .registry
            .occurs(&self.base.ctx, &self.base.template, SlotPurpose::MaxOccurs)
    }

    pub fn is_read_only(self: &Rc<Self>) -> bool {
        Node::Question(self.clone()).read_only()
    }

    pub fn can_add(self: &Rc<Self>) -> bool {
        let len = self.answers.with(Vec::len);
        !self.is_read_only() && self.max_occurs().is_none_or(|max| len < max)
    }

    pub fn can_remove(self: &Rc<Self>) -> bool {
        let len = self.answers.with(Vec::len);
        !self.is_read_only() && len > self.min_occurs()
    }

    /// Marks a user edit: dirty, manual, then settles the form.
    pub(crate) fn commit_user_edit(&self) {
        self.lifecycle.set(Lifecycle::Manual);
        self.base.mark_dirty();
        self.base.ctx.flush();
    }

    pub fn add_answer(self: &Rc<Self>, value: Option<AnswerValue>) -> Option<Rc<AnswerNode>> {
        if !self.can_add() {
            return None;
        }
        let answer = self.make_answer(value, &[]);
        self.answers.update(|answers| answers.push(answer.clone()));
        self.commit_user_edit();
        Some(answer)
    }

    pub fn remove_answer(self: &Rc<Self>, answer: &Rc<AnswerNode>) -> bool {
        if !self.can_remove() {
            return false;
        }
        self.detach_answer(answer)
    }

    pub(crate) fn detach_answer(&self, answer: &Rc<AnswerNode>) -> bool {
        let removed = self.answers.update(|answers| {
            let position = answers.iter().position(|a| Rc::ptr_eq(a, answer))?;
            Some(answers.remove(position))
        });
        let Some(removed) = removed else {
            return false;
        };
        Node::Answer(removed).dispose();
        self.commit_user_edit();
        true
    }

    /// Sets the first answer, creating it when needed.
    pub fn set_value_by_user(self: &Rc<Self>, value: Option<AnswerValue>) -> bool {
        if self.is_read_only() {
            return false;
        }
        match self.answers.get_untracked().first() {
            Some(answer) => {
                answer.value.set(value);
            }
            None => {
                if value.is_none() {
                    return true;
                }
                if !self.can_add() {
                    return false;
                }
                let answer = self.make_answer(value, &[]);
                self.answers.update(|answers| answers.push(answer));
            }
        }
        self.commit_user_edit();
        true
    }

    /// Drops all answers and re-seeds from the template.
    pub fn reset(self: &Rc<Self>) {
        let old = self.answers.update(std::mem::take);
        for answer in old {
            Node::Answer(answer).dispose();
        }
        self.custom_options.update(Vec::clear);
        self.calculation_checked.set(false);
        self.base.dirty.set(false);
        self.seed(None);
        self.base.ctx.flush();
    }

    pub(crate) fn validation_issues(self: &Rc<Self>) -> Vec<Issue> {
        validate::question_issues(self)
    }

    pub(crate) fn response_item(&self, mode: SnapshotMode) -> Option<ResponseItem> {
        let answers: Vec<ResponseAnswer> = self
            .answers
            .get()
            .iter()
            .filter_map(|answer| answer.response_answer(mode))
            .collect();
        if mode == SnapshotMode::Persisted && answers.is_empty() {
            return None;
        }
        Some(ResponseItem {
            link_id: self.base.link_id().to_string(),
            text: self.base.template.text.clone(),
            answer: answers,
            item: Vec::new(),
        })
    }
}
