use std::rc::{Rc, Weak};

use super::{Node, NodeBase, Placement, QuestionNode, SnapshotMode, WeakNode, build_children};
use crate::options::PendingCustom;
use crate::reactive::Signal;
use crate::response::{ResponseAnswer, ResponseItem};
use crate::value::AnswerValue;

/// One answer of a question, with the items nested under it.
#[derive(Debug)]
pub struct AnswerNode {
    pub(crate) base: NodeBase,
    question: Weak<QuestionNode>,
    pub(crate) value: Signal<Option<AnswerValue>>,
    pub(crate) pending: Signal<Option<PendingCustom>>,
    children: Vec<Node>,
}

impl AnswerNode {
    /// Each answer owns a scope so nested items resolve to their own answer.
    pub(crate) fn new(
        question: &Rc<QuestionNode>,
        token: String,
        value: Option<AnswerValue>,
        responses: &[ResponseItem],
    ) -> Rc<Self> {
        let ctx = question.base.ctx.clone();
        let template = question.base.template.clone();
        let scope = question.base.scope.extend(true);
        Rc::new_cyclic(|weak: &Weak<Self>| {
            let me = WeakNode::Answer(weak.clone());
            let base = NodeBase::new(
                Placement {
                    ctx: ctx.clone(),
                    template: template.clone(),
                    token: token.clone(),
                    parent: Some(WeakNode::Question(Rc::downgrade(question))),
                    scope: scope.clone(),
                },
                me.clone(),
                None,
            );
            let children = build_children(&ctx, &template.item, Some(me), Some(&token), &scope, responses);
            Self {
                value: Signal::new(&ctx.runtime, value),
                pending: Signal::new(&ctx.runtime, None),
                question: Rc::downgrade(question),
                base,
                children,
            }
        })
    }

    pub fn token(&self) -> &str {
        &self.base.token
    }

    pub fn value(&self) -> Option<AnswerValue> {
        self.value.get()
    }

    pub fn question(&self) -> Option<Rc<QuestionNode>> {
        self.question.upgrade()
    }

    pub fn children(&self) -> &[Node] {
        &self.children
    }

    /// Reserved by a "specify other" interaction that is not confirmed yet.
    pub fn is_pending(&self) -> bool {
        self.pending.with(Option::is_some)
    }

    pub fn set_value_by_user(self: &Rc<Self>, value: Option<AnswerValue>) -> bool {
        let Some(question) = self.question() else {
            return false;
        };
        if Node::Answer(self.clone()).read_only() {
            return false;
        }
        self.value.set(value);
        self.base.mark_dirty();
        question.commit_user_edit();
        true
    }

    pub(crate) fn response_answer(&self, mode: SnapshotMode) -> Option<ResponseAnswer> {
        let value = self.value.get();
        let item: Vec<ResponseItem> = self
            .children
            .iter()
            .flat_map(|child| child.response_items(mode))
            .collect();
        match mode {
            SnapshotMode::Persisted => value
                .filter(AnswerValue::is_meaningful)
                .map(|value| ResponseAnswer {
                    value: Some(value),
                    item,
                }),
            SnapshotMode::Expression => Some(ResponseAnswer { value, item }),
        }
    }
}
