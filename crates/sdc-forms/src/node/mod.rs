//! The form node tree.
//!
//! Variants are plain structs behind `Rc`; [`Node`] is the tagged handle the
//! rest of the crate dispatches on. Parents own children strongly and children
//! point back through [`WeakNode`], so dropping the form drops the tree.

mod answer;
mod display;
mod group;
mod question;
mod wrapper;

pub use answer::AnswerNode;
pub use display::DisplayNode;
pub use group::GroupNode;
pub use question::{Lifecycle, QuestionNode};
pub use wrapper::GroupWrapperNode;

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::{Rc, Weak};

use serde_json::Value;
use tracing::{trace, warn};

use crate::context::FormContext;
use crate::enable_when;
use crate::issue::Issue;
use crate::reactive::{Memo, Reaction, Signal};
use crate::registry::{ExpressionRegistry, RegistryMode};
use crate::response::ResponseItem;
use crate::scope::Scope;
use crate::template::{DisabledDisplay, ItemType, QuestionnaireItem};

/// Handle to any node of a form.
#[derive(Debug, Clone)]
pub enum Node {
    Display(Rc<DisplayNode>),
    Group(Rc<GroupNode>),
    GroupWrapper(Rc<GroupWrapperNode>),
    Question(Rc<QuestionNode>),
    Answer(Rc<AnswerNode>),
}

#[derive(Debug, Clone)]
pub(crate) enum WeakNode {
    Display(Weak<DisplayNode>),
    Group(Weak<GroupNode>),
    GroupWrapper(Weak<GroupWrapperNode>),
    Question(Weak<QuestionNode>),
    Answer(Weak<AnswerNode>),
}

impl WeakNode {
    pub(crate) fn upgrade(&self) -> Option<Node> {
        match self {
            WeakNode::Display(node) => node.upgrade().map(Node::Display),
            WeakNode::Group(node) => node.upgrade().map(Node::Group),
            WeakNode::GroupWrapper(node) => node.upgrade().map(Node::GroupWrapper),
            WeakNode::Question(node) => node.upgrade().map(Node::Question),
            WeakNode::Answer(node) => node.upgrade().map(Node::Answer),
        }
    }
}

/// Which response projection is being built.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SnapshotMode {
    /// Omits disabled nodes and empty subtrees.
    Persisted,
    /// Every node with its current value, enabled or not.
    Expression,
}

/// State every node variant carries.
pub(crate) struct NodeBase {
    pub(crate) token: String,
    pub(crate) template: Rc<QuestionnaireItem>,
    pub(crate) parent: Option<WeakNode>,
    pub(crate) ctx: Rc<FormContext>,
    pub(crate) scope: Rc<Scope>,
    pub(crate) registry: ExpressionRegistry,
    pub(crate) registration_issues: Vec<Issue>,
    pub(crate) dirty: Signal<bool>,
    enabled: Memo<bool>,
    read_only: Memo<bool>,
    hidden: Memo<bool>,
    reactions: RefCell<Vec<Rc<Reaction>>>,
    disposed: Cell<bool>,
}

impl fmt::Debug for NodeBase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NodeBase")
            .field("token", &self.token)
            .field("disposed", &self.disposed.get())
            .finish()
    }
}

/// Placement of a node being built.
#[derive(Clone)]
pub(crate) struct Placement {
    pub(crate) ctx: Rc<FormContext>,
    pub(crate) template: Rc<QuestionnaireItem>,
    pub(crate) token: String,
    pub(crate) parent: Option<WeakNode>,
    pub(crate) scope: Rc<Scope>,
}

impl NodeBase {
    pub(crate) fn new(placement: Placement, owner: WeakNode, mode: Option<RegistryMode>) -> Self {
        let Placement {
            ctx,
            template,
            token,
            parent,
            scope,
        } = placement;
        let (registry, issues) = match mode {
            Some(mode) => ExpressionRegistry::for_item(&ctx, &template, &scope, owner, mode),
            None => (ExpressionRegistry::default(), Vec::new()),
        };
        let registration_issues = issues
            .into_iter()
            .map(|issue| issue.at(token.clone()))
            .collect();
        Self {
            dirty: Signal::new(&ctx.runtime, false),
            enabled: Memo::new(&ctx.runtime),
            read_only: Memo::new(&ctx.runtime),
            hidden: Memo::new(&ctx.runtime),
            reactions: RefCell::new(Vec::new()),
            disposed: Cell::new(false),
            token,
            template,
            parent,
            ctx,
            scope,
            registry,
            registration_issues,
        }
    }

    pub(crate) fn link_id(&self) -> &str {
        self.template.key()
    }

    pub(crate) fn parent_node(&self) -> Option<Node> {
        self.parent.as_ref().and_then(WeakNode::upgrade)
    }

    /// Marks this node and its ancestors as edited.
    pub(crate) fn mark_dirty(&self) {
        self.dirty.set(true);
        if let Some(parent) = self.parent_node() {
            parent.base().mark_dirty();
        }
    }

    pub(crate) fn add_reaction(&self, label: &'static str, action: impl Fn() + 'static) {
        let reaction = Reaction::new(&self.ctx.runtime, label, action);
        self.reactions.borrow_mut().push(reaction);
    }

    pub(crate) fn is_disposed(&self) -> bool {
        self.disposed.get()
    }

    fn dispose(&self) {
        if self.disposed.replace(true) {
            return;
        }
        trace!(token = %self.token, "disposing node");
        for reaction in self.reactions.borrow_mut().drain(..) {
            reaction.dispose();
        }
    }

    /// Own read-only state, before the ancestor cascade.
    fn own_read_only(&self) -> bool {
        self.registry
            .read_only
            .as_ref()
            .and_then(|slot| slot.boolean(&self.ctx))
            .unwrap_or_else(|| self.template.is_read_only())
    }

    pub(crate) fn text(&self) -> Option<String> {
        self.registry
            .text
            .as_ref()
            .and_then(|slot| slot.string(&self.ctx))
            .or_else(|| self.template.text.clone())
    }
}

/// Number of repeats to seed: `min(minOccurs, maxOccurs)`, capped by
/// `max_seeded_repeats`.
pub(crate) fn seeding_floor(base: &NodeBase, min: usize, max: Option<usize>) -> usize {
    let floor = min.min(max.unwrap_or(usize::MAX));
    let ceiling = base.ctx.config.max_seeded_repeats;
    if floor > ceiling {
        warn!(token = %base.token, min_occurs = floor, ceiling, "capping seeded repeats");
        return ceiling;
    }
    floor
}

/// Token of a child: parent token plus one path segment.
pub(crate) fn child_token(parent: Option<&str>, segment: &str) -> String {
    match parent {
        Some(parent) => format!("{parent}/{segment}"),
        None => segment.to_string(),
    }
}

/// Materializes `items` below `parent`, seeding from matching response items.
pub(crate) fn build_children(
    ctx: &Rc<FormContext>,
    items: &[QuestionnaireItem],
    parent: Option<WeakNode>,
    parent_token: Option<&str>,
    scope: &Rc<Scope>,
    responses: &[ResponseItem],
) -> Vec<Node> {
    items
        .iter()
        .map(|item| {
            let template = Rc::new(item.clone());
            let placement = Placement {
                ctx: ctx.clone(),
                token: child_token(parent_token, item.key()),
                template: template.clone(),
                parent: parent.clone(),
                scope: scope.clone(),
            };
            let matching: Vec<&ResponseItem> = responses
                .iter()
                .filter(|response| response.link_id == item.key())
                .collect();
            let node = match item.item_type {
                ItemType::Display => Node::Display(DisplayNode::new(placement)),
                ItemType::Group if item.is_repeating() => {
                    Node::GroupWrapper(GroupWrapperNode::new(placement, &matching))
                }
                ItemType::Group => {
                    Node::Group(GroupNode::new(placement, matching.first().copied(), false))
                }
                _ => Node::Question(QuestionNode::new(placement, matching.first().copied())),
            };
            scope.register_node(item.key(), node.downgrade());
            node
        })
        .collect()
}

impl Node {
    pub(crate) fn base(&self) -> &NodeBase {
        match self {
            Node::Display(node) => &node.base,
            Node::Group(node) => &node.base,
            Node::GroupWrapper(node) => &node.base,
            Node::Question(node) => &node.base,
            Node::Answer(node) => &node.base,
        }
    }

    pub(crate) fn downgrade(&self) -> WeakNode {
        match self {
            Node::Display(node) => WeakNode::Display(Rc::downgrade(node)),
            Node::Group(node) => WeakNode::Group(Rc::downgrade(node)),
            Node::GroupWrapper(node) => WeakNode::GroupWrapper(Rc::downgrade(node)),
            Node::Question(node) => WeakNode::Question(Rc::downgrade(node)),
            Node::Answer(node) => WeakNode::Answer(Rc::downgrade(node)),
        }
    }

    /// Globally unique path of this node.
    pub fn token(&self) -> &str {
        &self.base().token
    }

    pub fn link_id(&self) -> &str {
        self.base().link_id()
    }

    pub fn template(&self) -> &QuestionnaireItem {
        &self.base().template
    }

    /// Answers and group instances take their state from their container.
    fn has_own_state(&self) -> bool {
        match self {
            Node::Answer(_) => false,
            Node::Group(group) => !group.is_instance(),
            _ => true,
        }
    }

    pub fn text(&self) -> Option<String> {
        self.base().text()
    }

    pub fn is_enabled(&self) -> bool {
        let base = self.base();
        base.enabled.get(|_| {
            let parent_enabled = base.parent_node().is_none_or(|parent| parent.is_enabled());
            parent_enabled && (!self.has_own_state() || enable_when::own_enablement(base))
        })
    }

    /// Ancestor read-only, own flag, or disabled with protected display.
    pub fn read_only(&self) -> bool {
        let base = self.base();
        base.read_only.get(|_| {
            if base.parent_node().is_some_and(|parent| parent.read_only()) {
                return true;
            }
            if self.has_own_state() && base.own_read_only() {
                return true;
            }
            base.template.disabled_display() == DisabledDisplay::Protected && !self.is_enabled()
        })
    }

    pub fn hidden(&self) -> bool {
        let base = self.base();
        base.hidden.get(|_| {
            if self.has_own_state() && base.template.is_hidden() {
                return true;
            }
            !self.is_enabled() && base.template.disabled_display() != DisabledDisplay::Protected
        })
    }

    pub fn is_dirty(&self) -> bool {
        self.base().dirty.get()
    }

    pub fn children(&self) -> Vec<Node> {
        match self {
            Node::Display(_) => Vec::new(),
            Node::Group(group) => group.children().to_vec(),
            Node::GroupWrapper(wrapper) => {
                wrapper.instances().into_iter().map(Node::Group).collect()
            }
            Node::Question(question) => question.answers().into_iter().map(Node::Answer).collect(),
            Node::Answer(answer) => answer.children().to_vec(),
        }
    }

    /// This node followed by all descendants, depth first.
    pub fn descendants(&self) -> Vec<Node> {
        let mut out = vec![self.clone()];
        for child in self.children() {
            out.extend(child.descendants());
        }
        out
    }

    /// Registration, evaluation and (when due) validation issues.
    pub fn issues(&self) -> Vec<Issue> {
        let base = self.base();
        let mut issues = base.registration_issues.clone();
        issues.extend(
            base.registry
                .evaluation_issues(&base.ctx)
                .into_iter()
                .map(|issue| issue.at(base.token.clone())),
        );
        match self {
            Node::Question(question) => {
                issues.extend(question.option_issues());
                issues.extend(question.validation_issues());
            }
            Node::Group(group) if !group.is_instance() => issues.extend(group.validation_issues()),
            Node::GroupWrapper(wrapper) => issues.extend(wrapper.validation_issues()),
            _ => {}
        }
        issues
    }

    /// Releases own reactions first, then the children's.
    pub fn dispose(&self) {
        self.base().dispose();
        for child in self.children() {
            child.dispose();
        }
    }

    pub fn as_question(&self) -> Option<&Rc<QuestionNode>> {
        match self {
            Node::Question(question) => Some(question),
            _ => None,
        }
    }

    pub fn as_group(&self) -> Option<&Rc<GroupNode>> {
        match self {
            Node::Group(group) => Some(group),
            _ => None,
        }
    }

    pub fn as_wrapper(&self) -> Option<&Rc<GroupWrapperNode>> {
        match self {
            Node::GroupWrapper(wrapper) => Some(wrapper),
            _ => None,
        }
    }

    pub fn as_answer(&self) -> Option<&Rc<AnswerNode>> {
        match self {
            Node::Answer(answer) => Some(answer),
            _ => None,
        }
    }

    pub fn is_question(&self) -> bool {
        matches!(self, Node::Question(_))
    }

    pub fn is_answer(&self) -> bool {
        matches!(self, Node::Answer(_))
    }

    pub fn is_group(&self) -> bool {
        matches!(self, Node::Group(_) | Node::GroupWrapper(_))
    }

    pub(crate) fn response_items(&self, mode: SnapshotMode) -> Vec<ResponseItem> {
        if mode == SnapshotMode::Persisted && !self.is_enabled() {
            return Vec::new();
        }
        match self {
            Node::Display(_) | Node::Answer(_) => Vec::new(),
            Node::Group(group) => group.response_item(mode).into_iter().collect(),
            Node::GroupWrapper(wrapper) => wrapper
                .instances()
                .iter()
                .filter_map(|instance| instance.response_item(mode))
                .collect(),
            Node::Question(question) => question.response_item(mode).into_iter().collect(),
        }
    }

    /// `%context` value of this node.
    pub(crate) fn expression_item(&self) -> Value {
        let value = match self {
            Node::Answer(answer) => serde_json::to_value(answer.response_answer(SnapshotMode::Expression)),
            Node::GroupWrapper(_) => {
                serde_json::to_value(self.response_items(SnapshotMode::Expression))
            }
            _ => serde_json::to_value(
                self.response_items(SnapshotMode::Expression)
                    .into_iter()
                    .next()
                    .unwrap_or_else(|| ResponseItem::new(self.link_id())),
            ),
        };
        value.unwrap_or(Value::Null)
    }
}
