use std::rc::Rc;

use super::{Node, NodeBase, Placement, SnapshotMode, WeakNode, build_children};
use crate::issue::Issue;
use crate::registry::RegistryMode;
use crate::response::ResponseItem;
use crate::slot::SlotPurpose;
use crate::validate;

/// Non-repeating group, or one instance of a repeating group.
#[derive(Debug)]
pub struct GroupNode {
    pub(crate) base: NodeBase,
    children: Vec<Node>,
    instance: bool,
}

impl GroupNode {
    /// Instances get an owning scope so their children stay private to them.
    pub(crate) fn new(placement: Placement, response: Option<&ResponseItem>, instance: bool) -> Rc<Self> {
        let scope = placement.scope.extend(instance);
        let ctx = placement.ctx.clone();
        let template = placement.template.clone();
        let token = placement.token.clone();
        let responses = response.map(|item| item.item.as_slice()).unwrap_or_default();
        let mode = if instance {
            RegistryMode::VariablesOnly
        } else {
            RegistryMode::All
        };

        Rc::new_cyclic(|weak| {
            let me = WeakNode::Group(weak.clone());
            let base = NodeBase::new(
                Placement {
                    scope: scope.clone(),
                    ..placement
                },
                me.clone(),
                Some(mode),
            );
            let children = build_children(
                &ctx,
                &template.item,
                Some(me),
                Some(&token),
                &scope,
                responses,
            );
            Self {
                base,
                children,
                instance,
            }
        })
    }

    pub fn token(&self) -> &str {
        &self.base.token
    }

    pub fn text(&self) -> Option<String> {
        self.base.text()
    }

    pub fn children(&self) -> &[Node] {
        &self.children
    }

    /// Whether this group is one repetition inside a [`super::GroupWrapperNode`].
    pub fn is_instance(&self) -> bool {
        self.instance
    }

    pub fn required(&self) -> bool {
        self.base
            .registry
            .required
            .as_ref()
            .and_then(|slot| slot.boolean(&self.base.ctx))
            .unwrap_or_else(|| self.base.template.is_required())
    }

    pub fn min_occurs(&self) -> usize {
        self.base
            .registry
            .occurs(&self.base.ctx, &self.base.template, SlotPurpose::MinOccurs)
            .unwrap_or(usize::from(self.required()))
    }

    /// Whether any descendant would be written to the persisted response.
    pub fn has_content(&self) -> bool {
        self.children
            .iter()
            .any(|child| !child.response_items(SnapshotMode::Persisted).is_empty())
    }

    pub(crate) fn validation_issues(self: &Rc<Self>) -> Vec<Issue> {
        validate::group_issues(self)
    }

    pub(crate) fn response_item(&self, mode: SnapshotMode) -> Option<ResponseItem> {
        let items: Vec<ResponseItem> = self
            .children
            .iter()
            .flat_map(|child| child.response_items(mode))
            .collect();
        if mode == SnapshotMode::Persisted && items.is_empty() {
            return None;
        }
        Some(ResponseItem {
            link_id: self.base.link_id().to_string(),
            text: self.base.template.text.clone(),
            answer: Vec::new(),
            item: items,
        })
    }
}
