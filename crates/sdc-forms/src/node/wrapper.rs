use std::cell::Cell;
use std::rc::{Rc, Weak};

use tracing::debug;

use super::{GroupNode, Node, NodeBase, Placement, WeakNode, child_token, seeding_floor};
use crate::issue::Issue;
use crate::reactive::Signal;
use crate::registry::RegistryMode;
use crate::response::ResponseItem;
use crate::slot::SlotPurpose;
use crate::validate;

/// Container of the instances of a repeating group.
#[derive(Debug)]
pub struct GroupWrapperNode {
    pub(crate) base: NodeBase,
    instances: Signal<Vec<Rc<GroupNode>>>,
    next_instance: Cell<usize>,
}

impl GroupWrapperNode {
    pub(crate) fn new(placement: Placement, responses: &[&ResponseItem]) -> Rc<Self> {
        let scope = placement.scope.extend(false);
        let runtime = placement.ctx.runtime.clone();
        let wrapper = Rc::new_cyclic(|weak: &Weak<Self>| {
            let base = NodeBase::new(
                Placement { scope, ..placement },
                WeakNode::GroupWrapper(weak.clone()),
                Some(RegistryMode::WithoutVariables),
            );
            Self {
                base,
                instances: Signal::new(&runtime, Vec::new()),
                next_instance: Cell::new(0),
            }
        });
        let seeded: Vec<Rc<GroupNode>> = responses
            .iter()
            .copied()
            .map(|response| wrapper.make_instance(Some(response)))
            .collect();
        wrapper.instances.update(|instances| *instances = seeded);
        wrapper.install_baseline();
        wrapper
    }

    fn make_instance(self: &Rc<Self>, response: Option<&ResponseItem>) -> Rc<GroupNode> {
        let index = self.next_instance.get();
        self.next_instance.set(index + 1);
        let placement = Placement {
            ctx: self.base.ctx.clone(),
            template: self.base.template.clone(),
            token: child_token(Some(&self.base.token), &index.to_string()),
            parent: Some(WeakNode::GroupWrapper(Rc::downgrade(self))),
            scope: self.base.scope.clone(),
        };
        GroupNode::new(placement, response, true)
    }

    /// Keeps at least `min(minOccurs, maxOccurs)` instances while adding is
    /// allowed.
    fn install_baseline(self: &Rc<Self>) {
        let weak = Rc::downgrade(self);
        self.base.add_reaction("group-baseline", move || {
            let Some(wrapper) = weak.upgrade() else {
                return;
            };
            let floor = seeding_floor(&wrapper.base, wrapper.min_occurs(), wrapper.max_occurs());
            while wrapper.instances.with(Vec::len) < floor && wrapper.can_add() {
                let instance = wrapper
                    .base
                    .ctx
                    .runtime
                    .untracked(|| wrapper.make_instance(None));
                debug!(token = %instance.token(), "seeded group instance");
                wrapper.instances.update(|instances| instances.push(instance));
            }
        });
    }

    pub fn token(&self) -> &str {
        &self.base.token
    }

    pub fn instances(&self) -> Vec<Rc<GroupNode>> {
        self.instances.get()
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

    /// `None` means unbounded.
    pub fn max_occurs(&self) -> Option<usize> {
        self.base
            .registry
            .occurs(&self.base.ctx, &self.base.template, SlotPurpose::MaxOccurs)
    }

    pub fn can_add(self: &Rc<Self>) -> bool {
        let len = self.instances.with(Vec::len);
        !Node::GroupWrapper(self.clone()).read_only()
            && self.max_occurs().is_none_or(|max| len < max)
    }

    pub fn can_remove(self: &Rc<Self>) -> bool {
        let len = self.instances.with(Vec::len);
        !Node::GroupWrapper(self.clone()).read_only() && len > self.min_occurs()
    }

    pub fn add_instance(self: &Rc<Self>) -> Option<Rc<GroupNode>> {
        if !self.can_add() {
            return None;
        }
        let instance = self.make_instance(None);
        self.instances.update(|instances| instances.push(instance.clone()));
        self.base.mark_dirty();
        self.base.ctx.flush();
        Some(instance)
    }

    pub fn remove_instance(self: &Rc<Self>, instance: &Rc<GroupNode>) -> bool {
        if !self.can_remove() {
            return false;
        }
        let removed = self.instances.update(|instances| {
            let position = instances.iter().position(|i| Rc::ptr_eq(i, instance))?;
            Some(instances.remove(position))
        });
        let Some(removed) = removed else {
            return false;
        };
        Node::Group(removed).dispose();
        self.base.mark_dirty();
        self.base.ctx.flush();
        true
    }

    pub(crate) fn validation_issues(self: &Rc<Self>) -> Vec<Issue> {
        validate::wrapper_issues(self)
    }
}
