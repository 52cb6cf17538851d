//! Hierarchical namespace for node and variable lookups.

use std::cell::RefCell;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::rc::Rc;

use crate::context::FormContext;
use crate::error::ScopeError;
use crate::expr::Environment;
use crate::node::{Node, WeakNode};
use crate::slot::ExpressionSlot;

/// One level of the scope chain.
///
/// Only owning scopes keep a node registry; the others hand registrations and
/// lookups to their parent. Every scope may bind expression names.
pub(crate) struct Scope {
    parent: Option<Rc<Scope>>,
    nodes: Option<RefCell<HashMap<String, WeakNode>>>,
    expressions: RefCell<BTreeMap<String, Rc<ExpressionSlot>>>,
}

impl fmt::Debug for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Scope")
            .field("owns_nodes", &self.nodes.is_some())
            .field("expressions", &self.expressions.borrow().keys().collect::<Vec<_>>())
            .field("has_parent", &self.parent.is_some())
            .finish()
    }
}

impl Scope {
    pub(crate) fn root() -> Rc<Self> {
        Rc::new(Self {
            parent: None,
            nodes: Some(RefCell::new(HashMap::new())),
            expressions: RefCell::new(BTreeMap::new()),
        })
    }

    pub(crate) fn extend(self: &Rc<Self>, owns_nodes: bool) -> Rc<Self> {
        Rc::new(Self {
            parent: Some(self.clone()),
            nodes: owns_nodes.then(|| RefCell::new(HashMap::new())),
            expressions: RefCell::new(BTreeMap::new()),
        })
    }

    pub(crate) fn register_node(&self, link_id: &str, node: WeakNode) {
        match (&self.nodes, &self.parent) {
            (Some(nodes), _) => {
                nodes.borrow_mut().insert(link_id.to_string(), node);
            }
            (None, Some(parent)) => parent.register_node(link_id, node),
            (None, None) => {}
        }
    }

    /// Finds the nearest live node registered under `link_id`.
    pub(crate) fn lookup_node(&self, link_id: &str) -> Option<Node> {
        let local = self
            .nodes
            .as_ref()
            .and_then(|nodes| nodes.borrow().get(link_id).and_then(WeakNode::upgrade));
        local.or_else(|| {
            self.parent
                .as_ref()
                .and_then(|parent| parent.lookup_node(link_id))
        })
    }

    /// Binds `name` to `slot`. Re-binding the same slot is a no-op.
    pub(crate) fn register_expression(
        &self,
        name: &str,
        slot: &Rc<ExpressionSlot>,
    ) -> Result<(), ScopeError> {
        let mut expressions = self.expressions.borrow_mut();
        match expressions.get(name) {
            Some(existing) if Rc::ptr_eq(existing, slot) => Ok(()),
            Some(_) => Err(ScopeError::NameCollision {
                name: name.to_string(),
            }),
            None => {
                expressions.insert(name.to_string(), slot.clone());
                Ok(())
            }
        }
    }

    pub(crate) fn lookup_expression(&self, name: &str) -> Option<Rc<ExpressionSlot>> {
        let local = self.expressions.borrow().get(name).cloned();
        local.or_else(|| {
            self.parent
                .as_ref()
                .and_then(|parent| parent.lookup_expression(name))
        })
    }

    /// Environment that resolves unknown names through this scope chain.
    pub(crate) fn merge_environment<'a>(
        self: &Rc<Self>,
        ctx: &'a FormContext,
        extra: Environment<'a>,
    ) -> Environment<'a> {
        let scope = self.clone();
        extra.with_fallback(move |name| {
            scope
                .lookup_expression(name)
                .map(|slot| slot.values(ctx))
        })
    }
}
