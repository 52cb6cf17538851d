use std::rc::Rc;

use super::{NodeBase, Placement, WeakNode};
use crate::registry::RegistryMode;

/// Text-only item. Carries no answers and never appears in a response.
#[derive(Debug)]
pub struct DisplayNode {
    pub(crate) base: NodeBase,
}

impl DisplayNode {
    pub(crate) fn new(placement: Placement) -> Rc<Self> {
        Rc::new_cyclic(|weak| Self {
            base: NodeBase::new(
                placement,
                WeakNode::Display(weak.clone()),
                Some(RegistryMode::All),
            ),
        })
    }

    pub fn token(&self) -> &str {
        &self.base.token
    }

    pub fn text(&self) -> Option<String> {
        self.base.text()
    }
}
