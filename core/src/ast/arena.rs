use std::ops::Index;
use std::sync::Arc;

use super::node::{Node, NodeId, NodeKind};
use crate::token::Span;
use crate::util::FastHashSet;

/// Owns every node of one parse, including instrumented copies made later.
#[derive(Debug, Default, Clone)]
pub struct Arena {
    nodes: Vec<Node>,
}

impl Arena {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn alloc(&mut self, span: Span, kind: NodeKind) -> NodeId {
        let id = NodeId(self.nodes.len() as u32);
        self.nodes.push(Node { id, span, kind });
        id
    }

    pub fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id.index()]
    }

    pub fn get(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(id.index())
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Node> {
        self.nodes.iter()
    }

    /// Kind of `id` with any instrumentation wrapper stripped.
    pub fn unwrap_kind(&self, id: NodeId) -> &NodeKind {
        let mut kind = &self.node(id).kind;
        while let NodeKind::Observed(observed) = kind {
            kind = &observed.inner;
        }
        kind
    }

    /// Smallest node containing `offset`, skipping parentheses and
    /// instrumentation wrappers.
    pub fn node_at(&self, offset: usize) -> Option<&Node> {
        self.nodes
            .iter()
            .filter(|n| !matches!(n.kind, NodeKind::Observed(_) | NodeKind::Paren(_)) && n.span.contains(offset))
            .min_by_key(|n| n.span.len())
    }

    /// Every name introduced by a binding, inherit or lambda parameter, deduplicated
    /// and in order of first appearance.
    pub fn bound_names(&self) -> Vec<Arc<str>> {
        let mut seen = FastHashSet::default();
        let mut names = Vec::new();
        let mut push = |name: &Arc<str>| {
            if seen.insert(name.clone()) {
                names.push(name.clone());
            }
        };
        for node in &self.nodes {
            match &node.kind {
                NodeKind::Attrs(bindings) | NodeKind::Let { bindings, .. } => {
                    bindings.iter().for_each(|b| push(&b.name));
                }
                NodeKind::Lambda { param, .. } => {
                    param.bound_names().iter().for_each(&mut push);
                }
                _ => {}
            }
        }
        names
    }
}

impl Index<NodeId> for Arena {
    type Output = Node;

    fn index(&self, id: NodeId) -> &Node {
        self.node(id)
    }
}
