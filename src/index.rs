//! Static bounding-box tree over scene items.
//!
//! Built once when the scene is frozen, then queried concurrently by the
//! workers. Traversal takes a visitor that can stop the walk early.

use crate::geom::Envelope;

/// Visitor verdict: keep walking the tree or stop now.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Visit {
    Continue,
    Stop,
}

#[derive(Debug)]
enum Node {
    Leaf { env: Envelope, item: usize },
    Branch { env: Envelope, left: usize, right: usize },
}

impl Node {
    fn envelope(&self) -> &Envelope {
        match self {
            Node::Leaf { env, .. } | Node::Branch { env, .. } => env,
        }
    }
}

/// Bounding-box tree mapping envelopes to item indices.
#[derive(Debug, Default)]
pub struct AabbTree {
    nodes: Vec<Node>,
    root: Option<usize>,
}

impl AabbTree {
    /// Builds the tree by recursive median split on the longest axis.
    pub fn build(items: Vec<(Envelope, usize)>) -> Self {
        let mut tree = AabbTree {
            nodes: Vec::with_capacity(items.len().saturating_mul(2)),
            root: None,
        };
        if items.is_empty() {
            return tree;
        }
        let mut items = items;
        let root = tree.build_node(&mut items);
        tree.root = Some(root);
        tree
    }

    fn build_node(&mut self, items: &mut [(Envelope, usize)]) -> usize {
        if items.len() == 1 {
            let (env, item) = items[0];
            self.nodes.push(Node::Leaf { env, item });
            return self.nodes.len() - 1;
        }
        let mut env = items[0].0;
        for (e, _) in items.iter().skip(1) {
            env.min_x = env.min_x.min(e.min_x);
            env.min_y = env.min_y.min(e.min_y);
            env.max_x = env.max_x.max(e.max_x);
            env.max_y = env.max_y.max(e.max_y);
        }
        let split_x = (env.max_x - env.min_x) >= (env.max_y - env.min_y);
        let key = |e: &Envelope| {
            if split_x {
                e.min_x + e.max_x
            } else {
                e.min_y + e.max_y
            }
        };
        items.sort_by(|a, b| {
            key(&a.0)
                .partial_cmp(&key(&b.0))
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        let mid = items.len() / 2;
        let (left_items, right_items) = items.split_at_mut(mid);
        let left = self.build_node(left_items);
        let right = self.build_node(right_items);
        self.nodes.push(Node::Branch { env, left, right });
        self.nodes.len() - 1
    }

    /// Visits every item whose envelope intersects `query`. The visitor
    /// can return [`Visit::Stop`] to abandon the walk; the verdict is
    /// propagated to the caller.
    pub fn query(&self, query: &Envelope, visitor: &mut dyn FnMut(usize) -> Visit) -> Visit {
        match self.root {
            Some(root) => self.query_node(root, query, visitor),
            None => Visit::Continue,
        }
    }

    fn query_node(
        &self,
        node: usize,
        query: &Envelope,
        visitor: &mut dyn FnMut(usize) -> Visit,
    ) -> Visit {
        let n = &self.nodes[node];
        if !n.envelope().intersects(query) {
            return Visit::Continue;
        }
        match n {
            Node::Leaf { item, .. } => visitor(*item),
            Node::Branch { left, right, .. } => {
                if self.query_node(*left, query, visitor) == Visit::Stop {
                    return Visit::Stop;
                }
                self.query_node(*right, query, visitor)
            }
        }
    }

    /// Collects every item whose envelope intersects `query`.
    pub fn query_all(&self, query: &Envelope) -> Vec<usize> {
        let mut out = Vec::new();
        self.query(query, &mut |item| {
            out.push(item);
            Visit::Continue
        });
        out
    }

    pub fn is_empty(&self) -> bool {
        self.root.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unit_env(x: f64, y: f64) -> Envelope {
        Envelope::new(x, y, x + 1.0, y + 1.0)
    }

    #[test]
    fn query_finds_overlapping_items() {
        let items = (0..10)
            .map(|i| (unit_env(i as f64 * 2.0, 0.0), i))
            .collect();
        let tree = AabbTree::build(items);
        let mut found = tree.query_all(&Envelope::new(3.5, 0.0, 6.5, 1.0));
        found.sort_unstable();
        assert_eq!(found, vec![2, 3]);
    }

    #[test]
    fn stop_halts_traversal() {
        let items = (0..100).map(|i| (unit_env(i as f64, 0.0), i)).collect();
        let tree = AabbTree::build(items);
        let mut seen = 0usize;
        let verdict = tree.query(&Envelope::new(0.0, 0.0, 200.0, 1.0), &mut |_| {
            seen += 1;
            if seen == 5 {
                Visit::Stop
            } else {
                Visit::Continue
            }
        });
        assert_eq!(verdict, Visit::Stop);
        assert_eq!(seen, 5);
    }

    #[test]
    fn empty_tree_is_silent() {
        let tree = AabbTree::build(Vec::new());
        assert!(tree.is_empty());
        assert!(tree.query_all(&unit_env(0.0, 0.0)).is_empty());
    }
}
