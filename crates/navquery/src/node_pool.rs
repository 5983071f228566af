//! Search nodes for the path queries.

use std::{cmp::Ordering, collections::HashMap};

use glam::Vec3;

use crate::PolyRef;

bitflags::bitflags! {
    /// Where a node is in the search.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub(crate) struct NodeFlags: u8 {
        const OPEN = 0x01;
        const CLOSED = 0x02;
    }
}

/// A polygon visited by a search.
#[derive(Debug, Clone)]
pub(crate) struct Node {
    /// Where the search enters the polygon
    pub(crate) pos: Vec3,
    /// Cost from the start
    pub(crate) cost: f32,
    /// Cost from the start plus the heuristic
    pub(crate) total: f32,
    pub(crate) parent: Option<usize>,
    pub(crate) flags: NodeFlags,
    pub(crate) poly: PolyRef,
}

/// Holds at most `max_nodes` nodes, one per polygon.
#[derive(Debug)]
pub(crate) struct NodePool {
    nodes: Vec<Node>,
    lookup: HashMap<PolyRef, usize>,
    max_nodes: usize,
}

impl NodePool {
    pub(crate) fn new(max_nodes: usize) -> Self {
        Self {
            nodes: Vec::with_capacity(max_nodes.min(4096)),
            lookup: HashMap::new(),
            max_nodes,
        }
    }

    pub(crate) fn clear(&mut self) {
        self.nodes.clear();
        self.lookup.clear();
    }

    /// The node of `poly`, allocated if needed. `None` once the pool is exhausted.
    pub(crate) fn get_or_insert(&mut self, poly: PolyRef) -> Option<usize> {
        if let Some(idx) = self.lookup.get(&poly) {
            return Some(*idx);
        }
        if self.nodes.len() >= self.max_nodes {
            return None;
        }
        self.nodes.push(Node {
            pos: Vec3::ZERO,
            cost: 0.0,
            total: 0.0,
            parent: None,
            flags: NodeFlags::empty(),
            poly,
        });
        let idx = self.nodes.len() - 1;
        self.lookup.insert(poly, idx);
        Some(idx)
    }

    #[inline]
    pub(crate) fn node(&self, idx: usize) -> &Node {
        &self.nodes[idx]
    }

    #[inline]
    pub(crate) fn node_mut(&mut self, idx: usize) -> &mut Node {
        &mut self.nodes[idx]
    }

    /// The polygons from the start of the search to node `idx`.
    pub(crate) fn path_to(&self, idx: usize) -> Vec<PolyRef> {
        let mut path = Vec::new();
        let mut cur = Some(idx);
        while let Some(i) = cur {
            path.push(self.nodes[i].poly);
            cur = self.nodes[i].parent;
        }
        path.reverse();
        path
    }
}

/// An entry of the open list. Entries are never updated in place, a node whose cost improved is
/// pushed again and stale entries are skipped when popped.
#[derive(Debug, Clone, Copy)]
pub(crate) struct HeapNode {
    pub(crate) index: usize,
    pub(crate) total: f32,
}

impl PartialEq for HeapNode {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for HeapNode {}

impl PartialOrd for HeapNode {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for HeapNode {
    fn cmp(&self, other: &Self) -> Ordering {
        // Reversed so the max-heap pops the cheapest node.
        other.total.total_cmp(&self.total)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BinaryHeap;

    use super::*;

    #[test]
    fn pool_is_capped() {
        let mut pool = NodePool::new(2);
        let a = pool.get_or_insert(PolyRef(1)).unwrap();
        assert_eq!(pool.get_or_insert(PolyRef(1)), Some(a));
        pool.get_or_insert(PolyRef(2)).unwrap();
        assert_eq!(pool.get_or_insert(PolyRef(3)), None);
        pool.clear();
        assert!(pool.get_or_insert(PolyRef(3)).is_some());
    }

    #[test]
    fn path_follows_parents() {
        let mut pool = NodePool::new(8);
        let a = pool.get_or_insert(PolyRef(1)).unwrap();
        let b = pool.get_or_insert(PolyRef(2)).unwrap();
        let c = pool.get_or_insert(PolyRef(3)).unwrap();
        pool.node_mut(b).parent = Some(a);
        pool.node_mut(c).parent = Some(b);
        assert_eq!(pool.path_to(c), vec![PolyRef(1), PolyRef(2), PolyRef(3)]);
    }

    #[test]
    fn heap_pops_cheapest_first() {
        let mut heap = BinaryHeap::new();
        for (index, total) in [(0, 3.0), (1, 1.0), (2, 2.0)] {
            heap.push(HeapNode { index, total });
        }
        let order: Vec<_> = std::iter::from_fn(|| heap.pop()).map(|n| n.index).collect();
        assert_eq!(order, vec![1, 2, 0]);
    }
}
