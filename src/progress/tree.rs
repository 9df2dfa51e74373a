//! Arena-backed progress tree.

use std::fmt;

use super::ProgressError;

/// Sentinel `max` meaning "total unknown". Such a leaf reports 0%.
pub const UNKNOWN_MAX: f64 = -1.0;

/// Handle to a node in a [`ProgressTree`].
///
/// Ids are generational: once a node is released, its old id is rejected
/// even after the slot is reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeId {
    index: u32,
    generation: u32,
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}v{}", self.index, self.generation)
    }
}

#[derive(Debug, Clone)]
enum Kind {
    Leaf { value: f64, max: f64 },
    Aggregate { children: Vec<NodeId> },
}

#[derive(Debug, Clone)]
struct Node {
    kind: Kind,
    weight: f64,
    parent: Option<NodeId>,
}

#[derive(Debug, Clone, Default)]
struct Slot {
    generation: u32,
    node: Option<Node>,
}

/// An arena of progress nodes with a free list for recycling.
///
/// See the [module docs](super) for the percentage rules.
#[derive(Debug, Clone, Default)]
pub struct ProgressTree {
    slots: Vec<Slot>,
    free: Vec<u32>,
}

impl ProgressTree {
    /// Create an empty tree.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a detached leaf.
    ///
    /// A negative `max` means the total is unknown (0%); a zero `max` is
    /// trivially complete (100%).
    pub fn new_leaf(&mut self, max: f64, weight: f64) -> NodeId {
        self.insert(Node {
            kind: Kind::Leaf {
                value: 0.0,
                max: sanitize_max(max),
            },
            weight: sanitize_weight(weight),
            parent: None,
        })
    }

    /// Create a detached aggregate with no children.
    pub fn new_aggregate(&mut self, weight: f64) -> NodeId {
        self.insert(Node {
            kind: Kind::Aggregate {
                children: Vec::new(),
            },
            weight: sanitize_weight(weight),
            parent: None,
        })
    }

    /// Returns true if `id` refers to a live node.
    pub fn contains(&self, id: NodeId) -> bool {
        self.node(id).is_ok()
    }

    /// Number of live nodes.
    pub fn live_count(&self) -> usize {
        self.slots.len() - self.free.len()
    }

    /// Number of released slots waiting to be reused.
    pub fn free_count(&self) -> usize {
        self.free.len()
    }

    // ---- leaf mutation -------------------------------------------------

    /// Set a leaf's value. Negative or NaN values are stored as 0.
    pub fn set_value(&mut self, id: NodeId, value: f64) -> Result<(), ProgressError> {
        let (current, _) = self.leaf_mut(id)?;
        *current = sanitize_value(value);
        Ok(())
    }

    /// Add `delta` to a leaf's value, saturating at a known max.
    pub fn advance(&mut self, id: NodeId, delta: f64) -> Result<(), ProgressError> {
        let (current, max) = self.leaf_mut(id)?;
        let next = sanitize_value(*current + delta);
        *current = if *max >= 0.0 { next.min(*max) } else { next };
        Ok(())
    }

    /// Set a leaf's value and max together.
    pub fn set_value_and_max(
        &mut self,
        id: NodeId,
        value: f64,
        max: f64,
    ) -> Result<(), ProgressError> {
        let (current, current_max) = self.leaf_mut(id)?;
        *current = sanitize_value(value);
        *current_max = sanitize_max(max);
        Ok(())
    }

    /// Mark a leaf complete.
    ///
    /// With a known max the value jumps to it; with an unknown max the max
    /// collapses to the current value. Either way the leaf reads 100%.
    pub fn set_value_to_max(&mut self, id: NodeId) -> Result<(), ProgressError> {
        let (current, max) = self.leaf_mut(id)?;
        if *max < 0.0 {
            *max = *current;
        } else {
            *current = *max;
        }
        Ok(())
    }

    /// A leaf's raw value.
    pub fn value(&self, id: NodeId) -> Result<f64, ProgressError> {
        match self.node(id)?.kind {
            Kind::Leaf { value, .. } => Ok(value),
            Kind::Aggregate { .. } => Err(ProgressError::NotALeaf(id)),
        }
    }

    /// A leaf's raw max.
    pub fn max(&self, id: NodeId) -> Result<f64, ProgressError> {
        match self.node(id)?.kind {
            Kind::Leaf { max, .. } => Ok(max),
            Kind::Aggregate { .. } => Err(ProgressError::NotALeaf(id)),
        }
    }

    /// Returns true if the node is a leaf.
    pub fn is_leaf(&self, id: NodeId) -> Result<bool, ProgressError> {
        Ok(matches!(self.node(id)?.kind, Kind::Leaf { .. }))
    }

    /// The node's weight within its parent.
    pub fn weight(&self, id: NodeId) -> Result<f64, ProgressError> {
        Ok(self.node(id)?.weight)
    }

    /// Change the node's weight within its parent.
    pub fn set_weight(&mut self, id: NodeId, weight: f64) -> Result<(), ProgressError> {
        self.node_mut(id)?.weight = sanitize_weight(weight);
        Ok(())
    }

    // ---- structure -----------------------------------------------------

    /// Attach `child` as the last child of `parent`, taking ownership.
    pub fn add_child(&mut self, parent: NodeId, child: NodeId) -> Result<(), ProgressError> {
        if let Some(existing) = self.node(child)?.parent {
            return Err(ProgressError::AlreadyAttached {
                child,
                parent: existing,
            });
        }
        if !matches!(self.node(parent)?.kind, Kind::Aggregate { .. }) {
            return Err(ProgressError::NotAnAggregate(parent));
        }

        // Refuse to hang a node beneath its own descendant.
        let mut cursor = Some(parent);
        while let Some(id) = cursor {
            if id == child {
                return Err(ProgressError::Cycle { child, parent });
            }
            cursor = self.node(id)?.parent;
        }

        if let Kind::Aggregate { children } = &mut self.node_mut(parent)?.kind {
            children.push(child);
        }
        self.node_mut(child)?.parent = Some(parent);
        Ok(())
    }

    /// Remove `child` from `parent` without releasing it.
    pub fn detach_child(&mut self, parent: NodeId, child: NodeId) -> Result<(), ProgressError> {
        if self.node(child)?.parent != Some(parent) {
            return Err(ProgressError::NotAChild { child, parent });
        }
        if let Kind::Aggregate { children } = &mut self.node_mut(parent)?.kind {
            children.retain(|c| *c != child);
        }
        self.node_mut(child)?.parent = None;
        Ok(())
    }

    /// Remove a node from whatever parent holds it. No-op for roots.
    pub fn detach(&mut self, id: NodeId) -> Result<(), ProgressError> {
        match self.node(id)?.parent {
            Some(parent) => self.detach_child(parent, id),
            None => Ok(()),
        }
    }

    /// Detach a node and free it together with its whole subtree.
    ///
    /// The freed slots go back on the free list.
    pub fn release(&mut self, id: NodeId) -> Result<(), ProgressError> {
        self.detach(id)?;
        self.free_subtree(id);
        Ok(())
    }

    /// Release every child of an aggregate. The aggregate then reads 0%.
    pub fn dispose_all_children(&mut self, parent: NodeId) -> Result<(), ProgressError> {
        let children = match &mut self.node_mut(parent)?.kind {
            Kind::Aggregate { children } => std::mem::take(children),
            Kind::Leaf { .. } => return Err(ProgressError::NotAnAggregate(parent)),
        };
        for child in children {
            self.free_subtree(child);
        }
        Ok(())
    }

    /// The children of an aggregate, in insertion order. Leaves have none.
    pub fn children(&self, id: NodeId) -> Result<&[NodeId], ProgressError> {
        match &self.node(id)?.kind {
            Kind::Aggregate { children } => Ok(children.as_slice()),
            Kind::Leaf { .. } => Ok(&[][..]),
        }
    }

    /// The node's parent, if attached.
    pub fn parent(&self, id: NodeId) -> Result<Option<NodeId>, ProgressError> {
        Ok(self.node(id)?.parent)
    }

    /// Walk parent links to the top of the tree.
    pub fn root(&self, id: NodeId) -> Result<NodeId, ProgressError> {
        let mut current = id;
        while let Some(parent) = self.node(current)?.parent {
            current = parent;
        }
        Ok(current)
    }

    /// Distance from the root; a root has depth 0.
    pub fn depth(&self, id: NodeId) -> Result<usize, ProgressError> {
        let mut depth = 0;
        let mut current = id;
        while let Some(parent) = self.node(current)?.parent {
            depth += 1;
            current = parent;
        }
        Ok(depth)
    }

    // ---- reading -------------------------------------------------------

    /// Completion of the node in `[0, 100]`.
    ///
    /// Walks the subtree with an explicit stack, so depth is bounded by
    /// memory rather than by the call stack.
    pub fn percentage(&self, id: NodeId) -> Result<f64, ProgressError> {
        let node = self.node(id)?;
        let children = match &node.kind {
            Kind::Leaf { value, max } => return Ok(leaf_percentage(*value, *max)),
            Kind::Aggregate { children } => children.as_slice(),
        };

        let mut stack = vec![Fold::new(children, node.weight)];
        while let Some(top) = stack.last_mut() {
            let Some(&child) = top.children.get(top.next) else {
                let (weight, done) = (top.weight, top.finish());
                stack.pop();
                match stack.last_mut() {
                    Some(parent) => parent.add(weight, done),
                    None => return Ok(done),
                }
                continue;
            };
            let node = self.node(child)?;
            match &node.kind {
                Kind::Leaf { value, max } => top.add(node.weight, leaf_percentage(*value, *max)),
                Kind::Aggregate { children } => stack.push(Fold::new(children, node.weight)),
            }
        }
        Ok(0.0)
    }

    // ---- internals -----------------------------------------------------

    fn insert(&mut self, node: Node) -> NodeId {
        if let Some(index) = self.free.pop() {
            let slot = &mut self.slots[index as usize];
            slot.node = Some(node);
            return NodeId {
                index,
                generation: slot.generation,
            };
        }
        let index = self.slots.len() as u32;
        self.slots.push(Slot {
            generation: 0,
            node: Some(node),
        });
        NodeId {
            index,
            generation: 0,
        }
    }

    fn node(&self, id: NodeId) -> Result<&Node, ProgressError> {
        self.slots
            .get(id.index as usize)
            .filter(|slot| slot.generation == id.generation)
            .and_then(|slot| slot.node.as_ref())
            .ok_or(ProgressError::StaleNode(id))
    }

    fn node_mut(&mut self, id: NodeId) -> Result<&mut Node, ProgressError> {
        self.slots
            .get_mut(id.index as usize)
            .filter(|slot| slot.generation == id.generation)
            .and_then(|slot| slot.node.as_mut())
            .ok_or(ProgressError::StaleNode(id))
    }

    fn leaf_mut(&mut self, id: NodeId) -> Result<(&mut f64, &mut f64), ProgressError> {
        match &mut self.node_mut(id)?.kind {
            Kind::Leaf { value, max } => Ok((value, max)),
            Kind::Aggregate { .. } => Err(ProgressError::NotALeaf(id)),
        }
    }

    fn free_subtree(&mut self, id: NodeId) {
        let mut pending = vec![id];
        while let Some(current) = pending.pop() {
            let Some(slot) = self
                .slots
                .get_mut(current.index as usize)
                .filter(|slot| slot.generation == current.generation)
            else {
                continue;
            };
            if let Some(node) = slot.node.take() {
                slot.generation = slot.generation.wrapping_add(1);
                self.free.push(current.index);
                if let Kind::Aggregate { children } = node.kind {
                    pending.extend(children);
                }
            }
        }
    }
}

/// Running weighted mean over one aggregate's children.
struct Fold<'a> {
    children: &'a [NodeId],
    next: usize,
    weight: f64,
    weighted: f64,
    total: f64,
}

impl<'a> Fold<'a> {
    fn new(children: &'a [NodeId], weight: f64) -> Self {
        Self {
            children,
            next: 0,
            weight,
            weighted: 0.0,
            total: 0.0,
        }
    }

    fn add(&mut self, weight: f64, percentage: f64) {
        self.weighted += weight * percentage;
        self.total += weight;
        self.next += 1;
    }

    fn finish(&self) -> f64 {
        weighted_mean(self.weighted, self.total)
    }
}

pub(super) fn weighted_mean(weighted: f64, total: f64) -> f64 {
    if total > 0.0 {
        clamp_percentage(weighted / total)
    } else {
        0.0
    }
}

fn leaf_percentage(value: f64, max: f64) -> f64 {
    if max < 0.0 {
        0.0
    } else if max == 0.0 {
        100.0
    } else {
        clamp_percentage(value / max * 100.0)
    }
}

fn clamp_percentage(p: f64) -> f64 {
    if p.is_nan() {
        0.0
    } else {
        p.clamp(0.0, 100.0)
    }
}

fn sanitize_value(value: f64) -> f64 {
    if value.is_nan() {
        0.0
    } else {
        value.max(0.0)
    }
}

fn sanitize_max(max: f64) -> f64 {
    if max.is_nan() {
        UNKNOWN_MAX
    } else {
        max
    }
}

fn sanitize_weight(weight: f64) -> f64 {
    if weight.is_finite() && weight > 0.0 {
        weight
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_leaf_unknown_max_reads_zero() {
        let mut tree = ProgressTree::new();
        let leaf = tree.new_leaf(UNKNOWN_MAX, 1.0);
        tree.set_value(leaf, 500.0).unwrap();
        assert_eq!(tree.percentage(leaf).unwrap(), 0.0);
    }

    #[test]
    fn test_leaf_zero_max_reads_complete() {
        let mut tree = ProgressTree::new();
        let leaf = tree.new_leaf(0.0, 1.0);
        assert_eq!(tree.percentage(leaf).unwrap(), 100.0);
    }

    #[test]
    fn test_leaf_clamps_overflow() {
        let mut tree = ProgressTree::new();
        let leaf = tree.new_leaf(10.0, 1.0);
        tree.set_value(leaf, 25.0).unwrap();
        assert_eq!(tree.percentage(leaf).unwrap(), 100.0);
        tree.set_value(leaf, -5.0).unwrap();
        assert_eq!(tree.value(leaf).unwrap(), 0.0);
    }

    #[test]
    fn test_advance_accumulates() {
        let mut tree = ProgressTree::new();
        let leaf = tree.new_leaf(4.0, 1.0);
        tree.advance(leaf, 1.0).unwrap();
        tree.advance(leaf, 1.0).unwrap();
        assert_eq!(tree.percentage(leaf).unwrap(), 50.0);
    }

    #[test]
    fn test_advance_saturates_at_max() {
        let mut tree = ProgressTree::new();
        let leaf = tree.new_leaf(3.0, 1.0);
        for _ in 0..5 {
            tree.advance(leaf, 1.0).unwrap();
        }
        assert_eq!(tree.value(leaf).unwrap(), 3.0);
        assert_eq!(tree.percentage(leaf).unwrap(), 100.0);

        let open = tree.new_leaf(UNKNOWN_MAX, 1.0);
        tree.advance(open, 7.0).unwrap();
        assert_eq!(tree.value(open).unwrap(), 7.0);
    }

    #[test]
    fn test_set_value_to_max_with_unknown_max() {
        let mut tree = ProgressTree::new();
        let leaf = tree.new_leaf(UNKNOWN_MAX, 1.0);
        tree.set_value(leaf, 42.0).unwrap();
        tree.set_value_to_max(leaf).unwrap();
        assert_eq!(tree.max(leaf).unwrap(), 42.0);
        assert_eq!(tree.percentage(leaf).unwrap(), 100.0);

        let untouched = tree.new_leaf(UNKNOWN_MAX, 1.0);
        tree.set_value_to_max(untouched).unwrap();
        assert_eq!(tree.percentage(untouched).unwrap(), 100.0);
    }

    #[test]
    fn test_aggregate_weighted_mean() {
        let mut tree = ProgressTree::new();
        let root = tree.new_aggregate(1.0);
        let a = tree.new_leaf(10.0, 1.0);
        let b = tree.new_leaf(10.0, 3.0);
        tree.add_child(root, a).unwrap();
        tree.add_child(root, b).unwrap();
        tree.set_value_to_max(a).unwrap();

        assert_eq!(tree.percentage(root).unwrap(), 25.0);
    }

    #[test]
    fn test_empty_aggregate_reads_zero() {
        let mut tree = ProgressTree::new();
        let root = tree.new_aggregate(1.0);
        assert_eq!(tree.percentage(root).unwrap(), 0.0);
    }

    #[test]
    fn test_zero_weight_child_is_ignored() {
        let mut tree = ProgressTree::new();
        let root = tree.new_aggregate(1.0);
        let a = tree.new_leaf(2.0, 1.0);
        tree.add_child(root, a).unwrap();
        tree.set_value(a, 1.0).unwrap();
        let before = tree.percentage(root).unwrap();

        let ghost = tree.new_leaf(0.0, 0.0);
        tree.add_child(root, ghost).unwrap();
        assert_eq!(tree.percentage(root).unwrap(), before);
    }

    #[test]
    fn test_nested_aggregates_mix_levels() {
        let mut tree = ProgressTree::new();
        let root = tree.new_aggregate(1.0);
        let done = tree.new_leaf(0.0, 1.0);
        let branch = tree.new_aggregate(3.0);
        let half = tree.new_leaf(4.0, 1.0);
        let none = tree.new_leaf(4.0, 1.0);
        tree.add_child(root, done).unwrap();
        tree.add_child(root, branch).unwrap();
        tree.add_child(branch, half).unwrap();
        tree.add_child(branch, none).unwrap();
        tree.set_value(half, 4.0).unwrap();

        assert_eq!(tree.percentage(branch).unwrap(), 50.0);
        assert_eq!(tree.percentage(root).unwrap(), 62.5);
    }

    #[test]
    fn test_percentage_of_very_deep_chain() {
        let mut tree = ProgressTree::new();
        let leaf = tree.new_leaf(4.0, 1.0);
        tree.set_value(leaf, 1.0).unwrap();

        // Built bottom-up so each attach only walks one parent link.
        let mut top = leaf;
        for _ in 0..200_000 {
            let aggregate = tree.new_aggregate(1.0);
            tree.add_child(aggregate, top).unwrap();
            top = aggregate;
        }

        assert_eq!(tree.depth(leaf).unwrap(), 200_000);
        assert_eq!(tree.percentage(top).unwrap(), 25.0);
    }

    #[test]
    fn test_add_child_rejects_second_parent() {
        let mut tree = ProgressTree::new();
        let p1 = tree.new_aggregate(1.0);
        let p2 = tree.new_aggregate(1.0);
        let leaf = tree.new_leaf(1.0, 1.0);
        tree.add_child(p1, leaf).unwrap();

        assert_eq!(
            tree.add_child(p2, leaf),
            Err(ProgressError::AlreadyAttached {
                child: leaf,
                parent: p1
            })
        );
    }

    #[test]
    fn test_add_child_rejects_cycle() {
        let mut tree = ProgressTree::new();
        let outer = tree.new_aggregate(1.0);
        let inner = tree.new_aggregate(1.0);
        tree.add_child(outer, inner).unwrap();

        assert!(matches!(
            tree.add_child(inner, outer),
            Err(ProgressError::Cycle { .. })
        ));
        assert!(matches!(
            tree.add_child(inner, inner),
            Err(ProgressError::Cycle { .. })
        ));
    }

    #[test]
    fn test_add_child_to_leaf_fails() {
        let mut tree = ProgressTree::new();
        let leaf = tree.new_leaf(1.0, 1.0);
        let other = tree.new_leaf(1.0, 1.0);
        assert_eq!(
            tree.add_child(leaf, other),
            Err(ProgressError::NotAnAggregate(leaf))
        );
    }

    #[test]
    fn test_detach_child_restores_independence() {
        let mut tree = ProgressTree::new();
        let root = tree.new_aggregate(1.0);
        let leaf = tree.new_leaf(0.0, 1.0);
        tree.add_child(root, leaf).unwrap();
        assert_eq!(tree.percentage(root).unwrap(), 100.0);

        tree.detach_child(root, leaf).unwrap();
        assert_eq!(tree.percentage(root).unwrap(), 0.0);
        assert_eq!(tree.parent(leaf).unwrap(), None);
        assert!(tree.contains(leaf));

        assert_eq!(
            tree.detach_child(root, leaf),
            Err(ProgressError::NotAChild {
                child: leaf,
                parent: root
            })
        );
    }

    #[test]
    fn test_root_and_depth() {
        let mut tree = ProgressTree::new();
        let top = tree.new_aggregate(1.0);
        let mid = tree.new_aggregate(1.0);
        let leaf = tree.new_leaf(1.0, 1.0);
        tree.add_child(top, mid).unwrap();
        tree.add_child(mid, leaf).unwrap();

        assert_eq!(tree.root(leaf).unwrap(), top);
        assert_eq!(tree.depth(leaf).unwrap(), 2);
        assert_eq!(tree.depth(top).unwrap(), 0);
    }

    #[test]
    fn test_release_recycles_slots() {
        let mut tree = ProgressTree::new();
        let root = tree.new_aggregate(1.0);
        let branch = tree.new_aggregate(1.0);
        let leaf = tree.new_leaf(1.0, 1.0);
        tree.add_child(root, branch).unwrap();
        tree.add_child(branch, leaf).unwrap();

        tree.release(branch).unwrap();
        assert_eq!(tree.live_count(), 1);
        assert_eq!(tree.free_count(), 2);
        assert!(tree.children(root).unwrap().is_empty());

        let reused = tree.new_leaf(1.0, 1.0);
        assert_eq!(tree.free_count(), 1);
        assert!(tree.contains(reused));
        assert_eq!(
            tree.set_value(leaf, 1.0),
            Err(ProgressError::StaleNode(leaf))
        );
        assert_eq!(tree.percentage(branch), Err(ProgressError::StaleNode(branch)));
    }

    #[test]
    fn test_dispose_all_children_resets_aggregate() {
        let mut tree = ProgressTree::new();
        let root = tree.new_aggregate(1.0);
        for _ in 0..3 {
            let leaf = tree.new_leaf(0.0, 1.0);
            tree.add_child(root, leaf).unwrap();
        }
        assert_eq!(tree.percentage(root).unwrap(), 100.0);

        tree.dispose_all_children(root).unwrap();
        assert_eq!(tree.percentage(root).unwrap(), 0.0);
        assert_eq!(tree.live_count(), 1);
    }

    #[test]
    fn test_leaf_operations_reject_aggregates() {
        let mut tree = ProgressTree::new();
        let root = tree.new_aggregate(1.0);
        assert_eq!(tree.set_value(root, 1.0), Err(ProgressError::NotALeaf(root)));
        assert_eq!(tree.value(root), Err(ProgressError::NotALeaf(root)));
    }
}
