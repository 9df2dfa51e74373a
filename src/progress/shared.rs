//! Shared handles to a progress tree.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use super::{NodeId, ProgressError, ProgressSnapshot, ProgressTree};

/// A [`ProgressTree`] shared between one writer and any number of readers.
///
/// The lock is only ever held for a single read or mutation, never across
/// an `.await`.
#[derive(Debug, Clone, Default)]
pub struct SharedProgress {
    tree: Arc<Mutex<ProgressTree>>,
}

impl SharedProgress {
    /// Create a handle around an empty tree.
    pub fn new() -> Self {
        Self::default()
    }

    /// Wrap an existing tree.
    pub fn from_tree(tree: ProgressTree) -> Self {
        Self {
            tree: Arc::new(Mutex::new(tree)),
        }
    }

    /// Run `f` with read access to the tree.
    pub fn read<R>(&self, f: impl FnOnce(&ProgressTree) -> R) -> R {
        f(&self.lock())
    }

    /// Run `f` with write access to the tree.
    pub fn write<R>(&self, f: impl FnOnce(&mut ProgressTree) -> R) -> R {
        f(&mut self.lock())
    }

    /// Completion of `id` in `[0, 100]`.
    pub fn percentage(&self, id: NodeId) -> Result<f64, ProgressError> {
        self.read(|tree| tree.percentage(id))
    }

    /// Recursive snapshot of `id` for rendering.
    pub fn snapshot(&self, id: NodeId) -> Result<ProgressSnapshot, ProgressError> {
        self.read(|tree| tree.snapshot(id))
    }

    /// Create a detached aggregate and hand back a parent handle for it.
    pub fn new_root(&self) -> ProgressParent {
        let node = self.write(|tree| tree.new_aggregate(1.0));
        ProgressParent {
            tree: self.clone(),
            node,
        }
    }

    fn lock(&self) -> MutexGuard<'_, ProgressTree> {
        // A panic in a reader cannot leave the arena half-updated: every
        // mutation completes before the guard is dropped.
        self.tree.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// The aggregate a fetch session attaches its phase leaves under.
#[derive(Debug, Clone)]
pub struct ProgressParent {
    tree: SharedProgress,
    node: NodeId,
}

impl ProgressParent {
    /// Point at an existing aggregate in `tree`.
    pub fn new(tree: SharedProgress, node: NodeId) -> Self {
        Self { tree, node }
    }

    /// A fresh tree whose root is the parent.
    pub fn detached() -> Self {
        SharedProgress::new().new_root()
    }

    /// The shared tree.
    pub fn tree(&self) -> &SharedProgress {
        &self.tree
    }

    /// The parent node.
    pub fn node(&self) -> NodeId {
        self.node
    }

    /// The top of the tree the parent lives in.
    pub fn root(&self) -> Result<NodeId, ProgressError> {
        self.tree.read(|tree| tree.root(self.node))
    }

    /// Completion of the parent node.
    pub fn percentage(&self) -> Result<f64, ProgressError> {
        self.tree.percentage(self.node)
    }

    /// Completion of the top of the tree.
    pub fn root_percentage(&self) -> Result<f64, ProgressError> {
        self.tree.read(|tree| tree.percentage(tree.root(self.node)?))
    }

    /// Create a leaf and attach it under the parent.
    pub fn attach_leaf(&self, max: f64, weight: f64) -> Result<NodeId, ProgressError> {
        self.tree.write(|tree| {
            let leaf = tree.new_leaf(max, weight);
            match tree.add_child(self.node, leaf) {
                Ok(()) => Ok(leaf),
                Err(e) => {
                    tree.release(leaf)?;
                    Err(e)
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_attach_leaf_updates_parent() {
        let parent = ProgressParent::detached();
        let leaf = parent.attach_leaf(10.0, 1.0).unwrap();
        parent
            .tree()
            .write(|tree| tree.set_value(leaf, 5.0))
            .unwrap();
        assert_eq!(parent.percentage().unwrap(), 50.0);
    }

    #[test]
    fn test_attach_leaf_to_released_parent_fails_cleanly() {
        let shared = SharedProgress::new();
        let parent = shared.new_root();
        shared.write(|tree| tree.release(parent.node())).unwrap();

        assert!(parent.attach_leaf(1.0, 1.0).is_err());
        assert_eq!(shared.read(|tree| tree.live_count()), 0);
    }

    #[test]
    fn test_root_percentage_walks_up() {
        let shared = SharedProgress::new();
        let top = shared.new_root();
        let nested = shared.write(|tree| {
            let nested = tree.new_aggregate(1.0);
            tree.add_child(top.node(), nested).map(|_| nested)
        });
        let nested = ProgressParent::new(shared.clone(), nested.unwrap());
        nested.attach_leaf(0.0, 1.0).unwrap();

        assert_eq!(nested.root().unwrap(), top.node());
        assert_eq!(nested.root_percentage().unwrap(), 100.0);
    }
}
