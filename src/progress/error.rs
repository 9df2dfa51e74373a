//! Error types for progress tree operations.

use thiserror::Error;

use super::NodeId;

/// Misuse of a [`ProgressTree`](super::ProgressTree).
///
/// These are programmer errors: a well-behaved owner never sees them.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProgressError {
    /// The id refers to a slot that was released (or never existed).
    #[error("progress node {0} is stale")]
    StaleNode(NodeId),

    /// A leaf-only operation was applied to an aggregate.
    #[error("progress node {0} is not a leaf")]
    NotALeaf(NodeId),

    /// A child operation was applied to a leaf.
    #[error("progress node {0} is not an aggregate")]
    NotAnAggregate(NodeId),

    /// The node already belongs to another parent.
    #[error("progress node {child} is already attached to {parent}")]
    AlreadyAttached {
        /// The node being attached.
        child: NodeId,
        /// Its current parent.
        parent: NodeId,
    },

    /// The node is not a child of the given parent.
    #[error("progress node {child} is not a child of {parent}")]
    NotAChild {
        /// The node being detached.
        child: NodeId,
        /// The parent it was expected under.
        parent: NodeId,
    },

    /// Attaching would make a node its own ancestor.
    #[error("attaching {child} under {parent} would create a cycle")]
    Cycle {
        /// The node being attached.
        child: NodeId,
        /// The requested parent.
        parent: NodeId,
    },
}
