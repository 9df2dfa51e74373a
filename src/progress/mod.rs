//! Weighted, hierarchical progress aggregation.
//!
//! A [`ProgressTree`] is an arena of nodes. Leaves hold a raw `value / max`
//! pair; aggregates report the weighted mean of their children's
//! percentages. Any node can be read at any time, and every read is clamped
//! to `[0, 100]`.
//!
//! ```rust
//! use resilient_fetch::progress::ProgressTree;
//!
//! let mut tree = ProgressTree::new();
//! let root = tree.new_aggregate(1.0);
//! let download = tree.new_leaf(100.0, 3.0);
//! let parse = tree.new_leaf(10.0, 1.0);
//! tree.add_child(root, download).unwrap();
//! tree.add_child(root, parse).unwrap();
//!
//! tree.set_value(download, 50.0).unwrap();
//! tree.set_value_to_max(parse).unwrap();
//!
//! // (3 * 50 + 1 * 100) / 4
//! assert_eq!(tree.percentage(root).unwrap(), 62.5);
//! ```
//!
//! # Ownership
//!
//! A node has at most one parent. [`ProgressTree::add_child`] refuses nodes
//! that are already attached, and [`ProgressTree::release`] frees a whole
//! subtree and returns its slots to the free list so later nodes reuse them.
//! Stale [`NodeId`]s are detected through a per-slot generation counter.
//!
//! # Sharing
//!
//! [`SharedProgress`] wraps a tree for the writer (a fetch session) and any
//! number of readers (a UI). [`ProgressParent`] names the node a session
//! attaches its leaves under.

mod error;
mod shared;
mod snapshot;
mod tree;

pub use error::ProgressError;
pub use shared::{ProgressParent, SharedProgress};
pub use snapshot::ProgressSnapshot;
pub use tree::{NodeId, ProgressTree, UNKNOWN_MAX};
