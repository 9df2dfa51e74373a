//! Point-in-time copies of a progress subtree.

use super::tree::weighted_mean;
use super::{NodeId, ProgressError, ProgressTree};

/// A recursive, owned copy of a subtree.
///
/// Handy for shipping the whole tree to a renderer without holding the lock.
/// Building one does not recurse, but the copy nests as deep as the tree
/// does, and so do its derived `Drop`, `Debug` and `PartialEq`.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "camelCase"))]
pub struct ProgressSnapshot {
    /// Completion in `[0, 100]`.
    pub percentage: f64,
    /// Weight within the parent.
    pub weight: f64,
    /// Raw value, for leaves.
    #[cfg_attr(feature = "serde", serde(skip_serializing_if = "Option::is_none", default))]
    pub value: Option<f64>,
    /// Raw max, for leaves.
    #[cfg_attr(feature = "serde", serde(skip_serializing_if = "Option::is_none", default))]
    pub max: Option<f64>,
    /// Children, for aggregates.
    #[cfg_attr(feature = "serde", serde(skip_serializing_if = "Vec::is_empty", default))]
    pub children: Vec<ProgressSnapshot>,
}

impl ProgressTree {
    /// Copy the subtree rooted at `id`.
    pub fn snapshot(&self, id: NodeId) -> Result<ProgressSnapshot, ProgressError> {
        // Breadth-first listing: every node comes after its parent.
        let mut order: Vec<(NodeId, Option<usize>)> = vec![(id, None)];
        let mut next = 0;
        while let Some(&(node, _)) = order.get(next) {
            for child in self.children(node)? {
                order.push((*child, Some(next)));
            }
            next += 1;
        }

        // Assemble bottom-up, so children are complete before their parent.
        let mut pending: Vec<Vec<ProgressSnapshot>> = vec![Vec::new(); order.len()];
        let mut root = None;
        for (position, (node, parent)) in order.into_iter().enumerate().rev() {
            let mut children = std::mem::take(&mut pending[position]);
            children.reverse();

            let weight = self.weight(node)?;
            let snapshot = if self.is_leaf(node)? {
                ProgressSnapshot {
                    percentage: self.percentage(node)?,
                    weight,
                    value: Some(self.value(node)?),
                    max: Some(self.max(node)?),
                    children,
                }
            } else {
                let (weighted, total) = children.iter().fold((0.0, 0.0), |(w, t), c| {
                    (w + c.weight * c.percentage, t + c.weight)
                });
                ProgressSnapshot {
                    percentage: weighted_mean(weighted, total),
                    weight,
                    value: None,
                    max: None,
                    children,
                }
            };

            match parent {
                Some(parent) => pending[parent].push(snapshot),
                None => root = Some(snapshot),
            }
        }

        root.ok_or(ProgressError::StaleNode(id))
    }
}
