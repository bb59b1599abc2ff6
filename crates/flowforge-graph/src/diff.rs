//! Structural diffs between graph snapshots
//!
//! Diffs are computed over the flattened field maps of each node (including
//! the `type` and `name` columns), and are used two ways: to attribute a
//! revision's changes to the validator errors that prompted it, and to
//! describe remediations when logging fix attempts. Attribution is
//! best-effort diagnostics only, never control flow.

use crate::error::{GraphError, ValidationError};
use crate::graph::FlowGraph;
use crate::node::FlowNode;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// Maximum characters of field content shown per side of a description
const DESCRIBE_LIMIT: usize = 50;

/// How a node differs between two snapshots
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChangeKind {
    /// Node only in the after snapshot
    Added,
    /// Node only in the before snapshot
    Removed,
    /// Node in both, with differing fields
    Modified,
}

impl std::fmt::Display for ChangeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Added => write!(f, "added"),
            Self::Removed => write!(f, "removed"),
            Self::Modified => write!(f, "modified"),
        }
    }
}

/// One node's difference across two snapshots
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeChange {
    /// Node number
    pub num: i32,
    /// Change kind
    pub kind: ChangeKind,
    /// Flattened fields before the change (absent for additions)
    pub before: Option<IndexMap<String, String>>,
    /// Flattened fields after the change (absent for removals)
    pub after: Option<IndexMap<String, String>>,
    /// Names of the fields that differ (empty for additions/removals)
    pub changed_fields: Vec<String>,
}

impl NodeChange {
    /// Render a truncated per-field `before -> after` description.
    #[must_use]
    pub fn describe(&self) -> String {
        match self.kind {
            ChangeKind::Added => format!("node {} added", self.num),
            ChangeKind::Removed => format!("node {} removed", self.num),
            ChangeKind::Modified => {
                let empty = IndexMap::new();
                let before = self.before.as_ref().unwrap_or(&empty);
                let after = self.after.as_ref().unwrap_or(&empty);
                let parts: Vec<String> = self
                    .changed_fields
                    .iter()
                    .map(|field| {
                        format!(
                            "{field}: '{}' -> '{}'",
                            truncate(before.get(field).map(String::as_str).unwrap_or("")),
                            truncate(after.get(field).map(String::as_str).unwrap_or("")),
                        )
                    })
                    .collect();
                format!("node {} modified ({})", self.num, parts.join("; "))
            }
        }
    }

    /// Whether the change touches a field with the given name,
    /// case-insensitively and in either direction of substring containment.
    #[must_use]
    pub fn touches_field(&self, field: &str) -> bool {
        let needle = field.to_ascii_lowercase();
        self.changed_fields.iter().any(|f| {
            let f = f.to_ascii_lowercase();
            f.contains(&needle) || needle.contains(&f)
        })
    }

    /// Apply this change to a graph in place.
    ///
    /// # Errors
    /// Returns an error when a modification/addition carries no after-state
    /// or the after-state cannot be rebuilt into a node.
    pub fn apply_to(&self, graph: &mut FlowGraph) -> Result<(), GraphError> {
        match self.kind {
            ChangeKind::Removed => {
                graph.remove(self.num);
                Ok(())
            }
            ChangeKind::Added | ChangeKind::Modified => {
                let after = self.after.as_ref().ok_or_else(|| GraphError::InvalidChange {
                    num: self.num,
                    reason: "missing after-state".to_string(),
                })?;
                let node = FlowNode::from_flat_fields(self.num, after)?;
                graph.insert(node);
                Ok(())
            }
        }
    }
}

/// Complete diff between two graph snapshots
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GraphDiff {
    /// Node numbers only in the after snapshot, sorted
    pub added: Vec<i32>,
    /// Node numbers only in the before snapshot, sorted
    pub removed: Vec<i32>,
    /// Node numbers present in both with differing fields, sorted
    pub modified: Vec<i32>,
    /// Per-node change records
    pub changes: Vec<NodeChange>,
}

impl GraphDiff {
    /// Whether the two snapshots were identical
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }

    /// One-line summary of the diff
    #[must_use]
    pub fn summary(&self) -> String {
        format!(
            "{} added, {} modified, {} removed",
            self.added.len(),
            self.modified.len(),
            self.removed.len()
        )
    }

    /// Apply every change to a base graph.
    ///
    /// Applying `diff(before, after)` to `before` reconstructs `after` for
    /// every node number present in `after`.
    ///
    /// # Errors
    /// Returns the first change that cannot be applied.
    pub fn apply(&self, base: &FlowGraph) -> Result<FlowGraph, GraphError> {
        let mut graph = base.clone();
        for change in &self.changes {
            change.apply_to(&mut graph)?;
        }
        Ok(graph)
    }
}

/// Compute the structural diff between two snapshots.
#[must_use]
pub fn diff(before: &FlowGraph, after: &FlowGraph) -> GraphDiff {
    let mut result = GraphDiff::default();

    for node in after.nodes() {
        match before.get(node.num) {
            None => {
                result.added.push(node.num);
                result.changes.push(NodeChange {
                    num: node.num,
                    kind: ChangeKind::Added,
                    before: None,
                    after: Some(node.flat_fields()),
                    changed_fields: Vec::new(),
                });
            }
            Some(prior) => {
                let before_fields = prior.flat_fields();
                let after_fields = node.flat_fields();
                if before_fields == after_fields {
                    continue;
                }
                let mut changed: Vec<String> = Vec::new();
                for (key, value) in &after_fields {
                    if before_fields.get(key) != Some(value) {
                        changed.push(key.clone());
                    }
                }
                for key in before_fields.keys() {
                    if !after_fields.contains_key(key) {
                        changed.push(key.clone());
                    }
                }
                result.modified.push(node.num);
                result.changes.push(NodeChange {
                    num: node.num,
                    kind: ChangeKind::Modified,
                    before: Some(before_fields),
                    after: Some(after_fields),
                    changed_fields: changed,
                });
            }
        }
    }

    for node in before.nodes() {
        if after.get(node.num).is_none() {
            result.removed.push(node.num);
            result.changes.push(NodeChange {
                num: node.num,
                kind: ChangeKind::Removed,
                before: Some(node.flat_fields()),
                after: None,
                changed_fields: Vec::new(),
            });
        }
    }

    result.added.sort_unstable();
    result.removed.sort_unstable();
    result.modified.sort_unstable();
    result
}

/// Associate changes to the errors that plausibly prompted them.
///
/// A change matches an error when they share a node number, or when the
/// error's field name and a changed field name contain one another
/// case-insensitively. Best-effort diagnostics only.
#[must_use]
pub fn match_changes_to_errors<'a>(
    changes: &'a [NodeChange],
    errors: &'a [ValidationError],
) -> Vec<(&'a NodeChange, &'a ValidationError)> {
    let mut pairs = Vec::new();
    for error in errors {
        let matched = changes.iter().find(|change| {
            if error.node_num == Some(change.num) {
                return true;
            }
            error
                .field
                .as_deref()
                .is_some_and(|field| change.touches_field(field))
        });
        if let Some(change) = matched {
            pairs.push((change, error));
        }
    }
    pairs
}

fn truncate(value: &str) -> String {
    if value.chars().count() <= DESCRIBE_LIMIT {
        value.to_string()
    } else {
        value.chars().take(DESCRIBE_LIMIT).collect()
    }
}
