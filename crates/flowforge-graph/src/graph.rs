//! The flow graph and its tabular wire format
//!
//! Line 1 names every field column; each following line is one node row.
//! Columns are resolved by header name, never by position - generations may
//! reorder columns freely. Malformed leading-field rows are skipped with a
//! warning, not fatal: the external validator owns row-level correctness.

use crate::error::GraphError;
use crate::node::{FlowNode, NodeKind};
use crate::tabular::{join_row, split_records};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Columns every graph carries, in canonical order.
pub const CORE_COLUMNS: [&str; 3] = ["num", "type", "name"];

/// Ordered collection of flow nodes plus the header that maps fields to
/// columns.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlowGraph {
    header: Vec<String>,
    nodes: IndexMap<i32, FlowNode>,
}

impl FlowGraph {
    /// Create an empty graph with the core header
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self {
            header: CORE_COLUMNS.iter().map(|c| (*c).to_string()).collect(),
            nodes: IndexMap::new(),
        }
    }

    /// Parse a graph from tabular text.
    ///
    /// # Errors
    /// Returns an error when the header is absent or lacks a core column.
    /// Individual malformed rows are skipped with a warning.
    pub fn parse(text: &str) -> Result<Self, GraphError> {
        let records = split_records(text);
        let Some((header_record, rows)) = records.split_first() else {
            return Err(GraphError::MissingHeader);
        };

        let header: Vec<String> = header_record
            .iter()
            .map(|c| c.trim().to_ascii_lowercase())
            .collect();

        for required in CORE_COLUMNS {
            if !header.iter().any(|c| c == required) {
                return Err(GraphError::MissingColumn(required.to_string()));
            }
        }
        let col = |name: &str| header.iter().position(|c| c == name);
        let num_col = col("num").ok_or_else(|| GraphError::MissingColumn("num".into()))?;
        let type_col = col("type").ok_or_else(|| GraphError::MissingColumn("type".into()))?;
        let name_col = col("name").ok_or_else(|| GraphError::MissingColumn("name".into()))?;

        let mut nodes: IndexMap<i32, FlowNode> = IndexMap::new();
        for (i, record) in rows.iter().enumerate() {
            let row_num = i + 2;
            let cell = |idx: usize| record.get(idx).map(String::as_str).unwrap_or("");

            let Ok(num) = cell(num_col).trim().parse::<i32>() else {
                tracing::warn!(row = row_num, "skipping row with malformed node number");
                continue;
            };
            let kind = match NodeKind::from_str(cell(type_col)) {
                Ok(kind) => kind,
                Err(_) => {
                    tracing::warn!(row = row_num, num, "skipping row with unknown node type");
                    continue;
                }
            };

            let mut node = FlowNode::new(num, kind, cell(name_col).trim());
            for (ci, column) in header.iter().enumerate() {
                if ci == num_col || ci == type_col || ci == name_col {
                    continue;
                }
                let value = cell(ci);
                if !value.is_empty() {
                    node.fields.insert(column.clone(), value.to_string());
                }
            }

            if nodes.insert(num, node).is_some() {
                tracing::warn!(row = row_num, num, "duplicate node number, last row wins");
            }
        }

        Ok(Self { header, nodes })
    }

    /// Serialize back to tabular text.
    ///
    /// Columns follow the stored header; sparse fields not named by the
    /// header are appended as extra columns in first-seen order.
    #[must_use]
    pub fn serialize(&self) -> String {
        let mut columns = self.header.clone();
        for node in self.nodes.values() {
            for key in node.fields.keys() {
                if !columns.iter().any(|c| c == key) {
                    columns.push(key.clone());
                }
            }
        }

        let mut out = String::new();
        out.push_str(&join_row(&columns));
        out.push('\n');

        for node in self.nodes.values() {
            let row: Vec<String> = columns
                .iter()
                .map(|column| match column.as_str() {
                    "num" => node.num.to_string(),
                    "type" => node.kind.to_string(),
                    "name" => node.name.clone(),
                    other => node.field(other).unwrap_or("").to_string(),
                })
                .collect();
            out.push_str(&join_row(&row));
            out.push('\n');
        }
        out
    }

    /// Insert a node, replacing any node with the same number
    #[inline]
    pub fn insert(&mut self, node: FlowNode) -> Option<FlowNode> {
        self.nodes.insert(node.num, node)
    }

    /// Remove a node by number
    #[inline]
    pub fn remove(&mut self, num: i32) -> Option<FlowNode> {
        self.nodes.shift_remove(&num)
    }

    /// Get a node by number
    #[inline]
    #[must_use]
    pub fn get(&self, num: i32) -> Option<&FlowNode> {
        self.nodes.get(&num)
    }

    /// Get a mutable node by number
    #[inline]
    pub fn get_mut(&mut self, num: i32) -> Option<&mut FlowNode> {
        self.nodes.get_mut(&num)
    }

    /// Iterate nodes in insertion order
    pub fn nodes(&self) -> impl Iterator<Item = &FlowNode> {
        self.nodes.values()
    }

    /// Node numbers in insertion order
    #[must_use]
    pub fn nums(&self) -> Vec<i32> {
        self.nodes.keys().copied().collect()
    }

    /// Number of nodes
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Whether the graph has no nodes
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Header column names
    #[inline]
    #[must_use]
    pub fn header(&self) -> &[String] {
        &self.header
    }
}

impl Default for FlowGraph {
    fn default() -> Self {
        Self::new()
    }
}
