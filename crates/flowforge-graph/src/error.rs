//! Error types for the graph crate
//!
//! Covers parse failures on the tabular wire format and the validator
//! error record shared with the learning and pipeline layers.

use serde::{Deserialize, Serialize};

/// Errors raised by graph parsing and reconstruction
#[derive(Debug, thiserror::Error)]
pub enum GraphError {
    /// Input had no header line
    #[error("missing header line")]
    MissingHeader,

    /// Header lacks a required column
    #[error("missing required column: {0}")]
    MissingColumn(String),

    /// Node type column held an unrecognized value
    #[error("unknown node type: {0}")]
    UnknownNodeType(String),

    /// A change record could not be applied to a graph
    #[error("cannot apply change to node {num}: {reason}")]
    InvalidChange { num: i32, reason: String },
}

/// An error reported by the external graph validator.
///
/// Every location component is optional: the validator sometimes reports
/// graph-level problems with no node or row attached.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationError {
    /// Node number the error refers to, if any
    pub node_num: Option<i32>,
    /// One-based row number in the tabular text, if any
    pub row_num: Option<usize>,
    /// Field name the error refers to, if any
    pub field: Option<String>,
    /// Human-readable description from the validator
    pub description: String,
    /// Offending field content, if the validator included it
    pub content: Option<String>,
}

impl ValidationError {
    /// Create an error with only a description
    #[inline]
    #[must_use]
    pub fn new(description: impl Into<String>) -> Self {
        Self {
            node_num: None,
            row_num: None,
            field: None,
            description: description.into(),
            content: None,
        }
    }

    /// Attach a node number
    #[inline]
    #[must_use]
    pub fn with_node(mut self, num: i32) -> Self {
        self.node_num = Some(num);
        self
    }

    /// Attach a row number
    #[inline]
    #[must_use]
    pub fn with_row(mut self, row: usize) -> Self {
        self.row_num = Some(row);
        self
    }

    /// Attach a field name
    #[inline]
    #[must_use]
    pub fn with_field(mut self, field: impl Into<String>) -> Self {
        self.field = Some(field.into());
        self
    }

    /// Attach the offending content
    #[inline]
    #[must_use]
    pub fn with_content(mut self, content: impl Into<String>) -> Self {
        self.content = Some(content.into());
        self
    }
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if let Some(num) = self.node_num {
            write!(f, "node {num}: ")?;
        }
        if let Some(field) = &self.field {
            write!(f, "[{field}] ")?;
        }
        write!(f, "{}", self.description)
    }
}
