//! Flow nodes and their numbering semantics
//!
//! Each node is one row of the tabular wire format, identified by a unique
//! integer. The integer ranges carry meaning:
//! - negative: global error handlers
//! - 1..=9: startup / platform setup
//! - 10..=8999: feature flows
//! - 9000..=9999: reserved terminal / error nodes

use crate::error::GraphError;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Well-known sparse field names.
///
/// The wire format resolves columns by header name, so these are the
/// canonical spellings rather than positions.
pub mod fields {
    /// Message text presented to the user
    pub const MESSAGE: &str = "message";
    /// Rich-content descriptor (cards, images, quick replies)
    pub const RICH_CONTENT: &str = "rich_content";
    /// Command executed by an Action node
    pub const COMMAND: &str = "command";
    /// Parameter payload for the command
    pub const PARAMS: &str = "params";
    /// Variable a Decision node branches on
    pub const VARIABLE: &str = "variable";
    /// Routing expression referencing other node numbers
    pub const ROUTING: &str = "routing";
}

/// First node number of the reserved terminal/error range
pub const TERMINAL_RANGE_START: i32 = 9000;
/// Last node number of the reserved terminal/error range
pub const TERMINAL_RANGE_END: i32 = 9999;
/// Last node number of the startup/setup range
pub const SETUP_RANGE_END: i32 = 9;

/// The two node kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NodeKind {
    /// Presents content and branches on user input
    Decision,
    /// Executes a system or custom operation
    Action,
}

impl FromStr for NodeKind {
    type Err = GraphError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "decision" => Ok(Self::Decision),
            "action" => Ok(Self::Action),
            other => Err(GraphError::UnknownNodeType(other.to_string())),
        }
    }
}

impl std::fmt::Display for NodeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Decision => write!(f, "Decision"),
            Self::Action => write!(f, "Action"),
        }
    }
}

/// One node of a conversation flow
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlowNode {
    /// Node number, unique within a graph
    pub num: i32,
    /// Node kind
    pub kind: NodeKind,
    /// Node name
    pub name: String,
    /// Sparse named fields; absent fields are simply not present
    pub fields: IndexMap<String, String>,
}

impl FlowNode {
    /// Create a node with no sparse fields
    #[inline]
    #[must_use]
    pub fn new(num: i32, kind: NodeKind, name: impl Into<String>) -> Self {
        Self {
            num,
            kind,
            name: name.into(),
            fields: IndexMap::new(),
        }
    }

    /// Set a sparse field (builder style)
    #[inline]
    #[must_use]
    pub fn with_field(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.fields.insert(name.into(), value.into());
        self
    }

    /// Get a sparse field value
    #[inline]
    #[must_use]
    pub fn field(&self, name: &str) -> Option<&str> {
        self.fields.get(name).map(String::as_str)
    }

    /// Set a sparse field in place
    #[inline]
    pub fn set_field(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.fields.insert(name.into(), value.into());
    }

    /// Global error handler (negative range)
    #[inline]
    #[must_use]
    pub fn is_error_handler(&self) -> bool {
        self.num < 0
    }

    /// Startup/platform setup (low positive range)
    #[inline]
    #[must_use]
    pub fn is_setup(&self) -> bool {
        (1..=SETUP_RANGE_END).contains(&self.num)
    }

    /// Terminal/error node (high reserved range)
    #[inline]
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        (TERMINAL_RANGE_START..=TERMINAL_RANGE_END).contains(&self.num)
    }

    /// Flatten the node into a single field map, including the `type` and
    /// `name` columns. This is the representation the diff engine compares.
    #[must_use]
    pub fn flat_fields(&self) -> IndexMap<String, String> {
        let mut map = IndexMap::with_capacity(self.fields.len() + 2);
        map.insert("type".to_string(), self.kind.to_string());
        map.insert("name".to_string(), self.name.clone());
        for (k, v) in &self.fields {
            map.insert(k.clone(), v.clone());
        }
        map
    }

    /// Rebuild a node from a flat field map produced by [`flat_fields`].
    ///
    /// # Errors
    /// Returns an error when the `type` entry is missing or unrecognized.
    ///
    /// [`flat_fields`]: FlowNode::flat_fields
    pub fn from_flat_fields(num: i32, map: &IndexMap<String, String>) -> Result<Self, GraphError> {
        let kind = map
            .get("type")
            .ok_or_else(|| GraphError::MissingColumn("type".to_string()))?
            .parse::<NodeKind>()?;
        let name = map.get("name").cloned().unwrap_or_default();

        let mut node = Self::new(num, kind, name);
        for (k, v) in map {
            if k != "type" && k != "name" {
                node.fields.insert(k.clone(), v.clone());
            }
        }
        Ok(node)
    }
}
