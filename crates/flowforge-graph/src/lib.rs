//! Flowforge Graph - conversation-flow graph model
//!
//! The bot's conversation structure as a directed graph of numbered nodes,
//! materialized as flat tabular text:
//! - Parsing and serialization of the header-plus-rows wire format
//! - Node numbering ranges with attached semantics
//! - Structural diffs between graph snapshots
//! - Best-effort association of diffs with validator errors
//!
//! # Example
//!
//! ```rust
//! use flowforge_graph::FlowGraph;
//!
//! let text = "num,type,name,message\n1,Decision,welcome,\"Hi, there\"\n";
//! let graph = FlowGraph::parse(text).unwrap();
//! assert_eq!(graph.len(), 1);
//! assert_eq!(graph.get(1).unwrap().name, "welcome");
//! ```

#![warn(unreachable_pub)]

pub mod diff;
pub mod error;
pub mod graph;
pub mod node;
pub mod tabular;

pub use diff::{ChangeKind, GraphDiff, NodeChange, diff, match_changes_to_errors};
pub use error::{GraphError, ValidationError};
pub use graph::FlowGraph;
pub use node::{FlowNode, NodeKind, fields};

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
