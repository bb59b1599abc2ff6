//! Flowforge Learn - error-learning subsystem
//!
//! Turns every validator rejection into reusable, confidence-scored
//! knowledge:
//! - Normalizes validator error text into stable, matchable fingerprints
//! - Buckets errors into a coarse category taxonomy
//! - Tracks remediation confidence (success / applied) per fingerprint
//! - Talks to the external pattern/fix store through a narrow client that
//!   degrades gracefully and backs off after repeated transport failures
//!
//! # Example
//!
//! ```rust
//! use flowforge_graph::ValidationError;
//! use flowforge_learn::{ErrorSignature, categorize};
//!
//! let a = ValidationError::new("message exceeds 80 characters on node 12")
//!     .with_field("message");
//! let b = ValidationError::new("message exceeds 80 characters on node 31")
//!     .with_field("message");
//!
//! // Same mistake, different node: same fingerprint.
//! assert_eq!(ErrorSignature::of(&a), ErrorSignature::of(&b));
//! assert_eq!(categorize(&a), "LENGTH_CONSTRAINT");
//! ```

#![warn(unreachable_pub)]

pub mod backoff;
pub mod category;
pub mod client;
pub mod fix;
pub mod repository;
pub mod signature;

pub use backoff::{BackoffPolicy, TransportBackoff};
pub use category::{CategoryRule, DEFAULT_LADDER, categorize, categorize_with};
pub use client::{HUMAN_IDENTIFIED, LearningClient};
pub use fix::FixAttempt;
pub use repository::{ErrorPattern, FixOutcome, FixRepository, NewPattern, RepositoryError};
pub use signature::{ErrorSignature, normalized_text};

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
