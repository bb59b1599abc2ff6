//! Coarse error taxonomy
//!
//! An ordered keyword ladder matched against the error description and field
//! name; first rule wins. The ladder is configuration data rather than
//! branching so it can grow as the external validator's phrasing drifts,
//! without touching control flow.

use flowforge_graph::ValidationError;

/// One rung of the category ladder
#[derive(Debug, Clone, Copy)]
pub struct CategoryRule {
    /// Category label assigned on a match
    pub label: &'static str,
    /// Keywords searched case-insensitively in description and field
    pub keywords: &'static [&'static str],
}

/// Default ladder, ordered most-specific first.
pub const DEFAULT_LADDER: &[CategoryRule] = &[
    CategoryRule {
        label: "SINGLE_CHILD_CONSTRAINT",
        keywords: &["single child", "one child", "exactly one outgoing", "multiple children"],
    },
    CategoryRule {
        label: "DANGLING_REFERENCE",
        keywords: &["does not exist", "unknown node", "dangling", "unresolved", "missing target"],
    },
    CategoryRule {
        label: "LENGTH_CONSTRAINT",
        keywords: &["characters", "too long", "exceeds", "length"],
    },
    CategoryRule {
        label: "RESERVED_CHARACTER",
        keywords: &["reserved", "illegal character", "invalid character", "forbidden character"],
    },
    CategoryRule {
        label: "DUPLICATE_NODE",
        keywords: &["duplicate"],
    },
    CategoryRule {
        label: "MALFORMED_STRUCTURE",
        keywords: &["malformed", "unparseable", "invalid format", "syntax"],
    },
    CategoryRule {
        label: "INVALID_COMMAND",
        keywords: &["unknown command", "invalid command", "not a valid action"],
    },
    CategoryRule {
        label: "TYPE_MISMATCH",
        keywords: &["expected number", "expected boolean", "type mismatch", "not a number"],
    },
    CategoryRule {
        label: "MISSING_FIELD",
        keywords: &["required", "missing", "empty"],
    },
];

/// Categorize with the default ladder.
#[must_use]
pub fn categorize(error: &ValidationError) -> String {
    categorize_with(DEFAULT_LADDER, error)
}

/// Categorize with a custom ladder; falls back to `<FIELD>_ERROR` when the
/// error names a field, else `UNKNOWN_ERROR`.
#[must_use]
pub fn categorize_with(ladder: &[CategoryRule], error: &ValidationError) -> String {
    let description = error.description.to_ascii_lowercase();
    let field = error
        .field
        .as_deref()
        .unwrap_or("")
        .to_ascii_lowercase();

    for rule in ladder {
        for keyword in rule.keywords {
            if description.contains(keyword) || (!field.is_empty() && field.contains(keyword)) {
                return rule.label.to_string();
            }
        }
    }

    if field.is_empty() {
        "UNKNOWN_ERROR".to_string()
    } else {
        format!("{}_ERROR", field.to_ascii_uppercase().replace([' ', '-'], "_"))
    }
}
