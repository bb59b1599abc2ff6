//! Stable fingerprints for validator errors
//!
//! The core contract is determinism: errors that differ only in node number,
//! row number, quoted literal, or an embedded character count normalize to
//! the same text and therefore hash to the same signature. This is what lets
//! recurring mistakes accumulate history across unrelated generations.

use flowforge_graph::ValidationError;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

static NODE_REF: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)\bnode \d+").unwrap());
static ROW_REF: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)\brow \d+").unwrap());
static QUOTED_INT: Lazy<Regex> = Lazy::new(|| Regex::new(r#"["']\d+["']"#).unwrap());
static CHAR_COUNT: Lazy<Regex> = Lazy::new(|| Regex::new(r"\b\d+ characters?\b").unwrap());

/// A normalized, hashable fingerprint of a validator error.
///
/// Rendered as `err_<hex>` over a 32-bit rolling hash of the normalized
/// `field:description` text.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ErrorSignature(String);

impl ErrorSignature {
    /// Fingerprint a validator error
    #[must_use]
    pub fn of(error: &ValidationError) -> Self {
        Self(format!("err_{:08x}", fnv1a32(normalized_text(error).as_bytes())))
    }

    /// Signature string
    #[inline]
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ErrorSignature {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&ValidationError> for ErrorSignature {
    fn from(error: &ValidationError) -> Self {
        Self::of(error)
    }
}

/// The normalized `field:description` text a signature is hashed from.
///
/// Node references, row references, quoted integers, and character counts
/// are elided; the field name is lower-cased.
#[must_use]
pub fn normalized_text(error: &ValidationError) -> String {
    let field = error
        .field
        .as_deref()
        .unwrap_or("")
        .trim()
        .to_ascii_lowercase();

    let desc = NODE_REF.replace_all(&error.description, "node X");
    let desc = ROW_REF.replace_all(&desc, "row X");
    let desc = QUOTED_INT.replace_all(&desc, "\"X\"");
    let desc = CHAR_COUNT.replace_all(&desc, "N characters");

    format!("{field}:{}", desc.trim())
}

/// 32-bit FNV-1a rolling hash
fn fnv1a32(bytes: &[u8]) -> u32 {
    let mut hash: u32 = 0x811c_9dc5;
    for &b in bytes {
        hash ^= u32::from(b);
        hash = hash.wrapping_mul(0x0100_0193);
    }
    hash
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn node_numbers_are_elided() {
        let a = ValidationError::new("routing targets node 12 which is invalid")
            .with_field("routing")
            .with_node(12);
        let b = ValidationError::new("routing targets node 7340 which is invalid")
            .with_field("routing")
            .with_node(7340);

        assert_eq!(normalized_text(&a), normalized_text(&b));
        assert_eq!(ErrorSignature::of(&a), ErrorSignature::of(&b));
    }

    #[test]
    fn row_numbers_are_elided() {
        let a = ValidationError::new("Row 4 is malformed").with_row(4);
        let b = ValidationError::new("row 91 is malformed").with_row(91);
        assert_eq!(ErrorSignature::of(&a), ErrorSignature::of(&b));
    }

    #[test]
    fn quoted_integers_are_elided() {
        let a = ValidationError::new("variable '3' is not declared").with_field("variable");
        let b = ValidationError::new("variable \"118\" is not declared").with_field("variable");
        assert_eq!(ErrorSignature::of(&a), ErrorSignature::of(&b));
    }

    #[test]
    fn character_counts_are_elided() {
        let a = ValidationError::new("message exceeds 80 characters").with_field("message");
        let b = ValidationError::new("message exceeds 640 characters").with_field("message");
        assert_eq!(ErrorSignature::of(&a), ErrorSignature::of(&b));
    }

    #[test]
    fn field_name_case_is_normalized() {
        let a = ValidationError::new("empty value").with_field("Message");
        let b = ValidationError::new("empty value").with_field("message");
        assert_eq!(ErrorSignature::of(&a), ErrorSignature::of(&b));
    }

    #[test]
    fn different_mistakes_get_different_signatures() {
        let a = ValidationError::new("message exceeds 80 characters").with_field("message");
        let b = ValidationError::new("routing targets node 12 which is invalid")
            .with_field("routing");
        assert_ne!(ErrorSignature::of(&a), ErrorSignature::of(&b));
    }

    #[test]
    fn signature_is_deterministic() {
        let e = ValidationError::new("message exceeds 80 characters on node 12")
            .with_field("message")
            .with_node(12);
        assert_eq!(ErrorSignature::of(&e), ErrorSignature::of(&e));
        assert!(ErrorSignature::of(&e).as_str().starts_with("err_"));
    }

    #[test]
    fn normalized_shape() {
        let e = ValidationError::new("message exceeds 80 characters on node 12")
            .with_field("Message");
        assert_eq!(
            normalized_text(&e),
            "message:message exceeds N characters on node X"
        );
    }
}
