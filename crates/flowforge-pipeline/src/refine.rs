//! Iterative validate-and-refine loop
//!
//! Drives a candidate graph toward validator acceptance, bounded by a hard
//! attempt cap, and feeds every outcome back into the learning engine:
//! each rejection is normalized, categorized, and logged; each revision is
//! diffed against its predecessor so changes can be attributed to the
//! errors that prompted them; and each attribution is settled on the next
//! validation pass - success if the error disappeared, failure if it
//! persisted. Exhausting the cap is not fatal: the best graph and residual
//! errors are returned and the caller may still deploy, flagged for human
//! review.

use crate::config::PipelineConfig;
use crate::error::PipelineError;
use crate::remote::{
    DeployTarget, FlowDeployer, FlowGenerator, GenerationRequest, ValidationOutcome, bounded,
};
use flowforge_graph::{FlowGraph, ValidationError, diff, match_changes_to_errors};
use flowforge_learn::{ErrorSignature, FixAttempt, FixOutcome, LearningClient, categorize};
use std::collections::BTreeSet;

/// Characters the validator reserves for its own delimiters
const RESERVED_CHARS: &[char] = &['|', '~', '^', '`'];

/// Loop states
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefinePhase {
    /// Candidate graph in hand, not yet submitted
    Generated,
    /// Awaiting the validator's verdict
    Validating,
    /// Repairing a rejected graph
    Refining,
    /// Terminal: validator accepted
    Valid,
    /// Terminal: cap reached or no progress between passes
    MaxAttemptsReached,
}

/// Legal transitions out of a state.
#[must_use]
pub fn allowed_transitions(from: RefinePhase) -> Vec<RefinePhase> {
    use RefinePhase::*;
    match from {
        Generated => vec![Validating, MaxAttemptsReached],
        Validating => vec![Valid, Refining, Validating, MaxAttemptsReached],
        Refining => vec![Validating, MaxAttemptsReached],
        Valid => vec![],
        MaxAttemptsReached => vec![],
    }
}

/// Result of a refine run
#[derive(Debug)]
pub struct RefineOutcome {
    /// The final (best) graph
    pub graph: FlowGraph,
    /// Serialized form of the final graph
    pub graph_text: String,
    /// Whether the validator accepted
    pub accepted: bool,
    /// Deployment/version id, when acceptance carried one
    pub deployment_id: Option<String>,
    /// Validation passes consumed
    pub attempts: u32,
    /// Errors still standing after the final pass
    pub residual_errors: Vec<ValidationError>,
    /// Whether the residual errors warrant human review
    pub needs_human_review: bool,
    /// Terminal state
    pub final_phase: RefinePhase,
}

/// A fix application awaiting its verdict on the next validation pass
#[derive(Debug)]
struct PendingAttribution {
    signature: ErrorSignature,
    category: String,
    description: String,
    diff_summary: Option<String>,
}

/// The validate-and-refine loop
pub struct RefineLoop<'a> {
    generator: &'a dyn FlowGenerator,
    deployer: &'a dyn FlowDeployer,
    learning: &'a LearningClient,
    config: &'a PipelineConfig,
}

impl<'a> RefineLoop<'a> {
    /// Create a loop over the given collaborators
    #[inline]
    #[must_use]
    pub fn new(
        generator: &'a dyn FlowGenerator,
        deployer: &'a dyn FlowDeployer,
        learning: &'a LearningClient,
        config: &'a PipelineConfig,
    ) -> Self {
        Self {
            generator,
            deployer,
            learning,
            config,
        }
    }

    /// Drive the graph toward acceptance.
    ///
    /// # Errors
    /// Returns an error only for unparseable input or authentication
    /// expiry; an exhausted cap is an `Ok` outcome with residual errors.
    pub async fn run(
        &self,
        request: &GenerationRequest,
        initial_graph_text: &str,
        target: &DeployTarget,
    ) -> Result<RefineOutcome, PipelineError> {
        let mut graph = FlowGraph::parse(initial_graph_text)?;
        let mut phase = RefinePhase::Generated;
        let mut pending: Vec<PendingAttribution> = Vec::new();
        let mut prev_signatures: Option<BTreeSet<ErrorSignature>> = None;
        let mut residual: Vec<ValidationError> = Vec::new();
        let mut attempts = 0;
        let mut no_progress = false;

        while attempts < self.config.max_refine_attempts {
            attempts += 1;
            advance(&mut phase, RefinePhase::Validating);
            let graph_text = graph.serialize();

            let verdict = match bounded(
                self.config.call_timeout,
                self.deployer.validate(&graph_text, target),
            )
            .await
            {
                Ok(verdict) => verdict,
                Err(err) => {
                    tracing::warn!(attempt = attempts, error = %err, "validator unreachable, attempt consumed");
                    continue;
                }
            };

            let errors = match verdict {
                ValidationOutcome::AuthenticationFailed => {
                    return Err(PipelineError::AuthenticationExpired);
                }
                ValidationOutcome::Accepted { deployment_id } => {
                    self.settle_attributions(&mut pending, &BTreeSet::new()).await;
                    advance(&mut phase, RefinePhase::Valid);
                    tracing::info!(attempts, "validator accepted the graph");
                    return Ok(RefineOutcome {
                        graph_text,
                        graph,
                        accepted: true,
                        deployment_id: Some(deployment_id),
                        attempts,
                        residual_errors: Vec::new(),
                        needs_human_review: false,
                        final_phase: phase,
                    });
                }
                ValidationOutcome::Rejected(errors) if errors.is_empty() => {
                    self.settle_attributions(&mut pending, &BTreeSet::new()).await;
                    advance(&mut phase, RefinePhase::Valid);
                    return Ok(RefineOutcome {
                        graph_text,
                        graph,
                        accepted: true,
                        deployment_id: None,
                        attempts,
                        residual_errors: Vec::new(),
                        needs_human_review: false,
                        final_phase: phase,
                    });
                }
                ValidationOutcome::Rejected(errors) => errors,
            };

            tracing::info!(attempt = attempts, count = errors.len(), "validator rejected the graph");
            let signatures: BTreeSet<ErrorSignature> =
                errors.iter().map(ErrorSignature::of).collect();
            self.settle_attributions(&mut pending, &signatures).await;

            if prev_signatures.as_ref() == Some(&signatures) {
                tracing::warn!(attempt = attempts, "identical error set twice, stopping early");
                residual = errors;
                no_progress = true;
                break;
            }
            if attempts == self.config.max_refine_attempts {
                residual = errors;
                break;
            }

            advance(&mut phase, RefinePhase::Refining);
            for error in &errors {
                self.learning.note_error(error).await;
            }
            let known = self
                .learning
                .known_fixes(signatures.iter().cloned().collect())
                .await;
            let proven = self
                .learning
                .proven_fixes(
                    self.config.fix_confidence_threshold,
                    self.config.min_fix_applications,
                    self.config.proven_fix_limit,
                )
                .await;

            let mut unrepaired: Vec<ValidationError> = Vec::new();
            for error in &errors {
                let signature = ErrorSignature::of(error);
                let guidance = proven
                    .iter()
                    .chain(known.iter())
                    .find(|fix| fix.signature == signature);

                let mechanically_fixed = guidance
                    .filter(|fix| {
                        fix.is_proven(
                            self.config.fix_confidence_threshold,
                            self.config.min_fix_applications,
                        )
                    })
                    .and_then(|fix| {
                        let applied = try_mechanical_repair(&mut graph, error)?;
                        Some((fix, applied))
                    });

                match mechanically_fixed {
                    Some((fix, applied)) => {
                        tracing::info!(signature = %signature, "applied proven fix mechanically");
                        pending.push(PendingAttribution {
                            signature,
                            category: categorize(error),
                            description: applied,
                            diff_summary: fix.diff_summary.clone(),
                        });
                    }
                    None => unrepaired.push(error.clone()),
                }
            }

            // Snapshot after mechanical repairs so the diff reflects only the
            // generator's revision, attributed only to the errors sent to it.
            let before = graph.clone();
            if !unrepaired.is_empty() {
                let instruction = build_repair_instruction(&unrepaired, &known);
                match bounded(
                    self.config.call_timeout,
                    self.generator
                        .revise(request, &graph.serialize(), &instruction),
                )
                .await
                {
                    Ok(revised) => match FlowGraph::parse(&revised.graph_text) {
                        Ok(new_graph) => graph = new_graph,
                        Err(err) => {
                            tracing::warn!(error = %err, "revision unparseable, keeping prior graph");
                        }
                    },
                    Err(err) => {
                        tracing::warn!(attempt = attempts, error = %err, "generator unreachable, attempt consumed");
                    }
                }
            }

            let changes = diff(&before, &graph);
            if !changes.is_empty() {
                tracing::debug!(summary = %changes.summary(), "revision diff");
                for (change, error) in match_changes_to_errors(&changes.changes, &unrepaired) {
                    pending.push(PendingAttribution {
                        signature: ErrorSignature::of(error),
                        category: categorize(error),
                        description: change.describe(),
                        diff_summary: Some(changes.summary()),
                    });
                }
            }

            prev_signatures = Some(signatures);
            residual = errors;
        }

        advance(&mut phase, RefinePhase::MaxAttemptsReached);
        if no_progress {
            tracing::warn!(attempts, "refine loop made no progress");
        } else {
            tracing::warn!(attempts, "refine loop exhausted its attempt cap");
        }
        Ok(RefineOutcome {
            graph_text: graph.serialize(),
            graph,
            accepted: false,
            deployment_id: None,
            attempts,
            needs_human_review: !residual.is_empty(),
            residual_errors: residual,
            final_phase: phase,
        })
    }

    /// Settle attributions from the previous pass: an error that vanished
    /// proves its fix, one that persisted disproves it.
    async fn settle_attributions(
        &self,
        pending: &mut Vec<PendingAttribution>,
        current: &BTreeSet<ErrorSignature>,
    ) {
        for attribution in pending.drain(..) {
            let succeeded = !current.contains(&attribution.signature);
            self.learning
                .record_fix_outcome(FixOutcome {
                    signature: attribution.signature,
                    description: attribution.description,
                    diff_summary: attribution.diff_summary,
                    category: attribution.category,
                    succeeded,
                })
                .await;
        }
    }
}

fn advance(phase: &mut RefinePhase, next: RefinePhase) {
    debug_assert!(
        allowed_transitions(*phase).contains(&next),
        "illegal refine transition {phase:?} -> {next:?}"
    );
    *phase = next;
}

/// Direct in-process repair for error categories with an unambiguous edit.
///
/// Returns a description of what was done, or `None` when the error is not
/// mechanically repairable and must go back through the generator.
fn try_mechanical_repair(graph: &mut FlowGraph, error: &ValidationError) -> Option<String> {
    let num = error.node_num?;
    let field = error.field.as_deref()?;
    let node = graph.get_mut(num)?;
    let current = node.field(field)?.to_string();

    match categorize(error).as_str() {
        "LENGTH_CONSTRAINT" => {
            let limit = parse_char_limit(&error.description)?;
            if current.chars().count() <= limit {
                return None;
            }
            let truncated: String = current.chars().take(limit).collect();
            node.set_field(field, truncated);
            Some(format!("truncated {field} to {limit} characters"))
        }
        "RESERVED_CHARACTER" => {
            let cleaned: String = current
                .chars()
                .filter(|c| !RESERVED_CHARS.contains(c))
                .collect();
            if cleaned == current {
                return None;
            }
            node.set_field(field, cleaned);
            Some(format!("removed reserved characters from {field}"))
        }
        _ => None,
    }
}

/// First integer immediately preceding a "character"/"characters" token.
fn parse_char_limit(description: &str) -> Option<usize> {
    let tokens: Vec<&str> = description.split_whitespace().collect();
    tokens.windows(2).find_map(|pair| {
        if pair[1].starts_with("character") {
            pair[0].parse::<usize>().ok()
        } else {
            None
        }
    })
}

/// Synthesize the repair instruction sent back to the generator.
fn build_repair_instruction(errors: &[ValidationError], known: &[FixAttempt]) -> String {
    let mut out = String::from(
        "Revise the flow to clear these validation errors. \
         Keep all unaffected nodes and numbering unchanged.\n",
    );
    for error in errors {
        out.push_str("- ");
        if let Some(num) = error.node_num {
            out.push_str(&format!("node {num}: "));
        }
        if let Some(field) = &error.field {
            out.push_str(&format!("[{field}] "));
        }
        out.push_str(&error.description);
        if let Some(content) = &error.content {
            out.push_str(&format!(" (offending content: {content:?})"));
        }
        let signature = ErrorSignature::of(error);
        if let Some(fix) = known
            .iter()
            .find(|fix| fix.signature == signature && fix.success > 0)
        {
            out.push_str(&format!(" [previously successful fix: {}]", fix.description));
        }
        out.push('\n');
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use flowforge_graph::{FlowNode, NodeKind, fields};

    #[test]
    fn terminal_states_have_no_exits() {
        assert!(allowed_transitions(RefinePhase::Valid).is_empty());
        assert!(allowed_transitions(RefinePhase::MaxAttemptsReached).is_empty());
    }

    #[test]
    fn parse_char_limit_variants() {
        assert_eq!(parse_char_limit("message exceeds 80 characters"), Some(80));
        assert_eq!(parse_char_limit("limit is 1 character"), Some(1));
        assert_eq!(parse_char_limit("message is too long"), None);
    }

    #[test]
    fn mechanical_truncation() {
        let mut graph = FlowGraph::new();
        graph.insert(
            FlowNode::new(12, NodeKind::Decision, "ask")
                .with_field(fields::MESSAGE, "x".repeat(100)),
        );
        let error = ValidationError::new("message exceeds 80 characters")
            .with_node(12)
            .with_field(fields::MESSAGE);

        let applied = try_mechanical_repair(&mut graph, &error).unwrap();
        assert!(applied.contains("80"));
        assert_eq!(
            graph.get(12).unwrap().field(fields::MESSAGE).unwrap().len(),
            80
        );
    }

    #[test]
    fn mechanical_reserved_strip() {
        let mut graph = FlowGraph::new();
        graph.insert(
            FlowNode::new(7, NodeKind::Decision, "ask")
                .with_field(fields::MESSAGE, "pick|one~please"),
        );
        let error = ValidationError::new("message contains reserved delimiter")
            .with_node(7)
            .with_field(fields::MESSAGE);

        try_mechanical_repair(&mut graph, &error).unwrap();
        assert_eq!(
            graph.get(7).unwrap().field(fields::MESSAGE),
            Some("pickoneplease")
        );
    }

    #[test]
    fn mechanical_repair_needs_location() {
        let mut graph = FlowGraph::new();
        graph.insert(FlowNode::new(1, NodeKind::Action, "x"));
        let error = ValidationError::new("message exceeds 80 characters");
        assert!(try_mechanical_repair(&mut graph, &error).is_none());
    }

    #[test]
    fn repair_instruction_carries_guidance() {
        let error = ValidationError::new("message exceeds 80 characters")
            .with_node(12)
            .with_field("message")
            .with_content("a very long welcome message");
        let mut fix = FixAttempt::new(
            ErrorSignature::of(&error),
            "shorten the message below the limit",
            "LENGTH_CONSTRAINT",
        );
        fix.record_outcome(true);

        let instruction = build_repair_instruction(&[error], &[fix]);
        assert!(instruction.contains("node 12"));
        assert!(instruction.contains("[message]"));
        assert!(instruction.contains("offending content"));
        assert!(instruction.contains("previously successful fix"));
    }
}
