//! Script resolution
//!
//! Every script a deployed graph's runtime depends on must exist before
//! deploy. Identifiers are scanned from Action-node commands (minus the
//! built-in command allowlist), the fixed critical set is always unioned in
//! (global/startup nodes depend on scripts not visible as ordinary rows),
//! and resolution is bundled-first with a remote fallback. A critical miss
//! aborts the pipeline; non-critical misses only warn.

use crate::error::PipelineError;
use crate::remote::{RemoteError, ScriptStore, bounded};
use flowforge_graph::{FlowGraph, NodeKind, fields};
use std::collections::{BTreeSet, HashMap};
use std::time::Duration;

/// Commands handled by the runtime itself; never script identifiers
pub const BUILTIN_COMMANDS: &[&str] = &[
    "say", "ask", "goto", "set", "wait", "end", "transfer", "webhook",
];

/// Scripts whose absence guarantees runtime malfunction
pub const CRITICAL_SCRIPTS: &[&str] =
    &["global_error_handler", "session_bootstrap", "fallback_reply"];

const BUNDLED_GLOBAL_ERROR_HANDLER: &str =
    "routeTo(terminalRange.first); log('unhandled error');";
const BUNDLED_SESSION_BOOTSTRAP: &str =
    "session.init(); loadProfile(session.visitorId);";
const BUNDLED_FALLBACK_REPLY: &str =
    "reply(messages.fallback); routeTo(currentNode);";

/// Resolved bundle plus the non-critical identifiers that stayed missing
#[derive(Debug, Clone, Default)]
pub struct ResolvedScripts {
    /// Identifier to source
    pub scripts: HashMap<String, String>,
    /// Non-critical identifiers found in neither source
    pub missing: Vec<String>,
}

/// Bundled-first script resolver
#[derive(Debug, Clone)]
pub struct ScriptResolver {
    bundled: HashMap<String, String>,
    critical: BTreeSet<String>,
}

impl ScriptResolver {
    /// Create a resolver with the built-in bundle and critical set
    #[must_use]
    pub fn new() -> Self {
        let bundled = HashMap::from([
            (
                "global_error_handler".to_string(),
                BUNDLED_GLOBAL_ERROR_HANDLER.to_string(),
            ),
            (
                "session_bootstrap".to_string(),
                BUNDLED_SESSION_BOOTSTRAP.to_string(),
            ),
            (
                "fallback_reply".to_string(),
                BUNDLED_FALLBACK_REPLY.to_string(),
            ),
        ]);
        Self {
            bundled,
            critical: CRITICAL_SCRIPTS.iter().map(|s| (*s).to_string()).collect(),
        }
    }

    /// Add or replace a bundled script
    #[inline]
    pub fn add_bundled(&mut self, name: impl Into<String>, source: impl Into<String>) {
        self.bundled.insert(name.into(), source.into());
    }

    /// Register an additional critical identifier
    #[inline]
    pub fn add_critical(&mut self, name: impl Into<String>) {
        self.critical.insert(name.into());
    }

    /// Critical identifiers
    #[inline]
    #[must_use]
    pub fn critical(&self) -> &BTreeSet<String> {
        &self.critical
    }

    /// Preflight consistency check on the registry itself.
    ///
    /// # Errors
    /// Returns a preflight error for blank identifiers or empty bundled
    /// sources - an inconsistent registry must fail before generation cost.
    pub fn verify_registry(&self) -> Result<(), PipelineError> {
        for name in &self.critical {
            if name.trim().is_empty() || name.chars().any(char::is_whitespace) {
                return Err(PipelineError::Preflight(format!(
                    "malformed critical script identifier: {name:?}"
                )));
            }
        }
        for (name, source) in &self.bundled {
            if source.trim().is_empty() {
                return Err(PipelineError::Preflight(format!(
                    "bundled script {name} has empty source"
                )));
            }
        }
        Ok(())
    }

    /// Scan a graph for referenced script identifiers, critical set included.
    #[must_use]
    pub fn scan(&self, graph: &FlowGraph) -> BTreeSet<String> {
        let mut referenced: BTreeSet<String> =
            self.critical.iter().cloned().collect();

        for node in graph.nodes() {
            if node.kind != NodeKind::Action {
                continue;
            }
            let Some(command) = node.field(fields::COMMAND) else {
                continue;
            };
            let Some(head) = command.split_whitespace().next() else {
                continue;
            };
            if !BUILTIN_COMMANDS.contains(&head) {
                referenced.insert(head.to_string());
            }
        }
        referenced
    }

    /// Resolve every referenced identifier: bundle and run-supplied custom
    /// scripts first, remote store for the misses, concurrently.
    ///
    /// One remote failure never blocks the others; the critical-miss check
    /// happens only after all lookups settle.
    ///
    /// # Errors
    /// Returns `CriticalScriptsMissing` when a critical identifier is found
    /// in neither source.
    pub async fn resolve(
        &self,
        graph: &FlowGraph,
        custom_scripts: &HashMap<String, String>,
        store: &dyn ScriptStore,
        call_timeout: Duration,
    ) -> Result<ResolvedScripts, PipelineError> {
        let referenced = self.scan(graph);
        let mut resolved = ResolvedScripts::default();
        let mut misses: Vec<String> = Vec::new();

        for name in &referenced {
            if let Some(source) = self.bundled.get(name).or_else(|| custom_scripts.get(name)) {
                resolved.scripts.insert(name.clone(), source.clone());
            } else {
                misses.push(name.clone());
            }
        }

        if !misses.is_empty() {
            tracing::debug!(count = misses.len(), "fetching scripts from remote store");
            let lookups = misses.iter().map(|name| {
                let name = name.clone();
                async move {
                    let fetched: Result<Option<String>, RemoteError> =
                        bounded(call_timeout, store.fetch(&name)).await;
                    (name, fetched)
                }
            });

            for (name, fetched) in futures::future::join_all(lookups).await {
                match fetched {
                    Ok(Some(source)) => {
                        resolved.scripts.insert(name, source);
                    }
                    Ok(None) => {
                        resolved.missing.push(name);
                    }
                    Err(err) => {
                        tracing::warn!(script = %name, error = %err, "remote script lookup failed");
                        resolved.missing.push(name);
                    }
                }
            }
        }

        let missing_critical: Vec<String> = resolved
            .missing
            .iter()
            .filter(|name| self.critical.contains(*name))
            .cloned()
            .collect();
        if !missing_critical.is_empty() {
            return Err(PipelineError::CriticalScriptsMissing {
                missing: missing_critical,
            });
        }

        for name in &resolved.missing {
            tracing::warn!(script = %name, "non-critical script unresolved, deploying without it");
        }
        Ok(resolved)
    }
}

impl Default for ScriptResolver {
    fn default() -> Self {
        Self::new()
    }
}
